//! Class metatables
//!
//! Element references can store a fresh instance of a class
//! ([`crate::TableKeyReference::set_class`]); the class itself is anything
//! that can produce its metatable on a runtime.

use crate::bind::function::LuaFunction;
use crate::bind::ops::TableOrUserDataOps;
use crate::bind::table::LuaTable;
use crate::config::LogLevel;
use crate::error::Result;
use crate::lua::{LuaState, NativeFunction};
use std::rc::Rc;

/// Produces the metatable describing a class
pub trait ClassMetatable {
    /// Build (or look up) the class metatable on `state`
    fn register_class(&self, state: &LuaState) -> Result<LuaTable>;
}

/// A class made of named native methods
///
/// The registered metatable indexes itself, so instances find their
/// methods through `__index`.
#[derive(Clone)]
pub struct ClassMethods {
    name: String,
    methods: Vec<(String, NativeFunction)>,
}

impl ClassMethods {
    /// Start a class called `name`
    pub fn new(name: impl Into<String>) -> Self {
        ClassMethods { name: name.into(), methods: Vec::new() }
    }

    /// Add a method
    pub fn method<F>(mut self, name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&LuaState) -> Result<usize> + 'static,
    {
        self.methods.push((name.into(), Rc::new(func)));
        self
    }

    /// Class name, stored as `__name` in the metatable
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl ClassMetatable for ClassMethods {
    fn register_class(&self, state: &LuaState) -> Result<LuaTable> {
        let metatable = LuaTable::with_capacity(state, 0, self.methods.len() + 2)?;
        metatable.set_field("__name", self.name.as_str())?;
        metatable.set_field("__index", &metatable)?;
        for (name, func) in &self.methods {
            let func = LuaFunction::from_native(state, func.clone())?;
            metatable.set_field(name.as_str(), &func)?;
        }
        if state.config().logs(LogLevel::Verbose) {
            println!("[LUA_REF] Registered class {} ({} methods)", self.name, self.methods.len());
        }
        Ok(metatable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bind::ops::{BasicValueOps, IndexableTable};
    use crate::config::BindConfig;

    #[test]
    fn test_instances_find_methods() {
        let l = LuaState::with_config(BindConfig::default());
        let class = ClassMethods::new("Counter").method("zero", |l: &LuaState| {
            l.push_number(0.0)?;
            Ok(1)
        });

        let world = LuaTable::new(&l).unwrap();
        world.index("counter").unwrap().set_class(&class).unwrap();

        let instance: LuaTable = world.get_field("counter").unwrap();
        let mt = instance.get_metatable().unwrap().unwrap();
        assert_eq!(mt.get_field::<_, String>("__name").unwrap(), "Counter");

        let zero: i32 = world.index("counter").unwrap().method("zero").unwrap().call(()).unwrap();
        assert_eq!(zero, 0);
        assert!(!instance.is_nilref());
        assert_eq!(l.get_top(), 0);
    }
}
