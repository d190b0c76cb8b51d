//! Function and thread wrappers, plus the method-call binder

use crate::bind::guard::ScopedSavedStack;
use crate::bind::ops::{BasicValueOps, CallableValue};
use crate::bind::reference::{value_wrapper, LuaRef, RegistryRef};
use crate::bind::table::LuaTable;
use crate::bind::traits::{LuaArgs, LuaGet};
use crate::error::{LuaError, Result};
use crate::lua::{LuaState, NativeFunction, ValueType};
use std::rc::Rc;

/// Reference to a function
#[derive(Clone, Debug, PartialEq, PartialOrd)]
pub struct LuaFunction {
    inner: RegistryRef,
}

value_wrapper!(LuaFunction, ValueType::Function);

impl LuaFunction {
    /// Wrap a native closure
    ///
    /// The closure sees its arguments at stack indices `1..=n`, pushes its
    /// results and returns how many it pushed.
    pub fn new<F>(state: &LuaState, func: F) -> Result<Self>
    where
        F: Fn(&LuaState) -> Result<usize> + 'static,
    {
        Self::from_native(state, Rc::new(func))
    }

    /// Wrap an already shared native function
    pub fn from_native(state: &LuaState, func: NativeFunction) -> Result<Self> {
        state.push_function(func)?;
        Self::from_stack_top(state)
    }

    /// Set the function's environment table
    pub fn set_function_env(&self, env: &LuaTable) -> Result<()> {
        let state = self.callable_state()?;
        let _guard = ScopedSavedStack::new(state);
        self.push_to(state)?;
        env.push_to(state)?;
        state.set_function_env(-2)
    }

    /// The function's environment table, if one was set
    pub fn get_function_env(&self) -> Result<Option<LuaTable>> {
        let state = self.callable_state()?;
        let _guard = ScopedSavedStack::new(state);
        self.push_to(state)?;
        state.get_function_env(-1)?;
        if state.type_at(-1) == ValueType::Table {
            LuaTable::from_stack_top(state).map(Some)
        } else {
            Ok(None)
        }
    }
}

impl CallableValue for LuaFunction {}

/// Reference to a thread
///
/// Each thread has its own stack over the shared heap, so its
/// [`LuaState`] is a separate runtime instance for element references.
#[derive(Clone, Debug, PartialEq, PartialOrd)]
pub struct LuaThread {
    inner: RegistryRef,
}

value_wrapper!(LuaThread, ValueType::Thread);

impl LuaThread {
    /// Create a thread
    pub fn new(state: &LuaState) -> Result<Self> {
        state.new_thread()?;
        Self::from_stack_top(state)
    }

    /// Stack handle of the thread
    pub fn thread_state(&self) -> Option<LuaState> {
        self.inner.with_pushed(|state| Ok(state.to_thread(-1))).ok().flatten()
    }

    /// Run `func` to completion on this thread's stack
    pub fn run<A: LuaArgs, R: LuaGet>(&self, func: &LuaFunction, args: A) -> Result<R> {
        let thread = self
            .thread_state()
            .ok_or_else(|| LuaError::InvalidOperation("not a live thread".to_string()))?;
        let _guard = ScopedSavedStack::new(&thread);
        func.push_to(&thread)?;
        let nargs = args.push_args(&thread)?;
        thread.call(nargs, Some(1))?;
        R::get(&thread, -1)
    }
}

/// `object:name(args...)`: looks `name` up on the object and calls it with
/// the object as first argument
#[derive(Debug, Clone)]
pub struct MemFunBinder {
    object: LuaRef,
    name: String,
}

impl MemFunBinder {
    /// Bind `name` on `object`
    pub fn new(object: LuaRef, name: impl Into<String>) -> Self {
        MemFunBinder { object, name: name.into() }
    }

    /// The bound object
    pub fn object(&self) -> &LuaRef {
        &self.object
    }

    /// Call, converting the first result
    pub fn call<A: LuaArgs, R: LuaGet>(&self, args: A) -> Result<R> {
        self.invoke(&args, Some(1), |state, _, _| R::get(state, -1))
    }

    /// Call, pinning every result
    pub fn call_multi<A: LuaArgs>(&self, args: A) -> Result<Vec<LuaRef>> {
        self.invoke(&args, None, |state, first, count| {
            (0..count as i32).map(|i| LuaRef::from_index(state, first + i)).collect()
        })
    }

    /// Push the object, look the method up, call it with the object as self
    /// and hand the results (first index, count) to `read`
    fn invoke<A, T>(
        &self,
        args: &A,
        nresults: Option<usize>,
        read: impl FnOnce(&LuaState, i32, usize) -> Result<T>,
    ) -> Result<T>
    where
        A: LuaArgs,
    {
        let state = self
            .object
            .state()
            .ok_or_else(|| LuaError::InvalidOperation(format!("cannot call '{}' on an empty reference", self.name)))?;
        let _guard = ScopedSavedStack::new(state);
        self.object.push_to(state)?;
        let object = state.get_top();
        state.get_field(object, &self.name)?;
        state.push_value(object)?;
        let nargs = args.push_args(state)?;
        let count = state.call(nargs + 1, nresults)?;
        read(state, object + 1, count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bind::ops::{IndexableTable, TableOrUserDataOps};
    use crate::config::BindConfig;

    fn state() -> LuaState {
        LuaState::with_config(BindConfig::default())
    }

    #[test]
    fn test_call_native_closure() {
        let l = state();
        let add = LuaFunction::new(&l, |l: &LuaState| {
            let a = i64::get(l, 1)?;
            let b = i64::get(l, 2)?;
            l.push_number((a + b) as f64)?;
            Ok(1)
        })
        .unwrap();
        assert_eq!(add.call::<_, i64>((2, 3)).unwrap(), 5);
        assert_eq!(l.get_top(), 0);
        assert!(add.call::<_, i64>(("x", 3)).unwrap_err().is_type_mismatch());
        assert_eq!(l.get_top(), 0);
    }

    #[test]
    fn test_call_multi_results() {
        let l = state();
        let swap = LuaFunction::new(&l, |l: &LuaState| {
            l.push_value(2)?;
            l.push_value(1)?;
            Ok(2)
        })
        .unwrap();
        let results = swap.call_multi(("a", "b")).unwrap();
        let strings: Vec<String> = results.iter().map(|r| r.get::<String>().unwrap()).collect();
        assert_eq!(strings, vec!["b", "a"]);
        assert_eq!(l.get_top(), 0);
    }

    #[test]
    fn test_function_env() {
        let l = state();
        let f = LuaFunction::new(&l, |_: &LuaState| Ok(0)).unwrap();
        assert!(f.get_function_env().unwrap().is_none());
        let env = LuaTable::new(&l).unwrap();
        f.set_function_env(&env).unwrap();
        assert_eq!(f.get_function_env().unwrap(), Some(env));
    }

    #[test]
    fn test_method_binder_passes_self() {
        let l = state();
        let counter = LuaTable::new(&l).unwrap();
        counter.set_field("count", 10).unwrap();
        let add = LuaFunction::new(&l, |l: &LuaState| {
            let this = LuaTable::from_index(l, 1)?;
            let by = i64::get(l, 2)?;
            let count: i64 = this.get_field("count")?;
            this.set_field("count", count + by)?;
            l.push_number((count + by) as f64)?;
            Ok(1)
        })
        .unwrap();
        counter.set_field("add", &add).unwrap();

        let result: i64 = counter.method("add").call((5,)).unwrap();
        assert_eq!(result, 15);
        assert_eq!(counter.get_field::<_, i64>("count").unwrap(), 15);
        assert_eq!(l.get_top(), 0);

        let all = counter.method("add").call_multi((1,)).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].get::<i64>().unwrap(), 16);
        assert_eq!(l.get_top(), 0);
    }

    #[test]
    fn test_method_on_missing_name_fails() {
        let l = state();
        let t = LuaTable::new(&l).unwrap();
        assert!(t.method("nope").call::<_, ()>(()).unwrap_err().is_type_mismatch());
        assert_eq!(l.get_top(), 0);
    }

    #[test]
    fn test_thread_runs_on_own_stack() {
        let l = state();
        let thread = LuaThread::new(&l).unwrap();
        assert_eq!(l.get_top(), 0);
        let co = thread.thread_state().unwrap();
        assert!(!co.is_same_runtime(&l));

        let depth = LuaFunction::new(&l, |l: &LuaState| {
            l.push_number(l.get_top() as f64)?;
            Ok(1)
        })
        .unwrap();
        assert_eq!(thread.run::<_, i32>(&depth, (1, 2, 3)).unwrap(), 3);
        assert_eq!(co.get_top(), 0);
    }
}
