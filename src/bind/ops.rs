//! Capability interfaces shared by the value wrappers
//!
//! Each wrapper composes the capabilities that make sense for it:
//!
//! | wrapper        | basic | table/userdata | indexable | callable |
//! |----------------|-------|----------------|-----------|----------|
//! | `LuaRef`       | yes   | yes            | yes       | yes      |
//! | `LuaTable`     | yes   | yes            | yes       |          |
//! | `LuaUserData`  | yes   | yes            | yes       |          |
//! | `LuaFunction`  | yes   |                |           | yes      |
//! | `LuaThread`    | yes   |                |           |          |

use crate::bind::element::TableKeyReference;
use crate::bind::function::MemFunBinder;
use crate::bind::guard::ScopedSavedStack;
use crate::bind::reference::{LuaRef, RegistryRef};
use crate::bind::table::LuaTable;
use crate::bind::traits::{push_single, LuaArgs, LuaGet, LuaPush};
use crate::error::{LuaError, Result};
use crate::lua::{CompareOp, LuaState, ValueType};

/// Walk the table at `index` with `next`
///
/// `f` sees the key at -2 and the value at -1 and must leave the stack as
/// it found it.
pub(crate) fn traverse(state: &LuaState, index: i32, mut f: impl FnMut(&LuaState) -> Result<()>) -> Result<()> {
    let table = state.abs_index(index);
    let _guard = ScopedSavedStack::new(state);
    state.push_nil()?;
    while state.next(table)? {
        f(state)?;
        state.pop(1)?;
    }
    Ok(())
}

/// Operations every value reference supports
pub trait BasicValueOps {
    /// The underlying registry entry
    fn registry_ref(&self) -> &RegistryRef;

    /// Runtime the value belongs to (`None` for the empty reference)
    fn state(&self) -> Option<&LuaState> {
        self.registry_ref().state()
    }

    /// Whether this is the empty reference
    fn is_nilref(&self) -> bool {
        self.registry_ref().is_nilref()
    }

    /// Whether the referenced value is nil (true for the empty reference too)
    fn is_nil(&self) -> bool {
        self.value_type().is_none_or_nil()
    }

    /// Type of the referenced value
    fn value_type(&self) -> ValueType {
        self.registry_ref().value_type()
    }

    /// Type name of the referenced value
    fn type_name(&self) -> &'static str {
        self.value_type().name()
    }

    /// Push the referenced value onto `state`
    fn push_to(&self, state: &LuaState) -> Result<()> {
        self.registry_ref().push_to(state)
    }

    /// Convert the referenced value
    fn get<T: LuaGet>(&self) -> Result<T> {
        self.registry_ref().with_pushed(|state| T::get(state, -1))
    }

    /// Strict type test
    fn type_test<T: LuaGet>(&self) -> bool {
        self.registry_ref()
            .with_pushed(|state| Ok(T::strict_check_type(state, -1)))
            .unwrap_or(false)
    }

    /// Weak type test
    fn weak_type_test<T: LuaGet>(&self) -> bool {
        self.registry_ref()
            .with_pushed(|state| Ok(T::check_type(state, -1)))
            .unwrap_or(false)
    }

    /// New generic reference to the same value
    fn to_lua_ref(&self) -> LuaRef {
        LuaRef::from(self.registry_ref().clone())
    }

    /// `self == other` with the runtime's semantics
    fn equals<O: BasicValueOps + ?Sized>(&self, other: &O) -> Result<bool> {
        self.registry_ref().compare(other.registry_ref(), CompareOp::Eq)
    }

    /// `self < other` with the runtime's semantics
    fn less_than<O: BasicValueOps + ?Sized>(&self, other: &O) -> Result<bool> {
        self.registry_ref().compare(other.registry_ref(), CompareOp::Lt)
    }

    /// `self <= other` with the runtime's semantics
    fn less_equal<O: BasicValueOps + ?Sized>(&self, other: &O) -> Result<bool> {
        self.registry_ref().compare(other.registry_ref(), CompareOp::Le)
    }
}

/// Field access, enumeration and metatables for tables and userdata
///
/// All of these fail with a type mismatch (also reported through the
/// runtime's error handler) when the value is neither a table nor userdata.
pub trait TableOrUserDataOps: BasicValueOps {
    /// Runtime of the value, after checking it is a table or userdata
    fn table_state(&self, operation: &str) -> Result<&LuaState> {
        let actual = self.value_type();
        match self.state() {
            Some(state) if matches!(actual, ValueType::Table | ValueType::UserData) => Ok(state),
            state => {
                let err = LuaError::type_mismatch(format!("{}: table or userdata expected, got {}", operation, actual));
                if let Some(state) = state {
                    state.report_error(err.clone());
                }
                Err(err)
            }
        }
    }

    /// `value[key]`, honouring `__index`
    fn get_field<K: LuaPush, V: LuaGet>(&self, key: K) -> Result<V> {
        let state = self.table_state("get_field")?;
        let _guard = ScopedSavedStack::new(state);
        self.push_to(state)?;
        push_single(&key, state)?;
        state.get_table(-2)?;
        V::get(state, -1)
    }

    /// `value[key] = v`, honouring `__newindex`
    fn set_field<K: LuaPush, V: LuaPush>(&self, key: K, value: V) -> Result<()> {
        let state = self.table_state("set_field")?;
        let _guard = ScopedSavedStack::new(state);
        self.push_to(state)?;
        push_single(&key, state)?;
        push_single(&value, state)?;
        state.set_table(-3)
    }

    /// All key/value pairs in traversal order
    fn pairs<K: LuaGet, V: LuaGet>(&self) -> Result<Vec<(K, V)>> {
        let mut out = Vec::new();
        self.for_each(|state| {
            Vec::push(&mut out, (K::get(state, -2)?, V::get(state, -1)?));
            Ok(())
        })?;
        Ok(out)
    }

    /// All keys in traversal order
    fn keys<K: LuaGet>(&self) -> Result<Vec<K>> {
        let mut out = Vec::new();
        self.for_each(|state| {
            Vec::push(&mut out, K::get(state, -2)?);
            Ok(())
        })?;
        Ok(out)
    }

    /// All values in traversal order
    fn values<V: LuaGet>(&self) -> Result<Vec<V>> {
        let mut out = Vec::new();
        self.for_each(|state| {
            Vec::push(&mut out, V::get(state, -1)?);
            Ok(())
        })?;
        Ok(out)
    }

    /// Visit every entry with the key at -2 and the value at -1
    fn for_each<F: FnMut(&LuaState) -> Result<()>>(&self, f: F) -> Result<()> {
        let state = self.table_state("for_each")?;
        if self.value_type() != ValueType::Table {
            return Err(LuaError::type_mismatch("userdata cannot be enumerated"));
        }
        let _guard = ScopedSavedStack::new(state);
        self.push_to(state)?;
        traverse(state, -1, f)
    }

    /// Replace the metatable
    fn set_metatable(&self, metatable: &LuaTable) -> Result<()> {
        let state = self.table_state("set_metatable")?;
        let _guard = ScopedSavedStack::new(state);
        self.push_to(state)?;
        metatable.push_to(state)?;
        state.set_metatable(-2)
    }

    /// Current metatable, if any
    fn get_metatable(&self) -> Result<Option<LuaTable>> {
        let state = self.table_state("get_metatable")?;
        let _guard = ScopedSavedStack::new(state);
        self.push_to(state)?;
        if state.get_metatable(-1)? {
            LuaTable::from_stack_top(state).map(Some)
        } else {
            Ok(None)
        }
    }
}

/// Lazy element access
pub trait IndexableTable: BasicValueOps {
    /// Capture `value[key]` without reading it
    ///
    /// The returned reference keeps the value and key on the stack until it
    /// is dropped. Reading a missing key (or indexing a non-table) yields
    /// nil; assigning into a non-table fails.
    ///
    /// The empty reference, including a wrapper that failed its type check
    /// at construction, has no runtime to capture on and fails with
    /// `InvalidOperation`.
    fn index<K: LuaPush>(&self, key: K) -> Result<TableKeyReference<'_>> {
        let state = self
            .state()
            .ok_or_else(|| LuaError::InvalidOperation("cannot index an empty reference".to_string()))?;
        TableKeyReference::capture(state, self.registry_ref(), &key)
    }

    /// Bind `value:name(...)` style calls
    fn method(&self, name: &str) -> MemFunBinder {
        MemFunBinder::new(self.to_lua_ref(), name)
    }
}

/// Calls through the runtime's calling convention
pub trait CallableValue: BasicValueOps {
    /// Call with `args`, converting the first result
    fn call<A: LuaArgs, R: LuaGet>(&self, args: A) -> Result<R> {
        let state = self.callable_state()?;
        let _guard = ScopedSavedStack::new(state);
        self.push_to(state)?;
        let nargs = args.push_args(state)?;
        state.call(nargs, Some(1))?;
        R::get(state, -1)
    }

    /// Call with `args`, pinning every result
    fn call_multi<A: LuaArgs>(&self, args: A) -> Result<Vec<LuaRef>> {
        let state = self.callable_state()?;
        let _guard = ScopedSavedStack::new(state);
        let base = state.get_top();
        self.push_to(state)?;
        let nargs = args.push_args(state)?;
        let count = state.call(nargs, None)?;
        (1..=count as i32).map(|i| LuaRef::from_index(state, base + i)).collect()
    }

    /// Runtime of the callee
    fn callable_state(&self) -> Result<&LuaState> {
        self.state()
            .ok_or_else(|| LuaError::InvalidOperation("cannot call an empty reference".to_string()))
    }
}
