//! Table and userdata wrappers
//!
//! Both wrappers check the value's type when they are built. A mismatch is
//! reported through the runtime's error handler and leaves the empty
//! reference behind; construction itself does not fail, so callers that
//! care check `is_nilref()` afterwards.

use crate::bind::guard::ScopedSavedStack;
use crate::bind::ops::{BasicValueOps, IndexableTable, TableOrUserDataOps};
use crate::bind::reference::{value_wrapper, RegistryRef};
use crate::error::{LuaError, Result};
use crate::lua::{LuaState, ValueType};
use std::any::Any;

/// Reference to a table
#[derive(Clone, Debug, PartialEq, PartialOrd)]
pub struct LuaTable {
    inner: RegistryRef,
}

value_wrapper!(LuaTable, ValueType::Table);

impl LuaTable {
    /// Create an empty table
    pub fn new(state: &LuaState) -> Result<Self> {
        Self::with_capacity(state, 0, 0)
    }

    /// Create an empty table with size hints for the array and hash parts
    pub fn with_capacity(state: &LuaState, narr: usize, nrec: usize) -> Result<Self> {
        Ok(LuaTable { inner: RegistryRef::new_table(state, narr, nrec)? })
    }

    /// Length of the array part (`#t`)
    pub fn len(&self) -> Result<usize> {
        let state = self.table_state("len")?;
        let _guard = ScopedSavedStack::new(state);
        self.push_to(state)?;
        state.raw_len(-1)
    }

    /// Whether the table has no entries
    pub fn is_empty(&self) -> Result<bool> {
        let state = self.table_state("is_empty")?;
        let _guard = ScopedSavedStack::new(state);
        self.push_to(state)?;
        state.push_nil()?;
        Ok(!state.next(-2)?)
    }
}

impl TableOrUserDataOps for LuaTable {}
impl IndexableTable for LuaTable {}

/// Reference to a full userdata
#[derive(Clone, Debug, PartialEq, PartialOrd)]
pub struct LuaUserData {
    inner: RegistryRef,
}

value_wrapper!(LuaUserData, ValueType::UserData);

impl LuaUserData {
    /// Move a native value into a new userdata
    pub fn new<T: Any>(state: &LuaState, data: T) -> Result<Self> {
        state.push_userdata(data)?;
        Self::from_stack_top(state)
    }

    /// Borrow the payload as `T`
    pub fn with<T: Any, R>(&self, f: impl FnOnce(&T) -> R) -> Result<R> {
        let cell = self.cell()?;
        let data = cell
            .try_borrow()
            .map_err(|_| LuaError::InvalidOperation("userdata is mutably borrowed".to_string()))?;
        let value = data
            .downcast_ref::<T>()
            .ok_or_else(|| LuaError::type_mismatch(format!("userdata is not {}", std::any::type_name::<T>())))?;
        Ok(f(value))
    }

    /// Borrow the payload mutably as `T`
    pub fn with_mut<T: Any, R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R> {
        let cell = self.cell()?;
        let mut data = cell
            .try_borrow_mut()
            .map_err(|_| LuaError::InvalidOperation("userdata is already borrowed".to_string()))?;
        let value = data
            .downcast_mut::<T>()
            .ok_or_else(|| LuaError::type_mismatch(format!("userdata is not {}", std::any::type_name::<T>())))?;
        Ok(f(value))
    }

    /// Whether the payload is a `T`
    pub fn is<T: Any>(&self) -> bool {
        self.with::<T, _>(|_| ()).is_ok()
    }

    fn cell(&self) -> Result<crate::lua::UserDataCell> {
        self.inner.with_pushed(|state| {
            state
                .to_userdata(-1)
                .ok_or_else(|| LuaError::type_mismatch("userdata expected, got nil"))
        })
    }
}

impl TableOrUserDataOps for LuaUserData {}
impl IndexableTable for LuaUserData {}
