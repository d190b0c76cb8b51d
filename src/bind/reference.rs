//! Persistent value references
//!
//! A [`RegistryRef`] pins one runtime value in the registry for as long as
//! it lives. Cloning registers a second entry for the same underlying value
//! (aliasing, never a deep copy); dropping releases the entry.
//!
//! The empty reference ([`RegistryRef::nilref`]) has no runtime at all. It
//! pushes as nil, compares equal only to other empty references and nil,
//! and is a no-op to release. It is a different thing from a reference that
//! pins the runtime's nil value: `is_nilref()` is true only for the former,
//! `is_nil()` for both.

use crate::bind::guard::ScopedSavedStack;
use crate::bind::ops::{BasicValueOps, CallableValue, IndexableTable, TableOrUserDataOps};
use crate::bind::traits::{push_single, LuaGet, LuaPush};
use crate::config::LogLevel;
use crate::error::{LuaError, Result};
use crate::lua::{CompareOp, LuaState, RegistryKey, ValueType};
use std::cmp::Ordering;
use std::fmt;

struct RefSlot {
    state: LuaState,
    key: RegistryKey,
}

/// Owner of one registry entry
pub struct RegistryRef {
    slot: Option<RefSlot>,
}

impl RegistryRef {
    /// The empty reference
    pub fn nilref() -> Self {
        RegistryRef { slot: None }
    }

    /// Pin the value on top of the stack, consuming that slot
    ///
    /// The slot is consumed on failure too.
    pub fn from_stack_top(state: &LuaState) -> Result<Self> {
        match state.registry_ref() {
            Ok(key) => Ok(RegistryRef { slot: Some(RefSlot { state: state.clone(), key }) }),
            Err(e) => {
                let _ = state.pop(1);
                Err(e)
            }
        }
    }

    /// Pin the value at `index` (nil when the slot does not exist)
    pub fn from_index(state: &LuaState, index: i32) -> Result<Self> {
        if state.type_at(index) == ValueType::None {
            state.push_nil()?;
        } else {
            state.push_value(index)?;
        }
        Self::from_stack_top(state)
    }

    /// Create a fresh table and pin it
    pub fn new_table(state: &LuaState, narr: usize, nrec: usize) -> Result<Self> {
        state.create_table(narr, nrec)?;
        Self::from_stack_top(state)
    }

    /// Whether this is the empty reference
    pub fn is_nilref(&self) -> bool {
        self.slot.is_none()
    }

    /// Runtime the value belongs to
    pub fn state(&self) -> Option<&LuaState> {
        self.slot.as_ref().map(|slot| &slot.state)
    }

    /// Type of the referenced value (nil for the empty reference)
    pub fn value_type(&self) -> ValueType {
        match &self.slot {
            Some(slot) => slot.state.registry_type(slot.key),
            None => ValueType::Nil,
        }
    }

    /// Push the referenced value onto `state`
    ///
    /// `state` must share this reference's heap (any thread of the same
    /// runtime). The empty reference pushes nil anywhere.
    pub fn push_to(&self, state: &LuaState) -> Result<()> {
        match &self.slot {
            Some(slot) => {
                slot.state.check_shares_heap(state)?;
                state.push_registry_ref(slot.key)
            }
            None => state.push_nil(),
        }
    }

    /// Release the registry entry, leaving the empty reference
    pub fn unref(&mut self) {
        if let Some(slot) = self.slot.take() {
            slot.state.registry_unref(slot.key);
        }
    }

    /// Register another entry for the same value
    pub fn duplicate(&self) -> Result<Self> {
        match &self.slot {
            Some(slot) => {
                slot.state.push_registry_ref(slot.key)?;
                Self::from_stack_top(&slot.state)
            }
            None => Ok(RegistryRef::nilref()),
        }
    }

    /// Run `f` with the referenced value on top of the owning stack
    pub(crate) fn with_pushed<R>(&self, f: impl FnOnce(&LuaState) -> Result<R>) -> Result<R> {
        let state = self
            .state()
            .ok_or_else(|| LuaError::InvalidOperation("empty reference has no runtime".to_string()))?;
        let _guard = ScopedSavedStack::new(state);
        self.push_to(state)?;
        f(state)
    }

    /// Compare with the runtime's semantics (`self op other`)
    pub fn compare(&self, other: &RegistryRef, op: CompareOp) -> Result<bool> {
        let state = match self.state().or_else(|| other.state()) {
            Some(state) => state,
            // Two empty references
            None => return Ok(op != CompareOp::Lt),
        };
        let _guard = ScopedSavedStack::new(state);
        self.push_to(state)?;
        other.push_to(state)?;
        state.compare(-2, -1, op)
    }

    /// Check the referenced value's tag; report and release on mismatch
    pub(crate) fn typecheck(mut self, expected: ValueType) -> Self {
        let actual = self.value_type();
        if let Some(state) = self.state() {
            if actual != expected {
                let state = state.clone();
                if state.config().logs(LogLevel::Verbose) {
                    println!("[LUA_REF] {} expected, got {}; dropping reference", expected, actual);
                }
                state.report_error(LuaError::type_mismatch(format!("{} expected, got {}", expected, actual)));
                self.unref();
            }
        }
        self
    }
}

impl Clone for RegistryRef {
    fn clone(&self) -> Self {
        match self.duplicate() {
            Ok(copy) => copy,
            Err(e) => {
                if let Some(state) = self.state() {
                    state.report_error(e);
                }
                RegistryRef::nilref()
            }
        }
    }
}

impl Drop for RegistryRef {
    fn drop(&mut self) {
        self.unref();
    }
}

impl PartialEq for RegistryRef {
    fn eq(&self, other: &Self) -> bool {
        self.compare(other, CompareOp::Eq).unwrap_or(false)
    }
}

impl PartialOrd for RegistryRef {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.compare(other, CompareOp::Eq).ok()? {
            Some(Ordering::Equal)
        } else if self.compare(other, CompareOp::Lt).ok()? {
            Some(Ordering::Less)
        } else if other.compare(self, CompareOp::Lt).ok()? {
            Some(Ordering::Greater)
        } else {
            None
        }
    }
}

impl fmt::Debug for RegistryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.slot {
            Some(slot) => f
                .debug_struct("RegistryRef")
                .field("type", &self.value_type())
                .field("key", &slot.key)
                .finish(),
            None => f.write_str("RegistryRef(nilref)"),
        }
    }
}

impl fmt::Display for RegistryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_nilref() {
            return f.write_str("nil");
        }
        match self.with_pushed(|state| Ok(state.to_display_string(-1))) {
            Ok(text) => f.write_str(&text),
            Err(_) => f.write_str("<unavailable>"),
        }
    }
}

impl BasicValueOps for RegistryRef {
    fn registry_ref(&self) -> &RegistryRef {
        self
    }
}

impl LuaPush for RegistryRef {
    fn push(&self, state: &LuaState) -> Result<usize> {
        self.push_to(state)?;
        Ok(1)
    }
}

/// Reference to a runtime value of any type
#[derive(Clone, Debug, PartialEq, PartialOrd)]
pub struct LuaRef {
    inner: RegistryRef,
}

impl LuaRef {
    /// The empty reference
    pub fn nilref() -> Self {
        LuaRef { inner: RegistryRef::nilref() }
    }

    /// Pin the value on top of the stack, consuming that slot
    pub fn from_stack_top(state: &LuaState) -> Result<Self> {
        RegistryRef::from_stack_top(state).map(LuaRef::from)
    }

    /// Pin the value at `index`
    pub fn from_index(state: &LuaState, index: i32) -> Result<Self> {
        RegistryRef::from_index(state, index).map(LuaRef::from)
    }

    /// Convert a native value and pin the result
    pub fn new<T: LuaPush + ?Sized>(state: &LuaState, value: &T) -> Result<Self> {
        let guard = ScopedSavedStack::new(state);
        push_single(value, state)?;
        guard.release();
        Self::from_stack_top(state)
    }

    /// Create a fresh table and pin it
    pub fn new_table(state: &LuaState) -> Result<Self> {
        RegistryRef::new_table(state, 0, 0).map(LuaRef::from)
    }

    /// Give up the generic view
    pub fn into_registry_ref(self) -> RegistryRef {
        self.inner
    }
}

impl From<RegistryRef> for LuaRef {
    fn from(inner: RegistryRef) -> Self {
        LuaRef { inner }
    }
}

impl fmt::Display for LuaRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.inner, f)
    }
}

impl BasicValueOps for LuaRef {
    fn registry_ref(&self) -> &RegistryRef {
        &self.inner
    }
}

impl TableOrUserDataOps for LuaRef {}
impl IndexableTable for LuaRef {}
impl CallableValue for LuaRef {}

impl LuaPush for LuaRef {
    fn push(&self, state: &LuaState) -> Result<usize> {
        self.inner.push_to(state)?;
        Ok(1)
    }
}

/// Any value converts
impl LuaGet for LuaRef {
    fn strict_check_type(_state: &LuaState, _index: i32) -> bool {
        true
    }

    fn check_type(_state: &LuaState, _index: i32) -> bool {
        true
    }

    fn get(state: &LuaState, index: i32) -> Result<Self> {
        LuaRef::from_index(state, index)
    }
}

/// Implements the shared surface of a typed wrapper around `inner: RegistryRef`
macro_rules! value_wrapper {
    ($name:ident, $tag:expr) => {
        impl $name {
            /// The empty reference
            pub fn nilref() -> Self {
                $name { inner: $crate::bind::reference::RegistryRef::nilref() }
            }

            /// Pin the value on top of the stack (type-checked), consuming that slot
            pub fn from_stack_top(state: &$crate::lua::LuaState) -> $crate::error::Result<Self> {
                let inner = $crate::bind::reference::RegistryRef::from_stack_top(state)?;
                Ok($name { inner: inner.typecheck($tag) })
            }

            /// Pin the value at `index` (type-checked)
            pub fn from_index(state: &$crate::lua::LuaState, index: i32) -> $crate::error::Result<Self> {
                let inner = $crate::bind::reference::RegistryRef::from_index(state, index)?;
                Ok($name { inner: inner.typecheck($tag) })
            }

            /// Narrow a generic reference (type-checked)
            pub fn from_ref(value: $crate::bind::reference::LuaRef) -> Self {
                $name { inner: value.into_registry_ref().typecheck($tag) }
            }

            /// Widen to a generic reference
            pub fn into_lua_ref(self) -> $crate::bind::reference::LuaRef {
                $crate::bind::reference::LuaRef::from(self.inner)
            }
        }

        impl From<$name> for $crate::bind::reference::LuaRef {
            fn from(value: $name) -> Self {
                value.into_lua_ref()
            }
        }

        impl $crate::bind::ops::BasicValueOps for $name {
            fn registry_ref(&self) -> &$crate::bind::reference::RegistryRef {
                &self.inner
            }
        }

        impl $crate::bind::traits::LuaPush for $name {
            fn push(&self, state: &$crate::lua::LuaState) -> $crate::error::Result<usize> {
                self.inner.push_to(state)?;
                Ok(1)
            }
        }

        impl $crate::bind::traits::LuaGet for $name {
            fn strict_check_type(state: &$crate::lua::LuaState, index: i32) -> bool {
                state.type_at(index) == $tag
            }

            fn check_type(state: &$crate::lua::LuaState, index: i32) -> bool {
                let actual = state.type_at(index);
                actual == $tag || actual.is_none_or_nil()
            }

            fn get(state: &$crate::lua::LuaState, index: i32) -> $crate::error::Result<Self> {
                $name::from_index(state, index)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                std::fmt::Display::fmt(&self.inner, f)
            }
        }
    };
}

pub(crate) use value_wrapper;
