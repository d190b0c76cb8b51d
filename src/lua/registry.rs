//! Global reference registry
//!
//! Long-lived references from native code into the runtime. Each entry pins
//! one value; entries are released explicitly. Slots are generational, so a
//! released slot handed out again never matches a handle to the old entry.

use crate::error::{LuaError, Result};
use crate::lua::arena::{Arena, Handle};
use crate::lua::value::Value;

/// Opaque key of a registry entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistryKey(pub(crate) Handle);

/// Registry storage shared by every thread of a runtime
#[derive(Debug, Default)]
pub struct Registry {
    entries: Arena<Value>,
    limit: usize,
}

impl Registry {
    /// Create a registry holding at most `limit` live entries (0 = unlimited)
    pub fn new(limit: usize) -> Self {
        Registry { entries: Arena::new(), limit }
    }

    /// Pin a value, returning its key
    pub fn insert(&mut self, value: Value) -> Result<RegistryKey> {
        if self.limit > 0 && self.entries.len() >= self.limit {
            return Err(LuaError::ResourceLimit(format!(
                "registry holds {} references",
                self.limit
            )));
        }
        Ok(RegistryKey(self.entries.insert(value)))
    }

    /// Value pinned under `key`
    pub fn get(&self, key: RegistryKey) -> Result<Value> {
        self.entries.get(key.0).copied().ok_or(LuaError::InvalidHandle)
    }

    /// Release an entry; releasing twice is a no-op
    pub fn remove(&mut self, key: RegistryKey) -> bool {
        self.entries.remove(key.0).is_some()
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no entries are live
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every pinned value; these are the collector's roots
    pub fn values(&self) -> Vec<Value> {
        self.entries.iter().map(|(_, value)| *value).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_get_remove() {
        let mut registry = Registry::new(0);
        let key = registry.insert(Value::Number(1.0)).unwrap();
        assert_eq!(registry.get(key).unwrap(), Value::Number(1.0));
        assert!(registry.remove(key));
        assert!(!registry.remove(key));
        assert_eq!(registry.get(key), Err(LuaError::InvalidHandle));
    }

    #[test]
    fn test_released_slot_is_not_aliased() {
        let mut registry = Registry::new(0);
        let old = registry.insert(Value::Boolean(true)).unwrap();
        registry.remove(old);
        let new = registry.insert(Value::Boolean(false)).unwrap();
        assert_ne!(old, new);
        assert!(registry.get(old).is_err());
    }

    #[test]
    fn test_limit() {
        let mut registry = Registry::new(1);
        let key = registry.insert(Value::Nil).unwrap();
        assert!(matches!(registry.insert(Value::Nil), Err(LuaError::ResourceLimit(_))));
        registry.remove(key);
        assert!(registry.insert(Value::Nil).is_ok());
    }
}
