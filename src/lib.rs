//! Ferrous script bindings
//!
//! Exposes a scripting runtime's values (tables, userdata, functions,
//! threads) as native objects with registry-backed lifetime, lazy element
//! access and automatic type conversion.

pub mod bind;
pub mod config;
pub mod error;
pub mod lua;

// Re-export commonly used types
pub use bind::{
    BasicValueOps, CallableValue, ClassMetatable, ClassMethods, IndexableTable, LuaArgs, LuaFunction, LuaGet,
    LuaPush, LuaRef, LuaTable, LuaThread, LuaUserData, MemFunBinder, RegistryRef, ScopedSavedStack,
    TableKeyReference, TableOrUserDataOps,
};
pub use config::BindConfig;
pub use error::{LuaError, Result};
pub use lua::{LuaState, Value, ValueType};
