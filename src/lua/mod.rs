//! Minimal in-process scripting runtime
//!
//! Hosts the value heap, the reference registry and the stack channel that
//! the binding layer in [`crate::bind`] talks to. Only native functions are
//! executable; there is no compiler or bytecode interpreter.

pub mod arena;
pub mod heap;
pub mod registry;
pub mod state;
pub mod value;

pub use self::heap::{MemoryStats, NativeFunction, UserDataCell};
pub use self::registry::RegistryKey;
pub use self::state::{CompareOp, ErrorHandler, LuaState};
pub use self::value::{Value, ValueType};
