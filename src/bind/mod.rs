//! Native wrappers over runtime values
//!
//! Built on the stack channel in [`crate::lua`]:
//!
//! - [`ScopedSavedStack`] keeps every operation stack-neutral
//! - [`LuaPush`] / [`LuaGet`] convert native values (containers included)
//! - [`RegistryRef`] / [`LuaRef`] pin values in the registry
//! - [`LuaTable`], [`LuaUserData`], [`LuaFunction`], [`LuaThread`] are the
//!   type-checked wrappers
//! - [`TableKeyReference`] is the lazy `table[key]` handle

pub mod class;
pub mod container;
pub mod element;
pub mod function;
pub mod guard;
pub mod ops;
pub mod reference;
pub mod table;
pub mod traits;

pub use self::class::{ClassMetatable, ClassMethods};
pub use self::element::TableKeyReference;
pub use self::function::{LuaFunction, LuaThread, MemFunBinder};
pub use self::guard::ScopedSavedStack;
pub use self::ops::{BasicValueOps, CallableValue, IndexableTable, TableOrUserDataOps};
pub use self::reference::{LuaRef, RegistryRef};
pub use self::table::{LuaTable, LuaUserData};
pub use self::traits::{LuaArgs, LuaGet, LuaPush};
