//! Lua value representation using generational arena handles

use crate::lua::arena::Handle;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Type-safe handle for strings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StringHandle(pub Handle);

/// Type-safe handle for tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TableHandle(pub Handle);

/// Type-safe handle for full userdata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UserDataHandle(pub Handle);

/// Type-safe handle for native functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunctionHandle(pub Handle);

/// Type-safe handle for threads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadHandle(pub Handle);

/// Core Lua value type
///
/// Heap objects are referenced by handle, so copying a `Value` aliases the
/// same table, userdata, function or thread.
#[derive(Debug, Clone, Copy)]
pub enum Value {
    /// Nil value
    Nil,

    /// Boolean value
    Boolean(bool),

    /// Number value (Lua 5.1 uses f64 for all numbers)
    Number(f64),

    /// String handle (points to an interned string in the heap)
    String(StringHandle),

    /// Table handle
    Table(TableHandle),

    /// Full userdata handle
    UserData(UserDataHandle),

    /// Native function handle
    Function(FunctionHandle),

    /// Thread handle
    Thread(ThreadHandle),
}

/// Runtime type tag, as reported by a type query at a stack index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// No value at that index (index above the stack top)
    None,
    Nil,
    Boolean,
    Number,
    String,
    Table,
    UserData,
    Function,
    Thread,
}

impl ValueType {
    /// Name as shown in error messages
    pub fn name(&self) -> &'static str {
        match self {
            ValueType::None => "no value",
            ValueType::Nil => "nil",
            ValueType::Boolean => "boolean",
            ValueType::Number => "number",
            ValueType::String => "string",
            ValueType::Table => "table",
            ValueType::UserData => "userdata",
            ValueType::Function => "function",
            ValueType::Thread => "thread",
        }
    }

    /// Nil, or no value at all
    pub fn is_none_or_nil(&self) -> bool {
        matches!(self, ValueType::None | ValueType::Nil)
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Value {
    /// Get the type tag of this value
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Nil => ValueType::Nil,
            Value::Boolean(_) => ValueType::Boolean,
            Value::Number(_) => ValueType::Number,
            Value::String(_) => ValueType::String,
            Value::Table(_) => ValueType::Table,
            Value::UserData(_) => ValueType::UserData,
            Value::Function(_) => ValueType::Function,
            Value::Thread(_) => ValueType::Thread,
        }
    }

    /// Get the type name of this value
    pub fn type_name(&self) -> &'static str {
        self.value_type().name()
    }

    /// Convert to boolean (Lua's truthiness rules)
    pub fn to_bool(&self) -> bool {
        !matches!(self, Value::Nil | Value::Boolean(false))
    }

    /// Check if nil
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Check if table
    pub fn is_table(&self) -> bool {
        matches!(self, Value::Table(_))
    }

    /// Normalize a number so that equal keys hash equally
    pub(crate) fn normalized_key(self) -> Value {
        match self {
            Value::Number(n) if n == 0.0 => Value::Number(0.0),
            other => other,
        }
    }
}

/// Raw equality (no metamethods)
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            // NaN != NaN, as in Lua
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Table(a), Value::Table(b)) => a == b,
            (Value::UserData(a), Value::UserData(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => a == b,
            (Value::Thread(a), Value::Thread(b)) => a == b,
            _ => false,
        }
    }
}

// Table keys are never NaN; the heap rejects them before insertion.
impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Value::Nil => 0u8.hash(state),
            Value::Boolean(b) => {
                1u8.hash(state);
                b.hash(state);
            }
            Value::Number(n) => {
                2u8.hash(state);
                n.to_bits().hash(state);
            }
            Value::String(s) => {
                3u8.hash(state);
                s.hash(state);
            }
            Value::Table(t) => {
                4u8.hash(state);
                t.hash(state);
            }
            Value::UserData(u) => {
                5u8.hash(state);
                u.hash(state);
            }
            Value::Function(f) => {
                6u8.hash(state);
                f.hash(state);
            }
            Value::Thread(t) => {
                7u8.hash(state);
                t.hash(state);
            }
        }
    }
}
