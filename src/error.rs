//! Error types for the Lua binding layer
//!
//! Every fallible operation in the runtime and in the binding wrappers
//! returns [`Result`]. Conditions that are reported rather than raised
//! (a wrapper constructed over a value of the wrong type) go through
//! [`crate::lua::LuaState::report_error`] instead.

/// Result type for binding operations
pub type Result<T> = std::result::Result<T, LuaError>;

/// Errors raised by the runtime and the binding layer
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LuaError {
    /// A value carried a different type tag than the operation required
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    /// A value or element reference was used against a stack it was not captured from
    #[error("operation not permitted across runtimes (captured on {owner}, used on {used})")]
    CrossRuntime {
        /// Id of the runtime the value belongs to
        owner: String,
        /// Id of the runtime it was used against
        used: String,
    },

    /// Operation deliberately left unimplemented
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Pushing would exceed the configured stack limit
    #[error("stack overflow (limit {0})")]
    StackOverflow(usize),

    /// Not enough values on the stack
    #[error("stack underflow")]
    StackUnderflow,

    /// Stack index does not name a live slot
    #[error("invalid stack index: {0}")]
    InvalidIndex(i32),

    /// Stale or unknown heap/registry handle
    #[error("invalid handle")]
    InvalidHandle,

    /// Configured resource limit exceeded
    #[error("resource limit: {0}")]
    ResourceLimit(String),

    /// Error raised by a native function or a metamethod
    #[error("runtime error: {0}")]
    Runtime(String),

    /// Operation is not valid in the current state
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

impl LuaError {
    /// Build a type mismatch error
    pub fn type_mismatch(msg: impl Into<String>) -> Self {
        LuaError::TypeMismatch(msg.into())
    }

    /// Whether this is a type mismatch
    pub fn is_type_mismatch(&self) -> bool {
        matches!(self, LuaError::TypeMismatch(_))
    }
}
