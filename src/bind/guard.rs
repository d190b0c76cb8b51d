//! RAII stack depth guard
//!
//! Every binding operation that pushes temporaries runs under a
//! [`ScopedSavedStack`], so the stack is back at its recorded depth however
//! the operation exits, `?` early returns included.
//!
//! # Example
//!
//! ```
//! use ferrous_luabind::{LuaState, ScopedSavedStack};
//!
//! let state = LuaState::new();
//! {
//!     let _guard = ScopedSavedStack::new(&state);
//!     state.push_number(1.0).unwrap();
//!     state.push_string("temp").unwrap();
//! }
//! assert_eq!(state.get_top(), 0);
//! ```

use crate::config::LogLevel;
use crate::lua::LuaState;

/// Records the stack depth on creation and truncates back to it on drop
pub struct ScopedSavedStack<'a> {
    /// Stack being guarded
    state: &'a LuaState,

    /// Depth to restore
    saved: i32,

    /// Whether the guard was released (stack left as is)
    released: bool,
}

impl<'a> ScopedSavedStack<'a> {
    /// Guard the current depth of `state`
    pub fn new(state: &'a LuaState) -> Self {
        ScopedSavedStack { state, saved: state.get_top(), released: false }
    }

    /// The recorded depth
    pub fn saved(&self) -> i32 {
        self.saved
    }

    /// Number of values pushed since the guard was created
    pub fn pushed(&self) -> i32 {
        self.state.get_top() - self.saved
    }

    /// Keep whatever is on the stack now
    ///
    /// Used by push operations once all their values are in place; until
    /// then a failure unwinds the partial pushes.
    pub fn release(mut self) -> usize {
        self.released = true;
        self.pushed().max(0) as usize
    }
}

impl Drop for ScopedSavedStack<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let top = self.state.get_top();
        if top > self.saved {
            if self.state.config().logs(LogLevel::Debug) {
                println!("[LUA_STATE] unwinding {} -> {}", top, self.saved);
            }
            // Truncating never fails for a depth below the current top
            let _ = self.state.set_top(self.saved);
        }
    }
}
