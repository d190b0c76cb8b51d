//! The stack channel between native code and the runtime
//!
//! A [`LuaState`] is one thread's value stack over a heap shared by every
//! thread of the same runtime. All data crosses between native code and the
//! runtime by pushing and reading stack slots, addressed Lua-style: positive
//! indices count from the bottom of the current call frame (1-based),
//! negative indices count back from the top (-1 is the top slot).
//!
//! The state is single-threaded (`Rc` based). Interior borrows of the heap
//! are always released before a native function runs.

use crate::config::{BindConfig, LogLevel};
use crate::error::{LuaError, Result};
use crate::lua::heap::{LuaHeap, MemoryStats, NativeFunction, ThreadObject, UserDataCell};
use crate::lua::registry::{Registry, RegistryKey};
use crate::lua::value::{StringHandle, TableHandle, ThreadHandle, Value, ValueType};
use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Callback receiving reported (non-fatal) errors
pub type ErrorHandler = Rc<dyn Fn(&LuaError)>;

/// Maximum length of an `__index` / `__newindex` chain
const MAX_TAG_LOOP: usize = 100;

/// Comparison operators understood by [`LuaState::compare`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// `==`
    Eq,
    /// `<`
    Lt,
    /// `<=`
    Le,
}

/// State shared by all threads of one runtime
struct GlobalState {
    heap: RefCell<LuaHeap>,
    registry: RefCell<Registry>,
    config: BindConfig,
    main_thread: ThreadHandle,
    error_handler: RefCell<Option<ErrorHandler>>,
    last_error: RefCell<Option<LuaError>>,
}

/// Handle to one thread's stack in a runtime
#[derive(Clone)]
pub struct LuaState {
    global: Rc<GlobalState>,
    thread: ThreadHandle,
}

impl fmt::Debug for LuaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LuaState")
            .field("id", &self.id())
            .field("top", &self.get_top())
            .finish()
    }
}

impl LuaState {
    /// Create a runtime using the process-wide default configuration
    pub fn new() -> Self {
        Self::with_config(BindConfig::global().clone())
    }

    /// Create a runtime with an explicit configuration
    pub fn with_config(config: BindConfig) -> Self {
        let mut heap = LuaHeap::new();
        let main_thread = heap.create_thread();
        let registry = Registry::new(config.limits.registry_limit);
        let state = LuaState {
            global: Rc::new(GlobalState {
                heap: RefCell::new(heap),
                registry: RefCell::new(registry),
                config,
                main_thread,
                error_handler: RefCell::new(None),
                last_error: RefCell::new(None),
            }),
            thread: main_thread,
        };
        if state.config().logs(LogLevel::Verbose) {
            println!("[LUA_STATE] Created runtime {}", state.id());
        }
        state
    }

    /// Configuration of this runtime
    pub fn config(&self) -> &BindConfig {
        &self.global.config
    }

    /// Id of this thread's stack, as shown in logs and errors
    pub fn id(&self) -> String {
        self.global
            .heap
            .borrow()
            .get_thread(self.thread)
            .map(|t| t.id.to_string())
            .unwrap_or_else(|_| "<dead>".to_string())
    }

    /// Whether `other` addresses the same stack as `self`
    pub fn is_same_runtime(&self, other: &LuaState) -> bool {
        Rc::ptr_eq(&self.global, &other.global) && self.thread == other.thread
    }

    /// Whether `other` shares this state's heap (same runtime, any thread)
    pub fn shares_heap(&self, other: &LuaState) -> bool {
        Rc::ptr_eq(&self.global, &other.global)
    }

    /// Error unless `other` addresses the same stack
    pub fn check_same_runtime(&self, other: &LuaState) -> Result<()> {
        if self.is_same_runtime(other) {
            Ok(())
        } else {
            Err(self.cross_runtime(other))
        }
    }

    /// Error unless `other` shares this state's heap
    pub fn check_shares_heap(&self, other: &LuaState) -> Result<()> {
        if self.shares_heap(other) {
            Ok(())
        } else {
            Err(self.cross_runtime(other))
        }
    }

    fn cross_runtime(&self, other: &LuaState) -> LuaError {
        LuaError::CrossRuntime { owner: self.id(), used: other.id() }
    }

    /// Whether this is the runtime's main thread
    pub fn is_main_thread(&self) -> bool {
        self.thread == self.global.main_thread
    }

    /// Handle of the main thread
    pub fn main_thread(&self) -> LuaState {
        LuaState { global: self.global.clone(), thread: self.global.main_thread }
    }

    /// Object counts of the shared heap
    pub fn memory_stats(&self) -> MemoryStats {
        self.global.heap.borrow().stats()
    }

    /// Free every heap object unreachable from the registry and the thread stacks
    ///
    /// Returns the number of objects freed. Collection only runs when asked,
    /// so values read off the stack stay valid until the next call.
    pub fn collect_garbage(&self) -> usize {
        let roots = self.global.registry.borrow().values();
        let before = self.memory_stats();
        let freed = self.global.heap.borrow_mut().collect_garbage(&roots);
        if self.config().logs(LogLevel::Debug) {
            let after = self.memory_stats();
            println!(
                "[LUA_STATE] collected {} objects ({} -> {} tables, {} -> {} strings) in runtime {}",
                freed,
                before.tables,
                after.tables,
                before.strings,
                after.strings,
                self.id()
            );
        }
        freed
    }

    /// Number of live registry references
    pub fn registry_len(&self) -> usize {
        self.global.registry.borrow().len()
    }

    // ------------------------------------------------------------------
    // Stack geometry
    // ------------------------------------------------------------------

    fn with_thread<R>(&self, f: impl FnOnce(&mut ThreadObject) -> Result<R>) -> Result<R> {
        let mut heap = self.global.heap.borrow_mut();
        let thread = heap.get_thread_mut(self.thread)?;
        f(thread)
    }

    fn with_thread_ref<R>(&self, f: impl FnOnce(&ThreadObject) -> R) -> Result<R> {
        let heap = self.global.heap.borrow();
        let thread = heap.get_thread(self.thread)?;
        Ok(f(thread))
    }

    /// Number of slots in the current frame
    pub fn get_top(&self) -> i32 {
        self.with_thread_ref(|t| (t.stack.len() - t.base()) as i32).unwrap_or(0)
    }

    /// Convert a relative index into an absolute one
    pub fn abs_index(&self, index: i32) -> i32 {
        if index > 0 {
            index
        } else {
            self.get_top() + index + 1
        }
    }

    /// Position in the thread's stack vector, if `index` names a live slot
    fn slot(thread: &ThreadObject, index: i32) -> Option<usize> {
        let base = thread.base();
        let top = thread.stack.len() - base;
        let abs = if index > 0 { index as usize } else { (top as i64 + index as i64 + 1).max(0) as usize };
        if abs >= 1 && abs <= top {
            Some(base + abs - 1)
        } else {
            None
        }
    }

    /// Set the top of the current frame, padding with nil or truncating
    pub fn set_top(&self, index: i32) -> Result<()> {
        self.with_thread(|t| {
            let base = t.base();
            let top = (t.stack.len() - base) as i64;
            let new_top = if index >= 0 { index as i64 } else { top + index as i64 + 1 };
            if new_top < 0 {
                return Err(LuaError::InvalidIndex(index));
            }
            let len = base + new_top as usize;
            if len < t.stack.len() {
                t.truncate(len);
            } else {
                t.stack.resize(len, Value::Nil);
            }
            Ok(())
        })
    }

    /// Record the slot at `index` so later truncation below it can be detected
    pub(crate) fn capture_slot(&self, index: i32) -> Result<u64> {
        self.with_thread(|t| {
            let pos = Self::slot(t, index).ok_or(LuaError::InvalidIndex(index))?;
            Ok(t.capture(pos))
        })
    }

    /// Whether `token` is outstanding and still names the slot at `index`
    pub(crate) fn capture_live(&self, token: u64, index: i32) -> bool {
        self.with_thread_ref(|t| match t.captured_position(token) {
            Some(pos) => Self::slot(t, index) == Some(pos),
            None => false,
        })
        .unwrap_or(false)
    }

    pub(crate) fn release_capture(&self, token: u64) {
        let _ = self.with_thread(|t| {
            t.release_capture(token);
            Ok(())
        });
    }

    /// Pop `n` values
    pub fn pop(&self, n: usize) -> Result<()> {
        if n as i32 > self.get_top() {
            return Err(LuaError::StackUnderflow);
        }
        self.set_top(-(n as i32) - 1)
    }

    /// Value at `index`, or an error if the slot does not exist
    pub fn value_at(&self, index: i32) -> Result<Value> {
        self.with_thread_ref(|t| Self::slot(t, index).map(|pos| t.stack[pos]))?
            .ok_or(LuaError::InvalidIndex(index))
    }

    /// Value at `index`, `None` if the slot does not exist
    pub fn try_value_at(&self, index: i32) -> Option<Value> {
        self.value_at(index).ok()
    }

    /// Type tag at `index` ([`ValueType::None`] above the top)
    pub fn type_at(&self, index: i32) -> ValueType {
        self.try_value_at(index).map(|v| v.value_type()).unwrap_or(ValueType::None)
    }

    /// Type name at `index`
    pub fn type_name_at(&self, index: i32) -> &'static str {
        self.type_at(index).name()
    }

    // ------------------------------------------------------------------
    // Push operations
    // ------------------------------------------------------------------

    /// Push a raw value
    pub fn push(&self, value: Value) -> Result<()> {
        let limit = self.config().limits.stack_limit;
        self.with_thread(|t| {
            if limit > 0 && t.stack.len() >= limit {
                return Err(LuaError::StackOverflow(limit));
            }
            t.stack.push(value);
            Ok(())
        })
    }

    /// Push nil
    pub fn push_nil(&self) -> Result<()> {
        self.push(Value::Nil)
    }

    /// Push a boolean
    pub fn push_boolean(&self, b: bool) -> Result<()> {
        self.push(Value::Boolean(b))
    }

    /// Push a number
    pub fn push_number(&self, n: f64) -> Result<()> {
        self.push(Value::Number(n))
    }

    /// Push a string
    pub fn push_string(&self, s: &str) -> Result<()> {
        self.push_bytes(s.as_bytes())
    }

    /// Push a byte string
    pub fn push_bytes(&self, bytes: &[u8]) -> Result<()> {
        let handle = self.intern(bytes);
        self.push(Value::String(handle))
    }

    fn intern(&self, bytes: &[u8]) -> StringHandle {
        self.global.heap.borrow_mut().create_string(bytes)
    }

    /// Push a copy of the value at `index`
    pub fn push_value(&self, index: i32) -> Result<()> {
        let value = self.value_at(index)?;
        self.push(value)
    }

    /// Create a table and push it
    pub fn create_table(&self, narr: usize, nrec: usize) -> Result<()> {
        let handle = self.global.heap.borrow_mut().create_table(narr, nrec);
        self.push(Value::Table(handle))
    }

    /// Wrap a native value in a userdata and push it
    pub fn push_userdata<T: Any>(&self, data: T) -> Result<()> {
        let handle = self
            .global
            .heap
            .borrow_mut()
            .create_userdata(Box::new(data), std::any::type_name::<T>());
        self.push(Value::UserData(handle))
    }

    /// Push a native function
    pub fn push_function(&self, func: NativeFunction) -> Result<()> {
        let handle = self.global.heap.borrow_mut().create_function(func);
        self.push(Value::Function(handle))
    }

    /// Create a thread, push it, and return a handle to its stack
    pub fn new_thread(&self) -> Result<LuaState> {
        let handle = self.global.heap.borrow_mut().create_thread();
        self.push(Value::Thread(handle))?;
        let thread = LuaState { global: self.global.clone(), thread: handle };
        if self.config().logs(LogLevel::Debug) {
            println!("[LUA_STATE] Thread {} created from {}", thread.id(), self.id());
        }
        Ok(thread)
    }

    /// Push the thread value of this state onto its own stack
    pub fn push_thread(&self) -> Result<()> {
        self.push(Value::Thread(self.thread))
    }

    /// Stack handle for the thread value at `index`
    pub fn to_thread(&self, index: i32) -> Option<LuaState> {
        match self.try_value_at(index)? {
            Value::Thread(handle) => Some(LuaState { global: self.global.clone(), thread: handle }),
            _ => None,
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// Truthiness of the value at `index`
    pub fn to_boolean(&self, index: i32) -> bool {
        self.try_value_at(index).map(|v| v.to_bool()).unwrap_or(false)
    }

    /// Number at `index`, converting numeric strings
    pub fn to_number(&self, index: i32) -> Option<f64> {
        match self.try_value_at(index)? {
            Value::Number(n) => Some(n),
            Value::String(s) => {
                let heap = self.global.heap.borrow();
                let bytes = heap.get_string(s).ok()?;
                parse_number(std::str::from_utf8(bytes).ok()?)
            }
            _ => None,
        }
    }

    /// Bytes of the string at `index`, converting numbers
    pub fn to_bytes(&self, index: i32) -> Option<Vec<u8>> {
        match self.try_value_at(index)? {
            Value::String(s) => self.global.heap.borrow().get_string(s).ok().map(|b| b.to_vec()),
            Value::Number(n) => Some(format_number(n).into_bytes()),
            _ => None,
        }
    }

    /// String at `index`, converting numbers
    pub fn to_str(&self, index: i32) -> Option<String> {
        self.to_bytes(index).map(|b| String::from_utf8_lossy(&b).into_owned())
    }

    /// Whether the value at `index` is a number or a numeric string
    pub fn is_number(&self, index: i32) -> bool {
        self.to_number(index).is_some()
    }

    /// Whether the value at `index` is a string or a number
    pub fn is_string(&self, index: i32) -> bool {
        matches!(self.type_at(index), ValueType::String | ValueType::Number)
    }

    /// Payload cell of the userdata at `index`
    pub fn to_userdata(&self, index: i32) -> Option<UserDataCell> {
        match self.try_value_at(index)? {
            Value::UserData(u) => self.global.heap.borrow().get_userdata(u).ok().map(|ud| ud.data.clone()),
            _ => None,
        }
    }

    /// Human-readable rendering of the value at `index` (`tostring` without metamethods)
    pub fn to_display_string(&self, index: i32) -> String {
        let value = match self.try_value_at(index) {
            Some(value) => value,
            None => return "none".to_string(),
        };
        match value {
            Value::Nil => "nil".to_string(),
            Value::Boolean(b) => b.to_string(),
            Value::Number(n) => format_number(n),
            Value::String(_) => self.to_str(index).unwrap_or_default(),
            other => {
                let handle = LuaHeap::handle_of(&other).map(|h| h.index).unwrap_or(0);
                format!("{}: 0x{:08x}", other.type_name(), handle)
            }
        }
    }

    // ------------------------------------------------------------------
    // Table access
    // ------------------------------------------------------------------

    fn metafield(&self, value: &Value, event: &str) -> Result<Value> {
        let name = Value::String(self.intern(event.as_bytes()));
        let heap = self.global.heap.borrow();
        match heap.get_metatable(value)? {
            Some(mt) => Ok(heap.get_table(mt)?.get(&name)),
            None => Ok(Value::Nil),
        }
    }

    fn raw_get_value(&self, table: TableHandle, key: &Value) -> Result<Value> {
        Ok(self.global.heap.borrow().get_table(table)?.get(key))
    }

    fn raw_set_value(&self, table: TableHandle, key: Value, value: Value) -> Result<()> {
        let limit = self.config().limits.table_limit;
        self.global.heap.borrow_mut().get_table_mut(table)?.set(key, value, limit)
    }

    /// `t[k]` with `__index` handling
    pub fn index_value(&self, mut target: Value, key: Value) -> Result<Value> {
        for _ in 0..MAX_TAG_LOOP {
            let handler = if let Value::Table(t) = target {
                let raw = self.raw_get_value(t, &key)?;
                if !raw.is_nil() {
                    return Ok(raw);
                }
                let handler = self.metafield(&target, "__index")?;
                if handler.is_nil() {
                    return Ok(Value::Nil);
                }
                handler
            } else {
                let handler = self.metafield(&target, "__index")?;
                if handler.is_nil() {
                    return Err(LuaError::type_mismatch(format!(
                        "attempt to index a {} value",
                        target.type_name()
                    )));
                }
                handler
            };

            if let Value::Function(_) = handler {
                let results = self.call_value(handler, &[target, key], Some(1))?;
                return Ok(results.first().copied().unwrap_or(Value::Nil));
            }
            target = handler;
        }
        Err(LuaError::Runtime("loop in gettable".to_string()))
    }

    /// `t[k] = v` with `__newindex` handling
    pub fn new_index_value(&self, mut target: Value, key: Value, value: Value) -> Result<()> {
        for _ in 0..MAX_TAG_LOOP {
            let handler = if let Value::Table(t) = target {
                let handler = if self.raw_get_value(t, &key)?.is_nil() {
                    self.metafield(&target, "__newindex")?
                } else {
                    Value::Nil
                };
                if handler.is_nil() {
                    return self.raw_set_value(t, key, value);
                }
                handler
            } else {
                let handler = self.metafield(&target, "__newindex")?;
                if handler.is_nil() {
                    return Err(LuaError::type_mismatch(format!(
                        "attempt to index a {} value",
                        target.type_name()
                    )));
                }
                handler
            };

            if let Value::Function(_) = handler {
                self.call_value(handler, &[target, key, value], Some(0))?;
                return Ok(());
            }
            target = handler;
        }
        Err(LuaError::Runtime("loop in settable".to_string()))
    }

    /// Pop a key and push `t[key]`, where `t` is at `index`
    pub fn get_table(&self, index: i32) -> Result<()> {
        let target = self.value_at(index)?;
        let key = self.value_at(-1)?;
        let value = self.index_value(target, key)?;
        self.pop(1)?;
        self.push(value)
    }

    /// Pop a value and a key and assign `t[key] = value`, where `t` is at `index`
    pub fn set_table(&self, index: i32) -> Result<()> {
        let target = self.value_at(index)?;
        let key = self.value_at(-2)?;
        let value = self.value_at(-1)?;
        self.new_index_value(target, key, value)?;
        self.pop(2)
    }

    /// Push `t[name]`, where `t` is at `index`
    pub fn get_field(&self, index: i32, name: &str) -> Result<()> {
        let target = self.value_at(index)?;
        let key = Value::String(self.intern(name.as_bytes()));
        let value = self.index_value(target, key)?;
        self.push(value)
    }

    /// Pop a value and assign `t[name] = value`, where `t` is at `index`
    pub fn set_field(&self, index: i32, name: &str) -> Result<()> {
        let target = self.value_at(index)?;
        let key = Value::String(self.intern(name.as_bytes()));
        let value = self.value_at(-1)?;
        self.new_index_value(target, key, value)?;
        self.pop(1)
    }

    fn table_at(&self, index: i32) -> Result<TableHandle> {
        match self.value_at(index)? {
            Value::Table(t) => Ok(t),
            other => Err(LuaError::type_mismatch(format!("table expected, got {}", other.type_name()))),
        }
    }

    /// Pop a key and push `t[key]` without metamethods
    pub fn raw_get(&self, index: i32) -> Result<()> {
        let table = self.table_at(index)?;
        let key = self.value_at(-1)?;
        let value = self.raw_get_value(table, &key)?;
        self.pop(1)?;
        self.push(value)
    }

    /// Pop a value and a key and assign without metamethods
    pub fn raw_set(&self, index: i32) -> Result<()> {
        let table = self.table_at(index)?;
        let key = self.value_at(-2)?;
        let value = self.value_at(-1)?;
        self.raw_set_value(table, key, value)?;
        self.pop(2)
    }

    /// Length of the table at `index` (border of its array part)
    pub fn raw_len(&self, index: i32) -> Result<usize> {
        let table = self.table_at(index)?;
        Ok(self.global.heap.borrow().get_table(table)?.len())
    }

    /// Pop a key and push the next key/value pair of the table at `index`
    ///
    /// Returns `false` (pushing nothing) when the traversal is finished.
    pub fn next(&self, index: i32) -> Result<bool> {
        let table = self.table_at(index)?;
        let key = self.value_at(-1)?;
        let entry = self.global.heap.borrow().get_table(table)?.next(&key)?;
        self.pop(1)?;
        match entry {
            Some((k, v)) => {
                self.push(k)?;
                self.push(v)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // ------------------------------------------------------------------
    // Metatables
    // ------------------------------------------------------------------

    /// Push the metatable of the value at `index`; `false` if it has none
    pub fn get_metatable(&self, index: i32) -> Result<bool> {
        let value = self.value_at(index)?;
        let metatable = self.global.heap.borrow().get_metatable(&value)?;
        match metatable {
            Some(mt) => {
                self.push(Value::Table(mt))?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Pop a table (or nil) and make it the metatable of the value at `index`
    pub fn set_metatable(&self, index: i32) -> Result<()> {
        let value = self.value_at(index)?;
        let metatable = match self.value_at(-1)? {
            Value::Table(t) => Some(t),
            Value::Nil => None,
            other => {
                return Err(LuaError::type_mismatch(format!(
                    "metatable must be a table, got {}",
                    other.type_name()
                )))
            }
        };
        self.global.heap.borrow_mut().set_metatable(&value, metatable)?;
        self.pop(1)
    }

    // ------------------------------------------------------------------
    // Comparison
    // ------------------------------------------------------------------

    /// Primitive equality of two slots (no metamethods)
    pub fn raw_equal(&self, index1: i32, index2: i32) -> bool {
        match (self.try_value_at(index1), self.try_value_at(index2)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    /// Compare two slots with the runtime's semantics
    ///
    /// Missing slots compare unequal. Ordering is defined for two numbers,
    /// two strings, or values with a `__lt` / `__le` metamethod.
    pub fn compare(&self, index1: i32, index2: i32, op: CompareOp) -> Result<bool> {
        let (a, b) = match (self.try_value_at(index1), self.try_value_at(index2)) {
            (Some(a), Some(b)) => (a, b),
            _ => return Ok(false),
        };
        match op {
            CompareOp::Eq => self.values_equal(a, b),
            CompareOp::Lt => self.values_less(a, b),
            CompareOp::Le => self.values_less_equal(a, b),
        }
    }

    fn values_equal(&self, a: Value, b: Value) -> Result<bool> {
        if a == b {
            return Ok(true);
        }
        let same_kind = matches!(
            (a, b),
            (Value::Table(_), Value::Table(_)) | (Value::UserData(_), Value::UserData(_))
        );
        if !same_kind {
            return Ok(false);
        }
        let handler = self.metafield(&a, "__eq")?;
        if handler.is_nil() || handler != self.metafield(&b, "__eq")? {
            return Ok(false);
        }
        self.call_metamethod_bool(handler, a, b)
    }

    fn values_less(&self, a: Value, b: Value) -> Result<bool> {
        match (a, b) {
            (Value::Number(x), Value::Number(y)) => Ok(x < y),
            (Value::String(_), Value::String(_)) => Ok(self.string_bytes(a)? < self.string_bytes(b)?),
            _ => {
                let handler = self.order_metamethod(a, b, "__lt")?;
                self.call_metamethod_bool(handler, a, b)
            }
        }
    }

    fn values_less_equal(&self, a: Value, b: Value) -> Result<bool> {
        match (a, b) {
            (Value::Number(x), Value::Number(y)) => Ok(x <= y),
            (Value::String(_), Value::String(_)) => Ok(self.string_bytes(a)? <= self.string_bytes(b)?),
            _ => {
                if let Ok(handler) = self.order_metamethod(a, b, "__le") {
                    return self.call_metamethod_bool(handler, a, b);
                }
                // Lua 5.1 falls back to `not (b < a)`
                let handler = self.order_metamethod(b, a, "__lt")?;
                Ok(!self.call_metamethod_bool(handler, b, a)?)
            }
        }
    }

    fn order_metamethod(&self, a: Value, b: Value, event: &str) -> Result<Value> {
        if a.value_type() == b.value_type() {
            let handler = self.metafield(&a, event)?;
            if !handler.is_nil() && handler == self.metafield(&b, event)? {
                return Ok(handler);
            }
        }
        Err(LuaError::type_mismatch(format!(
            "attempt to compare {} with {}",
            a.type_name(),
            b.type_name()
        )))
    }

    fn call_metamethod_bool(&self, handler: Value, a: Value, b: Value) -> Result<bool> {
        let results = self.call_value(handler, &[a, b], Some(1))?;
        Ok(results.first().map(|v| v.to_bool()).unwrap_or(false))
    }

    fn string_bytes(&self, value: Value) -> Result<Vec<u8>> {
        match value {
            Value::String(s) => Ok(self.global.heap.borrow().get_string(s)?.to_vec()),
            other => Err(LuaError::type_mismatch(format!("string expected, got {}", other.type_name()))),
        }
    }

    // ------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------

    /// Call the value below the top `nargs` arguments
    ///
    /// Pops the callee and its arguments and pushes its results, adjusted to
    /// `nresults` when given. Returns the number of results pushed. Tables
    /// and userdata are callable through a `__call` metamethod.
    pub fn call(&self, nargs: usize, nresults: Option<usize>) -> Result<usize> {
        let top = self.get_top() as usize;
        if nargs + 1 > top {
            return Err(LuaError::StackUnderflow);
        }
        let func_index = (top - nargs) as i32;
        let mut callee = self.value_at(func_index)?;

        if !matches!(callee, Value::Function(_)) {
            let handler = self.metafield(&callee, "__call")?;
            if !matches!(handler, Value::Function(_)) {
                return Err(LuaError::type_mismatch(format!(
                    "attempt to call a {} value",
                    callee.type_name()
                )));
            }
            // The original callee becomes the first argument
            self.push(Value::Nil)?;
            self.with_thread(|t| {
                let pos = t.base() + func_index as usize - 1;
                t.stack.pop();
                t.stack.insert(pos, handler);
                Ok(())
            })?;
            callee = handler;
            return self.call_native(callee, nargs + 1, func_index, nresults);
        }

        self.call_native(callee, nargs, func_index, nresults)
    }

    fn call_native(&self, callee: Value, nargs: usize, func_index: i32, nresults: Option<usize>) -> Result<usize> {
        let func = match callee {
            Value::Function(f) => self.global.heap.borrow().get_function(f)?.func.clone(),
            other => {
                return Err(LuaError::type_mismatch(format!("attempt to call a {} value", other.type_name())))
            }
        };

        let func_pos = self.with_thread(|t| {
            let func_pos = t.base() + func_index as usize - 1;
            t.frames.push(func_pos + 1);
            Ok(func_pos)
        })?;
        debug_assert_eq!(self.get_top() as usize, nargs);

        let outcome = func(self);

        let results = self.with_thread(|t| {
            t.frames.pop();
            let results = match &outcome {
                Ok(count) => {
                    let available = t.stack.len().saturating_sub(func_pos + 1);
                    let count = (*count).min(available);
                    t.stack.split_off(t.stack.len() - count)
                }
                Err(_) => Vec::new(),
            };
            t.truncate(func_pos);
            Ok(results)
        })?;
        outcome?;

        let wanted = nresults.unwrap_or(results.len());
        for i in 0..wanted {
            self.push(results.get(i).copied().unwrap_or(Value::Nil))?;
        }
        Ok(wanted)
    }

    /// Call `func` with `args`, returning its results
    pub fn call_value(&self, func: Value, args: &[Value], nresults: Option<usize>) -> Result<Vec<Value>> {
        let top = self.get_top();
        self.push(func)?;
        for arg in args {
            self.push(*arg)?;
        }
        let count = match self.call(args.len(), nresults) {
            Ok(count) => count,
            Err(e) => {
                let _ = self.set_top(top);
                return Err(e);
            }
        };
        let mut results = Vec::with_capacity(count);
        for i in 0..count {
            results.push(self.value_at(top + 1 + i as i32)?);
        }
        self.set_top(top)?;
        Ok(results)
    }

    // ------------------------------------------------------------------
    // Function environments
    // ------------------------------------------------------------------

    /// Push the environment table of the function at `index` (nil when unset)
    pub fn get_function_env(&self, index: i32) -> Result<()> {
        let env = match self.value_at(index)? {
            Value::Function(f) => self.global.heap.borrow().get_function(f)?.env,
            other => {
                return Err(LuaError::type_mismatch(format!("function expected, got {}", other.type_name())))
            }
        };
        self.push(env.map(Value::Table).unwrap_or(Value::Nil))
    }

    /// Pop a table and make it the environment of the function at `index`
    pub fn set_function_env(&self, index: i32) -> Result<()> {
        let func = match self.value_at(index)? {
            Value::Function(f) => f,
            other => {
                return Err(LuaError::type_mismatch(format!("function expected, got {}", other.type_name())))
            }
        };
        let env = self.table_at(-1)?;
        self.global.heap.borrow_mut().get_function_mut(func)?.env = Some(env);
        self.pop(1)
    }

    // ------------------------------------------------------------------
    // Registry
    // ------------------------------------------------------------------

    /// Pop the top value and pin it in the registry
    pub fn registry_ref(&self) -> Result<RegistryKey> {
        let value = self.value_at(-1)?;
        let key = self.global.registry.borrow_mut().insert(value)?;
        self.pop(1)?;
        if self.config().logs(LogLevel::Debug) {
            println!("[LUA_STATE] ref {:?} -> {} ({} live)", key, value.type_name(), self.registry_len());
        }
        Ok(key)
    }

    /// Push the value pinned under `key`
    pub fn push_registry_ref(&self, key: RegistryKey) -> Result<()> {
        let value = self.global.registry.borrow().get(key)?;
        self.push(value)
    }

    /// Type of the value pinned under `key`
    pub fn registry_type(&self, key: RegistryKey) -> ValueType {
        self.global.registry.borrow().get(key).map(|v| v.value_type()).unwrap_or(ValueType::None)
    }

    /// Release a registry entry
    pub fn registry_unref(&self, key: RegistryKey) {
        let released = self.global.registry.borrow_mut().remove(key);
        if self.config().logs(LogLevel::Debug) {
            println!("[LUA_STATE] unref {:?} (released: {}, {} live)", key, released, self.registry_len());
        }
    }

    // ------------------------------------------------------------------
    // Error reporting
    // ------------------------------------------------------------------

    /// Install the callback that receives reported errors
    pub fn set_error_handler(&self, handler: Option<ErrorHandler>) {
        *self.global.error_handler.borrow_mut() = handler;
    }

    /// Report a non-fatal error: log it, remember it, and pass it to the handler
    pub fn report_error(&self, error: LuaError) {
        if error.is_type_mismatch() && self.config().report_type_mismatch && self.config().logs(LogLevel::Warning) {
            println!("[LUA_ERROR] {} (runtime {})", error, self.id());
        }
        let handler = self.global.error_handler.borrow().clone();
        *self.global.last_error.borrow_mut() = Some(error.clone());
        if let Some(handler) = handler {
            handler(&error);
        }
    }

    /// Report a type mismatch
    pub fn type_mismatch_error(&self, message: impl Into<String>) {
        self.report_error(LuaError::type_mismatch(message));
    }

    /// Take the most recently reported error
    pub fn take_last_error(&self) -> Option<LuaError> {
        self.global.last_error.borrow_mut().take()
    }
}

impl Default for LuaState {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a numeric string the way the runtime converts strings to numbers
pub fn parse_number(s: &str) -> Option<f64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        let n = u64::from_str_radix(hex, 16).ok()? as f64;
        return Some(if negative { -n } else { n });
    }
    match s.parse::<f64>() {
        // Rust accepts "inf" and "NaN"; the runtime does not
        Ok(n) if s.chars().all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-')) => Some(n),
        _ => None,
    }
}

/// Format a number the way the runtime converts numbers to strings
pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else if n.is_nan() {
        "nan".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "inf" } else { "-inf" }.to_string()
    } else {
        format!("{}", n)
    }
}
