//! Lua heap management with generational arena architecture
//!
//! Objects are reclaimed by a stop-the-world mark and sweep collection run
//! on request. Roots are the values pinned in the registry (see
//! [`crate::lua::registry`]) and every thread stack; threads themselves are
//! never collected, since native `LuaState` handles address them directly.

use crate::error::{LuaError, Result};
use crate::lua::arena::{Arena, Handle};
use crate::lua::state::LuaState;
use crate::lua::value::{FunctionHandle, StringHandle, TableHandle, ThreadHandle, UserDataHandle, Value};
use indexmap::IndexMap;
use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use uuid::Uuid;

/// Native function callable from the runtime
///
/// Arguments are at stack indices `1..=n` of the callee's frame; the
/// function pushes its results and returns how many it pushed.
pub type NativeFunction = Rc<dyn Fn(&LuaState) -> Result<usize>>;

/// Shared cell holding a userdata payload
pub type UserDataCell = Rc<RefCell<Box<dyn Any>>>;

/// GC mark color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GcMark {
    /// Not reachable (or not yet reached)
    #[default]
    White,

    /// Reachable but not fully processed
    Gray,

    /// Reachable and fully processed
    Black,
}

/// Gray object waiting to be scanned
#[derive(Debug, Clone, Copy)]
enum GcObject {
    Table(TableHandle),
    UserData(UserDataHandle),
    Function(FunctionHandle),
    Thread(ThreadHandle),
}

/// Objects that carry a mark
trait Collectable {
    fn mark_mut(&mut self) -> &mut GcMark;
}

/// String object in heap
#[derive(Debug)]
pub struct StringObject {
    /// Actual string bytes
    pub bytes: Box<[u8]>,

    /// GC mark
    pub mark: GcMark,
}

/// Table object in heap
#[derive(Debug, Default)]
pub struct TableObject {
    /// Array part (keys 1..=array.len())
    pub array: Vec<Value>,

    /// Hash part, in insertion order. Entries assigned nil stay behind as
    /// tombstones so that traversal with `next` survives clearing fields.
    pub map: IndexMap<Value, Value>,

    /// Metatable (handle to another table)
    pub metatable: Option<TableHandle>,

    /// GC mark
    pub mark: GcMark,
}

impl TableObject {
    /// Create an empty table with size hints for both parts
    pub fn with_capacity(narr: usize, nrec: usize) -> Self {
        TableObject {
            array: Vec::with_capacity(narr),
            map: IndexMap::with_capacity(nrec),
            metatable: None,
            mark: GcMark::White,
        }
    }

    fn array_index(key: &Value) -> Option<usize> {
        match key {
            Value::Number(n) if n.fract() == 0.0 && *n >= 1.0 && *n <= u32::MAX as f64 => {
                Some(*n as usize - 1)
            }
            _ => None,
        }
    }

    /// Get a value by key (raw, nil when absent)
    pub fn get(&self, key: &Value) -> Value {
        if let Some(index) = Self::array_index(key) {
            if let Some(value) = self.array.get(index) {
                return *value;
            }
        }
        self.map.get(&key.normalized_key()).copied().unwrap_or(Value::Nil)
    }

    /// Set a value by key (raw)
    pub fn set(&mut self, key: Value, value: Value, limit: usize) -> Result<()> {
        match key {
            Value::Nil => return Err(LuaError::Runtime("table index is nil".to_string())),
            Value::Number(n) if n.is_nan() => {
                return Err(LuaError::Runtime("table index is NaN".to_string()))
            }
            _ => {}
        }

        if let Some(index) = Self::array_index(&key) {
            if index < self.array.len() {
                self.array[index] = value;
                return Ok(());
            }
            if index == self.array.len() && !value.is_nil() {
                self.check_limit(limit)?;
                self.map.shift_remove(&key);
                self.array.push(value);
                self.migrate_to_array();
                return Ok(());
            }
        }

        let key = key.normalized_key();
        match self.map.get_mut(&key) {
            Some(slot) => *slot = value,
            None if value.is_nil() => {}
            None => {
                self.check_limit(limit)?;
                self.map.insert(key, value);
            }
        }
        Ok(())
    }

    /// Move `n+1, n+2, ...` from the hash part once the array part reaches them
    fn migrate_to_array(&mut self) {
        loop {
            let next_key = Value::Number((self.array.len() + 1) as f64);
            match self.map.shift_remove(&next_key) {
                Some(value) if !value.is_nil() => self.array.push(value),
                _ => break,
            }
        }
    }

    fn check_limit(&self, limit: usize) -> Result<()> {
        if limit > 0 && self.array.len() + self.map.len() >= limit {
            return Err(LuaError::ResourceLimit(format!("table exceeds {} entries", limit)));
        }
        Ok(())
    }

    /// Get the length of the table (# operator)
    pub fn len(&self) -> usize {
        self.array.iter().rposition(|v| !v.is_nil()).map(|i| i + 1).unwrap_or(0)
    }

    /// Check if table has no live entries
    pub fn is_empty(&self) -> bool {
        self.array.iter().all(|v| v.is_nil()) && self.map.values().all(|v| v.is_nil())
    }

    /// Traversal step: the entry after `key` (nil starts), or `None` at the end
    pub fn next(&self, key: &Value) -> Result<Option<(Value, Value)>> {
        let mut array_pos = 0;
        let mut map_pos = 0;

        if !key.is_nil() {
            match Self::array_index(key) {
                Some(index) if index < self.array.len() => array_pos = index + 1,
                _ => {
                    array_pos = self.array.len();
                    map_pos = self
                        .map
                        .get_index_of(&key.normalized_key())
                        .ok_or_else(|| LuaError::Runtime("invalid key to 'next'".to_string()))?
                        + 1;
                }
            }
        }

        for index in array_pos..self.array.len() {
            let value = self.array[index];
            if !value.is_nil() {
                return Ok(Some((Value::Number((index + 1) as f64), value)));
            }
        }

        for index in map_pos..self.map.len() {
            if let Some((k, v)) = self.map.get_index(index) {
                if !v.is_nil() {
                    return Ok(Some((*k, *v)));
                }
            }
        }

        Ok(None)
    }
}

/// Full userdata object in heap
pub struct UserDataObject {
    /// Native payload
    pub data: UserDataCell,

    /// Name of the payload's native type
    pub type_name: &'static str,

    /// Metatable
    pub metatable: Option<TableHandle>,

    /// GC mark
    pub mark: GcMark,
}

impl fmt::Debug for UserDataObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserDataObject")
            .field("type_name", &self.type_name)
            .field("metatable", &self.metatable)
            .finish()
    }
}

/// Native function object in heap
pub struct FunctionObject {
    /// The callable
    pub func: NativeFunction,

    /// Environment table, if one was set
    pub env: Option<TableHandle>,

    /// GC mark
    pub mark: GcMark,
}

impl fmt::Debug for FunctionObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionObject").field("env", &self.env).finish()
    }
}

/// Thread object in heap: one value stack plus its call frames
#[derive(Debug)]
pub struct ThreadObject {
    /// Instance id, used in logs and cross-runtime errors
    pub id: Uuid,

    /// Value stack
    pub stack: Vec<Value>,

    /// Base slot of each active native call; stack index 1 maps to `stack[base]`
    pub frames: Vec<usize>,

    /// Outstanding slot captures as (stack position, token), dropped once the stack shrinks below them
    captures: Vec<(usize, u64)>,
    next_capture: u64,

    /// GC mark
    pub mark: GcMark,
}

impl ThreadObject {
    fn new() -> Self {
        ThreadObject {
            id: Uuid::new_v4(),
            stack: Vec::new(),
            frames: vec![0],
            captures: Vec::new(),
            next_capture: 0,
            mark: GcMark::White,
        }
    }

    /// Remember stack position `pos`; the token stays valid until the stack is cut below it
    pub fn capture(&mut self, pos: usize) -> u64 {
        self.next_capture += 1;
        self.captures.push((pos, self.next_capture));
        self.next_capture
    }

    /// Position recorded for `token`, if it is still outstanding
    pub fn captured_position(&self, token: u64) -> Option<usize> {
        self.captures.iter().find(|&&(_, t)| t == token).map(|&(pos, _)| pos)
    }

    /// Forget `token`
    pub fn release_capture(&mut self, token: u64) {
        self.captures.retain(|&(_, t)| t != token);
    }

    /// Truncate the stack, invalidating captures above the new length
    pub fn truncate(&mut self, len: usize) {
        self.stack.truncate(len);
        self.captures.retain(|&(pos, _)| pos < len);
    }

    /// Base of the innermost frame
    pub fn base(&self) -> usize {
        self.frames.last().copied().unwrap_or(0)
    }
}

/// Object counts
#[derive(Debug, Default, Clone, PartialEq)]
pub struct MemoryStats {
    /// Number of strings
    pub strings: usize,

    /// Number of tables
    pub tables: usize,

    /// Number of userdata
    pub userdata: usize,

    /// Number of functions
    pub functions: usize,

    /// Number of threads
    pub threads: usize,
}

/// Core heap implementation
#[derive(Debug, Default)]
pub struct LuaHeap {
    strings: Arena<StringObject>,
    string_index: HashMap<Box<[u8]>, StringHandle>,
    tables: Arena<TableObject>,
    userdata: Arena<UserDataObject>,
    functions: Arena<FunctionObject>,
    threads: Arena<ThreadObject>,
    gray_stack: Vec<GcObject>,
}

macro_rules! impl_collectable {
    ($($t:ty),*) => {
        $(
            impl Collectable for $t {
                fn mark_mut(&mut self) -> &mut GcMark {
                    &mut self.mark
                }
            }
        )*
    };
}

impl_collectable!(StringObject, TableObject, UserDataObject, FunctionObject, ThreadObject);

/// Free every white object and whiten the survivors, returning how many were freed
fn sweep_arena<T: Collectable>(arena: &mut Arena<T>) -> usize {
    let dead: Vec<Handle> = arena
        .iter_mut()
        .filter_map(|(handle, object)| {
            let mark = object.mark_mut();
            if *mark == GcMark::White {
                Some(handle)
            } else {
                *mark = GcMark::White;
                None
            }
        })
        .collect();
    for handle in &dead {
        arena.remove(*handle);
    }
    dead.len()
}

impl LuaHeap {
    /// Create a new empty heap
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or find) an interned string
    pub fn create_string(&mut self, bytes: &[u8]) -> StringHandle {
        if let Some(handle) = self.string_index.get(bytes) {
            return *handle;
        }
        let boxed: Box<[u8]> = bytes.into();
        let handle = StringHandle(self.strings.insert(StringObject { bytes: boxed.clone(), mark: GcMark::White }));
        self.string_index.insert(boxed, handle);
        handle
    }

    /// Get string bytes
    pub fn get_string(&self, handle: StringHandle) -> Result<&[u8]> {
        self.strings
            .get(handle.0)
            .map(|s| &s.bytes[..])
            .ok_or(LuaError::InvalidHandle)
    }

    /// Create a new table
    pub fn create_table(&mut self, narr: usize, nrec: usize) -> TableHandle {
        TableHandle(self.tables.insert(TableObject::with_capacity(narr, nrec)))
    }

    /// Get a table
    pub fn get_table(&self, handle: TableHandle) -> Result<&TableObject> {
        self.tables.get(handle.0).ok_or(LuaError::InvalidHandle)
    }

    /// Get a table mutably
    pub fn get_table_mut(&mut self, handle: TableHandle) -> Result<&mut TableObject> {
        self.tables.get_mut(handle.0).ok_or(LuaError::InvalidHandle)
    }

    /// Create a full userdata
    pub fn create_userdata(&mut self, data: Box<dyn Any>, type_name: &'static str) -> UserDataHandle {
        UserDataHandle(self.userdata.insert(UserDataObject {
            data: Rc::new(RefCell::new(data)),
            type_name,
            metatable: None,
            mark: GcMark::White,
        }))
    }

    /// Get a userdata
    pub fn get_userdata(&self, handle: UserDataHandle) -> Result<&UserDataObject> {
        self.userdata.get(handle.0).ok_or(LuaError::InvalidHandle)
    }

    /// Create a native function
    pub fn create_function(&mut self, func: NativeFunction) -> FunctionHandle {
        FunctionHandle(self.functions.insert(FunctionObject { func, env: None, mark: GcMark::White }))
    }

    /// Get a function
    pub fn get_function(&self, handle: FunctionHandle) -> Result<&FunctionObject> {
        self.functions.get(handle.0).ok_or(LuaError::InvalidHandle)
    }

    /// Get a function mutably
    pub fn get_function_mut(&mut self, handle: FunctionHandle) -> Result<&mut FunctionObject> {
        self.functions.get_mut(handle.0).ok_or(LuaError::InvalidHandle)
    }

    /// Create a thread with an empty stack
    pub fn create_thread(&mut self) -> ThreadHandle {
        ThreadHandle(self.threads.insert(ThreadObject::new()))
    }

    /// Get a thread
    pub fn get_thread(&self, handle: ThreadHandle) -> Result<&ThreadObject> {
        self.threads.get(handle.0).ok_or(LuaError::InvalidHandle)
    }

    /// Get a thread mutably
    pub fn get_thread_mut(&mut self, handle: ThreadHandle) -> Result<&mut ThreadObject> {
        self.threads.get_mut(handle.0).ok_or(LuaError::InvalidHandle)
    }

    /// Metatable of a table or userdata
    pub fn get_metatable(&self, value: &Value) -> Result<Option<TableHandle>> {
        match value {
            Value::Table(t) => Ok(self.get_table(*t)?.metatable),
            Value::UserData(u) => Ok(self.get_userdata(*u)?.metatable),
            _ => Ok(None),
        }
    }

    /// Set the metatable of a table or userdata
    pub fn set_metatable(&mut self, value: &Value, metatable: Option<TableHandle>) -> Result<()> {
        match value {
            Value::Table(t) => self.get_table_mut(*t)?.metatable = metatable,
            Value::UserData(u) => {
                self.userdata.get_mut(u.0).ok_or(LuaError::InvalidHandle)?.metatable = metatable
            }
            other => {
                return Err(LuaError::type_mismatch(format!(
                    "cannot set metatable of a {} value",
                    other.type_name()
                )))
            }
        }
        Ok(())
    }

    /// Object counts
    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            strings: self.strings.len(),
            tables: self.tables.len(),
            userdata: self.userdata.len(),
            functions: self.functions.len(),
            threads: self.threads.len(),
        }
    }

    /// Run a full collection cycle, returning the number of objects freed
    ///
    /// Every thread stack is a root in addition to `roots`. Values held only
    /// in native locals are not roots, so callers must not collect while such
    /// values are still in use.
    pub fn collect_garbage(&mut self, roots: &[Value]) -> usize {
        self.gray_stack.clear();

        let threads: Vec<ThreadHandle> = self.threads.iter().map(|(handle, _)| ThreadHandle(handle)).collect();
        for thread in threads {
            self.mark_value(&Value::Thread(thread));
        }
        for root in roots {
            self.mark_value(root);
        }

        while let Some(obj) = self.gray_stack.pop() {
            self.scan_object(obj);
        }

        self.sweep()
    }

    /// Mark a value as reachable
    fn mark_value(&mut self, value: &Value) {
        match value {
            Value::String(handle) => {
                if let Some(string) = self.strings.get_mut(handle.0) {
                    // Strings have no references
                    string.mark = GcMark::Black;
                }
            }
            Value::Table(handle) => {
                if let Some(table) = self.tables.get_mut(handle.0) {
                    if table.mark == GcMark::White {
                        table.mark = GcMark::Gray;
                        self.gray_stack.push(GcObject::Table(*handle));
                    }
                }
            }
            Value::UserData(handle) => {
                if let Some(ud) = self.userdata.get_mut(handle.0) {
                    if ud.mark == GcMark::White {
                        ud.mark = GcMark::Gray;
                        self.gray_stack.push(GcObject::UserData(*handle));
                    }
                }
            }
            Value::Function(handle) => {
                if let Some(func) = self.functions.get_mut(handle.0) {
                    if func.mark == GcMark::White {
                        func.mark = GcMark::Gray;
                        self.gray_stack.push(GcObject::Function(*handle));
                    }
                }
            }
            Value::Thread(handle) => {
                if let Some(thread) = self.threads.get_mut(handle.0) {
                    if thread.mark == GcMark::White {
                        thread.mark = GcMark::Gray;
                        self.gray_stack.push(GcObject::Thread(*handle));
                    }
                }
            }
            Value::Nil | Value::Boolean(_) | Value::Number(_) => {}
        }
    }

    /// Blacken a gray object and mark everything it references
    fn scan_object(&mut self, obj: GcObject) {
        // Collect values to mark first (to avoid borrow issues)
        let mut values_to_mark = Vec::new();
        match obj {
            GcObject::Table(handle) => {
                if let Some(table) = self.tables.get_mut(handle.0) {
                    table.mark = GcMark::Black;
                    values_to_mark.extend(table.array.iter().copied());
                    for (k, v) in &table.map {
                        values_to_mark.push(*k);
                        values_to_mark.push(*v);
                    }
                    values_to_mark.extend(table.metatable.map(Value::Table));
                }
            }
            GcObject::UserData(handle) => {
                if let Some(ud) = self.userdata.get_mut(handle.0) {
                    ud.mark = GcMark::Black;
                    values_to_mark.extend(ud.metatable.map(Value::Table));
                }
            }
            GcObject::Function(handle) => {
                if let Some(func) = self.functions.get_mut(handle.0) {
                    func.mark = GcMark::Black;
                    values_to_mark.extend(func.env.map(Value::Table));
                }
            }
            GcObject::Thread(handle) => {
                if let Some(thread) = self.threads.get_mut(handle.0) {
                    thread.mark = GcMark::Black;
                    values_to_mark.extend(thread.stack.iter().copied());
                }
            }
        }
        for value in &values_to_mark {
            self.mark_value(value);
        }
    }

    /// Free unmarked objects and prune the string interner
    fn sweep(&mut self) -> usize {
        let mut freed = sweep_arena(&mut self.strings);
        let strings = &self.strings;
        self.string_index.retain(|_, handle| strings.contains(handle.0));
        freed += sweep_arena(&mut self.tables);
        freed += sweep_arena(&mut self.userdata);
        freed += sweep_arena(&mut self.functions);
        // Threads are all roots; this only resets their marks
        freed += sweep_arena(&mut self.threads);
        freed
    }

    /// Raw handle of a heap value, if it has one
    pub(crate) fn handle_of(value: &Value) -> Option<Handle> {
        match value {
            Value::String(h) => Some(h.0),
            Value::Table(h) => Some(h.0),
            Value::UserData(h) => Some(h.0),
            Value::Function(h) => Some(h.0),
            Value::Thread(h) => Some(h.0),
            Value::Nil | Value::Boolean(_) | Value::Number(_) => None,
        }
    }
}
