//! Lazy element references
//!
//! `table.index(key)` pushes the table and the key and returns a
//! [`TableKeyReference`] naming those two stack slots. Nothing is read or
//! written until the reference is used:
//!
//! ```
//! use ferrous_luabind::{IndexableTable, LuaState, LuaTable};
//!
//! let state = LuaState::new();
//! let t = LuaTable::new(&state).unwrap();
//! t.index("x").unwrap().assign(5).unwrap();
//! t.index("y").unwrap().assign(&t.index("x").unwrap()).unwrap();
//! assert_eq!(t.index("y").unwrap().get::<i32>().unwrap(), 5);
//! assert_eq!(state.get_top(), 0);
//! ```
//!
//! Dropping the reference truncates the stack back to the depth it was
//! captured at. References must be dropped in reverse order of creation;
//! one whose slots were already truncated by an older reference reports
//! `InvalidOperation` instead of reading unrelated slots, even after new
//! references were captured into the same positions.

use crate::bind::class::ClassMetatable;
use crate::bind::function::{LuaFunction, MemFunBinder};
use crate::bind::guard::ScopedSavedStack;
use crate::bind::ops::TableOrUserDataOps;
use crate::bind::reference::{LuaRef, RegistryRef};
use crate::bind::table::LuaTable;
use crate::bind::traits::{push_single, LuaGet, LuaPush};
use crate::config::LogLevel;
use crate::error::{LuaError, Result};
use crate::lua::{CompareOp, LuaState, ValueType};
use std::cmp::Ordering;
use std::fmt;

/// The value at `key` in a table, captured on the stack but not yet read
pub struct TableKeyReference<'a> {
    state: &'a LuaState,

    /// Depth to truncate to on drop
    restore: i32,

    table_slot: i32,
    key_slot: i32,

    /// Capture of the key slot; lost once the stack is truncated below it
    token: u64,
}

impl<'a> TableKeyReference<'a> {
    /// Push `table` and `key` and capture their slots
    pub(crate) fn capture<K: LuaPush + ?Sized>(state: &'a LuaState, table: &RegistryRef, key: &K) -> Result<Self> {
        let guard = ScopedSavedStack::new(state);
        table.push_to(state)?;
        push_single(key, state)?;
        Self::from_pushed(state, guard)
    }

    /// Take over the two values pushed under `guard`
    fn from_pushed(state: &'a LuaState, guard: ScopedSavedStack<'_>) -> Result<Self> {
        let restore = guard.saved();
        let token = state.capture_slot(restore + 2)?;
        guard.release();
        Ok(TableKeyReference {
            state,
            restore,
            table_slot: restore + 1,
            key_slot: restore + 2,
            token,
        })
    }

    /// Runtime this reference was captured on
    pub fn state(&self) -> &'a LuaState {
        self.state
    }

    fn check_live(&self) -> Result<()> {
        if self.state.capture_live(self.token, self.key_slot) {
            Ok(())
        } else {
            Err(LuaError::InvalidOperation(
                "element reference used after its stack slots were released".to_string(),
            ))
        }
    }

    /// Push the element's current value (exactly one slot)
    ///
    /// Indexing something that is not a table reads as nil.
    fn push_current(&self) -> Result<()> {
        self.check_live()?;
        let state = self.state;
        match state.type_at(self.table_slot) {
            ValueType::Table => {
                state.push_value(self.key_slot)?;
                state.get_table(self.table_slot)
            }
            ValueType::UserData => {
                let top = state.get_top();
                state.push_value(self.key_slot)?;
                match state.get_table(self.table_slot) {
                    Err(e) if e.is_type_mismatch() => {
                        state.set_top(top)?;
                        state.push_nil()
                    }
                    other => other,
                }
            }
            _ => state.push_nil(),
        }
    }

    /// Read and convert the element
    pub fn get<T: LuaGet>(&self) -> Result<T> {
        let _guard = ScopedSavedStack::new(self.state);
        self.push_current()?;
        T::get(self.state, -1)
    }

    /// Pin the element's current value
    pub fn get_value(&self) -> Result<LuaRef> {
        let _guard = ScopedSavedStack::new(self.state);
        self.push_current()?;
        LuaRef::from_stack_top(self.state)
    }

    /// Type of the element's current value ([`ValueType::None`] if it cannot be read)
    pub fn value_type(&self) -> ValueType {
        let _guard = ScopedSavedStack::new(self.state);
        match self.push_current() {
            Ok(()) => self.state.type_at(-1),
            Err(_) => ValueType::None,
        }
    }

    /// Whether the element is nil
    pub fn is_nil(&self) -> bool {
        self.value_type().is_none_or_nil()
    }

    /// Strict type test of the element's current value
    pub fn type_test<T: LuaGet>(&self) -> bool {
        let _guard = ScopedSavedStack::new(self.state);
        self.push_current().is_ok() && T::strict_check_type(self.state, -1)
    }

    /// Weak type test of the element's current value
    pub fn weak_type_test<T: LuaGet>(&self) -> bool {
        let _guard = ScopedSavedStack::new(self.state);
        self.push_current().is_ok() && T::check_type(self.state, -1)
    }

    /// Write `value` into the table
    ///
    /// When `value` is itself an element reference it is read first, so
    /// `a.assign(&b)` copies b's current value into a.
    pub fn assign<V: LuaPush>(&self, value: V) -> Result<()> {
        self.check_live()?;
        let state = self.state;
        let target = state.type_at(self.table_slot);
        if !matches!(target, ValueType::Table | ValueType::UserData) {
            let err = LuaError::type_mismatch(format!("attempt to index a {} value", target));
            state.report_error(err.clone());
            return Err(err);
        }
        let _guard = ScopedSavedStack::new(state);
        state.push_value(self.key_slot)?;
        push_single(&value, state)?;
        let written = state.set_table(self.table_slot);
        if let Err(e) = &written {
            if e.is_type_mismatch() {
                state.report_error(e.clone());
            }
        }
        written
    }

    /// Store a native closure as the element
    pub fn set_function<F>(&self, func: F) -> Result<()>
    where
        F: Fn(&LuaState) -> Result<usize> + 'static,
    {
        let func = LuaFunction::new(self.state, func)?;
        self.assign(&func)
    }

    /// Store a new instance table of `class` as the element
    pub fn set_class<C: ClassMetatable + ?Sized>(&self, class: &C) -> Result<()> {
        let metatable = class.register_class(self.state)?;
        let instance = LuaTable::new(self.state)?;
        instance.set_metatable(&metatable)?;
        self.assign(&instance)
    }

    /// Bind `element:name(...)` calls on the element's current value
    pub fn method(&self, name: &str) -> Result<MemFunBinder> {
        Ok(MemFunBinder::new(self.get_value()?, name))
    }

    /// Capture `element[key]` on top of this reference's slots
    pub fn index<K: LuaPush>(&self, key: K) -> Result<TableKeyReference<'a>> {
        let guard = ScopedSavedStack::new(self.state);
        self.push_current()?;
        push_single(&key, self.state)?;
        Self::from_pushed(self.state, guard)
    }

    fn compare_with<V: LuaPush + ?Sized>(&self, other: &V, op: CompareOp, reversed: bool) -> Result<bool> {
        let state = self.state;
        let _guard = ScopedSavedStack::new(state);
        self.push_current()?;
        push_single(other, state)?;
        if reversed {
            state.compare(-1, -2, op)
        } else {
            state.compare(-2, -1, op)
        }
    }

    /// `element == other`
    pub fn equals<V: LuaPush + ?Sized>(&self, other: &V) -> Result<bool> {
        self.compare_with(other, CompareOp::Eq, false)
    }

    /// `element < other`
    pub fn less_than<V: LuaPush + ?Sized>(&self, other: &V) -> Result<bool> {
        self.compare_with(other, CompareOp::Lt, false)
    }

    /// `element <= other`
    pub fn less_equal<V: LuaPush + ?Sized>(&self, other: &V) -> Result<bool> {
        self.compare_with(other, CompareOp::Le, false)
    }

    fn ordering_with<V: LuaPush + ?Sized>(&self, other: &V) -> Option<Ordering> {
        if self.equals(other).ok()? {
            Some(Ordering::Equal)
        } else if self.less_than(other).ok()? {
            Some(Ordering::Less)
        } else if self.compare_with(other, CompareOp::Lt, true).ok()? {
            Some(Ordering::Greater)
        } else {
            None
        }
    }
}

impl LuaPush for TableKeyReference<'_> {
    /// Pushes the element's current value; only onto the stack it was captured on
    fn push(&self, state: &LuaState) -> Result<usize> {
        self.state.check_same_runtime(state)?;
        let guard = ScopedSavedStack::new(state);
        self.push_current()?;
        Ok(guard.release())
    }
}

impl Drop for TableKeyReference<'_> {
    /// Truncates to the captured depth, unless the slots were already released
    fn drop(&mut self) {
        if self.check_live().is_ok() && self.state.get_top() > self.restore {
            if self.state.config().logs(LogLevel::Debug) {
                println!("[LUA_REF] releasing element slots {}..{}", self.table_slot, self.key_slot);
            }
            let _ = self.state.set_top(self.restore);
        }
        self.state.release_capture(self.token);
    }
}

impl PartialEq for TableKeyReference<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.equals(other).unwrap_or(false)
    }
}

impl PartialOrd for TableKeyReference<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.ordering_with(other)
    }
}

/// Comparisons against native values read the element first
macro_rules! impl_element_cmp {
    ($($t:ty),*) => {
        $(
            impl PartialEq<$t> for TableKeyReference<'_> {
                fn eq(&self, other: &$t) -> bool {
                    self.equals(other).unwrap_or(false)
                }
            }

            impl PartialOrd<$t> for TableKeyReference<'_> {
                fn partial_cmp(&self, other: &$t) -> Option<Ordering> {
                    self.ordering_with(other)
                }
            }
        )*
    };
}

impl_element_cmp!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32, f64, bool, String, str, &str);

impl PartialEq<LuaRef> for TableKeyReference<'_> {
    fn eq(&self, other: &LuaRef) -> bool {
        self.equals(other).unwrap_or(false)
    }
}

impl fmt::Display for TableKeyReference<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let _guard = ScopedSavedStack::new(self.state);
        match self.push_current() {
            Ok(()) => f.write_str(&self.state.to_display_string(-1)),
            Err(_) => f.write_str("<released>"),
        }
    }
}

impl fmt::Debug for TableKeyReference<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableKeyReference")
            .field("restore", &self.restore)
            .field("table_slot", &self.table_slot)
            .field("key_slot", &self.key_slot)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bind::ops::{BasicValueOps, IndexableTable};
    use crate::config::BindConfig;

    fn state() -> LuaState {
        LuaState::with_config(BindConfig::default())
    }

    #[test]
    fn test_capture_is_lazy() {
        let l = state();
        let t = LuaTable::new(&l).unwrap();
        let element = t.index("k").unwrap();
        assert_eq!(l.get_top(), 2);
        // Written after capture, still observed by the read
        t.set_field("k", 7).unwrap();
        assert_eq!(element.get::<i32>().unwrap(), 7);
        assert_eq!(l.get_top(), 2);
        drop(element);
        assert_eq!(l.get_top(), 0);
    }

    #[test]
    fn test_missing_key_reads_nil() {
        let l = state();
        let t = LuaTable::new(&l).unwrap();
        let element = t.index(42).unwrap();
        assert!(element.is_nil());
        assert_eq!(element.get::<Option<i32>>().unwrap(), None);
        assert_eq!(element.get_value().unwrap().value_type(), ValueType::Nil);
    }

    #[test]
    fn test_copy_between_elements() {
        let l = state();
        let t = LuaTable::new(&l).unwrap();
        t.index("x").unwrap().assign(5).unwrap();
        t.index("y").unwrap().assign(&t.index("x").unwrap()).unwrap();
        assert_eq!(t.index("y").unwrap().get::<i32>().unwrap(), 5);
        assert_eq!(t.index("x").unwrap().get::<i32>().unwrap(), 5);
        assert_eq!(l.get_top(), 0);
    }

    #[test]
    fn test_nil_target() {
        let l = state();
        let nil_value = LuaRef::new(&l, &None::<i32>).unwrap();
        assert!(!nil_value.is_nilref());

        let element = nil_value.index("k").unwrap();
        assert!(element.get::<Option<i32>>().unwrap().is_none());
        assert!(element.assign(1).unwrap_err().is_type_mismatch());
        drop(element);
        assert_eq!(l.get_top(), 0);
        assert!(l.take_last_error().unwrap().is_type_mismatch());
    }

    #[test]
    fn test_chained_index() {
        let l = state();
        let outer = LuaTable::new(&l).unwrap();
        let inner = LuaTable::new(&l).unwrap();
        inner.set_field("leaf", "found").unwrap();
        outer.set_field("inner", &inner).unwrap();

        assert_eq!(outer.index("inner").unwrap().index("leaf").unwrap().get::<String>().unwrap(), "found");
        outer.index("inner").unwrap().index("other").unwrap().assign(true).unwrap();
        assert!(inner.get_field::<_, bool>("other").unwrap());
        assert_eq!(l.get_top(), 0);
    }

    #[test]
    fn test_comparisons_read_values() {
        let l = state();
        let t = LuaTable::new(&l).unwrap();
        t.set_field("a", 1).unwrap();
        t.set_field("b", 2).unwrap();
        t.set_field("s", "text").unwrap();

        let a = t.index("a").unwrap();
        let b = t.index("b").unwrap();
        assert!(a == 1i32);
        assert!(a < b);
        assert!(b > 1.5f64);
        assert!(a != b);
        assert!(t.index("s").unwrap() == "text");
        drop(b);
        drop(a);
        assert_eq!(l.get_top(), 0);
    }

    #[test]
    fn test_released_slots_are_detected() {
        let l = state();
        let t = LuaTable::new(&l).unwrap();
        t.set_field("k", 1).unwrap();
        let older = t.index("k").unwrap();
        let newer = t.index("k").unwrap();
        drop(older);
        assert!(matches!(newer.get::<i32>(), Err(LuaError::InvalidOperation(_))));
        l.push_number(0.0).unwrap();
        l.push_number(0.0).unwrap();
        l.push_number(0.0).unwrap();
        l.push_number(0.0).unwrap();
        assert!(matches!(newer.assign(2), Err(LuaError::InvalidOperation(_))));
        // A dead reference leaves the stack alone
        drop(newer);
        assert_eq!(l.get_top(), 4);
    }

    #[test]
    fn test_refilled_slots_stay_dead() {
        let l = state();
        let t = LuaTable::new(&l).unwrap();
        t.set_field("k", 1).unwrap();
        let a = t.index("k").unwrap();
        let b = t.index("k").unwrap();
        drop(a);
        // Same table and key land in the slots b was captured in
        let c = t.index("k").unwrap();
        let d = t.index("k").unwrap();
        assert_eq!(l.get_top(), 4);
        assert!(matches!(b.get::<i32>(), Err(LuaError::InvalidOperation(_))));
        drop(b);
        assert_eq!(l.get_top(), 4);
        assert_eq!(d.get::<i32>().unwrap(), 1);
        assert_eq!(c.get::<i32>().unwrap(), 1);
        drop(d);
        drop(c);
        assert_eq!(l.get_top(), 0);
    }

    #[test]
    fn test_cross_runtime_use_fails() {
        let l = state();
        let co = l.new_thread().unwrap();
        let t = LuaTable::new(&l).unwrap();
        t.set_field("k", 1).unwrap();
        let on_co = LuaTable::new(&co).unwrap();

        let element = t.index("k").unwrap();
        let err = on_co.index("k").unwrap().assign(&element).unwrap_err();
        assert!(matches!(err, LuaError::CrossRuntime { .. }));
        assert_eq!(co.get_top(), 0);
    }

    #[test]
    fn test_set_function_and_method() {
        let l = state();
        let t = LuaTable::new(&l).unwrap();
        t.set_field("n", 3).unwrap();
        t.index("twice")
            .unwrap()
            .set_function(|l: &LuaState| {
                let this = LuaTable::from_index(l, 1)?;
                let n: i64 = this.get_field("n")?;
                l.push_number((n * 2) as f64)?;
                Ok(1)
            })
            .unwrap();

        let holder = LuaTable::new(&l).unwrap();
        holder.index("obj").unwrap().assign(&t).unwrap();
        let doubled: i64 = holder.index("obj").unwrap().method("twice").unwrap().call(()).unwrap();
        assert_eq!(doubled, 6);
        assert_eq!(l.get_top(), 0);
    }

    #[test]
    fn test_display() {
        let l = state();
        let t = LuaTable::new(&l).unwrap();
        t.set_field("n", 2.5).unwrap();
        assert_eq!(t.index("n").unwrap().to_string(), "2.5");
        assert_eq!(t.index("missing").unwrap().to_string(), "nil");
    }
}
