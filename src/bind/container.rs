//! Conversions between native containers and tables
//!
//! Sequences map to 1-based array tables; maps map to tables keyed by the
//! converted keys. Reading enumerates the table once. For sequences only
//! entries whose key is a non-negative integer are kept, in traversal order.
//!
//! The weak checks relax values only: keys must always pass the strict
//! check, so `{[1] = "a", ["1"] = "b"}` is never a `BTreeMap<i32, String>`.

use crate::bind::guard::ScopedSavedStack;
use crate::bind::ops::traverse;
use crate::bind::traits::{push_single, LuaGet, LuaPush};
use crate::error::Result;
use crate::lua::{LuaState, ValueType};
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

/// Whether every entry of the table at `index` passes `check`
fn all_entries(state: &LuaState, index: i32, check: impl Fn(&LuaState) -> bool) -> bool {
    if state.type_at(index) != ValueType::Table {
        return false;
    }
    let mut ok = true;
    let walked = traverse(state, index, |state| {
        ok = ok && check(state);
        Ok(())
    });
    walked.is_ok() && ok
}

/// Convert every entry of the table at `index` with `f`, in traversal order
fn collect_entries<T>(state: &LuaState, index: i32, mut f: impl FnMut(&LuaState) -> Result<Option<T>>) -> Result<Vec<T>> {
    if state.type_at(index) != ValueType::Table {
        return Err(crate::bind::traits::mismatch(state, index, "table"));
    }
    let mut out = Vec::new();
    traverse(state, index, |state| {
        if let Some(item) = f(state)? {
            Vec::push(&mut out, item);
        }
        Ok(())
    })?;
    Ok(out)
}

/// Push a table filled from `(key, value)` pairs
fn push_pairs<'i, K, V, I>(state: &LuaState, narr: usize, nrec: usize, entries: I) -> Result<usize>
where
    K: LuaPush + 'i,
    V: LuaPush + 'i,
    I: Iterator<Item = (&'i K, &'i V)>,
{
    let guard = ScopedSavedStack::new(state);
    state.create_table(narr, nrec)?;
    for (key, value) in entries {
        push_single(key, state)?;
        push_single(value, state)?;
        state.set_table(-3)?;
    }
    Ok(guard.release())
}

impl<T: LuaPush> LuaPush for Vec<T> {
    fn push(&self, state: &LuaState) -> Result<usize> {
        self.as_slice().push(state)
    }
}

impl<T: LuaPush> LuaPush for [T] {
    fn push(&self, state: &LuaState) -> Result<usize> {
        let guard = ScopedSavedStack::new(state);
        state.create_table(self.len(), 0)?;
        for (i, value) in self.iter().enumerate() {
            state.push_number((i + 1) as f64)?;
            push_single(value, state)?;
            state.set_table(-3)?;
        }
        Ok(guard.release())
    }
}

impl<T: LuaGet> LuaGet for Vec<T> {
    fn strict_check_type(state: &LuaState, index: i32) -> bool {
        all_entries(state, index, |state| {
            usize::strict_check_type(state, -2) && T::strict_check_type(state, -1)
        })
    }

    fn check_type(state: &LuaState, index: i32) -> bool {
        all_entries(state, index, |state| {
            usize::strict_check_type(state, -2) && T::check_type(state, -1)
        })
    }

    fn get(state: &LuaState, index: i32) -> Result<Self> {
        collect_entries(state, index, |state| {
            if usize::strict_check_type(state, -2) {
                T::get(state, -1).map(Some)
            } else {
                Ok(None)
            }
        })
    }
}

impl<K: LuaPush, V: LuaPush> LuaPush for BTreeMap<K, V> {
    fn push(&self, state: &LuaState) -> Result<usize> {
        push_pairs(state, 0, self.len(), self.iter())
    }
}

impl<K: LuaGet + Ord, V: LuaGet> LuaGet for BTreeMap<K, V> {
    fn strict_check_type(state: &LuaState, index: i32) -> bool {
        all_entries(state, index, |state| K::strict_check_type(state, -2) && V::strict_check_type(state, -1))
    }

    fn check_type(state: &LuaState, index: i32) -> bool {
        all_entries(state, index, |state| K::strict_check_type(state, -2) && V::check_type(state, -1))
    }

    fn get(state: &LuaState, index: i32) -> Result<Self> {
        let pairs = collect_entries(state, index, |state| Ok(Some((K::get(state, -2)?, V::get(state, -1)?))))?;
        Ok(pairs.into_iter().collect())
    }
}

impl<K: LuaPush, V: LuaPush, S> LuaPush for HashMap<K, V, S> {
    fn push(&self, state: &LuaState) -> Result<usize> {
        push_pairs(state, 0, self.len(), self.iter())
    }
}

impl<K: LuaGet + Eq + Hash, V: LuaGet> LuaGet for HashMap<K, V> {
    fn strict_check_type(state: &LuaState, index: i32) -> bool {
        all_entries(state, index, |state| K::strict_check_type(state, -2) && V::strict_check_type(state, -1))
    }

    fn check_type(state: &LuaState, index: i32) -> bool {
        all_entries(state, index, |state| K::strict_check_type(state, -2) && V::check_type(state, -1))
    }

    fn get(state: &LuaState, index: i32) -> Result<Self> {
        let pairs = collect_entries(state, index, |state| Ok(Some((K::get(state, -2)?, V::get(state, -1)?))))?;
        Ok(pairs.into_iter().collect())
    }
}
