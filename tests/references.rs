//! Registry-backed references: copies, release, narrowing and runtimes

use ferrous_luabind::{
    BasicValueOps, BindConfig, CallableValue, IndexableTable, LuaError, LuaFunction, LuaRef, LuaState,
    LuaTable, LuaThread, LuaUserData, RegistryRef, ScopedSavedStack, TableOrUserDataOps, ValueType,
};
use std::cell::RefCell;
use std::rc::Rc;

fn state() -> LuaState {
    LuaState::with_config(BindConfig::default())
}

#[test]
fn test_clone_survives_release_of_original() {
    let l = state();
    let first = LuaRef::new(&l, "shared").unwrap();
    let second = first.clone();
    assert_eq!(l.registry_len(), 2);

    drop(first);
    assert_eq!(l.registry_len(), 1);
    assert_eq!(second.get::<String>().unwrap(), "shared");

    drop(second);
    assert_eq!(l.registry_len(), 0);
}

#[test]
fn test_explicit_unref_leaves_sentinel() {
    let l = state();
    let mut raw = RegistryRef::new_table(&l, 0, 0).unwrap();
    let copy = raw.clone();
    raw.unref();
    assert!(raw.is_nilref());
    assert_eq!(raw.value_type(), ValueType::Nil);
    assert_eq!(copy.value_type(), ValueType::Table);
    raw.unref();
    assert_eq!(l.registry_len(), 1);
}

#[test]
fn test_copies_alias_the_same_table() {
    let l = state();
    let t = LuaTable::new(&l).unwrap();
    let alias = t.clone();
    alias.set_field("k", 1).unwrap();
    assert_eq!(t.get_field::<_, i32>("k").unwrap(), 1);
    assert_eq!(t, alias);
    assert_ne!(t, LuaTable::new(&l).unwrap());
}

#[test]
fn test_wrong_type_construction_reports_and_degrades() {
    let l = state();
    let reported = Rc::new(RefCell::new(Vec::new()));
    let sink = reported.clone();
    l.set_error_handler(Some(Rc::new(move |e: &LuaError| sink.borrow_mut().push(e.clone()))));

    let func = LuaFunction::from_ref(LuaRef::new(&l, &3).unwrap());
    assert!(func.is_nilref());
    let ud = LuaUserData::from_ref(LuaTable::new(&l).unwrap().into());
    assert!(ud.is_nilref());
    let thread = LuaThread::from_ref(LuaRef::nilref());
    assert!(thread.is_nilref());

    assert_eq!(reported.borrow().len(), 2);
    assert!(reported.borrow().iter().all(|e| e.is_type_mismatch()));
    assert_eq!(l.get_top(), 0);
    assert_eq!(l.registry_len(), 0);
}

#[test]
fn test_sentinel_and_pinned_nil_are_distinct() {
    let l = state();
    let sentinel = LuaRef::nilref();
    let pinned = LuaRef::new(&l, &None::<bool>).unwrap();

    assert!(sentinel.is_nilref());
    assert!(sentinel.is_nil());
    assert!(!pinned.is_nilref());
    assert!(pinned.is_nil());
    assert!(matches!(sentinel.get::<i32>(), Err(LuaError::InvalidOperation(_))));
    assert_eq!(pinned.get::<Option<i32>>().unwrap(), None);
}

#[test]
fn test_comparisons() {
    let l = state();
    let one = LuaRef::new(&l, &1).unwrap();
    let two = LuaRef::new(&l, &2).unwrap();
    let also_one = LuaRef::new(&l, &1.0).unwrap();

    assert!(one.equals(&also_one).unwrap());
    assert!(one.less_than(&two).unwrap());
    assert!(two.less_equal(&two).unwrap());
    assert!(one < two);
    assert_eq!(one, also_one);

    let text = LuaRef::new(&l, "a").unwrap();
    assert!(one.less_than(&text).is_err());
    assert_eq!(one.partial_cmp(&text), None);
    assert_eq!(l.get_top(), 0);
}

#[test]
fn test_cross_runtime_push_is_rejected() {
    let a = state();
    let b = state();
    let t = LuaTable::new(&a).unwrap();
    assert!(matches!(t.push_to(&b), Err(LuaError::CrossRuntime { .. })));
    assert_eq!(b.get_top(), 0);

    let thread = LuaThread::new(&a).unwrap();
    let co = thread.thread_state().unwrap();
    t.push_to(&co).unwrap();
    assert_eq!(co.get_top(), 1);

    let element = t.index("k").unwrap();
    assert!(matches!(LuaRef::new(&co, &element), Err(LuaError::CrossRuntime { .. })));
}

#[test]
fn test_guard_restores_after_early_return() {
    let l = state();
    let f = |l: &LuaState| -> ferrous_luabind::Result<()> {
        let _guard = ScopedSavedStack::new(l);
        l.push_number(1.0)?;
        l.push_string("x")?;
        Err(LuaError::Runtime("bail".to_string()))
    };
    assert!(f(&l).is_err());
    assert_eq!(l.get_top(), 0);
}

#[test]
fn test_function_round_trip_through_table() {
    let l = state();
    let t = LuaTable::new(&l).unwrap();
    t.index("double")
        .unwrap()
        .set_function(|l: &LuaState| {
            let n = l.to_number(1).unwrap_or(0.0);
            l.push_number(n * 2.0)?;
            Ok(1)
        })
        .unwrap();

    let double: LuaFunction = t.get_field("double").unwrap();
    assert_eq!(double.call::<_, i32>((21,)).unwrap(), 42);
    assert_eq!(l.get_top(), 0);
}

#[test]
fn test_table_callable_through_metatable() {
    let l = state();
    let t = LuaTable::new(&l).unwrap();
    let mt = LuaTable::new(&l).unwrap();
    mt.index("__call")
        .unwrap()
        .set_function(|l: &LuaState| {
            // the table itself arrives as the first argument
            assert_eq!(l.type_at(1), ValueType::Table);
            let n = l.to_number(2).unwrap_or(0.0);
            l.push_number(n + 1.0)?;
            Ok(1)
        })
        .unwrap();
    t.set_metatable(&mt).unwrap();

    let callable: LuaRef = t.into();
    assert_eq!(callable.call::<_, i32>((41,)).unwrap(), 42);
    assert_eq!(l.get_top(), 0);
}

#[test]
fn test_dropped_tables_are_collected() {
    let l = state();
    let kept = LuaTable::new(&l).unwrap();
    kept.set_field("k", "v").unwrap();
    let alias = kept.clone();
    for _ in 0..10_000 {
        LuaTable::new(&l).unwrap();
    }
    assert_eq!(l.memory_stats().tables, 10_001);

    drop(kept);
    assert!(l.collect_garbage() >= 10_000);
    assert_eq!(l.memory_stats().tables, 1);
    assert_eq!(alias.get_field::<_, String>("k").unwrap(), "v");

    drop(alias);
    l.collect_garbage();
    assert_eq!(l.memory_stats().tables, 0);
}

#[test]
fn test_collection_follows_nested_values() {
    let l = state();
    let outer = LuaTable::new(&l).unwrap();
    {
        let inner = LuaTable::new(&l).unwrap();
        inner.set_field("leaf", 1).unwrap();
        let meta = LuaTable::new(&l).unwrap();
        inner.set_metatable(&meta).unwrap();
        outer.set_field("inner", &inner).unwrap();
        let f = LuaFunction::new(&l, |_: &LuaState| Ok(0)).unwrap();
        outer.set_field("f", &f).unwrap();
    }
    l.collect_garbage();
    assert_eq!(l.memory_stats().tables, 3);
    assert_eq!(l.memory_stats().functions, 1);

    let inner: LuaTable = outer.get_field("inner").unwrap();
    assert_eq!(inner.get_field::<_, i32>("leaf").unwrap(), 1);
    assert!(inner.get_metatable().unwrap().is_some());
    assert_eq!(l.get_top(), 0);
}
