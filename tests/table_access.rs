//! Element access through `table[key]` references
//!
//! Covers missing keys, write-then-read, copying between elements, nil
//! targets and stack neutrality on both success and failure paths.

use ferrous_luabind::{
    BasicValueOps, IndexableTable, LuaError, LuaRef, LuaState, LuaTable, LuaUserData, TableOrUserDataOps, ValueType,
};
use ferrous_luabind::BindConfig;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cell::RefCell;
use std::rc::Rc;

fn state() -> LuaState {
    LuaState::with_config(BindConfig::default())
}

/// Count reported errors on `l`
fn count_reports(l: &LuaState) -> Rc<RefCell<usize>> {
    let reported = Rc::new(RefCell::new(0));
    let counter = reported.clone();
    l.set_error_handler(Some(Rc::new(move |_: &LuaError| *counter.borrow_mut() += 1)));
    reported
}

#[test]
fn test_missing_key_reads_nil() {
    let l = state();
    let t = LuaTable::new(&l).unwrap();
    t.set_field("present", 1).unwrap();

    for key in ["absent", "", "PRESENT"] {
        let element = t.index(key).unwrap();
        assert!(element.is_nil());
        assert_eq!(element.value_type(), ValueType::Nil);
        assert_eq!(element.get::<Option<i32>>().unwrap(), None);
    }
    let element = t.index(42).unwrap();
    assert!(element.get_value().unwrap().is_nil());
    drop(element);
    assert_eq!(l.get_top(), 0);
}

#[test]
fn test_write_then_read() {
    let l = state();
    let t = LuaTable::new(&l).unwrap();

    t.index("int").unwrap().assign(7).unwrap();
    t.index("float").unwrap().assign(2.5).unwrap();
    t.index("text").unwrap().assign("hello").unwrap();
    t.index("flag").unwrap().assign(true).unwrap();
    t.index(3).unwrap().assign("three").unwrap();

    assert_eq!(t.index("int").unwrap().get::<i32>().unwrap(), 7);
    assert_eq!(t.index("float").unwrap().get::<f64>().unwrap(), 2.5);
    assert_eq!(t.index("text").unwrap().get::<String>().unwrap(), "hello");
    assert!(t.index("flag").unwrap().get::<bool>().unwrap());
    assert_eq!(t.get_field::<_, String>(3).unwrap(), "three");
    assert_eq!(l.get_top(), 0);
}

#[test]
fn test_randomized_round_trips() {
    let l = state();
    let t = LuaTable::new(&l).unwrap();
    let mut rng = StdRng::seed_from_u64(0x5eed);

    for _ in 0..200 {
        let key: i64 = rng.gen_range(-10_000..10_000);
        let value: f64 = rng.gen();
        t.index(key).unwrap().assign(value).unwrap();
        assert_eq!(t.index(key).unwrap().get::<f64>().unwrap(), value);

        let len = rng.gen_range(0..12);
        let name: String = (0..len).map(|_| rng.gen_range(b'a'..=b'z') as char).collect();
        let number: i32 = rng.gen();
        t.index(name.as_str()).unwrap().assign(number).unwrap();
        assert_eq!(t.get_field::<_, i32>(name.as_str()).unwrap(), number);
    }
    assert_eq!(l.get_top(), 0);
}

#[test]
fn test_copy_between_elements() {
    let l = state();
    let t = LuaTable::new(&l).unwrap();
    t.index("x").unwrap().assign(5).unwrap();

    t.index("y").unwrap().assign(&t.index("x").unwrap()).unwrap();
    assert_eq!(t.index("y").unwrap().get::<i32>().unwrap(), 5);
    assert_eq!(t.index("x").unwrap().get::<i32>().unwrap(), 5);

    // value copy, not an alias
    t.index("x").unwrap().assign(6).unwrap();
    assert_eq!(t.get_field::<_, i32>("y").unwrap(), 5);
    assert_eq!(l.get_top(), 0);
}

#[test]
fn test_nil_wrapper_reads_nil_but_rejects_writes() {
    let l = state();
    let reported = count_reports(&l);
    let nil = LuaRef::new(&l, &None::<i32>).unwrap();
    assert!(!nil.is_nilref());
    assert!(nil.is_nil());

    {
        let element = nil.index("k").unwrap();
        assert!(element.is_nil());
        assert_eq!(element.get::<Option<String>>().unwrap(), None);
        assert_eq!(*reported.borrow(), 0);

        let err = element.assign(1).unwrap_err();
        assert!(err.is_type_mismatch());
        assert_eq!(*reported.borrow(), 1);
    }
    assert_eq!(l.get_top(), 0);
}

#[test]
fn test_empty_reference_cannot_be_indexed() {
    let l = state();
    let empty = LuaRef::nilref();
    assert!(matches!(empty.index("k"), Err(LuaError::InvalidOperation(_))));
    assert_eq!(l.get_top(), 0);
}

#[test]
fn test_stack_depth_on_failure_paths() {
    let l = state();
    l.push_string("caller").unwrap();
    let t = LuaTable::new(&l).unwrap();
    t.set_field("text", "abc").unwrap();
    assert_eq!(l.get_top(), 1);

    assert!(t.get_field::<_, i32>("text").unwrap_err().is_type_mismatch());
    assert_eq!(l.get_top(), 1);

    assert!(t.index("text").unwrap().get::<bool>().is_ok());
    assert!(t.index("text").unwrap().get::<f64>().unwrap_err().is_type_mismatch());
    assert_eq!(l.get_top(), 1);

    let number = LuaRef::new(&l, &1).unwrap();
    assert!(number.index("k").unwrap().assign(2).is_err());
    assert!(number.keys::<LuaRef>().is_err());
    assert!(!number.type_test::<String>());
    assert_eq!(l.get_top(), 1);

    l.push_number(1.0).unwrap();
    let not_table = LuaTable::from_stack_top(&l).unwrap();
    assert!(not_table.is_nilref());
    assert_eq!(l.get_top(), 1);
    assert_eq!(l.to_str(1).as_deref(), Some("caller"));
}

#[test]
fn test_element_keeps_two_slots_until_dropped() {
    let l = state();
    let t = LuaTable::new(&l).unwrap();
    t.set_field("inner", LuaTable::new(&l).unwrap()).unwrap();

    let outer = t.index("inner").unwrap();
    assert_eq!(l.get_top(), 2);
    let nested = outer.index("leaf").unwrap();
    assert_eq!(l.get_top(), 4);
    nested.assign("green").unwrap();
    assert_eq!(l.get_top(), 4);
    drop(nested);
    assert_eq!(l.get_top(), 2);
    drop(outer);
    assert_eq!(l.get_top(), 0);

    let inner: LuaTable = t.get_field("inner").unwrap();
    assert_eq!(inner.get_field::<_, String>("leaf").unwrap(), "green");
}

#[test]
fn test_write_through_plain_userdata_reports() {
    let l = state();
    let reported = count_reports(&l);
    let holder = LuaTable::new(&l).unwrap();
    holder.set_field("ud", &LuaUserData::new(&l, 7u32).unwrap()).unwrap();

    let ud = holder.index("ud").unwrap();
    let element = ud.index("field").unwrap();
    assert!(element.is_nil());
    assert!(element.assign(1).unwrap_err().is_type_mismatch());
    drop(element);
    drop(ud);
    assert_eq!(*reported.borrow(), 1);
    assert!(l.take_last_error().unwrap().is_type_mismatch());
    assert_eq!(l.get_top(), 0);
}

#[test]
fn test_indexing_degraded_table_fails() {
    let l = state();
    let reported = count_reports(&l);
    let number = LuaRef::new(&l, &3).unwrap();
    let degraded = LuaTable::from_ref(number);
    assert!(degraded.is_nilref());
    assert_eq!(*reported.borrow(), 1);
    assert!(matches!(degraded.index("k"), Err(LuaError::InvalidOperation(_))));
    assert_eq!(l.get_top(), 0);
}
