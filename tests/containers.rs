//! Native containers pushed to and pulled from tables

use ferrous_luabind::{BasicValueOps, BindConfig, IndexableTable, LuaRef, LuaState, LuaTable, TableOrUserDataOps};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, HashMap};

fn state() -> LuaState {
    LuaState::with_config(BindConfig::default())
}

#[test]
fn test_sequence_keeps_order() {
    let l = state();
    let pinned = LuaRef::new(&l, &vec![10, 20, 30]).unwrap();
    assert_eq!(pinned.get::<Vec<i32>>().unwrap(), vec![10, 20, 30]);
    assert_eq!(l.get_top(), 0);
}

#[test]
fn test_map_round_trips_all_pairs() {
    let l = state();
    let mut map = HashMap::new();
    map.insert("a".to_string(), 1);
    map.insert("b".to_string(), 2);
    let pinned = LuaRef::new(&l, &map).unwrap();
    assert_eq!(pinned.get::<HashMap<String, i32>>().unwrap(), map);

    let ordered: BTreeMap<String, i32> = pinned.get().unwrap();
    assert_eq!(ordered.into_iter().collect::<Vec<_>>(), vec![("a".to_string(), 1), ("b".to_string(), 2)]);
}

#[test]
fn test_containers_through_elements() {
    let l = state();
    let t = LuaTable::new(&l).unwrap();
    t.index("list").unwrap().assign(vec!["x", "y"]).unwrap();
    assert_eq!(t.index("list").unwrap().get::<Vec<String>>().unwrap(), vec!["x", "y"]);

    let list: LuaTable = t.get_field("list").unwrap();
    assert_eq!(list.len().unwrap(), 2);
    assert_eq!(l.get_top(), 0);
}

#[test]
fn test_randomized_sequences_and_maps() {
    let l = state();
    let mut rng = StdRng::seed_from_u64(42);

    for _ in 0..50 {
        let len = rng.gen_range(0..40);
        let seq: Vec<i64> = (0..len).map(|_| rng.gen_range(-1_000_000..1_000_000)).collect();
        let pinned = LuaRef::new(&l, &seq).unwrap();
        assert_eq!(pinned.get::<Vec<i64>>().unwrap(), seq);

        let map: HashMap<i32, f64> = (0..len).map(|_| (rng.gen_range(-500..500), rng.gen())).collect();
        let pinned = LuaRef::new(&l, &map).unwrap();
        assert_eq!(pinned.get::<HashMap<i32, f64>>().unwrap(), map);
    }
    assert_eq!(l.get_top(), 0);
    assert_eq!(l.registry_len(), 0);
}

#[test]
fn test_mismatched_contents_fail_cleanly() {
    let l = state();
    let mut map = BTreeMap::new();
    map.insert("a", "not a number");
    let pinned = LuaRef::new(&l, &map).unwrap();
    assert!(!pinned.weak_type_test::<BTreeMap<String, i32>>());
    assert!(pinned.get::<BTreeMap<String, i32>>().unwrap_err().is_type_mismatch());
    assert!(pinned.type_test::<BTreeMap<String, String>>());
    assert_eq!(l.get_top(), 0);
}
