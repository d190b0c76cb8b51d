//! Configuration files applied to a runtime

use ferrous_luabind::config::{parse_config_str, LogLevel};
use ferrous_luabind::{BindConfig, LuaError, LuaRef, LuaState, LuaTable};
use std::io::Write;
use tempfile::NamedTempFile;

#[test]
fn test_limits_from_file() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "# tight runtime").unwrap();
    writeln!(file, "stack-limit 4").unwrap();
    writeln!(file, "registry-limit 2").unwrap();
    writeln!(file, "loglevel warning").unwrap();
    file.flush().unwrap();

    let config = BindConfig::from_file(file.path()).unwrap();
    assert_eq!(config.log_level, LogLevel::Warning);
    assert_eq!(config.get("stack-limit").as_deref(), Some("4"));

    let l = LuaState::with_config(config);
    for i in 0..4 {
        l.push_number(i as f64).unwrap();
    }
    assert_eq!(l.push_nil(), Err(LuaError::StackOverflow(4)));
    l.set_top(0).unwrap();

    let first = LuaTable::new(&l).unwrap();
    let _second = LuaRef::new(&l, "b").unwrap();
    assert!(matches!(LuaRef::new(&l, "c"), Err(LuaError::ResourceLimit(_))));
    assert_eq!(l.get_top(), 0);

    drop(first);
    assert!(LuaRef::new(&l, "c").is_ok());
}

#[test]
fn test_bad_values_are_rejected() {
    assert!(parse_config_str("loglevel loud").is_err());
    assert!(parse_config_str("report-type-mismatch maybe").is_err());
    assert!(parse_config_str("stack-limit").is_err());
    assert!(BindConfig::from_file("/nonexistent/ferrous-luabind.conf").is_err());
}

#[test]
fn test_unknown_parameters_are_skipped() {
    let config = parse_config_str("some-future-option 1\ntable-limit 10\n").unwrap();
    assert_eq!(config.limits.table_limit, 10);
}
