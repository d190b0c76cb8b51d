//! Configuration module for the binding runtime
//!
//! Provides resource limits and logging settings for a [`crate::lua::LuaState`].
//! Settings can come from code, from a Redis-style configuration file, or
//! from the file named by the `FERROUS_LUABIND_CONFIG` environment variable.

mod parser;

pub use parser::{parse_config_file, parse_config_str, ConfigParseError};

use std::path::PathBuf;

/// Environment variable naming the process-wide configuration file
pub const CONFIG_ENV_VAR: &str = "FERROUS_LUABIND_CONFIG";

lazy_static::lazy_static! {
    static ref DEFAULT_CONFIG: BindConfig = BindConfig::from_env();
}

/// Configuration for one runtime instance and all threads created from it
#[derive(Debug, Clone, PartialEq)]
pub struct BindConfig {
    /// Resource limits
    pub limits: BindLimits,

    /// Minimum level of log lines to print
    pub log_level: LogLevel,

    /// Print a warning line whenever a type mismatch is reported
    pub report_type_mismatch: bool,
}

/// Resource limits (0 means unlimited)
#[derive(Debug, Clone, PartialEq)]
pub struct BindLimits {
    /// Maximum number of value slots on one thread's stack
    pub stack_limit: usize,

    /// Maximum number of live registry references
    pub registry_limit: usize,

    /// Maximum number of entries in a single table
    pub table_limit: usize,
}

/// Log level configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Debug level - most verbose
    Debug,

    /// Verbose level
    Verbose,

    /// Notice level - default
    Notice,

    /// Warning level
    Warning,
}

impl Default for BindConfig {
    fn default() -> Self {
        BindConfig {
            limits: BindLimits::default(),
            log_level: LogLevel::Notice,
            report_type_mismatch: true,
        }
    }
}

impl Default for BindLimits {
    fn default() -> Self {
        BindLimits {
            stack_limit: 100_000,   // 100K stack slots
            registry_limit: 0,      // Unlimited
            table_limit: 1_000_000, // 1M entries max
        }
    }
}

impl LogLevel {
    /// Name as written in configuration files
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Verbose => "verbose",
            LogLevel::Notice => "notice",
            LogLevel::Warning => "warning",
        }
    }
}

impl BindConfig {
    /// Load configuration from a file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self, ConfigParseError> {
        let path = path.into();
        parse_config_file(&path)
    }

    /// Load from the file named by [`CONFIG_ENV_VAR`], falling back to defaults
    pub fn from_env() -> Self {
        match std::env::var_os(CONFIG_ENV_VAR) {
            Some(path) => match Self::from_file(PathBuf::from(&path)) {
                Ok(config) => config,
                Err(e) => {
                    println!("[LUA_CONFIG] Ignoring {}: {}", PathBuf::from(path).display(), e);
                    BindConfig::default()
                }
            },
            None => BindConfig::default(),
        }
    }

    /// The process-wide default, loaded once
    pub fn global() -> &'static BindConfig {
        &DEFAULT_CONFIG
    }

    /// Whether a line at `level` should be printed
    pub fn logs(&self, level: LogLevel) -> bool {
        level >= self.log_level
    }

    /// Get a configuration parameter by name
    pub fn get(&self, param: &str) -> Option<String> {
        match param {
            "stack-limit" => Some(self.limits.stack_limit.to_string()),
            "registry-limit" => Some(self.limits.registry_limit.to_string()),
            "table-limit" => Some(self.limits.table_limit.to_string()),
            "loglevel" => Some(self.log_level.as_str().to_string()),
            "report-type-mismatch" => Some(yes_no(self.report_type_mismatch)),
            _ => None,
        }
    }

    /// Get all configuration parameters
    pub fn get_all(&self) -> Vec<(String, String)> {
        ["stack-limit", "registry-limit", "table-limit", "loglevel", "report-type-mismatch"]
            .iter()
            .filter_map(|name| self.get(name).map(|value| (name.to_string(), value)))
            .collect()
    }
}

fn yes_no(flag: bool) -> String {
    if flag { "yes" } else { "no" }.to_string()
}
