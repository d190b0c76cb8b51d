//! Configuration file parser
//!
//! Parses Redis-style `name value` configuration files for the binding runtime.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::str::FromStr;

use super::{BindConfig, LogLevel};

/// Error type for configuration parsing
#[derive(Debug, thiserror::Error)]
pub enum ConfigParseError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Invalid line format
    #[error("Invalid line format at line {0}: {1}")]
    Format(usize, String),

    /// Invalid parameter value
    #[error("Invalid value for parameter '{0}' at line {1}: {2}")]
    Value(String, usize, String),
}

/// Parse a configuration file
pub fn parse_config_file(path: &Path) -> Result<BindConfig, ConfigParseError> {
    let file = File::open(path).map_err(ConfigParseError::Io)?;
    parse_config_lines(BufReader::new(file))
}

/// Parse configuration text held in memory
pub fn parse_config_str(text: &str) -> Result<BindConfig, ConfigParseError> {
    parse_config_lines(text.as_bytes())
}

fn parse_config_lines<R: BufRead>(reader: R) -> Result<BindConfig, ConfigParseError> {
    let mut config = BindConfig::default();

    for (line_num, line_result) in reader.lines().enumerate() {
        let line = line_result?;
        let line = line.trim();

        // Skip empty lines and comments
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let parts: Vec<&str> = line.splitn(2, ' ').collect();
        if parts.len() != 2 {
            return Err(ConfigParseError::Format(line_num + 1, line.to_string()));
        }

        let param = parts[0].trim().to_lowercase();
        let value = parts[1].trim();

        apply_config_param(&mut config, &param, value, line_num + 1)?;
    }

    Ok(config)
}

/// Apply a configuration parameter to the config
fn apply_config_param(config: &mut BindConfig, param: &str, value: &str, line_num: usize) -> Result<(), ConfigParseError> {
    match param {
        "stack-limit" => {
            config.limits.stack_limit = parse_value(param, value, line_num)?;
        }
        "registry-limit" => {
            config.limits.registry_limit = parse_value(param, value, line_num)?;
        }
        "table-limit" => {
            config.limits.table_limit = parse_value(param, value, line_num)?;
        }
        "loglevel" => {
            config.log_level = match value.to_lowercase().as_str() {
                "debug" => LogLevel::Debug,
                "verbose" => LogLevel::Verbose,
                "notice" => LogLevel::Notice,
                "warning" => LogLevel::Warning,
                _ => return Err(ConfigParseError::Value(param.to_string(), line_num, value.to_string())),
            };
        }
        "report-type-mismatch" => {
            config.report_type_mismatch = parse_yes_no(param, value, line_num)?;
        }
        _ => {
            println!("[LUA_CONFIG] Unknown configuration parameter '{}' at line {} - skipping", param, line_num);
        }
    }

    Ok(())
}

/// Parse a value that implements FromStr
fn parse_value<T: FromStr>(param: &str, value: &str, line_num: usize) -> Result<T, ConfigParseError> {
    value.parse::<T>()
        .map_err(|_| ConfigParseError::Value(param.to_string(), line_num, value.to_string()))
}

/// Parse a yes/no value
fn parse_yes_no(param: &str, value: &str, line_num: usize) -> Result<bool, ConfigParseError> {
    match value.to_lowercase().as_str() {
        "yes" | "1" => Ok(true),
        "no" | "0" => Ok(false),
        _ => Err(ConfigParseError::Value(param.to_string(), line_num, value.to_string())),
    }
}
