//! This module is responsible for parsing the config file
//! for this program. That is all this module does. Dealing
//! with the config file is the sole responsibility of this
//! module.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::UserInteractError;
use crate::cmdline::PROC_CMDLINE;

#[derive(Deserialize, Debug, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
#[serde(rename_all = "kebab-case")]
#[serde(default)]
pub struct ConfigContents {
    /// Where the running kernel's command line is read from.
    pub cmdline_source: PathBuf,
    pub log_level: LogLevel,
    /// Whether the prepare step flushes filesystem buffers.
    pub sync_before_exec: bool,
}
impl Default for ConfigContents {
    fn default() -> Self {
        ConfigContents {
            cmdline_source: PathBuf::from(PROC_CMDLINE),
            log_level: LogLevel::Info,
            sync_before_exec: true,
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}
impl From<LogLevel> for log::LevelFilter {
    fn from(level: LogLevel) -> Self {
        use log::LevelFilter;
        match level {
            LogLevel::Off => LevelFilter::Off,
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

/// This function parses the config file for this program,
/// and returns a struct representing its contents.
/// This function reads nothing but the config file.
///
/// If `required` is false, a config file that does not exist
/// is the same as an empty one.
pub fn parse_config(config_file: &Path, required: bool) ->
    Result<ConfigContents, UserInteractError>
{
    let config_file_string = match fs::read_to_string(config_file) {
        Ok(x) => x,
        Err(err) if !required && err.kind() == io::ErrorKind::NotFound => {
            return Ok(ConfigContents::default());
        },
        Err(err) => {
            return Err(UserInteractError::ConfigAccessFailed {
                source: err,
            });
        },
    };

    toml::from_str(&config_file_string).map_err(|err|
        UserInteractError::ConfigParseError {
            source: err,
        }
    )
}
