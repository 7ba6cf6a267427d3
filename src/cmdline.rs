//! Builds the command line handed to the new kernel.

use std::fs;
use std::io;
use std::path::PathBuf;

use log::warn;

/// Default location of the running kernel's boot parameters.
pub const PROC_CMDLINE: &str = "/proc/cmdline";

/// An override starting with this character is appended to the
/// current command line instead of replacing it.
const APPEND_MARKER: char = '+';

/// Somewhere the currently active kernel boot parameters can be read from.
pub trait BootParamSource {
    fn read(&self) -> io::Result<String>;
}

/// Reads the boot parameters from a file, normally `/proc/cmdline`.
#[derive(Debug)]
pub struct ProcCmdline {
    path: PathBuf,
}

impl ProcCmdline {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        ProcCmdline { path: path.into() }
    }
}

impl Default for ProcCmdline {
    fn default() -> Self {
        ProcCmdline::new(PROC_CMDLINE)
    }
}

impl BootParamSource for ProcCmdline {
    fn read(&self) -> io::Result<String> {
        fs::read_to_string(&self.path)
    }
}

/// Returns the trimmed boot parameters of the running kernel.
/// A source that cannot be read is not fatal: a warning is logged
/// and the empty string is returned.
pub fn current_cmdline(source: &dyn BootParamSource) -> String {
    match source.read() {
        Ok(contents) => contents.trim().to_string(),
        Err(err) => {
            warn!("Warning: unable to read kernel command line: {}", err);
            String::new()
        },
    }
}

/// Merges the running kernel's command line with the user's override.
///
/// Empty override -> `current` unchanged.
/// Override starting with `+` -> `current`, a space, then the rest of the override.
/// Anything else -> the override replaces `current` entirely.
///
/// The result is not checked for validity in any way.
pub fn compose(current: &str, override_cmdline: &str) -> String {
    if override_cmdline.is_empty() {
        return current.to_string();
    }
    match override_cmdline.strip_prefix(APPEND_MARKER) {
        Some(fragment) => format!("{} {}", current, fragment),
        None => override_cmdline.to_string(),
    }
}
