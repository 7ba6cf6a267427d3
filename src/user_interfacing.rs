mod cmdline_parsing;
mod config_parsing;


use std::path::{Path, PathBuf};
use std::{io, ffi::OsString, env};

use clap::{Parser, ErrorKind};
use cmdline_parsing::Cli;
use config_parsing::ConfigContents;
use log::LevelFilter;

/// What the user asked the kexec command to do.
/// Paths and names that were given as empty strings are `None`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct KexecRequest {
    /// Execute the staged kernel once loading is done.
    pub execute: bool,
    /// Execute without the prepare step. Implies `execute`.
    pub force: bool,
    /// Command line override, or a fragment to append when it starts with "+".
    pub cmdline: String,
    pub initramfs: Option<PathBuf>,
    pub kernel: Option<PathBuf>,
    pub fit_image: Option<PathBuf>,
    pub fit_config: Option<String>,
    /// Positional arguments, none of which are accepted.
    pub unexpected: Vec<String>,
}

/// The user's request together with the settings to carry it out with.
#[derive(Debug)]
pub struct OperationRequest {
    pub kexec: KexecRequest,
    pub cmdline_source: PathBuf,
    pub log_level: LevelFilter,
    pub sync_before_exec: bool,
}

/// A type representing an error that occurred while trying to
/// interact with the user.
#[derive(Debug, thiserror::Error)]
pub enum UserInteractError {
    #[error("invalid command line arguments")]
    InvalidCommandLineArguments {
        #[source]
        details: clap::error::Error,
    },
    #[error("io error while handling command line arguments")]
    CliIOError {
        #[source]
        source: clap::error::Error,
    },
    #[error("there is a syntax error in the config file: {source}")]
    ConfigParseError {
        #[source]
        source: toml::de::Error,
    },
    /// Failed to access config file due to it not existing,
    /// permission errors, etc.
    #[error("failed to access config file: {source}")]
    ConfigAccessFailed {
        #[source]
        source: io::Error,
    },
}

fn non_empty_path(path: Option<OsString>) -> Option<PathBuf> {
    path.filter(|x| !x.is_empty()).map(PathBuf::from)
}

impl From<Cli> for KexecRequest {
    fn from(cli: Cli) -> Self {
        KexecRequest {
            execute: cli.execute,
            force: cli.force,
            cmdline: cli.cmdline.unwrap_or_default(),
            initramfs: non_empty_path(cli.initramfs),
            kernel: non_empty_path(cli.kernel),
            fit_image: non_empty_path(cli.fit_image),
            fit_config: cli.fit_config.filter(|x| !x.is_empty()),
            unexpected: cli.unexpected,
        }
    }
}

/// This function determines what the user wants the program to do,
/// based on command line arguments and a config file.
///
/// Nothing gets loaded or executed here, and no file besides the
/// config file is read. The returned request is not validated
/// either, e.g. unexpected positional arguments are handed back
/// to the caller to reject.
pub fn interact_with_user(default_config_file: &str)
    -> Result<OperationRequest, UserInteractError>
{
    interact_with_user_provided_cmdline(
        default_config_file, env::args_os(),
    )
}
pub(crate) fn interact_with_user_provided_cmdline<C, T>(default_config_file: &str, cmdline: C)
    -> Result<OperationRequest, UserInteractError> where
    C: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli_args = Cli::try_parse_from(cmdline).map_err(|err| {
        match err.kind() {
            ErrorKind::Io | ErrorKind::Format =>
                UserInteractError::CliIOError {
                    source: err,
                },
            _ => UserInteractError::InvalidCommandLineArguments {
                details: err,
            },
        }
    })?;

    // Positional words get rejected before any file is read, the config
    // file included. Only a config file that was asked for explicitly
    // has to exist.
    let config_contents = if !cli_args.unexpected.is_empty() {
        ConfigContents::default()
    } else {
        match cli_args.config {
            Some(ref x) => config_parsing::parse_config(x, true)?,
            None => config_parsing::parse_config(Path::new(default_config_file), false)?,
        }
    };

    let log_level = match cli_args.verbose {
        true => LevelFilter::Debug,
        false => config_contents.log_level.into(),
    };

    Ok(OperationRequest {
        kexec: cli_args.into(),
        cmdline_source: config_contents.cmdline_source,
        log_level,
        sync_before_exec: config_contents.sync_before_exec,
    })
}
