//! Loads a new kernel, either a plain kernel image with an initramfs
//! or a configuration out of a FIT image, and optionally reboots
//! straight into it without going through firmware.

pub mod cmdline;
pub mod dispatch;
pub mod error;
pub mod fit;
pub mod host;
pub mod logger;
mod user_interfacing;

use log::debug;

use dispatch::Kexec;
use logger::Logger;
use user_interfacing::{OperationRequest, UserInteractError};

pub use error::{ErrorClass, KexecError};
pub use user_interfacing::KexecRequest;

const DEFAULT_CONFIG_FILE: &str = "/etc/kexec/kexec.toml";

fn handle_user_interact_error(err: UserInteractError) -> Result<(), anyhow::Error> {
    use UserInteractError::*;
    match err {
        // clap prints help, version and usage errors on its own
        // and exits with the matching status.
        InvalidCommandLineArguments { details: source } |
        CliIOError { source } => {
            source.exit();
        },
        err@(ConfigParseError { .. } | ConfigAccessFailed { .. }) => {
            Err(err.into())
        },
    }
}

/// The collaborators used on a real system.
fn host_kexec(operation: &OperationRequest) -> Kexec {
    Kexec {
        files: Box::new(host::HostFiles),
        cmdline_source: Box::new(cmdline::ProcCmdline::new(&operation.cmdline_source)),
        fit_parser: Box::new(fit::FdtFitParser),
        fit_loader: Box::new(host::FitFileLoad::new(
            Box::new(cmdline::ProcCmdline::new(&operation.cmdline_source)),
        )),
        flat_loader: Box::new(host::KexecFileLoad),
        control: Box::new(host::HostControl::new(operation.sync_before_exec)),
    }
}

pub fn run() -> Result<(), anyhow::Error> {
    let operation = user_interfacing::interact_with_user(DEFAULT_CONFIG_FILE);
    let operation = match operation {
        Err(err) => {
            return handle_user_interact_error(err);
        },
        Ok(x) => x,
    };

    Logger::initialize(operation.log_level)?;
    debug!("Start with {:#?}", operation);

    host_kexec(&operation).run(&operation.kexec)?;
    debug!("Done");
    Ok(())
}
