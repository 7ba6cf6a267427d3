//! Carries out a [`KexecRequest`].
//!
//! The steps always run in the same order, each one only when it
//! was asked for:
//!     1. Reject positional arguments.
//!     2. Work out the new kernel's command line.
//!     3. Load a FIT configuration.
//!     4. Load a kernel and initramfs.
//!     5. Prepare the system, unless forced.
//!     6. Reboot into the loaded kernel.
//! The first error stops everything after it. Nothing is undone or retried.


use std::path::Path;

use log::{debug, info};

use crate::cmdline::{self, BootParamSource};
use crate::error::KexecError;
use crate::fit::FitParser;
use crate::host::{ExecControl, FileAccess, FitLoader, FlatLoader};
use crate::user_interfacing::KexecRequest;

/// Where staged images are placed. The loaders always get zero.
pub const RESERVED_BASE: u64 = 0;

/// Everything the kexec command needs from the outside world.
pub struct Kexec {
    pub files: Box<dyn FileAccess>,
    pub cmdline_source: Box<dyn BootParamSource>,
    pub fit_parser: Box<dyn FitParser>,
    pub fit_loader: Box<dyn FitLoader>,
    pub flat_loader: Box<dyn FlatLoader>,
    pub control: Box<dyn ExecControl>,
}

impl Kexec {
    /// Loads a configuration out of the FIT image at `path`.
    /// With no `config_name` the image's default configuration is used.
    pub fn stage_fit(&self, path: &Path, config_name: Option<&str>) -> Result<(), KexecError> {
        let bytes = self.files.read(path)
            .map_err(|err| KexecError::io(path, err))?;
        let image = self.fit_parser.parse(&bytes)?;

        let name = config_name.unwrap_or(image.default_config.as_str());
        let config = image.config(name)
            .ok_or_else(|| KexecError::ConfigNotFound(name.to_string()))?;

        info!("Loading FIT configuration \"{}\" from {}", config.name, path.display());
        if let Some(description) = &config.description {
            debug!("Configuration description: {}", description);
        }
        self.fit_loader.load_config(config, RESERVED_BASE)?;
        Ok(())
    }

    /// Loads the kernel at `kernel` along with the initramfs, which
    /// has to be given. Both files are closed again before returning.
    pub fn stage_flat(
        &self,
        kernel: &Path,
        initramfs: Option<&Path>,
        cmdline: &str,
    ) -> Result<(), KexecError> {
        let initramfs = match initramfs {
            Some(x) if !x.as_os_str().is_empty() => x,
            _ => return Err(KexecError::MissingInitramfs),
        };

        let kernel_file = self.files.open(kernel)
            .map_err(|err| KexecError::io(kernel, err))?;
        let initramfs_file = self.files.open(initramfs)
            .map_err(|err| KexecError::io(initramfs, err))?;

        info!("Loading kernel {}", kernel.display());
        debug!("Using initramfs: {}", initramfs.display());
        debug!("Using command line: {:?}", cmdline);
        self.flat_loader.file_load(&kernel_file, &initramfs_file, cmdline, RESERVED_BASE)?;
        Ok(())
    }

    /// Reboots into whatever was loaded. Preparing the system comes
    /// first unless `force` is set.
    pub fn trigger(&self, force: bool) -> Result<(), KexecError> {
        if !force {
            debug!("Preparing for reboot...");
            self.control.prepare()?;
        }
        info!("Rebooting into the loaded kernel...");
        match self.control.reboot()? {}
    }

    pub fn run(&self, request: &KexecRequest) -> Result<(), KexecError> {
        if !request.unexpected.is_empty() {
            return Err(KexecError::UnexpectedArguments(request.unexpected.clone()));
        }

        let current = cmdline::current_cmdline(&*self.cmdline_source);
        let cmdline = cmdline::compose(&current, &request.cmdline);

        if let Some(image) = &request.fit_image {
            self.stage_fit(image, request.fit_config.as_deref())?;
        }

        if let Some(kernel) = &request.kernel {
            self.stage_flat(kernel, request.initramfs.as_deref(), &cmdline)?;
        }

        if request.execute || request.force {
            self.trigger(request.force)?;
        }
        Ok(())
    }
}
