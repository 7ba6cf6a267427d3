//! The operating system facilities a kernel gets loaded and executed with.
//!
//! Everything in here is reached through a trait so the dispatch logic
//! can be exercised without touching the running system.

use std::convert::Infallible;
use std::ffi::{CStr, CString};
use std::fs::{self, File};
use std::io::{self, Write};
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};
use std::path::Path;

use anyhow::{bail, Context};
use log::debug;
use nix::errno::Errno;
use nix::libc;
use nix::sys::memfd::{memfd_create, MemFdCreateFlag};
use nix::sys::reboot::{reboot, RebootMode};

use crate::cmdline::{self, BootParamSource};
use crate::error::KexecError;
use crate::fit::{FitBlob, FitConfig};

// From linux/kexec.h, not every libc release carries it.
const KEXEC_FILE_NO_INITRAMFS: libc::c_ulong = 0x0000_0004;

/// Access to the files named on the command line.
pub trait FileAccess {
    fn open(&self, path: &Path) -> io::Result<File>;
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;
}

/// Stages a kernel and initramfs given as open files.
pub trait FlatLoader {
    fn file_load(
        &self,
        kernel: &File,
        initramfs: &File,
        cmdline: &str,
        reserved_base: u64,
    ) -> anyhow::Result<()>;
}

/// Stages the images of a FIT configuration.
pub trait FitLoader {
    fn load_config(&self, config: &FitConfig, reserved_base: u64) -> anyhow::Result<()>;
}

/// Executes whatever kernel has been staged.
pub trait ExecControl {
    /// Gets the system ready for the reboot.
    fn prepare(&self) -> anyhow::Result<()>;

    /// Boots into the staged kernel. When this succeeds the calling
    /// process is gone, so only an error can ever come back.
    fn reboot(&self) -> Result<Infallible, KexecError>;
}

#[derive(Debug, Default)]
pub struct HostFiles;

impl FileAccess for HostFiles {
    fn open(&self, path: &Path) -> io::Result<File> {
        File::open(path)
    }
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }
}

/// Loads kernels through the `kexec_file_load` system call.
#[derive(Debug, Default)]
pub struct KexecFileLoad;

impl KexecFileLoad {
    fn syscall(kernel: RawFd, initramfs: Option<RawFd>, cmdline: &str) -> anyhow::Result<()> {
        let cmdline = CString::new(cmdline)
            .context("kernel command line contains a NUL byte")?;
        let (initramfs, flags) = match initramfs {
            Some(fd) => (fd, 0),
            None => (-1, KEXEC_FILE_NO_INITRAMFS),
        };
        let cmdline = cmdline.as_bytes_with_nul();

        // The length passed on includes the terminating NUL.
        let ret = unsafe {
            libc::syscall(
                libc::SYS_kexec_file_load,
                kernel,
                initramfs,
                cmdline.len(),
                cmdline.as_ptr(),
                flags,
            )
        };
        Errno::result(ret).context("kexec_file_load failed")?;
        Ok(())
    }

    fn check_reserved_base(reserved_base: u64) -> anyhow::Result<()> {
        if reserved_base != 0 {
            bail!(
                "reserved base {:#x} is not supported, the kernel picks load addresses itself",
                reserved_base,
            );
        }
        Ok(())
    }

    // kexec_file_load only takes file descriptors, so blobs taken out of
    // a FIT image get copied into anonymous memory backed files first.
    fn blob_file(blob: &FitBlob) -> anyhow::Result<File> {
        if !blob.is_uncompressed() {
            bail!(
                "image \"{}\" uses unsupported compression \"{}\"",
                blob.name, blob.compression.as_deref().unwrap_or_default(),
            );
        }
        let name = CStr::from_bytes_with_nul(b"kexec-fit-image\0")
            .context("invalid memfd name")?;
        let fd = memfd_create(name, MemFdCreateFlag::MFD_CLOEXEC)
            .with_context(|| format!("failed to create memory file for image \"{}\"", blob.name))?;
        let mut file = unsafe { File::from_raw_fd(fd) };
        file.write_all(&blob.data)
            .with_context(|| format!("failed to copy image \"{}\" into memory", blob.name))?;
        Ok(file)
    }
}

impl FlatLoader for KexecFileLoad {
    fn file_load(
        &self,
        kernel: &File,
        initramfs: &File,
        cmdline: &str,
        reserved_base: u64,
    ) -> anyhow::Result<()> {
        Self::check_reserved_base(reserved_base)?;
        Self::syscall(kernel.as_raw_fd(), Some(initramfs.as_raw_fd()), cmdline)
    }
}

/// Loads FIT configurations through the `kexec_file_load` system call.
///
/// The new kernel's command line is the `/chosen/bootargs` of the
/// configuration's device tree, or the running one when there is none.
pub struct FitFileLoad {
    cmdline_source: Box<dyn BootParamSource>,
}

impl FitFileLoad {
    pub fn new(cmdline_source: Box<dyn BootParamSource>) -> Self {
        FitFileLoad { cmdline_source }
    }
}

fn fit_cmdline(config: &FitConfig, fallback: &dyn BootParamSource) -> anyhow::Result<String> {
    let bootargs = match &config.fdt {
        Some(fdt) => fdt.bootargs()?,
        None => None,
    };
    Ok(match bootargs {
        Some(x) => x.trim().to_string(),
        None => cmdline::current_cmdline(fallback),
    })
}

impl FitLoader for FitFileLoad {
    fn load_config(&self, config: &FitConfig, reserved_base: u64) -> anyhow::Result<()> {
        KexecFileLoad::check_reserved_base(reserved_base)?;

        let kernel = match &config.kernel {
            Some(x) => x,
            None => bail!("configuration \"{}\" has no kernel image", config.name),
        };
        let cmdline = fit_cmdline(config, &*self.cmdline_source)?;
        debug!("Using command line: {:?}", cmdline);

        let kernel = KexecFileLoad::blob_file(kernel)?;
        let ramdisk = config.ramdisk.as_deref().map(KexecFileLoad::blob_file).transpose()?;

        KexecFileLoad::syscall(
            kernel.as_raw_fd(),
            ramdisk.as_ref().map(|file| file.as_raw_fd()),
            &cmdline,
        )
    }
}

/// Prepares and executes the staged kernel on the running system.
#[derive(Debug)]
pub struct HostControl {
    sync_before_exec: bool,
}

impl HostControl {
    pub fn new(sync_before_exec: bool) -> Self {
        HostControl { sync_before_exec }
    }
}

impl ExecControl for HostControl {
    fn prepare(&self) -> anyhow::Result<()> {
        if self.sync_before_exec {
            debug!("Syncing filesystems...");
            nix::unistd::sync();
        }
        Ok(())
    }

    fn reboot(&self) -> Result<Infallible, KexecError> {
        reboot(RebootMode::RB_KEXEC).map_err(KexecError::Reboot)
    }
}
