use std::io;
use std::path::PathBuf;

/// The broad category an error belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad or unexpected arguments.
    Validation,
    /// A file could not be opened or read.
    Io,
    /// A FIT parser or kernel loader failed.
    Delegate,
    /// The reboot request could not be issued.
    Os,
}

/// Every way loading or executing a kernel can fail.
/// The first one of these aborts the whole invocation.
#[derive(thiserror::Error, Debug)]
pub enum KexecError {
    #[error("[{}]: unexpected", .0.join(" "))]
    UnexpectedArguments(Vec<String>),

    #[error("initramfs (-i) must be specified")]
    MissingInitramfs,

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The requested configuration is not part of the FIT image.
    #[error("configuration \"{0}\" not found in FIT image")]
    ConfigNotFound(String),

    #[error(transparent)]
    Delegate(#[from] anyhow::Error),

    #[error("failed to reboot into the loaded kernel: {0}")]
    Reboot(#[source] nix::errno::Errno),
}

impl KexecError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> KexecError {
        KexecError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn class(&self) -> ErrorClass {
        use KexecError::*;
        match self {
            UnexpectedArguments(_) | MissingInitramfs => ErrorClass::Validation,
            Io { .. } => ErrorClass::Io,
            ConfigNotFound(_) | Delegate(_) => ErrorClass::Delegate,
            Reboot(_) => ErrorClass::Os,
        }
    }
}
