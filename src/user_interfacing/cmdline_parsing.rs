//! This module parses the command line arguments. This module
//! does nothing else besides that. Parsing command line arguments
//! is the sole responsibility of this module.

use std::ffi::OsString;
use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[clap(
    name = "kexec",
    about = "load a new kernel for later execution",
    override_usage = "kexec [OPTIONS]...",
)]
pub struct Cli {
    /// Execute the loaded kernel now.
    #[clap(short = 'e', action)]
    pub execute: bool,

    /// Execute the loaded kernel now, without preparing the system first.
    #[clap(short = 'f', action)]
    pub force: bool,

    /// Kernel command line. A leading "+" appends to the current one.
    #[clap(short = 'c', value_parser, value_name = "CMDLINE", allow_hyphen_values = true)]
    pub cmdline: Option<String>,

    // Paths are taken as plain OsStrings, the PathBuf parser refuses
    // empty values and those have to reach the dispatcher as "absent".

    /// Initramfs to load along with the kernel given by -k.
    #[clap(short = 'i', value_parser, value_name = "FILE")]
    pub initramfs: Option<OsString>,

    /// Kernel image to load.
    #[clap(short = 'k', value_parser, value_name = "FILE")]
    pub kernel: Option<OsString>,

    /// FIT image to load.
    #[clap(short = 'l', value_parser, value_name = "FILE")]
    pub fit_image: Option<OsString>,

    /// Configuration of the FIT image to load, instead of its default one.
    #[clap(short = 'x', value_parser, value_name = "NAME")]
    pub fit_config: Option<String>,

    #[clap(long, value_parser, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[clap(short, long, action)]
    pub verbose: bool,

    // Positional words are not accepted, but they are collected
    // here so they can be reported all at once.
    #[clap(value_parser, hide = true)]
    pub unexpected: Vec<String>,
}
