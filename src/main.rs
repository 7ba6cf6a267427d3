use std::io::{self, Write};
use std::process::{ExitCode, Termination};

use kexec::logger::Logger;
use log::error;

struct MainReturn(Result<(), anyhow::Error>);
impl Termination for MainReturn {
    fn report(self) -> ExitCode {
        match self.0 {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                // Delegate errors are shown exactly as they were reported.
                if Logger::is_inited() {
                    error!("Error: {}", err);
                } else {
                    let _ = writeln!(io::stderr(), "Error: {err}");
                }
                ExitCode::FAILURE
            },
        }
    }
}
impl From<Result<(), anyhow::Error>> for MainReturn {
    fn from(result: Result<(), anyhow::Error>) -> Self {
        MainReturn(result)
    }
}

fn main() -> MainReturn {
    MainReturn::from(kexec::run())
}
