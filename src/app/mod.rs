//! The `devo` command line tool.

pub mod commands;
pub mod config;
pub mod logging_system;

pub use config::{Cli, Command};
pub use logging_system::{LoggingError, LoggingSystem, setup_logging};

use crate::domain::DevoError;
use clap::Parser;
use clap::error::ErrorKind;
use tracing::error;

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
/// Usage and configuration errors (`EX_USAGE`).
pub const EXIT_CONFIG: i32 = 64;

pub fn exit_code(err: &DevoError) -> i32 {
    if err.is_config() {
        EXIT_CONFIG
    } else {
        EXIT_FAILURE
    }
}

/// Parses `args`, runs the command and returns the process exit code.
pub async fn run<I, T>(args: I) -> i32
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(e) => {
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => EXIT_SUCCESS,
                _ => EXIT_CONFIG,
            };
            let _ = e.print();
            return code;
        }
    };

    setup_logging(cli.debug);

    match commands::execute(cli).await {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            if e.is_config() {
                error!("Configuration error: {}", e);
            } else {
                error!("Command failed: {}", e);
            }
            exit_code(&e)
        }
    }
}

pub async fn main() -> i32 {
    run(std::env::args_os()).await
}
