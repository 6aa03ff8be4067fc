//! CLI error handling and exit-code mapping.

use clearbundle::error::{ExitCode, UpdaterError};
use std::fmt;

/// CLI-level failures: everything the engine reports, plus front-end
/// problems of our own.
#[derive(Debug)]
pub enum CliError {
    /// Invalid command line or config file.
    Config(String),
    /// Failed to initialize logging.
    LoggingInit(String),
    /// Failed to create the HTTP transport.
    Transport(UpdaterError),
    /// The engine reported an error.
    Updater(UpdaterError),
}

impl CliError {
    /// Numeric process exit status for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Config(_) => ExitCode::InvalidOption.as_i32(),
            CliError::LoggingInit(_) => ExitCode::Unexpected.as_i32(),
            CliError::Transport(e) | CliError::Updater(e) => e.exit_code().as_i32(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Config(msg) => write!(f, "Configuration error: {msg}"),
            CliError::LoggingInit(msg) => write!(f, "Failed to initialize logging: {msg}"),
            CliError::Transport(e) => write!(f, "Failed to create transport: {e}"),
            CliError::Updater(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Transport(e) | CliError::Updater(e) => Some(e),
            _ => None,
        }
    }
}

impl From<UpdaterError> for CliError {
    fn from(e: UpdaterError) -> Self {
        CliError::Updater(e)
    }
}
