//! CLI error types and exit codes

use thiserror::Error;

use hpcsync_connector::error::ConnectorError;
use hpcsync_provisioning::error::SyncError;

/// Exit codes for the CLI
/// - 0: Success
/// - 1: The run completed with per-entity errors
/// - 2: Critical, nothing ran or a batch was aborted (alert on-call)
/// - 3: Configuration or usage error
pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid usage: {0}")]
    Usage(String),

    #[error("{0}")]
    Sync(#[from] SyncError),

    #[error("Connector error: {0}")]
    Connector(#[from] ConnectorError),

    #[error("{target} sync finished with {errors} error(s)")]
    PartialFailure { target: String, errors: usize },

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Output error: {0}")]
    Output(String),
}

impl CliError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::PartialFailure { .. } => 1,
            CliError::Sync(e) => {
                if e.is_fatal() {
                    2
                } else {
                    3
                }
            }
            CliError::Connector(ConnectorError::InvalidConfiguration { .. }) => 3,
            CliError::Connector(_) => 2,
            CliError::Io(_) | CliError::Output(_) => 2,
            CliError::Config(_) | CliError::Usage(_) => 3,
        }
    }

    /// Whether on-call should be alerted.
    pub fn is_critical(&self) -> bool {
        self.exit_code() == 2
    }

    /// Print the error to stderr with optional color
    pub fn print(&self) {
        let use_color = std::env::var("NO_COLOR").is_err();

        if use_color {
            eprintln!("\x1b[31mError:\x1b[0m {}", self);
        } else {
            eprintln!("Error: {}", self);
        }

        if let Some(suggestion) = self.suggestion() {
            if use_color {
                eprintln!("\n\x1b[33mSuggestion:\x1b[0m {}", suggestion);
            } else {
                eprintln!("\nSuggestion: {}", suggestion);
            }
        }
    }

    /// Get a suggested action for this error
    fn suggestion(&self) -> Option<&'static str> {
        match self {
            CliError::Config(_) => {
                Some("Check the file given by --config or HPCSYNC_CONFIG.")
            }
            CliError::Sync(SyncError::Locked { .. }) => Some(
                "Another run for this target is in progress. Wait for it to finish.",
            ),
            CliError::Sync(SyncError::CommandFailed { .. }) => Some(
                "The remaining accounting commands were not run. Fix the failing command and run again.",
            ),
            CliError::Sync(SyncError::Configuration { .. }) => {
                Some("Check the configuration file and the command-line flags.")
            }
            CliError::Connector(e) | CliError::Sync(SyncError::Connector(e)) if e.is_transient() => {
                Some("The remote system did not answer. The next scheduled run picks up the same window.")
            }
            CliError::Connector(ConnectorError::AuthenticationFailed) => {
                Some("Check HPCSYNC_SOURCE_TOKEN and HPCSYNC_LDAP_PASSWORD.")
            }
            CliError::PartialFailure { .. } => {
                Some("The checkpoint was not advanced; the next run retries the same window.")
            }
            _ => None,
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(e: std::io::Error) -> Self {
        CliError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        CliError::Output(format!("JSON error: {}", e))
    }
}

impl From<serde_yaml::Error> for CliError {
    fn from(e: serde_yaml::Error) -> Self {
        CliError::Config(format!("YAML error: {}", e))
    }
}
