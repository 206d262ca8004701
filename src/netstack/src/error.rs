//! Error types for provisioning operations.
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProvisionError>;

#[derive(Debug, Error)]
pub enum ProvisionError {
    /// Authentication failure, unreachable endpoint, rejected host key or timeout.
    #[error("Connect error: {0}")]
    Connect(String),

    /// Remote command exited non-zero.
    #[error("Execution error: '{command}' exited with status {status}: {stderr}")]
    Execution {
        command: String,
        status: u32,
        stderr: String,
    },

    /// A rule's pattern matched but the captured text could not be converted.
    #[error("Malformed output for rule '{rule}': {detail}")]
    MalformedOutput { rule: String, detail: String },

    #[error("Timed out waiting for {what} after {attempts} attempts")]
    PollTimeout { what: String, attempts: u32 },

    #[error("Cancelled while waiting for {0}")]
    Cancelled(String),

    /// Local process exited non-zero.
    #[error("Process '{program}' failed with status {status}: {stderr}")]
    ProcessFailed {
        program: String,
        status: i32,
        stderr: String,
    },

    #[error("Transfer error: {0}")]
    Transfer(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProvisionError {
    /// Process exit code reported by the CLI when a run aborts with this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            ProvisionError::Config(_) => 2,
            ProvisionError::Connect(_) => 10,
            ProvisionError::Execution { .. } => 11,
            ProvisionError::MalformedOutput { .. } => 12,
            ProvisionError::PollTimeout { .. } => 13,
            ProvisionError::ProcessFailed { .. } => 14,
            ProvisionError::Transfer(_) => 15,
            ProvisionError::Session(_) => 16,
            ProvisionError::Io(_) => 17,
            ProvisionError::Cancelled(_) => 130,
        }
    }

    pub fn malformed(rule: &str, detail: impl Into<String>) -> Self {
        ProvisionError::MalformedOutput {
            rule: rule.to_string(),
            detail: detail.into(),
        }
    }

    /// Errors a stage may treat as "the probed object is absent".
    pub fn is_execution(&self) -> bool {
        matches!(self, ProvisionError::Execution { .. })
    }
}
