use std::process::ExitCode;

/// Errors that cause botkit to exit with a specific code.
#[derive(Debug, thiserror::Error)]
pub enum ExitError {
    #[error("{tool} is not installed. Install {tool} to continue.")]
    ToolNotFound { tool: String },

    #[error("{tool} failed (exit {code}): {message}")]
    ToolFailed {
        tool: String,
        code: i32,
        message: String,
    },

    #[error("{tool} timed out after {timeout_secs}s")]
    Timeout { tool: String, timeout_secs: u64 },

    #[error("aborting in strict mode: {0}")]
    Degraded(String),
}

impl ExitError {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::ToolFailed { .. } => ExitCode::from(3),
            Self::Degraded(_) => ExitCode::from(4),
            Self::Timeout { .. } => ExitCode::from(5),
            Self::ToolNotFound { .. } => ExitCode::from(1),
        }
    }
}
