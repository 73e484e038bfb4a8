//! Error types for claudeline core

use thiserror::Error;

/// Result type alias using claudeline Error
pub type Result<T> = std::result::Result<T, Error>;

/// claudeline error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("A command is already running. Wait for it to finish or cancel it.")]
    AlreadyRunning,

    /// Operator-initiated abort. The display text is what operators see.
    #[error("Cancelled")]
    Cancelled,

    #[error("{0}")]
    Agent(String),

    #[error("Claude Code not found at '{0}'. Make sure it's installed and in your PATH.")]
    AgentNotFound(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether this error is the cancellation signal rather than a failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancelled_display_is_bare() {
        assert_eq!(Error::Cancelled.to_string(), "Cancelled");
        assert!(Error::Cancelled.is_cancelled());
        assert!(!Error::Agent("boom".into()).is_cancelled());
    }

    #[test]
    fn test_already_running_message() {
        assert!(Error::AlreadyRunning.to_string().contains("already running"));
    }
}
