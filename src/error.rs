use thiserror::Error;

#[derive(Error, Debug)]
pub enum PagetweakError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Snippet not found: {0}")]
    SnippetNotFound(String),

    #[error("Invalid snippet: {0}")]
    InvalidSnippet(String),

    #[error("HTML parse error: {0}")]
    HtmlParse(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, PagetweakError>;

/// Failure of one execution attempt.
///
/// Only `HostCommunication` is terminal on its own; every other fault is
/// absorbed by the coordinator and escalated to the next executor.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionFault {
    #[error("Code pattern not supported by CSP-safe parser")]
    PatternNotRecognized,

    #[error("{0}")]
    RestrictedExecution(String),

    #[error("Script injection failed: {0}")]
    Injection(String),

    #[error("Dynamic evaluation failed: {0}")]
    Evaluation(String),

    #[error("Target context unavailable: {0}")]
    HostCommunication(String),
}

impl ExecutionFault {
    /// The target context is gone, so no other mechanism can reach it either.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionFault::HostCommunication(_))
    }
}
