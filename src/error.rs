//! Error types for devfence.

use thiserror::Error;

/// Result alias used by the policy engine.
pub type Result<T> = std::result::Result<T, PolicyError>;

#[derive(Error, Debug)]
pub enum PolicyError {
    /// Malformed CIDR, port, protocol, policy or pattern. Raised before any mutation.
    #[error("Invalid rule: {0}")]
    Validation(String),

    #[error("Rule not found: {0}")]
    NotFound(String),

    #[error("Unknown device: {0}")]
    MissingDevice(String),

    #[error("Dispatch infrastructure not ready: {0}")]
    InfrastructureNotReady(String),

    #[error("Resolver failed to start: {0}")]
    ResolverStart(String),

    #[error("{0} is disabled in the configuration")]
    FeatureDisabled(&'static str),

    #[error("Command failed: {0}")]
    Command(String),

    #[error("File system error: {0}")]
    Io(#[from] std::io::Error),
}

impl PolicyError {
    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}
