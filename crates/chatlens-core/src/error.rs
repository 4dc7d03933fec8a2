use thiserror::Error;

/// Failure modes of command interpretation and execution.
#[derive(Debug, Error)]
pub enum CommandError {
    /// Caller passed text with the wrong prefix to the codec. Always a
    /// programming error, never shown to users.
    #[error("wrong command prefix or empty command: {0:?}")]
    Format(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("no permission")]
    NoPermission,

    #[error("no such command: {0}")]
    UnknownCommand(String),

    /// A collaborator (option store, NLP service, renderer) failed. Logged
    /// with full detail; users see a generic localized notice.
    #[error("upstream failure: {0}")]
    Upstream(#[from] anyhow::Error),
}
