use thiserror::Error;

/// Error taxonomy for every chat operation. Request/response endpoints map
/// these onto HTTP status codes; event-driven handlers log and drop them
/// since the socket has no reply channel.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("{0}")]
    NotFound(&'static str),

    #[error("{0}")]
    Forbidden(&'static str),

    #[error("{0}")]
    InvalidInput(&'static str),

    #[error("{0}")]
    Conflict(&'static str),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}
