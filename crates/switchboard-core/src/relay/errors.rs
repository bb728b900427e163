use super::{auth::AuthError, payload::PayloadError};

/// Terminal outcome of a relay. Non-terminal failures (transport errors,
/// enforcement failures) are retried and never surface here.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    #[error("unknown blockchain: {0}")]
    UnknownBlockchain(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(#[from] PayloadError),

    #[error("forbidden: {0}")]
    Forbidden(#[from] AuthError),

    #[error("relay timed out")]
    OverallTimeout,

    #[error("relay attempts exhausted")]
    AttemptsExhausted,
}

impl RelayError {
    /// HTTP status surfaced to the caller.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::UnknownBlockchain(_) | Self::InvalidPayload(_) => 400,
            Self::Forbidden(_) => 403,
            Self::OverallTimeout | Self::AttemptsExhausted => 504,
        }
    }
}
