//! Errors returned by the Buildkite client

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request to Buildkite failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Buildkite answered {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected Buildkite response: {0}")]
    Decode(String),
}

impl ClientError {
    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Self::Status {
            status,
            body: body.into(),
        }
    }

    /// The organization, pipeline or build is unknown or hidden from the token
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Status { status: 404, .. })
    }

    /// Transport failures, rate limiting and server errors go away on their own
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Decode(_) => false,
        }
    }
}
