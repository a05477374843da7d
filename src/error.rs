use std::fmt;

use thiserror::Error;

use crate::OperationStatus;

/// Boxed error produced by a [`crate::Transport`] implementation.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors returned by pipeline, poller and pager operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Base URL is not a valid absolute URL.
    #[error("invalid base URL '{0}'")]
    InvalidBaseUrl(String),

    /// Endpoint path could not be joined to the base URL.
    #[error("invalid endpoint path '{0}'")]
    InvalidPath(String),

    /// HTTP transport-layer request failure.
    #[error("request failed: {0}")]
    Transport(#[source] BoxError),

    /// Response body could not be parsed as JSON.
    #[error("failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Non-success HTTP status with response payload.
    #[error("server returned status {status}: {body}")]
    HttpStatus {
        status: reqwest::StatusCode,
        /// Service error code, from `x-ms-error-code` or the body.
        code: Option<String>,
        body: String,
    },

    /// A response could not be interpreted as part of a long-running operation.
    #[error("invalid long-running operation response: {0}")]
    InvalidResponse(String),

    /// A resume token could not be turned back into a poller.
    #[error("malformed resume token: {0}")]
    MalformedToken(String),

    /// The long-running operation finished in a failed or canceled state.
    #[error("{0}")]
    OperationFailed(OperationError),

    /// The result of a poller was requested before it reached a terminal state.
    #[error("long-running operation has not reached a terminal state")]
    NotDone,

    /// `next_page` was called on a pager with no further pages.
    #[error("no more pages")]
    NoMorePages,

    /// The caller's context was canceled.
    #[error("context canceled")]
    Canceled,

    /// The caller's context deadline elapsed.
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

impl ClientError {
    /// Wraps any transport failure.
    pub fn transport(error: impl Into<BoxError>) -> Self {
        Self::Transport(error.into())
    }

    /// Returns `true` for [`ClientError::Canceled`] and [`ClientError::DeadlineExceeded`].
    pub fn is_context_error(&self) -> bool {
        matches!(self, Self::Canceled | Self::DeadlineExceeded)
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(error: reqwest::Error) -> Self {
        Self::Transport(Box::new(error))
    }
}

/// Server-reported failure of a long-running operation.
///
/// Distinct from transport failures: the service accepted the operation and
/// later reported that it failed or was canceled.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperationError {
    pub status: OperationStatus,
    pub code: Option<String>,
    pub message: Option<String>,
}

impl fmt::Display for OperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "long-running operation {}", self.status)?;
        if let Some(code) = &self.code {
            write!(f, " ({code})")?;
        }
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        Ok(())
    }
}

impl std::error::Error for OperationError {}
