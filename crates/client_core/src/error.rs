use shared::error::{ApiException, ErrorCode};
use thiserror::Error;

/// Failure of a single request against the host API.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("host answered {status} for {url}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },
    #[error("unexpected response body from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid api url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("{0}")]
    Unavailable(String),
}

impl RequestError {
    pub fn status(&self) -> Option<u16> {
        match self {
            RequestError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Error code and message for notifications: the host's JSON `error`
    /// field when present, otherwise the raw body.
    pub fn to_api_exception(&self) -> ApiException {
        match self {
            RequestError::Status { status, body, .. } => ApiException::from_response(*status, body),
            other => ApiException::new(ErrorCode::Unknown, other.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum PresenterError {
    #[error("missing permission {0:?}")]
    PermissionDenied(shared::domain::Permission),
    #[error(transparent)]
    Request(#[from] RequestError),
}

impl PresenterError {
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, PresenterError::PermissionDenied(_))
    }
}

/// Terminal failure of a system command. Cancellation and ignored failures
/// are outcomes, not errors.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("missing permission {0:?}")]
    PermissionDenied(shared::domain::Permission),
    #[error("command {action} could not be executed: {source}")]
    Failed {
        action: String,
        #[source]
        source: RequestError,
    },
}
