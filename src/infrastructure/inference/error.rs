use reqwest::StatusCode;
use thiserror::Error;

use crate::domain::errors::DomainError;

/// Errors talking to the inference service
#[derive(Error, Debug)]
pub enum InferenceError {
    /// Server unreachable
    #[error("Cannot connect to inference service at {0}")]
    Connect(String),

    #[error("Inference request timed out after {0}s")]
    Timeout(u64),

    /// Non-success HTTP status
    #[error("Inference service returned HTTP {status}: {body}")]
    Status { status: StatusCode, body: String },

    /// The service reported an error inside a response body
    #[error("Inference service error: {0}")]
    Service(String),

    #[error("Malformed inference response: {0}")]
    Malformed(String),

    #[error("Network error: {0}")]
    Network(reqwest::Error),
}

impl InferenceError {
    pub(crate) fn from_reqwest(err: reqwest::Error, base_url: &str, timeout_secs: u64) -> Self {
        if err.is_timeout() {
            Self::Timeout(timeout_secs)
        } else if err.is_connect() {
            Self::Connect(base_url.to_string())
        } else {
            Self::Network(err)
        }
    }

    /// Returns true if the request is worth retrying
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Connect(_) | Self::Timeout(_) | Self::Network(_) => true,
            Self::Status { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            Self::Service(_) | Self::Malformed(_) => false,
        }
    }
}

impl From<InferenceError> for DomainError {
    fn from(err: InferenceError) -> Self {
        DomainError::Inference(err.to_string())
    }
}
