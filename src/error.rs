// Error taxonomy for the content access layer
// Every variant owns plain data so one failed computation can be handed to
// every caller that was waiting on it.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContentError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    #[error("Upstream error: {status} - {}", body.as_deref().unwrap_or("<no body>"))]
    Upstream { status: u16, body: Option<String> },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),
}

impl ContentError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ContentError::Upstream { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ContentError {
    fn from(err: serde_json::Error) -> Self {
        ContentError::Decode(err.to_string())
    }
}

pub type ContentResult<T> = Result<T, ContentError>;
