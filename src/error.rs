use thiserror::Error;

/// failure reported by a cloud sdk call
///
/// `reason` is whatever the backend said went wrong (http status, server message).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct SdkError {
    pub reason: String,
}

impl SdkError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    /// sd fallback active, network down, or sdk not ready
    #[error("cloud unavailable")]
    GateClosed,
    #[error("cloud sdk error: {0}")]
    Sdk(#[from] SdkError),
    #[error("malformed payload: {0}")]
    Payload(#[from] serde_json::Error),
}
