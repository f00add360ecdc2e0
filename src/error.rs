//! Error types for the adaptive layout engine
//!
//! Remote sync failures are typed so the sync service can tell a timeout
//! from a rejected request; everything else propagates as `anyhow`.

use thiserror::Error;

/// Failure talking to the remote store
#[derive(Error, Debug)]
pub enum SyncError {
    /// No remote base URL configured
    #[error("remote store not configured")]
    NotConfigured,

    /// Device is offline
    #[error("device offline")]
    Offline,

    /// Request did not complete within the client-side timeout
    #[error("request timed out after {0}ms")]
    Timeout(u64),

    /// Connection or transport failure
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Non-success HTTP status
    #[error("sync failed: {0}")]
    Status(u16),

    /// Remote answered but reported failure in the body
    #[error("remote rejected request: {0}")]
    Rejected(String),

    /// Response body could not be parsed
    #[error("malformed response: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Misuse of the public engine API
#[derive(Error, Debug, PartialEq, Eq)]
pub enum AdaptiveError {
    /// Unknown layout preference key
    #[error("unknown layout preference: {0}")]
    UnknownPreference(String),

    /// Value not valid for the given key
    #[error("invalid value '{value}' for layout preference '{key}'")]
    InvalidValue { key: String, value: String },
}
