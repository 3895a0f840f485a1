//! Error types for the image describer.
//!
//! Each stage has its own error so callers can tell a bad upload apart from a
//! failed service call:
//!
//! * [`ConfigError`] — **Fatal**: the process cannot start the request flow.
//! * [`DecodeError`] — the upload is not a decodable image. The user can
//!   re-upload.
//! * [`DescriptionError`] — the description service did not yield usable
//!   text. The user can retry the whole flow.
//!
//! None of these carry the API key in their messages.

use thiserror::Error;

/// Startup configuration failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No credential was supplied.
    #[error("GEMINI_API_KEY is not set.\nAdd it to the environment or to a .env file.")]
    MissingApiKey,

    /// A variable was present but could not be used.
    #[error("Invalid value {value:?} for {var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// The uploaded bytes could not be decoded as an image.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("The uploaded file is empty")]
    Empty,

    #[error("The uploaded file is not a readable image: {detail}")]
    Unreadable { detail: String },
}

/// The description service call failed or returned nothing usable.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DescriptionError {
    /// HTTP 401/403. Retrying with the same key will not help.
    #[error("Authentication with the description service failed ({status}): {detail}")]
    Authentication { status: u16, detail: String },

    /// HTTP 429.
    #[error("The description service is rate limiting requests")]
    RateLimited { retry_after_secs: Option<u64> },

    /// Any other non-success status.
    #[error("Description service error {status}: {detail}")]
    Api { status: u16, detail: String },

    /// The service refused to answer the prompt.
    #[error("The description service blocked the request: {reason}")]
    Blocked { reason: String },

    #[error("Could not reach the description service: {detail}")]
    Transport { detail: String },

    #[error("Unexpected response from the description service: {detail}")]
    MalformedResponse { detail: String },

    #[error("The description service returned no text")]
    EmptyResponse,
}

impl DescriptionError {
    /// Short machine-readable tag, used in JSON error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Authentication { .. } => "authentication",
            Self::RateLimited { .. } => "rate_limited",
            Self::Api { .. } => "api",
            Self::Blocked { .. } => "blocked",
            Self::Transport { .. } => "transport",
            Self::MalformedResponse { .. } => "malformed_response",
            Self::EmptyResponse => "empty_response",
        }
    }
}

/// Failure of one normalize → describe run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Description(#[from] DescriptionError),

    /// The blocking normalize task did not complete.
    #[error("Image processing task failed: {0}")]
    Worker(String),
}
