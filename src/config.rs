//! Runtime configuration read from the process environment.
//!
//! [`Config::from_env`] is called once at startup after `.env` has been
//! merged in by `dotenvy`. A missing credential fails here, before any socket
//! is bound or request attempted.

use crate::error::ConfigError;
use crate::normalize::MaxDimensions;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;

pub const DEFAULT_MODEL: &str = "gemini-1.5-pro";
pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
pub const DEFAULT_MAX_DIMENSION: u32 = 800;
pub const DEFAULT_JPEG_QUALITY: u8 = 75;
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;
pub const DEFAULT_STATIC_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/static");
pub const DEFAULT_INSTRUCTION: &str =
    "Describe the contents of this image in a detailed and engaging manner.";

/// The description service credential.
///
/// `Debug` never prints the value.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(<redacted>)")
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: ApiKey,
    pub model: String,
    pub api_base: String,
    pub bind_addr: SocketAddr,
    pub max_dimensions: MaxDimensions,
    /// Re-encode quality, 1..=100.
    pub jpeg_quality: u8,
    pub max_upload_bytes: usize,
    /// Used when a request does not supply its own instruction.
    pub instruction: String,
    /// Directory served under `/static`.
    pub static_dir: PathBuf,
}

impl Config {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through an arbitrary lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let api_key = get("GEMINI_API_KEY")
            .map(ApiKey::new)
            .ok_or(ConfigError::MissingApiKey)?;

        let model = get("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let api_base = get("GEMINI_API_BASE")
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string())
            .trim_end_matches('/')
            .to_string();

        let bind_raw = get("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = bind_raw
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::Invalid {
                var: "BIND_ADDR",
                value: bind_raw.clone(),
                reason: e.to_string(),
            })?;

        let max_dimension = match get("MAX_IMAGE_DIMENSION") {
            Some(raw) => match raw.parse::<u32>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ConfigError::Invalid {
                        var: "MAX_IMAGE_DIMENSION",
                        value: raw,
                        reason: "must be a positive integer".into(),
                    })
                }
            },
            None => DEFAULT_MAX_DIMENSION,
        };

        let jpeg_quality = match get("JPEG_QUALITY") {
            Some(raw) => match raw.parse::<u8>() {
                Ok(q) if (1..=100).contains(&q) => q,
                _ => {
                    return Err(ConfigError::Invalid {
                        var: "JPEG_QUALITY",
                        value: raw,
                        reason: "must be between 1 and 100".into(),
                    })
                }
            },
            None => DEFAULT_JPEG_QUALITY,
        };

        let max_upload_bytes = match get("MAX_UPLOAD_BYTES") {
            Some(raw) => match raw.parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ConfigError::Invalid {
                        var: "MAX_UPLOAD_BYTES",
                        value: raw,
                        reason: "must be a positive integer".into(),
                    })
                }
            },
            None => DEFAULT_MAX_UPLOAD_BYTES,
        };

        let instruction =
            get("DESCRIBE_INSTRUCTION").unwrap_or_else(|| DEFAULT_INSTRUCTION.to_string());

        let static_dir = PathBuf::from(
            get("STATIC_DIR").unwrap_or_else(|| DEFAULT_STATIC_DIR.to_string()),
        );

        Ok(Self {
            api_key,
            model,
            api_base,
            bind_addr,
            max_dimensions: MaxDimensions::square(max_dimension),
            jpeg_quality,
            max_upload_bytes,
            instruction,
            static_dir,
        })
    }
}
