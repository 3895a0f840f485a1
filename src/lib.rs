//! # image-describer
//!
//! Upload an image, get a natural-language description back.
//!
//! ```text
//! upload ──▶ normalize ──▶ describe ──▶ page
//!            (≤ 800 px JPEG,  (Gemini
//!             base64)          generateContent)
//! ```
//!
//! The library is usable without the HTTP server: build a [`GeminiClient`]
//! (or any other [`Describer`]), wrap it in a [`DescribePipeline`] and call
//! [`DescribePipeline::run`] with the raw upload bytes.

pub mod client;
pub mod config;
pub mod error;
pub mod normalize;
pub mod pipeline;
pub mod server;

pub use client::{Describer, Description, DescriptionRequest, GeminiClient};
pub use config::{ApiKey, Config};
pub use error::{ConfigError, DecodeError, DescriptionError, PipelineError};
pub use normalize::{normalize, EncodedPayload, MaxDimensions};
pub use pipeline::{DescribeOutcome, DescribePipeline};
pub use server::{router, ServerOptions};
