//! HTTP surface: the single page, its assets, and the upload endpoint.

use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{Html, IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use std::path::PathBuf;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, services::ServeDir};
use tracing::warn;

use crate::config::{Config, DEFAULT_MAX_UPLOAD_BYTES, DEFAULT_STATIC_DIR};
use crate::error::{DescriptionError, PipelineError};
use crate::pipeline::DescribePipeline;

const INDEX_HTML: &str = include_str!("../static/index.html");

/// Declared part types the upload endpoint accepts.
const ACCEPTED_TYPES: &[&str] = &["image/jpeg", "image/jpg", "image/png"];

#[derive(Clone)]
struct AppState {
    pipeline: DescribePipeline,
    max_upload_bytes: usize,
}

#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub static_dir: PathBuf,
    pub max_upload_bytes: usize,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            static_dir: PathBuf::from(DEFAULT_STATIC_DIR),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

impl ServerOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            static_dir: config.static_dir.clone(),
            max_upload_bytes: config.max_upload_bytes,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DescribeResponse {
    pub description: String,
    pub model: String,
    pub width: u32,
    pub height: u32,
    pub processing_time_ms: u64,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
}

/// Errors the upload endpoint reports to the page.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    PayloadTooLarge { limit: usize },
    UnsupportedMediaType(String),
    Pipeline(PipelineError),
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        Self::Pipeline(e)
    }
}

impl ApiError {
    /// Keep the body-limit rejection apart from genuinely malformed uploads.
    fn from_multipart(e: MultipartError, limit: usize) -> Self {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            Self::PayloadTooLarge { limit }
        } else {
            Self::BadRequest(format!("Malformed upload: {}", e.body_text()))
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match &self {
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            Self::PayloadTooLarge { .. } => (StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large"),
            Self::UnsupportedMediaType(_) => {
                (StatusCode::UNSUPPORTED_MEDIA_TYPE, "unsupported_media_type")
            }
            Self::Pipeline(PipelineError::Decode(_)) => (StatusCode::UNPROCESSABLE_ENTITY, "decode"),
            Self::Pipeline(PipelineError::Description(e @ DescriptionError::RateLimited { .. })) => {
                (StatusCode::TOO_MANY_REQUESTS, e.kind())
            }
            Self::Pipeline(PipelineError::Description(e)) => (StatusCode::BAD_GATEWAY, e.kind()),
            Self::Pipeline(PipelineError::Worker(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal")
            }
        };
        let message = match self {
            Self::BadRequest(m) | Self::UnsupportedMediaType(m) => m,
            Self::PayloadTooLarge { limit } => format!(
                "The upload is larger than the {} limit. Try a smaller image.",
                human_bytes(limit)
            ),
            Self::Pipeline(e) => e.to_string(),
        };
        (status, Json(ErrorResponse { error, message })).into_response()
    }
}

pub fn router(pipeline: DescribePipeline, options: &ServerOptions) -> Router {
    let state = AppState {
        pipeline,
        max_upload_bytes: options.max_upload_bytes,
    };

    Router::new()
        .route("/", get(index))
        .route("/healthz", get(healthz))
        .route("/api/describe", post(describe_upload))
        .nest_service("/static", ServeDir::new(&options.static_dir))
        .layer(
            ServiceBuilder::new()
                .layer(CorsLayer::permissive())
                .layer(DefaultBodyLimit::max(options.max_upload_bytes)),
        )
        .with_state(state)
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn healthz(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok", "model": state.pipeline.model() }))
}

async fn describe_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<DescribeResponse>, ApiError> {
    let mut image: Option<Vec<u8>> = None;
    let mut instruction: Option<String> = None;
    let limit = state.max_upload_bytes;
    let multipart_err = |e: MultipartError| ApiError::from_multipart(e, limit);

    while let Some(field) = multipart.next_field().await.map_err(multipart_err)? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("image") => {
                if let Some(declared) = field.content_type().map(str::to_ascii_lowercase) {
                    if !ACCEPTED_TYPES.contains(&declared.as_str()) {
                        return Err(ApiError::UnsupportedMediaType(format!(
                            "Only JPEG and PNG images are accepted (got {declared})"
                        )));
                    }
                }
                image = Some(field.bytes().await.map_err(multipart_err)?.to_vec());
            }
            Some("instruction") => {
                instruction = Some(field.text().await.map_err(multipart_err)?)
            }
            _ => {}
        }
    }

    let image = image.ok_or_else(|| ApiError::BadRequest("Missing 'image' field".into()))?;
    check_sniffed_format(&image)?;

    let outcome = state
        .pipeline
        .run(image, instruction.as_deref())
        .await
        .map_err(|e| {
            warn!("Describe failed: {}", e);
            ApiError::from(e)
        })?;

    Ok(Json(DescribeResponse {
        description: outcome.description.into_string(),
        model: outcome.model,
        width: outcome.width,
        height: outcome.height,
        processing_time_ms: outcome.duration_ms,
    }))
}

fn human_bytes(n: usize) -> String {
    const MIB: usize = 1024 * 1024;
    const KIB: usize = 1024;
    if n >= MIB && n % MIB == 0 {
        format!("{} MiB", n / MIB)
    } else if n >= KIB && n % KIB == 0 {
        format!("{} KiB", n / KIB)
    } else {
        format!("{n} bytes")
    }
}

/// Reject recognisable non-JPEG/PNG images. Unrecognisable bytes (including
/// an empty file) go on to the normalizer, which reports them as undecodable.
fn check_sniffed_format(bytes: &[u8]) -> Result<(), ApiError> {
    match image::guess_format(bytes) {
        Ok(image::ImageFormat::Jpeg | image::ImageFormat::Png) | Err(_) => Ok(()),
        Ok(other) => Err(ApiError::UnsupportedMediaType(format!(
            "Only JPEG and PNG images are accepted (got {other:?})"
        ))),
    }
}
