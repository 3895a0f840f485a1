//! One upload, start to finish: normalize → describe.
//!
//! ```text
//! raw bytes ──▶ normalize ──▶ DescriptionRequest ──▶ Describer ──▶ Description
//!               (blocking)                           (one call)
//! ```
//!
//! The stages run strictly in order. A decode failure returns before the
//! describer is touched, so a bad upload never costs a network call.

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::client::{Describer, Description, DescriptionRequest};
use crate::config::Config;
use crate::error::PipelineError;
use crate::normalize::{normalize, MaxDimensions};

/// What a successful run produced.
#[derive(Debug, Clone)]
pub struct DescribeOutcome {
    pub description: Description,
    pub model: String,
    /// Dimensions of the image that was sent.
    pub width: u32,
    pub height: u32,
    pub duration_ms: u64,
}

#[derive(Clone)]
pub struct DescribePipeline {
    describer: Arc<dyn Describer>,
    max_dimensions: MaxDimensions,
    jpeg_quality: u8,
    default_instruction: String,
}

impl DescribePipeline {
    pub fn new(
        describer: Arc<dyn Describer>,
        max_dimensions: MaxDimensions,
        jpeg_quality: u8,
        default_instruction: impl Into<String>,
    ) -> Self {
        Self {
            describer,
            max_dimensions,
            jpeg_quality,
            default_instruction: default_instruction.into(),
        }
    }

    pub fn from_config(describer: Arc<dyn Describer>, config: &Config) -> Self {
        Self::new(
            describer,
            config.max_dimensions,
            config.jpeg_quality,
            config.instruction.clone(),
        )
    }

    pub fn model(&self) -> &str {
        self.describer.model()
    }

    /// Normalize `raw` and describe it with `instruction`, or with the
    /// configured default when `instruction` is `None` or blank.
    pub async fn run(
        &self,
        raw: Vec<u8>,
        instruction: Option<&str>,
    ) -> Result<DescribeOutcome, PipelineError> {
        let start = Instant::now();
        let instruction = instruction
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(self.default_instruction.as_str())
            .to_string();

        let max = self.max_dimensions;
        let quality = self.jpeg_quality;
        debug!("Normalizing {} byte upload", raw.len());
        let payload = tokio::task::spawn_blocking(move || normalize(&raw, max, quality))
            .await
            .map_err(|e| PipelineError::Worker(e.to_string()))??;

        let (width, height) = (payload.width, payload.height);
        let request = DescriptionRequest::new(payload, instruction);
        let description = self.describer.describe(&request).await?;

        let duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Described {}x{} image with {} in {}ms",
            width,
            height,
            self.describer.model(),
            duration_ms
        );

        Ok(DescribeOutcome {
            description,
            model: self.describer.model().to_string(),
            width,
            height,
            duration_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DecodeError, DescriptionError};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records every request and answers with a canned result.
    struct Recording {
        reply: Result<Description, DescriptionError>,
        seen: Mutex<Vec<DescriptionRequest>>,
    }

    impl Recording {
        fn replying(text: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(Description::from_text(text).unwrap()),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn failing(err: DescriptionError) -> Arc<Self> {
            Arc::new(Self {
                reply: Err(err),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<DescriptionRequest> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Describer for Recording {
        async fn describe(
            &self,
            request: &DescriptionRequest,
        ) -> Result<Description, DescriptionError> {
            self.seen.lock().unwrap().push(request.clone());
            self.reply.clone()
        }

        fn model(&self) -> &str {
            "recording"
        }
    }

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = image::DynamicImage::ImageRgb8(image::RgbImage::new(width, height));
        let mut buf = Vec::new();
        img.write_to(
            &mut std::io::Cursor::new(&mut buf),
            image::ImageOutputFormat::Png,
        )
        .unwrap();
        buf
    }

    fn pipeline(describer: Arc<Recording>) -> DescribePipeline {
        DescribePipeline::new(describer, MaxDimensions::square(800), 75, "default prompt")
    }

    #[tokio::test]
    async fn empty_upload_never_calls_describer() {
        let describer = Recording::replying("unused");
        let err = pipeline(describer.clone()).run(Vec::new(), None).await.unwrap_err();
        assert!(matches!(err, PipelineError::Decode(DecodeError::Empty)));
        assert!(describer.calls().is_empty());
    }

    #[tokio::test]
    async fn uses_default_instruction_when_blank() {
        let describer = Recording::replying("A black square.");
        pipeline(describer.clone())
            .run(png(10, 10), Some("   "))
            .await
            .unwrap();
        let calls = describer.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].instruction(), "default prompt");
    }

    #[tokio::test]
    async fn caller_instruction_wins() {
        let describer = Recording::replying("Square.");
        pipeline(describer.clone())
            .run(png(10, 10), Some("One word only."))
            .await
            .unwrap();
        assert_eq!(describer.calls()[0].instruction(), "One word only.");
    }

    #[tokio::test]
    async fn outcome_reports_sent_dimensions() {
        let describer = Recording::replying("Wide.");
        let outcome = pipeline(describer.clone())
            .run(png(1600, 400), None)
            .await
            .unwrap();
        assert_eq!((outcome.width, outcome.height), (800, 200));
        assert_eq!(outcome.model, "recording");
        assert_eq!(outcome.description.as_str(), "Wide.");
        assert_eq!(describer.calls()[0].payload().media_type, "image/jpeg");
    }

    #[tokio::test]
    async fn description_failure_is_propagated() {
        let describer = Recording::failing(DescriptionError::EmptyResponse);
        let err = pipeline(describer.clone())
            .run(png(10, 10), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Description(DescriptionError::EmptyResponse)
        ));
        assert_eq!(describer.calls().len(), 1);
    }
}
