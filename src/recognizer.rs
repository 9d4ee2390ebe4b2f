//! The vehicle recognition seam.
//!
//! Recognition itself (detection, classification, embedding) is an external
//! model. [`HttpRecognizer`] talks to it over HTTP; [`StaticRecognizer`]
//! returns a fixed answer.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use listing::{EmbeddingVector, VehicleAttributes};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::upload::ImageUpload;

/// What the model saw in a photo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recognition {
    pub attributes: VehicleAttributes,
    pub embedding: EmbeddingVector,
    /// Detection confidence in `[0, 1]`.
    pub confidence: f32,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RecognitionError {
    #[error("no vehicle was detected in the image")]
    UnrecognizedImage,
    #[error("recognizer unavailable: {0}")]
    Unavailable(String),
    #[error("recognizer returned an invalid response: {0}")]
    InvalidResponse(String),
    #[error("invalid recognizer config: {0}")]
    InvalidConfig(String),
}

#[async_trait]
pub trait VehicleRecognizer: Send + Sync {
    async fn infer(&self, upload: &ImageUpload) -> Result<Recognition, RecognitionError>;
}

/// Returns the same answer for every image.
#[derive(Debug, Default)]
pub struct StaticRecognizer {
    answer: Option<Recognition>,
    calls: AtomicUsize,
}

impl StaticRecognizer {
    pub fn new(recognition: Recognition) -> Self {
        Self {
            answer: Some(recognition),
            calls: AtomicUsize::new(0),
        }
    }

    /// Never detects a vehicle.
    pub fn unrecognized() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VehicleRecognizer for StaticRecognizer {
    async fn infer(&self, _upload: &ImageUpload) -> Result<Recognition, RecognitionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.answer
            .clone()
            .ok_or(RecognitionError::UnrecognizedImage)
    }
}

/// Inference endpoint settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecognizerConfig {
    #[serde(default = "RecognizerConfig::default_endpoint")]
    pub endpoint: String,
    #[serde(default = "RecognizerConfig::default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            endpoint: Self::default_endpoint(),
            timeout_secs: Self::default_timeout_secs(),
        }
    }
}

impl RecognizerConfig {
    pub(crate) fn default_endpoint() -> String {
        "http://127.0.0.1:8500/v1/recognize".to_string()
    }

    pub(crate) fn default_timeout_secs() -> u64 {
        30
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn validate(&self) -> Result<(), RecognitionError> {
        let url = Url::parse(&self.endpoint)
            .map_err(|e| RecognitionError::InvalidConfig(format!("endpoint '{}': {e}", self.endpoint)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(RecognitionError::InvalidConfig(format!(
                "endpoint '{}' must be http or https",
                self.endpoint
            )));
        }
        if self.timeout_secs == 0 {
            return Err(RecognitionError::InvalidConfig(
                "timeout_secs must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Wire format of the inference service.
#[derive(Debug, Deserialize)]
struct InferenceResponse {
    #[serde(default = "detected_default")]
    detected: bool,
    #[serde(flatten)]
    attributes: VehicleAttributes,
    #[serde(default)]
    confidence: f32,
    #[serde(default)]
    embedding: Vec<f32>,
}

fn detected_default() -> bool {
    true
}

/// POSTs the raw image to an inference service and reads back JSON.
///
/// The body is the image itself with its MIME type as `Content-Type`. The
/// response carries `make`, `model`, `year`, `body_type`, `color`,
/// `confidence`, `embedding` and an optional `detected` flag.
pub struct HttpRecognizer {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpRecognizer {
    pub fn new(config: &RecognizerConfig) -> Result<Self, RecognitionError> {
        config.validate()?;
        let endpoint = Url::parse(&config.endpoint)
            .map_err(|e| RecognitionError::InvalidConfig(e.to_string()))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RecognitionError::InvalidConfig(e.to_string()))?;
        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl VehicleRecognizer for HttpRecognizer {
    async fn infer(&self, upload: &ImageUpload) -> Result<Recognition, RecognitionError> {
        let content_type = upload
            .declared_format
            .map_or("application/octet-stream", |f| f.mime());
        let response = self
            .client
            .post(self.endpoint.clone())
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(upload.bytes.clone())
            .send()
            .await
            .map_err(|e| RecognitionError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNPROCESSABLE_ENTITY {
            return Err(RecognitionError::UnrecognizedImage);
        }
        if !status.is_success() {
            return Err(RecognitionError::Unavailable(format!(
                "recognizer returned HTTP {}",
                status.as_u16()
            )));
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| RecognitionError::Unavailable(e.to_string()))?;
        let recognition = decode_response(&body)?;
        debug!(
            vehicle = %recognition.attributes.summary(),
            confidence = recognition.confidence,
            dimension = recognition.embedding.dimension(),
            "recognized vehicle"
        );
        Ok(recognition)
    }
}

fn decode_response(body: &[u8]) -> Result<Recognition, RecognitionError> {
    let parsed: InferenceResponse = serde_json::from_slice(body)
        .map_err(|e| RecognitionError::InvalidResponse(e.to_string()))?;
    if !parsed.detected {
        return Err(RecognitionError::UnrecognizedImage);
    }
    let embedding = EmbeddingVector::new(parsed.embedding)
        .map_err(|e| RecognitionError::InvalidResponse(e.to_string()))?;
    Ok(Recognition {
        attributes: parsed.attributes.normalized(),
        embedding,
        confidence: parsed.confidence.clamp(0.0, 1.0),
    })
}
