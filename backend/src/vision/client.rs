use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::json;
use shared::Keyword;
use std::path::Path;
use std::time::Duration;

use super::token::{ServiceAccountKey, TokenError, TokenProvider};

const ANNOTATE_URL: &str = "https://vision.googleapis.com/v1/images:annotate";
const MAX_LABEL_RESULTS: u32 = 10;

#[derive(Debug, thiserror::Error)]
pub enum VisionError {
    #[error("Failed to read image: {0}")]
    ImageRead(#[from] std::io::Error),
    #[error("Token error: {0}")]
    Token(#[from] TokenError),
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Annotation failed: {0}")]
    Annotation(String),
}

#[derive(Debug, Deserialize)]
struct AnnotateResponse {
    #[serde(default)]
    responses: Vec<ImageResponse>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImageResponse {
    #[serde(default)]
    label_annotations: Vec<LabelAnnotation>,
    error: Option<ApiStatus>,
}

#[derive(Debug, Deserialize)]
struct LabelAnnotation {
    description: String,
    score: f32,
}

#[derive(Debug, Deserialize)]
struct ApiStatus {
    message: String,
}

#[derive(Clone)]
pub struct VisionClient {
    http_client: reqwest::Client,
    token_provider: TokenProvider,
}

impl VisionClient {
    pub fn new(key: ServiceAccountKey, timeout: Duration) -> Result<Self, VisionError> {
        // One deadline bounds the whole annotate call, so a hung service
        // cannot hold a request open indefinitely.
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(VisionError::Http)?;
        let token_provider = TokenProvider::new(key, http_client.clone());
        Ok(Self {
            http_client,
            token_provider,
        })
    }

    pub fn from_key_file(path: &Path, timeout: Duration) -> Result<Self, VisionError> {
        let key = ServiceAccountKey::from_file(path)?;
        Self::new(key, timeout)
    }

    /// Sends the stored image to label detection and returns normalized
    /// keywords. Every upload triggers a fresh call; results are never cached.
    pub async fn detect_labels(&self, image_path: &Path) -> Result<Vec<Keyword>, VisionError> {
        let image_data = tokio::fs::read(image_path).await?;
        let token = self.token_provider.access_token().await?;

        let body = json!({
            "requests": [{
                "image": { "content": BASE64.encode(&image_data) },
                "features": [{ "type": "LABEL_DETECTION", "maxResults": MAX_LABEL_RESULTS }]
            }]
        });

        let response = self
            .http_client
            .post(ANNOTATE_URL)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(VisionError::Annotation(error_text));
        }

        let annotate: AnnotateResponse = response.json().await?;
        extract_keywords(annotate)
    }
}

fn extract_keywords(annotate: AnnotateResponse) -> Result<Vec<Keyword>, VisionError> {
    let image_response = annotate.responses.into_iter().next().unwrap_or_default();

    // A per-image error arrives inside a 200 body and still fails the request.
    if let Some(status) = image_response.error {
        return Err(VisionError::Annotation(status.message));
    }

    Ok(image_response
        .label_annotations
        .into_iter()
        .map(|label| Keyword {
            keyword: label.description,
            confidence: round_confidence(label.score),
        })
        .collect())
}

/// Clamps to [0, 1] and rounds to two decimal places, ties away from zero.
pub fn round_confidence(score: f32) -> f32 {
    (score.clamp(0.0, 1.0) * 100.0).round() / 100.0
}
