use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::classifier::{Classification, Classifier};
use crate::config::RemoteClassifierConfig;
use crate::error::VisionError;

#[derive(Serialize)]
struct ClassifyRequest {
    image: String,
    width: u32,
    height: u32,
}

#[derive(Debug, Deserialize)]
struct ClassifyResponse {
    label: String,
    #[serde(alias = "prob")]
    probability: f32,
}

/// Classifier backed by a model server: the crop is resized to the model input size,
/// JPEG-encoded and posted as base64 JSON.
pub struct RemoteClassifier {
    config: RemoteClassifierConfig,
    client: reqwest::Client,
}

impl RemoteClassifier {
    pub fn new(config: RemoteClassifierConfig) -> Result<Self, VisionError> {
        let timeout = Duration::from_secs(config.timeout_seconds.max(1));

        let mut default_headers = reqwest::header::HeaderMap::new();
        default_headers.insert(
            reqwest::header::CONTENT_TYPE,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        if let Some(api_key) = &config.api_key {
            let auth_header = format!("Bearer {}", api_key);
            default_headers.insert(
                reqwest::header::AUTHORIZATION,
                reqwest::header::HeaderValue::from_str(&auth_header)
                    .map_err(|e| VisionError::Config(format!("Invalid API key format: {}", e)))?,
            );
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("plantwatch/0.1")
            .default_headers(default_headers)
            .build()?;

        info!("Initialized remote classifier client for {}", config.endpoint);

        Ok(Self { config, client })
    }

    fn encode_image(&self, image: &RgbImage) -> Result<String, VisionError> {
        let size = self.config.input_size;
        let resized = imageops::resize(image, size, size, FilterType::Triangle);

        let mut buffer = Vec::new();
        JpegEncoder::new_with_quality(&mut buffer, 90).encode_image(&resized)?;

        Ok(general_purpose::STANDARD.encode(&buffer))
    }
}

#[async_trait]
impl Classifier for RemoteClassifier {
    async fn classify(&self, image: &RgbImage) -> Result<Classification, VisionError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(VisionError::EmptyCrop);
        }
        let start_time = Instant::now();

        let request = ClassifyRequest {
            image: self.encode_image(image)?,
            width: self.config.input_size,
            height: self.config.input_size,
        };

        let response = self
            .client
            .post(&self.config.endpoint)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(VisionError::Classifier(format!(
                "model server returned {}: {}",
                status, error_text
            )));
        }

        let body: ClassifyResponse = response.json().await?;
        if !(0.0..=1.0).contains(&body.probability) {
            return Err(VisionError::Classifier(format!(
                "probability {} outside [0, 1]",
                body.probability
            )));
        }

        debug!(
            "Remote classifier answered {} ({:.3}) in {}ms",
            body.label,
            body.probability,
            start_time.elapsed().as_millis()
        );

        Ok(Classification::new(body.label, body.probability))
    }

    fn name(&self) -> &str {
        "remote"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_accepts_short_probability_key() {
        let body: ClassifyResponse =
            serde_json::from_str(r#"{"label": "menta", "prob": 0.91}"#).unwrap();
        assert_eq!(body.label, "menta");
        assert!((body.probability - 0.91).abs() < 1e-6);
    }

    #[test]
    fn test_encoded_image_is_base64_jpeg() {
        let classifier = RemoteClassifier::new(RemoteClassifierConfig::default()).unwrap();
        let encoded = classifier
            .encode_image(&RgbImage::from_pixel(40, 30, image::Rgb([0, 180, 0])))
            .unwrap();
        let bytes = general_purpose::STANDARD.decode(encoded).unwrap();
        // JPEG SOI marker
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_invalid_api_key_is_config_error() {
        let config = RemoteClassifierConfig {
            api_key: Some("bad\nkey".to_string()),
            ..RemoteClassifierConfig::default()
        };
        assert!(matches!(RemoteClassifier::new(config), Err(VisionError::Config(_))));
    }
}
