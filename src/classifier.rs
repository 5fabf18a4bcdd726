use anyhow::Result;
use async_trait::async_trait;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::config::{ClassifierConfig, ClassifierKind};
use crate::error::VisionError;
use crate::remote_classifier::RemoteClassifier;

/// Label stored when the classifier is not confident enough to name the plant.
pub const UNCLASSIFIED_LABEL: &str = "No está en los datos";

/// Label held by the detection state before the first classification.
pub const DETECTING_LABEL: &str = "Detectando...";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub label: String,
    pub probability: f32,
}

impl Classification {
    pub fn new(label: impl Into<String>, probability: f32) -> Self {
        Self {
            label: label.into(),
            probability: probability.clamp(0.0, 1.0),
        }
    }

    pub fn detecting() -> Self {
        Self::new(DETECTING_LABEL, 0.0)
    }

    /// Replaces the label with [`UNCLASSIFIED_LABEL`] when the probability is below
    /// `threshold`. The probability itself is kept.
    pub fn effective(self, threshold: f32) -> Self {
        if self.probability < threshold {
            Self {
                label: UNCLASSIFIED_LABEL.to_string(),
                probability: self.probability,
            }
        } else {
            self
        }
    }

    pub fn is_unclassified(&self) -> bool {
        self.label == UNCLASSIFIED_LABEL
    }
}

/// Labels a region crop. Implementations are injected into the pipeline.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, image: &RgbImage) -> Result<Classification, VisionError>;

    /// Used in log lines only.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Always answers with the same label; useful for dry runs without a model server.
#[derive(Debug, Clone)]
pub struct FixedClassifier {
    result: Classification,
}

impl FixedClassifier {
    pub fn new(label: impl Into<String>, probability: f32) -> Self {
        Self {
            result: Classification::new(label, probability),
        }
    }
}

#[async_trait]
impl Classifier for FixedClassifier {
    async fn classify(&self, image: &RgbImage) -> Result<Classification, VisionError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(VisionError::EmptyCrop);
        }
        Ok(self.result.clone())
    }

    fn name(&self) -> &str {
        "fixed"
    }
}

pub fn build_classifier(config: &ClassifierConfig) -> Result<Arc<dyn Classifier>> {
    let classifier: Arc<dyn Classifier> = match config.kind {
        ClassifierKind::Remote => Arc::new(RemoteClassifier::new(config.remote.clone())?),
        ClassifierKind::Fixed => Arc::new(FixedClassifier::new(
            config.fixed_label.clone(),
            config.fixed_probability,
        )),
    };
    info!("Using {} classifier", classifier.name());
    Ok(classifier)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Oracle;

    #[async_trait]
    impl Classifier for Oracle {
        async fn classify(&self, _image: &RgbImage) -> Result<Classification, VisionError> {
            Ok(Classification::new("romero", 0.7))
        }
    }

    #[tokio::test]
    async fn test_classify_is_the_only_required_operation() {
        let classifier: Arc<dyn Classifier> = Arc::new(Oracle);
        let result = classifier.classify(&RgbImage::new(4, 4)).await.unwrap();
        assert_eq!(result.label, "romero");
        assert!(classifier.name().ends_with("Oracle"));
    }

    #[test]
    fn test_probability_at_threshold_keeps_label() {
        let result = Classification::new("menta", 0.3).effective(0.3);
        assert_eq!(result.label, "menta");
        assert!(!result.is_unclassified());
    }

    #[test]
    fn test_probability_below_threshold_becomes_unclassified() {
        let result = Classification::new("menta", 0.2999).effective(0.3);
        assert_eq!(result.label, UNCLASSIFIED_LABEL);
        assert_eq!(result.probability, 0.2999);
        assert!(result.is_unclassified());
    }

    #[test]
    fn test_probability_is_clamped() {
        assert_eq!(Classification::new("x", 1.7).probability, 1.0);
        assert_eq!(Classification::new("x", -0.2).probability, 0.0);
    }

    #[tokio::test]
    async fn test_fixed_classifier_rejects_empty_crop() {
        let classifier = FixedClassifier::new("albahaca", 0.9);
        assert!(classifier.classify(&RgbImage::new(0, 0)).await.is_err());
        let result = classifier.classify(&RgbImage::new(4, 4)).await.unwrap();
        assert_eq!(result, Classification::new("albahaca", 0.9));
    }

    #[test]
    fn test_build_fixed_classifier() {
        let config = ClassifierConfig {
            kind: ClassifierKind::Fixed,
            ..ClassifierConfig::default()
        };
        let classifier = build_classifier(&config).unwrap();
        assert_eq!(classifier.name(), "fixed");
    }
}
