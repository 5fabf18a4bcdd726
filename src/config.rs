use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::error::VisionError;
use crate::frame::HsvMean;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlantWatchConfig {
    pub source: SourceConfig,
    pub detector: DetectorConfig,
    pub analysis: AnalysisConfig,
    pub classifier: ClassifierConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Camera device index
    pub camera_index: u32,
    /// Replay images from this directory instead of a camera
    pub image_dir: Option<PathBuf>,
    /// How many times a failed source is reopened before the run fails
    pub reconnect_attempts: u32,
    /// Delay before each reopen attempt in milliseconds
    pub reconnect_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Canonical frame width every frame is scaled to
    pub width: u32,
    /// Canonical frame height every frame is scaled to
    pub height: u32,
    /// Lower HSV bound of the leaf mask (hue on the 0-180 scale)
    pub mask_lower: [u8; 3],
    /// Upper HSV bound of the leaf mask
    pub mask_upper: [u8; 3],
    /// Side of the square structuring element used for opening and closing
    pub kernel_size: u8,
    /// Gaussian sigma used to smooth the cleaned mask
    pub blur_sigma: f32,
    pub min_area: f64,
    pub max_area: f64,
    pub min_circularity: f64,
    pub max_circularity: f64,
    /// Exclusive lower bound on bounding-box width / height
    pub min_aspect_ratio: f64,
    /// Exclusive upper bound on bounding-box width / height
    pub max_aspect_ratio: f64,
    pub mean_hue_min: f64,
    pub mean_hue_max: f64,
    /// Mean saturation must be strictly above this
    pub mean_saturation_min: f64,
    /// Mean value must be strictly above this
    pub mean_value_min: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Colour/health analysis runs on frames whose index is a multiple of this
    pub interval_frames: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierKind {
    Remote,
    Fixed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub kind: ClassifierKind,
    /// Probabilities below this turn the label into the unclassified sentinel
    pub unclassified_threshold: f32,
    /// Probabilities at or above this get the high-confidence outline
    pub high_confidence_threshold: f32,
    /// Labels the status report treats as "nothing to show"
    pub ignored_labels: Vec<String>,
    pub fixed_label: String,
    pub fixed_probability: f32,
    pub remote: RemoteClassifierConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteClassifierConfig {
    /// Endpoint receiving `POST {image: <base64 jpeg>}`
    pub endpoint: String,
    pub api_key: Option<String>,
    pub timeout_seconds: u64,
    /// Side of the square image the model expects
    pub input_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub jpeg_quality: u8,
    /// Draw the colour/health panel in the top-left corner of every frame
    pub health_panel: bool,
    /// Overwrite this file with the latest annotated frame
    pub preview_path: Option<PathBuf>,
    /// Write the final detection snapshot here on shutdown
    pub snapshot_path: Option<PathBuf>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            camera_index: 0,
            image_dir: None,
            reconnect_attempts: 0,
            reconnect_delay_ms: 1000,
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            mask_lower: [40, 40, 40],
            mask_upper: [80, 255, 255],
            kernel_size: 5,
            blur_sigma: 1.1,
            min_area: 8000.0,
            max_area: 150000.0,
            min_circularity: 0.2,
            max_circularity: 0.9,
            min_aspect_ratio: 0.5,
            max_aspect_ratio: 2.0,
            mean_hue_min: 35.0,
            mean_hue_max: 85.0,
            mean_saturation_min: 40.0,
            mean_value_min: 50.0,
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self { interval_frames: 10 }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            kind: ClassifierKind::Remote,
            unclassified_threshold: 0.3,
            high_confidence_threshold: 0.85,
            ignored_labels: vec!["no_planta".to_string()],
            fixed_label: "planta".to_string(),
            fixed_probability: 1.0,
            remote: RemoteClassifierConfig::default(),
        }
    }
}

impl Default for RemoteClassifierConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8500/classify".to_string(),
            api_key: None,
            timeout_seconds: 5,
            input_size: 128,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            jpeg_quality: 80,
            health_panel: true,
            preview_path: None,
            snapshot_path: None,
        }
    }
}

impl DetectorConfig {
    pub fn area_ok(&self, area: f64) -> bool {
        area >= self.min_area && area <= self.max_area
    }

    pub fn circularity_ok(&self, circularity: f64) -> bool {
        circularity >= self.min_circularity && circularity <= self.max_circularity
    }

    pub fn aspect_ratio_ok(&self, ratio: f64) -> bool {
        ratio > self.min_aspect_ratio && ratio < self.max_aspect_ratio
    }

    pub fn mean_color_ok(&self, mean: &HsvMean) -> bool {
        mean.h >= self.mean_hue_min
            && mean.h <= self.mean_hue_max
            && mean.s > self.mean_saturation_min
            && mean.v > self.mean_value_min
    }

    /// Radius (in the L-infinity norm) of the square structuring element.
    pub fn kernel_radius(&self) -> u8 {
        self.kernel_size / 2
    }
}

impl PlantWatchConfig {
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            let default_config = Self::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            fs::write(path, toml_content).await?;
            return Ok(default_config);
        }

        let content = fs::read_to_string(path).await?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub async fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content).await?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), VisionError> {
        let d = &self.detector;
        if d.width == 0 || d.height == 0 {
            return Err(VisionError::Config("canonical frame size must be non-zero".into()));
        }
        if (0..3).any(|i| d.mask_lower[i] > d.mask_upper[i]) {
            return Err(VisionError::Config("mask_lower exceeds mask_upper".into()));
        }
        if d.kernel_size == 0 {
            return Err(VisionError::Config("kernel_size must be at least 1".into()));
        }
        if !(d.blur_sigma > 0.0) {
            return Err(VisionError::Config("blur_sigma must be positive".into()));
        }
        if d.min_area > d.max_area
            || d.min_circularity > d.max_circularity
            || d.min_aspect_ratio >= d.max_aspect_ratio
            || d.mean_hue_min > d.mean_hue_max
        {
            return Err(VisionError::Config("detector range has min above max".into()));
        }
        if self.analysis.interval_frames == 0 {
            return Err(VisionError::Config("analysis.interval_frames must be at least 1".into()));
        }

        let c = &self.classifier;
        let thresholds = [c.unclassified_threshold, c.high_confidence_threshold, c.fixed_probability];
        if thresholds.iter().any(|t| !(0.0..=1.0).contains(t)) {
            return Err(VisionError::Config("classifier thresholds must lie in [0, 1]".into()));
        }
        if c.remote.input_size == 0 {
            return Err(VisionError::Config("remote.input_size must be non-zero".into()));
        }
        if !(1..=100).contains(&self.output.jpeg_quality) {
            return Err(VisionError::Config("jpeg_quality must lie in 1..=100".into()));
        }
        Ok(())
    }
}
