pub mod annotate;
#[cfg(feature = "camera")]
pub mod camera;
pub mod classifier;
pub mod color;
pub mod config;
pub mod detector;
pub mod error;
pub mod frame;
pub mod output;
pub mod pipeline;
pub mod remote_classifier;
pub mod source;
pub mod state;

pub use classifier::{Classification, Classifier};
pub use config::PlantWatchConfig;
pub use error::VisionError;
pub use pipeline::{DetectionPipeline, PipelineHandle, RunSummary};
pub use state::{DetectionSnapshot, DetectionState};
