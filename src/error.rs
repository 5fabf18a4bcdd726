//! Error types for plantwatch

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VisionError {
    #[error("Frame source error: {0}")]
    Source(String),

    #[error("Frame source exhausted")]
    SourceExhausted,

    #[error("Frame sink closed")]
    SinkClosed,

    #[error("Classifier error: {0}")]
    Classifier(String),

    #[error("Cannot analyse an empty crop")]
    EmptyCrop,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Encoding error: {0}")]
    Encode(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}
