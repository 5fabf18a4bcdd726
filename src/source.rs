//! Frame sources.
//!
//! - `ImageDirSource`: replays the images of a directory in file name order
//! - `StaticFrames`: frames held in memory
//! - `CameraSource` (feature: camera): a local camera through nokhwa
//!
//! Only the pipeline reads from a source. `next_frame` returning `Ok(None)` means the
//! stream is exhausted; an error means the source is unusable until reopened.

use async_trait::async_trait;
use image::RgbImage;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

use crate::error::VisionError;

#[async_trait]
pub trait FrameSource: Send + Sync {
    async fn open(&mut self) -> Result<(), VisionError>;

    async fn next_frame(&mut self) -> Result<Option<RgbImage>, VisionError>;

    async fn close(&mut self) -> Result<(), VisionError>;

    fn describe(&self) -> String;
}

#[derive(Debug, Default)]
pub struct StaticFrames {
    frames: VecDeque<RgbImage>,
    open: bool,
}

impl StaticFrames {
    pub fn new(frames: impl IntoIterator<Item = RgbImage>) -> Self {
        Self {
            frames: frames.into_iter().collect(),
            open: false,
        }
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }

    pub fn is_open(&self) -> bool {
        self.open
    }
}

#[async_trait]
impl FrameSource for StaticFrames {
    async fn open(&mut self) -> Result<(), VisionError> {
        self.open = true;
        Ok(())
    }

    async fn next_frame(&mut self) -> Result<Option<RgbImage>, VisionError> {
        if !self.open {
            return Err(VisionError::Source("static frames not opened".into()));
        }
        Ok(self.frames.pop_front())
    }

    async fn close(&mut self) -> Result<(), VisionError> {
        self.open = false;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("{} in-memory frames", self.frames.len())
    }
}

const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

pub struct ImageDirSource {
    dir: PathBuf,
    pending: VecDeque<PathBuf>,
    opened: bool,
}

impl ImageDirSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            pending: VecDeque::new(),
            opened: false,
        }
    }

    async fn list_images(dir: &Path) -> Result<Vec<PathBuf>, VisionError> {
        let mut entries = fs::read_dir(dir).await?;
        let mut images = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_image = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
            if is_image {
                images.push(path);
            }
        }
        images.sort();
        Ok(images)
    }
}

#[async_trait]
impl FrameSource for ImageDirSource {
    async fn open(&mut self) -> Result<(), VisionError> {
        let images = Self::list_images(&self.dir).await.map_err(|e| {
            VisionError::Source(format!("cannot read {}: {}", self.dir.display(), e))
        })?;
        info!("Replaying {} images from {}", images.len(), self.dir.display());
        self.pending = images.into();
        self.opened = true;
        Ok(())
    }

    async fn next_frame(&mut self) -> Result<Option<RgbImage>, VisionError> {
        if !self.opened {
            return Err(VisionError::Source("image directory not opened".into()));
        }
        let Some(path) = self.pending.pop_front() else {
            return Ok(None);
        };
        debug!("Loading frame from {}", path.display());
        let bytes = fs::read(&path).await?;
        let image = image::load_from_memory(&bytes)?;
        Ok(Some(image.to_rgb8()))
    }

    async fn close(&mut self) -> Result<(), VisionError> {
        self.pending.clear();
        self.opened = false;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("image directory {}", self.dir.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[tokio::test]
    async fn test_static_frames_in_order_then_exhausted() {
        let mut source = StaticFrames::new(vec![
            RgbImage::from_pixel(2, 2, Rgb([1, 1, 1])),
            RgbImage::from_pixel(2, 2, Rgb([2, 2, 2])),
        ]);
        assert!(source.next_frame().await.is_err());

        source.open().await.unwrap();
        assert_eq!(source.next_frame().await.unwrap().unwrap().get_pixel(0, 0)[0], 1);
        assert_eq!(source.next_frame().await.unwrap().unwrap().get_pixel(0, 0)[0], 2);
        assert!(source.next_frame().await.unwrap().is_none());
        source.close().await.unwrap();
        assert!(!source.is_open());
    }

    #[tokio::test]
    async fn test_image_dir_replays_sorted_images() {
        let dir = tempfile::tempdir().unwrap();
        RgbImage::from_pixel(4, 4, Rgb([0, 0, 200]))
            .save(dir.path().join("b.png"))
            .unwrap();
        RgbImage::from_pixel(4, 4, Rgb([200, 0, 0]))
            .save(dir.path().join("a.png"))
            .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not an image").unwrap();

        let mut source = ImageDirSource::new(dir.path());
        source.open().await.unwrap();
        let first = source.next_frame().await.unwrap().unwrap();
        assert_eq!(*first.get_pixel(0, 0), Rgb([200, 0, 0]));
        let second = source.next_frame().await.unwrap().unwrap();
        assert_eq!(*second.get_pixel(0, 0), Rgb([0, 0, 200]));
        assert!(source.next_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_directory_fails_to_open() {
        let mut source = ImageDirSource::new("/definitely/not/here");
        assert!(matches!(source.open().await, Err(VisionError::Source(_))));
    }
}
