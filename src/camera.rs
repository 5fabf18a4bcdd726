use async_trait::async_trait;
use crossbeam::channel::{self, Receiver};
use image::RgbImage;
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType};
use nokhwa::Camera;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::VisionError;
use crate::source::FrameSource;

type CaptureResult = Result<RgbImage, String>;

pub struct CameraSource {
    camera_index: u32,
    frames: Option<Receiver<CaptureResult>>,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl CameraSource {
    pub fn new(camera_index: u32) -> Self {
        Self {
            camera_index,
            frames: None,
            stop: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    pub fn detect_cameras() -> Vec<u32> {
        (0..10)
            .filter(|&cam_id| {
                let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate);
                Camera::new(CameraIndex::Index(cam_id), requested).is_ok()
            })
            .collect()
    }

    fn capture_loop(
        camera_index: u32,
        stop: Arc<AtomicBool>,
        ready: channel::Sender<Result<(), String>>,
        frames: channel::Sender<CaptureResult>,
    ) {
        // The device is owned by this thread for its whole life
        let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate);
        let mut camera = match Camera::new(CameraIndex::Index(camera_index), requested) {
            Ok(camera) => camera,
            Err(e) => {
                let _ = ready.send(Err(format!("cannot open camera {}: {}", camera_index, e)));
                return;
            }
        };
        if let Err(e) = camera.open_stream() {
            let _ = ready.send(Err(format!("cannot start stream on camera {}: {}", camera_index, e)));
            return;
        }
        let _ = ready.send(Ok(()));

        while !stop.load(Ordering::Relaxed) {
            let captured = camera
                .frame()
                .and_then(|buffer| buffer.decode_image::<RgbFormat>())
                .map_err(|e| e.to_string())
                .and_then(|decoded| {
                    let (width, height) = (decoded.width(), decoded.height());
                    RgbImage::from_raw(width, height, decoded.into_raw())
                        .ok_or_else(|| "decoded frame has the wrong size".to_string())
                });

            let failed = captured.is_err();
            if let Err(e) = &captured {
                error!("Camera frame capture failed: {}", e);
            }
            if frames.send(captured).is_err() || failed {
                break;
            }
        }

        match camera.stop_stream() {
            Ok(_) => info!("Camera {} stream stopped", camera_index),
            Err(e) => warn!("Error stopping camera stream: {}", e),
        }
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        // Dropping the receiver unblocks a capture thread waiting to hand over a frame.
        self.frames = None;
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Camera capture thread panicked");
            }
        }
    }
}

#[async_trait]
impl FrameSource for CameraSource {
    async fn open(&mut self) -> Result<(), VisionError> {
        self.shutdown();
        info!("Opening camera {}", self.camera_index);

        let stop = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = channel::bounded(1);
        let (frame_tx, frame_rx) = channel::bounded(1);
        let camera_index = self.camera_index;
        let thread_stop = stop.clone();

        let worker = std::thread::Builder::new()
            .name(format!("camera-{}", camera_index))
            .spawn(move || Self::capture_loop(camera_index, thread_stop, ready_tx, frame_tx))?;

        let ready = tokio::task::spawn_blocking(move || ready_rx.recv())
            .await
            .map_err(|e| VisionError::Source(e.to_string()))?
            .map_err(|_| VisionError::Source("camera thread exited during start-up".into()))?;

        self.stop = stop;
        self.worker = Some(worker);
        if let Err(e) = ready {
            self.shutdown();
            return Err(VisionError::Source(e));
        }

        self.frames = Some(frame_rx);
        info!("Camera {} streaming", self.camera_index);
        Ok(())
    }

    async fn next_frame(&mut self) -> Result<Option<RgbImage>, VisionError> {
        let frames = self
            .frames
            .clone()
            .ok_or_else(|| VisionError::Source("camera not opened".into()))?;

        let received = tokio::task::spawn_blocking(move || frames.recv())
            .await
            .map_err(|e| VisionError::Source(e.to_string()))?;

        match received {
            Ok(Ok(image)) => {
                debug!("Captured camera frame: {}x{}", image.width(), image.height());
                Ok(Some(image))
            }
            Ok(Err(e)) => Err(VisionError::Source(e)),
            Err(_) => Err(VisionError::Source("camera capture thread stopped".into())),
        }
    }

    async fn close(&mut self) -> Result<(), VisionError> {
        info!("Closing camera {}", self.camera_index);
        self.shutdown();
        Ok(())
    }

    fn describe(&self) -> String {
        format!("camera {}", self.camera_index)
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        if self.worker.is_some() {
            info!("CameraSource being dropped, releasing camera {}", self.camera_index);
            self.shutdown();
        }
    }
}
