//! Hand-off of annotated frames to whatever transport relays them to viewers.
//!
//! Frames are never queued: a sink either takes the frame now or it is dropped.

use anyhow::Result;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TrySendError};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::VisionError;

#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub jpeg: Vec<u8>,
}

impl EncodedFrame {
    pub fn encode(sequence: u64, image: &RgbImage, quality: u8) -> Result<Self, VisionError> {
        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, quality)
            .encode_image(image)
            .map_err(|e| VisionError::Encode(e.to_string()))?;
        Ok(Self {
            sequence,
            width: image.width(),
            height: image.height(),
            jpeg,
        })
    }
}

/// Called from the pipeline task once per frame, so `deliver` must return promptly.
pub trait FrameSink: Send + Sync {
    fn deliver(&mut self, frame: EncodedFrame);

    fn close(&mut self) {}
}

#[derive(Debug, Default)]
pub struct NullSink;

impl FrameSink for NullSink {
    fn deliver(&mut self, _frame: EncodedFrame) {}
}

/// Rendezvous hand-off to a consumer such as an MJPEG streaming endpoint. A frame only
/// gets through while the consumer is blocked in `recv`; otherwise it is dropped.
pub struct ChannelSink {
    sender: Option<Sender<EncodedFrame>>,
    dropped: u64,
}

#[derive(Clone)]
pub struct FrameReceiver {
    receiver: Receiver<EncodedFrame>,
}

impl ChannelSink {
    pub fn new() -> (Self, FrameReceiver) {
        let (sender, receiver) = channel::bounded(0);
        (
            Self {
                sender: Some(sender),
                dropped: 0,
            },
            FrameReceiver { receiver },
        )
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl FrameSink for ChannelSink {
    fn deliver(&mut self, frame: EncodedFrame) {
        let Some(sender) = &self.sender else {
            return;
        };
        match sender.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => self.dropped += 1,
            Err(TrySendError::Disconnected(_)) => {
                debug!("Frame consumer went away, closing channel sink");
                self.sender = None;
            }
        }
    }

    fn close(&mut self) {
        if self.sender.take().is_some() {
            info!("Channel sink closed ({} frames dropped)", self.dropped);
        }
    }
}

impl FrameReceiver {
    /// Next frame, or `None` once the sink is closed.
    pub fn recv(&self) -> Option<EncodedFrame> {
        self.receiver.recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<EncodedFrame>, VisionError> {
        match self.receiver.recv_timeout(timeout) {
            Ok(frame) => Ok(Some(frame)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(VisionError::SinkClosed),
        }
    }

    pub fn try_recv(&self) -> Option<EncodedFrame> {
        self.receiver.try_recv().ok()
    }
}

/// Keeps a single JPEG file on disk showing the most recent frame. Writes happen on a
/// writer thread; frames arriving while it is busy are dropped.
pub struct PreviewFileSink {
    frames: ChannelSink,
    writer: Option<JoinHandle<()>>,
}

impl PreviewFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, VisionError> {
        let path = path.into();
        let (frames, receiver) = ChannelSink::new();
        let writer = std::thread::Builder::new()
            .name("preview-writer".into())
            .spawn(move || {
                while let Some(frame) = receiver.recv() {
                    write_preview(&path, &frame);
                }
            })?;
        Ok(Self {
            frames,
            writer: Some(writer),
        })
    }
}

fn write_preview(path: &Path, frame: &EncodedFrame) {
    let tmp = path.with_extension("jpg.tmp");
    let written = std::fs::write(&tmp, &frame.jpeg).and_then(|_| std::fs::rename(&tmp, path));
    if let Err(e) = written {
        warn!("Could not write preview frame {}: {}", frame.sequence, e);
    }
}

impl FrameSink for PreviewFileSink {
    fn deliver(&mut self, frame: EncodedFrame) {
        self.frames.deliver(frame);
    }

    fn close(&mut self) {
        self.frames.close();
        if let Some(writer) = self.writer.take() {
            if writer.join().is_err() {
                warn!("Preview writer thread panicked");
            }
        }
    }
}

impl Drop for PreviewFileSink {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use std::time::Instant;

    fn frame(sequence: u64) -> EncodedFrame {
        EncodedFrame::encode(sequence, &RgbImage::from_pixel(8, 8, Rgb([10, 200, 10])), 80).unwrap()
    }

    #[test]
    fn test_encoded_frame_is_jpeg() {
        let encoded = frame(1);
        assert_eq!((encoded.width, encoded.height), (8, 8));
        assert_eq!(&encoded.jpeg[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_channel_sink_never_holds_frames_for_later() {
        let (mut sink, receiver) = ChannelSink::new();
        sink.deliver(frame(1));
        sink.deliver(frame(2));
        sink.deliver(frame(3));
        assert_eq!(sink.dropped(), 3);
        assert!(receiver.try_recv().is_none());
    }

    #[test]
    fn test_channel_sink_hands_frame_to_waiting_consumer() {
        let (mut sink, receiver) = ChannelSink::new();
        let consumer = std::thread::spawn(move || receiver.recv_timeout(Duration::from_secs(5)));

        let mut sequence = 0;
        let deadline = Instant::now() + Duration::from_secs(5);
        while !consumer.is_finished() && Instant::now() < deadline {
            sequence += 1;
            sink.deliver(frame(sequence));
            std::thread::sleep(Duration::from_millis(2));
        }

        let received = consumer.join().unwrap().unwrap().unwrap();
        // Everything offered before the consumer was waiting was dropped, not kept.
        assert!(sink.dropped() >= received.sequence - 1);
        assert!(sink.dropped() < sequence);
    }

    #[test]
    fn test_channel_sink_close_ends_receiver() {
        let (mut sink, receiver) = ChannelSink::new();
        sink.close();
        assert!(receiver.recv().is_none());
        assert!(matches!(
            receiver.recv_timeout(Duration::from_millis(10)),
            Err(VisionError::SinkClosed)
        ));
    }

    #[test]
    fn test_preview_sink_writes_latest_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preview.jpg");
        let mut sink = PreviewFileSink::new(&path).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut sequence = 0;
        while !path.exists() && Instant::now() < deadline {
            sequence += 1;
            sink.deliver(frame(sequence));
            std::thread::sleep(Duration::from_millis(5));
        }
        sink.close();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        assert!(!path.with_extension("jpg.tmp").exists());
    }
}
