use anyhow::{anyhow, Result};
use image::RgbImage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::annotate::FrameAnnotator;
use crate::classifier::Classifier;
use crate::color::ColorHealthAnalyzer;
use crate::config::PlantWatchConfig;
use crate::detector::RegionDetector;
use crate::error::VisionError;
use crate::frame::Frame;
use crate::output::{EncodedFrame, FrameSink};
use crate::source::FrameSource;
use crate::state::DetectionState;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameOutcome {
    pub candidates: usize,
    // Candidates whose label survived the probability cut
    pub classified: usize,
    pub classifier_failures: usize,
    pub analyzed: bool,
}

#[derive(Debug, Clone)]
pub struct ProcessedFrame {
    pub sequence: u64,
    pub image: RgbImage,
    pub outcome: FrameOutcome,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub frames: u64,
    pub candidates: u64,
    pub reconnects: u32,
}

pub struct DetectionPipeline {
    source: Box<dyn FrameSource>,
    classifier: Arc<dyn Classifier>,
    sink: Box<dyn FrameSink>,
    detector: RegionDetector,
    analyzer: ColorHealthAnalyzer,
    annotator: FrameAnnotator,
    state: DetectionState,
    config: PlantWatchConfig,
    frame_count: u64,
    stop: Arc<AtomicBool>,
}

impl DetectionPipeline {
    pub fn new(
        config: PlantWatchConfig,
        source: Box<dyn FrameSource>,
        classifier: Arc<dyn Classifier>,
        sink: Box<dyn FrameSink>,
    ) -> Result<Self> {
        config.validate()?;
        info!(
            "Initializing detection pipeline ({}x{}, colour analysis every {} frames, {} classifier)",
            config.detector.width,
            config.detector.height,
            config.analysis.interval_frames,
            classifier.name()
        );

        Ok(Self {
            source,
            classifier,
            sink,
            detector: RegionDetector::new(config.detector.clone()),
            analyzer: ColorHealthAnalyzer::new(),
            annotator: FrameAnnotator::new(config.classifier.high_confidence_threshold),
            state: DetectionState::new(),
            config,
            frame_count: 0,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn state(&self) -> DetectionState {
        self.state.clone()
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    /// Runs detection, classification, throttled colour analysis and annotation on one frame.
    ///
    /// Every candidate overwrites the classification in the shared state, so with several
    /// candidates in a frame the last one processed is what readers see. Failures on a
    /// single region are logged and skip that region only.
    pub async fn process_frame(&mut self, image: RgbImage) -> ProcessedFrame {
        let sequence = self.frame_count;
        let frame = Frame::new(sequence, image)
            .into_canonical(self.config.detector.width, self.config.detector.height);
        let mut canvas = frame.image.clone();
        let analysis_due = sequence % self.config.analysis.interval_frames == 0;
        let unclassified_threshold = self.config.classifier.unclassified_threshold;
        let mut outcome = FrameOutcome::default();

        for region in self.detector.detect(&frame) {
            outcome.candidates += 1;

            let classification = match self.classifier.classify(&region.crop).await {
                Ok(raw) => raw.effective(unclassified_threshold),
                Err(e) => {
                    warn!("Classifier failed on region {:?}: {}", region.bbox(), e);
                    outcome.classifier_failures += 1;
                    continue;
                }
            };
            debug!(
                "Frame {}: region {:?} -> {} ({:.3})",
                sequence,
                region.bbox(),
                classification.label,
                classification.probability
            );

            if classification.is_unclassified() {
                self.state.record(classification, None);
                continue;
            }
            outcome.classified += 1;

            let analysis = if analysis_due {
                match self.analyzer.analyze(&region.crop) {
                    Ok(analysis) => {
                        outcome.analyzed = true;
                        Some(analysis)
                    }
                    Err(e) => {
                        warn!("Colour analysis failed on region {:?}: {}", region.bbox(), e);
                        None
                    }
                }
            } else {
                None
            };

            self.annotator.annotate(&mut canvas, &region, &classification);
            self.state.record(classification, analysis);
        }

        if self.config.output.health_panel {
            self.annotator.draw_health_panel(&mut canvas, &self.state.snapshot());
        }

        self.frame_count += 1;
        ProcessedFrame {
            sequence,
            image: canvas,
            outcome,
        }
    }

    pub async fn run(&mut self) -> Result<RunSummary> {
        info!("Starting detection loop on {}", self.source.describe());

        let result = match self.source.open().await {
            Ok(()) => self.run_loop().await,
            Err(e) => Err(anyhow::Error::new(e).context("could not open frame source")),
        };

        // Release the source and sink whatever happened above
        if let Err(e) = self.source.close().await {
            warn!("Error closing frame source: {}", e);
        }
        self.sink.close();

        match &result {
            Ok(summary) => info!(
                "Pipeline stopped after {} frames ({} candidates, {} reconnects)",
                summary.frames, summary.candidates, summary.reconnects
            ),
            Err(e) => error!("Pipeline failed: {:#}", e),
        }
        result
    }

    async fn run_loop(&mut self) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        let mut attempts_left = self.config.source.reconnect_attempts;
        let mut last_stats_time = Instant::now();
        let quality = self.config.output.jpeg_quality;

        loop {
            if self.stop_requested() {
                info!("Stop requested");
                break;
            }

            let image = match self.source.next_frame().await {
                Ok(Some(image)) => image,
                Ok(None) => {
                    info!("Frame source exhausted");
                    break;
                }
                Err(e) => {
                    warn!("Frame source failed: {}", e);
                    if self.reopen_source(e, &mut attempts_left).await? {
                        summary.reconnects += 1;
                    }
                    continue;
                }
            };
            attempts_left = self.config.source.reconnect_attempts;

            let processed = self.process_frame(image).await;
            summary.frames += 1;
            summary.candidates += processed.outcome.candidates as u64;

            match EncodedFrame::encode(processed.sequence, &processed.image, quality) {
                Ok(encoded) => self.sink.deliver(encoded),
                Err(e) => warn!("Could not encode frame {}: {}", processed.sequence, e),
            }

            if summary.frames % 100 == 0 {
                let elapsed = last_stats_time.elapsed();
                let fps = 100.0 / elapsed.as_secs_f32();
                info!("Processed {} frames, current FPS: {:.2}", summary.frames, fps);
                last_stats_time = Instant::now();
            }
        }

        Ok(summary)
    }

    // Ok(false) when a stop request cut the attempts short. A reopened source starts a
    // fresh stream, so the frame counter goes back to zero.
    async fn reopen_source(&mut self, cause: VisionError, attempts_left: &mut u32) -> Result<bool> {
        let delay = Duration::from_millis(self.config.source.reconnect_delay_ms);
        let mut last_error = cause;

        while *attempts_left > 0 && !self.stop_requested() {
            *attempts_left -= 1;
            if let Err(e) = self.source.close().await {
                debug!("Error closing failed source: {}", e);
            }
            tokio::time::sleep(delay).await;

            match self.source.open().await {
                Ok(()) => {
                    info!("Reopened {} ({} attempts left)", self.source.describe(), attempts_left);
                    self.frame_count = 0;
                    return Ok(true);
                }
                Err(e) => {
                    warn!("Reopening {} failed: {}", self.source.describe(), e);
                    last_error = e;
                }
            }
        }

        if self.stop_requested() {
            return Ok(false);
        }
        Err(anyhow::Error::new(last_error)
            .context(format!("frame source {} failed", self.source.describe())))
    }

    pub fn start(self) -> PipelineHandle {
        let stop = self.stop.clone();
        let state = self.state.clone();
        let task = tokio::spawn(async move {
            let mut pipeline = self;
            pipeline.run().await
        });
        PipelineHandle { stop, state, task }
    }
}

pub struct PipelineHandle {
    stop: Arc<AtomicBool>,
    state: DetectionState,
    task: JoinHandle<Result<RunSummary>>,
}

impl PipelineHandle {
    pub fn stop(&self) {
        info!("Stopping pipeline...");
        self.stop.store(true, Ordering::Relaxed);
    }

    pub fn state(&self) -> DetectionState {
        self.state.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn join(self) -> Result<RunSummary> {
        self.task
            .await
            .map_err(|e| anyhow!("pipeline task failed: {}", e))?
    }

    pub async fn shutdown(self) -> Result<RunSummary> {
        self.stop();
        self.join().await
    }
}
