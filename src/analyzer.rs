//! Frame Analyzer
//!
//! The frame-intake boundary. Frames are gated by a [`FrameThrottle`]; an
//! admitted frame runs through the pipeline and its report goes to a
//! [`DetectionCallback`]. Frames inside the throttle window are dropped.
//!
//! [`FrameAnalyzer::spawn`] moves the analyzer onto a worker thread fed by a
//! one-slot channel, so a frame arriving while the worker is busy is
//! dropped instead of queued.

use anyhow::{Context, Result};
use crossbeam_channel::{bounded, Sender, TrySendError};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info};

use crate::capture::{Frame, FrameThrottle};
use crate::pipeline::{FrameReport, PipelineOrchestrator};

/// Receives the report of every analyzed frame
pub trait DetectionCallback: Send {
    fn on_detections(&mut self, report: &FrameReport);
}

impl<F> DetectionCallback for F
where
    F: FnMut(&FrameReport) + Send,
{
    fn on_detections(&mut self, report: &FrameReport) {
        self(report)
    }
}

/// Frame counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnalyzerStats {
    /// Frames handed to the analyzer
    pub frames_received: u64,
    /// Frames dropped because the worker was busy
    pub frames_dropped: u64,
    /// Frames dropped by the throttle
    pub frames_throttled: u64,
    /// Frames that ran through the pipeline
    pub frames_analyzed: u64,
    /// Detections reported across all analyzed frames
    pub detections_reported: u64,
}

pub struct FrameAnalyzer<C: DetectionCallback> {
    pipeline: PipelineOrchestrator,
    throttle: FrameThrottle,
    callback: C,
    stats: Arc<Mutex<AnalyzerStats>>,
}

impl<C: DetectionCallback + 'static> FrameAnalyzer<C> {
    pub fn new(pipeline: PipelineOrchestrator, throttle: FrameThrottle, callback: C) -> Self {
        Self {
            pipeline,
            throttle,
            callback,
            stats: Arc::new(Mutex::new(AnalyzerStats::default())),
        }
    }

    /// Analyzer gated at the pipeline's configured interval
    pub fn with_pipeline_interval(pipeline: PipelineOrchestrator, callback: C) -> Self {
        let interval = Duration::from_millis(pipeline.config().interval_ms);
        Self::new(pipeline, FrameThrottle::new(interval), callback)
    }

    pub fn stats(&self) -> AnalyzerStats {
        *self.stats.lock()
    }

    /// Offer a frame, gated by its capture timestamp
    ///
    /// Returns whether the frame was analyzed.
    pub fn analyze(&mut self, frame: &Frame) -> bool {
        self.stats.lock().frames_received += 1;
        self.process(frame)
    }

    fn process(&mut self, frame: &Frame) -> bool {
        if !self.throttle.try_admit_at(frame.timestamp) {
            self.stats.lock().frames_throttled += 1;
            return false;
        }

        let report = self.pipeline.process_frame(frame);
        {
            let mut stats = self.stats.lock();
            stats.frames_analyzed += 1;
            stats.detections_reported += report.detections.len() as u64;
        }
        self.callback.on_detections(&report);
        true
    }

    /// Run the analyzer on a dedicated worker thread
    pub fn spawn(mut self) -> Result<AnalyzerHandle> {
        let (sender, receiver) = bounded::<Frame>(1);
        let stats = Arc::clone(&self.stats);

        let worker = std::thread::Builder::new()
            .name("frame-analyzer".to_string())
            .spawn(move || {
                info!("Analyzer thread starting...");
                for frame in receiver {
                    self.process(&frame);
                }
                info!("Analyzer thread exiting...");
            })
            .context("Failed to spawn analyzer thread")?;

        Ok(AnalyzerHandle {
            sender: Some(sender),
            worker: Some(worker),
            stats,
        })
    }
}

/// Handle to an analyzer running on its own thread
///
/// Dropping the handle closes the channel and waits for the worker.
pub struct AnalyzerHandle {
    sender: Option<Sender<Frame>>,
    worker: Option<JoinHandle<()>>,
    stats: Arc<Mutex<AnalyzerStats>>,
}

impl AnalyzerHandle {
    /// Hand a frame to the worker; `false` if it was dropped
    pub fn submit(&self, frame: Frame) -> bool {
        self.stats.lock().frames_received += 1;

        let Some(sender) = &self.sender else {
            return false;
        };
        match sender.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.stats.lock().frames_dropped += 1;
                debug!("Analyzer busy, frame dropped");
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                self.stats.lock().frames_dropped += 1;
                false
            }
        }
    }

    pub fn stats(&self) -> AnalyzerStats {
        *self.stats.lock()
    }

    /// Stop accepting frames and wait for the worker to drain
    pub fn shutdown(mut self) -> AnalyzerStats {
        self.stop();
        self.stats()
    }

    fn stop(&mut self) {
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for AnalyzerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::vision::{ClosureEngine, DetectorConfig, ObjectDetectionStage, Tensor};
    use image::RgbImage;
    use std::time::Instant;

    /// Pipeline whose detector always finds one object
    fn pipeline() -> PipelineOrchestrator {
        let engine = ClosureEngine::new(|_: &Tensor| {
            Tensor::new(vec![1, 5, 1], vec![320.0, 320.0, 100.0, 100.0, 0.9])
        });
        let detector = ObjectDetectionStage::with_labels(
            Box::new(engine),
            vec!["car".to_string()],
            DetectorConfig::default(),
        );
        PipelineOrchestrator::new(detector, None, PipelineConfig::default())
    }

    fn frame_at(timestamp: Instant) -> Frame {
        Frame::at(RgbImage::new(64, 48), timestamp)
    }

    #[test]
    fn test_throttle_window_drops_frames() {
        let reports = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&reports);
        let mut analyzer = FrameAnalyzer::with_pipeline_interval(pipeline(), move |r: &FrameReport| {
            sink.lock().push(r.detections.len());
        });

        let t0 = Instant::now();
        assert!(analyzer.analyze(&frame_at(t0)));
        assert!(!analyzer.analyze(&frame_at(t0 + Duration::from_millis(500))));
        assert!(analyzer.analyze(&frame_at(t0 + Duration::from_millis(2000))));

        assert_eq!(*reports.lock(), vec![1, 1]);
        let stats = analyzer.stats();
        assert_eq!(stats.frames_received, 3);
        assert_eq!(stats.frames_throttled, 1);
        assert_eq!(stats.frames_analyzed, 2);
        assert_eq!(stats.detections_reported, 2);
    }

    struct Counter(Arc<Mutex<u32>>);

    impl DetectionCallback for Counter {
        fn on_detections(&mut self, _report: &FrameReport) {
            *self.0.lock() += 1;
        }
    }

    #[test]
    fn test_spawned_analyzer_processes_frames() {
        let count = Arc::new(Mutex::new(0));
        let analyzer = FrameAnalyzer::new(
            pipeline(),
            FrameThrottle::new(Duration::ZERO),
            Counter(Arc::clone(&count)),
        );
        let handle = analyzer.spawn().unwrap();

        assert!(handle.submit(frame_at(Instant::now())));
        let stats = handle.shutdown();

        assert_eq!(*count.lock(), 1);
        assert_eq!(stats.frames_analyzed, 1);
        assert_eq!(stats.frames_received, 1);
    }

    #[test]
    fn test_spawned_analyzer_drops_when_busy() {
        let analyzer = FrameAnalyzer::new(
            pipeline(),
            FrameThrottle::new(Duration::ZERO),
            |_: &FrameReport| std::thread::sleep(Duration::from_millis(50)),
        );
        let handle = analyzer.spawn().unwrap();

        let accepted = (0..20)
            .filter(|_| handle.submit(frame_at(Instant::now())))
            .count();
        let stats = handle.shutdown();

        // One slot in the channel, so a burst cannot all be queued
        assert!(accepted < 20);
        assert_eq!(stats.frames_dropped as usize, 20 - accepted);
        assert_eq!(stats.frames_analyzed as usize, accepted);
    }
}
