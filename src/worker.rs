//! Background processing loop: wait, transform, recycle, publish.
//!
//! Every frame taken from the engine is recycled exactly once, on every path.
//! The worker never starts or stops acquisition; it exits when the wait is
//! cancelled.

use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::engine::AcquisitionEngine;
use crate::error::AcquisitionError;
use crate::frame::Frame;
use crate::relay::{FrameRelay, PublishOutcome, RelayPolicy};
use crate::report::{IncidentReporter, DEFAULT_REPORT_WINDOW};
use crate::transform::Transform;

pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_millis(1000);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorkerOptions {
    pub wait_timeout: Duration,
    pub report_window: Duration,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
            report_window: DEFAULT_REPORT_WINDOW,
        }
    }
}

/// Counters since the worker was spawned.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// Frames transformed successfully.
    pub processed: u64,
    /// Results stored in the relay, including ones that displaced an occupant.
    pub published: u64,
    /// Results that displaced an older one under `ReplaceOldest`.
    pub replaced: u64,
    /// Results handed back because the relay was full.
    pub rejected: u64,
    /// Frames recycled unprocessed because the relay was occupied.
    pub shed: u64,
    pub incomplete: u64,
    pub transform_failures: u64,
    pub timeouts: u64,
    pub errors: u64,
}

#[derive(Default)]
struct Counters {
    processed: AtomicU64,
    published: AtomicU64,
    replaced: AtomicU64,
    rejected: AtomicU64,
    shed: AtomicU64,
    incomplete: AtomicU64,
    transform_failures: AtomicU64,
    timeouts: AtomicU64,
    errors: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> WorkerStats {
        WorkerStats {
            processed: self.processed.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            replaced: self.replaced.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            shed: self.shed.load(Ordering::Relaxed),
            incomplete: self.incomplete.load(Ordering::Relaxed),
            transform_failures: self.transform_failures.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    Continue,
    Exit,
}

/// One worker's loop state. `step` runs a single iteration so the loop can be
/// driven by hand.
pub struct Pipeline<T: Transform> {
    engine: Arc<AcquisitionEngine>,
    transform: T,
    relay: FrameRelay,
    wait_timeout: Duration,
    reporter: IncidentReporter,
    counters: Arc<Counters>,
}

impl<T: Transform> Pipeline<T> {
    pub fn new(
        engine: Arc<AcquisitionEngine>,
        transform: T,
        relay: FrameRelay,
        options: WorkerOptions,
    ) -> Self {
        Self {
            engine,
            transform,
            relay,
            wait_timeout: options.wait_timeout,
            reporter: IncidentReporter::new("ProcessingWorker", options.report_window),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn stats(&self) -> WorkerStats {
        self.counters.snapshot()
    }

    pub fn step(&mut self) -> Step {
        let frame = match self.engine.next_frame(self.wait_timeout) {
            Ok(frame) => frame,
            Err(AcquisitionError::Timeout) => {
                Counters::bump(&self.counters.timeouts);
                return Step::Continue;
            }
            Err(AcquisitionError::Aborted) => return Step::Exit,
            Err(err) => {
                Counters::bump(&self.counters.errors);
                self.reporter.report("wait", &err);
                return Step::Continue;
            }
        };

        if frame.is_incomplete() {
            Counters::bump(&self.counters.incomplete);
            log::debug!("ProcessingWorker: frame {} incomplete", frame.frame_id());
            self.recycle(frame);
            return Step::Continue;
        }

        if self.relay.policy() == RelayPolicy::RejectNewest && self.relay.is_occupied() {
            Counters::bump(&self.counters.shed);
            self.recycle(frame);
            return Step::Continue;
        }

        let result = self.transform.process(&frame);
        self.recycle(frame);

        let image = match result {
            Ok(image) => image,
            Err(err) => {
                Counters::bump(&self.counters.transform_failures);
                self.reporter.report("transform", &err);
                return Step::Continue;
            }
        };
        Counters::bump(&self.counters.processed);

        match self.relay.try_publish(image) {
            PublishOutcome::Stored => Counters::bump(&self.counters.published),
            PublishOutcome::Replaced(_) => {
                Counters::bump(&self.counters.published);
                Counters::bump(&self.counters.replaced);
            }
            PublishOutcome::Rejected(_) => Counters::bump(&self.counters.rejected),
        }
        Step::Continue
    }

    fn recycle(&mut self, frame: Frame) {
        if let Err(err) = self.engine.recycle(frame) {
            Counters::bump(&self.counters.errors);
            self.reporter.report("recycle", &err);
        }
    }

    pub fn run(mut self) -> WorkerStats {
        while self.step() == Step::Continue {}
        let stats = self.stats();
        log::info!(
            "ProcessingWorker: exiting after {} processed, {} published",
            stats.processed,
            stats.published
        );
        stats
    }
}

/// Handle to the processing thread.
pub struct ProcessingWorker {
    counters: Arc<Counters>,
    join: Option<JoinHandle<WorkerStats>>,
}

impl ProcessingWorker {
    /// Rearm the engine's wait and start the loop on its own thread.
    pub fn spawn<T>(
        engine: Arc<AcquisitionEngine>,
        transform: T,
        relay: FrameRelay,
        options: WorkerOptions,
    ) -> Result<Self>
    where
        T: Transform + 'static,
    {
        engine.rearm_wait();
        let pipeline = Pipeline::new(engine, transform, relay, options);
        let counters = pipeline.counters.clone();
        let join = std::thread::Builder::new()
            .name("acq-worker".to_string())
            .spawn(move || pipeline.run())?;
        Ok(Self {
            counters,
            join: Some(join),
        })
    }

    pub fn stats(&self) -> WorkerStats {
        self.counters.snapshot()
    }

    pub fn is_finished(&self) -> bool {
        self.join
            .as_ref()
            .map(|join| join.is_finished())
            .unwrap_or(true)
    }

    /// Wait for the thread to exit. The wait must have been cancelled first.
    pub fn join(mut self) -> Result<WorkerStats> {
        match self.join.take() {
            Some(join) => join
                .join()
                .map_err(|_| anyhow!("processing worker thread panicked")),
            None => Ok(self.stats()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{SyntheticCamera, SyntheticConfig};
    use crate::engine::EngineOptions;
    use crate::error::TransformError;
    use crate::frame::{PixelFormat, ProcessedImage, Size};
    use crate::transform::PixelConverter;

    fn running_engine() -> (Arc<AcquisitionEngine>, SyntheticCamera) {
        let camera = SyntheticCamera::open(SyntheticConfig {
            sensor: Size::new(8, 4),
            ..SyntheticConfig::default()
        })
        .unwrap();
        let engine = AcquisitionEngine::open(
            Box::new(camera.clone()),
            Arc::new(camera.clone()),
            EngineOptions::default(),
        )
        .unwrap();
        engine.start().unwrap();
        (Arc::new(engine), camera)
    }

    fn options() -> WorkerOptions {
        WorkerOptions {
            wait_timeout: Duration::from_millis(50),
            ..WorkerOptions::default()
        }
    }

    #[test]
    fn complete_frame_is_transformed_recycled_and_published() {
        let (engine, camera) = running_engine();
        let relay = FrameRelay::default();
        let mut pipeline = Pipeline::new(engine, PixelConverter::default(), relay.clone(), options());

        camera.emit_frame();
        assert_eq!(pipeline.step(), Step::Continue);
        let image = relay.try_take().unwrap();
        assert_eq!(image.source_pixel_format, PixelFormat::BayerRG8);
        assert_eq!(image.frame_id, 1);
        assert_eq!(camera.stats().held_outside, 0);
        assert_eq!(pipeline.stats().published, 1);
    }

    #[test]
    fn incomplete_frame_is_recycled_without_transform() {
        let (engine, camera) = running_engine();
        let relay = FrameRelay::default();
        let mut calls = 0u32;
        let transform = |_: &Frame| -> std::result::Result<ProcessedImage, TransformError> {
            calls += 1;
            Err(TransformError::Failed("unexpected".to_string()))
        };
        let mut pipeline = Pipeline::new(engine, transform, relay.clone(), options());

        camera.emit_incomplete_frame();
        pipeline.step();
        let stats = pipeline.stats();
        assert_eq!(stats.incomplete, 1);
        assert_eq!(stats.transform_failures, 0);
        assert!(relay.try_take().is_none());
        assert_eq!(camera.stats().held_outside, 0);
        drop(pipeline);
        assert_eq!(calls, 0);
    }

    #[test]
    fn occupied_relay_sheds_before_transform() {
        let (engine, camera) = running_engine();
        let relay = FrameRelay::default();
        let mut pipeline = Pipeline::new(engine, PixelConverter::default(), relay.clone(), options());

        camera.emit_frame();
        pipeline.step();
        camera.emit_frame();
        pipeline.step();
        let stats = pipeline.stats();
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.shed, 1);
        assert_eq!(relay.try_take().unwrap().frame_id, 1);
        assert_eq!(camera.stats().held_outside, 0);
    }

    #[test]
    fn transform_failure_still_recycles() {
        let (engine, camera) = running_engine();
        let relay = FrameRelay::default();
        let transform = |_: &Frame| -> std::result::Result<ProcessedImage, TransformError> {
            Err(TransformError::Failed("boom".to_string()))
        };
        let mut pipeline = Pipeline::new(engine, transform, relay.clone(), options());

        camera.emit_frame();
        pipeline.step();
        assert_eq!(pipeline.stats().transform_failures, 1);
        assert!(!relay.is_occupied());
        assert_eq!(camera.stats().held_outside, 0);
    }

    #[test]
    fn timeout_continues_and_cancel_exits() {
        let (engine, _camera) = running_engine();
        let mut pipeline = Pipeline::new(
            engine.clone(),
            PixelConverter::default(),
            FrameRelay::default(),
            options(),
        );
        assert_eq!(pipeline.step(), Step::Continue);
        assert_eq!(pipeline.stats().timeouts, 1);
        engine.cancel_wait();
        assert_eq!(pipeline.step(), Step::Exit);
    }

    #[test]
    fn spawned_worker_exits_promptly_on_cancel() {
        let (engine, _camera) = running_engine();
        let worker = ProcessingWorker::spawn(
            engine.clone(),
            PixelConverter::default(),
            FrameRelay::default(),
            WorkerOptions::default(),
        )
        .unwrap();
        std::thread::sleep(Duration::from_millis(20));
        let started = std::time::Instant::now();
        engine.cancel_wait();
        worker.join().unwrap();
        assert!(started.elapsed() < Duration::from_millis(500));
    }
}
