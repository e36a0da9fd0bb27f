//! Wiring of engine, worker, relay and reconnect supervisor.

use anyhow::{anyhow, Result};
use std::sync::Arc;

use crate::engine::AcquisitionEngine;
use crate::frame::ProcessedImage;
use crate::relay::{FrameRelay, RelayPolicy};
use crate::supervisor::{ReconnectNotifier, ReconnectSupervisor};
use crate::transform::Transform;
use crate::worker::{ProcessingWorker, WorkerOptions, WorkerStats};

/// A running acquisition pipeline.
///
/// `shutdown` tears down in a fixed order: stop the reconnect supervisor so
/// nothing restarts the stream, cancel the frame wait, stop acquisition, join
/// the worker, close the device. Dropping the session does the same.
pub struct AcquisitionSession {
    engine: Arc<AcquisitionEngine>,
    relay: FrameRelay,
    worker: Option<ProcessingWorker>,
    supervisor: Option<ReconnectSupervisor>,
}

impl AcquisitionSession {
    pub fn start<T>(
        engine: AcquisitionEngine,
        transform: T,
        policy: RelayPolicy,
        options: WorkerOptions,
    ) -> Result<Self>
    where
        T: Transform + 'static,
    {
        let engine = Arc::new(engine);
        let relay = FrameRelay::new(policy);
        let supervisor = ReconnectSupervisor::spawn(engine.clone(), options.report_window)?;
        let worker = ProcessingWorker::spawn(engine.clone(), transform, relay.clone(), options)?;
        let mut session = Self {
            engine,
            relay,
            worker: Some(worker),
            supervisor: Some(supervisor),
        };
        if let Err(err) = session.engine.start() {
            if let Err(teardown) = session.teardown() {
                log::warn!("AcquisitionSession: teardown after failed start: {}", teardown);
            }
            return Err(err.into());
        }
        log::info!("AcquisitionSession: started");
        Ok(session)
    }

    pub fn engine(&self) -> &Arc<AcquisitionEngine> {
        &self.engine
    }

    pub fn relay(&self) -> &FrameRelay {
        &self.relay
    }

    /// Sender for device backends to report reconnects.
    pub fn notifier(&self) -> Option<ReconnectNotifier> {
        self.supervisor.as_ref().map(ReconnectSupervisor::notifier)
    }

    /// Take the latest processed image, if one is waiting.
    pub fn take_latest(&self) -> Option<ProcessedImage> {
        self.relay.try_take()
    }

    pub fn worker_stats(&self) -> WorkerStats {
        self.worker
            .as_ref()
            .map(ProcessingWorker::stats)
            .unwrap_or_default()
    }

    pub fn shutdown(mut self) -> Result<WorkerStats> {
        self.teardown()
    }

    fn teardown(&mut self) -> Result<WorkerStats> {
        let mut first_err: Option<anyhow::Error> = None;

        if let Some(supervisor) = self.supervisor.take() {
            if let Err(err) = supervisor.stop() {
                log::warn!("AcquisitionSession: {}", err);
                first_err.get_or_insert(err);
            }
        }

        self.engine.cancel_wait();
        if let Err(err) = self.engine.stop() {
            log::warn!("AcquisitionSession: stop failed: {}", err);
            first_err.get_or_insert(err.into());
        }

        let mut stats = WorkerStats::default();
        if let Some(worker) = self.worker.take() {
            match worker.join() {
                Ok(final_stats) => stats = final_stats,
                Err(err) => {
                    log::warn!("AcquisitionSession: {}", err);
                    first_err.get_or_insert(err);
                }
            }
        }

        if let Err(err) = self.engine.close() {
            log::warn!("AcquisitionSession: close failed: {}", err);
            first_err.get_or_insert(anyhow!(err));
        }

        log::info!("AcquisitionSession: shut down");
        match first_err {
            Some(err) => Err(err),
            None => Ok(stats),
        }
    }
}

impl Drop for AcquisitionSession {
    fn drop(&mut self) {
        if self.worker.is_none() && self.supervisor.is_none() {
            return;
        }
        if let Err(err) = self.teardown() {
            log::error!("AcquisitionSession: teardown on drop failed: {}", err);
        }
    }
}
