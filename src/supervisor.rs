//! Reconnect supervision.
//!
//! Device backends report reconnects through a `ReconnectNotifier`. The
//! supervisor thread drains those messages in order and lets the engine
//! resynchronise under its own lock, so a reconnect never races a start, stop
//! or parameter change.

use anyhow::{anyhow, Result};
use crossbeam_channel::{unbounded, Sender};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::engine::AcquisitionEngine;
use crate::report::IncidentReporter;

/// A device came back after losing its connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconnectEvent {
    /// The transport restored the previous state on its own.
    pub successful: bool,
    /// The device is streaming after the reconnect.
    pub remote_acquisition_running: bool,
}

enum Message {
    Reconnect(ReconnectEvent),
    Shutdown,
}

#[derive(Clone)]
pub struct ReconnectNotifier {
    tx: Sender<Message>,
}

impl ReconnectNotifier {
    /// Queue an event. Returns false once the supervisor has stopped.
    pub fn notify(&self, event: ReconnectEvent) -> bool {
        self.tx.send(Message::Reconnect(event)).is_ok()
    }
}

#[derive(Default)]
struct Tally {
    handled: AtomicU64,
    failed: AtomicU64,
}

pub struct ReconnectSupervisor {
    tx: Sender<Message>,
    tally: Arc<Tally>,
    join: Option<JoinHandle<()>>,
}

impl ReconnectSupervisor {
    pub fn spawn(engine: Arc<AcquisitionEngine>, report_window: Duration) -> Result<Self> {
        let (tx, rx) = unbounded();
        let tally = Arc::new(Tally::default());
        let thread_tally = tally.clone();
        let join = std::thread::Builder::new()
            .name("acq-reconnect".to_string())
            .spawn(move || {
                let mut reporter = IncidentReporter::new("ReconnectSupervisor", report_window);
                for message in rx.iter() {
                    let event = match message {
                        Message::Reconnect(event) => event,
                        Message::Shutdown => break,
                    };
                    match engine.handle_reconnect(event) {
                        Ok(action) => {
                            thread_tally.handled.fetch_add(1, Ordering::Relaxed);
                            log::info!("ReconnectSupervisor: {:?} -> {:?}", event, action);
                        }
                        Err(err) => {
                            thread_tally.failed.fetch_add(1, Ordering::Relaxed);
                            reporter.report("reconnect", &err);
                        }
                    }
                }
            })?;
        Ok(Self {
            tx,
            tally,
            join: Some(join),
        })
    }

    pub fn notifier(&self) -> ReconnectNotifier {
        ReconnectNotifier {
            tx: self.tx.clone(),
        }
    }

    /// Events resolved by the engine.
    pub fn handled(&self) -> u64 {
        self.tally.handled.load(Ordering::Relaxed)
    }

    /// Events whose handling failed.
    pub fn failed(&self) -> u64 {
        self.tally.failed.load(Ordering::Relaxed)
    }

    /// Process queued events, then stop the thread.
    pub fn stop(mut self) -> Result<()> {
        let _ = self.tx.send(Message::Shutdown);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("reconnect supervisor thread panicked"))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{ReconnectOutcome, SyntheticCamera, SyntheticConfig};
    use crate::engine::EngineOptions;

    #[test]
    fn events_are_handled_in_order_before_stop() {
        let camera = SyntheticCamera::open(SyntheticConfig::default()).unwrap();
        let engine = Arc::new(
            AcquisitionEngine::open(
                Box::new(camera.clone()),
                Arc::new(camera.clone()),
                EngineOptions::default(),
            )
            .unwrap(),
        );
        engine.start().unwrap();
        let supervisor = ReconnectSupervisor::spawn(engine.clone(), Duration::from_secs(1)).unwrap();
        let notifier = supervisor.notifier();

        camera.simulate_disconnect();
        assert!(notifier.notify(camera.simulate_reconnect(ReconnectOutcome::Rebooted { roi: None })));
        assert!(notifier.notify(ReconnectEvent {
            successful: false,
            remote_acquisition_running: true,
        }));

        supervisor.stop().unwrap();
        assert_eq!(camera.stats().begin_streaming_commands, 2);
        assert!(camera.is_device_streaming());
        assert!(!notifier.notify(ReconnectEvent {
            successful: true,
            remote_acquisition_running: true,
        }));
    }

    #[test]
    fn failures_are_counted_not_fatal() {
        let camera = SyntheticCamera::open(SyntheticConfig::default()).unwrap();
        let engine = Arc::new(
            AcquisitionEngine::open(
                Box::new(camera.clone()),
                Arc::new(camera.clone()),
                EngineOptions::default(),
            )
            .unwrap(),
        );
        engine.start().unwrap();
        camera.simulate_disconnect();
        let supervisor = ReconnectSupervisor::spawn(engine, Duration::from_secs(1)).unwrap();
        supervisor.notifier().notify(ReconnectEvent {
            successful: false,
            remote_acquisition_running: false,
        });
        supervisor.notifier().notify(ReconnectEvent {
            successful: false,
            remote_acquisition_running: false,
        });
        while supervisor.handled() + supervisor.failed() < 2 {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(supervisor.failed(), 2);
        supervisor.stop().unwrap();
    }
}
