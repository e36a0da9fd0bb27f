//! Acquisition state machine.
//!
//! `AcquisitionEngine` owns the device parameter surface and the buffer pool.
//! One mutex guards the state and the device handle; start, stop, parameter
//! changes and reconnect handling all run under it. Waiting for frames and
//! recycling them go straight to the pool, so a blocked worker never holds the
//! engine lock.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::device::{AutoFeature, DataStream, DeviceParameters, ParameterAccess, Roi};
use crate::error::{AcquisitionError, Result};
use crate::frame::{Frame, PixelFormat};
use crate::pool::{BufferPool, PoolStats};
use crate::supervisor::ReconnectEvent;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquisitionState {
    Idle,
    Running,
}

/// What `handle_reconnect` did to resynchronise with the device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconnectAction {
    SettingsReapplied,
    Reallocated,
    StreamingResumed,
    NoAction,
}

/// Settings applied by `open` and reapplied after resets and reconnects.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EngineOptions {
    /// Mirror the image vertically on the device.
    pub reverse_y: bool,
    /// Turn device-side exposure, white balance, gain and focus automation off.
    pub disable_auto_features: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            reverse_y: true,
            disable_auto_features: true,
        }
    }
}

struct EngineInner {
    device: Option<Box<dyn DeviceParameters>>,
    state: AcquisitionState,
    options: EngineOptions,
}

impl EngineInner {
    fn device(&mut self) -> Result<&mut dyn DeviceParameters> {
        match self.device.as_deref_mut() {
            Some(device) => Ok(device),
            None => Err(AcquisitionError::DeviceClosed),
        }
    }
}

pub struct AcquisitionEngine {
    inner: Mutex<EngineInner>,
    pool: BufferPool,
}

impl AcquisitionEngine {
    /// Wrap a device without touching its settings. The engine starts Idle.
    pub fn new(device: Box<dyn DeviceParameters>, stream: Arc<dyn DataStream>) -> Self {
        Self {
            inner: Mutex::new(EngineInner {
                device: Some(device),
                state: AcquisitionState::Idle,
                options: EngineOptions::default(),
            }),
            pool: BufferPool::new(stream),
        }
    }

    /// Wrap a device and bring it into a known state: a supported pixel format,
    /// the configured orientation, auto features off and reconnect enabled.
    pub fn open(
        device: Box<dyn DeviceParameters>,
        stream: Arc<dyn DataStream>,
        options: EngineOptions,
    ) -> Result<Self> {
        let engine = Self::new(device, stream);
        {
            let mut inner = engine.lock();
            inner.options = options;
            let device = inner.device()?;
            log::info!(
                "AcquisitionEngine: opening {} (serial {})",
                device.model_name(),
                device.serial_number()
            );

            let current = device.pixel_format()?;
            if current.is_packed() {
                let fallback = device
                    .available_pixel_formats()?
                    .into_iter()
                    .find(|format| format.is_bayer())
                    .ok_or_else(|| {
                        AcquisitionError::device(format!(
                            "{} is unsupported and no Bayer format is available",
                            current
                        ))
                    })?;
                log::info!(
                    "AcquisitionEngine: replacing packed format {} with {}",
                    current,
                    fallback
                );
                device.set_pixel_format(fallback)?;
            }

            engine.reapply_settings(&mut inner)?;
            if !inner.device()?.enable_reconnect()? {
                log::debug!("AcquisitionEngine: device has no transport reconnect");
            }
        }
        Ok(engine)
    }

    fn lock(&self) -> MutexGuard<'_, EngineInner> {
        // State transitions are single assignments after all fallible steps.
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> AcquisitionState {
        self.lock().state
    }

    pub fn is_running(&self) -> bool {
        self.state() == AcquisitionState::Running
    }

    pub fn options(&self) -> EngineOptions {
        self.lock().options
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    // ------------------------------------------------------------------------
    // State machine
    // ------------------------------------------------------------------------

    /// Idle → Running. No-op when already running.
    pub fn start(&self) -> Result<()> {
        let mut inner = self.lock();
        self.start_locked(&mut inner)
    }

    /// Running → Idle. No-op when idle.
    pub fn stop(&self) -> Result<()> {
        let mut inner = self.lock();
        self.stop_locked(&mut inner)
    }

    fn start_locked(&self, inner: &mut EngineInner) -> Result<()> {
        if inner.state == AcquisitionState::Running {
            return Ok(());
        }
        let device = inner.device()?;
        let payload = device.payload_size()?;
        let count = self.pool.min_required()?;
        self.pool.allocate(count, payload)?;

        if let Err(err) = device.set_transport_locked(true) {
            self.unwind_start(device, false);
            return Err(err);
        }
        if let Err(err) = self.pool.start_stream() {
            self.unwind_start(device, true);
            return Err(err);
        }
        if let Err(err) = device.begin_streaming() {
            if let Err(stop_err) = self.pool.stop_stream() {
                log::warn!("AcquisitionEngine: rollback stop failed: {}", stop_err);
            }
            self.unwind_start(device, true);
            return Err(err);
        }

        inner.state = AcquisitionState::Running;
        log::info!(
            "AcquisitionEngine: running with {} buffers of {} bytes",
            count,
            payload
        );
        Ok(())
    }

    fn unwind_start(&self, device: &mut dyn DeviceParameters, locked: bool) {
        if let Err(err) = self.pool.discard_in_flight() {
            log::warn!("AcquisitionEngine: rollback flush failed: {}", err);
        }
        if let Err(err) = self.pool.revoke_all() {
            log::warn!("AcquisitionEngine: rollback revoke failed: {}", err);
        }
        if locked {
            if let Err(err) = device.set_transport_locked(false) {
                log::warn!("AcquisitionEngine: rollback unlock failed: {}", err);
            }
        }
    }

    fn stop_locked(&self, inner: &mut EngineInner) -> Result<()> {
        if inner.state == AcquisitionState::Idle {
            return Ok(());
        }
        let mut first_err: Option<AcquisitionError> = None;
        let mut note = |step: &str, result: Result<()>| {
            if let Err(err) = result {
                log::warn!("AcquisitionEngine: {} failed during stop: {}", step, err);
                first_err.get_or_insert(err);
            }
        };

        match inner.device.as_deref_mut() {
            Some(device) => {
                note("end streaming", device.end_streaming());
                note("stop stream", self.pool.stop_stream());
                note("discard", self.pool.discard_in_flight());
                note("revoke", self.pool.revoke_all());
                note("unlock", device.set_transport_locked(false));
            }
            None => {
                note("stop stream", self.pool.stop_stream());
                note("discard", self.pool.discard_in_flight());
                note("revoke", self.pool.revoke_all());
            }
        }

        inner.state = AcquisitionState::Idle;
        log::info!("AcquisitionEngine: stopped");
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    // ------------------------------------------------------------------------
    // Frames
    // ------------------------------------------------------------------------

    pub fn next_frame(&self, timeout: Duration) -> Result<Frame> {
        self.pool.wait_for_filled(timeout)
    }

    pub fn recycle(&self, frame: Frame) -> Result<()> {
        self.pool.requeue(frame)
    }

    /// Release any thread blocked in `next_frame` with `Aborted`. Stays in
    /// effect until `rearm_wait`.
    pub fn cancel_wait(&self) {
        self.pool.cancel_wait();
    }

    pub fn rearm_wait(&self) {
        self.pool.rearm();
    }

    // ------------------------------------------------------------------------
    // Payload-affecting parameters
    // ------------------------------------------------------------------------

    /// Run `apply` with acquisition stopped, restarting if it was running.
    fn with_stream_paused<F>(&self, inner: &mut EngineInner, apply: F) -> Result<()>
    where
        F: FnOnce(&mut dyn DeviceParameters) -> Result<()>,
    {
        let was_running = inner.state == AcquisitionState::Running;
        self.stop_locked(inner)?;
        let applied = apply(inner.device()?);
        if was_running {
            self.start_locked(inner)?;
        }
        applied
    }

    pub fn pixel_format(&self) -> Result<PixelFormat> {
        self.lock().device()?.pixel_format()
    }

    pub fn set_pixel_format(&self, format: PixelFormat) -> Result<()> {
        if format.is_packed() {
            return Err(AcquisitionError::InvalidState(
                "packed pixel formats cannot be acquired",
            ));
        }
        let mut inner = self.lock();
        self.with_stream_paused(&mut inner, |device| device.set_pixel_format(format))?;
        log::info!("AcquisitionEngine: pixel format set to {}", format);
        Ok(())
    }

    /// Formats the device offers, without the packed formats.
    pub fn available_pixel_formats(&self) -> Result<Vec<PixelFormat>> {
        let formats = self.lock().device()?.available_pixel_formats()?;
        Ok(formats.into_iter().filter(|f| !f.is_packed()).collect())
    }

    pub fn roi(&self) -> Result<Roi> {
        self.lock().device()?.roi()
    }

    pub fn set_roi(&self, roi: Roi) -> Result<()> {
        let mut inner = self.lock();
        self.with_stream_paused(&mut inner, |device| device.set_roi(roi))
    }

    pub fn payload_size(&self) -> Result<usize> {
        self.lock().device()?.payload_size()
    }

    /// Stop, load the device defaults, reapply orientation and auto features,
    /// then start.
    pub fn reset_to_default(&self) -> Result<()> {
        let mut inner = self.lock();
        self.stop_locked(&mut inner)?;
        inner.device()?.load_default_settings()?;
        self.reapply_settings(&mut inner)?;
        self.start_locked(&mut inner)?;
        log::info!("AcquisitionEngine: device settings reset to default");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Plain parameters
    // ------------------------------------------------------------------------

    /// Serialized access to parameters that do not affect the payload:
    /// exposure, frame rate, gain and focus.
    pub fn with_parameters<R, F>(&self, access: F) -> Result<R>
    where
        F: FnOnce(&mut dyn DeviceParameters) -> Result<R>,
    {
        let mut inner = self.lock();
        access(inner.device()?)
    }

    pub fn set_reverse_y(&self, enabled: bool) -> Result<()> {
        let mut inner = self.lock();
        inner.options.reverse_y = enabled;
        self.apply_orientation_locked(&mut inner)
    }

    pub fn apply_orientation(&self) -> Result<()> {
        let mut inner = self.lock();
        self.apply_orientation_locked(&mut inner)
    }

    fn apply_orientation_locked(&self, inner: &mut EngineInner) -> Result<()> {
        let reverse_y = inner.options.reverse_y;
        let access = inner.device()?.reverse_y_access();
        match access {
            ParameterAccess::Absent => Ok(()),
            ParameterAccess::Writable => inner.device()?.set_reverse_y(reverse_y),
            ParameterAccess::ReadOnly if inner.state == AcquisitionState::Running => {
                log::debug!("AcquisitionEngine: ReverseY locked while running, restarting");
                self.with_stream_paused(inner, |device| device.set_reverse_y(reverse_y))
            }
            ParameterAccess::ReadOnly => {
                log::warn!("AcquisitionEngine: ReverseY is read-only, orientation unchanged");
                Ok(())
            }
        }
    }

    pub fn disable_auto_features(&self) -> Result<()> {
        let mut inner = self.lock();
        Self::disable_auto_features_locked(inner.device()?);
        Ok(())
    }

    fn disable_auto_features_locked(device: &mut dyn DeviceParameters) {
        for feature in AutoFeature::ALL {
            if !device.supports_auto_feature(feature) {
                continue;
            }
            if let Err(err) = device.set_auto_feature(feature, false) {
                log::debug!(
                    "AcquisitionEngine: could not disable {:?} auto: {}",
                    feature,
                    err
                );
            }
        }
    }

    fn reapply_settings(&self, inner: &mut EngineInner) -> Result<()> {
        self.apply_orientation_locked(inner)?;
        if inner.options.disable_auto_features {
            Self::disable_auto_features_locked(inner.device()?);
        }
        Ok(())
    }

    /// Clear ReverseY when it is writable.
    pub fn restore_orientation(&self) -> Result<()> {
        let mut inner = self.lock();
        Self::restore_orientation_locked(inner.device()?)
    }

    fn restore_orientation_locked(device: &mut dyn DeviceParameters) -> Result<()> {
        if device.reverse_y_access() == ParameterAccess::Writable {
            device.set_reverse_y(false)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Reconnect
    // ------------------------------------------------------------------------

    /// Resynchronise with a device that came back after a disconnect.
    pub fn handle_reconnect(&self, event: ReconnectEvent) -> Result<ReconnectAction> {
        let mut inner = self.lock();

        if event.successful || inner.state == AcquisitionState::Idle {
            self.reapply_settings(&mut inner)?;
            return Ok(ReconnectAction::SettingsReapplied);
        }

        let payload = inner.device()?.payload_size()?;
        if self.pool.buffer_size() != Some(payload) {
            log::info!(
                "AcquisitionEngine: payload changed to {} bytes, reallocating",
                payload
            );
            self.stop_locked(&mut inner)?;
            self.reapply_settings(&mut inner)?;
            self.start_locked(&mut inner)?;
            return Ok(ReconnectAction::Reallocated);
        }

        if !event.remote_acquisition_running {
            inner.device()?.begin_streaming()?;
            log::info!("AcquisitionEngine: device streaming resumed");
            return Ok(ReconnectAction::StreamingResumed);
        }

        Ok(ReconnectAction::NoAction)
    }

    // ------------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------------

    /// Stop, restore orientation and release the device. Later operations fail
    /// with `DeviceClosed`.
    pub fn close(&self) -> Result<()> {
        let mut inner = self.lock();
        if inner.device.is_none() {
            return Ok(());
        }
        // ReverseY may be read-only while the device streams.
        let stopped = self.stop_locked(&mut inner);
        let restored = inner.device().and_then(Self::restore_orientation_locked);
        if let Err(err) = &restored {
            log::warn!("AcquisitionEngine: restoring orientation failed: {}", err);
        }
        inner.device = None;
        log::info!("AcquisitionEngine: device closed");
        stopped.and(restored)
    }
}
