//! Synthetic camera backend for `stub://` devices and tests.
//!
//! One `SyntheticCamera` implements both the device parameter surface and the
//! host data stream over shared state, so tests can drive frames by hand
//! (`emit_frame`, `emit_incomplete_frame`) or from a generator thread, and can
//! simulate disconnects, reboots and allocation limits.
//!
//! The transport side keeps its own buffer accounting: queueing a buffer that is
//! already queued is refused and counted in `SyntheticStats::double_queues`.

use rand::Rng;
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::{
    AutoFeature, DataStream, DeviceParameters, FilledBuffer, GainChannel, ParameterAccess, Range,
    Roi,
};
use crate::error::{AcquisitionError, Result};
use crate::frame::{FrameMeta, PixelFormat, Size};
use crate::pool::BufferId;
use crate::supervisor::ReconnectEvent;

const DEFAULT_EXPOSURE_US: f64 = 10_000.0;
const DEFAULT_FRAME_RATE: f64 = 30.0;

/// Configuration for a synthetic camera.
#[derive(Clone, Debug)]
pub struct SyntheticConfig {
    /// Device locator, must start with `stub://`.
    pub device: String,
    pub model: String,
    pub serial: String,
    /// Full sensor size; the default ROI covers it.
    pub sensor: Size,
    pub pixel_format: PixelFormat,
    /// Minimum announced buffers reported by the transport.
    pub min_buffers: usize,
    /// Transport refuses to announce more buffers than this.
    pub max_buffers: Option<usize>,
    pub has_focus_stepper: bool,
    pub reverse_y: ParameterAccess,
    /// ReverseY becomes read-only while the device streams.
    pub reverse_y_locked_while_streaming: bool,
    /// Emission rate used by `spawn_generator`.
    pub fps: u32,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            device: "stub://camera".to_string(),
            model: "SYN-1".to_string(),
            serial: "0000001".to_string(),
            sensor: Size::new(640, 480),
            pixel_format: PixelFormat::BayerRG8,
            min_buffers: 3,
            max_buffers: None,
            has_focus_stepper: true,
            reverse_y: ParameterAccess::Writable,
            reverse_y_locked_while_streaming: false,
            fps: 30,
        }
    }
}

/// How a simulated reconnect plays out.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconnectOutcome {
    /// Transport-level reconnect restored the previous state.
    Restored,
    /// Reconnect needs host action but the device kept streaming.
    Resumed,
    /// Device rebooted into defaults and is idle. `roi` overrides the default
    /// region so the payload size can change across the reboot.
    Rebooted { roi: Option<Roi> },
}

/// Transport and device counters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyntheticStats {
    pub announced: usize,
    pub queued: usize,
    pub finished: usize,
    /// Announced buffers whose memory is outside the transport (pool or callers).
    pub held_outside: usize,
    pub total_announced: u64,
    pub begin_streaming_commands: u64,
    pub end_streaming_commands: u64,
    pub double_queues: u64,
    pub frames_emitted: u64,
}

#[derive(Clone)]
pub struct SyntheticCamera {
    shared: Arc<Shared>,
}

struct Shared {
    state: Mutex<CameraState>,
    finished: Condvar,
}

struct CameraState {
    config: SyntheticConfig,
    connected: bool,
    // Device side.
    pixel_format: PixelFormat,
    roi: Roi,
    exposure_us: f64,
    frame_rate: f64,
    gains: [f64; 4],
    focus: i64,
    reverse_y: bool,
    auto_enabled: HashSet<AutoFeature>,
    transport_locked: bool,
    device_streaming: bool,
    reconnect_enabled: bool,
    frame_counter: u64,
    // Transport side.
    next_buffer: u64,
    announced: BTreeSet<BufferId>,
    queued: VecDeque<(BufferId, Vec<u8>)>,
    finished: VecDeque<FilledBuffer>,
    grabbing: bool,
    killed: bool,
    stats: SyntheticStats,
}

impl CameraState {
    fn new(config: SyntheticConfig) -> Self {
        let mut state = Self {
            pixel_format: config.pixel_format,
            roi: full_roi(config.sensor),
            config,
            connected: true,
            exposure_us: DEFAULT_EXPOSURE_US,
            frame_rate: DEFAULT_FRAME_RATE,
            gains: [1.0; 4],
            focus: 0,
            reverse_y: false,
            auto_enabled: HashSet::new(),
            transport_locked: false,
            device_streaming: false,
            reconnect_enabled: false,
            frame_counter: 0,
            next_buffer: 0,
            announced: BTreeSet::new(),
            queued: VecDeque::new(),
            finished: VecDeque::new(),
            grabbing: false,
            killed: false,
            stats: SyntheticStats::default(),
        };
        state.enable_default_autos();
        state
    }

    fn enable_default_autos(&mut self) {
        self.auto_enabled = AutoFeature::ALL
            .into_iter()
            .filter(|feature| self.supports(*feature))
            .collect();
    }

    fn supports(&self, feature: AutoFeature) -> bool {
        feature != AutoFeature::Focus || self.config.has_focus_stepper
    }

    fn load_defaults(&mut self) {
        self.pixel_format = self.config.pixel_format;
        self.roi = full_roi(self.config.sensor);
        self.exposure_us = DEFAULT_EXPOSURE_US;
        self.frame_rate = DEFAULT_FRAME_RATE;
        self.gains = [1.0; 4];
        self.reverse_y = false;
        self.enable_default_autos();
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.connected {
            Ok(())
        } else {
            Err(AcquisitionError::device(format!(
                "{} is disconnected",
                self.config.device
            )))
        }
    }

    fn ensure_unlocked(&self, parameter: &str) -> Result<()> {
        if self.transport_locked {
            return Err(AcquisitionError::device(format!(
                "{} is locked while transport parameters are locked",
                parameter
            )));
        }
        Ok(())
    }

    fn payload_size(&self) -> usize {
        self.pixel_format.payload_size(self.roi.size())
    }

    fn reverse_y_access(&self) -> ParameterAccess {
        match self.config.reverse_y {
            ParameterAccess::Writable
                if self.config.reverse_y_locked_while_streaming && self.device_streaming =>
            {
                ParameterAccess::ReadOnly
            }
            access => access,
        }
    }
}

fn full_roi(sensor: Size) -> Roi {
    Roi {
        offset_x: 0,
        offset_y: 0,
        width: sensor.width,
        height: sensor.height,
    }
}

fn gain_index(channel: GainChannel) -> usize {
    match channel {
        GainChannel::Master => 0,
        GainChannel::Red => 1,
        GainChannel::Green => 2,
        GainChannel::Blue => 3,
    }
}

impl SyntheticCamera {
    pub fn open(config: SyntheticConfig) -> Result<Self> {
        if !config.device.starts_with("stub://") {
            return Err(AcquisitionError::device(format!(
                "synthetic camera requires a stub:// device, got {}",
                config.device
            )));
        }
        log::info!(
            "SyntheticCamera: opened {} ({} {})",
            config.device,
            config.model,
            config.sensor
        );
        Ok(Self {
            shared: Arc::new(Shared {
                state: Mutex::new(CameraState::new(config)),
                finished: Condvar::new(),
            }),
        })
    }

    fn state(&self) -> MutexGuard<'_, CameraState> {
        // Counters and queues stay consistent across a panicking holder.
        self.shared
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Complete the next queued buffer with a full frame.
    pub fn emit_frame(&self) -> bool {
        self.emit(false)
    }

    /// Complete the next queued buffer with a partially received frame.
    pub fn emit_incomplete_frame(&self) -> bool {
        self.emit(true)
    }

    fn emit(&self, incomplete: bool) -> bool {
        let mut state = self.state();
        if !(state.connected && state.device_streaming && state.grabbing) {
            return false;
        }
        let Some((id, mut memory)) = state.queued.pop_front() else {
            return false;
        };
        state.frame_counter += 1;
        state.stats.frames_emitted += 1;

        let payload = state.payload_size();
        // A buffer smaller than the payload can only hold part of the frame.
        let truncated = memory.len() < payload;
        let filled = if incomplete {
            memory.len().min(payload) / 2
        } else {
            memory.len().min(payload)
        };
        let seed = state.frame_counter;
        let mut rng = rand::thread_rng();
        for (i, byte) in memory[..filled].iter_mut().enumerate() {
            let pattern = (i as u64 + seed) % 256;
            *byte = (pattern as u8) ^ (rng.gen::<u8>() & 0x03);
        }

        let meta = FrameMeta {
            pixel_format: state.pixel_format,
            size: state.roi.size(),
            frame_id: state.frame_counter,
            incomplete: incomplete || truncated,
        };
        state.finished.push_back(FilledBuffer { id, memory, meta });
        drop(state);
        self.shared.finished.notify_all();
        true
    }

    /// Emit frames at the configured rate until the generator is stopped.
    pub fn spawn_generator(&self) -> SyntheticGenerator {
        let fps = self.state().config.fps.max(1);
        let interval = Duration::from_secs_f64(1.0 / fps as f64);
        let stop = Arc::new(AtomicBool::new(false));
        let stop_thread = stop.clone();
        let camera = self.clone();
        let join = std::thread::spawn(move || {
            while !stop_thread.load(Ordering::SeqCst) {
                let started = Instant::now();
                camera.emit_frame();
                if let Some(rest) = interval.checked_sub(started.elapsed()) {
                    std::thread::sleep(rest);
                }
            }
        });
        SyntheticGenerator {
            stop,
            join: Some(join),
        }
    }

    pub fn simulate_disconnect(&self) {
        let mut state = self.state();
        state.connected = false;
        log::info!("SyntheticCamera: {} disconnected", state.config.device);
    }

    /// Bring the device back and describe the reconnect to the host.
    pub fn simulate_reconnect(&self, outcome: ReconnectOutcome) -> ReconnectEvent {
        let mut state = self.state();
        state.connected = true;
        let successful = match outcome {
            ReconnectOutcome::Restored => true,
            ReconnectOutcome::Resumed => false,
            ReconnectOutcome::Rebooted { roi } => {
                state.transport_locked = false;
                state.device_streaming = false;
                state.load_defaults();
                if let Some(roi) = roi {
                    state.roi = roi;
                }
                false
            }
        };
        log::info!(
            "SyntheticCamera: {} reconnected ({:?})",
            state.config.device,
            outcome
        );
        ReconnectEvent {
            successful,
            remote_acquisition_running: state.device_streaming,
        }
    }

    pub fn stats(&self) -> SyntheticStats {
        let state = self.state();
        let mut stats = state.stats.clone();
        stats.announced = state.announced.len();
        stats.queued = state.queued.len();
        stats.finished = state.finished.len();
        stats.held_outside = stats
            .announced
            .saturating_sub(stats.queued + stats.finished);
        stats
    }

    pub fn is_device_streaming(&self) -> bool {
        self.state().device_streaming
    }

    pub fn is_transport_locked(&self) -> bool {
        self.state().transport_locked
    }

    pub fn reverse_y(&self) -> bool {
        self.state().reverse_y
    }

    pub fn auto_feature_enabled(&self, feature: AutoFeature) -> bool {
        self.state().auto_enabled.contains(&feature)
    }

    pub fn reconnect_enabled(&self) -> bool {
        self.state().reconnect_enabled
    }
}

/// Handle to a frame generator thread. Stops on drop.
pub struct SyntheticGenerator {
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl SyntheticGenerator {
    pub fn stop(mut self) {
        self.halt();
    }

    fn halt(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                log::error!("SyntheticCamera: generator thread panicked");
            }
        }
    }
}

impl Drop for SyntheticGenerator {
    fn drop(&mut self) {
        self.halt();
    }
}

// ----------------------------------------------------------------------------
// Device parameter surface
// ----------------------------------------------------------------------------

impl DeviceParameters for SyntheticCamera {
    fn model_name(&self) -> String {
        self.state().config.model.clone()
    }

    fn serial_number(&self) -> String {
        self.state().config.serial.clone()
    }

    fn payload_size(&self) -> Result<usize> {
        let state = self.state();
        state.ensure_connected()?;
        Ok(state.payload_size())
    }

    fn set_transport_locked(&mut self, locked: bool) -> Result<()> {
        let mut state = self.state();
        state.ensure_connected()?;
        state.transport_locked = locked;
        Ok(())
    }

    fn begin_streaming(&mut self) -> Result<()> {
        let mut state = self.state();
        state.ensure_connected()?;
        state.device_streaming = true;
        state.stats.begin_streaming_commands += 1;
        Ok(())
    }

    fn end_streaming(&mut self) -> Result<()> {
        let mut state = self.state();
        state.ensure_connected()?;
        state.device_streaming = false;
        state.stats.end_streaming_commands += 1;
        Ok(())
    }

    fn pixel_format(&self) -> Result<PixelFormat> {
        let state = self.state();
        state.ensure_connected()?;
        Ok(state.pixel_format)
    }

    fn set_pixel_format(&mut self, format: PixelFormat) -> Result<()> {
        let mut state = self.state();
        state.ensure_connected()?;
        state.ensure_unlocked("PixelFormat")?;
        state.pixel_format = format;
        Ok(())
    }

    fn available_pixel_formats(&self) -> Result<Vec<PixelFormat>> {
        let state = self.state();
        state.ensure_connected()?;
        Ok(vec![
            PixelFormat::BayerRG8,
            PixelFormat::Mono8,
            PixelFormat::Mono12,
            PixelFormat::Rgb8,
            PixelFormat::Bgr8,
            PixelFormat::Rgb10Packed32,
        ])
    }

    fn roi(&self) -> Result<Roi> {
        let state = self.state();
        state.ensure_connected()?;
        Ok(state.roi)
    }

    fn set_roi(&mut self, roi: Roi) -> Result<()> {
        let mut state = self.state();
        state.ensure_connected()?;
        state.ensure_unlocked("Region of interest")?;
        let sensor = state.config.sensor;
        let right = roi.offset_x.checked_add(roi.width);
        let bottom = roi.offset_y.checked_add(roi.height);
        if roi.width == 0
            || roi.height == 0
            || right.map_or(true, |right| right > sensor.width)
            || bottom.map_or(true, |bottom| bottom > sensor.height)
        {
            return Err(AcquisitionError::device(format!(
                "region {}x{}+{}+{} exceeds sensor {}",
                roi.width, roi.height, roi.offset_x, roi.offset_y, sensor
            )));
        }
        state.roi = roi;
        Ok(())
    }

    fn exposure_us(&self) -> Result<f64> {
        let state = self.state();
        state.ensure_connected()?;
        Ok(state.exposure_us)
    }

    fn set_exposure_us(&mut self, value: f64) -> Result<()> {
        let range = self.exposure_range()?;
        if !range.contains(value) {
            return Err(AcquisitionError::device(format!(
                "ExposureTime {} out of range",
                value
            )));
        }
        self.state().exposure_us = value;
        Ok(())
    }

    fn exposure_range(&self) -> Result<Range<f64>> {
        self.state().ensure_connected()?;
        Ok(Range::new(20.0, 1_000_000.0, None))
    }

    fn frame_rate(&self) -> Result<f64> {
        let state = self.state();
        state.ensure_connected()?;
        Ok(state.frame_rate)
    }

    fn set_frame_rate(&mut self, value: f64) -> Result<()> {
        let range = self.frame_rate_range()?;
        if !range.contains(value) {
            return Err(AcquisitionError::device(format!(
                "AcquisitionFrameRate {} out of range",
                value
            )));
        }
        self.state().frame_rate = value;
        Ok(())
    }

    fn frame_rate_range(&self) -> Result<Range<f64>> {
        self.state().ensure_connected()?;
        Ok(Range::new(1.0, 120.0, None))
    }

    fn gain(&mut self, channel: GainChannel) -> Result<f64> {
        let state = self.state();
        state.ensure_connected()?;
        Ok(state.gains[gain_index(channel)])
    }

    fn set_gain(&mut self, channel: GainChannel, value: f64) -> Result<()> {
        let range = self.gain_range(channel)?;
        if !range.contains(value) {
            return Err(AcquisitionError::device(format!(
                "Gain {:?} {} out of range",
                channel, value
            )));
        }
        self.state().gains[gain_index(channel)] = value;
        Ok(())
    }

    fn gain_range(&mut self, channel: GainChannel) -> Result<Range<f64>> {
        self.state().ensure_connected()?;
        let max = match channel {
            GainChannel::Master => 16.0,
            _ => 4.0,
        };
        Ok(Range::new(1.0, max, Some(0.01)))
    }

    fn has_focus_stepper(&self) -> bool {
        self.state().config.has_focus_stepper
    }

    fn focus_stepper(&self) -> Result<i64> {
        let state = self.state();
        state.ensure_connected()?;
        if !state.config.has_focus_stepper {
            return Err(AcquisitionError::Unavailable("FocusStepper"));
        }
        Ok(state.focus)
    }

    fn set_focus_stepper(&mut self, value: i64) -> Result<()> {
        let range = self.focus_stepper_range()?;
        if !range.contains(value) {
            return Err(AcquisitionError::device(format!(
                "FocusStepper {} out of range",
                value
            )));
        }
        self.state().focus = value;
        Ok(())
    }

    fn focus_stepper_range(&self) -> Result<Range<i64>> {
        let state = self.state();
        state.ensure_connected()?;
        if !state.config.has_focus_stepper {
            return Err(AcquisitionError::Unavailable("FocusStepper"));
        }
        Ok(Range::new(0, 1023, Some(1)))
    }

    fn reverse_y_access(&self) -> ParameterAccess {
        let state = self.state();
        if !state.connected {
            return ParameterAccess::Absent;
        }
        state.reverse_y_access()
    }

    fn set_reverse_y(&mut self, enabled: bool) -> Result<()> {
        let mut state = self.state();
        state.ensure_connected()?;
        match state.reverse_y_access() {
            ParameterAccess::Absent => Err(AcquisitionError::Unavailable("ReverseY")),
            ParameterAccess::ReadOnly => Err(AcquisitionError::device("ReverseY is not writable")),
            ParameterAccess::Writable => {
                state.reverse_y = enabled;
                Ok(())
            }
        }
    }

    fn supports_auto_feature(&self, feature: AutoFeature) -> bool {
        self.state().supports(feature)
    }

    fn set_auto_feature(&mut self, feature: AutoFeature, enabled: bool) -> Result<()> {
        let mut state = self.state();
        state.ensure_connected()?;
        if !state.supports(feature) {
            return Err(AcquisitionError::Unavailable("auto feature"));
        }
        if enabled {
            state.auto_enabled.insert(feature);
        } else {
            state.auto_enabled.remove(&feature);
        }
        Ok(())
    }

    fn load_default_settings(&mut self) -> Result<()> {
        let mut state = self.state();
        state.ensure_connected()?;
        state.ensure_unlocked("UserSetLoad")?;
        state.load_defaults();
        Ok(())
    }

    fn enable_reconnect(&mut self) -> Result<bool> {
        let mut state = self.state();
        state.reconnect_enabled = true;
        Ok(true)
    }
}

// ----------------------------------------------------------------------------
// Host data stream
// ----------------------------------------------------------------------------

impl DataStream for SyntheticCamera {
    fn min_announced_buffers(&self) -> Result<usize> {
        Ok(self.state().config.min_buffers)
    }

    fn announce_buffer(&self, size: usize) -> Result<(BufferId, Vec<u8>)> {
        let mut state = self.state();
        if let Some(max) = state.config.max_buffers {
            if state.announced.len() >= max {
                return Err(AcquisitionError::device(format!(
                    "transport limit of {} buffers reached",
                    max
                )));
            }
        }
        state.next_buffer += 1;
        let id = BufferId(state.next_buffer);
        state.announced.insert(id);
        state.stats.total_announced += 1;
        Ok((id, vec![0u8; size]))
    }

    fn queue_buffer(&self, id: BufferId, memory: Vec<u8>) -> Result<()> {
        let mut state = self.state();
        if !state.announced.contains(&id) {
            return Err(AcquisitionError::device(format!(
                "buffer {} is not announced",
                id
            )));
        }
        let already_queued = state.queued.iter().any(|(queued, _)| *queued == id)
            || state.finished.iter().any(|filled| filled.id == id);
        if already_queued {
            state.stats.double_queues += 1;
            return Err(AcquisitionError::InvalidState("buffer queued twice"));
        }
        state.queued.push_back((id, memory));
        Ok(())
    }

    fn revoke_buffer(&self, id: BufferId) -> Result<()> {
        let mut state = self.state();
        if !state.announced.remove(&id) {
            return Err(AcquisitionError::device(format!(
                "buffer {} is not announced",
                id
            )));
        }
        state.queued.retain(|(queued, _)| *queued != id);
        state.finished.retain(|filled| filled.id != id);
        Ok(())
    }

    fn start_acquisition(&self) -> Result<()> {
        let mut state = self.state();
        state.ensure_connected()?;
        state.grabbing = true;
        Ok(())
    }

    fn stop_acquisition(&self) -> Result<()> {
        self.state().grabbing = false;
        self.shared.finished.notify_all();
        Ok(())
    }

    fn is_grabbing(&self) -> bool {
        self.state().grabbing
    }

    fn flush_discard_all(&self) -> Result<Vec<(BufferId, Vec<u8>)>> {
        let mut state = self.state();
        let mut returned: Vec<(BufferId, Vec<u8>)> = state.queued.drain(..).collect();
        returned.extend(
            state
                .finished
                .drain(..)
                .map(|filled| (filled.id, filled.memory)),
        );
        Ok(returned)
    }

    fn wait_for_finished(&self, timeout: Duration) -> Result<FilledBuffer> {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.state();
        loop {
            if state.killed {
                return Err(AcquisitionError::Aborted);
            }
            if let Some(filled) = state.finished.pop_front() {
                return Ok(filled);
            }
            if !state.grabbing {
                return Err(AcquisitionError::Timeout);
            }
            state = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(AcquisitionError::Timeout);
                    }
                    match self.shared.finished.wait_timeout(state, deadline - now) {
                        Ok((guard, _)) => guard,
                        Err(poisoned) => poisoned.into_inner().0,
                    }
                }
                None => self
                    .shared
                    .finished
                    .wait(state)
                    .unwrap_or_else(|poisoned| poisoned.into_inner()),
            };
        }
    }

    fn kill_wait(&self) {
        self.state().killed = true;
        self.shared.finished.notify_all();
    }

    fn clear_kill(&self) {
        self.state().killed = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn streaming_camera() -> SyntheticCamera {
        let mut camera = SyntheticCamera::open(SyntheticConfig::default()).unwrap();
        let (id, memory) = camera.announce_buffer(640 * 480).unwrap();
        camera.queue_buffer(id, memory).unwrap();
        camera.start_acquisition().unwrap();
        camera.begin_streaming().unwrap();
        camera
    }

    #[test]
    fn rejects_non_stub_devices() {
        let config = SyntheticConfig {
            device: "/dev/video0".to_string(),
            ..SyntheticConfig::default()
        };
        assert!(SyntheticCamera::open(config).is_err());
    }

    #[test]
    fn emitted_frame_is_delivered_to_waiter() {
        let camera = streaming_camera();
        assert!(camera.emit_frame());
        let filled = camera.wait_for_finished(Duration::from_millis(10)).unwrap();
        assert_eq!(filled.meta.frame_id, 1);
        assert!(!filled.meta.incomplete);
        assert_eq!(filled.meta.size, Size::new(640, 480));
    }

    #[test]
    fn emit_needs_a_queued_buffer() {
        let camera = streaming_camera();
        assert!(camera.emit_frame());
        assert!(!camera.emit_frame());
    }

    #[test]
    fn double_queue_is_refused_and_counted() {
        let camera = streaming_camera();
        let id = camera.state().queued[0].0;
        assert!(camera.queue_buffer(id, vec![0; 4]).is_err());
        assert_eq!(camera.stats().double_queues, 1);
    }

    #[test]
    fn stopped_stream_releases_waiter_with_timeout() {
        let camera = streaming_camera();
        camera.stop_acquisition().unwrap();
        let started = Instant::now();
        let err = camera.wait_for_finished(Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, AcquisitionError::Timeout));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn kill_is_sticky_until_cleared() {
        let camera = streaming_camera();
        camera.kill_wait();
        assert!(matches!(
            camera.wait_for_finished(Duration::from_millis(10)),
            Err(AcquisitionError::Aborted)
        ));
        assert!(matches!(
            camera.wait_for_finished(Duration::from_millis(10)),
            Err(AcquisitionError::Aborted)
        ));
        camera.clear_kill();
        assert!(matches!(
            camera.wait_for_finished(Duration::from_millis(10)),
            Err(AcquisitionError::Timeout)
        ));
    }

    #[test]
    fn locked_transport_refuses_payload_changes() {
        let mut camera = SyntheticCamera::open(SyntheticConfig::default()).unwrap();
        camera.set_transport_locked(true).unwrap();
        assert!(camera.set_pixel_format(PixelFormat::Mono8).is_err());
        camera.set_transport_locked(false).unwrap();
        camera.set_pixel_format(PixelFormat::Mono8).unwrap();
        assert_eq!(camera.payload_size().unwrap(), 640 * 480);
    }

    #[test]
    fn unbounded_wait_still_sees_frames_and_kills() {
        let camera = streaming_camera();
        camera.emit_frame();
        assert!(camera.wait_for_finished(Duration::MAX).is_ok());
        camera.kill_wait();
        assert!(matches!(
            camera.wait_for_finished(Duration::MAX),
            Err(AcquisitionError::Aborted)
        ));
    }

    #[test]
    fn region_past_u32_range_is_refused() {
        let mut camera = SyntheticCamera::open(SyntheticConfig::default()).unwrap();
        let roi = Roi {
            offset_x: u32::MAX,
            offset_y: 0,
            width: 16,
            height: 16,
        };
        assert!(matches!(
            camera.set_roi(roi),
            Err(AcquisitionError::Device(_))
        ));
        assert_eq!(camera.roi().unwrap(), full_roi(Size::new(640, 480)));
    }

    #[test]
    fn reboot_resets_settings_and_streaming() {
        let mut camera = streaming_camera();
        camera.set_reverse_y(true).unwrap();
        let event = camera.simulate_reconnect(ReconnectOutcome::Rebooted { roi: None });
        assert!(!event.successful);
        assert!(!event.remote_acquisition_running);
        assert!(!camera.reverse_y());
        assert!(camera.auto_feature_enabled(AutoFeature::Exposure));
    }
}
