//! Device surfaces the acquisition core depends on.
//!
//! Two collaborators sit below the engine:
//! - `DeviceParameters`: the remote device's typed parameter and command surface
//!   (payload size, transport lock, begin/end streaming, image settings).
//! - `DataStream`: the host-side transport that owns queued buffers and reports
//!   finished ones.
//!
//! Backends implement both. `SyntheticCamera` is the in-process backend used for
//! `stub://` devices and in tests.
//!
//! Optional device features are exposed as capabilities (`has_focus_stepper`,
//! `reverse_y_access`, `supports_auto_feature`) that callers check before access,
//! rather than as errors to be caught.

mod stream;
pub mod synthetic;

pub use stream::{DataStream, FilledBuffer};
pub use synthetic::{
    ReconnectOutcome, SyntheticCamera, SyntheticConfig, SyntheticGenerator, SyntheticStats,
};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::frame::{PixelFormat, Size};

/// Inclusive numeric range of a device parameter.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Range<T> {
    pub min: T,
    pub max: T,
    /// Step between valid values; `None` when the parameter is continuous.
    pub increment: Option<T>,
}

impl<T: PartialOrd + Copy> Range<T> {
    pub fn new(min: T, max: T, increment: Option<T>) -> Self {
        Self {
            min,
            max,
            increment,
        }
    }

    pub fn contains(&self, value: T) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Region of interest on the sensor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roi {
    pub offset_x: u32,
    pub offset_y: u32,
    pub width: u32,
    pub height: u32,
}

impl Roi {
    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}

/// Gain channels selectable on the device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GainChannel {
    Master,
    Red,
    Green,
    Blue,
}

/// Device-side automatic controls. The core turns them off so host-side
/// processing owns brightness, white balance and focus.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AutoFeature {
    Exposure,
    BalanceWhite,
    Gain,
    Focus,
}

impl AutoFeature {
    pub const ALL: [AutoFeature; 4] = [
        AutoFeature::Exposure,
        AutoFeature::BalanceWhite,
        AutoFeature::Gain,
        AutoFeature::Focus,
    ];
}

/// Access mode of an optional boolean parameter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParameterAccess {
    Absent,
    ReadOnly,
    Writable,
}

/// Typed parameter and command surface of the remote device.
///
/// Commands (`begin_streaming`, `end_streaming`, `load_default_settings`) block
/// until the device acknowledges them. Implementations reject payload-affecting
/// writes while transport parameters are locked.
pub trait DeviceParameters: Send {
    fn model_name(&self) -> String;

    fn serial_number(&self) -> String;

    /// Bytes needed for one complete frame as currently configured.
    fn payload_size(&self) -> Result<usize>;

    /// Lock or unlock parameters that affect payload size or transport setup.
    fn set_transport_locked(&mut self, locked: bool) -> Result<()>;

    fn begin_streaming(&mut self) -> Result<()>;

    fn end_streaming(&mut self) -> Result<()>;

    fn pixel_format(&self) -> Result<PixelFormat>;

    fn set_pixel_format(&mut self, format: PixelFormat) -> Result<()>;

    /// Formats the device currently offers.
    fn available_pixel_formats(&self) -> Result<Vec<PixelFormat>>;

    fn roi(&self) -> Result<Roi>;

    fn set_roi(&mut self, roi: Roi) -> Result<()>;

    fn exposure_us(&self) -> Result<f64>;

    fn set_exposure_us(&mut self, value: f64) -> Result<()>;

    fn exposure_range(&self) -> Result<Range<f64>>;

    /// Configured rate. The device may not reach it depending on exposure, ROI
    /// and bandwidth.
    fn frame_rate(&self) -> Result<f64>;

    fn set_frame_rate(&mut self, value: f64) -> Result<()>;

    fn frame_rate_range(&self) -> Result<Range<f64>>;

    /// Gain access goes through a selector on most devices, hence `&mut self`.
    fn gain(&mut self, channel: GainChannel) -> Result<f64>;

    fn set_gain(&mut self, channel: GainChannel, value: f64) -> Result<()>;

    fn gain_range(&mut self, channel: GainChannel) -> Result<Range<f64>>;

    fn has_focus_stepper(&self) -> bool;

    fn focus_stepper(&self) -> Result<i64>;

    fn set_focus_stepper(&mut self, value: i64) -> Result<()>;

    fn focus_stepper_range(&self) -> Result<Range<i64>>;

    fn reverse_y_access(&self) -> ParameterAccess;

    fn set_reverse_y(&mut self, enabled: bool) -> Result<()>;

    fn supports_auto_feature(&self, feature: AutoFeature) -> bool;

    fn set_auto_feature(&mut self, feature: AutoFeature, enabled: bool) -> Result<()>;

    /// Load the device's default settings set.
    fn load_default_settings(&mut self) -> Result<()>;

    /// Enable automatic transport-level reconnect. Returns false when the
    /// backend does not support it.
    fn enable_reconnect(&mut self) -> Result<bool> {
        Ok(false)
    }
}
