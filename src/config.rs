use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::device::SyntheticConfig;
use crate::engine::EngineOptions;
use crate::frame::{PixelFormat, Size};
use crate::relay::RelayPolicy;
use crate::worker::WorkerOptions;

const DEFAULT_WAIT_TIMEOUT_MS: u64 = 1000;
const DEFAULT_DISPLAY_INTERVAL_MS: u64 = 33;
const DEFAULT_REPORT_WINDOW_SECS: u64 = 5;
const DEFAULT_OUTPUT_FORMAT: PixelFormat = PixelFormat::Rgb8;
const DEFAULT_CAMERA_DEVICE: &str = "stub://camera";
const DEFAULT_CAMERA_MODEL: &str = "SYN-1";
const DEFAULT_CAMERA_WIDTH: u32 = 640;
const DEFAULT_CAMERA_HEIGHT: u32 = 480;
const DEFAULT_CAMERA_FORMAT: PixelFormat = PixelFormat::BayerRG8;
const DEFAULT_CAMERA_FPS: u32 = 30;
const DEFAULT_MIN_BUFFERS: usize = 3;
const MAX_WAIT_TIMEOUT: Duration = Duration::from_secs(3600);

#[derive(Debug, Deserialize, Default)]
struct AcquisitionConfigFile {
    pipeline: Option<PipelineConfigFile>,
    relay: Option<RelayConfigFile>,
    camera: Option<CameraConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct PipelineConfigFile {
    wait_timeout_ms: Option<u64>,
    display_interval_ms: Option<u64>,
    report_window_secs: Option<u64>,
    output_format: Option<PixelFormat>,
    reverse_y: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct RelayConfigFile {
    policy: Option<RelayPolicy>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    device: Option<String>,
    model: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    pixel_format: Option<PixelFormat>,
    fps: Option<u32>,
    min_buffers: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct AcquisitionConfig {
    pub wait_timeout: Duration,
    pub display_interval: Duration,
    pub report_window: Duration,
    pub output_format: PixelFormat,
    pub reverse_y: bool,
    pub relay_policy: RelayPolicy,
    pub camera: CameraSettings,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub device: String,
    pub model: String,
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub fps: u32,
    pub min_buffers: usize,
}

impl AcquisitionConfig {
    /// Load from the file named by `ACQ_CONFIG`, if any, then apply env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("ACQ_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: AcquisitionConfigFile) -> Self {
        let pipeline = file.pipeline.unwrap_or_default();
        let camera = file.camera.unwrap_or_default();
        Self {
            wait_timeout: Duration::from_millis(
                pipeline.wait_timeout_ms.unwrap_or(DEFAULT_WAIT_TIMEOUT_MS),
            ),
            display_interval: Duration::from_millis(
                pipeline
                    .display_interval_ms
                    .unwrap_or(DEFAULT_DISPLAY_INTERVAL_MS),
            ),
            report_window: Duration::from_secs(
                pipeline
                    .report_window_secs
                    .unwrap_or(DEFAULT_REPORT_WINDOW_SECS),
            ),
            output_format: pipeline.output_format.unwrap_or(DEFAULT_OUTPUT_FORMAT),
            reverse_y: pipeline.reverse_y.unwrap_or(true),
            relay_policy: file
                .relay
                .and_then(|relay| relay.policy)
                .unwrap_or_default(),
            camera: CameraSettings {
                device: camera
                    .device
                    .unwrap_or_else(|| DEFAULT_CAMERA_DEVICE.to_string()),
                model: camera
                    .model
                    .unwrap_or_else(|| DEFAULT_CAMERA_MODEL.to_string()),
                width: camera.width.unwrap_or(DEFAULT_CAMERA_WIDTH),
                height: camera.height.unwrap_or(DEFAULT_CAMERA_HEIGHT),
                pixel_format: camera.pixel_format.unwrap_or(DEFAULT_CAMERA_FORMAT),
                fps: camera.fps.unwrap_or(DEFAULT_CAMERA_FPS),
                min_buffers: camera.min_buffers.unwrap_or(DEFAULT_MIN_BUFFERS),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(timeout) = std::env::var("ACQ_WAIT_TIMEOUT_MS") {
            let millis: u64 = timeout
                .trim()
                .parse()
                .map_err(|_| anyhow!("ACQ_WAIT_TIMEOUT_MS must be an integer number of milliseconds"))?;
            self.wait_timeout = Duration::from_millis(millis);
        }
        if let Ok(policy) = std::env::var("ACQ_RELAY_POLICY") {
            if !policy.trim().is_empty() {
                self.relay_policy = policy
                    .parse()
                    .map_err(|e| anyhow!("ACQ_RELAY_POLICY: {}", e))?;
            }
        }
        if let Ok(fps) = std::env::var("ACQ_CAMERA_FPS") {
            self.camera.fps = fps
                .trim()
                .parse()
                .map_err(|_| anyhow!("ACQ_CAMERA_FPS must be an integer"))?;
        }
        if let Ok(format) = std::env::var("ACQ_PIXEL_FORMAT") {
            if !format.trim().is_empty() {
                self.camera.pixel_format = format
                    .parse()
                    .map_err(|e| anyhow!("ACQ_PIXEL_FORMAT: {}", e))?;
            }
        }
        if let Ok(window) = std::env::var("ACQ_REPORT_WINDOW_SECS") {
            let seconds: u64 = window
                .trim()
                .parse()
                .map_err(|_| anyhow!("ACQ_REPORT_WINDOW_SECS must be an integer number of seconds"))?;
            self.report_window = Duration::from_secs(seconds);
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.wait_timeout.is_zero() {
            return Err(anyhow!("wait timeout must be greater than zero"));
        }
        if self.wait_timeout > MAX_WAIT_TIMEOUT {
            return Err(anyhow!(
                "wait timeout must be at most {} ms",
                MAX_WAIT_TIMEOUT.as_millis()
            ));
        }
        if self.display_interval.is_zero() {
            return Err(anyhow!("display interval must be greater than zero"));
        }
        if self.display_interval > MAX_WAIT_TIMEOUT {
            return Err(anyhow!(
                "display interval must be at most {} ms",
                MAX_WAIT_TIMEOUT.as_millis()
            ));
        }
        if !matches!(
            self.output_format,
            PixelFormat::Rgb8 | PixelFormat::Bgr8 | PixelFormat::Mono8
        ) {
            return Err(anyhow!(
                "output format must be RGB8, BGR8 or Mono8, got {}",
                self.output_format
            ));
        }
        if !self.camera.device.starts_with("stub://") {
            return Err(anyhow!(
                "camera.device must be a stub:// locator, got {}",
                self.camera.device
            ));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera width and height must be greater than zero"));
        }
        if self.camera.fps == 0 {
            return Err(anyhow!("camera fps must be greater than zero"));
        }
        if self.camera.min_buffers == 0 {
            return Err(anyhow!("camera min_buffers must be greater than zero"));
        }
        Ok(())
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            reverse_y: self.reverse_y,
            ..EngineOptions::default()
        }
    }

    pub fn worker_options(&self) -> WorkerOptions {
        WorkerOptions {
            wait_timeout: self.wait_timeout,
            report_window: self.report_window,
        }
    }

    pub fn synthetic_config(&self) -> SyntheticConfig {
        SyntheticConfig {
            device: self.camera.device.clone(),
            model: self.camera.model.clone(),
            sensor: Size::new(self.camera.width, self.camera.height),
            pixel_format: self.camera.pixel_format,
            min_buffers: self.camera.min_buffers,
            fps: self.camera.fps,
            ..SyntheticConfig::default()
        }
    }
}

fn read_config_file(path: &Path) -> Result<AcquisitionConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
