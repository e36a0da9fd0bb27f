//! Error taxonomy for the acquisition core.
//!
//! Per-frame errors (`Timeout`, `Transform`, `StaleBuffer`, ...) are contained by
//! the processing worker. State machine errors (`Allocation`, `Device` during
//! start/stop) propagate to the direct caller.

use thiserror::Error;

use crate::pool::BufferId;

/// Errors raised by the pixel transform stage.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransformError {
    #[error("unsupported conversion from {from} to {to}")]
    UnsupportedConversion { from: String, to: String },

    #[error("frame data truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("transform failed: {0}")]
    Failed(String),
}

/// Errors raised by the buffer pool, acquisition engine and device surfaces.
#[derive(Debug, Error)]
pub enum AcquisitionError {
    /// No buffer completed within the wait timeout. Retry.
    #[error("timed out waiting for a filled buffer")]
    Timeout,

    /// The wait was cancelled deliberately. Stop waiting.
    #[error("buffer wait aborted")]
    Aborted,

    #[error("transport announced {announced} of {required} required buffers")]
    Allocation { required: usize, announced: usize },

    #[error(transparent)]
    Transform(#[from] TransformError),

    /// Parameter access or command failed, typically after a disconnect.
    #[error("device error: {0}")]
    Device(String),

    #[error("acquisition is not running")]
    NotRunning,

    #[error("buffer {0} is not filled")]
    NotFilled(BufferId),

    #[error("buffer {0} was revoked while its frame was out")]
    StaleBuffer(BufferId),

    #[error("cannot revoke buffers while a thread is waiting for a frame")]
    WaitInProgress,

    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// Optional device capability is not present.
    #[error("parameter unavailable: {0}")]
    Unavailable(&'static str),

    #[error("device handle is closed")]
    DeviceClosed,
}

impl AcquisitionError {
    pub fn device(msg: impl Into<String>) -> Self {
        AcquisitionError::Device(msg.into())
    }

    /// Errors that leave the acquisition usable; the caller may retry or wait
    /// for a reconnect notification.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            AcquisitionError::Aborted
                | AcquisitionError::Allocation { .. }
                | AcquisitionError::DeviceClosed
        )
    }
}

pub type Result<T, E = AcquisitionError> = std::result::Result<T, E>;
