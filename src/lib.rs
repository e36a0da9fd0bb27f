//! Acquisition Kernel
//!
//! Streaming frame acquisition for imaging devices: a buffer pool over a host
//! transport, an Idle/Running state machine around the device, a processing
//! worker that hands results to a consumer through a single-slot relay, and a
//! supervisor that resynchronises after device reconnects.
//!
//! # Data flow
//!
//! device → `AcquisitionEngine` (via `BufferPool`) → `ProcessingWorker` →
//! `FrameRelay` → consumer.
//!
//! Control flows the other way: the consumer starts, stops and reconfigures
//! the engine; device backends report reconnects to the `ReconnectSupervisor`.
//!
//! # Guarantees
//!
//! 1. **Recycle once**: every frame taken from the engine goes back exactly
//!    once. `Frame` is a move-only lease and `recycle` consumes it.
//! 2. **Producer never blocks**: the relay drops instead of waiting.
//! 3. **Serialized control**: start, stop, parameter changes and reconnect
//!    handling run under one engine lock.
//! 4. **Prompt cancel**: `cancel_wait` releases a blocked worker immediately and
//!    stays in effect until rearmed.
//!
//! # Module Structure
//!
//! - `device`: device and transport traits, synthetic backend
//! - `pool`: buffer ledger and wait/requeue
//! - `engine`: state machine, payload-affecting parameters, reconnect decisions
//! - `relay`, `transform`, `worker`: the processing side
//! - `supervisor`: reconnect message loop
//! - `session`: wiring and shutdown order
//! - `config`: daemon configuration

pub mod config;
pub mod device;
pub mod engine;
pub mod error;
pub mod frame;
pub mod pool;
pub mod relay;
pub mod report;
pub mod session;
pub mod supervisor;
pub mod transform;
pub mod worker;

pub use device::{
    AutoFeature, DataStream, DeviceParameters, GainChannel, ParameterAccess, Range,
    ReconnectOutcome, Roi, SyntheticCamera, SyntheticConfig,
};
pub use engine::{AcquisitionEngine, AcquisitionState, EngineOptions, ReconnectAction};
pub use error::{AcquisitionError, TransformError};
pub use frame::{Frame, FrameMeta, PixelFormat, ProcessedImage, Size};
pub use pool::{BufferId, BufferPool, BufferState, PoolStats};
pub use relay::{FrameRelay, PublishOutcome, RelayPolicy};
pub use report::IncidentReporter;
pub use session::AcquisitionSession;
pub use supervisor::{ReconnectEvent, ReconnectNotifier, ReconnectSupervisor};
pub use transform::{PixelConverter, Transform};
pub use worker::{ProcessingWorker, WorkerOptions, WorkerStats};
