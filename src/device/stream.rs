use std::time::Duration;

use crate::error::Result;
use crate::frame::FrameMeta;
use crate::pool::BufferId;

/// A buffer the transport finished filling, handed to the waiting caller.
#[derive(Debug)]
pub struct FilledBuffer {
    pub id: BufferId,
    pub memory: Vec<u8>,
    pub meta: FrameMeta,
}

/// Host-side transport for one data stream.
///
/// Buffer memory moves with ownership:
/// - `announce_buffer` allocates and returns the memory to the caller (Announced).
/// - `queue_buffer` hands it to the transport (Queued).
/// - `wait_for_finished` hands it back with frame metadata (Filled).
/// - `flush_discard_all` returns every queued or undelivered buffer (Announced).
///
/// All methods take `&self`: a processing thread blocks in `wait_for_finished`
/// while control threads stop the stream or kill the wait.
pub trait DataStream: Send + Sync {
    /// Minimum number of announced buffers the transport needs to stream.
    fn min_announced_buffers(&self) -> Result<usize>;

    fn announce_buffer(&self, size: usize) -> Result<(BufferId, Vec<u8>)>;

    fn queue_buffer(&self, id: BufferId, memory: Vec<u8>) -> Result<()>;

    fn revoke_buffer(&self, id: BufferId) -> Result<()>;

    fn start_acquisition(&self) -> Result<()>;

    /// Stop reception. Threads inside `wait_for_finished` must return promptly
    /// (`Timeout`) once the stream is stopped.
    fn stop_acquisition(&self) -> Result<()>;

    fn is_grabbing(&self) -> bool;

    /// Discard all in-flight data, returning queued and undelivered buffers.
    fn flush_discard_all(&self) -> Result<Vec<(BufferId, Vec<u8>)>>;

    /// Block until a buffer is finished. Fails with `Timeout` or, after
    /// `kill_wait`, with `Aborted`.
    fn wait_for_finished(&self, timeout: Duration) -> Result<FilledBuffer>;

    /// Abort the current wait and every later one until `clear_kill`.
    fn kill_wait(&self);

    fn clear_kill(&self);
}
