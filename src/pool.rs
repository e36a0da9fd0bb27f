//! Buffer pool over a host data stream.
//!
//! The pool keeps the ledger of every announced buffer and where its memory
//! currently lives:
//!
//! | State       | Memory held by        |
//! |-------------|-----------------------|
//! | `Announced` | the pool              |
//! | `Queued`    | the transport         |
//! | `Filled`    | the `Frame` lease     |
//! | `Revoked`   | nobody (dropped)      |
//!
//! Revoked ids stay in the ledger until the next `allocate`, so a frame
//! recycled after teardown is recognised and refused with `StaleBuffer`.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::device::DataStream;
use crate::error::{AcquisitionError, Result};
use crate::frame::Frame;

/// How long `revoke_all` waits for in-flight waiters to leave the stream.
pub const REVOKE_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BufferId(pub u64);

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferState {
    Announced,
    Queued,
    Filled,
    Revoked,
}

enum Slot {
    Announced(Vec<u8>),
    Queued,
    Filled,
    Revoked,
}

impl Slot {
    fn state(&self) -> BufferState {
        match self {
            Slot::Announced(_) => BufferState::Announced,
            Slot::Queued => BufferState::Queued,
            Slot::Filled => BufferState::Filled,
            Slot::Revoked => BufferState::Revoked,
        }
    }
}

/// Snapshot of the pool ledger.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub announced: usize,
    pub queued: usize,
    pub filled: usize,
    pub revoked: usize,
    pub buffer_size: usize,
    pub waiters: usize,
}

impl PoolStats {
    /// Buffers that are registered with the transport.
    pub fn live(&self) -> usize {
        self.announced + self.queued + self.filled
    }
}

#[derive(Default)]
struct Ledger {
    slots: BTreeMap<BufferId, Slot>,
    buffer_size: usize,
    streaming: bool,
    waiters: usize,
    cancelled: bool,
}

impl Ledger {
    fn live(&self) -> usize {
        self.slots
            .values()
            .filter(|slot| !matches!(slot, Slot::Revoked))
            .count()
    }
}

pub struct BufferPool {
    stream: Arc<dyn DataStream>,
    ledger: Mutex<Ledger>,
    changed: Condvar,
}

impl BufferPool {
    pub fn new(stream: Arc<dyn DataStream>) -> Self {
        Self {
            stream,
            ledger: Mutex::new(Ledger::default()),
            changed: Condvar::new(),
        }
    }

    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        // Every ledger update is a single assignment, so a poisoned guard is
        // still consistent.
        self.ledger
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn min_required(&self) -> Result<usize> {
        self.stream.min_announced_buffers()
    }

    pub fn is_allocated(&self) -> bool {
        self.ledger().live() > 0
    }

    /// Size of each announced buffer, `None` when nothing is allocated.
    pub fn buffer_size(&self) -> Option<usize> {
        let ledger = self.ledger();
        (ledger.live() > 0).then_some(ledger.buffer_size)
    }

    pub fn state_of(&self, id: BufferId) -> Option<BufferState> {
        self.ledger().slots.get(&id).map(Slot::state)
    }

    pub fn stats(&self) -> PoolStats {
        let ledger = self.ledger();
        let mut stats = PoolStats {
            buffer_size: ledger.buffer_size,
            waiters: ledger.waiters,
            ..PoolStats::default()
        };
        for slot in ledger.slots.values() {
            match slot {
                Slot::Announced(_) => stats.announced += 1,
                Slot::Queued => stats.queued += 1,
                Slot::Filled => stats.filled += 1,
                Slot::Revoked => stats.revoked += 1,
            }
        }
        stats
    }

    /// Announce `count` buffers of `size` bytes and queue each one.
    pub fn allocate(&self, count: usize, size: usize) -> Result<()> {
        if count == 0 || size == 0 {
            return Err(AcquisitionError::InvalidState(
                "buffer count and size must be non-zero",
            ));
        }
        let mut ledger = self.ledger();
        if ledger.live() > 0 {
            return Err(AcquisitionError::InvalidState(
                "buffer pool is already allocated",
            ));
        }
        ledger.slots.clear();

        let mut announced = Vec::with_capacity(count);
        for _ in 0..count {
            match self.stream.announce_buffer(size) {
                Ok(buffer) => announced.push(buffer),
                Err(err) => {
                    log::warn!(
                        "BufferPool: transport refused buffer {} of {}: {}",
                        announced.len() + 1,
                        count,
                        err
                    );
                    let done = announced.len();
                    for (id, _) in announced {
                        if let Err(err) = self.stream.revoke_buffer(id) {
                            log::warn!("BufferPool: rollback revoke of {} failed: {}", id, err);
                        }
                    }
                    return Err(AcquisitionError::Allocation {
                        required: count,
                        announced: done,
                    });
                }
            }
        }

        let ids: Vec<BufferId> = announced.iter().map(|(id, _)| *id).collect();
        for (id, memory) in announced {
            ledger.slots.insert(id, Slot::Announced(memory));
        }
        for id in ids {
            let Some(Slot::Announced(memory)) = ledger.slots.insert(id, Slot::Queued) else {
                continue;
            };
            if let Err(err) = self.stream.queue_buffer(id, memory) {
                log::warn!("BufferPool: queueing {} failed: {}", id, err);
                self.release(&mut ledger);
                return Err(err);
            }
        }
        ledger.buffer_size = size;
        log::debug!("BufferPool: allocated {} x {} bytes", count, size);
        Ok(())
    }

    /// Start host-side reception.
    pub fn start_stream(&self) -> Result<()> {
        self.stream.start_acquisition()?;
        self.ledger().streaming = true;
        self.changed.notify_all();
        Ok(())
    }

    /// Stop host-side reception. Waiters inside the transport return promptly.
    pub fn stop_stream(&self) -> Result<()> {
        self.ledger().streaming = false;
        let result = if self.stream.is_grabbing() {
            self.stream.stop_acquisition()
        } else {
            Ok(())
        };
        self.changed.notify_all();
        result
    }

    /// Flush queued and undelivered buffers back into the pool.
    pub fn discard_in_flight(&self) -> Result<()> {
        let returned = self.stream.flush_discard_all()?;
        let mut ledger = self.ledger();
        for (id, memory) in returned {
            match ledger.slots.get_mut(&id) {
                Some(slot @ Slot::Queued) => *slot = Slot::Announced(memory),
                _ => log::debug!("BufferPool: transport returned untracked buffer {}", id),
            }
        }
        Ok(())
    }

    /// Deregister every buffer. Fails with `WaitInProgress` when a waiter does
    /// not leave the transport within `REVOKE_DRAIN_TIMEOUT`.
    pub fn revoke_all(&self) -> Result<()> {
        let ledger = self.ledger();
        let (mut ledger, _) = self
            .changed
            .wait_timeout_while(ledger, REVOKE_DRAIN_TIMEOUT, |ledger| ledger.waiters > 0)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if ledger.waiters > 0 {
            return Err(AcquisitionError::WaitInProgress);
        }
        if ledger.slots.values().any(|slot| matches!(slot, Slot::Queued)) {
            // A frame recycled after the flush went straight back to the transport.
            let returned = self.stream.flush_discard_all()?;
            for (id, memory) in returned {
                if let Some(slot @ Slot::Queued) = ledger.slots.get_mut(&id) {
                    *slot = Slot::Announced(memory);
                }
            }
        }
        self.release(&mut ledger)
    }

    fn release(&self, ledger: &mut Ledger) -> Result<()> {
        let mut first_err = None;
        for (id, slot) in ledger.slots.iter_mut() {
            if matches!(slot, Slot::Revoked) {
                continue;
            }
            if let Err(err) = self.stream.revoke_buffer(*id) {
                log::warn!("BufferPool: revoking {} failed: {}", id, err);
                first_err.get_or_insert(err);
            }
            *slot = Slot::Revoked;
        }
        ledger.buffer_size = 0;
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Block until a buffer is filled.
    pub fn wait_for_filled(&self, timeout: Duration) -> Result<Frame> {
        // `None` when the timeout is too large to represent: wait without a deadline.
        let deadline = Instant::now().checked_add(timeout);
        {
            let mut ledger = self.ledger();
            loop {
                if ledger.cancelled {
                    return Err(AcquisitionError::Aborted);
                }
                if ledger.streaming {
                    break;
                }
                ledger = match deadline {
                    Some(deadline) => {
                        let now = Instant::now();
                        if now >= deadline {
                            return Err(AcquisitionError::NotRunning);
                        }
                        match self.changed.wait_timeout(ledger, deadline - now) {
                            Ok((guard, _)) => guard,
                            Err(poisoned) => poisoned.into_inner().0,
                        }
                    }
                    None => self
                        .changed
                        .wait(ledger)
                        .unwrap_or_else(|poisoned| poisoned.into_inner()),
                };
            }
            ledger.waiters += 1;
        }

        let remaining = deadline.map_or(timeout, |deadline| {
            deadline.saturating_duration_since(Instant::now())
        });
        let result = self.stream.wait_for_finished(remaining);

        let mut ledger = self.ledger();
        ledger.waiters -= 1;
        self.changed.notify_all();
        let filled = result?;
        match ledger.slots.get_mut(&filled.id) {
            Some(slot @ Slot::Queued) => {
                *slot = Slot::Filled;
                Ok(Frame::from_filled(filled))
            }
            _ => {
                log::warn!("BufferPool: transport delivered untracked buffer {}", filled.id);
                Err(AcquisitionError::StaleBuffer(filled.id))
            }
        }
    }

    /// Hand a filled buffer back to the transport.
    pub fn requeue(&self, frame: Frame) -> Result<()> {
        let (id, memory) = frame.into_parts();
        let mut ledger = self.ledger();
        match ledger.slots.get(&id) {
            Some(Slot::Filled) => {}
            Some(Slot::Revoked) | None => return Err(AcquisitionError::StaleBuffer(id)),
            Some(_) => return Err(AcquisitionError::NotFilled(id)),
        }
        if let Err(err) = self.stream.queue_buffer(id, memory) {
            // The memory is gone with the failed call; take the slot out of rotation.
            log::warn!("BufferPool: requeue of {} failed: {}", id, err);
            if let Err(revoke_err) = self.stream.revoke_buffer(id) {
                log::debug!("BufferPool: revoking {} after failed requeue: {}", id, revoke_err);
            }
            ledger.slots.insert(id, Slot::Revoked);
            return Err(err);
        }
        ledger.slots.insert(id, Slot::Queued);
        Ok(())
    }

    /// Abort the current wait and every later one until `rearm`.
    pub fn cancel_wait(&self) {
        self.ledger().cancelled = true;
        self.stream.kill_wait();
        self.changed.notify_all();
    }

    pub fn rearm(&self) {
        self.ledger().cancelled = false;
        self.stream.clear_kill();
    }

    pub fn is_cancelled(&self) -> bool {
        self.ledger().cancelled
    }
}
