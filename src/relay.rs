//! Single-slot hand-off between the processing worker and the consumer.
//!
//! Neither side ever blocks. With the default `RejectNewest` policy a result
//! published into an occupied slot is handed back to the producer and the
//! occupant stays; `ReplaceOldest` displaces the occupant instead.
//!
//! The two policies differ when A and then B are published before the consumer
//! looks: `RejectNewest` hands out A (the worker sheds frames while the slot is
//! full and never transforms work it would throw away), while `ReplaceOldest`
//! hands out B at the cost of transforming every frame. Consumers that need the
//! most recent result must opt into `ReplaceOldest`.

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError, TrySendError};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::frame::ProcessedImage;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayPolicy {
    #[default]
    RejectNewest,
    ReplaceOldest,
}

impl FromStr for RelayPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "reject_newest" => Ok(RelayPolicy::RejectNewest),
            "replace_oldest" => Ok(RelayPolicy::ReplaceOldest),
            other => Err(format!("unknown relay policy '{}'", other)),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum PublishOutcome<T> {
    Stored,
    /// Slot was occupied; the new result comes back unpublished.
    Rejected(T),
    /// Slot was occupied; the old occupant comes back and the new one is stored.
    Replaced(T),
}

impl<T> PublishOutcome<T> {
    pub fn is_stored(&self) -> bool {
        !matches!(self, PublishOutcome::Rejected(_))
    }
}

pub struct FrameRelay<T = ProcessedImage> {
    tx: Sender<T>,
    rx: Receiver<T>,
    policy: RelayPolicy,
}

impl<T> FrameRelay<T> {
    pub fn new(policy: RelayPolicy) -> Self {
        let (tx, rx) = bounded(1);
        Self { tx, rx, policy }
    }

    pub fn policy(&self) -> RelayPolicy {
        self.policy
    }

    pub fn is_occupied(&self) -> bool {
        !self.rx.is_empty()
    }

    pub fn try_publish(&self, item: T) -> PublishOutcome<T> {
        let item = match self.tx.try_send(item) {
            Ok(()) => return PublishOutcome::Stored,
            Err(TrySendError::Full(item)) => item,
            Err(TrySendError::Disconnected(item)) => return PublishOutcome::Rejected(item),
        };
        match self.policy {
            RelayPolicy::RejectNewest => PublishOutcome::Rejected(item),
            RelayPolicy::ReplaceOldest => {
                // The consumer may empty the slot between the two calls.
                let displaced = self.try_take();
                match self.tx.try_send(item) {
                    Ok(()) => match displaced {
                        Some(old) => PublishOutcome::Replaced(old),
                        None => PublishOutcome::Stored,
                    },
                    Err(TrySendError::Full(item)) | Err(TrySendError::Disconnected(item)) => {
                        PublishOutcome::Rejected(item)
                    }
                }
            }
        }
    }

    pub fn try_take(&self) -> Option<T> {
        match self.rx.try_recv() {
            Ok(item) => Some(item),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }
}

/// Cloning yields another handle to the same slot.
impl<T> Clone for FrameRelay<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rx: self.rx.clone(),
            policy: self.policy,
        }
    }
}

impl<T> Default for FrameRelay<T> {
    fn default() -> Self {
        Self::new(RelayPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_slot_stores_and_take_clears() {
        let relay = FrameRelay::<u32>::default();
        assert!(!relay.is_occupied());
        assert_eq!(relay.try_publish(1), PublishOutcome::Stored);
        assert!(relay.is_occupied());
        assert_eq!(relay.try_take(), Some(1));
        assert_eq!(relay.try_take(), None);
    }

    #[test]
    fn reject_newest_keeps_occupant() {
        let relay = FrameRelay::new(RelayPolicy::RejectNewest);
        assert_eq!(relay.try_publish("A"), PublishOutcome::Stored);
        assert_eq!(relay.try_publish("B"), PublishOutcome::Rejected("B"));
        assert_eq!(relay.try_take(), Some("A"));
    }

    #[test]
    fn replace_oldest_keeps_latest() {
        let relay = FrameRelay::new(RelayPolicy::ReplaceOldest);
        assert_eq!(relay.try_publish("A"), PublishOutcome::Stored);
        assert_eq!(relay.try_publish("B"), PublishOutcome::Replaced("A"));
        assert_eq!(relay.try_take(), Some("B"));
        assert_eq!(relay.try_take(), None);
    }

    #[test]
    fn default_policy_keeps_first_result() {
        let relay = FrameRelay::default();
        assert_eq!(relay.policy(), RelayPolicy::RejectNewest);
        relay.try_publish("A");
        assert!(!relay.try_publish("B").is_stored());
        assert_eq!(relay.try_take(), Some("A"));
    }

    #[test]
    fn clones_share_the_slot() {
        let producer = FrameRelay::<u8>::default();
        let consumer = producer.clone();
        producer.try_publish(7);
        assert_eq!(consumer.try_take(), Some(7));
    }

    #[test]
    fn policy_parses_from_env_spelling() {
        assert_eq!(
            "replace-oldest".parse::<RelayPolicy>().unwrap(),
            RelayPolicy::ReplaceOldest
        );
        assert_eq!(
            "REJECT_NEWEST".parse::<RelayPolicy>().unwrap(),
            RelayPolicy::RejectNewest
        );
        assert!("latest".parse::<RelayPolicy>().is_err());
    }
}
