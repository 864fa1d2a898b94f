//! Events, notifications, and the delivery acknowledgement barrier.
//!
//! Every namespace or lock mutation produces an [`Event`]. Events are shared
//! (`Arc`) between all the notifications that reference them; a per-event
//! counter tracks outstanding deliveries and drops to zero as clients
//! acknowledge them through the keep-alive cursor (or as their sessions are
//! torn down). An event whose counter reaches zero is *retired*; operations
//! that need the acknowledgement barrier await retirement.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

use crate::types::{EventId, EventMask, HandleId, LockMode};

/// What happened, with the payload subscribers receive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    AttrSet { name: String },
    AttrDel { name: String },
    ChildNodeAdded { name: String },
    ChildNodeRemoved { name: String },
    LockAcquired { mode: LockMode },
    LockReleased,
    LockGranted { mode: LockMode, generation: u64 },
}

impl EventKind {
    /// The subscription mask bit this kind matches.
    pub fn mask(&self) -> EventMask {
        match self {
            EventKind::AttrSet { .. } => EventMask::ATTR_SET,
            EventKind::AttrDel { .. } => EventMask::ATTR_DEL,
            EventKind::ChildNodeAdded { .. } => EventMask::CHILD_NODE_ADDED,
            EventKind::ChildNodeRemoved { .. } => EventMask::CHILD_NODE_REMOVED,
            EventKind::LockAcquired { .. } => EventMask::LOCK_ACQUIRED,
            EventKind::LockReleased => EventMask::LOCK_RELEASED,
            EventKind::LockGranted { .. } => EventMask::LOCK_GRANTED,
        }
    }

    /// Wire payload as carried in a keep-alive notification entry.
    pub fn wire_payload(&self) -> Vec<u8> {
        match self {
            EventKind::AttrSet { name }
            | EventKind::AttrDel { name }
            | EventKind::ChildNodeAdded { name }
            | EventKind::ChildNodeRemoved { name } => name.as_bytes().to_vec(),
            EventKind::LockAcquired { mode } => mode.to_wire().to_le_bytes().to_vec(),
            EventKind::LockReleased => Vec::new(),
            EventKind::LockGranted { mode, generation } => {
                let mut payload = mode.to_wire().to_le_bytes().to_vec();
                payload.extend_from_slice(&generation.to_le_bytes());
                payload
            }
        }
    }
}

/// An immutable change record plus its delivery accounting.
#[derive(Debug)]
pub struct Event {
    pub id: EventId,
    pub kind: EventKind,
    pending: AtomicU64,
    retired: Notify,
}

impl Event {
    pub fn new(id: EventId, kind: EventKind) -> Arc<Self> {
        Arc::new(Self {
            id,
            kind,
            pending: AtomicU64::new(0),
            retired: Notify::new(),
        })
    }

    pub fn mask(&self) -> EventMask {
        self.kind.mask()
    }

    /// Record one delivery to a session queue.
    pub fn add_delivery(&self) {
        self.pending.fetch_add(1, Ordering::AcqRel);
    }

    /// Record one acknowledgement (or the teardown of a queued copy).
    pub fn ack_delivery(&self) {
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.retired.notify_waiters();
        }
    }

    /// Whether every delivery has been acknowledged.
    pub fn is_retired(&self) -> bool {
        self.pending.load(Ordering::Acquire) == 0
    }

    /// Block until every delivery of this event has been acknowledged.
    pub async fn wait_retired(&self) {
        loop {
            let notified = self.retired.notified();
            if self.is_retired() {
                return;
            }
            notified.await;
        }
    }
}

/// The unit queued on a session: which handle matched, and the event itself.
#[derive(Debug, Clone)]
pub struct Notification {
    pub handle: HandleId,
    pub event: Arc<Event>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_masks_match_event_table() {
        assert_eq!(EventKind::AttrSet { name: "k".into() }.mask(), EventMask::ATTR_SET);
        assert_eq!(EventKind::LockReleased.mask(), EventMask::LOCK_RELEASED);
        assert_eq!(
            EventKind::LockGranted { mode: LockMode::Shared, generation: 3 }.mask(),
            EventMask::LOCK_GRANTED
        );
    }

    #[test]
    fn lock_granted_payload_carries_mode_and_generation() {
        let payload = EventKind::LockGranted { mode: LockMode::Exclusive, generation: 9 }
            .wire_payload();
        assert_eq!(payload.len(), 12);
        assert_eq!(u32::from_le_bytes(payload[..4].try_into().unwrap()), 2);
        assert_eq!(u64::from_le_bytes(payload[4..].try_into().unwrap()), 9);
    }

    #[test]
    fn retirement_counts_deliveries() {
        let event = Event::new(1, EventKind::LockReleased);
        assert!(event.is_retired());

        event.add_delivery();
        event.add_delivery();
        assert!(!event.is_retired());

        event.ack_delivery();
        assert!(!event.is_retired());
        event.ack_delivery();
        assert!(event.is_retired());
    }

    #[tokio::test]
    async fn wait_retired_releases_on_last_ack() {
        let event = Event::new(2, EventKind::LockReleased);
        event.add_delivery();

        let waiter = {
            let event = event.clone();
            tokio::spawn(async move { event.wait_retired().await })
        };

        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        event.ack_delivery();
        waiter.await.expect("waiter completes");
    }

    #[tokio::test]
    async fn wait_retired_returns_immediately_when_never_delivered() {
        let event = Event::new(3, EventKind::LockReleased);
        event.wait_retired().await;
    }
}
