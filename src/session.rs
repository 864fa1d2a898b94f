//! Sessions and the lease-expiry registry.
//!
//! The registry owns every session and a deadline-ordered min-heap for
//! expiry. Renewals push a fresh heap entry instead of rebuilding the heap;
//! stale entries (whose deadline no longer matches the session) are skipped
//! when popped.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::error::{CoordError, Result};
use crate::event::Notification;
use crate::types::{EventId, HandleId, SessionId};

/// A client-level connection with a lease.
#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    pub addr: SocketAddr,
    pub deadline: Instant,
    pub handles: HashSet<HandleId>,
    pub notifications: VecDeque<Notification>,
    pub expired: bool,
}

impl Session {
    fn new(id: SessionId, addr: SocketAddr, lease: Duration) -> Self {
        Self {
            id,
            addr,
            deadline: Instant::now() + lease,
            handles: HashSet::new(),
            notifications: VecDeque::new(),
            expired: false,
        }
    }

    /// Milliseconds of lease remaining at `now`.
    pub fn lease_remaining_ms(&self, now: Instant) -> u64 {
        self.deadline.saturating_duration_since(now).as_millis() as u64
    }
}

/// Registry of live sessions plus the expiry structure.
#[derive(Debug)]
pub struct SessionRegistry {
    next_id: SessionId,
    sessions: HashMap<SessionId, Session>,
    expiry: BinaryHeap<Reverse<(Instant, SessionId)>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            sessions: HashMap::new(),
            expiry: BinaryHeap::new(),
        }
    }

    /// Create a session for a client address and start its lease.
    pub fn create(&mut self, addr: SocketAddr, lease: Duration) -> SessionId {
        let id = self.next_id;
        self.next_id += 1;
        let session = Session::new(id, addr, lease);
        self.expiry.push(Reverse((session.deadline, id)));
        self.sessions.insert(id, session);
        id
    }

    pub fn get(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    pub fn get_mut(&mut self, id: SessionId) -> Option<&mut Session> {
        self.sessions.get_mut(&id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Extend the session's lease to `lease` from now. Fails once the
    /// session has expired or is unknown.
    pub fn renew(&mut self, id: SessionId, lease: Duration) -> Result<Instant> {
        let session = self
            .sessions
            .get_mut(&id)
            .ok_or(CoordError::ExpiredSession { session: id })?;
        if session.expired {
            return Err(CoordError::ExpiredSession { session: id });
        }
        session.deadline = Instant::now() + lease;
        self.expiry.push(Reverse((session.deadline, id)));
        Ok(session.deadline)
    }

    /// Pop one session whose deadline has passed, marking it expired so
    /// in-flight requests short-circuit. Returns `None` when nothing is due.
    pub fn next_expired(&mut self, now: Instant) -> Option<SessionId> {
        while let Some(&Reverse((deadline, id))) = self.expiry.peek() {
            if deadline > now {
                return None;
            }
            self.expiry.pop();
            let Some(session) = self.sessions.get_mut(&id) else {
                continue;
            };
            if session.deadline != deadline || session.expired {
                // Renewed since this entry was pushed, or already claimed.
                continue;
            }
            session.expired = true;
            return Some(id);
        }
        None
    }

    /// Remove a session, acknowledging whatever it never consumed so the
    /// referenced events can retire.
    pub fn remove(&mut self, id: SessionId) -> Option<Session> {
        let mut session = self.sessions.remove(&id)?;
        for notification in session.notifications.drain(..) {
            notification.event.ack_delivery();
        }
        Some(session)
    }

    /// Drop queued notifications up to and including the client's cursor,
    /// retiring events as their last copies are acknowledged.
    pub fn ack_notifications(&mut self, id: SessionId, cursor: EventId) -> usize {
        let Some(session) = self.sessions.get_mut(&id) else {
            return 0;
        };
        let mut acked = 0;
        while let Some(front) = session.notifications.front() {
            if front.event.id > cursor {
                break;
            }
            let notification = session.notifications.pop_front().expect("front exists");
            notification.event.ack_delivery();
            acked += 1;
        }
        acked
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
