//! The coordinator service.
//!
//! Owns the namespace arena, the session registry, and the handle table, and
//! implements every client-visible operation. Collections are keyed by id
//! (session id, handle id, node name) with explicit lookups; the only shared
//! ownership is `Arc<Node>` for transient use under the node mutex and
//! `Arc<Event>` for queued notifications.
//!
//! Locking discipline, strictly ordered to prevent deadlock:
//!
//! 1. namespace map mutex
//! 2. per-node mutex (at most one held at a time)
//! 3. session map mutex
//! 4. handle map mutex
//!
//! A mutex is only ever acquired while holding mutexes earlier in the
//! order. Critical sections never block: event pushes and acknowledgement
//! barriers are collected into an [`Outbox`] and flushed by the caller after
//! every guard is dropped.

mod events;
mod locking;
mod namespace;
mod sessions;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use crate::config::Config;
use crate::error::{CoordError, Result};
use crate::event::Event;
use crate::fs::BaseDir;
use crate::handle::HandleTable;
use crate::node::Node;
use crate::session::SessionRegistry;
use crate::transport::Transport;
use crate::types::EventId;

/// Side effects accumulated while mutexes are held: unsolicited notification
/// pushes, and events whose retirement the initiating request must await.
#[derive(Default, Debug)]
pub struct Outbox {
    pub(crate) pushes: Vec<(SocketAddr, Vec<u8>)>,
    pub(crate) barriers: Vec<Arc<Event>>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.pushes.is_empty() && self.barriers.is_empty()
    }
}

/// The authoritative coordination service.
pub struct Coordinator {
    config: Config,
    base: BaseDir,
    transport: Arc<dyn Transport>,
    nodes: Mutex<HashMap<String, Arc<Node>>>,
    sessions: Mutex<SessionRegistry>,
    handles: Mutex<HandleTable>,
    next_event_id: AtomicU64,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator").finish_non_exhaustive()
    }
}

impl Coordinator {
    /// Claim the base directory and initialize empty state.
    ///
    /// Fails when another coordinator holds the base directory's advisory
    /// lock; callers treat that as fatal.
    pub fn new(config: Config, transport: Arc<dyn Transport>) -> Result<Self> {
        let base = BaseDir::acquire(&config.base_dir)?;
        info!(
            dir = %config.base_dir.display(),
            generation = base.generation(),
            lease_ms = config.lease_interval.as_millis() as u64,
            keepalive_ms = config.keepalive_interval.as_millis() as u64,
            "coordinator initialized"
        );
        Ok(Self {
            config,
            base,
            transport,
            nodes: Mutex::new(HashMap::new()),
            sessions: Mutex::new(SessionRegistry::new()),
            handles: Mutex::new(HandleTable::new()),
            next_event_id: AtomicU64::new(1),
        })
    }

    /// The startup generation of the base directory.
    pub fn generation(&self) -> u32 {
        self.base.generation()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Send collected pushes and wait out acknowledgement barriers. Must be
    /// called with no coordinator mutex held.
    pub async fn flush(&self, outbox: Outbox) {
        for (addr, frame) in outbox.pushes {
            self.transport.send_response(addr, frame).await;
        }
        for event in outbox.barriers {
            event.wait_retired().await;
        }
    }

    pub(crate) fn next_event_id(&self) -> EventId {
        self.next_event_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Look up the session and extend its lease; every authenticated request
    /// renews.
    pub(crate) fn authenticate(&self, session: u64) -> Result<()> {
        self.sessions
            .lock()
            .renew(session, self.config.lease_interval)
            .map(|_| ())
    }

    /// Absolute on-disk path for a node name.
    pub(crate) fn fs_path(&self, name: &str) -> PathBuf {
        self.base.path().join(name.trim_start_matches('/'))
    }

    /// Node names are absolute, slash-normalized paths without a trailing
    /// slash; components may not be empty or dot-relative.
    pub(crate) fn validate_name(name: &str) -> Result<()> {
        let bad = || CoordError::BadPathname { name: name.to_string() };
        if !name.starts_with('/') || name.len() < 2 || name.ends_with('/') {
            return Err(bad());
        }
        for component in name[1..].split('/') {
            if component.is_empty() || component == "." || component == ".." {
                return Err(bad());
            }
        }
        Ok(())
    }

    /// Split a name into its parent node name and child component. Children
    /// of the root have no parent node.
    pub(crate) fn parent_of(name: &str) -> Option<(&str, &str)> {
        let idx = name.rfind('/')?;
        if idx == 0 {
            return None;
        }
        Some((&name[..idx], &name[idx + 1..]))
    }
}
