//! Namespace nodes and their per-node lock state.
//!
//! Nodes live in the namespace arena keyed by absolute name; handles refer
//! to them by name and every cross-reference is an explicit lookup. The
//! per-node mutex guards the lock state machine, the handle map, and the
//! backing file that hosts extended attributes.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fs::File;
use std::process;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::error;

use crate::fs;
use crate::types::{EventMask, HandleId, LockMode, SessionId};

/// A queued lock request awaiting a grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockRequest {
    pub handle: HandleId,
    pub mode: LockMode,
}

/// Delivery routing for one open handle on a node: where notifications go
/// and which event kinds the handle subscribed to.
#[derive(Debug, Clone, Copy)]
pub struct Subscription {
    pub session: SessionId,
    pub event_mask: EventMask,
}

/// Mutable node state, guarded by the node mutex.
#[derive(Debug)]
pub struct NodeState {
    /// Backing file hosting extended attributes. `None` once the last handle
    /// closes; reopened by the next `open`.
    pub file: Option<File>,
    /// Ephemeral nodes have no on-disk entry and die with their last handle.
    pub ephemeral: bool,
    /// Count of successful grants since node creation; persisted on every
    /// grant so clients can detect revocation across reconnects.
    pub lock_generation: u64,
    /// Current lock mode; `None` when unlocked.
    pub current_mode: Option<LockMode>,
    /// Handle holding the exclusive lock; 0 when none.
    pub exclusive_holder: HandleId,
    /// Handles holding the shared lock.
    pub shared_holders: HashSet<HandleId>,
    /// FIFO queue of lock requests waiting for a grant.
    pub pending: VecDeque<LockRequest>,
    /// Every open handle on this node.
    pub handles: HashMap<HandleId, Subscription>,
}

/// A named entry in the hierarchical namespace.
#[derive(Debug)]
pub struct Node {
    pub name: String,
    pub state: Mutex<NodeState>,
}

impl Node {
    pub fn new(name: &str, file: File, ephemeral: bool, lock_generation: u64) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            state: Mutex::new(NodeState {
                file: Some(file),
                ephemeral,
                lock_generation,
                current_mode: None,
                exclusive_holder: 0,
                shared_holders: HashSet::new(),
                pending: VecDeque::new(),
                handles: HashMap::new(),
            }),
        })
    }
}

impl NodeState {
    /// The mode this handle currently holds, if any.
    pub fn holds_lock(&self, handle: HandleId) -> Option<LockMode> {
        if self.exclusive_holder == handle {
            return Some(LockMode::Exclusive);
        }
        if self.shared_holders.contains(&handle) {
            return Some(LockMode::Shared);
        }
        None
    }

    /// Whether any handle holds the lock.
    pub fn has_holders(&self) -> bool {
        self.exclusive_holder != 0 || !self.shared_holders.is_empty()
    }

    /// Open-handle count; the node's reference count.
    pub fn refcount(&self) -> usize {
        self.handles.len()
    }

    /// Lock-state consistency: an exclusive holder never coexists with
    /// shared holders, and the mode field always reflects the holder sets.
    pub fn lock_state_consistent(&self) -> bool {
        match self.current_mode {
            None => self.exclusive_holder == 0 && self.shared_holders.is_empty(),
            Some(LockMode::Exclusive) => {
                self.exclusive_holder != 0 && self.shared_holders.is_empty()
            }
            Some(LockMode::Shared) => {
                self.exclusive_holder == 0 && !self.shared_holders.is_empty()
            }
        }
    }

    /// Advance the lock generation and persist it on the backing file.
    ///
    /// Losing the counter's monotonicity would silently corrupt every
    /// client's view of its locks, so persistence failure is fatal.
    pub fn bump_lock_generation(&mut self, node_name: &str) -> u64 {
        self.lock_generation += 1;
        let Some(file) = self.file.as_ref() else {
            error!(node = node_name, "lock generation bump on a node with no backing file");
            process::exit(1);
        };
        if let Err(err) = fs::write_lock_generation(file, self.lock_generation) {
            error!(
                node = node_name,
                generation = self.lock_generation,
                error = %err,
                "failed to persist lock generation"
            );
            process::exit(1);
        }
        self.lock_generation
    }
}
