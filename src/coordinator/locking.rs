//! The per-node lock state machine.
//!
//! Lock requests are serialized under the node mutex. A request that cannot
//! be granted is either rejected (try-acquire) or appended to the node's
//! FIFO queue; releases drain the queue head, granting one exclusive request
//! or a contiguous run of shared requests. A shared request arriving while
//! the queue is non-empty queues behind it, which keeps waiting writers from
//! starving.

use tracing::debug;

use crate::coordinator::{Coordinator, Outbox};
use crate::error::{CoordError, Result};
use crate::event::{Event, EventKind};
use crate::node::{LockRequest, Node, NodeState};
use crate::types::{HandleId, LockMode, LockStatus, OpenFlags, SessionId};

impl Coordinator {
    /// Request a lock on the handle's node.
    ///
    /// The handle must have been opened with LOCK and WRITE. On grant the
    /// node's lock generation is advanced and persisted and the new
    /// generation is returned; otherwise the generation is 0.
    pub fn lock(
        &self,
        session: SessionId,
        handle: HandleId,
        mode: LockMode,
        try_acquire: bool,
    ) -> Result<(LockStatus, u64, Outbox)> {
        self.authenticate(session)?;
        let flags = {
            let handles = self.handles.lock();
            let entry = handles
                .get(handle)
                .ok_or(CoordError::InvalidHandle { handle })?;
            if entry.session != session {
                return Err(CoordError::InvalidHandle { handle });
            }
            entry.flags
        };
        if !flags.contains(OpenFlags::LOCK) {
            return Err(CoordError::ModeRestriction {
                message: "handle not open for locking".to_string(),
            });
        }
        if !flags.contains(OpenFlags::WRITE) {
            return Err(CoordError::ModeRestriction {
                message: "handle not open for writing".to_string(),
            });
        }

        let node = self.node_of_handle(session, handle)?;
        let mut outbox = Outbox::new();
        let mut state = node.state.lock();

        if state.holds_lock(handle).is_some() {
            return Err(CoordError::LockConflict { handle });
        }

        let blocked = match (state.current_mode, mode) {
            (Some(LockMode::Exclusive), _) => true,
            (Some(LockMode::Shared), LockMode::Exclusive) => true,
            // FIFO fairness: a shared request queues behind any waiter so
            // pending exclusive requests cannot starve.
            (Some(LockMode::Shared), LockMode::Shared) => !state.pending.is_empty(),
            (None, _) => false,
        };

        if blocked {
            if try_acquire {
                debug!(node = %node.name, handle, mode = mode.as_str(), "lock busy");
                return Ok((LockStatus::Busy, 0, outbox));
            }
            state.pending.push_back(LockRequest { handle, mode });
            debug!(node = %node.name, handle, mode = mode.as_str(), "lock pending");
            return Ok((LockStatus::Pending, 0, outbox));
        }

        // Joining an already-shared lock changes nothing from observers'
        // perspective, so no LOCK_ACQUIRED is emitted for it.
        let joining_shared = mode == LockMode::Shared && !state.shared_holders.is_empty();

        let generation = state.bump_lock_generation(&node.name);
        state.current_mode = Some(mode);
        match mode {
            LockMode::Exclusive => state.exclusive_holder = handle,
            LockMode::Shared => {
                state.shared_holders.insert(handle);
            }
        }
        if let Some(entry) = self.handles.lock().get_mut(handle) {
            entry.locked = Some(mode);
        }

        if !joining_shared {
            let event = Event::new(self.next_event_id(), EventKind::LockAcquired { mode });
            self.deliver_to_node(&state, &event, &mut outbox);
        }

        debug_assert!(state.lock_state_consistent());
        debug!(node = %node.name, handle, mode = mode.as_str(), generation, "lock granted");
        Ok((LockStatus::Granted, generation, outbox))
    }

    /// Release whatever lock the handle holds. A no-op for unlocked handles.
    pub fn release(&self, session: SessionId, handle: HandleId) -> Result<Outbox> {
        self.authenticate(session)?;
        let node = self.node_of_handle(session, handle)?;
        let mut outbox = Outbox::new();
        let mut state = node.state.lock();
        self.release_lock_locked(&node, &mut state, handle, true, &mut outbox);
        Ok(outbox)
    }

    /// Release a handle's lock and drain the pending queue.
    ///
    /// Caller holds the node mutex. When `wait` is set, cascaded grants (and
    /// the release broadcast) are added to the outbox barrier so the
    /// initiating request blocks until every target session acknowledges.
    pub(crate) fn release_lock_locked(
        &self,
        node: &Node,
        state: &mut NodeState,
        handle: HandleId,
        wait: bool,
        outbox: &mut Outbox,
    ) {
        let Some(held) = state.holds_lock(handle) else {
            return;
        };
        match held {
            LockMode::Exclusive => state.exclusive_holder = 0,
            LockMode::Shared => {
                state.shared_holders.remove(&handle);
            }
        }
        if let Some(entry) = self.handles.lock().get_mut(handle) {
            entry.locked = None;
        }
        debug!(node = %node.name, handle, mode = held.as_str(), "lock released");

        if state.has_holders() {
            return;
        }
        state.current_mode = None;

        let released = Event::new(self.next_event_id(), EventKind::LockReleased);
        self.deliver_to_node(state, &released, outbox);
        if wait {
            outbox.barriers.push(released);
        }

        // Drain the queue head: one exclusive request, or every shared
        // request up to the first exclusive one.
        let Some(front) = state.pending.front().copied() else {
            return;
        };
        let next_mode = front.mode;
        let mut batch: Vec<HandleId> = Vec::new();
        match next_mode {
            LockMode::Exclusive => {
                state.pending.pop_front();
                batch.push(front.handle);
            }
            LockMode::Shared => {
                while let Some(request) = state.pending.front().copied() {
                    if request.mode != LockMode::Shared {
                        break;
                    }
                    state.pending.pop_front();
                    batch.push(request.handle);
                }
            }
        }
        // Requests whose handles closed while queued are dropped.
        batch.retain(|id| state.handles.contains_key(id));
        if batch.is_empty() {
            return;
        }

        let generation = state.bump_lock_generation(&node.name);
        state.current_mode = Some(next_mode);
        for id in &batch {
            match next_mode {
                LockMode::Exclusive => state.exclusive_holder = *id,
                LockMode::Shared => {
                    state.shared_holders.insert(*id);
                }
            }
            if let Some(entry) = self.handles.lock().get_mut(*id) {
                entry.locked = Some(next_mode);
            }
            let granted = Event::new(
                self.next_event_id(),
                EventKind::LockGranted { mode: next_mode, generation },
            );
            if let Some(sub) = state.handles.get(id) {
                self.deliver_to_handle(*id, sub.session, &granted, outbox);
            }
            if wait {
                outbox.barriers.push(granted);
            }
            debug!(
                node = %node.name,
                handle = id,
                mode = next_mode.as_str(),
                generation,
                "queued lock granted"
            );
        }

        let acquired = Event::new(self.next_event_id(), EventKind::LockAcquired { mode: next_mode });
        self.deliver_to_node(state, &acquired, outbox);
        if wait {
            outbox.barriers.push(acquired);
        }
        debug_assert!(state.lock_state_consistent());
    }
}
