//! Open handles and the handle table.

use std::collections::HashMap;

use crate::types::{EventMask, HandleId, LockMode, OpenFlags, SessionId};

/// A per-session reference to an open node.
#[derive(Debug, Clone)]
pub struct Handle {
    pub id: HandleId,
    pub session: SessionId,
    /// Absolute name of the node this handle is bound to.
    pub node: String,
    pub flags: OpenFlags,
    pub event_mask: EventMask,
    /// The mode this handle holds on its node, if any.
    pub locked: Option<LockMode>,
}

/// Table of every open handle, keyed by id. Ids are monotonic and never
/// reused within a process lifetime.
#[derive(Debug)]
pub struct HandleTable {
    next_id: HandleId,
    handles: HashMap<HandleId, Handle>,
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            handles: HashMap::new(),
        }
    }

    /// Allocate a fresh handle bound to `node`.
    pub fn insert(
        &mut self,
        session: SessionId,
        node: &str,
        flags: OpenFlags,
        event_mask: EventMask,
    ) -> HandleId {
        let id = self.next_id;
        self.next_id += 1;
        self.handles.insert(
            id,
            Handle {
                id,
                session,
                node: node.to_string(),
                flags,
                event_mask,
                locked: None,
            },
        );
        id
    }

    pub fn get(&self, id: HandleId) -> Option<&Handle> {
        self.handles.get(&id)
    }

    pub fn get_mut(&mut self, id: HandleId) -> Option<&mut Handle> {
        self.handles.get_mut(&id)
    }

    pub fn remove(&mut self, id: HandleId) -> Option<Handle> {
        self.handles.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}
