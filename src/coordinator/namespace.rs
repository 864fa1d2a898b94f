//! Namespace operations: mkdir, delete, open, close, attributes, exists.
//!
//! Each node is a regular file or directory under the base directory whose
//! path mirrors the node's absolute name. Node metadata is hosted in
//! extended attributes on the backing file.

use std::fs::{File, Metadata, OpenOptions};
use std::io;
use std::sync::Arc;

use tracing::debug;

use crate::coordinator::{Coordinator, Outbox};
use crate::error::{CoordError, Result};
use crate::event::{Event, EventKind};
use crate::fs;
use crate::node::{Node, Subscription};
use crate::types::{EventMask, HandleId, OpenFlags, SessionId};

impl Coordinator {
    /// Create a directory node.
    pub fn mkdir(&self, session: SessionId, name: &str) -> Result<Outbox> {
        self.authenticate(session)?;
        Self::validate_name(name)?;
        debug!(session, name, "mkdir");

        let mut outbox = Outbox::new();
        let nodes = self.nodes.lock();
        std::fs::create_dir(self.fs_path(name)).map_err(|err| CoordError::from_io(err, name))?;
        self.emit_child_event(&nodes, name, true, &mut outbox);
        Ok(outbox)
    }

    /// Remove a file or directory node from the namespace.
    pub fn delete(&self, session: SessionId, name: &str) -> Result<Outbox> {
        self.authenticate(session)?;
        Self::validate_name(name)?;
        debug!(session, name, "delete");

        let mut outbox = Outbox::new();
        let nodes = self.nodes.lock();
        let path = self.fs_path(name);
        let meta = std::fs::symlink_metadata(&path).map_err(|err| CoordError::from_io(err, name))?;
        if meta.is_dir() {
            std::fs::remove_dir(&path).map_err(|err| CoordError::from_io(err, name))?;
        } else {
            std::fs::remove_file(&path).map_err(|err| CoordError::from_io(err, name))?;
        }
        self.emit_child_event(&nodes, name, false, &mut outbox);
        Ok(outbox)
    }

    /// Whether a name currently exists on disk.
    pub fn exists(&self, session: SessionId, name: &str) -> Result<bool> {
        self.authenticate(session)?;
        Self::validate_name(name)?;
        match std::fs::symlink_metadata(self.fs_path(name)) {
            Ok(_) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(CoordError::from_io(err, name)),
        }
    }

    /// Open a handle on a node, creating the node if requested.
    ///
    /// Returns the new handle id and whether the node was created by this
    /// call; creation emits `CHILD_NODE_ADDED` to the parent.
    pub fn open(
        &self,
        session: SessionId,
        name: &str,
        flags: OpenFlags,
        event_mask: EventMask,
    ) -> Result<(HandleId, bool, Outbox)> {
        self.authenticate(session)?;
        Self::validate_name(name)?;
        debug!(session, name, ?flags, mask = event_mask.bits(), "open");

        let path = self.fs_path(name);
        let mut outbox = Outbox::new();
        let mut nodes = self.nodes.lock();

        let on_disk = match std::fs::symlink_metadata(&path) {
            Ok(meta) => Some(meta),
            Err(err) if err.kind() == io::ErrorKind::NotFound => None,
            Err(err) => return Err(CoordError::from_io(err, name)),
        };

        let mut created = false;
        let node = match nodes.get(name).cloned() {
            Some(node) => {
                {
                    let mut state = node.state.lock();
                    if state.file.is_some() || on_disk.is_some() {
                        if flags.contains(OpenFlags::CREATE) && flags.contains(OpenFlags::EXCL) {
                            return Err(CoordError::FileExists { name: name.to_string() });
                        }
                        if flags.contains(OpenFlags::TEMP) && !state.ephemeral {
                            return Err(CoordError::FileExists { name: name.to_string() });
                        }
                        if state.ephemeral && !flags.contains(OpenFlags::TEMP) {
                            return Err(CoordError::FileExists { name: name.to_string() });
                        }
                    }
                    if state.file.is_none() {
                        // All handles closed earlier; reopen the backing file.
                        let file = open_backing(&path, on_disk.as_ref(), flags, name)?;
                        created = on_disk.is_none();
                        if created {
                            // The on-disk entry was recreated; reseed its
                            // generation from the retained in-memory counter.
                            fs::write_lock_generation(&file, state.lock_generation)
                                .map_err(|err| CoordError::from_io(err, name))?;
                        }
                        if flags.contains(OpenFlags::TEMP) {
                            std::fs::remove_file(&path)
                                .map_err(|err| CoordError::from_io(err, name))?;
                            state.ephemeral = true;
                        }
                        state.file = Some(file);
                    }
                }
                node
            }
            None => {
                let file = open_backing(&path, on_disk.as_ref(), flags, name)?;
                created = on_disk.is_none();
                let lock_generation = match fs::read_lock_generation(&file) {
                    Ok(Some(generation)) => generation,
                    Ok(None) => {
                        fs::write_lock_generation(&file, 1)
                            .map_err(|err| CoordError::from_io(err, name))?;
                        1
                    }
                    Err(err) => return Err(CoordError::from_io(err, name)),
                };
                let ephemeral = flags.contains(OpenFlags::TEMP);
                if ephemeral {
                    std::fs::remove_file(&path).map_err(|err| CoordError::from_io(err, name))?;
                }
                let node = Node::new(name, file, ephemeral, lock_generation);
                nodes.insert(name.to_string(), node.clone());
                node
            }
        };

        let handle_id = {
            self.handles.lock().insert(session, name, flags, event_mask)
        };
        if let Some(owner) = self.sessions.lock().get_mut(session) {
            owner.handles.insert(handle_id);
        }
        if created {
            self.emit_child_event(&nodes, name, true, &mut outbox);
        }
        node.state.lock().handles.insert(handle_id, Subscription { session, event_mask });

        debug!(session, name, handle = handle_id, created, "opened");
        Ok((handle_id, created, outbox))
    }

    /// Close a handle. Shares the teardown path with session expiry.
    pub fn close(&self, session: SessionId, handle: HandleId) -> Result<Outbox> {
        self.authenticate(session)?;
        self.check_handle_owner(session, handle)?;
        debug!(session, handle, "close");

        let mut outbox = Outbox::new();
        self.destroy_handle(handle, true, &mut outbox)?;
        Ok(outbox)
    }

    /// Set an extended attribute on the handle's node.
    pub fn attr_set(
        &self,
        session: SessionId,
        handle: HandleId,
        attr: &str,
        value: &[u8],
    ) -> Result<Outbox> {
        self.authenticate(session)?;
        let node = self.node_of_handle(session, handle)?;
        debug!(session, handle, attr, len = value.len(), "attr_set");

        let mut outbox = Outbox::new();
        let state = node.state.lock();
        let file = backing_file(&state.file, &node.name)?;
        fs::fset_xattr(file, attr, value).map_err(|err| CoordError::from_io(err, attr))?;

        let event = Event::new(self.next_event_id(), EventKind::AttrSet { name: attr.to_string() });
        self.deliver_to_node(&state, &event, &mut outbox);
        Ok(outbox)
    }

    /// Read an extended attribute from the handle's node.
    pub fn attr_get(&self, session: SessionId, handle: HandleId, attr: &str) -> Result<Vec<u8>> {
        self.authenticate(session)?;
        let node = self.node_of_handle(session, handle)?;
        debug!(session, handle, attr, "attr_get");

        let state = node.state.lock();
        let file = backing_file(&state.file, &node.name)?;
        fs::fget_xattr(file, attr).map_err(|err| CoordError::from_io(err, attr))
    }

    /// Remove an extended attribute from the handle's node.
    pub fn attr_del(&self, session: SessionId, handle: HandleId, attr: &str) -> Result<Outbox> {
        self.authenticate(session)?;
        let node = self.node_of_handle(session, handle)?;
        debug!(session, handle, attr, "attr_del");

        let mut outbox = Outbox::new();
        let state = node.state.lock();
        let file = backing_file(&state.file, &node.name)?;
        fs::fremove_xattr(file, attr).map_err(|err| CoordError::from_io(err, attr))?;

        let event = Event::new(self.next_event_id(), EventKind::AttrDel { name: attr.to_string() });
        self.deliver_to_node(&state, &event, &mut outbox);
        Ok(outbox)
    }

    /// Tear a handle down: release its lock, detach it from its node (with
    /// reference-counted node cleanup), and detach it from its session.
    ///
    /// Used by `close` and by session expiry; only the former waits on
    /// cascaded-grant acknowledgement.
    pub(crate) fn destroy_handle(
        &self,
        handle_id: HandleId,
        wait: bool,
        outbox: &mut Outbox,
    ) -> Result<()> {
        let handle = self
            .handles
            .lock()
            .remove(handle_id)
            .ok_or(CoordError::InvalidHandle { handle: handle_id })?;

        let node = self.nodes.lock().get(&handle.node).cloned();
        if let Some(node) = node {
            let mut removed_ephemeral = false;
            {
                let mut state = node.state.lock();
                self.release_lock_locked(&node, &mut state, handle_id, wait, outbox);
                state.handles.remove(&handle_id);
                if state.handles.is_empty() {
                    // Last handle: close the backing descriptor.
                    state.file = None;
                    removed_ephemeral = state.ephemeral;
                }
            }
            if removed_ephemeral {
                let mut nodes = self.nodes.lock();
                nodes.remove(&node.name);
                self.emit_child_event(&nodes, &node.name, false, outbox);
                debug!(node = %node.name, "ephemeral node removed");
            }
        }

        if let Some(owner) = self.sessions.lock().get_mut(handle.session) {
            owner.handles.remove(&handle_id);
        }
        Ok(())
    }

    /// Resolve a handle to its node, checking ownership.
    pub(crate) fn node_of_handle(
        &self,
        session: SessionId,
        handle: HandleId,
    ) -> Result<Arc<Node>> {
        let node_name = {
            let handles = self.handles.lock();
            let entry = handles
                .get(handle)
                .ok_or(CoordError::InvalidHandle { handle })?;
            if entry.session != session {
                return Err(CoordError::InvalidHandle { handle });
            }
            entry.node.clone()
        };
        self.nodes
            .lock()
            .get(&node_name)
            .cloned()
            .ok_or(CoordError::InvalidHandle { handle })
    }

    pub(crate) fn check_handle_owner(&self, session: SessionId, handle: HandleId) -> Result<()> {
        let handles = self.handles.lock();
        let entry = handles
            .get(handle)
            .ok_or(CoordError::InvalidHandle { handle })?;
        if entry.session != session {
            return Err(CoordError::InvalidHandle { handle });
        }
        Ok(())
    }
}

fn backing_file<'a>(file: &'a Option<File>, name: &str) -> Result<&'a File> {
    file.as_ref().ok_or_else(|| CoordError::Io {
        name: name.to_string(),
        message: "backing file is closed".to_string(),
    })
}

/// Open (or create) the on-disk entry backing a node. Directories open
/// read-only; files open read-write.
fn open_backing(
    path: &std::path::Path,
    on_disk: Option<&Metadata>,
    flags: OpenFlags,
    name: &str,
) -> Result<File> {
    let result = match on_disk {
        Some(_) if flags.contains(OpenFlags::CREATE) && flags.contains(OpenFlags::EXCL) => {
            return Err(CoordError::FileExists { name: name.to_string() });
        }
        Some(meta) if meta.is_dir() => OpenOptions::new().read(true).open(path),
        Some(_) => OpenOptions::new().read(true).write(true).open(path),
        None => {
            if !flags.contains(OpenFlags::CREATE) {
                return Err(CoordError::BadPathname { name: name.to_string() });
            }
            let mut options = OpenOptions::new();
            options.read(true).write(true).create(true);
            if flags.contains(OpenFlags::EXCL) {
                options.create_new(true);
            }
            options.open(path)
        }
    };
    result.map_err(|err| CoordError::from_io(err, name))
}
