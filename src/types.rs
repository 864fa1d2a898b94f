//! Shared identifier and flag types.

use bitflags::bitflags;

/// Session identifier. Monotonically increasing, never reused within a
/// process lifetime. 0 is never a valid session.
pub type SessionId = u64;

/// Handle identifier. Monotonically increasing, never reused within a
/// process lifetime. 0 is never a valid handle.
pub type HandleId = u64;

/// Event identifier. Monotonically increasing; defines the total order of
/// events on a node.
pub type EventId = u64;

bitflags! {
    /// Flags supplied to `open`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        const READ = 0x01;
        const WRITE = 0x02;
        const LOCK = 0x04;
        const CREATE = 0x08;
        const EXCL = 0x10;
        const TEMP = 0x20;
    }
}

bitflags! {
    /// Per-handle subscription mask selecting which event kinds are
    /// delivered to the handle's session.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EventMask: u32 {
        const ATTR_SET = 0x01;
        const ATTR_DEL = 0x02;
        const CHILD_NODE_ADDED = 0x04;
        const CHILD_NODE_REMOVED = 0x08;
        const LOCK_ACQUIRED = 0x10;
        const LOCK_RELEASED = 0x20;
        const LOCK_GRANTED = 0x40;
    }
}

/// Advisory lock mode requested on a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

impl LockMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockMode::Shared => "shared",
            LockMode::Exclusive => "exclusive",
        }
    }

    pub fn to_wire(self) -> u32 {
        match self {
            LockMode::Shared => 1,
            LockMode::Exclusive => 2,
        }
    }

    pub fn from_wire(value: u32) -> Option<Self> {
        match value {
            1 => Some(LockMode::Shared),
            2 => Some(LockMode::Exclusive),
            _ => None,
        }
    }
}

/// Outcome of a lock request. Busy and Pending are not errors; they tell the
/// client whether the request was rejected (try-acquire) or queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStatus {
    Granted,
    Busy,
    Pending,
}

impl LockStatus {
    pub fn to_wire(self) -> u32 {
        match self {
            LockStatus::Granted => 1,
            LockStatus::Busy => 2,
            LockStatus::Pending => 3,
        }
    }

    pub fn from_wire(value: u32) -> Option<Self> {
        match value {
            1 => Some(LockStatus::Granted),
            2 => Some(LockStatus::Busy),
            3 => Some(LockStatus::Pending),
            _ => None,
        }
    }
}
