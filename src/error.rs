//! Error taxonomy for coordinator operations.
//!
//! Every request handler catches its own failures and answers with the wire
//! code of the matching variant; no failure propagates across requests.
//! Filesystem errors are folded into the taxonomy through [`CoordError::from_io`].

use std::path::PathBuf;

use snafu::Snafu;

/// Result type for coordinator operations.
pub type Result<T, E = CoordError> = std::result::Result<T, E>;

/// Errors visible to clients, plus the startup failures that never reach the
/// wire. Wire codes are stable; 0 is reserved for success.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CoordError {
    /// The session id is unknown or its lease has lapsed.
    #[snafu(display("session {session} is expired or unknown"))]
    ExpiredSession { session: u64 },

    /// The handle id is absent from the handle table.
    #[snafu(display("handle {handle} is not open"))]
    InvalidHandle { handle: u64 },

    #[snafu(display("node '{name}' already exists"))]
    FileExists { name: String },

    #[snafu(display("bad pathname '{name}'"))]
    BadPathname { name: String },

    #[snafu(display("permission denied on '{name}'"))]
    PermissionDenied { name: String },

    #[snafu(display("i/o error on '{name}': {message}"))]
    Io { name: String, message: String },

    #[snafu(display("attribute '{name}' not found"))]
    AttrNotFound { name: String },

    /// The operation is not permitted by the handle's open flags.
    #[snafu(display("mode restriction: {message}"))]
    ModeRestriction { message: String },

    #[snafu(display("protocol error: {message}"))]
    Protocol { message: String },

    #[snafu(display("directory '{name}' is not empty"))]
    DirectoryNotEmpty { name: String },

    /// The handle already holds a lock on its node.
    #[snafu(display("handle {handle} already holds a lock"))]
    LockConflict { handle: u64 },

    /// Another coordinator holds the advisory lock on the base directory.
    /// Startup-only; never sent on the wire.
    #[snafu(display("base directory '{}' is locked by another process", path.display()))]
    BaseDirLocked { path: PathBuf },
}

impl CoordError {
    /// Stable wire code for this error.
    pub fn code(&self) -> u32 {
        match self {
            CoordError::ExpiredSession { .. } => 1,
            CoordError::InvalidHandle { .. } => 2,
            CoordError::FileExists { .. } => 3,
            CoordError::BadPathname { .. } => 4,
            CoordError::PermissionDenied { .. } => 5,
            CoordError::Io { .. } => 6,
            CoordError::AttrNotFound { .. } => 7,
            CoordError::ModeRestriction { .. } => 8,
            CoordError::Protocol { .. } => 9,
            CoordError::DirectoryNotEmpty { .. } => 10,
            CoordError::LockConflict { .. } => 11,
            CoordError::BaseDirLocked { .. } => 6,
        }
    }

    /// Fold a filesystem error into the taxonomy, naming the path or
    /// attribute the operation touched.
    pub fn from_io(err: std::io::Error, name: &str) -> Self {
        match err.raw_os_error() {
            Some(libc::ENOENT) | Some(libc::ENOTDIR) | Some(libc::ENAMETOOLONG) => {
                CoordError::BadPathname { name: name.to_string() }
            }
            Some(libc::EACCES) | Some(libc::EPERM) => {
                CoordError::PermissionDenied { name: name.to_string() }
            }
            Some(libc::EEXIST) => CoordError::FileExists { name: name.to_string() },
            // ENOATTR is ENODATA on Linux.
            Some(libc::ENODATA) => CoordError::AttrNotFound { name: name.to_string() },
            Some(libc::ENOTEMPTY) => CoordError::DirectoryNotEmpty { name: name.to_string() },
            _ => CoordError::Io {
                name: name.to_string(),
                message: err.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn os_err(code: i32) -> std::io::Error {
        std::io::Error::from_raw_os_error(code)
    }

    #[test]
    fn errno_mapping_matches_taxonomy() {
        assert!(matches!(
            CoordError::from_io(os_err(libc::ENOENT), "/a"),
            CoordError::BadPathname { .. }
        ));
        assert!(matches!(
            CoordError::from_io(os_err(libc::EEXIST), "/a"),
            CoordError::FileExists { .. }
        ));
        assert!(matches!(
            CoordError::from_io(os_err(libc::EACCES), "/a"),
            CoordError::PermissionDenied { .. }
        ));
        assert!(matches!(
            CoordError::from_io(os_err(libc::ENODATA), "k"),
            CoordError::AttrNotFound { .. }
        ));
        assert!(matches!(
            CoordError::from_io(os_err(libc::ENOTEMPTY), "/d"),
            CoordError::DirectoryNotEmpty { .. }
        ));
        assert!(matches!(
            CoordError::from_io(os_err(libc::EIO), "/a"),
            CoordError::Io { .. }
        ));
    }

    #[test]
    fn wire_codes_are_distinct_for_client_errors() {
        let errors = [
            CoordError::ExpiredSession { session: 1 },
            CoordError::InvalidHandle { handle: 1 },
            CoordError::FileExists { name: "/a".into() },
            CoordError::BadPathname { name: "/a".into() },
            CoordError::PermissionDenied { name: "/a".into() },
            CoordError::Io { name: "/a".into(), message: "eio".into() },
            CoordError::AttrNotFound { name: "k".into() },
            CoordError::ModeRestriction { message: "no".into() },
            CoordError::Protocol { message: "short".into() },
            CoordError::DirectoryNotEmpty { name: "/d".into() },
            CoordError::LockConflict { handle: 1 },
        ];
        let mut codes: Vec<u32> = errors.iter().map(|e| e.code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }
}
