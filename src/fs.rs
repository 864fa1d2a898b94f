//! Filesystem plumbing: base-directory ownership and extended attributes.
//!
//! Node metadata lives in extended attributes on the backing files. Linux
//! restricts unprivileged processes to the `user.` namespace, so every
//! attribute name is prefixed with `user.` on disk; the prefix never appears
//! on the wire. Internal counters live under `user.madrone.*` to keep them
//! out of the way of client attributes.

use std::ffi::CString;
use std::fs::File;
use std::io;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::{info, warn};

use crate::error::{CoordError, Result};

/// Base-directory startup counter, bumped on every coordinator start.
const BASE_GENERATION_ATTR: &str = "madrone.generation";

/// Per-node lock generation counter, bumped on every successful grant.
const LOCK_GENERATION_ATTR: &str = "madrone.lock.generation";

fn xattr_cname(name: &str) -> io::Result<CString> {
    CString::new(format!("user.{name}"))
        .map_err(|_| io::Error::from_raw_os_error(libc::EINVAL))
}

/// Set an extended attribute on an open file.
pub fn fset_xattr(file: &File, name: &str, value: &[u8]) -> io::Result<()> {
    let cname = xattr_cname(name)?;
    let res = unsafe {
        libc::fsetxattr(
            file.as_raw_fd(),
            cname.as_ptr(),
            value.as_ptr() as *const libc::c_void,
            value.len(),
            0,
        )
    };
    if res < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Read an extended attribute from an open file. Missing attributes surface
/// as `ENODATA`.
pub fn fget_xattr(file: &File, name: &str) -> io::Result<Vec<u8>> {
    let cname = xattr_cname(name)?;
    let len = unsafe {
        libc::fgetxattr(file.as_raw_fd(), cname.as_ptr(), std::ptr::null_mut(), 0)
    };
    if len < 0 {
        return Err(io::Error::last_os_error());
    }
    let mut buf = vec![0u8; len as usize];
    let len = unsafe {
        libc::fgetxattr(
            file.as_raw_fd(),
            cname.as_ptr(),
            buf.as_mut_ptr() as *mut libc::c_void,
            buf.len(),
        )
    };
    if len < 0 {
        return Err(io::Error::last_os_error());
    }
    buf.truncate(len as usize);
    Ok(buf)
}

/// Remove an extended attribute from an open file.
pub fn fremove_xattr(file: &File, name: &str) -> io::Result<()> {
    let cname = xattr_cname(name)?;
    let res = unsafe { libc::fremovexattr(file.as_raw_fd(), cname.as_ptr()) };
    if res < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn is_missing_attr(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::ENODATA)
}

/// Read the per-node lock generation counter, `None` if never written.
pub fn read_lock_generation(file: &File) -> io::Result<Option<u64>> {
    match fget_xattr(file, LOCK_GENERATION_ATTR) {
        Ok(bytes) => {
            let mut raw = [0u8; 8];
            let n = bytes.len().min(8);
            raw[..n].copy_from_slice(&bytes[..n]);
            Ok(Some(u64::from_le_bytes(raw)))
        }
        Err(err) if is_missing_attr(&err) => Ok(None),
        Err(err) => Err(err),
    }
}

/// Persist the per-node lock generation counter.
pub fn write_lock_generation(file: &File, generation: u64) -> io::Result<()> {
    fset_xattr(file, LOCK_GENERATION_ATTR, &generation.to_le_bytes())
}

/// The coordinator's claim on its base directory.
///
/// Holds the directory file descriptor (and with it the exclusive advisory
/// lock) for the life of the process; dropping it releases the singleton.
#[derive(Debug)]
pub struct BaseDir {
    dir: File,
    path: PathBuf,
    generation: u32,
}

impl BaseDir {
    /// Open the base directory, take the exclusive advisory lock, and bump
    /// the startup generation.
    ///
    /// Failure to take the lock means another coordinator owns the
    /// directory; callers treat that as fatal.
    pub fn acquire(path: &Path) -> Result<Self> {
        let dir = File::open(path)
            .map_err(|err| CoordError::from_io(err, &path.display().to_string()))?;

        if dir.try_lock_exclusive().is_err() {
            return Err(CoordError::BaseDirLocked { path: path.to_path_buf() });
        }

        let generation = match fget_xattr(&dir, BASE_GENERATION_ATTR) {
            Ok(bytes) => {
                let mut raw = [0u8; 4];
                let n = bytes.len().min(4);
                raw[..n].copy_from_slice(&bytes[..n]);
                u32::from_le_bytes(raw).wrapping_add(1)
            }
            Err(err) if is_missing_attr(&err) => {
                info!(path = %path.display(), "no startup generation on base directory, creating");
                1
            }
            Err(err) => {
                return Err(CoordError::from_io(err, &path.display().to_string()));
            }
        };

        if let Err(err) = fset_xattr(&dir, BASE_GENERATION_ATTR, &generation.to_le_bytes()) {
            warn!(path = %path.display(), error = %err, "failed to persist startup generation");
            return Err(CoordError::from_io(err, &path.display().to_string()));
        }

        info!(path = %path.display(), generation, "acquired base directory");
        Ok(Self {
            dir,
            path: path.to_path_buf(),
            generation,
        })
    }

    /// The startup generation recorded for this run.
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// The base directory path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for BaseDir {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.dir);
    }
}
