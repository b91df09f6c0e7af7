//! Error types for the asset-vcs crate.
//!
//! This module defines a unified error enumeration used across object
//! storage, the working index, the commit engine, the lock manager, and the
//! sync protocol. It integrates with `thiserror` to provide rich `Display`
//! implementations and error source chaining where applicable.
//!
//! Notes:
//! - Each variant carries contextual details via its message payload.
//! - `exit_code` maps variants to the driver's process exit codes.
//! - `AlreadyHeld` and `NonFastForward` are expected, user-visible outcomes
//!   rather than failures of the engine itself.

use thiserror::Error;

#[derive(Error, Debug)]
/// Unified error enumeration for the asset-vcs engine.
///
/// - Used across object storage, index handling, commits, locks and sync.
/// - Implements `std::error::Error` via `thiserror`.
pub enum VcsError {
    /// Object, ref, lock, or session absent.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Lock is already held by another user.
    #[error("Lock on `{path}` is already held by {holder}")]
    AlreadyHeld { path: String, holder: String },

    /// Lock release attempted by a non-holder.
    #[error("Lock on `{path}` is held by {holder}, not by the caller")]
    NotOwner { path: String, holder: String },

    /// Push conflicts with remote history.
    #[error("Branch `{0}` has diverged from the remote")]
    NonFastForward(String),

    /// Commit attempted with no staged index entries.
    #[error("Nothing staged for commit")]
    NothingStaged,

    /// Index magic, version, or checksum mismatch.
    #[error("Index file is corrupt: {0}")]
    IndexCorrupt(String),

    /// Stored object bytes no longer match their hash.
    #[error("Object `{0}` is corrupt: {1}")]
    ObjectCorrupt(String, String),

    /// A ref or commit points at an object the store does not hold.
    #[error("Missing object `{0}` referenced by {1}")]
    MissingObject(String, String),

    /// A network or coordination operation exceeded its deadline.
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Session expired or credentials rejected.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Caller lacks the capability for the operation.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// I/O error from an underlying reader, writer, or filesystem call.
    #[error("IO error: {0}")]
    IO(#[from] std::io::Error),

    /// The object store volume is out of space.
    #[error("Disk full while writing {0}")]
    DiskFull(String),

    /// Protocol-level conflict, e.g. a push that requires a pull first.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Malformed object payload (bad envelope, bad tree entry, bad commit
    /// header).
    #[error("Invalid object: {0}")]
    InvalidObject(String),

    /// Invalid function or wire argument.
    #[error("Argument parse failed: {0}")]
    InvalidArgument(String),
}

/// ENOSPC as reported by every Unix the store targets; full-disk detection
/// is advisory elsewhere.
const ENOSPC: i32 = 28;

impl VcsError {
    /// Classify an I/O error, surfacing full-disk conditions as their own
    /// kind so callers can distinguish them from transient write failures.
    pub fn from_io(err: std::io::Error, context: &str) -> Self {
        if err.raw_os_error() == Some(ENOSPC) {
            VcsError::DiskFull(context.to_string())
        } else {
            VcsError::IO(err)
        }
    }

    /// Driver exit code for this error kind.
    ///
    /// 0 success, 1 generic error, 2 usage, 3 lock conflict,
    /// 4 non-fast-forward push, 5 corrupt index/object.
    pub fn exit_code(&self) -> i32 {
        match self {
            VcsError::InvalidArgument(_) => 2,
            VcsError::AlreadyHeld { .. } => 3,
            VcsError::NonFastForward(_) => 4,
            VcsError::IndexCorrupt(_) | VcsError::ObjectCorrupt(_, _) => 5,
            _ => 1,
        }
    }

    /// One-line actionable hint shown by the driver alongside the message.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            VcsError::AlreadyHeld { .. } => {
                Some("wait for the holder to release, or ask them to unlock")
            }
            VcsError::NonFastForward(_) => Some("branch has diverged - run pull first"),
            VcsError::NothingStaged => Some("add files before committing"),
            VcsError::IndexCorrupt(_) => Some("restore the index from backup or re-add files"),
            VcsError::ObjectCorrupt(_, _) => Some("re-fetch the object from the server"),
            VcsError::Conflict(_) => Some("pull the remote commits and retry the push"),
            _ => None,
        }
    }

    /// True for outcomes a client is expected to handle in its normal flow.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            VcsError::NotFound(_)
                | VcsError::AlreadyHeld { .. }
                | VcsError::NonFastForward(_)
                | VcsError::NothingStaged
                | VcsError::Conflict(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Exit codes must follow the driver contract.
    #[test]
    fn test_exit_codes() {
        assert_eq!(
            VcsError::AlreadyHeld {
                path: "level.umap".to_string(),
                holder: "alice".to_string()
            }
            .exit_code(),
            3
        );
        assert_eq!(VcsError::NonFastForward("main".to_string()).exit_code(), 4);
        assert_eq!(VcsError::IndexCorrupt("checksum".to_string()).exit_code(), 5);
        assert_eq!(
            VcsError::ObjectCorrupt("abc".to_string(), "hash mismatch".to_string()).exit_code(),
            5
        );
        assert_eq!(
            VcsError::InvalidArgument("bad flag".to_string()).exit_code(),
            2
        );
        assert_eq!(VcsError::NothingStaged.exit_code(), 1);
    }

    /// Full-disk I/O errors should classify as DiskFull.
    #[test]
    fn test_from_io_enospc() {
        let err = std::io::Error::from_raw_os_error(ENOSPC);
        match VcsError::from_io(err, "objects/ab") {
            VcsError::DiskFull(ctx) => assert_eq!(ctx, "objects/ab"),
            other => panic!("expected DiskFull, got {other:?}"),
        }
    }

    /// Other I/O errors pass through as IO.
    #[test]
    fn test_from_io_other() {
        let err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert!(matches!(VcsError::from_io(err, "x"), VcsError::IO(_)));
    }

    /// Expected user-visible outcomes are recoverable.
    #[test]
    fn test_recoverable() {
        assert!(VcsError::NothingStaged.is_recoverable());
        assert!(!VcsError::IndexCorrupt("bad magic".to_string()).is_recoverable());
    }

    /// Expected outcomes carry an actionable hint; plumbing errors do not.
    #[test]
    fn test_hints() {
        assert!(
            VcsError::NonFastForward("main".to_string())
                .hint()
                .unwrap()
                .contains("pull")
        );
        assert!(VcsError::NotFound("x".to_string()).hint().is_none());
    }
}
