//! Error taxonomy for the pool import engine.
//!
//! Every failure mode of the search/import pipeline is a distinct variant so
//! the driver boundary can resolve each one into a process exit status without
//! string matching. Only DESTROYED-record skips are silent; everything else
//! surfaces here.

use thiserror::Error;

/// Convenience alias used across all fzp crates.
pub type Result<T> = std::result::Result<T, FzpError>;

/// Remediation hint appended to ownership failures.
pub const FORCE_HINT: &str = "use --force to import anyway";

/// Unified error type for the import engine.
#[derive(Debug, Error)]
pub enum FzpError {
    /// The persisted cache (or a live label) could not be parsed, or a record
    /// inside it fails required-key validation. Fatal for the whole search:
    /// a corrupt entry invalidates the batch rather than being skipped.
    #[error("malformed cache store: {0}")]
    MalformedCache(String),

    /// The store parsed cleanly but contained no records at all.
    #[error("cache store is empty: nothing to search")]
    EmptyStore,

    /// Records existed but none matched the search criteria.
    #[error("cannot import '{0}': no such pool available")]
    NoMatchingPool(String),

    /// Several surviving candidates share the requested name and the caller
    /// asked for ambiguity to be rejected rather than resolved.
    #[error("cannot import '{0}': more than one matching pool; import by guid instead")]
    AmbiguousName(String),

    /// On-disk format version outside the supported range. Not retryable.
    #[error("cannot import '{pool}': pool is formatted using an unsupported version ({version})")]
    UnsupportedVersion { pool: String, version: u64 },

    /// The record carries another host's id. The only escape hatch is an
    /// explicit caller-supplied override.
    #[error(
        "cannot import '{pool}': pool may be in use from other system, \
         it was last accessed by {hostname} (hostid: {hostid:#x}) at {timestamp}; {FORCE_HINT}"
    )]
    OwnershipConflict {
        pool: String,
        hostname: String,
        hostid: u32,
        /// Unix seconds of the recorded last access (0 when unrecorded).
        timestamp: u64,
    },

    /// No recorded hostid: safety cannot be proven, so fail closed.
    #[error("cannot import '{pool}': pool may be in use from other system; {FORCE_HINT}")]
    OwnershipUnknown { pool: String },

    /// The runtime attach primitive failed, or the pool could not be re-opened
    /// after attach. Diagnostics are delegated to the runtime.
    #[error("cannot attach '{pool}': {detail}")]
    AttachFailed { pool: String, detail: String },

    /// Attach succeeded but mounting contained volumes failed. The pool stays
    /// attached; this is a valid terminal state.
    #[error("pool '{pool}' attached but volumes failed to mount: {detail}")]
    MountFailed { pool: String, detail: String },

    /// Caller lacks the privilege required to enumerate pools.
    #[error("cannot discover pools: permission denied")]
    PermissionDenied,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Invariant violation inside the engine itself.
    #[error("internal error: {0}")]
    Internal(String),
}

impl FzpError {
    /// Build an [`FzpError::Internal`] from anything string-like.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Map this error onto the process exit-status vocabulary.
    ///
    /// 1 = explicit failure (not found, conflict, version, attach/mount),
    /// 2 = permission, 3 = malformed input. 0 is never produced here.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::EmptyStore
            | Self::NoMatchingPool(_)
            | Self::AmbiguousName(_)
            | Self::UnsupportedVersion { .. }
            | Self::OwnershipConflict { .. }
            | Self::OwnershipUnknown { .. }
            | Self::AttachFailed { .. }
            | Self::MountFailed { .. } => 1,
            Self::PermissionDenied => 2,
            Self::MalformedCache(_) => 3,
            Self::Io(_) | Self::Internal(_) => 1,
        }
    }

    /// Whether retrying with `allow_any_host` could change the outcome.
    #[must_use]
    pub fn is_overridable(&self) -> bool {
        matches!(
            self,
            Self::OwnershipConflict { .. } | Self::OwnershipUnknown { .. }
        )
    }
}
