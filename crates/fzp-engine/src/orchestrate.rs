//! Import orchestrator: attach, re-open, mount, release.
//!
//! Partial success is deliberate: when attach succeeds but mounting volumes
//! fails, the pool stays attached. Detaching an otherwise-healthy pool over a
//! mount error would be more destructive than leaving it attached-but-
//! unmounted, and some volumes may already have mounted.

use fzp_error::{FzpError, Result};
use fzp_types::{ImportMode, PoolState};
use tracing::{debug, info};

use crate::filter::Candidate;
use crate::runtime::{PoolHandle, PoolRuntime};

/// Outcome details of a successful orchestration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachOutcome {
    /// Whether contained volumes were mounted (full import of a live pool).
    pub mounted: bool,
}

/// Drive one eligible candidate through attach and mount.
///
/// Attach failures are fatal for the candidate with no retry; the runtime has
/// already logged the root cause. A failed re-open is treated as attach not
/// having really succeeded. The live handle is released on every path.
pub fn import_pool(
    runtime: &mut dyn PoolRuntime,
    candidate: &Candidate,
    rename: Option<&str>,
) -> Result<AttachOutcome> {
    let config = &candidate.config;

    runtime
        .attach(config, &candidate.policy, rename)
        .map_err(|source| FzpError::AttachFailed {
            pool: config.name.clone(),
            detail: source.to_string(),
        })?;

    let effective_name = rename.unwrap_or(&config.name);
    let handle = runtime
        .open(effective_name)
        .map_err(|source| FzpError::AttachFailed {
            pool: effective_name.to_owned(),
            detail: format!("attached but could not be opened: {source}"),
        })?;

    let outcome = mount_step(runtime, &handle, candidate);
    runtime.close(handle);
    outcome
}

fn mount_step(
    runtime: &mut dyn PoolRuntime,
    handle: &PoolHandle,
    candidate: &Candidate,
) -> Result<AttachOutcome> {
    if candidate.policy.mode != ImportMode::Full {
        debug!(pool = %handle.name(), "attach-only import; skipping volume mount");
        return Ok(AttachOutcome { mounted: false });
    }

    let state = runtime.pool_state(handle)?;
    if state == PoolState::Unavail {
        debug!(pool = %handle.name(), "pool attached but unavailable; skipping volume mount");
        return Ok(AttachOutcome { mounted: false });
    }

    runtime
        .mount_volumes(handle)
        .map_err(|source| FzpError::MountFailed {
            pool: handle.name().to_owned(),
            detail: source.to_string(),
        })?;

    info!(pool = %handle.name(), "pool imported and volumes mounted");
    Ok(AttachOutcome { mounted: true })
}
