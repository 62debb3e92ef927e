//! Ownership resolver: is this host allowed to import this candidate?
//!
//! The safety invariant of the whole subsystem lives here: a pool is never
//! silently imported while potentially in use by another host. The only
//! escape hatch is the caller-supplied `allow_any_host` override.

use fzp_error::{FzpError, Result};
use fzp_types::PoolState;
use tracing::{debug, warn};

use crate::filter::Candidate;
use crate::runtime::HostIdentity;

/// Decide import eligibility for one candidate.
///
/// Check order matters: an unsupported version wins over every ownership
/// field, because the pool cannot be understood by this build at all.
pub fn resolve_ownership(candidate: &Candidate, host: &dyn HostIdentity) -> Result<()> {
    let config = &candidate.config;

    if !config.version_supported() {
        return Err(FzpError::UnsupportedVersion {
            pool: config.name.clone(),
            version: config.version,
        });
    }

    if config.state == PoolState::Exported {
        debug!(pool = %config.name, "pool was cleanly exported; eligible");
        return Ok(());
    }
    if candidate.policy.allow_any_host {
        warn!(pool = %config.name, "ownership check overridden by caller");
        return Ok(());
    }

    match config.hostid {
        Some(recorded) => {
            let current = host.hostid();
            if recorded == current {
                debug!(pool = %config.name, hostid = recorded, "pool last owned by this host");
                Ok(())
            } else {
                Err(FzpError::OwnershipConflict {
                    pool: config.name.clone(),
                    hostname: config
                        .hostname
                        .clone()
                        .unwrap_or_else(|| "<unknown host>".to_owned()),
                    hostid: recorded,
                    timestamp: config.timestamp.unwrap_or(0),
                })
            }
        }
        // No recorded owner: safety cannot be proven, so fail closed.
        None => Err(FzpError::OwnershipUnknown {
            pool: config.name.clone(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::FixedHost;
    use fzp_record::{RecList, RecValue};
    use fzp_types::{ImportPolicy, PoolConfig};

    fn candidate(state: PoolState, version: u64, hostid: Option<u64>) -> Candidate {
        let mut rec = RecList::new();
        rec.insert("name", RecValue::Str("tank".to_owned())).unwrap();
        rec.insert("state", RecValue::U64(state.code())).unwrap();
        rec.insert("version", RecValue::U64(version)).unwrap();
        rec.insert("pool_guid", RecValue::U64(42)).unwrap();
        if let Some(id) = hostid {
            rec.insert("hostid", RecValue::U64(id)).unwrap();
            rec.insert("hostname", RecValue::Str("backup-host".to_owned()))
                .unwrap();
            rec.insert("timestamp", RecValue::U64(1_700_000_000)).unwrap();
        }
        Candidate {
            entry_name: "tank".to_owned(),
            config: PoolConfig::from_record(&rec).unwrap(),
            policy: ImportPolicy::default(),
        }
    }

    #[test]
    fn test_unsupported_version_wins_over_ownership() {
        // Even a cleanly exported pool with a matching hostid is refused.
        let mut cand = candidate(PoolState::Exported, 9999, Some(0xBBBB));
        cand.policy.allow_any_host = true;
        let err = resolve_ownership(&cand, &FixedHost(0xBBBB)).unwrap_err();
        assert!(matches!(err, FzpError::UnsupportedVersion { version: 9999, .. }));
    }

    #[test]
    fn test_exported_pool_is_eligible() {
        let cand = candidate(PoolState::Exported, 5000, Some(0xAAAA));
        resolve_ownership(&cand, &FixedHost(0xBBBB)).unwrap();
    }

    #[test]
    fn test_hostid_match_is_eligible() {
        let cand = candidate(PoolState::Active, 5000, Some(0xBBBB));
        resolve_ownership(&cand, &FixedHost(0xBBBB)).unwrap();
    }

    #[test]
    fn test_hostid_mismatch_conflicts_and_override_clears_it() {
        let cand = candidate(PoolState::Active, 5000, Some(0xAAAA));
        let err = resolve_ownership(&cand, &FixedHost(0xBBBB)).unwrap_err();
        match &err {
            FzpError::OwnershipConflict {
                pool,
                hostname,
                hostid,
                timestamp,
            } => {
                assert_eq!(pool, "tank");
                assert_eq!(hostname, "backup-host");
                assert_eq!(*hostid, 0xAAAA);
                assert_eq!(*timestamp, 1_700_000_000);
            }
            other => panic!("expected OwnershipConflict, got {other:?}"),
        }
        assert!(err.is_overridable());

        let mut forced = candidate(PoolState::Active, 5000, Some(0xAAAA));
        forced.policy.allow_any_host = true;
        resolve_ownership(&forced, &FixedHost(0xBBBB)).unwrap();
    }

    #[test]
    fn test_absent_hostid_fails_closed() {
        let cand = candidate(PoolState::Active, 5000, None);
        let err = resolve_ownership(&cand, &FixedHost(0xBBBB)).unwrap_err();
        assert!(matches!(err, FzpError::OwnershipUnknown { .. }));

        let mut forced = candidate(PoolState::Active, 5000, None);
        forced.policy.allow_any_host = true;
        resolve_ownership(&forced, &FixedHost(0xBBBB)).unwrap();
    }

    #[test]
    fn test_unavail_state_treated_like_active() {
        let cand = candidate(PoolState::Unavail, 5000, Some(0xAAAA));
        let err = resolve_ownership(&cand, &FixedHost(0xBBBB)).unwrap_err();
        assert!(matches!(err, FzpError::OwnershipConflict { .. }));
    }

    #[test]
    fn test_unknown_state_code_not_importable_without_override() {
        let cand = candidate(PoolState::Unknown(42), 5000, None);
        let err = resolve_ownership(&cand, &FixedHost(0xBBBB)).unwrap_err();
        assert!(matches!(err, FzpError::OwnershipUnknown { .. }));
    }
}
