//! Candidate filter: raw record sequence -> the one candidate to import.
//!
//! DESTROYED records are skipped silently (they are pools intentionally
//! removed); any other record that fails required-key validation poisons the
//! whole batch. Survivors get a default import policy and are then narrowed
//! to the criteria match.

use fzp_error::{FzpError, Result};
use fzp_record::RecList;
use fzp_types::{
    CONFIG_POOL_STATE, ImportPolicy, NameMatchPolicy, PoolConfig, PoolState, SearchCriteria,
};
use tracing::debug;

/// A surviving record annotated with the policy it will be imported under.
#[derive(Debug, Clone)]
pub struct Candidate {
    /// Name the record was stored under (not always the pool's own name).
    pub entry_name: String,
    pub config: PoolConfig,
    pub policy: ImportPolicy,
}

/// Decode, validate and annotate every non-destroyed record.
///
/// Fail-closed: one malformed record aborts the batch rather than being
/// silently dropped.
pub fn survivors(entries: &[(String, RecList)]) -> Result<Vec<Candidate>> {
    let mut out = Vec::with_capacity(entries.len());
    for (entry_name, record) in entries {
        // Destroyed pools are skipped before full validation is demanded;
        // they were removed on purpose and may be arbitrarily stale.
        if record
            .get_u64(CONFIG_POOL_STATE)
            .map(PoolState::from_code)
            == Some(PoolState::Destroyed)
        {
            debug!(entry = %entry_name, "skipping destroyed pool record");
            continue;
        }

        let config = PoolConfig::from_record(record)?;
        out.push(Candidate {
            entry_name: entry_name.clone(),
            config,
            policy: ImportPolicy::default(),
        });
    }
    Ok(out)
}

/// Select the unique candidate matching `criteria`.
///
/// Distinguishes an empty store from a store with no match, enforces GUID
/// uniqueness within the snapshot, and resolves name ambiguity per
/// `name_match`.
pub fn select(
    entries: &[(String, RecList)],
    criteria: &SearchCriteria,
    name_match: NameMatchPolicy,
) -> Result<Candidate> {
    if entries.is_empty() {
        return Err(FzpError::EmptyStore);
    }

    let mut matches: Vec<Candidate> = survivors(entries)?
        .into_iter()
        .filter(|candidate| criteria.matches(&candidate.config))
        .collect();

    match matches.len() {
        0 => Err(FzpError::NoMatchingPool(criteria.to_string())),
        1 => Ok(matches.remove(0)),
        _ => match criteria {
            SearchCriteria::ByGuid(guid) => Err(FzpError::MalformedCache(format!(
                "guid {guid} appears on more than one record in the snapshot"
            ))),
            SearchCriteria::ByName(name) => match name_match {
                NameMatchPolicy::LastSeen => Ok(matches.remove(matches.len() - 1)),
                NameMatchPolicy::FirstSeen => Ok(matches.remove(0)),
                NameMatchPolicy::RejectAmbiguous => {
                    Err(FzpError::AmbiguousName(name.clone()))
                }
            },
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fzp_record::RecValue;
    use fzp_types::{
        CONFIG_POOL_GUID, CONFIG_POOL_NAME, CONFIG_VERSION, VERSION_FEATURES,
    };

    fn record(name: &str, guid: u64, state: PoolState) -> RecList {
        let mut rec = RecList::new();
        rec.insert(CONFIG_POOL_NAME, RecValue::Str(name.to_owned()))
            .unwrap();
        rec.insert(CONFIG_POOL_STATE, RecValue::U64(state.code()))
            .unwrap();
        rec.insert(CONFIG_VERSION, RecValue::U64(VERSION_FEATURES))
            .unwrap();
        rec.insert(CONFIG_POOL_GUID, RecValue::U64(guid)).unwrap();
        rec
    }

    fn entries(records: Vec<(&str, RecList)>) -> Vec<(String, RecList)> {
        records
            .into_iter()
            .map(|(name, rec)| (name.to_owned(), rec))
            .collect()
    }

    #[test]
    fn test_empty_store_distinct_from_no_match() {
        let err = select(&[], &SearchCriteria::ByGuid(42), NameMatchPolicy::default())
            .unwrap_err();
        assert!(matches!(err, FzpError::EmptyStore));

        let stored = entries(vec![("tank", record("tank", 1, PoolState::Exported))]);
        let err = select(&stored, &SearchCriteria::ByGuid(42), NameMatchPolicy::default())
            .unwrap_err();
        assert!(matches!(err, FzpError::NoMatchingPool(_)));
    }

    #[test]
    fn test_destroyed_never_selected() {
        let stored = entries(vec![("tank", record("tank", 42, PoolState::Destroyed))]);
        for criteria in [
            SearchCriteria::ByGuid(42),
            SearchCriteria::ByName("tank".to_owned()),
        ] {
            let err = select(&stored, &criteria, NameMatchPolicy::default()).unwrap_err();
            assert!(matches!(err, FzpError::NoMatchingPool(_)));
        }
    }

    #[test]
    fn test_destroyed_record_may_be_partially_malformed() {
        // A destroyed record missing other required keys is skipped, not fatal.
        let mut rec = RecList::new();
        rec.insert(CONFIG_POOL_STATE, RecValue::U64(PoolState::Destroyed.code()))
            .unwrap();
        let stored = entries(vec![
            ("old", rec),
            ("tank", record("tank", 42, PoolState::Exported)),
        ]);
        let picked = select(&stored, &SearchCriteria::ByGuid(42), NameMatchPolicy::default())
            .unwrap();
        assert_eq!(picked.config.name, "tank");
    }

    #[test]
    fn test_malformed_survivor_poisons_batch() {
        let mut broken = record("bad", 7, PoolState::Exported);
        broken = {
            // Rebuild without the guid to break validation.
            let mut out = RecList::new();
            for (name, value) in broken.iter() {
                if name != CONFIG_POOL_GUID {
                    out.insert(name, value.clone()).unwrap();
                }
            }
            out
        };
        let stored = entries(vec![
            ("bad", broken),
            ("tank", record("tank", 42, PoolState::Exported)),
        ]);
        let err = select(&stored, &SearchCriteria::ByGuid(42), NameMatchPolicy::default())
            .unwrap_err();
        assert!(matches!(err, FzpError::MalformedCache(_)));
    }

    #[test]
    fn test_guid_match_picks_right_record() {
        let stored = entries(vec![
            ("first", record("first", 1, PoolState::Exported)),
            ("second", record("second", 2, PoolState::Exported)),
        ]);
        let picked = select(&stored, &SearchCriteria::ByGuid(2), NameMatchPolicy::default())
            .unwrap();
        assert_eq!(picked.config.name, "second");
        assert_ne!(picked.config.name, "first");
    }

    #[test]
    fn test_duplicate_guid_is_malformed() {
        let stored = entries(vec![
            ("a", record("a", 42, PoolState::Exported)),
            ("b", record("b", 42, PoolState::Exported)),
        ]);
        let err = select(&stored, &SearchCriteria::ByGuid(42), NameMatchPolicy::default())
            .unwrap_err();
        assert!(matches!(err, FzpError::MalformedCache(_)));
    }

    #[test]
    fn test_name_ambiguity_policies() {
        // Same name under two entry keys: snapshots taken at different times.
        let stored = entries(vec![
            ("tank", record("tank", 1, PoolState::Exported)),
            ("tank-2", record("tank", 2, PoolState::Exported)),
        ]);
        let criteria = SearchCriteria::ByName("tank".to_owned());

        let last = select(&stored, &criteria, NameMatchPolicy::LastSeen).unwrap();
        assert_eq!(last.config.guid, 2);

        let first = select(&stored, &criteria, NameMatchPolicy::FirstSeen).unwrap();
        assert_eq!(first.config.guid, 1);

        let err = select(&stored, &criteria, NameMatchPolicy::RejectAmbiguous).unwrap_err();
        assert!(matches!(err, FzpError::AmbiguousName(_)));
    }

    #[test]
    fn test_survivor_gets_default_policy() {
        let stored = entries(vec![("tank", record("tank", 42, PoolState::Exported))]);
        let picked = select(&stored, &SearchCriteria::ByGuid(42), NameMatchPolicy::default())
            .unwrap();
        assert!(!picked.policy.allow_any_host);
        assert_eq!(picked.policy, ImportPolicy::default());
    }
}
