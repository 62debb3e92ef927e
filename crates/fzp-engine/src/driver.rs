//! Search driver: the top-level entry point that owns the runtime session.
//!
//! One invocation is one self-contained session: privilege check, candidate
//! acquisition, filter, ownership resolution, orchestration, and translation
//! of the outcome into a process exit status. The session is torn down on
//! every exit path via the [`Session`] guard.

use std::path::PathBuf;

use fzp_cache::CacheStore;
use fzp_error::{FzpError, Result};
use fzp_record::RecList;
use fzp_types::{ImportMode, NameMatchPolicy, PoolState, SearchCriteria, CONFIG_POOL_GUID};
use serde::Serialize;
use tracing::{info, warn};

use crate::filter;
use crate::orchestrate::import_pool;
use crate::resolve::resolve_ownership;
use crate::runtime::{HostIdentity, PoolRuntime, Session};

/// Where the raw candidate record set comes from.
#[derive(Debug, Clone)]
pub enum CandidateSource {
    /// The persisted cache file at this path.
    CacheFile(PathBuf),
    /// Records the caller already holds (parsed cache, test fixtures).
    Preloaded(Vec<(String, RecList)>),
    /// A live device scan through the runtime.
    DeviceScan,
}

/// One driver invocation, immutable once built.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub criteria: SearchCriteria,
    pub source: CandidateSource,
    /// Caller override of the ownership check. Never set automatically.
    pub allow_any_host: bool,
    pub mode: ImportMode,
    /// Import the pool under a different name.
    pub rename: Option<String>,
    pub name_match: NameMatchPolicy,
}

impl SearchRequest {
    /// A default-policy request for `criteria` against `source`.
    #[must_use]
    pub fn new(criteria: SearchCriteria, source: CandidateSource) -> Self {
        Self {
            criteria,
            source,
            allow_any_host: false,
            mode: ImportMode::Full,
            rename: None,
            name_match: NameMatchPolicy::default(),
        }
    }
}

/// Successful terminal state of one search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum ImportOutcome {
    /// The pool was attached (and, for full imports of live pools, mounted).
    Imported { pool: String, mounted: bool },
    /// The pool is already attached to this system and healthy.
    AlreadyImported { pool: String },
}

impl ImportOutcome {
    /// Pool name this outcome refers to.
    #[must_use]
    pub fn pool(&self) -> &str {
        match self {
            Self::Imported { pool, .. } | Self::AlreadyImported { pool } => pool,
        }
    }
}

/// Map a finished search onto the process exit-status vocabulary.
#[must_use]
pub fn exit_status(result: &Result<ImportOutcome>) -> u8 {
    match result {
        Ok(_) => 0,
        Err(err) => err.exit_code(),
    }
}

/// Run one search-and-import pass.
pub fn run_search(
    runtime: &mut dyn PoolRuntime,
    host: &dyn HostIdentity,
    request: &SearchRequest,
) -> Result<ImportOutcome> {
    let mut session = Session::open(runtime)?;
    let rt = session.runtime();

    if !rt.has_discovery_privilege() {
        return Err(FzpError::PermissionDenied);
    }

    let entries = match &request.source {
        CandidateSource::CacheFile(path) => CacheStore::read(path)?.into_entries(),
        CandidateSource::Preloaded(entries) => entries.clone(),
        CandidateSource::DeviceScan => rt.scan()?,
    };

    let mut candidate = filter::select(&entries, &request.criteria, request.name_match)?;
    candidate.policy.allow_any_host = request.allow_any_host;
    candidate.policy.mode = request.mode;

    // A pool already attached under this name short-circuits the pipeline:
    // healthy means success, unavailable means the attach cannot be redone.
    let live_name = request.rename.as_deref().unwrap_or(&candidate.config.name);
    if let Some(state) = rt.imported_state(live_name)? {
        if state == PoolState::Unavail {
            return Err(FzpError::AttachFailed {
                pool: live_name.to_owned(),
                detail: "pool is already attached but unavailable".to_owned(),
            });
        }
        info!(pool = %live_name, "pool already attached and healthy");
        return Ok(ImportOutcome::AlreadyImported {
            pool: live_name.to_owned(),
        });
    }

    resolve_ownership(&candidate, host)?;
    let attach = import_pool(rt, &candidate, request.rename.as_deref())?;

    Ok(ImportOutcome::Imported {
        pool: live_name.to_owned(),
        mounted: attach.mounted,
    })
}

// ---------------------------------------------------------------------------
// Cache-wide sweep
// ---------------------------------------------------------------------------

/// Options shared by every pool of an [`import_all`] sweep.
#[derive(Debug, Clone, Copy, Default)]
pub struct SweepOptions {
    pub allow_any_host: bool,
    pub mode: ImportMode,
    pub name_match: NameMatchPolicy,
}

/// Per-pool row of a sweep report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolImportReport {
    pub pool: String,
    pub guid: u64,
    /// Human-readable outcome or failure text.
    pub status: String,
    pub exit_code: u8,
}

/// Aggregated outcome of a cache-wide sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub pools: Vec<PoolImportReport>,
}

impl SweepReport {
    /// 0 only when every pool imported or was already healthy.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        self.pools
            .iter()
            .map(|row| row.exit_code)
            .max()
            .unwrap_or(0)
    }
}

/// Import every pool recorded in the cache, one full pipeline run per GUID.
///
/// One pool's failure does not stop the sweep; each row carries its own
/// status. Destroyed records are skipped here the same way the filter skips
/// them, and a record with no readable GUID is malformed.
pub fn import_all(
    runtime: &mut dyn PoolRuntime,
    host: &dyn HostIdentity,
    entries: &[(String, RecList)],
    options: SweepOptions,
) -> Result<SweepReport> {
    let mut report = SweepReport::default();

    for (entry_name, record) in entries {
        if record
            .get_u64(fzp_types::CONFIG_POOL_STATE)
            .map(PoolState::from_code)
            == Some(PoolState::Destroyed)
        {
            continue;
        }
        let Some(guid) = record.get_u64(CONFIG_POOL_GUID) else {
            return Err(FzpError::MalformedCache(format!(
                "record '{entry_name}' has no readable pool guid"
            )));
        };

        let mut request = SearchRequest::new(
            SearchCriteria::ByGuid(guid),
            CandidateSource::Preloaded(entries.to_vec()),
        );
        request.allow_any_host = options.allow_any_host;
        request.mode = options.mode;
        request.name_match = options.name_match;

        let result = run_search(runtime, host, &request);
        let (status, exit_code) = match &result {
            Ok(outcome) => (
                match outcome {
                    ImportOutcome::Imported { mounted: true, .. } => "imported".to_owned(),
                    ImportOutcome::Imported { mounted: false, .. } => {
                        "attached (volumes not mounted)".to_owned()
                    }
                    ImportOutcome::AlreadyImported { .. } => "already imported".to_owned(),
                },
                0,
            ),
            Err(err) => {
                warn!(pool = %entry_name, guid, error = %err, "sweep import failed");
                (err.to_string(), err.exit_code())
            }
        };
        report.pools.push(PoolImportReport {
            pool: entry_name.clone(),
            guid,
            status,
            exit_code,
        });
    }

    Ok(report)
}
