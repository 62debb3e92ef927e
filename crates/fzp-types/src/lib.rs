//! Typed view of pool configuration records, plus the policy and criteria
//! types that flow through the import pipeline.
//!
//! A raw [`RecList`] from the cache is decoded into a [`PoolConfig`] exactly
//! once, at filter time; every required attribute is validated there rather
//! than deferred to per-access lookups. The raw record is retained alongside
//! the typed fields because the attach primitive consumes it verbatim.

use fzp_error::{FzpError, Result};
use fzp_record::RecList;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Record attribute names
// ---------------------------------------------------------------------------

/// Pool name attribute.
pub const CONFIG_POOL_NAME: &str = "name";
/// Pool state attribute (numeric [`PoolState`] code).
pub const CONFIG_POOL_STATE: &str = "state";
/// On-disk format version attribute.
pub const CONFIG_VERSION: &str = "version";
/// Pool GUID attribute.
pub const CONFIG_POOL_GUID: &str = "pool_guid";
/// Hostid of the last owner (optional).
pub const CONFIG_HOSTID: &str = "hostid";
/// Hostname of the last owner (optional).
pub const CONFIG_HOSTNAME: &str = "hostname";
/// Last-access Unix timestamp (optional).
pub const CONFIG_TIMESTAMP: &str = "timestamp";
/// Nested vdev tree (optional, kept opaque).
pub const CONFIG_VDEV_TREE: &str = "vdev_tree";
/// Device path attribute inside vdev tree nodes.
pub const CONFIG_PATH: &str = "path";

// ---------------------------------------------------------------------------
// Format versions
// ---------------------------------------------------------------------------

/// Oldest on-disk format version this build understands.
pub const VERSION_INITIAL: u64 = 1;
/// Newest pre-feature-flag version.
pub const VERSION_BEFORE_FEATURES: u64 = 28;
/// The feature-flag era version sentinel.
pub const VERSION_FEATURES: u64 = 5000;

/// Whether `version` is within the supported range.
#[must_use]
pub fn version_is_supported(version: u64) -> bool {
    (VERSION_INITIAL..=VERSION_BEFORE_FEATURES).contains(&version)
        || version == VERSION_FEATURES
}

// ---------------------------------------------------------------------------
// Pool state
// ---------------------------------------------------------------------------

/// Lifecycle state recorded in a pool configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolState {
    Active,
    Exported,
    Destroyed,
    Spare,
    L2Cache,
    Uninitialized,
    Unavail,
    PotentiallyActive,
    /// A state code minted by a newer build. Treated like [`PoolState::Active`]
    /// for ownership purposes: not importable without an explicit override.
    Unknown(u64),
}

impl PoolState {
    /// Decode the numeric on-disk state code.
    #[must_use]
    pub fn from_code(code: u64) -> Self {
        match code {
            0 => Self::Active,
            1 => Self::Exported,
            2 => Self::Destroyed,
            3 => Self::Spare,
            4 => Self::L2Cache,
            5 => Self::Uninitialized,
            6 => Self::Unavail,
            7 => Self::PotentiallyActive,
            other => Self::Unknown(other),
        }
    }

    /// Numeric on-disk state code.
    #[must_use]
    pub fn code(self) -> u64 {
        match self {
            Self::Active => 0,
            Self::Exported => 1,
            Self::Destroyed => 2,
            Self::Spare => 3,
            Self::L2Cache => 4,
            Self::Uninitialized => 5,
            Self::Unavail => 6,
            Self::PotentiallyActive => 7,
            Self::Unknown(other) => other,
        }
    }
}

// ---------------------------------------------------------------------------
// Typed pool configuration
// ---------------------------------------------------------------------------

/// A pool configuration record with its required attributes decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub name: String,
    pub state: PoolState,
    pub version: u64,
    pub guid: u64,
    /// Low 32 bits of the last owner's hostid, when recorded.
    pub hostid: Option<u32>,
    pub hostname: Option<String>,
    /// Unix seconds of the last access, when recorded.
    pub timestamp: Option<u64>,
    /// The full raw record; the attach primitive consumes this verbatim.
    pub record: RecList,
}

impl PoolConfig {
    /// Decode a raw record, failing [`FzpError::MalformedCache`] when any
    /// required attribute is absent or carries the wrong type.
    pub fn from_record(record: &RecList) -> Result<Self> {
        let name = record
            .get_str(CONFIG_POOL_NAME)
            .ok_or_else(|| missing(CONFIG_POOL_NAME, record))?
            .to_owned();
        let state_code = record
            .get_u64(CONFIG_POOL_STATE)
            .ok_or_else(|| missing(CONFIG_POOL_STATE, record))?;
        let version = record
            .get_u64(CONFIG_VERSION)
            .ok_or_else(|| missing(CONFIG_VERSION, record))?;
        let guid = record
            .get_u64(CONFIG_POOL_GUID)
            .ok_or_else(|| missing(CONFIG_POOL_GUID, record))?;

        Ok(Self {
            name,
            state: PoolState::from_code(state_code),
            version,
            guid,
            hostid: record.get_u64(CONFIG_HOSTID).map(|id| id as u32),
            hostname: record.get_str(CONFIG_HOSTNAME).map(str::to_owned),
            timestamp: record.get_u64(CONFIG_TIMESTAMP),
            record: record.clone(),
        })
    }

    /// Whether this configuration's format version is importable by this build.
    #[must_use]
    pub fn version_supported(&self) -> bool {
        version_is_supported(self.version)
    }
}

fn missing(key: &str, record: &RecList) -> FzpError {
    let hint = record
        .get_str(CONFIG_POOL_NAME)
        .unwrap_or("<unnamed>")
        .to_owned();
    FzpError::MalformedCache(format!(
        "record for pool '{hint}' is missing required attribute '{key}' (or it has the wrong type)"
    ))
}

// ---------------------------------------------------------------------------
// Import policy
// ---------------------------------------------------------------------------

/// Rewind directive. This subsystem never rewinds; the variant exists so the
/// "no rewind" decision is an explicit constant rather than an absence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewindPolicy {
    #[default]
    NoRewind,
}

/// Target transaction-group bound. Fixed to the latest consistent state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxgBound {
    #[default]
    Latest,
}

/// Whether the import mounts contained volumes or stops after attach.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportMode {
    #[default]
    Full,
    AttachOnly,
}

/// Resolved import directive, created fresh per attempt and never persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportPolicy {
    /// Caller-supplied override of the ownership check. Never set automatically.
    pub allow_any_host: bool,
    pub rewind: RewindPolicy,
    pub txg: TxgBound,
    pub mode: ImportMode,
}

// ---------------------------------------------------------------------------
// Search criteria
// ---------------------------------------------------------------------------

/// What the driver is looking for; exactly one axis per invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchCriteria {
    ByGuid(u64),
    ByName(String),
}

impl SearchCriteria {
    /// Exact-equality match against a decoded configuration.
    #[must_use]
    pub fn matches(&self, config: &PoolConfig) -> bool {
        match self {
            Self::ByGuid(guid) => config.guid == *guid,
            Self::ByName(name) => config.name == *name,
        }
    }
}

impl std::fmt::Display for SearchCriteria {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ByGuid(guid) => write!(f, "{guid}"),
            Self::ByName(name) => write!(f, "{name}"),
        }
    }
}

/// How to resolve several surviving candidates that share a name.
///
/// GUID matches are unique by snapshot invariant; names are not, so the
/// selection rule is explicit and caller-configurable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NameMatchPolicy {
    /// Keep the record seen last in cache order (the historical behaviour).
    #[default]
    LastSeen,
    /// Keep the record seen first in cache order.
    FirstSeen,
    /// Refuse to choose; ambiguity becomes an error.
    RejectAmbiguous,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
