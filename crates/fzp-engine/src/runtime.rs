//! Seams to the outside world: the pool runtime and the host identity.
//!
//! The engine never talks to storage directly. Every attach/open/mount call
//! goes through [`PoolRuntime`], and the current host's identity comes from
//! [`HostIdentity`], so both can be faked in tests and swapped for a real
//! bridge in the CLI.

use std::path::Path;

use fzp_error::Result;
use fzp_record::RecList;
use fzp_types::{ImportPolicy, PoolConfig, PoolState};

/// An opaque live handle to an attached pool, valid until passed back to
/// [`PoolRuntime::close`].
#[derive(Debug)]
pub struct PoolHandle {
    name: String,
}

impl PoolHandle {
    /// Create a handle for the named pool. Only runtime implementations
    /// should mint these.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Name of the pool this handle refers to.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// The trusted pool runtime: attach/open/mount primitives this engine
/// sequences and policy-gates but never reimplements.
///
/// All calls are blocking; the engine holds no timeouts over them.
pub trait PoolRuntime {
    /// Begin a runtime session. Called once per driver invocation.
    fn session_init(&mut self) -> Result<()>;

    /// End the runtime session. Infallible teardown; called exactly once for
    /// every successful `session_init`, on every exit path.
    fn session_fini(&mut self);

    /// Whether the caller may enumerate pools at all.
    fn has_discovery_privilege(&self) -> bool;

    /// Live device scan: raw candidate records keyed by pool name.
    fn scan(&mut self) -> Result<Vec<(String, RecList)>>;

    /// State of an already-imported pool with this name, if one exists.
    fn imported_state(&mut self, name: &str) -> Result<Option<PoolState>>;

    /// Attach the pool described by `config` under `policy`, optionally
    /// renaming it. The raw record travels inside `config`.
    fn attach(
        &mut self,
        config: &PoolConfig,
        policy: &ImportPolicy,
        rename: Option<&str>,
    ) -> Result<()>;

    /// Open a live handle to an attached pool by name.
    fn open(&mut self, name: &str) -> Result<PoolHandle>;

    /// Current state of a live pool.
    fn pool_state(&mut self, handle: &PoolHandle) -> Result<PoolState>;

    /// Mount all logical volumes contained in the pool.
    fn mount_volumes(&mut self, handle: &PoolHandle) -> Result<()>;

    /// Release a live handle. Infallible by contract.
    fn close(&mut self, handle: PoolHandle);
}

/// Scoped runtime session: `session_init` on open, `session_fini` on drop,
/// so teardown happens on every exit path including early failures.
pub struct Session<'a> {
    runtime: &'a mut dyn PoolRuntime,
}

impl<'a> Session<'a> {
    /// Initialize the runtime and wrap it in a guard.
    pub fn open(runtime: &'a mut dyn PoolRuntime) -> Result<Self> {
        runtime.session_init()?;
        Ok(Self { runtime })
    }

    /// Borrow the live runtime.
    pub fn runtime(&mut self) -> &mut dyn PoolRuntime {
        &mut *self.runtime
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        self.runtime.session_fini();
    }
}

/// Where the current host's identity comes from.
///
/// Injected so ownership-conflict decisions are testable without depending on
/// the identity of the machine running the tests.
pub trait HostIdentity {
    /// The host's id; only the low 32 bits are ever recorded on disk.
    fn hostid(&self) -> u32;
}

/// Fixed identity, for tests and for callers that resolve the id themselves.
#[derive(Debug, Clone, Copy)]
pub struct FixedHost(pub u32);

impl HostIdentity for FixedHost {
    fn hostid(&self) -> u32 {
        self.0
    }
}

/// System identity: the 4-byte little-endian id at `/etc/hostid`.
///
/// A missing or short file yields 0, which never matches a recorded owner and
/// therefore fails closed at the ownership check.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemHost;

/// Conventional location of the persisted host id.
pub const HOSTID_PATH: &str = "/etc/hostid";

impl SystemHost {
    fn read_hostid_file(path: &Path) -> u32 {
        match std::fs::read(path) {
            Ok(bytes) if bytes.len() >= 4 => {
                u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
            }
            _ => 0,
        }
    }
}

impl HostIdentity for SystemHost {
    fn hostid(&self) -> u32 {
        Self::read_hostid_file(Path::new(HOSTID_PATH))
    }
}
