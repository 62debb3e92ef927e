//! Pool runtime bridge over the platform `zpool`/`zfs` utilities.
//!
//! A thin, replaceable surface: the engine sequences calls through the
//! [`PoolRuntime`] trait, and this implementation turns each one into a child
//! process. Heavy diagnostics stay with the utilities themselves; failures
//! surface here as their stderr text.

use std::path::PathBuf;
use std::process::{Command, Output};

use fzp_engine::runtime::{PoolHandle, PoolRuntime};
use fzp_error::{FzpError, Result};
use fzp_record::RecList;
use fzp_types::{ImportPolicy, PoolConfig, PoolState};
use tracing::debug;

/// Runtime backed by the system `zpool` and `zfs` binaries.
#[derive(Debug)]
pub struct ZpoolCommandRuntime {
    cachefile: PathBuf,
}

impl ZpoolCommandRuntime {
    #[must_use]
    pub fn new(cachefile: PathBuf) -> Self {
        Self { cachefile }
    }

    fn run(program: &str, args: &[&str]) -> Result<Output> {
        debug!(program, ?args, "spawning pool utility");
        let output = Command::new(program).args(args).output()?;
        Ok(output)
    }

    fn run_checked(program: &str, args: &[&str]) -> Result<String> {
        let output = Self::run(program, args)?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(FzpError::internal(
                String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            ))
        }
    }

    /// Map a reported pool health string onto the engine's state vocabulary.
    fn state_from_health(health: &str) -> PoolState {
        match health {
            "UNAVAIL" | "FAULTED" | "REMOVED" => PoolState::Unavail,
            _ => PoolState::Active,
        }
    }

    fn health_of(name: &str) -> Result<Option<PoolState>> {
        let output = Self::run("zpool", &["list", "-H", "-o", "name,health", name])?;
        if !output.status.success() {
            // `zpool list` fails when no such pool is imported.
            return Ok(None);
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let health = stdout
            .lines()
            .next()
            .and_then(|line| line.split_whitespace().nth(1))
            .unwrap_or("");
        Ok(Some(Self::state_from_health(health)))
    }
}

impl PoolRuntime for ZpoolCommandRuntime {
    fn session_init(&mut self) -> Result<()> {
        debug!(cachefile = %self.cachefile.display(), "runtime session opened");
        Ok(())
    }

    fn session_fini(&mut self) {
        debug!("runtime session closed");
    }

    fn has_discovery_privilege(&self) -> bool {
        nix::unistd::geteuid().is_root()
    }

    fn scan(&mut self) -> Result<Vec<(String, RecList)>> {
        // Reading live labels belongs to the pool runtime library, which this
        // bridge does not link. Cache-driven import is the supported path.
        Err(FzpError::internal(
            "device scan is not available through the command bridge; use the cache store",
        ))
    }

    fn imported_state(&mut self, name: &str) -> Result<Option<PoolState>> {
        Self::health_of(name)
    }

    fn attach(
        &mut self,
        config: &PoolConfig,
        policy: &ImportPolicy,
        rename: Option<&str>,
    ) -> Result<()> {
        let cachefile = self.cachefile.display().to_string();
        let guid = config.guid.to_string();
        // -N: never mount here; the orchestrator drives mounting separately.
        let mut args = vec!["import", "-N", "-c", cachefile.as_str()];
        if policy.allow_any_host {
            args.push("-f");
        }
        args.push(guid.as_str());
        if let Some(new_name) = rename {
            args.push(new_name);
        }
        Self::run_checked("zpool", &args).map(drop)
    }

    fn open(&mut self, name: &str) -> Result<PoolHandle> {
        Self::run_checked("zpool", &["list", "-H", "-o", "name", name])
            .map(|_| PoolHandle::new(name))
    }

    fn pool_state(&mut self, handle: &PoolHandle) -> Result<PoolState> {
        Self::health_of(handle.name())?.ok_or_else(|| {
            FzpError::internal(format!("pool '{}' vanished after attach", handle.name()))
        })
    }

    fn mount_volumes(&mut self, handle: &PoolHandle) -> Result<()> {
        // Equivalent of "mount every dataset in the pool": list the pool's
        // datasets and mount the mountable, unmounted ones.
        let listing = Self::run_checked(
            "zfs",
            &[
                "list",
                "-H",
                "-r",
                "-o",
                "name,canmount,mounted",
                handle.name(),
            ],
        )?;
        for line in listing.lines() {
            let mut fields = line.split_whitespace();
            let (Some(dataset), Some(canmount), Some(mounted)) =
                (fields.next(), fields.next(), fields.next())
            else {
                continue;
            };
            if canmount == "on" && mounted == "no" {
                Self::run_checked("zfs", &["mount", dataset]).map(drop)?;
            }
        }
        Ok(())
    }

    fn close(&mut self, handle: PoolHandle) {
        debug!(pool = %handle.name(), "released pool handle");
    }
}
