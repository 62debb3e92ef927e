//! `fzp-util` — filesystem-plugin front end for the pool import engine.
//!
//! Three plugin-visible actions plus a cache-wide sweep:
//! - `-p` probe: query the cache, never mutate
//! - `-m` mount: search, attach and mount one pool
//! - `-u` unmount: always rejected by policy
//! - `-a` sweep: import everything the cache knows about
//!
//! Exit vocabulary: 0 recognized/imported, 1 unrecognized/failed,
//! 2 I/O or permission failure, 3 invalid request or malformed input.

mod probe;
mod runtime;

use std::env;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use fzp_cache::{CacheStore, resolve_cache_path};
use fzp_engine::driver::{
    CandidateSource, SearchRequest, SweepOptions, exit_status, import_all, run_search,
};
use fzp_engine::runtime::SystemHost;
use fzp_error::FzpError;
use fzp_types::{ImportMode, NameMatchPolicy, SearchCriteria};

use crate::runtime::ZpoolCommandRuntime;

#[derive(Debug, PartialEq, Eq)]
enum Action {
    /// Probe a device (or pool name) against the cache.
    Probe(String),
    /// Search for and import one pool.
    Mount(String),
    /// Unmount request; always rejected.
    Unmount(String),
    /// Import every pool in the cache.
    Sweep,
}

#[derive(Debug)]
struct CliConfig {
    action: Action,
    cachefile: Option<PathBuf>,
    by_guid: bool,
    force: bool,
    import_only: bool,
    scan: bool,
    rename: Option<String>,
    name_match: NameMatchPolicy,
    json: bool,
}

fn print_help() {
    let help = "\
fzp-util — cache-driven pool import utility

USAGE:
    fzp-util -p <device> [desc..]   probe: is this device part of a known pool?
    fzp-util -m <pool|guid>         mount: search, attach and mount one pool
    fzp-util -u <pool>              unmount: always rejected by policy
    fzp-util -a                     import every pool in the cache

OPTIONS:
    --cachefile <PATH>     Cache store location (default /etc/zfs/zpool.cache,
                           or $FZP_CACHEFILE)
    --guid                 Treat the mount operand as a numeric pool guid
    --force                Allow importing a pool last owned by another host
    --import-only          Attach without mounting contained volumes
    --scan                 Use a live device scan instead of the cache store
    --rename <NAME>        Attach the pool under a different name
    --name-match <POLICY>  first|last|reject, for ambiguous name matches
    --json                 Print outcome/report as JSON
    -h, --help             Show this help
";
    eprintln!("{help}");
}

fn parse_name_match(value: &str) -> Option<NameMatchPolicy> {
    match value {
        "first" => Some(NameMatchPolicy::FirstSeen),
        "last" => Some(NameMatchPolicy::LastSeen),
        "reject" => Some(NameMatchPolicy::RejectAmbiguous),
        _ => None,
    }
}

fn parse_args(args: &[String]) -> Result<CliConfig, String> {
    let mut action: Option<Action> = None;
    let mut cachefile: Option<PathBuf> = None;
    let mut by_guid = false;
    let mut force = false;
    let mut import_only = false;
    let mut scan = false;
    let mut rename: Option<String> = None;
    let mut name_match = NameMatchPolicy::default();
    let mut name_match_set = false;
    let mut json = false;

    let mut index = 0;
    while index < args.len() {
        match args[index].as_str() {
            "-p" | "-m" | "-u" => {
                let flag = args[index].clone();
                index += 1;
                if index >= args.len() {
                    return Err(format!("{flag} requires an operand"));
                }
                if action.is_some() {
                    return Err("only one action may be given".to_owned());
                }
                let operand = args[index].clone();
                action = Some(match flag.as_str() {
                    "-p" => Action::Probe(operand),
                    "-m" => Action::Mount(operand),
                    _ => Action::Unmount(operand),
                });
            }
            "-a" => {
                if action.is_some() {
                    return Err("only one action may be given".to_owned());
                }
                action = Some(Action::Sweep);
            }
            "--cachefile" => {
                index += 1;
                if index >= args.len() {
                    return Err("--cachefile requires a value".to_owned());
                }
                cachefile = Some(PathBuf::from(&args[index]));
            }
            "--rename" => {
                index += 1;
                if index >= args.len() {
                    return Err("--rename requires a value".to_owned());
                }
                rename = Some(args[index].clone());
            }
            "--name-match" => {
                index += 1;
                if index >= args.len() {
                    return Err("--name-match requires a value".to_owned());
                }
                name_match = parse_name_match(&args[index])
                    .ok_or_else(|| format!("invalid --name-match value: {}", args[index]))?;
                name_match_set = true;
            }
            "--guid" => by_guid = true,
            "--force" => force = true,
            "--import-only" => import_only = true,
            "--scan" => scan = true,
            "--json" => json = true,
            "-h" | "--help" => return Err(String::new()),
            // The host plugin appends these descriptors after the probe device.
            "fixed" | "removable" | "readonly" | "writable"
                if matches!(action, Some(Action::Probe(_))) => {}
            other => return Err(format!("unrecognized argument: {other}")),
        }
        index += 1;
    }

    let action = action.ok_or_else(|| "an action (-p, -m, -u or -a) is required".to_owned())?;
    // Probe and unmount take no import knobs; reject misuse early.
    if matches!(action, Action::Probe(_) | Action::Unmount(_))
        && (by_guid || scan || force || import_only || rename.is_some() || name_match_set)
    {
        return Err(
            "--guid/--scan/--force/--import-only/--rename/--name-match apply to -m and -a only"
                .to_owned(),
        );
    }

    Ok(CliConfig {
        action,
        cachefile,
        by_guid,
        force,
        import_only,
        scan,
        rename,
        name_match,
        json,
    })
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn do_probe(config: &CliConfig, cache_path: &Path) -> u8 {
    let store = match CacheStore::read(cache_path) {
        Ok(store) => store,
        Err(err) => {
            eprintln!("fzp-util: cannot read cache store: {err}");
            // Plugin vocabulary: unreadable file is 2, corrupt content is 3.
            return match err {
                FzpError::Io(_) => 2,
                other => other.exit_code(),
            };
        }
    };
    let Action::Probe(device) = &config.action else {
        return 3;
    };
    match probe::probe(&store, device) {
        Some(pool) => {
            // The host plugin consumes the pool name from stdout.
            println!("{pool}");
            0
        }
        None => 1,
    }
}

fn do_mount(config: &CliConfig, cache_path: PathBuf, target: &str) -> u8 {
    let criteria = if config.by_guid {
        match target.parse::<u64>() {
            Ok(guid) => SearchCriteria::ByGuid(guid),
            Err(_) => {
                eprintln!("fzp-util: --guid operand is not a number: {target}");
                return 3;
            }
        }
    } else {
        SearchCriteria::ByName(target.to_owned())
    };

    let source = if config.scan {
        CandidateSource::DeviceScan
    } else {
        CandidateSource::CacheFile(cache_path.clone())
    };
    let mut request = SearchRequest::new(criteria, source);
    request.allow_any_host = config.force;
    request.mode = if config.import_only {
        ImportMode::AttachOnly
    } else {
        ImportMode::Full
    };
    request.rename = config.rename.clone();
    request.name_match = config.name_match;

    let mut rt = ZpoolCommandRuntime::new(cache_path);
    let result = run_search(&mut rt, &SystemHost, &request);
    match &result {
        Ok(outcome) => {
            if config.json {
                match serde_json::to_string(outcome) {
                    Ok(text) => println!("{text}"),
                    Err(err) => eprintln!("fzp-util: cannot serialize outcome: {err}"),
                }
            } else {
                println!("{}", outcome.pool());
            }
        }
        Err(err) => eprintln!("fzp-util: {err}"),
    }
    exit_status(&result)
}

fn do_sweep(config: &CliConfig, cache_path: PathBuf) -> u8 {
    let entries = match CacheStore::read(&cache_path) {
        Ok(store) => store.into_entries(),
        Err(err) => {
            eprintln!("fzp-util: cannot read cache store: {err}");
            return err.exit_code();
        }
    };

    let options = SweepOptions {
        allow_any_host: config.force,
        mode: if config.import_only {
            ImportMode::AttachOnly
        } else {
            ImportMode::Full
        },
        name_match: config.name_match,
    };

    let mut rt = ZpoolCommandRuntime::new(cache_path);
    match import_all(&mut rt, &SystemHost, &entries, options) {
        Ok(report) => {
            if config.json {
                match serde_json::to_string_pretty(&report) {
                    Ok(text) => println!("{text}"),
                    Err(err) => eprintln!("fzp-util: cannot serialize report: {err}"),
                }
            } else {
                for row in &report.pools {
                    println!("{}\t{}\t{}", row.pool, row.guid, row.status);
                }
            }
            report.exit_code()
        }
        Err(err) => {
            eprintln!("fzp-util: {err}");
            err.exit_code()
        }
    }
}

fn dispatch(config: &CliConfig) -> u8 {
    let cache_path = resolve_cache_path(config.cachefile.as_deref());
    match &config.action {
        Action::Probe(_) => do_probe(config, &cache_path),
        Action::Mount(target) => do_mount(config, cache_path, target),
        Action::Unmount(pool) => {
            eprintln!(
                "fzp-util: refusing to unmount '{pool}': this utility never tears down an \
                 active pool"
            );
            3
        }
        Action::Sweep => do_sweep(config, cache_path),
    }
}

fn run(args: &[String]) -> u8 {
    match parse_args(args) {
        Ok(config) => dispatch(&config),
        // An empty message is the help request, not a usage error.
        Err(message) if message.is_empty() => {
            print_help();
            0
        }
        Err(message) => {
            eprintln!("fzp-util: {message}");
            print_help();
            3
        }
    }
}

fn main() -> ExitCode {
    init_tracing();
    let args: Vec<String> = env::args().skip(1).collect();
    ExitCode::from(run(&args))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn test_parse_probe() {
        let config = parse_args(&args(&["-p", "disk0s1"])).unwrap();
        assert_eq!(config.action, Action::Probe("disk0s1".to_owned()));
        assert!(!config.json);
    }

    #[test]
    fn test_parse_mount_with_options() {
        let config = parse_args(&args(&[
            "-m",
            "42",
            "--guid",
            "--force",
            "--import-only",
            "--cachefile",
            "/tmp/alt.cache",
            "--rename",
            "tank2",
            "--name-match",
            "reject",
            "--json",
        ]))
        .unwrap();
        assert_eq!(config.action, Action::Mount("42".to_owned()));
        assert!(config.by_guid && config.force && config.import_only && config.json);
        assert_eq!(config.cachefile.as_deref(), Some(std::path::Path::new("/tmp/alt.cache")));
        assert_eq!(config.rename.as_deref(), Some("tank2"));
        assert_eq!(config.name_match, NameMatchPolicy::RejectAmbiguous);
    }

    #[test]
    fn test_parse_probe_tolerates_plugin_descriptors() {
        let config = parse_args(&args(&["-p", "disk0s1", "removable", "readonly"])).unwrap();
        assert_eq!(config.action, Action::Probe("disk0s1".to_owned()));
        // Outside a probe they stay rejected.
        assert!(parse_args(&args(&["-a", "removable"])).is_err());
    }

    #[test]
    fn test_parse_rejects_missing_operand() {
        assert!(parse_args(&args(&["-m"])).is_err());
        assert!(parse_args(&args(&["--cachefile"])).is_err());
    }

    #[test]
    fn test_parse_rejects_two_actions() {
        assert!(parse_args(&args(&["-p", "disk0s1", "-a"])).is_err());
    }

    #[test]
    fn test_parse_rejects_mount_flags_on_probe_and_unmount() {
        for flags in [
            &["--force"][..],
            &["--guid"],
            &["--scan"],
            &["--import-only"],
            &["--rename", "tank2"],
            &["--name-match", "reject"],
        ] {
            let mut probe = args(&["-p", "disk0s1"]);
            probe.extend(args(flags));
            assert!(parse_args(&probe).is_err(), "probe accepted {flags:?}");

            let mut unmount = args(&["-u", "tank"]);
            unmount.extend(args(flags));
            assert!(parse_args(&unmount).is_err(), "unmount accepted {flags:?}");
        }
    }

    #[test]
    fn test_parse_requires_an_action() {
        assert!(parse_args(&args(&["--json"])).is_err());
    }

    #[test]
    fn test_unmount_always_rejected() {
        let config = parse_args(&args(&["-u", "tank"])).unwrap();
        assert_eq!(dispatch(&config), 3);
    }

    #[test]
    fn test_probe_missing_cache_is_io_failure() {
        let dir = tempfile::tempdir().unwrap();
        let config = parse_args(&args(&[
            "-p",
            "disk0s1",
            "--cachefile",
            dir.path().join("absent.cache").to_str().unwrap(),
        ]))
        .unwrap();
        assert_eq!(dispatch(&config), 2);
    }

    #[test]
    fn test_probe_corrupt_cache_is_invalid_input() {
        use std::io::Write;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zpool.cache");
        // Bogus stream header: readable file, unparseable content.
        std::fs::File::create(&path)
            .unwrap()
            .write_all(&[0xFF, 0xFF, 0xFF, 0xFF, 0x00])
            .unwrap();
        let config = parse_args(&args(&[
            "-p",
            "disk0s1",
            "--cachefile",
            path.to_str().unwrap(),
        ]))
        .unwrap();
        assert_eq!(dispatch(&config), 3);
    }

    #[test]
    fn test_help_exits_zero_but_usage_errors_do_not() {
        assert_eq!(run(&args(&["-h"])), 0);
        assert_eq!(run(&args(&["--help"])), 0);
        assert_eq!(run(&args(&["--bogus"])), 3);
        assert_eq!(run(&args(&[])), 3);
    }
}
