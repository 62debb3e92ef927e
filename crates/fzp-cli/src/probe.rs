//! Probe: answer "is this device part of a pool we know about?" from the
//! cache alone. Query only; nothing is attached or mounted.

use fzp_cache::CacheStore;
use fzp_types::{CONFIG_PATH, CONFIG_POOL_NAME};

/// Normalize a device argument the way the host plugin passes it:
/// `disk0s1`, `/dev/disk0s1` and `/dev/rdisk0s1` all refer to the same
/// block device.
#[must_use]
pub fn normalize_device(arg: &str) -> String {
    let base = arg.rsplit('/').next().unwrap_or(arg);
    // A leading 'r' marks the raw variant of a diskNsM node.
    let base = base
        .strip_prefix('r')
        .filter(|rest| rest.starts_with("disk"))
        .unwrap_or(base);
    format!("/dev/{base}")
}

/// Find the pool, if any, that the given device (or pool name) belongs to.
///
/// A record matches when its pool name equals the raw argument, or when any
/// `path` attribute anywhere in its vdev tree equals the normalized device
/// node.
#[must_use]
pub fn probe(store: &CacheStore, device_arg: &str) -> Option<String> {
    let device = normalize_device(device_arg);
    for (entry_name, record) in store.iter() {
        if record.get_str(CONFIG_POOL_NAME) == Some(device_arg) {
            return Some(entry_name.to_owned());
        }
        if record.deep_any_str(CONFIG_PATH, &device) {
            return Some(entry_name.to_owned());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use fzp_record::{RecList, RecValue, pack};

    fn store_with_vdev_path(path: &str) -> CacheStore {
        let mut vdev = RecList::new();
        vdev.insert("type", RecValue::Str("disk".to_owned())).unwrap();
        vdev.insert("path", RecValue::Str(path.to_owned())).unwrap();
        let mut children = RecList::new();
        children.insert("child0", RecValue::List(vdev)).unwrap();

        let mut rec = RecList::new();
        rec.insert("name", RecValue::Str("tank".to_owned())).unwrap();
        rec.insert("state", RecValue::U64(1)).unwrap();
        rec.insert("version", RecValue::U64(5000)).unwrap();
        rec.insert("pool_guid", RecValue::U64(42)).unwrap();
        rec.insert("vdev_tree", RecValue::List(children)).unwrap();

        let mut root = RecList::new();
        root.insert("tank", RecValue::List(rec)).unwrap();
        CacheStore::parse(&pack(&root)).unwrap()
    }

    #[test]
    fn test_normalize_device_forms() {
        assert_eq!(normalize_device("disk0s1"), "/dev/disk0s1");
        assert_eq!(normalize_device("/dev/disk0s1"), "/dev/disk0s1");
        assert_eq!(normalize_device("/dev/rdisk0s1"), "/dev/disk0s1");
        assert_eq!(normalize_device("rdisk2"), "/dev/disk2");
        // Names that merely start with 'r' are not raw nodes.
        assert_eq!(normalize_device("raid0"), "/dev/raid0");
    }

    #[test]
    fn test_probe_matches_device_in_vdev_tree() {
        let store = store_with_vdev_path("/dev/disk2s1");
        assert_eq!(probe(&store, "disk2s1").as_deref(), Some("tank"));
        assert_eq!(probe(&store, "rdisk2s1").as_deref(), Some("tank"));
        assert_eq!(probe(&store, "/dev/disk2s1").as_deref(), Some("tank"));
        assert_eq!(probe(&store, "disk9"), None);
    }

    #[test]
    fn test_probe_matches_pool_name() {
        let store = store_with_vdev_path("/dev/disk2s1");
        assert_eq!(probe(&store, "tank").as_deref(), Some("tank"));
    }

    #[test]
    fn test_probe_empty_store() {
        let store = CacheStore::parse(&[]).unwrap();
        assert_eq!(probe(&store, "disk0s1"), None);
    }
}
