//! Discovery of the block devices a plugin advertises.
//!
//! The plugin server never caches what it finds for long: every `Allocate` and every empty
//! `ListAndWatch` asks the [`DeviceEnumerator`] again, so the enumerator must be cheap enough to
//! call on the request path.
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::{debug, trace};

/// Name prefixes of virtual block devices that are never advertised
const VIRTUAL_DEVICE_PREFIXES: &[&str] = &["loop", "ram", "zram"];

/// Scans the host and returns an ordered list of device names (e.g. `sda1`, `sda`). The order is
/// not guaranteed to be stable between calls.
pub trait DeviceEnumerator: Send + Sync + 'static {
    /// Performs one scan.
    fn scan(&self) -> anyhow::Result<Vec<String>>;
}

impl<F> DeviceEnumerator for F
where
    F: Fn() -> anyhow::Result<Vec<String>> + Send + Sync + 'static,
{
    fn scan(&self) -> anyhow::Result<Vec<String>> {
        self()
    }
}

/// Finds block devices through the sysfs `block` class. Each disk contributes its partitions
/// followed by the disk itself.
#[derive(Clone, Debug)]
pub struct SysfsBlockScanner {
    sysfs_root: PathBuf,
}

impl SysfsBlockScanner {
    /// Returns a scanner reading `<sysfs_root>/block`. Point this at a host mount when running in
    /// a container.
    pub fn new<P: AsRef<Path>>(sysfs_root: P) -> Self {
        SysfsBlockScanner {
            sysfs_root: sysfs_root.as_ref().to_owned(),
        }
    }
}

impl Default for SysfsBlockScanner {
    fn default() -> Self {
        SysfsBlockScanner::new("/sys")
    }
}

impl DeviceEnumerator for SysfsBlockScanner {
    fn scan(&self) -> anyhow::Result<Vec<String>> {
        let block_dir = self.sysfs_root.join("block");
        let mut devices = Vec::new();
        for disk in sorted_entries(&block_dir)? {
            if VIRTUAL_DEVICE_PREFIXES.iter().any(|p| disk.starts_with(p)) {
                trace!(%disk, "Skipping virtual block device");
                continue;
            }
            let partitions: Vec<String> = sorted_entries(&block_dir.join(&disk))?
                .into_iter()
                .filter(|entry| block_dir.join(&disk).join(entry).join("partition").is_file())
                .collect();
            debug!(%disk, ?partitions, "Found disk");
            devices.extend(partitions);
            devices.push(disk);
        }
        Ok(devices)
    }
}

/// Lists the names in `dir` in lexical order
fn sorted_entries(dir: &Path) -> anyhow::Result<Vec<String>> {
    let mut names = std::fs::read_dir(dir)
        .with_context(|| format!("unable to read {}", dir.display()))?
        .map(|entry| entry.map(|e| e.file_name().to_string_lossy().into_owned()))
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("unable to list {}", dir.display()))?;
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_disk(root: &Path, disk: &str, partitions: &[&str]) {
        let disk_dir = root.join("block").join(disk);
        std::fs::create_dir_all(disk_dir.join("queue")).unwrap();
        std::fs::write(disk_dir.join("size"), b"2048\n").unwrap();
        for part in partitions {
            let part_dir = disk_dir.join(part);
            std::fs::create_dir_all(&part_dir).unwrap();
            std::fs::write(part_dir.join("partition"), b"1\n").unwrap();
        }
    }

    #[test]
    fn scan_lists_partitions_before_their_disk() {
        let root = tempfile::tempdir().unwrap();
        make_disk(root.path(), "sdb", &[]);
        make_disk(root.path(), "sda", &["sda2", "sda1"]);

        let devices = SysfsBlockScanner::new(root.path()).scan().unwrap();
        assert_eq!(devices, vec!["sda1", "sda2", "sda", "sdb"]);
    }

    #[test]
    fn scan_skips_virtual_devices() {
        let root = tempfile::tempdir().unwrap();
        make_disk(root.path(), "loop0", &[]);
        make_disk(root.path(), "zram0", &[]);
        make_disk(root.path(), "dm-0", &[]);

        let devices = SysfsBlockScanner::new(root.path()).scan().unwrap();
        assert_eq!(devices, vec!["dm-0"]);
    }

    #[test]
    fn scan_fails_without_block_class() {
        let root = tempfile::tempdir().unwrap();
        let err = SysfsBlockScanner::new(root.path())
            .scan()
            .expect_err("missing block dir should fail");
        assert!(err.to_string().contains("unable to read"));
    }

    #[test]
    fn closures_are_enumerators() {
        let enumerator = || -> anyhow::Result<Vec<String>> { Ok(vec!["sda".to_string()]) };
        assert_eq!(enumerator.scan().unwrap(), vec!["sda"]);
    }
}
