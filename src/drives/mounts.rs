// Mount-state query for the scan target

use crate::ScanResult;
use serde::Serialize;
use std::path::Path;

/// Ordered from least to most restrictive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum MountState {
    NotMounted,
    ReadOnly,
    ReadWrite,
}

pub trait MountQuery {
    fn mount_state(&self, path: &Path) -> ScanResult<MountState>;
}

/// One mounted filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub source: String,
    pub mount_point: String,
    pub read_only: bool,
    /// (major, minor) of the backing device, when known
    pub device: Option<(u64, u64)>,
}

/// Snapshot of the system mount table.
#[derive(Debug, Clone, Default)]
pub struct MountTable {
    entries: Vec<MountEntry>,
}

impl MountTable {
    pub fn new(entries: Vec<MountEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[MountEntry] {
        &self.entries
    }

    /// Parse `/proc/mounts` text. Entries carry no device numbers.
    pub fn from_proc_mounts(text: &str) -> Self {
        let entries = text
            .lines()
            .filter_map(|line| {
                let parts: Vec<&str> = line.split_whitespace().collect();
                if parts.len() < 4 {
                    return None;
                }
                Some(MountEntry {
                    source: parts[0].to_string(),
                    mount_point: parts[1].to_string(),
                    read_only: parts[3].split(',').any(|opt| opt == "ro"),
                    device: None,
                })
            })
            .collect();
        Self { entries }
    }

    /// Current mounts of this process from `/proc/self/mountinfo`.
    #[cfg(target_os = "linux")]
    pub fn from_system() -> ScanResult<Self> {
        let infos = procfs::process::Process::myself()
            .and_then(|p| p.mountinfo())
            .map_err(|e| {
                crate::ScanError::IoError(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    e.to_string(),
                ))
            })?;

        let entries = infos
            .into_iter()
            .map(|info| MountEntry {
                source: info.mount_source.unwrap_or_default(),
                mount_point: info.mount_point.display().to_string(),
                read_only: info.mount_options.contains_key("ro"),
                device: parse_majmin(&info.majmin),
            })
            .collect();
        Ok(Self { entries })
    }

    /// Worst state over every entry whose source is `path` or one of its
    /// partitions, or that sits on the same device numbers.
    pub fn state_for(&self, path: &str, device: Option<(u64, u64)>) -> MountState {
        self.entries
            .iter()
            .filter(|e| {
                is_same_or_partition(&e.source, path) || (device.is_some() && e.device == device)
            })
            .map(|e| {
                if e.read_only {
                    MountState::ReadOnly
                } else {
                    MountState::ReadWrite
                }
            })
            .max()
            .unwrap_or(MountState::NotMounted)
    }
}

/// `source` is `disk` itself or a partition of it: `sda1`, `nvme0n1p2`,
/// `mmcblk0p1`. Another disk sharing the prefix (`sdaa1`) does not count.
fn is_same_or_partition(source: &str, disk: &str) -> bool {
    let Some(rest) = source.strip_prefix(disk) else {
        return false;
    };
    let digits = rest.strip_prefix('p').unwrap_or(rest);
    rest.is_empty() || (!digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
}

impl MountQuery for MountTable {
    fn mount_state(&self, path: &Path) -> ScanResult<MountState> {
        let state = self.state_for(&path.display().to_string(), block_device_numbers(path));
        tracing::debug!(device = %path.display(), state = ?state, "Mount state");
        Ok(state)
    }
}

/// Reads the live mount table on every query.
#[cfg(target_os = "linux")]
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemMounts;

#[cfg(target_os = "linux")]
impl MountQuery for SystemMounts {
    fn mount_state(&self, path: &Path) -> ScanResult<MountState> {
        MountTable::from_system()?.mount_state(path)
    }
}

fn parse_majmin(s: &str) -> Option<(u64, u64)> {
    let (major, minor) = s.split_once(':')?;
    Some((major.parse().ok()?, minor.parse().ok()?))
}

/// Device numbers of a block special file, following symlinks.
fn block_device_numbers(path: &Path) -> Option<(u64, u64)> {
    use nix::sys::stat::{major, minor, stat, SFlag};

    let st = stat(path).ok()?;
    if SFlag::from_bits_truncate(st.st_mode) & SFlag::S_IFMT != SFlag::S_IFBLK {
        return None;
    }
    Some((major(st.st_rdev), minor(st.st_rdev)))
}
