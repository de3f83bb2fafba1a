// Scan configuration: every policy knob the engine consults, passed in
// explicitly at construction

use crate::error::DEFAULT_UNKNOWN_ERROR_LIMIT;
use crate::{ScanError, ScanResult};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Largest single read the engine will issue.
pub const MAX_READ_SIZE: usize = 32 * 1024 * 1024;

pub const DEFAULT_READ_SIZE: usize = 64 * 1024;
pub const DEFAULT_LATENCY_GRAPH_LEN: usize = 70;

/// Environment variable prefix for overrides, e.g. `DISKSCAN_READ_SIZE`.
pub const ENV_PREFIX: &str = "DISKSCAN";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    #[serde(alias = "seq")]
    Sequential,
    Random,
}

impl FromStr for ScanMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "seq" | "sequential" => Ok(ScanMode::Sequential),
            "random" => Ok(ScanMode::Random),
            other => Err(format!(
                "unknown scan mode '{}' (expected seq, sequential or random)",
                other
            )),
        }
    }
}

impl fmt::Display for ScanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanMode::Sequential => write!(f, "sequential"),
            ScanMode::Random => write!(f, "random"),
        }
    }
}

/// What to do when the target is mounted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MountPolicy {
    /// Refuse any mounted device
    RejectAny,
    /// Refuse only read-write mounts
    RejectReadWrite,
    /// Scan regardless
    Allow,
}

impl FromStr for MountPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "reject-any" => Ok(MountPolicy::RejectAny),
            "reject-read-write" => Ok(MountPolicy::RejectReadWrite),
            "allow" => Ok(MountPolicy::Allow),
            other => Err(format!("unknown mount policy '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Rewrite slow or failing regions
    pub fix: bool,
    pub mode: ScanMode,
    /// Bytes per read, adjusted to the device sector size at scan time
    pub read_size: usize,
    /// Number of latency graph buckets
    pub latency_graph_len: usize,
    pub mount_policy: MountPolicy,
    /// A read slower than this is a fix candidate
    pub slow_threshold_ms: u64,
    /// Any single read above this fails the scan
    pub max_latency_ms: u64,
    pub latency_percentile: f64,
    /// The percentile latency must stay at or under this
    pub percentile_ceiling_ms: u64,
    pub unknown_error_limit: u32,
    /// Sub-chunk size for the zero-fill repair path
    pub fix_chunk_size: usize,
    pub temp_pause_celsius: i32,
    pub temp_resume_celsius: i32,
    pub temp_recheck_secs: u64,
    /// Discovery and status commands
    pub short_timeout_secs: u64,
    /// Data transfer commands
    pub long_timeout_secs: u64,
    /// Fixed seed for random scan order; random when unset
    pub seed: Option<u64>,
    /// Request SCHED_RR while scanning
    pub realtime: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            fix: false,
            mode: ScanMode::Sequential,
            read_size: DEFAULT_READ_SIZE,
            latency_graph_len: DEFAULT_LATENCY_GRAPH_LEN,
            mount_policy: MountPolicy::RejectReadWrite,
            slow_threshold_ms: 3000,
            max_latency_ms: 10_000,
            latency_percentile: 99.99,
            percentile_ceiling_ms: 1000,
            unknown_error_limit: DEFAULT_UNKNOWN_ERROR_LIMIT,
            fix_chunk_size: 4096,
            temp_pause_celsius: 60,
            temp_resume_celsius: 55,
            temp_recheck_secs: 10,
            short_timeout_secs: 10,
            long_timeout_secs: 60,
            seed: None,
            realtime: false,
        }
    }
}

impl ScanConfig {
    /// Default config file location, `~/.config/diskscan/diskscan.toml` on Linux.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "diskscan").map(|dirs| dirs.config_dir().join("diskscan.toml"))
    }

    /// Layer defaults, a config file and `DISKSCAN_*` environment variables.
    ///
    /// An explicit `path` must exist; the default location is optional.
    pub fn load(path: Option<&Path>) -> ScanResult<Self> {
        let mut builder = config::Config::builder();

        match path {
            Some(p) => {
                builder = builder.add_source(config::File::from(p).required(true));
            }
            None => {
                if let Some(p) = Self::default_path() {
                    builder = builder.add_source(config::File::from(p).required(false));
                }
            }
        }

        let loaded: ScanConfig = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| ScanError::Config(e.to_string()))?;

        loaded.validate()?;
        tracing::debug!(config = ?loaded, "Loaded scan configuration");
        Ok(loaded)
    }

    pub fn validate(&self) -> ScanResult<()> {
        if self.read_size == 0 {
            return Err(ScanError::Config("read_size must be positive".to_string()));
        }
        if self.latency_graph_len == 0 {
            return Err(ScanError::Config(
                "latency_graph_len must be positive".to_string(),
            ));
        }
        if self.fix_chunk_size == 0 {
            return Err(ScanError::Config("fix_chunk_size must be positive".to_string()));
        }
        if self.temp_resume_celsius >= self.temp_pause_celsius {
            return Err(ScanError::Config(format!(
                "temp_resume_celsius ({}) must be below temp_pause_celsius ({})",
                self.temp_resume_celsius, self.temp_pause_celsius
            )));
        }
        if !(0.0..=100.0).contains(&self.latency_percentile) {
            return Err(ScanError::Config(format!(
                "latency_percentile {} is outside 0..=100",
                self.latency_percentile
            )));
        }
        Ok(())
    }

    /// Read size for a device: capped, rounded down to whole sectors and
    /// never below one sector.
    pub fn effective_read_size(&self, sector_size: u32) -> usize {
        let sector = sector_size.max(1) as usize;
        let capped = self.read_size.min(MAX_READ_SIZE);
        let rounded = capped - capped % sector;
        rounded.max(sector)
    }

    pub fn short_timeout(&self) -> Duration {
        Duration::from_secs(self.short_timeout_secs)
    }

    pub fn long_timeout(&self) -> Duration {
        Duration::from_secs(self.long_timeout_secs)
    }

    pub fn temp_recheck_interval(&self) -> Duration {
        Duration::from_secs(self.temp_recheck_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ScanConfig::default();
        assert!(!config.fix);
        assert_eq!(config.read_size, 64 * 1024);
        assert_eq!(config.latency_graph_len, 70);
        assert_eq!(config.mount_policy, MountPolicy::RejectReadWrite);
        assert_eq!(config.unknown_error_limit, 500);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_scan_mode_names() {
        assert_eq!("seq".parse::<ScanMode>().unwrap(), ScanMode::Sequential);
        assert_eq!("Sequential".parse::<ScanMode>().unwrap(), ScanMode::Sequential);
        assert_eq!("RANDOM".parse::<ScanMode>().unwrap(), ScanMode::Random);
        assert!("zigzag".parse::<ScanMode>().is_err());
    }

    #[test]
    fn test_effective_read_size() {
        let mut config = ScanConfig::default();
        assert_eq!(config.effective_read_size(512), 65536);

        config.read_size = 1000;
        assert_eq!(config.effective_read_size(512), 512);

        config.read_size = 100;
        assert_eq!(config.effective_read_size(4096), 4096, "never below one sector");

        config.read_size = 64 * 1024 * 1024;
        assert_eq!(config.effective_read_size(512), MAX_READ_SIZE);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = ScanConfig {
            latency_graph_len: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ScanError::Config(_))));

        let config = ScanConfig {
            temp_resume_celsius: 60,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_load_file_and_env() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "fix = true\nmode = \"seq\"\nmount_policy = \"allow\"\nread_size = 4096").unwrap();

        std::env::set_var("DISKSCAN_LATENCY_GRAPH_LEN", "12");
        let config = ScanConfig::load(Some(file.path()));
        std::env::remove_var("DISKSCAN_LATENCY_GRAPH_LEN");

        let config = config.unwrap();
        assert!(config.fix);
        assert_eq!(config.mode, ScanMode::Sequential);
        assert_eq!(config.mount_policy, MountPolicy::Allow);
        assert_eq!(config.read_size, 4096);
        assert_eq!(config.latency_graph_len, 12);
        assert_eq!(config.slow_threshold_ms, 3000, "unset keys keep defaults");
    }

    #[test]
    #[serial]
    fn test_load_missing_explicit_file_fails() {
        let result = ScanConfig::load(Some(Path::new("/nonexistent/diskscan.toml")));
        assert!(matches!(result, Err(ScanError::Config(_))));
    }
}
