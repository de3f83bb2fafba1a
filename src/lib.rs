// Allow uppercase acronyms for industry-standard terms like ATA, SCSI, SMART
#![allow(clippy::upper_case_acronyms)]

pub mod ata;
pub mod config;
pub mod drives;
pub mod error;
pub mod io;
pub mod report;
pub mod scan;
pub mod sched;
pub mod scsi;

// Re-export the scan entry points for convenience
pub use config::{MountPolicy, ScanConfig, ScanMode};
pub use scan::{run_scan, Conclusion, FailureReason, ScanEngine, ScanState};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Shared stop flag for a running scan.
///
/// Clones observe the same flag, so one can be handed to a signal handler
/// while the scan loop polls another.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// The underlying flag, for `signal_hook::flag::register`.
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }
}

/// Definite failure of a response parser.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("buffer too short: need {needed} bytes, got {actual}")]
    TooShort { needed: usize, actual: usize },

    #[error("unrecognized sense response code 0x{0:02x}")]
    UnknownResponseCode(u8),

    #[error("checksum mismatch: expected 0x{expected:02x}, found 0x{actual:02x}")]
    ChecksumMismatch { expected: u8, actual: u8 },

    #[error("invalid header: {0}")]
    InvalidHeader(&'static str),

    #[error("IDENTIFY data says this is not an ATA device")]
    NotAtaDevice,

    #[error("IDENTIFY response is incomplete")]
    IncompleteIdentify,
}

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Device not found: {0}")]
    NotFound(String),

    #[error("Insufficient permissions: {0}")]
    PermissionDenied(String),

    #[error("Device is mounted: {0}")]
    Mounted(String),

    #[error("Invalid device geometry: {0}")]
    InvalidGeometry(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Device command failed: {0}")]
    CommandFailed(String),

    #[error("Malformed response: {0}")]
    Parse(#[from] ParseError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Operation interrupted by user")]
    Interrupted,
}

// Manual Clone implementation because std::io::Error doesn't implement Clone
impl Clone for ScanError {
    fn clone(&self) -> Self {
        match self {
            ScanError::IoError(e) => ScanError::IoError(std::io::Error::new(e.kind(), e.to_string())),
            ScanError::NotFound(s) => ScanError::NotFound(s.clone()),
            ScanError::PermissionDenied(s) => ScanError::PermissionDenied(s.clone()),
            ScanError::Mounted(s) => ScanError::Mounted(s.clone()),
            ScanError::InvalidGeometry(s) => ScanError::InvalidGeometry(s.clone()),
            ScanError::Unsupported(s) => ScanError::Unsupported(s.clone()),
            ScanError::CommandFailed(s) => ScanError::CommandFailed(s.clone()),
            ScanError::Parse(e) => ScanError::Parse(e.clone()),
            ScanError::Config(s) => ScanError::Config(s.clone()),
            ScanError::Interrupted => ScanError::Interrupted,
        }
    }
}

impl From<anyhow::Error> for ScanError {
    fn from(err: anyhow::Error) -> Self {
        ScanError::CommandFailed(err.to_string())
    }
}

impl From<nix::Error> for ScanError {
    fn from(err: nix::Error) -> Self {
        ScanError::IoError(std::io::Error::from(err))
    }
}

pub type ScanResult<T> = Result<T, ScanError>;
