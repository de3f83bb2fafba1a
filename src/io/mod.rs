// Raw device I/O seen from the scan engine
//
// The engine consumes these traits and never a concrete transport. A
// device may move data with plain positioned reads, with SCSI commands
// through a pass-through interface, or both.

pub mod buffer;
#[cfg(target_os = "linux")]
pub mod linux;

pub use buffer::AlignedBuffer;

use crate::error::classification::ErrorSeverity;
use crate::scsi::cdb::{CommandBlock, DataDirection};
use crate::scsi::sense::{parse_sense, SenseInfo, SenseKey, MAX_SENSE_LEN};
use crate::{ScanError, ScanResult};
use nix::unistd::{access, AccessFlags};
use serde::Serialize;
use std::path::Path;
use std::time::Duration;

/// How much of the requested data actually arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DataCompleteness {
    Full,
    Partial,
    None,
}

impl DataCompleteness {
    pub fn from_transfer(requested: usize, transferred: usize) -> Self {
        if transferred >= requested {
            DataCompleteness::Full
        } else if transferred > 0 {
            DataCompleteness::Partial
        } else {
            DataCompleteness::None
        }
    }
}

/// Result of one operation against the device.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IoOutcome {
    pub data: DataCompleteness,
    pub severity: ErrorSeverity,
    pub sense: Option<SenseInfo>,
    #[serde(skip)]
    sense_bytes: Vec<u8>,
    /// OS error code when the failure came from the I/O layer itself.
    pub os_error: Option<i32>,
}

impl IoOutcome {
    pub fn ok() -> Self {
        Self::with_data(DataCompleteness::Full)
    }

    pub fn with_data(data: DataCompleteness) -> Self {
        let severity = if data == DataCompleteness::Full {
            ErrorSeverity::None
        } else {
            ErrorSeverity::Unknown
        };
        Self {
            data,
            severity,
            sense: None,
            sense_bytes: Vec::new(),
            os_error: None,
        }
    }

    /// Outcome classified from returned sense data. Sense that does not
    /// decode leaves the severity Unknown.
    pub fn from_sense(raw: &[u8], data: DataCompleteness) -> Self {
        let kept = &raw[..raw.len().min(MAX_SENSE_LEN)];
        let sense = parse_sense(kept).ok();
        let severity = sense
            .as_ref()
            .map(|s| s.severity())
            .unwrap_or(ErrorSeverity::Unknown);
        Self {
            data,
            severity,
            sense,
            sense_bytes: kept.to_vec(),
            os_error: None,
        }
    }

    /// Outcome of a failed system call. EIO is an unreadable medium; any
    /// other code cannot be classified.
    pub fn from_os_error(errno: i32) -> Self {
        let severity = if errno == libc::EIO {
            ErrorSeverity::Uncorrected
        } else {
            ErrorSeverity::Unknown
        };
        Self {
            data: DataCompleteness::None,
            severity,
            sense: None,
            sense_bytes: Vec::new(),
            os_error: Some(errno),
        }
    }

    /// Transport failure or timeout.
    pub fn fatal() -> Self {
        Self {
            data: DataCompleteness::None,
            severity: ErrorSeverity::Fatal,
            sense: None,
            sense_bytes: Vec::new(),
            os_error: None,
        }
    }

    pub fn with_severity(mut self, severity: ErrorSeverity) -> Self {
        self.severity = severity;
        self
    }

    pub fn sense_bytes(&self) -> &[u8] {
        &self.sense_bytes
    }

    pub fn sense_len(&self) -> usize {
        self.sense_bytes.len()
    }

    pub fn is_error(&self) -> bool {
        self.severity.is_error()
    }
}

/// A completed pass-through command.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandResponse {
    pub transferred: usize,
    pub outcome: IoOutcome,
}

impl CommandResponse {
    pub fn is_ok(&self) -> bool {
        self.outcome.severity == ErrorSeverity::None
    }
}

/// Size information a block device can report without any SCSI command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockGeometry {
    pub size_bytes: u64,
    pub sector_size: u32,
}

/// An open device handle.
pub trait DeviceIo {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> IoOutcome;

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> IoOutcome;

    /// Run one SCSI command. `Err` means the command could not be issued at
    /// all, for example when the device has no pass-through interface.
    fn submit_command(
        &mut self,
        cdb: &CommandBlock,
        direction: DataDirection,
        timeout: Duration,
        data: &mut [u8],
    ) -> ScanResult<CommandResponse>;

    /// Geometry from the block layer, when the device has one.
    fn block_geometry(&mut self) -> ScanResult<Option<BlockGeometry>> {
        Ok(None)
    }

    fn close(&mut self) -> ScanResult<()> {
        Ok(())
    }
}

/// Opens devices for the scan engine.
pub trait DeviceOpener {
    type Device: DeviceIo;

    /// Existence and permission check ahead of `open`.
    fn check_access(&self, path: &Path, writable: bool) -> ScanResult<()> {
        if access(path, AccessFlags::F_OK).is_err() {
            return Err(ScanError::NotFound(path.display().to_string()));
        }
        let mode = if writable {
            AccessFlags::R_OK | AccessFlags::W_OK
        } else {
            AccessFlags::R_OK
        };
        access(path, mode).map_err(|e| {
            ScanError::PermissionDenied(format!(
                "{} ({}): {}",
                path.display(),
                if writable { "read-write" } else { "read" },
                e
            ))
        })
    }

    fn open(&self, path: &Path, writable: bool) -> ScanResult<Self::Device>;
}

/// Whether scan reads go out as READ commands, so failures come back with
/// sense data, or as plain positioned reads the block layer may split.
///
/// Command reads are an optimisation. A command the device rejects or a
/// transfer over the transport limit falls back to a positioned read, and
/// never makes the scan look at a failure the disk did not have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadPath {
    command_reads: bool,
    /// Largest transfer one command may carry, in bytes
    max_transfer: Option<usize>,
}

impl ReadPath {
    pub fn new(command_reads: bool, max_transfer: Option<usize>) -> Self {
        Self {
            command_reads,
            max_transfer: max_transfer.filter(|&n| n > 0),
        }
    }

    pub fn positioned_only() -> Self {
        Self::new(false, None)
    }

    pub fn uses_commands(&self) -> bool {
        self.command_reads
    }

    fn fits(&self, len: usize) -> bool {
        self.max_transfer.map_or(true, |max| len <= max)
    }

    /// Read `buf` through `command` when that is possible, otherwise or on
    /// a transport refusal through `positioned`.
    pub fn read<C, P>(&mut self, buf: &mut [u8], command: C, positioned: P) -> IoOutcome
    where
        C: FnOnce(&mut [u8]) -> ScanResult<CommandResponse>,
        P: FnOnce(&mut [u8]) -> IoOutcome,
    {
        if !self.command_reads || !self.fits(buf.len()) {
            return positioned(buf);
        }
        match command(buf) {
            Ok(response) if is_rejected_command(&response.outcome) => {
                tracing::info!("Device rejects READ commands, switching to positioned reads");
                self.command_reads = false;
                positioned(buf)
            }
            Ok(response) => response.outcome,
            Err(ScanError::Unsupported(reason)) => {
                tracing::info!(%reason, "Command reads unavailable, switching to positioned reads");
                self.command_reads = false;
                positioned(buf)
            }
            Err(e) => {
                tracing::debug!(error = %e, len = buf.len(), "Command read not issued, retrying positioned");
                positioned(buf)
            }
        }
    }
}

/// ILLEGAL REQUEST with invalid opcode or invalid field in CDB: the device
/// does not take this command at all.
fn is_rejected_command(outcome: &IoOutcome) -> bool {
    matches!(
        &outcome.sense,
        Some(sense) if sense.sense_key == SenseKey::IllegalRequest && matches!(sense.asc, 0x20 | 0x24)
    )
}

/// Issue a data-in command and return the bytes that arrived. A command the
/// device rejects becomes `CommandFailed` carrying the decoded sense.
pub fn command_data_in<D: DeviceIo + ?Sized>(
    dev: &mut D,
    cdb: &CommandBlock,
    timeout: Duration,
    alloc_len: usize,
) -> ScanResult<Vec<u8>> {
    let mut buf = vec![0u8; alloc_len];
    let response = dev.submit_command(cdb, DataDirection::FromDevice, timeout, &mut buf)?;
    if response.outcome.is_error() {
        return Err(command_failure(cdb, &response.outcome));
    }
    buf.truncate(response.transferred.min(alloc_len));
    Ok(buf)
}

pub(crate) fn command_failure(cdb: &CommandBlock, outcome: &IoOutcome) -> ScanError {
    let detail = match &outcome.sense {
        Some(sense) => sense.to_string(),
        None => outcome.severity.description().to_string(),
    };
    ScanError::CommandFailed(format!("opcode 0x{:02x}: {}", cdb.opcode(), detail))
}
