/// Fix mode: rewrite regions that read slowly or failed
///
/// A region that reported an uncorrected error is walked again in small
/// chunks and only the chunks that still fail are overwritten, with zeros,
/// so stale unreadable content never spreads to the rest of the region.
/// Any other error or a slow read gets the data just read written back
/// verbatim, which is enough for the drive to remap a weak sector.
use crate::error::classification::ErrorSeverity;
use crate::io::{AlignedBuffer, DeviceIo};
use crate::ScanResult;
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RepairKind {
    /// Region written back with the data just read
    Rewrite,
    /// Chunk overwritten with zeros
    ZeroFill,
}

#[derive(Debug, Clone, Serialize)]
pub struct Repair {
    pub offset: u64,
    pub len: usize,
    pub kind: RepairKind,
    pub reason: String,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

/// Every write issued by fix mode during one scan.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RepairLog {
    pub device: String,
    pub repairs: Vec<Repair>,
}

impl RepairLog {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            repairs: Vec::new(),
        }
    }

    pub fn record(&mut self, offset: u64, len: usize, kind: RepairKind, reason: impl Into<String>, success: bool) {
        let reason = reason.into();
        if success {
            tracing::warn!(
                device = %self.device,
                offset,
                len,
                kind = ?kind,
                reason = %reason,
                "Region rewritten"
            );
        } else {
            tracing::error!(
                device = %self.device,
                offset,
                len,
                kind = ?kind,
                reason = %reason,
                "Rewrite failed"
            );
        }
        self.repairs.push(Repair {
            offset,
            len,
            kind,
            reason,
            success,
            timestamp: Utc::now(),
        });
    }

    pub fn len(&self) -> usize {
        self.repairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.repairs.is_empty()
    }

    pub fn failures(&self) -> usize {
        self.repairs.iter().filter(|r| !r.success).count()
    }

    pub fn count(&self, kind: RepairKind) -> usize {
        self.repairs.iter().filter(|r| r.kind == kind).count()
    }
}

/// Chunk size for the zero-fill path: at least one sector and a whole
/// number of sectors.
pub fn fix_chunk_len(configured: usize, sector_size: u32) -> usize {
    let sector = sector_size.max(1) as usize;
    let chunk = configured.max(sector);
    chunk - chunk % sector
}

/// Owns the scratch buffer the chunked path reads into.
pub struct Fixer {
    chunk: AlignedBuffer,
    log: RepairLog,
}

impl Fixer {
    pub fn new(device: impl Into<String>, chunk_size: usize, sector_size: u32) -> ScanResult<Self> {
        let len = fix_chunk_len(chunk_size, sector_size);
        Ok(Self {
            chunk: AlignedBuffer::page_aligned(len)?,
            log: RepairLog::new(device),
        })
    }

    pub fn chunk_len(&self) -> usize {
        self.chunk.len()
    }

    pub fn log(&self) -> &RepairLog {
        &self.log
    }

    pub fn into_log(self) -> RepairLog {
        self.log
    }

    /// Repair the region at `offset` whose read produced `severity` and
    /// left `data` in the buffer. Fatal outcomes are left alone.
    pub fn repair<D: DeviceIo + ?Sized>(
        &mut self,
        dev: &mut D,
        offset: u64,
        data: &[u8],
        severity: ErrorSeverity,
        latency_ms: u64,
    ) {
        match severity {
            ErrorSeverity::Fatal => {
                tracing::debug!(offset, "Not repairing after a fatal error");
            }
            ErrorSeverity::Uncorrected => self.zero_fill_bad_chunks(dev, offset, data.len()),
            other => {
                let reason = if other.is_error() {
                    other.description().to_string()
                } else {
                    format!("slow read ({} ms)", latency_ms)
                };
                let outcome = dev.write_at(offset, data);
                self.log.record(offset, data.len(), RepairKind::Rewrite, reason, !outcome.is_error());
            }
        }
    }

    fn zero_fill_bad_chunks<D: DeviceIo + ?Sized>(&mut self, dev: &mut D, offset: u64, len: usize) {
        let chunk_len = self.chunk.len();
        let mut done = 0usize;
        while done < len {
            let this_len = chunk_len.min(len - done);
            let chunk_offset = offset + done as u64;
            let buf = &mut self.chunk.as_mut_slice()[..this_len];

            let outcome = dev.read_at(chunk_offset, buf);
            if outcome.severity == ErrorSeverity::Uncorrected {
                buf.fill(0);
                let written = dev.write_at(chunk_offset, buf);
                self.log.record(
                    chunk_offset,
                    this_len,
                    RepairKind::ZeroFill,
                    "uncorrected read",
                    !written.is_error(),
                );
            } else {
                tracing::debug!(offset = chunk_offset, len = this_len, severity = %outcome.severity, "Chunk readable, left as is");
            }
            done += this_len;
        }
    }
}
