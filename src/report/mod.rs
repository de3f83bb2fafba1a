// Reporting sink and the serializable scan summary
//
// The engine pushes structured events into a `ReportSink`; rendering them
// as a progress bar, a JSON log or anything else is the sink's business.

use crate::config::ScanMode;
use crate::drives::{Capacity, DeviceIdentity, MonitorSummary};
use crate::error::ErrorSeverity;
use crate::io::{DataCompleteness, IoOutcome};
use crate::scan::fix::RepairLog;
use crate::scan::latency::{HistogramEntry, LatencyBucket};
use crate::scan::{Conclusion, ScanState};
use crate::scsi::sense::SenseInfo;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;
use uuid::Uuid;

/// Latency above which an otherwise clean read is worth reporting.
pub const NOTABLE_LATENCY_MS: u64 = 1000;

/// Notable events kept in a summary; later ones are only counted.
pub const MAX_NOTABLE_EVENTS: usize = 10_000;

/// Scan parameters, announced once the engine starts reading.
#[derive(Debug, Clone, Serialize)]
pub struct ScanStart {
    pub device: String,
    pub total_sectors: u64,
    pub sector_size: u32,
    pub read_size: usize,
    pub mode: ScanMode,
    pub fix: bool,
    pub strides: usize,
}

/// One completed read.
#[derive(Debug, Clone, Copy)]
pub struct IoEvent<'a> {
    pub offset: u64,
    pub len: usize,
    pub latency_ms: u64,
    pub outcome: &'a IoOutcome,
}

impl IoEvent<'_> {
    /// Short data, any error or a read slower than a second.
    pub fn is_notable(&self) -> bool {
        self.outcome.data != DataCompleteness::Full
            || self.outcome.severity != ErrorSeverity::None
            || self.latency_ms > NOTABLE_LATENCY_MS
    }

    pub fn to_notable(&self) -> NotableEvent {
        NotableEvent {
            offset: self.offset,
            len: self.len,
            latency_ms: self.latency_ms,
            data: self.outcome.data,
            severity: self.outcome.severity,
            sense: self.outcome.sense.clone(),
            sense_hex: hex_bytes(self.outcome.sense_bytes()),
            os_error: self.outcome.os_error,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NotableEvent {
    pub offset: u64,
    pub len: usize,
    pub latency_ms: u64,
    pub data: DataCompleteness,
    pub severity: ErrorSeverity,
    pub sense: Option<SenseInfo>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub sense_hex: String,
    pub os_error: Option<i32>,
}

/// Position after a finished stride.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct StrideProgress {
    pub index: usize,
    pub strides: usize,
    pub sectors_done: u64,
    pub total_sectors: u64,
    pub errors: u64,
}

/// Everything known about a scan once it is over.
#[derive(Debug, Clone, Serialize)]
pub struct ScanSummary {
    pub id: String,
    pub device: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_secs: f64,
    pub conclusion: Conclusion,
    pub state: ScanState,
    /// Why the scan could not run, for `ScanProblem`
    pub problem: Option<String>,
    pub identity: Option<DeviceIdentity>,
    pub capacity: Option<Capacity>,
    pub mode: ScanMode,
    pub read_size: usize,
    pub fix: bool,
    pub reads: u64,
    pub bytes_read: u64,
    pub num_errors: u64,
    pub max_latency_ms: u64,
    pub histogram: Vec<HistogramEntry>,
    pub latency_graph: Vec<LatencyBucket>,
    pub notable_events: Vec<NotableEvent>,
    pub dropped_events: u64,
    pub repairs: Option<RepairLog>,
    pub monitor: Option<MonitorSummary>,
}

impl ScanSummary {
    /// Summary of a scan that never reached the device.
    pub fn problem(device: &str, mode: ScanMode, fix: bool, started_at: DateTime<Utc>, reason: String) -> Self {
        let finished_at = Utc::now();
        Self {
            id: new_scan_id(),
            device: device.to_string(),
            started_at,
            finished_at,
            duration_secs: seconds_between(started_at, finished_at),
            conclusion: Conclusion::ScanProblem,
            state: ScanState::FailedToOpen,
            problem: Some(reason),
            identity: None,
            capacity: None,
            mode,
            read_size: 0,
            fix,
            reads: 0,
            bytes_read: 0,
            num_errors: 0,
            max_latency_ms: 0,
            histogram: Vec::new(),
            latency_graph: Vec::new(),
            notable_events: Vec::new(),
            dropped_events: 0,
            repairs: None,
            monitor: None,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize scan summary")
    }

    pub fn save_json(&self, path: &Path) -> Result<()> {
        let json = self.to_json()?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write summary to {}", path.display()))
    }
}

pub fn new_scan_id() -> String {
    Uuid::new_v4().to_string()
}

pub fn seconds_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    (end - start).num_milliseconds().max(0) as f64 / 1000.0
}

fn hex_bytes(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect::<Vec<_>>().join(" ")
}

/// Receives scan events as they happen. Every method defaults to a no-op.
pub trait ReportSink {
    fn on_start(&mut self, _start: &ScanStart) {}

    fn on_io(&mut self, _event: &IoEvent<'_>) {}

    fn on_stride(&mut self, _progress: &StrideProgress) {}

    fn on_done(&mut self, _summary: &ScanSummary) {}
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl ReportSink for NullSink {}

/// Keeps notable events and stride progress in memory.
#[derive(Debug, Clone, Default)]
pub struct CollectingSink {
    pub started: Option<ScanStart>,
    pub reads: u64,
    pub notable: Vec<NotableEvent>,
    pub strides: Vec<StrideProgress>,
    pub conclusion: Option<Conclusion>,
}

impl ReportSink for CollectingSink {
    fn on_start(&mut self, start: &ScanStart) {
        self.started = Some(start.clone());
    }

    fn on_io(&mut self, event: &IoEvent<'_>) {
        self.reads += 1;
        if event.is_notable() {
            self.notable.push(event.to_notable());
        }
    }

    fn on_stride(&mut self, progress: &StrideProgress) {
        self.strides.push(*progress);
    }

    fn on_done(&mut self, summary: &ScanSummary) {
        self.conclusion = Some(summary.conclusion);
    }
}
