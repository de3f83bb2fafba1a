/// Scan engine: walks the whole device and judges it
///
/// ```text
/// Closed -> Opening -> Identifying -> Ready -> Scanning -> Completed
///              |            |                      |
///              +------------+--> FailedToOpen      +----> Aborted
/// ```
///
/// The address space is cut into latency strides, one per latency graph
/// bucket. Each stride is read in the order `order::scan_order` gives,
/// every read is timed into the histogram and the open bucket, and its
/// outcome goes through `ErrorPolicy`. The device monitor runs between
/// strides.
pub mod fix;
pub mod latency;
pub mod order;
pub mod verdict;


pub use fix::{Fixer, Repair, RepairKind, RepairLog};
pub use latency::{Histogram, HistogramEntry, LatencyBucket, LatencyGraph, HISTOGRAM_THRESHOLDS_MS};
pub use verdict::{conclude, Conclusion, FailureReason};

use crate::config::{MountPolicy, ScanConfig};
use crate::drives::{
    discover_capacity, identify_device, Capacity, DeviceIdentity, DeviceMonitor, MonitorSummary,
    MountQuery, MountState, SmartTableSource,
};
use crate::error::{ErrorPolicy, ErrorSeverity, ScanAction};
use crate::io::{AlignedBuffer, DeviceIo, DeviceOpener};
use crate::report::{
    new_scan_id, seconds_between, IoEvent, NotableEvent, ReportSink, ScanStart, ScanSummary,
    StrideProgress, MAX_NOTABLE_EVENTS,
};
use crate::sched::RealtimeGuard;
use crate::{CancellationToken, ScanError, ScanResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ScanState {
    Closed,
    Opening,
    Identifying,
    Ready,
    Scanning,
    Completed,
    Aborted,
    FailedToOpen,
}

/// Counters for the reads issued so far.
#[derive(Debug, Clone, Default)]
struct ScanStats {
    reads: u64,
    bytes_read: u64,
    num_errors: u64,
    max_latency_ms: u64,
    notable: Vec<NotableEvent>,
    dropped_events: u64,
}

pub struct ScanEngine<D: DeviceIo> {
    path: PathBuf,
    config: ScanConfig,
    state: ScanState,
    device: Option<D>,
    capacity: Capacity,
    identity: DeviceIdentity,
    monitor: DeviceMonitor,
    histogram: Histogram,
    graph: LatencyGraph,
    stats: ScanStats,
    repairs: Option<RepairLog>,
    monitor_summary: Option<MonitorSummary>,
    conclusion: Option<Conclusion>,
    /// Completed or Aborted, kept after close
    end_state: Option<ScanState>,
    /// Read size actually used, fixed when the sweep starts
    read_size: Option<usize>,
    started_at: DateTime<Utc>,
}

impl<D: DeviceIo> ScanEngine<D> {
    /// Open, size and identify the device. On success the engine is Ready.
    pub fn open<O>(
        path: &Path,
        config: ScanConfig,
        opener: &O,
        mounts: &dyn MountQuery,
        tables: &dyn SmartTableSource,
    ) -> ScanResult<Self>
    where
        O: DeviceOpener<Device = D>,
    {
        let started_at = Utc::now();
        config.validate()?;
        let device_name = path.display().to_string();

        tracing::info!(device = %device_name, fix = config.fix, "Opening device");
        opener.check_access(path, config.fix)?;
        check_mount_policy(path, mounts, config.mount_policy)?;
        let mut dev = opener.open(path, config.fix)?;

        tracing::debug!(device = %device_name, "Identifying device");
        let capacity = match discover_capacity(&mut dev, config.short_timeout()).and_then(|c| {
            c.validate()?;
            Ok(c)
        }) {
            Ok(c) => c,
            Err(e) => {
                let _ = dev.close();
                return Err(e);
            }
        };
        tracing::info!(
            device = %device_name,
            total_sectors = capacity.total_sectors,
            sector_size = capacity.sector_size,
            source = ?capacity.source,
            "Device capacity"
        );

        let identity = match identify_device(&mut dev, config.short_timeout()) {
            Ok(identity) => identity,
            Err(e) => {
                tracing::warn!(device = %device_name, error = %e, "Identification failed, scanning anyway");
                DeviceIdentity::unknown()
            }
        };
        let monitor = DeviceMonitor::start(&mut dev, &identity, tables, &config);

        Ok(Self {
            path: path.to_path_buf(),
            graph: LatencyGraph::with_capacity(config.latency_graph_len),
            config,
            state: ScanState::Ready,
            device: Some(dev),
            capacity,
            identity,
            monitor,
            histogram: Histogram::new(),
            stats: ScanStats::default(),
            repairs: None,
            monitor_summary: None,
            conclusion: None,
            end_state: None,
            read_size: None,
            started_at,
        })
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    pub fn capacity(&self) -> &Capacity {
        &self.capacity
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn histogram(&self) -> &Histogram {
        &self.histogram
    }

    pub fn latency_graph(&self) -> &LatencyGraph {
        &self.graph
    }

    pub fn num_errors(&self) -> u64 {
        self.stats.num_errors
    }

    pub fn conclusion(&self) -> Option<Conclusion> {
        self.conclusion
    }

    pub fn device(&self) -> Option<&D> {
        self.device.as_ref()
    }

    /// Read the whole device once. The conclusion is assigned here and
    /// never changes afterwards.
    pub fn scan(&mut self, cancel: &CancellationToken, sink: &mut dyn ReportSink) -> ScanResult<Conclusion> {
        if self.state != ScanState::Ready {
            return Err(ScanError::Unsupported(format!(
                "scan requested in state {:?}",
                self.state
            )));
        }
        let mut dev = self
            .device
            .take()
            .ok_or_else(|| ScanError::Unsupported("device is closed".to_string()))?;
        let result = self.sweep(&mut dev, cancel, sink);
        self.device = Some(dev);
        result
    }

    fn sweep(&mut self, dev: &mut D, cancel: &CancellationToken, sink: &mut dyn ReportSink) -> ScanResult<Conclusion> {
        let config = self.config.clone();
        let device_name = self.path.display().to_string();
        let sector = self.capacity.sector_size as u64;
        let total = self.capacity.total_sectors;

        let read_size = config.effective_read_size(self.capacity.sector_size);
        if read_size != config.read_size {
            tracing::warn!(
                requested = config.read_size,
                adjusted = read_size,
                sector_size = self.capacity.sector_size,
                "Read size adjusted to a whole number of sectors"
            );
        }
        self.read_size = Some(read_size);
        let read_sectors = read_size as u64 / sector;
        let stride = order::latency_stride(total, config.latency_graph_len);
        let strides = ((total + stride - 1) / stride) as usize;
        let mut rng = order::scan_rng(config.seed);
        let offsets = order::scan_order(config.mode, stride, read_sectors, self.capacity.sector_size, &mut rng);

        let mut buf = AlignedBuffer::page_aligned(read_size)?;
        let mut policy = ErrorPolicy::new(config.unknown_error_limit);
        let mut fixer = if config.fix {
            Some(Fixer::new(device_name.as_str(), config.fix_chunk_size, self.capacity.sector_size)?)
        } else {
            None
        };
        let _realtime = config.realtime.then(RealtimeGuard::acquire);

        self.state = ScanState::Scanning;
        tracing::info!(
            device = %device_name,
            mode = %config.mode,
            read_size,
            stride_sectors = stride,
            strides,
            "Scan started"
        );
        sink.on_start(&ScanStart {
            device: device_name.clone(),
            total_sectors: total,
            sector_size: self.capacity.sector_size,
            read_size,
            mode: config.mode,
            fix: config.fix,
            strides,
        });

        let scan_started = Instant::now();
        let mut abort = None;
        let mut stride_start = 0u64;
        let mut index = 0usize;

        while stride_start < total {
            if cancel.is_cancelled() {
                break;
            }
            let stride_end = (stride_start + stride).min(total);
            let end_bytes = stride_end * sector;
            self.graph.prepare(stride_start);

            for &relative in &offsets {
                if cancel.is_cancelled() {
                    break;
                }
                let offset = stride_start * sector + relative;
                if offset >= end_bytes {
                    continue;
                }
                let len = (read_size as u64).min(end_bytes - offset) as usize;
                let action = self.scan_part(dev, offset, &mut buf.as_mut_slice()[..len], &mut policy, fixer.as_mut(), sink);
                if action != ScanAction::Continue {
                    abort = Some(action);
                    break;
                }
            }

            self.graph.finish(stride_end);
            if abort.is_some() || cancel.is_cancelled() {
                break;
            }

            index += 1;
            sink.on_stride(&StrideProgress {
                index,
                strides,
                sectors_done: stride_end,
                total_sectors: total,
                errors: self.stats.num_errors,
            });
            self.monitor.poll(dev, &config, cancel);
            stride_start += stride;
        }

        match abort {
            Some(ScanAction::AbortFatal) => {
                tracing::error!(device = %device_name, "Fatal device error, scan aborted");
            }
            Some(ScanAction::AbortTooManyUnknown) => {
                tracing::error!(
                    device = %device_name,
                    consecutive = policy.consecutive_unknown(),
                    "Too many unclassifiable errors, scan aborted"
                );
            }
            _ => {}
        }

        let cancelled = cancel.is_cancelled();
        self.state = if cancelled || abort.is_some() {
            ScanState::Aborted
        } else {
            ScanState::Completed
        };
        self.end_state = Some(self.state);
        self.repairs = fixer.map(Fixer::into_log);

        let conclusion = conclude(
            cancelled,
            self.stats.num_errors,
            self.stats.max_latency_ms,
            &self.histogram,
            &config,
        );
        self.conclusion = Some(conclusion);
        tracing::info!(
            device = %device_name,
            conclusion = %conclusion,
            reads = self.stats.reads,
            errors = self.stats.num_errors,
            max_latency_ms = self.stats.max_latency_ms,
            elapsed = %humantime::format_duration(std::time::Duration::from_secs(scan_started.elapsed().as_secs())),
            "Scan finished"
        );
        Ok(conclusion)
    }

    /// One timed read and everything that follows from it.
    fn scan_part(
        &mut self,
        dev: &mut D,
        offset: u64,
        buf: &mut [u8],
        policy: &mut ErrorPolicy,
        fixer: Option<&mut Fixer>,
        sink: &mut dyn ReportSink,
    ) -> ScanAction {
        let len = buf.len();
        let t0 = Instant::now();
        let outcome = dev.read_at(offset, buf);
        let latency_ms = t0.elapsed().as_millis() as u64;

        self.histogram.record(latency_ms);
        self.graph.add(latency_ms);
        self.stats.reads += 1;
        self.stats.bytes_read += len as u64;
        self.stats.max_latency_ms = self.stats.max_latency_ms.max(latency_ms);

        match outcome.severity {
            ErrorSeverity::None => {}
            ErrorSeverity::Corrected => {
                tracing::warn!(offset, len, latency_ms, "Corrected read error");
            }
            severity => {
                self.stats.num_errors += 1;
                tracing::warn!(
                    offset,
                    len,
                    latency_ms,
                    severity = %severity,
                    sense = ?outcome.sense.as_ref().map(|s| s.to_string()),
                    os_error = ?outcome.os_error,
                    "Read error"
                );
            }
        }
        if latency_ms > crate::report::NOTABLE_LATENCY_MS {
            tracing::warn!(offset, len, latency_ms, "Slow read");
        } else {
            tracing::trace!(offset, len, latency_ms, "Read");
        }

        let event = IoEvent {
            offset,
            len,
            latency_ms,
            outcome: &outcome,
        };
        if event.is_notable() {
            if self.stats.notable.len() < MAX_NOTABLE_EVENTS {
                self.stats.notable.push(event.to_notable());
            } else {
                self.stats.dropped_events += 1;
            }
        }
        sink.on_io(&event);

        let action = policy.next(outcome.severity);

        if let Some(fixer) = fixer {
            let slow = latency_ms > self.config.slow_threshold_ms;
            if action == ScanAction::Continue && (slow || outcome.is_error()) {
                fixer.repair(dev, offset, buf, outcome.severity, latency_ms);
            }
        }
        action
    }

    /// Final health check and release of the device. Idempotent.
    pub fn close(&mut self) -> Option<&MonitorSummary> {
        if let Some(mut dev) = self.device.take() {
            let summary = self.monitor.finish(&mut dev, &self.config);
            if let Err(e) = dev.close() {
                tracing::warn!(device = %self.path.display(), error = %e, "Error closing device");
            }
            self.monitor_summary = Some(summary);
            tracing::info!(device = %self.path.display(), "Device closed");
        }
        self.state = ScanState::Closed;
        self.monitor_summary.as_ref()
    }

    /// Snapshot of everything gathered so far.
    pub fn summary(&self) -> ScanSummary {
        let finished_at = Utc::now();
        ScanSummary {
            id: new_scan_id(),
            device: self.path.display().to_string(),
            started_at: self.started_at,
            finished_at,
            duration_secs: seconds_between(self.started_at, finished_at),
            conclusion: self.conclusion.unwrap_or(Conclusion::ScanProblem),
            state: self.end_state.unwrap_or(self.state),
            problem: None,
            identity: Some(self.identity.clone()),
            capacity: Some(self.capacity),
            mode: self.config.mode,
            read_size: self
                .read_size
                .unwrap_or_else(|| self.config.effective_read_size(self.capacity.sector_size)),
            fix: self.config.fix,
            reads: self.stats.reads,
            bytes_read: self.stats.bytes_read,
            num_errors: self.stats.num_errors,
            max_latency_ms: self.stats.max_latency_ms,
            histogram: self.histogram.entries(),
            latency_graph: self.graph.buckets().to_vec(),
            notable_events: self.stats.notable.clone(),
            dropped_events: self.stats.dropped_events,
            repairs: self.repairs.clone(),
            monitor: self.monitor_summary.clone(),
        }
    }
}

impl<D: DeviceIo> Drop for ScanEngine<D> {
    fn drop(&mut self) {
        if self.device.is_some() {
            self.close();
        }
    }
}

fn check_mount_policy(path: &Path, mounts: &dyn MountQuery, policy: MountPolicy) -> ScanResult<()> {
    if policy == MountPolicy::Allow {
        return Ok(());
    }
    let state = mounts.mount_state(path)?;
    let rejected = match policy {
        MountPolicy::RejectAny => state != MountState::NotMounted,
        MountPolicy::RejectReadWrite => state == MountState::ReadWrite,
        MountPolicy::Allow => false,
    };
    if rejected {
        return Err(ScanError::Mounted(format!(
            "{} is mounted {}",
            path.display(),
            if state == MountState::ReadWrite { "read-write" } else { "read-only" }
        )));
    }
    if state != MountState::NotMounted {
        tracing::warn!(device = %path.display(), state = ?state, "Scanning a mounted device");
    }
    Ok(())
}

/// Open, scan and close in one go. Never fails: a device that cannot be
/// opened yields a `ScanProblem` summary.
pub fn run_scan<O: DeviceOpener>(
    path: &Path,
    config: ScanConfig,
    opener: &O,
    mounts: &dyn MountQuery,
    tables: &dyn SmartTableSource,
    cancel: &CancellationToken,
    sink: &mut dyn ReportSink,
) -> ScanSummary {
    let started_at = Utc::now();
    let (mode, fix) = (config.mode, config.fix);

    let mut engine = match ScanEngine::open(path, config, opener, mounts, tables) {
        Ok(engine) => engine,
        Err(e) => {
            tracing::error!(device = %path.display(), error = %e, "Cannot open device for scanning");
            let summary = ScanSummary::problem(&path.display().to_string(), mode, fix, started_at, e.to_string());
            sink.on_done(&summary);
            return summary;
        }
    };

    let problem = match engine.scan(cancel, sink) {
        Ok(_) => None,
        Err(e) => {
            tracing::error!(device = %path.display(), error = %e, "Scan could not run");
            Some(e.to_string())
        }
    };
    engine.close();

    let mut summary = engine.summary();
    summary.problem = problem;
    sink.on_done(&summary);
    summary
}
