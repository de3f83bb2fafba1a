// Health monitoring between latency strides
//
// The variant is chosen once at identification time. ATA devices are
// watched through SMART over the pass-through; SCSI devices through the
// informational exceptions log page when they have one.

use super::identify::DeviceIdentity;
use super::smart_table::{SmartTable, SmartTableSource, TemperatureReading};
use crate::ata::passthrough::{
    ata_status_from_sense, smart_return_status_result, AtaCommand, SmartStatus, StatusConfidence,
};
use crate::ata::smart::{parse_smart_data, parse_smart_thresholds, SmartData, SMART_PAGE_LEN};
use crate::config::ScanConfig;
use crate::error::ErrorSeverity;
use crate::io::{command_data_in, command_failure, DeviceIo};
use crate::scsi::cdb::{self, DataDirection, LogPageControl};
use crate::scsi::pages::{
    parse_log_page, InformationalExceptions, LOG_PAGE_INFORMATIONAL_EXCEPTIONS, LOG_PAGE_SUPPORTED,
};
use crate::{CancellationToken, ScanResult};
use serde::Serialize;
use std::thread;
use std::time::{Duration, Instant};

/// Temperature reads that may fail in a row before a cooling pause is
/// abandoned.
const MAX_TEMPERATURE_FAILURES: u32 = 3;

const LOG_SENSE_ALLOC_LEN: u16 = 512;

/// SMART counters the scan tracks across strides.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SmartSnapshot {
    pub temperature: Option<TemperatureReading>,
    pub reallocations: Option<u64>,
    pub pending_reallocations: Option<u64>,
    pub crc_errors: Option<u64>,
}

impl SmartSnapshot {
    pub fn from_data(table: &SmartTable, data: &SmartData) -> Self {
        Self {
            temperature: table.temperature(data),
            reallocations: table.reallocations(data),
            pending_reallocations: table.pending_reallocations(data),
            crc_errors: table.crc_errors(data),
        }
    }

    fn current_temperature(&self) -> Option<i32> {
        self.temperature.map(|t| t.current)
    }
}

/// End-of-scan health findings. Informational only.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MonitorSummary {
    pub smart_status_start: Option<SmartStatus>,
    pub smart_status_end: Option<SmartStatus>,
    pub initial: Option<SmartSnapshot>,
    #[serde(rename = "final")]
    pub last: Option<SmartSnapshot>,
    pub informational_exceptions: Option<InformationalExceptions>,
    pub temperature_pauses: u32,
}

#[derive(Debug, Clone)]
pub struct AtaMonitor {
    table: SmartTable,
    smart_available: bool,
    initial: Option<SmartSnapshot>,
    last: Option<SmartSnapshot>,
    status_start: Option<SmartStatus>,
    pauses: u32,
}

#[derive(Debug, Clone, Default)]
pub struct ScsiMonitor {
    ie_page: bool,
    last_ie: Option<InformationalExceptions>,
}

#[derive(Debug, Clone)]
pub enum DeviceMonitor {
    Ata(AtaMonitor),
    Scsi(ScsiMonitor),
}

impl DeviceMonitor {
    /// Pick the variant for `identity` and take the baseline readings.
    pub fn start<D: DeviceIo + ?Sized>(
        dev: &mut D,
        identity: &DeviceIdentity,
        tables: &dyn SmartTableSource,
        config: &ScanConfig,
    ) -> Self {
        if identity.is_ata {
            let table = tables.table_for_device(&identity.vendor, &identity.model, &identity.revision);
            DeviceMonitor::Ata(AtaMonitor::start(dev, table, config))
        } else {
            DeviceMonitor::Scsi(ScsiMonitor::start(dev, config))
        }
    }

    pub fn is_ata(&self) -> bool {
        matches!(self, DeviceMonitor::Ata(_))
    }

    /// Between-stride check. May block while a hot drive cools down.
    pub fn poll<D: DeviceIo + ?Sized>(&mut self, dev: &mut D, config: &ScanConfig, cancel: &CancellationToken) {
        match self {
            DeviceMonitor::Ata(m) => m.poll(dev, config, cancel),
            DeviceMonitor::Scsi(m) => m.poll(dev, config),
        }
    }

    pub fn finish<D: DeviceIo + ?Sized>(&mut self, dev: &mut D, config: &ScanConfig) -> MonitorSummary {
        match self {
            DeviceMonitor::Ata(m) => m.finish(dev, config),
            DeviceMonitor::Scsi(m) => m.finish(dev, config),
        }
    }
}

impl AtaMonitor {
    pub fn start<D: DeviceIo + ?Sized>(dev: &mut D, table: SmartTable, config: &ScanConfig) -> Self {
        let status_start = match smart_status(dev, config.short_timeout()) {
            Ok(status) => status,
            Err(e) => {
                tracing::debug!(error = %e, "SMART RETURN STATUS failed");
                None
            }
        };
        if status_start == Some(SmartStatus::ThresholdExceeded) {
            tracing::warn!("SMART reports a threshold exceeded before the scan");
        }

        let (smart_available, initial) = match read_smart(dev, config.short_timeout()) {
            Ok(data) => {
                let snapshot = SmartSnapshot::from_data(&table, &data);
                for attr in data.attributes.iter().filter(|a| a.is_failing()) {
                    tracing::warn!(
                        id = attr.id,
                        name = table.name_for(attr.id),
                        value = attr.value,
                        threshold = ?attr.threshold,
                        "SMART attribute below threshold"
                    );
                }
                tracing::info!(
                    table = %table.name,
                    temperature = ?snapshot.current_temperature(),
                    reallocations = ?snapshot.reallocations,
                    pending = ?snapshot.pending_reallocations,
                    crc_errors = ?snapshot.crc_errors,
                    power_on_hours = ?table.power_on_hours(&data),
                    "SMART baseline"
                );
                (true, Some(snapshot))
            }
            Err(e) => {
                tracing::warn!(error = %e, "SMART data unavailable, monitoring disabled");
                (false, None)
            }
        };

        Self {
            table,
            smart_available,
            initial,
            last: initial,
            status_start,
            pauses: 0,
        }
    }

    fn snapshot<D: DeviceIo + ?Sized>(&self, dev: &mut D, timeout: Duration) -> ScanResult<SmartSnapshot> {
        let data = read_smart(dev, timeout)?;
        Ok(SmartSnapshot::from_data(&self.table, &data))
    }

    pub fn poll<D: DeviceIo + ?Sized>(&mut self, dev: &mut D, config: &ScanConfig, cancel: &CancellationToken) {
        if !self.smart_available {
            return;
        }
        let snapshot = match self.snapshot(dev, config.short_timeout()) {
            Ok(s) => s,
            Err(e) => {
                tracing::debug!(error = %e, "SMART poll failed");
                return;
            }
        };

        if let Some(previous) = self.last {
            log_delta("reallocations", previous.reallocations, snapshot.reallocations);
            log_delta(
                "pending reallocations",
                previous.pending_reallocations,
                snapshot.pending_reallocations,
            );
            log_delta("CRC errors", previous.crc_errors, snapshot.crc_errors);
        }
        self.last = Some(snapshot);

        if let Some(temp) = snapshot.current_temperature() {
            if temp >= config.temp_pause_celsius {
                self.wait_for_cooling(dev, config, cancel, temp);
            }
        }
    }

    /// Re-read the temperature every recheck interval until it drops to the
    /// resume threshold, the scan is cancelled or SMART stops answering.
    fn wait_for_cooling<D: DeviceIo + ?Sized>(
        &mut self,
        dev: &mut D,
        config: &ScanConfig,
        cancel: &CancellationToken,
        mut temp: i32,
    ) {
        self.pauses += 1;
        let start = Instant::now();
        let mut consecutive_failures = 0;
        tracing::warn!(
            temperature = temp,
            pause_at = config.temp_pause_celsius,
            resume_at = config.temp_resume_celsius,
            "Drive too hot, pausing scan"
        );

        loop {
            if cancel.is_cancelled() {
                return;
            }
            sleep_unless_cancelled(config.temp_recheck_interval(), cancel);

            match self.snapshot(dev, config.short_timeout()).map(|s| s.current_temperature()) {
                Ok(Some(t)) => {
                    consecutive_failures = 0;
                    temp = t;
                    if temp <= config.temp_resume_celsius {
                        tracing::info!(
                            temperature = temp,
                            paused = %humantime::format_duration(Duration::from_secs(start.elapsed().as_secs())),
                            "Drive cooled down, resuming scan"
                        );
                        return;
                    }
                    tracing::debug!(temperature = temp, "Still waiting for drive to cool");
                }
                Ok(None) | Err(_) => {
                    consecutive_failures += 1;
                    if consecutive_failures >= MAX_TEMPERATURE_FAILURES {
                        tracing::warn!(
                            failures = consecutive_failures,
                            last_temperature = temp,
                            "Temperature unreadable, resuming scan"
                        );
                        return;
                    }
                }
            }
        }
    }

    pub fn finish<D: DeviceIo + ?Sized>(&mut self, dev: &mut D, config: &ScanConfig) -> MonitorSummary {
        let status_end = smart_status(dev, config.short_timeout()).ok().flatten();
        if status_end == Some(SmartStatus::ThresholdExceeded) {
            tracing::warn!("SMART reports a threshold exceeded after the scan");
        }

        if self.smart_available {
            match self.snapshot(dev, config.short_timeout()) {
                Ok(s) => self.last = Some(s),
                Err(e) => tracing::debug!(error = %e, "Final SMART read failed"),
            }
        }

        let initial_realloc = self.initial.and_then(|s| s.reallocations);
        let final_realloc = self.last.and_then(|s| s.reallocations);
        if let (Some(before), Some(after)) = (initial_realloc, final_realloc) {
            if after < before {
                tracing::warn!(before, after, "Reallocation count went down during the scan");
            } else if after > before {
                tracing::warn!(before, after, "Sectors were reallocated during the scan");
            }
        }

        MonitorSummary {
            smart_status_start: self.status_start,
            smart_status_end: status_end,
            initial: self.initial,
            last: self.last,
            informational_exceptions: None,
            temperature_pauses: self.pauses,
        }
    }
}

impl ScsiMonitor {
    pub fn start<D: DeviceIo + ?Sized>(dev: &mut D, config: &ScanConfig) -> Self {
        let supported = read_log_page(dev, LOG_PAGE_SUPPORTED, config.short_timeout())
            .map(|buf| parse_log_page(&buf).map(|p| p.supported_pages()).unwrap_or_default())
            .unwrap_or_default();

        let mut monitor = Self {
            ie_page: supported.contains(&LOG_PAGE_INFORMATIONAL_EXCEPTIONS),
            last_ie: None,
        };
        monitor.poll(dev, config);
        monitor
    }

    pub fn poll<D: DeviceIo + ?Sized>(&mut self, dev: &mut D, config: &ScanConfig) {
        if !self.ie_page {
            return;
        }
        let ie = read_log_page(dev, LOG_PAGE_INFORMATIONAL_EXCEPTIONS, config.short_timeout())
            .ok()
            .and_then(|buf| parse_log_page(&buf).ok().and_then(|p| p.informational_exceptions()));

        if let Some(ie) = ie {
            if ie.asc != 0 && self.last_ie.map(|l| l.asc) != Some(ie.asc) {
                tracing::warn!(asc = ie.asc, ascq = ie.ascq, "Informational exception reported");
            }
            if ie.temperature != 0xFF {
                tracing::debug!(temperature = ie.temperature, "SCSI temperature");
            }
            self.last_ie = Some(ie);
        }
    }

    pub fn finish<D: DeviceIo + ?Sized>(&mut self, dev: &mut D, config: &ScanConfig) -> MonitorSummary {
        self.poll(dev, config);
        MonitorSummary {
            informational_exceptions: self.last_ie,
            ..Default::default()
        }
    }
}

fn log_delta(what: &str, before: Option<u64>, after: Option<u64>) {
    if let (Some(before), Some(after)) = (before, after) {
        if after != before {
            tracing::warn!(counter = what, before, after, "SMART counter changed");
        }
    }
}

fn sleep_unless_cancelled(total: Duration, cancel: &CancellationToken) {
    let slice = Duration::from_millis(100);
    let deadline = Instant::now() + total;
    while !cancel.is_cancelled() {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep(slice.min(deadline - now));
    }
}

/// SMART READ DATA with thresholds merged in when the device provides them.
pub fn read_smart<D: DeviceIo + ?Sized>(dev: &mut D, timeout: Duration) -> ScanResult<SmartData> {
    let buf = command_data_in(dev, &AtaCommand::smart_read_data().to_cdb_16(), timeout, SMART_PAGE_LEN)?;
    let mut data = parse_smart_data(&buf)?;

    match command_data_in(
        dev,
        &AtaCommand::smart_read_thresholds().to_cdb_16(),
        timeout,
        SMART_PAGE_LEN,
    )
    .and_then(|buf| Ok(parse_smart_thresholds(&buf)?))
    {
        Ok(thresholds) => data.merge_thresholds(&thresholds),
        Err(e) => tracing::debug!(error = %e, "SMART thresholds unavailable"),
    }
    Ok(data)
}

/// SMART RETURN STATUS. `None` when the returned registers carry neither
/// signature.
pub fn smart_status<D: DeviceIo + ?Sized>(dev: &mut D, timeout: Duration) -> ScanResult<Option<SmartStatus>> {
    let cdb = AtaCommand::smart_return_status().to_cdb_16();
    let response = dev.submit_command(&cdb, DataDirection::None, timeout, &mut [])?;
    if response.outcome.severity == ErrorSeverity::Fatal {
        return Err(command_failure(&cdb, &response.outcome));
    }

    let report = match ata_status_from_sense(response.outcome.sense_bytes()) {
        Some(report) => report,
        None => return Ok(None),
    };
    if report.confidence == StatusConfidence::Reconstructed {
        tracing::debug!("SMART status rebuilt from fixed-format sense");
    }
    Ok(smart_return_status_result(&report.status))
}

fn read_log_page<D: DeviceIo + ?Sized>(dev: &mut D, page: u8, timeout: Duration) -> ScanResult<Vec<u8>> {
    let cdb = cdb::log_sense(page, 0, LogPageControl::CumulativeCurrent, 0, LOG_SENSE_ALLOC_LEN);
    command_data_in(dev, &cdb, timeout, LOG_SENSE_ALLOC_LEN as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_delta_ignores_missing() {
        // Only exercises the no-panic paths; output goes to tracing
        log_delta("reallocations", None, Some(3));
        log_delta("reallocations", Some(3), Some(3));
        log_delta("reallocations", Some(3), Some(4));
    }

    #[test]
    fn test_sleep_returns_early_when_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let start = Instant::now();
        sleep_unless_cancelled(Duration::from_secs(10), &cancel);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_snapshot_from_data() {
        use crate::ata::smart::SmartAttributeRecord;
        let table = SmartTable::generic();
        let data = SmartData {
            version: 0x10,
            attributes: vec![
                SmartAttributeRecord {
                    id: 5,
                    status_flags: 0x33,
                    value: 100,
                    worst: 100,
                    threshold: Some(10),
                    raw: 2,
                },
                SmartAttributeRecord {
                    id: 194,
                    status_flags: 0x22,
                    value: 40,
                    worst: 50,
                    threshold: None,
                    raw: 40,
                },
            ],
        };
        let snapshot = SmartSnapshot::from_data(&table, &data);
        assert_eq!(snapshot.reallocations, Some(2));
        assert_eq!(snapshot.current_temperature(), Some(40));
        assert_eq!(snapshot.crc_errors, None);
    }
}
