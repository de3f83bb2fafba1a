/// Error severity classification and scan continuation policy
///
/// Every device-reported error is reduced to an `ErrorSeverity` here, from
/// the sense key alone. The scan loop never inspects sense data itself: it
/// feeds the severity into `ErrorPolicy::next` and obeys the `ScanAction`.
use crate::scsi::sense::SenseKey;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Consecutive unclassifiable failures tolerated before the scan gives up.
pub const DEFAULT_UNKNOWN_ERROR_LIMIT: u32 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorSeverity {
    /// Command completed without error
    None,
    /// Device recovered the data on its own
    Corrected,
    /// Data could not be read
    Uncorrected,
    /// Transient condition, the same command may succeed later
    NeedRetry,
    /// The device or transport cannot continue
    Fatal,
    /// No usable classification was available
    Unknown,
}

impl ErrorSeverity {
    pub fn description(&self) -> &'static str {
        match self {
            ErrorSeverity::None => "no error",
            ErrorSeverity::Corrected => "corrected error",
            ErrorSeverity::Uncorrected => "uncorrected error",
            ErrorSeverity::NeedRetry => "transient error",
            ErrorSeverity::Fatal => "fatal error",
            ErrorSeverity::Unknown => "unknown error",
        }
    }

    /// Whether this outcome counts toward the scan's error total.
    pub fn is_error(&self) -> bool {
        !matches!(self, ErrorSeverity::None | ErrorSeverity::Corrected)
    }
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorSeverity::None => "None",
            ErrorSeverity::Corrected => "Corrected",
            ErrorSeverity::Uncorrected => "Uncorrected",
            ErrorSeverity::NeedRetry => "NeedRetry",
            ErrorSeverity::Fatal => "Fatal",
            ErrorSeverity::Unknown => "Unknown",
        };
        f.write_str(name)
    }
}

/// The one place a sense key is turned into a severity.
pub fn severity_for_sense_key(key: SenseKey) -> ErrorSeverity {
    match key {
        SenseKey::NoSense => ErrorSeverity::None,
        SenseKey::RecoveredError => ErrorSeverity::Corrected,
        SenseKey::MediumError => ErrorSeverity::Uncorrected,
        SenseKey::UnitAttention | SenseKey::NotReady | SenseKey::AbortedCommand => {
            ErrorSeverity::NeedRetry
        }
        SenseKey::HardwareError
        | SenseKey::IllegalRequest
        | SenseKey::DataProtect
        | SenseKey::BlankCheck
        | SenseKey::VendorSpecific
        | SenseKey::CopyAborted
        | SenseKey::Reserved
        | SenseKey::VolumeOverflow
        | SenseKey::Miscompare
        | SenseKey::Completed => ErrorSeverity::Fatal,
    }
}

/// What the scan loop does after one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanAction {
    Continue,
    AbortFatal,
    AbortTooManyUnknown,
}

/// Pure transition: severity and the current consecutive-unknown count in,
/// action and the updated count out.
pub fn transition(severity: ErrorSeverity, consecutive_unknown: u32, limit: u32) -> (ScanAction, u32) {
    match severity {
        ErrorSeverity::Fatal => (ScanAction::AbortFatal, consecutive_unknown),
        ErrorSeverity::Unknown => {
            let count = consecutive_unknown.saturating_add(1);
            if count > limit {
                (ScanAction::AbortTooManyUnknown, count)
            } else {
                (ScanAction::Continue, count)
            }
        }
        _ => (ScanAction::Continue, 0),
    }
}

/// Stateful wrapper around `transition` held by the scan loop.
#[derive(Debug, Clone)]
pub struct ErrorPolicy {
    limit: u32,
    consecutive_unknown: u32,
}

impl ErrorPolicy {
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            consecutive_unknown: 0,
        }
    }

    pub fn next(&mut self, severity: ErrorSeverity) -> ScanAction {
        let (action, count) = transition(severity, self.consecutive_unknown, self.limit);
        self.consecutive_unknown = count;
        action
    }

    pub fn consecutive_unknown(&self) -> u32 {
        self.consecutive_unknown
    }
}

impl Default for ErrorPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_UNKNOWN_ERROR_LIMIT)
    }
}
