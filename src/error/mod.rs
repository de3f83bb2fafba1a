/// Error classification for the scan loop
///
/// Device-reported failures reach the engine as an `ErrorSeverity`. The
/// decision to continue or abort is a pure transition over that severity
/// and the running count of unclassifiable failures:
///
/// ```text
/// IoOutcome ──> ErrorSeverity ──> ErrorPolicy::next ──> ScanAction
///                                   (consecutive Unknown counter)
/// ```
///
/// # Usage Example
///
/// ```rust
/// use diskscan::error::{ErrorPolicy, ErrorSeverity, ScanAction};
///
/// let mut policy = ErrorPolicy::default();
/// assert_eq!(policy.next(ErrorSeverity::Uncorrected), ScanAction::Continue);
/// assert_eq!(policy.next(ErrorSeverity::Fatal), ScanAction::AbortFatal);
/// ```
pub mod classification;

pub use classification::{
    severity_for_sense_key, transition, ErrorPolicy, ErrorSeverity, ScanAction,
    DEFAULT_UNKNOWN_ERROR_LIMIT,
};
