// Final judgement of a scan

use super::latency::Histogram;
use crate::config::ScanConfig;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailureReason {
    IoErrors,
    MaxLatency,
    LatencyPercentile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Conclusion {
    /// The scan never got far enough to judge the device
    ScanProblem,
    /// Stopped on request
    Aborted,
    Passed,
    Failed(FailureReason),
}

impl Conclusion {
    /// Process exit status for this verdict.
    pub fn exit_code(&self) -> i32 {
        match self {
            Conclusion::Passed => 0,
            Conclusion::Failed(_) => 1,
            Conclusion::Aborted | Conclusion::ScanProblem => 2,
        }
    }
}

impl fmt::Display for Conclusion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Conclusion::ScanProblem => write!(f, "scan problem"),
            Conclusion::Aborted => write!(f, "aborted"),
            Conclusion::Passed => write!(f, "passed"),
            Conclusion::Failed(FailureReason::IoErrors) => write!(f, "failed (I/O errors)"),
            Conclusion::Failed(FailureReason::MaxLatency) => write!(f, "failed (maximum latency)"),
            Conclusion::Failed(FailureReason::LatencyPercentile) => {
                write!(f, "failed (latency percentile)")
            }
        }
    }
}

/// Verdict for a scan that ran. Errors outrank latency; the single worst
/// read outranks the percentile.
pub fn conclude(
    cancelled: bool,
    num_errors: u64,
    max_latency_ms: u64,
    histogram: &Histogram,
    config: &ScanConfig,
) -> Conclusion {
    if cancelled {
        return Conclusion::Aborted;
    }
    if num_errors > 0 {
        return Conclusion::Failed(FailureReason::IoErrors);
    }
    if max_latency_ms > config.max_latency_ms {
        return Conclusion::Failed(FailureReason::MaxLatency);
    }
    match histogram.percentile(config.latency_percentile) {
        Some(latency) if latency > config.percentile_ceiling_ms => {
            Conclusion::Failed(FailureReason::LatencyPercentile)
        }
        _ => Conclusion::Passed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn histogram(samples: &[(u64, usize)]) -> Histogram {
        let mut h = Histogram::new();
        for &(ms, n) in samples {
            for _ in 0..n {
                h.record(ms);
            }
        }
        h
    }

    #[test]
    fn test_cancel_wins() {
        let config = ScanConfig::default();
        assert_eq!(conclude(true, 7, 50_000, &Histogram::new(), &config), Conclusion::Aborted);
    }

    #[test_case(1, 0, &[(0, 100)] => Conclusion::Failed(FailureReason::IoErrors); "any error fails")]
    #[test_case(0, 12_000, &[(0, 100)] => Conclusion::Failed(FailureReason::MaxLatency); "one very slow read")]
    #[test_case(0, 900, &[(900, 100)] => Conclusion::Passed; "uniformly under the ceiling")]
    #[test_case(0, 2500, &[(2500, 100)] => Conclusion::Failed(FailureReason::LatencyPercentile); "percentile over ceiling")]
    #[test_case(0, 0, &[] => Conclusion::Passed; "empty scan passes")]
    fn test_conclude(errors: u64, max_ms: u64, samples: &[(u64, usize)]) -> Conclusion {
        conclude(false, errors, max_ms, &histogram(samples), &ScanConfig::default())
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(Conclusion::Passed.exit_code(), 0);
        assert_eq!(Conclusion::Failed(FailureReason::MaxLatency).exit_code(), 1);
        assert_eq!(Conclusion::Aborted.exit_code(), 2);
        assert_eq!(Conclusion::ScanProblem.exit_code(), 2);
    }
}
