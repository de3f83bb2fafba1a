// Latency histogram and per-region latency graph

use serde::Serialize;

/// Upper bounds in milliseconds; the last bucket is unbounded.
pub const HISTOGRAM_THRESHOLDS_MS: [u64; 19] = [
    1, 10, 100, 500, 1000, 2000, 3000, 4000, 5000, 6000, 7000, 8000, 9000, 10_000, 15_000, 20_000,
    25_000, 30_000, u64::MAX,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HistogramEntry {
    /// Bucket upper bound; `None` for the unbounded last bucket
    pub latency_ms: Option<u64>,
    pub count: u64,
}

/// Read count per latency threshold bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Histogram {
    counts: [u64; HISTOGRAM_THRESHOLDS_MS.len()],
}

impl Histogram {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of the first bucket whose threshold exceeds `latency_ms`.
    pub fn bucket_index(latency_ms: u64) -> usize {
        HISTOGRAM_THRESHOLDS_MS
            .iter()
            .position(|&threshold| latency_ms < threshold)
            .unwrap_or(HISTOGRAM_THRESHOLDS_MS.len() - 1)
    }

    pub fn record(&mut self, latency_ms: u64) {
        self.counts[Self::bucket_index(latency_ms)] += 1;
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Upper bound of the bucket holding the `percentile`th sample, or
    /// `None` when there are no samples. The unbounded bucket reports
    /// `u64::MAX`.
    pub fn percentile(&self, percentile: f64) -> Option<u64> {
        let total = self.total();
        if total == 0 {
            return None;
        }
        let rank = ((percentile / 100.0) * total as f64).ceil().max(1.0) as u64;
        let mut seen = 0;
        for (i, &count) in self.counts.iter().enumerate() {
            seen += count;
            if seen >= rank {
                return Some(HISTOGRAM_THRESHOLDS_MS[i]);
            }
        }
        HISTOGRAM_THRESHOLDS_MS.last().copied()
    }

    pub fn entries(&self) -> Vec<HistogramEntry> {
        HISTOGRAM_THRESHOLDS_MS
            .iter()
            .zip(self.counts.iter())
            .map(|(&threshold, &count)| HistogramEntry {
                latency_ms: (threshold != u64::MAX).then_some(threshold),
                count,
            })
            .collect()
    }
}

/// Latency summary of one address range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LatencyBucket {
    pub start_sector: u64,
    pub end_sector: u64,
    pub min_ms: u64,
    pub max_ms: u64,
    pub median_ms: u64,
}

#[derive(Debug, Clone)]
struct OpenBucket {
    start_sector: u64,
    min_ms: u64,
    max_ms: u64,
    samples: Vec<u64>,
}

/// Sequence of sealed latency buckets, one per stride.
#[derive(Debug, Clone, Default)]
pub struct LatencyGraph {
    buckets: Vec<LatencyBucket>,
    open: Option<OpenBucket>,
}

impl LatencyGraph {
    pub fn with_capacity(len: usize) -> Self {
        Self {
            buckets: Vec::with_capacity(len),
            open: None,
        }
    }

    /// Start a bucket at `start_sector`, resetting the accumulators.
    pub fn prepare(&mut self, start_sector: u64) {
        tracing::trace!(bucket = self.buckets.len(), start_sector, "Bucket prepare");
        self.open = Some(OpenBucket {
            start_sector,
            min_ms: u64::MAX,
            max_ms: 0,
            samples: Vec::new(),
        });
    }

    pub fn add(&mut self, latency_ms: u64) {
        if let Some(open) = self.open.as_mut() {
            open.min_ms = open.min_ms.min(latency_ms);
            open.max_ms = open.max_ms.max(latency_ms);
            open.samples.push(latency_ms);
        }
    }

    /// Seal the open bucket at `end_sector` and compute its median.
    pub fn finish(&mut self, end_sector: u64) {
        let Some(mut open) = self.open.take() else {
            return;
        };
        let median_ms = median(&mut open.samples);
        let min_ms = if open.samples.is_empty() { 0 } else { open.min_ms };
        tracing::trace!(bucket = self.buckets.len(), end_sector, median_ms, "Bucket finish");
        self.buckets.push(LatencyBucket {
            start_sector: open.start_sector,
            end_sector,
            min_ms,
            max_ms: open.max_ms,
            median_ms,
        });
    }

    pub fn buckets(&self) -> &[LatencyBucket] {
        &self.buckets
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

/// Median of `samples`, averaging the middle pair for even counts.
pub fn median(samples: &mut [u64]) -> u64 {
    if samples.is_empty() {
        return 0;
    }
    samples.sort_unstable();
    let mid = samples.len() / 2;
    if samples.len() % 2 == 1 {
        samples[mid]
    } else {
        (samples[mid - 1] + samples[mid]) / 2
    }
}
