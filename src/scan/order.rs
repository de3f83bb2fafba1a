// Read offsets within one latency stride

use crate::config::ScanMode;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Sectors per latency stride. The extra sector makes the strides
/// over-cover the device so the remainder never spills into an extra,
/// nearly empty bucket.
pub fn latency_stride(total_sectors: u64, buckets: usize) -> u64 {
    total_sectors / buckets.max(1) as u64 + 1
}

/// Byte offsets, relative to the stride start, of every read in a stride.
///
/// Built once per scan and reused for every stride. Random mode is a
/// permutation of the sequential set.
pub fn scan_order(
    mode: ScanMode,
    stride_sectors: u64,
    read_sectors: u64,
    sector_size: u32,
    rng: &mut StdRng,
) -> Vec<u64> {
    let read_sectors = read_sectors.max(1);
    let reads = (stride_sectors + read_sectors - 1) / read_sectors;
    let step = read_sectors * sector_size as u64;
    let mut order: Vec<u64> = (0..reads).map(|i| i * step).collect();
    if mode == ScanMode::Random {
        order.shuffle(rng);
    }
    order
}

/// Generator for the scan, from a fixed seed when one is configured.
pub fn scan_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}
