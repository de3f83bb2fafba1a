// Each test binary uses a different subset of the helpers
#![allow(dead_code)]

// Common test utilities and mock infrastructure
//
// An in-memory device that answers the commands the scan engine issues,
// with faults injected by byte range, plus an opener and mount table to
// go with it.

pub mod mock_device;

use diskscan::drives::{MountEntry, MountTable};

/// Fixed-format sense data with the given key, ASC and ASCQ.
pub fn fixed_sense(key: u8, asc: u8, ascq: u8) -> Vec<u8> {
    let mut sense = vec![0u8; 18];
    sense[0] = 0x70;
    sense[2] = key & 0x0F;
    sense[7] = 10;
    sense[12] = asc;
    sense[13] = ascq;
    sense
}

/// Unrecovered read error.
pub fn medium_error() -> Vec<u8> {
    fixed_sense(0x03, 0x11, 0x00)
}

/// Internal target failure.
pub fn hardware_error() -> Vec<u8> {
    fixed_sense(0x04, 0x44, 0x00)
}

/// Invalid command operation code.
pub fn illegal_request() -> Vec<u8> {
    fixed_sense(0x05, 0x20, 0x00)
}

pub fn empty_mounts() -> MountTable {
    MountTable::default()
}

/// A table where `source` is mounted on `/mnt/data`.
pub fn mounted(source: &str, read_only: bool) -> MountTable {
    MountTable::new(vec![MountEntry {
        source: source.to_string(),
        mount_point: "/mnt/data".to_string(),
        read_only,
        device: None,
    }])
}
