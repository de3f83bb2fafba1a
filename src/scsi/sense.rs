/// Sense data decoding
///
/// Handles both sense formats a device may return:
/// - fixed format (response codes 0x70 and 0x71), at least 18 bytes
/// - descriptor format (response codes 0x72 and 0x73), at least 8 bytes,
///   followed by a type-length encoded descriptor list
///
/// A buffer that is truncated or carries an unknown response code is a
/// definite `ParseError`; no partially filled `SenseInfo` is ever returned.
use super::codec::{get_u16, get_u24, get_u32, get_u64};
use crate::error::classification::{severity_for_sense_key, ErrorSeverity};
use crate::ParseError;
use serde::Serialize;
use std::fmt;

/// Largest sense buffer the I/O layer keeps.
pub const MAX_SENSE_LEN: usize = 256;

const FIXED_MIN_LEN: usize = 18;
const DESCRIPTOR_MIN_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SenseKey {
    NoSense,
    RecoveredError,
    NotReady,
    MediumError,
    HardwareError,
    IllegalRequest,
    UnitAttention,
    DataProtect,
    BlankCheck,
    VendorSpecific,
    CopyAborted,
    AbortedCommand,
    Reserved,
    VolumeOverflow,
    Miscompare,
    Completed,
}

impl SenseKey {
    pub fn from_nibble(value: u8) -> Self {
        match value & 0x0F {
            0x0 => SenseKey::NoSense,
            0x1 => SenseKey::RecoveredError,
            0x2 => SenseKey::NotReady,
            0x3 => SenseKey::MediumError,
            0x4 => SenseKey::HardwareError,
            0x5 => SenseKey::IllegalRequest,
            0x6 => SenseKey::UnitAttention,
            0x7 => SenseKey::DataProtect,
            0x8 => SenseKey::BlankCheck,
            0x9 => SenseKey::VendorSpecific,
            0xA => SenseKey::CopyAborted,
            0xB => SenseKey::AbortedCommand,
            0xC => SenseKey::Reserved,
            0xD => SenseKey::VolumeOverflow,
            0xE => SenseKey::Miscompare,
            _ => SenseKey::Completed,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SenseKey::NoSense => "No Sense",
            SenseKey::RecoveredError => "Recovered Error",
            SenseKey::NotReady => "Not Ready",
            SenseKey::MediumError => "Medium Error",
            SenseKey::HardwareError => "Hardware Error",
            SenseKey::IllegalRequest => "Illegal Request",
            SenseKey::UnitAttention => "Unit Attention",
            SenseKey::DataProtect => "Data Protect",
            SenseKey::BlankCheck => "Blank Check",
            SenseKey::VendorSpecific => "Vendor Specific",
            SenseKey::CopyAborted => "Copy Aborted",
            SenseKey::AbortedCommand => "Aborted Command",
            SenseKey::Reserved => "Reserved",
            SenseKey::VolumeOverflow => "Volume Overflow",
            SenseKey::Miscompare => "Miscompare",
            SenseKey::Completed => "Completed",
        }
    }
}

impl fmt::Display for SenseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SenseFormat {
    Fixed,
    Descriptor,
}

/// ATA registers returned for a pass-through command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AtaStatus {
    pub extend: bool,
    pub error: u8,
    pub device: u8,
    pub status: u8,
    pub sector_count: u16,
    pub lba: u64,
}

/// Interpretation of the 24-bit sense-key-specific field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum SenseKeySpecific {
    IllegalRequest {
        /// Set when the error is in the CDB, clear when in the parameter data.
        command_error: bool,
        bit_pointer: Option<u8>,
        field_pointer: u16,
    },
    RetryCount {
        actual_retry_count: u16,
    },
    Progress {
        fraction: f64,
    },
    CopyAborted {
        segment_descriptor: bool,
        bit_pointer: Option<u8>,
        field_pointer: u16,
    },
    UnitAttention {
        overflow: bool,
    },
}

/// Decoded sense data.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SenseInfo {
    pub format: SenseFormat,
    /// Current error, as opposed to a deferred one.
    pub is_current: bool,
    pub sense_key: SenseKey,
    pub asc: u8,
    pub ascq: u8,
    pub information: Option<u64>,
    pub command_specific: Option<u64>,
    pub key_specific: Option<SenseKeySpecific>,
    pub fru_code: Option<u8>,
    pub ata_status: Option<AtaStatus>,
    pub incorrect_length: bool,
    pub vendor_unique_error: Option<u16>,
}

impl SenseInfo {
    fn empty(format: SenseFormat, is_current: bool, key: u8, asc: u8, ascq: u8) -> Self {
        Self {
            format,
            is_current,
            sense_key: SenseKey::from_nibble(key),
            asc,
            ascq,
            information: None,
            command_specific: None,
            key_specific: None,
            fru_code: None,
            ata_status: None,
            incorrect_length: false,
            vendor_unique_error: None,
        }
    }

    pub fn is_fixed(&self) -> bool {
        self.format == SenseFormat::Fixed
    }

    pub fn severity(&self) -> ErrorSeverity {
        severity_for_sense_key(self.sense_key)
    }
}

impl fmt::Display for SenseInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} asc={:02X} ascq={:02X}{}",
            self.sense_key,
            self.asc,
            self.ascq,
            if self.is_current { "" } else { " (deferred)" }
        )
    }
}

/// Decode a sense buffer.
pub fn parse_sense(sense: &[u8]) -> Result<SenseInfo, ParseError> {
    let first = *sense.first().ok_or(ParseError::TooShort {
        needed: 1,
        actual: 0,
    })?;
    match first & 0x7F {
        0x70 => parse_fixed(sense, true),
        0x71 => parse_fixed(sense, false),
        0x72 => parse_descriptor(sense, true),
        0x73 => parse_descriptor(sense, false),
        code => Err(ParseError::UnknownResponseCode(code)),
    }
}

fn parse_fixed(sense: &[u8], is_current: bool) -> Result<SenseInfo, ParseError> {
    if sense.len() < FIXED_MIN_LEN {
        return Err(ParseError::TooShort {
            needed: FIXED_MIN_LEN,
            actual: sense.len(),
        });
    }

    let mut info = SenseInfo::empty(
        SenseFormat::Fixed,
        is_current,
        sense[2],
        sense[12],
        sense[13],
    );

    if sense[0] & 0x80 != 0 {
        info.information = Some(get_u32(sense, 3) as u64);
    }
    info.incorrect_length = sense[2] & 0x20 != 0;
    info.command_specific = Some(get_u32(sense, 8) as u64);
    info.fru_code = Some(sense[14]);
    info.key_specific = decode_key_specific(info.sense_key, &sense[15..18]);
    if sense.len() >= 22 {
        info.vendor_unique_error = Some(get_u16(sense, 20));
    }

    Ok(info)
}

fn parse_descriptor(sense: &[u8], is_current: bool) -> Result<SenseInfo, ParseError> {
    if sense.len() < DESCRIPTOR_MIN_LEN {
        return Err(ParseError::TooShort {
            needed: DESCRIPTOR_MIN_LEN,
            actual: sense.len(),
        });
    }

    let mut info = SenseInfo::empty(
        SenseFormat::Descriptor,
        is_current,
        sense[1],
        sense[2],
        sense[3],
    );

    for desc in descriptors(sense) {
        let p = desc.payload;
        match (desc.kind, p.len()) {
            (0x00, 0x0A) => {
                if p[0] & 0x80 != 0 {
                    info.information = Some(get_u64(p, 2));
                }
            }
            (0x01, 0x0A) => info.command_specific = Some(get_u64(p, 2)),
            (0x02, 0x06) => {
                info.key_specific = decode_key_specific(info.sense_key, &p[2..5]);
            }
            (0x03, 0x02) => info.fru_code = Some(p[1]),
            (0x05, 0x02) => info.incorrect_length = p[1] & 0x20 != 0,
            (0x09, 0x0C) => info.ata_status = Some(decode_ata_return(p)),
            (0x80, len) if len >= 2 => info.vendor_unique_error = Some(get_u16(p, 0)),
            (kind, len) => {
                tracing::trace!(kind, len, "Skipping sense descriptor");
            }
        }
    }

    Ok(info)
}

/// One entry of a descriptor-format sense list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SenseDescriptor<'a> {
    pub kind: u8,
    /// Bytes following the two-byte header.
    pub payload: &'a [u8],
}

/// Iterator over the descriptors of descriptor-format sense data.
pub struct Descriptors<'a> {
    buf: &'a [u8],
    pos: usize,
}

/// Iterate the descriptor list, stopping at the declared additional length
/// or the end of the buffer, whichever comes first.
pub fn descriptors(sense: &[u8]) -> Descriptors<'_> {
    let end = if sense.len() >= DESCRIPTOR_MIN_LEN {
        (sense[7] as usize + DESCRIPTOR_MIN_LEN).min(sense.len())
    } else {
        0
    };
    Descriptors {
        buf: &sense[..end],
        pos: DESCRIPTOR_MIN_LEN,
    }
}

impl<'a> Iterator for Descriptors<'a> {
    type Item = SenseDescriptor<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let header_end = self.pos + 2;
        if header_end > self.buf.len() {
            return None;
        }
        let kind = self.buf[self.pos];
        let len = self.buf[self.pos + 1] as usize;
        if header_end + len > self.buf.len() {
            self.pos = self.buf.len();
            return None;
        }
        let payload = &self.buf[header_end..header_end + len];
        self.pos = header_end + len;
        Some(SenseDescriptor { kind, payload })
    }
}

fn decode_ata_return(p: &[u8]) -> AtaStatus {
    let extend = p[0] & 0x01 != 0;
    let (sector_count, lba) = if extend {
        let count = (p[2] as u16) << 8 | p[3] as u16;
        let lba = p[5] as u64
            | (p[7] as u64) << 8
            | (p[9] as u64) << 16
            | (p[4] as u64) << 24
            | (p[6] as u64) << 32
            | (p[8] as u64) << 40;
        (count, lba)
    } else {
        let lba = p[5] as u64 | (p[7] as u64) << 8 | (p[9] as u64) << 16;
        (p[3] as u16, lba)
    };
    AtaStatus {
        extend,
        error: p[1],
        device: p[10],
        status: p[11],
        sector_count,
        lba,
    }
}

fn decode_key_specific(key: SenseKey, sks: &[u8]) -> Option<SenseKeySpecific> {
    if sks[0] & 0x80 == 0 {
        return None;
    }
    let value = get_u24(sks, 0) & 0x7F_FFFF;
    let bit_pointer = if value & 0x08_0000 != 0 {
        Some(((value & 0x07_0000) >> 16) as u8)
    } else {
        None
    };
    let field = (value & 0xFFFF) as u16;

    match key {
        SenseKey::IllegalRequest => Some(SenseKeySpecific::IllegalRequest {
            command_error: value & 0x40_0000 != 0,
            bit_pointer,
            field_pointer: field,
        }),
        SenseKey::HardwareError | SenseKey::MediumError | SenseKey::RecoveredError => {
            Some(SenseKeySpecific::RetryCount {
                actual_retry_count: field,
            })
        }
        SenseKey::NotReady | SenseKey::NoSense => Some(SenseKeySpecific::Progress {
            fraction: field as f64 / 65536.0,
        }),
        SenseKey::CopyAborted => Some(SenseKeySpecific::CopyAborted {
            segment_descriptor: value & 0x20_0000 != 0,
            bit_pointer,
            field_pointer: field,
        }),
        SenseKey::UnitAttention => Some(SenseKeySpecific::UnitAttention {
            overflow: value & 0x01_0000 != 0,
        }),
        // Valid bit set on a key with no defined meaning: ignore it.
        _ => None,
    }
}
