// Capacity and identity response parsers
//
// Each parser checks the buffer length before touching any field and
// returns a ParseError instead of partial data.

use super::codec::{ascii_field, get_u16, get_u32, get_u64};
use crate::ParseError;
use serde::Serialize;

/// Reserved value in READ CAPACITY(10) meaning "use the 16-byte form".
pub const CAPACITY_10_OVERFLOW: u32 = 0xFFFF_FFFF;

pub const READ_CAPACITY_10_LEN: usize = 8;
pub const READ_CAPACITY_16_LEN: usize = 32;
pub const INQUIRY_MIN_LEN: usize = 32;
pub const INQUIRY_ALLOC_LEN: u16 = 96;

fn require(buf: &[u8], needed: usize) -> Result<(), ParseError> {
    if buf.len() < needed {
        return Err(ParseError::TooShort {
            needed,
            actual: buf.len(),
        });
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Capacity10 {
    pub max_lba: u32,
    pub block_size: u32,
}

impl Capacity10 {
    /// The device is too large for the 10-byte form.
    pub fn needs_16(&self) -> bool {
        self.max_lba == CAPACITY_10_OVERFLOW
    }
}

pub fn parse_capacity_10(buf: &[u8]) -> Result<Capacity10, ParseError> {
    require(buf, 8)?;
    Ok(Capacity10 {
        max_lba: get_u32(buf, 0),
        block_size: get_u32(buf, 4),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Capacity16 {
    pub max_lba: u64,
    pub block_size: u32,
    pub protection_enabled: bool,
    pub protection_type: u8,
    pub protection_interval_exponent: u8,
    pub logical_per_physical_exponent: u8,
    pub thin_provisioning_enabled: bool,
    pub thin_provisioning_zero: bool,
    pub lowest_aligned_lba: u16,
}

impl Capacity16 {
    pub fn physical_block_size(&self) -> u64 {
        (self.block_size as u64) << self.logical_per_physical_exponent
    }
}

pub fn parse_capacity_16(buf: &[u8]) -> Result<Capacity16, ParseError> {
    require(buf, 16)?;
    Ok(Capacity16 {
        max_lba: get_u64(buf, 0),
        block_size: get_u32(buf, 8),
        protection_enabled: buf[12] & 0x01 != 0,
        protection_type: (buf[12] & 0x0E) >> 1,
        protection_interval_exponent: (buf[13] & 0xF0) >> 4,
        logical_per_physical_exponent: buf[13] & 0x0F,
        thin_provisioning_enabled: buf[14] & 0x80 != 0,
        thin_provisioning_zero: buf[14] & 0x40 != 0,
        lowest_aligned_lba: get_u16(buf, 14) & 0x3FFF,
    })
}

/// Standard INQUIRY data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InquiryData {
    pub device_type: u8,
    pub vendor: String,
    pub model: String,
    pub revision: String,
    pub serial: String,
}

impl InquiryData {
    pub fn device_type_name(&self) -> &'static str {
        device_type_name(self.device_type)
    }

    pub fn is_ata(&self) -> bool {
        self.vendor.starts_with("ATA")
    }
}

pub fn parse_inquiry(buf: &[u8]) -> Result<InquiryData, ParseError> {
    require(buf, INQUIRY_MIN_LEN)?;

    let response_format = buf[3] & 0x0F;
    let valid_len = (buf[4] as usize + 5).min(buf.len());
    let field = |start: usize, end: usize| {
        if valid_len >= end {
            ascii_field(buf, start, end)
        } else {
            String::new()
        }
    };

    Ok(InquiryData {
        device_type: buf[0] & 0x1F,
        vendor: field(8, 16),
        model: field(16, 32),
        revision: field(32, 36),
        serial: if response_format == 2 {
            field(36, 44)
        } else {
            String::new()
        },
    })
}

/// Unit serial number from VPD page 0x80.
pub fn parse_unit_serial_vpd(buf: &[u8]) -> Result<String, ParseError> {
    require(buf, 4)?;
    if buf[1] != 0x80 {
        return Err(ParseError::InvalidHeader("not the unit serial number page"));
    }
    let end = (4 + get_u16(buf, 2) as usize).min(buf.len());
    Ok(ascii_field(buf, 4, end).trim_start().to_string())
}

pub fn device_type_name(device_type: u8) -> &'static str {
    match device_type & 0x1F {
        0x00 => "Direct access block device",
        0x01 => "Sequential-access device",
        0x02 => "Printer device",
        0x03 => "Processor device",
        0x04 => "Write-once device",
        0x05 => "CD/DVD device",
        0x06 => "Scanner device",
        0x07 => "Optical memory device",
        0x08 => "Medium changer device",
        0x09 => "Communications device",
        0x0C => "Storage array controller device",
        0x0D => "Enclosure services device",
        0x0E => "Simplified direct-access device",
        0x0F => "Optical card reader/writer device",
        0x10 => "Bridge controller commands",
        0x11 => "Object-based storage device",
        0x12 => "Automation/Drive interface",
        0x13 => "Security manager device",
        0x14 => "Host managed zoned block device",
        0x1E => "Well known logical unit",
        0x1F => "Unknown or no device type",
        _ => "Reserved",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_10() {
        let buf = [0x00, 0x00, 0x00, 0x64, 0x00, 0x00, 0x02, 0x00];
        let cap = parse_capacity_10(&buf).unwrap();
        assert_eq!(cap.max_lba, 100);
        assert_eq!(cap.block_size, 512);
        assert!(!cap.needs_16());
    }

    #[test]
    fn test_capacity_10_overflow_sentinel() {
        let buf = [0xFF, 0xFF, 0xFF, 0xFF, 0x00, 0x00, 0x10, 0x00];
        assert!(parse_capacity_10(&buf).unwrap().needs_16());
    }

    #[test]
    fn test_capacity_10_short() {
        assert_eq!(
            parse_capacity_10(&[0; 7]),
            Err(ParseError::TooShort {
                needed: 8,
                actual: 7
            })
        );
    }

    #[test]
    fn test_capacity_16_fields() {
        let mut buf = [0u8; 32];
        buf[..8].copy_from_slice(&0x0000_0001_D1C0_BEAFu64.to_be_bytes());
        buf[8..12].copy_from_slice(&512u32.to_be_bytes());
        buf[12] = 0x05; // P_TYPE 2, PROT_EN
        buf[13] = 0x33; // P_I_EXPONENT 3, LBPPBE 3
        buf[14] = 0xC0 | 0x01;
        buf[15] = 0x02;

        let cap = parse_capacity_16(&buf).unwrap();
        assert_eq!(cap.max_lba, 0x0000_0001_D1C0_BEAF);
        assert_eq!(cap.block_size, 512);
        assert!(cap.protection_enabled);
        assert_eq!(cap.protection_type, 2);
        assert_eq!(cap.protection_interval_exponent, 3);
        assert_eq!(cap.logical_per_physical_exponent, 3);
        assert_eq!(cap.physical_block_size(), 4096);
        assert!(cap.thin_provisioning_enabled);
        assert!(cap.thin_provisioning_zero);
        assert_eq!(cap.lowest_aligned_lba, 0x0102);
        assert!(parse_capacity_16(&buf[..15]).is_err());
    }

    fn inquiry_buf(format: u8, additional_len: u8) -> Vec<u8> {
        let mut buf = vec![0u8; 96];
        buf[0] = 0x00;
        buf[3] = format;
        buf[4] = additional_len;
        buf[8..16].copy_from_slice(b"ATA     ");
        buf[16..32].copy_from_slice(b"ST2000DM001-1CH1");
        buf[32..36].copy_from_slice(b"CC43");
        buf[36..44].copy_from_slice(b"Z1E0ABCD");
        buf
    }

    #[test]
    fn test_inquiry_fields() {
        let inq = parse_inquiry(&inquiry_buf(0x02, 91)).unwrap();
        assert_eq!(inq.vendor, "ATA");
        assert_eq!(inq.model, "ST2000DM001-1CH1");
        assert_eq!(inq.revision, "CC43");
        assert_eq!(inq.serial, "Z1E0ABCD");
        assert!(inq.is_ata());
        assert_eq!(inq.device_type_name(), "Direct access block device");
    }

    #[test]
    fn test_inquiry_serial_needs_format_2() {
        let inq = parse_inquiry(&inquiry_buf(0x01, 91)).unwrap();
        assert_eq!(inq.serial, "", "serial is only defined for response format 2");
    }

    #[test]
    fn test_inquiry_fields_limited_by_additional_length() {
        // Additional length covers vendor and model only
        let inq = parse_inquiry(&inquiry_buf(0x02, 27)).unwrap();
        assert_eq!(inq.model, "ST2000DM001-1CH1");
        assert_eq!(inq.revision, "");
        assert_eq!(inq.serial, "");
    }

    #[test]
    fn test_inquiry_too_short() {
        assert!(matches!(
            parse_inquiry(&[0u8; 31]),
            Err(ParseError::TooShort { needed: 32, .. })
        ));
    }

    #[test]
    fn test_unit_serial_vpd() {
        let mut buf = vec![0x00, 0x80, 0x00, 0x0A];
        buf.extend_from_slice(b"  WD-WX1234");
        assert_eq!(parse_unit_serial_vpd(&buf).unwrap(), "WD-WX123");
        buf[1] = 0x83;
        assert!(parse_unit_serial_vpd(&buf).is_err());
    }
}
