// Log, mode, diagnostic and defect list page parsers
//
// Variable-length lists are exposed as iterators that yield validated
// entries and stop at the declared length or the buffer end, whichever is
// smaller.

use super::cdb::DefectFormat;
use super::codec::{get_u16, get_u24, get_u32, get_u64};
use crate::ParseError;
use serde::Serialize;

pub const LOG_PAGE_SUPPORTED: u8 = 0x00;
pub const LOG_PAGE_INFORMATIONAL_EXCEPTIONS: u8 = 0x2F;

fn require(buf: &[u8], needed: usize) -> Result<(), ParseError> {
    if buf.len() < needed {
        return Err(ParseError::TooShort {
            needed,
            actual: buf.len(),
        });
    }
    Ok(())
}

// ============================================================================
// LOG SENSE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LogPageHeader {
    pub page_code: u8,
    pub subpage_format: bool,
    pub saved: bool,
    pub subpage_code: u8,
    pub page_length: u16,
}

/// A log page whose header checked out against the buffer it came in.
#[derive(Debug, Clone, Copy)]
pub struct LogPage<'a> {
    pub header: LogPageHeader,
    body: &'a [u8],
}

pub fn parse_log_page(buf: &[u8]) -> Result<LogPage<'_>, ParseError> {
    require(buf, 4)?;
    let header = LogPageHeader {
        page_code: buf[0] & 0x3F,
        subpage_format: buf[0] & 0x40 != 0,
        saved: buf[0] & 0x80 != 0,
        subpage_code: buf[1],
        page_length: get_u16(buf, 2),
    };
    if !header.subpage_format && header.subpage_code != 0 {
        return Err(ParseError::InvalidHeader("subpage code set without SPF"));
    }
    let end = (4 + header.page_length as usize).min(buf.len());
    Ok(LogPage {
        header,
        body: &buf[4..end],
    })
}

/// Parameter control flags of a log parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LogParamFlags {
    pub disable_update: bool,
    pub target_save_disable: bool,
    pub enable_threshold_comparison: bool,
    pub threshold_met_criteria: u8,
    pub format_and_linking: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogParam<'a> {
    pub code: u16,
    pub flags: LogParamFlags,
    pub data: &'a [u8],
}

impl LogParam<'_> {
    /// Big-endian counter value for binary parameters up to 8 bytes.
    pub fn value(&self) -> Option<u64> {
        if self.data.is_empty() || self.data.len() > 8 {
            return None;
        }
        Some(self.data.iter().fold(0u64, |acc, &b| acc << 8 | b as u64))
    }
}

pub struct LogParams<'a> {
    body: &'a [u8],
    pos: usize,
}

impl<'a> LogPage<'a> {
    pub fn params(&self) -> LogParams<'a> {
        LogParams {
            body: self.body,
            pos: 0,
        }
    }

    /// Entries of the supported-pages page (page 0x00).
    pub fn supported_pages(&self) -> Vec<u8> {
        if self.header.page_code != LOG_PAGE_SUPPORTED {
            return Vec::new();
        }
        self.body.iter().map(|b| b & 0x3F).collect()
    }

    /// Parameter 0 of the informational exceptions page.
    pub fn informational_exceptions(&self) -> Option<InformationalExceptions> {
        if self.header.page_code != LOG_PAGE_INFORMATIONAL_EXCEPTIONS {
            return None;
        }
        let param = self.params().find(|p| p.code == 0)?;
        if param.data.len() < 3 {
            return None;
        }
        Some(InformationalExceptions {
            asc: param.data[0],
            ascq: param.data[1],
            temperature: param.data[2],
        })
    }
}

impl<'a> Iterator for LogParams<'a> {
    type Item = LogParam<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let header_end = self.pos + 4;
        if header_end > self.body.len() {
            return None;
        }
        let h = &self.body[self.pos..header_end];
        let len = h[3] as usize;
        if header_end + len > self.body.len() {
            self.pos = self.body.len();
            return None;
        }
        let flags = h[2];
        let param = LogParam {
            code: get_u16(h, 0),
            flags: LogParamFlags {
                disable_update: flags & 0x80 != 0,
                target_save_disable: flags & 0x20 != 0,
                enable_threshold_comparison: flags & 0x10 != 0,
                threshold_met_criteria: (flags & 0x0C) >> 2,
                format_and_linking: flags & 0x03,
            },
            data: &self.body[header_end..header_end + len],
        };
        self.pos = header_end + len;
        Some(param)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InformationalExceptions {
    pub asc: u8,
    pub ascq: u8,
    /// Degrees Celsius; 0xFF when not reported.
    pub temperature: u8,
}

// ============================================================================
// MODE SENSE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModeHeader {
    pub data_length: u16,
    pub medium_type: u8,
    pub device_specific: u8,
    pub long_lba: bool,
    pub block_descriptor_length: u16,
    header_len: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BlockDescriptor {
    pub density_code: u8,
    pub num_blocks: u64,
    pub block_length: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModePage<'a> {
    pub page_code: u8,
    pub subpage_code: u8,
    pub parameters_saveable: bool,
    pub data: &'a [u8],
}

/// A MODE SENSE(6) or MODE SENSE(10) response.
#[derive(Debug, Clone, Copy)]
pub struct ModeSense<'a> {
    pub header: ModeHeader,
    buf: &'a [u8],
}

pub fn parse_mode_sense_6(buf: &[u8]) -> Result<ModeSense<'_>, ParseError> {
    require(buf, 4)?;
    let header = ModeHeader {
        data_length: buf[0] as u16 + 1,
        medium_type: buf[1],
        device_specific: buf[2],
        long_lba: false,
        block_descriptor_length: buf[3] as u16,
        header_len: 4,
    };
    finish_mode_sense(buf, header)
}

pub fn parse_mode_sense_10(buf: &[u8]) -> Result<ModeSense<'_>, ParseError> {
    require(buf, 8)?;
    let header = ModeHeader {
        data_length: get_u16(buf, 0).saturating_add(2),
        medium_type: buf[2],
        device_specific: buf[3],
        long_lba: buf[4] & 0x01 != 0,
        block_descriptor_length: get_u16(buf, 6),
        header_len: 8,
    };
    finish_mode_sense(buf, header)
}

fn finish_mode_sense(buf: &[u8], header: ModeHeader) -> Result<ModeSense<'_>, ParseError> {
    let bd_len = header.block_descriptor_length as usize;
    if bd_len != 0 && bd_len % 8 != 0 {
        return Err(ParseError::InvalidHeader("block descriptor length not a multiple of 8"));
    }
    let end = (header.data_length as usize).min(buf.len());
    if header.header_len + bd_len > end {
        return Err(ParseError::TooShort {
            needed: header.header_len + bd_len,
            actual: end,
        });
    }
    Ok(ModeSense {
        header,
        buf: &buf[..end],
    })
}

impl<'a> ModeSense<'a> {
    pub fn block_descriptors(&self) -> Vec<BlockDescriptor> {
        let start = self.header.header_len;
        let end = start + self.header.block_descriptor_length as usize;
        let step = if self.header.long_lba { 16 } else { 8 };
        self.buf[start..end]
            .chunks_exact(step)
            .map(|d| {
                if self.header.long_lba {
                    BlockDescriptor {
                        density_code: 0,
                        num_blocks: get_u64(d, 0),
                        block_length: get_u32(d, 12),
                    }
                } else {
                    BlockDescriptor {
                        density_code: d[0],
                        num_blocks: get_u24(d, 1) as u64,
                        block_length: get_u24(d, 5),
                    }
                }
            })
            .collect()
    }

    pub fn pages(&self) -> ModePages<'a> {
        ModePages {
            buf: self.buf,
            pos: self.header.header_len + self.header.block_descriptor_length as usize,
        }
    }
}

pub struct ModePages<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Iterator for ModePages<'a> {
    type Item = ModePage<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos + 2 > self.buf.len() {
            return None;
        }
        let b0 = self.buf[self.pos];
        let subpage_format = b0 & 0x40 != 0;
        let (subpage_code, header_len, len) = if subpage_format {
            if self.pos + 4 > self.buf.len() {
                return None;
            }
            (self.buf[self.pos + 1], 4, get_u16(self.buf, self.pos + 2) as usize)
        } else {
            (0, 2, self.buf[self.pos + 1] as usize)
        };
        let data_start = self.pos + header_len;
        if data_start + len > self.buf.len() {
            self.pos = self.buf.len();
            return None;
        }
        let page = ModePage {
            page_code: b0 & 0x3F,
            subpage_code,
            parameters_saveable: b0 & 0x80 != 0,
            data: &self.buf[data_start..data_start + len],
        };
        self.pos = data_start + len;
        Some(page)
    }
}

// ============================================================================
// RECEIVE DIAGNOSTIC RESULTS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DiagnosticPageHeader {
    pub page_code: u8,
    pub page_specific: u8,
    pub page_length: u16,
}

pub fn parse_diagnostic_page(buf: &[u8]) -> Result<(DiagnosticPageHeader, &[u8]), ParseError> {
    require(buf, 4)?;
    let header = DiagnosticPageHeader {
        page_code: buf[0],
        page_specific: buf[1],
        page_length: get_u16(buf, 2),
    };
    let end = (4 + header.page_length as usize).min(buf.len());
    Ok((header, &buf[4..end]))
}

// ============================================================================
// READ DEFECT DATA
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DefectListHeader {
    pub primary_list: bool,
    pub grown_list: bool,
    pub format: u8,
    pub list_length: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DefectAddress {
    ShortBlock(u32),
    LongBlock(u64),
    BytesFromIndex { cylinder: u32, head: u8, bytes_from_index: u32 },
    PhysicalSector { cylinder: u32, head: u8, sector: u32 },
    Vendor(u32),
}

fn descriptor_size(format: u8) -> Option<usize> {
    match DefectFormat::from_bits(format)? {
        DefectFormat::ShortBlock | DefectFormat::Vendor => Some(4),
        _ => Some(8),
    }
}

/// A defect list with a header that matched its descriptor size.
#[derive(Debug, Clone, Copy)]
pub struct DefectList<'a> {
    pub header: DefectListHeader,
    body: &'a [u8],
}

pub fn parse_defect_data_10(buf: &[u8]) -> Result<DefectList<'_>, ParseError> {
    require(buf, 4)?;
    let header = DefectListHeader {
        primary_list: buf[1] & 0x10 != 0,
        grown_list: buf[1] & 0x08 != 0,
        format: buf[1] & 0x07,
        list_length: get_u16(buf, 2) as u32,
    };
    finish_defect_list(buf, 4, header)
}

pub fn parse_defect_data_12(buf: &[u8]) -> Result<DefectList<'_>, ParseError> {
    require(buf, 8)?;
    let header = DefectListHeader {
        primary_list: buf[1] & 0x10 != 0,
        grown_list: buf[1] & 0x08 != 0,
        format: buf[1] & 0x07,
        list_length: get_u32(buf, 4),
    };
    finish_defect_list(buf, 8, header)
}

fn finish_defect_list(
    buf: &[u8],
    header_len: usize,
    header: DefectListHeader,
) -> Result<DefectList<'_>, ParseError> {
    let size = descriptor_size(header.format)
        .ok_or(ParseError::InvalidHeader("reserved defect list format"))?;
    if header.list_length as usize % size != 0 {
        return Err(ParseError::InvalidHeader("defect list length is not whole descriptors"));
    }
    let end = (header_len + header.list_length as usize).min(buf.len());
    Ok(DefectList {
        header,
        body: &buf[header_len..end],
    })
}

impl DefectList<'_> {
    /// Number of descriptors the device says it has, which may exceed what
    /// fit in the allocation length.
    pub fn declared_count(&self) -> usize {
        descriptor_size(self.header.format)
            .map(|size| self.header.list_length as usize / size)
            .unwrap_or(0)
    }

    pub fn addresses(&self) -> impl Iterator<Item = DefectAddress> + '_ {
        let format = self.header.format;
        let size = descriptor_size(format).unwrap_or(8);
        self.body
            .chunks_exact(size)
            .filter_map(move |d| match DefectFormat::from_bits(format)? {
                DefectFormat::ShortBlock => Some(DefectAddress::ShortBlock(get_u32(d, 0))),
                DefectFormat::Vendor => Some(DefectAddress::Vendor(get_u32(d, 0))),
                DefectFormat::LongBlock => Some(DefectAddress::LongBlock(get_u64(d, 0))),
                DefectFormat::BytesFromIndex | DefectFormat::BytesFromIndexExtended => {
                    Some(DefectAddress::BytesFromIndex {
                        cylinder: get_u24(d, 0),
                        head: d[3],
                        bytes_from_index: get_u32(d, 4),
                    })
                }
                DefectFormat::PhysicalSector | DefectFormat::PhysicalSectorExtended => {
                    Some(DefectAddress::PhysicalSector {
                        cylinder: get_u24(d, 0),
                        head: d[3],
                        sector: get_u32(d, 4),
                    })
                }
            })
    }
}
