/// SMART READ DATA and READ THRESHOLDS page parsing
///
/// Both pages are 512 bytes with 30 attribute slots of 12 bytes starting at
/// offset 2 and a checksum in the last byte. A page whose checksum does not
/// match is rejected outright.
use crate::ParseError;
use serde::Serialize;

pub const SMART_PAGE_LEN: usize = 512;
const ATTR_OFFSET: usize = 2;
const ATTR_SIZE: usize = 12;
const ATTR_SLOTS: usize = 30;

/// One attribute as reported by the device, thresholds merged in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SmartAttributeRecord {
    pub id: u8,
    pub status_flags: u16,
    pub value: u8,
    pub worst: u8,
    pub threshold: Option<u8>,
    /// 48-bit raw counter.
    pub raw: u64,
}

impl SmartAttributeRecord {
    /// Pre-failure attribute (flag bit 0).
    pub fn is_prefailure(&self) -> bool {
        self.status_flags & 0x0001 != 0
    }

    /// Normalized value at or below a non-zero threshold.
    pub fn is_failing(&self) -> bool {
        matches!(self.threshold, Some(t) if t != 0 && self.value <= t)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SmartData {
    pub version: u16,
    pub attributes: Vec<SmartAttributeRecord>,
}

impl SmartData {
    pub fn attribute(&self, id: u8) -> Option<&SmartAttributeRecord> {
        self.attributes.iter().find(|a| a.id == id)
    }

    /// Copy thresholds from a READ THRESHOLDS page onto matching ids.
    pub fn merge_thresholds(&mut self, thresholds: &[(u8, u8)]) {
        for attr in &mut self.attributes {
            attr.threshold = thresholds
                .iter()
                .find(|(id, _)| *id == attr.id)
                .map(|(_, t)| *t);
        }
    }
}

/// Two's complement checksum over the first 511 bytes, stored in byte 511.
pub fn verify_checksum(page: &[u8]) -> Result<(), ParseError> {
    if page.len() < SMART_PAGE_LEN {
        return Err(ParseError::TooShort {
            needed: SMART_PAGE_LEN,
            actual: page.len(),
        });
    }
    let sum = page[..SMART_PAGE_LEN - 1]
        .iter()
        .fold(0u8, |acc, &b| acc.wrapping_add(b));
    let expected = 0u8.wrapping_sub(sum);
    let actual = page[SMART_PAGE_LEN - 1];
    if expected != actual {
        return Err(ParseError::ChecksumMismatch { expected, actual });
    }
    Ok(())
}

fn slots(page: &[u8]) -> impl Iterator<Item = &[u8]> {
    page[ATTR_OFFSET..ATTR_OFFSET + ATTR_SLOTS * ATTR_SIZE]
        .chunks_exact(ATTR_SIZE)
        .filter(|slot| slot[0] != 0)
}

pub fn parse_smart_data(page: &[u8]) -> Result<SmartData, ParseError> {
    verify_checksum(page)?;
    let attributes = slots(page)
        .map(|s| SmartAttributeRecord {
            id: s[0],
            status_flags: u16::from_le_bytes([s[1], s[2]]),
            value: s[3],
            worst: s[4],
            threshold: None,
            raw: s[5..11]
                .iter()
                .rev()
                .fold(0u64, |acc, &b| acc << 8 | b as u64),
        })
        .collect();
    Ok(SmartData {
        version: u16::from_le_bytes([page[0], page[1]]),
        attributes,
    })
}

/// `(id, threshold)` pairs from a READ THRESHOLDS page.
pub fn parse_smart_thresholds(page: &[u8]) -> Result<Vec<(u8, u8)>, ParseError> {
    verify_checksum(page)?;
    Ok(slots(page).map(|s| (s[0], s[1])).collect())
}
