/// Tests for sense data decoding
///
/// Covers fixed and descriptor formats, the sense-key-specific field,
/// descriptor iteration limits and severity classification.
use super::sense::*;
use crate::error::classification::ErrorSeverity;
use crate::ParseError;
use test_case::test_case;

fn fixed_sense(key: u8, asc: u8, ascq: u8) -> Vec<u8> {
    let mut s = vec![0u8; 18];
    s[0] = 0x70;
    s[2] = key;
    s[7] = 10;
    s[12] = asc;
    s[13] = ascq;
    s
}

fn descriptor_sense(key: u8, asc: u8, ascq: u8, descriptors: &[&[u8]]) -> Vec<u8> {
    let mut s = vec![0x72, key, asc, ascq, 0, 0, 0, 0];
    for d in descriptors {
        s.extend_from_slice(d);
    }
    s[7] = (s.len() - 8) as u8;
    s
}

fn ata_return_descriptor(extend: bool, count: u16, lba: u64, device: u8, status: u8) -> Vec<u8> {
    let mut d = vec![0u8; 14];
    d[0] = 0x09;
    d[1] = 0x0C;
    d[2] = extend as u8;
    d[3] = 0x04;
    d[4] = (count >> 8) as u8;
    d[5] = count as u8;
    d[6] = (lba >> 24) as u8;
    d[7] = lba as u8;
    d[8] = (lba >> 32) as u8;
    d[9] = (lba >> 8) as u8;
    d[10] = (lba >> 40) as u8;
    d[11] = (lba >> 16) as u8;
    d[12] = device;
    d[13] = status;
    d
}

// ============================================================================
// Fixed Format
// ============================================================================

#[test]
fn test_fixed_medium_error() {
    let sense = fixed_sense(0x03, 0x11, 0x00);
    let info = parse_sense(&sense).expect("fixed sense should parse");

    assert!(info.is_fixed());
    assert!(info.is_current);
    assert_eq!(info.sense_key, SenseKey::MediumError);
    assert_eq!((info.asc, info.ascq), (0x11, 0x00));
    assert_eq!(info.severity(), ErrorSeverity::Uncorrected);
    assert_eq!(info.command_specific, Some(0), "command-specific is always present");
    assert_eq!(info.information, None, "information is gated by the valid bit");
}

#[test]
fn test_fixed_deferred_and_information() {
    let mut sense = fixed_sense(0x03, 0x11, 0x04);
    sense[0] = 0x71 | 0x80;
    sense[3..7].copy_from_slice(&0x0012_3456u32.to_be_bytes());
    sense[2] |= 0x20;

    let info = parse_sense(&sense).unwrap();
    assert!(!info.is_current, "0x71 is a deferred error");
    assert_eq!(info.information, Some(0x0012_3456));
    assert!(info.incorrect_length);
}

#[test]
fn test_fixed_vendor_unique_needs_full_field() {
    let mut sense = fixed_sense(0x04, 0x44, 0x00);
    sense.extend_from_slice(&[0, 0, 0xBE, 0xEF]);
    let info = parse_sense(&sense).unwrap();
    assert_eq!(info.vendor_unique_error, Some(0xBEEF));

    let short = fixed_sense(0x04, 0x44, 0x00);
    assert_eq!(parse_sense(&short).unwrap().vendor_unique_error, None);
}

#[test]
fn test_fixed_too_short_is_error() {
    let sense = fixed_sense(0x03, 0x11, 0x00);
    let err = parse_sense(&sense[..17]).unwrap_err();
    assert_eq!(
        err,
        ParseError::TooShort {
            needed: 18,
            actual: 17
        }
    );
}

#[test]
fn test_unknown_response_code() {
    let mut sense = fixed_sense(0x03, 0x11, 0x00);
    sense[0] = 0x7F;
    assert_eq!(parse_sense(&sense), Err(ParseError::UnknownResponseCode(0x7F)));
    assert!(parse_sense(&[]).is_err(), "empty sense must not parse");
}

// ============================================================================
// Sense-Key-Specific Field
// ============================================================================

#[test]
fn test_key_specific_illegal_request() {
    let mut sense = fixed_sense(0x05, 0x24, 0x00);
    // SKSV, C/D, BPV, bit pointer 3, field pointer 0x0002
    sense[15] = 0x80 | 0x40 | 0x08 | 0x03;
    sense[16] = 0x00;
    sense[17] = 0x02;

    let info = parse_sense(&sense).unwrap();
    assert_eq!(
        info.key_specific,
        Some(SenseKeySpecific::IllegalRequest {
            command_error: true,
            bit_pointer: Some(3),
            field_pointer: 2,
        })
    );
}

#[test]
fn test_key_specific_progress_fraction() {
    let mut sense = fixed_sense(0x02, 0x04, 0x04);
    sense[15] = 0x80;
    sense[16] = 0x80;
    sense[17] = 0x00;

    match parse_sense(&sense).unwrap().key_specific {
        Some(SenseKeySpecific::Progress { fraction }) => {
            assert!((fraction - 0.5).abs() < f64::EPSILON, "0x8000 is half way");
        }
        other => panic!("expected progress, got {:?}", other),
    }
}

#[test]
fn test_key_specific_retry_count_and_overflow() {
    let mut medium = fixed_sense(0x03, 0x11, 0x00);
    medium[15] = 0x80;
    medium[16] = 0x00;
    medium[17] = 0x07;
    assert_eq!(
        parse_sense(&medium).unwrap().key_specific,
        Some(SenseKeySpecific::RetryCount {
            actual_retry_count: 7
        })
    );

    let mut ua = fixed_sense(0x06, 0x29, 0x00);
    ua[15] = 0x81;
    assert_eq!(
        parse_sense(&ua).unwrap().key_specific,
        Some(SenseKeySpecific::UnitAttention { overflow: true })
    );
}

#[test]
fn test_key_specific_ignored_for_other_keys() {
    let mut sense = fixed_sense(0x07, 0x27, 0x00);
    sense[15] = 0xFF;
    assert_eq!(parse_sense(&sense).unwrap().key_specific, None);

    let mut invalid = fixed_sense(0x05, 0x24, 0x00);
    invalid[16] = 0x12;
    assert_eq!(
        parse_sense(&invalid).unwrap().key_specific,
        None,
        "no SKSV bit means no sense-key-specific data"
    );
}

// ============================================================================
// Descriptor Format
// ============================================================================

#[test]
fn test_descriptor_ata_status_48bit_lba() {
    let lba = 0x0000_A1B2_C3D4_E5F6u64;
    let desc = ata_return_descriptor(true, 0x0102, lba, 0x40, 0x51);
    let sense = descriptor_sense(0x01, 0x00, 0x1D, &[&desc]);

    let info = parse_sense(&sense).unwrap();
    assert!(!info.is_fixed());
    assert!(info.is_current);
    let ata = info.ata_status.expect("ATA status descriptor present");
    assert!(ata.extend);
    assert_eq!(ata.lba, lba, "48-bit LBA must round-trip");
    assert_eq!(ata.sector_count, 0x0102);
    assert_eq!(ata.error, 0x04);
    assert_eq!(ata.device, 0x40);
    assert_eq!(ata.status, 0x51);
    assert_eq!(info.severity(), ErrorSeverity::Corrected);
}

#[test]
fn test_descriptor_ata_status_28bit() {
    let desc = ata_return_descriptor(false, 0x0001, 0x00C2_4F00, 0xA0, 0x50);
    let sense = descriptor_sense(0x00, 0x00, 0x1D, &[&desc]);
    let ata = parse_sense(&sense).unwrap().ata_status.unwrap();
    assert!(!ata.extend);
    assert_eq!(ata.lba, 0x00C2_4F00);
    assert_eq!(ata.sector_count, 1);
}

#[test]
fn test_descriptor_fields() {
    let info_desc = [0x00, 0x0A, 0x80, 0, 0, 0, 0, 0, 0x12, 0x34, 0x56, 0x78];
    let cmd_desc = [0x01, 0x0A, 0, 0, 0, 0, 0, 0, 0, 0, 0xAB, 0xCD];
    let sks_desc = [0x02, 0x06, 0, 0, 0x80, 0x00, 0x03, 0];
    let fru_desc = [0x03, 0x02, 0, 0x2A];
    let ili_desc = [0x05, 0x02, 0, 0x20];
    let vendor_desc = [0x80, 0x02, 0xCA, 0xFE];
    let sense = descriptor_sense(
        0x03,
        0x11,
        0x00,
        &[&info_desc, &cmd_desc, &sks_desc, &fru_desc, &ili_desc, &vendor_desc],
    );

    let info = parse_sense(&sense).unwrap();
    assert_eq!(info.information, Some(0x1234_5678));
    assert_eq!(info.command_specific, Some(0xABCD));
    assert_eq!(
        info.key_specific,
        Some(SenseKeySpecific::RetryCount {
            actual_retry_count: 3
        })
    );
    assert_eq!(info.fru_code, Some(0x2A));
    assert!(info.incorrect_length);
    assert_eq!(info.vendor_unique_error, Some(0xCAFE));
}

#[test]
fn test_descriptor_unknown_type_skipped() {
    let unknown = [0x0E, 0x03, 1, 2, 3];
    let fru_desc = [0x03, 0x02, 0, 0x07];
    let sense = descriptor_sense(0x04, 0x00, 0x00, &[&unknown, &fru_desc]);
    let info = parse_sense(&sense).unwrap();
    assert_eq!(info.fru_code, Some(0x07), "decoding continues past unknown descriptors");
}

#[test]
fn test_descriptor_list_clamped_to_buffer() {
    let fru_desc = [0x03, 0x02, 0, 0x07];
    let mut sense = descriptor_sense(0x04, 0x00, 0x00, &[&fru_desc]);
    // Claims far more data than present
    sense[7] = 0xF0;
    let kinds: Vec<u8> = descriptors(&sense).map(|d| d.kind).collect();
    assert_eq!(kinds, vec![0x03]);

    // Declared length cuts the second descriptor off
    let second = [0x05, 0x02, 0, 0x20];
    let mut sense = descriptor_sense(0x04, 0x00, 0x00, &[&fru_desc, &second]);
    sense[7] = 4;
    let info = parse_sense(&sense).unwrap();
    assert!(!info.incorrect_length);
    assert_eq!(info.fru_code, Some(0x07));
}

#[test]
fn test_descriptor_truncated_entry_stops_iteration() {
    let sense = vec![0x72, 0x03, 0x11, 0x00, 0, 0, 0, 6, 0x09, 0x0C, 0, 0, 0, 0];
    assert_eq!(descriptors(&sense).count(), 0);
    let info = parse_sense(&sense).unwrap();
    assert_eq!(info.ata_status, None);
}

#[test]
fn test_descriptor_too_short() {
    assert!(matches!(
        parse_sense(&[0x72, 0x03, 0x11]),
        Err(ParseError::TooShort { needed: 8, actual: 3 })
    ));
}

// ============================================================================
// Severity Classification
// ============================================================================

#[test_case(0x0, ErrorSeverity::None ; "no sense")]
#[test_case(0x1, ErrorSeverity::Corrected ; "recovered error")]
#[test_case(0x2, ErrorSeverity::NeedRetry ; "not ready")]
#[test_case(0x3, ErrorSeverity::Uncorrected ; "medium error")]
#[test_case(0x4, ErrorSeverity::Fatal ; "hardware error")]
#[test_case(0x5, ErrorSeverity::Fatal ; "illegal request")]
#[test_case(0x6, ErrorSeverity::NeedRetry ; "unit attention")]
#[test_case(0x7, ErrorSeverity::Fatal ; "data protect")]
#[test_case(0x8, ErrorSeverity::Fatal ; "blank check")]
#[test_case(0x9, ErrorSeverity::Fatal ; "vendor specific")]
#[test_case(0xA, ErrorSeverity::Fatal ; "copy aborted")]
#[test_case(0xB, ErrorSeverity::NeedRetry ; "aborted command")]
#[test_case(0xC, ErrorSeverity::Fatal ; "reserved")]
#[test_case(0xD, ErrorSeverity::Fatal ; "volume overflow")]
#[test_case(0xE, ErrorSeverity::Fatal ; "miscompare")]
#[test_case(0xF, ErrorSeverity::Fatal ; "completed")]
fn test_severity_by_sense_key(key: u8, expected: ErrorSeverity) {
    let info = parse_sense(&fixed_sense(key, 0, 0)).unwrap();
    assert_eq!(info.severity(), expected);
}

#[test]
fn test_display() {
    let info = parse_sense(&fixed_sense(0x03, 0x11, 0x00)).unwrap();
    assert_eq!(info.to_string(), "Medium Error asc=11 ascq=00");
}
