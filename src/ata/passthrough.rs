/// ATA PASS-THROUGH command blocks
///
/// Wraps an ATA register set into the 12-byte (0xA1) or 16-byte (0x85)
/// SCSI pass-through CDB and interprets the ATA registers that come back in
/// the sense data.
use crate::scsi::cdb::{self, opcode, CommandBlock};
use crate::scsi::sense::{parse_sense, AtaStatus, SenseFormat};
use serde::Serialize;

pub mod ata_opcode {
    pub const IDENTIFY_DEVICE: u8 = 0xEC;
    pub const SMART: u8 = 0xB0;
    pub const CHECK_POWER_MODE: u8 = 0xE5;
}

pub mod smart_feature {
    pub const READ_DATA: u16 = 0xD0;
    pub const READ_THRESHOLDS: u16 = 0xD1;
    pub const RETURN_STATUS: u16 = 0xDA;
}

/// LBA mid/high signature every SMART command must carry.
pub const SMART_LBA: u64 = 0xC2_4F00;
const SMART_STATUS_OK: u64 = 0xC24F;
const SMART_STATUS_EXCEEDED: u64 = 0x2CF4;

/// Data transfer protocol of the wrapped ATA command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    HardwareReset = 0,
    SoftwareReset = 1,
    NonData = 3,
    PioIn = 4,
    PioOut = 5,
    Dma = 6,
    DmaQueued = 7,
    ExecuteDeviceDiagnostic = 8,
    DeviceReset = 9,
    UdmaIn = 10,
    UdmaOut = 11,
    Fpdma = 12,
    ReturnResponseInfo = 15,
}

impl Protocol {
    fn has_data(self) -> bool {
        !matches!(
            self,
            Protocol::HardwareReset
                | Protocol::SoftwareReset
                | Protocol::NonData
                | Protocol::ExecuteDeviceDiagnostic
                | Protocol::DeviceReset
                | Protocol::ReturnResponseInfo
        )
    }
}

/// An ATA register set ready to be wrapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtaCommand {
    pub command: u8,
    pub feature: u16,
    pub lba: u64,
    pub sector_count: u16,
    pub device: u8,
    pub protocol: Protocol,
    /// Data flows from the device.
    pub data_in: bool,
    /// Ask for the ATA registers back even on success.
    pub check_condition: bool,
}

impl AtaCommand {
    pub fn identify() -> Self {
        Self {
            command: ata_opcode::IDENTIFY_DEVICE,
            feature: 0,
            lba: 0,
            sector_count: 1,
            device: 0,
            protocol: Protocol::PioIn,
            data_in: true,
            check_condition: false,
        }
    }

    fn smart(feature: u16) -> Self {
        Self {
            command: ata_opcode::SMART,
            feature,
            lba: SMART_LBA,
            sector_count: 1,
            device: 0,
            protocol: Protocol::PioIn,
            data_in: true,
            check_condition: false,
        }
    }

    pub fn smart_read_data() -> Self {
        Self::smart(smart_feature::READ_DATA)
    }

    pub fn smart_read_thresholds() -> Self {
        Self::smart(smart_feature::READ_THRESHOLDS)
    }

    pub fn smart_return_status() -> Self {
        Self {
            sector_count: 0,
            protocol: Protocol::NonData,
            check_condition: true,
            ..Self::smart(smart_feature::RETURN_STATUS)
        }
    }

    pub fn check_power_mode() -> Self {
        Self {
            command: ata_opcode::CHECK_POWER_MODE,
            feature: 0,
            lba: 0,
            sector_count: 0,
            device: 0,
            protocol: Protocol::NonData,
            data_in: true,
            check_condition: true,
        }
    }

    fn flags(&self) -> u8 {
        let (byte_block, t_length) = if self.protocol.has_data() {
            // Transfer length is in the sector count field, counted in blocks
            (1u8, 2u8)
        } else {
            (0, 0)
        };
        (self.check_condition as u8) << 5 | (self.data_in as u8) << 3 | byte_block << 2 | t_length
    }

    /// ATA PASS-THROUGH(12); 28-bit addressing only.
    pub fn to_cdb_12(&self) -> CommandBlock {
        let mut raw = [0u8; 16];
        raw[0] = opcode::ATA_PASS_THROUGH_12;
        raw[1] = (self.protocol as u8) << 1;
        raw[2] = self.flags();
        raw[3] = self.feature as u8;
        raw[4] = self.sector_count as u8;
        raw[5] = self.lba as u8;
        raw[6] = (self.lba >> 8) as u8;
        raw[7] = (self.lba >> 16) as u8;
        raw[8] = self.device | ((self.lba >> 24) & 0x0F) as u8;
        raw[9] = self.command;
        cdb::from_raw(raw, 12)
    }

    /// ATA PASS-THROUGH(16) with the extend bit set.
    pub fn to_cdb_16(&self) -> CommandBlock {
        let mut raw = [0u8; 16];
        raw[0] = opcode::ATA_PASS_THROUGH_16;
        raw[1] = (self.protocol as u8) << 1 | 0x01;
        raw[2] = self.flags();
        raw[3] = (self.feature >> 8) as u8;
        raw[4] = self.feature as u8;
        raw[5] = (self.sector_count >> 8) as u8;
        raw[6] = self.sector_count as u8;
        raw[7] = (self.lba >> 24) as u8;
        raw[8] = self.lba as u8;
        raw[9] = (self.lba >> 32) as u8;
        raw[10] = (self.lba >> 8) as u8;
        raw[11] = (self.lba >> 40) as u8;
        raw[12] = (self.lba >> 16) as u8;
        raw[13] = self.device;
        raw[14] = self.command;
        cdb::from_raw(raw, 16)
    }
}

/// How an `AtaStatus` was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StatusConfidence {
    /// Taken from an ATA Status Return sense descriptor.
    Reported,
    /// Rebuilt from fixed-format information and command-specific bytes.
    /// Best effort only; the byte layout has not been verified on hardware.
    Reconstructed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AtaStatusReport {
    pub status: AtaStatus,
    pub confidence: StatusConfidence,
}

/// Extract the ATA registers a pass-through command returned in its sense.
pub fn ata_status_from_sense(sense: &[u8]) -> Option<AtaStatusReport> {
    let info = parse_sense(sense).ok()?;
    if let Some(status) = info.ata_status {
        return Some(AtaStatusReport {
            status,
            confidence: StatusConfidence::Reported,
        });
    }
    if info.format != SenseFormat::Fixed {
        return None;
    }

    // Information bytes 3..7 carry error, status, device and count. The
    // command-specific bytes 8..12 carry the extend flag and LBA 7:0, 15:8
    // and 23:16. Read raw, since devices leave the VALID bit clear here.
    let status = AtaStatus {
        extend: sense[8] & 0x80 != 0,
        error: sense[3],
        status: sense[4],
        device: sense[5],
        sector_count: sense[6] as u16,
        lba: sense[9] as u64 | (sense[10] as u64) << 8 | (sense[11] as u64) << 16,
    };
    Some(AtaStatusReport {
        status,
        confidence: StatusConfidence::Reconstructed,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SmartStatus {
    Ok,
    ThresholdExceeded,
}

/// Decode the LBA signature of a SMART RETURN STATUS response.
pub fn smart_return_status_result(status: &AtaStatus) -> Option<SmartStatus> {
    match (status.lba >> 8) & 0xFFFF {
        SMART_STATUS_OK => Some(SmartStatus::Ok),
        SMART_STATUS_EXCEEDED => Some(SmartStatus::ThresholdExceeded),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PowerMode {
    Standby,
    Idle,
    ActiveOrIdle,
    Other(u8),
}

/// Decode the sector count returned by CHECK POWER MODE.
pub fn power_mode_result(status: &AtaStatus) -> PowerMode {
    match status.sector_count as u8 {
        0x00 => PowerMode::Standby,
        0x80 => PowerMode::Idle,
        0xFF => PowerMode::ActiveOrIdle,
        other => PowerMode::Other(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identify_12() {
        let cdb = AtaCommand::identify().to_cdb_12();
        assert_eq!(
            cdb.as_bytes(),
            &[0xA1, 0x08, 0x0E, 0x00, 0x01, 0, 0, 0, 0, 0xEC, 0, 0]
        );
    }

    #[test]
    fn test_smart_return_status_16() {
        let cdb = AtaCommand::smart_return_status().to_cdb_16();
        let b = cdb.as_bytes();
        assert_eq!(b[0], 0x85);
        assert_eq!(b[1], (3 << 1) | 1, "non-data protocol with extend");
        assert_eq!(b[2], 0x20 | 0x08, "check condition, data in, no transfer");
        assert_eq!(b[4], 0xDA);
        assert_eq!(b[10], 0x4F);
        assert_eq!(b[12], 0xC2);
        assert_eq!(b[14], 0xB0);
    }

    #[test]
    fn test_pass_through_16_48bit_lba() {
        let cmd = AtaCommand {
            command: 0x25,
            feature: 0x1234,
            lba: 0x0000_6655_4433_2211,
            sector_count: 0x0102,
            device: 0x40,
            protocol: Protocol::Dma,
            data_in: true,
            check_condition: false,
        };
        let b = cmd.to_cdb_16();
        let b = b.as_bytes();
        assert_eq!(&b[3..7], &[0x12, 0x34, 0x01, 0x02]);
        assert_eq!(&b[7..13], &[0x44, 0x11, 0x55, 0x22, 0x66, 0x33]);
        assert_eq!(b[13], 0x40);
        assert_eq!(b[14], 0x25);
    }

    fn descriptor_with_lba(lba: u64) -> Vec<u8> {
        let mut s = vec![0x72, 0x01, 0x00, 0x1D, 0, 0, 0, 14];
        let mut d = [0u8; 14];
        d[0] = 0x09;
        d[1] = 0x0C;
        d[7] = lba as u8;
        d[9] = (lba >> 8) as u8;
        d[11] = (lba >> 16) as u8;
        d[13] = 0x50;
        s.extend_from_slice(&d);
        s
    }

    #[test]
    fn test_smart_status_from_descriptor() {
        let report = ata_status_from_sense(&descriptor_with_lba(0xC24F00)).unwrap();
        assert_eq!(report.confidence, StatusConfidence::Reported);
        assert_eq!(smart_return_status_result(&report.status), Some(SmartStatus::Ok));

        let tripped = ata_status_from_sense(&descriptor_with_lba(0x2CF400)).unwrap();
        assert_eq!(
            smart_return_status_result(&tripped.status),
            Some(SmartStatus::ThresholdExceeded)
        );

        let garbage = ata_status_from_sense(&descriptor_with_lba(0x123400)).unwrap();
        assert_eq!(smart_return_status_result(&garbage.status), None);
    }

    #[test]
    fn test_status_reconstructed_from_fixed_sense() {
        let mut sense = [0u8; 18];
        sense[0] = 0x70;
        sense[2] = 0x01;
        sense[3] = 0x00; // error
        sense[4] = 0x50; // status
        sense[5] = 0xA0; // device
        sense[6] = 0xFF; // count
        sense[9] = 0x00;
        sense[10] = 0x4F;
        sense[11] = 0xC2;
        sense[12] = 0x00;
        sense[13] = 0x1D;

        let report = ata_status_from_sense(&sense).unwrap();
        assert_eq!(report.confidence, StatusConfidence::Reconstructed);
        assert_eq!(report.status.status, 0x50);
        assert_eq!(report.status.device, 0xA0);
        assert_eq!(power_mode_result(&report.status), PowerMode::ActiveOrIdle);
        assert_eq!(smart_return_status_result(&report.status), Some(SmartStatus::Ok));
    }

    #[test]
    fn test_status_from_garbage_sense() {
        assert_eq!(ata_status_from_sense(&[0x00; 18]), None);
        assert_eq!(ata_status_from_sense(&[0x72, 0, 0, 0, 0, 0, 0, 0]), None);
    }
}
