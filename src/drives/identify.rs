// Capacity discovery and device identification

use crate::ata::identify::{IdentifyData, IdentifySummary, IDENTIFY_LEN};
use crate::ata::passthrough::AtaCommand;
use crate::io::{command_data_in, DeviceIo};
use crate::scsi::cdb;
use crate::scsi::parse::{
    parse_capacity_10, parse_capacity_16, parse_inquiry, parse_unit_serial_vpd,
    INQUIRY_ALLOC_LEN, READ_CAPACITY_10_LEN, READ_CAPACITY_16_LEN,
};
use crate::{ScanError, ScanResult};
use serde::Serialize;
use std::time::Duration;

const VPD_UNIT_SERIAL: u8 = 0x80;
const VPD_ALLOC_LEN: u16 = 252;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CapacitySource {
    ReadCapacity10,
    ReadCapacity16,
    BlockDevice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Capacity {
    pub total_sectors: u64,
    pub sector_size: u32,
    pub source: CapacitySource,
}

impl Capacity {
    pub fn total_bytes(&self) -> u64 {
        self.total_sectors.saturating_mul(self.sector_size as u64)
    }

    /// Reject geometry the scan cannot walk.
    pub fn validate(&self) -> ScanResult<()> {
        if self.total_sectors == 0 {
            return Err(ScanError::InvalidGeometry(
                "device reports zero sectors".to_string(),
            ));
        }
        if self.sector_size == 0 || self.sector_size % 512 != 0 {
            return Err(ScanError::InvalidGeometry(format!(
                "sector size {} is not a positive multiple of 512",
                self.sector_size
            )));
        }
        if self.total_sectors.checked_mul(self.sector_size as u64).is_none() {
            return Err(ScanError::InvalidGeometry(format!(
                "{} sectors of {} bytes overflow a byte offset",
                self.total_sectors, self.sector_size
            )));
        }
        Ok(())
    }
}

/// READ CAPACITY(10), escalating to (16) when the 32-bit LBA field holds
/// the overflow sentinel. Devices without pass-through fall back to the
/// block layer.
pub fn discover_capacity<D: DeviceIo + ?Sized>(dev: &mut D, timeout: Duration) -> ScanResult<Capacity> {
    let result = command_data_in(dev, &cdb::read_capacity_10(), timeout, READ_CAPACITY_10_LEN)
        .and_then(|buf| Ok(parse_capacity_10(&buf)?));

    let cap10 = match result {
        Ok(cap) => cap,
        Err(e @ ScanError::Unsupported(_)) | Err(e @ ScanError::CommandFailed(_)) => {
            tracing::debug!(error = %e, "READ CAPACITY unavailable, asking the block layer");
            return block_capacity(dev, e);
        }
        Err(e) => return Err(e),
    };

    if !cap10.needs_16() {
        return Ok(Capacity {
            total_sectors: cap10.max_lba as u64 + 1,
            sector_size: cap10.block_size,
            source: CapacitySource::ReadCapacity10,
        });
    }

    tracing::debug!("READ CAPACITY(10) overflowed, issuing READ CAPACITY(16)");
    let buf = command_data_in(
        dev,
        &cdb::read_capacity_16(READ_CAPACITY_16_LEN as u32),
        timeout,
        READ_CAPACITY_16_LEN,
    )?;
    let cap16 = parse_capacity_16(&buf)?;
    let total_sectors = cap16.max_lba.checked_add(1).ok_or_else(|| {
        ScanError::InvalidGeometry(format!("READ CAPACITY(16) reports max LBA {:#x}", cap16.max_lba))
    })?;
    Ok(Capacity {
        total_sectors,
        sector_size: cap16.block_size,
        source: CapacitySource::ReadCapacity16,
    })
}

fn block_capacity<D: DeviceIo + ?Sized>(dev: &mut D, cause: ScanError) -> ScanResult<Capacity> {
    match dev.block_geometry()? {
        Some(geometry) if geometry.sector_size > 0 => Ok(Capacity {
            total_sectors: geometry.size_bytes / geometry.sector_size as u64,
            sector_size: geometry.sector_size,
            source: CapacitySource::BlockDevice,
        }),
        Some(geometry) => Err(ScanError::InvalidGeometry(format!(
            "block layer reports sector size {}",
            geometry.sector_size
        ))),
        None => Err(cause),
    }
}

/// Who the device says it is.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceIdentity {
    pub vendor: String,
    pub model: String,
    pub revision: String,
    pub serial: String,
    pub device_type: u8,
    pub is_ata: bool,
    pub ata: Option<IdentifySummary>,
    #[serde(skip)]
    pub identify: Option<IdentifyData>,
}

impl DeviceIdentity {
    /// Identity of a device that answers no identification commands.
    pub fn unknown() -> Self {
        Self {
            vendor: String::new(),
            model: String::new(),
            revision: String::new(),
            serial: String::new(),
            device_type: 0,
            is_ata: false,
            ata: None,
            identify: None,
        }
    }
}

/// INQUIRY, then ATA IDENTIFY for devices behind a SAT layer. SCSI devices
/// without a serial in the standard page get one from VPD page 0x80.
pub fn identify_device<D: DeviceIo + ?Sized>(dev: &mut D, timeout: Duration) -> ScanResult<DeviceIdentity> {
    let buf = match command_data_in(dev, &cdb::inquiry(INQUIRY_ALLOC_LEN), timeout, INQUIRY_ALLOC_LEN as usize) {
        Ok(buf) => buf,
        Err(ScanError::Unsupported(_)) => {
            tracing::info!("No SCSI pass-through, continuing without device identity");
            return Ok(DeviceIdentity::unknown());
        }
        Err(e) => return Err(e),
    };
    let inquiry = parse_inquiry(&buf)?;

    let mut identity = DeviceIdentity {
        vendor: inquiry.vendor.clone(),
        model: inquiry.model.clone(),
        revision: inquiry.revision.clone(),
        serial: inquiry.serial.clone(),
        device_type: inquiry.device_type,
        is_ata: inquiry.is_ata(),
        ata: None,
        identify: None,
    };

    if identity.is_ata {
        match ata_identify(dev, timeout) {
            Ok(data) => {
                identity.model = data.model();
                identity.revision = data.firmware();
                identity.serial = data.serial();
                identity.ata = Some(data.summary());
                identity.identify = Some(data);
            }
            Err(e) => {
                tracing::warn!(error = %e, "ATA IDENTIFY failed, treating device as SCSI");
                identity.is_ata = false;
            }
        }
    } else if identity.serial.is_empty() {
        let vpd = command_data_in(
            dev,
            &cdb::inquiry_vpd(VPD_UNIT_SERIAL, VPD_ALLOC_LEN),
            timeout,
            VPD_ALLOC_LEN as usize,
        )
        .and_then(|buf| Ok(parse_unit_serial_vpd(&buf)?));
        match vpd {
            Ok(serial) => identity.serial = serial,
            Err(e) => tracing::debug!(error = %e, "No unit serial number page"),
        }
    }

    tracing::info!(
        vendor = %identity.vendor,
        model = %identity.model,
        revision = %identity.revision,
        serial = %identity.serial,
        is_ata = identity.is_ata,
        device_type = %crate::scsi::parse::device_type_name(identity.device_type),
        "Identified device"
    );
    Ok(identity)
}

/// IDENTIFY DEVICE through ATA PASS-THROUGH(16), validated as a whole.
pub fn ata_identify<D: DeviceIo + ?Sized>(dev: &mut D, timeout: Duration) -> ScanResult<IdentifyData> {
    let buf = command_data_in(dev, &AtaCommand::identify().to_cdb_16(), timeout, IDENTIFY_LEN)?;
    let data = IdentifyData::from_bytes(&buf)?;
    data.validate()?;
    Ok(data)
}
