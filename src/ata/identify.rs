// ATA IDENTIFY DEVICE data
//
// Accessors are independent queries over the 512-byte block. The block as a
// whole is checked once with `validate` before any accessor is trusted.

use crate::scsi::codec::{ata_longword, ata_qword, ata_string, ata_word};
use crate::ParseError;
use serde::Serialize;

pub const IDENTIFY_LEN: usize = 512;
const CHECKSUM_SIGNATURE: u8 = 0xA5;

#[derive(Clone, PartialEq, Eq)]
pub struct IdentifyData {
    raw: [u8; IDENTIFY_LEN],
}

macro_rules! identify_flags {
    ($($(#[$doc:meta])* $name:ident => ($word:expr, $bit:expr);)*) => {
        impl IdentifyData {
            $(
                $(#[$doc])*
                pub fn $name(&self) -> bool {
                    self.bit($word, $bit)
                }
            )*
        }
    };
}

impl IdentifyData {
    pub fn from_bytes(buf: &[u8]) -> Result<Self, ParseError> {
        if buf.len() < IDENTIFY_LEN {
            return Err(ParseError::TooShort {
                needed: IDENTIFY_LEN,
                actual: buf.len(),
            });
        }
        let mut raw = [0u8; IDENTIFY_LEN];
        raw.copy_from_slice(&buf[..IDENTIFY_LEN]);
        Ok(Self { raw })
    }

    pub fn as_bytes(&self) -> &[u8; IDENTIFY_LEN] {
        &self.raw
    }

    /// Whole-block sanity check: device type bits and, when the integrity
    /// signature is present, the checksum.
    pub fn validate(&self) -> Result<(), ParseError> {
        if self.not_ata_device() {
            return Err(ParseError::NotAtaDevice);
        }
        if self.response_incomplete() {
            return Err(ParseError::IncompleteIdentify);
        }
        self.verify_checksum()
    }

    /// Word 255: checksum byte over the whole block, only meaningful when
    /// the low byte holds the 0xA5 signature.
    pub fn verify_checksum(&self) -> Result<(), ParseError> {
        if self.raw[510] != CHECKSUM_SIGNATURE {
            return Ok(());
        }
        let sum = self.raw.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
        if sum != 0 {
            let partial = self.raw[..511]
                .iter()
                .fold(0u8, |acc, &b| acc.wrapping_add(b));
            return Err(ParseError::ChecksumMismatch {
                expected: 0u8.wrapping_sub(partial),
                actual: self.raw[511],
            });
        }
        Ok(())
    }

    pub fn word(&self, index: usize) -> u16 {
        ata_word(&self.raw, index)
    }

    pub fn bit(&self, word: usize, bit: u32) -> bool {
        self.word(word) & (1 << bit) != 0
    }

    /// Bits `first..=last` of a word, shifted down.
    pub fn bits(&self, word: usize, first: u32, last: u32) -> u16 {
        let width = last - first + 1;
        (self.word(word) >> first) & ((1u32 << width) - 1) as u16
    }

    pub fn serial(&self) -> String {
        ata_string(&self.raw, 10, 19).trim_start().to_string()
    }

    pub fn firmware(&self) -> String {
        ata_string(&self.raw, 23, 26).trim_start().to_string()
    }

    pub fn model(&self) -> String {
        ata_string(&self.raw, 27, 46).trim_start().to_string()
    }

    pub fn additional_product_id(&self) -> String {
        ata_string(&self.raw, 170, 173)
    }

    pub fn current_media_serial(&self) -> String {
        ata_string(&self.raw, 176, 205)
    }

    pub fn total_addressable_sectors_28bit(&self) -> u32 {
        ata_longword(&self.raw, 60)
    }

    pub fn total_addressable_sectors_48bit(&self) -> u64 {
        ata_qword(&self.raw, 100)
    }

    pub fn extended_user_addressable_sectors(&self) -> u64 {
        ata_qword(&self.raw, 230)
    }

    /// Best available user capacity in sectors.
    pub fn user_addressable_sectors(&self) -> u64 {
        if self.ext_num_user_addressable() {
            self.extended_user_addressable_sectors()
        } else if self.address_48bit() {
            self.total_addressable_sectors_48bit()
        } else {
            self.total_addressable_sectors_28bit() as u64
        }
    }

    pub fn queue_depth(&self) -> u16 {
        self.bits(75, 0, 4) + 1
    }

    /// Negotiated SATA speed code (1 = 1.5 Gb/s, 2 = 3 Gb/s, 3 = 6 Gb/s).
    pub fn current_link_speed(&self) -> u16 {
        self.bits(77, 1, 3)
    }

    pub fn major_version(&self) -> u16 {
        self.word(80)
    }

    /// World wide name; word 108 holds the most significant bits.
    pub fn wwn(&self) -> u64 {
        (108..112).fold(0u64, |acc, w| acc << 16 | self.word(w) as u64)
    }

    /// Nominal media rotation rate in rpm; `Some(1)` means solid state.
    pub fn rotation_rate(&self) -> Option<u16> {
        match self.word(217) {
            0 | 0xFFFF => None,
            rate => Some(rate),
        }
    }

    pub fn is_ssd(&self) -> bool {
        self.rotation_rate() == Some(1)
    }

    /// Logical sector size in bytes, from words 106 and 117-118.
    pub fn logical_sector_size(&self) -> u32 {
        let w106 = self.word(106);
        if w106 & 0xC000 == 0x4000 && w106 & 0x1000 != 0 {
            ata_longword(&self.raw, 117) * 2
        } else {
            512
        }
    }

    pub fn summary(&self) -> IdentifySummary {
        IdentifySummary {
            model: self.model(),
            serial: self.serial(),
            firmware: self.firmware(),
            sectors: self.user_addressable_sectors(),
            rotation_rate: self.rotation_rate(),
            smart_supported: self.smart_supported(),
            smart_enabled: self.smart_enabled(),
            address_48bit: self.address_48bit(),
            ncq: self.ncq(),
            sata_link_speed: self.current_link_speed(),
        }
    }
}

identify_flags! {
    not_ata_device => (0, 15);
    response_incomplete => (0, 2);
    trusted_computing => (48, 0);
    dma => (49, 8);
    iordy_disable => (49, 10);
    iordy => (49, 11);
    standby_timer => (49, 13);
    fields_valid_64_70 => (53, 1);
    fields_valid_88 => (53, 2);
    sanitize => (59, 12);
    crypto_scramble => (59, 13);
    overwrite => (59, 14);
    block_erase => (59, 15);
    non_volatile_cache => (69, 2);
    ext_num_user_addressable => (69, 3);
    encrypt_all => (69, 4);
    /// Reads after TRIM return zeroes.
    rzat => (69, 5);
    address_28bit => (69, 6);
    download_microcode_dma => (69, 8);
    set_max_dma => (69, 9);
    write_buffer_dma => (69, 10);
    read_buffer_dma => (69, 11);
    lps_misalignment_reporting => (69, 13);
    /// Reads after TRIM are deterministic.
    drat => (69, 14);
    cfast => (69, 15);
    sata_gen1 => (76, 1);
    sata_gen2 => (76, 2);
    sata_gen3 => (76, 3);
    ncq => (76, 8);
    host_initiated_power_management => (76, 9);
    phy_event_counters => (76, 10);
    unload_while_ncq_outstanding => (76, 11);
    ncq_priority => (76, 12);
    host_partial_to_slumber => (76, 13);
    device_partial_to_slumber => (76, 14);
    read_log_dma_ext => (76, 15);
    ncq_streaming => (77, 4);
    ncq_queue_management => (77, 5);
    receive_send_fpdma_queued => (77, 6);
    non_zero_buffer_offsets => (79, 1);
    dma_setup_auto_activation => (79, 2);
    device_initiated_power_management => (79, 3);
    in_order_data_delivery => (79, 4);
    hardware_feature_control => (79, 5);
    software_settings_preservation => (79, 6);
    automatic_partial_to_slumber => (79, 7);
    ata_atapi_5 => (80, 5);
    ata_atapi_6 => (80, 6);
    ata_atapi_7 => (80, 7);
    ata8_acs => (80, 8);
    acs2 => (80, 9);
    smart_supported => (82, 0);
    security_supported => (82, 1);
    mandatory_power_management => (82, 3);
    packet_feature_set => (82, 4);
    volatile_write_cache => (82, 5);
    read_look_ahead => (82, 6);
    write_buffer => (82, 12);
    read_buffer => (82, 13);
    nop => (82, 14);
    download_microcode => (83, 0);
    cfa => (83, 2);
    advanced_power_management => (83, 3);
    power_up_in_standby => (83, 5);
    spin_up_required => (83, 6);
    address_48bit => (83, 10);
    smart_error_logging => (84, 0);
    smart_self_test => (84, 1);
    streaming => (84, 4);
    general_purpose_logging => (84, 5);
    wwn_64bit => (84, 8);
    smart_enabled => (85, 0);
    write_uncorrectable_supported => (119, 2);
    sense_data_reporting_supported => (119, 6);
    write_uncorrectable_enabled => (120, 2);
    sense_data_reporting_enabled => (120, 6);
    sct_transport => (206, 0);
    sct_write_same => (206, 2);
    sct_error_recovery_control => (206, 3);
    sct_feature_control => (206, 4);
    sct_data_tables => (206, 5);
}

impl std::fmt::Debug for IdentifyData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentifyData")
            .field("model", &self.model())
            .field("serial", &self.serial())
            .field("firmware", &self.firmware())
            .finish()
    }
}

/// The handful of IDENTIFY facts worth reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdentifySummary {
    pub model: String,
    pub serial: String,
    pub firmware: String,
    pub sectors: u64,
    pub rotation_rate: Option<u16>,
    pub smart_supported: bool,
    pub smart_enabled: bool,
    pub address_48bit: bool,
    pub ncq: bool,
    pub sata_link_speed: u16,
}
