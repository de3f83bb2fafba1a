// SCSI command descriptor block builders
//
// One constructor per command. Builders never fail; a parameter outside the
// field width is truncated to the field, which is a caller bug.

use super::codec::{put_u16, put_u32, put_u64};

pub mod opcode {
    pub const TEST_UNIT_READY: u8 = 0x00;
    pub const INQUIRY: u8 = 0x12;
    pub const MODE_SENSE_6: u8 = 0x1A;
    pub const RECEIVE_DIAGNOSTIC_RESULTS: u8 = 0x1C;
    pub const SEND_DIAGNOSTIC: u8 = 0x1D;
    pub const READ_CAPACITY_10: u8 = 0x25;
    pub const READ_10: u8 = 0x28;
    pub const WRITE_10: u8 = 0x2A;
    pub const READ_DEFECT_DATA_10: u8 = 0x37;
    pub const LOG_SENSE: u8 = 0x4D;
    pub const MODE_SENSE_10: u8 = 0x5A;
    pub const ATA_PASS_THROUGH_16: u8 = 0x85;
    pub const READ_16: u8 = 0x88;
    pub const WRITE_16: u8 = 0x8A;
    pub const SERVICE_ACTION_IN_16: u8 = 0x9E;
    pub const ATA_PASS_THROUGH_12: u8 = 0xA1;
    pub const READ_DEFECT_DATA_12: u8 = 0xB7;
}

const SA_READ_CAPACITY_16: u8 = 0x10;

/// A fully built command block of 6, 10, 12 or 16 bytes.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct CommandBlock {
    bytes: [u8; 16],
    len: u8,
}

impl CommandBlock {
    fn with_len(len: u8, op: u8) -> Self {
        let mut bytes = [0u8; 16];
        bytes[0] = op;
        Self { bytes, len }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn opcode(&self) -> u8 {
        self.bytes[0]
    }
}

impl std::fmt::Debug for CommandBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CommandBlock[")?;
        for (i, b) in self.as_bytes().iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{:02x}", b)?;
        }
        write!(f, "]")
    }
}

/// Direction of the data phase of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataDirection {
    None,
    FromDevice,
    ToDevice,
}

/// Flags shared by the READ and WRITE families.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferFlags {
    /// Force unit access: bypass the device cache.
    pub fua: bool,
    /// Disable page out: do not retain the data in cache.
    pub dpo: bool,
}

impl TransferFlags {
    fn byte(self) -> u8 {
        (self.dpo as u8) << 4 | (self.fua as u8) << 3
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageControl {
    Current = 0,
    Changeable = 1,
    Default = 2,
    Saved = 3,
}

/// Page control for LOG SENSE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogPageControl {
    ThresholdCurrent = 0,
    CumulativeCurrent = 1,
    ThresholdDefault = 2,
    CumulativeDefault = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelfTestCode {
    /// Default self-test selected with the SELFTEST bit.
    Default,
    BackgroundShort,
    BackgroundExtended,
    AbortBackground,
    ForegroundShort,
    ForegroundExtended,
}

impl SelfTestCode {
    fn code(self) -> u8 {
        match self {
            SelfTestCode::Default => 0,
            SelfTestCode::BackgroundShort => 1,
            SelfTestCode::BackgroundExtended => 2,
            SelfTestCode::AbortBackground => 4,
            SelfTestCode::ForegroundShort => 5,
            SelfTestCode::ForegroundExtended => 6,
        }
    }
}

/// Address descriptor format requested from READ DEFECT DATA.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefectFormat {
    ShortBlock = 0,
    BytesFromIndexExtended = 1,
    PhysicalSectorExtended = 2,
    LongBlock = 3,
    BytesFromIndex = 4,
    PhysicalSector = 5,
    Vendor = 6,
}

impl DefectFormat {
    pub fn from_bits(bits: u8) -> Option<Self> {
        Some(match bits & 0x07 {
            0 => DefectFormat::ShortBlock,
            1 => DefectFormat::BytesFromIndexExtended,
            2 => DefectFormat::PhysicalSectorExtended,
            3 => DefectFormat::LongBlock,
            4 => DefectFormat::BytesFromIndex,
            5 => DefectFormat::PhysicalSector,
            6 => DefectFormat::Vendor,
            _ => return None,
        })
    }
}

/// Which defect lists READ DEFECT DATA should return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefectLists {
    pub primary: bool,
    pub grown: bool,
}

impl DefectLists {
    fn bits(self) -> u8 {
        (self.primary as u8) << 4 | (self.grown as u8) << 3
    }
}

pub fn test_unit_ready() -> CommandBlock {
    CommandBlock::with_len(6, opcode::TEST_UNIT_READY)
}

/// Standard INQUIRY.
pub fn inquiry(alloc_len: u16) -> CommandBlock {
    let mut cdb = CommandBlock::with_len(6, opcode::INQUIRY);
    put_u16(&mut cdb.bytes, 3, alloc_len);
    cdb
}

/// INQUIRY for a vital product data page.
pub fn inquiry_vpd(page: u8, alloc_len: u16) -> CommandBlock {
    let mut cdb = inquiry(alloc_len);
    cdb.bytes[1] = 0x01;
    cdb.bytes[2] = page;
    cdb
}

pub fn read_capacity_10() -> CommandBlock {
    CommandBlock::with_len(10, opcode::READ_CAPACITY_10)
}

pub fn read_capacity_16(alloc_len: u32) -> CommandBlock {
    let mut cdb = CommandBlock::with_len(16, opcode::SERVICE_ACTION_IN_16);
    cdb.bytes[1] = SA_READ_CAPACITY_16;
    put_u32(&mut cdb.bytes, 10, alloc_len);
    cdb
}

fn transfer_10(op: u8, lba: u32, blocks: u16, flags: TransferFlags) -> CommandBlock {
    let mut cdb = CommandBlock::with_len(10, op);
    cdb.bytes[1] = flags.byte();
    put_u32(&mut cdb.bytes, 2, lba);
    put_u16(&mut cdb.bytes, 7, blocks);
    cdb
}

fn transfer_16(op: u8, lba: u64, blocks: u32, flags: TransferFlags) -> CommandBlock {
    let mut cdb = CommandBlock::with_len(16, op);
    cdb.bytes[1] = flags.byte();
    put_u64(&mut cdb.bytes, 2, lba);
    put_u32(&mut cdb.bytes, 10, blocks);
    cdb
}

pub fn read_10(lba: u32, blocks: u16, flags: TransferFlags) -> CommandBlock {
    transfer_10(opcode::READ_10, lba, blocks, flags)
}

pub fn write_10(lba: u32, blocks: u16, flags: TransferFlags) -> CommandBlock {
    transfer_10(opcode::WRITE_10, lba, blocks, flags)
}

pub fn read_16(lba: u64, blocks: u32, flags: TransferFlags) -> CommandBlock {
    transfer_16(opcode::READ_16, lba, blocks, flags)
}

pub fn write_16(lba: u64, blocks: u32, flags: TransferFlags) -> CommandBlock {
    transfer_16(opcode::WRITE_16, lba, blocks, flags)
}

pub fn log_sense(
    page: u8,
    subpage: u8,
    control: LogPageControl,
    param_pointer: u16,
    alloc_len: u16,
) -> CommandBlock {
    let mut cdb = CommandBlock::with_len(10, opcode::LOG_SENSE);
    cdb.bytes[2] = (control as u8) << 6 | (page & 0x3F);
    cdb.bytes[3] = subpage;
    put_u16(&mut cdb.bytes, 5, param_pointer);
    put_u16(&mut cdb.bytes, 7, alloc_len);
    cdb
}

pub fn mode_sense_6(
    page: u8,
    subpage: u8,
    control: PageControl,
    disable_block_descriptors: bool,
    alloc_len: u8,
) -> CommandBlock {
    let mut cdb = CommandBlock::with_len(6, opcode::MODE_SENSE_6);
    cdb.bytes[1] = (disable_block_descriptors as u8) << 3;
    cdb.bytes[2] = (control as u8) << 6 | (page & 0x3F);
    cdb.bytes[3] = subpage;
    cdb.bytes[4] = alloc_len;
    cdb
}

pub fn mode_sense_10(
    page: u8,
    subpage: u8,
    control: PageControl,
    disable_block_descriptors: bool,
    long_lba_accepted: bool,
    alloc_len: u16,
) -> CommandBlock {
    let mut cdb = CommandBlock::with_len(10, opcode::MODE_SENSE_10);
    cdb.bytes[1] = (long_lba_accepted as u8) << 4 | (disable_block_descriptors as u8) << 3;
    cdb.bytes[2] = (control as u8) << 6 | (page & 0x3F);
    cdb.bytes[3] = subpage;
    put_u16(&mut cdb.bytes, 7, alloc_len);
    cdb
}

/// RECEIVE DIAGNOSTIC RESULTS; `page` of `None` fetches the last result.
pub fn receive_diagnostic_results(page: Option<u8>, alloc_len: u16) -> CommandBlock {
    let mut cdb = CommandBlock::with_len(6, opcode::RECEIVE_DIAGNOSTIC_RESULTS);
    if let Some(page) = page {
        cdb.bytes[1] = 0x01;
        cdb.bytes[2] = page;
    }
    put_u16(&mut cdb.bytes, 3, alloc_len);
    cdb
}

pub fn send_diagnostic(test: SelfTestCode, param_len: u16) -> CommandBlock {
    let mut cdb = CommandBlock::with_len(6, opcode::SEND_DIAGNOSTIC);
    cdb.bytes[1] = match test {
        // PF plus SELFTEST
        SelfTestCode::Default => 0x10 | 0x04,
        other => other.code() << 5 | 0x10,
    };
    put_u16(&mut cdb.bytes, 3, param_len);
    cdb
}

pub fn read_defect_data_10(lists: DefectLists, format: DefectFormat, alloc_len: u16) -> CommandBlock {
    let mut cdb = CommandBlock::with_len(10, opcode::READ_DEFECT_DATA_10);
    cdb.bytes[2] = lists.bits() | format as u8;
    put_u16(&mut cdb.bytes, 7, alloc_len);
    cdb
}

pub fn read_defect_data_12(lists: DefectLists, format: DefectFormat, alloc_len: u32) -> CommandBlock {
    let mut cdb = CommandBlock::with_len(12, opcode::READ_DEFECT_DATA_12);
    cdb.bytes[1] = lists.bits() | format as u8;
    put_u32(&mut cdb.bytes, 6, alloc_len);
    cdb
}

/// Raw constructor used by the ATA pass-through builders.
pub(crate) fn from_raw(raw: [u8; 16], len: u8) -> CommandBlock {
    CommandBlock { bytes: raw, len }
}
