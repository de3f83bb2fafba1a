/// In-memory device with fault injection
///
/// Reads return a fixed pattern unless they touch an injected fault. All
/// handles cloned from one `MockDevice` share its state, so a test keeps a
/// handle and inspects what the engine did after the scan.
use diskscan::io::{
    BlockGeometry, CommandResponse, DataCompleteness, DeviceIo, DeviceOpener, IoOutcome,
};
use diskscan::scsi::cdb::{CommandBlock, DataDirection};
use diskscan::{ScanError, ScanResult};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

pub const FILL_BYTE: u8 = 0xAB;

#[derive(Debug, Clone)]
pub enum FaultKind {
    /// Fail with this sense data and no data
    Sense(Vec<u8>),
    /// Fail in the I/O layer with this errno
    Errno(i32),
    /// Succeed after sleeping
    Latency(Duration),
    /// Return only half the data
    Partial,
}

#[derive(Debug, Clone)]
pub struct Fault {
    pub start: u64,
    pub end: u64,
    pub kind: FaultKind,
}

/// What an ATA drive behind a SAT layer reports over ATA PASS-THROUGH.
///
/// The n-th SMART READ DATA returns the n-th temperature and reallocation
/// count; once a list runs out its last value repeats.
#[derive(Debug, Clone)]
pub struct AtaProfile {
    pub model: String,
    pub serial: String,
    pub firmware: String,
    pub temperatures: Vec<i32>,
    pub reallocations: Vec<u64>,
    pub threshold_exceeded: bool,
    /// SMART READ DATA commands answered so far
    pub smart_reads: usize,
}

impl Default for AtaProfile {
    fn default() -> Self {
        Self {
            model: "MODEL X".to_string(),
            serial: "WD-ATA0001".to_string(),
            firmware: "FW01".to_string(),
            temperatures: vec![35],
            reallocations: vec![0],
            threshold_exceeded: false,
            smart_reads: 0,
        }
    }
}

fn nth_or_last<T: Copy + Default>(values: &[T], n: usize) -> T {
    values.get(n).or(values.last()).copied().unwrap_or_default()
}

#[derive(Debug, Default)]
pub struct MockState {
    pub total_sectors: u64,
    pub sector_size: u32,
    pub passthrough: bool,
    pub vendor: String,
    pub model: String,
    pub faults: Vec<Fault>,
    /// (offset, len) of every read, in order
    pub reads: Vec<(u64, usize)>,
    /// (offset, data) of every write, in order
    pub writes: Vec<(u64, Vec<u8>)>,
    /// Opcodes of every command, in order
    pub commands: Vec<u8>,
    /// Max LBA READ CAPACITY reports instead of the real one
    pub reported_max_lba: Option<u64>,
    /// Answer ATA PASS-THROUGH(16) like a SATA drive
    pub ata: Option<AtaProfile>,
    pub closed: bool,
    /// Cancel this token once this many reads have been issued
    pub cancel_after: Option<(usize, diskscan::CancellationToken)>,
}

#[derive(Debug, Clone)]
pub struct MockDevice {
    state: Arc<Mutex<MockState>>,
}

impl MockDevice {
    pub fn new(total_sectors: u64, sector_size: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                total_sectors,
                sector_size,
                passthrough: true,
                vendor: "MOCK".to_string(),
                model: "SCANTEST".to_string(),
                ..Default::default()
            })),
        }
    }

    /// A SATA drive: INQUIRY reports vendor "ATA" and ATA PASS-THROUGH
    /// answers IDENTIFY and SMART.
    pub fn ata(total_sectors: u64, sector_size: u32, profile: AtaProfile) -> Self {
        let device = Self::new(total_sectors, sector_size);
        {
            let mut state = device.state();
            state.vendor = "ATA".to_string();
            state.model = "SAT BRIDGE".to_string();
            state.ata = Some(profile);
        }
        device
    }

    pub fn smart_reads(&self) -> usize {
        self.state().ata.as_ref().map(|a| a.smart_reads).unwrap_or(0)
    }

    /// A device without SCSI pass-through, sized by the block layer only.
    pub fn without_passthrough(self) -> Self {
        self.state().passthrough = false;
        self
    }

    pub fn with_fault(self, start: u64, end: u64, kind: FaultKind) -> Self {
        self.state().faults.push(Fault { start, end, kind });
        self
    }

    pub fn cancel_after(self, reads: usize, token: diskscan::CancellationToken) -> Self {
        self.state().cancel_after = Some((reads, token));
        self
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn reads(&self) -> Vec<(u64, usize)> {
        self.state().reads.clone()
    }

    pub fn writes(&self) -> Vec<(u64, Vec<u8>)> {
        self.state().writes.clone()
    }

    pub fn commands(&self) -> Vec<u8> {
        self.state().commands.clone()
    }

    fn fault_for(state: &MockState, offset: u64, len: usize) -> Option<FaultKind> {
        let end = offset + len as u64;
        state
            .faults
            .iter()
            .find(|f| f.start < end && offset < f.end)
            .map(|f| f.kind.clone())
    }

    fn max_lba(state: &MockState) -> u64 {
        state
            .reported_max_lba
            .unwrap_or_else(|| state.total_sectors.saturating_sub(1))
    }

    fn capacity_10(state: &MockState) -> Vec<u8> {
        let max_lba = Self::max_lba(state);
        let lba = if max_lba > u32::MAX as u64 { u32::MAX } else { max_lba as u32 };
        let mut buf = lba.to_be_bytes().to_vec();
        buf.extend_from_slice(&state.sector_size.to_be_bytes());
        buf
    }

    fn capacity_16(state: &MockState) -> Vec<u8> {
        let mut buf = vec![0u8; 32];
        buf[..8].copy_from_slice(&Self::max_lba(state).to_be_bytes());
        buf[8..12].copy_from_slice(&state.sector_size.to_be_bytes());
        buf
    }

    fn inquiry(state: &MockState) -> Vec<u8> {
        let mut buf = vec![b' '; 96];
        buf[0] = 0x00;
        buf[1] = 0x00;
        buf[2] = 0x06;
        buf[3] = 0x02;
        buf[4] = 91;
        for (i, b) in state.vendor.bytes().take(8).enumerate() {
            buf[8 + i] = b;
        }
        for (i, b) in state.model.bytes().take(16).enumerate() {
            buf[16 + i] = b;
        }
        buf[32..36].copy_from_slice(b"0001");
        buf[36..44].copy_from_slice(b"SN000042");
        buf
    }

    fn ata_identify(total_sectors: u64, profile: &AtaProfile) -> Vec<u8> {
        let mut buf = vec![0u8; 512];
        put_ata_string(&mut buf, 10, 19, &profile.serial);
        put_ata_string(&mut buf, 23, 26, &profile.firmware);
        put_ata_string(&mut buf, 27, 46, &profile.model);
        // SMART supported and enabled, 48-bit addressing
        put_ata_word(&mut buf, 82, 0x0001);
        put_ata_word(&mut buf, 83, 0x0400);
        put_ata_word(&mut buf, 85, 0x0001);
        put_ata_word(&mut buf, 86, 0x0400);
        for (i, word) in (100..104).enumerate() {
            put_ata_word(&mut buf, word, (total_sectors >> (16 * i)) as u16);
        }
        put_ata_word(&mut buf, 217, 7200);
        buf[510] = 0xA5;
        seal_checksum(&mut buf);
        buf
    }

    /// Attributes 5 (reallocated) and 194 (temperature) in the n-th state.
    fn smart_data(profile: &AtaProfile) -> Vec<u8> {
        let n = profile.smart_reads;
        let mut page = vec![0u8; 512];
        page[0] = 0x10;
        let realloc = nth_or_last(&profile.reallocations, n);
        let temperature = nth_or_last(&profile.temperatures, n);
        put_attribute(&mut page, 0, 5, 0x0033, 100, realloc);
        put_attribute(&mut page, 1, 194, 0x0022, (100 - temperature).clamp(1, 253) as u8, temperature as u64);
        seal_checksum(&mut page);
        page
    }

    fn smart_thresholds() -> Vec<u8> {
        let mut page = vec![0u8; 512];
        page[0] = 0x10;
        page[2] = 5;
        page[3] = 36;
        page[14] = 194;
        seal_checksum(&mut page);
        page
    }

    /// CHECK CONDITION with an ATA Status Return descriptor carrying the
    /// SMART RETURN STATUS signature in LBA mid/high.
    fn smart_status_sense(profile: &AtaProfile) -> Vec<u8> {
        let (mid, high) = if profile.threshold_exceeded { (0xF4, 0x2C) } else { (0x4F, 0xC2) };
        let mut sense = vec![0u8; 22];
        sense[0] = 0x72;
        sense[1] = 0x01;
        sense[3] = 0x1D;
        sense[7] = 14;
        sense[8] = 0x09;
        sense[9] = 0x0C;
        let p = &mut sense[10..22];
        p[7] = mid;
        p[9] = high;
        p[11] = 0x50;
        sense
    }

    /// Answer an ATA PASS-THROUGH(16). `None` means the drive aborts it.
    fn ata_command(state: &mut MockState, cdb: &[u8]) -> Option<(Vec<u8>, IoOutcome)> {
        let total_sectors = state.total_sectors;
        let profile = state.ata.as_mut()?;
        let ok = IoOutcome::ok();
        match (cdb[14], cdb[4]) {
            (0xEC, _) => Some((Self::ata_identify(total_sectors, profile), ok)),
            (0xB0, 0xD0) => {
                let page = Self::smart_data(profile);
                profile.smart_reads += 1;
                Some((page, ok))
            }
            (0xB0, 0xD1) => Some((Self::smart_thresholds(), ok)),
            (0xB0, 0xDA) => {
                let sense = Self::smart_status_sense(profile);
                Some((Vec::new(), IoOutcome::from_sense(&sense, DataCompleteness::None)))
            }
            _ => None,
        }
    }
}

fn put_ata_word(buf: &mut [u8], index: usize, value: u16) {
    buf[index * 2..index * 2 + 2].copy_from_slice(&value.to_le_bytes());
}

/// Space padded, two characters per word with the first in the high byte.
fn put_ata_string(buf: &mut [u8], first: usize, last: usize, text: &str) {
    let field = &mut buf[first * 2..(last + 1) * 2];
    field.fill(b' ');
    for (i, b) in text.bytes().take(field.len()).enumerate() {
        field[i ^ 1] = b;
    }
}

fn put_attribute(page: &mut [u8], slot: usize, id: u8, flags: u16, value: u8, raw: u64) {
    let s = &mut page[2 + slot * 12..2 + (slot + 1) * 12];
    s[0] = id;
    s[1..3].copy_from_slice(&flags.to_le_bytes());
    s[3] = value;
    s[4] = value;
    s[5..11].copy_from_slice(&raw.to_le_bytes()[..6]);
}

/// Make the 512 bytes sum to zero through the last byte.
fn seal_checksum(block: &mut [u8]) {
    let sum = block[..511].iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    block[511] = 0u8.wrapping_sub(sum);
}

impl DeviceIo for MockDevice {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> IoOutcome {
        let (fault, cancel) = {
            let mut state = self.state();
            state.reads.push((offset, buf.len()));
            let cancel = match &state.cancel_after {
                Some((n, token)) if state.reads.len() >= *n => Some(token.clone()),
                _ => None,
            };
            (Self::fault_for(&state, offset, buf.len()), cancel)
        };
        if let Some(token) = cancel {
            token.cancel();
        }

        match fault {
            None => {
                buf.fill(FILL_BYTE);
                IoOutcome::ok()
            }
            Some(FaultKind::Sense(sense)) => IoOutcome::from_sense(&sense, DataCompleteness::None),
            Some(FaultKind::Errno(errno)) => IoOutcome::from_os_error(errno),
            Some(FaultKind::Latency(delay)) => {
                std::thread::sleep(delay);
                buf.fill(FILL_BYTE);
                IoOutcome::ok()
            }
            Some(FaultKind::Partial) => {
                let half = buf.len() / 2;
                buf[..half].fill(FILL_BYTE);
                IoOutcome::with_data(DataCompleteness::Partial)
            }
        }
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> IoOutcome {
        self.state().writes.push((offset, buf.to_vec()));
        IoOutcome::ok()
    }

    fn submit_command(
        &mut self,
        cdb: &CommandBlock,
        _direction: DataDirection,
        _timeout: Duration,
        data: &mut [u8],
    ) -> ScanResult<CommandResponse> {
        let mut state = self.state();
        if !state.passthrough {
            return Err(ScanError::Unsupported("no pass-through".to_string()));
        }
        state.commands.push(cdb.opcode());

        let response = match cdb.opcode() {
            0x25 => Some((Self::capacity_10(&state), IoOutcome::ok())),
            0x9E => Some((Self::capacity_16(&state), IoOutcome::ok())),
            0x12 if cdb.as_bytes()[1] & 0x01 == 0 => Some((Self::inquiry(&state), IoOutcome::ok())),
            0x85 => Self::ata_command(&mut state, cdb.as_bytes()),
            _ => None,
        };

        Ok(match response {
            Some((bytes, outcome)) => {
                let n = bytes.len().min(data.len());
                data[..n].copy_from_slice(&bytes[..n]);
                CommandResponse {
                    transferred: n,
                    outcome,
                }
            }
            None => CommandResponse {
                transferred: 0,
                outcome: IoOutcome::from_sense(&super::illegal_request(), DataCompleteness::None),
            },
        })
    }

    fn block_geometry(&mut self) -> ScanResult<Option<BlockGeometry>> {
        let state = self.state();
        Ok(Some(BlockGeometry {
            size_bytes: state.total_sectors * state.sector_size as u64,
            sector_size: state.sector_size,
        }))
    }

    fn close(&mut self) -> ScanResult<()> {
        self.state().closed = true;
        Ok(())
    }
}

/// Hands out the same shared device for any existing path.
#[derive(Debug, Clone)]
pub struct MockOpener {
    pub device: MockDevice,
    pub missing: bool,
}

impl MockOpener {
    pub fn new(device: MockDevice) -> Self {
        Self {
            device,
            missing: false,
        }
    }
}

impl DeviceOpener for MockOpener {
    type Device = MockDevice;

    fn check_access(&self, path: &Path, _writable: bool) -> ScanResult<()> {
        if self.missing {
            return Err(ScanError::NotFound(path.display().to_string()));
        }
        Ok(())
    }

    fn open(&self, _path: &Path, _writable: bool) -> ScanResult<MockDevice> {
        Ok(self.device.clone())
    }
}
