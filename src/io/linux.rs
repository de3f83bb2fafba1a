// Linux block device access: O_DIRECT positioned I/O plus SG_IO pass-through

use super::{
    BlockGeometry, CommandResponse, DataCompleteness, DeviceIo, DeviceOpener, IoOutcome, ReadPath,
};
use crate::error::classification::ErrorSeverity;
use crate::scsi::cdb::{self, CommandBlock, DataDirection, TransferFlags};
use crate::scsi::sense::MAX_SENSE_LEN;
use crate::{ScanError, ScanResult};
use std::fs::{File, OpenOptions};
use std::os::unix::fs::{FileExt, FileTypeExt, OpenOptionsExt};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::Duration;

const SG_IO: u64 = 0x2285;
const SG_GET_VERSION_NUM: u64 = 0x2282;
const BLKSSZGET: u64 = 0x1268;
const BLKSECTGET: u64 = 0x1267;
const BLKGETSIZE64: u64 = 0x8008_1272;

const SG_DXFER_NONE: i32 = -1;
const SG_DXFER_TO_DEV: i32 = -2;
const SG_DXFER_FROM_DEV: i32 = -3;

const SAM_STAT_GOOD: u8 = 0x00;
const SAM_STAT_CHECK_CONDITION: u8 = 0x02;
const DID_TIME_OUT: u16 = 0x03;
const DRIVER_TIMEOUT: u16 = 0x06;
const DRIVER_SENSE: u16 = 0x08;

/// `struct sg_io_hdr` from <scsi/sg.h>.
#[repr(C)]
struct SgIoHdr {
    interface_id: libc::c_int,
    dxfer_direction: libc::c_int,
    cmd_len: libc::c_uchar,
    mx_sb_len: libc::c_uchar,
    iovec_count: libc::c_ushort,
    dxfer_len: libc::c_uint,
    dxferp: *mut libc::c_void,
    cmdp: *const libc::c_uchar,
    sbp: *mut libc::c_uchar,
    timeout: libc::c_uint,
    flags: libc::c_uint,
    pack_id: libc::c_int,
    usr_ptr: *mut libc::c_void,
    status: libc::c_uchar,
    masked_status: libc::c_uchar,
    msg_status: libc::c_uchar,
    sb_len_wr: libc::c_uchar,
    host_status: libc::c_ushort,
    driver_status: libc::c_ushort,
    resid: libc::c_int,
    duration: libc::c_uint,
    info: libc::c_uint,
}

/// An open Linux block or SCSI generic device.
pub struct LinuxDevice {
    file: File,
    path: PathBuf,
    passthrough: bool,
    read_path: ReadPath,
    sector_size: u32,
    data_timeout: Duration,
}

impl LinuxDevice {
    pub fn open(path: &Path, writable: bool, data_timeout: Duration) -> ScanResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(writable)
            .custom_flags(libc::O_DIRECT)
            .open(path)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => ScanError::NotFound(path.display().to_string()),
                std::io::ErrorKind::PermissionDenied => {
                    ScanError::PermissionDenied(path.display().to_string())
                }
                _ => ScanError::IoError(e),
            })?;

        let mut version: libc::c_int = 0;
        // Safety: the ioctl writes one int into `version`
        let passthrough =
            unsafe { libc::ioctl(file.as_raw_fd(), SG_GET_VERSION_NUM as _, &mut version) } == 0;

        let mut device = Self {
            file,
            path: path.to_path_buf(),
            passthrough,
            read_path: ReadPath::positioned_only(),
            sector_size: 512,
            data_timeout,
        };
        if let Some(geometry) = device.block_geometry()? {
            device.sector_size = geometry.sector_size;
        }
        let max_transfer = device.max_transfer();
        device.read_path = ReadPath::new(passthrough, max_transfer);

        tracing::debug!(
            device = %device.path.display(),
            passthrough,
            sg_version = version,
            sector_size = device.sector_size,
            max_transfer = ?max_transfer,
            "Opened device"
        );
        Ok(device)
    }

    pub fn supports_passthrough(&self) -> bool {
        self.passthrough
    }

    /// Largest single transfer the request queue takes. Block devices
    /// report it in 512-byte sectors, SCSI generic devices in bytes.
    fn max_transfer(&self) -> Option<usize> {
        let fd = self.file.as_raw_fd();
        let is_char = self
            .file
            .metadata()
            .map(|m| m.file_type().is_char_device())
            .unwrap_or(false);
        if is_char {
            let mut bytes: libc::c_int = 0;
            // Safety: the sg driver writes one int
            let ret = unsafe { libc::ioctl(fd, BLKSECTGET as _, &mut bytes) };
            (ret == 0 && bytes > 0).then_some(bytes as usize)
        } else {
            let mut sectors: libc::c_ushort = 0;
            // Safety: the block layer writes one unsigned short
            let ret = unsafe { libc::ioctl(fd, BLKSECTGET as _, &mut sectors) };
            (ret == 0 && sectors > 0).then_some(sectors as usize * 512)
        }
    }

    fn sg_io(
        &self,
        cdb: &CommandBlock,
        direction: DataDirection,
        timeout: Duration,
        data: &mut [u8],
    ) -> ScanResult<CommandResponse> {
        let mut sense = [0u8; MAX_SENSE_LEN];
        let dxfer_direction = match direction {
            DataDirection::None => SG_DXFER_NONE,
            DataDirection::ToDevice => SG_DXFER_TO_DEV,
            DataDirection::FromDevice => SG_DXFER_FROM_DEV,
        };
        let dxfer_len = if direction == DataDirection::None {
            0
        } else {
            data.len()
        };

        let mut hdr = SgIoHdr {
            interface_id: 'S' as libc::c_int,
            dxfer_direction,
            cmd_len: cdb.len() as libc::c_uchar,
            mx_sb_len: sense.len() as libc::c_uchar,
            iovec_count: 0,
            dxfer_len: dxfer_len as libc::c_uint,
            dxferp: data.as_mut_ptr() as *mut libc::c_void,
            cmdp: cdb.as_bytes().as_ptr(),
            sbp: sense.as_mut_ptr(),
            timeout: timeout.as_millis().min(u32::MAX as u128) as libc::c_uint,
            flags: 0,
            pack_id: 0,
            usr_ptr: std::ptr::null_mut(),
            status: 0,
            masked_status: 0,
            msg_status: 0,
            sb_len_wr: 0,
            host_status: 0,
            driver_status: 0,
            resid: 0,
            duration: 0,
            info: 0,
        };

        // Safety: every pointer in hdr refers to a live buffer of the stated
        // length for the duration of the call
        let ret = unsafe { libc::ioctl(self.file.as_raw_fd(), SG_IO as _, &mut hdr as *mut SgIoHdr) };
        if ret < 0 {
            let err = std::io::Error::last_os_error();
            return match err.raw_os_error() {
                Some(libc::ENOTTY) | Some(libc::EINVAL) => Err(ScanError::Unsupported(format!(
                    "{} does not accept SG_IO",
                    self.path.display()
                ))),
                _ => Err(ScanError::IoError(err)),
            };
        }

        let transferred = dxfer_len.saturating_sub(hdr.resid.max(0) as usize);
        let completeness = DataCompleteness::from_transfer(dxfer_len, transferred);

        let outcome = if hdr.host_status == DID_TIME_OUT || hdr.driver_status & 0x0F == DRIVER_TIMEOUT {
            tracing::warn!(device = %self.path.display(), cdb = ?cdb, "Command timed out");
            IoOutcome::fatal()
        } else if hdr.status == SAM_STAT_CHECK_CONDITION
            || (hdr.driver_status & DRIVER_SENSE != 0 && hdr.sb_len_wr > 0)
        {
            IoOutcome::from_sense(&sense[..hdr.sb_len_wr as usize], completeness)
        } else if hdr.host_status != 0 || hdr.driver_status != 0 {
            tracing::warn!(
                device = %self.path.display(),
                host_status = hdr.host_status,
                driver_status = hdr.driver_status,
                "Transport failure"
            );
            IoOutcome::fatal()
        } else if hdr.status != SAM_STAT_GOOD {
            // BUSY, TASK SET FULL and friends
            IoOutcome::with_data(completeness).with_severity(ErrorSeverity::NeedRetry)
        } else {
            IoOutcome::with_data(completeness)
        };

        Ok(CommandResponse {
            transferred,
            outcome,
        })
    }

    /// READ(16) for a sector-aligned transfer.
    fn read_16(&self, offset: u64, buf: &mut [u8]) -> ScanResult<CommandResponse> {
        let sector = self.sector_size as u64;
        if sector == 0 || offset % sector != 0 || buf.len() as u64 % sector != 0 {
            return Err(ScanError::InvalidGeometry(format!(
                "{} byte read at {} is not sector aligned",
                buf.len(),
                offset
            )));
        }
        let cdb = cdb::read_16(
            offset / sector,
            (buf.len() as u64 / sector) as u32,
            TransferFlags::default(),
        );
        self.sg_io(&cdb, DataDirection::FromDevice, self.data_timeout, buf)
    }
}

fn positioned_read(file: &File, offset: u64, buf: &mut [u8]) -> IoOutcome {
    match file.read_at(buf, offset) {
        Ok(n) => IoOutcome::with_data(DataCompleteness::from_transfer(buf.len(), n)),
        Err(e) => IoOutcome::from_os_error(e.raw_os_error().unwrap_or(libc::EIO)),
    }
}

impl DeviceIo for LinuxDevice {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> IoOutcome {
        let mut path = self.read_path;
        let outcome = path.read(
            buf,
            |b| self.read_16(offset, b),
            |b| positioned_read(&self.file, offset, b),
        );
        self.read_path = path;
        outcome
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> IoOutcome {
        match self.file.write_at(buf, offset) {
            Ok(n) => IoOutcome::with_data(DataCompleteness::from_transfer(buf.len(), n)),
            Err(e) => IoOutcome::from_os_error(e.raw_os_error().unwrap_or(libc::EIO)),
        }
    }

    fn submit_command(
        &mut self,
        cdb: &CommandBlock,
        direction: DataDirection,
        timeout: Duration,
        data: &mut [u8],
    ) -> ScanResult<CommandResponse> {
        if !self.passthrough {
            return Err(ScanError::Unsupported(format!(
                "{} has no SCSI pass-through",
                self.path.display()
            )));
        }
        let result = self.sg_io(cdb, direction, timeout, data);
        if let Err(ScanError::Unsupported(_)) = &result {
            self.passthrough = false;
        }
        result
    }

    fn block_geometry(&mut self) -> ScanResult<Option<BlockGeometry>> {
        let meta = self.file.metadata()?;
        if !meta.file_type().is_block_device() {
            if meta.is_file() {
                return Ok(Some(BlockGeometry {
                    size_bytes: meta.len(),
                    sector_size: 512,
                }));
            }
            return Ok(None);
        }

        let fd = self.file.as_raw_fd();
        let mut size: u64 = 0;
        let mut sector: libc::c_int = 0;
        // Safety: each ioctl writes a single integer of the given type
        unsafe {
            if libc::ioctl(fd, BLKGETSIZE64 as _, &mut size) < 0 {
                return Err(std::io::Error::last_os_error().into());
            }
            if libc::ioctl(fd, BLKSSZGET as _, &mut sector) < 0 {
                return Err(std::io::Error::last_os_error().into());
            }
        }
        Ok(Some(BlockGeometry {
            size_bytes: size,
            sector_size: sector.max(0) as u32,
        }))
    }

    fn close(&mut self) -> ScanResult<()> {
        self.file.sync_all().or_else(|e| {
            // Read-only handles on some block devices refuse fsync
            if e.raw_os_error() == Some(libc::EINVAL) || e.raw_os_error() == Some(libc::EBADF) {
                Ok(())
            } else {
                Err(ScanError::IoError(e))
            }
        })
    }
}

/// Opens `LinuxDevice` handles.
#[derive(Debug, Clone)]
pub struct LinuxOpener {
    pub data_timeout: Duration,
}

impl Default for LinuxOpener {
    fn default() -> Self {
        Self {
            data_timeout: Duration::from_secs(60),
        }
    }
}

impl DeviceOpener for LinuxOpener {
    type Device = LinuxDevice;

    fn open(&self, path: &Path, writable: bool) -> ScanResult<LinuxDevice> {
        LinuxDevice::open(path, writable, self.data_timeout)
    }
}
