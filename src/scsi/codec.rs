// Big-endian field access over command and response buffers.
//
// Every accessor slices the buffer before reading, so an out-of-range offset
// panics instead of reading past the end. Parsers check lengths first and
// only call these on ranges they have already validated.

pub fn get_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([buf[at], buf[at + 1]])
}

pub fn get_u24(buf: &[u8], at: usize) -> u32 {
    let b = &buf[at..at + 3];
    (b[0] as u32) << 16 | (b[1] as u32) << 8 | b[2] as u32
}

pub fn get_u32(buf: &[u8], at: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&buf[at..at + 4]);
    u32::from_be_bytes(raw)
}

pub fn get_u64(buf: &[u8], at: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buf[at..at + 8]);
    u64::from_be_bytes(raw)
}

pub fn put_u16(buf: &mut [u8], at: usize, value: u16) {
    buf[at..at + 2].copy_from_slice(&value.to_be_bytes());
}

pub fn put_u24(buf: &mut [u8], at: usize, value: u32) {
    buf[at..at + 3].copy_from_slice(&value.to_be_bytes()[1..]);
}

pub fn put_u32(buf: &mut [u8], at: usize, value: u32) {
    buf[at..at + 4].copy_from_slice(&value.to_be_bytes());
}

pub fn put_u64(buf: &mut [u8], at: usize, value: u64) {
    buf[at..at + 8].copy_from_slice(&value.to_be_bytes());
}

/// Little-endian 16-bit word `index` of an ATA data block.
pub fn ata_word(buf: &[u8], index: usize) -> u16 {
    u16::from_le_bytes([buf[index * 2], buf[index * 2 + 1]])
}

/// Two consecutive ATA words, low word first.
pub fn ata_longword(buf: &[u8], index: usize) -> u32 {
    ata_word(buf, index) as u32 | (ata_word(buf, index + 1) as u32) << 16
}

/// Four consecutive ATA words, low word first.
pub fn ata_qword(buf: &[u8], index: usize) -> u64 {
    ata_longword(buf, index) as u64 | (ata_longword(buf, index + 2) as u64) << 32
}

/// ATA string spanning words `first..=last`.
///
/// Each word holds its two characters swapped. Non-printable bytes become
/// spaces and trailing whitespace is dropped.
pub fn ata_string(buf: &[u8], first: usize, last: usize) -> String {
    let raw = &buf[first * 2..(last + 1) * 2];
    let mut out = String::with_capacity(raw.len());
    for pair in raw.chunks_exact(2) {
        out.push(printable(pair[1]));
        out.push(printable(pair[0]));
    }
    out.truncate(out.trim_end().len());
    out
}

/// Fixed-width ASCII field of a SCSI response, trailing padding removed.
pub fn ascii_field(buf: &[u8], start: usize, end: usize) -> String {
    let text: String = buf[start..end].iter().map(|&b| printable(b)).collect();
    text.trim_end().to_string()
}

fn printable(b: u8) -> char {
    if b.is_ascii_graphic() || b == b' ' {
        b as char
    } else {
        ' '
    }
}
