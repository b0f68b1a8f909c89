//! Intel HEX program image loader.
//!
//! Records look like `:LLAAAATT[DD...]CC`. Data records (`00`) are written
//! into the flash image, `01` ends the file, `02`/`04` set the upper address
//! bits so images above 64 KB (ATmega2560) land where they belong. Start
//! address records (`03`, `05`) carry nothing to load.
//!
//! [`load_hex`] is the lenient loader used by the simulator: checksums are
//! not verified and lines that do not parse are skipped and counted.
//! [`parse_hex_strict`] rejects both.

use tracing::{debug, warn};

use crate::error::HexError;

/// What the lenient loader did with its input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HexSummary {
    /// Data bytes written into the image.
    pub bytes_written: usize,
    /// One past the highest image address written.
    pub highest_address: usize,
    /// Lines that looked like records but could not be parsed.
    pub skipped_lines: usize,
    /// Data bytes that fell outside the image.
    pub dropped_bytes: usize,
}

/// A decoded record, before its data is applied.
struct Record {
    kind: u8,
    addr: u16,
    data: Vec<u8>,
    checksum_ok: bool,
}

fn hex_digit(c: u8, line: usize) -> Result<u8, HexError> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        b'A'..=b'F' => Ok(c - b'A' + 10),
        _ => Err(HexError::InvalidDigit { line, digit: c as char }),
    }
}

fn parse_record(text: &str, line: usize) -> Result<Record, HexError> {
    let body = text.strip_prefix(':').ok_or(HexError::MissingColon { line })?;
    let digits = body.as_bytes();
    if digits.len() % 2 != 0 {
        return Err(HexError::OddLength { line });
    }
    let bytes = digits
        .chunks(2)
        .map(|pair| Ok((hex_digit(pair[0], line)? << 4) | hex_digit(pair[1], line)?))
        .collect::<Result<Vec<u8>, HexError>>()?;

    // length, address (2), type, checksum
    if bytes.len() < 5 {
        return Err(HexError::TooShort { line });
    }
    let len = bytes[0] as usize;
    if bytes.len() < 5 + len {
        return Err(HexError::TooShort { line });
    }
    let sum = bytes[..5 + len].iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    Ok(Record {
        kind: bytes[3],
        addr: u16::from_be_bytes([bytes[1], bytes[2]]),
        data: bytes[4..4 + len].to_vec(),
        checksum_ok: sum == 0,
    })
}

/// Tracks the extended address base and writes data records.
struct Loader<'a> {
    image: &'a mut [u8],
    base: u32,
    summary: HexSummary,
}

impl<'a> Loader<'a> {
    fn new(image: &'a mut [u8]) -> Self {
        Loader { image, base: 0, summary: HexSummary::default() }
    }

    /// Applies a record; returns false on end-of-file.
    fn apply(&mut self, rec: &Record) -> bool {
        match rec.kind {
            0x00 => {
                let start = self.base as usize + rec.addr as usize;
                for (i, &b) in rec.data.iter().enumerate() {
                    let target = start + i;
                    match self.image.get_mut(target) {
                        Some(slot) => {
                            *slot = b;
                            self.summary.bytes_written += 1;
                            self.summary.highest_address = self.summary.highest_address.max(target + 1);
                        }
                        None => self.summary.dropped_bytes += 1,
                    }
                }
            }
            0x01 => return false,
            0x02 if rec.data.len() >= 2 => {
                self.base = (u16::from_be_bytes([rec.data[0], rec.data[1]]) as u32) << 4;
            }
            0x04 if rec.data.len() >= 2 => {
                self.base = (u16::from_be_bytes([rec.data[0], rec.data[1]]) as u32) << 16;
            }
            _ => {}
        }
        true
    }
}

/// Load an Intel HEX string into `image`, skipping anything malformed.
///
/// Bytes not covered by a data record keep their previous value.
pub fn load_hex(hex: &str, image: &mut [u8]) -> HexSummary {
    let mut loader = Loader::new(image);
    for (idx, line) in hex.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match parse_record(line, idx + 1) {
            Ok(rec) => {
                if !loader.apply(&rec) {
                    break;
                }
            }
            Err(e) => {
                debug!("skipping HEX line: {}", e);
                loader.summary.skipped_lines += 1;
            }
        }
    }
    let summary = loader.summary;
    if summary.dropped_bytes > 0 {
        warn!(
            "{} HEX data bytes fall outside the {} byte image",
            summary.dropped_bytes,
            image.len()
        );
    }
    debug!(
        "loaded {} bytes (top 0x{:X}), {} lines skipped",
        summary.bytes_written, summary.highest_address, summary.skipped_lines
    );
    summary
}

/// Strict loader: any malformed line or checksum mismatch is an error.
///
/// Returns the number of bytes loaded (highest address reached).
pub fn parse_hex_strict(hex: &str, image: &mut [u8]) -> Result<usize, HexError> {
    let mut loader = Loader::new(image);
    for (idx, line) in hex.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let rec = parse_record(line, idx + 1)?;
        if !rec.checksum_ok {
            let sum = line_sum(&rec);
            return Err(HexError::Checksum { line: idx + 1, sum });
        }
        if !loader.apply(&rec) {
            break;
        }
    }
    Ok(loader.summary.highest_address)
}

fn line_sum(rec: &Record) -> u8 {
    let header = [rec.data.len() as u8, (rec.addr >> 8) as u8, rec.addr as u8, rec.kind];
    header.iter().chain(rec.data.iter()).fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Encode `data` as Intel HEX data records starting at `addr`, followed by
/// an end-of-file record. Addresses above 64 KB get an extended linear
/// address record.
pub fn encode_hex(addr: u32, data: &[u8]) -> String {
    let mut out = String::new();
    let mut upper: Option<u16> = None;
    for (i, chunk) in data.chunks(16).enumerate() {
        let at = addr + (i * 16) as u32;
        let hi = (at >> 16) as u16;
        if upper != Some(hi) && (hi != 0 || upper.is_some()) {
            push_record(&mut out, 0, 0x04, &hi.to_be_bytes());
        }
        upper = Some(hi);
        push_record(&mut out, at as u16, 0x00, chunk);
    }
    push_record(&mut out, 0, 0x01, &[]);
    out
}

fn push_record(out: &mut String, addr: u16, kind: u8, data: &[u8]) {
    let mut bytes = vec![data.len() as u8, (addr >> 8) as u8, addr as u8, kind];
    bytes.extend_from_slice(data);
    let sum = bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    bytes.push(sum.wrapping_neg());
    out.push(':');
    for b in bytes {
        out.push_str(&format!("{:02X}", b));
    }
    out.push('\n');
}
