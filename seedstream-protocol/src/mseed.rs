//! miniSEED record boundary detection and header summaries.
//!
//! SeedLink servers frame whatever records they have on hand: miniSEED 2.x
//! in either byte order, or miniSEED 3. [`detect`] identifies the record at
//! the head of a buffer and returns its exact length without assuming the
//! buffer holds the whole record. [`RecordSummary`] extracts the header
//! fields the engine and the archive router need; sample decoding is left
//! to an external library.

use crate::error::{ProtocolError, Result};

/// Shortest record the detector will confirm (one 2.x fixed section).
pub const MIN_RECLEN: usize = 48;
/// Longest record any known server emits.
pub const MAX_RECLEN: usize = 4096;

const FSDH_LEN: usize = 48;
const MS3_FIXED_LEN: usize = 40;

/// Outcome of record detection on a (possibly partial) buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RecordCheck {
    /// The buffer head is not a miniSEED record.
    Invalid,
    /// More bytes are needed before a verdict is possible.
    Incomplete,
    /// A record starts at the buffer head with exactly this length.
    Complete(usize),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Endian {
    Big,
    Little,
}

fn read_u16(buf: &[u8], offset: usize, endian: Endian) -> u16 {
    let raw = [buf[offset], buf[offset + 1]];
    match endian {
        Endian::Big => u16::from_be_bytes(raw),
        Endian::Little => u16::from_le_bytes(raw),
    }
}

fn plausible_time(year: u16, doy: u16) -> bool {
    (1900..=2050).contains(&year) && (1..=366).contains(&doy)
}

/// Check for a 2.x fixed section at the head of `buf` (≥ 24 bytes) and
/// infer its byte order from the start-time fields.
fn sniff_fsdh(buf: &[u8]) -> Option<Endian> {
    if !buf[0..6].iter().all(u8::is_ascii_digit) {
        return None;
    }
    if !matches!(buf[6], b'D' | b'R' | b'Q' | b'M') {
        return None;
    }
    for endian in [Endian::Big, Endian::Little] {
        let year = read_u16(buf, 20, endian);
        let doy = read_u16(buf, 22, endian);
        if plausible_time(year, doy) {
            return Some(endian);
        }
    }
    None
}

/// Identify the miniSEED record at the head of `buf` and return its length.
///
/// Both format 3 and format 2.x (either byte order) are recognized. For 2.x
/// records without a blockette 1000 the length is recovered by scanning for
/// the next fixed section at 64-byte offsets.
pub fn detect(buf: &[u8]) -> RecordCheck {
    if buf.len() < MIN_RECLEN {
        return RecordCheck::Incomplete;
    }

    // Format 3: fixed little-endian layout, explicit lengths.
    if &buf[0..2] == b"MS" {
        if buf[2] != 3 {
            return RecordCheck::Invalid;
        }
        let sid_len = buf[33] as usize;
        let extra_len = u16::from_le_bytes([buf[34], buf[35]]) as usize;
        let payload_len =
            u32::from_le_bytes([buf[36], buf[37], buf[38], buf[39]]) as usize;
        let total = MS3_FIXED_LEN + sid_len + extra_len + payload_len;
        if sid_len == 0 || total < MIN_RECLEN || total > MAX_RECLEN {
            return RecordCheck::Invalid;
        }
        return RecordCheck::Complete(total);
    }

    // Format 2.x: validate the fixed section and infer byte order.
    let Some(endian) = sniff_fsdh(buf) else {
        return RecordCheck::Invalid;
    };

    // Walk the blockette chain looking for a 1000.
    let mut offset = read_u16(buf, 46, endian) as usize;
    while offset != 0 {
        if offset + 4 > buf.len() {
            return RecordCheck::Incomplete;
        }
        let blockette_type = read_u16(buf, offset, endian);
        let next = read_u16(buf, offset + 2, endian) as usize;
        if blockette_type == 1000 {
            if offset + 7 > buf.len() {
                return RecordCheck::Incomplete;
            }
            let exponent = buf[offset + 6] as u32;
            if exponent >= usize::BITS {
                return RecordCheck::Invalid;
            }
            let length = 1usize << exponent;
            if !(MIN_RECLEN..=MAX_RECLEN).contains(&length) {
                return RecordCheck::Invalid;
            }
            return RecordCheck::Complete(length);
        }
        if next == 0 {
            break;
        }
        if next <= offset + 4 {
            return RecordCheck::Invalid;
        }
        offset = next;
    }

    // No blockette 1000: resynchronize on the next fixed section, which can
    // only start at a 64-byte offset.
    let mut pos = 64;
    while pos <= MAX_RECLEN {
        if pos + FSDH_LEN > buf.len() {
            return RecordCheck::Incomplete;
        }
        if sniff_fsdh(&buf[pos..]).is_some() {
            return RecordCheck::Complete(pos);
        }
        pos += 64;
    }
    RecordCheck::Invalid
}

/// Return the data payload section of a detected record, or an empty slice
/// when the header is unreadable. Used for the XML body of INFO records.
pub fn data_payload(rec: &[u8]) -> &[u8] {
    if rec.len() >= 2 && &rec[0..2] == b"MS" {
        if rec.len() < MS3_FIXED_LEN {
            return &[];
        }
        let sid_len = rec[33] as usize;
        let extra_len = u16::from_le_bytes([rec[34], rec[35]]) as usize;
        let start = MS3_FIXED_LEN + sid_len + extra_len;
        return rec.get(start..).unwrap_or(&[]);
    }
    if rec.len() < FSDH_LEN {
        return &[];
    }
    let Some(endian) = sniff_fsdh(rec) else {
        return &[];
    };
    let start = read_u16(rec, 44, endian) as usize;
    if start < FSDH_LEN {
        return &[];
    }
    rec.get(start..).unwrap_or(&[])
}

/// Record start time as stored in the header.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RecordTime {
    pub year: u16,
    /// Day of year, 1-based.
    pub doy: u16,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    /// Fractional seconds in units of 0.1 ms.
    pub fract: u16,
}

fn is_leap(year: u16) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

const MONTH_DAYS: [u16; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];

impl RecordTime {
    /// Convert day-of-year to calendar month and day.
    pub fn month_day(&self) -> (u8, u8) {
        let mut remaining = self.doy;
        for (idx, base_days) in MONTH_DAYS.iter().enumerate() {
            let mut days = *base_days;
            if idx == 1 && is_leap(self.year) {
                days += 1;
            }
            if remaining <= days {
                return (idx as u8 + 1, remaining as u8);
            }
            remaining -= days;
        }
        (12, 31)
    }

    /// Format as the protocol's calendar form, `YYYY,MM,DD,HH,MM,SS`.
    pub fn to_command_time(&self) -> String {
        let (month, day) = self.month_day();
        format!(
            "{:04},{:02},{:02},{:02},{:02},{:02}",
            self.year, month, day, self.hour, self.minute, self.second
        )
    }
}

/// Record classification carried into archive path `%t` tokens.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Data,
    Event,
    Calibration,
    Timing,
    Log,
    Opaque,
    /// Terminated INFO response record.
    Info,
    /// INFO response record awaiting its terminator.
    InfoIncomplete,
    Unknown,
}

impl RecordKind {
    pub fn code(self) -> char {
        match self {
            Self::Data => 'D',
            Self::Event => 'E',
            Self::Calibration => 'C',
            Self::Timing => 'T',
            Self::Log => 'L',
            Self::Opaque => 'O',
            Self::Info => 'I',
            Self::InfoIncomplete => 'U',
            Self::Unknown => '?',
        }
    }
}

/// Format version of a detected record.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RecordFormat {
    V2,
    V3,
}

/// The header fields of one record: stream identity, start time and type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordSummary {
    pub network: String,
    pub station: String,
    pub location: String,
    pub channel: String,
    pub start: RecordTime,
    pub kind: RecordKind,
    pub format: RecordFormat,
}

impl RecordSummary {
    pub fn parse(rec: &[u8]) -> Result<Self> {
        if rec.len() >= 2 && &rec[0..2] == b"MS" {
            return Self::parse_v3(rec);
        }
        Self::parse_v2(rec)
    }

    fn parse_v2(rec: &[u8]) -> Result<Self> {
        if rec.len() < FSDH_LEN {
            return Err(ProtocolError::InvalidRecord("short fixed section".into()));
        }
        let endian = sniff_fsdh(rec)
            .ok_or_else(|| ProtocolError::InvalidRecord("unreadable fixed section".into()))?;

        let field = |range: std::ops::Range<usize>| {
            String::from_utf8_lossy(&rec[range]).trim().to_owned()
        };

        let start = RecordTime {
            year: read_u16(rec, 20, endian),
            doy: read_u16(rec, 22, endian),
            hour: rec[24],
            minute: rec[25],
            second: rec[26],
            fract: read_u16(rec, 28, endian),
        };

        Ok(Self {
            network: field(18..20),
            station: field(8..13),
            location: field(13..15),
            channel: field(15..18),
            start,
            kind: classify_v2(rec, endian),
            format: RecordFormat::V2,
        })
    }

    fn parse_v3(rec: &[u8]) -> Result<Self> {
        if rec.len() < MS3_FIXED_LEN {
            return Err(ProtocolError::InvalidRecord("short fixed header".into()));
        }
        let sid_len = rec[33] as usize;
        let sid_bytes = rec
            .get(MS3_FIXED_LEN..MS3_FIXED_LEN + sid_len)
            .ok_or_else(|| ProtocolError::InvalidRecord("truncated identifier".into()))?;
        let sid = std::str::from_utf8(sid_bytes)
            .map_err(|_| ProtocolError::InvalidRecord("identifier is not UTF-8".into()))?;

        let sid = sid.strip_prefix("FDSN:").unwrap_or(sid);
        let mut parts = sid.split('_');
        let network = parts.next().unwrap_or("").to_owned();
        let station = parts.next().unwrap_or("").to_owned();
        let location = parts.next().unwrap_or("").to_owned();
        let channel: String = parts.collect();

        let nanosecond = u32::from_le_bytes([rec[4], rec[5], rec[6], rec[7]]);
        let start = RecordTime {
            year: u16::from_le_bytes([rec[8], rec[9]]),
            doy: u16::from_le_bytes([rec[10], rec[11]]),
            hour: rec[12],
            minute: rec[13],
            second: rec[14],
            fract: (nanosecond / 100_000) as u16,
        };

        Ok(Self {
            network,
            station,
            location,
            channel,
            start,
            kind: RecordKind::Data,
            format: RecordFormat::V3,
        })
    }

    /// Start time formatted `YYYY,MM,DD,HH,MM,SS`.
    pub fn start_time(&self) -> String {
        self.start.to_command_time()
    }
}

/// Type classification for 2.x records: first matching blockette wins, a
/// zero sample-rate factor without one marks a log record.
fn classify_v2(rec: &[u8], endian: Endian) -> RecordKind {
    let mut offset = read_u16(rec, 46, endian) as usize;
    let mut hops = 0;
    while offset != 0 && offset + 4 <= rec.len() && hops < 16 {
        let blockette_type = read_u16(rec, offset, endian);
        match blockette_type {
            200 | 201 => return RecordKind::Event,
            300 | 310 | 320 | 390 | 395 => return RecordKind::Calibration,
            500 => return RecordKind::Timing,
            2000 => return RecordKind::Opaque,
            _ => {}
        }
        let next = read_u16(rec, offset + 2, endian) as usize;
        if next <= offset {
            break;
        }
        offset = next;
        hops += 1;
    }
    let factor = read_u16(rec, 32, endian) as i16;
    if factor == 0 {
        RecordKind::Log
    } else {
        RecordKind::Data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a 2.x record with a blockette 1000 carrying `exponent`.
    fn ms2_record(exponent: u8, endian: Endian) -> Vec<u8> {
        let reclen = 1usize << exponent;
        let mut rec = vec![0u8; reclen];
        fill_fsdh(&mut rec, "ANMO", "IU", "BHZ", endian);
        rec[39] = 1; // one blockette follows
        put_u16(&mut rec, 46, 48, endian); // blockette chain start
        put_u16(&mut rec, 48, 1000, endian);
        put_u16(&mut rec, 50, 0, endian);
        rec[52] = 10; // encoding
        rec[53] = if endian == Endian::Big { 1 } else { 0 };
        rec[54] = exponent;
        rec
    }

    fn fill_fsdh(rec: &mut [u8], sta: &str, net: &str, chan: &str, endian: Endian) {
        rec[0..6].copy_from_slice(b"000001");
        rec[6] = b'D';
        rec[7] = b' ';
        pad(&mut rec[8..13], sta);
        pad(&mut rec[13..15], "");
        pad(&mut rec[15..18], chan);
        pad(&mut rec[18..20], net);
        put_u16(rec, 20, 2024, endian);
        put_u16(rec, 22, 122, endian);
        rec[24] = 10;
        rec[25] = 30;
        rec[26] = 45;
        put_u16(rec, 28, 1234, endian);
        put_u16(rec, 30, 100, endian); // sample count
        put_u16(rec, 32, 20, endian); // sample rate factor
        put_u16(rec, 44, 64, endian); // data offset
    }

    fn pad(dst: &mut [u8], s: &str) {
        for (i, slot) in dst.iter_mut().enumerate() {
            *slot = s.as_bytes().get(i).copied().unwrap_or(b' ');
        }
    }

    fn put_u16(rec: &mut [u8], offset: usize, value: u16, endian: Endian) {
        let bytes = match endian {
            Endian::Big => value.to_be_bytes(),
            Endian::Little => value.to_le_bytes(),
        };
        rec[offset..offset + 2].copy_from_slice(&bytes);
    }

    /// Build a minimal format-3 record.
    fn ms3_record(sid: &str, extra_len: usize, payload_len: usize) -> Vec<u8> {
        let mut rec = vec![0u8; MS3_FIXED_LEN + sid.len() + extra_len + payload_len];
        rec[0..2].copy_from_slice(b"MS");
        rec[2] = 3;
        rec[4..8].copy_from_slice(&123_400_000u32.to_le_bytes()); // nanoseconds
        rec[8..10].copy_from_slice(&2024u16.to_le_bytes());
        rec[10..12].copy_from_slice(&122u16.to_le_bytes());
        rec[12] = 10;
        rec[13] = 30;
        rec[14] = 45;
        rec[33] = sid.len() as u8;
        rec[34..36].copy_from_slice(&(extra_len as u16).to_le_bytes());
        rec[36..40].copy_from_slice(&(payload_len as u32).to_le_bytes());
        rec[MS3_FIXED_LEN..MS3_FIXED_LEN + sid.len()].copy_from_slice(sid.as_bytes());
        rec
    }

    #[test]
    fn detect_512_big_endian() {
        let rec = ms2_record(9, Endian::Big);
        assert_eq!(detect(&rec), RecordCheck::Complete(512));
    }

    #[test]
    fn detect_512_little_endian() {
        let rec = ms2_record(9, Endian::Little);
        assert_eq!(detect(&rec), RecordCheck::Complete(512));
    }

    #[test]
    fn detect_max_record_length() {
        // Exponent 12 → 4096, the largest accepted length. The blockette is
        // readable long before the full record arrives.
        let rec = ms2_record(12, Endian::Big);
        assert_eq!(detect(&rec[..256]), RecordCheck::Complete(4096));
    }

    #[test]
    fn detect_oversized_record_rejected() {
        let mut rec = ms2_record(9, Endian::Big);
        rec[54] = 13; // 8192
        assert_eq!(detect(&rec), RecordCheck::Invalid);
    }

    #[test]
    fn detect_undersized_record_rejected() {
        let mut rec = ms2_record(9, Endian::Big);
        rec[54] = 5; // 32
        assert_eq!(detect(&rec), RecordCheck::Invalid);
    }

    #[test]
    fn detect_short_buffer_incomplete() {
        let rec = ms2_record(9, Endian::Big);
        assert_eq!(detect(&rec[..47]), RecordCheck::Incomplete);
    }

    #[test]
    fn detect_garbage_invalid() {
        let junk = vec![0xAB; 64];
        assert_eq!(detect(&junk), RecordCheck::Invalid);
    }

    #[test]
    fn detect_bad_quality_byte_invalid() {
        let mut rec = ms2_record(9, Endian::Big);
        rec[6] = b'X';
        assert_eq!(detect(&rec), RecordCheck::Invalid);
    }

    #[test]
    fn detect_implausible_year_invalid() {
        let mut rec = ms2_record(9, Endian::Big);
        put_u16(&mut rec, 20, 1, Endian::Big);
        assert_eq!(detect(&rec), RecordCheck::Invalid);
    }

    #[test]
    fn detect_resync_without_blockette_1000() {
        // 256-byte record with no blockettes, followed by a valid fixed
        // section: the gap to the next header is the record length.
        let mut buf = vec![0u8; 256 + 64];
        fill_fsdh(&mut buf, "HGN", "NL", "BHZ", Endian::Big);
        let mut tail = vec![0u8; 64];
        fill_fsdh(&mut tail, "HGN", "NL", "BHZ", Endian::Big);
        buf[256..].copy_from_slice(&tail);
        assert_eq!(detect(&buf), RecordCheck::Complete(256));
    }

    #[test]
    fn detect_resync_needs_more_bytes() {
        let mut buf = vec![0u8; 128];
        fill_fsdh(&mut buf, "HGN", "NL", "BHZ", Endian::Big);
        assert_eq!(detect(&buf), RecordCheck::Incomplete);
    }

    #[test]
    fn detect_ms3() {
        let rec = ms3_record("FDSN:IU_ANMO_00_B_H_Z", 0, 64);
        assert_eq!(detect(&rec), RecordCheck::Complete(rec.len()));
    }

    #[test]
    fn detect_ms3_wrong_version() {
        let mut rec = ms3_record("FDSN:IU_ANMO_00_B_H_Z", 0, 64);
        rec[2] = 2;
        assert_eq!(detect(&rec), RecordCheck::Invalid);
    }

    #[test]
    fn detect_ms3_oversized() {
        let mut rec = ms3_record("FDSN:IU_ANMO_00_B_H_Z", 0, 64);
        rec[36..40].copy_from_slice(&8192u32.to_le_bytes());
        assert_eq!(detect(&rec), RecordCheck::Invalid);
    }

    #[test]
    fn summary_v2_fields() {
        let rec = ms2_record(9, Endian::Big);
        let summary = RecordSummary::parse(&rec).unwrap();
        assert_eq!(summary.network, "IU");
        assert_eq!(summary.station, "ANMO");
        assert_eq!(summary.location, "");
        assert_eq!(summary.channel, "BHZ");
        assert_eq!(summary.kind, RecordKind::Data);
        assert_eq!(summary.format, RecordFormat::V2);
        assert_eq!(summary.start_time(), "2024,05,01,10,30,45");
    }

    #[test]
    fn summary_v2_little_endian_same_fields() {
        let be = RecordSummary::parse(&ms2_record(9, Endian::Big)).unwrap();
        let le = RecordSummary::parse(&ms2_record(9, Endian::Little)).unwrap();
        assert_eq!(be, le);
    }

    #[test]
    fn summary_v2_log_record() {
        let mut rec = ms2_record(9, Endian::Big);
        put_u16(&mut rec, 32, 0, Endian::Big); // sample rate factor 0
        let summary = RecordSummary::parse(&rec).unwrap();
        assert_eq!(summary.kind, RecordKind::Log);
    }

    #[test]
    fn summary_v2_event_record() {
        let mut rec = ms2_record(9, Endian::Big);
        // Chain: B1000 at 48 → B200 at 56.
        put_u16(&mut rec, 50, 56, Endian::Big);
        put_u16(&mut rec, 56, 200, Endian::Big);
        put_u16(&mut rec, 58, 0, Endian::Big);
        let summary = RecordSummary::parse(&rec).unwrap();
        assert_eq!(summary.kind, RecordKind::Event);
    }

    #[test]
    fn summary_v3_fields() {
        let rec = ms3_record("FDSN:IU_ANMO_00_B_H_Z", 0, 64);
        let summary = RecordSummary::parse(&rec).unwrap();
        assert_eq!(summary.network, "IU");
        assert_eq!(summary.station, "ANMO");
        assert_eq!(summary.location, "00");
        assert_eq!(summary.channel, "BHZ");
        assert_eq!(summary.format, RecordFormat::V3);
        assert_eq!(summary.start.fract, 1234);
        assert_eq!(summary.start_time(), "2024,05,01,10,30,45");
    }

    #[test]
    fn data_payload_v2() {
        let rec = ms2_record(9, Endian::Big);
        assert_eq!(data_payload(&rec).len(), 512 - 64);
    }

    #[test]
    fn month_day_conversion() {
        let t = |doy| RecordTime {
            year: 2024,
            doy,
            hour: 0,
            minute: 0,
            second: 0,
            fract: 0,
        };
        assert_eq!(t(1).month_day(), (1, 1));
        assert_eq!(t(60).month_day(), (2, 29)); // leap year
        assert_eq!(t(122).month_day(), (5, 1));
        assert_eq!(t(366).month_day(), (12, 31));

        let non_leap = RecordTime {
            year: 2023,
            doy: 60,
            hour: 0,
            minute: 0,
            second: 0,
            fract: 0,
        };
        assert_eq!(non_leap.month_day(), (3, 1));
    }

    #[test]
    fn record_kind_codes() {
        assert_eq!(RecordKind::Data.code(), 'D');
        assert_eq!(RecordKind::Event.code(), 'E');
        assert_eq!(RecordKind::Calibration.code(), 'C');
        assert_eq!(RecordKind::Timing.code(), 'T');
        assert_eq!(RecordKind::Log.code(), 'L');
        assert_eq!(RecordKind::Opaque.code(), 'O');
        assert_eq!(RecordKind::Info.code(), 'I');
        assert_eq!(RecordKind::InfoIncomplete.code(), 'U');
        assert_eq!(RecordKind::Unknown.code(), '?');
    }
}
