//! Decoder for the device's binary recording header (`header.tvwiz`).
//!
//! Layout, all integers little-endian, no padding between scalars:
//!
//! ```text
//! offset 0     FileHeader   header, ver, vid_pid, aud_pid, pcr_pid, pmt_pid (u16 each)
//!                           lock, full, in_rec (u8 each)
//! offset 15..  reserved, never interpreted
//! offset 1024  TSPoint      svc[256], evt[256], mjd u16, start u32, last u16, sec u16,
//!                           reserved u32, Offset { last_off u64, file_off [u64; 200] }
//! ```
//!
//! Decoding is a raw transcription: nothing is validated beyond the buffer
//! being long enough for every field that is read.

use chrono::{Days, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use std::fmt;

use crate::error::{ArchiveError, Result};

/// Byte position of the TSPoint record, independent of the FileHeader size.
pub const TS_POINT_OFFSET: usize = 1024;
/// Number of entries in the sparse seek index.
pub const FILE_OFFSET_COUNT: usize = 200;
/// Capacity of the service and event name buffers.
pub const NAME_CAPACITY: usize = 256;

pub const FILE_HEADER_LEN: usize = 6 * 2 + 3;
pub const OFFSET_LEN: usize = 8 + FILE_OFFSET_COUNT * 8;
pub const TS_POINT_LEN: usize = 2 * NAME_CAPACITY + 2 + 4 + 2 + 2 + 4 + OFFSET_LEN;
/// Smallest buffer that holds both records.
pub const MIN_HEADER_LEN: usize = TS_POINT_OFFSET + TS_POINT_LEN;

/// Fixed prefix of the header buffer: stream PIDs and status flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub header: u16,
    pub version: u16,
    pub video_pid: u16,
    pub audio_pid: u16,
    pub pcr_pid: u16,
    pub pmt_pid: u16,
    pub locked: bool,
    pub full: bool,
    pub in_recording: bool,
}

/// Sparse index of byte offsets into the recording's media stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Offset {
    pub last_offset: u64,
    pub file_offsets: [u64; FILE_OFFSET_COUNT],
}

/// Broadcast metadata record found at [`TS_POINT_OFFSET`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TsPoint {
    pub service_raw: [u8; NAME_CAPACITY],
    pub event_raw: [u8; NAME_CAPACITY],
    /// Broadcast date as a Modified Julian Day number.
    pub mjd: u16,
    /// Start time, seconds past midnight UTC on the MJD day.
    pub start: u32,
    pub last: u16,
    pub sec: u16,
    pub offset: Offset,
}

impl TsPoint {
    pub fn service(&self) -> String {
        trim_name(&self.service_raw)
    }

    pub fn event(&self) -> String {
        trim_name(&self.event_raw)
    }

    pub fn broadcast_date(&self) -> NaiveDate {
        mjd_to_date(u32::from(self.mjd))
    }

    /// Broadcast date plus `start`. `None` if the sum overflows chrono's range.
    pub fn broadcast_start(&self) -> Option<NaiveDateTime> {
        let start = TimeDelta::try_seconds(i64::from(self.start))?;
        self.broadcast_date()
            .and_time(NaiveTime::MIN)
            .checked_add_signed(start)
    }
}

/// Render a fixed-capacity name buffer as text.
///
/// The text ends at the first zero byte; anything after it is padding even
/// if it is non-zero. A buffer with no zero byte uses all of its bytes.
pub fn trim_name(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

/// MJD day count to calendar date (epoch 1858-11-17).
pub fn mjd_to_date(days: u32) -> NaiveDate {
    // 1858-11-17 plus u16::MAX days is far inside chrono's range
    mjd_epoch()
        .checked_add_days(Days::new(u64::from(days)))
        .unwrap_or(NaiveDate::MAX)
}

fn mjd_epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1858, 11, 17).unwrap_or(NaiveDate::MIN)
}

pub fn decode_file_header(buf: &[u8]) -> Result<FileHeader> {
    let mut r = ByteReader::new(buf);
    Ok(FileHeader {
        header: r.u16("header")?,
        version: r.u16("ver")?,
        video_pid: r.u16("vid_pid")?,
        audio_pid: r.u16("aud_pid")?,
        pcr_pid: r.u16("pcr_pid")?,
        pmt_pid: r.u16("pmt_pid")?,
        locked: r.u8("lock")? != 0,
        full: r.u8("full")? != 0,
        in_recording: r.u8("in_rec")? != 0,
    })
}

pub fn decode_ts_point(buf: &[u8]) -> Result<TsPoint> {
    let mut r = ByteReader::new(buf);
    r.seek(TS_POINT_OFFSET, "ts_point")?;

    let service_raw = r.array::<NAME_CAPACITY>("svc")?;
    let event_raw = r.array::<NAME_CAPACITY>("evt")?;
    let mjd = r.u16("mjd")?;
    let start = r.u32("start")?;
    let last = r.u16("last")?;
    let sec = r.u16("sec")?;
    r.skip(4, "reserved")?;

    let last_offset = r.u64("last_off")?;
    let mut file_offsets = [0u64; FILE_OFFSET_COUNT];
    for slot in file_offsets.iter_mut() {
        *slot = r.u64("file_off")?;
    }

    Ok(TsPoint {
        service_raw,
        event_raw,
        mjd,
        start,
        last,
        sec,
        offset: Offset {
            last_offset,
            file_offsets,
        },
    })
}

/// Both records of one header buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingHeader {
    pub file: FileHeader,
    pub point: TsPoint,
}

pub fn decode_header(buf: &[u8]) -> Result<RecordingHeader> {
    Ok(RecordingHeader {
        file: decode_file_header(buf)?,
        point: decode_ts_point(buf)?,
    })
}

/// Little-endian cursor that refuses to read past the end of the buffer.
struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, len: usize, field: &str) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .ok_or_else(|| ArchiveError::format(format!("overflow reading {}", field)))?;
        let slice = self.buf.get(self.pos..end).ok_or_else(|| {
            ArchiveError::format(format!(
                "header too short reading {}: need {} bytes, have {}",
                field,
                end,
                self.buf.len()
            ))
        })?;
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self, field: &str) -> Result<[u8; N]> {
        let slice = self.take(N, field)?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    fn seek(&mut self, pos: usize, field: &str) -> Result<()> {
        if pos > self.buf.len() {
            return Err(ArchiveError::format(format!(
                "header too short seeking to {} at {}: have {} bytes",
                field,
                pos,
                self.buf.len()
            )));
        }
        self.pos = pos;
        Ok(())
    }

    fn skip(&mut self, len: usize, field: &str) -> Result<()> {
        self.take(len, field).map(|_| ())
    }

    fn u8(&mut self, field: &str) -> Result<u8> {
        Ok(self.array::<1>(field)?[0])
    }

    fn u16(&mut self, field: &str) -> Result<u16> {
        Ok(u16::from_le_bytes(self.array(field)?))
    }

    fn u32(&mut self, field: &str) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array(field)?))
    }

    fn u64(&mut self, field: &str) -> Result<u64> {
        Ok(u64::from_le_bytes(self.array(field)?))
    }
}

impl fmt::Display for FileHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Header: {:#06x}, Ver: {}, VidPid: {}, AudPid: {}, PcrPid: {}, PmtPid: {}, Lock: {}, Full: {}, InRec: {}",
            self.header,
            self.version,
            self.video_pid,
            self.audio_pid,
            self.pcr_pid,
            self.pmt_pid,
            self.locked,
            self.full,
            self.in_recording
        )
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let used = self.file_offsets.iter().filter(|&&o| o != 0).count();
        write!(
            f,
            "Off Last: {:x}, FileOff: {} of {} set",
            self.last_offset, used, FILE_OFFSET_COUNT
        )
    }
}

impl fmt::Display for TsPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Svc: {}, Evt: {}, MJD: {} ({}), Start: {:x}, Last: {}, Sec: {}, Offset: {}",
            self.service(),
            self.event(),
            self.mjd,
            self.broadcast_date(),
            self.start,
            self.last,
            self.sec,
            self.offset
        )
    }
}
