//! A bounds-checked cursor over one fetched piece of an archive.
//!
//! We never see the whole archive at once, just byte ranges of it.
//! A [`Cursor`] remembers where its range started in the file
//! (its _global offset_) so that absolute offsets stored in the archive,
//! like the one in the Zip64 end of central directory locator,
//! can be mapped back onto the buffer.

use std::borrow::Cow;
use std::ops::Range;

use chrono::{Duration, Months, NaiveDate, NaiveDateTime};
use memchr::memmem;

use crate::arch;
use crate::result::*;

/// Bytes fetched from some range of an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Buffer {
    /// Plain bytes
    Bytes(Vec<u8>),
    /// A "binary string": one byte per `char`,
    /// as produced by legacy text-mode file APIs.
    /// Only the low eight bits of each `char` are meaningful.
    Text(Vec<char>),
}

impl Buffer {
    pub fn from_binary_string(s: &str) -> Self {
        Buffer::Text(s.chars().collect())
    }

    pub fn len(&self) -> usize {
        match self {
            Buffer::Bytes(b) => b.len(),
            Buffer::Text(t) => t.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn byte_at(&self, i: usize) -> Option<u8> {
        match self {
            Buffer::Bytes(b) => b.get(i).copied(),
            Buffer::Text(t) => t.get(i).map(|&c| text_byte(c)),
        }
    }

    fn slice(&self, range: Range<usize>) -> Option<Cow<'_, [u8]>> {
        match self {
            Buffer::Bytes(b) => b.get(range).map(Cow::Borrowed),
            Buffer::Text(t) => t
                .get(range)
                .map(|chars| Cow::Owned(chars.iter().map(|&c| text_byte(c)).collect())),
        }
    }
}

fn text_byte(c: char) -> u8 {
    // Truncation intended: each char stands in for a single byte.
    c as u32 as u8
}

impl From<Vec<u8>> for Buffer {
    fn from(bytes: Vec<u8>) -> Self {
        Buffer::Bytes(bytes)
    }
}

impl From<&[u8]> for Buffer {
    fn from(bytes: &[u8]) -> Self {
        Buffer::Bytes(bytes.to_vec())
    }
}

/// A read position in a [`Buffer`] that came from `global_offset` in the archive.
///
/// Every read is bounds-checked,
/// and a read that would leave the buffer fails with [`ZipError::EndOfData`]
/// instead of clamping.
#[derive(Debug)]
pub struct Cursor {
    buffer: Buffer,
    index: usize,
    global_offset: u64,
}

impl Cursor {
    pub fn new<B: Into<Buffer>>(buffer: B, global_offset: u64) -> Self {
        Self {
            buffer: buffer.into(),
            index: 0,
            global_offset,
        }
    }

    /// Length of the underlying buffer
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// The current (local) index into the buffer
    pub fn index(&self) -> usize {
        self.index
    }

    /// Where the buffer starts in the archive
    pub fn global_offset(&self) -> u64 {
        self.global_offset
    }

    /// The current index as an absolute archive offset
    pub fn global_index(&self) -> u64 {
        self.global_offset + arch::offset(self.index)
    }

    /// Bytes left between the index and the end of the buffer
    pub fn remaining(&self) -> usize {
        self.len() - self.index
    }

    /// Whether the absolute archive offset falls inside this buffer.
    pub fn contains_global(&self, offset: u64) -> bool {
        offset >= self.global_offset && offset - self.global_offset < arch::offset(self.len())
    }

    fn end_of_data(&self, requested: i64) -> ZipError {
        ZipError::EndOfData {
            length: self.len(),
            requested,
        }
    }

    /// Moves to the given local index.
    pub fn set_index(&mut self, index: usize) -> ZipResult<()> {
        if index > self.len() {
            return Err(self.end_of_data(signed(arch::offset(index))));
        }
        self.index = index;
        Ok(())
    }

    /// Moves to the given absolute archive offset.
    pub fn set_global_index(&mut self, offset: u64) -> ZipResult<()> {
        match offset.checked_sub(self.global_offset) {
            Some(local) => {
                let local = arch::usize(local).map_err(|_| self.end_of_data(signed(local)))?;
                self.set_index(local)
            }
            None => Err(self.end_of_data(-signed(self.global_offset - offset))),
        }
    }

    /// Skips the next `n` bytes.
    pub fn skip(&mut self, n: usize) -> ZipResult<()> {
        let target = self.advance(n)?;
        self.index = target;
        Ok(())
    }

    /// Returns the index `n` bytes ahead, if that's still in the buffer.
    fn advance(&self, n: usize) -> ZipResult<usize> {
        match self.index.checked_add(n) {
            Some(target) if target <= self.len() => Ok(target),
            Some(target) => Err(self.end_of_data(signed(arch::offset(target)))),
            None => Err(self.end_of_data(i64::MAX)),
        }
    }

    /// Gets the byte at the given local index without moving.
    pub fn byte_at(&self, i: usize) -> ZipResult<u8> {
        self.buffer
            .byte_at(i)
            .ok_or_else(|| self.end_of_data(signed(arch::offset(i))))
    }

    /// Reads a little-endian unsigned integer of `size` bytes (1 through 8).
    fn read_uint(&mut self, size: usize) -> ZipResult<u64> {
        debug_assert!((1..=8).contains(&size), "can't read a {size}-byte integer");
        let bytes = self.read_bytes(size)?;
        Ok(bytes
            .iter()
            .rev()
            .fold(0u64, |acc, &b| (acc << 8) | u64::from(b)))
    }

    pub fn read_u16(&mut self) -> ZipResult<u16> {
        Ok(self.read_uint(2)? as u16)
    }

    pub fn read_u32(&mut self) -> ZipResult<u32> {
        Ok(self.read_uint(4)? as u32)
    }

    /// Reads a little-endian u64.
    ///
    /// (Readers without native 64-bit integers have to stitch this together
    /// from two 32-bit words. We don't.)
    pub fn read_u64(&mut self) -> ZipResult<u64> {
        self.read_uint(8)
    }

    /// Reads the next `size` bytes, undecoded.
    pub fn read_bytes(&mut self, size: usize) -> ZipResult<Cow<'_, [u8]>> {
        let end = self.advance(size)?;
        let start = std::mem::replace(&mut self.index, end);
        self.buffer
            .slice(start..end)
            .ok_or_else(|| self.end_of_data(signed(arch::offset(end))))
    }

    /// Reads a four-byte record signature.
    pub fn read_magic(&mut self) -> ZipResult<[u8; 4]> {
        let bytes = self.read_bytes(4)?;
        let mut magic = [0; 4];
        magic.copy_from_slice(&bytes);
        Ok(magic)
    }

    /// Reads a four-byte signature and checks that it's the one we expect.
    pub fn expect_magic(&mut self, expected: [u8; 4]) -> ZipResult<()> {
        let found = self.read_magic()?;
        if found != expected {
            return Err(FormatError::BadSignature {
                expected: Magic(expected),
                found: Magic(found),
            }
            .into());
        }
        Ok(())
    }

    /// Reads an MS-DOS time and date (in that order, two bytes each).
    pub fn read_timestamp(&mut self) -> ZipResult<NaiveDateTime> {
        let time = self.read_u16()?;
        let date = self.read_u16()?;
        // Every MS-DOS date (1980 through 2107) is in chrono's range;
        // this only guards against that range shrinking.
        parse_msdos(time, date)
            .ok_or_else(|| FormatError::BadTimestamp { date, time }.into())
    }

    /// Finds the last occurrence of a four-byte signature
    /// starting at or below `upper_bound` and at or above `lower_bound`.
    ///
    /// `upper_bound` defaults to (and is clamped to) `len() - 4`;
    /// `lower_bound` defaults to 0.
    /// The cursor's current index plays no part.
    pub fn last_index_of_signature(
        &self,
        signature: &[u8; 4],
        upper_bound: Option<usize>,
        lower_bound: Option<usize>,
    ) -> Option<usize> {
        let last = self.len().checked_sub(signature.len())?;
        let upper = upper_bound.map_or(last, |u| u.min(last));
        let lower = lower_bound.unwrap_or(0);
        if lower > upper {
            return None;
        }
        let window = self.buffer.slice(lower..upper + signature.len())?;
        memmem::rfind(&window, signature).map(|found| found + lower)
    }
}

fn signed(i: u64) -> i64 {
    i64::try_from(i).unwrap_or(i64::MAX)
}

/// Decodes an MS-DOS timestamp.
///
/// Fields are applied as offsets from the start of the year,
/// so out-of-range values carry over like a calendar would
/// (month 0 is December of the year before, day 0 the last day of the month before).
fn parse_msdos(time: u16, date: u16) -> Option<NaiveDateTime> {
    let seconds = i64::from(0b0000_0000_0001_1111 & time) * 2; // MSDOS uses 2-second precision
    let minutes = i64::from((0b0000_0111_1110_0000 & time) >> 5);
    let hours = i64::from((0b1111_1000_0000_0000 & time) >> 11);

    let days = i64::from(0b0000_0000_0001_1111 & date);
    let months = u32::from((0b0000_0001_1110_0000 & date) >> 5);
    // MSDOS uses years since 1980; Always interpreted as a positive value
    let years = i32::from((0b1111_1110_0000_0000 & date) >> 9) + 1980;

    let new_year = NaiveDate::from_ymd_opt(years, 1, 1)?.and_hms_opt(0, 0, 0)?;
    let month_start = match months {
        0 => new_year.checked_sub_months(Months::new(1))?,
        m => new_year.checked_add_months(Months::new(m - 1))?,
    };
    month_start.checked_add_signed(
        Duration::days(days - 1)
            + Duration::hours(hours)
            + Duration::minutes(minutes)
            + Duration::seconds(seconds),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cursor(bytes: &[u8]) -> Cursor {
        Cursor::new(bytes, 0)
    }

    #[test]
    fn reads_little_endian() {
        let mut c = cursor(&[0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0xFF]);
        assert_eq!(c.read_u16().unwrap(), 0x0201);
        assert_eq!(c.read_uint(3).unwrap(), 0x050403);
        assert_eq!(c.index(), 5);
        assert_eq!(c.read_uint(4).unwrap(), 0xFF080706);
        assert_eq!(c.remaining(), 0);
    }

    #[test]
    fn u64_with_zero_high_word_is_low_word() {
        let mut c = cursor(&[0x78, 0x56, 0x34, 0x12, 0, 0, 0, 0]);
        assert_eq!(c.read_u64().unwrap(), 0x12345678);

        let mut c = cursor(&[0, 0, 0, 0, 1, 0, 0, 0]);
        assert_eq!(c.read_u64().unwrap(), 1 << 32);
    }

    #[test]
    fn refuses_to_read_past_the_end() {
        let mut c = cursor(&[1, 2, 3]);
        match c.read_u32() {
            Err(ZipError::EndOfData { length, requested }) => {
                assert_eq!(length, 3);
                assert_eq!(requested, 4);
            }
            other => panic!("Expected EndOfData, got {:?}", other),
        }
        // A failed read doesn't move the cursor.
        assert_eq!(c.index(), 0);
        assert!(c.skip(3).is_ok());
        assert!(matches!(c.skip(1), Err(ZipError::EndOfData { .. })));
        assert!(matches!(c.byte_at(3), Err(ZipError::EndOfData { .. })));
    }

    #[test]
    fn global_addressing() {
        let mut c = Cursor::new(vec![0u8; 10], 1000);
        c.set_global_index(1004).unwrap();
        assert_eq!(c.index(), 4);
        assert_eq!(c.global_index(), 1004);
        assert!(c.contains_global(1009));
        assert!(!c.contains_global(1010));
        assert!(!c.contains_global(999));

        match c.set_global_index(998) {
            Err(ZipError::EndOfData { requested, .. }) => assert_eq!(requested, -2),
            other => panic!("Expected EndOfData, got {:?}", other),
        }
        assert!(c.set_global_index(1011).is_err());
        assert_eq!(c.index(), 4);
    }

    #[test]
    fn signature_search_is_backward() {
        let mut bytes = vec![0u8; 64];
        bytes[10..14].copy_from_slice(b"PK\x05\x06");
        bytes[40..44].copy_from_slice(b"PK\x05\x06");
        let mut c = cursor(&bytes);

        assert_eq!(c.last_index_of_signature(b"PK\x05\x06", None, None), Some(40));
        assert_eq!(c.last_index_of_signature(b"PK\x05\x06", Some(39), None), Some(10));
        assert_eq!(c.last_index_of_signature(b"PK\x05\x06", Some(40), Some(40)), Some(40));
        assert_eq!(c.last_index_of_signature(b"PK\x05\x06", Some(39), Some(11)), None);
        // Bounds past the end are clamped.
        assert_eq!(c.last_index_of_signature(b"PK\x05\x06", Some(1000), None), Some(40));
        assert_eq!(c.last_index_of_signature(b"PK\x06\x07", None, None), None);

        // The current position doesn't matter.
        c.skip(50).unwrap();
        assert_eq!(c.last_index_of_signature(b"PK\x05\x06", None, None), Some(40));
    }

    #[test]
    fn signature_at_the_very_end() {
        let c = cursor(b"xxxxPK\x01\x02");
        assert_eq!(c.last_index_of_signature(b"PK\x01\x02", None, None), Some(4));
        let tiny = cursor(b"PK\x01");
        assert_eq!(tiny.last_index_of_signature(b"PK\x01\x02", None, None), None);
    }

    #[test]
    fn binary_strings_read_like_bytes() {
        let text: String = [0x50u8, 0x4B, 0x05, 0x06, 0xC7, 0x01]
            .iter()
            .map(|&b| char::from(b))
            .collect();
        let mut c = Cursor::new(Buffer::from_binary_string(&text), 0);
        assert_eq!(c.len(), 6);
        assert_eq!(c.last_index_of_signature(b"PK\x05\x06", None, None), Some(0));
        c.expect_magic(*b"PK\x05\x06").unwrap();
        assert_eq!(c.byte_at(4).unwrap(), 0xC7);
        assert_eq!(c.read_u16().unwrap(), 0x01C7);
    }

    #[test]
    fn bad_magic() {
        let mut c = cursor(b"PK\x05\x05");
        match c.expect_magic(*b"PK\x06\x06") {
            Err(ZipError::Format(FormatError::BadSignature { expected, found })) => {
                assert_eq!(expected, Magic(*b"PK\x06\x06"));
                assert_eq!(found, Magic(*b"PK\x05\x05"));
            }
            other => panic!("Expected BadSignature, got {:?}", other),
        }
    }

    #[test]
    fn msdos_timestamps() {
        // 2020-06-15 13:45:30
        let date = (40 << 9) | (6 << 5) | 15;
        let time = (13 << 11) | (45 << 5) | 15;
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&u16::to_le_bytes(time));
        bytes.extend_from_slice(&u16::to_le_bytes(date));
        let parsed = cursor(&bytes).read_timestamp().unwrap();
        assert_eq!(
            parsed,
            NaiveDate::from_ymd_opt(2020, 6, 15)
                .unwrap()
                .and_hms_opt(13, 45, 30)
                .unwrap()
        );
    }

    #[test]
    fn msdos_largest_timestamp_carries_forward() {
        // Year 2107, month 15, day 31, 31:63:62
        let parsed = parse_msdos(0xFFFF, 0xFFFF).unwrap();
        assert_eq!(
            parsed,
            NaiveDate::from_ymd_opt(2108, 4, 1)
                .unwrap()
                .and_hms_opt(8, 4, 2)
                .unwrap()
        );
    }

    #[test]
    fn msdos_zero_timestamp_carries_backward() {
        // All-zero fields: month 0, day 0 of 1980.
        let parsed = parse_msdos(0, 0).unwrap();
        assert_eq!(
            parsed,
            NaiveDate::from_ymd_opt(1979, 11, 30)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap()
        );
    }
}
