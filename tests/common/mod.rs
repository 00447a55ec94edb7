//! Builds ZIP archives byte by byte, the parts we list anyway.
//! File contents are filler: nothing ever reads them.

#![allow(dead_code)]

use std::cell::RefCell;
use std::io;

use zipls::*;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// One central directory record
#[derive(Debug, Clone)]
pub struct Record {
    pub name: Vec<u8>,
    pub flags: u16,
    pub size: u32,
    pub time: u16,
    pub date: u16,
    pub extra: Vec<u8>,
    pub comment: Vec<u8>,
}

impl Record {
    pub fn file(name: &str, size: u32) -> Self {
        Self {
            name: name.as_bytes().to_vec(),
            flags: 0,
            size,
            // 2021-03-04 05:06:08
            time: (5 << 11) | (6 << 5) | 4,
            date: (41 << 9) | (3 << 5) | 4,
            extra: Vec::new(),
            comment: Vec::new(),
        }
    }

    pub fn dir(name: &str) -> Self {
        Self::file(name, 0)
    }

    /// A file whose size only fits in a Zip64 extra field
    pub fn zip64(name: &str, size: u64) -> Self {
        let mut extra = Vec::new();
        extra.extend_from_slice(&1u16.to_le_bytes());
        extra.extend_from_slice(&16u16.to_le_bytes());
        extra.extend_from_slice(&size.to_le_bytes());
        extra.extend_from_slice(&size.to_le_bytes()); // compressed size, stored
        Self {
            size: u32::MAX,
            extra,
            ..Self::file(name, 0)
        }
    }

    pub fn flags(mut self, flags: u16) -> Self {
        self.flags = flags;
        self
    }

    pub fn raw_name(mut self, name: &[u8]) -> Self {
        self.name = name.to_vec();
        self
    }

    pub fn comment(mut self, comment: &str) -> Self {
        self.comment = comment.as_bytes().to_vec();
        self
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut b = vec![b'P', b'K', 1, 2];
        b.extend_from_slice(&[45, 3, 20, 0]); // made by Unix, needs 2.0
        b.extend_from_slice(&self.flags.to_le_bytes());
        b.extend_from_slice(&0u16.to_le_bytes()); // stored
        b.extend_from_slice(&self.time.to_le_bytes());
        b.extend_from_slice(&self.date.to_le_bytes());
        b.extend_from_slice(&0xDEADBEEFu32.to_le_bytes()); // CRC
        b.extend_from_slice(&self.size.to_le_bytes()); // compressed size
        b.extend_from_slice(&self.size.to_le_bytes());
        b.extend_from_slice(&(self.name.len() as u16).to_le_bytes());
        b.extend_from_slice(&(self.extra.len() as u16).to_le_bytes());
        b.extend_from_slice(&(self.comment.len() as u16).to_le_bytes());
        b.extend_from_slice(&0u16.to_le_bytes()); // disk
        b.extend_from_slice(&0u16.to_le_bytes()); // internal attributes
        b.extend_from_slice(&(0o100644u32 << 16).to_le_bytes());
        b.extend_from_slice(&0u32.to_le_bytes()); // local header offset
        b.extend_from_slice(&self.name);
        b.extend_from_slice(&self.extra);
        b.extend_from_slice(&self.comment);
        b
    }
}

/// Lays out `[payload][central directory][zip64 end records][EOCDR][comment]`
#[derive(Debug, Clone, Default)]
pub struct ArchiveBuilder {
    pub payload: usize,
    pub records: Vec<Record>,
    pub comment: Vec<u8>,
    pub zip64: bool,
    pub zip64_extensible_data: usize,
    pub disks: Option<u32>,
    pub eocdr_disk_number: u16,
}

impl ArchiveBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn payload(mut self, bytes: usize) -> Self {
        self.payload = bytes;
        self
    }

    pub fn record(mut self, record: Record) -> Self {
        self.records.push(record);
        self
    }

    pub fn comment(mut self, len: usize) -> Self {
        self.comment = vec![b'#'; len];
        self
    }

    pub fn zip64(mut self) -> Self {
        self.zip64 = true;
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut archive: Vec<u8> = (0..self.payload).map(|i| (i % 251) as u8).collect();

        let cd_offset = archive.len() as u64;
        for record in &self.records {
            archive.extend(record.encode());
        }
        let cd_size = archive.len() as u64 - cd_offset;
        let entries = self.records.len() as u64;

        if self.zip64 {
            let zip64_eocdr_offset = archive.len() as u64;
            archive.extend_from_slice(&[b'P', b'K', 6, 6]);
            archive.extend_from_slice(&(44 + self.zip64_extensible_data as u64).to_le_bytes());
            archive.extend_from_slice(&[45, 3, 45, 0]);
            archive.extend_from_slice(&0u32.to_le_bytes());
            archive.extend_from_slice(&0u32.to_le_bytes());
            archive.extend_from_slice(&entries.to_le_bytes());
            archive.extend_from_slice(&entries.to_le_bytes());
            archive.extend_from_slice(&cd_size.to_le_bytes());
            archive.extend_from_slice(&cd_offset.to_le_bytes());
            archive.extend(std::iter::repeat(0x5A).take(self.zip64_extensible_data));

            archive.extend_from_slice(&[b'P', b'K', 6, 7]);
            archive.extend_from_slice(&0u32.to_le_bytes());
            archive.extend_from_slice(&zip64_eocdr_offset.to_le_bytes());
            archive.extend_from_slice(&self.disks.unwrap_or(1).to_le_bytes());
        }

        archive.extend_from_slice(&[b'P', b'K', 5, 6]);
        archive.extend_from_slice(&self.eocdr_disk_number.to_le_bytes());
        archive.extend_from_slice(&0u16.to_le_bytes());
        if self.zip64 {
            archive.extend_from_slice(&u16::MAX.to_le_bytes());
            archive.extend_from_slice(&u16::MAX.to_le_bytes());
            archive.extend_from_slice(&u32::MAX.to_le_bytes());
            archive.extend_from_slice(&u32::MAX.to_le_bytes());
        } else {
            archive.extend_from_slice(&(entries as u16).to_le_bytes());
            archive.extend_from_slice(&(entries as u16).to_le_bytes());
            archive.extend_from_slice(&(cd_size as u32).to_le_bytes());
            archive.extend_from_slice(&(cd_offset as u32).to_le_bytes());
        }
        archive.extend_from_slice(&(self.comment.len() as u16).to_le_bytes());
        archive.extend_from_slice(&self.comment);
        archive
    }
}

/// Wraps a source, remembering every range fetched from it.
pub struct Recording<'a, S: ?Sized> {
    pub inner: &'a S,
    pub fetches: RefCell<Vec<ByteRange>>,
}

impl<'a, S: RangeSource + ?Sized> Recording<'a, S> {
    pub fn new(inner: &'a S) -> Self {
        Self {
            inner,
            fetches: RefCell::new(Vec::new()),
        }
    }

    pub fn fetches(&self) -> Vec<ByteRange> {
        self.fetches.borrow().clone()
    }
}

impl<S: RangeSource + ?Sized> RangeSource for Recording<'_, S> {
    fn size(&self) -> u64 {
        self.inner.size()
    }

    fn fetch(&self, offset: u64, length: u64) -> io::Result<Buffer> {
        self.fetches
            .borrow_mut()
            .push(ByteRange::new(offset, length));
        self.inner.fetch(offset, length)
    }
}

/// An enormous archive of which we only have the tail.
/// Fetching anything before the tail is an error.
pub struct TailOnly {
    pub size: u64,
    pub tail: Vec<u8>,
}

impl RangeSource for TailOnly {
    fn size(&self) -> u64 {
        self.size
    }

    fn fetch(&self, offset: u64, length: u64) -> io::Result<Buffer> {
        let tail_start = self.size - self.tail.len() as u64;
        if offset < tail_start {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("Tried to fetch {length} bytes at {offset}, before the tail"),
            ));
        }
        self.tail.fetch(offset - tail_start, length)
    }
}

/// A source whose reads always fail
pub struct Broken;

impl RangeSource for Broken {
    fn size(&self) -> u64 {
        1000
    }

    fn fetch(&self, _offset: u64, _length: u64) -> io::Result<Buffer> {
        Err(io::Error::new(io::ErrorKind::TimedOut, "disk on fire"))
    }
}
