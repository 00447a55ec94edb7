//! Where archive bytes come from.
//!
//! Listing an archive never needs the whole thing,
//! just a couple of byte ranges near its end.
//! Anything that can hand those over implements [`RangeSource`]:
//! byte slices (including memory maps), files, and legacy "binary strings"
//! all do out of the box.

use std::fs::File;
use std::io;
use std::ops::Range;
use std::path::Path;

use crate::cursor::Buffer;

/// A window into an archive's bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub offset: u64,
    pub length: u64,
}

impl ByteRange {
    pub fn new(offset: u64, length: u64) -> Self {
        Self { offset, length }
    }

    /// One past the last byte in the range
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }
}

/// Random access to an archive's bytes
pub trait RangeSource {
    /// Total size of the archive in bytes
    fn size(&self) -> u64;

    /// Reads `length` bytes starting at `offset`.
    ///
    /// Implementations should fail rather than return a short buffer.
    fn fetch(&self, offset: u64, length: u64) -> io::Result<Buffer>;
}

/// Maps a requested range onto indexes of something `size` long.
fn checked_range(size: usize, offset: u64, length: u64) -> io::Result<Range<usize>> {
    let start = usize::try_from(offset).ok();
    let end = offset
        .checked_add(length)
        .and_then(|end| usize::try_from(end).ok());
    match (start, end) {
        (Some(start), Some(end)) if end <= size => Ok(start..end),
        _ => Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("Range of {length} bytes at {offset} is past the end ({size} bytes)"),
        )),
    }
}

impl RangeSource for [u8] {
    fn size(&self) -> u64 {
        self.len() as u64
    }

    fn fetch(&self, offset: u64, length: u64) -> io::Result<Buffer> {
        let range = checked_range(self.len(), offset, length)?;
        Ok(Buffer::from(&self[range]))
    }
}

impl RangeSource for Vec<u8> {
    fn size(&self) -> u64 {
        self.as_slice().size()
    }

    fn fetch(&self, offset: u64, length: u64) -> io::Result<Buffer> {
        self.as_slice().fetch(offset, length)
    }
}

/// An archive on disk, read with positioned reads
#[derive(Debug)]
pub struct FileSource {
    file: File,
    size: u64,
}

impl FileSource {
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        Self::new(File::open(path)?)
    }

    pub fn new(file: File) -> io::Result<Self> {
        let size = file.metadata()?.len();
        Ok(Self { file, size })
    }
}

impl RangeSource for FileSource {
    fn size(&self) -> u64 {
        self.size
    }

    fn fetch(&self, offset: u64, length: u64) -> io::Result<Buffer> {
        let range = checked_range(usize::MAX, offset, length)?;
        if offset + length > self.size {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "Range of {length} bytes at {offset} is past the end ({} bytes)",
                    self.size
                ),
            ));
        }
        let mut buf = vec![0; range.len()];

        #[cfg(unix)]
        {
            use std::os::unix::fs::FileExt;
            self.file.read_exact_at(&mut buf, offset)?;
        }

        #[cfg(not(unix))]
        {
            use std::io::{Read, Seek, SeekFrom};
            let mut file = &self.file;
            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(&mut buf)?;
        }

        Ok(Buffer::Bytes(buf))
    }
}

/// An archive held as a "binary string", one `char` per byte,
/// as legacy text-mode file APIs hand them out.
#[derive(Debug, Clone)]
pub struct BinaryString(Vec<char>);

impl BinaryString {
    pub fn new(s: &str) -> Self {
        Self(s.chars().collect())
    }
}

impl RangeSource for BinaryString {
    fn size(&self) -> u64 {
        self.0.len() as u64
    }

    fn fetch(&self, offset: u64, length: u64) -> io::Result<Buffer> {
        let range = checked_range(self.0.len(), offset, length)?;
        Ok(Buffer::Text(self.0[range].to_vec()))
    }
}
