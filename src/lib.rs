//! zipls lists the files in a ZIP archive without reading the whole thing.
//!
//! ```no_run
//! # use zipls::*;
//! let source = FileSource::open("huge.zip")?;
//! let archive = ZipArchive::open("huge.zip", &source)?;
//! for entry in archive.entries() {
//!     println!("{:>12} {} {}", entry.uncompressed_size, entry.modified, entry.name);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Byte slices work too, so memory-mapped files are fair game:
//! ```no_run
//! # use std::fs::File;
//! # use memmap2::Mmap;
//! # use zipls::*;
//! let zip_file = File::open("foo.zip")?;
//! let mapping = unsafe { Mmap::map(&zip_file)? };
//! let archive = ZipArchive::open("foo.zip", &mapping[..])?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Zip is an interesting archive format: its table of contents,
//! the _central directory_, lives at the back of the file,
//! found by way of an _end of central directory record_ that itself has
//! no fixed position (it's followed by a comment of up to 64 KB).
//! So we read the last 65 KB or so, search backward for that record,
//! follow it (and its Zip64 counterparts, for archives past 4 GB)
//! to the central directory, then read that and nothing else.
//! Listing a multi-gigabyte archive costs two or three small reads.
//!
//! Those reads go through [`RangeSource`]. If blocking reads don't suit,
//! [`ArchiveScan`] does the listing without doing any I/O itself.
//!
//! Diagnostics go through the [`log`](https://docs.rs/log) crate;
//! install a logger to see them.

pub mod cursor;
pub mod read;
pub mod result;
pub mod source;

pub use cursor::Buffer;
pub use read::{ArchiveScan, Scan, ScanOptions, ZipArchive, ZipEntry};
pub use result::{FormatError, UnsupportedError, ZipError, ZipResult};
pub use source::{BinaryString, ByteRange, FileSource, RangeSource};

mod arch;
mod spec;
