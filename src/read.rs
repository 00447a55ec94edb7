//! Tools for listing a ZIP archive.
//!
//! To start, create a [`ZipArchive`] from any [`RangeSource`].
//! If the bytes come from somewhere that doesn't fit a blocking call
//! (an async runtime, a browser, a request queue...), drive an
//! [`ArchiveScan`] yourself: it says which range it needs next and
//! takes the bytes whenever they show up.
//!
//! [`RangeSource`]: ../source/trait.RangeSource.html

use camino::Utf8Path;
use chrono::NaiveDateTime;
use log::*;

use crate::arch;
use crate::cursor::{Buffer, Cursor};
use crate::result::*;
use crate::source::{ByteRange, RangeSource};
use crate::spec::{self, EocdrInfo, Located};

/// Metadata for a file in the archive,
/// retrieved from its central directory entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZipEntry {
    /// The provided path of the file
    pub name: String,

    /// True if the path ends in a slash.
    /// [`ZipArchive::entries()`] never contains these,
    /// but the central directory does.
    pub is_directory: bool,

    /// True if the archive uses Zip64 records
    /// or this entry's size came from a Zip64 extra field
    pub is_zip64: bool,

    /// Uncompressed size of the file in bytes
    pub uncompressed_size: u64,

    /// When the file was last modified, in the archiver's local time
    pub modified: NaiveDateTime,
}

impl ZipEntry {
    /// The entry's name as a path
    pub fn path(&self) -> &Utf8Path {
        Utf8Path::new(&self.name)
    }
}

/// Knobs for [`ArchiveScan`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanOptions {
    /// How many bytes to read from the end of the archive
    /// when looking for the end of central directory record.
    ///
    /// Anything smaller than 65558 bytes might miss a record
    /// with a long comment.
    pub tail_window: u64,

    /// The largest central directory we're willing to read, in bytes
    pub max_central_directory_size: u64,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            // 65 KB: enough for the EOCDR with the longest comment,
            // plus room for the Zip64 records that usually precede it.
            tail_window: 66560,
            max_central_directory_size: spec::MAX_CENTRAL_DIRECTORY_SIZE,
        }
    }
}

/// A listed ZIP archive
#[derive(Debug)]
pub struct ZipArchive {
    /// What the caller called the archive
    pub name: String,
    /// Size of the whole archive in bytes
    pub total_size: u64,
    /// Where the central directory starts
    pub central_dir_offset: u64,
    /// True if the archive has Zip64 end records
    pub is_zip64: bool,
    entries: Vec<ZipEntry>,
}

impl ZipArchive {
    /// Lists the archive `source`, calling it `name`.
    ///
    /// ```no_run
    /// # use zipls::*;
    /// let source = FileSource::open("foo.zip")?;
    /// let archive = ZipArchive::open("foo.zip", &source)?;
    /// for entry in archive.entries() {
    ///     println!("{} ({} bytes)", entry.name, entry.uncompressed_size);
    /// }
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn open<S: RangeSource + ?Sized>(name: &str, source: &S) -> ZipResult<Self> {
        Self::open_with(name, source, ScanOptions::default())
    }

    /// Like [`ZipArchive::open()`], with non-default [`ScanOptions`].
    pub fn open_with<S: RangeSource + ?Sized>(
        name: &str,
        source: &S,
        options: ScanOptions,
    ) -> ZipResult<Self> {
        let (mut scan, mut range) = ArchiveScan::start(name, source.size(), options)?;
        loop {
            debug!("Fetching {} bytes at {}", range.length, range.offset);
            let buffer = source.fetch(range.offset, range.length)?;
            match scan.resume(buffer)? {
                Scan::Pending(next, next_range) => {
                    scan = next;
                    range = next_range;
                }
                Scan::Complete(archive) => return Ok(archive),
            }
        }
    }

    /// Returns the files found in the archive's central directory,
    /// in the order they appear there.
    ///
    /// Directories are left out.
    /// No effort is made to deduplicate or otherwise validate these entries.
    pub fn entries(&self) -> &[ZipEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<ZipEntry> {
        self.entries
    }

    /// Looks up a file by its name. If there are duplicates, the first wins.
    pub fn entry(&self, name: &str) -> Option<&ZipEntry> {
        self.entries.iter().find(|e| e.name == name)
    }
}

/// Where an [`ArchiveScan`] is in the listing process
#[derive(Debug)]
enum Phase {
    /// Waiting on the tail of the archive
    Tail,
    /// Waiting on a Zip64 end of central directory record
    /// that wasn't in the tail
    Zip64Record,
    /// Waiting on the central directory
    CentralDirectory(EocdrInfo),
}

/// What an [`ArchiveScan`] needs next
#[derive(Debug)]
pub enum Scan {
    /// Fetch this range and hand it to [`ArchiveScan::resume()`].
    Pending(ArchiveScan, ByteRange),
    /// All done!
    Complete(ZipArchive),
}

/// A ZIP listing in progress, independent of how bytes are fetched.
///
/// Each step consumes the scan, so a scan can't be resumed twice
/// or after it finished. Dropping it cancels the listing.
///
/// ```
/// # use zipls::*;
/// # fn fetch(r: ByteRange) -> std::io::Result<Buffer> { unimplemented!() }
/// # fn list(total_size: u64) -> Result<Vec<ZipEntry>, Box<dyn std::error::Error>> {
/// let (mut scan, mut range) = ArchiveScan::start("foo.zip", total_size, ScanOptions::default())?;
/// let archive = loop {
///     // Fetch however you'd like: this is where an async caller would await.
///     let bytes = fetch(range)?;
///     match scan.resume(bytes)? {
///         Scan::Pending(next, next_range) => {
///             scan = next;
///             range = next_range;
///         }
///         Scan::Complete(archive) => break archive,
///     }
/// };
/// # Ok(archive.into_entries())
/// # }
/// ```
#[derive(Debug)]
pub struct ArchiveScan {
    name: String,
    total_size: u64,
    options: ScanOptions,
    phase: Phase,
    pending: ByteRange,
}

impl ArchiveScan {
    /// Starts listing an archive of `total_size` bytes,
    /// returning the range of its tail to fetch first.
    pub fn start(
        name: &str,
        total_size: u64,
        options: ScanOptions,
    ) -> ZipResult<(Self, ByteRange)> {
        if total_size <= spec::EOCDR_MIN_SIZE as u64 {
            return Err(FormatError::TooSmall { size: total_size }.into());
        }
        let length = total_size.min(options.tail_window);
        let pending = ByteRange::new(total_size - length, length);
        info!("Listing {} ({} bytes)", name, total_size);

        let scan = Self {
            name: name.to_owned(),
            total_size,
            options,
            phase: Phase::Tail,
            pending,
        };
        Ok((scan, pending))
    }

    /// The range this scan is waiting on
    pub fn pending(&self) -> ByteRange {
        self.pending
    }

    /// Continues the scan with the bytes of [`ArchiveScan::pending()`].
    pub fn resume(mut self, buffer: Buffer) -> ZipResult<Scan> {
        // Each phase gets its own cursor, dropping the last one's buffer.
        let mut cursor = Cursor::new(buffer, self.pending.offset);
        match self.phase {
            Phase::Tail => match spec::locate_eocdr(&mut cursor)? {
                Located::Resolved(info) => self.fetch_central_directory(info),
                Located::Zip64RecordAt(offset) => {
                    let length = spec::ZIP64_EOCDR_SIZE as u64;
                    self.check_bounds(offset, length)?;
                    self.phase = Phase::Zip64Record;
                    self.pending = ByteRange::new(offset, length);
                    let range = self.pending;
                    Ok(Scan::Pending(self, range))
                }
            },
            Phase::Zip64Record => {
                let info = spec::read_zip64_eocdr(&mut cursor)?;
                self.fetch_central_directory(info)
            }
            Phase::CentralDirectory(info) => {
                let entries = walk_central_directory(
                    &mut cursor,
                    info.is_zip64,
                    self.options.max_central_directory_size,
                )?;
                info!("{}: {} files", self.name, entries.len());
                Ok(Scan::Complete(ZipArchive {
                    name: self.name,
                    total_size: self.total_size,
                    central_dir_offset: info.central_dir_offset,
                    is_zip64: info.is_zip64,
                    entries,
                }))
            }
        }
    }

    /// Requests everything from the central directory to the end of the archive.
    /// (The end records that follow it stop the walk.)
    fn fetch_central_directory(mut self, info: EocdrInfo) -> ZipResult<Scan> {
        debug!("Central directory at {}", info.central_dir_offset);
        if info.central_dir_offset >= self.total_size {
            return Err(FormatError::OffsetOutOfBounds {
                offset: info.central_dir_offset,
                size: self.total_size,
            }
            .into());
        }
        let size = self.total_size - info.central_dir_offset;
        if size > self.options.max_central_directory_size {
            return Err(FormatError::TooManyEntries { size }.into());
        }
        self.phase = Phase::CentralDirectory(info);
        self.pending = ByteRange::new(info.central_dir_offset, size);
        let range = self.pending;
        Ok(Scan::Pending(self, range))
    }

    fn check_bounds(&self, offset: u64, length: u64) -> ZipResult<()> {
        match offset.checked_add(length) {
            Some(end) if end <= self.total_size => Ok(()),
            _ => Err(FormatError::OffsetOutOfBounds {
                offset,
                size: self.total_size,
            }
            .into()),
        }
    }
}

/// Decodes central directory entries from the cursor
/// until something other than a central directory entry shows up.
///
/// Directories are dropped.
/// Fails if more than `max_size` bytes are consumed along the way.
pub fn walk_central_directory(
    cursor: &mut Cursor,
    is_zip64: bool,
    max_size: u64,
) -> ZipResult<Vec<ZipEntry>> {
    let start = cursor.index();
    let mut entries = Vec::new();

    // The central directory is followed by end records with different magic,
    // or (in a truncated buffer) by nothing at all.
    while cursor.remaining() >= spec::CENTRAL_DIRECTORY_MAGIC.len() {
        let consumed = arch::offset(cursor.index() - start);
        if consumed > max_size {
            return Err(FormatError::TooManyEntries { size: consumed }.into());
        }
        if cursor.read_magic()? != spec::CENTRAL_DIRECTORY_MAGIC {
            break;
        }

        let entry = ZipEntry::decode(cursor, is_zip64)?;
        debug!("{:?}", entry);
        if entry.is_directory {
            continue;
        }
        entries.push(entry);
    }
    Ok(entries)
}
