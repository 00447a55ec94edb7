//! Error types and the related `Result<T>`

use std::fmt;

use thiserror::Error;

pub type ZipResult<T> = Result<T, ZipError>;

#[derive(Debug, Error)]
pub enum ZipError {
    /// An error from the byte-range source.
    /// Passed through as-is; retrying is the source's business.
    #[error("I/O Error")]
    Io(#[from] std::io::Error),

    /// The archive's central directory metadata doesn't match the ZIP layout.
    #[error("Invalid Zip archive: {0}")]
    Format(#[from] FormatError),

    /// The ZIP archive uses a feature we recognize but don't handle.
    #[error("Unsupported Zip archive: {0}")]
    Unsupported(#[from] UnsupportedError),

    /// A read would have gone past the end (or before the start) of a buffer.
    ///
    /// This means either an earlier offset was nonsense
    /// or a fetch came back shorter than requested.
    #[error("End of data reached (data length = {length}, asked index = {requested}). Corrupted zip?")]
    EndOfData { length: usize, requested: i64 },

    /// A cast from a 64-bit int to a usize failed, probably on a 32-bit system.
    #[error("Zip archive too large for address space")]
    InsufficientAddressSpace,
}

/// Ways the archive's metadata can be malformed
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormatError {
    #[error("Couldn't find End Of Central Directory Record")]
    NoEocdr,

    #[error("Couldn't find the Zip64 End Of Central Directory Locator")]
    MissingZip64Locator,

    #[error("Unexpected signature {found}, expected {expected}")]
    BadSignature { expected: Magic, found: Magic },

    #[error("Central directory of {size} bytes is larger than supported")]
    TooManyEntries { size: u64 },

    /// Only if chrono can't represent the date, which no MS-DOS date hits today
    #[error("Invalid MS-DOS timestamp (date {date:#06x}, time {time:#06x})")]
    BadTimestamp { date: u16, time: u16 },

    #[error("Archive of {size} bytes is too small to hold an End Of Central Directory Record")]
    TooSmall { size: u64 },

    #[error("Offset {offset} lies outside the {size} byte archive")]
    OffsetOutOfBounds { offset: u64, size: u64 },
}

/// Features we detect and refuse
#[derive(Debug, Error, PartialEq, Eq)]
pub enum UnsupportedError {
    #[error("Encrypted entries are not supported")]
    Encrypted,

    #[error("No support for multi-volume archives: archive spans {disks} disks")]
    MultiVolume { disks: u32 },
}

/// A four-byte record signature, printed the way hex editors show it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Magic(pub [u8; 4]);

impl fmt::Display for Magic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = self.0;
        write!(f, "{a:02X} {b:02X} {c:02X} {d:02X}")
    }
}
