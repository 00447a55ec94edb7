//! Code specific to the ZIP file format specification.
//!
//! We try to keep the nitty gritty here,
//! and higher-level stuff in the [`read`] module.
//!
//! Most comments quote the ZIP spec, [`APPNOTE.TXT`].
//!
//! [`read`]: ../read/index.html
//! [`APPNOTE.TXT`]: https://pkware.cachefly.net/webdocs/APPNOTE/APPNOTE-6.3.6.TXT

use chrono::NaiveDateTime;
use log::*;

use crate::cursor::Cursor;
use crate::read::ZipEntry;
use crate::result::*;

// Magic numbers denoting various sections of a ZIP archive

/// End of central directory magic number
pub const EOCDR_MAGIC: [u8; 4] = [b'P', b'K', 5, 6];
/// Zip64 end of central directory magic number
pub const ZIP64_EOCDR_MAGIC: [u8; 4] = [b'P', b'K', 6, 6];
/// Zip64 end of central directory locator magic number
pub const ZIP64_EOCDR_LOCATOR_MAGIC: [u8; 4] = [b'P', b'K', 6, 7];
/// Central directory magic number
pub const CENTRAL_DIRECTORY_MAGIC: [u8; 4] = [b'P', b'K', 1, 2];

/// Size of an End of central directory record without a comment
pub const EOCDR_MIN_SIZE: usize = 22;
/// Size of an End of central directory record with the longest possible comment
pub const EOCDR_MAX_SIZE: usize = EOCDR_MIN_SIZE + u16::MAX as usize;
/// Size of the fixed fields of a Zip64 end of central directory record
pub const ZIP64_EOCDR_SIZE: usize = 56;
/// The largest central directory we'll walk (256 MB)
pub const MAX_CENTRAL_DIRECTORY_SIZE: u64 = 0xFFF_FFFF;

/// Header ID of the Zip64 extended information extra field
const ZIP64_EXTRA_FIELD_ID: u16 = 0x0001;

/// Fields too small for their value hold this and defer to Zip64 records.
const ZIP64_PLACEHOLDER: u32 = u32::MAX;

/// Data from the End of central directory record
///
/// Found at the back of the ZIP archive and provides offsets for finding
/// its central directory, along with lots of stuff that stopped being relevant
/// when we stopped breaking ZIP archives onto multiple floppies.
#[derive(Debug)]
pub struct EndOfCentralDirectory {
    pub disk_number: u16,
    pub disk_with_central_directory: u16,
    pub entries_on_this_disk: u16,
    pub entries: u16,
    pub central_directory_size: u32,
    pub central_directory_offset: u32,
    pub comment_length: u16,
}

impl EndOfCentralDirectory {
    pub fn parse(cursor: &mut Cursor) -> ZipResult<Self> {
        // 4.3.16  End of central directory record:
        //
        // end of central dir signature    4 bytes  (0x06054b50)
        // number of this disk             2 bytes
        // number of the disk with the
        // start of the central directory  2 bytes
        // total number of entries in
        // the central dir on this disk    2 bytes
        // total number of entries in
        // the central dir                 2 bytes
        // size of the central directory   4 bytes
        // offset of start of central
        // directory with respect to
        // the starting disk number        4 bytes
        // zipfile comment length          2 bytes
        cursor.expect_magic(EOCDR_MAGIC)?;
        Ok(Self {
            disk_number: cursor.read_u16()?,
            disk_with_central_directory: cursor.read_u16()?,
            entries_on_this_disk: cursor.read_u16()?,
            entries: cursor.read_u16()?,
            central_directory_size: cursor.read_u32()?,
            central_directory_offset: cursor.read_u32()?,
            comment_length: cursor.read_u16()?,
        })
    }
}

/// Data from the Zip64 end of central directory locator
///
/// This should immediately precede the End of central directory record
/// on Zip64 files and tell us where to find the Zip64 end of central directory record.
#[derive(Debug)]
pub struct Zip64EndOfCentralDirectoryLocator {
    pub disk_with_central_directory: u32,
    pub zip64_eocdr_offset: u64,
    pub disks: u32,
}

impl Zip64EndOfCentralDirectoryLocator {
    pub fn parse(cursor: &mut Cursor) -> ZipResult<Self> {
        // 4.3.15 Zip64 end of central directory locator
        //
        // zip64 end of central dir locator
        // signature                       4 bytes  (0x07064b50)
        // number of the disk with the
        // start of the zip64 end of
        // central directory               4 bytes
        // relative offset of the zip64
        // end of central directory record 8 bytes
        // total number of disks           4 bytes
        cursor.expect_magic(ZIP64_EOCDR_LOCATOR_MAGIC)?;
        Ok(Self {
            disk_with_central_directory: cursor.read_u32()?,
            zip64_eocdr_offset: cursor.read_u64()?,
            disks: cursor.read_u32()?,
        })
    }
}

/// Data from the Zip64 end of central directory record
#[derive(Debug)]
pub struct Zip64EndOfCentralDirectory {
    pub record_size: u64,
    pub source_version: u16,
    pub minimum_extract_version: u16,
    pub disk_number: u32,
    pub disk_with_central_directory: u32,
    pub entries_on_this_disk: u64,
    pub entries: u64,
    pub central_directory_size: u64,
    pub central_directory_offset: u64,
}

impl Zip64EndOfCentralDirectory {
    pub fn parse(cursor: &mut Cursor) -> ZipResult<Self> {
        // 4.3.14  Zip64 end of central directory record
        //
        // zip64 end of central dir
        // signature                       4 bytes  (0x06064b50)
        // size of zip64 end of central
        // directory record                8 bytes
        // version made by                 2 bytes
        // version needed to extract       2 bytes
        // number of this disk             4 bytes
        // number of the disk with the
        // start of the central directory  4 bytes
        // total number of entries in the
        // central directory on this disk  8 bytes
        // total number of entries in the
        // central directory               8 bytes
        // size of the central directory   8 bytes
        // offset of start of central
        // directory with respect to
        // the starting disk number        8 bytes
        // zip64 extensible data sector    (variable size)
        //
        // We don't care about the extensible data, so don't read it.
        cursor.expect_magic(ZIP64_EOCDR_MAGIC)?;
        Ok(Self {
            record_size: cursor.read_u64()?,
            source_version: cursor.read_u16()?,
            minimum_extract_version: cursor.read_u16()?,
            disk_number: cursor.read_u32()?,
            disk_with_central_directory: cursor.read_u32()?,
            entries_on_this_disk: cursor.read_u64()?,
            entries: cursor.read_u64()?,
            central_directory_size: cursor.read_u64()?,
            central_directory_offset: cursor.read_u64()?,
        })
    }
}

/// Where the central directory lives, once we've found the end records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EocdrInfo {
    pub central_dir_offset: u64,
    pub is_zip64: bool,
}

/// What [`locate_eocdr`] came up with
#[derive(Debug, PartialEq, Eq)]
pub enum Located {
    /// Found everything we need in the given buffer.
    Resolved(EocdrInfo),
    /// The Zip64 end of central directory record sits at this absolute offset,
    /// outside the buffer we were given.
    /// Fetch it and hand it to [`read_zip64_eocdr`].
    Zip64RecordAt(u64),
}

/// Finds the end of central directory record (and its Zip64 counterpart, if any)
/// in a buffer taken from the tail of the archive.
///
/// The EOCDR should be right at the end of the file,
/// but its variable-length comment means we can't jump to a known offset.
/// Instead, we search backward from the last place it could start
/// to the first place it could start given a maximum-length comment.
pub fn locate_eocdr(cursor: &mut Cursor) -> ZipResult<Located> {
    let length = cursor.len();
    let upper_bound = length
        .checked_sub(EOCDR_MIN_SIZE)
        .ok_or(FormatError::NoEocdr)?;
    let lower_bound = length.checked_sub(EOCDR_MAX_SIZE);
    let eocdr_posit = cursor
        .last_index_of_signature(&EOCDR_MAGIC, Some(upper_bound), lower_bound)
        .ok_or(FormatError::NoEocdr)?;

    cursor.set_index(eocdr_posit)?;
    trace!("End of central directory record at {}", cursor.global_index());
    let eocdr = EndOfCentralDirectory::parse(cursor)?;
    trace!("{:?}", eocdr);

    // The Zip64 records don't replace the plain one, they supplement it.
    // Placeholders in the plain record tell us to go looking for them.
    if eocdr.central_directory_offset != ZIP64_PLACEHOLDER {
        if eocdr.disk_number != eocdr.disk_with_central_directory {
            return Err(UnsupportedError::MultiVolume {
                disks: u32::from(eocdr.disk_number.max(eocdr.disk_with_central_directory)) + 1,
            }
            .into());
        }
        return Ok(Located::Resolved(EocdrInfo {
            central_dir_offset: u64::from(eocdr.central_directory_offset),
            is_zip64: false,
        }));
    }
    debug!("Zip64 placeholder in End of central directory record");

    let locator_posit = cursor
        .last_index_of_signature(&ZIP64_EOCDR_LOCATOR_MAGIC, Some(eocdr_posit), None)
        .ok_or(FormatError::MissingZip64Locator)?;
    cursor.set_index(locator_posit)?;
    let locator = Zip64EndOfCentralDirectoryLocator::parse(cursor)?;
    trace!("{:?}", locator);

    if locator.disks > 1 {
        return Err(UnsupportedError::MultiVolume {
            disks: locator.disks,
        }
        .into());
    }

    // The locator's offset is absolute, not relative to our buffer.
    let zip64_eocdr_offset = locator.zip64_eocdr_offset;
    let record_end = zip64_eocdr_offset.checked_add(ZIP64_EOCDR_SIZE as u64 - 1);
    let fully_buffered = cursor.contains_global(zip64_eocdr_offset)
        && record_end.map_or(false, |end| cursor.contains_global(end));
    if !fully_buffered {
        debug!(
            "Zip64 end of central directory record at {} is outside the buffer",
            zip64_eocdr_offset
        );
        return Ok(Located::Zip64RecordAt(zip64_eocdr_offset));
    }

    cursor.set_global_index(zip64_eocdr_offset)?;
    read_zip64_eocdr(cursor).map(Located::Resolved)
}

/// Reads the Zip64 end of central directory record at the cursor,
/// whose central directory offset overrides the plain record's placeholder.
pub fn read_zip64_eocdr(cursor: &mut Cursor) -> ZipResult<EocdrInfo> {
    let zip64_eocdr = Zip64EndOfCentralDirectory::parse(cursor)?;
    trace!("{:?}", zip64_eocdr);
    Ok(EocdrInfo {
        central_dir_offset: zip64_eocdr.central_directory_offset,
        is_zip64: true,
    })
}

/// The fixed-size fields of a central directory entry that we care about
///
/// Each of these records contains information about a file or folder
/// stored in the ZIP archive.
#[derive(Debug)]
pub struct CentralDirectoryEntry {
    pub flags: u16,
    pub last_modified: NaiveDateTime,
    pub uncompressed_size: u32,
    pub path_length: u16,
    pub extra_field_length: u16,
    pub file_comment_length: u16,
}

impl CentralDirectoryEntry {
    /// Reads the fixed-size part of a central directory entry.
    /// The cursor should be just past the signature.
    pub fn parse(cursor: &mut Cursor) -> ZipResult<Self> {
        // 4.3.12  Central directory structure:
        //
        //   central file header signature   4 bytes  (0x02014b50)
        //   version made by                 2 bytes
        //   version needed to extract       2 bytes
        //   general purpose bit flag        2 bytes
        //   compression method              2 bytes
        //   last mod file time              2 bytes
        //   last mod file date              2 bytes
        //   crc-32                          4 bytes
        //   compressed size                 4 bytes
        //   uncompressed size               4 bytes
        //   file name length                2 bytes
        //   extra field length              2 bytes
        //   file comment length             2 bytes
        //   disk number start               2 bytes
        //   internal file attributes        2 bytes
        //   external file attributes        4 bytes
        //   relative offset of local header 4 bytes
        //
        //   file name (variable size)
        //   extra field (variable size)
        //   file comment (variable size)
        cursor.skip(2 + 2)?;
        let flags = cursor.read_u16()?;
        cursor.skip(2)?;
        let last_modified = cursor.read_timestamp()?;
        cursor.skip(4 + 4)?;
        let uncompressed_size = cursor.read_u32()?;
        let path_length = cursor.read_u16()?;
        let extra_field_length = cursor.read_u16()?;
        let file_comment_length = cursor.read_u16()?;
        cursor.skip(2 + 2 + 4 + 4)?;

        Ok(Self {
            flags,
            last_modified,
            uncompressed_size,
            path_length,
            extra_field_length,
            file_comment_length,
        })
    }
}

/// Extracts the "is this text UTF-8?" bit from the 16-bit flags field.
///
/// If false, text is assumed to be a legacy single-byte code page.
fn is_utf8(flags: u16) -> bool {
    // Bit 11: Language encoding flag (EFS).  If this bit is set,
    //         the filename and comment fields for this file
    //         MUST be encoded using UTF-8. (see APPENDIX D)
    flags & (1 << 11) != 0
}

/// Extracts the "is this file encrypted?" bit from the 16-bit flags field.
fn is_encrypted(flags: u16) -> bool {
    // Bit 0: If set, indicates that the file is encrypted
    flags & 1 != 0
}

/// What bytes 0x80 through 0xFF of a name without the UTF-8 flag decode to.
///
/// Code page 850, with its box-drawing characters flattened to ASCII look-alikes.
/// Bytes below 0x80 are plain ASCII.
const LEGACY_NAME_TABLE: [char; 128] = [
    '\u{00C7}', '\u{00FC}', '\u{00E9}', '\u{00E2}', '\u{00E4}', '\u{00E0}', '\u{00E5}', '\u{00E7}', // 0x80
    '\u{00EA}', '\u{00EB}', '\u{00E8}', '\u{00EF}', '\u{00EE}', '\u{00EC}', '\u{00C4}', '\u{00C5}', // 0x88
    '\u{00C9}', '\u{00E6}', '\u{00C6}', '\u{00F4}', '\u{00F6}', '\u{00F2}', '\u{00FB}', '\u{00F9}', // 0x90
    '\u{00FF}', '\u{00D6}', '\u{00DC}', '\u{00F8}', '\u{00A3}', '\u{00D8}', '\u{00D7}', '\u{0192}', // 0x98
    '\u{00E1}', '\u{00ED}', '\u{00F3}', '\u{00FA}', '\u{00F1}', '\u{00D1}', '\u{00AA}', '\u{00BA}', // 0xA0
    '\u{00BF}', '\u{00AE}', '\u{00AC}', '\u{00BD}', '\u{00BC}', '\u{00A1}', '\u{00AB}', '\u{00BB}', // 0xA8
    '_', '_', '_', '\u{00A6}', '\u{00A6}', '\u{00C1}', '\u{00C2}', '\u{00C0}', // 0xB0
    '\u{00A9}', '\u{00A6}', '\u{00A6}', '+', '+', '\u{00A2}', '\u{00A5}', '+', // 0xB8
    '+', '-', '-', '+', '-', '+', '\u{00E3}', '\u{00C3}', // 0xC0
    '+', '+', '-', '-', '\u{00A6}', '-', '+', '\u{00A4}', // 0xC8
    '\u{00F0}', '\u{00D0}', '\u{00CA}', '\u{00CB}', '\u{00C8}', 'i', '\u{00CD}', '\u{00CE}', // 0xD0
    '\u{00CF}', '+', '+', '_', '_', '\u{00A6}', '\u{00CC}', '_', // 0xD8
    '\u{00D3}', '\u{00DF}', '\u{00D4}', '\u{00D2}', '\u{00F5}', '\u{00D5}', '\u{00B5}', '\u{00FE}', // 0xE0
    '\u{00DE}', '\u{00DA}', '\u{00DB}', '\u{00D9}', '\u{00FD}', '\u{00DD}', '\u{00AF}', '\u{00B4}', // 0xE8
    '\u{00AD}', '\u{00B1}', '_', '\u{00BE}', '\u{00B6}', '\u{00A7}', '\u{00F7}', '\u{00B8}', // 0xF0
    '\u{00B0}', '\u{00A8}', '\u{00B7}', '\u{00B9}', '\u{00B3}', '\u{00B2}', '_', ' ', // 0xF8
];

fn decode_legacy_byte(b: u8) -> char {
    match b {
        0..=0x7F => char::from(b),
        _ => LEGACY_NAME_TABLE[usize::from(b - 0x80)],
    }
}

/// Decodes an entry's name given its flags.
fn decode_name(raw: &[u8], flags: u16) -> String {
    if is_utf8(flags) {
        match std::str::from_utf8(raw) {
            Ok(utf8) => utf8.to_owned(),
            Err(e) => {
                // Keep the bytes as they are, one char apiece.
                warn!("Entry name flagged as UTF-8 isn't ({}), keeping its raw bytes", e);
                raw.iter().map(|&b| char::from(b)).collect()
            }
        }
    } else {
        raw.iter().map(|&b| decode_legacy_byte(b)).collect()
    }
}

impl ZipEntry {
    /// Decodes the central directory entry at the cursor,
    /// which should be just past the entry's signature.
    ///
    /// Leaves the cursor at the start of the next record.
    pub(crate) fn decode(cursor: &mut Cursor, archive_is_zip64: bool) -> ZipResult<Self> {
        let cde = CentralDirectoryEntry::parse(cursor)?;
        trace!("{:?}", cde);

        if is_encrypted(cde.flags) {
            return Err(UnsupportedError::Encrypted.into());
        }

        let name = decode_name(&cursor.read_bytes(usize::from(cde.path_length))?, cde.flags);
        let is_directory = name.ends_with('/');

        let mut entry = Self {
            name,
            is_directory,
            is_zip64: archive_is_zip64,
            uncompressed_size: u64::from(cde.uncompressed_size),
            modified: cde.last_modified,
        };

        let extra_field_length = usize::from(cde.extra_field_length);
        if cde.uncompressed_size == ZIP64_PLACEHOLDER {
            parse_zip64_extra_field(&mut entry, cursor, extra_field_length)?;
        } else {
            cursor.skip(extra_field_length)?;
        }

        cursor.skip(usize::from(cde.file_comment_length))?;
        Ok(entry)
    }
}

/// Looks through an entry's extra field for Zip64 info
/// (a 64-bit size for a file > 2^32 bytes) and merges it into the entry.
///
/// Leaves the cursor at the end of the extra field.
fn parse_zip64_extra_field(
    entry: &mut ZipEntry,
    cursor: &mut Cursor,
    extra_field_length: usize,
) -> ZipResult<()> {
    // 4.5.1 In order to allow different programs and different types
    // of information to be stored in the 'extra' field in .ZIP
    // files, the following structure MUST be used for all
    // programs storing data in this field:
    //
    //     header1+data1 + header2+data2 . . .
    //
    // Each header MUST consist of:
    //
    //     Header ID - 2 bytes
    //     Data Size - 2 bytes
    let extra_field_end = cursor.index() + extra_field_length;
    let mut found = false;

    while cursor.index() + 4 <= extra_field_end {
        let kind = cursor.read_u16()?;
        let field_length = usize::from(cursor.read_u16()?);
        if cursor.index() + field_length > extra_field_end {
            warn!(
                "Extra field {:#06x} of {} runs past the end of the extra field block",
                kind, entry.name
            );
            break;
        }

        // 4.5.3 -Zip64 Extended Information Extra Field (0x0001):
        // The fields MUST only appear if the corresponding Local or
        // Central directory record field is set to 0xFFFF or 0xFFFFFFFF.
        // Original Size comes first.
        if kind == ZIP64_EXTRA_FIELD_ID && field_length >= 8 {
            entry.uncompressed_size = cursor.read_u64()?;
            entry.is_zip64 = true;
            found = true;
            break;
        }
        cursor.skip(field_length)?;
    }

    if !found {
        warn!(
            "{} has a Zip64 size placeholder but no Zip64 extra field; keeping the placeholder",
            entry.name
        );
    }

    // Skip whatever's left of the block.
    cursor.set_index(extra_field_end)
}
