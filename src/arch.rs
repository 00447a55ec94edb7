use crate::result::*;

/// A checked cast from u64 to usize
///
/// We could use the `cast` crate,
/// (https://docs.rs/cast/0.2.3/cast/)
/// but this is the only one we really need.
pub fn usize<I: Into<u64>>(i: I) -> ZipResult<usize> {
    let i: u64 = i.into();
    usize::try_from(i).map_err(|_| ZipError::InsufficientAddressSpace)
}

/// Widens a buffer index into the 64-bit offset space of the archive.
pub fn offset(i: usize) -> u64 {
    // usize is at most 64 bits on every target Rust supports.
    i as u64
}
