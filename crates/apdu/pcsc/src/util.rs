//! Utility functions for PC/SC buffers

use cardio_core::Error;

/// Decode a multi-string buffer as returned by `SCardListReaders`
///
/// The buffer holds NUL-terminated strings followed by an empty string.
/// Anything after the empty string is ignored.
pub fn split_multi_string(buffer: &[u8]) -> Result<Vec<String>, Error> {
    let mut names = Vec::new();
    let mut rest = buffer;
    while let Some(end) = rest.iter().position(|&b| b == 0) {
        if end == 0 {
            return Ok(names);
        }
        names.push(String::from_utf8_lossy(&rest[..end]).into_owned());
        rest = &rest[end + 1..];
    }
    Err(Error::invalid("multi-string must end with an empty string"))
}
