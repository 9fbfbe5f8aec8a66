//! Logical channel encoding in the class byte (ISO 7816-4 §5.1.1)

use crate::Error;

/// Highest logical channel number addressable through CLA
pub const MAX_CHANNEL: u8 = 19;

/// Rewrite `cla` so that it addresses logical channel `channel`
///
/// Proprietary class bytes are returned untouched. Channels 0 to 3 use the
/// first interindustry encoding (bit 5 kept, channel in bits 1-2), channels
/// 4 to 19 the further interindustry encoding (bits 5-7 kept, channel - 4 in
/// bits 1-4, bit 7 set).
pub fn class_byte(cla: u8, channel: u8) -> Result<u8, Error> {
    if cla & 0xE0 != 0 && cla & 0xC0 != 0x40 {
        return Ok(cla);
    }

    match channel {
        0..=3 => Ok((cla & 0x10) | channel),
        4..=MAX_CHANNEL => Ok((cla & 0x70) | (channel - 4) | 0x40),
        _ => Err(Error::invalid_argument(format!(
            "channel number must be in 0..={MAX_CHANNEL}, got {channel}"
        ))),
    }
}
