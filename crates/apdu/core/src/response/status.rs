//! Status words and the trailer classifier
//!
//! The transmission loop only distinguishes four outcomes of a trailer:
//! done, more data waiting (`61 xx`), wrong Le (`6C xx`), and everything
//! else. [`classify`] performs that reduction.

use std::fmt;

use tracing::Level;

/// Status Word (SW1-SW2) from an APDU response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusWord {
    /// First status byte (SW1)
    pub sw1: u8,
    /// Second status byte (SW2)
    pub sw2: u8,
}

impl StatusWord {
    /// Create a new status word
    pub const fn new(sw1: u8, sw2: u8) -> Self {
        Self { sw1, sw2 }
    }

    /// Create from a u16 value (SW1 | SW2)
    pub const fn from_u16(status: u16) -> Self {
        Self {
            sw1: (status >> 8) as u8,
            sw2: status as u8,
        }
    }

    /// Convert to a u16 value (SW1 | SW2)
    pub const fn to_u16(&self) -> u16 {
        ((self.sw1 as u16) << 8) | (self.sw2 as u16)
    }

    /// Check if this status word indicates success (90 00)
    pub const fn is_success(&self) -> bool {
        self.sw1 == 0x90 && self.sw2 == 0x00
    }

    /// Check if more response bytes are waiting (61 XX)
    pub const fn is_more_data_available(&self) -> bool {
        self.sw1 == 0x61
    }

    /// Check if the card asked for a different Le (6C XX)
    pub const fn is_wrong_le(&self) -> bool {
        self.sw1 == 0x6C
    }

    /// Get the appropriate tracing level for this status word
    pub const fn tracing_level(&self) -> Level {
        if self.is_success() || self.is_more_data_available() {
            Level::DEBUG
        } else if self.sw1 == 0x62 || self.sw1 == 0x63 {
            Level::INFO
        } else {
            Level::WARN
        }
    }

    /// Get a description of this status word
    pub const fn description(&self) -> &'static str {
        match (self.sw1, self.sw2) {
            (0x90, 0x00) => "Success",
            (0x61, _) => "More data available",
            (0x62, _) => "Warning, non-volatile memory unchanged",
            (0x63, _) => "Warning, non-volatile memory changed",
            (0x64, _) => "Execution error, non-volatile memory unchanged",
            (0x65, _) => "Execution error, non-volatile memory changed",
            (0x67, 0x00) => "Wrong length",
            (0x68, 0x81) => "Logical channel not supported",
            (0x68, 0x82) => "Secure messaging not supported",
            (0x69, 0x82) => "Security status not satisfied",
            (0x69, 0x86) => "Command not allowed",
            (0x6A, 0x81) => "Function not supported",
            (0x6A, 0x82) => "File not found",
            (0x6A, 0x86) => "Incorrect parameters P1-P2",
            (0x6B, 0x00) => "Wrong parameters P1-P2",
            (0x6C, _) => "Wrong Le field",
            (0x6D, 0x00) => "Instruction code not supported or invalid",
            (0x6E, 0x00) => "Class not supported",
            (0x6F, 0x00) => "No precise diagnosis",
            _ => "Unknown status word",
        }
    }
}

impl From<(u8, u8)> for StatusWord {
    fn from(tuple: (u8, u8)) -> Self {
        Self::new(tuple.0, tuple.1)
    }
}

impl From<u16> for StatusWord {
    fn from(status: u16) -> Self {
        Self::from_u16(status)
    }
}

impl From<StatusWord> for u16 {
    fn from(status: StatusWord) -> Self {
        status.to_u16()
    }
}

impl fmt::Display for StatusWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X} {:02X}", self.sw1, self.sw2)
    }
}

/// What the transmission loop should do next with a trailer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusAction {
    /// Processing completed normally
    Success,
    /// `n` more bytes can be fetched with GET RESPONSE
    MoreData(usize),
    /// The command must be resent with Le set to `n`
    WrongLength(usize),
    /// Any other trailer, handed back to the caller as is
    Other,
}

/// Reduce a trailer to the next action of the transmission loop
///
/// `command_lc` is the Lc of the command as the application issued it.
/// A `6C xx` answer to a command without a body is surfaced unchanged.
pub const fn classify(sw: StatusWord, command_lc: usize) -> StatusAction {
    match sw.sw1 {
        0x61 => StatusAction::MoreData(length_byte(sw.sw2)),
        0x6C if command_lc != 0 => StatusAction::WrongLength(length_byte(sw.sw2)),
        _ if sw.is_success() => StatusAction::Success,
        _ => StatusAction::Other,
    }
}

/// Short-form length byte, where zero stands for 256
const fn length_byte(b: u8) -> usize {
    if b == 0 { 256 } else { b as usize }
}

/// Common status words
pub mod common {
    use super::StatusWord;

    /// Success (90 00)
    pub const SUCCESS: StatusWord = StatusWord::new(0x90, 0x00);

    /// Accepted as a MANAGE CHANNEL close acknowledgement by some cards (60 00)
    pub const NULL_PROCEDURE: StatusWord = StatusWord::new(0x60, 0x00);

    /// Wrong length (67 00)
    pub const WRONG_LENGTH: StatusWord = StatusWord::new(0x67, 0x00);

    /// Logical channel not supported (68 81)
    pub const LOGICAL_CHANNEL_NOT_SUPPORTED: StatusWord = StatusWord::new(0x68, 0x81);
}
