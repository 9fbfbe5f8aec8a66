//! Command APDU definitions
//!
//! A [`Command`] holds the logical fields of `CLA INS P1 P2 [Lc] [Data] [Le]`
//! and picks the encoding when serialized: short form whenever the body fits
//! in 255 bytes and Ne in 256, extended form otherwise.

use bytes::{BufMut, Bytes, BytesMut};

use crate::Error;

/// Largest Ne expressible in short form
pub const MAX_SHORT_NE: u32 = 256;
/// Largest Ne expressible in extended form
pub const MAX_EXTENDED_NE: u32 = 65536;
/// Largest body expressible in short form
pub const MAX_SHORT_NC: usize = 255;
/// Largest body expressible in extended form
pub const MAX_EXTENDED_NC: usize = 65535;

/// Generic APDU command structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Command class byte
    pub cla: u8,
    /// Instruction byte
    pub ins: u8,
    /// Parameter 1
    pub p1: u8,
    /// Parameter 2
    pub p2: u8,
    /// Command data (optional)
    pub data: Option<Bytes>,
    /// Maximum number of response bytes expected (Ne), 1..=65536
    pub le: Option<u32>,
}

impl Command {
    /// Create a new command with just the header bytes
    pub const fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: None,
            le: None,
        }
    }

    /// Create a new command with expected response length (Ne)
    pub const fn new_with_le(cla: u8, ins: u8, p1: u8, p2: u8, le: u32) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: None,
            le: Some(le),
        }
    }

    /// Create a new command with data payload
    pub fn new_with_data<T: Into<Bytes>>(cla: u8, ins: u8, p1: u8, p2: u8, data: T) -> Self {
        Self::new(cla, ins, p1, p2).with_data(data)
    }

    /// Set the data field
    pub fn with_data<T: Into<Bytes>>(mut self, data: T) -> Self {
        let data = data.into();
        self.data = (!data.is_empty()).then_some(data);
        self
    }

    /// Set the expected length field
    pub const fn with_le(mut self, le: u32) -> Self {
        self.le = Some(le);
        self
    }

    /// Command class (CLA)
    pub const fn class(&self) -> u8 {
        self.cla
    }

    /// Instruction code (INS)
    pub const fn instruction(&self) -> u8 {
        self.ins
    }

    /// First parameter (P1)
    pub const fn p1(&self) -> u8 {
        self.p1
    }

    /// Second parameter (P2)
    pub const fn p2(&self) -> u8 {
        self.p2
    }

    /// Command body, if any
    pub fn data(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }

    /// Body length (Nc)
    pub fn nc(&self) -> usize {
        self.data.as_ref().map_or(0, Bytes::len)
    }

    /// Expected response length (Ne), 0 when absent
    pub fn ne(&self) -> u32 {
        self.le.unwrap_or(0)
    }

    /// Whether serialization selects the extended form
    pub fn is_extended(&self) -> bool {
        self.nc() > MAX_SHORT_NC || self.ne() > MAX_SHORT_NE
    }

    fn validate(&self) -> Result<(), Error> {
        if self.nc() > MAX_EXTENDED_NC {
            return Err(Error::invalid_argument(format!(
                "command body of {} bytes exceeds {MAX_EXTENDED_NC}",
                self.nc()
            )));
        }
        if let Some(le) = self.le {
            if le == 0 || le > MAX_EXTENDED_NE {
                return Err(Error::invalid_argument(format!(
                    "Ne must be in 1..={MAX_EXTENDED_NE}, got {le}"
                )));
            }
        }
        Ok(())
    }

    /// Calculate length of serialized command
    pub fn command_length(&self) -> usize {
        let nc = self.nc();
        let (prefix, lc_len, le_len) = if self.is_extended() {
            (1, 2, 2)
        } else {
            (0, 1, 1)
        };

        let mut length = 4 + prefix;
        if nc > 0 {
            length += lc_len + nc;
        }
        if self.le.is_some() {
            length += le_len;
        }
        length
    }

    /// Convert to raw APDU bytes
    pub fn to_bytes(&self) -> Result<Bytes, Error> {
        self.validate()?;

        let mut buffer = BytesMut::with_capacity(self.command_length());
        buffer.put_u8(self.cla);
        buffer.put_u8(self.ins);
        buffer.put_u8(self.p1);
        buffer.put_u8(self.p2);

        // Ne of 256 and 65536 wrap to zero on the wire
        if self.is_extended() {
            buffer.put_u8(0x00);
            if let Some(data) = &self.data {
                buffer.put_u16(data.len() as u16);
                buffer.put_slice(data);
            }
            if let Some(le) = self.le {
                buffer.put_u16(le as u16);
            }
        } else {
            if let Some(data) = &self.data {
                buffer.put_u8(data.len() as u8);
                buffer.put_slice(data);
            }
            if let Some(le) = self.le {
                buffer.put_u8(le as u8);
            }
        }

        Ok(buffer.freeze())
    }

    /// Parse a command from raw bytes, accepting all seven ISO 7816-4 cases
    pub fn from_bytes(data: &[u8]) -> Result<Self, Error> {
        let malformed = || Error::invalid_argument(format!("malformed command APDU of {} bytes", data.len()));

        if data.len() < 4 {
            return Err(malformed());
        }

        let mut command = Self::new(data[0], data[1], data[2], data[3]);
        if data.len() == 4 {
            // case 1
            return Ok(command);
        }

        let short_ne = |b: u8| if b == 0 { 256 } else { u32::from(b) };
        let extended_ne = |hi: u8, lo: u8| match u16::from_be_bytes([hi, lo]) {
            0 => 65536,
            n => u32::from(n),
        };

        if data.len() == 5 {
            // case 2s
            command.le = Some(short_ne(data[4]));
            return Ok(command);
        }

        let b1 = data[4] as usize;
        if b1 != 0 {
            if data.len() == 5 + b1 {
                // case 3s
                command.data = Some(Bytes::copy_from_slice(&data[5..]));
            } else if data.len() == 6 + b1 {
                // case 4s
                command.data = Some(Bytes::copy_from_slice(&data[5..5 + b1]));
                command.le = Some(short_ne(data[5 + b1]));
            } else {
                return Err(malformed());
            }
            return Ok(command);
        }

        if data.len() < 7 {
            return Err(malformed());
        }
        if data.len() == 7 {
            // case 2e
            command.le = Some(extended_ne(data[5], data[6]));
            return Ok(command);
        }

        let nc = usize::from(u16::from_be_bytes([data[5], data[6]]));
        if nc == 0 {
            return Err(malformed());
        }
        if data.len() == 7 + nc {
            // case 3e
            command.data = Some(Bytes::copy_from_slice(&data[7..]));
        } else if data.len() == 9 + nc {
            // case 4e
            command.data = Some(Bytes::copy_from_slice(&data[7..7 + nc]));
            command.le = Some(extended_ne(data[7 + nc], data[8 + nc]));
        } else {
            return Err(malformed());
        }

        Ok(command)
    }
}

impl TryFrom<&[u8]> for Command {
    type Error = Error;

    fn try_from(data: &[u8]) -> Result<Self, Error> {
        Self::from_bytes(data)
    }
}
