//! Length-field analysis of encoded command APDUs
//!
//! The transmission loop works on raw bytes, so it needs Lc and Le without
//! building a full [`Command`](crate::Command). Lengths here are the decoded
//! values: a short Le byte of `00` is 256, an extended Le of `00 00` is 65536,
//! and an absent field is 0.

use crate::Error;

/// Decoded length fields of an encoded command APDU
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApduShape {
    /// Whether the command uses extended length fields
    pub extended: bool,
    /// Body length (Nc), 0 when there is no body
    pub lc: usize,
    /// Expected response length (Ne), 0 when there is no Le field
    pub le: usize,
}

impl ApduShape {
    /// Analyze the length fields of `bytes`
    pub fn analyze(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() < 4 {
            return Err(Error::invalid_argument(format!(
                "command APDU must be at least 4 bytes, got {}",
                bytes.len()
            )));
        }

        if bytes.len() >= 7 && bytes[4] == 0 {
            Self::analyze_extended(bytes)
        } else {
            Self::analyze_short(bytes)
        }
    }

    fn analyze_short(bytes: &[u8]) -> Result<Self, Error> {
        let len = bytes.len();
        let short_le = |b: u8| if b == 0 { 256 } else { usize::from(b) };

        let shape = match len {
            4 => Self::new(false, 0, 0),
            5 => Self::new(false, 0, short_le(bytes[4])),
            _ => {
                let lc = usize::from(bytes[4]);
                if lc == 0 || len < 5 + lc {
                    return Err(Self::truncated(len, lc));
                }
                match len - (5 + lc) {
                    0 => Self::new(false, lc, 0),
                    1 => Self::new(false, lc, short_le(bytes[len - 1])),
                    _ => return Err(Self::truncated(len, lc)),
                }
            }
        };

        Ok(shape)
    }

    fn analyze_extended(bytes: &[u8]) -> Result<Self, Error> {
        let len = bytes.len();
        let extended_len = |hi: u8, lo: u8| usize::from(u16::from_be_bytes([hi, lo]));
        let extended_le = |hi: u8, lo: u8| match extended_len(hi, lo) {
            0 => 65536,
            n => n,
        };

        if len == 7 {
            return Ok(Self::new(true, 0, extended_le(bytes[5], bytes[6])));
        }

        let lc = extended_len(bytes[5], bytes[6]);
        if lc == 0 || len < 7 + lc {
            return Err(Self::truncated(len, lc));
        }

        match len - (7 + lc) {
            0 => Ok(Self::new(true, lc, 0)),
            2 => Ok(Self::new(
                true,
                lc,
                extended_le(bytes[len - 2], bytes[len - 1]),
            )),
            _ => Err(Self::truncated(len, lc)),
        }
    }

    const fn new(extended: bool, lc: usize, le: usize) -> Self {
        Self { extended, lc, le }
    }

    fn truncated(len: usize, lc: usize) -> Error {
        Error::invalid_argument(format!(
            "command APDU of {len} bytes does not match its Lc of {lc}"
        ))
    }

    /// Whether the encoded command ends with a one-byte Le field
    pub const fn has_short_le(&self) -> bool {
        !self.extended && self.le > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_header_only() {
        let shape = ApduShape::analyze(&hex!("00A40400")).unwrap();
        assert_eq!(shape, ApduShape::new(false, 0, 0));
        assert!(!shape.has_short_le());
    }

    #[test]
    fn test_short_forms() {
        assert_eq!(
            ApduShape::analyze(&hex!("00B0000010")).unwrap(),
            ApduShape::new(false, 0, 16)
        );
        assert_eq!(
            ApduShape::analyze(&hex!("00B0000000")).unwrap(),
            ApduShape::new(false, 0, 256)
        );
        assert_eq!(
            ApduShape::analyze(&hex!("00A4040002AABB")).unwrap(),
            ApduShape::new(false, 2, 0)
        );

        let shape = ApduShape::analyze(&hex!("00A4040002AABB00")).unwrap();
        assert_eq!(shape, ApduShape::new(false, 2, 256));
        assert!(shape.has_short_le());
    }

    #[test]
    fn test_extended_forms() {
        assert_eq!(
            ApduShape::analyze(&hex!("00B00000000200")).unwrap(),
            ApduShape::new(true, 0, 512)
        );
        assert_eq!(
            ApduShape::analyze(&hex!("00B00000000000")).unwrap(),
            ApduShape::new(true, 0, 65536)
        );
        assert_eq!(
            ApduShape::analyze(&hex!("00D60000000003010203")).unwrap(),
            ApduShape::new(true, 3, 0)
        );
        assert_eq!(
            ApduShape::analyze(&hex!("00D600000000030102030100")).unwrap(),
            ApduShape::new(true, 3, 256)
        );
    }

    #[test]
    fn test_lc_is_big_endian() {
        let mut bytes = vec![0x00, 0xD6, 0x00, 0x00, 0x00, 0x01, 0x02];
        bytes.extend(std::iter::repeat_n(0xEE, 0x0102));
        let shape = ApduShape::analyze(&bytes).unwrap();
        assert_eq!(shape.lc, 0x0102);
        assert!(shape.extended);
    }

    #[test]
    fn test_malformed() {
        assert!(ApduShape::analyze(&hex!("00A404")).is_err());
        // Lc of 5 with only one body byte
        assert!(ApduShape::analyze(&hex!("00A404000501")).is_err());
        // short Lc = 0 with a stray byte
        assert!(ApduShape::analyze(&hex!("00A404000001")).is_err());
        // extended body longer than buffer
        assert!(ApduShape::analyze(&hex!("00D6000000000501")).is_err());
        // extended Lc of zero
        assert!(ApduShape::analyze(&hex!("00D600000000000102")).is_err());
    }
}
