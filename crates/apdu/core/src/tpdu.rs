//! APDU to T=0 TPDU conversion (ISO 7816-3)
//!
//! T=0 only carries a single length byte (P3), so extended APDUs have to be
//! reshaped into short ones and case 4 commands lose their Le. The card then
//! announces the response length through `61 xx` and the data is fetched
//! with GET RESPONSE.

use bytes::{BufMut, BytesMut};
use tracing::debug;

use crate::{Error, shape::ApduShape};

/// Reshape an encoded command APDU for transmission over T=0
///
/// Commands that are already valid T=0 TPDUs are copied unchanged.
pub fn to_t0(command: &[u8], shape: &ApduShape) -> Result<BytesMut, Error> {
    let mut tpdu = BytesMut::with_capacity(command.len());

    if shape.extended {
        tpdu.put_slice(&command[..4]);
        match shape.lc {
            0 => {
                // case 2e: keep Le, 256 and above become 00
                let le = if shape.le > 255 { 0x00 } else { shape.le as u8 };
                tpdu.put_u8(le);
            }
            lc @ 1..=255 => {
                // cases 3e and 4e with a short body: drop the extended prefix and Le
                tpdu.put_u8(lc as u8);
                tpdu.put_slice(&command[7..7 + lc]);
            }
            lc => {
                return Err(Error::protocol_violation(format!(
                    "cannot send a {lc} byte body over T=0 without an envelope"
                )));
            }
        }
        debug!(
            lc = shape.lc,
            le = shape.le,
            tpdu = %hex::encode(&tpdu),
            "Converted extended APDU to T=0 TPDU"
        );
    } else if shape.lc > 0 && shape.le > 0 {
        // case 4s: drop the trailing Le
        tpdu.put_slice(&command[..5 + shape.lc]);
        debug!(lc = shape.lc, le = shape.le, "Stripped Le from case 4 command for T=0");
    } else {
        tpdu.put_slice(command);
    }

    Ok(tpdu)
}
