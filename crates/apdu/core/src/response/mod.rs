//! Response APDU definitions
//!
//! A response is `[Data] SW1 SW2`: the trailer is always the last two bytes.

pub mod status;

use bytes::{BufMut, Bytes, BytesMut};
use tracing::trace;

use crate::error::Error;
use status::StatusWord;

/// A response APDU as returned by the card
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Response body, possibly empty
    payload: Bytes,
    /// Trailer
    status: StatusWord,
}

impl Response {
    /// Create a new response from a body and a trailer
    pub fn new(payload: impl Into<Bytes>, status: impl Into<StatusWord>) -> Self {
        Self {
            payload: payload.into(),
            status: status.into(),
        }
    }

    /// Create a `90 00` response carrying `payload`
    pub fn success(payload: impl Into<Bytes>) -> Self {
        Self::new(payload, status::common::SUCCESS)
    }

    /// Split raw response bytes into body and trailer
    pub fn from_bytes(data: &[u8]) -> Result<Self, Error> {
        let Some(split) = data.len().checked_sub(2) else {
            return Err(Error::invalid_argument(format!(
                "response APDU must be at least 2 bytes, got {}",
                data.len()
            )));
        };

        let status = StatusWord::new(data[split], data[split + 1]);
        trace!(
            sw = %status,
            payload_len = split,
            "Parsed APDU response"
        );

        Ok(Self {
            payload: Bytes::copy_from_slice(&data[..split]),
            status,
        })
    }

    /// Response body without the trailer
    pub const fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Trailer
    pub const fn status(&self) -> StatusWord {
        self.status
    }

    /// SW1
    pub const fn sw1(&self) -> u8 {
        self.status.sw1
    }

    /// SW2
    pub const fn sw2(&self) -> u8 {
        self.status.sw2
    }

    /// Check if the trailer is `90 00`
    pub const fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Encode back to wire bytes
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.payload.len() + 2);
        buf.put_slice(&self.payload);
        buf.put_u8(self.status.sw1);
        buf.put_u8(self.status.sw2);
        buf.freeze()
    }
}

impl TryFrom<&[u8]> for Response {
    type Error = Error;

    fn try_from(data: &[u8]) -> Result<Self, Error> {
        Self::from_bytes(data)
    }
}

impl From<Response> for Bytes {
    fn from(response: Response) -> Self {
        response.to_bytes()
    }
}
