//! The transmission loop
//!
//! One call to [`Engine::transmit`] turns one application APDU into as many
//! wire exchanges as the card asks for: the command itself, a resend with the
//! corrected Le after `6C xx`, and GET RESPONSE rounds after `61 xx`. Body
//! bytes from every round are appended to the caller's buffer; only the last
//! trailer is kept.

use std::cmp;

use bytes::{BufMut, BytesMut};
use tracing::{debug, info, trace, warn};

use crate::class::class_byte;
use crate::config::TransmitConfig;
use crate::error::Error;
use crate::manager::{Connection, Protocol};
use crate::response::status::{StatusAction, StatusWord, classify};
use crate::shape::ApduShape;
use crate::tpdu;

/// Instruction byte of GET RESPONSE
const INS_GET_RESPONSE: u8 = 0xC0;
/// Free space kept available for every round after the first
const MIN_ROUND_CAPACITY: usize = 4096;
/// Ne requested by an extended GET RESPONSE
const EXTENDED_GET_RESPONSE_LE: usize = 4096;

/// Drives one logical channel of one connection
pub(crate) struct Engine<'a, C> {
    connection: &'a mut C,
    protocol: Protocol,
    channel: u8,
    convert_to_short: bool,
    config: &'a TransmitConfig,
}

impl<'a, C: Connection> Engine<'a, C> {
    pub(crate) const fn new(
        connection: &'a mut C,
        protocol: Protocol,
        channel: u8,
        convert_to_short: bool,
        config: &'a TransmitConfig,
    ) -> Self {
        Self {
            connection,
            protocol,
            channel,
            convert_to_short,
            config,
        }
    }

    /// Send `command` and append the complete response APDU to `response`
    ///
    /// Returns the number of bytes appended. Nothing is appended when the exchange fails.
    pub(crate) fn transmit(&mut self, command: &[u8], response: &mut BytesMut) -> Result<usize, Error> {
        let start = response.len();
        let result = self.run(command, response, start);
        if result.is_err() {
            response.truncate(start);
        }
        result
    }

    fn run(&mut self, command: &[u8], response: &mut BytesMut, start: usize) -> Result<usize, Error> {
        let shape = ApduShape::analyze(command)?;

        let mut wire = BytesMut::from(command);
        wire[0] = class_byte(wire[0], self.channel)?;
        if self.convert_to_short && self.protocol == Protocol::T0 {
            wire = tpdu::to_t0(&wire, &shape)?;
        }
        let mut wire_shape = ApduShape::analyze(&wire)?;
        let mut le = shape.le;

        for round in 0..self.config.max_response_iterations {
            let free = self.round_capacity(round, le);
            let before = response.len();
            let received = self.exchange(&wire, response, free)?;
            if received < 2 {
                return Err(Error::protocol_violation(format!(
                    "response of {received} bytes has no status word"
                )));
            }

            let end = response.len();
            let sw = StatusWord::new(response[end - 2], response[end - 1]);

            match classify(sw, shape.lc) {
                StatusAction::WrongLength(na) if wire_shape.has_short_le() => {
                    debug!(sw = %sw, le = na, "Card asked for a different Le, resending");
                    response.truncate(before);
                    let last = wire.len() - 1;
                    wire[last] = na as u8;
                    le = na;
                }
                StatusAction::MoreData(available) => {
                    response.truncate(end - 2);
                    le = if wire_shape.extended {
                        EXTENDED_GET_RESPONSE_LE
                    } else {
                        available
                    };
                    wire = self.get_response(wire_shape.extended, le)?;
                    wire_shape = ApduShape::analyze(&wire)?;
                    debug!(
                        sw = %sw,
                        le,
                        received = response.len() - start,
                        "Fetching remaining response bytes"
                    );
                }
                _ => {
                    let total = response.len() - start;
                    match sw.tracing_level() {
                        tracing::Level::DEBUG => debug!(sw = %sw, len = total, "Transmission complete"),
                        tracing::Level::INFO => info!(sw = %sw, len = total, "Transmission complete with warning"),
                        _ => warn!(
                            sw = %sw,
                            description = sw.description(),
                            len = total,
                            "Transmission complete with error status"
                        ),
                    }
                    return Ok(total);
                }
            }
        }

        warn!(
            rounds = self.config.max_response_iterations,
            "Giving up on response that never completes"
        );
        Err(Error::protocol_violation(format!(
            "response not complete after {} rounds",
            self.config.max_response_iterations
        )))
    }

    /// Send `command` once, appending at most `capacity` bytes to `response`
    ///
    /// No GET RESPONSE or Le handling happens here, only the class byte of
    /// the channel is applied.
    pub(crate) fn transmit_once(
        &mut self,
        command: &[u8],
        response: &mut BytesMut,
        capacity: usize,
    ) -> Result<usize, Error> {
        if command.len() < 4 {
            return Err(Error::invalid("command APDU must be at least 4 bytes"));
        }
        let mut wire = BytesMut::from(command);
        wire[0] = class_byte(wire[0], self.channel)?;
        self.exchange(&wire, response, capacity)
    }

    fn round_capacity(&self, round: usize, le: usize) -> usize {
        match (self.config.ignore_le_when_allocating, round) {
            (false, _) => le + 2,
            (true, 0) => cmp::max(self.config.initial_capacity, le + 2),
            (true, _) => cmp::max(le + 2, MIN_ROUND_CAPACITY),
        }
    }

    fn get_response(&self, extended: bool, le: usize) -> Result<BytesMut, Error> {
        let mut command = BytesMut::with_capacity(7);
        command.put_u8(class_byte(0x00, self.channel)?);
        command.put_u8(INS_GET_RESPONSE);
        command.put_u16(0x0000);
        if extended {
            command.put_u8(0x00);
            command.put_u16(le as u16);
        } else {
            command.put_u8(le as u8);
        }
        Ok(command)
    }

    /// One raw exchange with the card
    fn exchange(
        &mut self,
        command: &[u8],
        response: &mut BytesMut,
        capacity: usize,
    ) -> Result<usize, Error> {
        trace!(
            command = %hex::encode(command),
            channel = self.channel,
            protocol = %self.protocol,
            "Transmitting raw command"
        );

        let before = response.len();
        response.resize(before + capacity, 0);
        match self
            .connection
            .transmit(self.protocol, command, &mut response[before..])
        {
            Ok(received) => {
                response.truncate(before + received);
                trace!(response = %hex::encode(&response[before..]), "Received raw response");
                Ok(received)
            }
            Err(e) => {
                response.truncate(before);
                debug!(error = %e, "Resource manager error during transmission");
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockConnection, MockManager};
    use crate::scard::ScardError;
    use hex_literal::hex;

    fn run(
        conn: &mut MockConnection,
        protocol: Protocol,
        channel: u8,
        command: &[u8],
    ) -> Result<Vec<u8>, Error> {
        let config = TransmitConfig::default();
        let mut response = BytesMut::new();
        Engine::new(conn, protocol, channel, true, &config).transmit(command, &mut response)?;
        Ok(response.to_vec())
    }

    #[test]
    fn test_plain_exchange() {
        let mock = MockManager::new();
        let mut conn = mock.connection(Protocol::T1);
        mock.push_response(&hex!("01029000"));

        let response = run(&mut conn, Protocol::T1, 0, &hex!("00B0000002")).unwrap();
        assert_eq!(response, hex!("01029000"));
        assert_eq!(mock.commands(), vec![hex!("00B0000002").to_vec()]);
        assert_eq!(mock.log().buffer_sizes, vec![8192]);
        assert_eq!(mock.log().protocols, vec![Protocol::T1]);
    }

    #[test]
    fn test_get_response_chain() {
        let mock = MockManager::new();
        let mut conn = mock.connection(Protocol::T0);
        mock.push_response(&hex!("6105"));
        mock.push_response(&hex!("AABBCCDDEE6100"));
        mock.push_response(&hex!("11229000"));

        let response = run(&mut conn, Protocol::T0, 0, &hex!("00CA00FF00")).unwrap();
        assert_eq!(response, hex!("AABBCCDDEE11229000"));
        assert_eq!(
            mock.commands(),
            vec![
                hex!("00CA00FF00").to_vec(),
                hex!("00C0000005").to_vec(),
                hex!("00C0000000").to_vec(),
            ]
        );
    }

    #[test]
    fn test_get_response_uses_channel_class() {
        let mock = MockManager::new();
        let mut conn = mock.connection(Protocol::T1);
        mock.push_response(&hex!("6102"));
        mock.push_response(&hex!("AABB9000"));

        let response = run(&mut conn, Protocol::T1, 5, &hex!("00A4040000")).unwrap();
        assert_eq!(response, hex!("AABB9000"));
        assert_eq!(
            mock.commands(),
            vec![hex!("41A4040000").to_vec(), hex!("41C0000002").to_vec()]
        );
    }

    #[test]
    fn test_extended_get_response() {
        let mock = MockManager::new();
        let mut conn = mock.connection(Protocol::T1);
        mock.push_response(&hex!("0161FF"));
        mock.push_response(&hex!("029000"));

        let response = run(&mut conn, Protocol::T1, 0, &hex!("00B00000000200")).unwrap();
        assert_eq!(response, hex!("01029000"));
        assert_eq!(mock.commands()[1], hex!("00C00000001000"));
    }

    #[test]
    fn test_wrong_length_retry() {
        let mock = MockManager::new();
        let mut conn = mock.connection(Protocol::T1);
        mock.push_response(&hex!("6C07"));
        mock.push_response(&hex!("010203040506079000"));

        let command = hex!("80CA000001AA10");
        let response = run(&mut conn, Protocol::T1, 0, &command).unwrap();
        assert_eq!(response, hex!("010203040506079000"));

        let commands = mock.commands();
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[1], hex!("80CA000001AA07"));
        assert_eq!(commands[0][..6], commands[1][..6]);
    }

    #[test]
    fn test_wrong_length_without_body_is_surfaced() {
        let mock = MockManager::new();
        let mut conn = mock.connection(Protocol::T1);
        mock.push_response(&hex!("6C07"));

        let response = run(&mut conn, Protocol::T1, 0, &hex!("00B0000010")).unwrap();
        assert_eq!(response, hex!("6C07"));
        assert_eq!(mock.commands().len(), 1);
    }

    #[test]
    fn test_t0_conversion_applied() {
        let mock = MockManager::new();
        let mut conn = mock.connection(Protocol::T0);
        mock.push_response(&hex!("6102"));
        mock.push_response(&hex!("AABB9000"));

        let response = run(&mut conn, Protocol::T0, 0, &hex!("00A4040002112200")).unwrap();
        assert_eq!(response, hex!("AABB9000"));
        assert_eq!(
            mock.commands(),
            vec![hex!("00A40400021122").to_vec(), hex!("00C0000002").to_vec()]
        );
    }

    #[test]
    fn test_t0_large_body_rejected() {
        let mock = MockManager::new();
        let mut conn = mock.connection(Protocol::T0);
        let mut command = hex!("00D6000000012C").to_vec();
        command.extend(std::iter::repeat_n(0x00, 300));

        let err = run(&mut conn, Protocol::T0, 0, &command).unwrap_err();
        assert!(matches!(err, Error::ProtocolViolation(_)));
        assert!(mock.commands().is_empty());
    }

    #[test]
    fn test_card_removed_and_timeout() {
        let mock = MockManager::new();
        let mut conn = mock.connection(Protocol::T1);
        mock.push_transmit_error(ScardError::REMOVED_CARD);
        mock.push_transmit_error(ScardError::TIMEOUT);

        let err = run(&mut conn, Protocol::T1, 0, &hex!("00B0000000")).unwrap_err();
        assert_eq!(err, Error::CardNotPresent(ScardError::REMOVED_CARD));
        let err = run(&mut conn, Protocol::T1, 0, &hex!("00B0000000")).unwrap_err();
        assert_eq!(err, Error::Timeout);
    }

    #[test]
    fn test_iteration_bound() {
        let mock = MockManager::new();
        let mut conn = mock.connection(Protocol::T1);
        for _ in 0..3 {
            mock.push_response(&hex!("AA6101"));
        }

        let config = TransmitConfig::default().with_max_response_iterations(3);
        let mut response = BytesMut::from(&b"prefix"[..]);
        let err = Engine::new(&mut conn, Protocol::T1, 0, true, &config)
            .transmit(&hex!("00B0000001"), &mut response)
            .unwrap_err();
        assert!(matches!(err, Error::ProtocolViolation(_)));
        assert_eq!(&response[..], b"prefix");
    }

    #[test]
    fn test_buffer_growth_without_ignoring_le() {
        let mock = MockManager::new();
        let mut conn = mock.connection(Protocol::T1);
        mock.push_response(&hex!("6103"));
        mock.push_response(&hex!("0102039000"));

        let config = TransmitConfig::default().with_ignore_le_when_allocating(false);
        let mut response = BytesMut::new();
        Engine::new(&mut conn, Protocol::T1, 0, true, &config)
            .transmit(&hex!("00B0000010"), &mut response)
            .unwrap();
        assert_eq!(mock.log().buffer_sizes, vec![18, 5]);
    }
}
