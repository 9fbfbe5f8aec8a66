//! Logical channels

use bytes::BytesMut;
use tracing::{debug, warn};

use crate::card::Card;
use crate::class::class_byte;
use crate::command::Command;
use crate::error::Error;
use crate::manager::Connection;
use crate::response::Response;
use crate::response::status::StatusWord;

/// Instruction byte of MANAGE CHANNEL
const INS_MANAGE_CHANNEL: u8 = 0x70;

/// A logical channel to a card
///
/// Channel 0 is the basic channel and is always open. Channels opened with
/// [`Card::open_logical_channel`] are released with [`close`](Self::close).
#[derive(Debug)]
pub struct Channel<'a, C: Connection> {
    card: &'a Card<C>,
    number: u8,
    closed: bool,
}

impl<'a, C: Connection> Channel<'a, C> {
    pub(crate) const fn new(card: &'a Card<C>, number: u8) -> Self {
        Self {
            card,
            number,
            closed: false,
        }
    }

    /// The card this channel belongs to
    pub const fn card(&self) -> &'a Card<C> {
        self.card
    }

    /// Channel number, 0 to 19
    pub const fn number(&self) -> u8 {
        self.number
    }

    /// Whether [`close`](Self::close) has been called
    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    /// Send a command and collect the complete response
    ///
    /// The class byte is rewritten for this channel, `61 xx` and `6C xx` are
    /// handled transparently.
    pub fn transmit(&self, command: &Command) -> Result<Response, Error> {
        self.ensure_open()?;
        if command.ins == INS_MANAGE_CHANNEL {
            return Err(Error::invalid(
                "MANAGE CHANNEL must go through open_logical_channel and close",
            ));
        }

        let bytes = command.to_bytes()?;
        let mut response = BytesMut::with_capacity(self.card.config().initial_capacity);
        self.card.transmit_on(self.number, &bytes, &mut response)?;
        Response::from_bytes(&response)
    }

    /// Send an encoded command and append the complete response to `response`
    ///
    /// Returns the number of bytes appended.
    pub fn transmit_raw(&self, command: &[u8], response: &mut BytesMut) -> Result<usize, Error> {
        self.ensure_open()?;
        self.card.transmit_on(self.number, command, response)
    }

    /// Release this channel with MANAGE CHANNEL close
    ///
    /// Closing the basic channel only marks it closed. Calling this more than
    /// once is a no-op.
    pub fn close(&mut self) -> Result<(), Error> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if self.number == 0 {
            return Ok(());
        }

        let command = [
            class_byte(0x00, self.number)?,
            INS_MANAGE_CHANNEL,
            0x80,
            self.number,
        ];
        let mut response = BytesMut::new();
        let received = self
            .card
            .transmit_once_on(self.number, &command, &mut response, 2)?;
        if received != 2 {
            return Err(Error::protocol_violation(format!(
                "MANAGE CHANNEL close returned {received} bytes"
            )));
        }

        let sw = StatusWord::new(response[0], response[1]);
        if !self.card.config().close_channel_success.contains(&sw) {
            warn!(channel = self.number, sw = %sw, "Unexpected status closing channel");
            return Err(Error::protocol_violation(format!(
                "could not close channel {}: {sw} ({})",
                self.number,
                sw.description()
            )));
        }

        debug!(channel = self.number, sw = %sw, "Closed logical channel");
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), Error> {
        if self.closed {
            Err(Error::invalid_argument(format!(
                "channel {} is closed",
                self.number
            )))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransmitConfig;
    use crate::manager::Protocol;
    use crate::mock::{MockConnection, MockManager};
    use crate::response::status::common;
    use hex_literal::hex;

    fn card(mock: &MockManager, config: TransmitConfig) -> Card<MockConnection> {
        Card::new(
            mock.connection(Protocol::T1),
            "Mock Reader 0",
            hex!("3B00").to_vec(),
            Some(Protocol::T1),
            config,
        )
    }

    #[test]
    fn test_transmit_command() {
        let mock = MockManager::new();
        let card = card(&mock, TransmitConfig::default());
        mock.push_response(&hex!("6F0A9000"));

        let response = card
            .basic_channel()
            .transmit(&Command::new_with_le(0x00, 0xB0, 0x00, 0x00, 2))
            .unwrap();
        assert_eq!(response.payload().as_ref(), &hex!("6F0A"));
        assert!(response.is_success());
    }

    #[test]
    fn test_transmit_on_logical_channel_sets_class() {
        let mock = MockManager::new();
        let card = card(&mock, TransmitConfig::default());
        mock.push_response(&hex!("079000"));
        mock.push_response(&hex!("9000"));

        let channel = card.open_logical_channel().unwrap();
        assert_eq!(channel.number(), 7);
        channel
            .transmit(&Command::new_with_data(0x00, 0xA4, 0x04, 0x00, vec![0xA0, 0x00]))
            .unwrap();
        assert_eq!(mock.commands()[1], hex!("43A4040002A000"));
    }

    #[test]
    fn test_manage_channel_rejected() {
        let mock = MockManager::new();
        let card = card(&mock, TransmitConfig::default());
        let err = card
            .basic_channel()
            .transmit(&Command::new_with_le(0x00, 0x70, 0x00, 0x00, 1))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert!(mock.commands().is_empty());
    }

    #[test]
    fn test_transmit_raw_appends() {
        let mock = MockManager::new();
        let card = card(&mock, TransmitConfig::default());
        mock.push_response(&hex!("AA9000"));

        let mut response = BytesMut::from(&hex!("FFFF")[..]);
        let n = card
            .basic_channel()
            .transmit_raw(&hex!("00B0000001"), &mut response)
            .unwrap();
        assert_eq!(n, 3);
        assert_eq!(&response[..], &hex!("FFFFAA9000"));
    }

    #[test]
    fn test_close_accepts_configured_trailers() {
        let mock = MockManager::new();
        let card = card(&mock, TransmitConfig::default());
        mock.push_response(&hex!("039000"));
        mock.push_response(&hex!("6000"));

        let mut channel = card.open_logical_channel().unwrap();
        channel.close().unwrap();
        channel.close().unwrap();
        assert!(channel.is_closed());
        assert_eq!(mock.commands(), vec![hex!("0070000001").to_vec(), hex!("03708003").to_vec()]);

        let err = channel.transmit(&Command::new(0x00, 0xA4, 0x00, 0x00));
        assert!(matches!(err, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_close_rejects_unexpected_trailer() {
        let mock = MockManager::new();
        let card = card(
            &mock,
            TransmitConfig::default().with_close_channel_success([common::NULL_PROCEDURE]),
        );
        mock.push_response(&hex!("019000"));
        mock.push_response(&hex!("9000"));

        let mut channel = card.open_logical_channel().unwrap();
        assert!(matches!(channel.close(), Err(Error::ProtocolViolation(_))));
        // still counts as closed
        assert!(channel.close().is_ok());
    }

    #[test]
    fn test_failed_transmit_leaves_channel_usable() {
        let mock = MockManager::new();
        let card = card(&mock, TransmitConfig::default());
        let channel = card.basic_channel();

        mock.push_transmit_error(crate::scard::ScardError::COMM_ERROR);
        assert!(channel.transmit(&Command::new(0x00, 0xA4, 0x00, 0x00)).is_err());

        mock.push_response(&hex!("9000"));
        assert!(channel.transmit(&Command::new(0x00, 0xA4, 0x00, 0x00)).unwrap().is_success());
    }
}
