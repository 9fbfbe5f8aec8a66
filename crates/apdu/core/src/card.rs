//! Card sessions
//!
//! A [`Card`] owns one connection to a card along with what was learned when
//! connecting: the ATR and the negotiated protocol, if any. Direct
//! connections carry no protocol and refuse to transmit. Channels borrow the card
//! and share its connection, which is guarded by a mutex so that every
//! exchange on every channel is strictly sequential.

use std::fmt;

use bytes::BytesMut;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::channel::Channel;
use crate::class::MAX_CHANNEL;
use crate::config::TransmitConfig;
use crate::engine::Engine;
use crate::error::{Error, ResultExt};
use crate::manager::{Connection, Disposition, Protocol};
use crate::response::Response;
use crate::response::status::common;

/// MANAGE CHANNEL open, asking the card to pick the channel number
const MANAGE_CHANNEL_OPEN: [u8; 5] = [0x00, 0x70, 0x00, 0x00, 0x01];

/// Receive buffer for reader control codes
const CONTROL_BUFFER_SIZE: usize = 8192;

/// A connected card
pub struct Card<C: Connection> {
    connection: Mutex<Option<C>>,
    reader: String,
    atr: Vec<u8>,
    protocol: Option<Protocol>,
    config: TransmitConfig,
}

impl<C: Connection> fmt::Debug for Card<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Card")
            .field("reader", &self.reader)
            .field("atr", &hex::encode(&self.atr))
            .field("protocol", &self.protocol)
            .field("connected", &self.connection.lock().is_some())
            .finish()
    }
}

impl<C: Connection> Card<C> {
    /// Wrap an established connection
    pub fn new(
        connection: C,
        reader: impl Into<String>,
        atr: Vec<u8>,
        protocol: Option<Protocol>,
        config: TransmitConfig,
    ) -> Self {
        Self {
            connection: Mutex::new(Some(connection)),
            reader: reader.into(),
            atr,
            protocol,
            config,
        }
    }

    /// Name of the reader the card sits in
    pub fn reader_name(&self) -> &str {
        &self.reader
    }

    /// Answer to reset captured when connecting
    pub fn atr(&self) -> &[u8] {
        &self.atr
    }

    /// Negotiated protocol as `"T=0"`, `"T=1"` or `"T=CL"`
    ///
    /// Direct connections without a protocol report `"T=CL"` as well.
    pub const fn protocol(&self) -> &'static str {
        match self.protocol {
            Some(protocol) => protocol.as_str(),
            None => Protocol::Raw.as_str(),
        }
    }

    /// Negotiated protocol, `None` for a direct connection
    pub const fn active_protocol(&self) -> Option<Protocol> {
        self.protocol
    }

    /// Transmission settings used by this card's channels
    pub const fn config(&self) -> &TransmitConfig {
        &self.config
    }

    /// Whether [`disconnect`](Self::disconnect) has been called
    pub fn is_connected(&self) -> bool {
        self.connection.lock().is_some()
    }

    /// The basic channel, number 0
    pub fn basic_channel(&self) -> Channel<'_, C> {
        Channel::new(self, 0)
    }

    /// Ask the card for a new logical channel with MANAGE CHANNEL
    pub fn open_logical_channel(&self) -> Result<Channel<'_, C>, Error> {
        let mut buf = BytesMut::new();
        self.transmit_on(0, &MANAGE_CHANNEL_OPEN, &mut buf)
            .context("Failed to open logical channel")?;
        let response = Response::from_bytes(&buf)?;

        if response.status() != common::SUCCESS {
            return Err(Error::protocol_violation(format!(
                "MANAGE CHANNEL open failed with status {} ({})",
                response.status(),
                response.status().description()
            )));
        }

        match response.payload().as_ref() {
            [number @ 1..=MAX_CHANNEL] => {
                debug!(channel = number, reader = %self.reader, "Opened logical channel");
                Ok(Channel::new(self, *number))
            }
            other => Err(Error::protocol_violation(format!(
                "MANAGE CHANNEL open returned unexpected data {}",
                hex::encode(other)
            ))),
        }
    }

    /// Acquire the resource manager's transaction lock on this card
    pub fn begin_exclusive(&self) -> Result<(), Error> {
        self.with_connection(|conn| conn.begin_transaction().map_err(Error::from))
    }

    /// Release the transaction lock, leaving the card as is
    pub fn end_exclusive(&self) -> Result<(), Error> {
        self.with_connection(|conn| {
            conn.end_transaction(Disposition::LeaveCard)
                .map_err(Error::from)
        })
    }

    /// Send a reader control code and return the reader's answer
    pub fn transmit_control_command(&self, code: u32, data: &[u8]) -> Result<Vec<u8>, Error> {
        self.with_connection(|conn| {
            let mut output = vec![0u8; CONTROL_BUFFER_SIZE];
            let len = conn
                .control(code, data, &mut output)
                .context(format!("Control code {code:#010x} failed"))?;
            output.truncate(len);
            Ok(output)
        })
    }

    /// Close the connection, resetting the card when `reset` is set
    ///
    /// Calling this more than once is a no-op.
    pub fn disconnect(&self, reset: bool) -> Result<(), Error> {
        let Some(connection) = self.connection.lock().take() else {
            return Ok(());
        };

        let disposition = if reset {
            Disposition::ResetCard
        } else {
            Disposition::LeaveCard
        };
        debug!(reader = %self.reader, ?disposition, "Disconnecting card");
        connection.disconnect(disposition).map_err(Error::from)
    }

    /// Run the transmission loop for `channel`
    pub(crate) fn transmit_on(
        &self,
        channel: u8,
        command: &[u8],
        response: &mut BytesMut,
    ) -> Result<usize, Error> {
        let protocol = self.transmit_protocol()?;
        let convert = self.config.convert_to_short_apdus && protocol == Protocol::T0;
        self.with_connection(|conn| {
            Engine::new(conn, protocol, channel, convert, &self.config).transmit(command, response)
        })
    }

    /// Single exchange on `channel` with a fixed receive size
    pub(crate) fn transmit_once_on(
        &self,
        channel: u8,
        command: &[u8],
        response: &mut BytesMut,
        capacity: usize,
    ) -> Result<usize, Error> {
        let protocol = self.transmit_protocol()?;
        self.with_connection(|conn| {
            Engine::new(conn, protocol, channel, false, &self.config)
                .transmit_once(command, response, capacity)
        })
    }

    fn transmit_protocol(&self) -> Result<Protocol, Error> {
        self.protocol.ok_or_else(|| {
            Error::invalid_argument(format!(
                "no protocol was negotiated on {}, direct connections cannot transmit",
                self.reader
            ))
        })
    }

    fn with_connection<R>(&self, f: impl FnOnce(&mut C) -> Result<R, Error>) -> Result<R, Error> {
        let mut guard = self.connection.lock();
        let connection = guard
            .as_mut()
            .ok_or_else(|| Error::invalid("card has been disconnected"))?;
        f(connection)
    }
}

impl<C: Connection> Drop for Card<C> {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.get_mut().take() {
            if let Err(e) = connection.disconnect(Disposition::LeaveCard) {
                warn!(reader = %self.reader, error = %e, "Failed to disconnect card on drop");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockManager, TransactionEvent};
    use hex_literal::hex;

    fn card(mock: &MockManager, protocol: Protocol) -> Card<crate::mock::MockConnection> {
        Card::new(
            mock.connection(protocol),
            "Mock Reader 0",
            hex!("3B8F8001").to_vec(),
            Some(protocol),
            TransmitConfig::default(),
        )
    }

    #[test]
    fn test_session_info() {
        let mock = MockManager::new();
        let card = card(&mock, Protocol::T0);
        assert_eq!(card.atr(), &hex!("3B8F8001"));
        assert_eq!(card.protocol(), "T=0");
        assert_eq!(card.reader_name(), "Mock Reader 0");
        assert_eq!(card.basic_channel().number(), 0);

        let raw = self::card(&mock, Protocol::Raw);
        assert_eq!(raw.protocol(), "T=CL");
        assert_eq!(raw.active_protocol(), Some(Protocol::Raw));
    }

    #[test]
    fn test_direct_connection_refuses_transmit() {
        let mock = MockManager::new();
        let card = Card::new(
            mock.connection(Protocol::T1),
            "Mock Reader 0",
            Vec::new(),
            None,
            TransmitConfig::default(),
        );
        assert_eq!(card.protocol(), "T=CL");
        assert_eq!(card.active_protocol(), None);

        let err = card
            .basic_channel()
            .transmit_raw(&hex!("00A4040000"), &mut BytesMut::new())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert!(card.open_logical_channel().is_err());
        assert!(mock.commands().is_empty());

        // control codes do not need a protocol
        mock.push_control_response(&hex!("00"));
        assert_eq!(card.transmit_control_command(0x4233_0000, &[]).unwrap(), hex!("00"));
    }

    #[test]
    fn test_open_logical_channel() {
        let mock = MockManager::new();
        let card = card(&mock, Protocol::T1);
        mock.push_response(&hex!("029000"));

        let channel = card.open_logical_channel().unwrap();
        assert_eq!(channel.number(), 2);
        assert_eq!(mock.commands(), vec![hex!("0070000001").to_vec()]);
    }

    #[test]
    fn test_open_logical_channel_rejects_bad_answers() {
        let mock = MockManager::new();
        let card = card(&mock, Protocol::T1);

        mock.push_response(&hex!("6881"));
        assert!(matches!(
            card.open_logical_channel(),
            Err(Error::ProtocolViolation(_))
        ));

        mock.push_response(&hex!("149000"));
        assert!(matches!(
            card.open_logical_channel(),
            Err(Error::ProtocolViolation(_))
        ));

        mock.push_response(&hex!("01029000"));
        assert!(card.open_logical_channel().is_err());
    }

    #[test]
    fn test_exclusive_and_control() {
        let mock = MockManager::new();
        let card = card(&mock, Protocol::T1);
        mock.push_control_response(&hex!("0102"));

        card.begin_exclusive().unwrap();
        let out = card.transmit_control_command(0x4233_0000, &hex!("AA")).unwrap();
        card.end_exclusive().unwrap();

        assert_eq!(out, hex!("0102"));
        let log = mock.log();
        assert_eq!(
            log.transactions,
            vec![
                TransactionEvent::Begin,
                TransactionEvent::End(Disposition::LeaveCard)
            ]
        );
        assert_eq!(log.control_calls, vec![(0x4233_0000, vec![0xAA], 8192)]);
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let mock = MockManager::new();
        let card = card(&mock, Protocol::T1);

        card.disconnect(true).unwrap();
        card.disconnect(false).unwrap();
        assert!(!card.is_connected());
        assert_eq!(mock.log().disconnects, vec![Disposition::ResetCard]);

        let err = card.basic_channel().transmit_raw(&hex!("00B0000000"), &mut BytesMut::new());
        assert!(matches!(err, Err(Error::InvalidArgument(_))));

        drop(card);
        assert_eq!(mock.log().disconnects.len(), 1);
    }

    #[test]
    fn test_drop_disconnects() {
        let mock = MockManager::new();
        drop(card(&mock, Protocol::T1));
        assert_eq!(mock.log().disconnects, vec![Disposition::LeaveCard]);
    }
}
