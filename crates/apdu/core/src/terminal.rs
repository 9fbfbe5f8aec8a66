//! Individual card readers

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::card::Card;
use crate::config::TransmitConfig;
use crate::error::{Error, ResultExt};
use crate::manager::{
    Connection, Disposition, Protocols, ReaderStateRecord, ResourceManager, ShareMode,
    State,
};
use crate::scard::ScardError;

/// A card reader known to the resource manager
pub struct Terminal<M: ResourceManager> {
    manager: Arc<M>,
    name: String,
    config: TransmitConfig,
}

impl<M: ResourceManager> std::fmt::Debug for Terminal<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Terminal").field("name", &self.name).finish()
    }
}

impl<M: ResourceManager> Clone for Terminal<M> {
    fn clone(&self) -> Self {
        Self {
            manager: Arc::clone(&self.manager),
            name: self.name.clone(),
            config: self.config.clone(),
        }
    }
}

impl<M: ResourceManager> Terminal<M> {
    /// Create a handle for the reader called `name`
    pub fn new(manager: Arc<M>, name: impl Into<String>, config: TransmitConfig) -> Self {
        Self {
            manager,
            name: name.into(),
            config,
        }
    }

    /// Reader name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Connect to the card in this reader
    ///
    /// `protocol` is one of `"T=0"`, `"T=1"`, `"*"` (either) or `"T=CL"`,
    /// which opens a direct connection without protocol negotiation.
    pub fn connect(&self, protocol: &str) -> Result<Card<M::Connection>, Error> {
        let (share_mode, protocols) = parse_protocol(protocol)?;

        let connection = self
            .manager
            .connect(&self.name, share_mode, protocols)
            .context(format!("Connecting to {} failed", self.name))?;

        let status = match connection.status() {
            Ok(status) => status,
            Err(e) => {
                if let Err(err) = connection.disconnect(Disposition::LeaveCard) {
                    debug!(reader = %self.name, error = %err, "Disconnect after failed status");
                }
                return Err(e).context(format!("Reading card status on {} failed", self.name));
            }
        };
        debug!(
            reader = %self.name,
            protocol = ?status.protocol,
            atr = %hex::encode(&status.atr),
            "Connected to card"
        );
        Ok(Card::new(
            connection,
            self.name.clone(),
            status.atr,
            status.protocol,
            self.config.clone(),
        ))
    }

    /// Whether a card is in the reader
    pub fn is_card_present(&self) -> Result<bool, Error> {
        let connection = match self
            .manager
            .connect(&self.name, ShareMode::Direct, Protocols::empty())
        {
            Ok(connection) => connection,
            Err(ScardError::NO_SMARTCARD) => return Ok(false),
            Err(e) => return Err(e).context(format!("Connecting to {} failed", self.name)),
        };

        let status = connection.status();
        let disconnected = connection.disconnect(Disposition::LeaveCard);
        let present = status
            .context(format!("Reading status of {} failed", self.name))?
            .present;
        disconnected.context(format!("Disconnecting from {} failed", self.name))?;
        Ok(present)
    }

    /// Wait until a card is in the reader
    ///
    /// `timeout_ms` of 0 waits forever. Returns `false` when the timeout elapsed.
    pub fn wait_for_card_present(&self, timeout_ms: i64) -> Result<bool, Error> {
        self.wait_for_presence(timeout_ms, true)
    }

    /// Wait until the reader is empty
    ///
    /// `timeout_ms` of 0 waits forever. Returns `false` when the timeout elapsed.
    pub fn wait_for_card_absent(&self, timeout_ms: i64) -> Result<bool, Error> {
        self.wait_for_presence(timeout_ms, false)
    }

    fn wait_for_presence(&self, timeout_ms: i64, present: bool) -> Result<bool, Error> {
        if timeout_ms < 0 {
            return Err(Error::invalid_argument(format!(
                "negative timeout {timeout_ms}"
            )));
        }
        let deadline =
            (timeout_ms > 0).then(|| Instant::now() + Duration::from_millis(timeout_ms as u64));

        let mut record = [ReaderStateRecord::new(self.name.as_str(), State::UNAWARE)];
        let mut timeout = Some(Duration::ZERO);
        loop {
            match self.manager.get_status_change(timeout, &mut record) {
                Ok(()) => {}
                Err(ScardError::TIMEOUT) => return Ok(false),
                Err(e) => {
                    return Err(e).context(format!("Waiting for card on {} failed", self.name));
                }
            }

            let state = record[0].event_state;
            if state.is_present() == present {
                return Ok(true);
            }
            if state.contains(State::UNKNOWN) {
                return Err(Error::from(ScardError::UNKNOWN_READER))
                    .context(format!("Reader {} went away", self.name));
            }

            timeout = match deadline {
                None => None,
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Ok(false);
                    }
                    Some(remaining)
                }
            };
            record[0].current_state = state;
        }
    }
}

/// Map a protocol string onto share mode and protocol mask
pub fn parse_protocol(protocol: &str) -> Result<(ShareMode, Protocols), Error> {
    match protocol {
        "T=0" => Ok((ShareMode::Shared, Protocols::T0)),
        "T=1" => Ok((ShareMode::Shared, Protocols::T1)),
        "*" => Ok((ShareMode::Shared, Protocols::ANY)),
        "T=CL" => Ok((ShareMode::Direct, Protocols::empty())),
        other => Err(Error::invalid_argument(format!(
            "unsupported protocol {other:?}"
        ))),
    }
}
