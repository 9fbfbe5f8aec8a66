//! Smart-card resource manager capability
//!
//! Everything in this crate reaches the hardware through the two traits in
//! this module. [`ResourceManager`] is the context-level half (enumerating
//! readers, connecting, waiting for state changes) and [`Connection`] the
//! card-level half (transmit, control, transactions). Implementations report
//! failures as a bare [`ScardError`]; interpretation of the codes happens in
//! the callers.

use std::fmt;
use std::time::Duration;

use bitflags::bitflags;

use crate::scard::ScardError;

/// Name of the pseudo reader that signals readers being attached or detached
pub const PNP_READER_NAME: &str = r"\\?PnP?\Notification";

/// Sharing mode for card connections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShareMode {
    /// Exclusive access to the card
    Exclusive,
    /// Shared access to the card
    Shared,
    /// Direct connection to the reader, no card required
    Direct,
}

/// Transmission protocol negotiated with a card
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// Character-oriented half-duplex protocol
    T0,
    /// Block-oriented half-duplex protocol
    T1,
    /// Raw frames, used for contactless and direct connections
    Raw,
}

impl Protocol {
    /// The conventional name of this protocol
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::T0 => "T=0",
            Self::T1 => "T=1",
            Self::Raw => "T=CL",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

bitflags! {
    /// Set of protocols acceptable when connecting
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Protocols: u32 {
        /// T=0
        const T0 = 0x0001;
        /// T=1
        const T1 = 0x0002;
    }
}

impl Protocols {
    /// Either T=0 or T=1
    pub const ANY: Self = Self::T0.union(Self::T1);
}

/// What to do with the card when releasing a connection or transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Disposition {
    /// Leave the card as is
    LeaveCard,
    /// Warm reset
    ResetCard,
    /// Power the card down
    UnpowerCard,
    /// Eject the card, where the reader supports it
    EjectCard,
}

bitflags! {
    /// Reader state word as reported by the resource manager
    ///
    /// The upper 16 bits carry an event counter that the resource manager
    /// increments on every card insertion or removal.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct State: u32 {
        /// The application is not aware of the current state
        const UNAWARE = 0x0000;
        /// The reader should be ignored
        const IGNORE = 0x0001;
        /// The state differs from the current state passed in
        const CHANGED = 0x0002;
        /// The reader name is not recognized
        const UNKNOWN = 0x0004;
        /// The state of the reader is unavailable
        const UNAVAILABLE = 0x0008;
        /// No card in the reader
        const EMPTY = 0x0010;
        /// A card is in the reader
        const PRESENT = 0x0020;
        /// The card ATR matches a requested ATR
        const ATRMATCH = 0x0040;
        /// The card is allocated for exclusive use by another application
        const EXCLUSIVE = 0x0080;
        /// The card is in use by one or more applications
        const INUSE = 0x0100;
        /// The card does not respond
        const MUTE = 0x0200;
        /// The card is not powered
        const UNPOWERED = 0x0400;

        const _ = !0;
    }
}

impl State {
    /// The 16-bit event counter packed into the high bits
    pub const fn event_count(&self) -> u16 {
        (self.bits() >> 16) as u16
    }

    /// Whether the PRESENT bit is set
    pub const fn is_present(&self) -> bool {
        self.contains(Self::PRESENT)
    }

    /// The same flags carrying another event counter
    pub const fn with_event_count(&self, count: u16) -> Self {
        Self::from_bits_retain((self.bits() & 0xFFFF) | ((count as u32) << 16))
    }
}

/// One entry of the array exchanged with [`ResourceManager::get_status_change`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderStateRecord {
    /// Reader name
    pub name: String,
    /// State the caller believes the reader is in
    pub current_state: State,
    /// State reported back by the resource manager
    pub event_state: State,
    /// ATR of the card in the reader, empty when there is none
    pub atr: Vec<u8>,
}

impl ReaderStateRecord {
    /// Create a record for `name` with the given current state
    pub fn new(name: impl Into<String>, current_state: State) -> Self {
        Self {
            name: name.into(),
            current_state,
            event_state: State::UNAWARE,
            atr: Vec::new(),
        }
    }
}

/// Snapshot of a connected card
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardStatus {
    /// Names under which the reader is known
    pub reader_names: Vec<String>,
    /// Whether a card is in the reader
    pub present: bool,
    /// Active protocol, none for direct connections
    pub protocol: Option<Protocol>,
    /// Answer to reset
    pub atr: Vec<u8>,
}

/// Context-level operations of a smart-card resource manager
pub trait ResourceManager: Send + Sync + fmt::Debug {
    /// Connection handle type
    type Connection: Connection;

    /// Names of the readers currently attached
    fn list_readers(&self) -> Result<Vec<String>, ScardError>;

    /// Connect to the card in `reader`
    fn connect(
        &self,
        reader: &str,
        share_mode: ShareMode,
        protocols: Protocols,
    ) -> Result<Self::Connection, ScardError>;

    /// Block until one of `readers` differs from its `current_state`
    ///
    /// `None` waits forever. On return every record's `event_state` and
    /// `atr` are filled in.
    fn get_status_change(
        &self,
        timeout: Option<Duration>,
        readers: &mut [ReaderStateRecord],
    ) -> Result<(), ScardError>;

    /// Abort a blocking [`get_status_change`](Self::get_status_change) from another thread
    fn cancel(&self) -> Result<(), ScardError>;
}

/// Card-level operations on one connection
pub trait Connection: Send + fmt::Debug {
    /// Current status of the card and reader
    fn status(&self) -> Result<CardStatus, ScardError>;

    /// Send `command` with the protocol control information of `protocol`
    ///
    /// Returns the number of bytes written to `response`.
    fn transmit(
        &mut self,
        protocol: Protocol,
        command: &[u8],
        response: &mut [u8],
    ) -> Result<usize, ScardError>;

    /// Send a reader control code
    fn control(&mut self, code: u32, input: &[u8], output: &mut [u8]) -> Result<usize, ScardError>;

    /// Acquire the exclusive transaction lock
    fn begin_transaction(&mut self) -> Result<(), ScardError>;

    /// Release the transaction lock
    fn end_transaction(&mut self, disposition: Disposition) -> Result<(), ScardError>;

    /// Close the connection
    fn disconnect(self, disposition: Disposition) -> Result<(), ScardError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_counter_round_trip() {
        let state = State::PRESENT.with_event_count(7);
        assert_eq!(state.event_count(), 7);
        assert!(state.is_present());
        assert_eq!(state.bits(), 0x0007_0020);

        let raw = State::from_bits_retain(0xFFFF_0012);
        assert_eq!(raw.event_count(), 0xFFFF);
        assert!(raw.contains(State::CHANGED | State::EMPTY));
        assert!(!raw.is_present());
    }

    #[test]
    fn test_protocol_names() {
        assert_eq!(Protocol::T0.to_string(), "T=0");
        assert_eq!(Protocol::T1.as_str(), "T=1");
        assert_eq!(Protocol::Raw.as_str(), "T=CL");
        assert_eq!(Protocols::ANY.bits(), 0x3);
    }
}
