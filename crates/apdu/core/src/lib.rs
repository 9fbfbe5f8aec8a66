//! APDU transmission and reader tracking on top of a smart-card resource manager
//!
//! This crate sits between an application and a PC/SC style resource manager.
//! It knows the ISO/IEC 7816-4 rules the resource manager leaves to the
//! caller:
//!
//! - Chaining `61 xx` answers with GET RESPONSE and retrying `6C xx` answers
//!   with the corrected Le
//! - Reshaping extended APDUs into T=0 TPDUs
//! - Encoding logical channel numbers 0 to 19 into the class byte
//! - Opening and closing logical channels with MANAGE CHANNEL
//! - Tracking readers and cards across polls, including cards swapped between
//!   two polls
//!
//! The resource manager itself is abstracted behind [`ResourceManager`] and
//! [`Connection`]; `cardio-pcsc` provides the implementation backed by the
//! `pcsc` crate.
//!
//! ## Example
//!
//! ```ignore
//! let mut terminals = factory.terminals();
//! for terminal in terminals.list(ListFilter::CardPresent)? {
//!     let card = terminal.connect("*")?;
//!     let response = card
//!         .basic_channel()
//!         .transmit(&Command::new_with_le(0x00, 0xCA, 0x9F, 0x7F, 0))?;
//!     println!("{}: {}", terminal.name(), response.status());
//! }
//! ```
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

// Re-export bytes for convenience
pub use bytes::{Bytes, BytesMut};

pub mod card;
pub mod channel;
pub mod class;
pub mod command;
pub mod config;
mod engine;
pub mod error;
pub mod event;
pub mod manager;
pub mod monitor;
pub mod reconciler;
pub mod response;
pub mod scard;
pub mod shape;
pub mod terminal;
pub mod terminals;
pub mod tpdu;

#[cfg(test)]
pub(crate) mod mock;

pub use card::Card;
pub use channel::Channel;
pub use command::Command;
pub use config::{MonitorConfig, TerminalsConfig, TransmitConfig};
pub use error::{Error, ResultExt};
pub use event::{CardEvent, Event, ReaderEvent};
pub use manager::{
    CardStatus, Connection, Disposition, PNP_READER_NAME, Protocol, Protocols, ReaderStateRecord,
    ResourceManager, ShareMode, State,
};
pub use monitor::Monitor;
pub use response::Response;
pub use response::status::StatusWord;
pub use scard::ScardError;
pub use terminal::Terminal;
pub use terminals::{Cancel, ListFilter, Terminals};

/// Prelude module containing commonly used traits and types
pub mod prelude {
    pub use crate::{Bytes, BytesMut, Error, ResultExt};

    // Commands and responses
    pub use crate::Command;
    pub use crate::Response;
    pub use crate::response::status::{StatusWord, common as status};

    // Readers and cards
    pub use crate::{Card, Channel, ListFilter, Terminal, Terminals};

    // Events
    pub use crate::event::{CardEvent, Event, EventHandler, ReaderEvent};
    pub use crate::monitor::Monitor;

    // Resource manager capability
    pub use crate::manager::{Connection, ResourceManager};
}

#[cfg(test)]
mod tests {
    use super::*;

    // Test the basic types are re-exported correctly
    #[test]
    fn test_reexports() {
        let cmd = Command::new(0x00, 0xA4, 0x04, 0x00);
        assert_eq!(cmd.class(), 0x00);
        assert_eq!(cmd.instruction(), 0xA4);
        assert_eq!(cmd.p1(), 0x04);
        assert_eq!(cmd.p2(), 0x00);

        let data = Bytes::from_static(&[0x01, 0x02, 0x03]);
        let resp = Response::success(data.clone());
        assert!(resp.is_success());
        assert_eq!(resp.payload(), &data);
        assert_eq!(resp.status(), StatusWord::new(0x90, 0x00));
    }
}
