//! PC/SC backend for cardio
//!
//! Implements [`ResourceManager`](cardio_core::ResourceManager) and
//! [`Connection`](cardio_core::Connection) on top of the `pcsc` crate, and
//! provides [`PcscTerminalFactory`] as the entry point for applications.
//!
//! ```no_run
//! use cardio_core::prelude::*;
//! use cardio_pcsc::PcscTerminalFactory;
//!
//! # fn main() -> Result<(), Error> {
//! let factory = PcscTerminalFactory::establish()?;
//! let terminals = factory.terminals()?;
//! for terminal in terminals.list(ListFilter::All)? {
//!     println!("{}", terminal.name());
//! }
//! # Ok(())
//! # }
//! ```
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

pub mod config;
pub mod connection;
pub mod factory;
pub mod manager;
pub mod util;

pub use config::PcscConfig;
pub use connection::PcscConnection;
pub use factory::{PcscCard, PcscTerminal, PcscTerminalFactory, PcscTerminals};
pub use manager::PcscResourceManager;
pub use util::split_multi_string;

// Re-export pcsc for callers that need the raw context
pub use pcsc;
