//! Entry point for applications

use std::sync::Arc;

use cardio_core::{Card, Error, ResultExt, Terminal, Terminals};
use pcsc::Context;
use tracing::debug;

use crate::config::PcscConfig;
use crate::connection::PcscConnection;
use crate::manager::PcscResourceManager;

/// Readers of a PC/SC context
pub type PcscTerminals = Terminals<PcscResourceManager>;

/// A PC/SC reader
pub type PcscTerminal = Terminal<PcscResourceManager>;

/// A card connected through PC/SC
pub type PcscCard = Card<PcscConnection>;

/// Owns a PC/SC context and hands out [`PcscTerminals`] bound to it
#[derive(Debug)]
pub struct PcscTerminalFactory {
    manager: Option<Arc<PcscResourceManager>>,
    config: PcscConfig,
}

impl PcscTerminalFactory {
    /// Establish a context with the default configuration
    pub fn establish() -> Result<Self, Error> {
        Self::with_config(PcscConfig::default())
    }

    /// Establish a context with a custom configuration
    pub fn with_config(config: PcscConfig) -> Result<Self, Error> {
        let manager = PcscResourceManager::establish(config.scope)
            .context("Establishing PC/SC context failed")?;
        Ok(Self {
            manager: Some(Arc::new(manager)),
            config,
        })
    }

    /// Use a context established elsewhere
    pub fn from_context(context: Context, config: PcscConfig) -> Self {
        Self {
            manager: Some(Arc::new(PcscResourceManager::from_context(context))),
            config,
        }
    }

    /// The configuration this factory was created with
    pub const fn config(&self) -> &PcscConfig {
        &self.config
    }

    /// Whether [`close`](Self::close) has been called
    pub const fn is_closed(&self) -> bool {
        self.manager.is_none()
    }

    /// Reader tracking bound to this factory's context
    pub fn terminals(&self) -> Result<PcscTerminals, Error> {
        let manager = self
            .manager
            .as_ref()
            .ok_or_else(|| Error::invalid("terminal factory has been closed"))?;
        Ok(Terminals::new(
            Arc::clone(manager),
            self.config.terminals.clone(),
        ))
    }

    /// Release the context
    ///
    /// When terminals handed out earlier are still alive the context is
    /// released once the last of them is dropped. Calling this more than once
    /// is a no-op.
    pub fn close(&mut self) -> Result<(), Error> {
        let Some(manager) = self.manager.take() else {
            return Ok(());
        };
        match Arc::try_unwrap(manager) {
            Ok(manager) => manager.release().context("Releasing PC/SC context failed"),
            Err(_) => {
                debug!("PC/SC context still in use, releasing on last drop");
                Ok(())
            }
        }
    }
}
