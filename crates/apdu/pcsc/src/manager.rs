//! Resource manager backed by a PC/SC context

use std::ffi::CString;
use std::fmt;
use std::time::Duration;

use cardio_core::{
    Protocols, ReaderStateRecord, ResourceManager, ScardError, ShareMode, State,
};
use pcsc::{Context, ReaderState, Scope};
use tracing::{debug, trace};

use crate::config;
use crate::connection::PcscConnection;

/// Convert a `pcsc` error into its raw status code
pub(crate) fn scard_error(err: pcsc::Error) -> ScardError {
    ScardError::new(err as u32)
}

fn reader_cstring(name: &str) -> Result<CString, ScardError> {
    CString::new(name).map_err(|_| ScardError::INVALID_PARAMETER)
}

/// A PC/SC context
pub struct PcscResourceManager {
    context: Context,
}

impl fmt::Debug for PcscResourceManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PcscResourceManager").finish_non_exhaustive()
    }
}

impl PcscResourceManager {
    /// Establish a new context
    pub fn establish(scope: Scope) -> Result<Self, ScardError> {
        let context = Context::establish(scope).map_err(scard_error)?;
        debug!("Established PC/SC context");
        Ok(Self { context })
    }

    /// Wrap an existing context
    pub const fn from_context(context: Context) -> Self {
        Self { context }
    }

    /// The wrapped context
    pub const fn context(&self) -> &Context {
        &self.context
    }

    /// Release the context
    pub fn release(self) -> Result<(), ScardError> {
        self.context.release().map_err(|(_, err)| scard_error(err))?;
        debug!("Released PC/SC context");
        Ok(())
    }
}

impl ResourceManager for PcscResourceManager {
    type Connection = PcscConnection;

    fn list_readers(&self) -> Result<Vec<String>, ScardError> {
        let readers = self.context.list_readers_owned().map_err(scard_error)?;
        Ok(readers
            .into_iter()
            .map(|name| name.to_string_lossy().into_owned())
            .collect())
    }

    fn connect(
        &self,
        reader: &str,
        share_mode: ShareMode,
        protocols: Protocols,
    ) -> Result<Self::Connection, ScardError> {
        let name = reader_cstring(reader)?;
        let card = self
            .context
            .connect(&name, config::share_mode(share_mode), config::protocols(protocols))
            .map_err(scard_error)?;
        trace!(reader, ?share_mode, ?protocols, "Connected");
        Ok(PcscConnection::new(card, reader, share_mode == ShareMode::Direct))
    }

    fn get_status_change(
        &self,
        timeout: Option<Duration>,
        readers: &mut [ReaderStateRecord],
    ) -> Result<(), ScardError> {
        let mut states = readers
            .iter()
            .map(|record| {
                let current = pcsc::State::from_bits_retain(record.current_state.bits().into());
                Ok(ReaderState::new(reader_cstring(&record.name)?, current))
            })
            .collect::<Result<Vec<_>, ScardError>>()?;

        self.context
            .get_status_change(timeout, &mut states)
            .map_err(scard_error)?;

        for (record, state) in readers.iter_mut().zip(&states) {
            let flags = state.event_state().bits() as u32 & 0xFFFF;
            record.event_state = State::from_bits_retain(flags).with_event_count(state.event_count() as u16);
            record.atr = state.atr().to_vec();
        }
        Ok(())
    }

    fn cancel(&self) -> Result<(), ScardError> {
        self.context.cancel().map_err(scard_error)
    }
}
