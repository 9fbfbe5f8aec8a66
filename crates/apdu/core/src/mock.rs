//! Scripted resource manager for tests
//!
//! [`MockManager`] simulates readers being attached and detached and cards
//! being inserted and removed, bumping the per-reader event counter the way
//! a real resource manager does. Connections replay queued responses and
//! record everything sent to them. Clones share state, so a test keeps one
//! handle while the code under test owns another.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::manager::{
    CardStatus, Connection, Disposition, PNP_READER_NAME, Protocol, Protocols, ReaderStateRecord,
    ResourceManager, ShareMode, State,
};
use crate::scard::ScardError;

#[derive(Debug, Clone)]
struct MockReader {
    name: String,
    card: Option<(Vec<u8>, Protocol)>,
    counter: u16,
}

impl MockReader {
    fn state(&self) -> State {
        let flags = if self.card.is_some() {
            State::PRESENT
        } else {
            State::EMPTY
        };
        flags.with_event_count(self.counter)
    }
}

/// Transaction bookkeeping entries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TransactionEvent {
    Begin,
    End(Disposition),
}

/// Everything observed on the card side
#[derive(Debug, Default)]
pub(crate) struct CardLog {
    pub(crate) responses: VecDeque<Result<Vec<u8>, ScardError>>,
    pub(crate) commands: Vec<Vec<u8>>,
    pub(crate) protocols: Vec<Protocol>,
    pub(crate) buffer_sizes: Vec<usize>,
    pub(crate) control_responses: VecDeque<Result<Vec<u8>, ScardError>>,
    pub(crate) control_calls: Vec<(u32, Vec<u8>, usize)>,
    pub(crate) transactions: Vec<TransactionEvent>,
    pub(crate) disconnects: Vec<Disposition>,
    pub(crate) connects: Vec<(String, ShareMode, Protocols)>,
}

#[derive(Debug, Default)]
struct ManagerState {
    readers: Vec<MockReader>,
    topology: u16,
    list_error: Option<ScardError>,
    status_errors: VecDeque<ScardError>,
    status_calls: Vec<Vec<ReaderStateRecord>>,
    timeouts: Vec<Option<Duration>>,
    cancel_pending: bool,
}

impl ManagerState {
    /// Fill in every record's event state, returning whether any differs
    fn report(&self, readers: &mut [ReaderStateRecord]) -> bool {
        let mut changed = false;
        for record in readers.iter_mut() {
            let (actual, atr) = if record.name == PNP_READER_NAME {
                (State::UNAWARE.with_event_count(self.topology), Vec::new())
            } else if let Some(reader) = self.readers.iter().find(|r| r.name == record.name) {
                let atr = reader.card.as_ref().map(|(atr, _)| atr.clone()).unwrap_or_default();
                (reader.state(), atr)
            } else {
                (State::UNKNOWN, Vec::new())
            };

            if record.current_state.difference(State::CHANGED) != actual {
                record.event_state = actual | State::CHANGED;
                changed = true;
            } else {
                record.event_state = actual;
            }
            record.atr = atr;
        }
        changed
    }
}

/// In-memory resource manager
#[derive(Debug, Clone, Default)]
pub(crate) struct MockManager {
    state: Arc<Mutex<ManagerState>>,
    log: Arc<Mutex<CardLog>>,
}

impl MockManager {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Attach an empty reader
    pub(crate) fn attach(&self, name: &str) {
        let mut state = self.state.lock();
        state.readers.push(MockReader {
            name: name.to_string(),
            card: None,
            counter: 0,
        });
        state.topology += 1;
    }

    /// Detach a reader, along with any card in it
    pub(crate) fn detach(&self, name: &str) {
        let mut state = self.state.lock();
        state.readers.retain(|r| r.name != name);
        state.topology += 1;
    }

    /// Put a card into `reader`
    pub(crate) fn insert(&self, reader: &str, atr: &[u8], protocol: Protocol) {
        self.with_reader(reader, |r| {
            r.card = Some((atr.to_vec(), protocol));
            r.counter += 1;
        });
    }

    /// Pull the card out of `reader`
    pub(crate) fn remove(&self, reader: &str) {
        self.with_reader(reader, |r| {
            r.card = None;
            r.counter += 1;
        });
    }

    /// Bump the event counter without changing presence
    pub(crate) fn bump(&self, reader: &str, by: u16) {
        self.with_reader(reader, |r| r.counter += by);
    }

    fn with_reader(&self, name: &str, f: impl FnOnce(&mut MockReader)) {
        let mut state = self.state.lock();
        if let Some(reader) = state.readers.iter_mut().find(|r| r.name == name) {
            f(reader);
        }
    }

    pub(crate) fn fail_list(&self, err: Option<ScardError>) {
        self.state.lock().list_error = err;
    }

    pub(crate) fn fail_next_status_change(&self, err: ScardError) {
        self.state.lock().status_errors.push_back(err);
    }

    /// Queue a response APDU for the next transmit
    pub(crate) fn push_response(&self, bytes: &[u8]) {
        self.log.lock().responses.push_back(Ok(bytes.to_vec()));
    }

    /// Queue a failure for the next transmit
    pub(crate) fn push_transmit_error(&self, err: ScardError) {
        self.log.lock().responses.push_back(Err(err));
    }

    pub(crate) fn push_control_response(&self, bytes: &[u8]) {
        self.log.lock().control_responses.push_back(Ok(bytes.to_vec()));
    }

    pub(crate) fn commands(&self) -> Vec<Vec<u8>> {
        self.log.lock().commands.clone()
    }

    pub(crate) fn log(&self) -> parking_lot::MutexGuard<'_, CardLog> {
        self.log.lock()
    }

    pub(crate) fn status_calls(&self) -> Vec<Vec<ReaderStateRecord>> {
        self.state.lock().status_calls.clone()
    }

    pub(crate) fn timeouts(&self) -> Vec<Option<Duration>> {
        self.state.lock().timeouts.clone()
    }

    /// Open a connection directly, bypassing terminal lookup
    pub(crate) fn connection(&self, protocol: Protocol) -> MockConnection {
        MockConnection {
            reader: "Mock Reader 0".to_string(),
            atr: vec![0x3B, 0x00],
            protocol: Some(protocol),
            log: Arc::clone(&self.log),
        }
    }
}

impl ResourceManager for MockManager {
    type Connection = MockConnection;

    fn list_readers(&self) -> Result<Vec<String>, ScardError> {
        let state = self.state.lock();
        if let Some(err) = state.list_error {
            return Err(err);
        }
        if state.readers.is_empty() {
            return Err(ScardError::NO_READERS_AVAILABLE);
        }
        Ok(state.readers.iter().map(|r| r.name.clone()).collect())
    }

    fn connect(
        &self,
        reader: &str,
        share_mode: ShareMode,
        protocols: Protocols,
    ) -> Result<Self::Connection, ScardError> {
        self.log
            .lock()
            .connects
            .push((reader.to_string(), share_mode, protocols));

        let state = self.state.lock();
        let reader = state
            .readers
            .iter()
            .find(|r| r.name == reader)
            .ok_or(ScardError::UNKNOWN_READER)?;

        let (atr, protocol) = match (&reader.card, share_mode) {
            (_, ShareMode::Direct) => (
                reader.card.as_ref().map(|(atr, _)| atr.clone()).unwrap_or_default(),
                None,
            ),
            (None, _) => return Err(ScardError::NO_SMARTCARD),
            (Some((atr, protocol)), _) => {
                let wanted = match protocol {
                    Protocol::T0 => Protocols::T0,
                    Protocol::T1 => Protocols::T1,
                    Protocol::Raw => Protocols::empty(),
                };
                if !wanted.is_empty() && !protocols.contains(wanted) {
                    return Err(ScardError::PROTO_MISMATCH);
                }
                (atr.clone(), Some(*protocol))
            }
        };

        Ok(MockConnection {
            reader: reader.name.clone(),
            atr,
            protocol,
            log: Arc::clone(&self.log),
        })
    }

    fn get_status_change(
        &self,
        timeout: Option<Duration>,
        readers: &mut [ReaderStateRecord],
    ) -> Result<(), ScardError> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        {
            let mut state = self.state.lock();
            state.status_calls.push(readers.to_vec());
            state.timeouts.push(timeout);
            if let Some(err) = state.status_errors.pop_front() {
                return Err(err);
            }
        }

        // Blocks like SCardGetStatusChange until a record changes or the wait ends
        loop {
            {
                let mut state = self.state.lock();
                if std::mem::take(&mut state.cancel_pending) {
                    return Err(ScardError::CANCELLED);
                }
                if state.report(readers) || timeout == Some(Duration::ZERO) {
                    return Ok(());
                }
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return Err(ScardError::TIMEOUT);
            }
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn cancel(&self) -> Result<(), ScardError> {
        self.state.lock().cancel_pending = true;
        Ok(())
    }
}

/// Connection replaying the responses queued on its [`MockManager`]
#[derive(Debug)]
pub(crate) struct MockConnection {
    reader: String,
    atr: Vec<u8>,
    protocol: Option<Protocol>,
    log: Arc<Mutex<CardLog>>,
}

impl Connection for MockConnection {
    fn status(&self) -> Result<CardStatus, ScardError> {
        Ok(CardStatus {
            reader_names: vec![self.reader.clone()],
            present: !self.atr.is_empty(),
            protocol: self.protocol,
            atr: self.atr.clone(),
        })
    }

    fn transmit(
        &mut self,
        protocol: Protocol,
        command: &[u8],
        response: &mut [u8],
    ) -> Result<usize, ScardError> {
        if self.protocol.is_none() {
            return Err(ScardError::PROTO_MISMATCH);
        }

        let mut log = self.log.lock();
        log.commands.push(command.to_vec());
        log.protocols.push(protocol);
        log.buffer_sizes.push(response.len());

        let reply = log.responses.pop_front().unwrap_or(Ok(vec![0x6F, 0x00]))?;
        if reply.len() > response.len() {
            return Err(ScardError::INSUFFICIENT_BUFFER);
        }
        response[..reply.len()].copy_from_slice(&reply);
        Ok(reply.len())
    }

    fn control(&mut self, code: u32, input: &[u8], output: &mut [u8]) -> Result<usize, ScardError> {
        let mut log = self.log.lock();
        log.control_calls.push((code, input.to_vec(), output.len()));
        let reply = log.control_responses.pop_front().unwrap_or(Ok(Vec::new()))?;
        output[..reply.len()].copy_from_slice(&reply);
        Ok(reply.len())
    }

    fn begin_transaction(&mut self) -> Result<(), ScardError> {
        self.log.lock().transactions.push(TransactionEvent::Begin);
        Ok(())
    }

    fn end_transaction(&mut self, disposition: Disposition) -> Result<(), ScardError> {
        self.log
            .lock()
            .transactions
            .push(TransactionEvent::End(disposition));
        Ok(())
    }

    fn disconnect(self, disposition: Disposition) -> Result<(), ScardError> {
        self.log.lock().disconnects.push(disposition);
        Ok(())
    }
}
