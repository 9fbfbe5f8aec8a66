//! Card connections backed by `pcsc::Card`
//!
//! `pcsc::Transaction` borrows the card mutably for as long as the lock is
//! held, which does not fit the split `begin_transaction` / `end_transaction`
//! calls of [`Connection`]. While a transaction is open the card is moved onto
//! a worker thread that holds the `Transaction` and serves requests over a
//! channel, so that every begin is paired with exactly one
//! `SCardEndTransaction`.

use std::fmt;
use std::thread::{self, JoinHandle};

use cardio_core::{CardStatus, Connection, Disposition, Protocol, ScardError};
use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use tracing::{debug, trace, warn};

use crate::config;
use crate::manager::scard_error;

/// A connection to a card through PC/SC
pub struct PcscConnection {
    /// `None` while the card sits on the transaction worker
    card: Option<pcsc::Card>,
    session: Option<ExclusiveSession>,
    reader: String,
    direct: bool,
}

impl fmt::Debug for PcscConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PcscConnection")
            .field("reader", &self.reader)
            .field("direct", &self.direct)
            .field("exclusive", &self.session.is_some())
            .finish_non_exhaustive()
    }
}

impl PcscConnection {
    /// `direct` marks a connection opened without protocol negotiation
    pub(crate) fn new(card: pcsc::Card, reader: impl Into<String>, direct: bool) -> Self {
        Self {
            card: Some(card),
            session: None,
            reader: reader.into(),
            direct,
        }
    }

    /// Name of the reader this connection goes to
    pub fn reader(&self) -> &str {
        &self.reader
    }

    /// Whether a transaction is currently held
    pub const fn is_exclusive(&self) -> bool {
        self.session.is_some()
    }

    fn card(&self) -> Result<&pcsc::Card, ScardError> {
        self.card.as_ref().ok_or(ScardError::INVALID_HANDLE)
    }
}

const fn protocol(protocol: pcsc::Protocol) -> Protocol {
    match protocol {
        pcsc::Protocol::T0 => Protocol::T0,
        pcsc::Protocol::T1 => Protocol::T1,
        pcsc::Protocol::RAW => Protocol::Raw,
    }
}

fn card_status(card: &pcsc::Card) -> Result<CardStatus, ScardError> {
    let status = card.status2_owned().map_err(scard_error)?;
    Ok(CardStatus {
        reader_names: status
            .reader_names()
            .iter()
            .map(|name| name.to_string_lossy().into_owned())
            .collect(),
        present: status.status().contains(pcsc::Status::PRESENT),
        protocol: status.protocol2().map(protocol),
        atr: status.atr().to_vec(),
    })
}

fn card_transmit(
    card: &pcsc::Card,
    command: &[u8],
    response: &mut [u8],
) -> Result<usize, ScardError> {
    Ok(card.transmit(command, response).map_err(scard_error)?.len())
}

fn card_control(
    card: &pcsc::Card,
    code: u32,
    input: &[u8],
    output: &mut [u8],
) -> Result<usize, ScardError> {
    Ok(card
        .control(code.into(), input, output)
        .map_err(scard_error)?
        .len())
}

type Reply<T> = Sender<Result<T, ScardError>>;

enum Request {
    Status(Reply<CardStatus>),
    Transmit {
        command: Vec<u8>,
        capacity: usize,
        reply: Reply<Vec<u8>>,
    },
    Control {
        code: u32,
        input: Vec<u8>,
        capacity: usize,
        reply: Reply<Vec<u8>>,
    },
    End {
        disposition: Disposition,
        reply: Reply<()>,
    },
}

/// A transaction held on the worker thread
struct ExclusiveSession {
    requests: Sender<Request>,
    worker: JoinHandle<pcsc::Card>,
    /// Nested begins on the same connection, released one by one
    depth: usize,
}

impl ExclusiveSession {
    fn start(card: pcsc::Card, reader: &str) -> Result<Self, (Option<pcsc::Card>, ScardError)> {
        let (ready, started) = bounded(1);
        let (requests, queue) = unbounded();
        let worker = thread::Builder::new()
            .name(format!("cardio-transaction {reader}"))
            .spawn(move || run_exclusive(card, &ready, &queue))
            .map_err(|e| {
                warn!(error = %e, "Failed to spawn transaction worker");
                (None, ScardError::NO_MEMORY)
            })?;

        match started.recv() {
            Ok(Ok(())) => Ok(Self {
                requests,
                worker,
                depth: 1,
            }),
            Ok(Err(err)) => Err((Self::join(worker), err)),
            Err(_) => Err((Self::join(worker), ScardError::INTERNAL_ERROR)),
        }
    }

    fn call<T>(&self, request: impl FnOnce(Reply<T>) -> Request) -> Result<T, ScardError> {
        let (reply, response) = bounded(1);
        self.requests
            .send(request(reply))
            .map_err(|_| ScardError::INTERNAL_ERROR)?;
        response.recv().map_err(|_| ScardError::INTERNAL_ERROR)?
    }

    /// Stop the worker and take the card back
    fn finish(self) -> Option<pcsc::Card> {
        drop(self.requests);
        Self::join(self.worker)
    }

    fn join(worker: JoinHandle<pcsc::Card>) -> Option<pcsc::Card> {
        let card = worker.join().ok();
        if card.is_none() {
            warn!("Transaction worker panicked, card handle lost");
        }
        card
    }
}

fn run_exclusive(
    mut card: pcsc::Card,
    ready: &Reply<()>,
    queue: &Receiver<Request>,
) -> pcsc::Card {
    serve_exclusive(&mut card, ready, queue);
    card
}

/// Hold one transaction until `End` succeeds or the connection goes away
fn serve_exclusive(card: &mut pcsc::Card, ready: &Reply<()>, queue: &Receiver<Request>) {
    let mut transaction = match card.transaction() {
        Ok(transaction) => transaction,
        Err(err) => {
            let _ = ready.send(Err(scard_error(err)));
            return;
        }
    };
    if ready.send(Ok(())).is_err() {
        return;
    }

    // Replies are dropped silently when the caller has gone away
    for request in queue {
        match request {
            Request::Status(reply) => {
                let _ = reply.send(card_status(&transaction));
            }
            Request::Transmit {
                command,
                capacity,
                reply,
            } => {
                let mut buf = vec![0u8; capacity];
                let result = card_transmit(&transaction, &command, &mut buf).map(|len| {
                    buf.truncate(len);
                    buf
                });
                let _ = reply.send(result);
            }
            Request::Control {
                code,
                input,
                capacity,
                reply,
            } => {
                let mut buf = vec![0u8; capacity];
                let result = card_control(&transaction, code, &input, &mut buf).map(|len| {
                    buf.truncate(len);
                    buf
                });
                let _ = reply.send(result);
            }
            Request::End { disposition, reply } => {
                match transaction.end(config::disposition(disposition)) {
                    Ok(()) => {
                        let _ = reply.send(Ok(()));
                        return;
                    }
                    Err((held, err)) => {
                        transaction = held;
                        let _ = reply.send(Err(scard_error(err)));
                    }
                }
            }
        }
    }
    // Dropping the transaction ends it with LeaveCard
}

fn copy_reply(data: &[u8], out: &mut [u8]) -> usize {
    out[..data.len()].copy_from_slice(data);
    data.len()
}

impl Connection for PcscConnection {
    fn status(&self) -> Result<CardStatus, ScardError> {
        match &self.session {
            Some(session) => session.call(Request::Status),
            None => card_status(self.card()?),
        }
    }

    fn transmit(
        &mut self,
        protocol: Protocol,
        command: &[u8],
        response: &mut [u8],
    ) -> Result<usize, ScardError> {
        // pcsc has no protocol control information for direct connections
        if self.direct {
            return Err(ScardError::PROTO_MISMATCH);
        }

        // pcsc picks the protocol control information from the active protocol
        trace!(reader = %self.reader, %protocol, len = command.len(), "SCardTransmit");
        match &self.session {
            Some(session) => {
                let data = session.call(|reply| Request::Transmit {
                    command: command.to_vec(),
                    capacity: response.len(),
                    reply,
                })?;
                Ok(copy_reply(&data, response))
            }
            None => card_transmit(self.card()?, command, response),
        }
    }

    fn control(&mut self, code: u32, input: &[u8], output: &mut [u8]) -> Result<usize, ScardError> {
        match &self.session {
            Some(session) => {
                let data = session.call(|reply| Request::Control {
                    code,
                    input: input.to_vec(),
                    capacity: output.len(),
                    reply,
                })?;
                Ok(copy_reply(&data, output))
            }
            None => card_control(self.card()?, code, input, output),
        }
    }

    fn begin_transaction(&mut self) -> Result<(), ScardError> {
        if let Some(session) = &mut self.session {
            session.depth += 1;
            return Ok(());
        }

        let card = self.card.take().ok_or(ScardError::INVALID_HANDLE)?;
        match ExclusiveSession::start(card, &self.reader) {
            Ok(session) => {
                debug!(reader = %self.reader, "Transaction started");
                self.session = Some(session);
                Ok(())
            }
            Err((card, err)) => {
                self.card = card;
                Err(err)
            }
        }
    }

    fn end_transaction(&mut self, disposition: Disposition) -> Result<(), ScardError> {
        let session = self.session.as_mut().ok_or(ScardError::NOT_TRANSACTED)?;
        if session.depth > 1 {
            session.depth -= 1;
            return Ok(());
        }

        session.call(|reply| Request::End { disposition, reply })?;
        if let Some(session) = self.session.take() {
            self.card = session.finish();
        }
        debug!(reader = %self.reader, ?disposition, "Transaction ended");
        self.card().map(|_| ())
    }

    fn disconnect(mut self, disposition: Disposition) -> Result<(), ScardError> {
        if let Some(session) = self.session.take() {
            self.card = session.finish();
        }
        self.card
            .take()
            .ok_or(ScardError::INVALID_HANDLE)?
            .disconnect(config::disposition(disposition))
            .map_err(|(_, err)| scard_error(err))
    }
}
