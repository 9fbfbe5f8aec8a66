//! Reader and card state tracking across polls
//!
//! The [`Reconciler`] remembers every reader seen by the last poll together
//! with the state word it had before (`current`) and after (`event`) that
//! poll. Insertions and removals are derived from those two words, using the
//! event counter in the upper 16 bits to catch a card that was swapped in
//! between two polls.
//!
//! Reader states live in a map keyed by name; the array handed to the
//! resource manager is rebuilt for every call and the results copied back.

use std::collections::HashMap;
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::error::{Error, ResultExt};
use crate::manager::{PNP_READER_NAME, ReaderStateRecord, ResourceManager, State};
use crate::scard::ScardError;

/// Last known state of one reader
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReaderStateValue {
    /// State word from the previous poll
    pub current: State,
    /// State word from the latest poll
    pub event: State,
    /// ATR reported by the latest poll
    pub atr: Vec<u8>,
}

impl ReaderStateValue {
    /// Whether the latest poll saw a card appear
    ///
    /// True when presence went from absent to present, when a card is present
    /// and the event counter moved forward, or when the counter skipped so far
    /// that a whole insert/remove cycle must have been missed.
    pub fn card_inserted(&self) -> bool {
        let (was, is, old, new) = self.transition();
        (!was && is) || (is && old < new) || old + 1 < new
    }

    /// Whether the latest poll saw a card go away
    pub fn card_removed(&self) -> bool {
        let (was, is, old, new) = self.transition();
        (was && !is) || (!is && old < new) || old + 1 < new
    }

    fn transition(&self) -> (bool, bool, u32, u32) {
        (
            self.current.is_present(),
            self.event.is_present(),
            u32::from(self.current.event_count()),
            u32::from(self.event.event_count()),
        )
    }

    fn record(&self, name: &str) -> ReaderStateRecord {
        ReaderStateRecord {
            name: name.to_string(),
            current_state: self.current,
            event_state: State::UNAWARE,
            atr: self.atr.clone(),
        }
    }
}

/// Reader tracking state for [`Terminals`](crate::Terminals)
#[derive(Debug, Default)]
pub struct Reconciler {
    use_pnp: bool,
    pnp: ReaderStateValue,
    order: Vec<String>,
    known: HashMap<String, ReaderStateValue>,
    zombies: Vec<(String, ReaderStateValue)>,
    added: Vec<String>,
    has_baseline: bool,
}

impl Reconciler {
    /// Create an empty tracker
    pub fn new(use_pnp: bool) -> Self {
        Self {
            use_pnp,
            ..Self::default()
        }
    }

    /// Names of the tracked readers, in discovery order
    pub fn readers(&self) -> &[String] {
        &self.order
    }

    /// Last known state of `reader`
    pub fn state(&self, reader: &str) -> Option<&ReaderStateValue> {
        self.known.get(reader)
    }

    /// Readers that disappeared during the latest poll
    pub fn zombies(&self) -> impl Iterator<Item = &str> {
        self.zombies.iter().map(|(name, _)| name.as_str())
    }

    /// Readers that appeared during the latest poll
    pub fn added(&self) -> &[String] {
        &self.added
    }

    /// Wait until a reader or card changes state
    ///
    /// `timeout_ms` of 0 waits forever. Returns `false` when the timeout
    /// elapsed without a change. The first call returns `true` right away so
    /// that a card inserted before it is not missed.
    pub fn wait_for_change<M: ResourceManager>(
        &mut self,
        manager: &M,
        timeout_ms: i64,
    ) -> Result<bool, Error> {
        let timeout = match timeout_ms {
            ..0 => {
                return Err(Error::invalid_argument(format!(
                    "negative timeout {timeout_ms}"
                )));
            }
            0 => None,
            ms => Some(Duration::from_millis(ms as u64)),
        };

        self.zombies.clear();
        self.added.clear();
        for value in self.known.values_mut() {
            value.current = value.event;
        }
        self.pnp.current = self.pnp.event;

        if self.update_known_readers(manager)? || !self.has_baseline {
            self.has_baseline = true;
            return Ok(true);
        }

        let mut records = Vec::with_capacity(self.order.len() + 1);
        if self.use_pnp {
            records.push(self.pnp.record(PNP_READER_NAME));
        }
        records.extend(self.order.iter().map(|name| self.known[name].record(name)));

        trace!(readers = records.len(), ?timeout, "Waiting for reader state change");
        match manager.get_status_change(timeout, &mut records) {
            Ok(()) => {}
            Err(ScardError::TIMEOUT) => return Ok(false),
            Err(e) => return Err(e).context("Waiting for reader state change failed"),
        }

        let mut pnp_changed = false;
        for record in records {
            trace!(
                reader = %record.name,
                current = format_args!("{:#x}", record.current_state.bits()),
                event = format_args!("{:#x}", record.event_state.bits()),
                "Reader state"
            );
            if self.use_pnp && record.name == PNP_READER_NAME {
                pnp_changed = record.event_state.contains(State::CHANGED);
                self.pnp.event = record.event_state;
            } else if let Some(value) = self.known.get_mut(&record.name) {
                value.event = record.event_state;
                value.atr = record.atr;
            }
        }

        // Card states are already written back; a reader list that cannot be
        // read now is picked up at the start of the next call
        if pnp_changed {
            if let Err(e) = self.update_known_readers(manager) {
                warn!(error = %e, "Updating readers after PnP notification failed");
            }
        }
        Ok(true)
    }

    /// Readers whose latest poll saw a card inserted
    pub fn insertions(&self) -> Vec<&str> {
        self.order
            .iter()
            .filter(|name| self.known[name.as_str()].card_inserted())
            .map(String::as_str)
            .collect()
    }

    /// Readers whose latest poll saw a card removed, including vanished readers that held a card
    pub fn removals(&self) -> Vec<&str> {
        let removed = self
            .order
            .iter()
            .filter(|name| self.known[name.as_str()].card_removed())
            .map(String::as_str);
        let vanished = self
            .zombies
            .iter()
            .filter(|(_, value)| value.current.is_present())
            .map(|(name, _)| name.as_str());
        removed.chain(vanished).collect()
    }

    /// Bring the reader list in line with the resource manager
    ///
    /// Returns whether any reader was added or removed. Nothing is committed
    /// unless the new readers could be read, so a failure leaves the removed
    /// readers to the next call.
    fn update_known_readers<M: ResourceManager>(&mut self, manager: &M) -> Result<bool, Error> {
        let current = list_reader_names(manager)?;

        let mut fresh: Vec<ReaderStateRecord> = current
            .iter()
            .filter(|name| !self.known.contains_key(name.as_str()))
            .map(|name| ReaderStateRecord::new(name.as_str(), State::UNAWARE))
            .collect();
        if !fresh.is_empty() {
            manager
                .get_status_change(Some(Duration::ZERO), &mut fresh)
                .context("Reading state of new readers failed")?;
        }

        let mut changed = !fresh.is_empty();
        let known = &mut self.known;
        let zombies = &mut self.zombies;
        self.order.retain(|name| {
            if current.contains(name) {
                return true;
            }
            if let Some(mut value) = known.remove(name) {
                value.event = State::UNAWARE;
                debug!(reader = %name, "Reader removed");
                zombies.push((name.clone(), value));
            }
            changed = true;
            false
        });

        for record in fresh {
            debug!(reader = %record.name, "Reader added");
            self.order.push(record.name.clone());
            self.added.push(record.name.clone());
            self.known.insert(
                record.name,
                ReaderStateValue {
                    current: State::UNAWARE,
                    event: record.event_state,
                    atr: record.atr,
                },
            );
        }

        Ok(changed)
    }
}

/// List reader names, treating "no readers" conditions as an empty list
pub fn list_reader_names<M: ResourceManager>(manager: &M) -> Result<Vec<String>, Error> {
    match manager.list_readers() {
        Ok(names) => Ok(names),
        Err(e) if e.is_no_readers() => Ok(Vec::new()),
        Err(e) => Err(e).context("Listing readers failed"),
    }
}
