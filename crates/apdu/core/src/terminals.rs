//! The set of readers attached to one resource-manager context

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::config::TerminalsConfig;
use crate::error::{Error, ResultExt};
use crate::event::{CardEvent, Event, ReaderEvent};
use crate::manager::{ReaderStateRecord, ResourceManager, State};
use crate::reconciler::{Reconciler, list_reader_names};
use crate::scard::ScardError;
use crate::terminal::Terminal;

/// Which readers [`Terminals::list`] returns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ListFilter {
    /// Every attached reader
    #[default]
    All,
    /// Readers holding a card right now
    CardPresent,
    /// Readers without a card right now
    CardAbsent,
    /// Readers where the last [`Terminals::wait_for_change`] saw a card inserted
    CardInsertion,
    /// Readers where the last [`Terminals::wait_for_change`] saw a card removed
    CardRemoval,
}

/// Readers and card state tracking for one context
pub struct Terminals<M: ResourceManager> {
    manager: Arc<M>,
    reconciler: Reconciler,
    config: TerminalsConfig,
}

impl<M: ResourceManager> std::fmt::Debug for Terminals<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Terminals")
            .field("manager", &self.manager)
            .field("readers", &self.reconciler.readers())
            .field("config", &self.config)
            .finish()
    }
}

impl<M: ResourceManager> Terminals<M> {
    /// Track the readers of `manager`
    pub fn new(manager: Arc<M>, config: TerminalsConfig) -> Self {
        Self {
            manager,
            reconciler: Reconciler::new(config.use_pnp),
            config,
        }
    }

    /// The underlying resource manager
    pub const fn manager(&self) -> &Arc<M> {
        &self.manager
    }

    /// A handle to the reader called `name`
    pub fn terminal(&self, name: impl Into<String>) -> Terminal<M> {
        Terminal::new(Arc::clone(&self.manager), name, self.config.transmit.clone())
    }

    /// Readers matching `filter`
    ///
    /// No readers being attached is an empty list, not an error.
    pub fn list(&self, filter: ListFilter) -> Result<Vec<Terminal<M>>, Error> {
        let names = match filter {
            ListFilter::All => list_reader_names(&*self.manager)?,
            ListFilter::CardPresent => self.names_by_presence(true)?,
            ListFilter::CardAbsent => self.names_by_presence(false)?,
            ListFilter::CardInsertion => to_owned(self.reconciler.insertions()),
            ListFilter::CardRemoval => to_owned(self.reconciler.removals()),
        };
        Ok(names.into_iter().map(|name| self.terminal(name)).collect())
    }

    /// Wait until a reader or card changes state
    ///
    /// `timeout_ms` of 0 waits forever, a negative value is rejected.
    /// Returns `false` when the timeout elapsed without a change.
    pub fn wait_for_change(&mut self, timeout_ms: i64) -> Result<bool, Error> {
        self.reconciler.wait_for_change(&*self.manager, timeout_ms)
    }

    /// Run one [`wait_for_change`](Self::wait_for_change) and describe what happened
    ///
    /// Events come in this order: readers added, cards removed, cards
    /// inserted, readers removed.
    pub fn poll_events(&mut self, timeout_ms: i64) -> Result<Vec<Event>, Error> {
        if !self.wait_for_change(timeout_ms)? {
            return Ok(Vec::new());
        }

        let reconciler = &self.reconciler;
        let mut events: Vec<Event> = reconciler
            .added()
            .iter()
            .map(|name| Event::Reader(ReaderEvent::Added(name.clone())))
            .collect();

        for name in reconciler.removals() {
            events.push(Event::Card(CardEvent::Removed {
                reader: name.to_string(),
            }));
        }

        for name in reconciler.insertions() {
            let atr = reconciler
                .state(name)
                .map(|state| state.atr.clone())
                .unwrap_or_default();
            events.push(Event::Card(CardEvent::Inserted {
                reader: name.to_string(),
                atr,
            }));
        }

        for name in reconciler.zombies() {
            events.push(Event::Reader(ReaderEvent::Removed(name.to_string())));
        }

        if !events.is_empty() {
            debug!(count = events.len(), "Reader events");
        }
        Ok(events)
    }

    /// A handle that aborts a blocking [`wait_for_change`](Self::wait_for_change) from another thread
    pub fn cancel_handle(&self) -> Cancel<M> {
        Cancel {
            manager: Arc::clone(&self.manager),
        }
    }

    fn names_by_presence(&self, present: bool) -> Result<Vec<String>, Error> {
        let names = list_reader_names(&*self.manager)?;
        if names.is_empty() {
            return Ok(names);
        }

        let mut records: Vec<ReaderStateRecord> = names
            .into_iter()
            .map(|name| ReaderStateRecord::new(name, State::UNAWARE))
            .collect();
        match self
            .manager
            .get_status_change(Some(Duration::ZERO), &mut records)
        {
            Ok(()) | Err(ScardError::TIMEOUT) => {}
            Err(e) if e.is_no_readers() => return Ok(Vec::new()),
            Err(e) => return Err(e).context("Reading reader states failed"),
        }

        Ok(records
            .into_iter()
            .filter(|record| record.event_state.is_present() == present)
            .map(|record| record.name)
            .collect())
    }
}

fn to_owned(names: Vec<&str>) -> Vec<String> {
    names.into_iter().map(str::to_string).collect()
}

/// Cancels a blocking wait on the context it was taken from
pub struct Cancel<M: ResourceManager> {
    manager: Arc<M>,
}

impl<M: ResourceManager> std::fmt::Debug for Cancel<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cancel").finish_non_exhaustive()
    }
}

impl<M: ResourceManager> Clone for Cancel<M> {
    fn clone(&self) -> Self {
        Self {
            manager: Arc::clone(&self.manager),
        }
    }
}

impl<M: ResourceManager> Cancel<M> {
    /// Abort the wait in progress, if any
    pub fn cancel(&self) -> Result<(), Error> {
        self.manager
            .cancel()
            .context("Cancelling status change wait failed")
    }
}
