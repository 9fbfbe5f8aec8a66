//! Background reader and card monitoring
//!
//! A [`Monitor`] moves a [`Terminals`] onto its own thread and polls it in a
//! loop, forwarding every [`Event`] to a handler. Stopping sets a flag and
//! cancels the blocking wait so the thread exits promptly.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use tracing::{debug, trace, warn};

use crate::config::MonitorConfig;
use crate::error::Error;
use crate::event::{Event, EventHandler, EventSender};
use crate::manager::ResourceManager;
use crate::terminals::{Cancel, Terminals};

/// Handle to a running monitor thread
pub struct Monitor<M: ResourceManager + 'static> {
    running: Arc<AtomicBool>,
    cancel: Cancel<M>,
    thread: Option<JoinHandle<()>>,
}

impl<M: ResourceManager + 'static> std::fmt::Debug for Monitor<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl<M: ResourceManager + 'static> Monitor<M> {
    /// Start polling `terminals`, calling `handler` for every event
    pub fn start<H>(terminals: Terminals<M>, config: MonitorConfig, handler: H) -> Result<Self, Error>
    where
        H: EventHandler<Event> + Send + 'static,
    {
        Self::spawn(terminals, config, Arc::new(AtomicBool::new(true)), handler)
    }

    /// Start polling `terminals`, sending every event to `sender`
    ///
    /// The monitor stops on its own once the receiving side is dropped.
    pub fn start_channel(
        terminals: Terminals<M>,
        config: MonitorConfig,
        sender: EventSender,
    ) -> Result<Self, Error> {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        Self::spawn(terminals, config, running, move |event: Event| {
            if sender.send(event).is_err() {
                trace!("Event receiver dropped");
                flag.store(false, Ordering::SeqCst);
            }
        })
    }

    fn spawn<H>(
        terminals: Terminals<M>,
        config: MonitorConfig,
        running: Arc<AtomicBool>,
        mut handler: H,
    ) -> Result<Self, Error>
    where
        H: EventHandler<Event> + Send + 'static,
    {
        let cancel = terminals.cancel_handle();
        let flag = Arc::clone(&running);
        let thread = thread::Builder::new()
            .name("cardio-monitor".into())
            .spawn(move || run(terminals, config, &flag, &mut handler))
            .map_err(|e| Error::invalid_argument(format!("failed to spawn monitor thread: {e}")))?;

        debug!("Monitor started");
        Ok(Self {
            running,
            cancel,
            thread: Some(thread),
        })
    }

    /// Whether the polling thread is still running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
            && self.thread.as_ref().is_some_and(|thread| !thread.is_finished())
    }

    /// Stop polling and wait for the thread to exit
    pub fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };

        self.running.store(false, Ordering::SeqCst);
        if let Err(e) = self.cancel.cancel() {
            debug!(error = %e, "Cancel while stopping monitor failed");
        }
        if thread.join().is_err() {
            warn!("Monitor thread panicked");
        }
        debug!("Monitor stopped");
    }
}

impl<M: ResourceManager + 'static> Drop for Monitor<M> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run<M, H>(mut terminals: Terminals<M>, config: MonitorConfig, running: &AtomicBool, handler: &mut H)
where
    M: ResourceManager,
    H: EventHandler<Event>,
{
    // 0 would mean an unbounded wait and the stop flag would never be seen
    let timeout_ms = i64::try_from(config.poll_timeout.as_millis())
        .unwrap_or(i64::MAX)
        .max(1);

    while running.load(Ordering::SeqCst) {
        match terminals.poll_events(timeout_ms) {
            Ok(events) => {
                for event in events {
                    trace!(?event, "Dispatching event");
                    handler.handle(event);
                }
            }
            Err(e) if e.root() == &Error::Cancelled => {}
            Err(e) => {
                warn!(error = %e, "Polling readers failed");
                thread::sleep(config.error_backoff);
            }
        }
    }
}
