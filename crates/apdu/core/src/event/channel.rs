//! Channel-based event delivery

use crossbeam_channel::{Receiver, Sender, bounded, unbounded};

use crate::event::Event;

/// Sender for all events
pub type EventSender = Sender<Event>;
/// Receiver for all events
pub type EventReceiver = Receiver<Event>;

/// Create an unbounded channel for all events
pub fn event_channel() -> (EventSender, EventReceiver) {
    unbounded()
}

/// Create a bounded channel with the specified capacity for all events
///
/// A full channel blocks the monitor thread until the receiver catches up.
pub fn bounded_event_channel(capacity: usize) -> (EventSender, EventReceiver) {
    bounded(capacity)
}
