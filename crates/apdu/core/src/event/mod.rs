//! Reader and card events
//!
//! Events are produced by [`Terminals::poll_events`](crate::Terminals::poll_events)
//! and delivered by the [`Monitor`](crate::Monitor) to handlers or channels.

pub mod channel;
pub mod handler;

pub use channel::*;
pub use handler::*;

/// Events related to card insertion/removal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CardEvent {
    /// Card was inserted into a reader
    Inserted {
        /// Reader name
        reader: String,
        /// ATR of the inserted card
        atr: Vec<u8>,
    },
    /// Card was removed from a reader
    Removed {
        /// Reader name
        reader: String,
    },
}

impl CardEvent {
    /// Name of the reader the event happened in
    pub fn reader(&self) -> &str {
        match self {
            Self::Inserted { reader, .. } | Self::Removed { reader } => reader,
        }
    }
}

/// Events related to reader connection/disconnection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderEvent {
    /// Reader was connected to the system
    Added(String),
    /// Reader was disconnected from the system
    Removed(String),
}

/// Any event observed by one poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A reader came or went
    Reader(ReaderEvent),
    /// A card came or went
    Card(CardEvent),
}

impl From<ReaderEvent> for Event {
    fn from(event: ReaderEvent) -> Self {
        Self::Reader(event)
    }
}

impl From<CardEvent> for Event {
    fn from(event: CardEvent) -> Self {
        Self::Card(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_card_event_reader() {
        let inserted = CardEvent::Inserted {
            reader: "A".into(),
            atr: vec![0x3B],
        };
        assert_eq!(inserted.reader(), "A");
        assert_eq!(CardEvent::Removed { reader: "B".into() }.reader(), "B");
    }

    #[test]
    fn test_into_event() {
        let event: Event = ReaderEvent::Added("A".into()).into();
        assert_eq!(event, Event::Reader(ReaderEvent::Added("A".into())));
    }
}
