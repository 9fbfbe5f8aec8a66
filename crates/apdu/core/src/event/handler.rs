//! Event handler traits and utilities

use crate::event::Event;

/// A trait for types that can be used as event handlers
pub trait EventHandler<T> {
    /// Handle an event
    fn handle(&mut self, event: T);
}

// Implementations for closures
impl<T, F> EventHandler<T> for F
where
    F: FnMut(T),
{
    fn handle(&mut self, event: T) {
        self(event)
    }
}

/// Simple event dispatcher that manages multiple handlers
pub struct EventDispatcher<T> {
    handlers: Vec<Box<dyn EventHandler<T> + Send>>,
}

impl<T> std::fmt::Debug for EventDispatcher<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

impl<T> EventDispatcher<T> {
    /// Create a new event dispatcher
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// Add a new handler
    pub fn add_handler<H>(&mut self, handler: H)
    where
        H: EventHandler<T> + Send + 'static,
    {
        self.handlers.push(Box::new(handler));
    }

    /// Number of registered handlers
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handler is registered
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Dispatch an event to all handlers
    pub fn dispatch(&mut self, event: T)
    where
        T: Clone,
    {
        for handler in &mut self.handlers {
            handler.handle(event.clone());
        }
    }

    /// Clear all handlers
    pub fn clear(&mut self) {
        self.handlers.clear();
    }
}

impl<T> Default for EventDispatcher<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> EventHandler<T> for EventDispatcher<T> {
    fn handle(&mut self, event: T) {
        self.dispatch(event);
    }
}

/// Dispatcher for all events, usable as a [`Monitor`](crate::Monitor) handler
pub type AnyEventDispatcher = EventDispatcher<Event>;
