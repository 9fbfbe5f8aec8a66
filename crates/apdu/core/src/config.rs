//! Configuration options for transmission, reader tracking and monitoring

use std::time::Duration;

use crate::response::status::{StatusWord, common};

/// Tuning of the transmission loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransmitConfig {
    /// Reshape APDUs into T=0 TPDUs when the card negotiated T=0
    pub convert_to_short_apdus: bool,

    /// Response buffer allocated up front for [`Channel::transmit`](crate::Channel::transmit)
    pub initial_capacity: usize,

    /// Size the response buffer without trusting Le, for cards that send more than asked
    pub ignore_le_when_allocating: bool,

    /// Upper bound on GET RESPONSE and wrong-length rounds for one command
    pub max_response_iterations: usize,

    /// Trailers accepted as a successful MANAGE CHANNEL close
    pub close_channel_success: Vec<StatusWord>,
}

impl Default for TransmitConfig {
    fn default() -> Self {
        Self {
            convert_to_short_apdus: true,
            initial_capacity: 8192,
            ignore_le_when_allocating: true,
            max_response_iterations: 4096,
            close_channel_success: vec![common::SUCCESS, common::NULL_PROCEDURE],
        }
    }
}

impl TransmitConfig {
    /// Create a new default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set whether T=0 conversion is applied
    pub const fn with_convert_to_short_apdus(mut self, convert: bool) -> Self {
        self.convert_to_short_apdus = convert;
        self
    }

    /// Set the initial response buffer capacity
    pub const fn with_initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = capacity;
        self
    }

    /// Set whether Le is ignored when sizing the response buffer
    pub const fn with_ignore_le_when_allocating(mut self, ignore: bool) -> Self {
        self.ignore_le_when_allocating = ignore;
        self
    }

    /// Set the iteration bound of the transmission loop
    pub const fn with_max_response_iterations(mut self, max: usize) -> Self {
        self.max_response_iterations = max;
        self
    }

    /// Set the trailers accepted when closing a logical channel
    pub fn with_close_channel_success(mut self, trailers: impl IntoIterator<Item = StatusWord>) -> Self {
        self.close_channel_success = trailers.into_iter().collect();
        self
    }
}

/// Configuration of reader tracking
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalsConfig {
    /// Watch the plug-and-play pseudo reader to notice readers being attached
    pub use_pnp: bool,

    /// Settings handed to every card connected through these terminals
    pub transmit: TransmitConfig,
}

impl Default for TerminalsConfig {
    fn default() -> Self {
        Self {
            use_pnp: true,
            transmit: TransmitConfig::default(),
        }
    }
}

impl TerminalsConfig {
    /// Create a new default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set whether the plug-and-play pseudo reader is watched
    pub const fn with_use_pnp(mut self, use_pnp: bool) -> Self {
        self.use_pnp = use_pnp;
        self
    }

    /// Set the transmission settings
    pub fn with_transmit(mut self, transmit: TransmitConfig) -> Self {
        self.transmit = transmit;
        self
    }
}

/// Configuration of the background event monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorConfig {
    /// How long one poll blocks before the stop flag is checked again
    pub poll_timeout: Duration,

    /// Pause after a failed poll
    pub error_backoff: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_millis(500),
            error_backoff: Duration::from_secs(1),
        }
    }
}

impl MonitorConfig {
    /// Create a new default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the poll timeout
    pub const fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Set the pause after a failed poll
    pub const fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transmit_defaults() {
        let config = TransmitConfig::new();
        assert!(config.convert_to_short_apdus);
        assert_eq!(config.initial_capacity, 8192);
        assert!(config.ignore_le_when_allocating);
        assert_eq!(config.max_response_iterations, 4096);
        assert_eq!(
            config.close_channel_success,
            vec![StatusWord::new(0x90, 0x00), StatusWord::new(0x60, 0x00)]
        );
    }

    #[test]
    fn test_builders() {
        let config = TerminalsConfig::new().with_use_pnp(false).with_transmit(
            TransmitConfig::new()
                .with_max_response_iterations(3)
                .with_close_channel_success([common::SUCCESS]),
        );
        assert!(!config.use_pnp);
        assert_eq!(config.transmit.max_response_iterations, 3);
        assert_eq!(config.transmit.close_channel_success, vec![common::SUCCESS]);

        let monitor = MonitorConfig::new().with_poll_timeout(Duration::from_millis(10));
        assert_eq!(monitor.poll_timeout, Duration::from_millis(10));
    }
}
