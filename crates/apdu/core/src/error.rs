//! Core error type for all transmission and reader-state operations
//!
//! Every fallible call in this crate returns [`Error`]. Resource manager
//! failures keep their numeric code so callers can match on specific
//! conditions; the few codes the engine interprets itself (card removal,
//! timeout, cancellation) get their own variants.

use std::borrow::Cow;

use crate::scard::ScardError;

/// Core error type that encompasses all possible errors in the crate
#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    //
    // Resource manager errors
    //
    /// The resource manager reported a failure
    #[error("Resource manager error: {0}")]
    ResourceManager(ScardError),

    /// The card was removed, or no card is in the reader
    #[error("Card not present: {0}")]
    CardNotPresent(ScardError),

    /// The resource manager gave up waiting
    #[error("Operation timed out")]
    Timeout,

    /// A blocking wait was cancelled
    #[error("Operation cancelled")]
    Cancelled,

    //
    // Protocol errors
    //
    /// The card or the command broke the transmission protocol
    #[error("Protocol violation: {0}")]
    ProtocolViolation(Cow<'static, str>),

    //
    // Caller errors
    //
    /// A caller-supplied value was rejected
    #[error("Invalid argument: {0}")]
    InvalidArgument(Cow<'static, str>),

    //
    // General errors
    //
    /// Context error with message and source error
    #[error("{context}: {source}")]
    Context {
        /// Contextual message
        context: String,
        /// Source error
        source: Box<Self>,
    },
}

impl Error {
    /// Create a new error with context information
    pub fn with_context<S: Into<String>>(self, context: S) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Create an invalid argument error with a static message
    pub const fn invalid(message: &'static str) -> Self {
        Self::InvalidArgument(Cow::Borrowed(message))
    }

    /// Create an invalid argument error with a formatted message
    pub fn invalid_argument<S: Into<String>>(message: S) -> Self {
        Self::InvalidArgument(Cow::Owned(message.into()))
    }

    /// Create a protocol violation with a formatted message
    pub fn protocol_violation<S: Into<String>>(message: S) -> Self {
        Self::ProtocolViolation(Cow::Owned(message.into()))
    }

    /// The innermost error, with all context layers removed
    pub fn root(&self) -> &Self {
        match self {
            Self::Context { source, .. } => source.root(),
            other => other,
        }
    }

    /// The resource manager code behind this error, if any
    pub fn scard(&self) -> Option<ScardError> {
        match self.root() {
            Self::ResourceManager(code) | Self::CardNotPresent(code) => Some(*code),
            Self::Timeout => Some(ScardError::TIMEOUT),
            Self::Cancelled => Some(ScardError::CANCELLED),
            _ => None,
        }
    }
}

impl From<ScardError> for Error {
    fn from(err: ScardError) -> Self {
        match err {
            ScardError::TIMEOUT => Self::Timeout,
            ScardError::CANCELLED => Self::Cancelled,
            e if e.is_card_absent() => Self::CardNotPresent(e),
            e => Self::ResourceManager(e),
        }
    }
}

/// Extension trait for Result with crate errors
pub trait ResultExt<T> {
    /// Add context to an error
    fn context<S: Into<String>>(self, context: S) -> Result<T, Error>;
}

impl<T> ResultExt<T> for Result<T, Error> {
    fn context<S: Into<String>>(self, context: S) -> Self {
        self.map_err(|e| e.with_context(context))
    }
}

impl<T> ResultExt<T> for Result<T, ScardError> {
    fn context<S: Into<String>>(self, context: S) -> Result<T, Error> {
        self.map_err(|e| Error::from(e).with_context(context))
    }
}
