//! Resource manager return codes
//!
//! Every failure reported by the smart-card resource manager is carried as a
//! [`ScardError`]: the raw numeric code plus a name/description lookup. The
//! engine only ever interprets a handful of these codes; everything else is
//! surfaced to the caller unchanged.

use std::fmt;

/// A non-zero return code from the smart-card resource manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScardError {
    code: u32,
}

impl ScardError {
    /// An internal consistency check failed
    pub const INTERNAL_ERROR: Self = Self::new(0x8010_0001);
    /// The action was cancelled by an SCardCancel request
    pub const CANCELLED: Self = Self::new(0x8010_0002);
    /// The supplied handle was invalid
    pub const INVALID_HANDLE: Self = Self::new(0x8010_0003);
    /// One or more of the supplied parameters could not be properly interpreted
    pub const INVALID_PARAMETER: Self = Self::new(0x8010_0004);
    /// Not enough memory available to complete this command
    pub const NO_MEMORY: Self = Self::new(0x8010_0006);
    /// The data buffer to receive returned data is too small
    pub const INSUFFICIENT_BUFFER: Self = Self::new(0x8010_0008);
    /// The specified reader name is not recognized
    pub const UNKNOWN_READER: Self = Self::new(0x8010_0009);
    /// The user-specified timeout value has expired
    pub const TIMEOUT: Self = Self::new(0x8010_000A);
    /// The smart card cannot be accessed because of other connections outstanding
    pub const SHARING_VIOLATION: Self = Self::new(0x8010_000B);
    /// The operation requires a smart card, but no smart card is currently in the device
    pub const NO_SMARTCARD: Self = Self::new(0x8010_000C);
    /// The requested protocols are incompatible with the protocol currently in use
    pub const PROTO_MISMATCH: Self = Self::new(0x8010_000F);
    /// The reader or smart card is not ready to accept commands
    pub const NOT_READY: Self = Self::new(0x8010_0010);
    /// An internal communications error has been detected
    pub const COMM_ERROR: Self = Self::new(0x8010_0013);
    /// An internal error has been detected, but the source is unknown
    pub const UNKNOWN_ERROR: Self = Self::new(0x8010_0014);
    /// An attempt was made to end a non-existent transaction
    pub const NOT_TRANSACTED: Self = Self::new(0x8010_0016);
    /// The specified reader is not currently available for use
    pub const READER_UNAVAILABLE: Self = Self::new(0x8010_0017);
    /// The smart card resource manager is not running
    pub const NO_SERVICE: Self = Self::new(0x8010_001D);
    /// The smart card resource manager has shut down
    pub const SERVICE_STOPPED: Self = Self::new(0x8010_001E);
    /// Cannot find a smart card reader
    pub const NO_READERS_AVAILABLE: Self = Self::new(0x8010_002E);
    /// The smart card is not responding to a reset
    pub const UNRESPONSIVE_CARD: Self = Self::new(0x8010_0066);
    /// Power has been removed from the smart card
    pub const UNPOWERED_CARD: Self = Self::new(0x8010_0067);
    /// The smart card has been reset, so any shared state information is invalid
    pub const RESET_CARD: Self = Self::new(0x8010_0068);
    /// The smart card has been removed, so further communication is not possible
    pub const REMOVED_CARD: Self = Self::new(0x8010_0069);

    /// Wrap a raw resource manager return code
    pub const fn new(code: u32) -> Self {
        Self { code }
    }

    /// The raw return code
    pub const fn code(&self) -> u32 {
        self.code
    }

    /// The symbolic `SCARD_*` name of this code, if known
    pub const fn name(&self) -> Option<&'static str> {
        let name = match self.code {
            0x8010_0001 => "SCARD_F_INTERNAL_ERROR",
            0x8010_0002 => "SCARD_E_CANCELLED",
            0x8010_0003 => "SCARD_E_INVALID_HANDLE",
            0x8010_0004 => "SCARD_E_INVALID_PARAMETER",
            0x8010_0005 => "SCARD_E_INVALID_TARGET",
            0x8010_0006 => "SCARD_E_NO_MEMORY",
            0x8010_0007 => "SCARD_F_WAITED_TOO_LONG",
            0x8010_0008 => "SCARD_E_INSUFFICIENT_BUFFER",
            0x8010_0009 => "SCARD_E_UNKNOWN_READER",
            0x8010_000A => "SCARD_E_TIMEOUT",
            0x8010_000B => "SCARD_E_SHARING_VIOLATION",
            0x8010_000C => "SCARD_E_NO_SMARTCARD",
            0x8010_000D => "SCARD_E_UNKNOWN_CARD",
            0x8010_000E => "SCARD_E_CANT_DISPOSE",
            0x8010_000F => "SCARD_E_PROTO_MISMATCH",
            0x8010_0010 => "SCARD_E_NOT_READY",
            0x8010_0011 => "SCARD_E_INVALID_VALUE",
            0x8010_0012 => "SCARD_E_SYSTEM_CANCELLED",
            0x8010_0013 => "SCARD_F_COMM_ERROR",
            0x8010_0014 => "SCARD_F_UNKNOWN_ERROR",
            0x8010_0015 => "SCARD_E_INVALID_ATR",
            0x8010_0016 => "SCARD_E_NOT_TRANSACTED",
            0x8010_0017 => "SCARD_E_READER_UNAVAILABLE",
            0x8010_0018 => "SCARD_P_SHUTDOWN",
            0x8010_0019 => "SCARD_E_PCI_TOO_SMALL",
            0x8010_001A => "SCARD_E_READER_UNSUPPORTED",
            0x8010_001B => "SCARD_E_DUPLICATE_READER",
            0x8010_001C => "SCARD_E_CARD_UNSUPPORTED",
            0x8010_001D => "SCARD_E_NO_SERVICE",
            0x8010_001E => "SCARD_E_SERVICE_STOPPED",
            0x8010_001F => "SCARD_E_UNEXPECTED",
            0x8010_0022 => "SCARD_E_UNSUPPORTED_FEATURE",
            0x8010_0027 => "SCARD_E_NO_ACCESS",
            0x8010_002E => "SCARD_E_NO_READERS_AVAILABLE",
            0x8010_0065 => "SCARD_W_UNSUPPORTED_CARD",
            0x8010_0066 => "SCARD_W_UNRESPONSIVE_CARD",
            0x8010_0067 => "SCARD_W_UNPOWERED_CARD",
            0x8010_0068 => "SCARD_W_RESET_CARD",
            0x8010_0069 => "SCARD_W_REMOVED_CARD",
            0x8010_006A => "SCARD_W_SECURITY_VIOLATION",
            0x8010_006B => "SCARD_W_WRONG_CHV",
            0x8010_006C => "SCARD_W_CHV_BLOCKED",
            0x8010_006E => "SCARD_W_CANCELLED_BY_USER",
            _ => return None,
        };
        Some(name)
    }

    /// A human-readable description of this code
    pub const fn description(&self) -> &'static str {
        match self.code {
            0x8010_0001 => "An internal consistency check failed",
            0x8010_0002 => "The action was cancelled by an SCardCancel request",
            0x8010_0003 => "The supplied handle was invalid",
            0x8010_0004 => "One or more of the supplied parameters could not be properly interpreted",
            0x8010_0005 => "Registry startup information is missing or invalid",
            0x8010_0006 => "Not enough memory available to complete this command",
            0x8010_0007 => "An internal consistency timer has expired",
            0x8010_0008 => "The data buffer to receive returned data is too small for the returned data",
            0x8010_0009 => "The specified reader name is not recognized",
            0x8010_000A => "The user-specified timeout value has expired",
            0x8010_000B => "The smart card cannot be accessed because of other connections outstanding",
            0x8010_000C => "The operation requires a smart card, but no smart card is currently in the device",
            0x8010_000D => "The specified smart card name is not recognized",
            0x8010_000E => "The system could not dispose of the media in the requested manner",
            0x8010_000F => "The requested protocols are incompatible with the protocol currently in use with the smart card",
            0x8010_0010 => "The reader or smart card is not ready to accept commands",
            0x8010_0011 => "One or more of the supplied parameters values could not be properly interpreted",
            0x8010_0012 => "The action was cancelled by the system, presumably to log off or shut down",
            0x8010_0013 => "An internal communications error has been detected",
            0x8010_0014 => "An internal error has been detected, but the source is unknown",
            0x8010_0015 => "An ATR obtained from the registry is not a valid ATR string",
            0x8010_0016 => "An attempt was made to end a non-existent transaction",
            0x8010_0017 => "The specified reader is not currently available for use",
            0x8010_0018 => "The operation has been aborted to allow the server application to exit",
            0x8010_0019 => "The PCI Receive buffer was too small",
            0x8010_001A => "The reader driver does not meet minimal requirements for support",
            0x8010_001B => "The reader driver did not produce a unique reader name",
            0x8010_001C => "The smart card does not meet minimal requirements for support",
            0x8010_001D => "The smart card resource manager is not running",
            0x8010_001E => "The smart card resource manager has shut down",
            0x8010_001F => "An unexpected card error has occurred",
            0x8010_0022 => "This smart card does not support the requested feature",
            0x8010_0027 => "Access is denied to this file",
            0x8010_002E => "Cannot find a smart card reader",
            0x8010_0065 => "The reader cannot communicate with the card, due to ATR string configuration conflicts",
            0x8010_0066 => "The smart card is not responding to a reset",
            0x8010_0067 => "Power has been removed from the smart card, so that further communication is not possible",
            0x8010_0068 => "The smart card has been reset, so any shared state information is invalid",
            0x8010_0069 => "The smart card has been removed, so further communication is not possible",
            0x8010_006A => "Access was denied because of a security violation",
            0x8010_006B => "The card cannot be accessed because the wrong PIN was presented",
            0x8010_006C => "The card cannot be accessed because the maximum number of PIN entry attempts has been reached",
            0x8010_006E => "The user pressed \"Cancel\" on a Smart Card Selection Dialog",
            _ => "Unknown resource manager error",
        }
    }

    /// Whether the card was pulled or never inserted
    pub const fn is_card_absent(&self) -> bool {
        self.code == Self::REMOVED_CARD.code || self.code == Self::NO_SMARTCARD.code
    }

    /// Whether this code means "there is nothing to enumerate"
    pub const fn is_no_readers(&self) -> bool {
        self.code == Self::NO_READERS_AVAILABLE.code || self.code == Self::READER_UNAVAILABLE.code
    }
}

impl fmt::Display for ScardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "0x{:08X} ({}: {})",
            self.code,
            self.name().unwrap_or("UNKNOWN"),
            self.description()
        )
    }
}

impl std::error::Error for ScardError {}

impl From<u32> for ScardError {
    fn from(code: u32) -> Self {
        Self::new(code)
    }
}
