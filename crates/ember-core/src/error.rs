//! # Ember Error Handling
//!
//! Error types for the command-submission stack.
//!
//! Error handling in Ember follows these principles:
//! - Precondition violations are returned, never asserted
//! - Errors are `Copy` and `no_std` compatible
//! - Consumer-side failures are only visible through signal values

use core::fmt;

// =============================================================================
// RESULT TYPE
// =============================================================================

/// Ember Result type alias
pub type Result<T> = core::result::Result<T, Error>;

// =============================================================================
// ERROR ENUM
// =============================================================================

/// Ember unified error type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    // =========================================================================
    // Precondition Errors
    // =========================================================================
    /// Invalid parameter provided
    InvalidArgument,
    /// Operation selector not recognized
    InvalidOperation,
    /// Address does not satisfy the operation's alignment
    MisalignedAddress,
    /// Size does not fit the hardware field
    SizeUnsupported,
    /// Operation not supported by this packet format
    NotSupported,

    // =========================================================================
    // Packet Errors
    // =========================================================================
    /// Words do not form a valid packet
    InvalidPacket,
    /// Packet does not fit in a queue slot
    PacketTooLarge,

    // =========================================================================
    // Resource Errors
    // =========================================================================
    /// Resource is busy (queue full)
    Busy,
    /// Operation timed out
    Timeout,
    /// Out of memory
    OutOfMemory,
    /// Access outside a memory region
    OutOfBounds,
    /// Address not owned by the allocator
    InvalidAddress,
    /// Command buffer full
    CommandBufferFull,
    /// Queue size is not a power of two
    InvalidQueueSize,

    // =========================================================================
    // Signal Errors
    // =========================================================================
    /// Signal handle unknown or already destroyed
    InvalidSignal,
    /// Completion wait observed an unexpected value
    UnexpectedSignalValue,
}

impl Error {
    /// Check if this error reports a caller programming error
    pub const fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::InvalidArgument
                | Self::InvalidOperation
                | Self::MisalignedAddress
                | Self::SizeUnsupported
                | Self::NotSupported
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // Precondition
            Self::InvalidArgument => write!(f, "invalid argument"),
            Self::InvalidOperation => write!(f, "invalid operation"),
            Self::MisalignedAddress => write!(f, "misaligned address"),
            Self::SizeUnsupported => write!(f, "size not supported"),
            Self::NotSupported => write!(f, "operation not supported"),

            // Packet
            Self::InvalidPacket => write!(f, "invalid packet"),
            Self::PacketTooLarge => write!(f, "packet too large for queue slot"),

            // Resource
            Self::Busy => write!(f, "resource busy"),
            Self::Timeout => write!(f, "operation timed out"),
            Self::OutOfMemory => write!(f, "out of memory"),
            Self::OutOfBounds => write!(f, "access out of bounds"),
            Self::InvalidAddress => write!(f, "invalid address"),
            Self::CommandBufferFull => write!(f, "command buffer full"),
            Self::InvalidQueueSize => write!(f, "queue size is not a power of two"),

            // Signal
            Self::InvalidSignal => write!(f, "invalid signal"),
            Self::UnexpectedSignalValue => write!(f, "unexpected signal value"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn test_precondition_classification() {
        assert!(Error::MisalignedAddress.is_precondition());
        assert!(Error::SizeUnsupported.is_precondition());
        assert!(Error::InvalidOperation.is_precondition());
        assert!(!Error::Busy.is_precondition());
        assert!(!Error::UnexpectedSignalValue.is_precondition());
    }

    #[test]
    fn test_display() {
        assert_eq!(Error::Busy.to_string(), "resource busy");
        assert_eq!(Error::InvalidQueueSize.to_string(), "queue size is not a power of two");
    }
}
