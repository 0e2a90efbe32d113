//! Error types for the `tes-core` wire protocol and data pipeline.

use std::io;
use thiserror::Error;

/// Main error type for `tes-core` operations.
///
/// Mirrors `spec.md` §7: one variant per named error kind. Recoverable
/// kinds (`Truncated`, `CrcFailed`, `Malformed`, `UnknownRouting`) are
/// expected to be logged and discarded by callers rather than propagated
/// as fatal; `Io` and `ResourceExhausted` are expected to propagate.
#[derive(Debug, Error)]
pub enum TesError {
    /// Byte source ended mid-packet or mid-field.
    #[error("truncated: expected {expected} bytes, had {available}")]
    Truncated { expected: usize, available: usize },

    /// CRC16 validation failed for a packet.
    #[error("CRC mismatch: expected {expected:#06X}, got {actual:#06X}")]
    CrcFailed { expected: u16, actual: u16 },

    /// Structurally invalid payload (nested collation, bad component size,
    /// draw type out of range, ...).
    #[error("malformed packet: {0}")]
    Malformed(String),

    /// No handler registered for a routing ID.
    #[error("no handler registered for routing id {0}")]
    UnknownRouting(u16),

    /// A buffer or shape/mesh ID space was exhausted.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Socket or file I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A decoded value was outside its valid domain (flags, enum tags).
    #[error("invalid value: {0}")]
    Invalid(String),
}

/// Result type alias for `tes-core` operations.
pub type Result<T> = std::result::Result<T, TesError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncated_display() {
        let err = TesError::Truncated { expected: 4, available: 1 };
        assert!(err.to_string().contains("expected 4"));
    }

    #[test]
    fn crc_failed_display() {
        let err = TesError::CrcFailed { expected: 0x1234, actual: 0x5678 };
        assert!(err.to_string().contains("0x1234"));
        assert!(err.to_string().contains("0x5678"));
    }

    #[test]
    fn io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::UnexpectedEof, "eof");
        let tes_err: TesError = io_err.into();
        assert!(matches!(tes_err, TesError::Io(_)));
    }
}
