//! Error types for the mountlink library.

use std::fmt;

use thiserror::Error;

use crate::connection::ClientId;

/// The main error type for mountlink operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Serial port error.
    #[error("serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Transport read or write timed out.
    #[error("transport timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The stream ended before the expected number of bytes arrived.
    #[error("end of stream: expected {expected} bytes, got {got}")]
    EndOfStream { expected: usize, got: usize },

    /// The device answered with bytes that failed structural validation.
    #[error("unexpected response to {command}: {source}")]
    UnexpectedResponse {
        command: &'static str,
        #[source]
        source: FrameError,
    },

    /// The channel is closed or the session was never initialized.
    #[error("not connected")]
    NotConnected,

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// The device reported a firmware version this library cannot drive.
    #[error("unsupported firmware version {version}")]
    UnsupportedFirmware { version: String },

    /// The client id was never registered (or has been unregistered).
    #[error("unknown client {0}")]
    UnknownClient(ClientId),

    /// An argument could not be encoded on the wire.
    #[error("invalid argument: {reason}")]
    InvalidArgument { reason: String },
}

/// Coarse classification of an [`Error`].
///
/// Callers use this to decide whether to tear down the connection,
/// prompt the user, or just try again later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// I/O failure or timeout at the channel level.
    Transport,
    /// Structural or checksum validation failure of a response.
    UnexpectedResponse,
    /// Session uninitialized or channel closed.
    NotConnected,
    /// Caller-initiated cancellation.
    Cancelled,
    /// The request itself was unusable (bad argument, unknown client, old firmware).
    Usage,
}

impl Error {
    /// Classifies the error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Serial(_) | Self::Io(_) | Self::Timeout { .. } | Self::EndOfStream { .. } => {
                ErrorKind::Transport
            }
            Self::UnexpectedResponse { .. } => ErrorKind::UnexpectedResponse,
            Self::NotConnected => ErrorKind::NotConnected,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::UnsupportedFirmware { .. }
            | Self::UnknownClient(_)
            | Self::InvalidArgument { .. } => ErrorKind::Usage,
        }
    }

    /// Returns true if the protocol engine may retry after this error.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::UnexpectedResponse)
    }
}

/// Structural defects found while validating a device response.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Response length differs from the command's fixed length.
    #[error("expected {expected} bytes, got {got} ({})", Hex(.bytes))]
    Length {
        expected: usize,
        got: usize,
        bytes: Vec<u8>,
    },

    /// A literal byte at a fixed offset did not match.
    #[error(
        "byte {offset}: expected 0x{expected:02x}, got 0x{actual:02x} ({})",
        Hex(.bytes)
    )]
    Separator {
        offset: usize,
        expected: u8,
        actual: u8,
        bytes: Vec<u8>,
    },

    /// A fixed-width numeric field could not be parsed.
    #[error("unparsable {field} at byte {offset} ({})", Hex(.bytes))]
    Numeric {
        field: &'static str,
        offset: usize,
        bytes: Vec<u8>,
    },

    /// The trailing XOR checksum did not match.
    #[error(
        "checksum mismatch: computed 0x{computed:02x}, received 0x{received:02x} ({})",
        Hex(.bytes)
    )]
    Checksum {
        computed: u8,
        received: u8,
        bytes: Vec<u8>,
    },

    /// A single-byte acknowledgement was not one of the accepted characters.
    #[error(
        "expected acknowledgement {}, got {}",
        Ack(.expected),
        Ack(std::slice::from_ref(.actual))
    )]
    Acknowledgement { expected: Vec<u8>, actual: u8 },

    /// A configuration section tag was missing.
    #[error("missing section {expected} at byte {offset} ({})", Hex(.bytes))]
    SectionTag {
        expected: &'static str,
        offset: usize,
        bytes: Vec<u8>,
    },
}

/// Renders offending bytes as hex.
struct Hex<'a>(&'a [u8]);

impl fmt::Display for Hex<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// Renders acknowledgement characters as quoted ASCII.
struct Ack<'a>(&'a [u8]);

impl fmt::Display for Ack<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            write!(f, "{:?}", char::from(*byte))?;
        }
        Ok(())
    }
}

/// Result type alias for mountlink operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(Error::NotConnected.kind(), ErrorKind::NotConnected);
        assert_eq!(Error::Cancelled.kind(), ErrorKind::Cancelled);
        assert_eq!(Error::Timeout { timeout_ms: 10 }.kind(), ErrorKind::Transport);

        let err = Error::UnexpectedResponse {
            command: "move",
            source: FrameError::Acknowledgement {
                expected: vec![b'M'],
                actual: b'X',
            },
        };
        assert_eq!(err.kind(), ErrorKind::UnexpectedResponse);
        assert!(err.is_retryable());
        assert!(!Error::Timeout { timeout_ms: 10 }.is_retryable());
    }

    #[test]
    fn test_frame_error_display_includes_bytes() {
        let err = FrameError::Checksum {
            computed: 0x12,
            received: 0x34,
            bytes: vec![0xab, 0xcd],
        };
        let text = err.to_string();
        assert!(text.contains("0x12"));
        assert!(text.contains("0xabcd"));

        let err = FrameError::Acknowledgement {
            expected: vec![b'G', b'X'],
            actual: b'?',
        };
        assert_eq!(err.to_string(), "expected acknowledgement 'G'/'X', got '?'");
    }
}
