//! Error types for the realtime client.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use socketio_client::{Client, Result};
//!
//! async fn example(client: &Client) -> Result<()> {
//!     client.emit("chat", ("hello",)).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`], [`Error::UnsupportedTransport`], [`Error::Url`] |
//! | Session | [`Error::HandshakeFailed`], [`Error::TransportUnavailable`], [`Error::EndOfStream`] |
//! | Codec | [`Error::Encode`], [`Error::Decode`] |
//! | Registration | [`Error::InvalidHandler`] |
//! | External | [`Error::Transport`] |

// ============================================================================
// Imports
// ============================================================================

use std::result::Result as StdResult;

use thiserror::Error;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when client configuration is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// Requested transport is not recognized or has no factory.
    ///
    /// Returned before any network activity takes place.
    #[error("Unsupported transport: {name}")]
    UnsupportedTransport {
        /// The transport name that was requested.
        name: String,
    },

    /// Malformed endpoint URL.
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    // ========================================================================
    // Session Errors
    // ========================================================================
    /// Handshake with the server failed.
    ///
    /// Wraps the originating error together with the step that failed.
    #[error("Handshake failed during {stage}: {source}")]
    HandshakeFailed {
        /// The handshake step that failed.
        stage: &'static str,
        /// The originating error.
        #[source]
        source: Box<Error>,
    },

    /// No transport is able to carry a write right now.
    ///
    /// Returned when writing while the connection is closing or closed, or
    /// when an upgrade did not settle within the bounded wait.
    #[error("Transport unavailable: {reason}")]
    TransportUnavailable {
        /// Why no transport is available.
        reason: String,
    },

    /// Connection closed while a read or write was outstanding.
    #[error("End of stream")]
    EndOfStream,

    // ========================================================================
    // Codec Errors
    // ========================================================================
    /// Packet or payload encoding failed.
    #[error("Encode error: {message}")]
    Encode {
        /// Description of the encoding failure.
        message: String,
    },

    /// Packet, payload or argument decoding failed.
    #[error("Decode error: {message}")]
    Decode {
        /// Description of the decoding failure.
        message: String,
    },

    // ========================================================================
    // Registration Errors
    // ========================================================================
    /// Handler could not be registered.
    #[error("Invalid handler for '{event}': {reason}")]
    InvalidHandler {
        /// Event name the handler was registered under.
        event: String,
        /// Why the registration was rejected.
        reason: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// Error reported by a transport implementation.
    #[error("Transport error: {message}")]
    Transport {
        /// Description reported by the transport.
        message: String,
    },
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an unsupported transport error.
    #[inline]
    pub fn unsupported_transport(name: impl Into<String>) -> Self {
        Self::UnsupportedTransport { name: name.into() }
    }

    /// Wraps an error raised during the given handshake step.
    #[inline]
    pub fn handshake(stage: &'static str, source: Error) -> Self {
        Self::HandshakeFailed {
            stage,
            source: Box::new(source),
        }
    }

    /// Creates a transport unavailable error.
    #[inline]
    pub fn transport_unavailable(reason: impl Into<String>) -> Self {
        Self::TransportUnavailable {
            reason: reason.into(),
        }
    }

    /// Creates an encode error.
    #[inline]
    pub fn encode(message: impl Into<String>) -> Self {
        Self::Encode {
            message: message.into(),
        }
    }

    /// Creates a decode error.
    #[inline]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Creates an invalid handler error.
    #[inline]
    pub fn invalid_handler(event: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidHandler {
            event: event.into(),
            reason: reason.into(),
        }
    }

    /// Creates a transport error.
    #[inline]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if the connection is gone.
    #[inline]
    #[must_use]
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, Self::EndOfStream)
    }

    /// Returns `true` if this is a codec error.
    #[inline]
    #[must_use]
    pub fn is_codec_error(&self) -> bool {
        matches!(self, Self::Encode { .. } | Self::Decode { .. })
    }

    /// Returns `true` if this is a connection-level error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::HandshakeFailed { .. }
                | Self::TransportUnavailable { .. }
                | Self::EndOfStream
                | Self::Transport { .. }
        )
    }

    /// Returns `true` if this error may succeed on retry.
    ///
    /// The client never retries by itself; this is a hint for callers.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::TransportUnavailable { .. } => true,
            Self::HandshakeFailed { source, .. } => source.is_recoverable()
                || matches!(**source, Self::Transport { .. } | Self::EndOfStream),
            _ => false,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::unsupported_transport("carrier-pigeon");
        assert_eq!(err.to_string(), "Unsupported transport: carrier-pigeon");
    }

    #[test]
    fn test_handshake_keeps_source() {
        let err = Error::handshake("probe", Error::transport("connection refused"));
        assert_eq!(
            err.to_string(),
            "Handshake failed during probe: Transport error: connection refused"
        );

        let source = std::error::Error::source(&err).expect("has source");
        assert_eq!(source.to_string(), "Transport error: connection refused");
    }

    #[test]
    fn test_is_codec_error() {
        assert!(Error::encode("x").is_codec_error());
        assert!(Error::decode("x").is_codec_error());
        assert!(!Error::EndOfStream.is_codec_error());
    }

    #[test]
    fn test_is_connection_error() {
        assert!(Error::EndOfStream.is_connection_error());
        assert!(Error::transport_unavailable("closing").is_connection_error());
        assert!(Error::handshake("open", Error::EndOfStream).is_connection_error());
        assert!(!Error::config("test").is_connection_error());
    }

    #[test]
    fn test_is_recoverable() {
        assert!(Error::transport_unavailable("upgrading").is_recoverable());
        assert!(Error::handshake("confirm", Error::transport("reset")).is_recoverable());
        assert!(!Error::handshake("decode", Error::decode("bad json")).is_recoverable());
        assert!(!Error::invalid_handler("", "empty").is_recoverable());
    }

    #[test]
    fn test_from_url_error() {
        let url_err = url::Url::parse("not a url").unwrap_err();
        let err: Error = url_err.into();
        assert!(matches!(err, Error::Url(_)));
    }
}
