//! Handshake payload.
//!
//! The first frame on the initial polling request is an `Open` frame whose
//! payload is a JSON object:
//!
//! ```json
//! {"sid":"abc","upgrades":["websocket"],"pingInterval":25000,"pingTimeout":60000}
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::identifiers::SessionId;
use crate::transport::{Frame, FrameKind, TransportKind};

// ============================================================================
// HandshakeData
// ============================================================================

/// Session parameters announced by the server.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeData {
    /// Session id.
    pub sid: SessionId,

    /// Transports the session may upgrade to.
    #[serde(default)]
    pub upgrades: Vec<String>,

    /// Ping interval in milliseconds.
    #[serde(default)]
    pub ping_interval: u64,

    /// Ping timeout in milliseconds.
    #[serde(default)]
    pub ping_timeout: u64,
}

impl HandshakeData {
    /// Parses the handshake from the first frame of a session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] if the frame is not an `Open` frame or its
    /// payload is not a valid handshake object.
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        if frame.kind != FrameKind::Open {
            return Err(Error::decode(format!(
                "expected open frame, got {}",
                frame.kind
            )));
        }

        serde_json::from_slice(&frame.data)
            .map_err(|e| Error::decode(format!("handshake payload: {e}")))
    }

    /// Returns the ping interval, or `None` if the server sent zero.
    #[inline]
    #[must_use]
    pub fn ping_interval(&self) -> Option<Duration> {
        (self.ping_interval > 0).then(|| Duration::from_millis(self.ping_interval))
    }

    /// Returns the ping timeout, or `None` if the server sent zero.
    #[inline]
    #[must_use]
    pub fn ping_timeout(&self) -> Option<Duration> {
        (self.ping_timeout > 0).then(|| Duration::from_millis(self.ping_timeout))
    }

    /// Returns `true` if the server advertises an upgrade to `kind`.
    #[must_use]
    pub fn advertises(&self, kind: TransportKind) -> bool {
        self.upgrades.iter().any(|name| name == kind.query_value())
    }
}

// ============================================================================
// Tests
// ============================================================================
