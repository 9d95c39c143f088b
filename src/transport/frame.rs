//! Transport-level frames.
//!
//! Every transport carries a sequence of frames. A frame is tagged with one
//! of the seven negotiation-layer kinds; only [`FrameKind::Message`] frames
//! carry application packets.
//!
//! # Frame Kinds
//!
//! | Kind | Tag | Purpose |
//! |------|-----|---------|
//! | `Open` | `0` | Handshake payload from the server |
//! | `Close` | `1` | Graceful close request |
//! | `Ping` | `2` | Liveness probe / upgrade probe |
//! | `Pong` | `3` | Answer to a ping |
//! | `Message` | `4` | Application payload |
//! | `Upgrade` | `5` | Commit the transport upgrade |
//! | `Noop` | `6` | Flush a pending poll |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

// ============================================================================
// Constants
// ============================================================================

/// Literal payload carried by the upgrade probe ping.
pub const PROBE_PAYLOAD: &str = "probe";

/// Number of leading payload bytes inspected for the probe marker.
const PROBE_SCAN_LIMIT: usize = 64;

// ============================================================================
// MessageType
// ============================================================================

/// Encoding of a frame payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MessageType {
    /// UTF-8 text payload.
    #[default]
    Text,
    /// Opaque binary payload.
    Binary,
}

// ============================================================================
// FrameKind
// ============================================================================

/// Negotiation-layer frame kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// Handshake payload.
    Open,
    /// Close request.
    Close,
    /// Ping.
    Ping,
    /// Pong.
    Pong,
    /// Application message.
    Message,
    /// Upgrade commit.
    Upgrade,
    /// No operation.
    Noop,
}

impl FrameKind {
    /// Returns the single-character wire tag.
    #[must_use]
    pub const fn as_char(self) -> char {
        match self {
            Self::Open => '0',
            Self::Close => '1',
            Self::Ping => '2',
            Self::Pong => '3',
            Self::Message => '4',
            Self::Upgrade => '5',
            Self::Noop => '6',
        }
    }

    /// Parses a wire tag.
    #[must_use]
    pub const fn from_char(tag: char) -> Option<Self> {
        match tag {
            '0' => Some(Self::Open),
            '1' => Some(Self::Close),
            '2' => Some(Self::Ping),
            '3' => Some(Self::Pong),
            '4' => Some(Self::Message),
            '5' => Some(Self::Upgrade),
            '6' => Some(Self::Noop),
            _ => None,
        }
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Open => "open",
            Self::Close => "close",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Message => "message",
            Self::Upgrade => "upgrade",
            Self::Noop => "noop",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Frame
// ============================================================================

/// A single transport frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame kind.
    pub kind: FrameKind,
    /// Payload encoding.
    pub message_type: MessageType,
    /// Raw payload bytes.
    pub data: Vec<u8>,
}

impl Frame {
    /// Creates a text frame.
    #[inline]
    #[must_use]
    pub fn new(kind: FrameKind, data: impl Into<Vec<u8>>) -> Self {
        Self {
            kind,
            message_type: MessageType::Text,
            data: data.into(),
        }
    }

    /// Creates a payload-less frame.
    #[inline]
    #[must_use]
    pub fn empty(kind: FrameKind) -> Self {
        Self::new(kind, Vec::new())
    }

    /// Creates a message frame.
    #[inline]
    #[must_use]
    pub fn message(message_type: MessageType, data: impl Into<Vec<u8>>) -> Self {
        Self {
            kind: FrameKind::Message,
            message_type,
            data: data.into(),
        }
    }

    /// Creates the upgrade probe ping.
    #[inline]
    #[must_use]
    pub fn probe() -> Self {
        Self::new(FrameKind::Ping, PROBE_PAYLOAD)
    }

    /// Returns `true` if the payload carries the probe marker.
    #[must_use]
    pub fn is_probe(&self) -> bool {
        let scanned = &self.data[..self.data.len().min(PROBE_SCAN_LIMIT)];
        scanned
            .windows(PROBE_PAYLOAD.len())
            .any(|window| window == PROBE_PAYLOAD.as_bytes())
    }

    /// Returns the payload as text, if valid UTF-8.
    #[inline]
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.data).ok()
    }
}

// ============================================================================
// Tests
// ============================================================================
