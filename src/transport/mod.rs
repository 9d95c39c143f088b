//! Transport capability layer.
//!
//! The connection never touches sockets or HTTP itself. It consumes the
//! [`Transport`] capability (read a frame, write a frame, close) and opens
//! transports through a [`TransportFactory`] looked up by [`TransportKind`]
//! in an explicit [`TransportFactories`] map handed over at connect time.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐   open(TransportRequest)   ┌──────────────────┐
//! │    Connection    │ ─────────────────────────► │ TransportFactory │
//! │                  │                            └────────┬─────────┘
//! │ current ─────────┼──► Arc<dyn Transport> ◄────────────┘
//! │ upgrading ───────┼──► Arc<dyn Transport>
//! └──────────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `frame` | Frame kinds and frame container |
//! | `memory` | In-process transport pair |

// ============================================================================
// Submodules
// ============================================================================

/// Transport-level frames.
pub mod frame;

/// In-process transport for tests and embedding.
pub mod memory;

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use url::Url;

use crate::error::{Error, Result};
use crate::identifiers::SessionId;

// ============================================================================
// Re-exports
// ============================================================================

pub use frame::{Frame, FrameKind, MessageType, PROBE_PAYLOAD};
pub use memory::{MemoryFactory, MemoryListener, MemoryPeer, MemoryTransport};

// ============================================================================
// TransportKind
// ============================================================================

/// The two recognized transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Request/response long-polling.
    Polling,
    /// Persistent full-duplex stream.
    Stream,
}

impl TransportKind {
    /// Returns the configuration name.
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Polling => "polling",
            Self::Stream => "stream",
        }
    }

    /// Returns the value sent in the `transport` query parameter.
    #[inline]
    #[must_use]
    pub const fn query_value(self) -> &'static str {
        match self {
            Self::Polling => "polling",
            Self::Stream => "websocket",
        }
    }
}

impl FromStr for TransportKind {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self> {
        match name {
            "polling" => Ok(Self::Polling),
            "stream" | "websocket" => Ok(Self::Stream),
            other => Err(Error::unsupported_transport(other)),
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// TransportRequest
// ============================================================================

/// Everything a factory needs to open one transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportRequest {
    /// Fully composed endpoint URL, query included.
    pub url: Url,
    /// Transport to open.
    pub kind: TransportKind,
    /// Session the transport joins, if any.
    pub session_id: Option<SessionId>,
    /// Extra headers forwarded with the request.
    pub headers: Vec<(String, String)>,
}

impl TransportRequest {
    /// Builds a request for `kind` against `base`.
    ///
    /// Sets the `transport` query parameter, the `sid` parameter when a
    /// session is known, and switches to `ws`/`wss` for stream transports.
    #[must_use]
    pub fn new(
        base: &Url,
        kind: TransportKind,
        session_id: Option<SessionId>,
        headers: Vec<(String, String)>,
    ) -> Self {
        let mut url = base.clone();

        let retained: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(key, _)| key != "transport" && key != "sid")
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();
        {
            let mut query = url.query_pairs_mut();
            query.clear();
            query.extend_pairs(retained);
            query.append_pair("transport", kind.query_value());
            if let Some(sid) = &session_id {
                query.append_pair("sid", sid.as_str());
            }
        }

        if kind == TransportKind::Stream {
            let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
            // http(s) -> ws(s) is always permitted for special schemes
            let _ = url.set_scheme(scheme);
        }

        Self {
            url,
            kind,
            session_id,
            headers,
        }
    }

    /// Returns the value of a query parameter.
    #[must_use]
    pub fn query(&self, key: &str) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }
}

// ============================================================================
// Transport
// ============================================================================

/// An open transport carrying frames for one session.
///
/// Reads and writes may be issued concurrently from different tasks.
/// After [`close`](Transport::close), pending and future reads fail with
/// [`Error::EndOfStream`].
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Returns which transport this is.
    fn kind(&self) -> TransportKind;

    /// Waits for the next inbound frame.
    async fn next_frame(&self) -> Result<Frame>;

    /// Writes one frame.
    async fn send_frame(&self, frame: Frame) -> Result<()>;

    /// Closes the transport.
    async fn close(&self) -> Result<()>;
}

// ============================================================================
// TransportFactory
// ============================================================================

/// Opens transports of one kind.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Opens a transport for `request`.
    async fn open(&self, request: &TransportRequest) -> Result<Arc<dyn Transport>>;
}

// ============================================================================
// TransportFactories
// ============================================================================

/// Explicit transport-kind to factory map.
///
/// Built once per client and passed in as configuration.
#[derive(Clone, Default)]
pub struct TransportFactories {
    factories: FxHashMap<TransportKind, Arc<dyn TransportFactory>>,
}

impl TransportFactories {
    /// Creates an empty map.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `factory` for `kind`, replacing any earlier one.
    pub fn insert(&mut self, kind: TransportKind, factory: Arc<dyn TransportFactory>) {
        self.factories.insert(kind, factory);
    }

    /// Returns the factory for `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedTransport`] if none is registered.
    pub fn get(&self, kind: TransportKind) -> Result<&Arc<dyn TransportFactory>> {
        self.factories
            .get(&kind)
            .ok_or_else(|| Error::unsupported_transport(kind.as_str()))
    }

    /// Returns `true` if a factory is registered for `kind`.
    #[inline]
    #[must_use]
    pub fn contains(&self, kind: TransportKind) -> bool {
        self.factories.contains_key(&kind)
    }
}

impl fmt::Debug for TransportFactories {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.factories.keys()).finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("http://localhost:8000/socket.io/?EIO=3&token=t").expect("valid url")
    }

    #[test]
    fn test_transport_kind_from_str() {
        assert_eq!("polling".parse::<TransportKind>().ok(), Some(TransportKind::Polling));
        assert_eq!("stream".parse::<TransportKind>().ok(), Some(TransportKind::Stream));
        assert_eq!("websocket".parse::<TransportKind>().ok(), Some(TransportKind::Stream));

        let err = "flash".parse::<TransportKind>().unwrap_err();
        assert!(matches!(err, Error::UnsupportedTransport { ref name } if name == "flash"));
    }

    #[test]
    fn test_polling_request_without_session() {
        let request = TransportRequest::new(&base(), TransportKind::Polling, None, Vec::new());
        assert_eq!(request.url.scheme(), "http");
        assert_eq!(request.query("transport").as_deref(), Some("polling"));
        assert_eq!(request.query("EIO").as_deref(), Some("3"));
        assert_eq!(request.query("token").as_deref(), Some("t"));
        assert_eq!(request.query("sid"), None);
    }

    #[test]
    fn test_stream_request_switches_scheme() {
        let sid = SessionId::new("abc");
        let request = TransportRequest::new(&base(), TransportKind::Stream, Some(sid), Vec::new());
        assert_eq!(request.url.scheme(), "ws");
        assert_eq!(request.query("transport").as_deref(), Some("websocket"));
        assert_eq!(request.query("sid").as_deref(), Some("abc"));

        let secure = Url::parse("https://example.com/socket.io/").expect("valid url");
        let request = TransportRequest::new(&secure, TransportKind::Stream, None, Vec::new());
        assert_eq!(request.url.scheme(), "wss");
    }

    #[test]
    fn test_request_replaces_transport_and_sid() {
        let first = TransportRequest::new(
            &base(),
            TransportKind::Polling,
            Some(SessionId::new("old")),
            Vec::new(),
        );
        let second = TransportRequest::new(
            &first.url,
            TransportKind::Polling,
            Some(SessionId::new("new")),
            Vec::new(),
        );
        let sids: Vec<_> = second
            .url
            .query_pairs()
            .filter(|(k, _)| k == "sid")
            .collect();
        assert_eq!(sids.len(), 1);
        assert_eq!(second.query("sid").as_deref(), Some("new"));
    }

    #[test]
    fn test_factories_missing_kind() {
        let factories = TransportFactories::new();
        assert!(!factories.contains(TransportKind::Stream));
        assert!(matches!(
            factories.get(TransportKind::Stream),
            Err(Error::UnsupportedTransport { .. })
        ));
    }
}
