//! In-process transport.
//!
//! [`MemoryFactory`] opens channel-backed transports. For every transport it
//! opens, the matching server half ([`MemoryPeer`]) is handed to the
//! [`MemoryListener`] together with the [`TransportRequest`] that opened it,
//! so a test (or an embedded server) can script the other side.
//!
//! # Example
//!
//! ```ignore
//! let (factory, mut listener) = MemoryFactory::new(TransportKind::Polling);
//!
//! tokio::spawn(async move {
//!     while let Some((request, peer)) = listener.accept().await {
//!         // answer the handshake on `peer`...
//!     }
//! });
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc, watch};
use tracing::trace;

use crate::error::{Error, Result};

use super::{Frame, Transport, TransportFactory, TransportKind, TransportRequest};

// ============================================================================
// Shared
// ============================================================================

/// State shared by both halves of one in-memory transport.
#[derive(Debug)]
struct Shared {
    /// Set once either side closes.
    closed: watch::Sender<bool>,
    /// Number of `close` calls made by the client half.
    close_calls: AtomicUsize,
}

impl Shared {
    fn new() -> Arc<Self> {
        let (closed, _) = watch::channel(false);
        Arc::new(Self {
            closed,
            close_calls: AtomicUsize::new(0),
        })
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    fn close(&self) {
        self.closed.send_replace(true);
    }

    /// Resolves once the transport is closed.
    async fn wait_closed(&self) {
        let mut rx = self.closed.subscribe();
        // The sender lives as long as `self`, so this only ends on close.
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

/// Creates a connected client/server pair.
fn pair(kind: TransportKind) -> (MemoryTransport, MemoryPeer) {
    let (to_peer, from_client) = mpsc::unbounded_channel();
    let (to_client, from_peer) = mpsc::unbounded_channel();
    let shared = Shared::new();

    let transport = MemoryTransport {
        kind,
        tx: to_peer,
        rx: Mutex::new(from_peer),
        shared: Arc::clone(&shared),
    };
    let peer = MemoryPeer {
        kind,
        tx: to_client,
        rx: Mutex::new(from_client),
        shared,
    };
    (transport, peer)
}

// ============================================================================
// MemoryTransport
// ============================================================================

/// Client half of an in-memory transport.
pub struct MemoryTransport {
    kind: TransportKind,
    tx: mpsc::UnboundedSender<Frame>,
    rx: Mutex<mpsc::UnboundedReceiver<Frame>>,
    shared: Arc<Shared>,
}

impl fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("kind", &self.kind)
            .field("closed", &self.shared.is_closed())
            .finish()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn next_frame(&self) -> Result<Frame> {
        if self.shared.is_closed() {
            return Err(Error::EndOfStream);
        }

        let mut rx = self.rx.lock().await;
        tokio::select! {
            biased;

            () = self.shared.wait_closed() => Err(Error::EndOfStream),
            frame = rx.recv() => frame.ok_or(Error::EndOfStream),
        }
    }

    async fn send_frame(&self, frame: Frame) -> Result<()> {
        if self.shared.is_closed() {
            return Err(Error::transport(format!("{} transport closed", self.kind)));
        }
        trace!(kind = %frame.kind, transport = %self.kind, "memory transport send");
        self.tx
            .send(frame)
            .map_err(|_| Error::transport(format!("{} peer dropped", self.kind)))
    }

    async fn close(&self) -> Result<()> {
        self.shared.close_calls.fetch_add(1, Ordering::SeqCst);
        self.shared.close();
        Ok(())
    }
}

// ============================================================================
// MemoryPeer
// ============================================================================

/// Server half of an in-memory transport.
pub struct MemoryPeer {
    kind: TransportKind,
    tx: mpsc::UnboundedSender<Frame>,
    rx: Mutex<mpsc::UnboundedReceiver<Frame>>,
    shared: Arc<Shared>,
}

impl fmt::Debug for MemoryPeer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryPeer")
            .field("kind", &self.kind)
            .field("closed", &self.shared.is_closed())
            .finish()
    }
}

impl MemoryPeer {
    /// Returns which transport this peer serves.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    /// Sends a frame to the client.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Transport`] if the transport is closed.
    pub fn send(&self, frame: Frame) -> Result<()> {
        if self.shared.is_closed() {
            return Err(Error::transport("transport closed"));
        }
        self.tx
            .send(frame)
            .map_err(|_| Error::transport("client dropped"))
    }

    /// Receives the next frame written by the client.
    ///
    /// Frames written before the client closed are still delivered;
    /// returns `None` once the transport is closed and drained.
    pub async fn recv(&self) -> Option<Frame> {
        let mut rx = self.rx.lock().await;
        if let Ok(frame) = rx.try_recv() {
            return Some(frame);
        }
        if self.shared.is_closed() {
            return None;
        }

        tokio::select! {
            frame = rx.recv() => return frame,
            () = self.shared.wait_closed() => {}
        }
        rx.try_recv().ok()
    }

    /// Closes the transport from the server side.
    pub fn close(&self) {
        self.shared.close();
    }

    /// Returns `true` once either side closed the transport.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Returns how many times the client half was closed.
    #[inline]
    #[must_use]
    pub fn close_count(&self) -> usize {
        self.shared.close_calls.load(Ordering::SeqCst)
    }
}

// ============================================================================
// MemoryFactory / MemoryListener
// ============================================================================

/// Factory opening in-memory transports of one kind.
#[derive(Debug, Clone)]
pub struct MemoryFactory {
    kind: TransportKind,
    accepted: mpsc::UnboundedSender<(TransportRequest, MemoryPeer)>,
}

/// Receives the server half of every transport a [`MemoryFactory`] opens.
#[derive(Debug)]
pub struct MemoryListener {
    accepted: mpsc::UnboundedReceiver<(TransportRequest, MemoryPeer)>,
}

impl MemoryFactory {
    /// Creates a factory and its listener.
    #[must_use]
    pub fn new(kind: TransportKind) -> (Self, MemoryListener) {
        let (accepted, rx) = mpsc::unbounded_channel();
        (Self { kind, accepted }, MemoryListener { accepted: rx })
    }

    /// Creates a factory that shares `other`'s listener but opens `kind`.
    #[must_use]
    pub fn sibling(&self, kind: TransportKind) -> Self {
        Self {
            kind,
            accepted: self.accepted.clone(),
        }
    }
}

#[async_trait]
impl TransportFactory for MemoryFactory {
    async fn open(&self, request: &TransportRequest) -> Result<Arc<dyn Transport>> {
        if request.kind != self.kind {
            return Err(Error::unsupported_transport(request.kind.as_str()));
        }

        let (transport, peer) = pair(self.kind);
        self.accepted
            .send((request.clone(), peer))
            .map_err(|_| Error::transport("connection refused"))?;

        trace!(url = %request.url, kind = %self.kind, "memory transport opened");
        Ok(Arc::new(transport))
    }
}

impl MemoryListener {
    /// Waits for the next transport opened by the client.
    ///
    /// Returns `None` once every factory has been dropped.
    pub async fn accept(&mut self) -> Option<(TransportRequest, MemoryPeer)> {
        self.accepted.recv().await
    }

    /// Returns an already opened transport without waiting.
    pub fn try_accept(&mut self) -> Option<(TransportRequest, MemoryPeer)> {
        self.accepted.try_recv().ok()
    }
}

// ============================================================================
// Tests
// ============================================================================
