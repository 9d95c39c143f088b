//! Connection state and transport slots.
//!
//! [`Slots`] is the single owner of the connection state and of the
//! `current` / `upgrading` transports. Every transition that touches both
//! (begin, complete or abort an upgrade, begin closing, mark closed) is one
//! atomic operation here, so readers always see a consistent pair.
//!
//! # State Machine
//!
//! ```text
//! Unknown ──establish──► Normal ──begin_upgrade──► Upgrading
//!                          ▲                          │
//!                          └──complete / abort────────┘
//! Normal | Upgrading ──begin_close──► Closing ──mark_closed──► Closed
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::debug;

use crate::error::{Error, Result};
use crate::transport::{Transport, TransportKind};

// ============================================================================
// ConnectionState
// ============================================================================

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// Handshake not finished.
    #[default]
    Unknown,
    /// One established transport.
    Normal,
    /// Established transport plus a candidate being probed.
    Upgrading,
    /// Close requested; transports being torn down.
    Closing,
    /// Terminal.
    Closed,
}

impl ConnectionState {
    /// Returns `true` if reads and writes may proceed.
    #[inline]
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Normal | Self::Upgrading)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unknown => "unknown",
            Self::Normal => "normal",
            Self::Upgrading => "upgrading",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

// ============================================================================
// TransportSlot
// ============================================================================

/// A named transport held by the connection.
#[derive(Clone)]
pub struct TransportSlot {
    /// Which transport this is.
    pub kind: TransportKind,
    /// The transport itself.
    pub handle: Arc<dyn Transport>,
}

impl TransportSlot {
    /// Wraps a transport.
    #[inline]
    #[must_use]
    pub fn new(handle: Arc<dyn Transport>) -> Self {
        Self {
            kind: handle.kind(),
            handle,
        }
    }

    /// Returns `true` if this slot holds `transport`.
    #[inline]
    #[must_use]
    pub fn holds(&self, transport: &Arc<dyn Transport>) -> bool {
        Arc::ptr_eq(&self.handle, transport)
    }
}

impl fmt::Debug for TransportSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TransportSlot").field(&self.kind).finish()
    }
}

// ============================================================================
// Slots
// ============================================================================

#[derive(Debug, Default)]
struct Inner {
    current: Option<TransportSlot>,
    upgrading: Option<TransportSlot>,
}

/// Owner of the connection state and both transport slots.
pub struct Slots {
    inner: Mutex<Inner>,
    state: watch::Sender<ConnectionState>,
}

impl Default for Slots {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Slots {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Slots")
            .field("state", &*self.state.borrow())
            .field("current", &inner.current)
            .field("upgrading", &inner.upgrading)
            .finish()
    }
}

impl Slots {
    /// Creates empty slots in [`ConnectionState::Unknown`].
    #[must_use]
    pub fn new() -> Self {
        let (state, _) = watch::channel(ConnectionState::Unknown);
        Self {
            inner: Mutex::new(Inner::default()),
            state,
        }
    }

    /// Returns the current state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Subscribes to state changes.
    #[inline]
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Returns the established transport.
    #[must_use]
    pub fn current(&self) -> Option<Arc<dyn Transport>> {
        self.inner.lock().current.as_ref().map(|slot| Arc::clone(&slot.handle))
    }

    /// Returns the candidate transport, if an upgrade is in flight.
    #[must_use]
    pub fn candidate(&self) -> Option<Arc<dyn Transport>> {
        self.inner
            .lock()
            .upgrading
            .as_ref()
            .map(|slot| Arc::clone(&slot.handle))
    }

    /// Returns the transport the read loop should poll next.
    ///
    /// The candidate takes precedence, since its traffic drives the upgrade.
    /// The flag is `true` when the returned transport is the candidate.
    #[must_use]
    pub fn reader(&self) -> Option<(Arc<dyn Transport>, bool)> {
        let inner = self.inner.lock();
        if let Some(slot) = &inner.upgrading {
            return Some((Arc::clone(&slot.handle), true));
        }
        inner
            .current
            .as_ref()
            .map(|slot| (Arc::clone(&slot.handle), false))
    }

    /// Installs the first established transport: `Unknown` → `Normal`.
    ///
    /// Returns the transport it replaces, if the handshake swapped probes.
    pub fn establish(&self, slot: TransportSlot) -> Option<TransportSlot> {
        let mut inner = self.inner.lock();
        let previous = inner.current.replace(slot);
        self.state.send_replace(ConnectionState::Normal);
        previous
    }

    /// Installs a candidate: `Normal` → `Upgrading`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransportUnavailable`] unless the state is `Normal`.
    pub fn begin_upgrade(&self, slot: TransportSlot) -> Result<()> {
        let mut inner = self.inner.lock();
        let state = self.state();
        if state != ConnectionState::Normal {
            return Err(Error::transport_unavailable(format!(
                "cannot upgrade while {state}"
            )));
        }

        debug!(candidate = %slot.kind, "upgrade started");
        inner.upgrading = Some(slot);
        self.state.send_replace(ConnectionState::Upgrading);
        Ok(())
    }

    /// Swaps the candidate in: `Upgrading` → `Normal`.
    ///
    /// Returns the former current transport, which the caller must close.
    /// Returns `None` (and changes nothing) if no upgrade is in flight, so a
    /// second trigger for the same upgrade is a no-op.
    pub fn complete_upgrade(&self) -> Option<TransportSlot> {
        let mut inner = self.inner.lock();
        if self.state() != ConnectionState::Upgrading {
            return None;
        }
        let candidate = inner.upgrading.take()?;

        debug!(transport = %candidate.kind, "upgrade completed");
        let previous = inner.current.replace(candidate);
        self.state.send_replace(ConnectionState::Normal);
        previous
    }

    /// Discards the candidate if it is `transport`: `Upgrading` → `Normal`.
    ///
    /// Returns the discarded slot.
    pub fn abort_upgrade(&self, transport: &Arc<dyn Transport>) -> Option<TransportSlot> {
        let mut inner = self.inner.lock();
        if !inner.upgrading.as_ref().is_some_and(|slot| slot.holds(transport)) {
            return None;
        }

        let discarded = inner.upgrading.take();
        if self.state() == ConnectionState::Upgrading {
            self.state.send_replace(ConnectionState::Normal);
        }
        debug!("upgrade aborted, staying on current transport");
        discarded
    }

    /// Moves an open connection to `Closing`.
    ///
    /// Detaches and returns both transports, so the caller is their only
    /// closer. Returns `None` if the connection was not open (already
    /// closing or closed).
    pub fn begin_close(&self) -> Option<(Option<TransportSlot>, Option<TransportSlot>)> {
        let mut inner = self.inner.lock();
        if !self.state().is_open() {
            return None;
        }

        self.state.send_replace(ConnectionState::Closing);
        Some((inner.current.take(), inner.upgrading.take()))
    }

    /// Detaches the current transport if it is `transport`.
    ///
    /// The state is left alone; [`mark_closed`](Self::mark_closed) finishes
    /// the teardown.
    pub fn detach_current(&self, transport: &Arc<dyn Transport>) -> Option<TransportSlot> {
        let mut inner = self.inner.lock();
        if !inner.current.as_ref().is_some_and(|slot| slot.holds(transport)) {
            return None;
        }
        inner.current.take()
    }

    /// Moves to the terminal `Closed` state.
    ///
    /// Returns every transport still held so the caller can close them.
    pub fn mark_closed(&self) -> Vec<TransportSlot> {
        let mut inner = self.inner.lock();
        self.state.send_replace(ConnectionState::Closed);
        inner.upgrading.take().into_iter().chain(inner.current.take()).collect()
    }
}

// ============================================================================
// Tests
// ============================================================================
