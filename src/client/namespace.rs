//! Per-namespace handler registries and packet routing.
//!
//! Each namespace owns an `events` registry (one handler per event name,
//! later registrations replace earlier ones), a `pending_acks` registry
//! (single-use callbacks keyed by correlation id) and its id counter, all
//! behind one read/write lock. Handlers are invoked outside the lock, so a
//! handler may register handlers or emit without deadlocking.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::error::Result;
use crate::identifiers::AckId;
use crate::protocol::{HandlerReply, PacketDecoder};

use super::handler::HandlerEntry;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Default)]
struct Registry {
    events: FxHashMap<String, Arc<HandlerEntry>>,
    pending_acks: FxHashMap<AckId, Arc<HandlerEntry>>,
    next_id: AckId,
}

/// Handler state of one namespace.
#[derive(Debug)]
pub(crate) struct Namespace {
    name: String,
    registry: RwLock<Registry>,
}

// ============================================================================
// Namespace
// ============================================================================

impl Namespace {
    /// Creates an empty namespace whose id counter starts at `next_id`.
    pub(crate) fn new(name: impl Into<String>, next_id: AckId) -> Self {
        Self {
            name: name.into(),
            registry: RwLock::new(Registry {
                next_id,
                ..Registry::default()
            }),
        }
    }

    #[inline]
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Returns the id the next acknowledgement would start from.
    pub(crate) fn next_id(&self) -> AckId {
        self.registry.read().next_id
    }

    /// Registers `entry` under `event`, replacing any previous handler.
    pub(crate) fn register(&self, event: String, entry: HandlerEntry) {
        let replaced = self
            .registry
            .write()
            .events
            .insert(event.clone(), Arc::new(entry))
            .is_some();
        trace!(namespace = %self.name, %event, replaced, "handler registered");
    }

    /// Allocates a correlation id for `entry` and registers it.
    ///
    /// Ids still awaiting an acknowledgement are skipped.
    pub(crate) fn register_ack(&self, entry: HandlerEntry) -> AckId {
        let mut registry = self.registry.write();
        let mut id = registry.next_id;
        while registry.pending_acks.contains_key(&id) {
            id = id.next();
        }
        registry.next_id = id.next();
        registry.pending_acks.insert(id, Arc::new(entry));
        id
    }

    /// Drops a pending acknowledgement whose event was never sent.
    pub(crate) fn cancel_ack(&self, id: AckId) {
        self.registry.write().pending_acks.remove(&id);
    }

    /// Returns the outstanding correlation ids, ascending.
    pub(crate) fn pending_acks(&self) -> Vec<AckId> {
        let mut ids: Vec<AckId> = self.registry.read().pending_acks.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    fn handler(&self, event: &str) -> Option<Arc<HandlerEntry>> {
        self.registry.read().events.get(event).cloned()
    }

    /// Delivers a lifecycle pseudo-event carrying no arguments.
    pub(crate) fn notify(&self, event: &str) -> Option<HandlerReply> {
        let entry = self.handler(event)?;
        match entry.invoke(&[]) {
            Ok(reply) => Some(reply),
            Err(e) => {
                debug!(namespace = %self.name, event, error = %e, "lifecycle handler failed");
                None
            }
        }
    }

    /// Routes one inbound packet.
    ///
    /// Returns the handler's reply for events, `None` when nothing was
    /// invoked or the packet was an acknowledgement. Unregistered events and
    /// unmatched acknowledgement ids are ignored.
    ///
    /// # Errors
    ///
    /// Returns decode errors (event name, argument types) and handler
    /// encode errors.
    pub(crate) fn dispatch<S: AsRef<[u8]>>(
        &self,
        decoder: &mut PacketDecoder<S>,
    ) -> Result<Option<HandlerReply>> {
        let kind = decoder.kind();
        if kind.is_ack() {
            self.on_ack(decoder)?;
            return Ok(None);
        }

        let (event, offset) = match kind.lifecycle_event() {
            Some(name) => (name.to_string(), 0),
            None => (decoder.event_name()?, 1),
        };

        let Some(entry) = self.handler(&event) else {
            trace!(namespace = %self.name, %event, "no handler, packet dropped");
            return Ok(None);
        };

        trace!(
            namespace = %self.name,
            %event,
            arity = entry.arity(),
            argument_types = ?entry.argument_types(),
            "dispatching event"
        );
        let args = decoder.args()?;
        let reply = entry.invoke(args.get(offset..).unwrap_or_default())?;
        Ok(Some(reply))
    }

    fn on_ack<S: AsRef<[u8]>>(&self, decoder: &mut PacketDecoder<S>) -> Result<()> {
        let Some(id) = decoder.id() else {
            trace!(namespace = %self.name, "acknowledgement without id dropped");
            return Ok(());
        };

        let Some(entry) = self.registry.write().pending_acks.remove(&id) else {
            trace!(namespace = %self.name, %id, "unmatched acknowledgement dropped");
            return Ok(());
        };

        let reply = entry.invoke(decoder.args()?)?;
        if let Some(error) = reply.error {
            debug!(namespace = %self.name, %id, %error, "acknowledgement callback failed");
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
