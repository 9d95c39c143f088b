//! Client handle and dispatch loop.
//!
//! A [`Client`] is bound to one namespace. All clients created from the same
//! connection (through [`Client::io`]) share it and a single dispatch loop,
//! which routes every inbound packet to the namespace it names.
//!
//! # Acknowledgements
//!
//! Every inbound event carrying a correlation id is answered with exactly
//! one `Ack` packet holding the handler's return values (empty when no
//! handler ran). The reply is written from the dispatch loop after the
//! inbound frame has been released, so it always follows the event it
//! answers.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::{debug, trace, warn};

use crate::engine::{ConnReader, Connection, ConnectionState};
use crate::error::{Error, Result};
use crate::identifiers::{AckId, SessionId};
use crate::protocol::{
    DEFAULT_NAMESPACE, FromArgs, HandlerReply, IntoArgs, Packet, PacketDecoder, PacketKind,
};
use crate::transport::MessageType;

use super::builder::ClientBuilder;
use super::handler::{Handler, HandlerEntry};
use super::namespace::Namespace;

// ============================================================================
// Shared
// ============================================================================

/// State shared by every client of one connection.
struct Shared {
    connection: Arc<Connection>,
    namespaces: RwLock<FxHashMap<String, Arc<Namespace>>>,
}

impl Shared {
    fn route(&self, namespace: &str) -> Option<Arc<Namespace>> {
        self.namespaces.read().get(namespace).cloned()
    }

    fn all_namespaces(&self) -> Vec<Arc<Namespace>> {
        self.namespaces.read().values().cloned().collect()
    }

    /// Encodes `packet` straight into a connection writer.
    async fn send(&self, packet: &Packet) -> Result<()> {
        let mut writer = self.connection.next_writer(MessageType::Text).await?;
        packet.encode_into(&mut writer)?;
        writer.close().await
    }
}

// ============================================================================
// Client
// ============================================================================

/// Event client bound to one namespace.
///
/// Cheap to clone; clones share the namespace registries.
#[derive(Clone)]
pub struct Client {
    namespace: Arc<Namespace>,
    shared: Arc<Shared>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("namespace", &self.namespace.name())
            .field("session_id", self.shared.connection.session_id())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Client - Construction
// ============================================================================

impl Client {
    /// Creates a configuration builder.
    #[inline]
    #[must_use]
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Creates the root client over an open connection and starts the
    /// dispatch loop.
    #[must_use]
    pub fn start(connection: Arc<Connection>) -> Self {
        let root = Arc::new(Namespace::new(DEFAULT_NAMESPACE, AckId::default()));

        let mut namespaces = FxHashMap::default();
        namespaces.insert(DEFAULT_NAMESPACE.to_string(), Arc::clone(&root));
        let shared = Arc::new(Shared {
            connection,
            namespaces: RwLock::new(namespaces),
        });

        tokio::spawn(run_dispatch(Arc::clone(&shared)));

        Self {
            namespace: root,
            shared,
        }
    }

    /// Returns a client for `namespace` sharing this connection.
    ///
    /// A new namespace starts with empty registries and this client's
    /// current correlation counter. Asking again for a namespace that
    /// already has a client returns one bound to the same registries.
    #[must_use]
    pub fn io(&self, namespace: &str) -> Self {
        let name = normalize_namespace(namespace);

        let mut namespaces = self.shared.namespaces.write();
        let entry = namespaces.entry(name).or_insert_with_key(|name| {
            debug!(namespace = %name, "namespace created");
            Arc::new(Namespace::new(name.clone(), self.namespace.next_id()))
        });

        Self {
            namespace: Arc::clone(entry),
            shared: Arc::clone(&self.shared),
        }
    }
}

// ============================================================================
// Client - Events
// ============================================================================

impl Client {
    /// Registers `handler` for `event`, replacing any previous handler.
    ///
    /// Lifecycle notifications arrive as `"connection"`, `"disconnection"`
    /// and `"error"`.
    ///
    /// Arguments are the payload values after the event name, in order.
    /// Extra values are ignored. Missing trailing values decode from `null`,
    /// so an argument the sender may leave out must be declared `Option<T>`:
    /// a missing non-optional argument fails to decode, the handler is not
    /// called, and an id-bearing event is acknowledged with no values.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHandler`] if the event name is empty.
    pub fn on<H, Args>(&self, event: impl Into<String>, handler: H) -> Result<()>
    where
        H: Handler<Args>,
        Args: FromArgs,
    {
        let event = event.into();
        if event.is_empty() {
            return Err(Error::invalid_handler(event, "event name must not be empty"));
        }

        self.namespace.register(event, HandlerEntry::new(handler));
        Ok(())
    }

    /// Emits `event` without requesting an acknowledgement.
    ///
    /// # Errors
    ///
    /// Returns encode errors or the connection's write error.
    pub async fn emit(&self, event: &str, args: impl IntoArgs) -> Result<()> {
        let packet = Packet::event(self.namespace.name(), event, args.into_args()?, None);
        self.shared.send(&packet).await
    }

    /// Emits `event` and registers `ack` for the reply.
    ///
    /// `ack` runs once with the acknowledgement's payload decoded into its
    /// declared arguments. If the write fails, `ack` is unregistered.
    ///
    /// # Errors
    ///
    /// Returns encode errors or the connection's write error.
    pub async fn emit_with_ack<H, Args>(
        &self,
        event: &str,
        args: impl IntoArgs,
        ack: H,
    ) -> Result<AckId>
    where
        H: Handler<Args>,
        Args: FromArgs,
    {
        let args = args.into_args()?;
        let id = self.namespace.register_ack(HandlerEntry::new(ack));

        let packet = Packet::event(self.namespace.name(), event, args, Some(id));
        if let Err(e) = self.shared.send(&packet).await {
            self.namespace.cancel_ack(id);
            return Err(e);
        }

        trace!(namespace = %self.namespace.name(), event, %id, "awaiting acknowledgement");
        Ok(id)
    }

    /// Sends a `Connect` packet for this client's namespace.
    ///
    /// # Errors
    ///
    /// Returns the connection's write error.
    pub async fn connect_namespace(&self) -> Result<()> {
        let packet = Packet::new(PacketKind::Connect, self.namespace.name());
        self.shared.send(&packet).await
    }

    /// Closes the shared connection.
    ///
    /// # Errors
    ///
    /// Returns the error of closing the current transport.
    pub async fn close(&self) -> Result<()> {
        self.shared.connection.close().await
    }
}

// ============================================================================
// Client - Accessors
// ============================================================================

impl Client {
    /// Returns this client's namespace.
    #[inline]
    #[must_use]
    pub fn namespace(&self) -> &str {
        self.namespace.name()
    }

    /// Returns the session id.
    #[inline]
    #[must_use]
    pub fn session_id(&self) -> &SessionId {
        self.shared.connection.session_id()
    }

    /// Returns the correlation ids still awaiting an acknowledgement.
    #[must_use]
    pub fn pending_acks(&self) -> Vec<AckId> {
        self.namespace.pending_acks()
    }

    /// Returns the connection state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.connection.state()
    }

    /// Returns the underlying connection.
    #[inline]
    #[must_use]
    pub fn connection(&self) -> &Arc<Connection> {
        &self.shared.connection
    }
}

/// Ensures a leading `/`; the empty name is the default namespace.
fn normalize_namespace(namespace: &str) -> String {
    if namespace.starts_with('/') {
        namespace.to_string()
    } else {
        format!("/{namespace}")
    }
}

// ============================================================================
// Dispatch Loop
// ============================================================================

async fn run_dispatch(shared: Arc<Shared>) {
    loop {
        let reader = match shared.connection.next_reader().await {
            Ok(reader) => reader,
            Err(e) => {
                debug!(error = %e, "dispatch loop terminated");
                break;
            }
        };

        if let Some(reply) = dispatch_one(&shared, reader)
            && let Err(e) = shared.send(&reply).await
        {
            warn!(error = %e, "failed to send acknowledgement");
            if e.is_end_of_stream() {
                break;
            }
        }
    }

    for namespace in shared.all_namespaces() {
        namespace.notify("disconnection");
    }
}

/// Handles one inbound frame; returns the acknowledgement to send, if any.
///
/// The frame is released before returning.
fn dispatch_one(shared: &Shared, reader: ConnReader) -> Option<Packet> {
    let mut decoder = match PacketDecoder::new(reader) {
        Ok(decoder) => decoder,
        Err(e) => {
            warn!(error = %e, "dropping malformed packet");
            return None;
        }
    };
    let header = decoder.header().clone();
    trace!(kind = %header.kind, namespace = %header.namespace, id = ?header.id, "packet received");

    let reply = match shared.route(&header.namespace) {
        Some(namespace) => namespace
            .dispatch(&mut decoder)
            .unwrap_or_else(|e| Some(HandlerReply::failed(e))),
        None => {
            trace!(namespace = %header.namespace, "no client for namespace");
            None
        }
    };
    decoder.close();

    let reply = reply.unwrap_or_default();
    if let Some(error) = &reply.error {
        warn!(namespace = %header.namespace, %error, "event handling failed");
    }

    match header.id {
        Some(id) if header.kind.is_event() => {
            let HandlerReply { values, .. } = reply;
            Some(Packet::ack(header.namespace, id, values))
        }
        _ => None,
    }
}

// ============================================================================
// Tests
// ============================================================================
