//! Socket.IO-style realtime client.
//!
//! This library implements the client side of a two-layer realtime
//! protocol: an engine layer that negotiates a session over long-polling and
//! transparently upgrades it to a persistent stream, and an event layer that
//! multiplexes named events, namespaces and acknowledgements over it.
//!
//! # Architecture
//!
//! ```text
//! Client (namespace "/")   Client (namespace "/chat")
//!          │                         │
//!          └──────── dispatch loop ──┘        protocol: packets, args
//!                         │
//!                    Connection               engine: handshake, upgrade,
//!                    │        │                       keepalive, hand-off
//!               current    upgrading
//!                    │        │
//!             Arc<dyn Transport>              transport: capability only
//! ```
//!
//! Key design principles:
//!
//! - Transports are an injected capability: the crate never opens sockets
//! - One state-owning component performs every upgrade transition atomically
//! - Inbound delivery is a capacity-one hand-off: a slow consumer stalls, never drops
//! - Handlers are typed closures; arguments decode straight into their declared types
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use socketio_client::{Client, Result, TransportKind};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client = Client::builder()
//!         .url("http://localhost:8000")
//!         .factory(TransportKind::Polling, Arc::new(my_polling_factory()))
//!         .factory(TransportKind::Stream, Arc::new(my_stream_factory()))
//!         .connect()
//!         .await?;
//!
//!     client.on("reply", |text: String| println!("server said {text}"))?;
//!     client.emit("msg", "hello").await?;
//!
//!     client.close().await
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`client`] | [`Client`], [`ClientBuilder`], handlers |
//! | [`engine`] | [`Connection`]: handshake, upgrade, keepalive |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | Packet codec and argument marshalling |
//! | [`transport`] | Transport capability and in-memory transport |

// ============================================================================
// Modules
// ============================================================================

/// Event client.
///
/// Use [`Client::builder()`] to configure and connect.
pub mod client;

/// Engine layer: one upgradable session.
pub mod engine;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers.
pub mod identifiers;

/// Packet codec and argument marshalling.
pub mod protocol;

/// Transport capability layer.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Client types
pub use client::{Client, ClientBuilder, Handler, HandlerEntry};

// Engine types
pub use engine::{ConnReader, ConnWriter, ConnectOptions, Connection, ConnectionState};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{AckId, SessionId};

// Protocol types
pub use protocol::{FromArgs, HandlerReply, IntoArgs, IntoReply, Packet, PacketKind};

// Transport types
pub use transport::{
    Frame, FrameKind, MessageType, Transport, TransportFactories, TransportFactory, TransportKind,
    TransportRequest,
};
