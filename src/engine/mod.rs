//! Engine layer: one upgradable session.
//!
//! Performs the polling handshake, optionally upgrades to a stream
//! transport, keeps the session alive with ping/pong and exposes a reliable
//! ordered message channel.
//!
//! # Example
//!
//! ```ignore
//! let connection = Connection::open(options).await?;
//!
//! let reader = connection.next_reader().await?;
//! println!("{:?}", reader.as_bytes());
//! drop(reader);
//!
//! connection.send_message(MessageType::Text, b"2[\"hello\"]").await?;
//! connection.close().await?;
//! ```

// ============================================================================
// Submodules
// ============================================================================

/// Session handle, background loops and write path.
pub mod connection;

/// Single-slot inbound hand-off.
pub mod handoff;

/// Handshake payload.
pub mod handshake;

/// Connection state and transport slots.
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use connection::{
    ConnWriter, ConnectOptions, Connection, DEFAULT_PING_INTERVAL, DEFAULT_PING_TIMEOUT,
};
pub use handoff::ConnReader;
pub use handshake::HandshakeData;
pub use state::ConnectionState;
