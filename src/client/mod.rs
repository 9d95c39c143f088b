//! Event client: handlers, emits, acknowledgements and namespaces.
//!
//! # Example
//!
//! ```ignore
//! use socketio_client::Client;
//!
//! let client = Client::builder()
//!     .url("http://localhost:8000")
//!     .factory(TransportKind::Polling, polling)
//!     .factory(TransportKind::Stream, stream)
//!     .connect()
//!     .await?;
//!
//! client.on("reply", |text: String| tracing::info!(%text, "reply"))?;
//! client.emit("msg", "hello").await?;
//!
//! let chat = client.io("/chat");
//! chat.emit_with_ack("join", ("lobby",), |ok: bool| tracing::info!(ok, "joined")).await?;
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `builder` | `ClientBuilder` configuration |
//! | `core` | `Client` handle and dispatch loop |
//! | `handler` | Typed handler abstraction |
//! | `namespace` | Per-namespace registries |

// ============================================================================
// Submodules
// ============================================================================

/// Client configuration builder.
pub mod builder;

/// Client handle and dispatch loop.
pub mod core;

/// Typed handler abstraction.
pub mod handler;

/// Per-namespace registries.
mod namespace;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::ClientBuilder;
pub use self::core::Client;
pub use handler::{Handler, HandlerEntry};
