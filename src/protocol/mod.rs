//! Packet layer: namespaced events and acknowledgements.
//!
//! Each engine message frame carries one [`Packet`]. Outbound packets are
//! encoded straight into a connection writer; inbound frames are wrapped in a
//! [`PacketDecoder`] that parses the header eagerly and decodes arguments
//! only into the types a handler declares.
//!
//! # Packet Kinds
//!
//! | Tag | Kind | Delivered as |
//! |-----|------|--------------|
//! | `0` | `Connect` | `"connection"` |
//! | `1` | `Disconnect` | `"disconnection"` |
//! | `2` | `Event` | its first payload element |
//! | `3` | `Ack` | pending acknowledgement callback |
//! | `4` | `Error` | `"error"` |
//! | `5` | `BinaryEvent` | as `Event` (attachments unsupported) |
//! | `6` | `BinaryAck` | as `Ack` (attachments unsupported) |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `packet` | Packet framing, header and decoder |
//! | `args` | Argument and reply marshalling |

// ============================================================================
// Submodules
// ============================================================================

/// Argument and reply marshalling.
pub mod args;

/// Packet framing.
pub mod packet;

// ============================================================================
// Re-exports
// ============================================================================

pub use args::{FromArgs, HandlerReply, IntoArgs, IntoReply};
pub use packet::{DEFAULT_NAMESPACE, Packet, PacketDecoder, PacketHeader, PacketKind};
