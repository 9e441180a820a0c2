//! # Commune Core
//!
//! Core traits, types, and errors shared by the Commune forwarding stack.
//!
//! The routing crate never talks to a concrete simulator or message buffer.
//! Everything it consumes from the outside world is described here, so the
//! same controller logic runs against the in-memory harness in tests and
//! against any other event engine that implements these traits.
//!
//! ## Key Traits
//!
//! - [`PeerIdentity`]: Abstraction over node identification (char for sim)
//! - [`Clock`]: Logical simulation time
//! - [`MessageStore`]: Buffered messages, staging buffer, delivered set
//! - [`RouterEnv`]: Everything a router may ask of the node hosting it
//! - [`MessageFilter`]: Application-layer transform applied on receipt
//!
//! ## Key Types
//!
//! - [`Message`]: A buffered multicast message
//! - [`ConnectionInfo`]: An open connection as seen from one endpoint
//! - [`TransferOutcome`]: Result of asking a link to start a transfer
//! - [`RoutingEvent`]: Notifications broadcast to listeners

pub mod connection;
pub mod error;
pub mod event;
pub mod identity;
pub mod message;
pub mod traits;

// Re-export main types
pub use connection::*;
pub use error::*;
pub use event::*;
pub use identity::*;
pub use message::*;
pub use traits::*;
