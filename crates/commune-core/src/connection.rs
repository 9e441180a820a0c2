//! Connection identity and transfer outcomes

use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::identity::PeerIdentity;

/// Identifier of one connection-up occurrence
///
/// A reconnect between the same two nodes gets a fresh id, so exchange
/// bookkeeping never leaks from one contact into the next.
#[derive(
    Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[display("con#{_0}")]
pub struct ConnectionId(pub u64);

/// An open connection as seen from one endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound = "I: PeerIdentity")]
pub struct ConnectionInfo<I: PeerIdentity> {
    /// The connection
    pub id: ConnectionId,
    /// The other endpoint
    pub peer: I,
}

impl<I: PeerIdentity> ConnectionInfo<I> {
    pub fn new(id: ConnectionId, peer: I) -> Self {
        Self { id, peer }
    }
}

/// Result of asking a link to start a transfer
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferOutcome {
    /// Transfer started
    Started,
    /// Link not ready, retry on a later tick
    Busy,
    /// Receiver already holds the message
    DeniedOld,
    /// Receiver already had the message delivered to it
    DeniedDelivered,
    /// Receiver has no room for the message
    DeniedNoSpace,
}

impl TransferOutcome {
    /// True if the transfer started
    pub fn is_started(&self) -> bool {
        matches!(self, TransferOutcome::Started)
    }

    /// True if the receiver refused the message outright
    pub fn is_denied(&self) -> bool {
        matches!(
            self,
            TransferOutcome::DeniedOld
                | TransferOutcome::DeniedDelivered
                | TransferOutcome::DeniedNoSpace
        )
    }
}
