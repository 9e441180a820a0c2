//! Routing events broadcast to listeners

use serde::{Deserialize, Serialize};

use crate::connection::ConnectionId;
use crate::identity::PeerIdentity;
use crate::message::{MessageId, SimTime};

/// Events emitted by a router while handling lifecycle callbacks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "I: PeerIdentity")]
pub enum RoutingEvent<I: PeerIdentity> {
    /// A node admitted a newly created message into its buffer
    MessageCreated {
        node: I,
        message: MessageId,
        at: SimTime,
    },

    /// The one-time pairwise exchange ran for a connection
    ExchangeCompleted {
        node: I,
        peer: I,
        connection: ConnectionId,
        /// Members admitted into either side's local community
        admitted: usize,
        at: SimTime,
    },

    /// A transfer started on a connection
    TransferStarted {
        from: I,
        to: I,
        message: MessageId,
        connection: ConnectionId,
        at: SimTime,
    },

    /// A message arrived at a node
    ///
    /// Emitted even when the filter chain dropped the message.
    MessageTransferred {
        message: MessageId,
        from: I,
        to: I,
        first_delivery: bool,
        dropped: bool,
        at: SimTime,
    },

    /// A node removed a message from its buffer
    MessageDeleted {
        node: I,
        message: MessageId,
        reason: DeletionReason,
        at: SimTime,
    },
}

impl<I: PeerIdentity> RoutingEvent<I> {
    /// Get the simulation time of this event
    pub fn at(&self) -> SimTime {
        match self {
            Self::MessageCreated { at, .. } => *at,
            Self::ExchangeCompleted { at, .. } => *at,
            Self::TransferStarted { at, .. } => *at,
            Self::MessageTransferred { at, .. } => *at,
            Self::MessageDeleted { at, .. } => *at,
        }
    }

    /// True for a first delivery to a final destination
    pub fn is_first_delivery(&self) -> bool {
        matches!(
            self,
            Self::MessageTransferred {
                first_delivery: true,
                ..
            }
        )
    }
}

/// Why a node deleted a buffered message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeletionReason {
    /// Receiver reported the message delivered and tombstones are enabled
    Tombstoned,
    /// Receiver reported the message old or delivered and policy agreed
    DeliveredElsewhere,
    /// Policy asked to drop the message after relaying it
    Relayed,
    /// The buffer evicted it to make room for a newer message
    Evicted,
}

impl std::fmt::Display for DeletionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tombstoned => write!(f, "Tombstoned"),
            Self::DeliveredElsewhere => write!(f, "Delivered elsewhere"),
            Self::Relayed => write!(f, "Relayed"),
            Self::Evicted => write!(f, "Evicted"),
        }
    }
}
