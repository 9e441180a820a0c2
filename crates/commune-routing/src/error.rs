//! Forwarding controller error types
//!
//! Every variant is an internal-consistency violation between the router and
//! the node hosting it. Policy outcomes such as a refused transfer are plain
//! [`TransferOutcome`](commune_core::TransferOutcome) values, never errors.

use thiserror::Error;

use commune_core::{ConnectionId, MessageId};

/// Errors raised by router callbacks
#[derive(Debug, Error, PartialEq)]
pub enum RouterError {
    /// A completed transfer has no staged copy at the receiver
    #[error("No incoming message {id} from {from}")]
    UnknownIncoming { id: MessageId, from: String },

    /// A transfer finished on a connection that was not sending
    #[error("No message in flight on {0}")]
    NoInFlightMessage(ConnectionId),

    /// A transfer finished for a message the sender no longer buffers
    #[error("Sent message {0} is not in the local buffer")]
    UnknownOutgoing(MessageId),
}

/// Result type for router callbacks
pub type RouterResult<T> = Result<T, RouterError>;
