//! Error types shared across the Commune stack

use thiserror::Error;

use crate::message::MessageId;

/// Errors related to message storage
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Message {id} ({size} bytes) exceeds buffer capacity of {capacity} bytes")]
    CapacityExceeded { id: MessageId, size: u64, capacity: u64 },
}
