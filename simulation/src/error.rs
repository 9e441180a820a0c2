//! Simulation error types

use thiserror::Error;

use commune_core::{ConnectionId, SimulationIdentity, StoreError};
use commune_routing::RouterError;

/// Errors raised while driving a simulated world
#[derive(Debug, Error)]
pub enum SimError {
    #[error("Unknown node: {0}")]
    UnknownNode(SimulationIdentity),

    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    #[error("Nodes {0} and {1} are already connected")]
    AlreadyConnected(SimulationIdentity, SimulationIdentity),

    #[error("Node {0} cannot contact itself")]
    SelfContact(SimulationIdentity),

    #[error("Router error: {0}")]
    Router(#[from] RouterError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Result type alias for simulation operations
pub type SimResult<T> = Result<T, SimError>;

#[cfg(test)]
mod tests {
    use super::*;
    use commune_core::MessageId;

    #[test]
    fn test_error_display() {
        let err = SimError::UnknownNode(SimulationIdentity('Q'));
        assert_eq!(err.to_string(), "Unknown node: Q");

        let err = SimError::UnknownConnection(ConnectionId(4));
        assert!(err.to_string().contains("con#4"));
    }

    #[test]
    fn test_from_router_error() {
        let err: SimError = RouterError::UnknownOutgoing(MessageId(9)).into();
        assert!(matches!(err, SimError::Router(_)));
        assert!(err.to_string().starts_with("Router error"));
    }
}
