//! Messages and contact bookkeeping types

use std::collections::BTreeSet;

use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::identity::PeerIdentity;

/// Logical simulation time in seconds
pub type SimTime = f64;

/// Unique identifier for a message
#[derive(
    Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[display("M{_0}")]
pub struct MessageId(pub u64);

/// A buffered multicast message
///
/// Only the fields the forwarding policy reads are modeled; payload bytes
/// are represented by `size` alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "I: PeerIdentity")]
pub struct Message<I: PeerIdentity> {
    /// Unique message identifier
    pub id: MessageId,
    /// Node that created the message
    pub source: I,
    /// Multicast destination set
    pub destinations: BTreeSet<I>,
    /// Size in bytes
    pub size: u64,
    /// When the message was created
    pub created_at: SimTime,
    /// When the local copy was received (None at the source)
    pub received_at: Option<SimTime>,
    /// Number of transfers this copy has gone through
    pub hop_count: u32,
}

impl<I: PeerIdentity> Message<I> {
    /// Create a new message at its source
    pub fn new(
        id: MessageId,
        source: I,
        destinations: impl IntoIterator<Item = I>,
        size: u64,
        created_at: SimTime,
    ) -> Self {
        Self {
            id,
            source,
            destinations: destinations.into_iter().collect(),
            size,
            created_at,
            received_at: None,
            hop_count: 0,
        }
    }

    /// Check whether a node is one of the destinations
    pub fn is_destined_for(&self, node: &I) -> bool {
        self.destinations.contains(node)
    }

    /// Copy of this message as it arrives one hop further
    pub fn relayed(&self) -> Self {
        let mut copy = self.clone();
        copy.hop_count += 1;
        copy.received_at = None;
        copy
    }
}

/// One continuous connection between two nodes, `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContactInterval {
    pub start: SimTime,
    pub end: SimTime,
}

impl ContactInterval {
    /// Create a new interval
    pub fn new(start: SimTime, end: SimTime) -> Self {
        Self { start, end }
    }

    /// Length of the contact
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Cumulative duration of a contact history
pub fn total_contact_time(history: &[ContactInterval]) -> f64 {
    history.iter().map(ContactInterval::duration).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::SimulationIdentity;

    fn make_id(c: char) -> SimulationIdentity {
        SimulationIdentity::new(c).unwrap()
    }

    #[test]
    fn test_message_id_display() {
        assert_eq!(MessageId(14).to_string(), "M14");
    }

    #[test]
    fn test_destinations() {
        let msg = Message::new(MessageId(1), make_id('A'), [make_id('C'), make_id('D')], 100, 0.0);
        assert!(msg.is_destined_for(&make_id('C')));
        assert!(!msg.is_destined_for(&make_id('A')));
        assert_eq!(msg.destinations.len(), 2);
    }

    #[test]
    fn test_relayed_copy() {
        let mut msg = Message::new(MessageId(1), make_id('A'), [make_id('B')], 10, 5.0);
        msg.received_at = Some(6.0);
        let copy = msg.relayed();
        assert_eq!(copy.hop_count, 1);
        assert_eq!(copy.received_at, None);
        assert_eq!(copy.created_at, 5.0);
    }

    #[test]
    fn test_total_contact_time() {
        let history = [ContactInterval::new(0.0, 30.0), ContactInterval::new(100.0, 125.0)];
        assert_eq!(total_contact_time(&history), 55.0);
        assert_eq!(total_contact_time(&[]), 0.0);
    }

    #[test]
    fn test_message_serde() {
        let msg = Message::new(MessageId(9), make_id('A'), [make_id('B')], 42, 1.5);
        let json = serde_json::to_string(&msg).unwrap();
        let back: Message<SimulationIdentity> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }
}
