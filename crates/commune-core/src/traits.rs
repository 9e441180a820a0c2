//! Collaborator traits consumed by the forwarding controller
//!
//! These traits describe the boundary between a router and the node that
//! hosts it: time, buffered messages, open links, application filters and
//! listeners.
//!
//! ## Key Traits
//!
//! - [`Clock`]: Logical time
//! - [`MessageStore`]: Message buffer with a staging area for arrivals
//! - [`MessageFilter`]: One application-layer transform
//! - [`RouterEnv`]: The full host environment handed to every callback

use std::collections::{BTreeMap, BTreeSet};

use crate::connection::{ConnectionId, ConnectionInfo, TransferOutcome};
use crate::event::RoutingEvent;
use crate::identity::PeerIdentity;
use crate::message::{Message, MessageId, SimTime};

/// Time abstraction for deterministic simulation
pub trait Clock {
    /// Current logical time
    fn now(&self) -> SimTime;
}

/// Manually advanced clock
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ManualClock {
    now: SimTime,
}

impl ManualClock {
    /// Create a clock starting at `start`
    pub fn starting_at(start: SimTime) -> Self {
        Self { now: start }
    }

    /// Move time forward
    pub fn advance(&mut self, by: SimTime) {
        self.now += by.max(0.0);
    }

    /// Jump to an absolute time; never goes backwards
    pub fn set(&mut self, to: SimTime) {
        if to > self.now {
            self.now = to;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> SimTime {
        self.now
    }
}

/// Message buffer of one node
///
/// Besides the routable messages, a store keeps a staging buffer of
/// in-flight arrivals and the set of messages delivered to this node.
pub trait MessageStore<I: PeerIdentity> {
    /// Add a message to the routable buffer
    ///
    /// Returns the messages evicted to make room, oldest first.
    fn insert(&mut self, message: Message<I>) -> Vec<Message<I>>;

    /// Remove a message from the routable buffer
    fn remove(&mut self, id: &MessageId) -> Option<Message<I>>;

    /// Look up a buffered message
    fn get(&self, id: &MessageId) -> Option<&Message<I>>;

    /// Check if a message is buffered
    fn contains(&self, id: &MessageId) -> bool {
        self.get(id).is_some()
    }

    /// Ids of all buffered messages, oldest first
    fn message_ids(&self) -> Vec<MessageId>;

    /// Number of buffered messages
    fn len(&self) -> usize;

    /// Check if the buffer is empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total buffer size in bytes
    fn capacity(&self) -> u64;

    /// Free buffer space in bytes
    fn free_space(&self) -> u64;

    /// Take a fully received message out of the staging buffer
    fn take_incoming(&mut self, id: &MessageId, from: &I) -> Option<Message<I>>;

    /// Check if a message was already delivered to this node
    fn is_delivered(&self, id: &MessageId) -> bool;

    /// Record a first delivery to this node
    fn mark_delivered(&mut self, message: Message<I>);
}

/// Application-layer transform applied to received messages
///
/// Returning `None` drops the message.
pub trait MessageFilter<I: PeerIdentity> {
    fn handle(&mut self, message: Message<I>, host: &I) -> Option<Message<I>>;
}

impl<I, F> MessageFilter<I> for F
where
    I: PeerIdentity,
    F: FnMut(Message<I>, &I) -> Option<Message<I>>,
{
    fn handle(&mut self, message: Message<I>, host: &I) -> Option<Message<I>> {
        self(message, host)
    }
}

/// Ordered chain of application filters
///
/// Each filter receives the output of the previous one; the first drop
/// ends the chain.
pub struct FilterChain<I: PeerIdentity> {
    filters: Vec<Box<dyn MessageFilter<I>>>,
}

impl<I: PeerIdentity> FilterChain<I> {
    /// Create an empty chain (passes everything through)
    pub fn new() -> Self {
        Self {
            filters: Vec::new(),
        }
    }

    /// Append a filter to the end of the chain
    pub fn push(&mut self, filter: impl MessageFilter<I> + 'static) {
        self.filters.push(Box::new(filter));
    }

    /// Run a message through every filter in order
    pub fn run(&mut self, message: Message<I>, host: &I) -> Option<Message<I>> {
        let mut current = message;
        for filter in &mut self.filters {
            current = filter.handle(current, host)?;
        }
        Some(current)
    }

    /// Number of filters
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    /// Check if the chain has no filters
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

impl<I: PeerIdentity> Default for FilterChain<I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I: PeerIdentity> std::fmt::Debug for FilterChain<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterChain")
            .field("filters", &self.filters.len())
            .finish()
    }
}

/// Immutable snapshot of a neighbor, answered by the host on request
///
/// This is the only way a router learns about another node's state during
/// relay selection.
#[derive(Debug, Clone, PartialEq)]
pub struct NeighborView<I: PeerIdentity> {
    /// The neighbor
    pub peer: I,
    /// The neighbor's path-weight cache
    pub path_weights: BTreeMap<I, f64>,
    /// The neighbor's free buffer space in bytes
    pub free_buffer: u64,
    /// Messages the neighbor already holds
    pub held: BTreeSet<MessageId>,
}

impl<I: PeerIdentity> NeighborView<I> {
    /// Cached path weight the neighbor has for a node, if known
    pub fn path_weight(&self, node: &I) -> Option<f64> {
        self.path_weights.get(node).copied()
    }

    /// Check if the neighbor already holds a message
    pub fn holds(&self, id: &MessageId) -> bool {
        self.held.contains(id)
    }
}

/// Host environment handed to every router callback
pub trait RouterEnv<I: PeerIdentity>: Clock {
    type Store: MessageStore<I>;

    /// The local message buffer
    fn store(&self) -> &Self::Store;

    /// The local message buffer, mutably
    fn store_mut(&mut self) -> &mut Self::Store;

    /// Currently open connections of this node
    fn connections(&self) -> Vec<ConnectionInfo<I>>;

    /// Whether a link can accept a new transfer now
    fn is_ready_for_transfer(&self, connection: ConnectionId) -> bool;

    /// Offer a message to the other endpoint of a link
    fn start_transfer(&mut self, connection: ConnectionId, message: &Message<I>)
    -> TransferOutcome;

    /// Record that this node is sending on a connection
    fn mark_sending(&mut self, connection: ConnectionId);

    /// Whether this node has a transfer in progress
    fn is_transferring(&self) -> bool;

    /// Message this node is currently sending on a connection
    fn in_flight(&self, connection: ConnectionId) -> Option<MessageId>;

    /// Snapshot of a connected neighbor
    fn neighbor_view(&self, peer: &I) -> Option<NeighborView<I>>;

    /// Application filters for received messages
    fn filters(&mut self) -> &mut FilterChain<I>;

    /// Broadcast an event to listeners
    fn emit(&mut self, event: RoutingEvent<I>);

    /// Peer on the other end of a connection, if it is open
    fn peer_of(&self, connection: ConnectionId) -> Option<I> {
        self.connections()
            .into_iter()
            .find(|c| c.id == connection)
            .map(|c| c.peer)
    }
}
