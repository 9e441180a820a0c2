//! Bounded message buffer for simulated nodes
//!
//! [`BufferStore`] keeps buffered messages in arrival order and evicts the
//! oldest ones when a new message needs room. Messages that are being sent
//! are pinned and never evicted until the transfer finishes or aborts.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use tracing::{debug, warn};

use commune_core::{Message, MessageId, MessageStore, SimulationIdentity};

type Id = SimulationIdentity;

/// Capacity-bounded buffer with a staging area for incoming transfers
#[derive(Debug, Clone)]
pub struct BufferStore {
    capacity: u64,
    used: u64,
    messages: HashMap<MessageId, Message<Id>>,
    /// Buffered ids, oldest first
    order: VecDeque<MessageId>,
    pinned: HashSet<MessageId>,
    /// Copies in transit, keyed by message and sender
    incoming: HashMap<(MessageId, Id), Message<Id>>,
    delivered: BTreeMap<MessageId, Message<Id>>,
}

impl BufferStore {
    /// Create an empty buffer holding at most `capacity` bytes
    pub fn new(capacity: u64) -> Self {
        Self {
            capacity,
            used: 0,
            messages: HashMap::new(),
            order: VecDeque::new(),
            pinned: HashSet::new(),
            incoming: HashMap::new(),
            delivered: BTreeMap::new(),
        }
    }

    /// Bytes currently buffered
    pub fn used(&self) -> u64 {
        self.used
    }

    /// Stage a copy that a peer started sending
    pub fn stage(&mut self, message: Message<Id>, from: Id) {
        self.incoming.insert((message.id, from), message);
    }

    /// Drop a staged copy after its transfer aborted
    pub fn discard_incoming(&mut self, id: &MessageId, from: &Id) -> bool {
        self.incoming.remove(&(*id, *from)).is_some()
    }

    /// Number of staged copies
    pub fn incoming_len(&self) -> usize {
        self.incoming.len()
    }

    /// Protect a message from eviction while it is being sent
    pub fn pin(&mut self, id: MessageId) {
        self.pinned.insert(id);
    }

    /// Release a message pinned by [`pin`](Self::pin)
    pub fn unpin(&mut self, id: &MessageId) {
        self.pinned.remove(id);
    }

    /// Messages delivered to this node, by id
    pub fn delivered(&self) -> &BTreeMap<MessageId, Message<Id>> {
        &self.delivered
    }

    fn make_room(&mut self, size: u64) -> Vec<Message<Id>> {
        let mut evicted = Vec::new();
        let mut index = 0;
        while self.used + size > self.capacity && index < self.order.len() {
            let id = self.order[index];
            if self.pinned.contains(&id) {
                index += 1;
                continue;
            }
            if let Some(message) = self.remove(&id) {
                debug!(message = %message.id, size = message.size, "Evicted oldest message");
                evicted.push(message);
            }
        }
        if self.used + size > self.capacity {
            warn!(
                used = self.used,
                size,
                capacity = self.capacity,
                "Buffer over capacity, every remaining message is pinned"
            );
        }
        evicted
    }
}

impl MessageStore<Id> for BufferStore {
    fn insert(&mut self, message: Message<Id>) -> Vec<Message<Id>> {
        self.remove(&message.id);
        let evicted = self.make_room(message.size);
        self.used += message.size;
        self.order.push_back(message.id);
        self.messages.insert(message.id, message);
        evicted
    }

    fn remove(&mut self, id: &MessageId) -> Option<Message<Id>> {
        let message = self.messages.remove(id)?;
        self.used -= message.size;
        self.order.retain(|queued| queued != id);
        self.pinned.remove(id);
        Some(message)
    }

    fn get(&self, id: &MessageId) -> Option<&Message<Id>> {
        self.messages.get(id)
    }

    fn message_ids(&self) -> Vec<MessageId> {
        self.order.iter().copied().collect()
    }

    fn len(&self) -> usize {
        self.messages.len()
    }

    fn capacity(&self) -> u64 {
        self.capacity
    }

    fn free_space(&self) -> u64 {
        self.capacity.saturating_sub(self.used)
    }

    fn take_incoming(&mut self, id: &MessageId, from: &Id) -> Option<Message<Id>> {
        self.incoming.remove(&(*id, *from))
    }

    fn is_delivered(&self, id: &MessageId) -> bool {
        self.delivered.contains_key(id)
    }

    fn mark_delivered(&mut self, message: Message<Id>) {
        self.delivered.entry(message.id).or_insert(message);
    }
}
