//! Forwarding controller
//!
//! The [`Router`] reacts to the lifecycle callbacks of the node hosting it
//! (message creation, link up/down, transfer start/finish, receipt and the
//! periodic tick) and keeps a queue of outgoing intents: `(message,
//! connection)` pairs it will try to send, in order.
//!
//! ## Queue invariants
//!
//! - No intent references a connection that went down
//! - No intent references a message the node no longer holds, including
//!   messages the store evicted to make room
//! - A pair is queued at most once
//!
//! ## Exchange
//!
//! Both endpoints observe a connection-up. The first one runs the pairwise
//! engine exchange for both sides and marks the connection as exchanged on
//! both routers, so the second observer has nothing left to compute.

use std::collections::HashSet;

use derive_more::Display;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, trace};

use commune_core::{
    ConnectionId, ConnectionInfo, DeletionReason, Message, MessageId, MessageStore, PeerIdentity,
    RouterEnv, RoutingEvent, TransferOutcome,
};

use crate::RouterConfig;
use crate::engine::DecisionEngine;
use crate::error::{RouterError, RouterResult};
use crate::relay::{NeighborPlan, admit_neighbors, plan_neighbor};

/// A message the router intends to send over a connection
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[display("{message}@{connection}")]
pub struct OutgoingIntent {
    pub message: MessageId,
    pub connection: ConnectionId,
}

/// Counters kept by a router
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterStats {
    /// Pairwise exchanges this router ran as first observer
    pub exchanges_performed: u64,
    /// Intents added to the queue
    pub intents_enqueued: u64,
    /// Transfers this router started
    pub transfers_started: u64,
    /// Transfers this router finished sending
    pub transfers_completed: u64,
    /// First deliveries to this node
    pub deliveries: u64,
    /// Messages deleted from the local buffer
    pub messages_deleted: u64,
    /// Tombstones recorded
    pub tombstones_recorded: u64,
}

/// Per-node forwarding controller
#[derive(Debug, Clone)]
pub struct Router<I: PeerIdentity> {
    local_id: I,
    engine: DecisionEngine<I>,
    config: RouterConfig,
    outgoing: Vec<OutgoingIntent>,
    exchanged: HashSet<ConnectionId>,
    tombstones: Option<HashSet<MessageId>>,
    stats: RouterStats,
}

impl<I: PeerIdentity> Router<I> {
    /// Create a router for `local_id`
    pub fn new(local_id: I, config: &RouterConfig) -> Self {
        Self {
            engine: DecisionEngine::new(local_id.clone(), config),
            local_id,
            config: config.clone(),
            outgoing: Vec::new(),
            exchanged: HashSet::new(),
            tombstones: config.tombstones.then(HashSet::new),
            stats: RouterStats::default(),
        }
    }

    /// The node this router belongs to
    pub fn local_id(&self) -> &I {
        &self.local_id
    }

    /// Read-only access to the decision engine
    pub fn engine(&self) -> &DecisionEngine<I> {
        &self.engine
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Queued intents, in the order they will be tried
    pub fn outgoing(&self) -> &[OutgoingIntent] {
        &self.outgoing
    }

    /// Whether the exchange already ran for a connection
    pub fn has_exchanged(&self, connection: ConnectionId) -> bool {
        self.exchanged.contains(&connection)
    }

    /// Tombstoned message ids, None when tombstones are disabled
    pub fn tombstones(&self) -> Option<&HashSet<MessageId>> {
        self.tombstones.as_ref()
    }

    pub fn stats(&self) -> &RouterStats {
        &self.stats
    }

    /// A message was created at this node
    ///
    /// Returns false if the engine refused it.
    pub fn on_message_created<E: RouterEnv<I>>(
        &mut self,
        env: &mut E,
        message: Message<I>,
    ) -> bool {
        if !self.engine.new_message(&message) {
            debug!(node = %self.local_id, message = %message.id, "Engine refused new message");
            return false;
        }

        self.store_message(env, message.clone());
        env.emit(RoutingEvent::MessageCreated {
            node: self.local_id.clone(),
            message: message.id,
            at: env.now(),
        });
        self.select_relays_for(env, &message, None);
        true
    }

    /// A connection came up
    ///
    /// `peer` is the router on the other end. Whichever endpoint observes the
    /// connection first runs the exchange for both.
    #[instrument(skip(self, env, peer), fields(node = %self.local_id, connection = %con.id))]
    pub fn on_connection_up<E: RouterEnv<I>>(
        &mut self,
        env: &mut E,
        con: &ConnectionInfo<I>,
        peer: &mut Router<I>,
    ) {
        let now = env.now();
        self.engine.connection_up(&con.peer, now);

        if !self.exchanged.contains(&con.id) {
            let admitted = DecisionEngine::exchange(&mut self.engine, &mut peer.engine, now);
            self.exchanged.insert(con.id);
            peer.exchanged.insert(con.id);
            self.stats.exchanges_performed += 1;
            env.emit(RoutingEvent::ExchangeCompleted {
                node: self.local_id.clone(),
                peer: con.peer.clone(),
                connection: con.id,
                admitted,
                at: now,
            });
        } else {
            trace!("Exchange already done by peer");
        }

        for id in env.store().message_ids() {
            let Some(message) = env.store().get(&id) else {
                continue;
            };
            if self.engine.should_send_message_to_host(message, &con.peer) {
                self.enqueue(id, con.id);
            }
        }
    }

    /// A connection went down
    ///
    /// Every intent on the connection is dropped before this returns.
    #[instrument(skip(self, env, peer), fields(node = %self.local_id, connection = %con.id))]
    pub fn on_connection_down<E: RouterEnv<I>>(
        &mut self,
        env: &mut E,
        con: &ConnectionInfo<I>,
        peer: &Router<I>,
    ) {
        let peer_view = peer.engine.familiar_view();
        self.engine.connection_down(&con.peer, env.now(), &peer_view);
        self.exchanged.remove(&con.id);

        let before = self.outgoing.len();
        self.outgoing.retain(|intent| intent.connection != con.id);
        let purged = before - self.outgoing.len();
        if purged > 0 {
            debug!(purged, "Dropped intents for closed connection");
        }
    }

    /// Try to start sending a message over a connection
    pub fn start_transfer<E: RouterEnv<I>>(
        &mut self,
        env: &mut E,
        message: &Message<I>,
        connection: ConnectionId,
    ) -> TransferOutcome {
        if !env.is_ready_for_transfer(connection) {
            return TransferOutcome::Busy;
        }

        let outcome = env.start_transfer(connection, message);
        match outcome {
            TransferOutcome::Started => {
                env.mark_sending(connection);
                self.stats.transfers_started += 1;
                if let Some(peer) = env.peer_of(connection) {
                    env.emit(RoutingEvent::TransferStarted {
                        from: self.local_id.clone(),
                        to: peer,
                        message: message.id,
                        connection,
                        at: env.now(),
                    });
                }
            }
            TransferOutcome::DeniedDelivered if self.tombstones.is_some() => {
                self.delete_message(env, message.id, DeletionReason::Tombstoned);
                if let Some(tombstones) = self.tombstones.as_mut() {
                    tombstones.insert(message.id);
                }
                self.stats.tombstones_recorded += 1;
            }
            TransferOutcome::DeniedOld | TransferOutcome::DeniedDelivered
                if self.config.delete_delivered =>
            {
                let delete = env
                    .peer_of(connection)
                    .is_some_and(|peer| self.engine.should_delete_old_message(message, &peer));
                if delete {
                    self.delete_message(env, message.id, DeletionReason::DeliveredElsewhere);
                }
            }
            _ => {}
        }
        outcome
    }

    /// Answer a peer offering `message` to this node
    pub fn receive_check<S: MessageStore<I>>(
        &self,
        store: &S,
        message: &Message<I>,
    ) -> TransferOutcome {
        let tombstoned = self
            .tombstones
            .as_ref()
            .is_some_and(|t| t.contains(&message.id));

        if tombstoned || store.is_delivered(&message.id) {
            TransferOutcome::DeniedDelivered
        } else if store.contains(&message.id) {
            TransferOutcome::DeniedOld
        } else if message.size > store.capacity() {
            TransferOutcome::DeniedNoSpace
        } else {
            TransferOutcome::Started
        }
    }

    /// A message from `from` finished arriving at this node
    ///
    /// Returns the message as it left the filter chain, or as it arrived if a
    /// filter dropped it.
    pub fn on_message_received<E: RouterEnv<I>>(
        &mut self,
        env: &mut E,
        id: MessageId,
        from: &I,
    ) -> RouterResult<Message<I>> {
        let mut incoming = env
            .store_mut()
            .take_incoming(&id, from)
            .ok_or_else(|| RouterError::UnknownIncoming {
                id,
                from: from.to_string(),
            })?;
        let now = env.now();
        incoming.received_at = Some(now);

        let outgoing = env.filters().run(incoming.clone(), &self.local_id);
        let dropped = outgoing.is_none();
        let message = outgoing.unwrap_or(incoming);

        let is_final = self.engine.is_final_dest(&message, &self.local_id);
        let first_delivery = is_final && !env.store().is_delivered(&id);

        if !dropped && self.engine.should_save_received_message(&message, &self.local_id) {
            self.store_message(env, message.clone());
            self.select_relays_for(env, &message, Some(from));
        }

        if first_delivery {
            env.store_mut().mark_delivered(message.clone());
            self.stats.deliveries += 1;
        }

        if dropped {
            debug!(node = %self.local_id, message = %id, "Filter dropped received message");
        }
        env.emit(RoutingEvent::MessageTransferred {
            message: id,
            from: from.clone(),
            to: self.local_id.clone(),
            first_delivery,
            dropped,
            at: now,
        });

        Ok(message)
    }

    /// This node finished sending on a connection
    pub fn on_transfer_done<E: RouterEnv<I>>(
        &mut self,
        env: &mut E,
        connection: ConnectionId,
    ) -> RouterResult<()> {
        let id = env
            .in_flight(connection)
            .ok_or(RouterError::NoInFlightMessage(connection))?;
        let message = env
            .store()
            .get(&id)
            .cloned()
            .ok_or(RouterError::UnknownOutgoing(id))?;

        if let Some(pos) = self
            .outgoing
            .iter()
            .position(|i| i.message == id && i.connection == connection)
        {
            self.outgoing.remove(pos);
        }
        self.stats.transfers_completed += 1;

        let delete = env
            .peer_of(connection)
            .is_some_and(|peer| self.engine.should_delete_sent_message(&message, &peer));
        if delete {
            self.delete_message(env, id, DeletionReason::Relayed);
        }
        Ok(())
    }

    /// Periodic update: plan relays and try to start one transfer
    ///
    /// Returns the intent whose transfer started, if any.
    pub fn periodic_tick<E: RouterEnv<I>>(&mut self, env: &mut E) -> Option<OutgoingIntent> {
        if env.is_transferring() || env.store().is_empty() || env.connections().is_empty() {
            return None;
        }

        self.select_relays(env);

        let mut started = None;
        for intent in self.outgoing.clone() {
            let Some(message) = env.store().get(&intent.message).cloned() else {
                continue;
            };
            if self.start_transfer(env, &message, intent.connection).is_started() {
                started = Some(intent);
                break;
            }
        }

        let store = env.store();
        self.outgoing.retain(|intent| store.contains(&intent.message));
        started
    }

    /// Two-stage relay selection over every open connection
    fn select_relays<E: RouterEnv<I>>(&mut self, env: &E) {
        let store = env.store();
        let messages: Vec<&Message<I>> = store
            .message_ids()
            .iter()
            .filter_map(|id| store.get(id))
            .collect();

        let plans: Vec<NeighborPlan> = env
            .connections()
            .into_iter()
            .filter_map(|con| {
                env.neighbor_view(&con.peer)
                    .map(|view| plan_neighbor(con.id, &messages, &view))
            })
            .collect();

        for plan in admit_neighbors(plans, self.config.admission_probability) {
            for message in plan.candidates {
                self.enqueue(message, plan.connection);
            }
        }
    }

    /// Per-message relay selection over open connections
    fn select_relays_for<E: RouterEnv<I>>(
        &mut self,
        env: &E,
        message: &Message<I>,
        exclude: Option<&I>,
    ) {
        for con in env.connections() {
            if exclude == Some(&con.peer) {
                continue;
            }
            if self.engine.should_send_message_to_host(message, &con.peer) {
                self.enqueue(message.id, con.id);
            }
        }
    }

    fn enqueue(&mut self, message: MessageId, connection: ConnectionId) {
        let intent = OutgoingIntent {
            message,
            connection,
        };
        if !self.outgoing.contains(&intent) {
            trace!(node = %self.local_id, %intent, "Queued intent");
            self.outgoing.push(intent);
            self.stats.intents_enqueued += 1;
        }
    }

    /// Buffer a message and forget the intents of anything evicted for it
    fn store_message<E: RouterEnv<I>>(&mut self, env: &mut E, message: Message<I>) {
        for old in env.store_mut().insert(message) {
            self.outgoing.retain(|intent| intent.message != old.id);
            self.stats.messages_deleted += 1;
            debug!(node = %self.local_id, message = %old.id, "Store evicted message");
            env.emit(RoutingEvent::MessageDeleted {
                node: self.local_id.clone(),
                message: old.id,
                reason: DeletionReason::Evicted,
                at: env.now(),
            });
        }
    }

    /// Remove a message locally and purge every intent for it
    fn delete_message<E: RouterEnv<I>>(
        &mut self,
        env: &mut E,
        id: MessageId,
        reason: DeletionReason,
    ) {
        self.outgoing.retain(|intent| intent.message != id);
        if env.store_mut().remove(&id).is_some() {
            self.stats.messages_deleted += 1;
            debug!(node = %self.local_id, message = %id, %reason, "Deleted message");
            env.emit(RoutingEvent::MessageDeleted {
                node: self.local_id.clone(),
                message: id,
                reason,
                at: env.now(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::community::CommunityConfig;
    use commune_core::{Clock, FilterChain, NeighborView, SimTime, SimulationIdentity};
    use std::collections::{BTreeMap, BTreeSet, HashMap};

    type Id = SimulationIdentity;

    fn make_id(c: char) -> Id {
        SimulationIdentity::new(c).unwrap()
    }

    fn make_message(id: u64, dest: char, size: u64) -> Message<Id> {
        Message::new(MessageId(id), make_id('A'), [make_id(dest)], size, 0.0)
    }

    /// Evicts lowest ids first once `capacity` bytes are used
    struct MockStore {
        capacity: u64,
        messages: BTreeMap<MessageId, Message<Id>>,
        incoming: HashMap<(MessageId, Id), Message<Id>>,
        delivered: HashSet<MessageId>,
    }

    impl Default for MockStore {
        fn default() -> Self {
            Self {
                capacity: 1000,
                messages: BTreeMap::new(),
                incoming: HashMap::new(),
                delivered: HashSet::new(),
            }
        }
    }

    impl MockStore {
        fn used(&self) -> u64 {
            self.messages.values().map(|m| m.size).sum()
        }
    }

    impl MessageStore<Id> for MockStore {
        fn insert(&mut self, message: Message<Id>) -> Vec<Message<Id>> {
            self.messages.remove(&message.id);
            let mut evicted = Vec::new();
            while self.used() + message.size > self.capacity {
                match self.messages.pop_first() {
                    Some((_, old)) => evicted.push(old),
                    None => break,
                }
            }
            self.messages.insert(message.id, message);
            evicted
        }
        fn remove(&mut self, id: &MessageId) -> Option<Message<Id>> {
            self.messages.remove(id)
        }
        fn get(&self, id: &MessageId) -> Option<&Message<Id>> {
            self.messages.get(id)
        }
        fn message_ids(&self) -> Vec<MessageId> {
            self.messages.keys().copied().collect()
        }
        fn len(&self) -> usize {
            self.messages.len()
        }
        fn capacity(&self) -> u64 {
            self.capacity
        }
        fn free_space(&self) -> u64 {
            self.capacity.saturating_sub(self.used())
        }
        fn take_incoming(&mut self, id: &MessageId, from: &Id) -> Option<Message<Id>> {
            self.incoming.remove(&(*id, *from))
        }
        fn is_delivered(&self, id: &MessageId) -> bool {
            self.delivered.contains(id)
        }
        fn mark_delivered(&mut self, message: Message<Id>) {
            self.delivered.insert(message.id);
        }
    }

    struct MockEnv {
        now: SimTime,
        store: MockStore,
        connections: Vec<ConnectionInfo<Id>>,
        ready: bool,
        transferring: bool,
        outcome: TransferOutcome,
        offered: Vec<(ConnectionId, MessageId)>,
        sending: Vec<ConnectionId>,
        in_flight: HashMap<ConnectionId, MessageId>,
        neighbors: BTreeMap<Id, NeighborView<Id>>,
        filters: FilterChain<Id>,
        events: Vec<RoutingEvent<Id>>,
    }

    impl MockEnv {
        fn new() -> Self {
            Self {
                now: 0.0,
                store: MockStore::default(),
                connections: Vec::new(),
                ready: true,
                transferring: false,
                outcome: TransferOutcome::Started,
                offered: Vec::new(),
                sending: Vec::new(),
                in_flight: HashMap::new(),
                neighbors: BTreeMap::new(),
                filters: FilterChain::new(),
                events: Vec::new(),
            }
        }

        fn connect(&mut self, id: u64, peer: char, weights: &[(char, f64)]) -> ConnectionInfo<Id> {
            let con = ConnectionInfo::new(ConnectionId(id), make_id(peer));
            self.connections.push(con.clone());
            self.neighbors.insert(
                make_id(peer),
                NeighborView {
                    peer: make_id(peer),
                    path_weights: weights.iter().map(|(c, w)| (make_id(*c), *w)).collect(),
                    free_buffer: 1000,
                    held: BTreeSet::new(),
                },
            );
            con
        }

        fn stage(&mut self, message: Message<Id>, from: char) {
            self.store.incoming.insert((message.id, make_id(from)), message);
        }
    }

    impl Clock for MockEnv {
        fn now(&self) -> SimTime {
            self.now
        }
    }

    impl RouterEnv<Id> for MockEnv {
        type Store = MockStore;

        fn store(&self) -> &MockStore {
            &self.store
        }
        fn store_mut(&mut self) -> &mut MockStore {
            &mut self.store
        }
        fn connections(&self) -> Vec<ConnectionInfo<Id>> {
            self.connections.clone()
        }
        fn is_ready_for_transfer(&self, _connection: ConnectionId) -> bool {
            self.ready
        }
        fn start_transfer(
            &mut self,
            connection: ConnectionId,
            message: &Message<Id>,
        ) -> TransferOutcome {
            self.offered.push((connection, message.id));
            self.outcome
        }
        fn mark_sending(&mut self, connection: ConnectionId) {
            self.sending.push(connection);
        }
        fn is_transferring(&self) -> bool {
            self.transferring
        }
        fn in_flight(&self, connection: ConnectionId) -> Option<MessageId> {
            self.in_flight.get(&connection).copied()
        }
        fn neighbor_view(&self, peer: &Id) -> Option<NeighborView<Id>> {
            self.neighbors.get(peer).cloned()
        }
        fn filters(&mut self) -> &mut FilterChain<Id> {
            &mut self.filters
        }
        fn emit(&mut self, event: RoutingEvent<Id>) {
            self.events.push(event);
        }
    }

    fn router(c: char) -> Router<Id> {
        Router::new(make_id(c), &RouterConfig::default())
    }

    fn router_with(c: char, config: RouterConfig) -> Router<Id> {
        Router::new(make_id(c), &config)
    }

    #[test]
    fn test_message_created_is_stored() {
        let mut env = MockEnv::new();
        env.connect(1, 'B', &[]);
        let mut a = router('A');

        assert!(a.on_message_created(&mut env, make_message(1, 'C', 10)));
        assert!(env.store.contains(&MessageId(1)));
        assert!(matches!(env.events[0], RoutingEvent::MessageCreated { .. }));
        // The per-message hook never approves, so nothing is queued yet
        assert!(a.outgoing().is_empty());
    }

    #[test]
    fn test_exchange_runs_once_a_first() {
        let mut env_a = MockEnv::new();
        let mut env_b = MockEnv::new();
        let mut a = router('A');
        let mut b = router('B');
        let con_a = ConnectionInfo::new(ConnectionId(1), make_id('B'));
        let con_b = ConnectionInfo::new(ConnectionId(1), make_id('A'));

        a.on_connection_up(&mut env_a, &con_a, &mut b);
        b.on_connection_up(&mut env_b, &con_b, &mut a);

        assert_eq!(a.stats().exchanges_performed, 1);
        assert_eq!(b.stats().exchanges_performed, 0);
        assert!(a.has_exchanged(ConnectionId(1)));
        assert!(b.has_exchanged(ConnectionId(1)));
        assert_eq!(env_a.events.len(), 1);
        assert!(env_b.events.is_empty());
    }

    #[test]
    fn test_exchange_runs_once_b_first() {
        let mut env_a = MockEnv::new();
        let mut env_b = MockEnv::new();
        let mut a = router('A');
        let mut b = router('B');
        let con_a = ConnectionInfo::new(ConnectionId(1), make_id('B'));
        let con_b = ConnectionInfo::new(ConnectionId(1), make_id('A'));

        b.on_connection_up(&mut env_b, &con_b, &mut a);
        a.on_connection_up(&mut env_a, &con_a, &mut b);

        assert_eq!(a.stats().exchanges_performed + b.stats().exchanges_performed, 1);
        assert!(a.has_exchanged(ConnectionId(1)));
    }

    #[test]
    fn test_reconnect_gets_fresh_exchange() {
        let mut env = MockEnv::new();
        let mut a = router('A');
        let mut b = router('B');
        let first = ConnectionInfo::new(ConnectionId(1), make_id('B'));
        let second = ConnectionInfo::new(ConnectionId(2), make_id('B'));

        a.on_connection_up(&mut env, &first, &mut b);
        a.on_connection_down(&mut env, &first, &b);
        assert!(!a.has_exchanged(ConnectionId(1)));

        a.on_connection_up(&mut env, &second, &mut b);
        assert_eq!(a.stats().exchanges_performed, 2);
    }

    fn config_admitting_all() -> RouterConfig {
        RouterConfig {
            admission_probability: 1.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_tick_queues_and_starts_transfer() {
        let mut env = MockEnv::new();
        env.connect(1, 'B', &[('C', 0.9)]);
        env.connect(2, 'D', &[('C', 0.2)]);
        env.store.insert(make_message(1, 'C', 10));
        let mut a = router_with('A', config_admitting_all());

        let started = a.periodic_tick(&mut env);

        // Lowest weight (best reach) first: B has weight 0.1, D has 0.8
        let expected = OutgoingIntent {
            message: MessageId(1),
            connection: ConnectionId(1),
        };
        assert_eq!(started, Some(expected));
        assert_eq!(env.sending, vec![ConnectionId(1)]);
        assert_eq!(a.outgoing().len(), 2);
        assert_eq!(a.outgoing()[0], expected);
        assert!(
            env.events
                .iter()
                .any(|e| matches!(e, RoutingEvent::TransferStarted { .. }))
        );
    }

    #[test]
    fn test_tick_is_noop_while_transferring() {
        let mut env = MockEnv::new();
        env.connect(1, 'B', &[('C', 0.9)]);
        env.store.insert(make_message(1, 'C', 10));
        env.transferring = true;
        let mut a = router('A');

        assert_eq!(a.periodic_tick(&mut env), None);
        assert!(a.outgoing().is_empty());
        assert!(env.offered.is_empty());
    }

    #[test]
    fn test_tick_is_noop_with_empty_buffer() {
        let mut env = MockEnv::new();
        env.connect(1, 'B', &[('C', 0.9)]);
        let mut a = router('A');
        assert_eq!(a.periodic_tick(&mut env), None);
    }

    #[test]
    fn test_busy_link_keeps_intent() {
        let mut env = MockEnv::new();
        env.connect(1, 'B', &[('C', 0.9)]);
        env.store.insert(make_message(1, 'C', 10));
        env.ready = false;
        let mut a = router('A');

        assert_eq!(a.periodic_tick(&mut env), None);
        assert_eq!(a.outgoing().len(), 1);
        assert!(env.offered.is_empty());
    }

    #[test]
    fn test_connection_down_purges_intents() {
        let mut env = MockEnv::new();
        let con_b = env.connect(1, 'B', &[('C', 0.9)]);
        env.connect(2, 'D', &[('C', 0.2)]);
        env.store.insert(make_message(1, 'C', 10));
        env.ready = false;
        let mut a = router_with('A', config_admitting_all());
        let b = router('B');

        a.periodic_tick(&mut env);
        assert_eq!(a.outgoing().len(), 2);

        a.on_connection_down(&mut env, &con_b, &b);
        assert!(a.outgoing().iter().all(|i| i.connection != ConnectionId(1)));
        assert_eq!(a.outgoing().len(), 1);
    }

    #[test]
    fn test_tick_prunes_deleted_messages() {
        let mut env = MockEnv::new();
        env.connect(1, 'B', &[('C', 0.9)]);
        env.store.insert(make_message(1, 'C', 10));
        env.ready = false;
        let mut a = router('A');
        a.periodic_tick(&mut env);
        assert_eq!(a.outgoing().len(), 1);

        env.store.insert(make_message(2, 'Z', 10));
        env.store.remove(&MessageId(1));
        a.periodic_tick(&mut env);
        assert!(a.outgoing().iter().all(|i| i.message != MessageId(1)));
    }

    #[test]
    fn test_tombstone_on_denied_delivered() {
        let mut env = MockEnv::new();
        env.connect(1, 'B', &[]);
        let msg = make_message(1, 'B', 10);
        env.store.insert(msg.clone());
        let mut a = router_with('A', RouterConfig::sparse_contacts());

        // Queue the message while the link is busy
        env.ready = false;
        a.periodic_tick(&mut env);
        assert_eq!(a.outgoing().len(), 1);

        env.ready = true;
        env.outcome = TransferOutcome::DeniedDelivered;
        let outcome = a.start_transfer(&mut env, &msg, ConnectionId(1));
        assert_eq!(outcome, TransferOutcome::DeniedDelivered);
        assert!(!env.store.contains(&MessageId(1)));
        assert!(a.outgoing().iter().all(|i| i.message != MessageId(1)));
        assert!(a.tombstones().unwrap().contains(&MessageId(1)));
        assert_eq!(a.stats().tombstones_recorded, 1);
        assert!(matches!(
            env.events.last(),
            Some(RoutingEvent::MessageDeleted {
                reason: DeletionReason::Tombstoned,
                ..
            })
        ));

        // The tombstone refuses the message when it is offered again
        assert_eq!(a.receive_check(&env.store, &msg), TransferOutcome::DeniedDelivered);
    }

    #[test]
    fn test_eviction_purges_intents() {
        let mut env = MockEnv::new();
        env.connect(1, 'B', &[('C', 0.9)]);
        env.store.insert(make_message(1, 'C', 400));
        env.store.insert(make_message(2, 'C', 400));
        env.ready = false;
        let mut a = router('A');
        a.periodic_tick(&mut env);
        assert_eq!(a.outgoing().len(), 2);

        // No tick runs between the creation and the check
        assert!(a.on_message_created(&mut env, make_message(3, 'C', 400)));
        assert!(!env.store.contains(&MessageId(1)));
        assert!(a.outgoing().iter().all(|i| i.message != MessageId(1)));
        assert!(a.outgoing().iter().any(|i| i.message == MessageId(2)));
        assert!(env.events.iter().any(|e| matches!(
            e,
            RoutingEvent::MessageDeleted {
                message: MessageId(1),
                reason: DeletionReason::Evicted,
                ..
            }
        )));
    }

    #[test]
    fn test_received_message_evicts_and_purges() {
        let mut env = MockEnv::new();
        env.connect(1, 'B', &[('C', 0.9)]);
        env.store.insert(make_message(1, 'C', 600));
        env.ready = false;
        let mut a = router('A');
        a.periodic_tick(&mut env);
        assert_eq!(a.outgoing().len(), 1);

        env.stage(make_message(2, 'C', 600), 'D');
        a.on_message_received(&mut env, MessageId(2), &make_id('D')).unwrap();
        assert!(env.store.contains(&MessageId(2)));
        assert!(a.outgoing().is_empty());
        assert_eq!(a.stats().messages_deleted, 1);
    }

    #[test]
    fn test_delete_delivered_asks_policy() {
        let mut env = MockEnv::new();
        env.connect(1, 'B', &[]);
        env.outcome = TransferOutcome::DeniedOld;
        let msg = make_message(1, 'B', 10);
        env.store.insert(msg.clone());
        let config = RouterConfig {
            delete_delivered: true,
            ..Default::default()
        };
        let mut a = router_with('A', config);

        a.start_transfer(&mut env, &msg, ConnectionId(1));
        // The policy declines, so the message stays
        assert!(env.store.contains(&MessageId(1)));
        assert!(a.tombstones().is_none());
    }

    #[test]
    fn test_receive_check() {
        let mut store = MockStore::default();
        let a = router('A');
        let msg = make_message(1, 'A', 10);
        assert_eq!(a.receive_check(&store, &msg), TransferOutcome::Started);

        store.insert(msg.clone());
        assert_eq!(a.receive_check(&store, &msg), TransferOutcome::DeniedOld);

        store.delivered.insert(MessageId(1));
        assert_eq!(a.receive_check(&store, &msg), TransferOutcome::DeniedDelivered);

        let huge = make_message(2, 'A', 5000);
        assert_eq!(a.receive_check(&store, &huge), TransferOutcome::DeniedNoSpace);
    }

    #[test]
    fn test_received_at_destination() {
        let mut env = MockEnv::new();
        env.now = 42.0;
        env.stage(make_message(1, 'B', 10), 'A');
        let mut b = router('B');

        let msg = b.on_message_received(&mut env, MessageId(1), &make_id('A')).unwrap();
        assert_eq!(msg.received_at, Some(42.0));
        assert!(env.store.is_delivered(&MessageId(1)));
        // Destinations do not keep a routable copy
        assert!(!env.store.contains(&MessageId(1)));
        assert!(env.events[0].is_first_delivery());
        assert_eq!(b.stats().deliveries, 1);

        env.stage(make_message(1, 'B', 10), 'C');
        b.on_message_received(&mut env, MessageId(1), &make_id('C')).unwrap();
        assert!(!env.events[1].is_first_delivery());
    }

    #[test]
    fn test_received_at_relay() {
        let mut env = MockEnv::new();
        env.stage(make_message(1, 'C', 10), 'A');
        let mut b = router('B');

        b.on_message_received(&mut env, MessageId(1), &make_id('A')).unwrap();
        assert!(env.store.contains(&MessageId(1)));
        assert!(!env.store.is_delivered(&MessageId(1)));
        assert!(!env.events[0].is_first_delivery());
    }

    #[test]
    fn test_filter_drop_still_reports() {
        let mut env = MockEnv::new();
        env.filters
            .push(|_: Message<Id>, _: &Id| -> Option<Message<Id>> { None });
        env.stage(make_message(1, 'C', 10), 'A');
        let mut b = router('B');

        let msg = b.on_message_received(&mut env, MessageId(1), &make_id('A')).unwrap();
        assert_eq!(msg.id, MessageId(1));
        assert!(!env.store.contains(&MessageId(1)));
        assert!(matches!(
            env.events[0],
            RoutingEvent::MessageTransferred { dropped: true, .. }
        ));
    }

    #[test]
    fn test_filter_transform_is_stored() {
        let mut env = MockEnv::new();
        env.filters.push(|mut m: Message<Id>, _: &Id| -> Option<Message<Id>> {
            m.size = 7;
            Some(m)
        });
        env.stage(make_message(1, 'C', 10), 'A');
        let mut b = router('B');

        b.on_message_received(&mut env, MessageId(1), &make_id('A')).unwrap();
        assert_eq!(env.store.get(&MessageId(1)).map(|m| m.size), Some(7));
    }

    #[test]
    fn test_unknown_incoming_is_an_error() {
        let mut env = MockEnv::new();
        let mut b = router('B');
        let err = b
            .on_message_received(&mut env, MessageId(9), &make_id('A'))
            .unwrap_err();
        assert!(matches!(err, RouterError::UnknownIncoming { id: MessageId(9), .. }));
    }

    #[test]
    fn test_transfer_done() {
        let mut env = MockEnv::new();
        env.connect(1, 'B', &[('C', 0.9)]);
        env.store.insert(make_message(1, 'C', 10));
        let mut a = router('A');

        let started = a.periodic_tick(&mut env).unwrap();
        env.in_flight.insert(started.connection, started.message);

        a.on_transfer_done(&mut env, ConnectionId(1)).unwrap();
        assert!(a.outgoing().is_empty());
        assert_eq!(a.stats().transfers_completed, 1);
        // The sent-message policy keeps the local copy
        assert!(env.store.contains(&MessageId(1)));
    }

    #[test]
    fn test_transfer_done_errors() {
        let mut env = MockEnv::new();
        let mut a = router('A');
        assert_eq!(
            a.on_transfer_done(&mut env, ConnectionId(3)),
            Err(RouterError::NoInFlightMessage(ConnectionId(3)))
        );

        env.in_flight.insert(ConnectionId(3), MessageId(5));
        assert_eq!(
            a.on_transfer_done(&mut env, ConnectionId(3)),
            Err(RouterError::UnknownOutgoing(MessageId(5)))
        );
    }

    #[test]
    fn test_exchange_builds_community() {
        let config = RouterConfig {
            community: CommunityConfig {
                familiar_threshold: 50.0,
                ..Default::default()
            },
            ..Default::default()
        };
        let mut env = MockEnv::new();
        let mut a = router_with('A', config.clone());
        let mut b = router_with('B', config);
        let con = ConnectionInfo::new(ConnectionId(1), make_id('B'));

        a.on_connection_up(&mut env, &con, &mut b);
        env.now = 100.0;
        a.on_connection_down(&mut env, &con, &b);

        assert!(a.engine().community().is_member(&make_id('B')));
        assert!(a.engine().path_weight(&make_id('B')).is_some());
    }
}
