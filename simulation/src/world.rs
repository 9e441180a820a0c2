//! The simulated world
//!
//! [`SimWorld`] owns every node's router and buffer, the open links and the
//! clock. It drives router callbacks in a fixed order:
//!
//! - `connect(a, b)` runs `a`'s connection-up callback, then `b`'s
//! - `disconnect` aborts the transfer on the link, then runs both
//!   connection-down callbacks
//! - `step` completes due transfers (receiver first, then sender), then
//!   ticks every node in identity order
//!
//! Each callback sees the world through a [`RouterEnv`] built for the node
//! it runs on.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, trace, warn};

use commune_core::{
    Clock, ConnectionId, ConnectionInfo, FilterChain, ManualClock, Message, MessageFilter,
    MessageId, MessageStore, NeighborView, RouterEnv, RoutingEvent, SimTime, SimulationIdentity,
    StoreError, TransferOutcome,
};
use commune_routing::{Router, RouterConfig};

use crate::error::{SimError, SimResult};
use crate::schedule::{ContactEvent, ContactPlan, ScheduledMessage};
use crate::store::BufferStore;

type Id = SimulationIdentity;

/// Configuration for a simulated world
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Router configuration shared by every node
    pub router: RouterConfig,
    /// Buffer size of every node, in bytes
    pub buffer_capacity: u64,
    /// Link speed in bytes per second
    pub bandwidth: f64,
    /// Seconds between periodic ticks
    pub tick_interval: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            router: RouterConfig::default(),
            buffer_capacity: 50_000,
            bandwidth: 250.0,
            tick_interval: 1.0,
        }
    }
}

/// Counters kept while a world runs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimStats {
    pub contacts_opened: u64,
    pub contacts_closed: u64,
    pub messages_created: u64,
    /// Messages the source's engine refused
    pub messages_refused: u64,
    /// `(message, destination)` pairs that could be delivered
    pub expected_deliveries: u64,
    pub transfers_started: u64,
    pub transfers_completed: u64,
    /// Transfers cut off by a closing contact
    pub transfers_aborted: u64,
    pub first_deliveries: u64,
    pub ticks: u64,
}

#[derive(Debug)]
struct Host {
    store: BufferStore,
    filters: FilterChain<Id>,
    /// Messages this node is sending, by connection
    sending: BTreeMap<ConnectionId, MessageId>,
}

impl Host {
    fn new(capacity: u64) -> Self {
        Self {
            store: BufferStore::new(capacity),
            filters: FilterChain::new(),
            sending: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    message: MessageId,
    from: Id,
    to: Id,
    completes_at: SimTime,
}

#[derive(Debug, Clone)]
struct Link {
    a: Id,
    b: Id,
    in_flight: Option<InFlight>,
}

impl Link {
    fn peer_of(&self, node: &Id) -> Option<Id> {
        if *node == self.a {
            Some(self.b)
        } else if *node == self.b {
            Some(self.a)
        } else {
            None
        }
    }

    fn joins(&self, x: &Id, y: &Id) -> bool {
        (self.a == *x && self.b == *y) || (self.a == *y && self.b == *x)
    }
}

/// A node's view of the world during one callback
///
/// The node's own router and host are taken out of the world for the
/// duration of the callback, so `routers` and `hosts` hold everyone else.
struct NodeEnv<'a> {
    node: Id,
    now: SimTime,
    bandwidth: f64,
    host: &'a mut Host,
    hosts: &'a mut BTreeMap<Id, Host>,
    routers: &'a BTreeMap<Id, Router<Id>>,
    links: &'a mut BTreeMap<ConnectionId, Link>,
    events: &'a mut Vec<RoutingEvent<Id>>,
}

impl Clock for NodeEnv<'_> {
    fn now(&self) -> SimTime {
        self.now
    }
}

impl RouterEnv<Id> for NodeEnv<'_> {
    type Store = BufferStore;

    fn store(&self) -> &BufferStore {
        &self.host.store
    }

    fn store_mut(&mut self) -> &mut BufferStore {
        &mut self.host.store
    }

    fn connections(&self) -> Vec<ConnectionInfo<Id>> {
        self.links
            .iter()
            .filter_map(|(id, link)| {
                link.peer_of(&self.node)
                    .map(|peer| ConnectionInfo::new(*id, peer))
            })
            .collect()
    }

    fn is_ready_for_transfer(&self, connection: ConnectionId) -> bool {
        self.links
            .get(&connection)
            .is_some_and(|link| link.in_flight.is_none())
    }

    fn start_transfer(
        &mut self,
        connection: ConnectionId,
        message: &Message<Id>,
    ) -> TransferOutcome {
        let Some(link) = self.links.get_mut(&connection) else {
            return TransferOutcome::Busy;
        };
        let Some(peer) = link.peer_of(&self.node) else {
            return TransferOutcome::Busy;
        };
        if link.in_flight.is_some() {
            return TransferOutcome::Busy;
        }
        let (Some(peer_router), Some(peer_host)) =
            (self.routers.get(&peer), self.hosts.get_mut(&peer))
        else {
            warn!(node = %self.node, %peer, "Peer unavailable for transfer");
            return TransferOutcome::Busy;
        };

        let outcome = peer_router.receive_check(&peer_host.store, message);
        if outcome.is_started() {
            peer_host.store.stage(message.relayed(), self.node);
            let completes_at = self.now + message.size as f64 / self.bandwidth;
            link.in_flight = Some(InFlight {
                message: message.id,
                from: self.node,
                to: peer,
                completes_at,
            });
        }
        trace!(node = %self.node, %peer, message = %message.id, %outcome, "Offered message");
        outcome
    }

    fn mark_sending(&mut self, connection: ConnectionId) {
        let sending = self
            .links
            .get(&connection)
            .and_then(|link| link.in_flight)
            .filter(|flight| flight.from == self.node);
        if let Some(flight) = sending {
            self.host.store.pin(flight.message);
            self.host.sending.insert(connection, flight.message);
        }
    }

    fn is_transferring(&self) -> bool {
        !self.host.sending.is_empty()
            || self
                .links
                .values()
                .any(|link| link.in_flight.is_some_and(|flight| flight.to == self.node))
    }

    fn in_flight(&self, connection: ConnectionId) -> Option<MessageId> {
        self.host.sending.get(&connection).copied()
    }

    fn neighbor_view(&self, peer: &Id) -> Option<NeighborView<Id>> {
        let router = self.routers.get(peer)?;
        let host = self.hosts.get(peer)?;
        Some(NeighborView {
            peer: *peer,
            path_weights: router.engine().snapshot().weights,
            free_buffer: host.store.free_space(),
            held: host.store.message_ids().into_iter().collect(),
        })
    }

    fn filters(&mut self) -> &mut FilterChain<Id> {
        &mut self.host.filters
    }

    fn emit(&mut self, event: RoutingEvent<Id>) {
        trace!(?event, "Routing event");
        self.events.push(event);
    }
}

/// A population of nodes, their links and a clock
#[derive(Debug)]
pub struct SimWorld {
    config: SimConfig,
    clock: ManualClock,
    routers: BTreeMap<Id, Router<Id>>,
    hosts: BTreeMap<Id, Host>,
    links: BTreeMap<ConnectionId, Link>,
    next_connection: u64,
    next_message: u64,
    events: Vec<RoutingEvent<Id>>,
    stats: SimStats,
}

impl SimWorld {
    /// Create an empty world at time zero
    pub fn new(config: SimConfig) -> Self {
        for warning in config.router.validate() {
            warn!(%warning, "Router configuration");
        }
        Self {
            config,
            clock: ManualClock::starting_at(0.0),
            routers: BTreeMap::new(),
            hosts: BTreeMap::new(),
            links: BTreeMap::new(),
            next_connection: 1,
            next_message: 1,
            events: Vec::new(),
            stats: SimStats::default(),
        }
    }

    /// Create a world with the given nodes
    pub fn with_nodes(config: SimConfig, nodes: impl IntoIterator<Item = Id>) -> Self {
        let mut world = Self::new(config);
        for node in nodes {
            world.add_node(node);
        }
        world
    }

    /// Add a node; returns false if it already exists
    pub fn add_node(&mut self, id: Id) -> bool {
        if self.routers.contains_key(&id) {
            return false;
        }
        self.routers.insert(id, Router::new(id, &self.config.router));
        self.hosts.insert(id, Host::new(self.config.buffer_capacity));
        true
    }

    /// Install an application filter on a node
    pub fn add_filter(
        &mut self,
        node: Id,
        filter: impl MessageFilter<Id> + 'static,
    ) -> SimResult<()> {
        let host = self.hosts.get_mut(&node).ok_or(SimError::UnknownNode(node))?;
        host.filters.push(filter);
        Ok(())
    }

    pub fn now(&self) -> SimTime {
        self.clock.now()
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// All nodes, in identity order
    pub fn node_ids(&self) -> Vec<Id> {
        self.routers.keys().copied().collect()
    }

    pub fn router(&self, node: &Id) -> Option<&Router<Id>> {
        self.routers.get(node)
    }

    pub fn store(&self, node: &Id) -> Option<&BufferStore> {
        self.hosts.get(node).map(|host| &host.store)
    }

    /// Local community of a node
    pub fn community_of(&self, node: &Id) -> Option<&BTreeSet<Id>> {
        self.routers
            .get(node)
            .map(|router| router.engine().community().local_community())
    }

    /// Every event emitted so far, in order
    pub fn events(&self) -> &[RoutingEvent<Id>] {
        &self.events
    }

    pub fn stats(&self) -> &SimStats {
        &self.stats
    }

    /// Open connections as `(id, a, b)`
    pub fn open_connections(&self) -> Vec<(ConnectionId, Id, Id)> {
        self.links
            .iter()
            .map(|(id, link)| (*id, link.a, link.b))
            .collect()
    }

    /// The open connection between two nodes, if any
    pub fn connection_between(&self, a: &Id, b: &Id) -> Option<ConnectionId> {
        self.links
            .iter()
            .find(|(_, link)| link.joins(a, b))
            .map(|(id, _)| *id)
    }

    /// Whether a transfer is running on a connection
    pub fn is_busy(&self, connection: ConnectionId) -> bool {
        self.links
            .get(&connection)
            .is_some_and(|link| link.in_flight.is_some())
    }

    /// Open a connection; `a` observes it first
    #[instrument(skip(self), fields(now = self.clock.now()))]
    pub fn connect(&mut self, a: Id, b: Id) -> SimResult<ConnectionId> {
        if a == b {
            return Err(SimError::SelfContact(a));
        }
        for node in [a, b] {
            if !self.routers.contains_key(&node) {
                return Err(SimError::UnknownNode(node));
            }
        }
        if self.connection_between(&a, &b).is_some() {
            return Err(SimError::AlreadyConnected(a, b));
        }

        let connection = ConnectionId(self.next_connection);
        self.next_connection += 1;
        self.links.insert(
            connection,
            Link {
                a,
                b,
                in_flight: None,
            },
        );
        self.stats.contacts_opened += 1;
        debug!(%connection, "Contact opened");

        self.connection_up(a, b, connection)?;
        self.connection_up(b, a, connection)?;
        Ok(connection)
    }

    /// Close a connection, aborting its transfer
    #[instrument(skip(self), fields(now = self.clock.now()))]
    pub fn disconnect(&mut self, connection: ConnectionId) -> SimResult<()> {
        let link = self
            .links
            .remove(&connection)
            .ok_or(SimError::UnknownConnection(connection))?;
        if let Some(flight) = link.in_flight {
            self.abort_transfer(connection, flight);
        }
        self.stats.contacts_closed += 1;
        debug!(a = %link.a, b = %link.b, "Contact closed");

        self.connection_down(link.a, link.b, connection)?;
        self.connection_down(link.b, link.a, connection)?;
        Ok(())
    }

    /// Create a message at `source`
    ///
    /// Returns `None` if the source's engine refused it.
    pub fn create_message(
        &mut self,
        source: Id,
        destinations: impl IntoIterator<Item = Id>,
        size: u64,
    ) -> SimResult<Option<MessageId>> {
        if !self.routers.contains_key(&source) {
            return Err(SimError::UnknownNode(source));
        }
        let id = MessageId(self.next_message);
        if size > self.config.buffer_capacity {
            return Err(StoreError::CapacityExceeded {
                id,
                size,
                capacity: self.config.buffer_capacity,
            }
            .into());
        }
        self.next_message += 1;

        let message = Message::new(id, source, destinations, size, self.now());
        let reachable = message.destinations.iter().filter(|d| **d != source).count() as u64;
        let created =
            self.with_node(source, |router, env| router.on_message_created(env, message))?;

        if created {
            self.stats.messages_created += 1;
            self.stats.expected_deliveries += reachable;
            debug!(message = %id, %source, size, "Message created");
            Ok(Some(id))
        } else {
            self.stats.messages_refused += 1;
            Ok(None)
        }
    }

    /// Advance the clock by `dt`, completing transfers and ticking every node
    pub fn step(&mut self, dt: f64) -> SimResult<()> {
        let target = self.now() + dt.max(0.0);
        while let Some((connection, flight)) = self.next_completion(target) {
            self.clock.set(flight.completes_at.max(self.now()));
            self.complete_transfer(connection, flight)?;
        }
        self.clock.set(target);
        self.stats.ticks += 1;

        for node in self.node_ids() {
            let started = self.with_node(node, |router, env| router.periodic_tick(env))?;
            if let Some(intent) = started {
                self.stats.transfers_started += 1;
                trace!(%node, %intent, "Transfer started");
            }
        }
        Ok(())
    }

    /// Play a contact plan and a traffic list until `until`
    ///
    /// Contact changes and message creations due at the current time are
    /// applied before each step. Contacts still open at `until` stay open.
    pub fn run(
        &mut self,
        plan: &ContactPlan,
        traffic: &[ScheduledMessage],
        until: SimTime,
    ) -> SimResult<()> {
        let timeline = plan.timeline();
        let mut messages: Vec<&ScheduledMessage> = traffic.iter().collect();
        messages.sort_by(|x, y| x.at.total_cmp(&y.at));

        let tick = if self.config.tick_interval > 0.0 {
            self.config.tick_interval
        } else {
            1.0
        };
        let mut open: HashMap<usize, ConnectionId> = HashMap::new();
        let mut next_event = 0;
        let mut next_message = 0;

        info!(
            contacts = plan.len(),
            messages = messages.len(),
            until,
            "Running contact plan"
        );

        loop {
            let now = self.now();
            while let Some(event) = timeline.get(next_event).filter(|e| e.at() <= now) {
                self.apply_contact_event(plan, *event, &mut open)?;
                next_event += 1;
            }
            while let Some(message) = messages.get(next_message).filter(|m| m.at <= now) {
                let destinations = message.destinations.iter().copied();
                match self.create_message(message.source, destinations, message.size) {
                    Ok(_) => {}
                    Err(SimError::Store(err)) => warn!(%err, "Skipping scheduled message"),
                    Err(err) => return Err(err),
                }
                next_message += 1;
            }
            if now >= until {
                break;
            }
            self.step(tick.min(until - now))?;
        }

        info!(
            created = self.stats.messages_created,
            delivered = self.stats.first_deliveries,
            "Contact plan finished"
        );
        Ok(())
    }

    fn apply_contact_event(
        &mut self,
        plan: &ContactPlan,
        event: ContactEvent,
        open: &mut HashMap<usize, ConnectionId>,
    ) -> SimResult<()> {
        match event {
            ContactEvent::Up { contact, .. } => {
                let Some(c) = plan.get(contact) else {
                    return Ok(());
                };
                match self.connect(c.a, c.b) {
                    Ok(connection) => {
                        open.insert(contact, connection);
                    }
                    Err(SimError::AlreadyConnected(a, b)) => {
                        warn!(%a, %b, "Overlapping contacts in plan, ignoring the later one");
                    }
                    Err(err) => return Err(err),
                }
            }
            ContactEvent::Down { contact, .. } => {
                if let Some(connection) = open.remove(&contact) {
                    self.disconnect(connection)?;
                }
            }
        }
        Ok(())
    }

    /// Run `f` against a node's router with an environment for that node
    fn with_node<R>(
        &mut self,
        node: Id,
        f: impl FnOnce(&mut Router<Id>, &mut NodeEnv<'_>) -> R,
    ) -> SimResult<R> {
        let mut router = self.routers.remove(&node).ok_or(SimError::UnknownNode(node))?;
        let Some(mut host) = self.hosts.remove(&node) else {
            self.routers.insert(node, router);
            return Err(SimError::UnknownNode(node));
        };

        let result = {
            let mut env = NodeEnv {
                node,
                now: self.clock.now(),
                bandwidth: self.config.bandwidth,
                host: &mut host,
                hosts: &mut self.hosts,
                routers: &self.routers,
                links: &mut self.links,
                events: &mut self.events,
            };
            f(&mut router, &mut env)
        };

        self.hosts.insert(node, host);
        self.routers.insert(node, router);
        Ok(result)
    }

    fn connection_up(&mut self, node: Id, peer: Id, connection: ConnectionId) -> SimResult<()> {
        let mut peer_router = self.routers.remove(&peer).ok_or(SimError::UnknownNode(peer))?;
        let info = ConnectionInfo::new(connection, peer);
        let result = self.with_node(node, |router, env| {
            router.on_connection_up(env, &info, &mut peer_router)
        });
        self.routers.insert(peer, peer_router);
        result
    }

    fn connection_down(&mut self, node: Id, peer: Id, connection: ConnectionId) -> SimResult<()> {
        let peer_router = self.routers.remove(&peer).ok_or(SimError::UnknownNode(peer))?;
        let info = ConnectionInfo::new(connection, peer);
        let result = self.with_node(node, |router, env| {
            router.on_connection_down(env, &info, &peer_router)
        });
        self.routers.insert(peer, peer_router);
        result
    }

    fn next_completion(&self, until: SimTime) -> Option<(ConnectionId, InFlight)> {
        self.links
            .iter()
            .filter_map(|(id, link)| link.in_flight.map(|flight| (*id, flight)))
            .filter(|(_, flight)| flight.completes_at <= until)
            .min_by(|x, y| {
                x.1.completes_at
                    .total_cmp(&y.1.completes_at)
                    .then(x.0.cmp(&y.0))
            })
    }

    fn complete_transfer(&mut self, connection: ConnectionId, flight: InFlight) -> SimResult<()> {
        let mark = self.events.len();
        let received = self.with_node(flight.to, |router, env| {
            router.on_message_received(env, flight.message, &flight.from)
        })??;
        self.with_node(flight.from, |router, env| {
            router.on_transfer_done(env, connection)
        })??;

        if let Some(link) = self.links.get_mut(&connection) {
            link.in_flight = None;
        }
        if let Some(host) = self.hosts.get_mut(&flight.from) {
            host.sending.remove(&connection);
            host.store.unpin(&flight.message);
        }
        self.stats.transfers_completed += 1;

        let delivered = self.events[mark..]
            .iter()
            .any(|event| event.is_first_delivery());
        if delivered {
            self.stats.first_deliveries += 1;
        }
        debug!(
            %connection,
            message = %flight.message,
            from = %flight.from,
            to = %flight.to,
            hops = received.hop_count,
            delivered,
            "Transfer complete"
        );
        Ok(())
    }

    fn abort_transfer(&mut self, connection: ConnectionId, flight: InFlight) {
        if let Some(host) = self.hosts.get_mut(&flight.to) {
            host.store.discard_incoming(&flight.message, &flight.from);
        }
        if let Some(host) = self.hosts.get_mut(&flight.from) {
            host.sending.remove(&connection);
            host.store.unpin(&flight.message);
        }
        self.stats.transfers_aborted += 1;
        debug!(
            %connection,
            message = %flight.message,
            from = %flight.from,
            to = %flight.to,
            "Transfer aborted"
        );
    }
}
