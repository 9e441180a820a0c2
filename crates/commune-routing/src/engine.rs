//! Path-weight decision engine
//!
//! The engine owns a node's contact bookkeeping, its community detector and
//! its path-weight cache, and answers the router's policy questions.
//!
//! On every contact the two engines involved run a single pairwise
//! exchange: path-weight caches are reconciled by max-consensus and each
//! side merges the other's community snapshot. Both steps read only the
//! state the two sides had before the exchange began.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, trace, warn};

use commune_core::{ContactInterval, Message, PeerIdentity, SimTime};

use crate::RouterConfig;
use crate::community::{CommunityDetector, FamiliarView};

/// Available decision engines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EngineKind {
    /// Community-aware path-weight forwarding
    #[default]
    PathWeight,
}

/// Copy of an engine's path-weight cache, read by peers estimating costs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "I: PeerIdentity")]
pub struct PathWeightSnapshot<I: PeerIdentity> {
    /// Node the cache belongs to
    pub node: I,
    /// Cached path weight per community member
    pub weights: BTreeMap<I, f64>,
}

impl<I: PeerIdentity> PathWeightSnapshot<I> {
    /// Cached path weight for a node, if known
    pub fn get(&self, node: &I) -> Option<f64> {
        self.weights.get(node).copied()
    }
}

/// Decision engine selected at configuration time
#[derive(Debug, Clone)]
pub enum DecisionEngine<I: PeerIdentity> {
    PathWeight(PathWeightEngine<I>),
}

impl<I: PeerIdentity> DecisionEngine<I> {
    /// Build a fresh engine for a node
    pub fn new(local_id: I, config: &RouterConfig) -> Self {
        match config.engine {
            EngineKind::PathWeight => Self::PathWeight(PathWeightEngine::new(local_id, config)),
        }
    }

    /// Run the one-time pairwise exchange between two engines
    ///
    /// Returns how many nodes were admitted to either local community.
    pub fn exchange(a: &mut Self, b: &mut Self, now: SimTime) -> usize {
        match (a, b) {
            (Self::PathWeight(a), Self::PathWeight(b)) => PathWeightEngine::exchange(a, b, now),
        }
    }

    pub fn local_id(&self) -> &I {
        match self {
            Self::PathWeight(e) => e.local_id(),
        }
    }

    pub fn connection_up(&mut self, peer: &I, now: SimTime) {
        match self {
            Self::PathWeight(e) => e.connection_up(peer, now),
        }
    }

    pub fn connection_down(&mut self, peer: &I, now: SimTime, peer_view: &FamiliarView<I>) {
        match self {
            Self::PathWeight(e) => e.connection_down(peer, now, peer_view),
        }
    }

    pub fn new_message(&self, message: &Message<I>) -> bool {
        match self {
            Self::PathWeight(e) => e.new_message(message),
        }
    }

    pub fn is_final_dest(&self, message: &Message<I>, host: &I) -> bool {
        match self {
            Self::PathWeight(e) => e.is_final_dest(message, host),
        }
    }

    pub fn should_save_received_message(&self, message: &Message<I>, host: &I) -> bool {
        match self {
            Self::PathWeight(e) => e.should_save_received_message(message, host),
        }
    }

    pub fn should_send_message_to_host(&self, message: &Message<I>, host: &I) -> bool {
        match self {
            Self::PathWeight(e) => e.should_send_message_to_host(message, host),
        }
    }

    pub fn should_delete_sent_message(&self, message: &Message<I>, host: &I) -> bool {
        match self {
            Self::PathWeight(e) => e.should_delete_sent_message(message, host),
        }
    }

    pub fn should_delete_old_message(&self, message: &Message<I>, host: &I) -> bool {
        match self {
            Self::PathWeight(e) => e.should_delete_old_message(message, host),
        }
    }

    /// Cached path weight to a node, None if unknown
    pub fn path_weight(&self, node: &I) -> Option<f64> {
        match self {
            Self::PathWeight(e) => e.path_weight(node),
        }
    }

    pub fn snapshot(&self) -> PathWeightSnapshot<I> {
        match self {
            Self::PathWeight(e) => e.snapshot(),
        }
    }

    pub fn familiar_view(&self) -> FamiliarView<I> {
        match self {
            Self::PathWeight(e) => e.community().familiar_view(),
        }
    }

    pub fn community(&self) -> &CommunityDetector<I> {
        match self {
            Self::PathWeight(e) => e.community(),
        }
    }
}

/// Engine state of one node
#[derive(Debug, Clone)]
pub struct PathWeightEngine<I: PeerIdentity> {
    local_id: I,
    community: CommunityDetector<I>,
    /// Start of the ongoing contact with each connected peer
    contact_starts: BTreeMap<I, SimTime>,
    /// Finished contacts per peer
    history: BTreeMap<I, Vec<ContactInterval>>,
    /// Path weight per community member, local node excluded
    path_weights: BTreeMap<I, f64>,
}

impl<I: PeerIdentity> PathWeightEngine<I> {
    pub fn new(local_id: I, config: &RouterConfig) -> Self {
        Self {
            community: CommunityDetector::new(local_id.clone(), &config.community),
            local_id,
            contact_starts: BTreeMap::new(),
            history: BTreeMap::new(),
            path_weights: BTreeMap::new(),
        }
    }

    pub fn local_id(&self) -> &I {
        &self.local_id
    }

    pub fn community(&self) -> &CommunityDetector<I> {
        &self.community
    }

    /// Record the start of a contact unless the exchange already did
    pub fn connection_up(&mut self, peer: &I, now: SimTime) {
        self.contact_starts.entry(peer.clone()).or_insert(now);
    }

    /// Close the contact with `peer` and update familiarity
    #[instrument(skip(self, peer_view), fields(node = %self.local_id))]
    pub fn connection_down(&mut self, peer: &I, now: SimTime, peer_view: &FamiliarView<I>) {
        match self.contact_starts.remove(peer) {
            Some(start) => {
                if now > start {
                    self.history
                        .entry(peer.clone())
                        .or_default()
                        .push(ContactInterval::new(start, now));
                }
            }
            None => warn!(peer = %peer, "Contact ended without a recorded start"),
        }

        let history = self.history.get(peer).map(Vec::as_slice).unwrap_or(&[]);
        if self.community.connection_lost(peer, history, peer_view) {
            let added = self.refresh_path_weights();
            debug!(peer = %peer, added, "Familiar set grew");
        }
    }

    /// Pairwise exchange between two engines at the start of a contact
    pub fn exchange(a: &mut Self, b: &mut Self, now: SimTime) -> usize {
        a.contact_starts.insert(b.local_id.clone(), now);
        b.contact_starts.insert(a.local_id.clone(), now);

        let a_weights = a.path_weights.clone();
        let b_weights = b.path_weights.clone();
        a.adopt_higher(&b_weights);
        b.adopt_higher(&a_weights);

        let a_snapshot = a.community.snapshot();
        let b_snapshot = b.community.snapshot();
        let admitted_by_a = a.community.new_connection(&b_snapshot);
        let admitted_by_b = b.community.new_connection(&a_snapshot);

        a.refresh_path_weights();
        b.refresh_path_weights();

        debug!(
            a = %a.local_id,
            b = %b.local_id,
            admitted_by_a = admitted_by_a.len(),
            admitted_by_b = admitted_by_b.len(),
            "Exchange complete"
        );
        admitted_by_a.len() + admitted_by_b.len()
    }

    /// Max-consensus on keys both caches share
    fn adopt_higher(&mut self, other: &BTreeMap<I, f64>) {
        for (node, theirs) in other {
            if let Some(ours) = self.path_weights.get_mut(node)
                && *theirs > *ours
            {
                trace!(node = %node, ours = *ours, theirs = *theirs, "Adopting higher path weight");
                *ours = *theirs;
            }
        }
    }

    /// Cache a path weight for every community member that has none yet
    fn refresh_path_weights(&mut self) -> usize {
        let mut added = 0;
        for member in self.community.local_community() {
            if *member == self.local_id || self.path_weights.contains_key(member) {
                continue;
            }
            if let Some(weight) = self.community.path_weight(member) {
                self.path_weights.insert(member.clone(), weight);
                added += 1;
            }
        }
        added
    }

    pub fn new_message(&self, _message: &Message<I>) -> bool {
        true
    }

    pub fn is_final_dest(&self, message: &Message<I>, host: &I) -> bool {
        message.is_destined_for(host)
    }

    /// Keep a received copy only at nodes that are not destinations
    pub fn should_save_received_message(&self, message: &Message<I>, host: &I) -> bool {
        !message.is_destined_for(host)
    }

    pub fn should_send_message_to_host(&self, _message: &Message<I>, _host: &I) -> bool {
        false
    }

    pub fn should_delete_sent_message(&self, _message: &Message<I>, _host: &I) -> bool {
        false
    }

    pub fn should_delete_old_message(&self, _message: &Message<I>, _host: &I) -> bool {
        false
    }

    pub fn path_weight(&self, node: &I) -> Option<f64> {
        self.path_weights.get(node).copied()
    }

    pub fn snapshot(&self) -> PathWeightSnapshot<I> {
        PathWeightSnapshot {
            node: self.local_id.clone(),
            weights: self.path_weights.clone(),
        }
    }

    /// Finished contacts with a peer
    pub fn contact_history(&self, peer: &I) -> &[ContactInterval] {
        self.history.get(peer).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Check if a contact with the peer is ongoing
    pub fn in_contact_with(&self, peer: &I) -> bool {
        self.contact_starts.contains_key(peer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::community::CommunityConfig;
    use commune_core::{MessageId, SimulationIdentity};

    fn make_id(c: char) -> SimulationIdentity {
        SimulationIdentity::new(c).unwrap()
    }

    fn config(k: u32, threshold: f64) -> RouterConfig {
        RouterConfig {
            community: CommunityConfig {
                k,
                familiar_threshold: threshold,
                message_ttl: 0.01,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn engine(c: char, k: u32) -> PathWeightEngine<SimulationIdentity> {
        PathWeightEngine::new(make_id(c), &config(k, 50.0))
    }

    /// Run a full contact between two engines
    fn contact(
        a: &mut PathWeightEngine<SimulationIdentity>,
        b: &mut PathWeightEngine<SimulationIdentity>,
        start: SimTime,
        end: SimTime,
    ) {
        a.connection_up(&b.local_id.clone(), start);
        PathWeightEngine::exchange(a, b, start);
        b.connection_up(&a.local_id.clone(), start);

        let a_view = a.community().familiar_view();
        let b_view = b.community().familiar_view();
        a.connection_down(&b.local_id.clone(), end, &b_view);
        b.connection_down(&a.local_id.clone(), end, &a_view);
    }

    #[test]
    fn test_familiarity_scenario() {
        let mut a = engine('A', 3);
        let mut b = engine('B', 3);
        contact(&mut a, &mut b, 0.0, 100.0);

        for (node, peer) in [(&a, 'B'), (&b, 'A')] {
            let detector = node.community();
            assert!(detector.familiar_view().contains(&make_id(peer)));
            assert!(detector.is_member(&make_id(peer)));
            assert_eq!(detector.route(&make_id(peer)), Some(&[100.0][..]));
            assert!(node.path_weight(&make_id(peer)).is_some());
        }
        assert_eq!(a.contact_history(&make_id('B')), &[ContactInterval::new(0.0, 100.0)]);
        assert!(!a.in_contact_with(&make_id('B')));
    }

    #[test]
    fn test_short_contacts_accumulate() {
        let mut a = engine('A', 3);
        let mut b = engine('B', 3);
        contact(&mut a, &mut b, 0.0, 30.0);
        assert!(!a.community().is_member(&make_id('B')));

        contact(&mut a, &mut b, 100.0, 130.0);
        assert!(a.community().is_member(&make_id('B')));
        assert_eq!(a.community().route(&make_id('B')), Some(&[60.0][..]));
    }

    #[test]
    fn test_missing_start_skips_history() {
        let mut a = engine('A', 3);
        a.connection_down(&make_id('B'), 500.0, &FamiliarView::new());
        assert!(a.contact_history(&make_id('B')).is_empty());
        assert!(!a.community().is_member(&make_id('B')));
    }

    #[test]
    fn test_connection_up_keeps_exchange_start() {
        let mut a = engine('A', 3);
        let mut b = engine('B', 3);
        PathWeightEngine::exchange(&mut a, &mut b, 10.0);
        a.connection_up(&make_id('B'), 12.0);

        a.connection_down(&make_id('B'), 20.0, &FamiliarView::new());
        assert_eq!(a.contact_history(&make_id('B')), &[ContactInterval::new(10.0, 20.0)]);
    }

    #[test]
    fn test_gossip_adopts_higher_shared_values() {
        let mut a = engine('A', 3);
        let mut b = engine('B', 3);
        a.path_weights.insert(make_id('C'), 0.3);
        a.path_weights.insert(make_id('D'), 0.9);
        b.path_weights.insert(make_id('C'), 0.7);
        b.path_weights.insert(make_id('D'), 0.1);
        b.path_weights.insert(make_id('E'), 0.5);

        PathWeightEngine::exchange(&mut a, &mut b, 0.0);

        assert_eq!(a.path_weight(&make_id('C')), Some(0.7));
        assert_eq!(a.path_weight(&make_id('D')), Some(0.9));
        assert_eq!(b.path_weight(&make_id('D')), Some(0.9));
        // Unshared keys are not copied over
        assert_eq!(a.path_weight(&make_id('E')), None);
    }

    #[test]
    fn test_exchange_admits_through_common_member() {
        let mut a = engine('A', 2);
        let mut b = engine('B', 2);
        let mut c = engine('C', 2);
        contact(&mut a, &mut c, 0.0, 100.0);
        contact(&mut b, &mut c, 200.0, 400.0);

        a.connection_up(&make_id('B'), 500.0);
        let admitted = PathWeightEngine::exchange(&mut a, &mut b, 500.0);
        assert_eq!(admitted, 2);
        assert_eq!(a.community().route(&make_id('B')), Some(&[100.0, 200.0][..]));
        assert_eq!(b.community().route(&make_id('A')), Some(&[200.0, 100.0][..]));
        assert!(a.path_weight(&make_id('B')).is_some());
        assert!(b.path_weight(&make_id('A')).is_some());
    }

    #[test]
    fn test_default_policy() {
        let e = engine('A', 3);
        let msg = Message::new(MessageId(1), make_id('A'), [make_id('C')], 10, 0.0);
        assert!(e.new_message(&msg));
        assert!(e.is_final_dest(&msg, &make_id('C')));
        assert!(!e.is_final_dest(&msg, &make_id('B')));
        assert!(e.should_save_received_message(&msg, &make_id('B')));
        assert!(!e.should_save_received_message(&msg, &make_id('C')));
        assert!(!e.should_send_message_to_host(&msg, &make_id('B')));
        assert!(!e.should_delete_sent_message(&msg, &make_id('B')));
        assert!(!e.should_delete_old_message(&msg, &make_id('B')));
    }

    #[test]
    fn test_snapshot_copies_cache() {
        let mut a = engine('A', 3);
        a.path_weights.insert(make_id('C'), 0.4);
        let snapshot = a.snapshot();
        a.path_weights.insert(make_id('C'), 0.8);
        assert_eq!(snapshot.get(&make_id('C')), Some(0.4));
        assert_eq!(snapshot.node, make_id('A'));
    }

    #[test]
    fn test_enum_dispatch() {
        let mut a = DecisionEngine::new(make_id('A'), &config(3, 50.0));
        let mut b = DecisionEngine::new(make_id('B'), &config(3, 50.0));
        a.connection_up(&make_id('B'), 0.0);
        DecisionEngine::exchange(&mut a, &mut b, 0.0);
        a.connection_down(&make_id('B'), 80.0, &b.familiar_view());
        assert!(a.community().is_member(&make_id('B')));
        assert_eq!(a.local_id(), &make_id('A'));
    }
}
