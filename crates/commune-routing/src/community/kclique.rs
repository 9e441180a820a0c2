//! Distributed K-Clique community detection
//!
//! A peer becomes *familiar* once the cumulative duration of all contacts
//! with it exceeds the familiarity threshold. Familiar peers join the local
//! community immediately. Any other node is admitted once at least `K - 1`
//! of its familiars are already community members, which makes the local
//! community the union of K-cliques around this node.
//!
//! Alongside membership every node keeps a forwarding table: for each
//! member, the hop weights of the best known path to it, scored with
//! [`path_weight`](crate::path_weight::path_weight).

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, trace};

use commune_core::{ContactInterval, PeerIdentity, total_contact_time};

use super::{CommunityConfig, CommunitySnapshot, FamiliarView};
use crate::path_weight::path_weight;

/// K-Clique detector state of one node
#[derive(Debug, Clone)]
pub struct KCliqueCommunity<I: PeerIdentity> {
    local_id: I,
    k: u32,
    familiar_threshold: f64,
    message_ttl: f64,
    /// Familiar set with edge weights
    familiar: FamiliarView<I>,
    /// Local community, always contains `local_id`
    local_community: BTreeSet<I>,
    /// Last known familiar set of each member
    views: BTreeMap<I, FamiliarView<I>>,
    /// Best known hop weights to each member
    forwarding: BTreeMap<I, Vec<f64>>,
}

impl<I: PeerIdentity> KCliqueCommunity<I> {
    /// Create a detector whose community holds only the local node
    pub fn new(local_id: I, config: &CommunityConfig) -> Self {
        let mut local_community = BTreeSet::new();
        local_community.insert(local_id.clone());
        Self {
            local_id,
            k: config.k,
            familiar_threshold: config.familiar_threshold,
            message_ttl: config.message_ttl,
            familiar: FamiliarView::new(),
            local_community,
            views: BTreeMap::new(),
            forwarding: BTreeMap::new(),
        }
    }

    /// Update familiarity after a contact with `peer` ended
    ///
    /// `history` holds every finished contact with the peer including the
    /// one that just ended. Returns true if the peer became familiar.
    pub fn connection_lost(
        &mut self,
        peer: &I,
        history: &[ContactInterval],
        peer_view: &FamiliarView<I>,
    ) -> bool {
        if *peer == self.local_id || self.familiar.contains(peer) {
            return false;
        }

        let total = total_contact_time(history);
        if total <= self.familiar_threshold {
            trace!(
                node = %self.local_id,
                peer = %peer,
                total,
                threshold = self.familiar_threshold,
                "Contact time below familiarity threshold"
            );
            return false;
        }

        self.familiar.insert(peer.clone(), total);
        self.local_community.insert(peer.clone());
        self.views.insert(peer.clone(), peer_view.clone());
        self.forwarding.insert(peer.clone(), vec![total]);

        debug!(
            node = %self.local_id,
            peer = %peer,
            edge_weight = total,
            "Peer became familiar"
        );
        true
    }

    /// Merge with a peer's community state at the start of a contact
    ///
    /// `peer` must be taken before either side changed anything during the
    /// current exchange. Returns the nodes admitted to the local community,
    /// the peer itself first.
    pub fn new_connection(&mut self, peer: &CommunitySnapshot<I>) -> Vec<I> {
        let mut admitted = Vec::new();
        if peer.node == self.local_id {
            return admitted;
        }

        self.refresh_views(peer);

        if self.local_community.contains(&peer.node) {
            return admitted;
        }

        let Some(route) = self.admission_route(&peer.familiar) else {
            return admitted;
        };
        self.admit(peer.node.clone(), route, peer.familiar.clone());
        admitted.push(peer.node.clone());

        // Members of the peer's community may now qualify through it
        for member in &peer.community {
            if *member == self.local_id
                || *member == peer.node
                || self.local_community.contains(member)
            {
                continue;
            }
            let Some(view) = peer.views.get(member) else {
                continue;
            };
            if let Some(route) = self.admission_route(view) {
                self.admit(member.clone(), route, view.clone());
                admitted.push(member.clone());
            }
        }

        admitted
    }

    /// Adopt newer familiar-set views for nodes already in the community
    fn refresh_views(&mut self, peer: &CommunitySnapshot<I>) {
        if self.local_community.contains(&peer.node) {
            self.adopt_view(&peer.node, &peer.familiar);
        }
        for (member, view) in &peer.views {
            if *member != self.local_id && self.local_community.contains(member) {
                self.adopt_view(member, view);
            }
        }
    }

    fn adopt_view(&mut self, member: &I, view: &FamiliarView<I>) {
        let stale = self
            .views
            .get(member)
            .is_none_or(|ours| ours.len() < view.len());
        if stale {
            self.views.insert(member.clone(), view.clone());
        }
    }

    /// Best route to a candidate whose familiar set is `candidate_familiar`
    ///
    /// Returns None unless at least `K - 1` of the candidate's familiars are
    /// members here and at least one of them has a known route.
    fn admission_route(&self, candidate_familiar: &FamiliarView<I>) -> Option<Vec<f64>> {
        let mut common = 0u32;
        let mut best: Option<(f64, Vec<f64>)> = None;

        for (member, edge) in candidate_familiar.iter() {
            if !self.local_community.contains(member) {
                continue;
            }
            common += 1;

            let Some(mut route) = self.route_to(member) else {
                continue;
            };
            route.push(edge);
            let score = path_weight(&route, self.message_ttl);
            if best.as_ref().is_none_or(|(top, _)| score > *top) {
                best = Some((score, route));
            }
        }

        if common < self.k.saturating_sub(1) {
            trace!(
                node = %self.local_id,
                common,
                k = self.k,
                "Not enough common members for admission"
            );
            return None;
        }
        best.map(|(_, route)| route)
    }

    /// Hop weights to a member; the local node is reached with zero hops
    fn route_to(&self, member: &I) -> Option<Vec<f64>> {
        if *member == self.local_id {
            Some(Vec::new())
        } else {
            self.forwarding.get(member).cloned()
        }
    }

    fn admit(&mut self, member: I, route: Vec<f64>, view: FamiliarView<I>) {
        debug!(
            node = %self.local_id,
            member = %member,
            hops = route.len(),
            "Admitted to local community"
        );
        self.local_community.insert(member.clone());
        self.views.insert(member.clone(), view);
        self.forwarding.insert(member, route);
    }

    /// The local node
    pub fn local_id(&self) -> &I {
        &self.local_id
    }

    /// Clique size K
    pub fn k(&self) -> u32 {
        self.k
    }

    /// Check if a peer is familiar
    pub fn is_familiar(&self, peer: &I) -> bool {
        self.familiar.contains(peer)
    }

    /// Check if a node is a community member
    pub fn is_member(&self, node: &I) -> bool {
        self.local_community.contains(node)
    }

    /// The local community
    pub fn local_community(&self) -> &BTreeSet<I> {
        &self.local_community
    }

    /// Copy of the familiar set
    pub fn familiar_view(&self) -> FamiliarView<I> {
        self.familiar.clone()
    }

    /// Last known familiar set of a member
    pub fn view_of(&self, member: &I) -> Option<&FamiliarView<I>> {
        self.views.get(member)
    }

    /// Hop weights of the best known route to a member
    pub fn forwarding_route(&self, member: &I) -> Option<&[f64]> {
        self.forwarding.get(member).map(Vec::as_slice)
    }

    /// Path weight to a member other than the local node
    pub fn path_weight(&self, member: &I) -> Option<f64> {
        self.forwarding
            .get(member)
            .map(|hops| path_weight(hops, self.message_ttl))
    }

    /// Immutable copy of the detector state
    pub fn snapshot(&self) -> CommunitySnapshot<I> {
        CommunitySnapshot {
            node: self.local_id.clone(),
            familiar: self.familiar.clone(),
            community: self.local_community.clone(),
            views: self.views.clone(),
        }
    }
}
