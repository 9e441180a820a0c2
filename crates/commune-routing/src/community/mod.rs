//! Distributed community detection
//!
//! Each node builds its own view of the peers it is socially close to,
//! using nothing but its contact history and what peers tell it on
//! contact. There is no global coordinator.
//!
//! Key concepts:
//! - **Familiar set**: peers whose cumulative contact time exceeds a threshold
//! - **Local community**: familiar peers plus peers admitted through overlap
//!   with the familiar sets of existing members
//! - **Forwarding table**: hop weights of the best known path to each member
//!
//! Detection algorithms form a closed set selected by [`CommunityKind`].

pub mod kclique;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use commune_core::{ContactInterval, PeerIdentity};

pub use kclique::KCliqueCommunity;

/// Available community detection algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CommunityKind {
    /// Distributed K-Clique detection (Hui et al.)
    #[default]
    KClique,
}

/// Community detection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommunityConfig {
    /// Which algorithm to run
    pub kind: CommunityKind,
    /// Clique size K; a candidate needs K-1 familiars in common
    pub k: u32,
    /// Cumulative contact duration (seconds) a peer must exceed to become familiar
    pub familiar_threshold: f64,
    /// Time scale `T` of the path-weight formula, per second of contact
    ///
    /// A single hop of `h` seconds scores `1 - e^(-h·T)`. Keep `T` near one
    /// over the familiarity threshold: much larger and every familiar hop
    /// scores 1.0, so neighbors can no longer be ranked.
    pub message_ttl: f64,
}

impl Default for CommunityConfig {
    fn default() -> Self {
        Self {
            kind: CommunityKind::KClique,
            k: 3,
            familiar_threshold: 600.0,
            message_ttl: 0.001,
        }
    }
}

/// One node's familiar set together with its edge weights
///
/// Edge weight is the cumulative contact duration at the moment the peer
/// became familiar. Familiar sets only grow, so a larger view of the same
/// node is always the more recent one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "I: PeerIdentity")]
pub struct FamiliarView<I: PeerIdentity> {
    edges: BTreeMap<I, f64>,
}

impl<I: PeerIdentity> FamiliarView<I> {
    /// Create an empty view
    pub fn new() -> Self {
        Self {
            edges: BTreeMap::new(),
        }
    }

    /// Build a view from `(peer, edge weight)` pairs
    pub fn from_edges(edges: impl IntoIterator<Item = (I, f64)>) -> Self {
        Self {
            edges: edges.into_iter().collect(),
        }
    }

    pub(crate) fn insert(&mut self, peer: I, weight: f64) {
        self.edges.insert(peer, weight);
    }

    /// Check if a peer is familiar
    pub fn contains(&self, peer: &I) -> bool {
        self.edges.contains_key(peer)
    }

    /// Edge weight to a familiar peer
    pub fn edge_weight(&self, peer: &I) -> Option<f64> {
        self.edges.get(peer).copied()
    }

    /// Iterate `(peer, edge weight)` in identity order
    pub fn iter(&self) -> impl Iterator<Item = (&I, f64)> + '_ {
        self.edges.iter().map(|(peer, w)| (peer, *w))
    }

    /// Familiar peers in identity order
    pub fn members(&self) -> impl Iterator<Item = &I> + '_ {
        self.edges.keys()
    }

    /// Number of familiar peers
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    /// Check if the view is empty
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

impl<I: PeerIdentity> Default for FamiliarView<I> {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable copy of a node's community state, taken before an exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "I: PeerIdentity")]
pub struct CommunitySnapshot<I: PeerIdentity> {
    /// Node this snapshot belongs to
    pub node: I,
    /// The node's own familiar set
    pub familiar: FamiliarView<I>,
    /// The node's local community (includes the node)
    pub community: BTreeSet<I>,
    /// The node's views of its community members' familiar sets
    pub views: BTreeMap<I, FamiliarView<I>>,
}

/// Community detector selected at configuration time
#[derive(Debug, Clone)]
pub enum CommunityDetector<I: PeerIdentity> {
    KClique(KCliqueCommunity<I>),
}

impl<I: PeerIdentity> CommunityDetector<I> {
    /// Build a fresh detector for a node
    pub fn new(local_id: I, config: &CommunityConfig) -> Self {
        match config.kind {
            CommunityKind::KClique => Self::KClique(KCliqueCommunity::new(local_id, config)),
        }
    }

    /// A contact with `peer` ended; `history` holds every contact with it
    pub fn connection_lost(
        &mut self,
        peer: &I,
        history: &[ContactInterval],
        peer_view: &FamiliarView<I>,
    ) -> bool {
        match self {
            Self::KClique(c) => c.connection_lost(peer, history, peer_view),
        }
    }

    /// Merge with a peer's pre-exchange snapshot; returns admitted members
    pub fn new_connection(&mut self, peer: &CommunitySnapshot<I>) -> Vec<I> {
        match self {
            Self::KClique(c) => c.new_connection(peer),
        }
    }

    /// Check if a node belongs to the local community
    pub fn is_member(&self, node: &I) -> bool {
        match self {
            Self::KClique(c) => c.is_member(node),
        }
    }

    /// The local community
    pub fn local_community(&self) -> &BTreeSet<I> {
        match self {
            Self::KClique(c) => c.local_community(),
        }
    }

    /// Copy of this node's familiar set
    pub fn familiar_view(&self) -> FamiliarView<I> {
        match self {
            Self::KClique(c) => c.familiar_view(),
        }
    }

    /// Path weight of the best known route to a member
    pub fn path_weight(&self, member: &I) -> Option<f64> {
        match self {
            Self::KClique(c) => c.path_weight(member),
        }
    }

    /// Hop weights of the best known route to a member
    pub fn route(&self, member: &I) -> Option<&[f64]> {
        match self {
            Self::KClique(c) => c.forwarding_route(member),
        }
    }

    /// Immutable copy of the detector state
    pub fn snapshot(&self) -> CommunitySnapshot<I> {
        match self {
            Self::KClique(c) => c.snapshot(),
        }
    }
}
