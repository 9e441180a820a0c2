//! # Commune Routing
//!
//! Community-aware multicast forwarding for delay-tolerant networks.
//!
//! Nodes meet intermittently. Each node learns which peers it meets often
//! (its *familiar set*), grows a *local community* through K-Clique overlap
//! with the communities of the peers it meets, and scores multi-hop social
//! paths to community members with a path-weight formula. When contacts are
//! open, a two-stage heuristic picks which neighbors carry which buffered
//! messages.
//!
//! ## Features
//!
//! - **Forwarding controller**: [`Router`] reacts to node lifecycle callbacks
//!   and keeps the queue of outgoing `(message, connection)` intents.
//!
//! - **Exactly-once exchange**: the first endpoint to observe a contact runs
//!   the pairwise community merge and path-weight gossip for both sides.
//!
//! - **K-Clique communities**: [`community::KCliqueCommunity`] builds the
//!   local community and a forwarding table of hop weights.
//!
//! - **Relay selection**: [`relay`] packs messages into neighbor buffers by
//!   reach and admits neighbors until the target delivery probability is met.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use commune_core::{ConnectionId, ConnectionInfo, SimulationIdentity};
//! use commune_routing::{Router, RouterConfig};
//!
//! let config = RouterConfig::small_world();
//! let mut a = Router::new(SimulationIdentity::new('A').unwrap(), &config);
//! let mut b = Router::new(SimulationIdentity::new('B').unwrap(), &config);
//!
//! // The host environment drives every callback
//! a.on_connection_up(&mut env_a, &ConnectionInfo::new(ConnectionId(1), b_id), &mut b);
//! a.periodic_tick(&mut env_a);
//! ```
//!
//! ## Architecture
//!
//! - [`router`]: The forwarding controller and its intent queue
//! - [`engine`]: Contact bookkeeping, policy hooks and the path-weight cache
//! - [`community`]: Distributed community detection
//! - [`path_weight`]: Scoring of multi-hop social paths
//! - [`relay`]: Two-stage relay selection
//! - [`error`]: Router error types

pub mod community;
pub mod engine;
pub mod error;
pub mod path_weight;
pub mod relay;
pub mod router;

// Re-export main types
pub use community::{
    CommunityConfig, CommunityDetector, CommunityKind, CommunitySnapshot, FamiliarView,
    KCliqueCommunity,
};
pub use engine::{DecisionEngine, EngineKind, PathWeightEngine, PathWeightSnapshot};
pub use error::{RouterError, RouterResult};
pub use path_weight::{hop_availability, path_weight};
pub use relay::{NeighborPlan, admit_neighbors, message_cost, plan_neighbor};
pub use router::{OutgoingIntent, Router, RouterStats};

use serde::{Deserialize, Serialize};

/// Configuration for a node's router
///
/// Every node of a run is normally built from the same configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Decision engine to use
    pub engine: EngineKind,
    /// Community detection settings
    pub community: CommunityConfig,
    /// Record tombstones for messages a peer reports delivered
    pub tombstones: bool,
    /// Ask the engine whether to drop messages a peer already has
    pub delete_delivered: bool,
    /// Target delivery probability `p` of the relay heuristic
    pub admission_probability: f64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            engine: EngineKind::PathWeight,
            community: CommunityConfig::default(),
            tombstones: false,
            delete_delivered: false,
            admission_probability: 0.5,
        }
    }
}

impl RouterConfig {
    /// Dense populations with long, frequent contacts
    ///
    /// Same as the default: triangles (K = 3) and ten minutes of contact to
    /// become familiar.
    pub fn small_world() -> Self {
        Self::default()
    }

    /// Sparse populations with short contacts
    ///
    /// Pairs are enough to grow communities and familiarity comes after one
    /// minute. Tombstones keep delivered messages from circulating.
    pub fn sparse_contacts() -> Self {
        Self {
            community: CommunityConfig {
                k: 2,
                familiar_threshold: 60.0,
                message_ttl: 0.01,
                ..CommunityConfig::default()
            },
            tombstones: true,
            delete_delivered: true,
            ..Self::default()
        }
    }

    /// Tight communities and fewer relays per tick
    pub fn conservative() -> Self {
        Self {
            community: CommunityConfig {
                k: 4,
                familiar_threshold: 1200.0,
                message_ttl: 0.0005,
                ..CommunityConfig::default()
            },
            admission_probability: 0.3,
            ..Self::default()
        }
    }

    /// Validate configuration invariants
    ///
    /// Returns a list of warnings if the configuration has potential issues.
    /// An empty list means the configuration is valid.
    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        // K = 1 admits any node sharing a single member, K = 0 the same
        if self.community.k < 2 {
            warnings.push(ConfigWarning::CliqueTooSmall);
        }

        if !is_positive(self.community.familiar_threshold) {
            warnings.push(ConfigWarning::NonPositiveThreshold);
        }

        if !is_positive(self.community.message_ttl) {
            warnings.push(ConfigWarning::NonPositiveTtl);
        } else if self.community.familiar_threshold * self.community.message_ttl
            > SATURATION_EXPONENT
        {
            warnings.push(ConfigWarning::PathWeightSaturates);
        }

        if !is_positive(self.admission_probability) || self.admission_probability > 1.0 {
            warnings.push(ConfigWarning::ProbabilityOutOfRange);
        }

        warnings
    }

    /// Check if the configuration is valid (no warnings)
    pub fn is_valid(&self) -> bool {
        self.validate().is_empty()
    }
}

/// Past `h·T` of this size a hop scores 1.0 to within `1e-9`
const SATURATION_EXPONENT: f64 = 20.0;

fn is_positive(value: f64) -> bool {
    value > 0.0
}

/// Configuration warnings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigWarning {
    /// Clique size below 2
    CliqueTooSmall,
    /// Familiarity threshold is zero, negative or NaN
    NonPositiveThreshold,
    /// Message TTL is zero, negative or NaN
    NonPositiveTtl,
    /// Every familiar hop scores 1.0 under this TTL
    PathWeightSaturates,
    /// Admission probability outside (0, 1]
    ProbabilityOutOfRange,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CliqueTooSmall => {
                write!(f, "Clique size below 2 admits nodes through a single member")
            }
            Self::NonPositiveThreshold => {
                write!(f, "Familiarity threshold must be positive")
            }
            Self::NonPositiveTtl => {
                write!(f, "Message TTL must be positive")
            }
            Self::PathWeightSaturates => {
                write!(f, "Message TTL saturates path weights of familiar peers")
            }
            Self::ProbabilityOutOfRange => {
                write!(f, "Admission probability must be in (0, 1]")
            }
        }
    }
}
