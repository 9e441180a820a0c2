//! # Commune Simulation
//!
//! A discrete-time harness for community-aware DTN forwarding.
//!
//! The harness plays the role of the host node for every router: it owns the
//! message buffers, the links between nodes and the clock, and calls each
//! router's lifecycle callbacks as contacts open and close.
//!
//! ## Running a world
//!
//! 1. Build a [`SimWorld`] with a [`SimConfig`] and a set of nodes
//! 2. Describe who meets when with a [`ContactPlan`], either scripted or
//!    drawn over a [`ContactGraph`]
//! 3. Schedule messages and call [`SimWorld::run`]
//! 4. Summarize the result with a [`SimReport`]
//!
//! ## Timing model
//!
//! Time advances in fixed ticks. A transfer of `size` bytes started at `t`
//! completes at `t + size / bandwidth`; completions due inside a tick are
//! processed in time order before the tick's periodic updates. A link
//! carries one transfer at a time and a closing contact aborts it.

pub mod error;
pub mod report;
pub mod scenarios;
pub mod schedule;
pub mod store;
pub mod topology;
pub mod world;

// Re-export main types
pub use error::{SimError, SimResult};
pub use report::{NodeSummary, SimReport};
pub use schedule::{
    Contact, ContactEvent, ContactPlan, RandomContacts, RandomTraffic, ScheduledMessage,
};
pub use store::BufferStore;
pub use topology::{ContactGraph, GraphBuilder, TopologyKind, from_edges};
pub use world::{SimConfig, SimStats, SimWorld};

// Re-export core types for integration
pub use commune_core::SimulationIdentity;
