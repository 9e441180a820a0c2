//! Run reports
//!
//! A [`SimReport`] summarizes a finished run: delivery ratio, latency and
//! per-node community state. It serializes to JSON for offline analysis.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use commune_core::{MessageId, MessageStore, RoutingEvent, SimTime, SimulationIdentity};
use commune_routing::{RouterConfig, RouterStats};

use crate::world::{SimStats, SimWorld};

type Id = SimulationIdentity;

/// Final state of one node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSummary {
    pub node: Id,
    pub familiar: Vec<Id>,
    pub community: Vec<Id>,
    /// Cached path weight per community member
    pub path_weights: Vec<(Id, f64)>,
    pub buffered: usize,
    pub buffer_used: u64,
    pub delivered: usize,
    pub router: RouterStats,
}

/// Summary of a finished run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimReport {
    pub scenario: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Simulated seconds covered by the run
    pub sim_time: SimTime,
    pub config: RouterConfig,
    pub stats: SimStats,
    /// First deliveries over `(message, destination)` pairs
    pub delivery_ratio: f64,
    /// Mean seconds from creation to first delivery
    pub mean_latency: Option<f64>,
    pub nodes: Vec<NodeSummary>,
}

impl SimReport {
    /// Build a report from a world that finished running
    pub fn from_world(
        scenario: impl Into<String>,
        started_at: DateTime<Utc>,
        world: &SimWorld,
    ) -> Self {
        let stats = world.stats().clone();
        let delivery_ratio = if stats.expected_deliveries == 0 {
            0.0
        } else {
            stats.first_deliveries as f64 / stats.expected_deliveries as f64
        };

        Self {
            scenario: scenario.into(),
            started_at,
            finished_at: Utc::now(),
            sim_time: world.now(),
            config: world.config().router.clone(),
            stats,
            delivery_ratio,
            mean_latency: mean_latency(world.events()),
            nodes: world
                .node_ids()
                .iter()
                .filter_map(|node| node_summary(world, node))
                .collect(),
        }
    }

    /// Human readable summary
    pub fn summary(&self) -> String {
        let mut output = String::new();
        output.push_str(&format!("=== {} ===\n", self.scenario));
        output.push_str(&format!("  Simulated time: {:.0}s\n", self.sim_time));
        output.push_str(&format!(
            "  Contacts: {} opened, {} closed\n",
            self.stats.contacts_opened, self.stats.contacts_closed
        ));
        output.push_str(&format!(
            "  Messages: {} created, {} refused\n",
            self.stats.messages_created, self.stats.messages_refused
        ));
        output.push_str(&format!(
            "  Transfers: {} started, {} completed, {} aborted\n",
            self.stats.transfers_started,
            self.stats.transfers_completed,
            self.stats.transfers_aborted
        ));
        output.push_str(&format!(
            "  Deliveries: {}/{} ({:.1}%)\n",
            self.stats.first_deliveries,
            self.stats.expected_deliveries,
            self.delivery_ratio * 100.0
        ));
        if let Some(latency) = self.mean_latency {
            output.push_str(&format!("  Mean latency: {latency:.1}s\n"));
        }

        output.push_str("\n  Communities:\n");
        for node in &self.nodes {
            let community: Vec<String> = node.community.iter().map(|n| n.to_string()).collect();
            let familiar: Vec<String> = node.familiar.iter().map(|n| n.to_string()).collect();
            output.push_str(&format!(
                "    {}: C=[{}] F=[{}] buffered={}\n",
                node.node,
                community.join(", "),
                familiar.join(", "),
                node.buffered
            ));
        }
        output
    }
}

fn node_summary(world: &SimWorld, node: &Id) -> Option<NodeSummary> {
    let router = world.router(node)?;
    let store = world.store(node)?;
    let community = router.engine().community();

    let mut familiar: Vec<Id> = community.familiar_view().members().copied().collect();
    familiar.sort();

    Some(NodeSummary {
        node: *node,
        familiar,
        community: community.local_community().iter().copied().collect(),
        path_weights: router.engine().snapshot().weights.into_iter().collect(),
        buffered: store.len(),
        buffer_used: store.used(),
        delivered: store.delivered().len(),
        router: router.stats().clone(),
    })
}

/// Mean time from creation to first delivery over every delivered pair
fn mean_latency(events: &[RoutingEvent<Id>]) -> Option<f64> {
    let mut created: HashMap<MessageId, SimTime> = HashMap::new();
    let mut total = 0.0;
    let mut count = 0usize;

    for event in events {
        match event {
            RoutingEvent::MessageCreated { message, at, .. } => {
                created.insert(*message, *at);
            }
            RoutingEvent::MessageTransferred {
                message,
                first_delivery: true,
                at,
                ..
            } => {
                if let Some(start) = created.get(message) {
                    total += at - start;
                    count += 1;
                }
            }
            _ => {}
        }
    }

    (count > 0).then(|| total / count as f64)
}
