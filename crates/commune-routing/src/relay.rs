//! Two-stage relay selection
//!
//! Stage 1 plans, for every open connection on its own, which buffered
//! messages the neighbor should carry: messages are ranked by how well the
//! neighbor reaches their destinations and packed greedily into the
//! neighbor's free buffer. The same pass yields a neighbor weight,
//! `1 - load`, where load is the mean cost over all local messages.
//!
//! Stage 2 walks the neighbors in ascending weight order and keeps admitting
//! them while the running product of their weights stays above `1 - p`.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use commune_core::{ConnectionId, Message, MessageId, NeighborView, PeerIdentity};

/// Stage-1 result for one neighbor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeighborPlan {
    /// Connection to the neighbor
    pub connection: ConnectionId,
    /// `1 - load`
    pub weight: f64,
    /// Messages admitted for this neighbor, best cost first
    pub candidates: Vec<MessageId>,
}

/// Mean path weight the neighbor reports for a message's destinations
///
/// Destinations the neighbor has no path weight for are ignored. Returns
/// None when the neighbor knows none of them.
pub fn message_cost<I: PeerIdentity>(
    message: &Message<I>,
    neighbor: &NeighborView<I>,
) -> Option<f64> {
    let known: Vec<f64> = message
        .destinations
        .iter()
        .filter_map(|dest| neighbor.path_weight(dest))
        .collect();

    if known.is_empty() {
        None
    } else {
        Some(known.iter().sum::<f64>() / known.len() as f64)
    }
}

/// Stage 1 for a single neighbor
///
/// `messages` is the whole local buffer. Unreachable messages count as zero
/// towards the load and are tried last.
pub fn plan_neighbor<I: PeerIdentity>(
    connection: ConnectionId,
    messages: &[&Message<I>],
    neighbor: &NeighborView<I>,
) -> NeighborPlan {
    let mut ranked: Vec<(Option<f64>, &Message<I>)> = messages
        .iter()
        .map(|m| (message_cost(m, neighbor), *m))
        .collect();

    let load = if ranked.is_empty() {
        0.0
    } else {
        ranked.iter().filter_map(|(cost, _)| *cost).sum::<f64>() / ranked.len() as f64
    };

    ranked.sort_by(|(a, _), (b, _)| by_cost_descending(*a, *b));

    let mut budget = neighbor.free_buffer;
    let mut candidates = Vec::new();
    for (_, message) in ranked {
        if budget > message.size.saturating_add(1) && !neighbor.holds(&message.id) {
            budget -= message.size;
            candidates.push(message.id);
        }
    }

    NeighborPlan {
        connection,
        weight: 1.0 - load,
        candidates,
    }
}

fn by_cost_descending(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => b.total_cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Stage 2: choose which neighbors' plans are merged into the queue
///
/// Neighbors are visited lowest weight first; ties keep their input order.
pub fn admit_neighbors(
    mut plans: Vec<NeighborPlan>,
    admission_probability: f64,
) -> Vec<NeighborPlan> {
    plans.sort_by(|a, b| a.weight.total_cmp(&b.weight));

    let floor = 1.0 - admission_probability;
    let mut q = 1.0;
    let mut admitted = Vec::new();
    for plan in plans {
        if q <= floor {
            break;
        }
        q *= plan.weight;
        admitted.push(plan);
    }
    admitted
}
