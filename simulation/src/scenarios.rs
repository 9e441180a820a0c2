//! Pre-defined simulation scenarios
//!
//! Scripted scenarios replay a fixed contact plan; the random scenario draws
//! its graph, contacts and traffic from a seeded generator so runs are
//! reproducible.

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tracing::info;

use commune_core::{SimTime, SimulationIdentity};

use crate::error::SimResult;
use crate::schedule::{ContactPlan, RandomContacts, RandomTraffic, ScheduledMessage};
use crate::topology::TopologyKind;
use crate::world::{SimConfig, SimWorld};

/// Two nodes meet once for longer than the familiarity threshold
///
/// ```text
/// A ==== B      one contact lasting threshold + 100s
/// A sends to B while they are in contact
/// ```
///
/// Afterwards each is in the other's familiar set and local community.
pub fn run_pair_scenario(config: SimConfig) -> SimResult<SimWorld> {
    info!("=== Running pair scenario ===");
    let nodes = SimulationIdentity::range_to('B');
    let (a, b) = (nodes[0], nodes[1]);
    let contact = config.router.community.familiar_threshold + 100.0;

    let mut plan = ContactPlan::new();
    plan.add(a, b, 0.0, contact);
    let traffic = vec![ScheduledMessage::new(10.0, a, [b], 500)];

    let mut world = SimWorld::with_nodes(config, nodes);
    world.run(&plan, &traffic, contact + 10.0)?;
    Ok(world)
}

/// A triangle of familiar nodes admits a fourth through a short meeting
///
/// ```text
/// A-B, A-C, B-C   long contacts, one after the other
/// D-B, D-C        long contacts
/// A-D             a ten second meeting
/// ```
///
/// A message from A to D rides through B, which meets D first. With K = 3
/// the final meeting is enough for A and D to join each other's community,
/// since D's familiar set `{B, C}` lies inside A's community.
pub fn run_triangle_scenario(config: SimConfig) -> SimResult<SimWorld> {
    info!("=== Running triangle scenario ===");
    let nodes = SimulationIdentity::range_to('D');
    let (a, b, c, d) = (nodes[0], nodes[1], nodes[2], nodes[3]);
    let long = config.router.community.familiar_threshold + 100.0;
    let gap = 100.0;

    let mut plan = ContactPlan::new();
    let mut t = 0.0;
    for (x, y) in [(a, b), (a, c), (b, c), (d, b), (d, c)] {
        plan.add(x, y, t, t + long);
        t += long + gap;
    }
    plan.add(a, d, t, t + 10.0);
    let traffic = vec![ScheduledMessage::new(gap, a, [d], 500)];

    let mut world = SimWorld::with_nodes(config, nodes);
    world.run(&plan, &traffic, t + 10.0 + gap)?;
    Ok(world)
}

/// Parameters of a random run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomScenario {
    pub nodes: usize,
    pub topology: TopologyKind,
    /// Edge probability for [`TopologyKind::Random`]
    pub connection_probability: f64,
    pub duration: SimTime,
    pub seed: u64,
    pub contacts: RandomContacts,
    pub traffic: RandomTraffic,
}

impl Default for RandomScenario {
    fn default() -> Self {
        Self {
            nodes: 8,
            topology: TopologyKind::Random,
            connection_probability: 0.4,
            duration: 21_600.0,
            seed: 42,
            contacts: RandomContacts::default(),
            traffic: RandomTraffic::default(),
        }
    }
}

/// Random graph, contacts and traffic from one seed
///
/// Messages are created during the first half of the run so they have time
/// to spread.
pub fn run_random_scenario(config: SimConfig, params: &RandomScenario) -> SimResult<SimWorld> {
    info!(
        nodes = params.nodes,
        topology = ?params.topology,
        seed = params.seed,
        "=== Running random scenario ==="
    );
    let mut rng = StdRng::seed_from_u64(params.seed);
    let graph = params
        .topology
        .build(params.nodes, params.connection_probability, &mut rng);
    let plan = ContactPlan::random(&graph, params.duration, &params.contacts, &mut rng);
    let traffic = params
        .traffic
        .generate(&graph.node_ids(), params.duration / 2.0, &mut rng);

    info!(
        edges = graph.edge_count(),
        contacts = plan.len(),
        messages = traffic.len(),
        "Generated workload"
    );

    let mut world = SimWorld::with_nodes(config, graph.node_ids());
    world.run(&plan, &traffic, params.duration)?;
    Ok(world)
}
