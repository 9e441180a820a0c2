//! Contact graphs for simulated populations
//!
//! A [`ContactGraph`] says which pairs of nodes ever meet. The contact
//! schedule decides when. Graphs come in a few shapes:
//! - Ring: each node meets its two neighbors
//! - Full: every pair meets
//! - Random: each pair meets with a given probability
//! - Line and star
//! - Custom: built from an edge list

use std::collections::{BTreeMap, BTreeSet};

use clap::ValueEnum;
use rand::Rng;
use serde::{Deserialize, Serialize};

use commune_core::SimulationIdentity;

type Id = SimulationIdentity;

/// Which node pairs can come into contact
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContactGraph {
    adjacency: BTreeMap<Id, BTreeSet<Id>>,
}

impl ContactGraph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node without any contacts
    pub fn add_node(&mut self, id: Id) {
        self.adjacency.entry(id).or_default();
    }

    /// Let two nodes meet; self-loops are ignored
    pub fn connect(&mut self, a: Id, b: Id) {
        if a == b {
            return;
        }
        self.adjacency.entry(a).or_default().insert(b);
        self.adjacency.entry(b).or_default().insert(a);
    }

    /// Nodes a node can meet
    pub fn neighbors(&self, node: Id) -> Option<&BTreeSet<Id>> {
        self.adjacency.get(&node)
    }

    /// Check if two nodes can meet
    pub fn are_connected(&self, a: Id, b: Id) -> bool {
        self.adjacency.get(&a).is_some_and(|n| n.contains(&b))
    }

    /// All nodes, in order
    pub fn node_ids(&self) -> Vec<Id> {
        self.adjacency.keys().copied().collect()
    }

    /// Number of nodes
    pub fn node_count(&self) -> usize {
        self.adjacency.len()
    }

    /// Every edge once, as `(lower, higher)`
    pub fn edges(&self) -> Vec<(Id, Id)> {
        self.adjacency
            .iter()
            .flat_map(|(a, neighbors)| {
                neighbors
                    .iter()
                    .filter(move |b| a < *b)
                    .map(move |b| (*a, *b))
            })
            .collect()
    }

    /// Number of edges
    pub fn edge_count(&self) -> usize {
        self.edges().len()
    }

    /// Nodes both `a` and `b` can meet
    pub fn mutual_neighbors(&self, a: Id, b: Id) -> BTreeSet<Id> {
        match (self.adjacency.get(&a), self.adjacency.get(&b)) {
            (Some(an), Some(bn)) => an.intersection(bn).copied().collect(),
            _ => BTreeSet::new(),
        }
    }

    /// Simple ASCII rendering of the graph
    pub fn visualize(&self) -> String {
        let mut output = String::new();
        output.push_str("Contact Graph:\n");
        output.push_str(&format!("  Nodes: {}\n", self.node_count()));
        output.push_str(&format!("  Edges: {}\n\n", self.edge_count()));

        for (node, neighbors) in &self.adjacency {
            let neighbor_str: Vec<String> = neighbors.iter().map(|n| n.to_string()).collect();
            output.push_str(&format!("  {} -> [{}]\n", node, neighbor_str.join(", ")));
        }
        output
    }
}

/// Builder for common contact graph shapes
pub struct GraphBuilder {
    nodes: Vec<Id>,
}

impl GraphBuilder {
    /// Create a builder over the first `node_count` identities (A, B, C, ...)
    ///
    /// Counts above 26 are capped.
    pub fn new(node_count: usize) -> Self {
        Self {
            nodes: SimulationIdentity::first(node_count),
        }
    }

    fn empty(&self) -> ContactGraph {
        let mut graph = ContactGraph::new();
        for node in &self.nodes {
            graph.add_node(*node);
        }
        graph
    }

    /// A - B - C - ... - A
    pub fn ring(self) -> ContactGraph {
        let mut graph = self.empty();
        let n = self.nodes.len();
        for i in 0..n {
            graph.connect(self.nodes[i], self.nodes[(i + 1) % n]);
        }
        graph
    }

    /// Every pair meets
    pub fn full(self) -> ContactGraph {
        let mut graph = self.empty();
        for (i, a) in self.nodes.iter().enumerate() {
            for b in &self.nodes[i + 1..] {
                graph.connect(*a, *b);
            }
        }
        graph
    }

    /// Each pair meets with probability `connection_probability`
    ///
    /// Isolated nodes are then attached to one random other node.
    pub fn random(self, connection_probability: f64, rng: &mut impl Rng) -> ContactGraph {
        let mut graph = self.empty();
        let probability = connection_probability.clamp(0.0, 1.0);
        for (i, a) in self.nodes.iter().enumerate() {
            for b in &self.nodes[i + 1..] {
                if rng.random_bool(probability) {
                    graph.connect(*a, *b);
                }
            }
        }

        if self.nodes.len() > 1 {
            for (i, node) in self.nodes.iter().enumerate() {
                if graph.neighbors(*node).is_some_and(|n| n.is_empty()) {
                    let offset = rng.random_range(1..self.nodes.len());
                    let other = self.nodes[(i + offset) % self.nodes.len()];
                    graph.connect(*node, other);
                }
            }
        }
        graph
    }

    /// A - B - C - ...
    pub fn line(self) -> ContactGraph {
        let mut graph = self.empty();
        for pair in self.nodes.windows(2) {
            graph.connect(pair[0], pair[1]);
        }
        graph
    }

    /// A in the center, meeting everyone else
    pub fn star(self) -> ContactGraph {
        let mut graph = self.empty();
        if let Some((center, rest)) = self.nodes.split_first() {
            for node in rest {
                graph.connect(*center, *node);
            }
        }
        graph
    }
}

/// Named graph shapes, as accepted on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum TopologyKind {
    Ring,
    Full,
    Random,
    Line,
    Star,
}

impl TopologyKind {
    /// Build a graph of this shape over `node_count` nodes
    ///
    /// `connection_probability` only applies to [`TopologyKind::Random`].
    pub fn build(
        self,
        node_count: usize,
        connection_probability: f64,
        rng: &mut impl Rng,
    ) -> ContactGraph {
        let builder = GraphBuilder::new(node_count);
        match self {
            Self::Ring => builder.ring(),
            Self::Full => builder.full(),
            Self::Random => builder.random(connection_probability, rng),
            Self::Line => builder.line(),
            Self::Star => builder.star(),
        }
    }
}

/// Build a graph from an edge list; invalid identities are skipped
pub fn from_edges(edges: &[(char, char)]) -> ContactGraph {
    let mut graph = ContactGraph::new();
    for (a, b) in edges {
        if let (Some(a), Some(b)) = (SimulationIdentity::new(*a), SimulationIdentity::new(*b)) {
            graph.connect(a, b);
        }
    }
    graph
}
