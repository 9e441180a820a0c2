//! Contact plans and message traffic
//!
//! A [`ContactPlan`] lists when each pair of nodes is in contact. Plans are
//! written by hand for scripted scenarios or drawn at random over a
//! [`ContactGraph`](crate::topology::ContactGraph).

use rand::Rng;
use serde::{Deserialize, Serialize};

use commune_core::{SimTime, SimulationIdentity};

use crate::topology::ContactGraph;

type Id = SimulationIdentity;

/// One contact between two nodes over `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub a: Id,
    pub b: Id,
    pub start: SimTime,
    pub end: SimTime,
}

impl Contact {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// A contact opening or closing at a point in time
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ContactEvent {
    Up { at: SimTime, contact: usize },
    Down { at: SimTime, contact: usize },
}

impl ContactEvent {
    pub fn at(&self) -> SimTime {
        match self {
            Self::Up { at, .. } | Self::Down { at, .. } => *at,
        }
    }

    /// Index of the contact in its plan
    pub fn contact(&self) -> usize {
        match self {
            Self::Up { contact, .. } | Self::Down { contact, .. } => *contact,
        }
    }

    fn order_key(&self) -> u8 {
        // Closings first so back-to-back contacts of one pair never overlap
        match self {
            Self::Down { .. } => 0,
            Self::Up { .. } => 1,
        }
    }
}

/// Parameters for drawing random contacts
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RandomContacts {
    /// Mean idle time between two contacts of a pair
    pub mean_gap: f64,
    /// Shortest contact
    pub min_duration: f64,
    /// Longest contact
    pub max_duration: f64,
}

impl Default for RandomContacts {
    fn default() -> Self {
        Self {
            mean_gap: 900.0,
            min_duration: 30.0,
            max_duration: 600.0,
        }
    }
}

/// Ordered list of contacts for one run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContactPlan {
    contacts: Vec<Contact>,
}

impl ContactPlan {
    /// Create an empty plan
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a contact; empty or inverted intervals and self-contacts are skipped
    pub fn add(&mut self, a: Id, b: Id, start: SimTime, end: SimTime) -> &mut Self {
        if a != b && end > start {
            self.contacts.push(Contact { a, b, start, end });
        }
        self
    }

    /// Draw contacts for every edge of `graph` over `[0, duration)`
    ///
    /// Contacts of one pair never overlap.
    pub fn random(
        graph: &ContactGraph,
        duration: SimTime,
        params: &RandomContacts,
        rng: &mut impl Rng,
    ) -> Self {
        let mut plan = Self::new();
        let max_gap = (params.mean_gap * 2.0).max(f64::EPSILON);
        let min_duration = params.min_duration.max(f64::EPSILON);
        let max_duration = params.max_duration.max(min_duration);

        for (a, b) in graph.edges() {
            let mut t = rng.random_range(0.0..max_gap);
            while t < duration {
                let length = rng.random_range(min_duration..=max_duration);
                let end = (t + length).min(duration);
                plan.add(a, b, t, end);
                t = end + rng.random_range(0.0..max_gap);
            }
        }
        plan
    }

    /// The contacts in insertion order
    pub fn contacts(&self) -> &[Contact] {
        &self.contacts
    }

    pub fn get(&self, index: usize) -> Option<&Contact> {
        self.contacts.get(index)
    }

    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }

    /// Time the last contact closes
    pub fn end_time(&self) -> SimTime {
        self.contacts.iter().map(|c| c.end).fold(0.0, f64::max)
    }

    /// Every opening and closing, sorted by time
    ///
    /// At equal times closings come before openings, then plan order.
    pub fn timeline(&self) -> Vec<ContactEvent> {
        let mut events: Vec<ContactEvent> = self
            .contacts
            .iter()
            .enumerate()
            .flat_map(|(contact, c)| {
                [
                    ContactEvent::Up {
                        at: c.start,
                        contact,
                    },
                    ContactEvent::Down { at: c.end, contact },
                ]
            })
            .collect();
        events.sort_by(|x, y| {
            x.at()
                .total_cmp(&y.at())
                .then(x.order_key().cmp(&y.order_key()))
                .then(x.contact().cmp(&y.contact()))
        });
        events
    }
}

/// A message to create at a given time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledMessage {
    pub at: SimTime,
    pub source: Id,
    pub destinations: Vec<Id>,
    pub size: u64,
}

impl ScheduledMessage {
    pub fn new(
        at: SimTime,
        source: Id,
        destinations: impl IntoIterator<Item = Id>,
        size: u64,
    ) -> Self {
        Self {
            at,
            source,
            destinations: destinations.into_iter().collect(),
            size,
        }
    }
}

/// Parameters for drawing random traffic
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RandomTraffic {
    /// Number of messages
    pub messages: usize,
    /// Destinations per message
    pub fanout: usize,
    pub min_size: u64,
    pub max_size: u64,
}

impl Default for RandomTraffic {
    fn default() -> Self {
        Self {
            messages: 20,
            fanout: 2,
            min_size: 100,
            max_size: 1000,
        }
    }
}

impl RandomTraffic {
    /// Draw messages between distinct nodes over `[0, until)`, sorted by time
    pub fn generate(
        &self,
        nodes: &[Id],
        until: SimTime,
        rng: &mut impl Rng,
    ) -> Vec<ScheduledMessage> {
        if nodes.len() < 2 || until <= 0.0 {
            return Vec::new();
        }
        let fanout = self.fanout.clamp(1, nodes.len() - 1);
        let max_size = self.max_size.max(self.min_size);

        let mut traffic: Vec<ScheduledMessage> = (0..self.messages)
            .map(|_| {
                let source = nodes[rng.random_range(0..nodes.len())];
                let mut destinations = Vec::with_capacity(fanout);
                while destinations.len() < fanout {
                    let candidate = nodes[rng.random_range(0..nodes.len())];
                    if candidate != source && !destinations.contains(&candidate) {
                        destinations.push(candidate);
                    }
                }
                ScheduledMessage {
                    at: rng.random_range(0.0..until),
                    source,
                    destinations,
                    size: rng.random_range(self.min_size..=max_size),
                }
            })
            .collect();
        traffic.sort_by(|x, y| x.at.total_cmp(&y.at));
        traffic
    }
}
