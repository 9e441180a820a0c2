//! Node identity abstractions
//!
//! This module provides the [`PeerIdentity`] trait that abstracts over
//! different identity implementations. Simulations use
//! [`SimulationIdentity`], a single capital letter ('A'..'Z').

use std::fmt::{Debug, Display};
use std::hash::Hash;

use serde::{Deserialize, Serialize, de::DeserializeOwned};

/// Trait for node identity abstraction
///
/// Identities are totally ordered so that community membership, forwarding
/// tables and path-weight caches iterate deterministically. Two runs over the
/// same contact trace therefore build identical communities.
pub trait PeerIdentity:
    Clone + Eq + Ord + Hash + Debug + Display + Serialize + DeserializeOwned + 'static
{
}

impl<T> PeerIdentity for T where
    T: Clone + Eq + Ord + Hash + Debug + Display + Serialize + DeserializeOwned + 'static
{
}

/// Simple character-based identity for simulation
#[derive(
    Debug, derive_more::Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize,
    Deserialize,
)]
#[display("{_0}")]
pub struct SimulationIdentity(pub char);

impl SimulationIdentity {
    /// Create a new simulation identity from a capital letter
    pub fn new(c: char) -> Option<Self> {
        if c.is_ascii_uppercase() {
            Some(Self(c))
        } else {
            None
        }
    }

    /// Generate all identities from 'A' to the given letter (inclusive)
    pub fn range_to(end: char) -> Vec<Self> {
        ('A'..=end).filter_map(Self::new).collect()
    }

    /// The first `count` identities, capped at 26
    pub fn first(count: usize) -> Vec<Self> {
        ('A'..='Z').take(count).filter_map(Self::new).collect()
    }

    /// Get the underlying character
    pub fn as_char(&self) -> char {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulation_identity_creation() {
        assert!(SimulationIdentity::new('A').is_some());
        assert!(SimulationIdentity::new('Z').is_some());
        assert!(SimulationIdentity::new('a').is_none());
        assert!(SimulationIdentity::new('1').is_none());
    }

    #[test]
    fn test_simulation_identity_range() {
        let ids = SimulationIdentity::range_to('C');
        assert_eq!(ids.len(), 3);
        assert_eq!(ids[0].0, 'A');
        assert_eq!(ids[2].0, 'C');
    }

    #[test]
    fn test_first_is_capped() {
        assert_eq!(SimulationIdentity::first(4).len(), 4);
        assert_eq!(SimulationIdentity::first(40).len(), 26);
    }

    #[test]
    fn test_display_is_the_letter() {
        let id = SimulationIdentity::new('M').unwrap();
        assert_eq!(id.to_string(), "M");
        assert_eq!(id.as_char(), 'M');
    }

    #[test]
    fn test_ordering_is_alphabetical() {
        let mut ids = vec![
            SimulationIdentity::new('C').unwrap(),
            SimulationIdentity::new('A').unwrap(),
            SimulationIdentity::new('B').unwrap(),
        ];
        ids.sort();
        assert_eq!(ids, SimulationIdentity::range_to('C'));
    }
}
