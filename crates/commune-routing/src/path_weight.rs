//! Path-weight scoring for multi-hop social paths
//!
//! A forwarding-table entry is a list of hop weights (cumulative contact
//! durations) along a path. Treating each hop as an exponential stage with
//! rate `h`, the probability that the whole chain completes within the
//! message TTL `T` is
//!
//! ```text
//! weight = Σᵢ cᵢ · (1 − e^(−hᵢ·T)),   cᵢ = Πⱼ≠ᵢ hⱼ / (hⱼ − hᵢ)
//! ```
//!
//! The coefficients divide by `hⱼ − hᵢ`, so two equal hop weights make the
//! closed form undefined. Equal hops are collapsed to one before evaluation,
//! and a non-finite result falls back to the best single-hop term.

use tracing::warn;

/// Availability of one hop within the TTL: `1 − e^(−h·T)`
pub fn hop_availability(hop: f64, ttl: f64) -> f64 {
    1.0 - (-hop * ttl).exp()
}

/// Score a hop list
///
/// Returns 0 for an empty path. The result always lies in `[0, 1]`.
pub fn path_weight(hops: &[f64], ttl: f64) -> f64 {
    let distinct = distinct_hops(hops);
    if distinct.is_empty() {
        return 0.0;
    }

    let weight: f64 = (0..distinct.len())
        .map(|i| coefficient(&distinct, i) * hop_availability(distinct[i], ttl))
        .sum();

    if weight.is_finite() {
        // Rounding in the alternating sum can leave the unit interval
        weight.clamp(0.0, 1.0)
    } else {
        let fallback = best_single_hop(&distinct, ttl);
        warn!(?hops, ttl, fallback, "Path weight not finite, using best single hop");
        fallback
    }
}

/// Lagrange-style coefficient `cᵢ` for hop `i`
fn coefficient(hops: &[f64], i: usize) -> f64 {
    hops.iter()
        .enumerate()
        .filter(|(j, _)| *j != i)
        .map(|(_, &hj)| hj / (hj - hops[i]))
        .product()
}

/// Drop non-finite or negative hops and collapse exact duplicates,
/// keeping first-seen order
fn distinct_hops(hops: &[f64]) -> Vec<f64> {
    let mut distinct: Vec<f64> = Vec::with_capacity(hops.len());
    for &hop in hops {
        if !hop.is_finite() || hop < 0.0 {
            warn!(hop, "Ignoring invalid hop weight");
            continue;
        }
        if !distinct.contains(&hop) {
            distinct.push(hop);
        }
    }
    distinct
}

fn best_single_hop(hops: &[f64], ttl: f64) -> f64 {
    hops.iter()
        .map(|&h| hop_availability(h, ttl))
        .filter(|w| w.is_finite())
        .fold(0.0, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    #[test]
    fn test_single_hop() {
        let ttl = 0.01;
        let w = path_weight(&[100.0], ttl);
        assert!((w - (1.0 - (-1.0f64).exp())).abs() < EPS);
    }

    #[test]
    fn test_zero_hop_weight() {
        assert_eq!(path_weight(&[0.0], 300.0), 0.0);
    }

    #[test]
    fn test_empty_path() {
        assert_eq!(path_weight(&[], 300.0), 0.0);
    }

    #[test]
    fn test_two_hops_matches_hypoexponential_cdf() {
        let (a, b, t): (f64, f64, f64) = (0.5, 2.0, 1.5);
        let expected = 1.0 - (b / (b - a)) * (-a * t).exp() - (a / (a - b)) * (-b * t).exp();
        let w = path_weight(&[a, b], t);
        assert!((w - expected).abs() < EPS);
        assert!(w > 0.0 && w < 1.0);
    }

    #[test]
    fn test_two_hops_weaker_than_either_hop() {
        let t = 1.0;
        let two = path_weight(&[0.5, 2.0], t);
        assert!(two < path_weight(&[0.5], t));
        assert!(two < path_weight(&[2.0], t));
    }

    #[test]
    fn test_hop_order_does_not_matter() {
        let t = 0.7;
        let forward = path_weight(&[0.3, 1.1, 2.5], t);
        let reversed = path_weight(&[2.5, 1.1, 0.3], t);
        assert!((forward - reversed).abs() < EPS);
    }

    #[test]
    fn test_equal_hops_are_collapsed() {
        let t = 0.5;
        let w = path_weight(&[1.0, 1.0], t);
        assert!(w.is_finite());
        assert!((w - path_weight(&[1.0], t)).abs() < EPS);

        let w = path_weight(&[1.0, 2.0, 1.0], t);
        assert!((w - path_weight(&[1.0, 2.0], t)).abs() < EPS);
    }

    #[test]
    fn test_zero_hop_in_chain_blocks_path() {
        let w = path_weight(&[0.0, 5.0], 1.0);
        assert!(w.abs() < EPS);
    }

    #[test]
    fn test_invalid_hops_are_ignored() {
        let w = path_weight(&[f64::NAN, 1.0, -3.0], 0.5);
        assert!((w - path_weight(&[1.0], 0.5)).abs() < EPS);
    }

    #[test]
    fn test_long_contacts_saturate() {
        // A time scale far above one over the hop durations saturates
        let w = path_weight(&[120.0, 340.0], 300.0);
        assert!((w - 1.0).abs() < 1e-6);
    }
}
