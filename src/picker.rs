//! Load-aware selection of one cluster from a pool
//!
//! Each candidate's chance of being picked is proportional to its spare
//! capacity, as reported by [ClusterRecord::load_metric]. The draw is an
//! exponential-weighted reservoir draw: every candidate draws a key
//! `-ln(u) / weight` for `u` uniform in (0, 1), and the lowest key wins.
//! This needs a single pass and no running total of weights.

use crate::cluster::{ClusterRecord, ClusterState};

use rand::distr::Open01;
use rand::seq::IndexedRandom;
use rand::Rng;
use tracing::{event, Level};

/// Picks a cluster to connect to.
///
/// - Clusters which are still `CREATING` are never picked.
/// - Clusters reporting no spare capacity sit out the weighted draw.
/// - If no cluster reports spare capacity, every remaining cluster is
///   equally likely.
///
/// Returns `None` only if there is no cluster outside the `CREATING` state.
pub fn pick_cluster<'a, R: Rng + ?Sized>(
    clusters: &'a [ClusterRecord],
    rng: &mut R,
) -> Option<&'a ClusterRecord> {
    let candidates: Vec<&ClusterRecord> = clusters
        .iter()
        .filter(|cluster| cluster.state() != ClusterState::Creating)
        .collect();
    if candidates.is_empty() {
        event!(Level::DEBUG, listed = clusters.len(), "No connectable clusters");
        return None;
    }

    let winner = candidates
        .iter()
        .copied()
        .filter_map(|cluster| {
            let weight = cluster.load_metric();
            (weight > 0).then(|| (draw_key(rng, weight), cluster))
        })
        .min_by(|(a, _), (b, _)| a.total_cmp(b));

    match winner {
        Some((key, cluster)) => {
            event!(
                Level::DEBUG,
                cluster = %cluster.cluster_name,
                weight = cluster.load_metric(),
                key,
                "Picked cluster by weighted draw"
            );
            Some(cluster)
        }
        None => {
            event!(
                Level::DEBUG,
                candidates = candidates.len(),
                "No cluster reports spare capacity, picking uniformly"
            );
            candidates.choose(rng).copied()
        }
    }
}

// Open01 never yields 0, so the logarithm stays finite.
fn draw_key<R: Rng + ?Sized>(rng: &mut R, weight: i64) -> f64 {
    let u: f64 = rng.sample(Open01);
    -u.ln() / weight as f64
}

#[cfg(test)]
mod test {
    use super::*;

    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashMap;

    fn cluster(name: &str, state: ClusterState, weight: Option<i64>) -> ClusterRecord {
        let cluster = ClusterRecord::new(name).with_state(state);
        match weight {
            Some(weight) => cluster.with_load_metric(weight),
            None => cluster,
        }
    }

    fn tally(clusters: &[ClusterRecord], rounds: usize, seed: u64) -> HashMap<String, usize> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut counts = HashMap::new();
        for _ in 0..rounds {
            let picked = pick_cluster(clusters, &mut rng).expect("a cluster");
            *counts.entry(picked.cluster_name.clone()).or_default() += 1;
        }
        counts
    }

    #[test]
    fn empty_pool_picks_nothing() {
        let mut rng = StdRng::seed_from_u64(0);
        assert!(pick_cluster(&[], &mut rng).is_none());
    }

    #[test]
    fn only_creating_clusters_picks_nothing() {
        let clusters = [
            cluster("a", ClusterState::Creating, Some(100)),
            cluster("b", ClusterState::Creating, None),
        ];
        let mut rng = StdRng::seed_from_u64(0);
        assert!(pick_cluster(&clusters, &mut rng).is_none());
    }

    #[test]
    fn zero_capacity_is_never_picked_when_others_have_capacity() {
        let clusters = [
            cluster("a", ClusterState::Running, Some(0)),
            cluster("b", ClusterState::Running, Some(100)),
        ];
        let counts = tally(&clusters, 1000, 1);
        assert_eq!(counts.get("a"), None);
        assert_eq!(counts.get("b"), Some(&1000));
    }

    #[test]
    fn missing_metrics_count_as_zero() {
        let clusters = [
            cluster("a", ClusterState::Running, None),
            cluster("b", ClusterState::Updating, Some(1)),
        ];
        let counts = tally(&clusters, 500, 2);
        assert_eq!(counts.get("b"), Some(&500));
    }

    #[test]
    fn all_zero_capacity_falls_back_to_uniform() {
        let clusters = [
            cluster("a", ClusterState::Running, Some(0)),
            cluster("b", ClusterState::Running, Some(0)),
        ];
        let counts = tally(&clusters, 2000, 3);
        let a = counts.get("a").copied().unwrap_or(0);
        let b = counts.get("b").copied().unwrap_or(0);
        assert_eq!(a + b, 2000);
        assert!((800..=1200).contains(&a), "a picked {a} times");
    }

    #[test]
    fn fallback_still_skips_creating() {
        let clusters = [
            cluster("a", ClusterState::Creating, Some(500)),
            cluster("b", ClusterState::Running, None),
        ];
        let counts = tally(&clusters, 200, 4);
        assert_eq!(counts.get("b"), Some(&200));
    }

    #[test]
    fn negative_capacity_sits_out() {
        let clusters = [
            cluster("a", ClusterState::Running, Some(-50)),
            cluster("b", ClusterState::Running, Some(10)),
        ];
        let counts = tally(&clusters, 300, 5);
        assert_eq!(counts.get("b"), Some(&300));
    }

    #[test]
    fn picks_proportionally_to_capacity() {
        let clusters = [
            cluster("small", ClusterState::Running, Some(100)),
            cluster("large", ClusterState::Running, Some(300)),
        ];
        let rounds = 8000;
        let counts = tally(&clusters, rounds, 6);
        let small = counts.get("small").copied().unwrap_or(0) as f64 / rounds as f64;
        assert!((0.21..0.29).contains(&small), "small picked {small:.3} of the time");
    }

    #[test]
    fn draw_keys_are_finite_and_positive() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..10_000 {
            let key = draw_key(&mut rng, 1);
            assert!(key.is_finite());
            assert!(key > 0.0);
        }
    }
}
