//! Ranking and weighted-pool construction.
//!
//! Pure functions over [`CandidateEntry`] values; the [`CherryPicker`] builds
//! the entries from the quality store and draws from the resulting pool.
//!
//! # Weighting
//!
//! Entries are ranked by success rate (descending) then average success latency
//! (ascending). Walking the ranking with a weight that starts at
//! [`INITIAL_WEIGHT`]:
//!
//! | Success rate            | Failing | Copies in pool | Next weight      |
//! |-------------------------|---------|----------------|------------------|
//! | `> 0.98`                | no      | `weight`       | `weight - 2`, ≥1 |
//! | `(0.95, 0.98]`          | no      | `weight`       | `weight - 3`, ≥1 |
//! | `> 0` (any other case)  | any     | 1              | unchanged        |
//! | `0`, attempts < limit   | any     | 1              | unchanged        |
//! | `0`, attempts ≥ limit   | any     | 0 (shelved)    | unchanged        |
//!
//! [`CherryPicker`]: super::CherryPicker

use std::cmp::Ordering;

/// Starting multiplicity for the best-ranked actor.
pub const INITIAL_WEIGHT: usize = 10;

/// Ranking input for one actor, derived fresh on every selection call.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateEntry {
    pub id: String,
    pub attempts: u64,
    pub success_rate: f64,
    pub average_success_latency: f64,
    pub failing: bool,
}

impl CandidateEntry {
    /// Entry for an actor with no service log.
    #[must_use]
    pub fn untested(id: impl Into<String>, failing: bool) -> Self {
        Self {
            id: id.into(),
            attempts: 0,
            success_rate: 1.0,
            average_success_latency: 0.0,
            failing,
        }
    }
}

/// Result of walking a ranking.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WeightedPool {
    /// Actor ids, repeated according to their weight.
    pub members: Vec<String>,
    /// Actors excluded this round that should be flagged as failing.
    pub shelved: Vec<String>,
}

/// Sorts entries by success rate (descending) then latency (ascending).
///
/// The sort is stable: entries that tie on both keys keep their input order.
pub fn rank(entries: &mut [CandidateEntry]) {
    entries.sort_by(|a, b| {
        b.success_rate
            .partial_cmp(&a.success_rate)
            .unwrap_or(Ordering::Equal)
            .then_with(|| {
                a.average_success_latency
                    .partial_cmp(&b.average_success_latency)
                    .unwrap_or(Ordering::Equal)
            })
    });
}

/// Builds the weighted pool from an already-ranked slice.
///
/// `max_failures_per_period` is the attempt count at which an actor with no
/// successes is shelved.
#[must_use]
pub fn build_weighted_pool(ranked: &[CandidateEntry], max_failures_per_period: u64) -> WeightedPool {
    let mut pool = WeightedPool::default();
    let mut weight = INITIAL_WEIGHT;

    for entry in ranked {
        if entry.success_rate > 0.98 && !entry.failing {
            pool.members.extend(std::iter::repeat_n(entry.id.clone(), weight));
            weight = weight.saturating_sub(2).max(1);
        } else if entry.success_rate > 0.95 && !entry.failing {
            pool.members.extend(std::iter::repeat_n(entry.id.clone(), weight));
            weight = weight.saturating_sub(3).max(1);
        } else if entry.success_rate > 0.0 || entry.attempts < max_failures_per_period {
            pool.members.push(entry.id.clone());
        } else {
            pool.shelved.push(entry.id.clone());
        }
    }

    pool
}
