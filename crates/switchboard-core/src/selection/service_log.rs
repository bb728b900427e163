//! Per-actor service log.
//!
//! Stored in the quality store as JSON:
//!
//! ```json
//! {"results":{"200":12,"500":1},"averageSuccessLatency":"0.12345"}
//! ```
//!
//! The average latency is kept as a fixed 5-decimal string so every writer
//! (whatever its float formatting) produces the same representation.

use crate::types::RESULT_SUCCESS;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

/// Rolling outcome statistics for one actor (application or node) on one chain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceLog {
    /// Result code → occurrence count.
    pub results: BTreeMap<u16, u64>,

    /// Running average latency of successful attempts, in seconds.
    #[serde(serialize_with = "serialize_fixed5", deserialize_with = "deserialize_fixed5")]
    pub average_success_latency: f64,
}

impl ServiceLog {
    /// Total recorded attempts across all result codes.
    #[must_use]
    pub fn attempts(&self) -> u64 {
        self.results.values().sum()
    }

    #[must_use]
    pub fn successes(&self) -> u64 {
        self.results.get(&RESULT_SUCCESS).copied().unwrap_or(0)
    }

    /// Fraction of attempts that succeeded. An empty log counts as fully
    /// successful so untested actors are favoured.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> f64 {
        let attempts = self.attempts();
        if attempts == 0 {
            return 1.0;
        }
        self.successes() as f64 / attempts as f64
    }

    /// Records one outcome.
    ///
    /// On success the average is updated incrementally from the prior average:
    /// `((prior_total * prior_avg) + elapsed) / new_total`, where `new_total` is
    /// the attempt count after the increment.
    #[allow(clippy::cast_precision_loss)]
    pub fn record(&mut self, result: u16, elapsed_seconds: f64) {
        *self.results.entry(result).or_insert(0) += 1;

        if result == RESULT_SUCCESS {
            let total = self.attempts();
            let prior_total = total.saturating_sub(1);
            let average = ((prior_total as f64 * self.average_success_latency) + elapsed_seconds) /
                total as f64;
            self.average_success_latency = round5(average);
        }
    }

    /// Creates the first log for an actor.
    #[must_use]
    pub fn first(result: u16, elapsed_seconds: f64) -> Self {
        let mut log = Self::default();
        log.record(result, elapsed_seconds);
        log
    }
}

/// Rounds to 5 decimal places.
#[must_use]
pub fn round5(value: f64) -> f64 {
    (value * 100_000.0).round() / 100_000.0
}

fn serialize_fixed5<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format!("{value:.5}"))
}

fn deserialize_fixed5<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Latency {
        Text(String),
        Number(f64),
    }

    match Latency::deserialize(deserializer)? {
        Latency::Number(n) => Ok(n),
        Latency::Text(s) => s.parse().map_err(serde::de::Error::custom),
    }
}
