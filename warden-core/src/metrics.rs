//! In-process recovery metrics
//!
//! A small counter and timing registry owned by the engine. Nothing is
//! exported; callers read a [`MetricsSnapshot`] through `engine.metrics()`.
//!
//! Timing series keep only the newest [`MAX_TIMING_SAMPLES`] samples.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use crate::escalation::EscalationLevel;
use crate::types::{ErrorCategory, RecoveryStrategy};

/// Metric names used by the engine
pub mod names {
    pub const ERRORS_HANDLED: &str = "errors.handled";
    pub const ERRORS_CLASSIFIED_PREFIX: &str = "errors_classified";
    pub const RECOVERY_PREFIX: &str = "recovery";
    pub const ESCALATIONS_PREFIX: &str = "escalations";
    pub const CIRCUIT_BREAKER_OPENED: &str = "circuit_breaker.opened";
    pub const CIRCUIT_BREAKER_SHORT_CIRCUITED: &str = "circuit_breaker.short_circuited";
    pub const RECOVERY_MACHINERY_FAILURES: &str = "recovery.machinery_failures";
    pub const HANDLE_ERROR_DURATION: &str = "handle_error.duration";
}

/// Samples retained per timing series
pub const MAX_TIMING_SAMPLES: usize = 1024;

/// Ring buffer of recent durations plus a lifetime count
#[derive(Debug, Clone, Default)]
struct TimingSeries {
    samples: VecDeque<Duration>,
    recorded: u64,
}

impl TimingSeries {
    fn push(&mut self, duration: Duration) {
        if self.samples.len() == MAX_TIMING_SAMPLES {
            self.samples.pop_front();
        }
        self.samples.push_back(duration);
        self.recorded = self.recorded.saturating_add(1);
    }
}

/// How a recovery attempt ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOutcome {
    Recovered,
    Ignored,
    Propagated,
}

impl RecoveryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryOutcome::Recovered => "recovered",
            RecoveryOutcome::Ignored => "ignored",
            RecoveryOutcome::Propagated => "propagated",
        }
    }
}

/// Counters and timings for the recovery engine
#[derive(Debug, Clone, Default)]
pub struct RecoveryMetrics {
    counters: Arc<RwLock<HashMap<String, u64>>>,
    durations: Arc<RwLock<HashMap<String, TimingSeries>>>,
}

impl RecoveryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_counter(&self, name: &str) {
        self.increment_counter_by(name, 1);
    }

    pub fn increment_counter_by(&self, name: &str, value: u64) {
        let mut counters = self.counters.write();
        *counters.entry(name.to_string()).or_insert(0) += value;
    }

    pub fn get_counter(&self, name: &str) -> u64 {
        self.counters.read().get(name).copied().unwrap_or(0)
    }

    pub fn record_duration(&self, name: &str, duration: Duration) {
        self.durations
            .write()
            .entry(name.to_string())
            .or_default()
            .push(duration);
    }

    /// Samples currently retained for `name`
    pub fn retained_samples(&self, name: &str) -> usize {
        self.durations
            .read()
            .get(name)
            .map_or(0, |series| series.samples.len())
    }

    pub fn record_classified(&self, category: ErrorCategory) {
        self.increment_counter(names::ERRORS_HANDLED);
        self.increment_counter(&format!(
            "{}.{}",
            names::ERRORS_CLASSIFIED_PREFIX,
            category
        ));
    }

    pub fn record_recovery(&self, strategy: RecoveryStrategy, outcome: RecoveryOutcome) {
        self.increment_counter(&format!(
            "{}.{}.{}",
            names::RECOVERY_PREFIX,
            strategy,
            outcome.as_str()
        ));
    }

    pub fn record_escalation(&self, level: EscalationLevel) {
        self.increment_counter(&format!("{}.{}", names::ESCALATIONS_PREFIX, level));
    }

    /// Summary of the retained window of a timing series
    pub fn timing_stats(&self, name: &str) -> Option<TimingStats> {
        let durations = self.durations.read();
        let series = durations.get(name)?;
        if series.samples.is_empty() {
            return None;
        }

        let recorded = series.recorded;
        let mut sorted: Vec<Duration> = series.samples.iter().copied().collect();
        drop(durations);
        sorted.sort();
        let count = sorted.len();
        let sum: Duration = sorted.iter().sum();

        Some(TimingStats {
            count,
            recorded,
            mean: sum / count as u32,
            min: sorted[0],
            max: sorted[count - 1],
            p50: sorted[(count / 2).min(count - 1)],
            p99: sorted[((count * 99) / 100).min(count - 1)],
        })
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let names: Vec<String> = self.durations.read().keys().cloned().collect();
        MetricsSnapshot {
            counters: self
                .counters
                .read()
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
            timings: names
                .into_iter()
                .filter_map(|name| self.timing_stats(&name).map(|stats| (name, stats)))
                .collect(),
        }
    }

    pub fn clear(&self) {
        self.counters.write().clear();
        self.durations.write().clear();
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimingStats {
    /// Samples in the retained window
    pub count: usize,
    /// Samples recorded over the series' lifetime
    pub recorded: u64,
    #[serde(with = "humantime_serde")]
    pub mean: Duration,
    #[serde(with = "humantime_serde")]
    pub min: Duration,
    #[serde(with = "humantime_serde")]
    pub max: Duration,
    #[serde(with = "humantime_serde")]
    pub p50: Duration,
    #[serde(with = "humantime_serde")]
    pub p99: Duration,
}

/// Point-in-time copy of every metric, ordered by name
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub counters: BTreeMap<String, u64>,
    pub timings: BTreeMap<String, TimingStats>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_counters() {
        let metrics = RecoveryMetrics::new();
        metrics.record_classified(ErrorCategory::Network);
        metrics.record_classified(ErrorCategory::Network);
        metrics.record_recovery(RecoveryStrategy::Retry, RecoveryOutcome::Recovered);
        metrics.record_escalation(EscalationLevel::High);

        assert_eq!(metrics.get_counter("errors.handled"), 2);
        assert_eq!(metrics.get_counter("errors_classified.network"), 2);
        assert_eq!(metrics.get_counter("recovery.retry.recovered"), 1);
        assert_eq!(metrics.get_counter("escalations.high"), 1);
        assert_eq!(metrics.get_counter("escalations.low"), 0);
    }

    #[test]
    fn test_timing_stats() {
        let metrics = RecoveryMetrics::new();
        for ms in [30, 10, 20] {
            metrics.record_duration("op", Duration::from_millis(ms));
        }
        let stats = metrics.timing_stats("op").unwrap();
        assert_eq!(stats.count, 3);
        assert_eq!(stats.min, Duration::from_millis(10));
        assert_eq!(stats.max, Duration::from_millis(30));
        assert_eq!(stats.mean, Duration::from_millis(20));
        assert_eq!(stats.recorded, 3);
        assert!(metrics.timing_stats("missing").is_none());
    }

    #[test]
    fn test_timing_series_keeps_newest_samples() {
        let metrics = RecoveryMetrics::new();
        let total = MAX_TIMING_SAMPLES + 500;
        for ms in 0..total as u64 {
            metrics.record_duration("handle", Duration::from_millis(ms));
        }

        assert_eq!(metrics.retained_samples("handle"), MAX_TIMING_SAMPLES);
        let stats = metrics.timing_stats("handle").unwrap();
        assert_eq!(stats.count, MAX_TIMING_SAMPLES);
        assert_eq!(stats.recorded, total as u64);
        assert_eq!(stats.min, Duration::from_millis(500));
        assert_eq!(stats.max, Duration::from_millis(total as u64 - 1));
    }

    #[test]
    fn test_snapshot_and_clear_share_state_across_clones() {
        let metrics = RecoveryMetrics::new();
        let clone = metrics.clone();
        clone.increment_counter_by("custom", 4);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.counters.get("custom"), Some(&4));

        metrics.clear();
        assert_eq!(clone.get_counter("custom"), 0);
    }
}
