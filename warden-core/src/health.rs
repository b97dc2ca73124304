//! System health summary
//!
//! The score starts at 100. Critical records in the window cost
//! `critical_penalty` each up to `critical_penalty_cap`, error records cost
//! `error_penalty` each up to `error_penalty_cap`, and the result never
//! drops below 0.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::circuit_breaker::CircuitBreakerStatus;
use crate::sink::ErrorRecord;
use crate::types::ErrorSeverity;

/// Scoring parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// How far back records count against the score
    #[serde(with = "humantime_serde")]
    pub window: Duration,
    pub critical_penalty: u32,
    pub critical_penalty_cap: u32,
    pub error_penalty: u32,
    pub error_penalty_cap: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60 * 60),
            critical_penalty: 20,
            critical_penalty_cap: 80,
            error_penalty: 5,
            error_penalty_cap: 20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Critical,
}

impl HealthStatus {
    pub fn from_score(score: u32) -> Self {
        match score {
            90.. => HealthStatus::Healthy,
            70..=89 => HealthStatus::Degraded,
            50..=69 => HealthStatus::Unhealthy,
            _ => HealthStatus::Critical,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Critical => "critical",
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health payload served to operators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemHealth {
    pub health_score: u32,
    pub health_status: HealthStatus,
    /// Records in the window per severity
    pub recent_errors: BTreeMap<ErrorSeverity, usize>,
    pub circuit_breakers: Vec<CircuitBreakerStatus>,
    pub timestamp: DateTime<Utc>,
}

impl SystemHealth {
    pub fn new(
        recent_errors: BTreeMap<ErrorSeverity, usize>,
        circuit_breakers: Vec<CircuitBreakerStatus>,
        config: &HealthConfig,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let health_score = compute_health_score(&recent_errors, config);
        Self {
            health_score,
            health_status: HealthStatus::from_score(health_score),
            recent_errors,
            circuit_breakers,
            timestamp,
        }
    }
}

/// Count records per severity
pub fn count_by_severity<'a>(
    records: impl IntoIterator<Item = &'a ErrorRecord>,
) -> BTreeMap<ErrorSeverity, usize> {
    let mut counts = BTreeMap::new();
    for record in records {
        *counts.entry(record.severity).or_insert(0) += 1;
    }
    counts
}

fn penalty(count: usize, per_record: u32, cap: u32) -> u64 {
    (count as u64)
        .saturating_mul(u64::from(per_record))
        .min(u64::from(cap))
}

pub fn compute_health_score(
    recent_errors: &BTreeMap<ErrorSeverity, usize>,
    config: &HealthConfig,
) -> u32 {
    let count = |severity| recent_errors.get(&severity).copied().unwrap_or(0);
    let deductions = penalty(
        count(ErrorSeverity::Critical),
        config.critical_penalty,
        config.critical_penalty_cap,
    ) + penalty(
        count(ErrorSeverity::Error),
        config.error_penalty,
        config.error_penalty_cap,
    );
    100u64.saturating_sub(deductions) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn counts(critical: usize, error: usize, warning: usize) -> BTreeMap<ErrorSeverity, usize> {
        BTreeMap::from([
            (ErrorSeverity::Critical, critical),
            (ErrorSeverity::Error, error),
            (ErrorSeverity::Warning, warning),
        ])
    }

    #[rstest]
    #[case(0, 0, 0, 100, HealthStatus::Healthy)]
    #[case(0, 2, 50, 90, HealthStatus::Healthy)]
    #[case(1, 0, 0, 80, HealthStatus::Degraded)]
    #[case(1, 4, 0, 60, HealthStatus::Unhealthy)]
    #[case(2, 10, 0, 40, HealthStatus::Critical)]
    #[case(10, 10, 0, 0, HealthStatus::Critical)]
    fn test_score_and_status(
        #[case] critical: usize,
        #[case] error: usize,
        #[case] warning: usize,
        #[case] score: u32,
        #[case] status: HealthStatus,
    ) {
        let config = HealthConfig::default();
        let computed = compute_health_score(&counts(critical, error, warning), &config);
        assert_eq!(computed, score);
        assert_eq!(HealthStatus::from_score(computed), status);
    }

    #[test]
    fn test_status_boundaries() {
        assert_eq!(HealthStatus::from_score(90), HealthStatus::Healthy);
        assert_eq!(HealthStatus::from_score(89), HealthStatus::Degraded);
        assert_eq!(HealthStatus::from_score(70), HealthStatus::Degraded);
        assert_eq!(HealthStatus::from_score(69), HealthStatus::Unhealthy);
        assert_eq!(HealthStatus::from_score(50), HealthStatus::Unhealthy);
        assert_eq!(HealthStatus::from_score(49), HealthStatus::Critical);
    }

    #[test]
    fn test_payload_serializes_severity_keys() {
        let health = SystemHealth::new(
            counts(0, 1, 0),
            Vec::new(),
            &HealthConfig::default(),
            Utc::now(),
        );
        let json = serde_json::to_value(&health).unwrap();
        assert_eq!(json["health_score"], 95);
        assert_eq!(json["health_status"], "healthy");
        assert_eq!(json["recent_errors"]["error"], 1);
    }
}
