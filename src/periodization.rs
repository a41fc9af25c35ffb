//! Periodization and deload-cycle layer
//!
//! Works on up to 28 days of persisted snapshots rather than the in-memory
//! trend model. A deload is recommended only when every condition holds:
//!
//! 1. At least 28 snapshot rows exist
//! 2. Readiness over the newer half of the last 10 rows averages below the older half
//! 3. At least 2 of the last 14 rows were flagged for overtraining
//! 4. Average sleep debt across all rows exceeds 300 minutes
//!
//! While a deload cycle is active the check is skipped and the cycle's stored
//! reduction is reported instead.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::{DeloadCycle, DeloadSnapshotRow};
use crate::safety::{mean, parse_timestamp, safe_number};

pub const MIN_SNAPSHOT_ROWS: usize = 28;
pub const TREND_ROWS: usize = 10;
pub const OVERTRAINING_LOOKBACK_ROWS: usize = 14;
pub const OVERTRAINING_MIN_COUNT: usize = 2;
pub const SLEEP_DEBT_THRESHOLD_MINUTES: f64 = 300.0;
pub const SUGGESTED_REDUCTION_PCT: u8 = 30;
pub const DELOAD_REASON: &str = "Accumulated fatigue trend detected";

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeloadRecommendation {
    pub deload_recommended: bool,
    pub reason: Option<String>,
    pub suggested_reduction_pct: Option<u8>,
}

impl DeloadRecommendation {
    fn recommended() -> Self {
        DeloadRecommendation {
            deload_recommended: true,
            reason: Some(DELOAD_REASON.to_string()),
            suggested_reduction_pct: Some(SUGGESTED_REDUCTION_PCT),
        }
    }
}

/// Result of the periodization step for one user and date
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PeriodizationStatus {
    /// A cycle is already running; its stored reduction applies
    InDeload { volume_reduction_pct: u8 },
    /// A new cycle should start
    StartDeload { reason: String, volume_reduction_pct: u8 },
    NoDeload,
}

impl PeriodizationStatus {
    pub fn volume_reduction_pct(&self) -> Option<u8> {
        match self {
            PeriodizationStatus::InDeload {
                volume_reduction_pct,
            }
            | PeriodizationStatus::StartDeload {
                volume_reduction_pct,
                ..
            } => Some(*volume_reduction_pct),
            PeriodizationStatus::NoDeload => None,
        }
    }
}

pub struct PeriodizationEngine;

impl PeriodizationEngine {
    pub fn evaluate(rows: &[DeloadSnapshotRow]) -> DeloadRecommendation {
        if rows.len() < MIN_SNAPSHOT_ROWS {
            return DeloadRecommendation::default();
        }

        let mut sorted: Vec<&DeloadSnapshotRow> = rows.iter().collect();
        sorted.sort_by_key(|row| parse_timestamp(&row.date));

        let last10 = &sorted[sorted.len() - TREND_ROWS..];
        let readiness = |slice: &[&DeloadSnapshotRow]| -> f64 {
            let values: Vec<f64> = slice
                .iter()
                .map(|row| safe_number(row.readiness_score, 0.0))
                .collect();
            mean(&values)
        };
        let older = readiness(&last10[..TREND_ROWS / 2]);
        let newer = readiness(&last10[TREND_ROWS / 2..]);
        let downward_trend = newer < older;

        let overtraining_days = sorted[sorted.len().saturating_sub(OVERTRAINING_LOOKBACK_ROWS)..]
            .iter()
            .filter(|row| row.overtraining_flag)
            .count();

        let debts: Vec<f64> = sorted
            .iter()
            .map(|row| safe_number(row.sleep_debt, 0.0))
            .collect();
        let avg_sleep_debt = mean(&debts);

        let recommended = downward_trend
            && overtraining_days >= OVERTRAINING_MIN_COUNT
            && avg_sleep_debt > SLEEP_DEBT_THRESHOLD_MINUTES;

        debug!(
            rows = rows.len(),
            older,
            newer,
            overtraining_days,
            avg_sleep_debt,
            recommended,
            "Periodization check evaluated"
        );

        if recommended {
            DeloadRecommendation::recommended()
        } else {
            DeloadRecommendation::default()
        }
    }

    /// Periodization decision given the user's active cycle, if any
    pub fn assess(active_cycle: Option<&DeloadCycle>, rows: &[DeloadSnapshotRow]) -> PeriodizationStatus {
        if let Some(cycle) = active_cycle.filter(|c| c.is_active()) {
            return PeriodizationStatus::InDeload {
                volume_reduction_pct: cycle.volume_reduction_pct,
            };
        }

        let recommendation = Self::evaluate(rows);
        match (recommendation.reason, recommendation.suggested_reduction_pct) {
            (Some(reason), Some(pct)) if recommendation.deload_recommended => {
                PeriodizationStatus::StartDeload {
                    reason,
                    volume_reduction_pct: pct,
                }
            }
            _ => PeriodizationStatus::NoDeload,
        }
    }
}
