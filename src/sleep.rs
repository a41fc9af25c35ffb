//! Sleep model
//!
//! Scores the trailing week of sleep and converts it into the recovery
//! modifier that speeds up or slows down muscle and CNS decay.
//!
//! ## Nightly score
//!
//! ```text
//! night = 0.4 × duration_component + 0.5 × quality × 10 + stage_bonus − awakening_penalty
//! ```
//!
//! The duration component peaks at 100 for 7-9 hours of sleep and ramps down on
//! either side. Nights where deep plus REM sleep make up at least 35% of the
//! total earn a 10 point bonus; each awakening costs 3 points, capped at 15.
//!
//! ## Sleep debt
//!
//! Debt accumulates against an 8 hour target: `Σ max(0, 480 − total)` over the
//! window. It is never negative and oversleeping does not pay it back.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::models::SleepLog;
use crate::safety::{
    as_of_horizon, clamp, days_before, mean, parse_timestamp, safe_number, to_score,
};

pub const WINDOW_DAYS: i64 = 7;
pub const TARGET_SLEEP_MINUTES: f64 = 480.0;
pub const DEFAULT_SLEEP_SCORE: f64 = 70.0;

const OPTIMAL_MIN_MINUTES: f64 = 420.0;
const OPTIMAL_MAX_MINUTES: f64 = 540.0;
const SHORT_SLEEP_MINUTES: f64 = 360.0;
const NEUTRAL_DURATION_SCORE: f64 = 50.0;

const RESTORATIVE_STAGE_RATIO: f64 = 0.35;
const STAGE_BONUS: f64 = 10.0;
const AWAKENING_PENALTY: f64 = 3.0;
const MAX_AWAKENING_PENALTY: f64 = 15.0;

/// Score for a single night
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NightlySleepScore {
    pub date: NaiveDate,
    pub score: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SleepModelOutput {
    pub sleep_score: u8,
    pub cumulative_sleep_debt_minutes: f64,
    /// Decay-rate modifier in `[0.8, 1.2]`
    pub recovery_modifier: f64,
    /// Nightly scores inside the window, newest first
    pub nights: Vec<NightlySleepScore>,
    /// Σ deep ÷ Σ total over the window, when any sleep was logged
    pub deep_sleep_ratio: Option<f64>,
}

impl SleepModelOutput {
    fn neutral() -> Self {
        SleepModelOutput {
            sleep_score: to_score(DEFAULT_SLEEP_SCORE),
            cumulative_sleep_debt_minutes: 0.0,
            recovery_modifier: 1.0,
            nights: Vec::new(),
            deep_sleep_ratio: None,
        }
    }
}

pub struct SleepModel;

impl SleepModel {
    /// Duration component of the nightly score, 0-100
    pub fn duration_score(total_minutes: f64) -> f64 {
        let t = total_minutes;
        if !t.is_finite() || t <= 0.0 {
            NEUTRAL_DURATION_SCORE
        } else if (OPTIMAL_MIN_MINUTES..=OPTIMAL_MAX_MINUTES).contains(&t) {
            100.0
        } else if t >= SHORT_SLEEP_MINUTES && t < OPTIMAL_MIN_MINUTES {
            70.0 + (t - SHORT_SLEEP_MINUTES) / 60.0 * 15.0
        } else if t < SHORT_SLEEP_MINUTES {
            (30.0 + t / SHORT_SLEEP_MINUTES * 40.0).max(0.0)
        } else {
            (100.0 - (t - OPTIMAL_MAX_MINUTES) / 60.0 * 15.0).max(0.0)
        }
    }

    /// Unrounded nightly score, 0-100
    pub fn night_score(log: &SleepLog) -> f64 {
        let total = safe_number(log.total_minutes, 0.0).max(0.0);
        let quality = clamp(safe_number(log.quality, 5.0), 1.0, 10.0);
        let deep = safe_number(log.deep_sleep_minutes, 0.0).max(0.0);
        let rem = safe_number(log.rem_minutes, 0.0).max(0.0);
        let awakenings = safe_number(log.awakenings, 0.0).max(0.0);

        let stage_bonus = if total > 0.0 && (deep + rem) / total >= RESTORATIVE_STAGE_RATIO {
            STAGE_BONUS
        } else {
            0.0
        };
        let penalty = (awakenings * AWAKENING_PENALTY).min(MAX_AWAKENING_PENALTY);

        clamp(
            0.4 * Self::duration_score(total) + 0.5 * quality * 10.0 + stage_bonus - penalty,
            0.0,
            100.0,
        )
    }

    pub fn recovery_modifier(sleep_score: f64) -> f64 {
        clamp(0.8 + (sleep_score / 100.0) * 0.4, 0.8, 1.2)
    }

    pub fn evaluate(sleep_logs: &[SleepLog], as_of_date: &str) -> SleepModelOutput {
        let (Some(as_of), Some(horizon)) = (parse_timestamp(as_of_date), as_of_horizon(as_of_date))
        else {
            warn!(as_of_date, "Unparsable as-of date, using neutral sleep score");
            return SleepModelOutput::neutral();
        };
        let window_start = days_before(as_of, WINDOW_DAYS);

        let mut in_window: Vec<(NaiveDate, &SleepLog)> = sleep_logs
            .iter()
            .filter_map(|log| {
                let ts = parse_timestamp(&log.date)?;
                (ts >= window_start && ts <= horizon).then(|| (ts.date(), log))
            })
            .collect();
        in_window.sort_by(|a, b| b.0.cmp(&a.0));

        let raw_scores: Vec<f64> = in_window.iter().map(|(_, log)| Self::night_score(log)).collect();
        let sleep_score = if raw_scores.is_empty() {
            DEFAULT_SLEEP_SCORE
        } else {
            mean(&raw_scores)
        };

        let debt: f64 = in_window
            .iter()
            .map(|(_, log)| {
                (TARGET_SLEEP_MINUTES - safe_number(log.total_minutes, 0.0).max(0.0)).max(0.0)
            })
            .sum();

        let total_sleep: f64 = in_window
            .iter()
            .map(|(_, log)| safe_number(log.total_minutes, 0.0).max(0.0))
            .sum();
        let total_deep: f64 = in_window
            .iter()
            .map(|(_, log)| safe_number(log.deep_sleep_minutes, 0.0).max(0.0))
            .sum();
        let deep_sleep_ratio = (total_sleep > 0.0).then(|| clamp(total_deep / total_sleep, 0.0, 1.0));

        let nights = in_window
            .iter()
            .zip(&raw_scores)
            .map(|((date, _), score)| NightlySleepScore {
                date: *date,
                score: to_score(*score),
            })
            .collect();

        let output = SleepModelOutput {
            sleep_score: to_score(sleep_score),
            cumulative_sleep_debt_minutes: debt.max(0.0),
            recovery_modifier: Self::recovery_modifier(sleep_score),
            nights,
            deep_sleep_ratio,
        };

        debug!(
            sleep_score = output.sleep_score,
            debt = output.cumulative_sleep_debt_minutes,
            nights = raw_scores.len(),
            "Sleep model evaluated"
        );

        output
    }
}
