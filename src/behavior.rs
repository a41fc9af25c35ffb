//! Behavioral compliance and streaks
//!
//! Daily booleans derived from the engine output plus recent workout dates,
//! and streak counts over the persisted history of those booleans.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::models::{BehaviorRow, Recommendation};
use crate::safety::parse_date;

pub const SLEEP_DEBT_TOLERANCE_MINUTES: f64 = 60.0;
pub const MAX_CONSECUTIVE_TRAINING_DAYS: usize = 3;
pub const STREAK_LOOKBACK_DAYS: i64 = 60;

/// Inputs for one day's compliance booleans
#[derive(Debug, Clone, PartialEq)]
pub struct BehaviorInput {
    pub recommendation: Recommendation,
    pub workout_logged_today: bool,
    pub sleep_debt_minutes: f64,
    /// Dates with at least one workout in the last 7 days
    pub last_7_days_workout_dates: Vec<NaiveDate>,
    pub overtraining_flag: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BehaviorOutput {
    pub recovery_compliant: bool,
    pub sleep_target_met: bool,
    pub balanced_training: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StreakOutput {
    pub recovery_streak: u32,
    pub sleep_streak: u32,
    pub balance_streak: u32,
}

pub struct BehaviorEngine;

impl BehaviorEngine {
    pub fn evaluate(input: &BehaviorInput) -> BehaviorOutput {
        let recovery_compliant = matches!(
            (input.recommendation, input.workout_logged_today),
            (Recommendation::Rest, false) | (Recommendation::Train, true)
        );

        // NaN debt fails the comparison and counts as missed
        let sleep_target_met = input.sleep_debt_minutes <= SLEEP_DEBT_TOLERANCE_MINUTES;

        let balanced_training = !input.overtraining_flag
            && Self::max_consecutive_days(&input.last_7_days_workout_dates)
                <= MAX_CONSECUTIVE_TRAINING_DAYS;

        BehaviorOutput {
            recovery_compliant,
            sleep_target_met,
            balanced_training,
        }
    }

    /// Longest run of calendar-adjacent dates
    pub fn max_consecutive_days(dates: &[NaiveDate]) -> usize {
        let mut sorted = dates.to_vec();
        sorted.sort();
        sorted.dedup();

        let mut longest = 0;
        let mut run = 0;
        let mut previous: Option<NaiveDate> = None;
        for date in sorted {
            run = match previous {
                Some(prev) if date - prev == Duration::days(1) => run + 1,
                _ => 1,
            };
            longest = longest.max(run);
            previous = Some(date);
        }
        longest
    }
}

pub struct StreakEngine;

impl StreakEngine {
    /// Streaks ending on `as_of`. A missing or false day ends the streak.
    pub fn evaluate(history: &[BehaviorRow], as_of: NaiveDate) -> StreakOutput {
        let mut by_date: HashMap<NaiveDate, &BehaviorRow> = HashMap::new();
        for row in history {
            let Some(date) = parse_date(&row.date) else {
                continue;
            };
            if date > as_of {
                continue;
            }
            // History arrives newest first; the first row for a date wins
            by_date.entry(date).or_insert(row);
        }

        StreakOutput {
            recovery_streak: Self::count(&by_date, as_of, |r| r.recovery_compliant),
            sleep_streak: Self::count(&by_date, as_of, |r| r.sleep_target_met),
            balance_streak: Self::count(&by_date, as_of, |r| r.balanced_training),
        }
    }

    fn count(
        by_date: &HashMap<NaiveDate, &BehaviorRow>,
        as_of: NaiveDate,
        value: impl Fn(&BehaviorRow) -> bool,
    ) -> u32 {
        let mut count = 0;
        for offset in 0..STREAK_LOOKBACK_DAYS {
            let Some(day) = as_of.checked_sub_signed(Duration::days(offset)) else {
                break;
            };
            match by_date.get(&day) {
                Some(row) if value(row) => count += 1,
                _ => break,
            }
        }
        count
    }
}
