//! Trend and safety model
//!
//! Two independent detectors over recent history:
//!
//! - **Overtraining** (days): five snapshots of strictly falling readiness, six
//!   or more consecutive training days, or more than 8 hours of sleep debt.
//! - **Deload** (weeks): with enough history and at least four ISO weeks of
//!   consistent training, either a three-point readiness decline or CNS
//!   suppression while five or more snapshots exist.
//!
//! Both flags may be set at once. Only history up to the end of the as-of
//! point counts; an unparsable as-of date raises neither flag.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

use crate::models::{RecoverySnapshot, Workout};
use crate::safety::{as_of_horizon, days_before, parse_timestamp, safe_number};

pub const OVERTRAINING_DECLINE_SNAPSHOTS: usize = 5;
pub const OVERTRAINING_CONSECUTIVE_DAYS: usize = 6;
pub const OVERTRAINING_SLEEP_DEBT_MINUTES: f64 = 480.0;

pub const DELOAD_MIN_SPAN_DAYS: i64 = 28;
pub const DELOAD_MIN_WORKOUTS: usize = 10;
pub const DELOAD_CONSISTENT_WEEKS: usize = 4;
pub const DELOAD_CNS_THRESHOLD: f64 = 50.0;
pub const DELOAD_CNS_SNAPSHOTS: usize = 5;

const DEFAULT_READINESS: f64 = 70.0;
const DEFAULT_CNS: f64 = 70.0;
const MAX_TRAINING_GAP_HOURS: f64 = 36.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TrendModelOutput {
    pub overtraining_flag: bool,
    pub deload_flag: bool,
}

pub struct TrendModel;

impl TrendModel {
    pub fn evaluate(
        recent_snapshots: &[RecoverySnapshot],
        workouts: &[Workout],
        as_of_date: &str,
        sleep_debt_minutes: f64,
        cns_score: f64,
    ) -> TrendModelOutput {
        let (Some(as_of), Some(horizon)) = (parse_timestamp(as_of_date), as_of_horizon(as_of_date))
        else {
            debug!(as_of_date, "Unparsable as-of date, no trend flags");
            return TrendModelOutput::default();
        };
        let earliest = days_before(as_of, DELOAD_MIN_SPAN_DAYS);

        let snapshots = Self::newest_first(recent_snapshots, horizon);
        let readiness: Vec<f64> = snapshots
            .iter()
            .map(|(_, s)| safe_number(s.readiness_score, DEFAULT_READINESS))
            .collect();

        let workout_times: Vec<NaiveDateTime> = workouts
            .iter()
            .filter_map(|w| parse_timestamp(&w.date))
            .filter(|ts| *ts >= earliest && *ts <= horizon)
            .collect();

        let declining = Self::strictly_declining(&readiness, OVERTRAINING_DECLINE_SNAPSHOTS);
        let consecutive_days = Self::max_consecutive_training_days(&workout_times);
        let sleep_debt = safe_number(Some(sleep_debt_minutes), 0.0).max(0.0);

        let overtraining_flag = declining
            || consecutive_days >= OVERTRAINING_CONSECUTIVE_DAYS
            || sleep_debt > OVERTRAINING_SLEEP_DEBT_MINUTES;

        let deload_flag = Self::deload(&snapshots, &readiness, &workout_times, cns_score);

        debug!(
            declining,
            consecutive_days, sleep_debt, overtraining_flag, deload_flag, "Trend model evaluated"
        );

        TrendModelOutput {
            overtraining_flag,
            deload_flag,
        }
    }

    /// Snapshots with a parsable date no later than `horizon`, newest first
    fn newest_first(
        snapshots: &[RecoverySnapshot],
        horizon: NaiveDateTime,
    ) -> Vec<(NaiveDateTime, &RecoverySnapshot)> {
        let mut sorted: Vec<_> = snapshots
            .iter()
            .filter_map(|s| parse_timestamp(&s.date).map(|ts| (ts, s)))
            .filter(|(ts, _)| *ts <= horizon)
            .collect();
        sorted.sort_by(|a, b| b.0.cmp(&a.0));
        sorted
    }

    /// True when the newest `count` scores fall strictly with each newer day
    pub fn strictly_declining(newest_first: &[f64], count: usize) -> bool {
        newest_first.len() >= count
            && newest_first[..count].windows(2).all(|pair| pair[0] < pair[1])
    }

    /// Longest run of training days where each session follows the previous
    /// training day within 36 hours
    pub fn max_consecutive_training_days(times: &[NaiveDateTime]) -> usize {
        let mut by_day: BTreeMap<NaiveDate, NaiveDateTime> = BTreeMap::new();
        for ts in times {
            by_day
                .entry(ts.date())
                .and_modify(|t| *t = (*t).min(*ts))
                .or_insert(*ts);
        }

        let mut longest = 0;
        let mut current = 0;
        let mut previous: Option<NaiveDateTime> = None;
        for ts in by_day.values() {
            current = match previous {
                Some(prev) if (*ts - prev) <= Duration::hours(MAX_TRAINING_GAP_HOURS as i64) => {
                    current + 1
                }
                _ => 1,
            };
            longest = longest.max(current);
            previous = Some(*ts);
        }
        longest
    }

    fn deload(
        snapshots: &[(NaiveDateTime, &RecoverySnapshot)],
        readiness: &[f64],
        workout_times: &[NaiveDateTime],
        cns_score: f64,
    ) -> bool {
        // Anchored on the newest snapshot so the result depends only on the input
        let anchor = snapshots
            .first()
            .map(|(ts, _)| *ts)
            .or_else(|| workout_times.iter().max().copied());
        let Some(anchor) = anchor else {
            return false;
        };
        let cutoff = days_before(anchor, DELOAD_MIN_SPAN_DAYS);

        let recent: Vec<&NaiveDateTime> = workout_times.iter().filter(|ts| **ts >= cutoff).collect();

        let span_days = match (snapshots.first(), snapshots.last()) {
            (Some((newest, _)), Some((oldest, _))) => (*newest - *oldest).num_days(),
            _ => 0,
        };
        let has_enough_data =
            span_days >= DELOAD_MIN_SPAN_DAYS || recent.len() >= DELOAD_MIN_WORKOUTS;

        let weeks: HashSet<(i32, u32)> = recent
            .iter()
            .map(|ts| {
                let week = ts.date().iso_week();
                (week.year(), week.week())
            })
            .collect();
        let consistent_load = weeks.len() >= DELOAD_CONSISTENT_WEEKS;

        let downward_trend = Self::strictly_declining(readiness, 3);
        let cns = safe_number(Some(cns_score), DEFAULT_CNS);
        let cns_suppressed = cns < DELOAD_CNS_THRESHOLD && snapshots.len() >= DELOAD_CNS_SNAPSHOTS;

        has_enough_data && consistent_load && (downward_trend || cns_suppressed)
    }
}
