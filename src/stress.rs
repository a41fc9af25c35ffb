//! Stress model and HRV helpers
//!
//! Averages self-reported stress (1-10) over the last week, buckets it into a
//! [`StressLevel`] and maps it linearly onto a 0-100 score where lower stress
//! scores higher. The level's modifier slows recovery decay for stressed users.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

use crate::models::StressLog;
use crate::safety::{as_of_horizon, clamp, days_before, mean, parse_timestamp, to_score};

pub const WINDOW_DAYS: i64 = 7;
pub const DEFAULT_STRESS_LEVEL: f64 = 5.0;
const INVALID_DATE_SCORE: u8 = 70;

/// Minimum number of HRV readings for a baseline
pub const MIN_HRV_READINGS: usize = 3;

/// Stress level bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StressLevel {
    Low,
    Moderate,
    High,
    VeryHigh,
}

impl StressLevel {
    pub fn from_average(avg: f64) -> Self {
        if avg <= 3.0 {
            StressLevel::Low
        } else if avg <= 5.0 {
            StressLevel::Moderate
        } else if avg <= 7.0 {
            StressLevel::High
        } else {
            StressLevel::VeryHigh
        }
    }

    /// Decay-rate modifier applied to muscle and CNS recovery
    pub fn modifier(&self) -> f64 {
        match self {
            StressLevel::Low => 1.1,
            StressLevel::Moderate => 1.0,
            StressLevel::High => 0.9,
            StressLevel::VeryHigh => 0.8,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StressLevel::Low => "low",
            StressLevel::Moderate => "moderate",
            StressLevel::High => "high",
            StressLevel::VeryHigh => "very_high",
        }
    }
}

impl fmt::Display for StressLevel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for StressLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace(['-', ' '], "_").as_str() {
            "low" => Ok(StressLevel::Low),
            "moderate" => Ok(StressLevel::Moderate),
            "high" => Ok(StressLevel::High),
            "very_high" => Ok(StressLevel::VeryHigh),
            _ => Err(format!("Invalid stress level: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StressModelOutput {
    pub stress_score: u8,
    /// Modifier in `[0.8, 1.1]`
    pub stress_modifier: f64,
    pub level: StressLevel,
    /// Average stress level the score was derived from
    pub average_stress: f64,
}

pub struct StressModel;

impl StressModel {
    /// Linear map from average stress to score, 1 ⇒ 100 and 10 ⇒ 0
    pub fn score_for_average(avg: f64) -> u8 {
        to_score(100.0 - (avg - 1.0) * (100.0 / 9.0))
    }

    pub fn evaluate(stress_logs: &[StressLog], as_of_date: &str) -> StressModelOutput {
        let (Some(as_of), Some(horizon)) = (parse_timestamp(as_of_date), as_of_horizon(as_of_date))
        else {
            warn!(as_of_date, "Unparsable as-of date, using neutral stress");
            return StressModelOutput {
                stress_score: INVALID_DATE_SCORE,
                stress_modifier: 1.0,
                level: StressLevel::Moderate,
                average_stress: DEFAULT_STRESS_LEVEL,
            };
        };
        let window_start = days_before(as_of, WINDOW_DAYS);

        let levels: Vec<f64> = stress_logs
            .iter()
            .filter(|log| {
                parse_timestamp(&log.date).is_some_and(|ts| ts >= window_start && ts <= horizon)
            })
            .filter_map(|log| log.stress_level.filter(|v| v.is_finite()))
            .map(|v| clamp(v, 1.0, 10.0))
            .collect();

        let average_stress = if levels.is_empty() {
            DEFAULT_STRESS_LEVEL
        } else {
            mean(&levels)
        };
        let level = StressLevel::from_average(average_stress);

        debug!(average_stress, level = %level, "Stress model evaluated");

        StressModelOutput {
            stress_score: Self::score_for_average(average_stress),
            stress_modifier: level.modifier(),
            level,
            average_stress,
        }
    }
}

/// Recent HRV reading and rolling baseline taken from stress logs
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct HrvSummary {
    pub recent_ms: Option<f64>,
    pub baseline_ms: Option<f64>,
}

impl HrvSummary {
    /// Recent reading is the as-of day's, else the newest in the window. The
    /// baseline needs at least [`MIN_HRV_READINGS`] readings. Only readings in
    /// the 7 days up to the as-of date are used.
    pub fn from_logs(stress_logs: &[StressLog], as_of_date: &str) -> Self {
        let (Some(as_of), Some(horizon)) = (parse_timestamp(as_of_date), as_of_horizon(as_of_date))
        else {
            return HrvSummary::default();
        };
        let as_of_day = as_of.date();
        let window_start = days_before(as_of, WINDOW_DAYS);

        let mut readings: Vec<(chrono::NaiveDateTime, f64)> = stress_logs
            .iter()
            .filter_map(|log| {
                let ts = parse_timestamp(&log.date)?;
                if ts < window_start || ts > horizon {
                    return None;
                }
                let hrv = log.hrv_ms.filter(|v| v.is_finite() && *v > 0.0)?;
                Some((ts, hrv))
            })
            .collect();
        readings.sort_by(|a, b| b.0.cmp(&a.0));

        let recent_ms = readings
            .iter()
            .find(|(ts, _)| ts.date() == as_of_day)
            .or_else(|| readings.first())
            .map(|(_, hrv)| *hrv);

        let baseline_ms = (readings.len() >= MIN_HRV_READINGS).then(|| {
            let values: Vec<f64> = readings.iter().map(|(_, hrv)| *hrv).collect();
            mean(&values).round()
        });

        HrvSummary {
            recent_ms,
            baseline_ms,
        }
    }
}

/// Percent deviation of a recent HRV reading from baseline; negative means
/// suppressed
pub fn hrv_deviation_percent(recent_ms: Option<f64>, baseline_ms: Option<f64>) -> Option<f64> {
    let recent = recent_ms.filter(|v| v.is_finite())?;
    let baseline = baseline_ms.filter(|v| v.is_finite() && *v > 0.0)?;
    Some((recent - baseline) / baseline * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn log(date: &str, level: Option<f64>, hrv: Option<f64>) -> StressLog {
        StressLog {
            date: date.to_string(),
            stress_level: level,
            hrv_ms: hrv,
        }
    }

    #[test]
    fn test_no_data_is_moderate() {
        let out = StressModel::evaluate(&[], "2025-02-20");
        assert_eq!(out.level, StressLevel::Moderate);
        assert_eq!(out.stress_modifier, 1.0);
        assert_eq!(out.stress_score, 56);
        assert_eq!(out.average_stress, 5.0);
    }

    #[test]
    fn test_invalid_date_defaults() {
        let out = StressModel::evaluate(&[log("2025-02-19", Some(9.0), None)], "not a date");
        assert_eq!(out.stress_score, 70);
        assert_eq!(out.stress_modifier, 1.0);
        assert_eq!(out.level, StressLevel::Moderate);
    }

    #[test]
    fn test_level_buckets() {
        assert_eq!(StressLevel::from_average(2.0), StressLevel::Low);
        assert_eq!(StressLevel::from_average(3.0), StressLevel::Low);
        assert_eq!(StressLevel::from_average(5.0), StressLevel::Moderate);
        assert_eq!(StressLevel::from_average(6.5), StressLevel::High);
        assert_eq!(StressLevel::from_average(8.0), StressLevel::VeryHigh);
    }

    #[test]
    fn test_high_stress_scores_low() {
        let logs = vec![log("2025-02-18", Some(8.0), None), log("2025-02-19", Some(8.0), None)];
        let out = StressModel::evaluate(&logs, "2025-02-20");
        assert_eq!(out.level, StressLevel::VeryHigh);
        assert_eq!(out.stress_modifier, 0.8);
        assert_eq!(out.stress_score, 22);
    }

    #[test]
    fn test_out_of_window_and_missing_levels_ignored() {
        let logs = vec![
            log("2025-01-01", Some(10.0), None),
            log("2025-02-19", None, Some(60.0)),
            log("2025-02-19", Some(2.0), None),
        ];
        let out = StressModel::evaluate(&logs, "2025-02-20");
        assert_eq!(out.average_stress, 2.0);
        assert_eq!(out.level, StressLevel::Low);
    }

    #[test]
    fn test_stress_level_from_str() {
        assert_eq!("very high".parse::<StressLevel>(), Ok(StressLevel::VeryHigh));
        assert_eq!("LOW".parse::<StressLevel>(), Ok(StressLevel::Low));
        assert!("calm".parse::<StressLevel>().is_err());
    }

    #[test]
    fn test_hrv_summary_prefers_as_of_day() {
        let logs = vec![
            log("2025-02-17", Some(4.0), Some(60.0)),
            log("2025-02-18", Some(4.0), Some(62.0)),
            log("2025-02-20", Some(4.0), Some(50.0)),
            log("2025-02-19", Some(4.0), Some(64.0)),
        ];
        let hrv = HrvSummary::from_logs(&logs, "2025-02-20");
        assert_eq!(hrv.recent_ms, Some(50.0));
        assert_eq!(hrv.baseline_ms, Some(59.0));
    }

    #[test]
    fn test_hrv_summary_falls_back_to_newest() {
        let logs = vec![log("2025-02-17", None, Some(60.0)), log("2025-02-18", None, Some(58.0))];
        let hrv = HrvSummary::from_logs(&logs, "2025-02-20");
        assert_eq!(hrv.recent_ms, Some(58.0));
        assert_eq!(hrv.baseline_ms, None);
    }

    #[test]
    fn test_hrv_summary_ignores_future_and_stale_readings() {
        let logs = vec![
            log("2025-01-10", None, Some(20.0)),
            log("2025-02-18", None, Some(60.0)),
            log("2025-02-19", None, Some(62.0)),
            log("2025-02-22", None, Some(95.0)),
        ];
        let hrv = HrvSummary::from_logs(&logs, "2025-02-20");
        assert_eq!(hrv.recent_ms, Some(62.0));
        assert_eq!(hrv.baseline_ms, None);

        assert_eq!(HrvSummary::from_logs(&logs, "not a date"), HrvSummary::default());
    }

    #[test]
    fn test_hrv_deviation() {
        assert_eq!(hrv_deviation_percent(Some(45.0), Some(50.0)), Some(-10.0));
        assert_eq!(hrv_deviation_percent(None, Some(50.0)), None);
        assert_eq!(hrv_deviation_percent(Some(45.0), Some(0.0)), None);
        assert_eq!(hrv_deviation_percent(Some(f64::NAN), Some(50.0)), None);
    }

    proptest! {
        #[test]
        fn prop_modifier_and_score_bounded(levels in prop::collection::vec(-50.0f64..50.0, 0..10)) {
            let logs: Vec<StressLog> = levels
                .iter()
                .map(|l| log("2025-02-19", Some(*l), None))
                .collect();
            let out = StressModel::evaluate(&logs, "2025-02-20");
            prop_assert!(out.stress_score <= 100);
            prop_assert!((0.8..=1.1).contains(&out.stress_modifier));
        }

        #[test]
        fn prop_score_decreases_with_stress(a in 1.0f64..10.0, b in 1.0f64..10.0) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(StressModel::score_for_average(lo) >= StressModel::score_for_average(hi));
        }
    }
}
