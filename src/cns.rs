//! Central nervous system recovery model
//!
//! Neural fatigue is tracked on a single track keyed to the most demanding
//! recent sessions. A workout is high-CNS when its RPE is at least 8 or its name
//! or exercise text matches one of the [`CNS_PATTERNS`] keyword groups.
//!
//! Each high-CNS workout recovers as `1 − e^(−ln2 × t / half_life)` with a
//! half-life of 48-120 hours, stretched by poor deep sleep and suppressed HRV
//! and divided by the stress modifier. The CNS score is the least-recovered
//! workout, so one brutal session dominates several easy ones.

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::f64::consts::LN_2;
use tracing::debug;

use crate::models::Workout;
use crate::safety::{
    as_of_horizon, clamp, days_before, elapsed_hours, parse_timestamp, safe_number, to_score,
};

/// Days of workout history considered
pub const LOOKBACK_DAYS: i64 = 14;

/// RPE at or above which any workout is neurologically demanding
pub const HIGH_CNS_RPE: f64 = 8.0;

pub const MIN_HALF_LIFE_HOURS: f64 = 48.0;
pub const MAX_HALF_LIFE_HOURS: f64 = 120.0;

/// Half-life used for the full-recovery projection
pub const PROJECTION_HALF_LIFE_HOURS: f64 = 96.0;

/// Below this recovery fraction a projection is emitted
pub const PROJECTION_THRESHOLD: f64 = 0.95;

const LOW_DEEP_SLEEP_MINUTES: f64 = 60.0;
const LOW_DEEP_SLEEP_FACTOR: f64 = 1.2;
const SUPPRESSED_HRV_DEVIATION_PCT: f64 = -10.0;
const SUPPRESSED_HRV_FACTOR: f64 = 1.1;

/// Version of the keyword table below; bump when the lists change
pub const CNS_PATTERN_VERSION: u32 = 2;

/// Kinds of neurologically demanding training
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CnsDemand {
    /// Intervals, sprints and mixed-modal conditioning
    HighIntensityConditioning,
    /// Near-maximal strength and Olympic lifting
    MaxEffortLifting,
    /// Plyometric and power development work
    Explosive,
}

/// Keyword group matched against whole words of workout text
#[derive(Debug, Clone, Copy)]
pub struct CnsPattern {
    pub demand: CnsDemand,
    pub keywords: &'static [&'static str],
}

pub const CNS_PATTERNS: &[CnsPattern] = &[
    CnsPattern {
        demand: CnsDemand::HighIntensityConditioning,
        keywords: &[
            "hiit", "sprint", "sprints", "interval", "intervals", "metcon", "wod", "amrap", "emom",
        ],
    },
    CnsPattern {
        demand: CnsDemand::MaxEffortLifting,
        keywords: &[
            "max", "1rm", "heavy", "deadlift", "deadlifts", "squat", "squats", "clean", "snatch",
            "jerk", "oly",
        ],
    },
    CnsPattern {
        demand: CnsDemand::Explosive,
        keywords: &["power", "explosive", "plyometric", "plyometrics", "plyo"],
    },
];

/// Static classifier for neurologically demanding workouts
pub struct CnsClassifier;

impl CnsClassifier {
    /// Demand category matched by free text, if any
    pub fn classify_text(text: &str) -> Option<CnsDemand> {
        let lower = text.to_lowercase();
        let words: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();

        CNS_PATTERNS
            .iter()
            .find(|pattern| words.iter().any(|w| pattern.keywords.contains(w)))
            .map(|pattern| pattern.demand)
    }

    /// Demand category matched by the workout name or any exercise name
    pub fn classify_workout(workout: &Workout) -> Option<CnsDemand> {
        workout
            .name
            .as_deref()
            .and_then(Self::classify_text)
            .or_else(|| {
                workout
                    .exercises
                    .iter()
                    .find_map(|e| Self::classify_text(&e.exercise_name))
            })
    }

    pub fn is_high_cns(workout: &Workout) -> bool {
        safe_number(workout.perceived_exertion, 0.0) >= HIGH_CNS_RPE
            || Self::classify_workout(workout).is_some()
    }
}

/// CNS model result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CnsModelOutput {
    pub cns_score: u8,
    pub projected_full_recovery: Option<DateTime<Utc>>,
}

impl CnsModelOutput {
    pub fn fully_recovered() -> Self {
        CnsModelOutput {
            cns_score: 100,
            projected_full_recovery: None,
        }
    }
}

pub struct CnsRecoveryModel;

impl CnsRecoveryModel {
    /// Base half-life in hours before sleep, HRV and stress adjustments
    pub fn half_life_hours(workout: &Workout) -> f64 {
        let rpe = clamp(safe_number(workout.perceived_exertion, 6.0), 1.0, 10.0);
        if rpe >= 9.0 || CnsClassifier::classify_workout(workout).is_some() {
            clamp(96.0 + 24.0 * (rpe / 10.0), MIN_HALF_LIFE_HOURS, MAX_HALF_LIFE_HOURS)
        } else if rpe >= 8.0 {
            72.0
        } else {
            MIN_HALF_LIFE_HOURS
        }
    }

    /// Fraction recovered after `hours_elapsed`, in `[0, 1]`
    pub fn recovery_fraction(hours_elapsed: f64, half_life: f64) -> f64 {
        if !hours_elapsed.is_finite() || hours_elapsed <= 0.0 {
            return 0.0;
        }
        clamp(1.0 - (-LN_2 * hours_elapsed / half_life.max(1.0)).exp(), 0.0, 1.0)
    }

    pub fn evaluate(
        workouts: &[Workout],
        as_of_date: &str,
        deep_sleep_last_night_minutes: Option<f64>,
        hrv_deviation_percent: Option<f64>,
        stress_modifier: f64,
    ) -> CnsModelOutput {
        let (Some(as_of), Some(horizon)) = (parse_timestamp(as_of_date), as_of_horizon(as_of_date))
        else {
            return CnsModelOutput::fully_recovered();
        };
        let cutoff = days_before(as_of, LOOKBACK_DAYS);
        let stress_mod = clamp(safe_number(Some(stress_modifier), 1.0), 0.8, 1.1);

        let mut worst_recovery = 1.0_f64;
        let mut latest_heavy: Option<NaiveDateTime> = None;

        for workout in workouts {
            let Some(performed) = parse_timestamp(&workout.date) else {
                continue;
            };
            if performed > horizon || performed < cutoff || !CnsClassifier::is_high_cns(workout) {
                continue;
            }

            let mut half_life = Self::half_life_hours(workout);
            if deep_sleep_last_night_minutes
                .is_some_and(|m| m.is_finite() && m < LOW_DEEP_SLEEP_MINUTES)
            {
                half_life *= LOW_DEEP_SLEEP_FACTOR;
            }
            if hrv_deviation_percent
                .is_some_and(|d| d.is_finite() && d < SUPPRESSED_HRV_DEVIATION_PCT)
            {
                half_life *= SUPPRESSED_HRV_FACTOR;
            }
            let effective = (half_life / stress_mod).max(1.0);

            let recovery = Self::recovery_fraction(elapsed_hours(performed, as_of), effective);
            worst_recovery = worst_recovery.min(recovery);
            latest_heavy = Some(latest_heavy.map_or(performed, |t| t.max(performed)));
        }

        let Some(latest_heavy) = latest_heavy else {
            return CnsModelOutput::fully_recovered();
        };

        let cns_score = to_score(worst_recovery * 100.0);
        let projected_full_recovery = if worst_recovery < PROJECTION_THRESHOLD {
            Self::project_full_recovery(latest_heavy, as_of)
        } else {
            None
        };

        debug!(cns_score, ?projected_full_recovery, "CNS model evaluated");

        CnsModelOutput {
            cns_score,
            projected_full_recovery,
        }
    }

    /// Time at which the latest heavy session reaches 99% recovery on the fixed
    /// projection half-life, if that is still ahead of `as_of`
    fn project_full_recovery(
        latest_heavy: NaiveDateTime,
        as_of: NaiveDateTime,
    ) -> Option<DateTime<Utc>> {
        let hours_to_99 = PROJECTION_HALF_LIFE_HOURS / LN_2 * 100.0_f64.ln();
        let full_at = latest_heavy
            .checked_add_signed(Duration::milliseconds((hours_to_99 * 3_600_000.0) as i64))?;

        (full_at > as_of).then(|| full_at.and_utc())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExerciseEntry;

    #[test]
    fn test_classifier_matches_whole_words() {
        assert_eq!(
            CnsClassifier::classify_text("Tuesday HIIT"),
            Some(CnsDemand::HighIntensityConditioning)
        );
        assert_eq!(
            CnsClassifier::classify_text("Back Squat 1RM test"),
            Some(CnsDemand::MaxEffortLifting)
        );
        assert_eq!(
            CnsClassifier::classify_text("box-jump plyometrics"),
            Some(CnsDemand::Explosive)
        );
        // "maximal" is not the word "max"
        assert_eq!(CnsClassifier::classify_text("maximal stretching"), None);
        assert_eq!(CnsClassifier::classify_text("easy recovery walk"), None);
    }

    #[test]
    fn test_classifier_reads_exercise_names() {
        let mut workout = Workout::new("w", "2025-02-19", 40.0, 5.0);
        assert!(!CnsClassifier::is_high_cns(&workout));

        workout.exercises.push(ExerciseEntry {
            exercise_name: "Power Clean".to_string(),
            sets: Some(5),
            reps: Some(2),
            weight_kg: Some(90.0),
        });
        assert!(CnsClassifier::is_high_cns(&workout));
    }

    #[test]
    fn test_high_rpe_is_high_cns() {
        let workout = Workout::new("w", "2025-02-19", 40.0, 8.0);
        assert!(CnsClassifier::is_high_cns(&workout));
    }

    #[test]
    fn test_no_high_cns_workout_scores_100() {
        let workouts = vec![Workout::new("w", "2025-02-19", 60.0, 6.0).with_name("Easy run")];
        let out = CnsRecoveryModel::evaluate(&workouts, "2025-02-20", None, None, 1.0);
        assert_eq!(out, CnsModelOutput::fully_recovered());
    }

    #[test]
    fn test_evening_session_on_as_of_day_suppresses_cns() {
        let workouts = vec![Workout::new("w", "2025-02-20T18:00:00", 60.0, 9.0)];
        let out = CnsRecoveryModel::evaluate(&workouts, "2025-02-20", None, None, 1.0);
        assert!(out.cns_score < 100);
        assert!(out.projected_full_recovery.is_some());
    }

    #[test]
    fn test_half_life_bounds() {
        let max_effort = Workout::new("w", "2025-02-19", 60.0, 10.0);
        assert_eq!(CnsRecoveryModel::half_life_hours(&max_effort), 120.0);

        let rpe_eight = Workout::new("w", "2025-02-19", 60.0, 8.0);
        assert_eq!(CnsRecoveryModel::half_life_hours(&rpe_eight), 72.0);

        let easy_hiit = Workout::new("w", "2025-02-19", 20.0, 5.0).with_name("HIIT");
        assert_eq!(CnsRecoveryModel::half_life_hours(&easy_hiit), 108.0);
    }

    #[test]
    fn test_recent_heavy_session_suppresses_cns() {
        let workouts = vec![Workout::new("w", "2025-02-19", 90.0, 9.0)];
        let out = CnsRecoveryModel::evaluate(&workouts, "2025-02-20", None, None, 1.0);

        // 24h on a 117.6h half-life is about 13% recovered
        assert_eq!(out.cns_score, 13);
        let projected = out.projected_full_recovery.expect("projection expected");
        assert!(projected.naive_utc() > parse_timestamp("2025-02-20").unwrap());
    }

    #[test]
    fn test_same_day_session_is_unrecovered() {
        let workouts = vec![Workout::new("w", "2025-02-20", 60.0, 9.0)];
        let out = CnsRecoveryModel::evaluate(&workouts, "2025-02-20", None, None, 1.0);
        assert_eq!(out.cns_score, 0);
    }

    #[test]
    fn test_poor_deep_sleep_and_hrv_slow_recovery() {
        let workouts = vec![Workout::new("w", "2025-02-17", 60.0, 8.0)];
        let baseline = CnsRecoveryModel::evaluate(&workouts, "2025-02-20", Some(90.0), Some(0.0), 1.0);
        let strained = CnsRecoveryModel::evaluate(&workouts, "2025-02-20", Some(30.0), Some(-20.0), 1.0);
        assert!(strained.cns_score < baseline.cns_score);
    }

    #[test]
    fn test_missing_inputs_never_nan() {
        let workouts = vec![Workout {
            perceived_exertion: None,
            duration_minutes: None,
            ..Workout::new("w", "2025-02-18", 0.0, 0.0).with_name("HIIT")
        }];
        let out = CnsRecoveryModel::evaluate(&workouts, "2025-02-20", None, Some(f64::NAN), f64::NAN);
        assert!(out.cns_score <= 100);
    }

    #[test]
    fn test_future_workout_excluded() {
        let workouts = vec![Workout::new("w", "2025-02-22", 60.0, 10.0)];
        let out = CnsRecoveryModel::evaluate(&workouts, "2025-02-20", None, None, 1.0);
        assert_eq!(out.cns_score, 100);
    }

    #[test]
    fn test_nearly_recovered_has_no_projection() {
        // Fourteen days on a 72h half-life is past 95%
        let workouts = vec![Workout::new("w", "2025-02-06", 60.0, 8.0)];
        let out = CnsRecoveryModel::evaluate(&workouts, "2025-02-20", None, None, 1.0);
        assert!(out.cns_score >= 95);
        assert!(out.projected_full_recovery.is_none());
    }
}
