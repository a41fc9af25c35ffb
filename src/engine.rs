//! Recovery orchestrator
//!
//! Runs the sleep, stress, muscle, CNS and trend models over one pre-fetched
//! [`RecoveryEngineInput`] and blends them into a single readiness score:
//!
//! ```text
//! overall = round(0.4 × muscular + 0.3 × cns + 0.2 × sleep + 0.1 × stress)
//! ```
//!
//! Sleep and stress run first because their modifiers feed the muscle and CNS
//! decay rates. The engine performs no I/O and holds no state, so calls for
//! different users or dates can run in parallel freely.

use chrono::{DateTime, Utc};
use tracing::{debug, instrument};

use crate::cns::CnsRecoveryModel;
use crate::models::{Recommendation, RecoveryEngineInput, RecoveryEngineOutput, Workout};
use crate::muscle::MuscleRecoveryModel;
use crate::safety::{as_of_horizon, clamp, days_before, parse_date, parse_timestamp, safe_number};
use crate::sleep::SleepModel;
use crate::stress::{hrv_deviation_percent, HrvSummary, StressModel};
use crate::trend::TrendModel;

pub const MUSCULAR_WEIGHT: f64 = 0.4;
pub const CNS_WEIGHT: f64 = 0.3;
pub const SLEEP_WEIGHT: f64 = 0.2;
pub const STRESS_WEIGHT: f64 = 0.1;

/// Age at which muscle recovery starts to slow
pub const MASTERS_AGE_YEARS: f64 = 40.0;
pub const MASTERS_AGE_FACTOR: f64 = 0.95;

const ACUTE_DAYS: i64 = 7;
const CHRONIC_DAYS: i64 = 14;

pub struct RecoveryEngine;

impl RecoveryEngine {
    /// Compute the full recovery picture, stamped with the current time
    pub fn run(input: &RecoveryEngineInput) -> RecoveryEngineOutput {
        Self::run_at(input, Utc::now())
    }

    /// Same as [`RecoveryEngine::run`] with an explicit generation timestamp
    #[instrument(skip_all, fields(as_of = %input.as_of_date, workouts = input.workouts.len()))]
    pub fn run_at(input: &RecoveryEngineInput, generated_at: DateTime<Utc>) -> RecoveryEngineOutput {
        let as_of = input.as_of_date.as_str();

        let sleep = SleepModel::evaluate(&input.sleep_logs, as_of);
        let stress = StressModel::evaluate(&input.stress_logs, as_of);

        let muscle = MuscleRecoveryModel::evaluate(
            &input.workouts,
            as_of,
            sleep.recovery_modifier,
            stress.stress_modifier,
            Self::age_factor(input.age_years),
        );

        let hrv = if input.recent_hrv_ms.is_none() && input.baseline_hrv_ms.is_none() {
            HrvSummary::from_logs(&input.stress_logs, as_of)
        } else {
            HrvSummary {
                recent_ms: input.recent_hrv_ms,
                baseline_ms: input.baseline_hrv_ms,
            }
        };
        let hrv_deviation = hrv_deviation_percent(hrv.recent_ms, hrv.baseline_ms);

        let cns = CnsRecoveryModel::evaluate(
            &input.workouts,
            as_of,
            Self::deep_sleep_last_night(input),
            hrv_deviation,
            stress.stress_modifier,
        );

        let trend = TrendModel::evaluate(
            &input.recent_snapshots,
            &input.workouts,
            as_of,
            sleep.cumulative_sleep_debt_minutes,
            f64::from(cns.cns_score),
        );

        let overall_score = Self::overall_score(
            muscle.aggregate_score,
            cns.cns_score,
            sleep.sleep_score,
            stress.stress_score,
        );
        let recommendation = Recommendation::from_score(overall_score);

        debug!(
            overall_score,
            muscular = muscle.aggregate_score,
            cns = cns.cns_score,
            sleep = sleep.sleep_score,
            stress = stress.stress_score,
            %recommendation,
            "Recovery computed"
        );

        RecoveryEngineOutput {
            muscular_score: muscle.aggregate_score,
            muscle_breakdown: muscle.group_scores,
            cns_score: cns.cns_score,
            sleep_score: sleep.sleep_score,
            sleep_debt: sleep.cumulative_sleep_debt_minutes,
            stress_score: stress.stress_score,
            overall_score,
            recommendation,
            projected_full_recovery: cns.projected_full_recovery,
            overtraining_flag: trend.overtraining_flag,
            deload_flag: trend.deload_flag,
            training_load_index: Self::training_load_index(&input.workouts, as_of),
            generated_at,
        }
    }

    pub fn overall_score(muscular: u8, cns: u8, sleep: u8, stress: u8) -> u8 {
        let weighted = MUSCULAR_WEIGHT * f64::from(muscular)
            + CNS_WEIGHT * f64::from(cns)
            + SLEEP_WEIGHT * f64::from(sleep)
            + STRESS_WEIGHT * f64::from(stress);
        clamp(weighted.round(), 0.0, 100.0) as u8
    }

    pub fn age_factor(age_years: Option<f64>) -> f64 {
        match age_years {
            Some(age) if age >= MASTERS_AGE_YEARS => MASTERS_AGE_FACTOR,
            _ => 1.0,
        }
    }

    /// Acute:chronic load ratio: last 7 days of RPE × minutes against half of
    /// the 14-day total, rounded to one decimal. Zero without chronic load.
    pub fn training_load_index(workouts: &[Workout], as_of_date: &str) -> f64 {
        let (Some(as_of), Some(horizon)) = (parse_timestamp(as_of_date), as_of_horizon(as_of_date))
        else {
            return 0.0;
        };
        let chronic_cutoff = days_before(as_of, CHRONIC_DAYS);
        let acute_cutoff = days_before(as_of, ACUTE_DAYS);

        let mut acute = 0.0;
        let mut chronic = 0.0;
        for workout in workouts {
            let Some(performed) = parse_timestamp(&workout.date) else {
                continue;
            };
            if performed < chronic_cutoff || performed > horizon {
                continue;
            }
            let load = clamp(safe_number(workout.perceived_exertion, 6.0), 1.0, 10.0)
                * safe_number(workout.duration_minutes, 45.0).max(0.0);
            chronic += load;
            if performed >= acute_cutoff {
                acute += load;
            }
        }

        if chronic <= 0.0 {
            return 0.0;
        }
        (acute / (chronic / 2.0) * 10.0).round() / 10.0
    }

    /// Deep sleep from the night logged on the as-of date
    fn deep_sleep_last_night(input: &RecoveryEngineInput) -> Option<f64> {
        let as_of_day = parse_date(&input.as_of_date)?;
        input
            .sleep_logs
            .iter()
            .find(|log| parse_date(&log.date) == Some(as_of_day))
            .and_then(|log| log.deep_sleep_minutes)
            .filter(|m| m.is_finite())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MuscleGroup, MuscleIntensity, SleepLog, StressLog};
    use proptest::prelude::*;

    fn base_input() -> RecoveryEngineInput {
        RecoveryEngineInput {
            as_of_date: "2025-02-20".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_no_data_is_neutral() {
        let out = RecoveryEngine::run(&base_input());
        assert_eq!(out.muscular_score, 100);
        assert_eq!(out.cns_score, 100);
        assert_eq!(out.sleep_score, 70);
        assert_eq!(out.stress_score, 56);
        assert_eq!(out.overall_score, 90);
        assert_eq!(out.recommendation, Recommendation::Train);
        assert_eq!(out.muscle_breakdown.len(), MuscleGroup::ALL.len());
        assert!(!out.overtraining_flag);
        assert!(!out.deload_flag);
        assert_eq!(out.training_load_index, 0.0);
        assert!(out.projected_full_recovery.is_none());
    }

    #[test]
    fn test_overall_weights() {
        assert_eq!(RecoveryEngine::overall_score(100, 100, 100, 100), 100);
        assert_eq!(RecoveryEngine::overall_score(0, 0, 0, 0), 0);
        assert_eq!(RecoveryEngine::overall_score(50, 100, 0, 0), 50);
        assert_eq!(RecoveryEngine::overall_score(0, 0, 0, 100), 10);
    }

    #[test]
    fn test_age_factor() {
        assert_eq!(RecoveryEngine::age_factor(None), 1.0);
        assert_eq!(RecoveryEngine::age_factor(Some(39.0)), 1.0);
        assert_eq!(RecoveryEngine::age_factor(Some(40.0)), 0.95);
        assert_eq!(RecoveryEngine::age_factor(Some(f64::NAN)), 1.0);
    }

    #[test]
    fn test_training_load_index() {
        let workouts = vec![
            Workout::new("a", "2025-02-18", 60.0, 8.0),
            Workout::new("b", "2025-02-10", 60.0, 8.0),
            Workout::new("c", "2025-02-25", 60.0, 8.0),
        ];
        // acute 480 over half of 960
        assert_eq!(RecoveryEngine::training_load_index(&workouts, "2025-02-20"), 1.0);
        assert_eq!(RecoveryEngine::training_load_index(&workouts[..1], "2025-02-20"), 2.0);
        assert_eq!(RecoveryEngine::training_load_index(&[], "2025-02-20"), 0.0);
    }

    #[test]
    fn test_training_load_index_bounds_rpe() {
        let workouts = vec![
            Workout::new("a", "2025-02-18", 60.0, 20.0),
            Workout::new("b", "2025-02-10", 60.0, 10.0),
        ];
        // 20 counts as 10, so acute 600 over half of 1200
        assert_eq!(RecoveryEngine::training_load_index(&workouts, "2025-02-20"), 1.0);

        let evening = vec![Workout::new("c", "2025-02-20T19:00:00", 60.0, 8.0)];
        assert_eq!(RecoveryEngine::training_load_index(&evening, "2025-02-20"), 2.0);
    }

    #[test]
    fn test_unparsable_as_of_skips_trend() {
        let mut input = base_input();
        input.as_of_date = "tomorrow-ish".to_string();
        input.workouts = (10..17)
            .map(|day| Workout::new(format!("w{}", day), format!("2025-02-{}", day), 60.0, 9.0))
            .collect();

        let out = RecoveryEngine::run(&input);
        assert!(!out.overtraining_flag);
        assert!(!out.deload_flag);
    }

    #[test]
    fn test_future_training_block_does_not_flag_overtraining() {
        let mut input = base_input();
        input.as_of_date = "2025-02-01".to_string();
        input.workouts = (11..17)
            .map(|day| Workout::new(format!("w{}", day), format!("2025-02-{}", day), 60.0, 9.0))
            .collect();

        let out = RecoveryEngine::run(&input);
        assert!(!out.overtraining_flag);
        assert_eq!(out.muscular_score, 100);
    }

    #[test]
    fn test_generation_timestamp_is_explicit() {
        let at = Utc::now();
        let out = RecoveryEngine::run_at(&base_input(), at);
        assert_eq!(out.generated_at, at);
    }

    #[test]
    fn test_deep_sleep_and_hrv_feed_cns() {
        let mut input = base_input();
        input.workouts = vec![Workout::new("w", "2025-02-18", 60.0, 8.0)
            .with_muscle("chest", MuscleIntensity::Primary)];
        let rested = RecoveryEngine::run(&input);

        input.sleep_logs = vec![SleepLog {
            date: "2025-02-20".to_string(),
            total_minutes: Some(420.0),
            quality: Some(7.0),
            deep_sleep_minutes: Some(20.0),
            rem_minutes: Some(80.0),
            awakenings: Some(0),
        }];
        input.recent_hrv_ms = Some(40.0);
        input.baseline_hrv_ms = Some(60.0);
        let strained = RecoveryEngine::run(&input);

        assert!(strained.cns_score < rested.cns_score);
    }

    #[test]
    fn test_hrv_falls_back_to_stress_logs() {
        let mut input = base_input();
        input.workouts = vec![Workout::new("w", "2025-02-18", 60.0, 8.0)];
        input.stress_logs = ["2025-02-17", "2025-02-18", "2025-02-19"]
            .iter()
            .map(|d| StressLog {
                date: d.to_string(),
                stress_level: Some(5.0),
                hrv_ms: Some(70.0),
            })
            .collect();
        let normal = RecoveryEngine::run(&input);

        input.stress_logs.push(StressLog {
            date: "2025-02-20".to_string(),
            stress_level: Some(5.0),
            hrv_ms: Some(30.0),
        });
        let suppressed = RecoveryEngine::run(&input);

        assert!(suppressed.cns_score < normal.cns_score);
    }

    #[test]
    fn test_idempotent_scores() {
        let mut input = base_input();
        input.workouts = vec![Workout::new("w", "2025-02-19", 90.0, 9.0)
            .with_muscle("quads", MuscleIntensity::Primary)];
        let a = RecoveryEngine::run(&input);
        let b = RecoveryEngine::run(&input);
        assert!(a.same_scores(&b));
    }

    proptest! {
        #[test]
        fn prop_scores_bounded(
            rpe in -5.0f64..20.0,
            minutes in -30.0f64..400.0,
            days_ago in -3i64..20,
            sleep_minutes in -100.0f64..1000.0,
            quality in -5.0f64..15.0,
            stress in -5.0f64..15.0,
            age in 0.0f64..100.0,
        ) {
            let date = (chrono::NaiveDate::from_ymd_opt(2025, 2, 20).unwrap()
                - chrono::Duration::days(days_ago)).to_string();
            let input = RecoveryEngineInput {
                as_of_date: "2025-02-20".to_string(),
                workouts: vec![Workout::new("w", date.clone(), minutes, rpe)
                    .with_muscle("legs", MuscleIntensity::Primary)],
                sleep_logs: vec![SleepLog {
                    date: date.clone(),
                    total_minutes: Some(sleep_minutes),
                    quality: Some(quality),
                    deep_sleep_minutes: None,
                    rem_minutes: None,
                    awakenings: None,
                }],
                stress_logs: vec![StressLog { date, stress_level: Some(stress), hrv_ms: None }],
                age_years: Some(age),
                ..Default::default()
            };
            let out = RecoveryEngine::run(&input);
            for score in [out.muscular_score, out.cns_score, out.sleep_score, out.stress_score, out.overall_score] {
                prop_assert!(score <= 100);
            }
            prop_assert!(out.sleep_debt >= 0.0 && out.sleep_debt.is_finite());
            prop_assert!(out.training_load_index.is_finite());
        }
    }
}
