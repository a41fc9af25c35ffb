//! Muscle recovery model
//!
//! Tracks residual fatigue per muscle group with exponential decay:
//!
//! ```text
//! remaining = load × e^(−ln2 × hours_elapsed / effective_hours)
//! ```
//!
//! Each workout in the 14-day lookback contributes an initial load of
//! `min(150, RPE/10 × minutes)` to every declared group (scaled by primary /
//! secondary / tertiary involvement). The base recovery time comes from a
//! 3×3 table of muscle size against RPE bucket, then stretches or shrinks with
//! the sleep, stress and age modifiers.
//!
//! Scores are `100 − fatigue/50 × 100`, bounded to `[0, 100]`; the aggregate is
//! the unweighted mean over all nine groups.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::f64::consts::LN_2;
use tracing::debug;

use crate::models::{MuscleGroup, MuscleIntensity, Workout};
use crate::safety::{
    as_of_horizon, clamp, days_before, elapsed_hours, normalize_to_100, parse_timestamp,
    safe_number, to_score,
};

/// Days of workout history considered
pub const LOOKBACK_DAYS: i64 = 14;

/// Cap on the load any single workout can add to a group
pub const MAX_INITIAL_LOAD: f64 = 150.0;

/// Fatigue at which a group scores zero
pub const MAX_FATIGUE: f64 = 50.0;

pub const SLEEP_MODIFIER_RANGE: (f64, f64) = (0.8, 1.2);
pub const STRESS_MODIFIER_RANGE: (f64, f64) = (0.8, 1.1);
pub const AGE_FACTOR_RANGE: (f64, f64) = (0.5, 1.5);

const DEFAULT_RPE: f64 = 6.0;
const DEFAULT_DURATION_MINUTES: f64 = 45.0;

/// Relative muscle mass class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MuscleSize {
    Small,
    Medium,
    Large,
}

impl MuscleSize {
    pub fn of(group: MuscleGroup) -> Self {
        match group {
            MuscleGroup::Arms | MuscleGroup::Calves => MuscleSize::Small,
            MuscleGroup::Chest
            | MuscleGroup::Shoulders
            | MuscleGroup::Hamstrings
            | MuscleGroup::Core => MuscleSize::Medium,
            MuscleGroup::Back | MuscleGroup::Quads | MuscleGroup::Glutes => MuscleSize::Large,
        }
    }
}

/// RPE bucket: light ≤ 4, moderate 5-7, heavy ≥ 8
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RpeIntensity {
    Light,
    Moderate,
    Heavy,
}

impl RpeIntensity {
    pub fn from_rpe(rpe: f64) -> Self {
        if rpe <= 4.0 {
            RpeIntensity::Light
        } else if rpe <= 7.0 {
            RpeIntensity::Moderate
        } else {
            RpeIntensity::Heavy
        }
    }
}

/// Base recovery hours before modifiers
pub fn base_recovery_hours(size: MuscleSize, intensity: RpeIntensity) -> f64 {
    match (size, intensity) {
        (MuscleSize::Small, RpeIntensity::Light) => 36.0,
        (MuscleSize::Small, RpeIntensity::Moderate) => 48.0,
        (MuscleSize::Small, RpeIntensity::Heavy) => 60.0,
        (MuscleSize::Medium, RpeIntensity::Light) => 48.0,
        (MuscleSize::Medium, RpeIntensity::Moderate) => 60.0,
        (MuscleSize::Medium, RpeIntensity::Heavy) => 72.0,
        (MuscleSize::Large, RpeIntensity::Light) => 60.0,
        (MuscleSize::Large, RpeIntensity::Moderate) => 72.0,
        (MuscleSize::Large, RpeIntensity::Heavy) => 96.0,
    }
}

/// Muscle model result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MuscleModelOutput {
    pub group_scores: BTreeMap<MuscleGroup, u8>,
    pub aggregate_score: u8,
}

impl MuscleModelOutput {
    /// Every group fully recovered
    pub fn fully_recovered() -> Self {
        MuscleModelOutput {
            group_scores: MuscleGroup::ALL.iter().map(|g| (*g, 100)).collect(),
            aggregate_score: 100,
        }
    }
}

/// Per-muscle-group exponential fatigue model
pub struct MuscleRecoveryModel;

impl MuscleRecoveryModel {
    /// Evaluate muscular recovery as of `as_of_date`.
    ///
    /// Modifiers are clamped before use; workouts that are future-dated,
    /// unparsable or older than the lookback are skipped.
    pub fn evaluate(
        workouts: &[Workout],
        as_of_date: &str,
        sleep_modifier: f64,
        stress_modifier: f64,
        age_factor: f64,
    ) -> MuscleModelOutput {
        let (Some(as_of), Some(horizon)) = (parse_timestamp(as_of_date), as_of_horizon(as_of_date))
        else {
            return MuscleModelOutput::fully_recovered();
        };
        if workouts.is_empty() {
            return MuscleModelOutput::fully_recovered();
        }

        let sleep_mod = clamp(sleep_modifier, SLEEP_MODIFIER_RANGE.0, SLEEP_MODIFIER_RANGE.1);
        let stress_mod = clamp(stress_modifier, STRESS_MODIFIER_RANGE.0, STRESS_MODIFIER_RANGE.1);
        let age = clamp(safe_number(Some(age_factor), 1.0), AGE_FACTOR_RANGE.0, AGE_FACTOR_RANGE.1);
        let cutoff = days_before(as_of, LOOKBACK_DAYS);

        let mut fatigue: BTreeMap<MuscleGroup, f64> =
            MuscleGroup::ALL.iter().map(|g| (*g, 0.0)).collect();

        for workout in workouts {
            let Some(performed) = parse_timestamp(&workout.date) else {
                debug!(workout_id = %workout.id, date = %workout.date, "Skipping workout with unparsable date");
                continue;
            };
            if performed > horizon || performed < cutoff {
                continue;
            }

            let rpe = clamp(safe_number(workout.perceived_exertion, DEFAULT_RPE), 1.0, 10.0);
            let duration = safe_number(workout.duration_minutes, DEFAULT_DURATION_MINUTES).max(0.0);
            let load = (rpe / 10.0 * duration).min(MAX_INITIAL_LOAD);
            let hours_elapsed = elapsed_hours(performed, as_of);

            for (group, intensity) in Self::assigned_groups(workout) {
                let base = base_recovery_hours(MuscleSize::of(group), RpeIntensity::from_rpe(rpe));
                let effective = (base / sleep_mod / stress_mod / age).max(1.0);
                let remaining = load
                    * intensity.load_multiplier()
                    * (-LN_2 * hours_elapsed / effective).exp().max(0.0);

                if let Some(total) = fatigue.get_mut(&group) {
                    *total += remaining;
                }
            }
        }

        let mut group_scores = BTreeMap::new();
        let mut sum = 0.0;
        for (group, total) in &fatigue {
            let score = 100.0 - normalize_to_100(*total, MAX_FATIGUE);
            sum += score;
            group_scores.insert(*group, to_score(score));
        }
        let aggregate_score = to_score(sum / MuscleGroup::ALL.len() as f64);

        debug!(aggregate_score, "Muscle model evaluated");

        MuscleModelOutput {
            group_scores,
            aggregate_score,
        }
    }

    /// Normalised groups a workout loads; undeclared groups default to primary core
    fn assigned_groups(workout: &Workout) -> Vec<(MuscleGroup, MuscleIntensity)> {
        if workout.muscle_groups.is_empty() {
            return vec![(MuscleGroup::Core, MuscleIntensity::Primary)];
        }

        workout
            .muscle_groups
            .iter()
            .map(|entry| {
                (
                    MuscleGroup::from_label(&entry.muscle_group),
                    entry.intensity.unwrap_or(MuscleIntensity::Primary),
                )
            })
            .collect()
    }
}
