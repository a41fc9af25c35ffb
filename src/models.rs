use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Fixed muscle-group taxonomy used by the muscle recovery model
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MuscleGroup {
    Chest,
    Back,
    Shoulders,
    Arms,
    Quads,
    Hamstrings,
    Glutes,
    Calves,
    Core,
}

impl MuscleGroup {
    /// Every group, in reporting order
    pub const ALL: [MuscleGroup; 9] = [
        MuscleGroup::Chest,
        MuscleGroup::Back,
        MuscleGroup::Shoulders,
        MuscleGroup::Arms,
        MuscleGroup::Quads,
        MuscleGroup::Hamstrings,
        MuscleGroup::Glutes,
        MuscleGroup::Calves,
        MuscleGroup::Core,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MuscleGroup::Chest => "chest",
            MuscleGroup::Back => "back",
            MuscleGroup::Shoulders => "shoulders",
            MuscleGroup::Arms => "arms",
            MuscleGroup::Quads => "quads",
            MuscleGroup::Hamstrings => "hamstrings",
            MuscleGroup::Glutes => "glutes",
            MuscleGroup::Calves => "calves",
            MuscleGroup::Core => "core",
        }
    }

    /// Map a free-text label onto the taxonomy.
    ///
    /// Canonical names match by containment in either direction ("upper back",
    /// "glute"). Common anatomical aliases are folded into their group. Anything
    /// else lands in `Core`.
    pub fn from_label(label: &str) -> MuscleGroup {
        let lower = label.trim().to_lowercase();
        if lower.is_empty() {
            return MuscleGroup::Core;
        }

        if let Some(group) = MuscleGroup::ALL
            .iter()
            .find(|g| lower.contains(g.as_str()) || g.as_str().contains(lower.as_str()))
        {
            return *group;
        }

        const ALIASES: &[(&str, MuscleGroup)] = &[
            ("quadricep", MuscleGroup::Quads),
            ("legs", MuscleGroup::Quads),
            ("bicep", MuscleGroup::Arms),
            ("tricep", MuscleGroup::Arms),
            ("forearm", MuscleGroup::Arms),
            ("lats", MuscleGroup::Back),
            ("traps", MuscleGroup::Back),
            ("delt", MuscleGroup::Shoulders),
            ("pec", MuscleGroup::Chest),
            ("abs", MuscleGroup::Core),
            ("oblique", MuscleGroup::Core),
        ];

        ALIASES
            .iter()
            .find(|(alias, _)| lower.contains(alias))
            .map(|(_, group)| *group)
            .unwrap_or(MuscleGroup::Core)
    }
}

impl fmt::Display for MuscleGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How strongly a workout loads a muscle group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MuscleIntensity {
    Primary,
    Secondary,
    Tertiary,
}

impl MuscleIntensity {
    /// Share of the workout load attributed to a group at this involvement
    pub fn load_multiplier(&self) -> f64 {
        match self {
            MuscleIntensity::Primary => 1.0,
            MuscleIntensity::Secondary => 0.6,
            MuscleIntensity::Tertiary => 0.3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MuscleIntensity::Primary => "primary",
            MuscleIntensity::Secondary => "secondary",
            MuscleIntensity::Tertiary => "tertiary",
        }
    }
}

impl std::str::FromStr for MuscleIntensity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "primary" => Ok(MuscleIntensity::Primary),
            "secondary" => Ok(MuscleIntensity::Secondary),
            "tertiary" => Ok(MuscleIntensity::Tertiary),
            _ => Err(format!("Invalid muscle intensity: {}", s)),
        }
    }
}

/// Single exercise line within a workout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExerciseEntry {
    pub exercise_name: String,
    pub sets: Option<u32>,
    pub reps: Option<u32>,
    pub weight_kg: Option<f64>,
}

/// Declared muscle-group involvement for a workout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MuscleGroupEntry {
    /// Free-text label, normalised with [`MuscleGroup::from_label`]
    pub muscle_group: String,

    /// Involvement level; absent means primary
    pub intensity: Option<MuscleIntensity>,
}

/// Logged training session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workout {
    /// Unique identifier for the workout
    pub id: String,

    /// Workout date or timestamp as stored (`YYYY-MM-DD` or ISO 8601)
    pub date: String,

    /// Duration in minutes
    pub duration_minutes: Option<f64>,

    /// Rated perceived exertion, 1-10
    pub perceived_exertion: Option<f64>,

    /// Optional session name ("HIIT", "Heavy squat day")
    pub name: Option<String>,

    /// Optional free-text notes
    pub notes: Option<String>,

    #[serde(default)]
    pub exercises: Vec<ExerciseEntry>,

    #[serde(default)]
    pub muscle_groups: Vec<MuscleGroupEntry>,
}

impl Workout {
    /// Minimal workout with only the fields the engine needs
    pub fn new(
        id: impl Into<String>,
        date: impl Into<String>,
        duration_minutes: f64,
        perceived_exertion: f64,
    ) -> Self {
        Workout {
            id: id.into(),
            date: date.into(),
            duration_minutes: Some(duration_minutes),
            perceived_exertion: Some(perceived_exertion),
            name: None,
            notes: None,
            exercises: Vec::new(),
            muscle_groups: Vec::new(),
        }
    }

    /// Builder-style helper to declare a primary muscle group
    pub fn with_muscle(mut self, label: &str, intensity: MuscleIntensity) -> Self {
        self.muscle_groups.push(MuscleGroupEntry {
            muscle_group: label.to_string(),
            intensity: Some(intensity),
        });
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }
}

/// One night of sleep. Every measurement is nullable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SleepLog {
    pub date: String,
    pub total_minutes: Option<f64>,
    /// Self-reported quality, 1-10
    pub quality: Option<f64>,
    pub deep_sleep_minutes: Option<f64>,
    pub rem_minutes: Option<f64>,
    pub awakenings: Option<u32>,
}

/// Daily stress self-report with optional HRV reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StressLog {
    pub date: String,
    /// Stress level, 1-10
    pub stress_level: Option<f64>,
    /// Heart-rate variability in milliseconds
    pub hrv_ms: Option<f64>,
}

/// Historical recovery snapshot used for trend detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoverySnapshot {
    pub date: String,
    pub readiness_score: Option<f64>,
    pub sleep_score: Option<f64>,
}

/// Snapshot row used by the 28-day periodization check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeloadSnapshotRow {
    pub date: String,
    pub readiness_score: Option<f64>,
    pub overtraining_flag: bool,
    pub sleep_debt: Option<f64>,
}

/// Daily compliance booleans as persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BehaviorRow {
    pub date: String,
    pub recovery_compliant: bool,
    pub sleep_target_met: bool,
    pub balanced_training: bool,
}

/// Planned volume-reduction period. Active while `end_date` is unset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeloadCycle {
    pub id: String,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub reason: String,
    pub volume_reduction_pct: u8,
}

impl DeloadCycle {
    pub fn is_active(&self) -> bool {
        self.end_date.is_none()
    }
}

/// Training recommendation derived from the overall score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Recommendation {
    Train,
    Moderate,
    Rest,
}

impl Recommendation {
    /// >= 85 train, >= 60 moderate, otherwise rest
    pub fn from_score(overall: u8) -> Self {
        if overall >= 85 {
            Recommendation::Train
        } else if overall >= 60 {
            Recommendation::Moderate
        } else {
            Recommendation::Rest
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Recommendation::Train => "train",
            Recommendation::Moderate => "moderate",
            Recommendation::Rest => "rest",
        }
    }

    /// Human-readable guidance for display surfaces
    pub fn description(&self) -> &'static str {
        match self {
            Recommendation::Train => "Fully recovered - good day for hard training",
            Recommendation::Moderate => "Partially recovered - keep intensity moderate",
            Recommendation::Rest => "Recovery incomplete - prioritise rest today",
        }
    }
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Recommendation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "train" => Ok(Recommendation::Train),
            "moderate" => Ok(Recommendation::Moderate),
            "rest" => Ok(Recommendation::Rest),
            _ => Err(format!("Invalid recommendation: {}", s)),
        }
    }
}

/// Everything the engine needs for one user and date, fetched up front
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecoveryEngineInput {
    /// As-of date (`YYYY-MM-DD`)
    pub as_of_date: String,
    pub workouts: Vec<Workout>,
    pub sleep_logs: Vec<SleepLog>,
    pub stress_logs: Vec<StressLog>,
    pub recent_snapshots: Vec<RecoverySnapshot>,
    pub recent_hrv_ms: Option<f64>,
    pub baseline_hrv_ms: Option<f64>,
    pub age_years: Option<f64>,
}

/// Canonical engine result. Every field is always present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryEngineOutput {
    pub muscular_score: u8,
    pub muscle_breakdown: BTreeMap<MuscleGroup, u8>,
    pub cns_score: u8,
    pub sleep_score: u8,
    /// Cumulative sleep debt in minutes, never negative
    pub sleep_debt: f64,
    pub stress_score: u8,
    pub overall_score: u8,
    pub recommendation: Recommendation,
    pub projected_full_recovery: Option<DateTime<Utc>>,
    pub overtraining_flag: bool,
    pub deload_flag: bool,
    /// Acute:chronic load ratio, diagnostic only
    pub training_load_index: f64,
    pub generated_at: DateTime<Utc>,
}

impl RecoveryEngineOutput {
    /// True when every score and the recommendation match, ignoring the generation time
    pub fn same_scores(&self, other: &RecoveryEngineOutput) -> bool {
        RecoveryEngineOutput {
            generated_at: other.generated_at,
            ..self.clone()
        } == *other
    }
}

/// Point in a persisted recovery history series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryHistoryPoint {
    pub date: NaiveDate,
    pub overall_score: u8,
    pub muscular_score: u8,
    pub cns_score: u8,
    pub sleep_score: u8,
    pub stress_score: u8,
    pub sleep_debt: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_muscle_group_from_label() {
        assert_eq!(MuscleGroup::from_label("Quads"), MuscleGroup::Quads);
        assert_eq!(MuscleGroup::from_label("upper back"), MuscleGroup::Back);
        assert_eq!(MuscleGroup::from_label("glute"), MuscleGroup::Glutes);
        assert_eq!(MuscleGroup::from_label("Quadriceps"), MuscleGroup::Quads);
        assert_eq!(MuscleGroup::from_label("biceps"), MuscleGroup::Arms);
        assert_eq!(MuscleGroup::from_label("lats"), MuscleGroup::Back);
    }

    #[test]
    fn test_unknown_muscle_label_falls_back_to_core() {
        assert_eq!(MuscleGroup::from_label("neck"), MuscleGroup::Core);
        assert_eq!(MuscleGroup::from_label(""), MuscleGroup::Core);
        assert_eq!(MuscleGroup::from_label("   "), MuscleGroup::Core);
    }

    #[test]
    fn test_recommendation_thresholds() {
        assert_eq!(Recommendation::from_score(100), Recommendation::Train);
        assert_eq!(Recommendation::from_score(85), Recommendation::Train);
        assert_eq!(Recommendation::from_score(84), Recommendation::Moderate);
        assert_eq!(Recommendation::from_score(60), Recommendation::Moderate);
        assert_eq!(Recommendation::from_score(59), Recommendation::Rest);
        assert_eq!(Recommendation::from_score(0), Recommendation::Rest);
    }

    #[test]
    fn test_recommendation_serialization() {
        let json = serde_json::to_string(&Recommendation::Moderate).unwrap();
        assert_eq!(json, "\"moderate\"");
        assert_eq!("REST".parse::<Recommendation>().unwrap(), Recommendation::Rest);
    }

    #[test]
    fn test_deload_cycle_active() {
        let mut cycle = DeloadCycle {
            id: "c1".to_string(),
            start_date: NaiveDate::from_ymd_opt(2025, 2, 1).unwrap(),
            end_date: None,
            reason: "Accumulated fatigue trend detected".to_string(),
            volume_reduction_pct: 30,
        };
        assert!(cycle.is_active());

        cycle.end_date = NaiveDate::from_ymd_opt(2025, 2, 8);
        assert!(!cycle.is_active());
    }

    #[test]
    fn test_workout_deserializes_without_lists() {
        let json = r#"{
            "id": "w1",
            "date": "2025-02-19",
            "duration_minutes": 60,
            "perceived_exertion": null,
            "name": null,
            "notes": null
        }"#;
        let workout: Workout = serde_json::from_str(json).unwrap();
        assert!(workout.exercises.is_empty());
        assert!(workout.muscle_groups.is_empty());
        assert_eq!(workout.perceived_exertion, None);
    }
}
