use chrono::{Duration, NaiveDate};
use recoveryrs::config::{AppConfig, UserProfile};
use recoveryrs::database::Database;
use recoveryrs::models::{MuscleIntensity, Recommendation, SleepLog, StressLog, Workout};
use recoveryrs::{PeriodizationStatus, RecoveryPipeline, SaveMode};
use tempfile::TempDir;

/// Storage-backed tests: SQLite file in a temp dir, pipeline on top

#[cfg(test)]
mod pipeline_tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn open(dir: &TempDir) -> RecoveryPipeline {
        let db = Database::new(dir.path().join("data").join("recovery.db")).unwrap();
        RecoveryPipeline::new(db)
    }

    #[test]
    fn test_snapshot_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let day = date("2025-02-20");

        {
            let mut pipeline = open(&dir);
            let workout = Workout::new("w1", "2025-02-19", 90.0, 9.0)
                .with_name("Heavy squat day")
                .with_muscle("quads", MuscleIntensity::Primary);
            pipeline.record_workout("athlete", &workout, day, Some(35.0)).unwrap();
        }

        let pipeline = open(&dir);
        assert!(pipeline.database().snapshot_exists("athlete", day).unwrap());
        let history = pipeline.database().recovery_history("athlete", day, 30).unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].cns_score < 50);
    }

    #[test]
    fn test_logging_sleep_updates_stored_snapshot() {
        let dir = TempDir::new().unwrap();
        let mut pipeline = open(&dir);
        let day = date("2025-02-20");

        let before = pipeline.calculate("athlete", day, None, SaveMode::Always).unwrap();
        let after = pipeline
            .record_sleep(
                "athlete",
                &SleepLog {
                    date: "2025-02-20".to_string(),
                    total_minutes: Some(240.0),
                    quality: Some(2.0),
                    deep_sleep_minutes: Some(20.0),
                    rem_minutes: Some(30.0),
                    awakenings: Some(4),
                },
                day,
                None,
            )
            .unwrap();

        assert!(after.output.sleep_score < before.output.sleep_score);
        let history = pipeline.database().recovery_history("athlete", day, 7).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].sleep_score, after.output.sleep_score);
    }

    #[test]
    fn test_stress_hrv_flows_into_calculation() {
        let dir = TempDir::new().unwrap();
        let mut pipeline = open(&dir);
        let day = date("2025-02-20");

        pipeline
            .record_workout(
                "athlete",
                &Workout::new("w1", "2025-02-18", 60.0, 9.0),
                day,
                None,
            )
            .unwrap();
        let normal = pipeline.calculate("athlete", day, None, SaveMode::DisplayOnly).unwrap();

        for (d, hrv) in [("2025-02-16", 70.0), ("2025-02-17", 72.0), ("2025-02-18", 68.0), ("2025-02-20", 35.0)] {
            pipeline
                .record_stress(
                    "athlete",
                    &StressLog {
                        date: d.to_string(),
                        stress_level: Some(5.0),
                        hrv_ms: Some(hrv),
                    },
                )
                .unwrap();
        }
        let suppressed = pipeline.calculate("athlete", day, None, SaveMode::DisplayOnly).unwrap();

        assert!(suppressed.output.cns_score < normal.output.cns_score);
    }

    #[test]
    fn test_users_are_isolated() {
        let dir = TempDir::new().unwrap();
        let mut pipeline = open(&dir);
        let day = date("2025-02-20");

        pipeline
            .record_workout(
                "a",
                &Workout::new("w1", "2025-02-19", 120.0, 10.0).with_muscle("back", MuscleIntensity::Primary),
                day,
                None,
            )
            .unwrap();
        let other = pipeline.calculate("b", day, None, SaveMode::DisplayOnly).unwrap();

        assert_eq!(other.output.overall_score, 90);
        assert_eq!(other.output.recommendation, Recommendation::Train);
    }

    #[test]
    fn test_sustained_fatigue_starts_one_deload_cycle() {
        let dir = TempDir::new().unwrap();
        let mut pipeline = open(&dir);
        let start = date("2025-01-20");

        // Four weeks of daily hard sessions on short sleep
        for offset in 0..30 {
            let day = start + Duration::days(offset);
            let db = pipeline.database();
            db.insert_workout(
                "athlete",
                &Workout::new(format!("w{}", offset), day.to_string(), 90.0, 9.0)
                    .with_muscle("quads", MuscleIntensity::Primary),
            )
            .unwrap();
            db.upsert_sleep_log(
                "athlete",
                &SleepLog {
                    date: day.to_string(),
                    total_minutes: Some(240.0 + offset as f64),
                    quality: Some(3.0),
                    deep_sleep_minutes: None,
                    rem_minutes: None,
                    awakenings: None,
                },
            )
            .unwrap();
        }

        let mut statuses = Vec::new();
        for offset in 0..30 {
            let day = start + Duration::days(offset);
            let report = pipeline.calculate("athlete", day, None, SaveMode::Always).unwrap();
            if offset >= 6 {
                assert!(report.output.overtraining_flag);
            }
            statuses.push(report.periodization);
        }

        // Whatever the trend does, there is never more than one active cycle
        let started = statuses
            .iter()
            .filter(|s| matches!(s, PeriodizationStatus::StartDeload { .. }))
            .count();
        assert!(started <= 1);
        if started == 1 {
            let cycle = pipeline.database().active_deload_cycle("athlete").unwrap().unwrap();
            assert_eq!(cycle.volume_reduction_pct, 30);
            assert!(matches!(
                statuses.last(),
                Some(PeriodizationStatus::InDeload { volume_reduction_pct: 30 })
                    | Some(PeriodizationStatus::StartDeload { .. })
            ));
        }
    }

    #[test]
    fn test_config_drives_age_and_database_path() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("config.toml");

        let mut config = AppConfig::default();
        config.database.path = dir.path().join("recovery.db");
        let mut user = UserProfile::new("Sam", Some("sam".to_string()));
        user.date_of_birth = Some(date("1980-06-01"));
        config.add_user(user);
        config.save_to_file(&config_path).unwrap();

        let loaded = AppConfig::load_or_default_from(&config_path).unwrap();
        assert_eq!(loaded.resolve_user_id(None).unwrap(), "sam");
        assert_eq!(loaded.age_for("sam", date("2025-02-20")), Some(44.0));

        let db = Database::new(&loaded.database.path).unwrap();
        let mut pipeline = RecoveryPipeline::new(db);
        let report = pipeline
            .calculate("sam", date("2025-02-20"), loaded.age_for("sam", date("2025-02-20")), SaveMode::WriteIfAbsent)
            .unwrap();
        assert!(report.persisted);
        assert!(loaded.database.path.exists());
    }
}
