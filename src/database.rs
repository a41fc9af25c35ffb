//! SQLite storage for logs, recovery snapshots, behavior rows and deload cycles
//!
//! All reads are bounded history fetches keyed by user and as-of date. Writes
//! that must not partially apply (snapshot plus behavior) share a transaction.
//! At most one snapshot and one behavior row exist per user and date, and at
//! most one deload cycle per user has no end date.

use chrono::{Duration, NaiveDate, Utc};
use rusqlite::{params, types::Type, Connection, OptionalExtension, Row, Transaction};
use std::fs;
use std::path::Path;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::behavior::BehaviorOutput;
use crate::models::{
    BehaviorRow, DeloadCycle, DeloadSnapshotRow, RecoveryEngineInput, RecoveryEngineOutput,
    RecoveryHistoryPoint, RecoverySnapshot, SleepLog, StressLog, Workout,
};
use crate::stress::HrvSummary;

pub const WORKOUT_LOOKBACK_DAYS: i64 = 14;
pub const SLEEP_STRESS_LOOKBACK_DAYS: i64 = 7;
pub const SNAPSHOT_LOOKBACK_DAYS: i64 = 14;
pub const SNAPSHOT_LIMIT: usize = 14;
pub const BEHAVIOR_HISTORY_LIMIT: usize = 60;
pub const DELOAD_LOOKBACK_DAYS: i64 = 28;

/// Database error types
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Data not found: {0}")]
    NotFound(String),
    #[error("Duplicate entry: {0}")]
    Duplicate(String),
    #[error("Deload cycle already active since {0}")]
    ActiveDeload(NaiveDate),
}

/// Database connection and management
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Create or open a database at the specified path
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, DatabaseError> {
        if let Some(parent) = db_path.as_ref().parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&db_path)?;
        let db = Self { conn };
        db.init_schema()?;

        debug!(path = %db_path.as_ref().display(), "Database opened");
        Ok(db)
    }

    /// Private in-memory database, mainly for tests and dry runs
    pub fn in_memory() -> Result<Self, DatabaseError> {
        let db = Self {
            conn: Connection::open_in_memory()?,
        };
        db.init_schema()?;
        Ok(db)
    }

    /// Initialize database schema with tables and indexes
    fn init_schema(&self) -> Result<(), DatabaseError> {
        self.conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;",
        )?;

        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS workouts (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                workout_date TEXT NOT NULL,
                duration_minutes REAL,
                perceived_exertion REAL,
                name TEXT,
                notes TEXT,
                exercises TEXT NOT NULL DEFAULT '[]',
                muscle_groups TEXT NOT NULL DEFAULT '[]',
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE TABLE IF NOT EXISTS sleep_logs (
                user_id TEXT NOT NULL,
                sleep_date TEXT NOT NULL,
                total_minutes REAL,
                quality REAL,
                deep_sleep_minutes REAL,
                rem_minutes REAL,
                awakenings INTEGER,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                UNIQUE (user_id, sleep_date)
            );

            CREATE TABLE IF NOT EXISTS stress_logs (
                user_id TEXT NOT NULL,
                log_date TEXT NOT NULL,
                stress_level REAL,
                hrv_ms REAL,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                UNIQUE (user_id, log_date)
            );

            CREATE TABLE IF NOT EXISTS recovery_snapshots (
                user_id TEXT NOT NULL,
                snapshot_date TEXT NOT NULL,
                readiness_score INTEGER NOT NULL,
                muscular_score INTEGER NOT NULL,
                cns_score INTEGER NOT NULL,
                sleep_score INTEGER NOT NULL,
                stress_score INTEGER NOT NULL,
                muscle_breakdown TEXT,
                overtraining_flag BOOLEAN NOT NULL DEFAULT FALSE,
                deload_flag BOOLEAN NOT NULL DEFAULT FALSE,
                sleep_debt REAL NOT NULL DEFAULT 0,
                recommendation TEXT NOT NULL,
                projected_full_recovery TEXT,
                training_load_index REAL NOT NULL DEFAULT 0,
                generated_at TEXT NOT NULL,
                calculated_at TEXT NOT NULL,
                UNIQUE (user_id, snapshot_date)
            );

            CREATE TABLE IF NOT EXISTS behavioral_metrics (
                user_id TEXT NOT NULL,
                date TEXT NOT NULL,
                recovery_compliant BOOLEAN NOT NULL,
                sleep_target_met BOOLEAN NOT NULL,
                balanced_training BOOLEAN NOT NULL,
                UNIQUE (user_id, date)
            );

            CREATE TABLE IF NOT EXISTS deload_cycles (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                start_date TEXT NOT NULL,
                end_date TEXT,
                reason TEXT NOT NULL,
                volume_reduction_pct INTEGER NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                UNIQUE (user_id, start_date)
            );

            CREATE INDEX IF NOT EXISTS idx_workouts_user_date ON workouts (user_id, workout_date);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_deload_one_active
                ON deload_cycles (user_id) WHERE end_date IS NULL;
            "#,
        )?;

        Ok(())
    }

    /// Store a workout, replacing any workout with the same id
    pub fn insert_workout(&self, user_id: &str, workout: &Workout) -> Result<(), DatabaseError> {
        let exercises = serde_json::to_string(&workout.exercises)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        let muscle_groups = serde_json::to_string(&workout.muscle_groups)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;

        self.conn.execute(
            r#"
            INSERT OR REPLACE INTO workouts (
                id, user_id, workout_date, duration_minutes, perceived_exertion,
                name, notes, exercises, muscle_groups
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                workout.id,
                user_id,
                workout.date,
                workout.duration_minutes,
                workout.perceived_exertion,
                workout.name,
                workout.notes,
                exercises,
                muscle_groups,
            ],
        )?;
        Ok(())
    }

    /// Store one night of sleep; a second log for the same date replaces the first
    pub fn upsert_sleep_log(&self, user_id: &str, log: &SleepLog) -> Result<(), DatabaseError> {
        self.conn.execute(
            r#"
            INSERT INTO sleep_logs (
                user_id, sleep_date, total_minutes, quality, deep_sleep_minutes, rem_minutes, awakenings
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT (user_id, sleep_date) DO UPDATE SET
                total_minutes = excluded.total_minutes,
                quality = excluded.quality,
                deep_sleep_minutes = excluded.deep_sleep_minutes,
                rem_minutes = excluded.rem_minutes,
                awakenings = excluded.awakenings,
                updated_at = CURRENT_TIMESTAMP
            "#,
            params![
                user_id,
                log.date,
                log.total_minutes,
                log.quality,
                log.deep_sleep_minutes,
                log.rem_minutes,
                log.awakenings,
            ],
        )?;
        Ok(())
    }

    pub fn upsert_stress_log(&self, user_id: &str, log: &StressLog) -> Result<(), DatabaseError> {
        self.conn.execute(
            r#"
            INSERT INTO stress_logs (user_id, log_date, stress_level, hrv_ms)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (user_id, log_date) DO UPDATE SET
                stress_level = excluded.stress_level,
                hrv_ms = excluded.hrv_ms,
                updated_at = CURRENT_TIMESTAMP
            "#,
            params![user_id, log.date, log.stress_level, log.hrv_ms],
        )?;
        Ok(())
    }

    /// Assemble the engine input bundle for one user and date
    #[instrument(skip(self), fields(user_id = %user_id, as_of = %as_of))]
    pub fn fetch_recovery_input(
        &self,
        user_id: &str,
        as_of: NaiveDate,
        age_years: Option<f64>,
    ) -> Result<RecoveryEngineInput, DatabaseError> {
        let workouts = self.workouts_between(user_id, days_back(as_of, WORKOUT_LOOKBACK_DAYS), as_of)?;
        let sleep_logs = self.sleep_logs_between(user_id, days_back(as_of, SLEEP_STRESS_LOOKBACK_DAYS), as_of)?;
        let stress_logs = self.stress_logs_between(user_id, days_back(as_of, SLEEP_STRESS_LOOKBACK_DAYS), as_of)?;
        let recent_snapshots = self.recent_snapshots(user_id, as_of)?;

        let as_of_str = as_of.to_string();
        let hrv = HrvSummary::from_logs(&stress_logs, &as_of_str);

        debug!(
            workouts = workouts.len(),
            sleep_logs = sleep_logs.len(),
            stress_logs = stress_logs.len(),
            snapshots = recent_snapshots.len(),
            "Fetched recovery input"
        );

        Ok(RecoveryEngineInput {
            as_of_date: as_of_str,
            workouts,
            sleep_logs,
            stress_logs,
            recent_snapshots,
            recent_hrv_ms: hrv.recent_ms,
            baseline_hrv_ms: hrv.baseline_ms,
            age_years,
        })
    }

    /// Workouts dated in `[from, to]`, newest first
    pub fn workouts_between(
        &self,
        user_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Workout>, DatabaseError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, workout_date, duration_minutes, perceived_exertion, name, notes,
                   exercises, muscle_groups
            FROM workouts
            WHERE user_id = ?1 AND date(workout_date) BETWEEN ?2 AND ?3
            ORDER BY workout_date DESC
            "#,
        )?;
        let rows = stmt.query_map(params![user_id, from, to], Self::workout_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Distinct calendar dates with a workout in `[from, to]`, ascending
    pub fn workout_dates_between(
        &self,
        user_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<NaiveDate>, DatabaseError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT DISTINCT date(workout_date) AS day
            FROM workouts
            WHERE user_id = ?1 AND date(workout_date) BETWEEN ?2 AND ?3
            ORDER BY day ASC
            "#,
        )?;
        let rows = stmt.query_map(params![user_id, from, to], |row| row.get::<_, NaiveDate>(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn sleep_logs_between(
        &self,
        user_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<SleepLog>, DatabaseError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT sleep_date, total_minutes, quality, deep_sleep_minutes, rem_minutes, awakenings
            FROM sleep_logs
            WHERE user_id = ?1 AND date(sleep_date) BETWEEN ?2 AND ?3
            ORDER BY sleep_date DESC
            "#,
        )?;
        let rows = stmt.query_map(params![user_id, from, to], |row| {
            Ok(SleepLog {
                date: row.get("sleep_date")?,
                total_minutes: row.get("total_minutes")?,
                quality: row.get("quality")?,
                deep_sleep_minutes: row.get("deep_sleep_minutes")?,
                rem_minutes: row.get("rem_minutes")?,
                awakenings: row.get("awakenings")?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn stress_logs_between(
        &self,
        user_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<StressLog>, DatabaseError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT log_date, stress_level, hrv_ms
            FROM stress_logs
            WHERE user_id = ?1 AND date(log_date) BETWEEN ?2 AND ?3
            ORDER BY log_date DESC
            "#,
        )?;
        let rows = stmt.query_map(params![user_id, from, to], |row| {
            Ok(StressLog {
                date: row.get("log_date")?,
                stress_level: row.get("stress_level")?,
                hrv_ms: row.get("hrv_ms")?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Snapshots from the 14 days before `as_of`, newest first. The as-of day's
    /// own snapshot is excluded so recomputing a day is stable.
    fn recent_snapshots(
        &self,
        user_id: &str,
        as_of: NaiveDate,
    ) -> Result<Vec<RecoverySnapshot>, DatabaseError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT snapshot_date, readiness_score, sleep_score
            FROM recovery_snapshots
            WHERE user_id = ?1 AND snapshot_date >= ?2 AND snapshot_date < ?3
            ORDER BY snapshot_date DESC
            LIMIT ?4
            "#,
        )?;
        let rows = stmt.query_map(
            params![
                user_id,
                days_back(as_of, SNAPSHOT_LOOKBACK_DAYS),
                as_of,
                SNAPSHOT_LIMIT as i64
            ],
            |row| {
                Ok(RecoverySnapshot {
                    date: row.get("snapshot_date")?,
                    readiness_score: row.get("readiness_score")?,
                    sleep_score: row.get("sleep_score")?,
                })
            },
        )?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn snapshot_exists(&self, user_id: &str, date: NaiveDate) -> Result<bool, DatabaseError> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM recovery_snapshots WHERE user_id = ?1 AND snapshot_date = ?2",
                params![user_id, date],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Upsert the snapshot and behavior row for one date in a single transaction
    #[instrument(skip(self, output, behavior), fields(user_id = %user_id, date = %date))]
    pub fn save_recovery(
        &mut self,
        user_id: &str,
        date: NaiveDate,
        output: &RecoveryEngineOutput,
        behavior: &BehaviorOutput,
    ) -> Result<(), DatabaseError> {
        let tx = self.conn.transaction()?;
        Self::upsert_snapshot(&tx, user_id, date, output)?;
        Self::upsert_behavior(&tx, user_id, date, behavior)?;
        tx.commit()?;

        debug!(overall = output.overall_score, "Recovery snapshot saved");
        Ok(())
    }

    fn upsert_snapshot(
        tx: &Transaction,
        user_id: &str,
        date: NaiveDate,
        output: &RecoveryEngineOutput,
    ) -> Result<(), DatabaseError> {
        let breakdown = serde_json::to_string(&output.muscle_breakdown)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;

        tx.execute(
            r#"
            INSERT INTO recovery_snapshots (
                user_id, snapshot_date, readiness_score, muscular_score, cns_score, sleep_score,
                stress_score, muscle_breakdown, overtraining_flag, deload_flag, sleep_debt,
                recommendation, projected_full_recovery, training_load_index, generated_at,
                calculated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
            ON CONFLICT (user_id, snapshot_date) DO UPDATE SET
                readiness_score = excluded.readiness_score,
                muscular_score = excluded.muscular_score,
                cns_score = excluded.cns_score,
                sleep_score = excluded.sleep_score,
                stress_score = excluded.stress_score,
                muscle_breakdown = excluded.muscle_breakdown,
                overtraining_flag = excluded.overtraining_flag,
                deload_flag = excluded.deload_flag,
                sleep_debt = excluded.sleep_debt,
                recommendation = excluded.recommendation,
                projected_full_recovery = excluded.projected_full_recovery,
                training_load_index = excluded.training_load_index,
                generated_at = excluded.generated_at,
                calculated_at = excluded.calculated_at
            "#,
            params![
                user_id,
                date,
                output.overall_score,
                output.muscular_score,
                output.cns_score,
                output.sleep_score,
                output.stress_score,
                breakdown,
                output.overtraining_flag,
                output.deload_flag,
                output.sleep_debt,
                output.recommendation.as_str(),
                output.projected_full_recovery,
                output.training_load_index,
                output.generated_at,
                Utc::now(),
            ],
        )?;
        Ok(())
    }

    fn upsert_behavior(
        tx: &Transaction,
        user_id: &str,
        date: NaiveDate,
        behavior: &BehaviorOutput,
    ) -> Result<(), DatabaseError> {
        tx.execute(
            r#"
            INSERT INTO behavioral_metrics (
                user_id, date, recovery_compliant, sleep_target_met, balanced_training
            ) VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT (user_id, date) DO UPDATE SET
                recovery_compliant = excluded.recovery_compliant,
                sleep_target_met = excluded.sleep_target_met,
                balanced_training = excluded.balanced_training
            "#,
            params![
                user_id,
                date,
                behavior.recovery_compliant,
                behavior.sleep_target_met,
                behavior.balanced_training,
            ],
        )?;
        Ok(())
    }

    /// Behavior rows in the 60 days ending at `as_of`, newest first
    pub fn fetch_behavior_history(
        &self,
        user_id: &str,
        as_of: NaiveDate,
    ) -> Result<Vec<BehaviorRow>, DatabaseError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT date, recovery_compliant, sleep_target_met, balanced_training
            FROM behavioral_metrics
            WHERE user_id = ?1 AND date BETWEEN ?2 AND ?3
            ORDER BY date DESC
            LIMIT ?4
            "#,
        )?;
        let from = days_back(as_of, BEHAVIOR_HISTORY_LIMIT as i64 - 1);
        let rows = stmt.query_map(
            params![user_id, from, as_of, BEHAVIOR_HISTORY_LIMIT as i64],
            |row| {
                Ok(BehaviorRow {
                    date: row.get("date")?,
                    recovery_compliant: row.get("recovery_compliant")?,
                    sleep_target_met: row.get("sleep_target_met")?,
                    balanced_training: row.get("balanced_training")?,
                })
            },
        )?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Snapshots in `[as_of − 28d, as_of]`, oldest first
    pub fn fetch_deload_input(
        &self,
        user_id: &str,
        as_of: NaiveDate,
    ) -> Result<Vec<DeloadSnapshotRow>, DatabaseError> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT snapshot_date, readiness_score, overtraining_flag, sleep_debt
            FROM recovery_snapshots
            WHERE user_id = ?1 AND snapshot_date BETWEEN ?2 AND ?3
            ORDER BY snapshot_date ASC
            "#,
        )?;
        let rows = stmt.query_map(
            params![user_id, days_back(as_of, DELOAD_LOOKBACK_DAYS), as_of],
            |row| {
                Ok(DeloadSnapshotRow {
                    date: row.get("snapshot_date")?,
                    readiness_score: row.get("readiness_score")?,
                    overtraining_flag: row.get("overtraining_flag")?,
                    sleep_debt: row.get("sleep_debt")?,
                })
            },
        )?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn active_deload_cycle(&self, user_id: &str) -> Result<Option<DeloadCycle>, DatabaseError> {
        Ok(Self::active_cycle_in(&self.conn, user_id)?)
    }

    fn active_cycle_in(conn: &Connection, user_id: &str) -> rusqlite::Result<Option<DeloadCycle>> {
        conn.query_row(
            r#"
            SELECT id, start_date, end_date, reason, volume_reduction_pct
            FROM deload_cycles
            WHERE user_id = ?1 AND end_date IS NULL
            ORDER BY start_date DESC
            LIMIT 1
            "#,
            params![user_id],
            Self::deload_cycle_from_row,
        )
        .optional()
    }

    /// Start a cycle unless one is already active for the user
    #[instrument(skip(self, reason), fields(user_id = %user_id, start = %start_date))]
    pub fn start_deload_cycle(
        &mut self,
        user_id: &str,
        start_date: NaiveDate,
        reason: &str,
        volume_reduction_pct: u8,
    ) -> Result<DeloadCycle, DatabaseError> {
        let tx = self.conn.transaction()?;
        if let Some(active) = Self::active_cycle_in(&tx, user_id)? {
            return Err(DatabaseError::ActiveDeload(active.start_date));
        }

        let cycle = DeloadCycle {
            id: Uuid::new_v4().to_string(),
            start_date,
            end_date: None,
            reason: reason.to_string(),
            volume_reduction_pct,
        };
        let inserted = tx.execute(
            r#"
            INSERT OR IGNORE INTO deload_cycles (id, user_id, start_date, end_date, reason, volume_reduction_pct)
            VALUES (?1, ?2, ?3, NULL, ?4, ?5)
            "#,
            params![cycle.id, user_id, cycle.start_date, cycle.reason, cycle.volume_reduction_pct],
        )?;
        if inserted == 0 {
            return Err(DatabaseError::Duplicate(format!(
                "deload cycle for {} starting {}",
                user_id, start_date
            )));
        }
        tx.commit()?;

        info!(reduction = volume_reduction_pct, "Deload cycle started");
        Ok(cycle)
    }

    /// Close the active cycle on `end_date`
    pub fn end_deload_cycle(
        &mut self,
        user_id: &str,
        end_date: NaiveDate,
    ) -> Result<DeloadCycle, DatabaseError> {
        let tx = self.conn.transaction()?;
        let Some(mut cycle) = Self::active_cycle_in(&tx, user_id)? else {
            return Err(DatabaseError::NotFound(format!("active deload cycle for {}", user_id)));
        };
        tx.execute(
            "UPDATE deload_cycles SET end_date = ?1 WHERE id = ?2",
            params![end_date, cycle.id],
        )?;
        tx.commit()?;

        cycle.end_date = Some(end_date);
        info!(user_id, %end_date, "Deload cycle ended");
        Ok(cycle)
    }

    /// Stored history for the `days` days ending on `as_of`, oldest first
    pub fn recovery_history(
        &self,
        user_id: &str,
        as_of: NaiveDate,
        days: i64,
    ) -> Result<Vec<RecoveryHistoryPoint>, DatabaseError> {
        let from = days_back(as_of, (days - 1).max(0));
        let mut stmt = self.conn.prepare(
            r#"
            SELECT snapshot_date, readiness_score, muscular_score, cns_score, sleep_score,
                   stress_score, sleep_debt
            FROM recovery_snapshots
            WHERE user_id = ?1 AND snapshot_date BETWEEN ?2 AND ?3
            ORDER BY snapshot_date ASC
            "#,
        )?;
        let rows = stmt.query_map(params![user_id, from, as_of], |row| {
            Ok(RecoveryHistoryPoint {
                date: row.get("snapshot_date")?,
                overall_score: row.get("readiness_score")?,
                muscular_score: row.get("muscular_score")?,
                cns_score: row.get("cns_score")?,
                sleep_score: row.get("sleep_score")?,
                stress_score: row.get("stress_score")?,
                sleep_debt: row.get("sleep_debt")?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Helper to convert database row to Workout struct
    fn workout_from_row(row: &Row) -> rusqlite::Result<Workout> {
        let exercises: String = row.get("exercises")?;
        let muscle_groups: String = row.get("muscle_groups")?;

        Ok(Workout {
            id: row.get("id")?,
            date: row.get("workout_date")?,
            duration_minutes: row.get("duration_minutes")?,
            perceived_exertion: row.get("perceived_exertion")?,
            name: row.get("name")?,
            notes: row.get("notes")?,
            exercises: serde_json::from_str(&exercises)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(e)))?,
            muscle_groups: serde_json::from_str(&muscle_groups)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(7, Type::Text, Box::new(e)))?,
        })
    }

    fn deload_cycle_from_row(row: &Row) -> rusqlite::Result<DeloadCycle> {
        Ok(DeloadCycle {
            id: row.get("id")?,
            start_date: row.get("start_date")?,
            end_date: row.get("end_date")?,
            reason: row.get("reason")?,
            volume_reduction_pct: row.get("volume_reduction_pct")?,
        })
    }
}

fn days_back(date: NaiveDate, days: i64) -> NaiveDate {
    date.checked_sub_signed(Duration::days(days)).unwrap_or(NaiveDate::MIN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::RecoveryEngine;
    use crate::models::MuscleIntensity;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn behavior(ok: bool) -> BehaviorOutput {
        BehaviorOutput {
            recovery_compliant: ok,
            sleep_target_met: ok,
            balanced_training: ok,
        }
    }

    #[test]
    fn test_workout_roundtrip_keeps_muscle_groups() {
        let db = Database::in_memory().unwrap();
        let workout = Workout::new("w1", "2025-02-19", 60.0, 8.0)
            .with_name("Leg day")
            .with_muscle("quads", MuscleIntensity::Primary)
            .with_muscle("glutes", MuscleIntensity::Secondary);
        db.insert_workout("u1", &workout).unwrap();

        let loaded = db.workouts_between("u1", date("2025-02-06"), date("2025-02-20")).unwrap();
        assert_eq!(loaded, vec![workout]);
        assert!(db.workouts_between("u2", date("2025-02-06"), date("2025-02-20")).unwrap().is_empty());
    }

    #[test]
    fn test_fetch_windows() {
        let db = Database::in_memory().unwrap();
        db.insert_workout("u1", &Workout::new("old", "2025-01-20", 60.0, 8.0)).unwrap();
        db.insert_workout("u1", &Workout::new("in", "2025-02-10", 60.0, 8.0)).unwrap();
        db.insert_workout("u1", &Workout::new("future", "2025-02-21", 60.0, 8.0)).unwrap();
        for (d, hrv) in [("2025-02-01", 90.0), ("2025-02-17", 60.0), ("2025-02-18", 62.0), ("2025-02-20", 64.0)] {
            db.upsert_stress_log(
                "u1",
                &StressLog {
                    date: d.to_string(),
                    stress_level: Some(4.0),
                    hrv_ms: Some(hrv),
                },
            )
            .unwrap();
        }

        let input = db.fetch_recovery_input("u1", date("2025-02-20"), Some(41.0)).unwrap();
        assert_eq!(input.as_of_date, "2025-02-20");
        assert_eq!(input.workouts.len(), 1);
        assert_eq!(input.workouts[0].id, "in");
        assert_eq!(input.stress_logs.len(), 3);
        assert_eq!(input.recent_hrv_ms, Some(64.0));
        assert_eq!(input.baseline_hrv_ms, Some(62.0));
        assert_eq!(input.age_years, Some(41.0));
    }

    #[test]
    fn test_sleep_log_upsert_replaces() {
        let db = Database::in_memory().unwrap();
        let mut log = SleepLog {
            date: "2025-02-19".to_string(),
            total_minutes: Some(300.0),
            quality: Some(4.0),
            deep_sleep_minutes: None,
            rem_minutes: None,
            awakenings: Some(2),
        };
        db.upsert_sleep_log("u1", &log).unwrap();
        log.total_minutes = Some(450.0);
        db.upsert_sleep_log("u1", &log).unwrap();

        let input = db.fetch_recovery_input("u1", date("2025-02-20"), None).unwrap();
        assert_eq!(input.sleep_logs, vec![log]);
    }

    #[test]
    fn test_snapshot_upsert_is_idempotent() {
        let mut db = Database::in_memory().unwrap();
        let day = date("2025-02-20");
        let output = RecoveryEngine::run(&RecoveryEngineInput {
            as_of_date: day.to_string(),
            ..Default::default()
        });

        assert!(!db.snapshot_exists("u1", day).unwrap());
        db.save_recovery("u1", day, &output, &behavior(true)).unwrap();
        db.save_recovery("u1", day, &output, &behavior(false)).unwrap();
        assert!(db.snapshot_exists("u1", day).unwrap());

        let history = db.recovery_history("u1", day, 7).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].overall_score, output.overall_score);

        let behavior_rows = db.fetch_behavior_history("u1", day).unwrap();
        assert_eq!(behavior_rows.len(), 1);
        assert!(!behavior_rows[0].recovery_compliant);
    }

    #[test]
    fn test_behavior_history_ends_at_as_of() {
        let mut db = Database::in_memory().unwrap();
        let output = RecoveryEngine::run(&RecoveryEngineInput {
            as_of_date: "2025-01-01".to_string(),
            ..Default::default()
        });
        let start = date("2025-01-01");
        for offset in 0..90 {
            db.save_recovery("u1", start + Duration::days(offset), &output, &behavior(true))
                .unwrap();
        }

        let rows = db.fetch_behavior_history("u1", date("2025-01-20")).unwrap();
        assert_eq!(rows.len(), 20);
        assert_eq!(rows[0].date, "2025-01-20");

        let rows = db.fetch_behavior_history("u1", date("2025-03-31")).unwrap();
        assert_eq!(rows.len(), BEHAVIOR_HISTORY_LIMIT);
        assert_eq!(rows.last().map(|r| r.date.as_str()), Some("2025-01-31"));
    }

    #[test]
    fn test_recent_snapshots_exclude_as_of_day() {
        let mut db = Database::in_memory().unwrap();
        let output = RecoveryEngine::run(&RecoveryEngineInput {
            as_of_date: "2025-02-20".to_string(),
            ..Default::default()
        });
        for d in ["2025-02-01", "2025-02-10", "2025-02-19", "2025-02-20"] {
            db.save_recovery("u1", date(d), &output, &behavior(true)).unwrap();
        }

        let input = db.fetch_recovery_input("u1", date("2025-02-20"), None).unwrap();
        let dates: Vec<&str> = input.recent_snapshots.iter().map(|s| s.date.as_str()).collect();
        assert_eq!(dates, vec!["2025-02-19", "2025-02-10"]);

        let deload_rows = db.fetch_deload_input("u1", date("2025-02-20")).unwrap();
        assert_eq!(deload_rows.len(), 4);
        assert_eq!(deload_rows[0].date, "2025-02-01");
    }

    #[test]
    fn test_only_one_active_deload_cycle() {
        let mut db = Database::in_memory().unwrap();
        let started = db
            .start_deload_cycle("u1", date("2025-02-10"), "Accumulated fatigue trend detected", 30)
            .unwrap();
        assert!(started.is_active());

        let err = db
            .start_deload_cycle("u1", date("2025-02-12"), "again", 30)
            .unwrap_err();
        assert!(matches!(err, DatabaseError::ActiveDeload(d) if d == date("2025-02-10")));

        // Other users are independent
        assert!(db.start_deload_cycle("u2", date("2025-02-12"), "x", 20).is_ok());

        let ended = db.end_deload_cycle("u1", date("2025-02-17")).unwrap();
        assert_eq!(ended.end_date, Some(date("2025-02-17")));
        assert!(db.active_deload_cycle("u1").unwrap().is_none());
        assert!(matches!(
            db.end_deload_cycle("u1", date("2025-02-18")),
            Err(DatabaseError::NotFound(_))
        ));

        let restarted = db.start_deload_cycle("u1", date("2025-03-01"), "again", 25).unwrap();
        assert_eq!(
            db.active_deload_cycle("u1").unwrap().map(|c| c.volume_reduction_pct),
            Some(restarted.volume_reduction_pct)
        );
    }

    #[test]
    fn test_workout_dates_are_distinct() {
        let db = Database::in_memory().unwrap();
        db.insert_workout("u1", &Workout::new("a", "2025-02-18T07:00:00", 30.0, 5.0)).unwrap();
        db.insert_workout("u1", &Workout::new("b", "2025-02-18T18:00:00", 30.0, 5.0)).unwrap();
        db.insert_workout("u1", &Workout::new("c", "2025-02-19", 30.0, 5.0)).unwrap();

        let dates = db.workout_dates_between("u1", date("2025-02-14"), date("2025-02-20")).unwrap();
        assert_eq!(dates, vec![date("2025-02-18"), date("2025-02-19")]);
    }
}
