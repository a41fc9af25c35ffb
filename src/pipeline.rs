//! Fetch, compute and persist recovery for a user and date
//!
//! The engine runs between storage reads and writes, never interleaved with
//! them. A snapshot and its behavior row are written together or not at all,
//! and the periodization step only runs after a successful write.

use chrono::{Duration, NaiveDate, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info, instrument, warn};

use crate::behavior::{BehaviorEngine, BehaviorInput, BehaviorOutput, StreakEngine, StreakOutput};
use crate::database::{Database, DatabaseError};
use crate::engine::RecoveryEngine;
use crate::error::{RecoveryError, Result};
use crate::models::{
    RecoveryEngineInput, RecoveryEngineOutput, SleepLog, StressLog, Workout,
};
use crate::periodization::{PeriodizationEngine, PeriodizationStatus};
use crate::safety::parse_timestamp;

/// Days of workout dates considered for balanced training, including the as-of day
const BEHAVIOR_WINDOW_DAYS: i64 = 7;

/// Upper bound on a single backfill run
pub const MAX_BACKFILL_DAYS: i64 = 366;

/// When a computed snapshot is written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SaveMode {
    /// Write only when no snapshot exists for the date
    WriteIfAbsent,
    /// Recompute and upsert
    Always,
    /// Compute and display without writing
    DisplayOnly,
}

impl SaveMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SaveMode::WriteIfAbsent => "if-absent",
            SaveMode::Always => "always",
            SaveMode::DisplayOnly => "never",
        }
    }
}

impl fmt::Display for SaveMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SaveMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "if-absent" | "write-if-absent" => Ok(SaveMode::WriteIfAbsent),
            "always" => Ok(SaveMode::Always),
            "never" | "display-only" => Ok(SaveMode::DisplayOnly),
            _ => Err(format!("Invalid save mode: {} (expected if-absent, always or never)", s)),
        }
    }
}

/// Everything produced for one user and date
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryReport {
    pub user_id: String,
    pub date: NaiveDate,
    pub output: RecoveryEngineOutput,
    pub behavior: BehaviorOutput,
    /// True when this run wrote the snapshot
    pub persisted: bool,
    pub periodization: PeriodizationStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BackfillSummary {
    pub days: usize,
    pub persisted: usize,
}

pub struct RecoveryPipeline {
    db: Database,
    show_progress: bool,
}

impl RecoveryPipeline {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            show_progress: false,
        }
    }

    /// Show an indicatif progress bar during backfill
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn database_mut(&mut self) -> &mut Database {
        &mut self.db
    }

    /// Compute recovery for `as_of` and persist according to `mode`
    #[instrument(skip(self), fields(user_id = %user_id, as_of = %as_of))]
    pub fn calculate(
        &mut self,
        user_id: &str,
        as_of: NaiveDate,
        age_years: Option<f64>,
        mode: SaveMode,
    ) -> Result<RecoveryReport> {
        let input = self.db.fetch_recovery_input(user_id, as_of, age_years)?;
        let workout_dates = self.recent_workout_dates(user_id, as_of)?;

        let output = RecoveryEngine::run(&input);
        let behavior = behavior_for(&output, &workout_dates, as_of);

        let persisted = match mode {
            SaveMode::DisplayOnly => false,
            SaveMode::WriteIfAbsent if self.db.snapshot_exists(user_id, as_of)? => {
                debug!("Snapshot already stored, skipping write");
                false
            }
            SaveMode::WriteIfAbsent | SaveMode::Always => {
                self.db.save_recovery(user_id, as_of, &output, &behavior)?;
                true
            }
        };

        let periodization = if persisted {
            self.apply_periodization(user_id, as_of)?
        } else {
            self.periodization_status(user_id, as_of)?
        };

        info!(
            overall = output.overall_score,
            recommendation = %output.recommendation,
            persisted,
            "Recovery calculated"
        );

        Ok(RecoveryReport {
            user_id: user_id.to_string(),
            date: as_of,
            output,
            behavior,
            persisted,
            periodization,
        })
    }

    /// Store a workout and refresh the snapshot for `as_of`
    pub fn record_workout(
        &mut self,
        user_id: &str,
        workout: &Workout,
        as_of: NaiveDate,
        age_years: Option<f64>,
    ) -> Result<RecoveryReport> {
        require_timestamp("workout", &workout.date)?;
        self.db.insert_workout(user_id, workout)?;
        self.calculate(user_id, as_of, age_years, SaveMode::Always)
    }

    /// Store a night of sleep and refresh the snapshot for `as_of`
    pub fn record_sleep(
        &mut self,
        user_id: &str,
        log: &SleepLog,
        as_of: NaiveDate,
        age_years: Option<f64>,
    ) -> Result<RecoveryReport> {
        require_timestamp("sleep", &log.date)?;
        self.db.upsert_sleep_log(user_id, log)?;
        self.calculate(user_id, as_of, age_years, SaveMode::Always)
    }

    /// Stress logs don't trigger recomputation; the next calculation picks them up
    pub fn record_stress(&mut self, user_id: &str, log: &StressLog) -> Result<()> {
        require_timestamp("stress", &log.date)?;
        self.db.upsert_stress_log(user_id, log)?;
        Ok(())
    }

    /// Read-only periodization state: the active cycle, else a fresh evaluation
    pub fn periodization_status(&self, user_id: &str, as_of: NaiveDate) -> Result<PeriodizationStatus> {
        let active = self.db.active_deload_cycle(user_id)?;
        let rows = match active {
            Some(_) => Vec::new(),
            None => self.db.fetch_deload_input(user_id, as_of)?,
        };
        Ok(PeriodizationEngine::assess(active.as_ref(), &rows))
    }

    /// Periodization step that starts a cycle when one is recommended
    fn apply_periodization(&mut self, user_id: &str, as_of: NaiveDate) -> Result<PeriodizationStatus> {
        let status = self.periodization_status(user_id, as_of)?;

        if let PeriodizationStatus::StartDeload {
            reason,
            volume_reduction_pct,
        } = &status
        {
            match self
                .db
                .start_deload_cycle(user_id, as_of, reason, *volume_reduction_pct)
            {
                Ok(_) => {}
                // Another writer started one between the check and the insert
                Err(DatabaseError::ActiveDeload(start)) => {
                    warn!(%start, "Deload cycle already active");
                    return self.periodization_status(user_id, as_of);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(status)
    }

    pub fn streaks(&self, user_id: &str, as_of: NaiveDate) -> Result<StreakOutput> {
        let history = self.db.fetch_behavior_history(user_id, as_of)?;
        Ok(StreakEngine::evaluate(&history, as_of))
    }

    /// Recompute and upsert every day in `[from, to]`.
    ///
    /// Inputs are read up front, so trend checks see the snapshots stored before
    /// the run. Deload cycles are not started retroactively.
    #[instrument(skip(self), fields(user_id = %user_id, from = %from, to = %to))]
    pub fn backfill(
        &mut self,
        user_id: &str,
        from: NaiveDate,
        to: NaiveDate,
        age_years: Option<f64>,
    ) -> Result<BackfillSummary> {
        if from > to {
            return Err(RecoveryError::Validation(format!(
                "backfill range is empty: {} is after {}",
                from, to
            )));
        }
        let span = (to - from).num_days() + 1;
        if span > MAX_BACKFILL_DAYS {
            return Err(RecoveryError::Validation(format!(
                "backfill range of {} days exceeds the {} day limit",
                span, MAX_BACKFILL_DAYS
            )));
        }

        let dates: Vec<NaiveDate> = from.iter_days().take(span as usize).collect();

        let mut inputs: Vec<(NaiveDate, RecoveryEngineInput, Vec<NaiveDate>)> =
            Vec::with_capacity(dates.len());
        for &date in &dates {
            let input = self.db.fetch_recovery_input(user_id, date, age_years)?;
            let workout_dates = self.recent_workout_dates(user_id, date)?;
            inputs.push((date, input, workout_dates));
        }

        let progress = if self.show_progress {
            let pb = ProgressBar::new(inputs.len() as u64);
            pb.set_style(
                ProgressStyle::with_template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({msg})")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("#>-"),
            );
            pb.set_message("computing");
            Some(pb)
        } else {
            None
        };

        let generated_at = Utc::now();
        let computed: Vec<(NaiveDate, RecoveryEngineOutput, BehaviorOutput)> = inputs
            .par_iter()
            .map(|(date, input, workout_dates)| {
                let output = RecoveryEngine::run_at(input, generated_at);
                let behavior = behavior_for(&output, workout_dates, *date);
                if let Some(pb) = &progress {
                    pb.inc(1);
                }
                (*date, output, behavior)
            })
            .collect();

        if let Some(pb) = &progress {
            pb.set_message("saving");
        }

        let mut summary = BackfillSummary {
            days: computed.len(),
            persisted: 0,
        };
        for (date, output, behavior) in &computed {
            self.db.save_recovery(user_id, *date, output, behavior)?;
            summary.persisted += 1;
        }

        if let Some(pb) = progress {
            pb.finish_with_message("complete");
        }

        info!(days = summary.days, "Backfill complete");
        Ok(summary)
    }

    fn recent_workout_dates(&self, user_id: &str, as_of: NaiveDate) -> Result<Vec<NaiveDate>> {
        let from = as_of
            .checked_sub_signed(Duration::days(BEHAVIOR_WINDOW_DAYS - 1))
            .unwrap_or(as_of);
        Ok(self.db.workout_dates_between(user_id, from, as_of)?)
    }
}

/// Reject log dates the models could never read
fn require_timestamp(kind: &str, value: &str) -> Result<()> {
    if parse_timestamp(value).is_none() {
        return Err(RecoveryError::Validation(format!(
            "Invalid {} date: {} (expected YYYY-MM-DD or an ISO 8601 timestamp)",
            kind, value
        )));
    }
    Ok(())
}

fn behavior_for(output: &RecoveryEngineOutput, workout_dates: &[NaiveDate], as_of: NaiveDate) -> BehaviorOutput {
    BehaviorEngine::evaluate(&BehaviorInput {
        recommendation: output.recommendation,
        workout_logged_today: workout_dates.contains(&as_of),
        sleep_debt_minutes: output.sleep_debt,
        last_7_days_workout_dates: workout_dates.to_vec(),
        overtraining_flag: output.overtraining_flag,
    })
}
