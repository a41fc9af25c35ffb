use anyhow::{bail, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use std::io;
use std::path::{Path, PathBuf};
use tabled::{settings::Style, Table, Tabled};
use tracing::{error, info, warn};

use recoveryrs::config::{AppConfig, UserProfile};
use recoveryrs::database::Database;
use recoveryrs::error::{ErrorSeverity, RecoveryError};
use recoveryrs::logging::init_logging;
use recoveryrs::models::{MuscleIntensity, Recommendation, SleepLog, StressLog, Workout};
use recoveryrs::periodization::PeriodizationStatus;
use recoveryrs::pipeline::{RecoveryPipeline, RecoveryReport, SaveMode};

/// RecoveryRS - Training Recovery CLI
///
/// Scores daily readiness from logged workouts, sleep and stress, and tracks
/// deload cycles and recovery habits.
#[derive(Parser)]
#[command(name = "recoveryrs")]
#[command(author = "RecoveryRS Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Training Recovery CLI", long_about = None)]
struct Cli {
    /// Sets a custom config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Database file (overrides database.path)
    #[arg(long, value_name = "FILE")]
    db: Option<PathBuf>,

    /// User id (defaults to default_user_id)
    #[arg(short, long, global = true)]
    user: Option<String>,

    /// Increase verbosity of output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log a workout and refresh today's recovery
    LogWorkout {
        /// Workout date or timestamp (default: today)
        #[arg(short, long)]
        date: Option<String>,

        /// Duration in minutes
        #[arg(short = 'm', long)]
        duration: f64,

        /// Rated perceived exertion (1-10)
        #[arg(short, long)]
        rpe: f64,

        /// Session name, e.g. "Heavy squat day"
        #[arg(short, long)]
        name: Option<String>,

        #[arg(long)]
        notes: Option<String>,

        /// Muscle group, optionally with intensity: quads, glutes:secondary
        #[arg(long = "muscle", value_name = "GROUP[:INTENSITY]")]
        muscles: Vec<String>,
    },

    /// Log a night of sleep and refresh today's recovery
    LogSleep {
        /// Night date (default: today)
        #[arg(short, long)]
        date: Option<String>,

        /// Total sleep in minutes
        #[arg(short = 'm', long)]
        minutes: f64,

        /// Quality (1-10)
        #[arg(short, long)]
        quality: Option<f64>,

        #[arg(long)]
        deep: Option<f64>,

        #[arg(long)]
        rem: Option<f64>,

        #[arg(long)]
        awakenings: Option<u32>,
    },

    /// Log a daily stress level and HRV reading
    LogStress {
        #[arg(short, long)]
        date: Option<String>,

        /// Stress level (1-10)
        #[arg(short, long)]
        level: Option<f64>,

        /// Heart-rate variability in milliseconds
        #[arg(long)]
        hrv: Option<f64>,
    },

    /// Calculate recovery for a date
    Calculate {
        /// As-of date (YYYY-MM-DD, default: today)
        #[arg(short, long)]
        date: Option<String>,

        /// When to store the snapshot (if-absent, always, never)
        #[arg(short, long)]
        save: Option<SaveMode>,

        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show stored recovery history
    History {
        /// Range ending on --date (7d or 30d)
        #[arg(short, long, default_value = "7d")]
        range: HistoryRange,

        #[arg(short, long)]
        date: Option<String>,

        /// Output format
        #[arg(short = 'f', long, value_enum, default_value = "table")]
        format: HistoryFormat,
    },

    /// Show recovery, sleep and balance streaks
    Streaks {
        #[arg(short, long)]
        date: Option<String>,
    },

    /// Show the deload state, or end the active cycle
    Deload {
        #[arg(short, long)]
        date: Option<String>,

        /// End the active deload cycle on --date
        #[arg(long)]
        end: bool,
    },

    /// Recompute and store every day in a range
    Backfill {
        #[arg(long)]
        from: String,

        #[arg(long)]
        to: String,
    },

    /// Add a user profile
    UserAdd {
        /// Display name
        #[arg(short, long)]
        name: String,

        /// Explicit id (default: generated)
        #[arg(long)]
        id: Option<String>,

        /// Date of birth (YYYY-MM-DD)
        #[arg(long)]
        dob: Option<String>,

        /// Age in years when no date of birth is given
        #[arg(long)]
        age: Option<f64>,
    },

    /// Configure application settings
    Config {
        /// List all configuration options
        #[arg(short, long)]
        list: bool,

        /// Set a configuration value (key=value)
        #[arg(short, long)]
        set: Option<String>,

        /// Get a configuration value
        #[arg(short, long)]
        get: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HistoryRange {
    Week,
    Month,
}

impl HistoryRange {
    fn days(&self) -> i64 {
        match self {
            HistoryRange::Week => 7,
            HistoryRange::Month => 30,
        }
    }
}

impl std::str::FromStr for HistoryRange {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "7d" | "7" | "week" => Ok(HistoryRange::Week),
            "30d" | "30" | "month" => Ok(HistoryRange::Month),
            _ => Err(format!("Invalid range: {} (expected 7d or 30d)", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum HistoryFormat {
    Table,
    Csv,
}

#[derive(Tabled)]
struct ComponentRow {
    #[tabled(rename = "Component")]
    component: &'static str,
    #[tabled(rename = "Score")]
    score: u8,
    #[tabled(rename = "Weight")]
    weight: &'static str,
}

#[derive(Tabled)]
struct HistoryRow {
    #[tabled(rename = "Date")]
    date: NaiveDate,
    #[tabled(rename = "Overall")]
    overall: u8,
    #[tabled(rename = "Muscular")]
    muscular: u8,
    #[tabled(rename = "CNS")]
    cns: u8,
    #[tabled(rename = "Sleep")]
    sleep: u8,
    #[tabled(rename = "Stress")]
    stress: u8,
    #[tabled(rename = "Sleep debt (min)")]
    sleep_debt: String,
}

fn main() {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(AppConfig::default_config_path);
    let config = match AppConfig::load_or_default_from(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            std::process::exit(2);
        }
    };

    if let Err(e) = init_logging(&config.logging.clone().with_verbosity(cli.verbose)) {
        eprintln!("{}", format!("Logging disabled: {}", e).dimmed());
    }

    if let Err(err) = run(cli, config, config_path) {
        report_error(&err);
        std::process::exit(1);
    }
}

fn report_error(err: &anyhow::Error) {
    match err.downcast_ref::<RecoveryError>() {
        Some(recovery_err) => {
            match recovery_err.severity() {
                ErrorSeverity::Critical | ErrorSeverity::Error => {
                    error!(error = %recovery_err, retryable = recovery_err.is_retryable(), "Command failed")
                }
                ErrorSeverity::Warning => warn!(error = %recovery_err, "Command failed"),
                ErrorSeverity::Info => info!(error = %recovery_err, "Command failed"),
            }
            let label = match recovery_err.severity() {
                ErrorSeverity::Info => "Note:".yellow().bold(),
                ErrorSeverity::Warning => "Warning:".yellow().bold(),
                _ => "Error:".red().bold(),
            };
            eprintln!("{} {}", label, recovery_err.user_message());
        }
        None => eprintln!("{} {:#}", "Error:".red().bold(), err),
    }
}

fn run(cli: Cli, mut config: AppConfig, config_path: PathBuf) -> Result<()> {
    // Config and user commands don't need the database
    match &cli.command {
        Commands::Config { list, set, get } => {
            return handle_config(&mut config, &config_path, *list, set.as_deref(), get.as_deref());
        }
        Commands::UserAdd { name, id, dob, age } => {
            let mut user = UserProfile::new(name.clone(), id.clone());
            user.date_of_birth = dob.as_deref().map(parse_date_arg).transpose()?;
            user.age_years = *age;
            let user_id = user.id.clone();
            config.add_user(user);
            config.save_to_file(&config_path)?;
            println!("{} {}", "✓ Added user".green(), user_id.bold());
            return Ok(());
        }
        _ => {}
    }

    let db_path = cli.db.clone().unwrap_or_else(|| config.database.path.clone());
    let db = Database::new(&db_path).map_err(RecoveryError::from)?;
    let mut pipeline = RecoveryPipeline::new(db).with_progress(true);
    let user_id = config.resolve_user_id(cli.user.as_deref())?;
    let today = Local::now().date_naive();

    match cli.command {
        Commands::LogWorkout {
            date,
            duration,
            rpe,
            name,
            notes,
            muscles,
        } => {
            if !(1.0..=10.0).contains(&rpe) {
                return Err(RecoveryError::Validation(format!("RPE must be between 1 and 10, got {}", rpe)).into());
            }
            let date = date.unwrap_or_else(|| today.to_string());
            let mut workout = Workout::new(uuid::Uuid::new_v4().to_string(), date, duration, rpe);
            workout.name = name;
            workout.notes = notes;
            for spec in &muscles {
                let (group, intensity) = parse_muscle_arg(spec)?;
                workout = workout.with_muscle(group, intensity);
            }

            let report = pipeline.record_workout(&user_id, &workout, today, config.age_for(&user_id, today))?;
            println!("{} {}", "✓ Workout logged".green(), workout.id.dimmed());
            print_summary_line(&report);
        }

        Commands::LogSleep {
            date,
            minutes,
            quality,
            deep,
            rem,
            awakenings,
        } => {
            let log = SleepLog {
                date: resolve_date(date.as_deref(), today)?.to_string(),
                total_minutes: Some(minutes),
                quality,
                deep_sleep_minutes: deep,
                rem_minutes: rem,
                awakenings,
            };
            let report = pipeline.record_sleep(&user_id, &log, today, config.age_for(&user_id, today))?;
            println!("{}", "✓ Sleep logged".green());
            print_summary_line(&report);
        }

        Commands::LogStress { date, level, hrv } => {
            let log = StressLog {
                date: resolve_date(date.as_deref(), today)?.to_string(),
                stress_level: level,
                hrv_ms: hrv,
            };
            pipeline.record_stress(&user_id, &log)?;
            println!("{}", "✓ Stress logged".green());
        }

        Commands::Calculate { date, save, json } => {
            let as_of = resolve_date(date.as_deref(), today)?;
            let mode = save.unwrap_or(if config.engine.write_if_absent {
                SaveMode::WriteIfAbsent
            } else {
                SaveMode::Always
            });
            let report = pipeline.calculate(&user_id, as_of, config.age_for(&user_id, as_of), mode)?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report).map_err(RecoveryError::from)?);
            } else {
                print_report(&report);
            }
        }

        Commands::History { range, date, format } => {
            let as_of = resolve_date(date.as_deref(), today)?;
            let points = pipeline
                .database()
                .recovery_history(&user_id, as_of, range.days())
                .map_err(RecoveryError::from)?;

            match format {
                HistoryFormat::Csv => {
                    let mut writer = csv::Writer::from_writer(io::stdout());
                    for point in &points {
                        writer.serialize(point)?;
                    }
                    writer.flush()?;
                }
                HistoryFormat::Table => {
                    if points.is_empty() {
                        println!("{}", "No recovery history stored for this range".yellow());
                        return Ok(());
                    }
                    let rows: Vec<HistoryRow> = points
                        .iter()
                        .map(|p| HistoryRow {
                            date: p.date,
                            overall: p.overall_score,
                            muscular: p.muscular_score,
                            cns: p.cns_score,
                            sleep: p.sleep_score,
                            stress: p.stress_score,
                            sleep_debt: format!("{:.0}", p.sleep_debt),
                        })
                        .collect();
                    println!("{}", Table::new(rows).with(Style::rounded()));
                }
            }
        }

        Commands::Streaks { date } => {
            let as_of = resolve_date(date.as_deref(), today)?;
            let streaks = pipeline.streaks(&user_id, as_of)?;
            println!("{}", format!("Streaks as of {}", as_of).cyan().bold());
            println!("  Recovery compliance: {} days", streaks.recovery_streak.to_string().bold());
            println!("  Sleep target:        {} days", streaks.sleep_streak.to_string().bold());
            println!("  Balanced training:   {} days", streaks.balance_streak.to_string().bold());
        }

        Commands::Deload { date, end } => {
            let as_of = resolve_date(date.as_deref(), today)?;
            if end {
                let cycle = pipeline
                    .database_mut()
                    .end_deload_cycle(&user_id, as_of)
                    .map_err(RecoveryError::from)?;
                println!(
                    "{} started {} ended {}",
                    "✓ Deload cycle closed:".green(),
                    cycle.start_date,
                    as_of
                );
            } else {
                match pipeline.database().active_deload_cycle(&user_id).map_err(RecoveryError::from)? {
                    Some(cycle) => println!(
                        "{} since {} ({}% volume reduction) - {}",
                        "Deload active".magenta().bold(),
                        cycle.start_date,
                        cycle.volume_reduction_pct,
                        cycle.reason
                    ),
                    None => print_periodization(&pipeline.periodization_status(&user_id, as_of)?),
                }
            }
        }

        Commands::Backfill { from, to } => {
            let from = parse_date_arg(&from)?;
            let to = parse_date_arg(&to)?;
            let summary = pipeline.backfill(&user_id, from, to, config.age_for(&user_id, to))?;
            println!(
                "{} {} days recomputed, {} stored",
                "✓ Backfill complete:".green(),
                summary.days,
                summary.persisted
            );
        }

        Commands::Config { .. } | Commands::UserAdd { .. } => {}
    }

    Ok(())
}

fn handle_config(
    config: &mut AppConfig,
    config_path: &Path,
    list: bool,
    set: Option<&str>,
    get: Option<&str>,
) -> Result<()> {
    if let Some(key_value) = set {
        let Some((key, value)) = key_value.split_once('=') else {
            bail!("Expected key=value, got {}", key_value);
        };
        config.set(key.trim(), value)?;
        config.save_to_file(config_path)?;
        println!("{} {} = {}", "✓ Set".green(), key.trim(), value.trim());
    } else if let Some(key) = get {
        match config.get(key) {
            Some(value) => println!("{}", value),
            None => bail!("Unknown config key: {}", key),
        }
    } else if list {
        println!("{}", format!("Configuration ({})", config_path.display()).white().bold());
        for (key, value) in config.list() {
            println!("  {} = {}", key.cyan(), value);
        }
    } else {
        println!("Use --list, --get KEY or --set KEY=VALUE");
    }
    Ok(())
}

fn parse_date_arg(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| RecoveryError::Validation(format!("Invalid date: {} (expected YYYY-MM-DD)", value)).into())
}

fn resolve_date(value: Option<&str>, today: NaiveDate) -> Result<NaiveDate> {
    value.map(parse_date_arg).unwrap_or(Ok(today))
}

fn parse_muscle_arg(spec: &str) -> Result<(&str, MuscleIntensity)> {
    match spec.split_once(':') {
        Some((group, intensity)) => {
            let intensity = intensity
                .parse::<MuscleIntensity>()
                .map_err(RecoveryError::Validation)?;
            Ok((group.trim(), intensity))
        }
        None => Ok((spec.trim(), MuscleIntensity::Primary)),
    }
}

fn colored_score(score: u8) -> ColoredString {
    match Recommendation::from_score(score) {
        Recommendation::Train => score.to_string().green().bold(),
        Recommendation::Moderate => score.to_string().yellow().bold(),
        Recommendation::Rest => score.to_string().red().bold(),
    }
}

fn print_summary_line(report: &RecoveryReport) {
    println!(
        "  Readiness {} ({})",
        colored_score(report.output.overall_score),
        report.output.recommendation
    );
}

fn print_report(report: &RecoveryReport) {
    let output = &report.output;
    println!("{}", format!("Recovery for {} on {}", report.user_id, report.date).blue().bold());
    println!(
        "  Readiness: {}  {}",
        colored_score(output.overall_score),
        output.recommendation.to_string().to_uppercase().bold()
    );
    println!("  {}", output.recommendation.description().dimmed());
    println!();

    let components = vec![
        ComponentRow { component: "Muscular", score: output.muscular_score, weight: "40%" },
        ComponentRow { component: "CNS", score: output.cns_score, weight: "30%" },
        ComponentRow { component: "Sleep", score: output.sleep_score, weight: "20%" },
        ComponentRow { component: "Stress", score: output.stress_score, weight: "10%" },
    ];
    println!("{}", Table::new(components).with(Style::rounded()));

    if !output.muscle_breakdown.is_empty() {
        println!("{}", "Muscle groups".bold());
        for (group, score) in &output.muscle_breakdown {
            println!("  {:<12} {}", group.to_string(), colored_score(*score));
        }
    }

    println!("  Sleep debt: {:.0} min", output.sleep_debt);
    println!("  Training load index: {:.1}", output.training_load_index);
    if let Some(projected) = output.projected_full_recovery {
        println!("  CNS fully recovered by: {}", projected.format("%Y-%m-%d %H:%M UTC"));
    }
    if output.overtraining_flag {
        println!("  {}", "⚠ Overtraining risk: back-to-back load without recovery".red());
    }
    if output.deload_flag {
        println!("  {}", "⚠ Fatigue trend suggests a lighter week".yellow());
    }
    print_periodization(&report.periodization);

    let check = |ok: bool| if ok { "✓".green() } else { "✗".red() };
    println!(
        "  Habits: {} recovery  {} sleep  {} balance",
        check(report.behavior.recovery_compliant),
        check(report.behavior.sleep_target_met),
        check(report.behavior.balanced_training)
    );
    if !report.persisted {
        println!("  {}", "(snapshot not stored)".dimmed());
    }
}

fn print_periodization(status: &PeriodizationStatus) {
    match status {
        PeriodizationStatus::InDeload { volume_reduction_pct } => {
            println!("  {} reduce volume by {}%", "Deload active:".magenta().bold(), volume_reduction_pct)
        }
        PeriodizationStatus::StartDeload { reason, volume_reduction_pct } => println!(
            "  {} {} - reduce volume by {}%",
            "Deload recommended:".magenta().bold(),
            reason,
            volume_reduction_pct
        ),
        PeriodizationStatus::NoDeload => println!("  {}", "No deload needed".dimmed()),
    }
}
