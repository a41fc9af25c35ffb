// Library interface for RecoveryRS modules
// The engine modules are pure; database and pipeline handle storage.

pub mod behavior;
pub mod cns;
pub mod config;
pub mod database;
pub mod engine;
pub mod error;
pub mod logging;
pub mod models;
pub mod muscle;
pub mod periodization;
pub mod pipeline;
pub mod safety;
pub mod sleep;
pub mod stress;
pub mod trend;

// Re-export commonly used types for convenience
pub use models::*;
pub use behavior::{BehaviorEngine, StreakEngine};
pub use cns::{CnsClassifier, CnsRecoveryModel};
pub use engine::RecoveryEngine;
pub use muscle::MuscleRecoveryModel;
pub use periodization::{PeriodizationEngine, PeriodizationStatus};
pub use pipeline::{RecoveryPipeline, SaveMode};
pub use sleep::SleepModel;
pub use stress::StressModel;
pub use trend::TrendModel;
pub use error::{RecoveryError, Result};
pub use logging::{LogConfig, LogFormat, LogLevel};
