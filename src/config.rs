use anyhow::{bail, Context, Result};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::logging::LogConfig;

const CONFIG_DIR: &str = ".recoveryrs";
const CONFIG_FILE: &str = "config.toml";
const DATABASE_FILE: &str = "recovery.db";

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// User the CLI acts on when none is given
    pub default_user_id: Option<String>,

    /// Application metadata
    pub metadata: ConfigMetadata,

    /// Storage location
    #[serde(default)]
    pub database: DatabaseSettings,

    /// Logging setup
    #[serde(default)]
    pub logging: LogConfig,

    /// Recovery computation defaults
    #[serde(default)]
    pub engine: EngineSettings,

    /// Known users keyed by id
    #[serde(default)]
    pub users: BTreeMap<String, UserProfile>,
}

/// Configuration metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigMetadata {
    /// Configuration format version
    pub version: String,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last modification timestamp
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// SQLite database file
    pub path: PathBuf,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: AppConfig::config_dir().join(DATABASE_FILE),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Age used when a user profile has neither birth date nor age
    pub default_age_years: Option<f64>,

    /// Dashboard-style calculations only persist when no snapshot exists yet
    pub write_if_absent: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            default_age_years: None,
            write_if_absent: true,
        }
    }
}

/// Per-user profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Unique user identifier
    pub id: String,

    /// Display name
    pub name: String,

    /// Date of birth for age-based recovery adjustment
    pub date_of_birth: Option<NaiveDate>,

    /// Fixed age when no birth date is known
    pub age_years: Option<f64>,
}

impl UserProfile {
    /// Create a new profile with a generated id when none is given
    pub fn new(name: impl Into<String>, id: Option<String>) -> Self {
        UserProfile {
            id: id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            name: name.into(),
            date_of_birth: None,
            age_years: None,
        }
    }

    /// Age in whole years on `date`, preferring the birth date
    pub fn age_on(&self, date: NaiveDate) -> Option<f64> {
        if let Some(dob) = self.date_of_birth {
            let mut years = date.year() - dob.year();
            if (date.month(), date.day()) < (dob.month(), dob.day()) {
                years -= 1;
            }
            return (years >= 0).then_some(f64::from(years));
        }
        self.age_years
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        let now = Utc::now();

        AppConfig {
            default_user_id: None,
            metadata: ConfigMetadata {
                version: "1.0".to_string(),
                created_at: now,
                updated_at: now,
            },
            database: DatabaseSettings::default(),
            logging: LogConfig::default(),
            engine: EngineSettings::default(),
            users: BTreeMap::new(),
        }
    }
}

/// Configuration management implementation
impl AppConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: AppConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML configuration: {}", path.as_ref().display()))?;

        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.metadata.updated_at = Utc::now();

        if let Some(parent) = path.as_ref().parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
        }

        let toml_content = toml::to_string_pretty(self)
            .with_context(|| "Failed to serialize configuration to TOML")?;

        fs::write(&path, toml_content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }

    /// `~/.recoveryrs`, or the working directory without a home
    pub fn config_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(CONFIG_DIR)
    }

    /// Get default configuration file path
    pub fn default_config_path() -> PathBuf {
        Self::config_dir().join(CONFIG_FILE)
    }

    /// Load from `path`, falling back to defaults only when the file does not exist.
    /// A file that exists but fails to parse is an error.
    pub fn load_or_default_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load_from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load the default config file, or defaults if it is missing or unreadable
    pub fn load_or_default() -> Self {
        Self::load_or_default_from(Self::default_config_path()).unwrap_or_default()
    }

    /// Add a user; the first one becomes the default
    pub fn add_user(&mut self, user: UserProfile) {
        if self.users.is_empty() {
            self.default_user_id = Some(user.id.clone());
        }
        self.users.insert(user.id.clone(), user);
        self.metadata.updated_at = Utc::now();
    }

    pub fn get_user(&self, user_id: &str) -> Option<&UserProfile> {
        self.users.get(user_id)
    }

    pub fn set_default_user(&mut self, user_id: &str) -> Result<()> {
        if !self.users.contains_key(user_id) {
            bail!("User not found: {}", user_id);
        }
        self.default_user_id = Some(user_id.to_string());
        self.metadata.updated_at = Utc::now();
        Ok(())
    }

    /// Explicit user id, else the configured default
    pub fn resolve_user_id(&self, explicit: Option<&str>) -> Result<String> {
        explicit
            .map(str::to_string)
            .or_else(|| self.default_user_id.clone())
            .context("No user given and no default_user_id configured")
    }

    /// Age for the engine's age factor: profile first, then the engine default
    pub fn age_for(&self, user_id: &str, as_of: NaiveDate) -> Option<f64> {
        self.get_user(user_id)
            .and_then(|u| u.age_on(as_of))
            .or(self.engine.default_age_years)
    }

    /// Flat `key = value` listing of the settable keys
    pub fn list(&self) -> Vec<(String, String)> {
        SETTABLE_KEYS
            .iter()
            .map(|key| (key.to_string(), self.get(key).unwrap_or_default()))
            .collect()
    }

    /// Read a dotted key; `None` for unknown keys
    pub fn get(&self, key: &str) -> Option<String> {
        let value = match key {
            "database.path" => self.database.path.display().to_string(),
            "logging.level" => self.logging.level.to_string(),
            "logging.format" => self.logging.format.to_string(),
            "logging.file_path" => self
                .logging
                .file_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            "engine.default_age_years" => self
                .engine
                .default_age_years
                .map(|a| a.to_string())
                .unwrap_or_default(),
            "engine.write_if_absent" => self.engine.write_if_absent.to_string(),
            "default_user_id" => self.default_user_id.clone().unwrap_or_default(),
            _ => return None,
        };
        Some(value)
    }

    /// Set a dotted key from its string form. An empty value clears optional keys.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let value = value.trim();
        match key {
            "database.path" => self.database.path = PathBuf::from(value),
            "logging.level" => self.logging.level = value.parse().map_err(anyhow::Error::msg)?,
            "logging.format" => self.logging.format = value.parse().map_err(anyhow::Error::msg)?,
            "logging.file_path" => {
                self.logging.file_path = (!value.is_empty()).then(|| PathBuf::from(value))
            }
            "engine.default_age_years" => {
                self.engine.default_age_years = if value.is_empty() {
                    None
                } else {
                    let age: f64 = value
                        .parse()
                        .with_context(|| format!("Invalid age: {}", value))?;
                    if !(0.0..=120.0).contains(&age) {
                        bail!("Age out of range: {}", age);
                    }
                    Some(age)
                }
            }
            "engine.write_if_absent" => {
                self.engine.write_if_absent = value
                    .parse()
                    .with_context(|| format!("Expected true or false, got {}", value))?
            }
            "default_user_id" => {
                if value.is_empty() {
                    self.default_user_id = None;
                } else if self.users.is_empty() || self.users.contains_key(value) {
                    // Users are optional; ids only need to match when profiles exist
                    self.default_user_id = Some(value.to_string());
                } else {
                    bail!("User not found: {}", value);
                }
            }
            _ => bail!("Unknown config key: {}", key),
        }
        self.metadata.updated_at = Utc::now();
        Ok(())
    }
}

/// Keys understood by [`AppConfig::get`] and [`AppConfig::set`]
pub const SETTABLE_KEYS: &[&str] = &[
    "database.path",
    "logging.level",
    "logging.format",
    "logging.file_path",
    "engine.default_age_years",
    "engine.write_if_absent",
    "default_user_id",
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::LogLevel;
    use tempfile::tempdir;

    #[test]
    fn test_config_serialization() {
        let config = AppConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let deserialized: AppConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.metadata.version, deserialized.metadata.version);
        assert_eq!(config.engine, deserialized.engine);
        assert_eq!(config.database, deserialized.database);
    }

    #[test]
    fn test_user_management() {
        let mut config = AppConfig::default();
        config.add_user(UserProfile::new("Test User", Some("u1".to_string())));
        config.add_user(UserProfile::new("Other", Some("u2".to_string())));

        assert_eq!(config.users.len(), 2);
        assert_eq!(config.default_user_id.as_deref(), Some("u1"));
        assert!(config.set_default_user("u2").is_ok());
        assert!(config.set_default_user("missing").is_err());
        assert_eq!(config.resolve_user_id(None).unwrap(), "u2");
        assert_eq!(config.resolve_user_id(Some("u1")).unwrap(), "u1");
    }

    #[test]
    fn test_resolve_user_without_default_fails() {
        assert!(AppConfig::default().resolve_user_id(None).is_err());
    }

    #[test]
    fn test_age_resolution() {
        let mut config = AppConfig::default();
        let mut user = UserProfile::new("Masters", Some("m".to_string()));
        user.date_of_birth = NaiveDate::from_ymd_opt(1985, 6, 15);
        config.add_user(user);
        config.engine.default_age_years = Some(30.0);

        let before_birthday = NaiveDate::from_ymd_opt(2025, 6, 14).unwrap();
        let on_birthday = NaiveDate::from_ymd_opt(2025, 6, 15).unwrap();
        assert_eq!(config.age_for("m", before_birthday), Some(39.0));
        assert_eq!(config.age_for("m", on_birthday), Some(40.0));
        assert_eq!(config.age_for("unknown", on_birthday), Some(30.0));
    }

    #[test]
    fn test_get_and_set_keys() {
        let mut config = AppConfig::default();
        config.set("logging.level", "debug").unwrap();
        config.set("engine.default_age_years", "42").unwrap();
        config.set("engine.write_if_absent", "false").unwrap();

        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.get("engine.default_age_years").as_deref(), Some("42"));
        assert_eq!(config.get("engine.write_if_absent").as_deref(), Some("false"));

        config.set("engine.default_age_years", "").unwrap();
        assert_eq!(config.engine.default_age_years, None);

        assert!(config.set("logging.level", "loud").is_err());
        assert!(config.set("engine.default_age_years", "-3").is_err());
        assert!(config.set("nope", "1").is_err());
        assert!(config.get("nope").is_none());
        assert_eq!(config.list().len(), SETTABLE_KEYS.len());
    }

    #[test]
    fn test_config_file_io() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("nested").join("config.toml");

        let mut original = AppConfig::default();
        original.add_user(UserProfile::new("Test User", None));
        original.engine.default_age_years = Some(45.0);

        original.save_to_file(&config_path).unwrap();
        let loaded = AppConfig::load_from_file(&config_path).unwrap();

        assert_eq!(loaded.users.len(), 1);
        assert!(loaded.default_user_id.is_some());
        assert_eq!(loaded.engine.default_age_years, Some(45.0));
    }

    #[test]
    fn test_missing_file_yields_defaults_but_bad_file_errors() {
        let temp_dir = tempdir().unwrap();
        let missing = temp_dir.path().join("missing.toml");
        assert!(AppConfig::load_or_default_from(&missing).is_ok());

        let broken = temp_dir.path().join("broken.toml");
        fs::write(&broken, "this is = = not toml").unwrap();
        assert!(AppConfig::load_or_default_from(&broken).is_err());
    }
}
