//! TOML configuration: load-with-fallback plus validation.
//!
//! Missing file or parse errors fall back to defaults; validation
//! errors are logged and also fall back rather than aborting startup.

use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Periodic update interval in seconds. Must be greater than zero.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: f64,
    /// Timestamp display format (chrono format string).
    #[serde(default = "default_time_format")]
    pub time_format: String,
    /// Stop periodic updates automatically after this many ticks.
    #[serde(default)]
    pub max_ticks: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            time_format: default_time_format(),
            max_ticks: None,
        }
    }
}

fn default_interval_secs() -> f64 {
    3.0
}

fn default_time_format() -> String {
    "%a %b %d  %H:%M:%S".to_string()
}

/// A single validation finding; errors force a fallback to defaults.
pub struct ConfigIssue {
    pub message: String,
    pub is_error: bool,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Config {
    /// The configured interval as a `Duration`. Only meaningful after
    /// validation has passed; out-of-range values saturate rather than
    /// panic.
    pub fn interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.interval_secs).unwrap_or(Duration::MAX)
    }

    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if !self.interval_secs.is_finite() || self.interval_secs <= 0.0 {
            issues.push(ConfigIssue {
                message: format!(
                    "interval_secs must be a positive number, got {}",
                    self.interval_secs
                ),
                is_error: true,
            });
        } else if Duration::try_from_secs_f64(self.interval_secs).is_err() {
            issues.push(ConfigIssue {
                message: format!(
                    "interval_secs {} is too large for a Duration",
                    self.interval_secs
                ),
                is_error: true,
            });
        } else if self.interval_secs < 0.01 {
            issues.push(ConfigIssue {
                message: format!(
                    "interval_secs {} is very small; expect high CPU usage",
                    self.interval_secs
                ),
                is_error: false,
            });
        }

        if self.time_format.is_empty() {
            issues.push(ConfigIssue {
                message: "time_format is empty; nothing will be displayed".to_string(),
                is_error: false,
            });
        }

        if self.max_ticks == Some(0) {
            issues.push(ConfigIssue {
                message: "max_ticks is 0; periodic updates stop after the first tick".to_string(),
                is_error: false,
            });
        }

        issues
    }
}

pub fn get_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("metronome")
        .join("config.toml")
}

pub fn load_config() -> Config {
    let config_path = get_config_path();

    let config = if config_path.exists() {
        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => {
                    log::info!("Loaded config from {:?}", config_path);
                    config
                }
                Err(e) => {
                    log::error!("Failed to parse config: {}", e);
                    Config::default()
                }
            },
            Err(e) => {
                log::error!("Failed to read config file: {}", e);
                Config::default()
            }
        }
    } else {
        log::info!("No config file found at {:?}, using defaults", config_path);
        Config::default()
    };

    let issues = config.validate();
    for issue in &issues {
        if issue.is_error {
            log::error!("Config: {}", issue);
        } else {
            log::warn!("Config: {}", issue);
        }
    }
    if issues.iter().any(|i| i.is_error) {
        log::error!("Config has errors; falling back to defaults.");
        return Config::default();
    }

    config
}
