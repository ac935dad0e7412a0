//! Layered configuration: built-in defaults, then a TOML file, then
//! `COFFEE_` environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::BatteryHealth;

const SECONDS_PER_YEAR: u64 = 31_536_000;

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── Config structs ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Render loop period in milliseconds.
    pub tick_ms: u64,
    pub power_ttl_secs: u64,
    pub network_ttl_secs: u64,
    /// Upper bound for any single external utility call.
    pub probe_timeout_secs: u64,
    /// Bound on the whole shutdown sequence.
    pub shutdown_grace_secs: u64,
    pub health: HealthThresholds,
    pub keep_awake: KeepAwakeConfig,
    pub persist: PersistConfig,
    pub clock: ClockConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tick_ms: 250,
            power_ttl_secs: 300,
            network_ttl_secs: 3_600,
            probe_timeout_secs: 5,
            shutdown_grace_secs: 2,
            health: HealthThresholds::default(),
            keep_awake: KeepAwakeConfig::default(),
            persist: PersistConfig::default(),
            clock: ClockConfig::default(),
        }
    }
}

/// Maximum-capacity bands used to classify battery health.
///
/// `capacity >= good_min` is Good, `capacity >= fair_min` is Fair, anything
/// lower is Poor. Unknown capacity is Unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthThresholds {
    pub good_min: u8,
    pub fair_min: u8,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            good_min: 80,
            fair_min: 60,
        }
    }
}

impl HealthThresholds {
    pub fn classify(&self, max_capacity_percent: Option<u8>) -> BatteryHealth {
        match max_capacity_percent {
            Some(pct) if pct >= self.good_min => BatteryHealth::Good,
            Some(pct) if pct >= self.fair_min => BatteryHealth::Fair,
            Some(_) => BatteryHealth::Poor,
            None => BatteryHealth::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct KeepAwakeConfig {
    pub enabled: bool,
    pub program: String,
    pub args: Vec<String>,
    /// Commands applied once at startup, each as a full argv.
    pub power_settings: Vec<Vec<String>>,
    /// Restarts attempted after the child exits unexpectedly.
    pub max_restarts: u32,
}

impl Default for KeepAwakeConfig {
    fn default() -> Self {
        let pmset = |setting: &str, value: &str| {
            ["/usr/local/sbin/xlog", "pmset", "-a", setting, value]
                .map(String::from)
                .to_vec()
        };
        Self {
            enabled: true,
            program: "caffeinate".into(),
            args: vec!["-dimsu".into(), "-t".into(), SECONDS_PER_YEAR.to_string()],
            power_settings: vec![
                pmset("sleep", "0"),
                pmset("disksleep", "0"),
                pmset("displaysleep", "0"),
                pmset("womp", "1"),
                pmset("ring", "0"),
                pmset("powernap", "0"),
            ],
            max_restarts: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct PersistConfig {
    pub enabled: bool,
    /// Defaults to the platform cache directory.
    pub dir: Option<PathBuf>,
}

impl Default for PersistConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: None,
        }
    }
}

impl PersistConfig {
    pub fn resolved_dir(&self) -> Option<PathBuf> {
        if !self.enabled {
            return None;
        }
        self.dir
            .clone()
            .or_else(|| project_dirs().map(|dirs| dirs.cache_dir().to_path_buf()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ClockConfig {
    /// Empty hides the second clock.
    pub secondary_label: String,
    pub secondary_offset_minutes: i32,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            secondary_label: "IST".into(),
            secondary_offset_minutes: 330,
        }
    }
}

impl Config {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn power_ttl(&self) -> Duration {
        Duration::from_secs(self.power_ttl_secs)
    }

    pub fn network_ttl(&self) -> Duration {
        Duration::from_secs(self.network_ttl_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field, reason: &str| {
            Err(ConfigError::Validation {
                field,
                reason: reason.to_string(),
            })
        };
        if self.tick_ms == 0 {
            return invalid("tick_ms", "must be greater than zero");
        }
        if self.probe_timeout_secs == 0 {
            return invalid("probe_timeout_secs", "must be greater than zero");
        }
        if self.health.good_min > 100 {
            return invalid("health.good_min", "must be a percentage");
        }
        if self.health.fair_min > self.health.good_min {
            return invalid("health.fair_min", "must not exceed health.good_min");
        }
        if self.clock.secondary_offset_minutes.abs() >= 24 * 60 {
            return invalid("clock.secondary_offset_minutes", "must be within ±24h");
        }
        if self.keep_awake.enabled && self.keep_awake.program.trim().is_empty() {
            return invalid("keep_awake.program", "must not be empty");
        }
        Ok(())
    }
}

// ── Loading ─────────────────────────────────────────────────────────

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("dev", "coffee", "coffee")
}

/// Default config file location via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    project_dirs().map_or_else(
        || PathBuf::from(".coffee.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

/// Load config from `path` (or the default location) plus environment.
///
/// A missing file is not an error; defaults apply.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.map_or_else(config_path, Path::to_path_buf);

    let config: Config = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(&path))
        .merge(Env::prefixed("COFFEE_").split("__"))
        .extract()?;

    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn health_bands() {
        let t = HealthThresholds::default();
        assert_eq!(t.classify(Some(100)), BatteryHealth::Good);
        assert_eq!(t.classify(Some(80)), BatteryHealth::Good);
        assert_eq!(t.classify(Some(79)), BatteryHealth::Fair);
        assert_eq!(t.classify(Some(60)), BatteryHealth::Fair);
        assert_eq!(t.classify(Some(59)), BatteryHealth::Poor);
        assert_eq!(t.classify(None), BatteryHealth::Unknown);
    }

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.tick(), Duration::from_millis(250));
        assert_eq!(config.power_ttl(), Duration::from_secs(300));
        assert_eq!(config.network_ttl(), Duration::from_secs(3_600));
        assert_eq!(config.keep_awake.power_settings.len(), 6);
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "tick_ms = 500\n[health]\ngood_min = 90\n[keep_awake]\nenabled = false\n",
        )
        .unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.tick_ms, 500);
        assert_eq!(config.health.good_min, 90);
        assert_eq!(config.health.fair_min, 60);
        assert!(!config.keep_awake.enabled);
        assert_eq!(config.network_ttl_secs, 3_600);
    }

    #[test]
    fn inverted_thresholds_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[health]\ngood_min = 50\nfair_min = 70\n").unwrap();

        let err = load_config(Some(&path)).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Validation {
                field: "health.fair_min",
                ..
            }
        ));
    }

    #[test]
    fn disabled_persistence_has_no_dir() {
        let persist = PersistConfig {
            enabled: false,
            dir: Some(PathBuf::from("/tmp/x")),
        };
        assert_eq!(persist.resolved_dir(), None);
    }
}
