//! fleet.toml configuration parser.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{JobKind, ProgramId};

/// Errors raised while loading or validating a config.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid duration {0:?}")]
    Duration(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    pub controller: ControllerConfig,
    pub topology: TopologyConfig,
    pub programs: ProgramsConfig,
    pub batch: BatchConfig,
    pub selector: SelectorConfig,
    pub api: ApiConfig,
}

/// What the supervisor does each tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlMode {
    /// Drive targets to their set-points with harden + grow.
    #[default]
    Converge,
    /// Fire timed extract + grow + harden batches at a target.
    Batch,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub mode: ControlMode,
    /// Sleep between ticks, e.g. "500ms", "1s".
    pub tick_interval: String,
    /// Share of total fleet memory the engine may occupy (0.0..=1.0).
    pub budget_fraction: f64,
    /// Targets worked on concurrently in converge mode.
    pub max_targets: usize,
    /// Upper bound for the harden thread search.
    pub max_search_threads: u32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            mode: ControlMode::Converge,
            tick_interval: "1s".to_string(),
            budget_fraction: 0.5,
            max_targets: 4,
            max_search_threads: 1_000_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TopologyConfig {
    /// Node the reachability walk starts from.
    pub root: String,
    /// Keep the root node out of the execution pool.
    pub exclude_root: bool,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            root: "home".to_string(),
            exclude_root: true,
        }
    }
}

/// Worker program for each job kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgramsConfig {
    pub harden: ProgramId,
    pub grow: ProgramId,
    pub extract: ProgramId,
}

impl Default for ProgramsConfig {
    fn default() -> Self {
        Self {
            harden: "workers/harden.js".to_string(),
            grow: "workers/grow.js".to_string(),
            extract: "workers/extract.js".to_string(),
        }
    }
}

impl ProgramsConfig {
    pub fn program(&self, kind: JobKind) -> &str {
        match kind {
            JobKind::Harden => &self.harden,
            JobKind::Grow => &self.grow,
            JobKind::Extract => &self.extract,
        }
    }

    pub fn kind_of(&self, program: &str) -> Option<JobKind> {
        JobKind::ALL.into_iter().find(|k| self.program(*k) == program)
    }
}

/// Thread counts for a one-shot batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub extract_threads: u32,
    pub grow_threads: u32,
    pub harden_threads: u32,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            extract_threads: 1,
            grow_threads: 1,
            harden_threads: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectorStrategy {
    /// Highest funds-per-second first.
    Yield,
    /// Unconverged targets, smallest first.
    #[default]
    Need,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    pub strategy: SelectorStrategy,
    /// Targets at or below this security surplus count as hardened.
    pub min_security_surplus: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { port: 8450 }
    }
}

impl FleetConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        Ok(config)
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: FleetConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Scaffold a fleet.toml with every section spelled out.
    pub fn scaffold(root: &str) -> Self {
        FleetConfig {
            topology: TopologyConfig {
                root: root.to_string(),
                exclude_root: true,
            },
            ..FleetConfig::default()
        }
    }

    pub fn tick_interval(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.controller.tick_interval)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let c = &self.controller;
        if !(0.0..=1.0).contains(&c.budget_fraction) {
            return Err(ConfigError::Invalid(format!(
                "controller.budget_fraction must be within 0.0..=1.0, got {}",
                c.budget_fraction
            )));
        }
        if self.tick_interval()?.is_zero() {
            return Err(ConfigError::Invalid(
                "controller.tick_interval must be non-zero".to_string(),
            ));
        }
        if c.max_targets == 0 {
            return Err(ConfigError::Invalid(
                "controller.max_targets must be at least 1".to_string(),
            ));
        }
        if c.max_search_threads == 0 {
            return Err(ConfigError::Invalid(
                "controller.max_search_threads must be at least 1".to_string(),
            ));
        }

        let programs: HashSet<&str> = JobKind::ALL
            .into_iter()
            .map(|k| self.programs.program(k))
            .collect();
        if programs.len() != JobKind::ALL.len() {
            return Err(ConfigError::Invalid(
                "each job kind needs its own program".to_string(),
            ));
        }
        Ok(())
    }
}

/// Parse a duration string like "250ms", "2s", "5m". Bare numbers are milliseconds.
pub fn parse_duration(s: &str) -> Result<Duration, ConfigError> {
    let s = s.trim();
    let parse = |n: &str| {
        n.trim()
            .parse::<u64>()
            .map_err(|_| ConfigError::Duration(s.to_string()))
    };

    if let Some(ms) = s.strip_suffix("ms") {
        Ok(Duration::from_millis(parse(ms)?))
    } else if let Some(secs) = s.strip_suffix('s') {
        Ok(Duration::from_secs(parse(secs)?))
    } else if let Some(mins) = s.strip_suffix('m') {
        Ok(Duration::from_secs(parse(mins)? * 60))
    } else {
        Ok(Duration::from_millis(parse(s)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty_uses_defaults() {
        let config = FleetConfig::from_toml_str("").unwrap();
        assert_eq!(config.controller.mode, ControlMode::Converge);
        assert_eq!(config.controller.budget_fraction, 0.5);
        assert_eq!(config.topology.root, "home");
        assert_eq!(config.tick_interval().unwrap(), Duration::from_secs(1));
    }

    #[test]
    fn test_parse_sections() {
        let toml_str = r#"
[controller]
mode = "batch"
tick_interval = "250ms"
budget_fraction = 0.2

[programs]
harden = "w.js"
grow = "g.js"
extract = "h.js"

[selector]
strategy = "yield"
"#;
        let config = FleetConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.controller.mode, ControlMode::Batch);
        assert_eq!(config.tick_interval().unwrap(), Duration::from_millis(250));
        assert_eq!(config.programs.program(JobKind::Harden), "w.js");
        assert_eq!(config.programs.kind_of("h.js"), Some(JobKind::Extract));
        assert_eq!(config.selector.strategy, SelectorStrategy::Yield);
        // Untouched sections keep defaults.
        assert_eq!(config.batch.grow_threads, 1);
    }

    #[test]
    fn test_rejects_bad_fraction() {
        let err = FleetConfig::from_toml_str("[controller]\nbudget_fraction = 1.5\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_rejects_zero_tick() {
        let err = FleetConfig::from_toml_str("[controller]\ntick_interval = \"0s\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_rejects_shared_program() {
        let toml_str = "[programs]\nharden = \"x.js\"\ngrow = \"x.js\"\n";
        let err = FleetConfig::from_toml_str(toml_str).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_scaffold_round_trips_through_file() {
        let config = FleetConfig::scaffold("origin");
        let toml_str = config.to_toml_string().unwrap();
        assert!(toml_str.contains("origin"));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleet.toml");
        std::fs::write(&path, toml_str).unwrap();
        let loaded = FleetConfig::from_file(&path).unwrap();
        assert_eq!(loaded.topology.root, "origin");
    }

    #[test]
    fn parse_duration_values() {
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("40").unwrap(), Duration::from_millis(40));
        assert!(parse_duration("soon").is_err());
    }
}
