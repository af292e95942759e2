use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

use crate::domain::models::config::{AgentTierConfig, Config};
use crate::domain::models::ResourceNeed;

/// Upper bound on concurrently active builders
const MAX_PARALLEL_BUILDERS: usize = 64;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid max_parallel_builders: {0}. Must be between 1 and {MAX_PARALLEL_BUILDERS}")]
    InvalidParallelBuilders(usize),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidRotation(String),

    #[error("Agent program for the {0} tier cannot be empty")]
    EmptyAgentProgram(&'static str),

    #[error("Timeout for {0} cannot be 0")]
    ZeroTimeout(&'static str),

    #[error(
        "Invalid visual thresholds: reject_below ({reject_below}) must be <= accept_above ({accept_above}), both within [0, 1]"
    )]
    InvalidThresholds { reject_below: f64, accept_above: f64 },

    #[error("Resource class '{0}' is declared twice")]
    DuplicateResourceClass(String),

    #[error("Resource class '{0}' must have capacity of at least 1")]
    ZeroCapacity(String),

    #[error("{owner} needs unknown resource class '{class}'")]
    UnknownResourceClass { owner: &'static str, class: String },

    #[error("{owner} needs {units} units of '{class}' which only has capacity {capacity}")]
    NeedExceedsCapacity {
        owner: &'static str,
        class: String,
        units: u32,
        capacity: u32,
    },

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .evochamber/config.yaml (project config)
    /// 3. .evochamber/local.yaml (project local overrides, optional)
    /// 4. Environment variables (EVOCHAMBER_* prefix, `__` separates nesting)
    pub fn load() -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(".evochamber/config.yaml"))
            .merge(Yaml::file(".evochamber/local.yaml"))
            .merge(Env::prefixed("EVOCHAMBER_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file in place of the project files.
    ///
    /// Environment overrides still apply.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        if !path.exists() {
            anyhow::bail!("Config file {} does not exist", path.display());
        }

        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path))
            .merge(Env::prefixed("EVOCHAMBER_").split("__"))
            .extract()
            .with_context(|| format!("Failed to load config from {}", path.display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        let builders = config.orchestrator.max_parallel_builders;
        if builders == 0 || builders > MAX_PARALLEL_BUILDERS {
            return Err(ConfigError::InvalidParallelBuilders(builders));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        let valid_rotations = ["daily", "hourly", "never"];
        if !valid_rotations.contains(&config.logging.rotation.as_str()) {
            return Err(ConfigError::InvalidRotation(config.logging.rotation.clone()));
        }

        validate_agent("primary", &config.builder.primary)?;
        validate_agent("fallback", &config.builder.fallback)?;

        if config.inference.timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout("inference"));
        }
        if config.inference.max_retries == 0 {
            return Err(ConfigError::ValidationFailed(
                "inference.max_retries must be at least 1".to_string(),
            ));
        }

        let thresholds = config.verification.visual.thresholds;
        let in_range = |v: f64| (0.0..=1.0).contains(&v);
        if !in_range(thresholds.reject_below)
            || !in_range(thresholds.accept_above)
            || thresholds.reject_below > thresholds.accept_above
        {
            return Err(ConfigError::InvalidThresholds {
                reject_below: thresholds.reject_below,
                accept_above: thresholds.accept_above,
            });
        }

        let mut capacities: HashMap<&str, u32> = HashMap::new();
        for class in &config.resources.classes {
            if class.name.is_empty() {
                return Err(ConfigError::ValidationFailed(
                    "Resource class name cannot be empty".to_string(),
                ));
            }
            if class.capacity == 0 {
                return Err(ConfigError::ZeroCapacity(class.name.clone()));
            }
            if capacities.insert(&class.name, class.capacity).is_some() {
                return Err(ConfigError::DuplicateResourceClass(class.name.clone()));
            }
        }

        let needs = [
            ("builder", config.builder.resource.as_ref()),
            ("visual tier", config.verification.visual.resource.as_ref()),
            ("visual judge", config.verification.visual.judge_resource.as_ref()),
        ];
        for (owner, need) in needs {
            if let Some(need) = need {
                validate_need(owner, need, &capacities)?;
            }
        }

        for check in &config.hardening.checks {
            if check.name.is_empty() || check.command.trim().is_empty() {
                return Err(ConfigError::ValidationFailed(format!(
                    "Hardening check '{}' needs a name and a command",
                    check.name
                )));
            }
        }

        Ok(())
    }
}

fn validate_agent(tier: &'static str, agent: &AgentTierConfig) -> Result<(), ConfigError> {
    if agent.program.trim().is_empty() {
        return Err(ConfigError::EmptyAgentProgram(tier));
    }
    if agent.timeout_secs == 0 {
        return Err(ConfigError::ZeroTimeout(tier));
    }
    Ok(())
}

fn validate_need(
    owner: &'static str,
    need: &ResourceNeed,
    capacities: &HashMap<&str, u32>,
) -> Result<(), ConfigError> {
    let capacity = *capacities
        .get(need.class.as_str())
        .ok_or_else(|| ConfigError::UnknownResourceClass {
            owner,
            class: need.class.clone(),
        })?;
    if need.units == 0 || need.units > capacity {
        return Err(ConfigError::NeedExceedsCapacity {
            owner,
            class: need.class.clone(),
            units: need.units,
            capacity,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::config::ResourceClassConfig;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.orchestrator.max_parallel_builders, 3);
        assert_eq!(config.orchestrator.max_fix_cycles, 3);
        assert_eq!(config.inference.base_url, "http://localhost:11434");
        assert_eq!(config.builder.primary.timeout_secs, 4 * 60 * 60);
        assert_eq!(config.logging.level, "info");
        ConfigLoader::validate(&config).expect("Default config should be valid");
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r"
repository:
  trunk_branch: develop
orchestrator:
  max_parallel_builders: 5
builder:
  test_command: cargo test
  review: false
  primary:
    program: my-agent
    args: ['--dir', '{workspace}']
    timeout_secs: 600
verification:
  unit:
    command: npm test
  visual:
    thresholds:
      accept_above: 0.9
logging:
  level: debug
  format: json
";

        let config: Config = serde_yaml::from_str(yaml).expect("YAML should parse");

        assert_eq!(config.repository.trunk_branch, "develop");
        assert_eq!(config.repository.branch_prefix, "evo");
        assert_eq!(config.orchestrator.max_parallel_builders, 5);
        assert_eq!(config.builder.test_command.as_deref(), Some("cargo test"));
        assert!(!config.builder.review);
        assert_eq!(config.builder.primary.program, "my-agent");
        assert_eq!(config.builder.primary.kill_grace_secs, 5);
        assert_eq!(config.builder.fallback.program, "claude");
        assert_eq!(config.verification.unit.command.as_deref(), Some("npm test"));
        assert!((config.verification.visual.thresholds.accept_above - 0.9).abs() < f64::EPSILON);
        assert!((config.verification.visual.thresholds.reject_below - 0.5).abs() < f64::EPSILON);
        assert_eq!(config.logging.format, "json");

        ConfigLoader::validate(&config).expect("Parsed config should be valid");
    }

    #[test]
    fn test_validate_builder_pool_bounds() {
        let mut config = Config::default();
        config.orchestrator.max_parallel_builders = 0;
        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::InvalidParallelBuilders(0)
        ));

        config.orchestrator.max_parallel_builders = MAX_PARALLEL_BUILDERS + 1;
        assert!(ConfigLoader::validate(&config).is_err());
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let mut config = Config::default();
        config.logging.level = "loud".to_string();

        match ConfigLoader::validate(&config).unwrap_err() {
            ConfigError::InvalidLogLevel(level) => assert_eq!(level, "loud"),
            other => panic!("Expected InvalidLogLevel error, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_empty_program_and_zero_timeout() {
        let mut config = Config::default();
        config.builder.fallback.program = "  ".to_string();
        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::EmptyAgentProgram("fallback")
        ));

        let mut config = Config::default();
        config.builder.primary.timeout_secs = 0;
        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::ZeroTimeout("primary")
        ));
    }

    #[test]
    fn test_validate_inverted_thresholds() {
        let mut config = Config::default();
        config.verification.visual.thresholds.reject_below = 0.9;
        config.verification.visual.thresholds.accept_above = 0.6;
        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::InvalidThresholds { .. }
        ));

        let mut config = Config::default();
        config.verification.visual.thresholds.accept_above = 1.5;
        assert!(ConfigLoader::validate(&config).is_err());
    }

    #[test]
    fn test_validate_resource_classes() {
        let mut config = Config::default();
        config.resources.classes.push(ResourceClassConfig {
            name: "heavy-inference".to_string(),
            capacity: 4,
            model: None,
        });
        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::DuplicateResourceClass(_)
        ));

        let mut config = Config::default();
        config.resources.classes[1].capacity = 0;
        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::ZeroCapacity(_)
        ));
    }

    #[test]
    fn test_validate_needs_against_classes() {
        let mut config = Config::default();
        config.builder.resource = Some(ResourceNeed::shared("gpu", 1));
        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::UnknownResourceClass { owner: "builder", .. }
        ));

        let mut config = Config::default();
        config.verification.visual.resource = Some(ResourceNeed::shared("vision-inference", 3));
        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::NeedExceedsCapacity { units: 3, capacity: 2, .. }
        ));
    }

    #[test]
    fn test_env_override() {
        temp_env::with_vars(
            [
                ("EVOCHAMBER_ORCHESTRATOR__MAX_PARALLEL_BUILDERS", Some("7")),
                ("EVOCHAMBER_LOGGING__LEVEL", Some("debug")),
            ],
            || {
                let config: Config = Figment::new()
                    .merge(Serialized::defaults(Config::default()))
                    .merge(Env::prefixed("EVOCHAMBER_").split("__"))
                    .extract()
                    .unwrap();
                assert_eq!(config.orchestrator.max_parallel_builders, 7);
                assert_eq!(config.logging.level, "debug");
            },
        );
    }

    #[test]
    fn test_hierarchical_merging() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let mut base_file = NamedTempFile::new().unwrap();
        writeln!(
            base_file,
            "orchestrator:\n  max_parallel_builders: 2\nlogging:\n  level: info\n  format: json"
        )
        .unwrap();
        base_file.flush().unwrap();

        let mut override_file = NamedTempFile::new().unwrap();
        writeln!(
            override_file,
            "orchestrator:\n  max_parallel_builders: 6\nlogging:\n  level: debug"
        )
        .unwrap();
        override_file.flush().unwrap();

        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(base_file.path()))
            .merge(Yaml::file(override_file.path()))
            .extract()
            .unwrap();

        assert_eq!(config.orchestrator.max_parallel_builders, 6, "Override should win");
        assert_eq!(config.logging.level, "debug", "Override should win for nested fields");
        assert_eq!(
            config.logging.format, "json",
            "Base value should persist when not overridden"
        );
        assert_eq!(config.orchestrator.max_fix_cycles, 3, "Defaults fill the rest");
    }

    #[test]
    fn test_load_from_missing_file() {
        assert!(ConfigLoader::load_from_file("/definitely/not/here.yaml").is_err());
    }
}
