use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Top-level configuration for the aggregoor agent.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Logging verbosity (debug, info, warn, error). Default: "info".
    #[serde(default = "default_log_level")]
    #[allow(dead_code)]
    pub log_level: String,

    /// SQLite storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Sample ingestion configuration.
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Aggregation cycle configuration.
    #[serde(default)]
    pub aggregation: AggregationConfig,

    /// Rollup publishing configuration.
    #[serde(default)]
    pub publish: PublishConfig,
}

/// SQLite storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database file. Default: "aggregoor.db".
    #[serde(default = "default_storage_path")]
    pub path: String,
}

/// Sample ingestion configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// Maximum payloads buffered between the transport and the store.
    /// Default: 65536.
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
}

/// Aggregation cycle configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AggregationConfig {
    /// How often to run an aggregation cycle. Default: 10s.
    #[serde(default = "default_interval", with = "humantime_serde")]
    pub interval: Duration,

    /// How long raw samples are retained. Default: 5m.
    #[serde(default = "default_retention", with = "humantime_serde")]
    pub retention: Duration,
}

/// Rollup publishing configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PublishConfig {
    /// Topic attached to every outbound rollup message. Default: "aggregates".
    #[serde(default = "default_topic")]
    pub topic: String,
}

// --- Default value functions ---

fn default_log_level() -> String {
    "info".to_string()
}

fn default_storage_path() -> String {
    "aggregoor.db".to_string()
}

fn default_queue_size() -> usize {
    65536
}

fn default_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_retention() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_topic() -> String {
    "aggregates".to_string()
}

// --- Default trait impls ---

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            storage: StorageConfig::default(),
            ingest: IngestConfig::default(),
            aggregation: AggregationConfig::default(),
            publish: PublishConfig::default(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            queue_size: default_queue_size(),
        }
    }
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            retention: default_retention(),
        }
    }
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            topic: default_topic(),
        }
    }
}

// --- Validation and loading ---

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        let cfg: Config = serde_yaml::from_str(&data)
            .with_context(|| format!("parsing config file {}", path.display()))?;

        cfg.validate()?;

        Ok(cfg)
    }

    /// Validate the configuration for required fields and consistency.
    pub fn validate(&self) -> Result<()> {
        if self.storage.path.is_empty() {
            bail!("storage.path is required");
        }

        if self.ingest.queue_size == 0 {
            bail!("ingest.queue_size must be positive");
        }

        if self.aggregation.interval.is_zero() {
            bail!("aggregation.interval must be positive");
        }

        if self.aggregation.retention.is_zero() {
            bail!("aggregation.retention must be positive");
        }

        // A retention shorter than the cycle interval would prune samples
        // before they are ever aggregated.
        if self.aggregation.retention < self.aggregation.interval {
            bail!(
                "aggregation.retention {:?} must be at least aggregation.interval {:?}",
                self.aggregation.retention,
                self.aggregation.interval
            );
        }

        if self.publish.topic.is_empty() {
            bail!("publish.topic is required");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let cfg = Config::default();
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.storage.path, "aggregoor.db");
        assert_eq!(cfg.ingest.queue_size, 65536);
        assert_eq!(cfg.aggregation.interval, Duration::from_secs(10));
        assert_eq!(cfg.aggregation.retention, Duration::from_secs(300));
        assert_eq!(cfg.publish.topic, "aggregates");
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_validation_empty_storage_path() {
        let cfg = Config {
            storage: StorageConfig {
                path: String::new(),
            },
            ..Default::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("storage.path"));
    }

    #[test]
    fn test_validation_zero_queue_size() {
        let cfg = Config {
            ingest: IngestConfig { queue_size: 0 },
            ..Default::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("queue_size"));
    }

    #[test]
    fn test_validation_zero_interval() {
        let cfg = Config {
            aggregation: AggregationConfig {
                interval: Duration::ZERO,
                ..Default::default()
            },
            ..Default::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("aggregation.interval"));
    }

    #[test]
    fn test_validation_zero_retention() {
        let cfg = Config {
            aggregation: AggregationConfig {
                retention: Duration::ZERO,
                ..Default::default()
            },
            ..Default::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("aggregation.retention"));
    }

    #[test]
    fn test_validation_retention_shorter_than_interval() {
        let cfg = Config {
            aggregation: AggregationConfig {
                interval: Duration::from_secs(60),
                retention: Duration::from_secs(30),
            },
            ..Default::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("must be at least"));
    }

    #[test]
    fn test_validation_empty_topic() {
        let cfg = Config {
            publish: PublishConfig {
                topic: String::new(),
            },
            ..Default::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("publish.topic"));
    }

    #[test]
    fn test_parse_yaml_with_humantime_durations() {
        let yaml = r#"
storage:
  path: /tmp/telemetry.db
aggregation:
  interval: 15s
  retention: 10m
publish:
  topic: rollups
"#;
        let cfg: Config = serde_yaml::from_str(yaml).expect("config should parse");
        assert_eq!(cfg.storage.path, "/tmp/telemetry.db");
        assert_eq!(cfg.aggregation.interval, Duration::from_secs(15));
        assert_eq!(cfg.aggregation.retention, Duration::from_secs(600));
        assert_eq!(cfg.publish.topic, "rollups");
        assert!(cfg.validate().is_ok());
    }
}
