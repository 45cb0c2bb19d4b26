//! Shipper configuration
//!
//! Read once at startup from a YAML file, with `HPA_SHIPPER_*` environment
//! variables layered on top (`__` separates nested keys, e.g.
//! `HPA_SHIPPER_METRIC__PERIOD=30s`).

use crate::cluster::AutoscalingApiVersion;
use serde::{Deserialize, Deserializer};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors that stop the agent from starting
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("no output configured")]
    NoOutput,

    #[error("metric period must be greater than zero")]
    ZeroPeriod,

    #[error("compression level {0} is out of range 0-9")]
    CompressionLevel(u32),
}

fn duration_str<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    humantime::parse_duration(raw.trim())
        .map_err(|e| serde::de::Error::custom(format!("invalid duration {:?}: {}", raw, e)))
}

/// Sampling settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricSettings {
    /// Overrides the reporting node name
    pub node_name: String,

    /// Time between collection cycles
    #[serde(deserialize_with = "duration_str")]
    pub period: Duration,
}

impl Default for MetricSettings {
    fn default() -> Self {
        Self {
            node_name: String::new(),
            period: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LogstashSettings {
    pub hosts: Vec<String>,
}

/// Output delivery settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    /// Refuse to start without output hosts
    pub required: bool,

    /// Try one other handle when a send fails
    pub retry_on_send_failure: bool,

    #[serde(deserialize_with = "duration_str")]
    pub connect_timeout: Duration,

    #[serde(deserialize_with = "duration_str")]
    pub send_timeout: Duration,

    pub compression_level: u32,

    pub logstash: LogstashSettings,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            required: true,
            retry_on_send_failure: false,
            connect_timeout: Duration::from_secs(5),
            send_timeout: Duration::from_secs(30),
            compression_level: 3,
            logstash: LogstashSettings::default(),
        }
    }
}

/// How to reach the Kubernetes API
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct KubernetesSettings {
    pub in_cluster: bool,

    /// Kubeconfig path; empty uses the default lookup
    pub config: String,

    pub api_version: AutoscalingApiVersion,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Text,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// Filter directive, e.g. `info` or `agent_lib=debug`
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HealthSettings {
    /// Port for `/healthz` and `/readyz`; 0 disables the server
    pub port: u16,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub metric: MetricSettings,
    pub output: OutputSettings,
    pub kubernetes: KubernetesSettings,
    pub log: LogSettings,
    pub health: HealthSettings,
}

impl AppConfig {
    /// Load configuration from a YAML file and the environment
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let builder = ::config::Config::builder()
            .add_source(
                ::config::File::from(path.as_ref()).format(::config::FileFormat::Yaml),
            )
            .add_source(
                ::config::Environment::with_prefix("HPA_SHIPPER")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("output.logstash.hosts"),
            );

        Self::from_builder(builder)
    }

    /// Parse configuration from YAML text only
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let builder = ::config::Config::builder()
            .add_source(::config::File::from_str(yaml, ::config::FileFormat::Yaml));

        Self::from_builder(builder)
    }

    fn from_builder(
        builder: ::config::ConfigBuilder<::config::builder::DefaultState>,
    ) -> Result<Self, ConfigError> {
        let config: AppConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the agent cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.metric.period.is_zero() {
            return Err(ConfigError::ZeroPeriod);
        }
        if self.output.required && self.output.logstash.hosts.is_empty() {
            return Err(ConfigError::NoOutput);
        }
        if self.output.compression_level > 9 {
            return Err(ConfigError::CompressionLevel(self.output.compression_level));
        }
        Ok(())
    }

    /// Node name override, if one is configured
    pub fn node_name(&self) -> Option<&str> {
        Some(self.metric.node_name.as_str()).filter(|name| !name.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;

    /// Held by tests that go through `load`, which reads the environment
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_full_config() {
        let config = AppConfig::from_yaml(
            r#"
metric:
  node_name: node-7
  period: 30s
output:
  retry_on_send_failure: true
  connect_timeout: 2s
  send_timeout: 1m
  compression_level: 0
  logstash:
    hosts: ["ls-1:5044", "ls-2:5044"]
kubernetes:
  in_cluster: true
  api_version: v1
log:
  level: debug
  format: text
health:
  port: 8080
"#,
        )
        .unwrap();

        assert_eq!(config.node_name(), Some("node-7"));
        assert_eq!(config.metric.period, Duration::from_secs(30));
        assert!(config.output.retry_on_send_failure);
        assert_eq!(config.output.connect_timeout, Duration::from_secs(2));
        assert_eq!(config.output.send_timeout, Duration::from_secs(60));
        assert_eq!(config.output.compression_level, 0);
        assert_eq!(config.output.logstash.hosts, vec!["ls-1:5044", "ls-2:5044"]);
        assert!(config.kubernetes.in_cluster);
        assert_eq!(config.kubernetes.api_version, AutoscalingApiVersion::V1);
        assert_eq!(config.log.format, LogFormat::Text);
        assert_eq!(config.health.port, 8080);
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_yaml(
            r#"
output:
  logstash:
    hosts: ["ls:5044"]
"#,
        )
        .unwrap();

        assert_eq!(config.metric.period, Duration::from_secs(10));
        assert_eq!(config.node_name(), None);
        assert!(config.output.required);
        assert!(!config.output.retry_on_send_failure);
        assert_eq!(config.output.compression_level, 3);
        assert!(!config.kubernetes.in_cluster);
        assert_eq!(config.kubernetes.api_version, AutoscalingApiVersion::V2);
        assert_eq!(config.log.level, "info");
        assert_eq!(config.log.format, LogFormat::Json);
        assert_eq!(config.health.port, 0);
    }

    #[test]
    fn test_missing_output_rejected() {
        let result = AppConfig::from_yaml("metric:\n  period: 5s\n");
        assert!(matches!(result, Err(ConfigError::NoOutput)));
    }

    #[test]
    fn test_optional_output_allows_no_hosts() {
        let config = AppConfig::from_yaml("output:\n  required: false\n").unwrap();
        assert!(config.output.logstash.hosts.is_empty());
    }

    #[test]
    fn test_invalid_period_rejected() {
        let result = AppConfig::from_yaml(
            "metric:\n  period: often\noutput:\n  logstash:\n    hosts: [\"ls:5044\"]\n",
        );
        assert!(matches!(result, Err(ConfigError::Load(_))));
    }

    #[test]
    fn test_zero_period_rejected() {
        let result = AppConfig::from_yaml(
            "metric:\n  period: 0s\noutput:\n  logstash:\n    hosts: [\"ls:5044\"]\n",
        );
        assert!(matches!(result, Err(ConfigError::ZeroPeriod)));
    }

    #[test]
    fn test_compression_level_rejected() {
        let result = AppConfig::from_yaml(
            "output:\n  compression_level: 12\n  logstash:\n    hosts: [\"ls:5044\"]\n",
        );
        assert!(matches!(result, Err(ConfigError::CompressionLevel(12))));
    }

    #[test]
    fn test_load_from_file() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let mut file = tempfile::Builder::new().suffix(".yml").tempfile().unwrap();
        writeln!(
            file,
            "metric:\n  period: 15s\noutput:\n  logstash:\n    hosts: [\"ls:5044\"]"
        )
        .unwrap();

        let config = AppConfig::load(file.path()).unwrap();
        assert_eq!(config.metric.period, Duration::from_secs(15));
    }

    #[test]
    fn test_load_missing_file() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let result = AppConfig::load("/nonexistent/hpa-shipper.yml");
        assert!(matches!(result, Err(ConfigError::Load(_))));
    }

    #[test]
    fn test_environment_overrides_file() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());

        let mut file = tempfile::Builder::new().suffix(".yml").tempfile().unwrap();
        writeln!(
            file,
            "metric:\n  period: 15s\noutput:\n  logstash:\n    hosts: [\"ls:5044\"]"
        )
        .unwrap();

        std::env::set_var("HPA_SHIPPER_METRIC__PERIOD", "30s");
        std::env::set_var("HPA_SHIPPER_OUTPUT__LOGSTASH__HOSTS", "a:5044,b:5044");
        let result = AppConfig::load(file.path());
        std::env::remove_var("HPA_SHIPPER_METRIC__PERIOD");
        std::env::remove_var("HPA_SHIPPER_OUTPUT__LOGSTASH__HOSTS");

        let config = result.unwrap();
        assert_eq!(config.metric.period, Duration::from_secs(30));
        assert_eq!(config.output.logstash.hosts, vec!["a:5044", "b:5044"]);
    }
}
