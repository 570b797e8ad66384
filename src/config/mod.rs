//! Configuration management.
//!
//! Configuration is layered, later layers winning:
//!
//! 1. Built-in defaults
//! 2. A TOML file: the `--config` path, else `./riskwatch.toml`, else
//!    `riskwatch.toml` in the platform config dir
//! 3. `.env` (loaded into the process environment) and `RISKWATCH_*`
//!    environment variables
//!
//! Secrets are held as [`SecretString`] and are never serialized in clear.

use crate::alerts::{AlertsConfig, config::PagerDutyConfig, config::SlackConfig};
use crate::incidents::IncidentsConfig;
use crate::{Error, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Config file name looked up in the working and platform config dirs.
pub const CONFIG_FILE_NAME: &str = "riskwatch.toml";

/// Main configuration for riskwatch.
#[derive(Debug, Clone, Default)]
pub struct RiskwatchConfig {
    /// HTTP server.
    pub server: ServerSettings,
    /// Durable storage locations.
    pub storage: StorageSettings,
    /// Training and retrain scheduling.
    pub training: TrainingSettings,
    /// Prediction serving.
    pub serving: ServingSettings,
    /// Fairness auditing.
    pub fairness: FairnessSettings,
    /// Alert channels.
    pub alerts: AlertsConfig,
    /// Incident polling and relay.
    pub incidents: IncidentsConfig,
    /// Logging and metrics.
    pub observability: ObservabilitySettings,
    /// File the configuration was read from, if any.
    pub source: Option<PathBuf>,
}

/// HTTP server settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Listen address.
    pub bind: String,
    /// Bearer token required on every scoring and mutating call.
    pub api_token: Option<SecretString>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8000".to_string(),
            api_token: None,
        }
    }
}

/// Storage locations.
#[derive(Debug, Clone)]
pub struct StorageSettings {
    /// Directory holding model artifacts and the current-version pointer.
    pub model_dir: PathBuf,
    /// `SQLite` file for feedback and prediction history.
    pub database: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("models"),
            database: PathBuf::from("riskwatch.db"),
        }
    }
}

/// Training settings.
#[derive(Debug, Clone)]
pub struct TrainingSettings {
    /// Base training set (CSV). Retraining merges feedback into it.
    pub base_dataset: Option<PathBuf>,
    /// Label column in the base CSV.
    pub label_column: String,
    /// Gradient descent epochs.
    pub epochs: usize,
    /// Gradient descent step size.
    pub learning_rate: f64,
    /// L2 penalty.
    pub l2: f64,
    /// Seconds between scheduled retrain evaluations. Disabled when unset.
    pub retrain_interval_secs: Option<u64>,
    /// Train version 1 at startup when no version exists.
    pub bootstrap: bool,
    /// Feedback records required since the active version to retrain.
    pub min_feedback: usize,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            base_dataset: None,
            label_column: "Class".to_string(),
            epochs: 200,
            learning_rate: 0.1,
            l2: 0.001,
            retrain_interval_secs: None,
            bootstrap: true,
            min_feedback: 1,
        }
    }
}

/// Serving settings.
#[derive(Debug, Clone)]
pub struct ServingSettings {
    /// Probability above which a prediction raises a fraud-spike alert.
    pub high_risk_probability: f64,
}

impl Default for ServingSettings {
    fn default() -> Self {
        Self {
            high_risk_probability: 0.9,
        }
    }
}

/// Fairness audit settings.
#[derive(Debug, Clone)]
pub struct FairnessSettings {
    /// Attributes audited by default.
    pub protected_attributes: Vec<String>,
    /// Gap above which a bias alert is raised.
    pub max_gap: f64,
    /// Seconds between scheduled audits. Disabled when unset.
    pub interval_secs: Option<u64>,
    /// Audit only the last N hours of predictions. Whole history when unset.
    pub window_hours: Option<u64>,
}

impl Default for FairnessSettings {
    fn default() -> Self {
        Self {
            protected_attributes: vec!["Gender".to_string(), "Region".to_string()],
            max_gap: crate::services::DEFAULT_MAX_GAP,
            interval_secs: None,
            window_hours: None,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

impl FromStr for LogFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(Error::InvalidInput(format!("unknown log format: {other}"))),
        }
    }
}

/// Logging and metrics settings.
#[derive(Debug, Clone, Default)]
pub struct ObservabilitySettings {
    /// Output format.
    pub log_format: LogFormat,
    /// Also write logs to this file.
    pub log_file: Option<PathBuf>,
    /// Install the Prometheus recorder and expose `/metrics`.
    pub metrics: bool,
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    /// `[server]`.
    pub server: Option<ConfigFileServer>,
    /// `[storage]`.
    pub storage: Option<ConfigFileStorage>,
    /// `[training]`.
    pub training: Option<ConfigFileTraining>,
    /// `[serving]`.
    pub serving: Option<ConfigFileServing>,
    /// `[fairness]`.
    pub fairness: Option<ConfigFileFairness>,
    /// `[alerts]`.
    pub alerts: Option<AlertsConfig>,
    /// `[incidents]`.
    pub incidents: Option<IncidentsConfig>,
    /// `[observability]`.
    pub observability: Option<ConfigFileObservability>,
}

/// Server section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileServer {
    /// Listen address.
    pub bind: Option<String>,
    /// API token.
    pub api_token: Option<String>,
}

/// Storage section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileStorage {
    /// Model directory.
    pub model_dir: Option<String>,
    /// Database file.
    pub database: Option<String>,
}

/// Training section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileTraining {
    /// Base dataset CSV.
    pub base_dataset: Option<String>,
    /// Label column.
    pub label_column: Option<String>,
    /// Epochs.
    pub epochs: Option<usize>,
    /// Learning rate.
    pub learning_rate: Option<f64>,
    /// L2 penalty.
    pub l2: Option<f64>,
    /// Retrain interval.
    pub retrain_interval_secs: Option<u64>,
    /// Bootstrap on empty store.
    pub bootstrap: Option<bool>,
    /// Minimum new feedback.
    pub min_feedback: Option<usize>,
}

/// Serving section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileServing {
    /// High-risk bound.
    pub high_risk_probability: Option<f64>,
}

/// Fairness section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileFairness {
    /// Protected attributes.
    pub protected_attributes: Option<Vec<String>>,
    /// Alert bound.
    pub max_gap: Option<f64>,
    /// Audit interval.
    pub interval_secs: Option<u64>,
    /// Audit window.
    pub window_hours: Option<u64>,
}

/// Observability section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileObservability {
    /// `pretty` or `json`.
    pub log_format: Option<String>,
    /// Log file.
    pub log_file: Option<String>,
    /// Enable metrics.
    pub metrics: Option<bool>,
}

impl RiskwatchConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the layered configuration.
    ///
    /// `path`, when given, must exist. Otherwise the working directory and
    /// then the platform config dir are searched, and defaults are used when
    /// neither has a file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationFailed`] if a file cannot be read or parsed,
    /// or if the merged configuration is invalid.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let _ = dotenvy::dotenv();

        let source = match path {
            Some(path) => Some(path.to_path_buf()),
            None => default_config_path(),
        };
        let mut config = match &source {
            Some(path) => Self::load_from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;

        tracing::debug!(source = ?config.source, "Configuration loaded");
        Ok(config)
    }

    /// Loads configuration from a file path, without environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| Error::operation("read_config_file", e))?;
        let mut config = Self::from_toml(&contents)?;
        config.source = Some(path.to_path_buf());
        Ok(config)
    }

    /// Parses TOML text over the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a valid configuration.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let file: ConfigFile =
            toml::from_str(contents).map_err(|e| Error::operation("parse_config_file", e))?;
        Ok(Self::from_config_file(file))
    }

    fn from_config_file(file: ConfigFile) -> Self {
        let mut config = Self::default();

        if let Some(server) = file.server {
            if let Some(bind) = server.bind {
                config.server.bind = bind;
            }
            config.server.api_token = server.api_token.map(SecretString::from);
        }
        if let Some(storage) = file.storage {
            if let Some(dir) = storage.model_dir {
                config.storage.model_dir = PathBuf::from(dir);
            }
            if let Some(db) = storage.database {
                config.storage.database = PathBuf::from(db);
            }
        }
        if let Some(training) = file.training {
            let t = &mut config.training;
            t.base_dataset = training.base_dataset.map(PathBuf::from);
            if let Some(v) = training.label_column {
                t.label_column = v;
            }
            if let Some(v) = training.epochs {
                t.epochs = v;
            }
            if let Some(v) = training.learning_rate {
                t.learning_rate = v;
            }
            if let Some(v) = training.l2 {
                t.l2 = v;
            }
            t.retrain_interval_secs = training.retrain_interval_secs;
            if let Some(v) = training.bootstrap {
                t.bootstrap = v;
            }
            if let Some(v) = training.min_feedback {
                t.min_feedback = v;
            }
        }
        if let Some(v) = file.serving.and_then(|s| s.high_risk_probability) {
            config.serving.high_risk_probability = v;
        }
        if let Some(fairness) = file.fairness {
            let f = &mut config.fairness;
            if let Some(v) = fairness.protected_attributes {
                f.protected_attributes = v;
            }
            if let Some(v) = fairness.max_gap {
                f.max_gap = v;
            }
            f.interval_secs = fairness.interval_secs;
            f.window_hours = fairness.window_hours;
        }
        if let Some(alerts) = file.alerts {
            config.alerts = alerts;
        }
        if let Some(incidents) = file.incidents {
            config.incidents = incidents;
        }
        if let Some(obs) = file.observability {
            if let Some(format) = obs.log_format {
                config.observability.log_format = format.parse().unwrap_or_else(|_| {
                    tracing::warn!(format = %format, "Unknown log format, using pretty");
                    LogFormat::Pretty
                });
            }
            config.observability.log_file = obs.log_file.map(PathBuf::from);
            if let Some(v) = obs.metrics {
                config.observability.metrics = v;
            }
        }

        config
    }

    /// Applies `RISKWATCH_*` overrides read through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationFailed`] if a numeric override does not parse.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("RISKWATCH_API_TOKEN") {
            self.server.api_token = Some(SecretString::from(v));
        }
        if let Some(v) = get("RISKWATCH_BIND") {
            self.server.bind = v;
        }
        if let Some(v) = get("RISKWATCH_MODEL_DIR") {
            self.storage.model_dir = PathBuf::from(v);
        }
        if let Some(v) = get("RISKWATCH_DATABASE") {
            self.storage.database = PathBuf::from(v);
        }
        if let Some(v) = get("RISKWATCH_BASE_DATASET") {
            self.training.base_dataset = Some(PathBuf::from(v));
        }
        if let Some(v) = get("RISKWATCH_RETRAIN_INTERVAL_SECS") {
            self.training.retrain_interval_secs = Some(parse_env("RISKWATCH_RETRAIN_INTERVAL_SECS", &v)?);
        }
        if let Some(v) = get("RISKWATCH_HIGH_RISK_PROBABILITY") {
            self.serving.high_risk_probability = parse_env("RISKWATCH_HIGH_RISK_PROBABILITY", &v)?;
        }
        if let Some(v) = get("RISKWATCH_AUDIT_INTERVAL_SECS") {
            self.fairness.interval_secs = Some(parse_env("RISKWATCH_AUDIT_INTERVAL_SECS", &v)?);
        }
        if let Some(v) = get("RISKWATCH_PROTECTED_ATTRIBUTES") {
            self.fairness.protected_attributes = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(v) = get("RISKWATCH_LOG_FORMAT") {
            self.observability.log_format = v.parse()?;
        }
        if let Some(v) = get("RISKWATCH_LOG_FILE") {
            self.observability.log_file = Some(PathBuf::from(v));
        }
        if let Some(v) = get("RISKWATCH_METRICS") {
            self.observability.metrics = parse_env("RISKWATCH_METRICS", &v)?;
        }
        if let Some(v) = get("RISKWATCH_SLACK_WEBHOOK_URL") {
            let dashboard_url = get("RISKWATCH_GRAFANA_URL");
            match &mut self.alerts.slack {
                Some(slack) => slack.webhook_url = SecretString::from(v),
                None => {
                    self.alerts.slack = Some(SlackConfig {
                        webhook_url: SecretString::from(v),
                        dashboard_url,
                        min_severity: crate::models::Severity::Info,
                    });
                },
            }
        }
        if let Some(v) = get("RISKWATCH_PAGERDUTY_ROUTING_KEY") {
            match &mut self.alerts.pagerduty {
                Some(pd) => pd.routing_key = SecretString::from(v),
                None => {
                    self.alerts.pagerduty = Some(PagerDutyConfig {
                        routing_key: SecretString::from(v),
                        events_url: crate::alerts::config::PAGERDUTY_EVENTS_URL.to_string(),
                        api_url: crate::alerts::config::PAGERDUTY_API_URL.to_string(),
                        api_key: None,
                        min_severity: crate::models::Severity::Warning,
                    });
                },
            }
        }
        if let Some(v) = get("RISKWATCH_PAGERDUTY_API_KEY") {
            self.incidents.pagerduty_api_key = Some(SecretString::from(v));
        }
        Ok(())
    }

    /// Checks ranges and formats.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationFailed`] naming the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        let invalid = |cause: String| Err(Error::operation("validate_config", cause));

        if self.server.bind.parse::<SocketAddr>().is_err() {
            return invalid(format!("server.bind '{}' is not a socket address", self.server.bind));
        }
        if !(0.0..=1.0).contains(&self.serving.high_risk_probability) {
            return invalid("serving.high_risk_probability must be within [0, 1]".to_string());
        }
        if !(0.0..=1.0).contains(&self.fairness.max_gap) {
            return invalid("fairness.max_gap must be within [0, 1]".to_string());
        }
        if self.training.label_column.trim().is_empty() {
            return invalid("training.label_column must not be empty".to_string());
        }
        if self.training.epochs == 0 || self.training.learning_rate <= 0.0 {
            return invalid("training.epochs and training.learning_rate must be positive".to_string());
        }
        if [
            self.training.retrain_interval_secs,
            self.fairness.interval_secs,
            Some(self.incidents.poll_interval_secs),
        ]
        .contains(&Some(0))
        {
            return invalid("intervals must be at least one second".to_string());
        }
        Ok(())
    }
}

fn default_config_path() -> Option<PathBuf> {
    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.exists() {
        return Some(local);
    }
    let dirs = directories::ProjectDirs::from("", "", "riskwatch")?;
    let platform = dirs.config_dir().join(CONFIG_FILE_NAME);
    platform.exists().then_some(platform)
}

fn parse_env<T: FromStr>(key: &str, raw: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| Error::operation("parse_env", format!("{key}={raw}: {e}")))
}

/// Serde adapter for [`SecretString`] fields: reads a plain string, writes a
/// placeholder.
pub(crate) mod secret_serde {
    use secrecy::SecretString;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(_secret: &SecretString, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str("***REDACTED***")
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SecretString, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(SecretString::from(s))
    }
}

/// [`secret_serde`] for optional fields.
pub(crate) mod optional_secret_serde {
    use secrecy::SecretString;
    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::ref_option)]
    pub fn serialize<S>(secret: &Option<SecretString>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match secret {
            Some(_) => serializer.serialize_some("***REDACTED***"),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = Option::<String>::deserialize(deserializer)?;
        Ok(s.map(SecretString::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = RiskwatchConfig::default();
        assert_eq!(config.server.bind, "0.0.0.0:8000");
        assert_eq!(config.training.label_column, "Class");
        assert!((config.serving.high_risk_probability - 0.9).abs() < f64::EPSILON);
        assert_eq!(config.fairness.protected_attributes, vec!["Gender", "Region"]);
        assert_eq!(config.incidents.poll_interval_secs, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_overrides_defaults() {
        let config = RiskwatchConfig::from_toml(
            r#"
            [server]
            bind = "127.0.0.1:9000"
            api_token = "t0k"

            [training]
            base_dataset = "data/train.csv"
            retrain_interval_secs = 3600

            [fairness]
            protected_attributes = ["Gender"]
            max_gap = 0.1

            [alerts.slack]
            webhook_url = "https://hooks.slack.test/x"

            [incidents]
            poll_interval_secs = 30

            [observability]
            log_format = "json"
            metrics = true
            "#,
        )
        .expect("parse");

        assert_eq!(config.server.bind, "127.0.0.1:9000");
        assert_eq!(
            config.server.api_token.as_ref().map(|t| t.expose_secret().to_string()),
            Some("t0k".to_string())
        );
        assert_eq!(config.training.base_dataset, Some(PathBuf::from("data/train.csv")));
        assert_eq!(config.training.retrain_interval_secs, Some(3600));
        assert_eq!(config.training.epochs, 200);
        assert_eq!(config.fairness.protected_attributes, vec!["Gender"]);
        assert!(config.alerts.slack.is_some());
        assert_eq!(config.incidents.poll_interval_secs, 30);
        assert_eq!(config.observability.log_format, LogFormat::Json);
        assert!(config.observability.metrics);
    }

    #[test]
    fn test_unknown_section_is_rejected() {
        assert!(RiskwatchConfig::from_toml("[surprise]\nx = 1").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("RISKWATCH_API_TOKEN", "from-env"),
            ("RISKWATCH_HIGH_RISK_PROBABILITY", "0.75"),
            ("RISKWATCH_PROTECTED_ATTRIBUTES", "Gender, AgeBand"),
            ("RISKWATCH_SLACK_WEBHOOK_URL", "https://hooks.slack.test/env"),
            ("RISKWATCH_LOG_FORMAT", ""),
        ]
        .into_iter()
        .collect();
        let mut config = RiskwatchConfig::default();

        config
            .apply_env(|key| env.get(key).map(|v| (*v).to_string()))
            .expect("env");

        assert_eq!(
            config.server.api_token.as_ref().map(|t| t.expose_secret().to_string()),
            Some("from-env".to_string())
        );
        assert!((config.serving.high_risk_probability - 0.75).abs() < f64::EPSILON);
        assert_eq!(config.fairness.protected_attributes, vec!["Gender", "AgeBand"]);
        assert!(config.alerts.slack.is_some());
        assert_eq!(config.observability.log_format, LogFormat::Pretty);
    }

    #[test]
    fn test_bad_numeric_env_is_error() {
        let mut config = RiskwatchConfig::default();
        let result = config.apply_env(|key| {
            (key == "RISKWATCH_HIGH_RISK_PROBABILITY").then(|| "lots".to_string())
        });
        assert!(matches!(result, Err(Error::OperationFailed { .. })));
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let mut config = RiskwatchConfig::default();
        config.serving.high_risk_probability = 1.5;
        assert!(config.validate().is_err());

        let mut config = RiskwatchConfig::default();
        config.server.bind = "not an address".to_string();
        assert!(config.validate().is_err());

        let mut config = RiskwatchConfig::default();
        config.fairness.interval_secs = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "[storage]\nmodel_dir = \"/var/lib/riskwatch/models\"\n")
            .expect("write");

        let config = RiskwatchConfig::load_from_file(&path).expect("load");

        assert_eq!(config.storage.model_dir, PathBuf::from("/var/lib/riskwatch/models"));
        assert_eq!(config.source.as_deref(), Some(path.as_path()));
        assert!(RiskwatchConfig::load_from_file(&dir.path().join("missing.toml")).is_err());
    }
}
