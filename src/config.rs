// Configuration module - typed settings from command-line flags and environment
//
// Every setting can be given as a flag or through its environment variable;
// deployments normally only use the environment. `Settings::validate` checks
// the cross-field rules clap cannot express.

use clap::{Parser, ValueEnum};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::collector::MIN_POOL_SIZE;
use crate::metrics::prometheus::BasicAuth;

/// Errors that can occur while loading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid duration '{0}', expected e.g. 500ms, 5s, 1m or 1h")]
    InvalidDuration(String),

    #[error("Invalid URL '{value}': {reason}")]
    InvalidUrl { value: String, reason: String },

    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    #[error("Missing required setting: {0}")]
    MissingRequiredSetting(&'static str),
}

/// Where the finished report goes
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputKind {
    /// Post Block Kit blocks to a Slack channel
    Slack,
    /// Print tables to stdout
    Table,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "pod-reporter", version, about = "Rates pod resource requests against observed usage")]
pub struct Settings {
    /// Log output format: text or json
    #[arg(long, env = "LOG_TYPE", default_value = "text")]
    pub log_type: String,

    /// Default log level, RUST_LOG takes precedence
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Datacenters to report on, ':'-separated
    #[arg(long, env = "DATACENTERS", value_delimiter = ':', required = true)]
    pub datacenters: Vec<String>,

    #[arg(long, env = "PROM_SERVER_URL", value_parser = parse_url)]
    pub prom_server_url: Url,

    #[arg(long, env = "PROM_USERNAME")]
    pub prom_username: Option<String>,

    #[arg(long, env = "PROM_PASSWORD", hide_env_values = true)]
    pub prom_password: Option<String>,

    #[arg(long, env = "PROM_TIMEOUT", default_value = "5s", value_parser = parse_duration)]
    pub prom_timeout: Duration,

    /// Label carrying the datacenter name on container series
    #[arg(long, env = "PROM_DATACENTER_LABEL")]
    pub prom_datacenter_label: Option<String>,

    #[arg(long, env = "VAULT_URL", value_parser = parse_url)]
    pub vault_url: Url,

    #[arg(long, env = "VAULT_TIMEOUT", default_value = "10s", value_parser = parse_duration)]
    pub vault_timeout: Duration,

    #[arg(long, env = "VAULT_ROLE_ID")]
    pub vault_role_id: String,

    #[arg(long, env = "VAULT_SECRET_ID", hide_env_values = true)]
    pub vault_secret_id: String,

    /// Secret prefix, kubeconfigs live under <path>/<environment>/<datacenter>
    #[arg(long, env = "VAULT_SECRET_PATH")]
    pub vault_secret_path: String,

    /// Environments to search, later ones win
    #[arg(
        long,
        env = "VAULT_ENVIRONMENT",
        value_delimiter = ':',
        default_values = ["production", "development"]
    )]
    pub vault_environment: Vec<String>,

    /// Only list pods of this namespace
    #[arg(long, env = "KUBE_NAMESPACE")]
    pub kube_namespace: Option<String>,

    #[arg(long, env = "SLACK_BOT_TOKEN", hide_env_values = true)]
    pub slack_bot_token: Option<String>,

    #[arg(long, env = "SLACK_CHANNEL")]
    pub slack_channel: Option<String>,

    /// Entries per ranked view
    #[arg(long, env = "REPORT_TOP_N", default_value_t = 5)]
    pub report_top_n: usize,

    #[arg(long, env = "REPORT_OUTPUT", value_enum, default_value = "slack")]
    pub report_output: OutputKind,

    /// Add a section ranking all datacenters together
    #[arg(long, env = "REPORT_ALL_DATACENTERS")]
    pub report_all_datacenters: bool,

    /// Number of concurrent usage queries
    #[arg(long, env = "MAX_CONCURRENCY", default_value_t = 2)]
    pub max_concurrency: usize,
}

impl Settings {
    /// Checks rules that span several settings.
    ///
    /// # Returns
    /// * `Ok(())` - Settings are usable
    /// * `Err(ConfigError)` - First violated rule
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.datacenters.iter().all(|dc| dc.trim().is_empty()) {
            return Err(ConfigError::MissingRequiredSetting("DATACENTERS"));
        }
        if self.max_concurrency < MIN_POOL_SIZE {
            return Err(ConfigError::InvalidSettings(format!(
                "MAX_CONCURRENCY must be at least {}, got {}",
                MIN_POOL_SIZE, self.max_concurrency
            )));
        }
        if self.vault_environment.is_empty() {
            return Err(ConfigError::MissingRequiredSetting("VAULT_ENVIRONMENT"));
        }
        if self.prom_username.is_some() != self.prom_password.is_some() {
            return Err(ConfigError::InvalidSettings(
                "PROM_USERNAME and PROM_PASSWORD must be set together".to_string(),
            ));
        }
        if self.report_output == OutputKind::Slack {
            if self.slack_bot_token.as_deref().map_or(true, str::is_empty) {
                return Err(ConfigError::MissingRequiredSetting("SLACK_BOT_TOKEN"));
            }
            if self.slack_channel.as_deref().map_or(true, str::is_empty) {
                return Err(ConfigError::MissingRequiredSetting("SLACK_CHANNEL"));
            }
        }
        Ok(())
    }

    /// Datacenter names with blanks removed
    pub fn datacenter_names(&self) -> Vec<String> {
        self.datacenters
            .iter()
            .map(|dc| dc.trim())
            .filter(|dc| !dc.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn prometheus_auth(&self) -> Option<BasicAuth> {
        match (&self.prom_username, &self.prom_password) {
            (Some(username), Some(password)) => Some(BasicAuth {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => None,
        }
    }
}

/// Parses durations like `500ms`, `5s`, `1m`, `1h`; a bare number means seconds.
pub fn parse_duration(value: &str) -> Result<Duration, ConfigError> {
    let value = value.trim();
    let invalid = || ConfigError::InvalidDuration(value.to_string());

    let (number, unit_ms) = if let Some(n) = value.strip_suffix("ms") {
        (n, 1)
    } else if let Some(n) = value.strip_suffix('s') {
        (n, 1_000)
    } else if let Some(n) = value.strip_suffix('m') {
        (n, 60_000)
    } else if let Some(n) = value.strip_suffix('h') {
        (n, 3_600_000)
    } else {
        (value, 1_000)
    };

    let number: u64 = number.trim().parse().map_err(|_| invalid())?;
    number
        .checked_mul(unit_ms)
        .map(Duration::from_millis)
        .ok_or_else(invalid)
}

/// Parses a server URL, defaulting the scheme to http and ending the path
/// with '/' so relative API paths join below it.
pub fn parse_url(value: &str) -> Result<Url, ConfigError> {
    let value = value.trim();
    let with_scheme = if value.contains("://") {
        value.to_string()
    } else {
        format!("http://{}", value)
    };

    let mut url = Url::parse(&with_scheme).map_err(|e| ConfigError::InvalidUrl {
        value: value.to_string(),
        reason: e.to_string(),
    })?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Settings {
        let mut args = vec![
            "pod-reporter",
            "--datacenters",
            "dc1:dc2",
            "--prom-server-url",
            "prometheus:9090",
            "--vault-url",
            "https://vault.example.com",
            "--vault-role-id",
            "role",
            "--vault-secret-id",
            "secret",
            "--vault-secret-path",
            "kv/data/k8s",
            "--slack-bot-token",
            "xoxb-token",
            "--slack-channel",
            "reports",
        ];
        args.extend_from_slice(extra);
        Settings::try_parse_from(args).expect("valid arguments")
    }

    #[test]
    fn test_defaults_and_delimited_lists() {
        let settings = parse(&[]);

        assert_eq!(settings.datacenters, vec!["dc1", "dc2"]);
        assert_eq!(settings.vault_environment, vec!["production", "development"]);
        assert_eq!(settings.max_concurrency, 2);
        assert_eq!(settings.report_top_n, 5);
        assert_eq!(settings.report_output, OutputKind::Slack);
        assert_eq!(settings.prom_timeout, Duration::from_secs(5));
        assert_eq!(settings.prom_server_url.as_str(), "http://prometheus:9090/");
        assert!(!settings.report_all_datacenters);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_pool_below_two_is_rejected() {
        for pool in ["0", "1"] {
            let settings = parse(&["--max-concurrency", pool]);
            assert!(matches!(
                settings.validate(),
                Err(ConfigError::InvalidSettings(_))
            ));
        }
        assert!(parse(&["--max-concurrency", "8"]).validate().is_ok());
    }

    #[test]
    fn test_slack_output_requires_token() {
        let mut settings = parse(&[]);
        settings.slack_bot_token = None;
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::MissingRequiredSetting("SLACK_BOT_TOKEN"))
        ));

        settings.report_output = OutputKind::Table;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_prometheus_credentials_go_together() {
        let settings = parse(&["--prom-username", "reader"]);
        assert!(settings.validate().is_err());

        let settings = parse(&["--prom-username", "reader", "--prom-password", "pw"]);
        assert!(settings.validate().is_ok());
        let auth = settings.prometheus_auth().unwrap();
        assert_eq!(auth.username, "reader");
    }

    #[test]
    fn test_blank_datacenters_are_dropped() {
        let mut settings = parse(&[]);
        settings.datacenters = vec!["dc1".into(), "".into(), " dc3".into(), "".into()];
        assert_eq!(settings.datacenter_names(), vec!["dc1", "dc3"]);

        settings.datacenters = vec!["".into(), " ".into()];
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::MissingRequiredSetting("DATACENTERS"))
        ));
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("1m").unwrap(), Duration::from_secs(60));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("15").unwrap(), Duration::from_secs(15));
        assert!(parse_duration("fast").is_err());
        assert!(parse_duration("-1s").is_err());
    }

    #[test]
    fn test_parse_url_normalizes() {
        assert_eq!(
            parse_url("prometheus.local:9090").unwrap().as_str(),
            "http://prometheus.local:9090/"
        );
        assert_eq!(
            parse_url("https://proxy.example.com/prometheus").unwrap().as_str(),
            "https://proxy.example.com/prometheus/"
        );
        assert!(parse_url("http://").is_err());
    }
}
