use serde::{Deserialize, Serialize};

use crate::error::{PawsyncError, Result};

/// Top-level configuration for the sync engine and billing behavior.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub billing: BillingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Materialization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Rolling horizon for periodic runs, in days from today (inclusive).
    #[serde(default = "default_horizon_days")]
    pub horizon_days: u32,
    /// Horizon for the one-off run at process startup. Longer so a freshly
    /// deployed instance back-fills the full visible calendar.
    #[serde(default = "default_startup_horizon_days")]
    pub startup_horizon_days: u32,
    /// Seconds between periodic runs.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Run a sync immediately when the runner starts.
    #[serde(default = "default_true")]
    pub run_on_startup: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            horizon_days: default_horizon_days(),
            startup_horizon_days: default_startup_horizon_days(),
            interval_secs: default_interval_secs(),
            run_on_startup: true,
        }
    }
}

impl SyncConfig {
    #[must_use]
    pub fn with_horizon_days(mut self, days: u32) -> Self {
        self.horizon_days = days;
        self
    }

    #[must_use]
    pub fn with_startup_horizon_days(mut self, days: u32) -> Self {
        self.startup_horizon_days = days;
        self
    }

    #[must_use]
    pub fn with_interval_secs(mut self, secs: u64) -> Self {
        self.interval_secs = secs;
        self
    }

    #[must_use]
    pub fn with_run_on_startup(mut self, run: bool) -> Self {
        self.run_on_startup = run;
        self
    }
}

/// Invoice defaults applied to every draft the engine creates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingConfig {
    /// ISO currency code, lowercase.
    #[serde(default = "default_currency")]
    pub currency: String,
    /// Payment terms for emailed invoices.
    #[serde(default = "default_days_until_due")]
    pub days_until_due: u32,
    /// Finalize each batch invoice immediately instead of leaving a draft
    /// for operator review.
    #[serde(default)]
    pub auto_finalize: bool,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            currency: default_currency(),
            days_until_due: default_days_until_due(),
            auto_finalize: false,
        }
    }
}

impl BillingConfig {
    #[must_use]
    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }

    #[must_use]
    pub fn with_days_until_due(mut self, days: u32) -> Self {
        self.days_until_due = days;
        self
    }

    #[must_use]
    pub fn with_auto_finalize(mut self, auto: bool) -> Self {
        self.auto_finalize = auto;
        self
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Config {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset.
    ///
    /// Recognized variables: `PAWSYNC_HORIZON_DAYS`,
    /// `PAWSYNC_STARTUP_HORIZON_DAYS`, `PAWSYNC_SYNC_INTERVAL_SECS`,
    /// `PAWSYNC_CURRENCY`, `PAWSYNC_DAYS_UNTIL_DUE`,
    /// `PAWSYNC_AUTO_FINALIZE`, `PAWSYNC_LOG_LEVEL`, `PAWSYNC_LOG_JSON`.
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();

        if let Some(v) = read_env("PAWSYNC_HORIZON_DAYS")? {
            config.sync.horizon_days = v;
        }
        if let Some(v) = read_env("PAWSYNC_STARTUP_HORIZON_DAYS")? {
            config.sync.startup_horizon_days = v;
        }
        if let Some(v) = read_env("PAWSYNC_SYNC_INTERVAL_SECS")? {
            config.sync.interval_secs = v;
        }
        if let Ok(v) = std::env::var("PAWSYNC_CURRENCY") {
            config.billing.currency = v.to_lowercase();
        }
        if let Some(v) = read_env("PAWSYNC_DAYS_UNTIL_DUE")? {
            config.billing.days_until_due = v;
        }
        if let Ok(v) = std::env::var("PAWSYNC_AUTO_FINALIZE") {
            config.billing.auto_finalize = matches!(v.as_str(), "1" | "true" | "yes");
        }
        if let Ok(v) = std::env::var("PAWSYNC_LOG_LEVEL") {
            config.logging.level = v;
        }
        if let Ok(v) = std::env::var("PAWSYNC_LOG_JSON") {
            config.logging.json = matches!(v.as_str(), "1" | "true" | "yes");
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sync.horizon_days == 0 {
            return Err(PawsyncError::config("horizon_days must be at least 1"));
        }
        if self.sync.startup_horizon_days < self.sync.horizon_days {
            return Err(PawsyncError::config(
                "startup_horizon_days must not be shorter than horizon_days",
            ));
        }
        if self.billing.currency.len() != 3 {
            return Err(PawsyncError::config(format!(
                "currency must be a 3-letter ISO code, got '{}'",
                self.billing.currency
            )));
        }
        Ok(())
    }
}

fn read_env<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| PawsyncError::config(format!("invalid value for {}: '{}'", name, raw))),
        Err(_) => Ok(None),
    }
}

fn default_horizon_days() -> u32 {
    30
}

fn default_startup_horizon_days() -> u32 {
    120
}

fn default_interval_secs() -> u64 {
    3600
}

fn default_currency() -> String {
    "aud".to_string()
}

fn default_days_until_due() -> u32 {
    14
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.sync.horizon_days, 30);
        assert_eq!(config.sync.startup_horizon_days, 120);
        assert_eq!(config.sync.interval_secs, 3600);
        assert!(config.sync.run_on_startup);
        assert_eq!(config.billing.currency, "aud");
        assert_eq!(config.billing.days_until_due, 14);
        assert!(!config.billing.auto_finalize);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_builder_chain() {
        let sync = SyncConfig::default()
            .with_horizon_days(14)
            .with_interval_secs(600)
            .with_run_on_startup(false);
        assert_eq!(sync.horizon_days, 14);
        assert_eq!(sync.interval_secs, 600);
        assert!(!sync.run_on_startup);
    }

    #[test]
    fn test_validate_rejects_zero_horizon() {
        let mut config = Config::default();
        config.sync.horizon_days = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_short_startup_horizon() {
        let mut config = Config::default();
        config.sync.horizon_days = 30;
        config.sync.startup_horizon_days = 7;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_currency() {
        let config = Config {
            billing: BillingConfig::default().with_currency("dollars"),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deserializes_partial_toml_shaped_json() {
        let config: Config =
            serde_json::from_str(r#"{"sync": {"horizon_days": 7}}"#).unwrap();
        assert_eq!(config.sync.horizon_days, 7);
        assert_eq!(config.billing.days_until_due, 14);
    }
}
