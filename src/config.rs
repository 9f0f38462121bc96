use crate::schedule::Trigger;
use chrono::{FixedOffset, NaiveTime, Offset, Utc};
use serde::Deserialize;
use std::{
    collections::HashSet,
    fmt,
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unable to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub spreadsheet_id: String,
    #[serde(default = "default_service_account_path")]
    pub service_account_path: PathBuf,
    pub urls: Urls,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub shops: Vec<ShopConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Urls {
    #[serde(default = "default_token_url")]
    pub token_url: String,
    pub metrics_url: String,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub cycle: String,
    pub snapshot_save: String,
    pub snapshot_clear: String,
    pub shop_delay_secs: u64,
    pub utc_offset_hours: i32,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            cycle: "@every 10m".into(),
            snapshot_save: "0 * * * * *".into(),
            snapshot_clear: "0 0 0 * * *".into(),
            shop_delay_secs: 65,
            utc_offset_hours: 3,
        }
    }
}

impl ScheduleConfig {
    /// Time zone used for "today", snapshot times and cron patterns.
    pub fn reference_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_hours * 3600)
            .unwrap_or_else(|| Utc.fix())
    }

    pub fn shop_delay(&self) -> Duration {
        Duration::from_secs(self.shop_delay_secs)
    }
}

/// API principal of one shop. The secret never shows up in `Debug` output.
#[derive(Clone, Deserialize, PartialEq, Eq)]
pub struct Credential {
    pub client_id: String,
    pub client_secret: String,
}

impl Credential {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("client_id", &self.client_id)
            .field("client_secret", &"***")
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShopConfig {
    pub name: String,
    #[serde(flatten)]
    pub credential: Credential,
    pub user_id: i64,
    pub sheet_range: String,
    /// Destination for per-item rows. Shops without it only get totals.
    #[serde(default)]
    pub items_range: Option<String>,
    #[serde(default)]
    pub snapshots: Vec<SnapshotSpec>,
}

impl ShopConfig {
    pub fn items_target(&self) -> &str {
        self.items_range.as_deref().unwrap_or(&self.sheet_range)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SnapshotSpec {
    /// `HH:MM` in the reference time zone.
    #[serde(rename = "time")]
    pub time_of_day: String,
    #[serde(rename = "range")]
    pub target_range: String,
}

impl AppConfig {
    /// Loads the file named by `AVITO_SYNC_CONFIG`, or `config.yaml`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let path = std::env::var("AVITO_SYNC_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        Self::load(&path)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.spreadsheet_id.trim().is_empty() {
            return Err(ConfigError::Invalid("spreadsheet_id is empty".into()));
        }
        if self.urls.metrics_url.trim().is_empty() {
            return Err(ConfigError::Invalid("urls.metrics_url is empty".into()));
        }
        if !(-14..=14).contains(&self.schedule.utc_offset_hours) {
            return Err(ConfigError::Invalid(format!(
                "utc_offset_hours {} is out of range",
                self.schedule.utc_offset_hours
            )));
        }
        for pattern in [
            &self.schedule.cycle,
            &self.schedule.snapshot_save,
            &self.schedule.snapshot_clear,
        ] {
            Trigger::parse(pattern)
                .map_err(|err| ConfigError::Invalid(format!("schedule `{pattern}`: {err}")))?;
        }

        let mut seen = HashSet::new();
        for shop in &self.shops {
            if shop.name.trim().is_empty() {
                return Err(ConfigError::Invalid("shop with empty name".into()));
            }
            if !seen.insert(shop.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate shop `{}`",
                    shop.name
                )));
            }
            if shop.sheet_range.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "shop `{}` has no sheet_range",
                    shop.name
                )));
            }
            for snap in &shop.snapshots {
                // Matching is a plain string compare, so insist on the zero-padded form.
                let valid = snap.time_of_day.len() == 5
                    && NaiveTime::parse_from_str(&snap.time_of_day, "%H:%M").is_ok();
                if !valid {
                    return Err(ConfigError::Invalid(format!(
                        "shop `{}` snapshot time `{}` is not HH:MM",
                        shop.name, snap.time_of_day
                    )));
                }
            }
        }
        Ok(())
    }
}

fn default_service_account_path() -> PathBuf {
    PathBuf::from("service_account.json")
}

fn default_token_url() -> String {
    "https://api.avito.ru/token".into()
}

fn default_api_base_url() -> String {
    "https://api.avito.ru".into()
}
