//! Process configuration
//!
//! Everything comes from environment variables (a `.env` file is honoured).
//! Requirements depend on the feed a process serves: the GSOD feed needs the
//! FTP archive and its audit file, the space-weather feed only needs the
//! store. Invalid values are errors, never silently replaced by defaults.

use anyhow::{bail, Context, Result};
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::feed::Feed;
use crate::queue::{QueueFullPolicy, DEFAULT_MAX_DEPTH};
use crate::remote::ftp::{FtpSettings, DEFAULT_TIMEOUT_SECS};
use crate::remote::http::DEFAULT_SPACE_WEATHER_URL;
use crate::retry::{
    RetryPolicy, DEFAULT_COOLDOWN_SECS, DEFAULT_MAX_COOLDOWNS, DEFAULT_MAX_RETRIES,
    DEFAULT_RETRY_DELAY_SECS,
};

// ============================================================================
// Defaults
// ============================================================================

pub const DEFAULT_FTP_PORT: u16 = 21;

pub const DEFAULT_FTP_USER: &str = "anonymous";

pub const DEFAULT_SPACE_WEATHER_CSV: &str = "space_weather.csv";

/// Pause between two harvested items (seconds)
pub const DEFAULT_DOWNLOAD_PAUSE_SECS: u64 = 1;

/// Parser sleep when the queue is empty (seconds)
pub const DEFAULT_PARSER_SLEEP_SECS: u64 = 5;

/// How long one pop waits for an entry (seconds)
pub const DEFAULT_POP_TIMEOUT_SECS: u64 = 5;

/// Pause between two harvest cycles of the GSOD archive (seconds)
pub const DEFAULT_GSOD_POLL_INTERVAL_SECS: u64 = 600;

/// Pause between two polls of the space-weather document (seconds)
pub const DEFAULT_SPACE_WEATHER_POLL_INTERVAL_SECS: u64 = 60;

pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;

#[derive(Debug, Clone)]
pub struct Config {
    pub feed: Feed,

    /// Present for the GSOD feed only
    pub ftp: Option<FtpSettings>,
    pub space_weather_url: String,

    pub database_url: String,
    pub db_max_connections: u32,

    /// Where harvested files are materialized
    pub data_dir: PathBuf,
    /// Audit file of this feed
    pub audit_csv: PathBuf,
    pub allow_list: Option<PathBuf>,

    pub download_pause: Duration,
    pub poll_interval: Duration,
    pub start_year: Option<u32>,

    pub queue_max_depth: usize,
    pub queue_full_policy: QueueFullPolicy,
    pub retry: RetryPolicy,

    pub parser_sleep: Duration,
    pub pop_timeout: Duration,
}

impl Config {
    /// Load configuration for `feed` from the environment
    pub fn from_env(feed: Feed) -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(feed, |key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(feed: Feed, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup };

        let ftp = match feed {
            Feed::Gsod => Some(FtpSettings {
                host: vars.required("WXDB_FTP_HOST")?,
                port: vars.parse_or("WXDB_FTP_PORT", DEFAULT_FTP_PORT)?,
                username: vars.get("WXDB_FTP_USER").unwrap_or_else(|| DEFAULT_FTP_USER.to_string()),
                password: vars.get("WXDB_FTP_PASSWORD").unwrap_or_default(),
                base_dir: vars.required("WXDB_FTP_BASE_DIR")?,
                timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            }),
            Feed::SpaceWeather => None,
        };

        let audit_csv = match feed {
            Feed::Gsod => PathBuf::from(vars.required("WXDB_AUDIT_CSV")?),
            Feed::SpaceWeather => PathBuf::from(
                vars.get("WXDB_SPACE_WEATHER_CSV")
                    .unwrap_or_else(|| DEFAULT_SPACE_WEATHER_CSV.to_string()),
            ),
        };

        let default_poll = match feed {
            Feed::Gsod => DEFAULT_GSOD_POLL_INTERVAL_SECS,
            Feed::SpaceWeather => DEFAULT_SPACE_WEATHER_POLL_INTERVAL_SECS,
        };

        let max_retries = vars.parse_or("WXDB_MAX_RETRIES", DEFAULT_MAX_RETRIES)?;
        if max_retries == 0 {
            bail!("WXDB_MAX_RETRIES must be greater than 0");
        }
        let retry = RetryPolicy::new(
            max_retries,
            vars.secs_or("WXDB_RETRY_DELAY_SECS", DEFAULT_RETRY_DELAY_SECS)?,
            vars.secs_or("WXDB_COOLDOWN_SECS", DEFAULT_COOLDOWN_SECS)?,
            vars.parse_or("WXDB_MAX_COOLDOWNS", DEFAULT_MAX_COOLDOWNS)?,
        );

        let config = Config {
            feed,
            ftp,
            space_weather_url: vars
                .get("WXDB_SPACE_WEATHER_URL")
                .unwrap_or_else(|| DEFAULT_SPACE_WEATHER_URL.to_string()),
            database_url: vars.required("DATABASE_URL")?,
            db_max_connections: vars.parse_or("WXDB_DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS)?,
            data_dir: PathBuf::from(vars.required("WXDB_DATA_DIR")?),
            audit_csv,
            allow_list: vars.get("WXDB_ALLOW_LIST").map(PathBuf::from),
            download_pause: vars.secs_or("WXDB_DOWNLOAD_PAUSE_SECS", DEFAULT_DOWNLOAD_PAUSE_SECS)?,
            poll_interval: vars.secs_or("WXDB_POLL_INTERVAL_SECS", default_poll)?,
            start_year: vars.parse("WXDB_START_YEAR")?,
            queue_max_depth: vars.parse_or("WXDB_QUEUE_MAX_DEPTH", DEFAULT_MAX_DEPTH)?,
            queue_full_policy: vars.parse_or("WXDB_QUEUE_FULL_POLICY", QueueFullPolicy::default())?,
            retry,
            parser_sleep: vars.secs_or("WXDB_PARSER_SLEEP_SECS", DEFAULT_PARSER_SLEEP_SECS)?,
            pop_timeout: vars.secs_or("WXDB_POP_TIMEOUT_SECS", DEFAULT_POP_TIMEOUT_SECS)?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if let Some(ref ftp) = self.ftp {
            if ftp.host.trim().is_empty() {
                bail!("WXDB_FTP_HOST cannot be empty");
            }
            if ftp.port == 0 {
                bail!("WXDB_FTP_PORT must be greater than 0");
            }
        }

        if self.database_url.trim().is_empty() {
            bail!("DATABASE_URL cannot be empty");
        }

        if self.db_max_connections == 0 {
            bail!("WXDB_DB_MAX_CONNECTIONS must be greater than 0");
        }

        if self.queue_max_depth == 0 {
            bail!("WXDB_QUEUE_MAX_DEPTH must be greater than 0");
        }

        if self.pop_timeout.is_zero() {
            bail!("WXDB_POP_TIMEOUT_SECS must be greater than 0");
        }

        Ok(())
    }
}

struct Vars<F> {
    lookup: F,
}

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Value of `key`; blank counts as unset
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, key: &str) -> Result<String> {
        self.get(key)
            .with_context(|| format!("Missing required environment variable {}", key))
    }

    fn parse<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.get(key) {
            Some(raw) => match raw.parse() {
                Ok(value) => Ok(Some(value)),
                Err(e) => bail!("Invalid value for {}: {:?} ({})", key, raw, e),
            },
            None => Ok(None),
        }
    }

    fn parse_or<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: Display,
    {
        Ok(self.parse(key)?.unwrap_or(default))
    }

    fn secs_or(&self, key: &str, default: u64) -> Result<Duration> {
        Ok(Duration::from_secs(self.parse_or(key, default)?))
    }
}
