//! Configuration module for environment variable parsing.
//!
//! Every setting has a default except the SMTP account, which is required
//! unless the worker runs in dry-run mode.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::queue::MAX_RETRIES_LIMIT;
use crate::schedule::{CalendarError, CampaignCalendar};

/// Errors loading or validating configuration. Always fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} has invalid value {value:?}")]
    Unparseable { name: &'static str, value: String },

    #[error("{name} {reason}")]
    OutOfRange { name: &'static str, reason: String },

    #[error("{0} must be set unless DRY_RUN is enabled")]
    MissingSmtp(&'static str),

    #[error("CAMPAIGN_CALENDAR: {0}")]
    Calendar(#[from] CalendarError),
}

/// SMTP account used by the mail sender.
#[derive(Clone, Default)]
pub struct SmtpSettings {
    pub host: Option<String>,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: Option<String>,
}

// Keeps the password out of `config_loaded` style debug output.
impl std::fmt::Debug for SmtpSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("from", &self.from)
            .finish()
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite connection URL
    pub database_url: String,

    /// Time between processor cycles
    pub check_interval: Duration,

    /// Maximum entries claimed per email type per cycle
    pub batch_size: u32,

    /// Default retry budget for new entries
    pub max_retries: u32,

    /// Upper bound on a single send
    pub send_timeout: Duration,

    /// A `processing` row older than this many intervals is reclaimed
    pub stale_processing_intervals: u32,

    /// Permanent SMTP errors fail the entry without spending the remaining budget
    pub fail_fast_on_permanent: bool,

    /// Fixed send time per campaign type
    pub campaign_calendar: CampaignCalendar,

    /// Log messages instead of sending them
    pub dry_run: bool,

    pub smtp: SmtpSettings,

    // =========================================================================
    // Admin Server Configuration
    // =========================================================================

    /// Port for the admin server to listen on
    pub port: u16,

    /// Shared secret expected in `X-Admin-Token`; unset disables the check
    pub admin_token: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database_url: "sqlite://mail_queue.db".to_string(),
            check_interval: Duration::from_secs(60),
            batch_size: 100,
            max_retries: 3,
            send_timeout: Duration::from_secs(30),
            stale_processing_intervals: 5,
            fail_fast_on_permanent: true,
            campaign_calendar: CampaignCalendar::default(),
            dry_run: false,
            smtp: SmtpSettings {
                port: 587,
                ..SmtpSettings::default()
            },
            port: 8080,
            admin_token: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to its value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let config = Config {
            database_url: get("DATABASE_URL").unwrap_or(defaults.database_url),

            check_interval: Duration::from_secs(parse_or(
                "CHECK_INTERVAL_SECS",
                get("CHECK_INTERVAL_SECS"),
                defaults.check_interval.as_secs(),
            )?),

            batch_size: parse_or("BATCH_SIZE", get("BATCH_SIZE"), defaults.batch_size)?,

            max_retries: parse_or("MAX_RETRIES", get("MAX_RETRIES"), defaults.max_retries)?,

            send_timeout: Duration::from_secs(parse_or(
                "SEND_TIMEOUT_SECS",
                get("SEND_TIMEOUT_SECS"),
                defaults.send_timeout.as_secs(),
            )?),

            stale_processing_intervals: parse_or(
                "STALE_PROCESSING_INTERVALS",
                get("STALE_PROCESSING_INTERVALS"),
                defaults.stale_processing_intervals,
            )?,

            fail_fast_on_permanent: parse_bool(
                "FAIL_FAST_ON_PERMANENT",
                get("FAIL_FAST_ON_PERMANENT"),
                defaults.fail_fast_on_permanent,
            )?,

            campaign_calendar: match get("CAMPAIGN_CALENDAR") {
                Some(raw) => CampaignCalendar::parse(&raw)?,
                None => defaults.campaign_calendar,
            },

            dry_run: parse_bool("DRY_RUN", get("DRY_RUN"), defaults.dry_run)?,

            smtp: SmtpSettings {
                host: get("SMTP_HOST"),
                port: parse_or("SMTP_PORT", get("SMTP_PORT"), defaults.smtp.port)?,
                username: get("SMTP_USER"),
                // App passwords are often pasted with spaces between groups
                password: lookup("SMTP_PASSWORD")
                    .map(|p| p.chars().filter(|c| !c.is_whitespace()).collect::<String>())
                    .filter(|p| !p.is_empty()),
                from: get("EMAIL_FROM"),
            },

            port: parse_or("PORT", get("PORT"), defaults.port)?,

            admin_token: get("ADMIN_TOKEN"),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the processor cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(out_of_range("BATCH_SIZE", "must be at least 1"));
        }
        if self.check_interval.is_zero() {
            return Err(out_of_range("CHECK_INTERVAL_SECS", "must be at least 1"));
        }
        if self.send_timeout.is_zero() {
            return Err(out_of_range("SEND_TIMEOUT_SECS", "must be at least 1"));
        }
        if self.max_retries > MAX_RETRIES_LIMIT {
            return Err(out_of_range(
                "MAX_RETRIES",
                &format!("must be at most {MAX_RETRIES_LIMIT}"),
            ));
        }
        if self.stale_processing_intervals == 0 {
            return Err(out_of_range("STALE_PROCESSING_INTERVALS", "must be at least 1"));
        }

        if !self.dry_run {
            let required = [
                ("SMTP_HOST", &self.smtp.host),
                ("SMTP_USER", &self.smtp.username),
                ("SMTP_PASSWORD", &self.smtp.password),
                ("EMAIL_FROM", &self.smtp.from),
            ];
            if let Some(&(name, _)) = required.iter().find(|(_, value)| value.is_none()) {
                return Err(ConfigError::MissingSmtp(name));
            }
        }

        Ok(())
    }

    /// Age after which a `processing` row is considered abandoned.
    ///
    /// A live worker can hold a claim for a full batch of timed-out sends, so
    /// the threshold is that worst case plus `stale_processing_intervals`
    /// check intervals of grace.
    pub fn stale_after(&self) -> Duration {
        self.send_timeout
            .saturating_mul(self.batch_size)
            .saturating_add(self.check_interval.saturating_mul(self.stale_processing_intervals))
    }
}

fn out_of_range(name: &'static str, reason: &str) -> ConfigError {
    ConfigError::OutOfRange {
        name,
        reason: reason.to_string(),
    }
}

/// Parse `raw` when present, otherwise fall back to `default`.
fn parse_or<T: FromStr>(name: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::Unparseable { name, value }),
    }
}

/// Accepts true/false, 1/0, yes/no and on/off in any case.
fn parse_bool(name: &'static str, raw: Option<String>, default: bool) -> Result<bool, ConfigError> {
    let lowered = raw.as_ref().map(|v| v.to_ascii_lowercase());
    match lowered.as_deref() {
        None => Ok(default),
        Some("true" | "1" | "yes" | "on") => Ok(true),
        Some("false" | "0" | "no" | "off") => Ok(false),
        Some(_) => Err(ConfigError::Unparseable {
            name,
            value: raw.unwrap_or_default(),
        }),
    }
}
