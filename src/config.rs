//! Process configuration, read from the environment (and `.env` via dotenvy).

use anyhow::{Context, Result};
use std::str::FromStr;
use std::time::Duration;

use crate::services::OrderPolicy;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub db_max_connections: u32,
    pub request_timeout: Duration,
    pub require_payment_before_completion: bool,
    pub bcrypt_cost: u32,
    pub nats_url: Option<String>,
    pub event_subject_prefix: String,
    /// Both must be set for the superadmin to be bootstrapped at start.
    pub superadmin: Option<(String, String)>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite://coffeestry.db?mode=rwc".into(),
            port: 8083,
            db_max_connections: 5,
            request_timeout: Duration::from_millis(5000),
            require_payment_before_completion: false,
            bcrypt_cost: bcrypt::DEFAULT_COST,
            nats_url: None,
            event_subject_prefix: "pos".into(),
            superadmin: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from any key lookup. Unset or blank keys keep their default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let superadmin = match (get("SUPERADMIN_USERNAME"), get("SUPERADMIN_PASSWORD")) {
            (Some(user), Some(password)) => Some((user, password)),
            (None, None) => None,
            _ => anyhow::bail!("SUPERADMIN_USERNAME and SUPERADMIN_PASSWORD must be set together"),
        };

        let config = Self {
            database_url: get("DATABASE_URL").unwrap_or(defaults.database_url),
            port: parse(&get, "PORT", defaults.port)?,
            db_max_connections: parse(&get, "DB_MAX_CONNECTIONS", defaults.db_max_connections)?,
            request_timeout: Duration::from_millis(parse(&get, "REQUEST_TIMEOUT_MS", 5000u64)?),
            require_payment_before_completion: parse(
                &get,
                "REQUIRE_PAYMENT_BEFORE_COMPLETION",
                defaults.require_payment_before_completion,
            )?,
            bcrypt_cost: parse(&get, "BCRYPT_COST", defaults.bcrypt_cost)?,
            nats_url: get("NATS_URL"),
            event_subject_prefix: get("EVENT_SUBJECT_PREFIX").unwrap_or(defaults.event_subject_prefix),
            superadmin,
        };
        if config.db_max_connections == 0 {
            anyhow::bail!("DB_MAX_CONNECTIONS must be at least 1");
        }
        if !(4..=31).contains(&config.bcrypt_cost) {
            anyhow::bail!("BCRYPT_COST must be between 4 and 31");
        }
        Ok(config)
    }

    pub fn order_policy(&self) -> OrderPolicy {
        OrderPolicy {
            require_payment_before_completion: self.require_payment_before_completion,
            request_timeout: self.request_timeout,
        }
    }
}

fn parse<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match get(key) {
        Some(raw) => raw.parse().with_context(|| format!("invalid {key}: '{raw}'")),
        None => Ok(default),
    }
}
