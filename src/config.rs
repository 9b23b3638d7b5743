use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Context};

const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";
const DEFAULT_GATEWAY_TIMEOUT_SECS: u64 = 30;
const DEFAULT_SWEEPER_INTERVAL_SECS: u32 = 300;
const DEFAULT_SWEEPER_STALE_AFTER_SECS: u32 = 300;
const DEFAULT_SWEEPER_BATCH_SIZE: i64 = 100;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_address: String,
    /// In-memory ledger when unset.
    pub database_url: Option<String>,
    pub gateway: GatewayConfig,
    pub sweeper: SweeperConfig,
}

#[derive(Clone)]
pub struct GatewayConfig {
    pub base_url: reqwest::Url,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("base_url", &self.base_url.as_str())
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct SweeperConfig {
    pub enabled: bool,
    pub interval_secs: u32,
    pub stale_after_secs: u32,
    pub batch_size: i64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: DEFAULT_SWEEPER_INTERVAL_SECS,
            stale_after_secs: DEFAULT_SWEEPER_STALE_AFTER_SECS,
            batch_size: DEFAULT_SWEEPER_BATCH_SIZE,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let base_url = var("GATEWAY_BASE_URL").ok_or_else(|| anyhow!("GATEWAY_BASE_URL must be set"))?;
        let base_url = reqwest::Url::parse(&base_url).context("GATEWAY_BASE_URL is not a valid URL")?;

        let sweeper = SweeperConfig {
            enabled: parsed(&var, "SWEEPER_ENABLED")?.unwrap_or(true),
            interval_secs: positive(&var, "SWEEPER_INTERVAL_SECS", DEFAULT_SWEEPER_INTERVAL_SECS)?,
            stale_after_secs: parsed(&var, "SWEEPER_STALE_AFTER_SECS")?.unwrap_or(DEFAULT_SWEEPER_STALE_AFTER_SECS),
            batch_size: positive(&var, "SWEEPER_BATCH_SIZE", DEFAULT_SWEEPER_BATCH_SIZE)?,
        };

        Ok(Self {
            bind_address: var("BIND_ADDRESS").unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string()),
            database_url: var("DATABASE_URL"),
            gateway: GatewayConfig {
                base_url,
                api_key: var("GATEWAY_API_KEY"),
                timeout_secs: positive(&var, "GATEWAY_TIMEOUT_SECS", DEFAULT_GATEWAY_TIMEOUT_SECS)?,
            },
            sweeper,
        })
    }
}

fn parsed<T>(var: &impl Fn(&str) -> Option<String>, key: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    var(key)
        .map(|raw| raw.parse::<T>().with_context(|| format!("{key} has an invalid value {raw:?}")))
        .transpose()
}

fn positive<T>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr + PartialOrd + Default,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let value = parsed(var, key)?.unwrap_or(default);
    if value <= T::default() {
        return Err(anyhow!("{key} must be greater than zero"));
    }
    Ok(value)
}
