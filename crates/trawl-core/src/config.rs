//! Environment configuration.
//!
//! `Config::from_env` loads `.env` (if present) and reads the process
//! environment. Everything has a default except the credentials, which stay
//! `None` until set; a provider without its credential is skipped by the
//! binary.

use std::path::PathBuf;
use std::time::Duration;

use crate::queue::{BackoffPolicy, StagePolicies};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid {key}={value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub db_path: PathBuf,
    pub source: String,

    pub product_hunt_token: Option<String>,
    pub product_hunt_api_url: String,
    pub product_hunt_web_url: String,
    /// Feed requests per second; pages are spaced by its inverse.
    pub requests_per_second: f64,

    pub serp_api_key: Option<String>,
    pub serp_api_url: String,
    pub github_token: Option<String>,
    pub github_api_url: String,
    pub arxiv_api_url: String,

    pub max_attempts: Option<u32>,
    pub max_consecutive_failures: Option<u32>,
    pub processing_timeout: Option<Duration>,
    pub backoff_enabled: bool,
    pub channel_delay: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data/trawl.db"),
            source: "product_hunt".to_string(),
            product_hunt_token: None,
            product_hunt_api_url: "https://api.producthunt.com/v2/api/graphql".to_string(),
            product_hunt_web_url: "https://www.producthunt.com".to_string(),
            requests_per_second: 1.0,
            serp_api_key: None,
            serp_api_url: "https://serpapi.com/search.json".to_string(),
            github_token: None,
            github_api_url: "https://api.github.com".to_string(),
            arxiv_api_url: "http://export.arxiv.org/api/query".to_string(),
            max_attempts: None,
            max_consecutive_failures: None,
            processing_timeout: None,
            backoff_enabled: true,
            channel_delay: Duration::from_millis(500),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        // A missing .env is fine; the environment may be set some other way.
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from `lookup`. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Config::default();

        if let Some(path) = get("TRAWL_DB_PATH") {
            config.db_path = PathBuf::from(path);
        }
        if let Some(source) = get("TRAWL_SOURCE") {
            config.source = source;
        }
        config.product_hunt_token = get("PRODUCT_HUNT_TOKEN");
        if let Some(url) = get("PRODUCT_HUNT_API_URL") {
            config.product_hunt_api_url = url;
        }
        if let Some(url) = get("PRODUCT_HUNT_WEB_URL") {
            config.product_hunt_web_url = url;
        }
        if let Some(rps) = parse::<f64>("PRODUCT_HUNT_RPS", get("PRODUCT_HUNT_RPS"))? {
            if !(rps > 0.0 && rps.is_finite()) {
                return Err(invalid("PRODUCT_HUNT_RPS", rps.to_string(), "must be a positive number"));
            }
            config.requests_per_second = rps;
        }

        config.serp_api_key = get("SERP_API_KEY");
        if let Some(url) = get("SERP_API_URL") {
            config.serp_api_url = url;
        }
        config.github_token = get("GITHUB_TOKEN");
        if let Some(url) = get("GITHUB_API_URL") {
            config.github_api_url = url;
        }
        if let Some(url) = get("ARXIV_API_URL") {
            config.arxiv_api_url = url;
        }

        config.max_attempts = parse("TRAWL_MAX_ATTEMPTS", get("TRAWL_MAX_ATTEMPTS"))?;
        if config.max_attempts == Some(0) {
            return Err(invalid("TRAWL_MAX_ATTEMPTS", "0".into(), "must be at least 1"));
        }
        config.max_consecutive_failures = parse(
            "TRAWL_MAX_CONSECUTIVE_FAILURES",
            get("TRAWL_MAX_CONSECUTIVE_FAILURES"),
        )?;
        config.processing_timeout = parse::<u64>(
            "TRAWL_PROCESSING_TIMEOUT_MINUTES",
            get("TRAWL_PROCESSING_TIMEOUT_MINUTES"),
        )?
        .map(|minutes| Duration::from_secs(minutes * 60));
        if let Some(flag) = get("TRAWL_BACKOFF") {
            config.backoff_enabled = match flag.to_ascii_lowercase().as_str() {
                "on" | "true" | "1" | "yes" => true,
                "off" | "false" | "0" | "no" => false,
                _ => return Err(invalid("TRAWL_BACKOFF", flag, "expected on or off")),
            };
        }
        if let Some(ms) = parse::<u64>("TRAWL_CHANNEL_DELAY_MS", get("TRAWL_CHANNEL_DELAY_MS"))? {
            config.channel_delay = Duration::from_millis(ms);
        }

        Ok(config)
    }

    /// Per-stage defaults with the configured overrides applied to every stage.
    pub fn policies(&self) -> StagePolicies {
        StagePolicies::new().map_all(|policy| {
            if let Some(n) = self.max_attempts {
                policy.max_attempts = n;
            }
            if let Some(n) = self.max_consecutive_failures {
                policy.max_consecutive_failures = n;
            }
            if let Some(timeout) = self.processing_timeout {
                policy.processing_timeout = timeout;
            }
            if !self.backoff_enabled {
                policy.backoff = BackoffPolicy {
                    enabled: false,
                    ..policy.backoff
                };
            }
        })
    }

    pub fn page_delay(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.requests_per_second)
    }
}

fn invalid(key: &'static str, value: String, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        value,
        reason: reason.to_string(),
    }
}

fn parse<T>(key: &'static str, value: Option<String>) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .map(|v| v.parse::<T>().map_err(|e| invalid(key, v.clone(), &e.to_string())))
        .transpose()
}
