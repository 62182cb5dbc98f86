//! Configuration read from the process environment and a local `.env` file.

use std::{env, str::FromStr, time::Duration};

use tracing::debug;

use crate::error::{Error, Result};

pub const DEFAULT_MODEL: &str = "claude-3-5-sonnet-20241022";
pub const DEFAULT_ANTHROPIC_URL: &str = "https://api.anthropic.com";
pub const DEFAULT_FORECAST_URL: &str = "https://api.open-meteo.com/v1/forecast";
pub const DEFAULT_ARCHIVE_URL: &str = "https://archive-api.open-meteo.com/v1/archive";
pub const DEFAULT_GEOCODING_URL: &str = "https://geocoding-api.open-meteo.com/v1/search";

#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub host: String,
    pub max_tokens: u32,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            host: DEFAULT_ANTHROPIC_URL.to_string(),
            max_tokens: 4096,
        }
    }
}

impl AnthropicConfig {
    /// The API key, or a config error naming the variable to set.
    pub fn require_api_key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                Error::Config("ANTHROPIC_API_KEY is not set (environment or .env file)".into())
            })
    }
}

#[derive(Debug, Clone)]
pub struct WeatherConfig {
    pub forecast_url: String,
    pub archive_url: String,
    pub geocoding_url: String,
    /// `None` disables response caching.
    pub cache_ttl: Option<Duration>,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            forecast_url: DEFAULT_FORECAST_URL.to_string(),
            archive_url: DEFAULT_ARCHIVE_URL.to_string(),
            geocoding_url: DEFAULT_GEOCODING_URL.to_string(),
            cache_ttl: Some(crate::weather::cache::DEFAULT_TTL),
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Wall-clock limit for one `query`.
    pub query_timeout: Duration,
    /// Limit for a single plugin call.
    pub call_timeout: Duration,
    /// Operation-call rounds allowed per query; `None` is unbounded.
    pub max_rounds: Option<usize>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            query_timeout: Duration::from_secs(120),
            call_timeout: Duration::from_secs(30),
            max_rounds: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub anthropic: AnthropicConfig,
    pub weather: WeatherConfig,
    pub agent: AgentConfig,
}

impl Config {
    /// Load `.env` if present, then read the process environment.
    pub fn from_env() -> Result<Self> {
        if let Ok(path) = dotenv::dotenv() {
            debug!("Loaded environment from {}", path.display());
        }
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Config::default();

        config.anthropic.api_key = var("ANTHROPIC_API_KEY");
        if let Some(model) = var("ANTHROPIC_MODEL") {
            config.anthropic.model = model;
        }
        if let Some(host) = var("ANTHROPIC_BASE_URL") {
            config.anthropic.host = host;
        }

        if let Some(url) = var("OPEN_METEO_FORECAST_URL") {
            config.weather.forecast_url = url;
        }
        if let Some(url) = var("OPEN_METEO_ARCHIVE_URL") {
            config.weather.archive_url = url;
        }
        if let Some(url) = var("OPEN_METEO_GEOCODING_URL") {
            config.weather.geocoding_url = url;
        }
        if let Some(secs) = parse_var::<u64>("WEATHER_CACHE_TTL_SECS", var("WEATHER_CACHE_TTL_SECS"))? {
            config.weather.cache_ttl = (secs > 0).then(|| Duration::from_secs(secs));
        }

        if let Some(secs) = parse_var::<u64>(
            "WEATHER_AGENT_QUERY_TIMEOUT_SECS",
            var("WEATHER_AGENT_QUERY_TIMEOUT_SECS"),
        )? {
            config.agent.query_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64>(
            "WEATHER_AGENT_CALL_TIMEOUT_SECS",
            var("WEATHER_AGENT_CALL_TIMEOUT_SECS"),
        )? {
            config.agent.call_timeout = Duration::from_secs(secs);
        }
        config.agent.max_rounds =
            parse_var::<usize>("WEATHER_AGENT_MAX_ROUNDS", var("WEATHER_AGENT_MAX_ROUNDS"))?;

        Ok(config)
    }
}

fn parse_var<T: FromStr>(key: &str, value: Option<String>) -> Result<Option<T>> {
    value
        .map(|v| {
            v.trim()
                .parse::<T>()
                .map_err(|_| Error::Config(format!("{key} must be a non-negative integer, got '{v}'")))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.anthropic.model, DEFAULT_MODEL);
        assert!(config.anthropic.require_api_key().is_err());
        assert_eq!(config.weather.forecast_url, DEFAULT_FORECAST_URL);
        assert_eq!(config.weather.cache_ttl, Some(Duration::from_secs(300)));
        assert_eq!(config.agent.query_timeout, Duration::from_secs(120));
        assert_eq!(config.agent.call_timeout, Duration::from_secs(30));
        assert_eq!(config.agent.max_rounds, None);
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("ANTHROPIC_API_KEY", "sk-test"),
            ("ANTHROPIC_MODEL", "claude-3-haiku-20240307"),
            ("OPEN_METEO_FORECAST_URL", "http://localhost:9000/forecast"),
            ("WEATHER_CACHE_TTL_SECS", "0"),
            ("WEATHER_AGENT_QUERY_TIMEOUT_SECS", "10"),
            ("WEATHER_AGENT_MAX_ROUNDS", "4"),
        ]))
        .unwrap();
        assert_eq!(config.anthropic.require_api_key().unwrap(), "sk-test");
        assert_eq!(config.anthropic.model, "claude-3-haiku-20240307");
        assert_eq!(config.weather.forecast_url, "http://localhost:9000/forecast");
        assert_eq!(config.weather.cache_ttl, None);
        assert_eq!(config.agent.query_timeout, Duration::from_secs(10));
        assert_eq!(config.agent.max_rounds, Some(4));
    }

    #[test]
    fn test_blank_values_are_ignored() {
        let config = Config::from_lookup(lookup(&[("ANTHROPIC_API_KEY", "  ")])).unwrap();
        assert!(config.anthropic.api_key.is_none());
    }

    #[test]
    fn test_invalid_number_is_a_config_error() {
        let err = Config::from_lookup(lookup(&[("WEATHER_AGENT_CALL_TIMEOUT_SECS", "soon")]))
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Config);
        assert!(err.to_string().contains("WEATHER_AGENT_CALL_TIMEOUT_SECS"));
    }
}
