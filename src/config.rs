use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::services::push_sink::SignalFraming;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub max_tokens: u32,
}

impl AnthropicConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: "claude-sonnet-4-20250514".to_string(),
            base_url: "https://api.anthropic.com".to_string(),
            max_tokens: 4096,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub site_addr: SocketAddr,
    /// `None` runs every request against the demo producer.
    pub anthropic: Option<AnthropicConfig>,
    pub framing: SignalFraming,
    pub stream_timeout: Duration,
    pub demo_startup_delay: Duration,
    pub demo_chunk_delay: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            site_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            anthropic: None,
            framing: SignalFraming::MergeSignals,
            stream_timeout: Duration::from_secs(300),
            demo_startup_delay: Duration::from_millis(300),
            demo_chunk_delay: Duration::from_millis(150),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the config from any key lookup, so tests don't touch the process env.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let anthropic = match var("ANTHROPIC_API_KEY") {
            Some(api_key) => {
                let mut anthropic = AnthropicConfig::new(api_key);
                if let Some(model) = var("ANTHROPIC_MODEL") {
                    anthropic.model = model;
                }
                if let Some(base_url) = var("ANTHROPIC_BASE_URL") {
                    anthropic.base_url = base_url;
                }
                anthropic.max_tokens = parse_or(
                    "ANTHROPIC_MAX_TOKENS",
                    var("ANTHROPIC_MAX_TOKENS"),
                    anthropic.max_tokens,
                )?;
                Some(anthropic)
            }
            None => None,
        };

        let framing = match var("DATASTAR_EVENT").as_deref() {
            None => defaults.framing,
            Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
                name: "DATASTAR_EVENT",
                value: value.to_string(),
            })?,
        };

        Ok(Config {
            site_addr: parse_or("SITE_ADDR", var("SITE_ADDR"), defaults.site_addr)?,
            anthropic,
            framing,
            stream_timeout: Duration::from_secs(parse_or(
                "STREAM_TIMEOUT_SECS",
                var("STREAM_TIMEOUT_SECS"),
                defaults.stream_timeout.as_secs(),
            )?),
            demo_startup_delay: Duration::from_millis(parse_or(
                "DEMO_STARTUP_DELAY_MS",
                var("DEMO_STARTUP_DELAY_MS"),
                defaults.demo_startup_delay.as_millis() as u64,
            )?),
            demo_chunk_delay: Duration::from_millis(parse_or(
                "DEMO_CHUNK_DELAY_MS",
                var("DEMO_CHUNK_DELAY_MS"),
                defaults.demo_chunk_delay.as_millis() as u64,
            )?),
        })
    }
}

fn parse_or<T: FromStr>(
    name: &'static str,
    value: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match value {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults_to_demo_mode() {
        let config = config_from(&[]).unwrap();
        assert!(config.anthropic.is_none());
        assert_eq!(config.framing, SignalFraming::MergeSignals);
        assert_eq!(config.site_addr.port(), 3000);
        assert_eq!(config.stream_timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_blank_api_key_means_demo_mode() {
        let config = config_from(&[("ANTHROPIC_API_KEY", "  ")]).unwrap();
        assert!(config.anthropic.is_none());
    }

    #[test]
    fn test_reads_anthropic_settings() {
        let config = config_from(&[
            ("ANTHROPIC_API_KEY", "sk-test"),
            ("ANTHROPIC_MODEL", "claude-test"),
            ("ANTHROPIC_BASE_URL", "http://localhost:9999"),
            ("ANTHROPIC_MAX_TOKENS", "512"),
            ("DATASTAR_EVENT", "patch"),
        ])
        .unwrap();

        let anthropic = config.anthropic.unwrap();
        assert_eq!(anthropic.api_key, "sk-test");
        assert_eq!(anthropic.model, "claude-test");
        assert_eq!(anthropic.base_url, "http://localhost:9999");
        assert_eq!(anthropic.max_tokens, 512);
        assert_eq!(config.framing, SignalFraming::PatchSignals);
    }

    #[test]
    fn test_rejects_malformed_values() {
        let err = config_from(&[("STREAM_TIMEOUT_SECS", "soon")]).unwrap_err();
        assert!(err.to_string().contains("STREAM_TIMEOUT_SECS"));

        assert!(config_from(&[("DATASTAR_EVENT", "sideways")]).is_err());
        assert!(config_from(&[("SITE_ADDR", "not an addr")]).is_err());
    }
}
