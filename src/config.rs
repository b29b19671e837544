//! Feed configuration.
//!
//! Loaded in layers with increasing priority:
//! 1. Compiled-in defaults (no endpoints, 1s/30s backoff, 5 attempts)
//! 2. JSON configuration file (if provided)
//! 3. Environment overrides: `EXCHANGE_FEED_RELAY_URL` and
//!    `EXCHANGE_FEED_<MARKET>_URL` (e.g. `EXCHANGE_FEED_UPBIT_URL`)
//!
//! A market's endpoint is its explicit entry in `endpoints`, or else
//! `<relay_url>/<tag>` when a relay is configured. A market with neither is
//! skipped at subscription time.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use url::Url;

use crate::error::ConfigError;
use crate::feed::backoff::{
    BackoffPolicy, DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY, ReconnectPolicy,
};
use crate::market::MarketId;

const ENV_PREFIX: &str = "EXCHANGE_FEED";

// ── Default value functions ────────────────────────────────────────────

/// Default first reconnect delay: 1 000 ms.
fn default_base_delay_ms() -> u64 {
    DEFAULT_BASE_DELAY.as_millis() as u64
}

/// Default reconnect delay ceiling: 30 000 ms.
fn default_max_delay_ms() -> u64 {
    DEFAULT_MAX_DELAY.as_millis() as u64
}

/// Default reconnect ceiling: 5 attempts. `null` in the file means unlimited.
fn default_max_attempts() -> Option<u32> {
    Some(DEFAULT_MAX_ATTEMPTS)
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeedConfig {
    /// Explicit per-market streaming URLs.
    #[serde(default)]
    pub endpoints: HashMap<MarketId, String>,
    /// Base URL of a relay serving every market under `/<tag>`.
    #[serde(default)]
    pub relay_url: Option<String>,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl ReconnectConfig {
    pub fn policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            backoff: BackoffPolicy::new(
                Duration::from_millis(self.base_delay_ms),
                Duration::from_millis(self.max_delay_ms),
            ),
            max_attempts: self.max_attempts,
        }
    }
}

impl FeedConfig {
    /// Parses and validates a JSON document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: FeedConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_json(&contents)
            .with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Applies `EXCHANGE_FEED_*` environment overrides.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides from an arbitrary key lookup.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(relay) = lookup(&format!("{ENV_PREFIX}_RELAY_URL")) {
            self.relay_url = Some(relay);
        }
        for market in MarketId::ALL {
            if let Some(url) = lookup(&env_key(market)) {
                self.endpoints.insert(market, url);
            }
        }
        self
    }

    pub fn endpoint(&self, market: MarketId) -> Option<String> {
        if let Some(url) = self.endpoints.get(&market) {
            return Some(url.clone());
        }
        self.relay_url
            .as_deref()
            .map(|relay| relay_endpoint(relay, market))
    }

    /// Endpoint of every market that has one.
    pub fn resolved_endpoints(&self) -> HashMap<MarketId, String> {
        MarketId::ALL
            .into_iter()
            .filter_map(|market| self.endpoint(market).map(|url| (market, url)))
            .collect()
    }

    /// Every resolvable endpoint must be an absolute `ws://` or `wss://` URL.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (market, endpoint) in self.resolved_endpoints() {
            let invalid = |reason: String| ConfigError::InvalidEndpoint {
                market,
                url: endpoint.clone(),
                reason,
            };
            let url = Url::parse(&endpoint).map_err(|e| invalid(e.to_string()))?;
            if !matches!(url.scheme(), "ws" | "wss") {
                return Err(invalid(format!("unsupported scheme `{}`", url.scheme())));
            }
        }
        Ok(())
    }
}

/// Appends the market tag as a path segment, keeping any query string.
/// An unparseable relay is joined textually so `validate` can report it.
fn relay_endpoint(relay: &str, market: MarketId) -> String {
    let Ok(mut url) = Url::parse(relay) else {
        return format!("{}/{}", relay.trim_end_matches('/'), market.tag());
    };
    match url.path_segments_mut() {
        Ok(mut segments) => {
            segments.pop_if_empty().push(market.tag());
        }
        Err(()) => return format!("{}/{}", relay.trim_end_matches('/'), market.tag()),
    }
    url.to_string()
}

fn env_key(market: MarketId) -> String {
    format!("{ENV_PREFIX}_{}_URL", market.tag().to_ascii_uppercase())
}
