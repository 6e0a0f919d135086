//! Configuration management

use anyhow::{Context, Result};
use std::str::FromStr;
use std::time::Duration;

use crate::conversation::{StoreConfig, CONTEXT_TIMEOUT, MAX_HISTORY};
use crate::model::{OpenAiConfig, DEFAULT_API_KEY, DEFAULT_BASE_URL, DEFAULT_MODEL};

/// Bridge configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Telegram bot token
    pub telegram_token: String,

    /// Model backend settings
    pub model: OpenAiConfig,

    /// Upper bound on a whole model call; exceeding it yields the fallback reply
    pub model_timeout: Duration,

    /// Conversation window and idle timeout
    pub store: StoreConfig,

    /// Background purge interval (None = lazy eviction only)
    pub sweep_interval: Option<Duration>,

    /// Peer cache TTL (None = resolve fresh on every send)
    pub peer_cache_ttl: Option<Duration>,

    /// Maximum round-trips in flight
    pub max_concurrent_dispatch: usize,

    /// Record the fallback reply in history when the model fails
    pub record_fallback_replies: bool,

    /// Port for the health server (None = disabled)
    pub health_port: Option<u16>,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_secs(key: &str) -> Option<Duration> {
    match env_or::<u64>(key, 0) {
        0 => None,
        secs => Some(Duration::from_secs(secs)),
    }
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let telegram_token =
            std::env::var("TELEGRAM_BOT_TOKEN").context("TELEGRAM_BOT_TOKEN must be set")?;

        let model_timeout = Duration::from_secs(env_or("MODEL_TIMEOUT_SECS", 60));

        let model = OpenAiConfig {
            base_url: std::env::var("LLM_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
            api_key: std::env::var("LLM_API_KEY").unwrap_or_else(|_| DEFAULT_API_KEY.to_string()),
            model: std::env::var("LLM_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
            temperature: env_or("LLM_TEMPERATURE", 0.7),
            max_tokens: env_or("LLM_MAX_TOKENS", 500),
            request_timeout: model_timeout,
        };

        let store = StoreConfig {
            max_history: env_or("CONTEXT_MAX_HISTORY", MAX_HISTORY).max(1),
            timeout: Duration::from_secs(env_or("CONTEXT_TIMEOUT_SECS", CONTEXT_TIMEOUT.as_secs())),
        };

        Ok(Self {
            telegram_token,
            model,
            model_timeout,
            store,
            sweep_interval: env_secs("CONTEXT_SWEEP_SECS"),
            peer_cache_ttl: env_secs("PEER_CACHE_TTL_SECS"),
            max_concurrent_dispatch: env_or::<usize>("MAX_CONCURRENT_DISPATCH", 64).max(1),
            record_fallback_replies: env_flag("RECORD_FALLBACK_REPLIES", true),
            health_port: std::env::var("HEALTH_PORT").ok().and_then(|v| v.trim().parse().ok()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_or_falls_back_on_garbage() {
        std::env::set_var("TAB_TEST_GARBAGE", "not-a-number");
        assert_eq!(env_or::<u64>("TAB_TEST_GARBAGE", 7), 7);
        assert_eq!(env_or::<u64>("TAB_TEST_UNSET_KEY", 3), 3);
    }

    #[test]
    fn test_env_secs_zero_disables() {
        std::env::set_var("TAB_TEST_ZERO_SECS", "0");
        assert_eq!(env_secs("TAB_TEST_ZERO_SECS"), None);
        std::env::set_var("TAB_TEST_SOME_SECS", "15");
        assert_eq!(env_secs("TAB_TEST_SOME_SECS"), Some(Duration::from_secs(15)));
    }

    #[test]
    fn test_env_flag() {
        std::env::set_var("TAB_TEST_FLAG_OFF", "false");
        std::env::set_var("TAB_TEST_FLAG_ON", "1");
        assert!(!env_flag("TAB_TEST_FLAG_OFF", true));
        assert!(env_flag("TAB_TEST_FLAG_ON", false));
        assert!(env_flag("TAB_TEST_FLAG_UNSET", true));
    }
}
