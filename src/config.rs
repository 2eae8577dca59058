use std::time::Duration;

use tracing::warn;

use crate::upstream::LibraryVersion;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 14_6 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/14.1.1 Mobile/15E148 Safari/604.1";
pub const DEFAULT_TIKWM_ENDPOINT: &str = "https://www.tikwm.com/api/";
const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8787";
const DEFAULT_UPSTREAM_TIMEOUT_SECONDS: u64 = 10;
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_DELAY_MS: u64 = 1_000;
const DEFAULT_PROVIDER_DELAY_MS: u64 = 500;
const DEFAULT_RATE_LIMIT_STATUSES: [u16; 1] = [429];
const DEFAULT_RATE_LIMIT_PHRASES: [&str; 3] = ["rate limit", "too many requests", "api limit"];

/// Decides whether an upstream failure is a rate-limit signal.
///
/// A failure matches when its status code is listed, or when its message
/// contains one of the phrases (case-insensitive). The phrase check applies
/// regardless of status so that a 500 carrying "rate limit" in its body, or a
/// library error message, is still recognised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitPolicy {
    statuses: Vec<u16>,
    phrases: Vec<String>,
}

impl RateLimitPolicy {
    pub fn new(statuses: Vec<u16>, phrases: Vec<String>) -> Self {
        let phrases = phrases
            .into_iter()
            .map(|phrase| phrase.trim().to_ascii_lowercase())
            .filter(|phrase| !phrase.is_empty())
            .collect();

        Self { statuses, phrases }
    }

    pub fn matches(&self, status: Option<u16>, message: &str) -> bool {
        if status.is_some_and(|code| self.statuses.contains(&code)) {
            return true;
        }

        let lower = message.to_ascii_lowercase();
        self.phrases.iter().any(|phrase| lower.contains(phrase))
    }
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_RATE_LIMIT_STATUSES.to_vec(),
            DEFAULT_RATE_LIMIT_PHRASES
                .iter()
                .map(ToString::to_string)
                .collect(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per provider, including the first one. Never below 1.
    pub max_attempts: u32,
    /// Pause between attempts against the same provider.
    pub retry_delay: Duration,
    /// Pause before moving on to the next provider.
    pub provider_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            provider_delay: Duration::from_millis(DEFAULT_PROVIDER_DELAY_MS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub library_endpoint: Option<String>,
    pub library_versions: Vec<LibraryVersion>,
    pub tikwm_endpoint: Option<String>,
    pub upstream_timeout: Duration,
    pub retry: RetryPolicy,
    pub rate_limit: RateLimitPolicy,
    pub user_agent: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            library_endpoint: None,
            library_versions: LibraryVersion::ALL.to_vec(),
            tikwm_endpoint: Some(DEFAULT_TIKWM_ENDPOINT.to_string()),
            upstream_timeout: Duration::from_secs(DEFAULT_UPSTREAM_TIMEOUT_SECONDS),
            retry: RetryPolicy::default(),
            rate_limit: RateLimitPolicy::default(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let library_versions = lookup("LIBRARY_VERSIONS")
            .map(|value| {
                split_list(&value)
                    .filter_map(|item| {
                        let version = LibraryVersion::parse(item);
                        if version.is_none() {
                            warn!("Ignoring unknown library version {item:?} in LIBRARY_VERSIONS");
                        }
                        version
                    })
                    .collect::<Vec<_>>()
            })
            .unwrap_or(defaults.library_versions);

        let tikwm_endpoint = match lookup("TIKWM_ENDPOINT") {
            Some(value) => non_empty(&value).map(ToString::to_string),
            None => defaults.tikwm_endpoint,
        };

        let retry = RetryPolicy {
            max_attempts: read_number::<u32>(&lookup, "MAX_ATTEMPTS")
                .filter(|value| *value > 0)
                .unwrap_or(defaults.retry.max_attempts),
            retry_delay: read_number::<u64>(&lookup, "RETRY_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry.retry_delay),
            provider_delay: read_number::<u64>(&lookup, "PROVIDER_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry.provider_delay),
        };

        let rate_limit = match (lookup("RATE_LIMIT_STATUSES"), lookup("RATE_LIMIT_PHRASES")) {
            (None, None) => defaults.rate_limit,
            (statuses, phrases) => RateLimitPolicy::new(
                statuses
                    .map(|value| {
                        split_list(&value)
                            .filter_map(|item| item.parse::<u16>().ok())
                            .collect()
                    })
                    .unwrap_or_else(|| DEFAULT_RATE_LIMIT_STATUSES.to_vec()),
                phrases
                    .map(|value| split_list(&value).map(ToString::to_string).collect())
                    .unwrap_or_else(|| {
                        DEFAULT_RATE_LIMIT_PHRASES
                            .iter()
                            .map(ToString::to_string)
                            .collect()
                    }),
            ),
        };

        Self {
            bind_addr: resolve_bind_addr(&lookup),
            library_endpoint: lookup("LIBRARY_ENDPOINT")
                .and_then(|value| non_empty(&value).map(ToString::to_string)),
            library_versions,
            tikwm_endpoint,
            upstream_timeout: read_number::<u64>(&lookup, "UPSTREAM_TIMEOUT_SECONDS")
                .filter(|value| *value > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.upstream_timeout),
            retry,
            rate_limit,
            user_agent: lookup("USER_AGENT")
                .and_then(|value| non_empty(&value).map(ToString::to_string))
                .unwrap_or(defaults.user_agent),
        }
    }
}

fn read_number<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Option<T> {
    lookup(name).and_then(|value| value.trim().parse::<T>().ok())
}

fn resolve_bind_addr(lookup: &impl Fn(&str) -> Option<String>) -> String {
    if let Some(configured) =
        lookup("APP_ADDR").and_then(|value| non_empty(&value).map(ToString::to_string))
    {
        return configured;
    }

    if let Some(port) = read_number::<u16>(lookup, "PORT") {
        return format!("0.0.0.0:{port}");
    }

    DEFAULT_BIND_ADDR.to_string()
}

fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|item| !item.is_empty())
}

pub(crate) fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> AppConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        AppConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults_without_environment() {
        let config = config_from(&[]);
        assert_eq!(config.bind_addr, "127.0.0.1:8787");
        assert_eq!(config.library_endpoint, None);
        assert_eq!(config.library_versions, LibraryVersion::ALL.to_vec());
        assert_eq!(config.tikwm_endpoint.as_deref(), Some(DEFAULT_TIKWM_ENDPOINT));
        assert_eq!(config.upstream_timeout, Duration::from_secs(10));
        assert_eq!(config.retry, RetryPolicy::default());
        assert_eq!(config.rate_limit, RateLimitPolicy::default());
    }

    #[test]
    fn test_app_addr_wins_over_port() {
        let config = config_from(&[("APP_ADDR", "0.0.0.0:9000"), ("PORT", "3000")]);
        assert_eq!(config.bind_addr, "0.0.0.0:9000");

        let config = config_from(&[("PORT", "3000")]);
        assert_eq!(config.bind_addr, "0.0.0.0:3000");
    }

    #[test]
    fn test_invalid_numbers_fall_back_to_defaults() {
        let config = config_from(&[
            ("MAX_ATTEMPTS", "0"),
            ("RETRY_DELAY_MS", "soon"),
            ("UPSTREAM_TIMEOUT_SECONDS", "-4"),
        ]);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.retry_delay, Duration::from_millis(1_000));
        assert_eq!(config.upstream_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_library_versions_and_disabled_mirror() {
        let config = config_from(&[
            ("LIBRARY_ENDPOINT", "http://127.0.0.1:4000/download"),
            ("LIBRARY_VERSIONS", "v3, v9, v1"),
            ("TIKWM_ENDPOINT", "  "),
        ]);
        assert_eq!(
            config.library_endpoint.as_deref(),
            Some("http://127.0.0.1:4000/download")
        );
        assert_eq!(
            config.library_versions,
            vec![LibraryVersion::V3, LibraryVersion::V1]
        );
        assert_eq!(config.tikwm_endpoint, None);
    }

    #[test]
    fn test_rate_limit_policy_matches_status_or_phrase() {
        let policy = RateLimitPolicy::default();
        assert!(policy.matches(Some(429), ""));
        assert!(policy.matches(Some(500), "Internal error: Rate Limit exceeded"));
        assert!(policy.matches(None, "Free Api Limit: 1 request/second."));
        assert!(!policy.matches(Some(500), "internal server error"));
        assert!(!policy.matches(Some(404), "not found"));
    }

    #[test]
    fn test_rate_limit_policy_phrases_can_be_disabled() {
        let config = config_from(&[("RATE_LIMIT_STATUSES", "429,503"), ("RATE_LIMIT_PHRASES", "")]);
        assert!(config.rate_limit.matches(Some(503), ""));
        assert!(!config.rate_limit.matches(Some(500), "rate limit"));
    }
}
