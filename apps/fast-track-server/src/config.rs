use std::env;

use fast_track_core::api::DEFAULT_SESSION_TTL_SECS;

use crate::cli::Cli;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_PUBLIC_BASE_URL: &str = "https://fast-tracking.vercel.app";
pub const DEFAULT_FROM_EMAIL: &str = "noreply@example.com";
pub const DEFAULT_FROM_NAME: &str = "Fast Track";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    /// Unset means the in-memory store.
    pub redis_url: Option<String>,
    pub session_ttl_seconds: u64,
    /// Root of the links put in emails.
    pub public_base_url: String,
    pub brevo: BrevoConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrevoConfig {
    pub api_key: Option<String>,
    pub from_email: String,
    pub from_name: String,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        Self {
            port: var("FAST_TRACK_PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(DEFAULT_PORT),
            redis_url: var("REDIS_URL"),
            session_ttl_seconds: var("SESSION_TTL")
                .and_then(|t| t.parse().ok())
                .filter(|t| *t > 0)
                .unwrap_or(DEFAULT_SESSION_TTL_SECS),
            public_base_url: var("PUBLIC_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_PUBLIC_BASE_URL.to_string()),
            brevo: BrevoConfig {
                api_key: var("BREVO_API_KEY"),
                from_email: var("BREVO_FROM_EMAIL")
                    .unwrap_or_else(|| DEFAULT_FROM_EMAIL.to_string()),
                from_name: var("BREVO_FROM_NAME").unwrap_or_else(|| DEFAULT_FROM_NAME.to_string()),
            },
        }
    }

    /// Command-line flags win over the environment.
    pub fn apply_cli(mut self, cli: &Cli) -> Self {
        if let Some(port) = cli.port {
            self.port = port;
        }
        if let Some(url) = cli.redis_url.as_ref().filter(|u| !u.trim().is_empty()) {
            self.redis_url = Some(url.clone());
        }
        if let Some(ttl) = cli.session_ttl.filter(|t| *t > 0) {
            self.session_ttl_seconds = ttl;
        }
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test_timeout::timeout]
    fn defaults_apply_when_unset_or_empty() {
        let config = Config::from_lookup(lookup(&[("REDIS_URL", ""), ("SESSION_TTL", "abc")]));
        assert_eq!(config.port, 8080);
        assert_eq!(config.redis_url, None);
        assert_eq!(config.session_ttl_seconds, 7_776_000);
        assert_eq!(config.public_base_url, "https://fast-tracking.vercel.app");
        assert_eq!(config.brevo.api_key, None);
        assert_eq!(config.brevo.from_email, "noreply@example.com");
        assert_eq!(config.brevo.from_name, "Fast Track");
    }

    #[test_timeout::timeout]
    fn environment_and_flags_override() {
        let config = Config::from_lookup(lookup(&[
            ("FAST_TRACK_PORT", "9090"),
            ("REDIS_URL", "redis://cache:6379"),
            ("PUBLIC_BASE_URL", "https://fast.example.org/"),
            ("BREVO_API_KEY", "xkeysib-test"),
        ]));
        assert_eq!(config.port, 9090);
        assert_eq!(config.redis_url.as_deref(), Some("redis://cache:6379"));
        assert_eq!(config.public_base_url, "https://fast.example.org");
        assert_eq!(config.brevo.api_key.as_deref(), Some("xkeysib-test"));

        let cli = Cli {
            port: Some(7000),
            redis_url: None,
            session_ttl: Some(60),
        };
        let config = config.apply_cli(&cli);
        assert_eq!(config.port, 7000);
        assert_eq!(config.redis_url.as_deref(), Some("redis://cache:6379"));
        assert_eq!(config.session_ttl_seconds, 60);
    }
}
