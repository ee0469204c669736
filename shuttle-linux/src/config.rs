//! Load config from file and environment.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use shuttle_core::RetryPolicy;

/// Daemon configuration. File: ~/.config/shuttle/config.toml or /etc/shuttle/config.toml.
/// Env overrides: SHUTTLE_API_URL, SHUTTLE_LISTEN_PORT, SHUTTLE_RETRY_BASE_MS, SHUTTLE_MAX_ATTEMPTS, SHUTTLE_LOG.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Bus feed base URL; query paths are appended to it.
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// TCP port the peer connects to (default 45680).
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    /// First backoff delay after a failed send.
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    /// Sends per item before a batch gives up. 0 retries forever.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
    /// Fixed-point scale for pattern coordinates.
    #[serde(default = "default_scale")]
    pub scale: f64,
    /// tracing filter directive, e.g. "info" or "shuttle_core=debug".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_api_url() -> String {
    "http://transport.tamu.edu/BusRoutesFeed/api/".to_string()
}
fn default_listen_port() -> u16 {
    45680
}
fn default_retry_base_ms() -> u64 {
    100
}
fn default_max_attempts() -> u32 {
    12
}
fn default_ack_timeout_ms() -> u64 {
    5_000
}
fn default_fetch_timeout_ms() -> u64 {
    10_000
}
fn default_scale() -> f64 {
    shuttle_core::transform::DEFAULT_SCALE
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            listen_port: default_listen_port(),
            retry_base_ms: default_retry_base_ms(),
            max_attempts: default_max_attempts(),
            ack_timeout_ms: default_ack_timeout_ms(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
            scale: default_scale(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    pub fn retry_policy(&self) -> RetryPolicy {
        let max_attempts = (self.max_attempts > 0).then_some(self.max_attempts);
        RetryPolicy::new(Duration::from_millis(self.retry_base_ms), max_attempts)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    /// Apply overrides from a variable lookup. Unparseable values are ignored.
    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(s) = var("SHUTTLE_API_URL") {
            self.api_url = s;
        }
        if let Some(p) = var("SHUTTLE_LISTEN_PORT").and_then(|s| s.parse().ok()) {
            self.listen_port = p;
        }
        if let Some(ms) = var("SHUTTLE_RETRY_BASE_MS").and_then(|s| s.parse().ok()) {
            self.retry_base_ms = ms;
        }
        if let Some(n) = var("SHUTTLE_MAX_ATTEMPTS").and_then(|s| s.parse().ok()) {
            self.max_attempts = n;
        }
        if let Some(s) = var("SHUTTLE_LOG") {
            self.log_level = s;
        }
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> Config {
    let mut c = load_file().unwrap_or_default();
    c.apply_env(|k| std::env::var(k).ok());
    c
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/shuttle/config.toml"));
    }
    out.push(PathBuf::from("/etc/shuttle/config.toml"));
    out
}

fn load_file() -> Option<Config> {
    for p in config_paths() {
        if p.exists() {
            match std::fs::read_to_string(&p) {
                Ok(s) => match toml::from_str::<Config>(&s) {
                    Ok(c) => return Some(c),
                    // Logging is not up yet; config decides the filter.
                    Err(e) => eprintln!("shuttle: ignoring {}: {}", p.display(), e),
                },
                Err(e) => eprintln!("shuttle: cannot read {}: {}", p.display(), e),
            }
            break;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_file_is_all_defaults() {
        let c: Config = toml::from_str("").unwrap();
        assert_eq!(c, Config::default());
    }

    #[test]
    fn file_values_override_defaults() {
        let c: Config = toml::from_str(
            r#"
            api_url = "http://localhost:8080/api/"
            listen_port = 9000
            max_attempts = 0
            "#,
        )
        .unwrap();
        assert_eq!(c.api_url, "http://localhost:8080/api/");
        assert_eq!(c.listen_port, 9000);
        assert_eq!(c.retry_base_ms, 100);
        assert_eq!(c.retry_policy().max_attempts, None);
    }

    #[test]
    fn unknown_keys_rejected() {
        assert!(toml::from_str::<Config>("proxy_port = 3128").is_err());
    }

    #[test]
    fn env_overrides_file() {
        let env: HashMap<&str, &str> = [
            ("SHUTTLE_LISTEN_PORT", "7000"),
            ("SHUTTLE_MAX_ATTEMPTS", "3"),
            ("SHUTTLE_RETRY_BASE_MS", "not-a-number"),
            ("SHUTTLE_LOG", "debug"),
        ]
        .into_iter()
        .collect();
        let mut c = Config::default();
        c.apply_env(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(c.listen_port, 7000);
        assert_eq!(c.retry_base_ms, 100);
        assert_eq!(c.log_level, "debug");
        let policy = c.retry_policy();
        assert_eq!(policy.max_attempts, Some(3));
        assert_eq!(policy.base_delay, Duration::from_millis(100));
    }
}
