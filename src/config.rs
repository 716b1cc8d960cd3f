//! Configuration module for netium-transport
//!
//! JSON file listing the local listeners and the upstream forwarders, each as
//! a transport URL:
//!
//! ```json
//! {
//!   "log": { "level": "info" },
//!   "listen": ["tls://:8443?cert=server.crt&key=server.key,tcp://"],
//!   "forward": ["tcp://10.0.0.1:8080"],
//!   "strategy": { "maxFailures": 3 }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};
use crate::selector::DEFAULT_MAX_FAILURES;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log configuration
    #[serde(default)]
    pub log: LogConfig,

    /// Server chains to listen on
    #[serde(default)]
    pub listen: Vec<String>,

    /// Forwarders; each entry may be a comma separated dialer chain
    #[serde(default)]
    pub forward: Vec<String>,

    /// Upstream selection tuning
    #[serde(default)]
    pub strategy: StrategyConfig,
}

impl Config {
    /// Load configuration from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(&path.display().to_string(), format!("failed to read config file: {}", e))
        })?;
        Self::from_json(&content)
    }

    /// Parse configuration from JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::config("<json>", format!("failed to parse config: {}", e)))
    }

    /// Pretty-printed JSON, as written by `--gen-config`
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| Error::config("<json>", format!("failed to serialize config: {}", e)))
    }

    /// TLS front relaying to a single plain TCP upstream
    pub fn example() -> Self {
        Config {
            log: LogConfig::default(),
            listen: vec!["tls://:8443?cert=server.crt&key=server.key".to_string()],
            forward: vec!["tcp://127.0.0.1:8080".to_string()],
            strategy: StrategyConfig::default(),
        }
    }
}

/// Log configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyConfig {
    /// Consecutive failures before a forwarder is skipped
    #[serde(default = "default_max_failures")]
    pub max_failures: u32,
}

fn default_max_failures() -> u32 {
    DEFAULT_MAX_FAILURES
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            max_failures: default_max_failures(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::from_json("{}").unwrap();
        assert_eq!(config.log.level, "info");
        assert!(config.listen.is_empty());
        assert_eq!(config.strategy.max_failures, DEFAULT_MAX_FAILURES);
    }

    #[test]
    fn test_parse_full() {
        let config = Config::from_json(
            r#"{
                "log": {"level": "debug"},
                "listen": ["tcp://:1080", "tls://:8443?cert=a&key=b,tcp://"],
                "forward": ["tcp://10.0.0.1:8080,tls://example.com"],
                "strategy": {"maxFailures": 5}
            }"#,
        )
        .unwrap();
        assert_eq!(config.log.level, "debug");
        assert_eq!(config.listen.len(), 2);
        assert_eq!(config.forward[0], "tcp://10.0.0.1:8080,tls://example.com");
        assert_eq!(config.strategy.max_failures, 5);
    }

    #[test]
    fn test_example_serialization() {
        let config = Config::example();
        let json = config.to_json().unwrap();
        assert!(json.contains("maxFailures"));
        let parsed = Config::from_json(&json).unwrap();
        assert_eq!(parsed.listen, config.listen);
    }

    #[test]
    fn test_load() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"forward": ["tcp://127.0.0.1:9"]}}"#).unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.forward, vec!["tcp://127.0.0.1:9".to_string()]);

        assert!(matches!(
            Config::load("/nonexistent/config.json"),
            Err(Error::ConfigParse { .. })
        ));
        assert!(Config::from_json("{\"listen\": 1}").is_err());
    }
}
