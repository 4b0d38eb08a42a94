//! Configuration types and loading.
//!
//! Config is read once at startup from an optional JSON file (e.g. `~/.cligateway/config.json`),
//! then overridden by command-line flags. It is immutable afterwards and shared by all requests.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::exec::{CaptureMode, Whitelist};
use crate::invocation::ArgOptions;

/// Top-level gateway config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Allowed commands. Must not be empty.
    #[serde(default)]
    pub whitelist: Whitelist,

    /// Add dashes (`-a` or `--word`) to flags that do not start with one.
    #[serde(default)]
    pub add_dashes: bool,

    /// Upper-case environment variable names.
    #[serde(default)]
    pub env_key_to_upper: bool,

    /// Response shape (default json).
    #[serde(default)]
    pub response: ResponseFormat,

    /// Listen address (default "localhost:8080").
    #[serde(default = "default_http_addr")]
    pub http: String,

    /// Log full argv and captured output.
    #[serde(default)]
    pub verbose: bool,

    /// Kill a command that runs longer than this. Absent or 0 means no limit.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// `json`: `{"stdout": "...", "stderr": "..."}`; `text`: plain combined output (2>&1).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormat {
    #[default]
    Json,
    Text,
}

impl ResponseFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            ResponseFormat::Json => "json",
            ResponseFormat::Text => "text",
        }
    }

    /// Text responses carry the merged stream; json keeps stdout and stderr apart.
    pub fn capture_mode(self) -> CaptureMode {
        match self {
            ResponseFormat::Json => CaptureMode::Split,
            ResponseFormat::Text => CaptureMode::Combined,
        }
    }
}

impl FromStr for ResponseFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "json" => Ok(ResponseFormat::Json),
            "text" => Ok(ResponseFormat::Text),
            other => Err(format!("unknown response format {:?} (expected text or json)", other)),
        }
    }
}

fn default_http_addr() -> String {
    "localhost:8080".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            whitelist: Whitelist::default(),
            add_dashes: false,
            env_key_to_upper: false,
            response: ResponseFormat::default(),
            http: default_http_addr(),
            verbose: false,
            timeout_secs: None,
        }
    }
}

impl Config {
    /// Refuse to start with nothing to run or nowhere to listen.
    pub fn validate(&self) -> Result<()> {
        if self.whitelist.is_empty() {
            anyhow::bail!("empty command whitelist: nothing to do");
        }
        if self.http.trim().is_empty() {
            anyhow::bail!("empty listen address");
        }
        Ok(())
    }

    pub fn arg_options(&self) -> ArgOptions {
        ArgOptions {
            add_dashes: self.add_dashes,
            env_key_to_upper: self.env_key_to_upper,
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs
            .filter(|s| *s > 0)
            .map(Duration::from_secs)
    }
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("CLIGATEWAY_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".cligateway").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Load config from the given path, CLIGATEWAY_CONFIG_PATH, or the default. Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_listen_address_and_format() {
        let c = Config::default();
        assert_eq!(c.http, "localhost:8080");
        assert_eq!(c.response, ResponseFormat::Json);
        assert!(c.timeout().is_none());
    }

    #[test]
    fn empty_whitelist_fails_validation() {
        let mut c = Config::default();
        assert!(c.validate().is_err());
        c.whitelist = Whitelist::new(["pwd"]);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn parses_camel_case_json() {
        let c: Config = serde_json::from_str(
            r#"{"whitelist": ["ls", "pwd"], "addDashes": true, "envKeyToUpper": true, "response": "text", "timeoutSecs": 5}"#,
        )
        .unwrap();
        assert!(c.whitelist.is_allowed("ls"));
        assert!(c.add_dashes);
        assert!(c.env_key_to_upper);
        assert_eq!(c.response, ResponseFormat::Text);
        assert_eq!(c.http, "localhost:8080");
        assert_eq!(c.timeout(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn zero_timeout_means_no_limit() {
        let c = Config {
            timeout_secs: Some(0),
            ..Config::default()
        };
        assert!(c.timeout().is_none());
    }

    #[test]
    fn response_format_parses_case_insensitively() {
        assert_eq!("TEXT".parse::<ResponseFormat>(), Ok(ResponseFormat::Text));
        assert_eq!("json".parse::<ResponseFormat>(), Ok(ResponseFormat::Json));
        assert!("xml".parse::<ResponseFormat>().is_err());
        assert_eq!(ResponseFormat::Text.capture_mode(), CaptureMode::Combined);
    }

    #[test]
    fn missing_config_file_uses_defaults() {
        let path = std::env::temp_dir().join("cligateway-test-missing").join("config.json");
        let (c, used) = load_config(Some(path.clone())).unwrap();
        assert_eq!(used, path);
        assert!(c.whitelist.is_empty());
    }
}
