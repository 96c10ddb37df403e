/// Configuration management
use crate::error::{ChatError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_DATA_DIR: &str = ".supportlink";
const DEFAULT_COUNTERPART_ID: &str = "support";

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the chat backend (e.g. https://api.example.com)
    pub backend_url: String,

    /// Identifier of the fixed support counterpart
    pub counterpart_id: String,

    /// User id to seed the session store with on first run
    pub seed_user_id: Option<String>,

    /// Data directory for the durable session store
    pub data_dir: PathBuf,

    /// Polling interval for message sync
    pub poll_interval: Duration,

    /// Per-request HTTP timeout
    pub request_timeout: Duration,

    /// Upper bound on the poll backoff multiplier after consecutive
    /// read failures
    pub max_backoff_factor: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_url: String::new(),
            counterpart_id: DEFAULT_COUNTERPART_ID.to_string(),
            seed_user_id: None,
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            poll_interval: Duration::from_millis(2000),
            request_timeout: Duration::from_secs(10),
            max_backoff_factor: 8,
        }
    }
}

impl Config {
    /// Create config from command line arguments
    pub fn from_args(args: &[String]) -> Result<Self> {
        let mut backend_url: Option<String> = None;
        let mut counterpart_id: Option<String> = None;
        let mut seed_user_id: Option<String> = None;
        let mut data_dir: Option<PathBuf> = None;
        let mut poll_ms: Option<u64> = None;
        let mut timeout_ms: Option<u64> = None;

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--user-id" => {
                    let v = args.get(i + 1).ok_or_else(|| {
                        ChatError::Config("--user-id requires an id argument".to_string())
                    })?;
                    seed_user_id = Some(v.clone());
                    i += 2;
                }
                "--counterpart" => {
                    let v = args.get(i + 1).ok_or_else(|| {
                        ChatError::Config("--counterpart requires an id argument".to_string())
                    })?;
                    counterpart_id = Some(v.clone());
                    i += 2;
                }
                "--data-dir" => {
                    let path = args.get(i + 1).ok_or_else(|| {
                        ChatError::Config("--data-dir requires a path argument".to_string())
                    })?;
                    data_dir = Some(PathBuf::from(path));
                    i += 2;
                }
                "--poll-ms" => {
                    let v = args.get(i + 1).ok_or_else(|| {
                        ChatError::Config("--poll-ms requires a number argument".to_string())
                    })?;
                    poll_ms = Some(v.parse::<u64>().map_err(|_| {
                        ChatError::Config("--poll-ms must be a positive number".to_string())
                    })?);
                    i += 2;
                }
                "--timeout-ms" => {
                    let v = args.get(i + 1).ok_or_else(|| {
                        ChatError::Config("--timeout-ms requires a number argument".to_string())
                    })?;
                    timeout_ms = Some(v.parse::<u64>().map_err(|_| {
                        ChatError::Config("--timeout-ms must be a positive number".to_string())
                    })?);
                    i += 2;
                }
                other if !other.starts_with("--") && backend_url.is_none() => {
                    backend_url = Some(other.to_string());
                    i += 1;
                }
                other => {
                    return Err(ChatError::Config(format!("Unknown argument: {}", other)));
                }
            }
        }

        // Env overrides (nice for scripts)
        if let Ok(url) = std::env::var("SUPPORTLINK_BACKEND_URL") {
            backend_url = Some(url);
        }
        if let Ok(id) = std::env::var("SUPPORTLINK_USER_ID") {
            seed_user_id = Some(id);
        }
        if let Ok(id) = std::env::var("SUPPORTLINK_COUNTERPART_ID") {
            counterpart_id = Some(id);
        }
        if let Ok(dir) = std::env::var("SUPPORTLINK_DATA_DIR") {
            data_dir = Some(PathBuf::from(dir));
        }

        let backend_url = backend_url.ok_or_else(|| {
            ChatError::Config(format!(
                "Usage: {} <backend_url> [--user-id <id>] [--counterpart <id>] [--data-dir <path>] [--poll-ms <n>] [--timeout-ms <n>]",
                args.first().map(|s| s.as_str()).unwrap_or("chat")
            ))
        })?;
        let backend_url = Self::validate_backend_url(&backend_url)?;

        let defaults = Self::default();
        Ok(Self {
            backend_url,
            counterpart_id: counterpart_id.unwrap_or(defaults.counterpart_id),
            seed_user_id,
            data_dir: data_dir.unwrap_or(defaults.data_dir),
            poll_interval: poll_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            request_timeout: timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.request_timeout),
            max_backoff_factor: defaults.max_backoff_factor,
        })
    }

    fn validate_backend_url(url: &str) -> Result<String> {
        let url = url.trim_end_matches('/');
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ChatError::Config(format!(
                "Backend URL must start with http:// or https://, got: {}",
                url
            )));
        }
        Ok(url.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(parts: &[&str]) -> Vec<String> {
        let mut v = vec!["chat".to_string()];
        v.extend(parts.iter().map(|s| s.to_string()));
        v
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.poll_interval, Duration::from_millis(2000));
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(config.max_backoff_factor, 8);
    }

    #[test]
    fn test_from_args_full() {
        let config = Config::from_args(&args(&[
            "https://api.example.com/",
            "--user-id",
            "u1",
            "--counterpart",
            "a1",
            "--data-dir",
            "/tmp/chat",
            "--poll-ms",
            "500",
        ]))
        .unwrap();
        assert_eq!(config.backend_url, "https://api.example.com");
        assert_eq!(config.seed_user_id.as_deref(), Some("u1"));
        assert_eq!(config.counterpart_id, "a1");
        assert_eq!(config.data_dir, PathBuf::from("/tmp/chat"));
        assert_eq!(config.poll_interval, Duration::from_millis(500));
    }

    #[test]
    fn test_from_args_rejects_unknown_flag() {
        let err = Config::from_args(&args(&["http://localhost:1", "--bogus"]));
        assert!(err.is_err());
    }

    #[test]
    fn test_from_args_rejects_bad_scheme() {
        let err = Config::from_args(&args(&["ftp://example.com"]));
        assert!(err.is_err());
    }
}
