//! Configuration file parser for HookTunnel
//!
//! Supports an optional hooktunnel.yml; command-line flags and environment
//! variables take precedence over anything in the file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Relay server address (`host:port` or URL)
    pub relay: Option<String>,

    /// Local URL deliveries are forwarded to
    pub local_url: Option<String>,

    /// Webhook ID to request; generated by the relay when absent
    pub webhook_id: Option<String>,

    /// Bound on registration and result report calls
    #[serde(default = "default_register_timeout")]
    pub register_timeout_secs: u64,

    /// Bound on each local delivery
    #[serde(default = "default_forward_timeout")]
    pub forward_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relay: None,
            local_url: None,
            webhook_id: None,
            register_timeout_secs: default_register_timeout(),
            forward_timeout_secs: default_forward_timeout(),
        }
    }
}

fn default_register_timeout() -> u64 {
    10
}

fn default_forward_timeout() -> u64 {
    30
}

/// Values supplied on the command line or through the environment
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub relay: Option<String>,
    pub local_url: Option<String>,
    pub webhook_id: Option<String>,
}

/// Fully resolved client settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub relay: String,
    pub local_url: String,
    pub webhook_id: Option<String>,
    pub register_timeout: Duration,
    pub forward_timeout: Duration,
}

impl ClientConfig {
    /// Load configuration from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Search for config file in standard locations
    pub fn find_config() -> Option<PathBuf> {
        let candidates = [
            "hooktunnel.yml",
            "hooktunnel.yaml",
            ".hooktunnel.yml",
            ".hooktunnel.yaml",
        ];

        // Check current directory
        for name in &candidates {
            let path = PathBuf::from(name);
            if path.exists() {
                return Some(path);
            }
        }

        // Check home directory
        if let Some(home) = dirs::home_dir() {
            for name in &candidates {
                let path = home.join(name);
                if path.exists() {
                    return Some(path);
                }
            }
        }

        None
    }
}

impl Settings {
    /// Merge overrides over the file configuration and validate the result
    pub fn resolve(overrides: Overrides, file: Option<ClientConfig>) -> Result<Self> {
        let file = file.unwrap_or_default();
        let present = |v: &String| !v.trim().is_empty();
        let pick = |flag: Option<String>, fallback: Option<String>| {
            flag.filter(present).or(fallback.filter(present))
        };

        let relay = pick(overrides.relay, file.relay)
            .context("Relay server address not set (--relay, RELAY_SERVER_URL or config file)")?;
        let local_url = pick(overrides.local_url, file.local_url)
            .context("Local forward URL not set (--local-url, LOCAL_FORWARD_URL or config file)")?;
        let webhook_id = pick(overrides.webhook_id, file.webhook_id);

        if !local_url.starts_with("http://") && !local_url.starts_with("https://") {
            anyhow::bail!("Local forward URL must be an http(s) URL: {}", local_url);
        }
        if file.register_timeout_secs == 0 || file.forward_timeout_secs == 0 {
            anyhow::bail!("Timeouts must be at least one second");
        }

        Ok(Self {
            relay,
            local_url,
            webhook_id,
            register_timeout: Duration::from_secs(file.register_timeout_secs),
            forward_timeout: Duration::from_secs(file.forward_timeout_secs),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let yaml = r#"
relay: relay.example.com:9090
local_url: http://localhost:3000
webhook_id: github-events
forward_timeout_secs: 5
"#;
        let config: ClientConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.relay.as_deref(), Some("relay.example.com:9090"));
        assert_eq!(config.webhook_id.as_deref(), Some("github-events"));
        assert_eq!(config.register_timeout_secs, 10);
        assert_eq!(config.forward_timeout_secs, 5);
    }

    #[test]
    fn test_overrides_win() {
        let file = ClientConfig {
            relay: Some("file:9090".into()),
            local_url: Some("http://localhost:3000".into()),
            webhook_id: Some("from-file".into()),
            ..Default::default()
        };
        let overrides = Overrides {
            relay: Some("cli:9090".into()),
            webhook_id: Some(String::new()),
            ..Default::default()
        };

        let settings = Settings::resolve(overrides, Some(file)).unwrap();
        assert_eq!(settings.relay, "cli:9090");
        assert_eq!(settings.local_url, "http://localhost:3000");
        // An empty override does not blank out the file value
        assert_eq!(settings.webhook_id.as_deref(), Some("from-file"));
        assert_eq!(settings.register_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_missing_required_values() {
        let only_relay = Overrides {
            relay: Some("localhost:9090".into()),
            ..Default::default()
        };
        assert!(Settings::resolve(only_relay, None).is_err());
        assert!(Settings::resolve(Overrides::default(), None).is_err());
    }

    #[test]
    fn test_local_url_must_be_http() {
        let overrides = Overrides {
            relay: Some("localhost:9090".into()),
            local_url: Some("localhost:3000".into()),
            ..Default::default()
        };
        assert!(Settings::resolve(overrides, None).is_err());
    }
}
