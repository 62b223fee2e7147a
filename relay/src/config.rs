//! Relay configuration from the environment
//!
//! | variable            | default                        |
//! |---------------------|--------------------------------|
//! | `HTTP_PORT`         | 8080                           |
//! | `RELAY_PORT`        | 9090 (`GRPC_PORT` also read)   |
//! | `PUBLIC_URL`        | `http://localhost:<HTTP_PORT>` |
//! | `ANSWER_CHALLENGES` | true                           |
//! | `LINK_BUFFER`       | 100                            |

use anyhow::{bail, Context, Result};
use std::net::SocketAddr;
use std::str::FromStr;

/// Root relay configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Port of the public webhook ingress
    pub http_port: u16,
    /// Port of the relay protocol server clients connect to
    pub relay_port: u16,
    /// Base of the public webhook URLs handed out at registration
    pub public_url: String,
    /// Answer `url_verification` challenges at the ingress
    pub answer_challenges: bool,
    /// Per-session delivery queue capacity
    pub link_buffer: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            relay_port: 9090,
            public_url: "http://localhost:8080".to_string(),
            answer_challenges: true,
            link_buffer: 100,
        }
    }
}

impl RelayConfig {
    /// Load configuration from process environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let http_port = parse_var(&var, "HTTP_PORT")?.unwrap_or(defaults.http_port);
        let relay_port = match parse_var(&var, "RELAY_PORT")? {
            Some(port) => port,
            None => parse_var(&var, "GRPC_PORT")?.unwrap_or(defaults.relay_port),
        };
        let public_url = var("PUBLIC_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(|| format!("http://localhost:{}", http_port));
        let answer_challenges = match var("ANSWER_CHALLENGES") {
            Some(v) => parse_bool(&v).with_context(|| format!("Invalid ANSWER_CHALLENGES: {}", v))?,
            None => defaults.answer_challenges,
        };
        let link_buffer = parse_var(&var, "LINK_BUFFER")?.unwrap_or(defaults.link_buffer);

        let config = Self {
            http_port,
            relay_port,
            public_url,
            answer_challenges,
            link_buffer,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.http_port == self.relay_port && self.http_port != 0 {
            bail!("HTTP_PORT and RELAY_PORT must differ (both {})", self.http_port);
        }
        if self.link_buffer == 0 {
            bail!("LINK_BUFFER must be at least 1");
        }
        if !self.public_url.starts_with("http://") && !self.public_url.starts_with("https://") {
            bail!("PUBLIC_URL must be an http(s) URL: {}", self.public_url);
        }
        Ok(())
    }

    pub fn http_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.http_port))
    }

    pub fn relay_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.relay_port))
    }
}

fn parse_var<T, F>(var: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    var(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("Invalid {}: {}", key, raw))
        })
        .transpose()
}

fn parse_bool(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("expected a boolean, got '{}'", other),
    }
}
