//! Server configuration.
//!
//! Loaded from a YAML file named by `WICKET_CONFIG` (every field optional),
//! with `WICKET_PORT` overriding the listen port:
//!
//! ```yaml
//! server:
//!   port: 8080
//!   virtual_path: /app
//! site:
//!   physical_path: ./public
//!   directory_listing: true
//! limits:
//!   max_header_bytes: 32768
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::http::parser::{DEFAULT_MAX_HEADER_BYTES, FramerLimits};

pub const CONFIG_ENV: &str = "WICKET_CONFIG";
pub const PORT_ENV: &str = "WICKET_PORT";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub site: SiteConfig,
    pub limits: LimitsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    /// Also listen on `[::]` when the OS supports it.
    pub ipv6: bool,
    pub backlog: i32,
    /// URL prefix the site is mounted under, normalised to `/name`.
    pub virtual_path: String,
    /// Product name sent in the `Server` header.
    pub name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            ipv6: true,
            backlog: 1024,
            virtual_path: "/".to_string(),
            name: "Wicket".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    pub physical_path: PathBuf,
    pub require_authentication: bool,
    pub directory_listing: bool,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            physical_path: PathBuf::from("."),
            require_authentication: false,
            directory_listing: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_header_bytes: usize,
    pub read_buffer_bytes: usize,
    pub first_byte_poll_ms: u64,
    pub first_byte_timeout_secs: u64,
    pub body_idle_timeout_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_header_bytes: DEFAULT_MAX_HEADER_BYTES,
            read_buffer_bytes: 1024,
            first_byte_poll_ms: 100,
            first_byte_timeout_secs: 30,
            body_idle_timeout_secs: 30,
        }
    }
}

impl LimitsConfig {
    pub fn framer_limits(&self) -> FramerLimits {
        FramerLimits {
            max_header_bytes: self.max_header_bytes,
        }
    }

    /// Short wait for the first byte of a request.
    pub fn first_byte_poll(&self) -> Duration {
        Duration::from_millis(self.first_byte_poll_ms)
    }

    /// Long wait for the first byte, after the short one expired.
    pub fn first_byte_timeout(&self) -> Duration {
        Duration::from_secs(self.first_byte_timeout_secs)
    }

    pub fn body_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.body_idle_timeout_secs)
    }
}

impl Config {
    /// Loads the configuration from the environment.
    pub fn load() -> anyhow::Result<Self> {
        let mut cfg = match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default().normalized()?,
        };

        if let Ok(port) = std::env::var(PORT_ENV) {
            cfg.server.port = port
                .parse()
                .with_context(|| format!("{PORT_ENV} is not a valid port: {port}"))?;
        }

        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_yaml_str(&text)
            .with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn from_yaml_str(text: &str) -> anyhow::Result<Self> {
        let cfg: Config = if text.trim().is_empty() {
            Config::default()
        } else {
            serde_yaml::from_str(text)?
        };
        cfg.normalized()
    }

    fn normalized(mut self) -> anyhow::Result<Self> {
        let trimmed = self.server.virtual_path.trim().trim_matches('/');
        self.server.virtual_path = format!("/{trimmed}");
        if self.limits.read_buffer_bytes == 0 {
            self.limits.read_buffer_bytes = LimitsConfig::default().read_buffer_bytes;
        }
        self.site.physical_path = std::path::absolute(&self.site.physical_path).with_context(|| {
            format!(
                "cannot resolve site root {}",
                self.site.physical_path.display()
            )
        })?;
        Ok(self)
    }
}
