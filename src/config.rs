//! Configuration management for Gatekeeper.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::admission::{
    Policies, Policy, SweepSettings, ANONYMOUS_LIMIT, ANONYMOUS_WINDOW, AUTHENTICATED_LIMIT,
    AUTHENTICATED_WINDOW, DEFAULT_STALE_THRESHOLD, DEFAULT_SWEEP_INTERVAL,
};
use crate::error::{GatekeeperError, Result};

/// Raw environment variables, keyed by name.
pub type EnvVars = config::Map<String, String>;

/// Prefix for environment variable overrides, e.g.
/// `GATEKEEPER_RATE_LIMITING__ANONYMOUS__LIMIT=20`.
pub const ENV_PREFIX: &str = "GATEKEEPER";

/// Main configuration for the Gatekeeper service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GatekeeperConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Header carrying a user id set by a trusted upstream auth gateway
    #[serde(default)]
    pub user_id_header: Option<String>,

    /// Take the anonymous caller address from `X-Forwarded-For`
    #[serde(default)]
    pub trust_forwarded_for: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            user_id_header: None,
            trust_forwarded_for: false,
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

/// A `limit` per `window_secs` pair as written in configuration.
///
/// Either field may be left out; the caller class's default fills the gap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Requests allowed per window
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    /// Window length in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_secs: Option<u64>,
}

impl PolicyConfig {
    fn to_policy(self, class: &str, fallback: Policy) -> Result<Policy> {
        let limit = self.limit.unwrap_or(fallback.limit());
        let window = self
            .window_secs
            .map(Duration::from_secs)
            .unwrap_or(fallback.window());

        Policy::new(limit, window).map_err(|e| {
            GatekeeperError::Config(format!("rate_limiting.{}: {}", class, e))
        })
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Policy for callers with a resolved user id
    #[serde(default = "default_authenticated_policy")]
    pub authenticated: PolicyConfig,

    /// Policy for callers known only by address
    #[serde(default = "default_anonymous_policy")]
    pub anonymous: PolicyConfig,

    /// How often stale entries are swept, in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Age after which an untouched entry is removed, in seconds
    #[serde(default = "default_stale_threshold")]
    pub stale_threshold_secs: u64,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            authenticated: default_authenticated_policy(),
            anonymous: default_anonymous_policy(),
            sweep_interval_secs: default_sweep_interval(),
            stale_threshold_secs: default_stale_threshold(),
        }
    }
}

fn default_authenticated_policy() -> PolicyConfig {
    PolicyConfig {
        limit: Some(AUTHENTICATED_LIMIT),
        window_secs: Some(AUTHENTICATED_WINDOW.as_secs()),
    }
}

fn default_anonymous_policy() -> PolicyConfig {
    PolicyConfig {
        limit: Some(ANONYMOUS_LIMIT),
        window_secs: Some(ANONYMOUS_WINDOW.as_secs()),
    }
}

fn default_sweep_interval() -> u64 {
    DEFAULT_SWEEP_INTERVAL.as_secs()
}

fn default_stale_threshold() -> u64 {
    DEFAULT_STALE_THRESHOLD.as_secs()
}

impl RateLimitingConfig {
    /// Build the runtime policies, rejecting zero limits or windows.
    pub fn policies(&self) -> Result<Policies> {
        Ok(Policies::new(
            self.authenticated
                .to_policy("authenticated", Policy::authenticated_default())?,
            self.anonymous
                .to_policy("anonymous", Policy::anonymous_default())?,
        ))
    }

    /// Build the sweep loop settings.
    pub fn sweep_settings(&self) -> Result<SweepSettings> {
        if self.sweep_interval_secs == 0 {
            return Err(GatekeeperError::Config(
                "rate_limiting.sweep_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.stale_threshold_secs == 0 {
            return Err(GatekeeperError::Config(
                "rate_limiting.stale_threshold_secs must be greater than zero".to_string(),
            ));
        }

        Ok(SweepSettings {
            interval: Duration::from_secs(self.sweep_interval_secs),
            stale_threshold: Duration::from_secs(self.stale_threshold_secs),
        })
    }
}

impl GatekeeperConfig {
    /// Load configuration from defaults, an optional YAML file, and
    /// `GATEKEEPER_` environment variables, in increasing precedence.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, None)
    }

    /// Like [`GatekeeperConfig::load`], reading overrides from `env` instead
    /// of the process environment when given.
    pub fn load_with_env(path: Option<&Path>, env: Option<EnvVars>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(
                File::from(path)
                    .format(FileFormat::Yaml)
                    .required(true),
            );
        }

        let config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .source(env),
            )
            .build()?
            .try_deserialize::<GatekeeperConfig>()?;

        Ok(config)
    }

    /// Load configuration from a file path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| GatekeeperError::Config(format!("Failed to parse configuration: {}", e)))
    }

    /// Check every setting that can only be wrong at startup.
    pub fn validate(&self) -> Result<(Policies, SweepSettings)> {
        let policies = self.rate_limiting.policies()?;
        let sweep = self.rate_limiting.sweep_settings()?;

        // Sweeping an entry mid-window would hand its caller a fresh quota
        let longest_window = policies
            .authenticated
            .window()
            .max(policies.anonymous.window());
        if sweep.stale_threshold < longest_window {
            return Err(GatekeeperError::Config(format!(
                "rate_limiting.stale_threshold_secs ({}) must be at least the longest policy window ({})",
                sweep.stale_threshold.as_secs(),
                longest_window.as_secs()
            )));
        }

        if let Some(header) = &self.server.user_id_header {
            axum::http::HeaderName::try_from(header.as_str()).map_err(|e| {
                GatekeeperError::Config(format!(
                    "server.user_id_header {:?} is not a valid header name: {}",
                    header, e
                ))
            })?;
        }

        Ok((policies, sweep))
    }
}
