// Gateway configuration.
// Layers: serde defaults, then an optional configs/config.{yaml,toml,json}, then FLIGHTGW__* env vars.

use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

use crate::request::VendorEndpoints;
use crate::transport::TransportConfig;

pub const DEFAULT_CONFIG_PATH: &str = "configs/config";
pub const ENV_PREFIX: &str = "FLIGHTGW";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub modules: ModulesConfig,
    pub logger: LoggerConfig,
    pub vendor: VendorConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub addr: String,
    /// Whole-request budget enforced by the timeout layer
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:8080".to_string(),
            request_timeout_secs: 60,
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.addr
            .parse()
            .map_err(|e| ConfigError::Invalid(format!("server.addr `{}`: {}", self.addr, e)))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ModulesConfig {
    pub ratelimit: RateLimitConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enable: bool,
    /// Tokens refilled per second
    pub rate: f64,
    pub burst: u32,
    /// Key clients by `X-Forwarded-For`/`X-Real-IP`; only safe behind a proxy that sets them
    pub trust_forwarded_for: bool,
    /// Idle limiter entries are pruned once this many clients are tracked
    pub max_tracked_clients: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enable: false,
            rate: 10.0,
            burst: 20,
            trust_forwarded_for: false,
            max_tracked_clients: 10_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub enable: bool,
    pub secret: String,
    /// Token lifetime in seconds; zero or negative falls back to one hour
    pub expire: i64,
    pub issuer: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enable: false,
            secret: String::new(),
            expire: 3600,
            issuer: "flight-gateway".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    /// Default directive when RUST_LOG is unset
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VendorConfig {
    pub proxy_url: Option<String>,
    pub timeout_secs: u64,
    /// Fixed device id; a random one is generated per session when unset
    pub device_id: Option<String>,
    pub member_api_url: String,
    pub webview_base_url: String,
    pub captcha_token_url: String,
}

impl Default for VendorConfig {
    fn default() -> Self {
        let endpoints = VendorEndpoints::default();
        Self {
            proxy_url: None,
            timeout_secs: 15,
            device_id: None,
            member_api_url: endpoints.member_api_url,
            webview_base_url: endpoints.webview_base_url,
            captcha_token_url: endpoints.captcha_token_url,
        }
    }
}

impl VendorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            timeout: self.timeout(),
            proxy_url: self.proxy_url.clone().filter(|u| !u.is_empty()),
        }
    }

    pub fn endpoints(&self) -> VendorEndpoints {
        VendorEndpoints {
            member_api_url: self.member_api_url.clone(),
            webview_base_url: self.webview_base_url.clone(),
            captcha_token_url: self.captcha_token_url.clone(),
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// `path` is given without extension; a missing file is not an error.
    pub fn load_from(path: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.socket_addr()?;

        let ratelimit = &self.modules.ratelimit;
        if ratelimit.enable && (ratelimit.rate <= 0.0 || ratelimit.burst == 0) {
            return Err(ConfigError::Invalid(format!(
                "modules.ratelimit: rate and burst must be positive (rate={}, burst={})",
                ratelimit.rate, ratelimit.burst
            )));
        }

        if self.modules.auth.enable && self.modules.auth.secret.is_empty() {
            return Err(ConfigError::Invalid(
                "modules.auth: secret cannot be empty when enabled".to_string(),
            ));
        }

        if self.vendor.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "vendor.timeout_secs must be positive".to_string(),
            ));
        }

        Ok(())
    }
}
