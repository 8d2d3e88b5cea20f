// Optional router plugins: per-IP rate limiting and JWT bearer authentication.
// Each plugin validates its config at construction and registers nothing when disabled.

use axum::{
    extract::{Request, State},
    http::header,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    Router,
};
use chrono::Utc;
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use jsonwebtoken::{decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::api::ApiError;
use crate::config::{AuthConfig, RateLimitConfig};
use crate::middleware::{client_ip, peer_ip};

pub const DEFAULT_TOKEN_TTL_SECS: i64 = 3600;

/// Paths reachable without a token.
pub const PUBLIC_PATHS: [&str; 2] = ["/health", "/api/v1/ping"];

#[derive(Error, Debug)]
pub enum PluginError {
    #[error("{plugin} plugin init failed: {reason}")]
    Init { plugin: &'static str, reason: String },

    #[error("{0} plugin is disabled")]
    Disabled(&'static str),

    #[error("Token signing failed: {0}")]
    Token(String),
}

pub trait Plugin: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn enabled(&self) -> bool;

    fn register(self: Arc<Self>, router: Router) -> Router;
}

/// Registers every enabled plugin; later plugins wrap earlier ones.
pub fn attach_plugins(mut router: Router, plugins: Vec<Arc<dyn Plugin>>) -> Router {
    for plugin in plugins {
        if plugin.enabled() {
            info!(plugin = plugin.name(), "registering plugin middleware");
            router = plugin.register(router);
        } else {
            info!(plugin = plugin.name(), "plugin disabled by config");
        }
    }
    router
}

pub struct RateLimitPlugin {
    limiter: Option<DefaultKeyedRateLimiter<IpAddr>>,
    trust_forwarded_for: bool,
    max_tracked: usize,
    // tracked-client count that triggers the next prune
    prune_at: AtomicUsize,
}

impl RateLimitPlugin {
    pub fn new(config: &RateLimitConfig) -> Result<Self, PluginError> {
        let max_tracked = config.max_tracked_clients.max(1);
        if !config.enable {
            return Ok(Self {
                limiter: None,
                trust_forwarded_for: config.trust_forwarded_for,
                max_tracked,
                prune_at: AtomicUsize::new(max_tracked),
            });
        }

        let invalid = |reason: String| PluginError::Init {
            plugin: "ratelimit",
            reason,
        };
        if config.rate.is_nan() || config.rate <= 0.0 || config.rate.is_infinite() {
            return Err(invalid(format!("rate must be positive, got {}", config.rate)));
        }
        let burst = NonZeroU32::new(config.burst)
            .ok_or_else(|| invalid("burst must be positive".to_string()))?;
        let period = Duration::try_from_secs_f64(1.0 / config.rate)
            .map_err(|e| invalid(format!("rate {} out of range: {}", config.rate, e)))?;
        let quota = Quota::with_period(period)
            .ok_or_else(|| invalid(format!("rate {} is too high", config.rate)))?
            .allow_burst(burst);

        info!(
            rate = config.rate,
            burst = config.burst,
            trust_forwarded_for = config.trust_forwarded_for,
            max_tracked_clients = max_tracked,
            "ratelimit plugin initialized"
        );
        Ok(Self {
            limiter: Some(RateLimiter::keyed(quota)),
            trust_forwarded_for: config.trust_forwarded_for,
            max_tracked,
            prune_at: AtomicUsize::new(max_tracked),
        })
    }

    /// Requests without a known client address are let through.
    pub fn check(&self, ip: Option<IpAddr>) -> bool {
        let (Some(limiter), Some(ip)) = (self.limiter.as_ref(), ip) else {
            if self.limiter.is_some() {
                warn!("could not determine client IP, allowing request");
            }
            return true;
        };

        let allowed = limiter.check_key(&ip).is_ok();
        if limiter.len() >= self.prune_at.load(Ordering::Relaxed) {
            self.prune();
        }
        allowed
    }

    /// Drops limiter state for clients whose bucket has fully refilled.
    pub fn prune(&self) {
        let Some(limiter) = self.limiter.as_ref() else {
            return;
        };
        let before = limiter.len();
        limiter.retain_recent();
        limiter.shrink_to_fit();
        let after = limiter.len();

        // clients still active stay tracked; back off so every check does not rescan
        let next = self.max_tracked.max(after.saturating_mul(2));
        self.prune_at.store(next, Ordering::Relaxed);
        debug!(before, after, next_prune_at = next, "pruned idle rate limit entries");
    }

    pub fn tracked_clients(&self) -> usize {
        self.limiter.as_ref().map_or(0, |l| l.len())
    }

    /// Address the limit is keyed on.
    pub fn client_key(&self, request: &Request) -> Option<IpAddr> {
        if self.trust_forwarded_for {
            client_ip(request)
        } else {
            peer_ip(request)
        }
    }
}

impl Plugin for RateLimitPlugin {
    fn name(&self) -> &'static str {
        "ratelimit"
    }

    fn enabled(&self) -> bool {
        self.limiter.is_some()
    }

    fn register(self: Arc<Self>, router: Router) -> Router {
        router.layer(middleware::from_fn_with_state(self, rate_limit_middleware))
    }
}

async fn rate_limit_middleware(
    State(plugin): State<Arc<RateLimitPlugin>>,
    request: Request,
    next: Next,
) -> Response {
    let ip = plugin.client_key(&request);
    if plugin.check(ip) {
        return next.run(request).await;
    }
    warn!(ip = ?ip, "too many requests");
    ApiError::RateLimited.into_response()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthClaims {
    pub user_id: i64,
    pub username: String,
    pub exp: i64,
    pub iat: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub iss: String,
}

struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

pub struct AuthPlugin {
    keys: Option<JwtKeys>,
    ttl_secs: i64,
    issuer: String,
}

impl AuthPlugin {
    pub fn new(config: &AuthConfig) -> Result<Self, PluginError> {
        if !config.enable {
            return Ok(Self {
                keys: None,
                ttl_secs: DEFAULT_TOKEN_TTL_SECS,
                issuer: config.issuer.clone(),
            });
        }

        if config.secret.is_empty() {
            return Err(PluginError::Init {
                plugin: "auth",
                reason: "JWT secret cannot be empty when enabled".to_string(),
            });
        }

        let ttl_secs = if config.expire <= 0 {
            warn!(expire = config.expire, "token lifetime not set, using one hour");
            DEFAULT_TOKEN_TTL_SECS
        } else {
            config.expire
        };

        let mut validation = Validation::new(Algorithm::HS256);
        if config.issuer.is_empty() {
            warn!("JWT issuer is not set, issuer will not be checked");
        } else {
            validation.set_issuer(&[config.issuer.as_str()]);
        }

        info!(expire_secs = ttl_secs, issuer = %config.issuer, "auth plugin initialized");
        Ok(Self {
            keys: Some(JwtKeys {
                encoding: EncodingKey::from_secret(config.secret.as_bytes()),
                decoding: DecodingKey::from_secret(config.secret.as_bytes()),
                validation,
            }),
            ttl_secs,
            issuer: config.issuer.clone(),
        })
    }

    pub fn ttl_secs(&self) -> i64 {
        self.ttl_secs
    }

    pub fn generate_token(&self, user_id: i64, username: &str) -> Result<String, PluginError> {
        let keys = self.keys.as_ref().ok_or(PluginError::Disabled("auth"))?;
        let now = Utc::now().timestamp();
        let claims = AuthClaims {
            user_id,
            username: username.to_string(),
            exp: now + self.ttl_secs,
            iat: now,
            iss: self.issuer.clone(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &keys.encoding)
            .map_err(|e| PluginError::Token(e.to_string()))
    }

    pub fn verify(&self, token: &str) -> Result<AuthClaims, ApiError> {
        let keys = self
            .keys
            .as_ref()
            .ok_or_else(|| ApiError::Unauthorized("authentication is disabled".to_string()))?;

        decode::<AuthClaims>(token, &keys.decoding, &keys.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                warn!(error = %e, "token rejected");
                let reason = match e.kind() {
                    ErrorKind::ExpiredSignature => "token has expired",
                    ErrorKind::InvalidSignature => "invalid token signature",
                    ErrorKind::ImmatureSignature => "token is not valid yet",
                    ErrorKind::InvalidToken | ErrorKind::Base64(_) | ErrorKind::Json(_) => {
                        "malformed token"
                    }
                    ErrorKind::InvalidIssuer => "unexpected token issuer",
                    _ => "invalid token",
                };
                ApiError::Unauthorized(reason.to_string())
            })
    }

    /// Token part of a `Bearer <token>` header value.
    pub fn extract_bearer(header_value: &str) -> Result<&str, ApiError> {
        header_value
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ApiError::Unauthorized("malformed Authorization header".to_string()))
    }
}

impl Plugin for AuthPlugin {
    fn name(&self) -> &'static str {
        "auth"
    }

    fn enabled(&self) -> bool {
        self.keys.is_some()
    }

    fn register(self: Arc<Self>, router: Router) -> Router {
        router.layer(middleware::from_fn_with_state(self, auth_middleware))
    }
}

async fn auth_middleware(
    State(plugin): State<Arc<AuthPlugin>>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if PUBLIC_PATHS.contains(&request.uri().path()) {
        return Ok(next.run(request).await);
    }

    let header_value = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized("missing Authorization header".to_string()))?;

    let token = AuthPlugin::extract_bearer(header_value)?;
    let claims = plugin.verify(token)?;
    debug!(user_id = claims.user_id, username = %claims.username, "token accepted");

    request.extensions_mut().insert(claims);
    Ok(next.run(request).await)
}
