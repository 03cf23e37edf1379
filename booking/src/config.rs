//! Configuration for the flight booking server.
//!
//! Loaded from environment variables (and a `.env` file, read by the binary)
//! with defaults for everything except the JWT secret. Optional URLs switch
//! the backends: without `DATABASE_URL` the in-memory store is used, without
//! `REDPANDA_BROKERS` the in-process bus, without `REDIS_URL` the in-memory
//! cache, lock and rate limiter.

use crate::auth::{JwtSettings, LoginRateLimit};
use crate::runtime::RedeliveryPolicy;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

const MIN_JWT_SECRET_LEN: usize = 32;

/// Invalid or missing configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required variable is not set.
    #[error("Missing required environment variable {0}")]
    Missing(&'static str),

    /// A variable is set to something unusable.
    #[error("Invalid value for {var}: {reason}")]
    Invalid {
        /// Variable name
        var: &'static str,
        /// What is wrong with it
        reason: String,
    },
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server
    pub server: ServerConfig,
    /// `PostgreSQL` store
    pub postgres: PostgresConfig,
    /// Redpanda event bus
    pub redpanda: RedpandaConfig,
    /// Redis cache, lock and rate limiter
    pub redis: RedisConfig,
    /// Tokens and bootstrap admin
    pub auth: AuthConfig,
    /// Event consumers
    pub consumer: ConsumerConfig,
    /// Outbox relay
    pub outbox: OutboxConfig,
    /// Flight retention sweep
    pub retention: RetentionConfig,
    /// Login rate limit
    pub rate_limit: RateLimitConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to bind to
    pub port: u16,
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout: u64,
}

/// `PostgreSQL` configuration
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// Connection URL; `None` selects the in-memory store
    pub url: Option<String>,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Connection timeout in seconds
    pub connect_timeout: u64,
}

/// Redpanda configuration
#[derive(Debug, Clone)]
pub struct RedpandaConfig {
    /// Broker addresses (comma-separated); `None` selects the in-process bus
    pub brokers: Option<String>,
    /// Consumer group
    pub consumer_group: String,
}

/// Redis configuration
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Connection URL; `None` selects the in-memory implementations
    pub url: Option<String>,
}

/// Authentication configuration
#[derive(Clone)]
pub struct AuthConfig {
    /// HMAC secret for access tokens
    pub jwt_secret: String,
    /// `iss` claim
    pub jwt_issuer: String,
    /// `aud` claim
    pub jwt_audience: String,
    /// Token lifetime in minutes
    pub jwt_expiration_minutes: u32,
    /// Bootstrap admin, seeded when no admin exists
    pub admin: Option<AdminAccount>,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("jwt_secret", &"<redacted>")
            .field("jwt_issuer", &self.jwt_issuer)
            .field("jwt_audience", &self.jwt_audience)
            .field("jwt_expiration_minutes", &self.jwt_expiration_minutes)
            .field("admin", &self.admin.as_ref().map(|a| &a.username))
            .finish()
    }
}

impl AuthConfig {
    /// Token settings for [`crate::auth::JwtIssuer`].
    #[must_use]
    pub fn jwt_settings(&self) -> JwtSettings {
        JwtSettings {
            secret: self.jwt_secret.clone(),
            issuer: self.jwt_issuer.clone(),
            audience: self.jwt_audience.clone(),
            expiration: chrono::Duration::minutes(i64::from(self.jwt_expiration_minutes)),
        }
    }
}

/// Credentials of the bootstrap admin.
#[derive(Clone)]
pub struct AdminAccount {
    /// Username
    pub username: String,
    /// Password
    pub password: String,
    /// Email
    pub email: String,
}

/// Consumer configuration
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Wait before resubscribing, in seconds
    pub retry_delay_secs: u64,
    /// Attempts before dead-lettering; 0 redelivers forever
    pub max_attempts: u32,
    /// Pause between redeliveries in milliseconds
    pub redelivery_delay_ms: u64,
}

impl ConsumerConfig {
    /// Redelivery policy for [`crate::runtime::EventConsumer`].
    #[must_use]
    pub const fn redelivery(&self) -> RedeliveryPolicy {
        RedeliveryPolicy {
            max_attempts: self.max_attempts,
            delay: Duration::from_millis(self.redelivery_delay_ms),
        }
    }
}

/// Outbox relay configuration
#[derive(Debug, Clone)]
pub struct OutboxConfig {
    /// Poll interval in milliseconds
    pub poll_interval_ms: u64,
    /// Entries per pass
    pub batch_size: usize,
}

/// Retention sweep configuration
#[derive(Debug, Clone)]
pub struct RetentionConfig {
    /// Days arrived flights are kept; 0 disables the sweep
    pub flight_retention_days: u32,
    /// Seconds between sweeps
    pub sweep_interval_secs: u64,
}

/// Login rate limit configuration
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Attempts per window
    pub login_limit: u32,
    /// Window length in seconds
    pub login_window_secs: u64,
}

impl RateLimitConfig {
    /// Rate limit for [`crate::auth::AuthService`].
    #[must_use]
    pub const fn login(&self) -> LoginRateLimit {
        LoginRateLimit {
            limit: self.login_limit,
            window: Duration::from_secs(self.login_window_secs),
        }
    }
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `JWT_SECRET` is missing or too short, or the
    /// bootstrap admin is only partly configured.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration from any variable source.
    ///
    /// # Errors
    ///
    /// See [`Config::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let optional = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let jwt_secret = optional("JWT_SECRET").ok_or(ConfigError::Missing("JWT_SECRET"))?;
        if jwt_secret.len() < MIN_JWT_SECRET_LEN {
            return Err(ConfigError::Invalid {
                var: "JWT_SECRET",
                reason: format!("must be at least {MIN_JWT_SECRET_LEN} characters"),
            });
        }

        let admin = match (
            optional("ADMIN_USERNAME"),
            optional("ADMIN_PASSWORD"),
            optional("ADMIN_EMAIL"),
        ) {
            (Some(username), Some(password), Some(email)) => Some(AdminAccount {
                username,
                password,
                email,
            }),
            (None, None, None) => None,
            _ => {
                return Err(ConfigError::Invalid {
                    var: "ADMIN_USERNAME",
                    reason: "ADMIN_USERNAME, ADMIN_PASSWORD and ADMIN_EMAIL must be set together"
                        .to_string(),
                });
            }
        };

        Ok(Self {
            server: ServerConfig {
                host: optional("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                port: parse_or(&lookup, "PORT", 8080),
                shutdown_timeout: parse_or(&lookup, "SHUTDOWN_TIMEOUT", 30),
            },
            postgres: PostgresConfig {
                url: optional("DATABASE_URL"),
                max_connections: parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", 10),
                connect_timeout: parse_or(&lookup, "DATABASE_CONNECT_TIMEOUT", 30),
            },
            redpanda: RedpandaConfig {
                brokers: optional("REDPANDA_BROKERS"),
                consumer_group: optional("REDPANDA_CONSUMER_GROUP")
                    .unwrap_or_else(|| "flight-booking".to_string()),
            },
            redis: RedisConfig {
                url: optional("REDIS_URL"),
            },
            auth: AuthConfig {
                jwt_secret,
                jwt_issuer: optional("JWT_ISSUER").unwrap_or_else(|| "flight-booking".to_string()),
                jwt_audience: optional("JWT_AUDIENCE")
                    .unwrap_or_else(|| "flight-booking-api".to_string()),
                jwt_expiration_minutes: parse_or(&lookup, "JWT_EXPIRATION_MINUTES", 60),
                admin,
            },
            consumer: ConsumerConfig {
                retry_delay_secs: parse_or(&lookup, "CONSUMER_RETRY_DELAY_SECS", 5),
                max_attempts: parse_or(&lookup, "CONSUMER_MAX_ATTEMPTS", 0),
                redelivery_delay_ms: parse_or(&lookup, "CONSUMER_REDELIVERY_DELAY_MS", 0),
            },
            outbox: OutboxConfig {
                poll_interval_ms: parse_or(&lookup, "OUTBOX_POLL_INTERVAL_MS", 500),
                batch_size: parse_or(&lookup, "OUTBOX_BATCH_SIZE", 100),
            },
            retention: RetentionConfig {
                flight_retention_days: parse_or(&lookup, "FLIGHT_RETENTION_DAYS", 0),
                sweep_interval_secs: parse_or(&lookup, "RETENTION_SWEEP_INTERVAL_SECS", 3600),
            },
            rate_limit: RateLimitConfig {
                login_limit: parse_or(&lookup, "LOGIN_RATE_LIMIT", 10),
                login_window_secs: parse_or(&lookup, "LOGIN_RATE_WINDOW_SECS", 60),
            },
        })
    }

    /// Address the HTTP server binds to.
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn parse_or<T: FromStr>(lookup: impl Fn(&str) -> Option<String>, name: &str, default: T) -> T {
    lookup(name)
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}
