//! `PostgreSQL` infrastructure for the flight booking crates.
//!
//! Provides the pieces every Postgres-backed deployment shares regardless of the
//! domain tables it stores:
//!
//! - [`connect`]: pool construction from a [`PoolSettings`]
//! - [`outbox`]: the transactional outbox table, [`outbox::enqueue`] for use inside a
//!   repository transaction and [`PostgresOutbox`] for the relay
//! - [`dead_letters`]: events a consumer gave up on, kept for an operator
//! - [`ensure_schema`]: idempotent creation of the tables above
//!
//! # Example
//!
//! ```no_run
//! use flight_booking_postgres::{connect, ensure_schema, PoolSettings, PostgresOutbox};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = connect(&PoolSettings::new("postgres://localhost/flight_booking")).await?;
//! ensure_schema(&pool).await?;
//! let outbox = PostgresOutbox::new(pool.clone());
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod dead_letters;
pub mod outbox;

pub use dead_letters::{DeadLetter, DeadLetterQueue, DeadLetterStatus};
pub use outbox::PostgresOutbox;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by the Postgres infrastructure.
#[derive(Error, Debug)]
pub enum PostgresError {
    /// A query or connection failed.
    #[error("Database error: {0}")]
    Database(String),

    /// A row held a value this crate does not understand.
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

impl From<sqlx::Error> for PostgresError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(err.to_string())
    }
}

/// Connection pool settings.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    /// Connection URL
    pub url: String,
    /// Maximum number of pooled connections
    pub max_connections: u32,
    /// How long to wait for a connection
    pub connect_timeout: Duration,
}

impl PoolSettings {
    /// Settings with the default pool size (10) and timeout (30 s).
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: 10,
            connect_timeout: Duration::from_secs(30),
        }
    }
}

/// Open a connection pool.
///
/// # Errors
///
/// Returns [`PostgresError::Database`] if the database is unreachable.
pub async fn connect(settings: &PoolSettings) -> Result<PgPool, PostgresError> {
    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .acquire_timeout(settings.connect_timeout)
        .connect(&settings.url)
        .await?;

    tracing::info!(
        max_connections = settings.max_connections,
        "PostgreSQL pool connected"
    );

    Ok(pool)
}

/// Create the `outbox` and `dead_letters` tables if they do not exist yet.
///
/// # Errors
///
/// Returns [`PostgresError::Database`] if a statement fails.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), PostgresError> {
    for statement in outbox::SCHEMA.iter().chain(dead_letters::SCHEMA) {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

/// Cheap connectivity probe for readiness checks.
pub async fn ping(pool: &PgPool) -> bool {
    sqlx::query("SELECT 1").execute(pool).await.is_ok()
}
