//! Transactional outbox backed by the `outbox` table.
//!
//! Repositories call [`enqueue`] on the same connection/transaction that writes the
//! aggregate row, so the event is committed if and only if the state change is.
//! [`PostgresOutbox`] is the relay's view of the table.

use chrono::{DateTime, Utc};
use flight_booking_core::event::{EventMetadata, SerializedEvent};
use flight_booking_core::outbox::{Outbox, OutboxEntry, OutboxError, OutboxFuture};
use sqlx::{PgConnection, PgPool, Row};

/// DDL for the outbox table.
pub(crate) const SCHEMA: &[&str] = &[
    r"
    CREATE TABLE IF NOT EXISTS outbox (
        id BIGSERIAL PRIMARY KEY,
        channel TEXT NOT NULL,
        event_type TEXT NOT NULL,
        payload BYTEA NOT NULL,
        metadata JSONB,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        published_at TIMESTAMPTZ,
        attempts INTEGER NOT NULL DEFAULT 0,
        last_error TEXT
    )
    ",
    "CREATE INDEX IF NOT EXISTS idx_outbox_pending ON outbox(id) WHERE published_at IS NULL",
];

/// Append an event to the outbox inside the caller's transaction.
///
/// # Errors
///
/// Returns the underlying `sqlx::Error` if the insert fails; the caller's
/// transaction should then be rolled back.
pub async fn enqueue(
    conn: &mut PgConnection,
    channel: &str,
    event: &SerializedEvent,
    created_at: DateTime<Utc>,
) -> Result<i64, sqlx::Error> {
    let (id,): (i64,) = sqlx::query_as(
        r"
        INSERT INTO outbox (channel, event_type, payload, metadata, created_at)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id
        ",
    )
    .bind(channel)
    .bind(&event.event_type)
    .bind(&event.data)
    .bind(event.metadata.as_ref().map(EventMetadata::to_json))
    .bind(created_at)
    .fetch_one(&mut *conn)
    .await?;

    Ok(id)
}

/// Relay-side access to the `outbox` table.
#[derive(Clone)]
pub struct PostgresOutbox {
    pool: PgPool,
}

impl PostgresOutbox {
    /// Wrap an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Number of entries not yet published.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError::Storage`] if the query fails.
    pub async fn count_pending(&self) -> Result<i64, OutboxError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM outbox WHERE published_at IS NULL")
                .fetch_one(&self.pool)
                .await
                .map_err(storage)?;
        Ok(count)
    }

    /// Delete published entries older than `before`.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError::Storage`] if the delete fails.
    pub async fn purge_published(&self, before: DateTime<Utc>) -> Result<u64, OutboxError> {
        let result =
            sqlx::query("DELETE FROM outbox WHERE published_at IS NOT NULL AND published_at < $1")
                .bind(before)
                .execute(&self.pool)
                .await
                .map_err(storage)?;
        Ok(result.rows_affected())
    }

    fn row_to_entry(row: &sqlx::postgres::PgRow) -> Result<OutboxEntry, OutboxError> {
        let id: i64 = row.get("id");
        let metadata_json: Option<serde_json::Value> = row.get("metadata");
        let metadata = metadata_json
            .map(|json| EventMetadata::from_json(&json))
            .transpose()
            .map_err(|e| OutboxError::Corrupt {
                id,
                reason: e.to_string(),
            })?;
        let attempts: i32 = row.get("attempts");

        Ok(OutboxEntry {
            id,
            channel: row.get("channel"),
            event: SerializedEvent::new(row.get("event_type"), row.get("payload"), metadata),
            attempts: u32::try_from(attempts).unwrap_or(0),
            created_at: row.get("created_at"),
        })
    }
}

impl Outbox for PostgresOutbox {
    fn pending(&self, limit: usize) -> OutboxFuture<'_, Vec<OutboxEntry>> {
        Box::pin(async move {
            let limit = i64::try_from(limit).unwrap_or(i64::MAX);
            let rows = sqlx::query(
                r"
                SELECT id, channel, event_type, payload, metadata, created_at, attempts
                FROM outbox
                WHERE published_at IS NULL
                ORDER BY id
                LIMIT $1
                ",
            )
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;

            rows.iter().map(Self::row_to_entry).collect()
        })
    }

    fn mark_published(&self, id: i64, at: DateTime<Utc>) -> OutboxFuture<'_, ()> {
        Box::pin(async move {
            sqlx::query("UPDATE outbox SET published_at = $1, last_error = NULL WHERE id = $2")
                .bind(at)
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(storage)?;
            Ok(())
        })
    }

    fn record_failure(&self, id: i64, error: &str) -> OutboxFuture<'_, ()> {
        let error = error.to_string();
        Box::pin(async move {
            sqlx::query("UPDATE outbox SET attempts = attempts + 1, last_error = $1 WHERE id = $2")
                .bind(&error)
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(storage)?;
            Ok(())
        })
    }
}

fn storage(err: sqlx::Error) -> OutboxError {
    OutboxError::Storage(err.to_string())
}
