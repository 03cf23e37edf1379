//! Events a consumer gave up on.
//!
//! A consumer redelivers a failing event until it succeeds or its attempt limit
//! is reached. At the limit the event is parked here, the subscription moves on,
//! and an operator later replays or drops it.

use crate::PostgresError;
use chrono::{DateTime, Utc};
use flight_booking_core::event::{EventMetadata, SerializedEvent};
use sqlx::PgPool;

pub(crate) const SCHEMA: &[&str] = &[
    r"
    CREATE TABLE IF NOT EXISTS dead_letters (
        id BIGSERIAL PRIMARY KEY,
        consumer TEXT NOT NULL,
        event_type TEXT NOT NULL,
        payload BYTEA NOT NULL,
        metadata JSONB,
        error TEXT NOT NULL,
        attempts INTEGER NOT NULL,
        parked_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        status TEXT NOT NULL DEFAULT 'open',
        closed_at TIMESTAMPTZ,
        closed_by TEXT,
        note TEXT
    )
    ",
    "CREATE INDEX IF NOT EXISTS idx_dead_letters_open ON dead_letters(parked_at) WHERE status = 'open'",
];

/// Lifecycle of a parked event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadLetterStatus {
    /// Waiting for an operator
    Open,
    /// Fed back to its consumer
    Replayed,
    /// Given up for good
    Dropped,
}

impl DeadLetterStatus {
    /// Column value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Replayed => "replayed",
            Self::Dropped => "dropped",
        }
    }

    fn from_column(value: &str) -> Result<Self, PostgresError> {
        match value {
            "open" => Ok(Self::Open),
            "replayed" => Ok(Self::Replayed),
            "dropped" => Ok(Self::Dropped),
            other => Err(PostgresError::InvalidData(format!(
                "unknown dead letter status '{other}'"
            ))),
        }
    }
}

/// A parked event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    /// Row id
    pub id: i64,
    /// Consumer that gave up
    pub consumer: String,
    /// The event as received
    pub event: SerializedEvent,
    /// Last handler error
    pub error: String,
    /// Deliveries tried
    pub attempts: u32,
    /// When it was parked
    pub parked_at: DateTime<Utc>,
    /// Current status
    pub status: DeadLetterStatus,
    /// Who replayed or dropped it
    pub closed_by: Option<String>,
    /// Operator note
    pub note: Option<String>,
}

#[derive(sqlx::FromRow)]
struct DeadLetterRow {
    id: i64,
    consumer: String,
    event_type: String,
    payload: Vec<u8>,
    metadata: Option<serde_json::Value>,
    error: String,
    attempts: i32,
    parked_at: DateTime<Utc>,
    status: String,
    closed_by: Option<String>,
    note: Option<String>,
}

impl TryFrom<DeadLetterRow> for DeadLetter {
    type Error = PostgresError;

    fn try_from(row: DeadLetterRow) -> Result<Self, Self::Error> {
        let metadata = row
            .metadata
            .map(|json| EventMetadata::from_json(&json))
            .transpose()
            .map_err(|e| PostgresError::InvalidData(format!("dead letter {}: {e}", row.id)))?;
        Ok(Self {
            id: row.id,
            consumer: row.consumer,
            event: SerializedEvent::new(row.event_type, row.payload, metadata),
            error: row.error,
            attempts: u32::try_from(row.attempts).unwrap_or_default(),
            parked_at: row.parked_at,
            status: DeadLetterStatus::from_column(&row.status)?,
            closed_by: row.closed_by,
            note: row.note,
        })
    }
}

/// Dead letters stored in Postgres.
///
/// ```no_run
/// use flight_booking_postgres::DeadLetterQueue;
///
/// # async fn example(pool: sqlx::PgPool) -> Result<(), Box<dyn std::error::Error>> {
/// let dead_letters = DeadLetterQueue::new(pool);
/// for parked in dead_letters.open(50).await? {
///     println!("#{} {} ({}): {}", parked.id, parked.event.event_type, parked.consumer, parked.error);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct DeadLetterQueue {
    pool: PgPool,
}

impl DeadLetterQueue {
    /// Queue over `pool`; the table comes from [`crate::ensure_schema`].
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Park `event` after `attempts` failed deliveries. Returns the row id.
    ///
    /// # Errors
    ///
    /// Returns [`PostgresError::Database`] if the insert fails.
    pub async fn park(
        &self,
        consumer: &str,
        event: &SerializedEvent,
        error: &str,
        attempts: u32,
    ) -> Result<i64, PostgresError> {
        let (id,): (i64,) = sqlx::query_as(
            r"
            INSERT INTO dead_letters (consumer, event_type, payload, metadata, error, attempts)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            ",
        )
        .bind(consumer)
        .bind(&event.event_type)
        .bind(&event.data)
        .bind(event.metadata.as_ref().map(EventMetadata::to_json))
        .bind(error)
        .bind(i32::try_from(attempts).unwrap_or(i32::MAX))
        .fetch_one(&self.pool)
        .await?;

        metrics::counter!("consumer_dead_lettered_total", "consumer" => consumer.to_string())
            .increment(1);
        tracing::warn!(
            dead_letter_id = id,
            consumer,
            event_type = %event.event_type,
            attempts,
            error,
            "Event parked in dead letters"
        );
        Ok(id)
    }

    /// Open dead letters, oldest first.
    ///
    /// # Errors
    ///
    /// [`PostgresError::Database`] if the query fails,
    /// [`PostgresError::InvalidData`] for an unreadable row.
    pub async fn open(&self, limit: usize) -> Result<Vec<DeadLetter>, PostgresError> {
        let rows: Vec<DeadLetterRow> = sqlx::query_as(
            r"
            SELECT id, consumer, event_type, payload, metadata, error, attempts,
                   parked_at, status, closed_by, note
            FROM dead_letters
            WHERE status = 'open'
            ORDER BY parked_at, id
            LIMIT $1
            ",
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(DeadLetter::try_from).collect()
    }

    /// Number of open dead letters.
    ///
    /// # Errors
    ///
    /// Returns [`PostgresError::Database`] if the query fails.
    pub async fn open_count(&self) -> Result<u64, PostgresError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM dead_letters WHERE status = 'open'")
                .fetch_one(&self.pool)
                .await?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    /// Record that `id` was replayed. `false` if it was not open.
    ///
    /// # Errors
    ///
    /// Returns [`PostgresError::Database`] if the update fails.
    pub async fn mark_replayed(
        &self,
        id: i64,
        by: &str,
        note: Option<&str>,
    ) -> Result<bool, PostgresError> {
        self.close(id, DeadLetterStatus::Replayed, by, note).await
    }

    /// Give up on `id`. `false` if it was not open.
    ///
    /// # Errors
    ///
    /// Returns [`PostgresError::Database`] if the update fails.
    pub async fn drop_letter(&self, id: i64, by: &str, reason: &str) -> Result<bool, PostgresError> {
        self.close(id, DeadLetterStatus::Dropped, by, Some(reason)).await
    }

    async fn close(
        &self,
        id: i64,
        status: DeadLetterStatus,
        by: &str,
        note: Option<&str>,
    ) -> Result<bool, PostgresError> {
        let closed = sqlx::query(
            r"
            UPDATE dead_letters
            SET status = $2, closed_at = now(), closed_by = $3, note = $4
            WHERE id = $1 AND status = 'open'
            ",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(by)
        .bind(note)
        .execute(&self.pool)
        .await?
        .rows_affected()
            == 1;

        if closed {
            tracing::info!(dead_letter_id = id, status = status.as_str(), by, "Dead letter closed");
        }
        Ok(closed)
    }
}
