//! `PostgreSQL` repositories.
//!
//! Each aggregate is stored as a JSONB document next to the columns the
//! queries filter on. `flights.available_seats` is the authoritative seat
//! count: it only changes through conditional `UPDATE`s, and the document's
//! copy is overwritten with it on load.
//!
//! Writes that raise events run in one transaction with
//! [`flight_booking_postgres::outbox::enqueue`].

use super::{
    AirportRepository, BookingRepository, FlightRepository, PassengerRepository, Repositories,
    RepositoryError, Result, StoreHealth, UserRepository,
};
use crate::aggregates::{Airport, Flight, FlightBooking, Passenger, User};
use crate::dispatch::channel_for;
use crate::types::{
    AirportCode, BookingReference, BookingStatus, FlightId, FlightStatus, PassengerId, UserId,
    UserRole,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use flight_booking_core::event::SerializedEvent;
use flight_booking_postgres::{PostgresOutbox, outbox};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::types::JsonValue;
use sqlx::{PgConnection, PgPool};
use std::sync::Arc;

/// DDL for the domain tables.
const SCHEMA: &[&str] = &[
    r"
    CREATE TABLE IF NOT EXISTS airports (
        code CHAR(3) PRIMARY KEY,
        is_active BOOLEAN NOT NULL,
        data JSONB NOT NULL
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS flights (
        id UUID PRIMARY KEY,
        flight_number TEXT NOT NULL,
        departure_airport CHAR(3) NOT NULL,
        arrival_airport CHAR(3) NOT NULL,
        departure_date DATE NOT NULL,
        departure_time TIMESTAMPTZ NOT NULL,
        arrival_time TIMESTAMPTZ NOT NULL,
        status TEXT NOT NULL,
        total_seats INTEGER NOT NULL CHECK (total_seats > 0),
        available_seats INTEGER NOT NULL
            CHECK (available_seats >= 0 AND available_seats <= total_seats),
        data JSONB NOT NULL,
        UNIQUE (flight_number, departure_date)
    )
    ",
    "CREATE INDEX IF NOT EXISTS idx_flights_route ON flights(departure_airport, arrival_airport, departure_date)",
    r"
    CREATE TABLE IF NOT EXISTS passengers (
        id UUID PRIMARY KEY,
        passport_number TEXT NOT NULL UNIQUE,
        email TEXT NOT NULL UNIQUE,
        first_name TEXT NOT NULL,
        last_name TEXT NOT NULL,
        data JSONB NOT NULL
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS bookings (
        id UUID PRIMARY KEY,
        reference CHAR(6) NOT NULL UNIQUE,
        flight_id UUID NOT NULL REFERENCES flights(id),
        passenger_id UUID NOT NULL REFERENCES passengers(id),
        seats INTEGER NOT NULL CHECK (seats > 0),
        status TEXT NOT NULL,
        booked_at TIMESTAMPTZ NOT NULL,
        version BIGINT NOT NULL DEFAULT 0,
        data JSONB NOT NULL
    )
    ",
    "ALTER TABLE bookings ADD COLUMN IF NOT EXISTS version BIGINT NOT NULL DEFAULT 0",
    "CREATE INDEX IF NOT EXISTS idx_bookings_flight ON bookings(flight_id)",
    "CREATE INDEX IF NOT EXISTS idx_bookings_passenger ON bookings(passenger_id)",
    r"
    CREATE TABLE IF NOT EXISTS users (
        id UUID PRIMARY KEY,
        username TEXT NOT NULL UNIQUE,
        email TEXT NOT NULL UNIQUE,
        role TEXT NOT NULL,
        data JSONB NOT NULL
    )
    ",
];

/// Create the domain tables if they do not exist yet.
///
/// # Errors
///
/// Returns [`RepositoryError::Database`] if a statement fails.
pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

fn to_json<T: Serialize>(value: &T) -> Result<JsonValue> {
    serde_json::to_value(value).map_err(|e| RepositoryError::InvalidData(e.to_string()))
}

fn from_json<T: DeserializeOwned>(value: JsonValue) -> Result<T> {
    serde_json::from_value(value).map_err(|e| RepositoryError::InvalidData(e.to_string()))
}

fn to_i32(value: u32) -> Result<i32> {
    i32::try_from(value).map_err(|_| RepositoryError::InvalidData(format!("{value} out of range")))
}

fn seats_from_row(value: i32) -> Result<u32> {
    u32::try_from(value).map_err(|_| RepositoryError::InvalidData(format!("negative seat count {value}")))
}

async fn enqueue_all(conn: &mut PgConnection, events: &[SerializedEvent]) -> Result<()> {
    for event in events {
        let created_at = event
            .metadata
            .as_ref()
            .and_then(|m| m.occurred_at)
            .unwrap_or_else(Utc::now);
        outbox::enqueue(conn, channel_for(&event.event_type), event, created_at).await?;
    }
    Ok(())
}

/// Every repository over one connection pool.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Wrap an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// All repositories backed by this pool, with the relay reading the
    /// `outbox` table.
    #[must_use]
    pub fn repositories(&self) -> Repositories {
        let store = Arc::new(self.clone());
        Repositories {
            airports: store.clone(),
            flights: store.clone(),
            passengers: store.clone(),
            bookings: store.clone(),
            users: store.clone(),
            outbox: Arc::new(PostgresOutbox::new(self.pool.clone())),
            health: store,
        }
    }
}

fn flight_from_row((data, available): (JsonValue, i32)) -> Result<Flight> {
    let mut flight: Flight = from_json(data)?;
    flight.available_seats = seats_from_row(available)?;
    Ok(flight)
}

#[async_trait]
impl AirportRepository for PostgresStore {
    async fn get(&self, code: &AirportCode) -> Result<Option<Airport>> {
        let row: Option<(JsonValue,)> = sqlx::query_as("SELECT data FROM airports WHERE code = $1")
            .bind(code.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|(data,)| from_json(data)).transpose()
    }

    async fn list_active(&self) -> Result<Vec<Airport>> {
        let rows: Vec<(JsonValue,)> =
            sqlx::query_as("SELECT data FROM airports WHERE is_active ORDER BY code")
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(|(data,)| from_json(data)).collect()
    }

    async fn insert(&self, airport: &Airport) -> Result<()> {
        sqlx::query("INSERT INTO airports (code, is_active, data) VALUES ($1, $2, $3)")
            .bind(airport.code().as_str())
            .bind(airport.is_active())
            .bind(to_json(airport)?)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update(&self, airport: &Airport) -> Result<()> {
        let result = sqlx::query("UPDATE airports SET is_active = $2, data = $3 WHERE code = $1")
            .bind(airport.code().as_str())
            .bind(airport.is_active())
            .bind(to_json(airport)?)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound {
                resource: "Airport",
                id: airport.code().to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl FlightRepository for PostgresStore {
    async fn get(&self, id: FlightId) -> Result<Option<Flight>> {
        let row: Option<(JsonValue, i32)> =
            sqlx::query_as("SELECT data, available_seats FROM flights WHERE id = $1")
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await?;
        row.map(flight_from_row).transpose()
    }

    async fn insert(&self, flight: &Flight, events: &[SerializedEvent]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r"
            INSERT INTO flights (id, flight_number, departure_airport, arrival_airport,
                                 departure_date, departure_time, arrival_time, status,
                                 total_seats, available_seats, data)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ",
        )
        .bind(flight.id().as_uuid())
        .bind(flight.flight_number())
        .bind(flight.departure_airport().as_str())
        .bind(flight.arrival_airport().as_str())
        .bind(flight.departure_time().date_naive())
        .bind(flight.departure_time())
        .bind(flight.arrival_time())
        .bind(flight.status().as_db_str())
        .bind(to_i32(flight.total_seats())?)
        .bind(to_i32(flight.available_seats())?)
        .bind(to_json(flight)?)
        .execute(&mut *tx)
        .await?;
        enqueue_all(&mut *tx, events).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn update_details(&self, flight: &Flight, events: &[SerializedEvent]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            r"
            UPDATE flights
            SET departure_date = $2, departure_time = $3, arrival_time = $4,
                status = $5, data = $6
            WHERE id = $1
            ",
        )
        .bind(flight.id().as_uuid())
        .bind(flight.departure_time().date_naive())
        .bind(flight.departure_time())
        .bind(flight.arrival_time())
        .bind(flight.status().as_db_str())
        .bind(to_json(flight)?)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound {
                resource: "Flight",
                id: flight.id().to_string(),
            });
        }
        enqueue_all(&mut *tx, events).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn exists_on_date(&self, flight_number: &str, date: NaiveDate) -> Result<bool> {
        let (exists,): (bool,) = sqlx::query_as(
            "SELECT EXISTS(SELECT 1 FROM flights WHERE upper(flight_number) = upper($1) AND departure_date = $2)",
        )
        .bind(flight_number)
        .bind(date)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn search(
        &self,
        from: &AirportCode,
        to: &AirportCode,
        date: NaiveDate,
        seats: u32,
    ) -> Result<Vec<Flight>> {
        let rows: Vec<(JsonValue, i32)> = sqlx::query_as(
            r"
            SELECT data, available_seats FROM flights
            WHERE departure_airport = $1 AND arrival_airport = $2
              AND departure_date = $3 AND status = $4 AND available_seats >= $5
            ORDER BY departure_time
            ",
        )
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(date)
        .bind(FlightStatus::Scheduled.as_db_str())
        .bind(to_i32(seats)?)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(flight_from_row).collect()
    }

    async fn reserve_seats(&self, id: FlightId, seats: u32, now: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r"
            UPDATE flights
            SET available_seats = available_seats - $2,
                data = jsonb_set(data, '{updated_at}', to_jsonb($4::timestamptz))
            WHERE id = $1 AND status = $3 AND available_seats >= $2
            ",
        )
        .bind(id.as_uuid())
        .bind(to_i32(seats)?)
        .bind(FlightStatus::Scheduled.as_db_str())
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn release_seats(&self, id: FlightId, seats: u32, now: DateTime<Utc>) -> Result<()> {
        release_seats_on(&mut *self.pool.acquire().await?, id, seats, now).await
    }

    async fn delete_arrived_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let expired: Vec<(uuid::Uuid,)> = sqlx::query_as(
            r"
            SELECT f.id FROM flights f
            WHERE f.arrival_time < $1
              AND NOT EXISTS (
                  SELECT 1 FROM bookings b WHERE b.flight_id = f.id AND b.status <> $2
              )
            FOR UPDATE
            ",
        )
        .bind(cutoff)
        .bind(BookingStatus::Cancelled.as_db_str())
        .fetch_all(&mut *tx)
        .await?;
        let ids: Vec<uuid::Uuid> = expired.into_iter().map(|(id,)| id).collect();
        if ids.is_empty() {
            return Ok(0);
        }

        sqlx::query("DELETE FROM bookings WHERE flight_id = ANY($1)")
            .bind(&ids)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM flights WHERE id = ANY($1)")
            .bind(&ids)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected())
    }
}

async fn release_seats_on(
    conn: &mut PgConnection,
    id: FlightId,
    seats: u32,
    now: DateTime<Utc>,
) -> Result<()> {
    let result = sqlx::query(
        r"
        UPDATE flights
        SET available_seats = LEAST(available_seats + $2, total_seats),
            data = jsonb_set(data, '{updated_at}', to_jsonb($3::timestamptz))
        WHERE id = $1
        ",
    )
    .bind(id.as_uuid())
    .bind(to_i32(seats)?)
    .bind(now)
    .execute(&mut *conn)
    .await?;
    if result.rows_affected() == 0 {
        return Err(RepositoryError::NotFound {
            resource: "Flight",
            id: id.to_string(),
        });
    }
    Ok(())
}

#[async_trait]
impl PassengerRepository for PostgresStore {
    async fn get(&self, id: PassengerId) -> Result<Option<Passenger>> {
        let row: Option<(JsonValue,)> = sqlx::query_as("SELECT data FROM passengers WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|(data,)| from_json(data)).transpose()
    }

    async fn find_by_passport(&self, passport_number: &str) -> Result<Option<Passenger>> {
        let row: Option<(JsonValue,)> =
            sqlx::query_as("SELECT data FROM passengers WHERE passport_number = upper(trim($1))")
                .bind(passport_number)
                .fetch_optional(&self.pool)
                .await?;
        row.map(|(data,)| from_json(data)).transpose()
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Passenger>> {
        let row: Option<(JsonValue,)> =
            sqlx::query_as("SELECT data FROM passengers WHERE email = lower(trim($1))")
                .bind(email)
                .fetch_optional(&self.pool)
                .await?;
        row.map(|(data,)| from_json(data)).transpose()
    }

    async fn search_by_name(&self, query: &str) -> Result<Vec<Passenger>> {
        let pattern = format!("%{}%", query.trim().replace('%', "\\%").replace('_', "\\_"));
        let rows: Vec<(JsonValue,)> = sqlx::query_as(
            r"
            SELECT data FROM passengers
            WHERE first_name ILIKE $1 OR last_name ILIKE $1
            ORDER BY last_name, first_name
            ",
        )
        .bind(pattern)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(|(data,)| from_json(data)).collect()
    }

    async fn insert(&self, passenger: &Passenger, events: &[SerializedEvent]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r"
            INSERT INTO passengers (id, passport_number, email, first_name, last_name, data)
            VALUES ($1, $2, $3, $4, $5, $6)
            ",
        )
        .bind(passenger.id().as_uuid())
        .bind(passenger.passport_number())
        .bind(passenger.email())
        .bind(passenger.first_name())
        .bind(passenger.last_name())
        .bind(to_json(passenger)?)
        .execute(&mut *tx)
        .await?;
        enqueue_all(&mut *tx, events).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn update(&self, passenger: &Passenger, events: &[SerializedEvent]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            r"
            UPDATE passengers
            SET passport_number = $2, email = $3, first_name = $4, last_name = $5, data = $6
            WHERE id = $1
            ",
        )
        .bind(passenger.id().as_uuid())
        .bind(passenger.passport_number())
        .bind(passenger.email())
        .bind(passenger.first_name())
        .bind(passenger.last_name())
        .bind(to_json(passenger)?)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound {
                resource: "Passenger",
                id: passenger.id().to_string(),
            });
        }
        enqueue_all(&mut *tx, events).await?;
        tx.commit().await?;
        Ok(())
    }
}

fn to_i64(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| RepositoryError::InvalidData(format!("{value} out of range")))
}

/// Write `booking` only if the row still holds the version it was loaded at.
async fn update_booking_row(conn: &mut PgConnection, booking: &FlightBooking) -> Result<()> {
    let saved = booking.next_version();
    let result = sqlx::query(
        "UPDATE bookings SET status = $2, data = $3, version = $4 WHERE reference = $1 AND version = $5",
    )
    .bind(booking.reference().as_str())
    .bind(saved.status().as_db_str())
    .bind(to_json(&saved)?)
    .bind(to_i64(saved.version())?)
    .bind(to_i64(booking.version())?)
    .execute(&mut *conn)
    .await?;
    if result.rows_affected() > 0 {
        return Ok(());
    }

    let (exists,): (bool,) =
        sqlx::query_as("SELECT EXISTS(SELECT 1 FROM bookings WHERE reference = $1)")
            .bind(booking.reference().as_str())
            .fetch_one(&mut *conn)
            .await?;
    let id = booking.reference().to_string();
    if exists {
        Err(RepositoryError::Stale { resource: "Booking", id })
    } else {
        Err(RepositoryError::NotFound { resource: "Booking", id })
    }
}

#[async_trait]
impl BookingRepository for PostgresStore {
    async fn get_by_reference(
        &self,
        reference: &BookingReference,
    ) -> Result<Option<FlightBooking>> {
        let row: Option<(JsonValue,)> =
            sqlx::query_as("SELECT data FROM bookings WHERE reference = $1")
                .bind(reference.as_str())
                .fetch_optional(&self.pool)
                .await?;
        row.map(|(data,)| from_json(data)).transpose()
    }

    async fn reference_exists(&self, reference: &BookingReference) -> Result<bool> {
        let (exists,): (bool,) =
            sqlx::query_as("SELECT EXISTS(SELECT 1 FROM bookings WHERE reference = $1)")
                .bind(reference.as_str())
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn list_for_passenger(&self, passenger_id: PassengerId) -> Result<Vec<FlightBooking>> {
        let rows: Vec<(JsonValue,)> = sqlx::query_as(
            "SELECT data FROM bookings WHERE passenger_id = $1 ORDER BY booked_at DESC",
        )
        .bind(passenger_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(|(data,)| from_json(data)).collect()
    }

    async fn list_for_flight(&self, flight_id: FlightId) -> Result<Vec<FlightBooking>> {
        let rows: Vec<(JsonValue,)> =
            sqlx::query_as("SELECT data FROM bookings WHERE flight_id = $1 ORDER BY booked_at DESC")
                .bind(flight_id.as_uuid())
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(|(data,)| from_json(data)).collect()
    }

    async fn active_seats_for_flight(&self, flight_id: FlightId) -> Result<u32> {
        let (seats,): (i64,) = sqlx::query_as(
            "SELECT COALESCE(SUM(seats), 0)::BIGINT FROM bookings WHERE flight_id = $1 AND status <> $2",
        )
        .bind(flight_id.as_uuid())
        .bind(BookingStatus::Cancelled.as_db_str())
        .fetch_one(&self.pool)
        .await?;
        u32::try_from(seats).map_err(|_| RepositoryError::InvalidData(format!("seat sum {seats}")))
    }

    async fn insert(&self, booking: &FlightBooking, events: &[SerializedEvent]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r"
            INSERT INTO bookings (id, reference, flight_id, passenger_id, seats, status, booked_at, data)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ",
        )
        .bind(booking.id().as_uuid())
        .bind(booking.reference().as_str())
        .bind(booking.flight_id().as_uuid())
        .bind(booking.passenger_id().as_uuid())
        .bind(to_i32(booking.seats())?)
        .bind(booking.status().as_db_str())
        .bind(booking.booked_at())
        .bind(to_json(booking)?)
        .execute(&mut *tx)
        .await?;
        enqueue_all(&mut *tx, events).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn update(&self, booking: &FlightBooking, events: &[SerializedEvent]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        update_booking_row(&mut *tx, booking).await?;
        enqueue_all(&mut *tx, events).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn save_cancellation(
        &self,
        booking: &FlightBooking,
        events: &[SerializedEvent],
    ) -> Result<()> {
        let now = booking.cancelled_at().unwrap_or_else(Utc::now);
        let mut tx = self.pool.begin().await?;
        update_booking_row(&mut *tx, booking).await?;
        release_seats_on(&mut *tx, booking.flight_id(), booking.seats(), now).await?;
        enqueue_all(&mut *tx, events).await?;
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl UserRepository for PostgresStore {
    async fn get(&self, id: UserId) -> Result<Option<User>> {
        let row: Option<(JsonValue,)> = sqlx::query_as("SELECT data FROM users WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|(data,)| from_json(data)).transpose()
    }

    async fn find_by_login(&self, login: &str) -> Result<Option<User>> {
        let row: Option<(JsonValue,)> = sqlx::query_as(
            "SELECT data FROM users WHERE username = trim($1) OR email = lower(trim($1)) LIMIT 1",
        )
        .bind(login)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|(data,)| from_json(data)).transpose()
    }

    async fn any_admin(&self) -> Result<bool> {
        let (exists,): (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM users WHERE role = $1)")
            .bind(UserRole::Admin.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn insert(&self, user: &User) -> Result<()> {
        sqlx::query("INSERT INTO users (id, username, email, role, data) VALUES ($1, $2, $3, $4, $5)")
            .bind(user.id().as_uuid())
            .bind(user.username())
            .bind(user.email())
            .bind(user.role().as_str())
            .bind(to_json(user)?)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update(&self, user: &User) -> Result<()> {
        let result = sqlx::query("UPDATE users SET email = $2, role = $3, data = $4 WHERE id = $1")
            .bind(user.id().as_uuid())
            .bind(user.email())
            .bind(user.role().as_str())
            .bind(to_json(user)?)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound {
                resource: "User",
                id: user.id().to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl StoreHealth for PostgresStore {
    async fn is_healthy(&self) -> bool {
        flight_booking_postgres::ping(&self.pool).await
    }
}
