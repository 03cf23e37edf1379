//! HTTP API tests driving the router in-process over the in-memory store.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode, header};
use flight_booking::auth::{JwtSettings, LoginRateLimit};
use flight_booking::infra::{InMemoryCache, InMemoryRateLimiter};
use flight_booking::repository::memory::InMemoryStore;
use flight_booking::server::{AppState, build_router};
use flight_booking::UserRole;
use flight_booking_testing::{InMemoryEventBus, test_clock};
use serde_json::{Value, json};
use std::sync::Arc;
use chrono::Duration;
use tower::ServiceExt;

const ADMIN: (&str, &str) = ("admin", "admin-password");
const AGENT: (&str, &str) = ("agent", "agent-password");

struct TestApp {
    router: Router,
    state: AppState,
}

async fn app() -> TestApp {
    let store = InMemoryStore::new();
    let state = AppState::new(
        &store.repositories(),
        Arc::new(InMemoryEventBus::new()),
        Arc::new(InMemoryCache::new()),
        Arc::new(InMemoryRateLimiter::new()),
        JwtSettings {
            secret: "api-test-secret-api-test-secret-0000".to_string(),
            issuer: "flight-booking".to_string(),
            audience: "flight-booking-api".to_string(),
            expiration: Duration::seconds(3600),
        },
        LoginRateLimit::default(),
        Arc::new(test_clock()),
    );
    state
        .auth
        .ensure_admin(ADMIN.0, "admin@example.com", ADMIN.1)
        .await
        .expect("admin seeded");
    state
        .auth
        .register_user(AGENT.0, "agent@example.com", "Booking Agent", AGENT.1, UserRole::User)
        .await
        .expect("agent registered");

    TestApp {
        router: build_router(state.clone()),
        state,
    }
}

impl TestApp {
    async fn send(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("request builds");

        let response = self.router.clone().oneshot(request).await.expect("router responds");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body is readable");
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    async fn login(&self, (username, password): (&str, &str)) -> String {
        let (status, body) = self
            .send(
                Method::POST,
                "/api/auth/login",
                None,
                Some(json!({ "username": username, "password": password })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        body["access_token"].as_str().expect("token issued").to_string()
    }

    /// Airports CAN and PEK plus one flight between them; returns the flight id.
    async fn seed_flight(&self, admin: &str, total_seats: u32) -> String {
        for (code, name, city) in [
            ("CAN", "Baiyun International", "Guangzhou"),
            ("PEK", "Capital International", "Beijing"),
        ] {
            let (status, body) = self
                .send(
                    Method::POST,
                    "/api/admin/airports",
                    Some(admin),
                    Some(json!({
                        "code": code,
                        "name": name,
                        "city": city,
                        "country": "China",
                        "timezone": "Asia/Shanghai"
                    })),
                )
                .await;
            assert_eq!(status, StatusCode::CREATED, "{body}");
        }

        let (status, body) = self
            .send(
                Method::POST,
                "/api/admin/flights",
                Some(admin),
                Some(json!({
                    "flight_number": "CZ3101",
                    "airline_code": "CZ",
                    "airline_name": "China Southern",
                    "departure_airport": "CAN",
                    "departure_time": "2025-01-15T08:00:00Z",
                    "departure_terminal": "T2",
                    "arrival_airport": "PEK",
                    "arrival_time": "2025-01-15T11:10:00Z",
                    "aircraft_type": "A330",
                    "total_seats": total_seats,
                    "base_price": 1280.50
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        assert_eq!(body["duration_minutes"], 190);
        body["id"].as_str().expect("flight id").to_string()
    }
}

fn booking_body(flight_id: &str, passport: &str, seats: u32) -> Value {
    json!({
        "flight_id": flight_id,
        "seats": seats,
        "cabin_class": "Economy",
        "passenger": {
            "first_name": "Mei",
            "last_name": "Chen",
            "date_of_birth": "1992-07-21T00:00:00Z",
            "gender": "Female",
            "passport_number": passport,
            "passport_country": "CN",
            "passport_expiry": "2031-07-01T00:00:00Z",
            "nationality": "Chinese",
            "email": format!("{}@example.com", passport.to_lowercase()),
            "phone": "+86 137 0000 0000"
        }
    })
}

#[tokio::test]
async fn health_is_public_and_ready_reports_components() {
    let app = app().await;

    let (status, _) = app.send(Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app.send(Method::GET, "/ready", None, None).await;
    assert_eq!(status, StatusCode::OK, "{body}");

    let (status, _) = app.send(Method::GET, "/metrics", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn login_rejects_bad_credentials() {
    let app = app().await;

    let (status, body) = app
        .send(
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({ "username": "admin", "password": "wrong-password" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["code"].is_string());
}

#[tokio::test]
async fn admin_routes_need_an_admin_token() {
    let app = app().await;
    let agent = app.login(AGENT).await;
    let airport = json!({
        "code": "SZX",
        "name": "Bao'an International",
        "city": "Shenzhen",
        "country": "China",
        "timezone": "Asia/Shanghai"
    });

    let (status, _) = app
        .send(Method::POST, "/api/admin/airports", None, Some(airport.clone()))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .send(Method::POST, "/api/admin/airports", Some("not-a-jwt"), Some(airport.clone()))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app
        .send(Method::POST, "/api/admin/airports", Some(&agent), Some(airport))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn search_book_pay_and_check_in() {
    let app = app().await;
    let admin = app.login(ADMIN).await;
    let agent = app.login(AGENT).await;
    let flight_id = app.seed_flight(&admin, 4).await;

    let (status, airports) = app.send(Method::GET, "/api/airports", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(airports.as_array().map(Vec::len), Some(2));

    let (status, flights) = app
        .send(
            Method::GET,
            "/api/flights/search?from=can&to=pek&date=2025-01-15&passengers=2",
            None,
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(flights[0]["id"], flight_id.as_str());

    let (status, created) = app
        .send(
            Method::POST,
            "/api/bookings",
            Some(&agent),
            Some(booking_body(&flight_id, "E20000001", 2)),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{created}");
    assert_eq!(created["passenger_registered"], true);
    assert_eq!(created["booking"]["status"], "Pending");
    assert_eq!(created["booking"]["total_amount"], 2561.0);
    let reference = created["booking"]["reference"].as_str().unwrap().to_string();

    let (status, flight) = app
        .send(Method::GET, &format!("/api/flights/{flight_id}"), None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(flight["available_seats"], 2);

    let base = format!("/api/bookings/{reference}");
    let (status, _) = app
        .send(Method::POST, &format!("{base}/confirm"), Some(&agent), None)
        .await;
    assert_eq!(status, StatusCode::OK);

    // Check-in needs payment first.
    let (status, body) = app
        .send(Method::POST, &format!("{base}/check-in"), Some(&agent), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT, "{body}");

    let (status, paid) = app
        .send(
            Method::POST,
            &format!("{base}/pay"),
            Some(&agent),
            Some(json!({ "payment_reference": "TXN-0001" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(paid["payment_status"], "Paid");

    let (status, checked_in) = app
        .send(Method::POST, &format!("{base}/check-in"), Some(&agent), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(checked_in["status"], "CheckedIn");

    let (status, _) = app
        .send(Method::POST, &format!("{base}/cancel"), Some(&agent), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, bookings) = app
        .send(Method::GET, &format!("/api/flights/{flight_id}/bookings"), Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(bookings.as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn capacity_and_validation_errors() {
    let app = app().await;
    let admin = app.login(ADMIN).await;
    let agent = app.login(AGENT).await;
    let flight_id = app.seed_flight(&admin, 2).await;

    let (status, body) = app
        .send(
            Method::POST,
            "/api/bookings",
            Some(&agent),
            Some(booking_body(&flight_id, "E30000001", 3)),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "CAPACITY_EXCEEDED");

    let (status, body) = app
        .send(
            Method::POST,
            "/api/bookings",
            Some(&agent),
            Some(booking_body(&flight_id, "E30000002", 0)),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "VALIDATION_ERROR");

    let unknown = uuid::Uuid::new_v4().to_string();
    let (status, _) = app
        .send(
            Method::POST,
            "/api/bookings",
            Some(&agent),
            Some(booking_body(&unknown, "E30000003", 1)),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .send(Method::GET, "/api/bookings/ZZZZZZ", Some(&agent), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .send(Method::GET, "/api/bookings/ZZZZZZ", None, None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn cancelled_booking_frees_seats_and_flight_cancellation_blocks_booking() {
    let app = app().await;
    let admin = app.login(ADMIN).await;
    let agent = app.login(AGENT).await;
    let flight_id = app.seed_flight(&admin, 1).await;

    let (_, created) = app
        .send(
            Method::POST,
            "/api/bookings",
            Some(&agent),
            Some(booking_body(&flight_id, "E40000001", 1)),
        )
        .await;
    let reference = created["booking"]["reference"].as_str().unwrap().to_string();

    let (status, cancelled) = app
        .send(
            Method::POST,
            &format!("/api/bookings/{reference}/cancel"),
            Some(&agent),
            Some(json!({ "reason": "Meeting moved" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["cancellation_reason"], "Meeting moved");

    let (_, flight) = app
        .send(Method::GET, &format!("/api/flights/{flight_id}"), None, None)
        .await;
    assert_eq!(flight["available_seats"], 1);

    let (status, _) = app
        .send(
            Method::PUT,
            &format!("/api/admin/flights/{flight_id}/status"),
            Some(&admin),
            Some(json!({ "status": "Cancelled", "reason": "Weather" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .send(
            Method::POST,
            "/api/bookings",
            Some(&agent),
            Some(booking_body(&flight_id, "E40000002", 1)),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT, "{body}");
}

#[tokio::test]
async fn passenger_lookup_is_admin_only() {
    let app = app().await;
    let admin = app.login(ADMIN).await;
    let agent = app.login(AGENT).await;
    let flight_id = app.seed_flight(&admin, 3).await;

    let (_, created) = app
        .send(
            Method::POST,
            "/api/bookings",
            Some(&agent),
            Some(booking_body(&flight_id, "E50000001", 1)),
        )
        .await;
    let passenger_id = created["booking"]["passenger_id"].as_str().unwrap().to_string();

    let (status, _) = app
        .send(Method::GET, "/api/passengers?passport=e50000001", Some(&agent), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, found) = app
        .send(Method::GET, "/api/passengers?passport=e50000001", Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(found[0]["id"], passenger_id.as_str());

    let (status, _) = app
        .send(Method::GET, "/api/passengers", Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, bookings) = app
        .send(
            Method::GET,
            &format!("/api/passengers/{passenger_id}/bookings"),
            Some(&agent),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(bookings.as_array().map(Vec::len), Some(1));

    // The state is shared with the router.
    let passenger = app
        .state
        .passengers
        .find_by_email("e50000001@example.com")
        .await
        .unwrap();
    assert!(passenger.is_some());
}
