//! HTTP server: application state, router and the readiness and metrics
//! endpoints.

pub mod health;
pub mod routes;
pub mod state;

pub use routes::build_router;
pub use state::AppState;
