//! Request correlation.
//!
//! [`correlation_id_layer`] tags each request with a UUID before it reaches a
//! handler. A valid `X-Correlation-ID` sent by the client is kept and anything
//! else is replaced. The handler runs inside an `http_request` span carrying
//! the ID, and the response repeats it so a client can quote it later.
//!
//! Booking services put the ID into the metadata of every event the request
//! raises, which lets a consumer log line be matched with the HTTP call.

use axum::{
    extract::Request,
    http::{Extensions, HeaderMap, HeaderValue},
    response::Response,
};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::Instrument;
use uuid::Uuid;

/// Header carrying the correlation ID in both directions.
pub const CORRELATION_ID_HEADER: &str = "X-Correlation-ID";

/// Install correlation tagging on a router.
#[must_use]
pub fn correlation_id_layer() -> CorrelationIdLayer {
    CorrelationIdLayer
}

/// [`Layer`] returned by [`correlation_id_layer`].
#[derive(Clone, Copy, Debug, Default)]
pub struct CorrelationIdLayer;

impl<S> Layer<S> for CorrelationIdLayer {
    type Service = Correlated<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Correlated { inner }
    }
}

/// Wraps an inner service so every request it sees carries a correlation ID.
#[derive(Clone, Debug)]
pub struct Correlated<S> {
    inner: S,
}

/// The ID stored in the request extensions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Tag(pub(crate) Uuid);

impl<S> Service<Request> for Correlated<S>
where
    S: Service<Request, Response = Response> + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Response, S::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        let id = from_headers(req.headers()).unwrap_or_else(Uuid::new_v4);
        req.extensions_mut().insert(Tag(id));

        let span = tracing::info_span!(
            "http_request",
            correlation_id = %id,
            method = %req.method(),
            path = %req.uri().path(),
        );
        let pending = self.inner.call(req).instrument(span);

        Box::pin(async move {
            let mut response = pending.await?;
            echo(response.headers_mut(), id);
            Ok(response)
        })
    }
}

/// The client's correlation ID, if it sent a usable one.
pub(crate) fn from_headers(headers: &HeaderMap) -> Option<Uuid> {
    let raw = headers.get(CORRELATION_ID_HEADER)?.to_str().ok()?;
    Uuid::parse_str(raw.trim()).ok()
}

pub(crate) fn from_extensions(extensions: &Extensions) -> Option<Uuid> {
    extensions.get::<Tag>().map(|tag| tag.0)
}

fn echo(headers: &mut HeaderMap, id: Uuid) {
    // A hyphenated UUID is always a valid header value.
    if let Ok(value) = HeaderValue::from_str(&id.hyphenated().to_string()) {
        headers.insert(CORRELATION_ID_HEADER, value);
    }
}

/// Access to the correlation ID from a raw [`Request`].
pub trait CorrelationIdExt {
    /// `None` when [`correlation_id_layer`] is not installed.
    fn correlation_id(&self) -> Option<Uuid>;
}

impl CorrelationIdExt for Request {
    fn correlation_id(&self) -> Option<Uuid> {
        from_extensions(self.extensions())
    }
}
