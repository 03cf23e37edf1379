//! Custom Axum extractors.
//!
//! ```ignore
//! async fn cancel(
//!     token: BearerToken,
//!     correlation_id: CorrelationId,
//!     Path(reference): Path<String>,
//! ) -> Result<Json<BookingResponse>, AppError> { ... }
//! ```

use crate::error::AppError;
use crate::middleware::{from_extensions, from_headers};
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

/// Correlation ID of the current request.
///
/// Taken from the request extensions when the correlation layer ran, from the
/// `X-Correlation-ID` header otherwise, and minted as a last resort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorrelationId(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for CorrelationId
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = from_extensions(&parts.extensions)
            .or_else(|| from_headers(&parts.headers))
            .unwrap_or_else(Uuid::new_v4);

        Ok(Self(id))
    }
}

/// Token from an `Authorization: Bearer <token>` header.
#[derive(Debug, Clone)]
pub struct BearerToken(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for BearerToken
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| AppError::unauthorized("Missing authorization header"))?;

        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| {
                AppError::unauthorized("Invalid authorization format. Expected 'Bearer <token>'")
            })?
            .trim();

        if token.is_empty() {
            return Err(AppError::unauthorized("Empty bearer token"));
        }

        Ok(Self(token.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::middleware::{CORRELATION_ID_HEADER, Tag};
    use axum::http::{Request, StatusCode, header};

    fn parts(builder: axum::http::request::Builder) -> Parts {
        builder.body(()).expect("valid request").into_parts().0
    }

    #[tokio::test]
    async fn correlation_id_prefers_the_extension() {
        let stored = Uuid::new_v4();
        let mut parts = parts(Request::builder().header(CORRELATION_ID_HEADER, Uuid::new_v4().to_string()));
        parts.extensions.insert(Tag(stored));

        let id = CorrelationId::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(id.0, stored);
    }

    #[tokio::test]
    async fn correlation_id_falls_back_to_the_header() {
        let sent = Uuid::new_v4();
        let mut parts = parts(Request::builder().header(CORRELATION_ID_HEADER, sent.to_string()));

        let id = CorrelationId::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(id.0, sent);
    }

    #[tokio::test]
    async fn correlation_id_is_minted_when_absent() {
        let mut parts = parts(Request::builder());
        let id = CorrelationId::from_request_parts(&mut parts, &()).await.unwrap();
        assert_ne!(id.0, Uuid::nil());
    }

    #[tokio::test]
    async fn bearer_token_is_extracted() {
        let mut parts = parts(Request::builder().header(header::AUTHORIZATION, "Bearer abc.def.ghi"));
        let token = BearerToken::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(token.0, "abc.def.ghi");
    }

    #[tokio::test]
    async fn missing_or_malformed_authorization_is_unauthorized() {
        for builder in [
            Request::builder(),
            Request::builder().header(header::AUTHORIZATION, "Basic dXNlcjpwYXNz"),
            Request::builder().header(header::AUTHORIZATION, "Bearer   "),
        ] {
            let mut parts = parts(builder);
            let err = BearerToken::from_request_parts(&mut parts, &()).await.unwrap_err();
            assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
        }
    }
}
