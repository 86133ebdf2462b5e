//! Caller identity extractors
//!
//! Authentication happens upstream; the gateway forwards the authenticated
//! identity as a UUID header. Handlers take [`OwnerId`] or [`ReviewerId`]
//! as an argument and a missing or malformed header is rejected with 401.

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

use crate::error::ApiError;

pub const OWNER_HEADER: &str = "x-owner-id";
pub const REVIEWER_HEADER: &str = "x-reviewer-id";

/// Submitting party
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnerId(pub Uuid);

/// Human reviewer issuing manual verification decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReviewerId(pub Uuid);

fn header_uuid(parts: &Parts, header: &str) -> Result<Uuid, ApiError> {
    let value = parts
        .headers
        .get(header)
        .ok_or_else(|| ApiError::Unauthorized(format!("Missing {} header", header)))?;

    value
        .to_str()
        .ok()
        .and_then(|v| Uuid::parse_str(v.trim()).ok())
        .ok_or_else(|| ApiError::Unauthorized(format!("Invalid {} header", header)))
}

#[async_trait]
impl<S> FromRequestParts<S> for OwnerId
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        header_uuid(parts, OWNER_HEADER).map(OwnerId)
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for ReviewerId
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        header_uuid(parts, REVIEWER_HEADER).map(ReviewerId)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn owner_from(header: Option<&str>) -> Result<OwnerId, ApiError> {
        let mut builder = Request::builder().uri("/");
        if let Some(value) = header {
            builder = builder.header(OWNER_HEADER, value);
        }
        let (mut parts, _) = builder.body(()).unwrap().into_parts();
        OwnerId::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn test_owner_header() {
        let id = Uuid::new_v4();
        assert_eq!(owner_from(Some(&id.to_string())).await.unwrap(), OwnerId(id));
        assert!(matches!(owner_from(None).await, Err(ApiError::Unauthorized(_))));
        assert!(matches!(owner_from(Some("nobody")).await, Err(ApiError::Unauthorized(_))));
    }
}
