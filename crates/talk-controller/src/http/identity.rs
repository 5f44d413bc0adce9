//! Caller identity for protected routes.
//!
//! Authentication is handled upstream; the auth layer forwards the verified
//! user as the `x-user-id` header. `require_identity` parses that header and
//! stores an [`Identity`] in the request extensions.

use crate::errors::TalkError;

use axum::{extract::Request, middleware::Next, response::IntoResponse};
use common::types::UserId;
use tracing::instrument;

/// Header carrying the authenticated user id.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Authenticated caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity(pub UserId);

fn extract_user_id(req: &Request) -> Result<UserId, TalkError> {
    let raw = req
        .headers()
        .get(USER_ID_HEADER)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| {
            tracing::debug!(target: "talk.http.identity", "Missing identity header");
            TalkError::Unauthorized
        })?;

    raw.parse().map_err(|_| {
        tracing::debug!(target: "talk.http.identity", "Malformed identity header");
        TalkError::Unauthorized
    })
}

/// Reject requests without a valid `x-user-id` header.
#[instrument(skip_all, name = "talk.http.identity")]
pub async fn require_identity(mut req: Request, next: Next) -> Result<impl IntoResponse, TalkError> {
    let user_id = extract_user_id(&req)?;
    req.extensions_mut().insert(Identity(user_id));
    Ok(next.run(req).await)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request(header: Option<&str>) -> Request {
        let mut builder = Request::builder().uri("/api/v1/me");
        if let Some(value) = header {
            builder = builder.header(USER_ID_HEADER, value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn test_extract_valid_user_id() {
        let id = UserId::new();
        let parsed = extract_user_id(&request(Some(&id.to_string()))).unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_missing_header_is_unauthorized() {
        assert_eq!(extract_user_id(&request(None)), Err(TalkError::Unauthorized));
    }

    #[test]
    fn test_malformed_header_is_unauthorized() {
        assert_eq!(
            extract_user_id(&request(Some("not-a-uuid"))),
            Err(TalkError::Unauthorized)
        );
    }
}
