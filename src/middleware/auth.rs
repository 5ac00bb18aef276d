use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};
use hmac::{Hmac, Mac};
use sha2::Sha256;

/// Admin routes: `Authorization: Bearer <ADMIN_API_KEY>`.
pub async fn admin_auth(
    State(admin_api_key): State<Arc<str>>,
    req: Request<Body>,
    next: Next<Body>,
) -> Result<Response, StatusCode> {
    let token = req
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "));

    let authorized = matches!(
        token,
        Some(token) if !admin_api_key.is_empty() && keys_match(token, &admin_api_key)
    );

    if authorized {
        Ok(next.run(req).await)
    } else {
        tracing::warn!(uri = %req.uri(), "admin request rejected");
        Err(StatusCode::UNAUTHORIZED)
    }
}

/// Constant-time comparison: both values are used as HMAC keys over the same
/// message and the tags are verified.
fn keys_match(given: &str, expected: &str) -> bool {
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(expected.as_bytes()) else {
        return false;
    };
    mac.update(b"admin-api-key");
    let expected_tag = mac.finalize().into_bytes();

    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(given.as_bytes()) else {
        return false;
    };
    mac.update(b"admin-api-key");
    mac.verify_slice(&expected_tag).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{middleware, routing::get, Router};
    use tower::ServiceExt;

    fn app(key: &str) -> Router {
        Router::new()
            .route("/admin/ping", get(|| async { "pong" }))
            .route_layer(middleware::from_fn_with_state(Arc::<str>::from(key), admin_auth))
    }

    async fn status_for(key: &str, header: Option<&str>) -> StatusCode {
        let mut request = Request::builder().uri("/admin/ping");
        if let Some(header) = header {
            request = request.header("Authorization", header);
        }
        app(key)
            .oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn test_valid_bearer_token() {
        assert_eq!(status_for("s3cret", Some("Bearer s3cret")).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_rejects_missing_or_wrong_token() {
        assert_eq!(status_for("s3cret", None).await, StatusCode::UNAUTHORIZED);
        assert_eq!(
            status_for("s3cret", Some("Bearer nope")).await,
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(status_for("s3cret", Some("s3cret")).await, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_empty_key_never_matches() {
        assert_eq!(status_for("", Some("Bearer ")).await, StatusCode::UNAUTHORIZED);
    }
}
