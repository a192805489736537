use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};
use sha2::{Digest, Sha256};
use tracing::warn;

use super::AppState;
use super::handlers::json_error;

/// Compares digests so the check does not short-circuit on the first
/// differing byte of the secret itself.
fn token_matches(provided: &str, expected: &str) -> bool {
    Sha256::digest(provided.as_bytes()) == Sha256::digest(expected.as_bytes())
}

fn bearer_token(req: &Request<Body>) -> Option<&str> {
    req.headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(str::trim)
}

/// No-op when the server runs without a shared secret.
pub async fn require_auth(State(state): State<AppState>, req: Request<Body>, next: Next) -> Response {
    let Some(expected) = state.token.as_deref() else {
        return next.run(req).await;
    };

    match bearer_token(&req) {
        Some(provided) if token_matches(provided, expected) => next.run(req).await,
        Some(_) => {
            warn!("Rejected request to {} with an invalid token", req.uri().path());
            json_error(StatusCode::UNAUTHORIZED, "Invalid token")
        }
        None => json_error(
            StatusCode::UNAUTHORIZED,
            "Missing or invalid Authorization header. Use: Bearer <token>",
        ),
    }
}
