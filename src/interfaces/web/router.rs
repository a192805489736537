use axum::{
    Router,
    body::Body,
    http::{HeaderValue, Request, header},
    middleware,
    middleware::Next,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;

use super::AppState;
use super::auth;
use super::handlers::{execute, health, jobs};

pub fn build_router(state: AppState) -> Router {
    // Liveness probes never need the shared secret.
    let public_routes = Router::new()
        .route("/health", get(health::health_endpoint))
        .with_state(state.clone());

    let authed_routes = Router::new()
        .route("/execute", post(execute::execute_endpoint))
        .route("/execute-async", post(execute::execute_async_endpoint))
        .route("/job/{job_id}", get(jobs::get_job_endpoint))
        .route("/jobs", get(jobs::list_jobs_endpoint))
        .route("/test", get(health::test_endpoint))
        .route("/logs", get(super::sse_logs_endpoint))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ))
        .with_state(state);

    public_routes
        .merge(authed_routes)
        .layer(middleware::from_fn(security_headers))
        .layer(CorsLayer::permissive())
}

async fn security_headers(req: Request<Body>, next: Next) -> axum::response::Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    response
}
