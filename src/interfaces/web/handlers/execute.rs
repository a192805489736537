use axum::{
    Json,
    body::{Body, Bytes},
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use std::convert::Infallible;
use tokio_stream::StreamExt;
use tracing::{error, info};

use super::super::AppState;
use super::json_error;

const MISSING_PROMPT: &str = "Missing prompt in request body";

#[derive(serde::Deserialize)]
pub struct ExecuteRequest {
    prompt: String,
    #[serde(default)]
    stream: bool,
}

/// The body is parsed by hand so malformed JSON gets the same 400 payload as
/// a missing prompt instead of axum's plain-text rejection.
fn parse_request(body: &Bytes) -> Option<ExecuteRequest> {
    serde_json::from_slice(body).ok()
}

pub async fn execute_endpoint(State(state): State<AppState>, body: Bytes) -> Response {
    let Some(request) = parse_request(&body) else {
        return json_error(StatusCode::BAD_REQUEST, MISSING_PROMPT);
    };
    let job_id = uuid::Uuid::new_v4().to_string();

    if !request.stream {
        let result = state.executor.execute(&request.prompt, &job_id).await;
        return Json(result).into_response();
    }

    info!("[{}] Opening NDJSON stream", job_id);
    let lines = state
        .executor
        .execute_stream(&request.prompt, &job_id)
        .map(|chunk| {
            let mut line = serde_json::to_vec(&chunk).unwrap_or_default();
            line.push(b'\n');
            Ok::<_, Infallible>(Bytes::from(line))
        });

    match Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/x-ndjson")
        .header(header::CACHE_CONTROL, "no-cache")
        .header("X-Job-ID", job_id.as_str())
        .body(Body::from_stream(lines))
    {
        Ok(response) => response,
        Err(e) => {
            error!("[{}] Failed to build stream response: {}", job_id, e);
            json_error(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
        }
    }
}

pub async fn execute_async_endpoint(State(state): State<AppState>, body: Bytes) -> Response {
    let Some(request) = parse_request(&body) else {
        return json_error(StatusCode::BAD_REQUEST, MISSING_PROMPT);
    };

    let job_id = state.jobs.submit(&state.executor, request.prompt).await;
    info!("[{}] Job queued", job_id);
    Json(serde_json::json!({
        "job_id": job_id,
        "status": "queued",
        "message": "Job queued for execution"
    }))
    .into_response()
}
