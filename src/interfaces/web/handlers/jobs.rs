use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};

use super::super::AppState;
use super::json_error;

pub async fn get_job_endpoint(Path(job_id): Path<String>, State(state): State<AppState>) -> Response {
    match state.jobs.get(&job_id).await {
        Some(job) => Json(job).into_response(),
        None => json_error(StatusCode::NOT_FOUND, "Job not found"),
    }
}

pub async fn list_jobs_endpoint(State(state): State<AppState>) -> Json<serde_json::Value> {
    let jobs: Vec<serde_json::Value> = state
        .jobs
        .list()
        .await
        .into_iter()
        .map(|(job_id, job)| {
            serde_json::json!({
                "job_id": job_id,
                "status": job.status,
                "created": job.created,
                "prompt": job.prompt
            })
        })
        .collect();
    Json(serde_json::json!({ "jobs": jobs }))
}
