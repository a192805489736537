pub mod execute;
pub mod health;
pub mod jobs;

use axum::{Json, http::StatusCode, response::IntoResponse, response::Response};

pub(crate) fn json_error(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}
