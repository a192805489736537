use axum::{Json, extract::State};

use super::super::AppState;
use crate::core::executor::ExecutionResult;

pub const SERVICE_NAME: &str = "claude-execution-server";
pub const TEST_PROMPT: &str = "Print only: Hello from Claude Execution Server";

pub async fn health_endpoint() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": SERVICE_NAME
    }))
}

/// Runs a fixed prompt end to end so operators can smoke-test the CLI.
pub async fn test_endpoint(State(state): State<AppState>) -> Json<serde_json::Value> {
    let job_id = uuid::Uuid::new_v4().to_string();
    let result: ExecutionResult = state.executor.execute(TEST_PROMPT, &job_id).await;
    Json(serde_json::json!({
        "test": true,
        "prompt": TEST_PROMPT,
        "result": result
    }))
}
