#![cfg(unix)]


use e2e_harness::{ServerHarness, TestResult, sitepilot_binary_path};
use serde_json::json;
use std::process::Command;
use std::time::Duration;

#[tokio::test]
async fn sync_execution_returns_cli_output() -> TestResult<()> {
    let server = ServerHarness::spawn(None).await?;

    let (status, body) = server
        .post_json("/execute", json!({ "prompt": "echo hello from the cli" }))
        .await?;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "completed");
    assert_eq!(body["output"], "hello from the cli\n");
    assert_eq!(body["return_code"], 0);
    Ok(())
}

#[tokio::test]
async fn slow_prompts_hit_the_configured_timeout() -> TestResult<()> {
    let server = ServerHarness::spawn(None).await?;

    let (_, body) = server.post_json("/execute", json!({ "prompt": "sleep 5" })).await?;
    assert_eq!(body["status"], "error");
    assert_eq!(body["error"], "Command execution timed out after 2 seconds");
    Ok(())
}

#[tokio::test]
async fn async_jobs_can_be_polled_to_completion() -> TestResult<()> {
    let server = ServerHarness::spawn(None).await?;

    let (status, queued) = server
        .post_json("/execute-async", json!({ "prompt": "echo later" }))
        .await?;
    assert_eq!(status, 200);
    assert_eq!(queued["status"], "queued");
    let job_id = queued["job_id"].as_str().ok_or("missing job_id")?.to_string();

    let mut job = json!(null);
    for _ in 0..40 {
        let (_, body) = server.get_json(&format!("/job/{}", job_id)).await?;
        job = body;
        if job["status"] == "completed" || job["status"] == "error" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(job["status"], "completed");
    assert_eq!(job["output"], "later\n");

    let (_, listing) = server.get_json("/jobs").await?;
    let jobs = listing["jobs"].as_array().ok_or("jobs is not an array")?;
    assert!(jobs.iter().any(|j| j["job_id"] == job_id.as_str()));

    let (status, missing) = server.get_json("/job/does-not-exist").await?;
    assert_eq!(status, 404);
    assert_eq!(missing["error"], "Job not found");
    Ok(())
}

#[tokio::test]
async fn token_guards_everything_but_health() -> TestResult<()> {
    let server = ServerHarness::spawn(Some("e2e-secret")).await?;

    let anonymous = reqwest::Client::new()
        .get(format!("{}/jobs", server.base))
        .send()
        .await?;
    assert_eq!(anonymous.status().as_u16(), 401);

    let (status, _) = server.get_json("/jobs").await?;
    assert_eq!(status, 200);

    let health = reqwest::get(format!("{}/health", server.base)).await?;
    assert_eq!(health.status().as_u16(), 200);
    Ok(())
}

#[test]
fn unknown_commands_exit_non_zero() -> TestResult<()> {
    let output = Command::new(sitepilot_binary_path()?).arg("launch").output()?;
    assert!(!output.status.success());
    Ok(())
}

#[test]
fn automate_requires_a_plan_path() -> TestResult<()> {
    let output = Command::new(sitepilot_binary_path()?).arg("automate").output()?;
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("sitepilot automate <plan.toml>"));
    Ok(())
}
