use anyhow::Result;
use std::time::Duration;

use crate::core::config::Settings;
use crate::core::terminal::{GuideSection, print_info, print_step, print_success, print_warn};
use crate::interfaces::telegram::{AllowList, ExecutionClient};
use crate::platform::{NativePlatform, Platform, find_executable};

const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Checks everything the three services depend on. Problems are reported,
/// never fatal: the command always finishes so every line is shown.
pub async fn run(settings: &Settings) -> Result<()> {
    print_step("Checking execution server prerequisites...");
    let executor = &settings.server.executor;
    match find_executable(&executor.program) {
        Some(path) => print_success(&format!("{} found at {}", executor.program, path.display())),
        None => print_warn(&format!(
            "{} is not on PATH (set EXEC_PROGRAM to override)",
            executor.program
        )),
    }
    match &executor.run_as {
        Some(user) => {
            if find_executable("su").is_some() {
                print_success(&format!("Prompts run as '{}' via su", user));
            } else {
                print_warn("EXEC_RUN_AS is set but su is not available");
            }
        }
        None => print_info("Prompts run as the server's own user"),
    }
    if find_executable(NativePlatform::default_shell()).is_none() {
        print_warn(&format!("{} is not on PATH", NativePlatform::default_shell()));
    }
    if settings.server.token.is_none() {
        print_warn("EXEC_SERVER_TOKEN is not set; the server accepts anonymous requests");
    }

    println!();
    print_step("Checking execution server...");
    let client = ExecutionClient::new(&settings.relay.server_url);
    match client.health().await {
        Ok(status) if status.is_success() => {
            print_success(&format!("{} is healthy", client.base_url()))
        }
        Ok(status) => print_warn(&format!("{} answered {}", client.base_url(), status)),
        Err(e) => print_warn(&format!("{} is unreachable: {}", client.base_url(), e)),
    }

    println!();
    print_step("Checking browser automation...");
    if find_executable("chromedriver").is_some() {
        print_success("chromedriver found on PATH");
    } else {
        print_info("chromedriver not on PATH (fine when WEBDRIVER_URL points to a grid)");
    }
    match webdriver_ready(&settings.automate.webdriver_url).await {
        Ok(true) => print_success(&format!("WebDriver at {} is ready", settings.automate.webdriver_url)),
        Ok(false) => print_warn(&format!(
            "WebDriver at {} is up but not ready for new sessions",
            settings.automate.webdriver_url
        )),
        Err(e) => print_warn(&format!(
            "WebDriver at {} is unreachable: {}",
            settings.automate.webdriver_url, e
        )),
    }

    println!();
    print_step("Checking Telegram relay...");
    if settings.relay.bot_token.is_some() {
        print_success("BOT_TOKEN is set");
    } else {
        print_warn("BOT_TOKEN is not set; `relay` will refuse to start");
    }
    let allow_list = AllowList::load(&settings.relay.allowed_users_file);
    if allow_list.is_enforced() {
        print_success(&format!("{} authorized Telegram users", allow_list.len()));
    } else {
        print_warn(&format!(
            "{} missing or empty: all Telegram users are allowed",
            settings.relay.allowed_users_file.display()
        ));
    }

    println!();
    GuideSection::new("Configuration")
        .status(
            "Server",
            &format!("{}:{}", settings.server.host, settings.server.port),
        )
        .status("Timeout", &format!("{}s", executor.timeout.as_secs()))
        .status("Relay prefix", &settings.relay.prefix)
        .status(
            "Base URL",
            settings.automate.base_url.as_deref().unwrap_or("(none)"),
        )
        .print();
    Ok(())
}

/// Reads `value.ready` from the W3C `/status` endpoint.
async fn webdriver_ready(base: &str) -> Result<bool> {
    let body: serde_json::Value = reqwest::Client::builder()
        .timeout(PROBE_TIMEOUT)
        .build()?
        .get(format!("{}/status", base.trim_end_matches('/')))
        .send()
        .await?
        .json()
        .await?;
    Ok(body
        .pointer("/value/ready")
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(false))
}
