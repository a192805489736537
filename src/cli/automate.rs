use anyhow::Result;
use chrono::Local;
use std::path::PathBuf;

use crate::core::browser::{WebDriverClient, WebDriverOptions};
use crate::core::config::AutomateSettings;
use crate::core::plan::{AutomationPlan, prepare_downloads, run_plan};
use crate::core::session::{AutomationSession, SessionOptions};
use crate::core::stability::StabilityDetector;
use crate::core::terminal::{GuideSection, print_link, print_step, print_success};

pub async fn run(settings: AutomateSettings, plan_path: PathBuf) -> Result<()> {
    let plan = AutomationPlan::load(&plan_path, settings.base_url.as_deref())?;
    let downloads = prepare_downloads(&plan, Local::now())?;

    let base = WebDriverOptions {
        webdriver_url: settings.webdriver_url.clone(),
        headless: settings.headless,
        ..Default::default()
    };
    let options = plan.webdriver_options(&base, Some(downloads.clone()));

    GuideSection::new(&format!("Plan '{}'", plan.name))
        .status("Steps", &plan.steps.len().to_string())
        .status("WebDriver", &options.webdriver_url)
        .status("Headless", &options.headless.to_string())
        .status("Downloads", &downloads.display().to_string())
        .print();

    print_step("Starting browser session...");
    let driver = WebDriverClient::connect(&options).await?;
    let session_options = SessionOptions {
        reports_dir: plan.output.reports_dir.clone(),
        detector: StabilityDetector::new(plan.stability.policy()),
        screenshots: true,
        downloads_dir: Some(downloads),
    };
    let session = AutomationSession::start(&plan.name, driver, session_options)?;

    let report = run_plan(&plan, session).await?;
    print_success(&format!("Plan '{}' completed", plan.name));
    print_link("Report", &report.display().to_string());
    Ok(())
}

