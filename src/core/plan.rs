//! Declarative automation runs loaded from TOML.
//!
//! ```toml
//! name = "signup"
//! base_url = "https://app.example.test"
//!
//! [[steps]]
//! action = "goto"
//! value = "/register"
//!
//! [[steps]]
//! action = "click"
//! selector = "#accept-cookies"
//! optional = true
//! ```

use anyhow::{Context, Result, anyhow, bail};
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info};

use crate::core::browser::{BrowserDriver, Locator, WebDriverOptions};
use crate::core::session::AutomationSession;
use crate::core::stability::StabilityPolicy;

const DEFAULT_WAIT_FOR: Duration = Duration::from_secs(30);
const DEFAULT_DOWNLOAD_WAIT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AutomationPlan {
    pub name: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub browser: BrowserSection,
    #[serde(default)]
    pub output: OutputSection,
    #[serde(default)]
    pub stability: StabilitySection,
    #[serde(default)]
    pub steps: Vec<PlanStep>,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BrowserSection {
    pub webdriver_url: Option<String>,
    pub headless: Option<bool>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputSection {
    #[serde(default = "default_reports_dir")]
    pub reports_dir: PathBuf,
    #[serde(default = "default_downloads_dir")]
    pub downloads_dir: PathBuf,
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            reports_dir: default_reports_dir(),
            downloads_dir: default_downloads_dir(),
        }
    }
}

fn default_reports_dir() -> PathBuf {
    PathBuf::from("reports")
}

fn default_downloads_dir() -> PathBuf {
    PathBuf::from("downloads")
}

/// Millisecond overrides for [`StabilityPolicy`].
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StabilitySection {
    pub poll_interval_ms: Option<u64>,
    pub stable_threshold: Option<u32>,
    pub max_wait_ms: Option<u64>,
    pub settle_delay_ms: Option<u64>,
}

impl StabilitySection {
    pub fn policy(&self) -> StabilityPolicy {
        let mut policy = StabilityPolicy::default();
        if let Some(ms) = self.poll_interval_ms {
            policy.poll_interval = Duration::from_millis(ms);
        }
        if let Some(n) = self.stable_threshold {
            policy.stable_threshold = n.max(1);
        }
        if let Some(ms) = self.max_wait_ms {
            policy.max_wait = Duration::from_millis(ms);
        }
        if let Some(ms) = self.settle_delay_ms {
            policy.settle_delay = Duration::from_millis(ms);
        }
        policy
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepAction {
    Goto,
    Click,
    Fill,
    Check,
    Uncheck,
    Select,
    Type,
    Hover,
    Press,
    Upload,
    WaitFor,
    Count,
    Evaluate,
    Screenshot,
    WaitForStable,
    WaitForDownload,
    Pause,
}

impl StepAction {
    fn needs_selector(self) -> bool {
        matches!(
            self,
            StepAction::Click
                | StepAction::Fill
                | StepAction::Check
                | StepAction::Uncheck
                | StepAction::Select
                | StepAction::Type
                | StepAction::Hover
                | StepAction::Upload
                | StepAction::WaitFor
                | StepAction::Count
        )
    }

    fn needs_value(self) -> bool {
        matches!(
            self,
            StepAction::Goto
                | StepAction::Fill
                | StepAction::Select
                | StepAction::Type
                | StepAction::Press
                | StepAction::Evaluate
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StepAction::Goto => "goto",
            StepAction::Click => "click",
            StepAction::Fill => "fill",
            StepAction::Check => "check",
            StepAction::Uncheck => "uncheck",
            StepAction::Select => "select",
            StepAction::Type => "type",
            StepAction::Hover => "hover",
            StepAction::Press => "press",
            StepAction::Upload => "upload",
            StepAction::WaitFor => "wait_for",
            StepAction::Count => "count",
            StepAction::Evaluate => "evaluate",
            StepAction::Screenshot => "screenshot",
            StepAction::WaitForStable => "wait_for_stable",
            StepAction::WaitForDownload => "wait_for_download",
            StepAction::Pause => "pause",
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlanStep {
    pub action: StepAction,
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub index: usize,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub files: Vec<PathBuf>,
    #[serde(default)]
    pub optional: bool,
}

impl PlanStep {
    fn locator(&self) -> Result<Locator> {
        let selector = self
            .selector
            .as_deref()
            .ok_or_else(|| anyhow!("{} requires a selector", self.action.as_str()))?;
        Ok(Locator::css(selector).nth(self.index))
    }

    fn value(&self) -> Result<&str> {
        self.value
            .as_deref()
            .ok_or_else(|| anyhow!("{} requires a value", self.action.as_str()))
    }

    pub fn describe(&self) -> String {
        match (&self.selector, &self.value) {
            (Some(sel), Some(val)) => format!("{} {} = {}", self.action.as_str(), sel, val),
            (Some(sel), None) => format!("{} {}", self.action.as_str(), sel),
            (None, Some(val)) => format!("{} {}", self.action.as_str(), val),
            (None, None) => self.action.as_str().to_string(),
        }
    }
}

impl AutomationPlan {
    /// Reads and validates a plan. `default_base_url` fills in a missing
    /// `base_url` before relative URLs are checked.
    pub fn load(path: &Path, default_base_url: Option<&str>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read plan {}", path.display()))?;
        Self::parse(&raw, default_base_url).with_context(|| format!("invalid plan {}", path.display()))
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Self::parse(raw, None)
    }

    fn parse(raw: &str, default_base_url: Option<&str>) -> Result<Self> {
        let mut plan: AutomationPlan = toml::from_str(raw)?;
        if plan.base_url.is_none() {
            plan.base_url = default_base_url.map(str::to_string);
        }
        plan.validate()?;
        Ok(plan)
    }

    /// Rejects plans that would fail for structural reasons before a browser
    /// is ever started.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            bail!("plan name must not be empty");
        }
        if self.name.contains(['/', '\\']) {
            bail!("plan name must not contain path separators");
        }
        if let Some(base) = &self.base_url {
            url::Url::parse(base).with_context(|| format!("invalid base_url '{}'", base))?;
        }
        for (i, step) in self.steps.iter().enumerate() {
            let n = i + 1;
            if step.action.needs_selector() && step.selector.is_none() {
                bail!("step {} ({}) requires a selector", n, step.action.as_str());
            }
            if step.action.needs_value() && step.value.is_none() {
                bail!("step {} ({}) requires a value", n, step.action.as_str());
            }
            if step.action == StepAction::Upload && step.files.is_empty() {
                bail!("step {} (upload) requires at least one file", n);
            }
            if step.action == StepAction::WaitForDownload
                && step.value.as_deref().is_some_and(|v| v.contains(['/', '\\']))
            {
                bail!("step {} (wait_for_download) value must be a file name, not a path", n);
            }
            if step.action == StepAction::Pause && step.duration_ms.is_none() {
                bail!("step {} (pause) requires duration_ms", n);
            }
            if step.action == StepAction::Goto {
                let target = step.value()?;
                self.resolve_url(target)
                    .with_context(|| format!("step {} (goto)", n))?;
            }
        }
        Ok(())
    }

    /// Absolute URLs pass through; relative ones are joined onto `base_url`.
    pub fn resolve_url(&self, target: &str) -> Result<String> {
        match url::Url::parse(target) {
            Ok(absolute) => Ok(absolute.to_string()),
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                let base = self
                    .base_url
                    .as_deref()
                    .ok_or_else(|| anyhow!("relative URL '{}' needs base_url", target))?;
                Ok(url::Url::parse(base)?.join(target)?.to_string())
            }
            Err(e) => Err(anyhow!("invalid URL '{}': {}", target, e)),
        }
    }

    pub fn downloads_dir(&self, now: DateTime<Local>) -> PathBuf {
        self.output
            .downloads_dir
            .join(format!("{}_{}", self.name, now.format("%Y%m%d_%H%M%S")))
    }

    /// Browser options with plan settings layered over `base`.
    pub fn webdriver_options(&self, base: &WebDriverOptions, download_dir: Option<PathBuf>) -> WebDriverOptions {
        WebDriverOptions {
            webdriver_url: self
                .browser
                .webdriver_url
                .clone()
                .unwrap_or_else(|| base.webdriver_url.clone()),
            headless: self.browser.headless.unwrap_or(base.headless),
            width: self.browser.width.unwrap_or(base.width),
            height: self.browser.height.unwrap_or(base.height),
            download_dir,
        }
    }
}

/// Creates the timestamped downloads folder and returns its absolute path.
pub fn prepare_downloads(plan: &AutomationPlan, now: DateTime<Local>) -> Result<PathBuf> {
    let dir = plan.downloads_dir(now);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create downloads folder {}", dir.display()))?;
    Ok(std::fs::canonicalize(&dir).unwrap_or(dir))
}

/// Runs every step, then writes the report. A failing required step still
/// produces a report (with an `error` screenshot) before its error is returned.
pub async fn run_plan<D: BrowserDriver>(plan: &AutomationPlan, mut session: AutomationSession<D>) -> Result<PathBuf> {
    info!("Running plan '{}' ({} steps)", plan.name, plan.steps.len());

    let mut failure = None;
    for (i, step) in plan.steps.iter().enumerate() {
        if step.optional {
            let description = step.describe();
            session
                .optional(&description, async |s| run_step(plan, step, s).await)
                .await;
            continue;
        }
        if let Err(e) = run_step(plan, step, &mut session).await {
            error!("Plan '{}' failed at step {}: {}", plan.name, i + 1, e);
            failure = Some(e.context(format!("step {} ({}) failed", i + 1, step.describe())));
            break;
        }
    }

    if failure.is_some() {
        let _ = session.screenshot("error").await;
    }
    let report = session.finish().await?;
    match failure {
        Some(e) => Err(e),
        None => {
            info!("Plan '{}' completed", plan.name);
            Ok(report)
        }
    }
}

async fn run_step<D: BrowserDriver>(plan: &AutomationPlan, step: &PlanStep, session: &mut AutomationSession<D>) -> Result<()> {
    match step.action {
        StepAction::Goto => {
            let url = plan.resolve_url(step.value()?)?;
            session.goto(&url).await
        }
        StepAction::Click => session.click(step.locator()?).await,
        StepAction::Fill => session.fill(step.locator()?, step.value()?).await,
        StepAction::Check => session.check(step.locator()?).await,
        StepAction::Uncheck => session.uncheck(step.locator()?).await,
        StepAction::Select => session.select_option(step.locator()?, step.value()?).await,
        StepAction::Type => session.type_text(step.locator()?, step.value()?).await,
        StepAction::Hover => session.hover(step.locator()?).await,
        StepAction::Press => session.press(step.value()?).await,
        StepAction::Upload => session.set_input_files(step.locator()?, &step.files).await,
        StepAction::WaitFor => {
            let timeout = step
                .timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_WAIT_FOR);
            let selector = step.locator()?.selector;
            session.wait_for_selector(&selector, timeout).await.map(|_| ())
        }
        StepAction::Count => {
            let selector = step.locator()?.selector;
            session.count(&selector).await.map(|_| ())
        }
        StepAction::Evaluate => session.evaluate(step.value()?).await.map(|_| ()),
        StepAction::Screenshot => {
            let name = step.value.as_deref().unwrap_or("screenshot");
            session.screenshot(name).await.map(|_| ())
        }
        StepAction::WaitForStable => session.wait_for_stable().await.map(|_| ()),
        StepAction::WaitForDownload => {
            let timeout = step
                .timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_DOWNLOAD_WAIT);
            session
                .wait_for_download(step.value.as_deref(), timeout)
                .await
                .map(|_| ())
        }
        StepAction::Pause => {
            let ms = step.duration_ms.unwrap_or_default();
            session.pause(Duration::from_millis(ms)).await
        }
    }
}
