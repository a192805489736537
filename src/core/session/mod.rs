//! Auto-logging wrapper around a [`BrowserDriver`].
//!
//! Every action becomes a numbered step with before/after screenshots. The
//! JSON summary is rewritten after each step and an HTML report is produced
//! when the session finishes, so a crashed run still leaves evidence behind.

mod log;
mod report;

pub use log::{ExecutionSummary, StepRecord, StepStatus, SUMMARY_FILE};
pub use report::{REPORT_FILE, escape_html, render_report};

use anyhow::{Result, anyhow};
use chrono::Local;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::core::browser::{BrowserDriver, Locator, PageFingerprint};
use crate::core::downloads::DownloadWatcher;
use crate::core::stability::{FingerprintSource, StabilityDetector, StabilityOutcome};
use log::{ExecutionLog, now_timestamp};

const SCROLL_PAUSE: Duration = Duration::from_millis(300);
const SELECTOR_POLL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub reports_dir: PathBuf,
    pub detector: StabilityDetector,
    /// Set to false to record steps without PNG captures.
    pub screenshots: bool,
    /// Folder the browser saves downloads into, if any.
    pub downloads_dir: Option<PathBuf>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            reports_dir: PathBuf::from("reports"),
            detector: StabilityDetector::default(),
            screenshots: true,
            downloads_dir: None,
        }
    }
}

pub struct AutomationSession<D: BrowserDriver> {
    driver: D,
    detector: StabilityDetector,
    report_dir: PathBuf,
    log: ExecutionLog,
    step_counter: u32,
    screenshots: bool,
    downloads: Option<DownloadWatcher>,
}

/// What an action produced, if anything worth printing.
type StepOutput = Option<String>;

impl<D: BrowserDriver> AutomationSession<D> {
    /// Creates `reports/<name>_<timestamp>/` and records the initial step.
    pub fn start(name: &str, driver: D, options: SessionOptions) -> Result<Self> {
        let started = Local::now();
        let report_dir = options
            .reports_dir
            .join(format!("{}_{}", name, started.format("%Y%m%d_%H%M%S")));
        std::fs::create_dir_all(&report_dir)?;

        let mut log = ExecutionLog::new(name, started, &report_dir);
        log.append(StepRecord {
            step: 0,
            command: "Session initialized".to_string(),
            timestamp: now_timestamp(),
            before_screenshot: None,
            after_screenshot: None,
            status: StepStatus::Initial,
            output: Some("Browser session connected".to_string()),
            error: None,
            traceback: None,
        })?;

        info!("Automation session '{}' reporting to {}", name, report_dir.display());
        Ok(Self {
            driver,
            detector: options.detector,
            report_dir,
            log,
            step_counter: 0,
            screenshots: options.screenshots,
            downloads: options.downloads_dir.map(DownloadWatcher::new),
        })
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn report_dir(&self) -> &Path {
        &self.report_dir
    }

    pub fn steps(&self) -> &[StepRecord] {
        self.log.steps()
    }

    pub async fn goto(&mut self, url: &str) -> Result<()> {
        let command = format!("goto('{}')", url);
        self.record("goto", command, async move |s| {
            s.driver.goto(url).await?;
            s.wait_for_page_stable(None).await;
            Ok(s.driver.current_url().await.ok())
        })
        .await
        .map(|_| ())
    }

    pub async fn click(&mut self, target: impl Into<Locator>) -> Result<()> {
        let target = target.into();
        let command = format!("click({})", target.describe());
        self.record("click", command, async move |s| {
            let initial = s.sample_fingerprint().await;
            s.scroll_to(&target).await;
            s.driver.click(&target).await?;
            s.wait_for_page_stable(initial).await;
            Ok(None)
        })
        .await
        .map(|_| ())
    }

    pub async fn fill(&mut self, target: impl Into<Locator>, value: &str) -> Result<()> {
        let target = target.into();
        let command = format!("fill({}, '{}')", target.describe(), value);
        self.record("fill", command, async move |s| {
            let initial = s.sample_fingerprint().await;
            s.scroll_to(&target).await;
            s.driver.fill(&target, value).await?;
            s.wait_for_page_stable(initial).await;
            Ok(None)
        })
        .await
        .map(|_| ())
    }

    /// Clicks the `index`-th match of `selector`.
    pub async fn locator_click(&mut self, selector: &str, index: usize) -> Result<()> {
        self.click(Locator::css(selector).nth(index)).await
    }

    pub async fn locator_fill(&mut self, selector: &str, value: &str, index: usize) -> Result<()> {
        self.fill(Locator::css(selector).nth(index), value).await
    }

    pub async fn check(&mut self, target: impl Into<Locator>) -> Result<()> {
        self.set_checked("check", target.into(), true).await
    }

    pub async fn uncheck(&mut self, target: impl Into<Locator>) -> Result<()> {
        self.set_checked("uncheck", target.into(), false).await
    }

    async fn set_checked(&mut self, method: &str, target: Locator, checked: bool) -> Result<()> {
        let command = format!("{}({})", method, target.describe());
        self.record(method, command, async move |s| {
            let initial = s.sample_fingerprint().await;
            s.scroll_to(&target).await;
            s.driver.set_checked(&target, checked).await?;
            s.wait_for_page_stable(initial).await;
            Ok(None)
        })
        .await
        .map(|_| ())
    }

    pub async fn select_option(&mut self, target: impl Into<Locator>, value: &str) -> Result<()> {
        let target = target.into();
        let command = format!("select_option({}, '{}')", target.describe(), value);
        self.record("select_option", command, async move |s| {
            let initial = s.sample_fingerprint().await;
            s.scroll_to(&target).await;
            s.driver.select_option(&target, value).await?;
            s.wait_for_page_stable(initial).await;
            Ok(None)
        })
        .await
        .map(|_| ())
    }

    pub async fn set_input_files(&mut self, target: impl Into<Locator>, files: &[PathBuf]) -> Result<()> {
        let target = target.into();
        let listed = files
            .iter()
            .map(|f| f.display().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        let command = format!("set_input_files({}, '{}')", target.describe(), listed);
        self.record("set_input_files", command, async move |s| {
            let initial = s.sample_fingerprint().await;
            s.driver.upload_files(&target, files).await?;
            s.wait_for_page_stable(initial).await;
            Ok(None)
        })
        .await
        .map(|_| ())
    }

    pub async fn type_text(&mut self, target: impl Into<Locator>, text: &str) -> Result<()> {
        let target = target.into();
        let command = format!("type({}, '{}')", target.describe(), text);
        self.record("type", command, async move |s| {
            s.scroll_to(&target).await;
            s.driver.type_text(&target, text).await?;
            Ok(None)
        })
        .await
        .map(|_| ())
    }

    pub async fn hover(&mut self, target: impl Into<Locator>) -> Result<()> {
        let target = target.into();
        let command = format!("hover({})", target.describe());
        self.record("hover", command, async move |s| {
            s.scroll_to(&target).await;
            s.driver.hover(&target).await?;
            Ok(None)
        })
        .await
        .map(|_| ())
    }

    pub async fn press(&mut self, key: &str) -> Result<()> {
        let command = format!("keyboard.press('{}')", key);
        self.record("keyboard_press", command, async move |s| {
            s.driver.press_key(key).await?;
            Ok(None)
        })
        .await
        .map(|_| ())
    }

    /// Polls until at least one element matches, then scrolls it into view.
    pub async fn wait_for_selector(&mut self, selector: &str, timeout: Duration) -> Result<usize> {
        let command = format!("wait_for_selector('{}')", selector);
        let output = self
            .record("wait_for_selector", command, async move |s| {
                let deadline = tokio::time::Instant::now() + timeout;
                loop {
                    let found = s.driver.count(selector).await.unwrap_or(0);
                    if found > 0 {
                        s.scroll_to(&Locator::css(selector)).await;
                        return Ok(Some(found.to_string()));
                    }
                    if tokio::time::Instant::now() >= deadline {
                        return Err(anyhow!(
                            "timed out after {:?} waiting for '{}'",
                            timeout,
                            selector
                        ));
                    }
                    tokio::time::sleep(SELECTOR_POLL).await;
                }
            })
            .await?;
        Ok(parse_count(output))
    }

    pub async fn count(&mut self, selector: &str) -> Result<usize> {
        let command = format!("count('{}')", selector);
        let output = self
            .record("count", command, async move |s| {
                let found = s.driver.count(selector).await?;
                Ok(Some(found.to_string()))
            })
            .await?;
        Ok(parse_count(output))
    }

    pub async fn evaluate(&mut self, script: &str) -> Result<serde_json::Value> {
        let preview: String = script.chars().take(50).collect();
        let command = format!("evaluate('{}...')", preview);
        let mut value = serde_json::Value::Null;
        self.record("evaluate", command, async |s| {
            value = s.driver.evaluate(script, Vec::new()).await?;
            Ok(Some(value.to_string()))
        })
        .await?;
        Ok(value)
    }

    /// Captures a named screenshot as its own step.
    pub async fn screenshot(&mut self, name: &str) -> Result<String> {
        self.step_counter += 1;
        let file = self.capture(name).await;
        let record = StepRecord {
            step: self.step_counter,
            command: format!("screenshot('{}')", name),
            timestamp: now_timestamp(),
            before_screenshot: None,
            after_screenshot: file.clone(),
            status: if file.is_some() {
                StepStatus::Success
            } else {
                StepStatus::Error
            },
            output: file.as_ref().map(|f| format!("Result: {}", f)),
            error: file.is_none().then(|| "screenshot failed".to_string()),
            traceback: None,
        };
        self.log.append(record)?;
        file.ok_or_else(|| anyhow!("screenshot '{}' failed", name))
    }

    pub async fn set_viewport(&mut self, width: u32, height: u32) -> Result<()> {
        let command = format!("set_viewport_size({{'width': {}, 'height': {}}})", width, height);
        self.record("set_viewport_size", command, async move |s| {
            s.driver.set_viewport(width, height).await?;
            Ok(None)
        })
        .await
        .map(|_| ())
    }

    pub async fn wait_for_stable(&mut self) -> Result<StabilityOutcome> {
        let mut observed = None;
        self.record("wait_for_stable", "wait_for_stable()".to_string(), async |s| {
            let outcome = s.wait_for_page_stable(None).await;
            let label = if outcome.is_stable() {
                format!("stable after {} samples", outcome.samples())
            } else {
                format!(
                    "timed out after {} samples ({:?} budget)",
                    outcome.samples(),
                    s.detector.policy().max_wait
                )
            };
            observed = Some(outcome);
            Ok(Some(label))
        })
        .await?;
        observed.ok_or_else(|| anyhow!("stability wait produced no outcome"))
    }

    /// Waits for the browser to finish a download, then optionally renames it
    /// to `<save_as>_<timestamp>.<ext>`. Returns the final path.
    pub async fn wait_for_download(&mut self, save_as: Option<&str>, timeout: Duration) -> Result<PathBuf> {
        let command = match save_as {
            Some(name) => format!("wait_for_download(save_as='{}')", name),
            None => "wait_for_download()".to_string(),
        };
        let mut watcher = self.downloads.take();
        let mut saved = None;
        let result = self
            .record("wait_for_download", command, async |_s| {
                let watcher = watcher
                    .as_mut()
                    .ok_or_else(|| anyhow!("no downloads folder configured for this session"))?;
                let path = watcher.wait_for_new(timeout).await?;
                let path = match save_as {
                    Some(name) => watcher.save_as(&path, name, Local::now())?,
                    None => path,
                };
                let shown = path.display().to_string();
                saved = Some(path);
                Ok(Some(shown))
            })
            .await;
        self.downloads = watcher;
        result?;
        saved.ok_or_else(|| anyhow!("download wait produced no file"))
    }

    /// Pauses without touching the page. Logged so the report shows the gap.
    pub async fn pause(&mut self, duration: Duration) -> Result<()> {
        let command = format!("pause({}ms)", duration.as_millis());
        self.record("pause", command, async move |_s| {
            tokio::time::sleep(duration).await;
            Ok(None)
        })
        .await
        .map(|_| ())
    }

    /// Runs a best-effort step. Failures are already recorded in the log by the
    /// step itself; here they are only downgraded to a warning.
    pub async fn optional<T, F>(&mut self, description: &str, step: F) -> Option<T>
    where
        F: AsyncFnOnce(&mut Self) -> Result<T>,
    {
        match step(self).await {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Optional step '{}' skipped: {}", description, e);
                None
            }
        }
    }

    /// Writes the HTML report and releases the browser.
    pub async fn finish(self) -> Result<PathBuf> {
        let path = self.write_report()?;
        if let Err(e) = self.driver.close().await {
            warn!("Failed to close browser session: {}", e);
        }
        info!("HTML report generated: {}", path.display());
        Ok(path)
    }

    pub fn write_report(&self) -> Result<PathBuf> {
        let html = render_report(
            self.log.name(),
            &self.log.started().format("%Y-%m-%d %H:%M:%S").to_string(),
            self.log.steps(),
        );
        let path = self.report_dir.join(REPORT_FILE);
        std::fs::write(&path, html)?;
        Ok(path)
    }

    async fn record<F>(&mut self, method: &str, command: String, action: F) -> Result<StepOutput>
    where
        F: AsyncFnOnce(&Self) -> Result<StepOutput>,
    {
        self.step_counter += 1;
        let step = self.step_counter;
        let before = self.capture(&format!("before_{}", method)).await;
        let result = action(&*self).await;
        let after = self.capture(&format!("after_{}", method)).await;

        let (status, output, error, traceback) = match &result {
            Ok(out) => (
                StepStatus::Success,
                out.as_ref().map(|o| format!("Result: {}", o)),
                None,
                None,
            ),
            Err(e) => (
                StepStatus::Error,
                None,
                Some(e.to_string()),
                Some(format!("{:?}", e)),
            ),
        };

        match &result {
            Ok(Some(out)) => info!("[Step {}] {} -> {}", step, command, out),
            Ok(None) => info!("[Step {}] {}", step, command),
            Err(e) => warn!("[Step {}] {} failed: {}", step, command, e),
        }

        self.log.append(StepRecord {
            step,
            command,
            timestamp: now_timestamp(),
            before_screenshot: before,
            after_screenshot: after,
            status,
            output,
            error,
            traceback,
        })?;
        result
    }

    async fn capture(&self, label: &str) -> Option<String> {
        if !self.screenshots {
            return None;
        }
        let file = format!("{:03}_{}.png", self.step_counter, label);
        match self.driver.screenshot_png().await {
            Ok(bytes) => match std::fs::write(self.report_dir.join(&file), bytes) {
                Ok(()) => Some(file),
                Err(e) => {
                    warn!("Failed to write screenshot {}: {}", file, e);
                    None
                }
            },
            Err(e) => {
                warn!("Failed to capture screenshot {}: {}", file, e);
                None
            }
        }
    }

    async fn sample_fingerprint(&self) -> Option<String> {
        PageFingerprint::new(&self.driver).sample().await.ok()
    }

    async fn wait_for_page_stable(&self, initial: Option<String>) -> StabilityOutcome {
        let mut source = PageFingerprint::new(&self.driver);
        self.detector.wait_until_stable(&mut source, initial).await
    }

    async fn scroll_to(&self, target: &Locator) {
        match self.driver.scroll_into_view(target).await {
            Ok(()) => tokio::time::sleep(SCROLL_PAUSE).await,
            Err(e) => tracing::debug!("Scroll to {} skipped: {}", target.describe(), e),
        }
    }
}

fn parse_count(output: StepOutput) -> usize {
    output.and_then(|o| o.parse().ok()).unwrap_or(0)
}
