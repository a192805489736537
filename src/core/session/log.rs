use anyhow::Result;
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};

pub const SUMMARY_FILE: &str = "execution_summary.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StepStatus {
    Initial,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StepRecord {
    pub step: u32,
    pub command: String,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before_screenshot: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_screenshot: Option<String>,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ExecutionSummary {
    pub test_name: String,
    pub session_started: String,
    pub last_updated: String,
    pub total_commands: usize,
    pub commands: Vec<StepRecord>,
}

/// Append-only step log for one automation run, mirrored to
/// `execution_summary.json` after every append.
pub struct ExecutionLog {
    name: String,
    started: DateTime<Local>,
    report_dir: PathBuf,
    steps: Vec<StepRecord>,
}

impl ExecutionLog {
    pub fn new(name: &str, started: DateTime<Local>, report_dir: &Path) -> Self {
        Self {
            name: name.to_string(),
            started,
            report_dir: report_dir.to_path_buf(),
            steps: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn started(&self) -> DateTime<Local> {
        self.started
    }

    pub fn steps(&self) -> &[StepRecord] {
        &self.steps
    }

    pub fn append(&mut self, record: StepRecord) -> Result<()> {
        self.steps.push(record);
        self.save_summary()
    }

    pub fn summary(&self) -> ExecutionSummary {
        ExecutionSummary {
            test_name: self.name.clone(),
            session_started: self.started.to_rfc3339(),
            last_updated: Local::now().to_rfc3339(),
            total_commands: self.steps.len(),
            commands: self.steps.clone(),
        }
    }

    fn save_summary(&self) -> Result<()> {
        let rendered = serde_json::to_string_pretty(&self.summary())?;
        std::fs::write(self.report_dir.join(SUMMARY_FILE), rendered)?;
        Ok(())
    }
}

pub fn now_timestamp() -> String {
    Local::now().to_rfc3339()
}
