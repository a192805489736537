//! In-memory driver for unit tests.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Mutex;

use super::{BrowserDriver, Locator};

pub const STILL_PAGE: &str = r#"{"html_length":10,"inputs":[],"hidden":[],"url":"about:blank","scroll_x":0,"scroll_y":0}"#;

#[derive(Default)]
pub struct FakeDriver {
    calls: Mutex<Vec<String>>,
    matches: usize,
}

impl FakeDriver {
    pub fn with_matches(matches: usize) -> Self {
        Self {
            matches,
            ..Default::default()
        }
    }

    fn log(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl BrowserDriver for FakeDriver {
    async fn goto(&self, url: &str) -> Result<()> {
        self.log(format!("goto {}", url));
        Ok(())
    }
    async fn current_url(&self) -> Result<String> {
        let last_goto = self
            .calls()
            .iter()
            .rev()
            .find_map(|c| c.strip_prefix("goto ").map(str::to_string));
        Ok(last_goto.unwrap_or_else(|| "about:blank".to_string()))
    }
    async fn click(&self, target: &Locator) -> Result<()> {
        if target.selector == "#missing" {
            return Err(anyhow!("no such element: {}", target.selector));
        }
        self.log(format!("click {}", target.selector));
        Ok(())
    }
    async fn fill(&self, target: &Locator, value: &str) -> Result<()> {
        self.log(format!("fill {} {}", target.selector, value));
        Ok(())
    }
    async fn type_text(&self, target: &Locator, text: &str) -> Result<()> {
        self.log(format!("type {} {}", target.selector, text));
        Ok(())
    }
    async fn upload_files(&self, target: &Locator, files: &[PathBuf]) -> Result<()> {
        self.log(format!("upload {} {}", target.selector, files.len()));
        Ok(())
    }
    async fn press_key(&self, key: &str) -> Result<()> {
        self.log(format!("press {}", key));
        Ok(())
    }
    async fn hover(&self, target: &Locator) -> Result<()> {
        self.log(format!("hover {}", target.selector));
        Ok(())
    }
    async fn set_checked(&self, target: &Locator, checked: bool) -> Result<()> {
        self.log(format!("checked {} {}", target.selector, checked));
        Ok(())
    }
    async fn select_option(&self, target: &Locator, value: &str) -> Result<()> {
        self.log(format!("select {} {}", target.selector, value));
        Ok(())
    }
    async fn count(&self, _selector: &str) -> Result<usize> {
        Ok(self.matches)
    }
    async fn scroll_into_view(&self, target: &Locator) -> Result<()> {
        self.log(format!("scroll {}", target.selector));
        Ok(())
    }
    async fn evaluate(&self, script: &str, _args: Vec<serde_json::Value>) -> Result<serde_json::Value> {
        if script.contains("JSON.stringify") {
            return Ok(serde_json::Value::String(STILL_PAGE.to_string()));
        }
        Ok(serde_json::json!(42))
    }
    async fn screenshot_png(&self) -> Result<Vec<u8>> {
        Ok(b"\x89PNG".to_vec())
    }
    async fn set_viewport(&self, width: u32, height: u32) -> Result<()> {
        self.log(format!("viewport {}x{}", width, height));
        Ok(())
    }
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
