mod webdriver;
#[cfg(test)]
pub mod testing;

pub use webdriver::{WebDriverClient, WebDriverOptions};

use anyhow::{Context, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::PathBuf;

use crate::core::stability::FingerprintSource;

/// CSS selector plus which match to act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    pub selector: String,
    pub index: usize,
}

impl Locator {
    pub fn css(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            index: 0,
        }
    }

    pub fn nth(mut self, index: usize) -> Self {
        self.index = index;
        self
    }

    /// Human-readable form used in step logs.
    pub fn describe(&self) -> String {
        if self.index == 0 {
            format!("'{}'", self.selector)
        } else {
            format!("locator('{}').nth({})", self.selector, self.index)
        }
    }
}

impl From<&str> for Locator {
    fn from(selector: &str) -> Self {
        Locator::css(selector)
    }
}

impl From<String> for Locator {
    fn from(selector: String) -> Self {
        Locator::css(selector)
    }
}

/// The browser operations an automation session needs. Implemented over
/// WebDriver in production and by in-memory fakes in tests.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn goto(&self, url: &str) -> Result<()>;
    async fn current_url(&self) -> Result<String>;
    async fn click(&self, target: &Locator) -> Result<()>;
    /// Clears the field, then types `value`.
    async fn fill(&self, target: &Locator, value: &str) -> Result<()>;
    /// Types into the field without clearing it.
    async fn type_text(&self, target: &Locator, text: &str) -> Result<()>;
    async fn upload_files(&self, target: &Locator, files: &[PathBuf]) -> Result<()>;
    async fn press_key(&self, key: &str) -> Result<()>;
    async fn hover(&self, target: &Locator) -> Result<()>;
    async fn set_checked(&self, target: &Locator, checked: bool) -> Result<()>;
    async fn select_option(&self, target: &Locator, value: &str) -> Result<()>;
    async fn count(&self, selector: &str) -> Result<usize>;
    async fn scroll_into_view(&self, target: &Locator) -> Result<()>;
    async fn evaluate(&self, script: &str, args: Vec<serde_json::Value>) -> Result<serde_json::Value>;
    async fn screenshot_png(&self) -> Result<Vec<u8>>;
    async fn set_viewport(&self, width: u32, height: u32) -> Result<()>;
    async fn close(&self) -> Result<()>;
}

/// Serialized snapshot of what a user could observe on the page.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PageState {
    pub html_length: u64,
    pub inputs: Vec<InputState>,
    pub hidden: Vec<String>,
    pub url: String,
    pub scroll_x: f64,
    pub scroll_y: f64,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct InputState {
    pub id: String,
    pub value: Option<String>,
    pub checked: Option<bool>,
    pub selected_index: Option<i64>,
}

/// Collects a [`PageState`] inside the page. Only the HTML length is kept so
/// the payload stays small on large documents.
pub const PAGE_STATE_SCRIPT: &str = r#"
const inputs = Array.from(document.querySelectorAll('input, select, textarea')).map(el => ({
    id: el.id || el.name || '',
    value: el.value === undefined ? null : String(el.value),
    checked: typeof el.checked === 'boolean' ? el.checked : null,
    selected_index: typeof el.selectedIndex === 'number' ? el.selectedIndex : null
}));
const hidden = Array.from(document.querySelectorAll('*')).filter(el => {
    const style = window.getComputedStyle(el);
    return style.display === 'none' || style.visibility === 'hidden';
}).map(el => el.id || (typeof el.className === 'string' ? el.className : '') || '');
return JSON.stringify({
    html_length: document.documentElement.outerHTML.length,
    inputs: inputs,
    hidden: hidden,
    url: window.location.href,
    scroll_x: window.scrollX,
    scroll_y: window.scrollY
});
"#;

pub fn fingerprint(state: &PageState) -> Result<String> {
    let encoded = serde_json::to_vec(state)?;
    Ok(hex::encode(Sha256::digest(&encoded)))
}

pub async fn read_page_state<D>(driver: &D) -> Result<PageState>
where
    D: BrowserDriver + ?Sized,
{
    let raw = driver.evaluate(PAGE_STATE_SCRIPT, Vec::new()).await?;
    let text = raw
        .as_str()
        .context("page state script did not return a string")?;
    serde_json::from_str(text).context("page state script returned malformed JSON")
}

/// Samples the live page through a driver.
pub struct PageFingerprint<'a, D: BrowserDriver + ?Sized> {
    driver: &'a D,
}

impl<'a, D: BrowserDriver + ?Sized> PageFingerprint<'a, D> {
    pub fn new(driver: &'a D) -> Self {
        Self { driver }
    }
}

#[async_trait]
impl<D: BrowserDriver + ?Sized> FingerprintSource for PageFingerprint<'_, D> {
    async fn sample(&mut self) -> Result<String> {
        let state = read_page_state(self.driver).await?;
        fingerprint(&state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(url: &str, scroll_y: f64) -> PageState {
        PageState {
            html_length: 1024,
            inputs: vec![InputState {
                id: "prompt".to_string(),
                value: Some("hello".to_string()),
                checked: None,
                selected_index: None,
            }],
            hidden: vec!["spinner".to_string()],
            url: url.to_string(),
            scroll_x: 0.0,
            scroll_y,
        }
    }

    #[test]
    fn fingerprint_is_stable_for_identical_state() {
        let a = fingerprint(&state("https://example.test/", 0.0)).unwrap();
        let b = fingerprint(&state("https://example.test/", 0.0)).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn fingerprint_changes_with_scroll_or_url() {
        let base = fingerprint(&state("https://example.test/", 0.0)).unwrap();
        let scrolled = fingerprint(&state("https://example.test/", 120.0)).unwrap();
        let moved = fingerprint(&state("https://example.test/next", 0.0)).unwrap();
        assert_ne!(base, scrolled);
        assert_ne!(base, moved);
    }

    #[test]
    fn page_state_parses_script_shape() {
        let raw = r#"{"html_length":42,"inputs":[{"id":"q","value":"x","checked":null,"selected_index":null}],"hidden":[""],"url":"about:blank","scroll_x":0,"scroll_y":12.5}"#;
        let parsed: PageState = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.html_length, 42);
        assert_eq!(parsed.inputs[0].id, "q");
        assert_eq!(parsed.scroll_y, 12.5);
    }

    #[test]
    fn locator_description_mentions_index_only_when_needed() {
        assert_eq!(Locator::css("#go").describe(), "'#go'");
        assert_eq!(
            Locator::css("button").nth(2).describe(),
            "locator('button').nth(2)"
        );
    }
}
