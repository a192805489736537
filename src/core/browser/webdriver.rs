use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use base64::Engine;
use reqwest::Method;
use serde_json::{Value, json};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

use super::{BrowserDriver, Locator};

const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

#[derive(Debug, Clone)]
pub struct WebDriverOptions {
    pub webdriver_url: String,
    pub headless: bool,
    pub width: u32,
    pub height: u32,
    pub download_dir: Option<PathBuf>,
}

impl Default for WebDriverOptions {
    fn default() -> Self {
        Self {
            webdriver_url: "http://localhost:9515".to_string(),
            headless: false,
            width: 1920,
            height: 1080,
            download_dir: None,
        }
    }
}

/// Chrome session driven over the W3C WebDriver HTTP protocol
/// (chromedriver or a Selenium grid).
pub struct WebDriverClient {
    http: reqwest::Client,
    base: String,
    session_id: String,
}

impl WebDriverClient {
    pub async fn connect(options: &WebDriverOptions) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;
        let base = options.webdriver_url.trim_end_matches('/').to_string();

        let body = json!({ "capabilities": { "alwaysMatch": session_capabilities(options) } });
        let resp = http
            .post(format!("{}/session", base))
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Cannot reach WebDriver at {}", base))?;
        let value = unwrap_response(resp).await?;
        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("WebDriver did not return a sessionId"))?
            .to_string();

        info!("WebDriver session {} started at {}", session_id, base);
        Ok(Self {
            http,
            base,
            session_id,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn command(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value> {
        let url = format!("{}/session/{}{}", self.base, self.session_id, path);
        debug!("WebDriver {} {}", method, path);
        let mut req = self.http.request(method, &url);
        if let Some(body) = body {
            req = req.json(&body);
        }
        let resp = req.send().await?;
        unwrap_response(resp).await
    }

    async fn element(&self, target: &Locator) -> Result<String> {
        let found = self
            .command(
                Method::POST,
                "/elements",
                Some(json!({ "using": "css selector", "value": target.selector })),
            )
            .await?;
        let elements = found
            .as_array()
            .ok_or_else(|| anyhow!("WebDriver returned a non-array element list"))?;
        let element = elements.get(target.index).ok_or_else(|| {
            anyhow!(
                "no element matches {} ({} found)",
                target.describe(),
                elements.len()
            )
        })?;
        element_id(element)
    }

    async fn send_keys(&self, element: &str, text: &str) -> Result<()> {
        self.command(
            Method::POST,
            &format!("/element/{}/value", element),
            Some(json!({ "text": text })),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl BrowserDriver for WebDriverClient {
    async fn goto(&self, url: &str) -> Result<()> {
        self.command(Method::POST, "/url", Some(json!({ "url": url })))
            .await?;
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        let value = self.command(Method::GET, "/url", None).await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("WebDriver returned a non-string URL"))
    }

    async fn click(&self, target: &Locator) -> Result<()> {
        let element = self.element(target).await?;
        self.command(
            Method::POST,
            &format!("/element/{}/click", element),
            Some(json!({})),
        )
        .await?;
        Ok(())
    }

    async fn fill(&self, target: &Locator, value: &str) -> Result<()> {
        let element = self.element(target).await?;
        self.command(
            Method::POST,
            &format!("/element/{}/clear", element),
            Some(json!({})),
        )
        .await?;
        self.send_keys(&element, value).await
    }

    async fn type_text(&self, target: &Locator, text: &str) -> Result<()> {
        let element = self.element(target).await?;
        self.send_keys(&element, text).await
    }

    async fn upload_files(&self, target: &Locator, files: &[PathBuf]) -> Result<()> {
        let element = self.element(target).await?;
        let mut paths = Vec::with_capacity(files.len());
        for file in files {
            let absolute = std::fs::canonicalize(file)
                .with_context(|| format!("upload file not found: {}", file.display()))?;
            paths.push(absolute.to_string_lossy().to_string());
        }
        self.send_keys(&element, &paths.join("\n")).await
    }

    async fn press_key(&self, key: &str) -> Result<()> {
        let code = key_code(key);
        self.command(
            Method::POST,
            "/actions",
            Some(json!({
                "actions": [{
                    "type": "key",
                    "id": "keyboard",
                    "actions": [
                        { "type": "keyDown", "value": code },
                        { "type": "keyUp", "value": code }
                    ]
                }]
            })),
        )
        .await?;
        self.command(Method::DELETE, "/actions", None).await?;
        Ok(())
    }

    async fn hover(&self, target: &Locator) -> Result<()> {
        let element = self.element(target).await?;
        self.command(
            Method::POST,
            "/actions",
            Some(json!({
                "actions": [{
                    "type": "pointer",
                    "id": "mouse",
                    "parameters": { "pointerType": "mouse" },
                    "actions": [{
                        "type": "pointerMove",
                        "duration": 0,
                        "origin": { ELEMENT_KEY: element },
                        "x": 0,
                        "y": 0
                    }]
                }]
            })),
        )
        .await?;
        Ok(())
    }

    async fn set_checked(&self, target: &Locator, checked: bool) -> Result<()> {
        let element = self.element(target).await?;
        let current = self
            .evaluate(
                "return !!arguments[0].checked;",
                vec![json!({ ELEMENT_KEY: element })],
            )
            .await?;
        if current.as_bool() != Some(checked) {
            self.command(
                Method::POST,
                &format!("/element/{}/click", element),
                Some(json!({})),
            )
            .await?;
        }
        Ok(())
    }

    async fn select_option(&self, target: &Locator, value: &str) -> Result<()> {
        let element = self.element(target).await?;
        let matched = self
            .evaluate(
                r#"
const select = arguments[0];
const wanted = arguments[1];
const option = Array.from(select.options || []).find(o => o.value === wanted || o.label === wanted);
if (!option) { return false; }
select.value = option.value;
select.dispatchEvent(new Event('input', { bubbles: true }));
select.dispatchEvent(new Event('change', { bubbles: true }));
return true;
"#,
                vec![json!({ ELEMENT_KEY: element }), json!(value)],
            )
            .await?;
        if matched.as_bool() != Some(true) {
            return Err(anyhow!(
                "no option '{}' in {}",
                value,
                target.describe()
            ));
        }
        Ok(())
    }

    async fn count(&self, selector: &str) -> Result<usize> {
        let found = self
            .command(
                Method::POST,
                "/elements",
                Some(json!({ "using": "css selector", "value": selector })),
            )
            .await?;
        Ok(found.as_array().map(Vec::len).unwrap_or(0))
    }

    async fn scroll_into_view(&self, target: &Locator) -> Result<()> {
        let element = self.element(target).await?;
        self.evaluate(
            "arguments[0].scrollIntoView({ behavior: 'smooth', block: 'center', inline: 'center' });",
            vec![json!({ ELEMENT_KEY: element })],
        )
        .await?;
        Ok(())
    }

    async fn evaluate(&self, script: &str, args: Vec<Value>) -> Result<Value> {
        self.command(
            Method::POST,
            "/execute/sync",
            Some(json!({ "script": script, "args": args })),
        )
        .await
    }

    async fn screenshot_png(&self) -> Result<Vec<u8>> {
        let value = self.command(Method::GET, "/screenshot", None).await?;
        let encoded = value
            .as_str()
            .ok_or_else(|| anyhow!("WebDriver returned a non-string screenshot"))?;
        Ok(base64::engine::general_purpose::STANDARD.decode(encoded)?)
    }

    async fn set_viewport(&self, width: u32, height: u32) -> Result<()> {
        self.command(
            Method::POST,
            "/window/rect",
            Some(json!({ "width": width, "height": height })),
        )
        .await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let url = format!("{}/session/{}", self.base, self.session_id);
        let resp = self.http.delete(&url).send().await?;
        unwrap_response(resp).await?;
        info!("WebDriver session {} closed", self.session_id);
        Ok(())
    }
}

fn session_capabilities(options: &WebDriverOptions) -> Value {
    let mut args = vec![
        "--ignore-certificate-errors".to_string(),
        format!("--window-size={},{}", options.width, options.height),
    ];
    if options.headless {
        args.push("--headless=new".to_string());
    }

    let mut chrome = json!({ "args": args });
    if let Some(dir) = &options.download_dir {
        chrome["prefs"] = json!({
            "download.default_directory": dir.to_string_lossy(),
            "download.prompt_for_download": false,
            "download.directory_upgrade": true
        });
    }

    json!({
        "browserName": "chrome",
        "acceptInsecureCerts": true,
        "goog:chromeOptions": chrome
    })
}

async fn unwrap_response(resp: reqwest::Response) -> Result<Value> {
    let status = resp.status();
    let body: Value = resp
        .json()
        .await
        .with_context(|| format!("WebDriver returned a non-JSON body (HTTP {})", status))?;
    let value = body.get("value").cloned().unwrap_or(Value::Null);

    if let Some(error) = value.get("error").and_then(Value::as_str) {
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default();
        return Err(anyhow!("WebDriver error '{}': {}", error, message));
    }
    if !status.is_success() {
        return Err(anyhow!("WebDriver request failed with HTTP {}", status));
    }
    Ok(value)
}

fn element_id(element: &Value) -> Result<String> {
    element
        .get(ELEMENT_KEY)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| anyhow!("WebDriver returned an element without a reference"))
}

/// Maps Playwright-style key names to WebDriver key codepoints.
fn key_code(key: &str) -> String {
    let code = match key {
        "Enter" => '\u{E007}',
        "Tab" => '\u{E004}',
        "Escape" => '\u{E00C}',
        "Backspace" => '\u{E003}',
        "Delete" => '\u{E017}',
        "Space" => ' ',
        "ArrowLeft" => '\u{E012}',
        "ArrowUp" => '\u{E013}',
        "ArrowRight" => '\u{E014}',
        "ArrowDown" => '\u{E015}',
        "PageUp" => '\u{E00E}',
        "PageDown" => '\u{E00F}',
        "Home" => '\u{E011}',
        "End" => '\u{E010}',
        _ => return key.to_string(),
    };
    code.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Json, Router,
        extract::{Path, State},
        routing::{get, post},
    };
    use std::sync::{Arc, Mutex};

    type Calls = Arc<Mutex<Vec<String>>>;

    async fn new_session(State(calls): State<Calls>, Json(body): Json<Value>) -> Json<Value> {
        let headless = body["capabilities"]["alwaysMatch"]["goog:chromeOptions"]["args"]
            .as_array()
            .map(|a| a.iter().any(|v| v == "--headless=new"))
            .unwrap_or(false);
        calls
            .lock()
            .unwrap()
            .push(format!("new_session headless={}", headless));
        Json(json!({ "value": { "sessionId": "s1", "capabilities": {} } }))
    }

    async fn elements(
        Path(_sid): Path<String>,
        State(calls): State<Calls>,
        Json(body): Json<Value>,
    ) -> Json<Value> {
        let selector = body["value"].as_str().unwrap_or_default().to_string();
        calls.lock().unwrap().push(format!("elements {}", selector));
        if selector == "#missing" {
            return Json(json!({ "value": [] }));
        }
        Json(json!({ "value": [{ ELEMENT_KEY: "e1" }, { ELEMENT_KEY: "e2" }] }))
    }

    async fn click(
        Path((_sid, element)): Path<(String, String)>,
        State(calls): State<Calls>,
    ) -> Json<Value> {
        calls.lock().unwrap().push(format!("click {}", element));
        Json(json!({ "value": null }))
    }

    async fn execute(Path(_sid): Path<String>) -> Json<Value> {
        Json(json!({ "value": "{\"ok\":true}" }))
    }

    async fn screenshot(Path(_sid): Path<String>) -> Json<Value> {
        let png = base64::engine::general_purpose::STANDARD.encode([0x89u8, b'P', b'N', b'G']);
        Json(json!({ "value": png }))
    }

    async fn navigate(Path(_sid): Path<String>) -> (axum::http::StatusCode, Json<Value>) {
        (
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "value": { "error": "unknown error", "message": "net::ERR_NAME_NOT_RESOLVED" } })),
        )
    }

    async fn spawn_mock() -> (String, Calls) {
        let calls: Calls = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new()
            .route("/session", post(new_session))
            .route("/session/{sid}/elements", post(elements))
            .route("/session/{sid}/element/{element}/click", post(click))
            .route("/session/{sid}/execute/sync", post(execute))
            .route("/session/{sid}/screenshot", get(screenshot))
            .route("/session/{sid}/url", post(navigate))
            .with_state(calls.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        (format!("http://{}", addr), calls)
    }

    async fn connect(url: &str) -> WebDriverClient {
        let options = WebDriverOptions {
            webdriver_url: url.to_string(),
            headless: true,
            ..WebDriverOptions::default()
        };
        WebDriverClient::connect(&options).await.unwrap()
    }

    #[tokio::test]
    async fn session_start_sends_capabilities() {
        let (url, calls) = spawn_mock().await;
        let client = connect(&url).await;
        assert_eq!(client.session_id(), "s1");
        assert_eq!(calls.lock().unwrap()[0], "new_session headless=true");
    }

    #[tokio::test]
    async fn click_targets_the_indexed_match() {
        let (url, calls) = spawn_mock().await;
        let client = connect(&url).await;

        client.click(&Locator::css("button").nth(1)).await.unwrap();

        let calls = calls.lock().unwrap();
        assert!(calls.contains(&"elements button".to_string()));
        assert!(calls.contains(&"click e2".to_string()));
    }

    #[tokio::test]
    async fn missing_element_is_an_error() {
        let (url, _calls) = spawn_mock().await;
        let client = connect(&url).await;

        let err = client.click(&Locator::css("#missing")).await.unwrap_err();
        assert!(err.to_string().contains("no element matches"));
        assert_eq!(client.count("#missing").await.unwrap(), 0);
        assert_eq!(client.count("li").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn webdriver_error_payload_becomes_error() {
        let (url, _calls) = spawn_mock().await;
        let client = connect(&url).await;

        let err = client.goto("https://nowhere.invalid").await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("unknown error"));
        assert!(msg.contains("ERR_NAME_NOT_RESOLVED"));
    }

    #[tokio::test]
    async fn screenshot_is_base64_decoded() {
        let (url, _calls) = spawn_mock().await;
        let client = connect(&url).await;
        let png = client.screenshot_png().await.unwrap();
        assert_eq!(png, vec![0x89, b'P', b'N', b'G']);
    }

    #[test]
    fn named_keys_map_to_webdriver_codepoints() {
        assert_eq!(key_code("Enter"), "\u{E007}");
        assert_eq!(key_code("a"), "a");
    }
}
