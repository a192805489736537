//! Telegram relay: forwards `claude:` prompts from allowed users to the
//! execution server and replies with the output.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use teloxide::prelude::*;
use teloxide::types::ParseMode;
use tracing::{error, info, warn};

use crate::core::executor::ExecutionResult;
use crate::core::jobs::JobStatus;
use crate::core::lifecycle::LifecycleComponent;
use crate::core::session::escape_html;

/// Telegram rejects messages above 4096 characters.
pub const MAX_MESSAGE_CHARS: usize = 4000;
const EXECUTE_TIMEOUT: Duration = Duration::from_secs(300);
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

pub const ACCESS_DENIED: &str = "❌ Access denied. You are not authorized to use this bot.";
pub const PROCESSING: &str = "⏳ Processing Claude command via execution server...";

#[derive(serde::Deserialize)]
struct AllowListFile {
    #[serde(default)]
    allowed_users: Vec<AllowedUser>,
}

#[derive(serde::Deserialize)]
struct AllowedUser {
    id: u64,
}

/// Telegram user ids permitted to use the relay. Empty means open access.
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    ids: HashSet<u64>,
}

impl AllowList {
    /// A missing or malformed file yields an empty list (access control off).
    pub fn load(path: &Path) -> Self {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(_) => {
                warn!("{} not found. Access control disabled.", path.display());
                return Self::default();
            }
        };
        match serde_json::from_str::<AllowListFile>(&raw) {
            Ok(file) => {
                let ids: HashSet<u64> = file.allowed_users.into_iter().map(|u| u.id).collect();
                info!("Loaded {} allowed users from whitelist", ids.len());
                Self { ids }
            }
            Err(e) => {
                warn!("{} is invalid JSON ({}). Access control disabled.", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn from_ids(ids: impl IntoIterator<Item = u64>) -> Self {
        Self {
            ids: ids.into_iter().collect(),
        }
    }

    pub fn is_enforced(&self) -> bool {
        !self.ids.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_allowed(&self, user_id: u64) -> bool {
        !self.is_enforced() || self.ids.contains(&user_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayRoute {
    Execute(String),
    MissingPrompt,
    Echo(String),
}

/// Case-insensitive prefix match; the remainder is trimmed.
pub fn route_message(text: &str, prefix: &str) -> RelayRoute {
    let matched = text
        .get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix));
    if !matched {
        return RelayRoute::Echo(text.to_string());
    }
    let prompt = text[prefix.len()..].trim();
    if prompt.is_empty() {
        RelayRoute::MissingPrompt
    } else {
        RelayRoute::Execute(prompt.to_string())
    }
}

/// Wraps the output in `<code>` blocks, splitting so that no message exceeds
/// [`MAX_MESSAGE_CHARS`] and no HTML entity or tag is cut in half.
pub fn format_response(output: &str) -> Vec<String> {
    const HEADER: &str = "<b>Claude Response:</b>\n\n";
    const OPEN: &str = "<code>";
    const CLOSE: &str = "</code>";

    let mut messages = Vec::new();
    let mut body = String::new();
    let mut body_chars = 0;
    let budget = |first: bool| {
        MAX_MESSAGE_CHARS - OPEN.len() - CLOSE.len() - if first { HEADER.chars().count() } else { 0 }
    };

    for ch in output.chars() {
        let escaped = escape_html(ch.encode_utf8(&mut [0u8; 4]));
        let len = escaped.chars().count();
        if body_chars + len > budget(messages.is_empty()) {
            messages.push(std::mem::take(&mut body));
            body_chars = 0;
        }
        body.push_str(&escaped);
        body_chars += len;
    }
    messages.push(body);

    messages
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| {
            let header = if i == 0 { HEADER } else { "" };
            format!("{header}{OPEN}{chunk}{CLOSE}")
        })
        .collect()
}

pub fn format_error(err: &anyhow::Error) -> String {
    format!(
        "<b>Error executing Claude command:</b>\n<code>{}</code>",
        escape_html(&err.to_string())
    )
}

/// HTTP client for the execution server's `/health` and `/execute`.
#[derive(Clone)]
pub struct ExecutionClient {
    http: reqwest::Client,
    base: String,
}

impl ExecutionClient {
    pub fn new(base: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: base.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    pub async fn health(&self) -> Result<reqwest::StatusCode> {
        let resp = self
            .http
            .get(format!("{}/health", self.base))
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await?;
        Ok(resp.status())
    }

    /// Returns stdout of a successful run. `status=error` and non-zero exit
    /// codes are both failures here.
    pub async fn execute(&self, prompt: &str) -> Result<String> {
        let resp = self
            .http
            .post(format!("{}/execute", self.base))
            .json(&serde_json::json!({ "prompt": prompt, "stream": false }))
            .timeout(EXECUTE_TIMEOUT)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let result: ExecutionResult = resp
            .error_for_status()
            .map_err(|e| anyhow!("Request error: {}", e))?
            .json()
            .await
            .map_err(|e| anyhow!("Malformed response from execution server: {}", e))?;

        if result.status == JobStatus::Error {
            return Err(anyhow!(
                "{}",
                result
                    .error
                    .unwrap_or_else(|| "Unknown error from execution server".to_string())
            ));
        }
        if result.return_code != Some(0) {
            return Err(anyhow!(
                "{}",
                result
                    .error
                    .filter(|e| !e.trim().is_empty())
                    .unwrap_or_else(|| "Command returned non-zero exit code".to_string())
            ));
        }
        Ok(result.output.unwrap_or_default())
    }

    fn transport_error(&self, e: reqwest::Error) -> anyhow::Error {
        if e.is_connect() {
            anyhow!(
                "Cannot connect to Claude Execution Server at {}. Make sure it's running.",
                self.base
            )
        } else if e.is_timeout() {
            anyhow!("Claude Execution Server request timed out (5 minutes)")
        } else {
            anyhow!("Request error: {}", e)
        }
    }
}

/// Where replies go. Telegram in production, a buffer in tests.
#[async_trait]
pub trait ReplySink: Send {
    async fn reply(&mut self, html: String);
}

pub struct RelayContext {
    pub allow_list: AllowList,
    pub client: ExecutionClient,
    pub prefix: String,
}

impl RelayContext {
    pub async fn handle_text<S: ReplySink + ?Sized>(&self, user_id: u64, user_name: &str, text: &str, sink: &mut S) {
        info!("Message from {} (ID: {}): {:?}", user_name, user_id, text);

        if !self.allow_list.is_allowed(user_id) {
            warn!("Unauthorized access attempt by {} (ID: {})", user_name, user_id);
            sink.reply(ACCESS_DENIED.to_string()).await;
            return;
        }

        match route_message(text, &self.prefix) {
            RelayRoute::MissingPrompt => {
                sink.reply(format!(
                    "Error: Please provide a prompt after \"{}\"",
                    escape_html(&self.prefix)
                ))
                .await;
            }
            RelayRoute::Echo(text) => {
                sink.reply(format!("Echo: {}", escape_html(&text))).await;
            }
            RelayRoute::Execute(prompt) => {
                info!("Executing prompt via execution server: {:?}", prompt);
                sink.reply(PROCESSING.to_string()).await;
                match self.client.execute(&prompt).await {
                    Ok(output) => {
                        for message in format_response(&output) {
                            sink.reply(message).await;
                        }
                        info!("Prompt completed successfully");
                    }
                    Err(e) => {
                        error!("Prompt failed: {}", e);
                        sink.reply(format_error(&e)).await;
                    }
                }
            }
        }
    }
}

struct ChatReplies {
    bot: Bot,
    chat: ChatId,
}

#[async_trait]
impl ReplySink for ChatReplies {
    async fn reply(&mut self, html: String) {
        if let Err(e) = self
            .bot
            .send_message(self.chat, html)
            .parse_mode(ParseMode::Html)
            .await
        {
            error!("Failed to send message to chat {}: {}", self.chat, e);
        }
    }
}

pub struct TelegramRelay {
    token: String,
    context: Arc<RelayContext>,
}

impl TelegramRelay {
    pub fn new(token: String, context: RelayContext) -> Self {
        Self {
            token,
            context: Arc::new(context),
        }
    }
}

#[async_trait]
impl LifecycleComponent for TelegramRelay {
    /// The bot token must work; the execution server may come up later.
    async fn on_init(&mut self) -> Result<()> {
        info!("Telegram relay initializing...");
        let bot = Bot::new(&self.token);
        let me = bot
            .get_me()
            .await
            .map_err(|e| anyhow!("Failed to connect to Telegram: {}. Please check your BOT_TOKEN", e))?;
        info!("Connected as @{} (ID: {})", me.username(), me.id);

        let client = &self.context.client;
        match client.health().await {
            Ok(status) if status.is_success() => {
                info!("Execution server is running on {}", client.base_url());
            }
            Ok(status) => warn!("Execution server returned status {}", status),
            Err(_) => warn!(
                "Cannot connect to execution server at {}; prompts will fail until it is available",
                client.base_url()
            ),
        }

        if self.context.allow_list.is_enforced() {
            info!(
                "Access control: enabled ({} authorized users)",
                self.context.allow_list.len()
            );
        } else {
            warn!("Access control: disabled (all users allowed)");
        }
        Ok(())
    }

    async fn on_start(&mut self) -> Result<()> {
        info!("Telegram relay starting long polling...");
        let bot = Bot::new(&self.token);
        let context = self.context.clone();

        // Updates from one chat are handled in order; chats run concurrently.
        tokio::spawn(async move {
            teloxide::repl(bot, move |bot: Bot, msg: Message| {
                let context = context.clone();
                async move {
                    let (Some(text), Some(user)) = (msg.text(), msg.from.as_ref()) else {
                        return Ok(());
                    };
                    let mut replies = ChatReplies {
                        bot,
                        chat: msg.chat.id,
                    };
                    context
                        .handle_text(user.id.0, &user.first_name, text, &mut replies)
                        .await;
                    Ok(())
                }
            })
            .await;
        });
        Ok(())
    }

    async fn on_shutdown(&mut self) -> Result<()> {
        info!("Telegram relay shutting down...");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, routing::{get, post}};

    #[derive(Default)]
    struct Collected(Vec<String>);

    #[async_trait]
    impl ReplySink for Collected {
        async fn reply(&mut self, html: String) {
            self.0.push(html);
        }
    }

    async fn mock_server(result: serde_json::Value) -> String {
        let app = Router::new()
            .route("/health", get(|| async { Json(serde_json::json!({"status": "healthy"})) }))
            .route(
                "/execute",
                post(move || {
                    let result = result.clone();
                    async move { Json(result) }
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn context(base: &str, allowed: &[u64]) -> RelayContext {
        RelayContext {
            allow_list: AllowList::from_ids(allowed.iter().copied()),
            client: ExecutionClient::new(base),
            prefix: "claude:".to_string(),
        }
    }

    #[test]
    fn routes_by_case_insensitive_prefix() {
        assert_eq!(
            route_message("Claude: list files", "claude:"),
            RelayRoute::Execute("list files".to_string())
        );
        assert_eq!(route_message("CLAUDE:   ", "claude:"), RelayRoute::MissingPrompt);
        assert_eq!(
            route_message("hello", "claude:"),
            RelayRoute::Echo("hello".to_string())
        );
        // multi-byte text shorter than the prefix must not panic
        assert_eq!(route_message("é", "claude:"), RelayRoute::Echo("é".to_string()));
    }

    #[test]
    fn allow_list_loading() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("allowed_users.json");

        assert!(!AllowList::load(&path).is_enforced());

        std::fs::write(&path, "{ not json").unwrap();
        assert!(!AllowList::load(&path).is_enforced());

        std::fs::write(
            &path,
            r#"{"allowed_users": [{"id": 42, "name": "ops"}, {"id": 7}]}"#,
        )
        .unwrap();
        let list = AllowList::load(&path);
        assert_eq!(list.len(), 2);
        assert!(list.is_allowed(42));
        assert!(!list.is_allowed(1));
    }

    #[test]
    fn long_output_is_split_into_valid_chunks() {
        let output = "<&>".repeat(3000);
        let messages = format_response(&output);
        assert!(messages.len() > 1);
        assert!(messages[0].starts_with("<b>Claude Response:</b>"));
        for message in &messages {
            assert!(message.chars().count() <= MAX_MESSAGE_CHARS);
            assert!(message.contains("<code>") && message.ends_with("</code>"));
            let body = message.split("<code>").nth(1).unwrap();
            assert!(!body.trim_end_matches("</code>").ends_with('&'));
        }
        let rejoined: String = messages
            .iter()
            .map(|m| m.split("<code>").nth(1).unwrap().trim_end_matches("</code>"))
            .collect();
        assert_eq!(rejoined, escape_html(&output));
    }

    #[test]
    fn short_output_is_a_single_message() {
        assert_eq!(
            format_response("ok"),
            vec!["<b>Claude Response:</b>\n\n<code>ok</code>".to_string()]
        );
    }

    #[tokio::test]
    async fn denied_users_get_one_reply() {
        let ctx = context("http://127.0.0.1:9", &[1]);
        let mut out = Collected::default();
        ctx.handle_text(2, "mallory", "claude: rm", &mut out).await;
        assert_eq!(out.0, vec![ACCESS_DENIED.to_string()]);
    }

    #[tokio::test]
    async fn echo_path_escapes_text() {
        let ctx = context("http://127.0.0.1:9", &[]);
        let mut out = Collected::default();
        ctx.handle_text(2, "ann", "hi <there>", &mut out).await;
        assert_eq!(out.0, vec!["Echo: hi &lt;there&gt;".to_string()]);
    }

    #[tokio::test]
    async fn successful_prompt_replies_with_output() {
        let base = mock_server(serde_json::json!({
            "job_id": "j", "status": "completed", "output": "4", "error": null, "return_code": 0
        }))
        .await;
        let ctx = context(&base, &[]);
        let mut out = Collected::default();
        ctx.handle_text(2, "ann", "claude: 2+2", &mut out).await;
        assert_eq!(out.0[0], PROCESSING);
        assert_eq!(out.0[1], "<b>Claude Response:</b>\n\n<code>4</code>");
    }

    #[tokio::test]
    async fn non_zero_exit_is_reported_as_error() {
        let base = mock_server(serde_json::json!({
            "job_id": "j", "status": "completed", "output": "", "error": "boom", "return_code": 1
        }))
        .await;
        let err = ExecutionClient::new(&base).execute("x").await.unwrap_err();
        assert_eq!(err.to_string(), "boom");

        let base = mock_server(serde_json::json!({
            "job_id": "j", "status": "error", "error": "Command execution timed out after 300 seconds"
        }))
        .await;
        let err = ExecutionClient::new(&base).execute("x").await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn unreachable_server_has_distinct_message() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = ExecutionClient::new(&format!("http://{}", addr))
            .execute("x")
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("Cannot connect to Claude Execution Server"));
    }
}
