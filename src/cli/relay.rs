use anyhow::{Result, anyhow};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::core::config::RelaySettings;
use crate::core::lifecycle::LifecycleManager;
use crate::core::terminal::{GuideSection, print_warn};
use crate::interfaces::telegram::{AllowList, ExecutionClient, RelayContext, TelegramRelay};

pub async fn run(settings: RelaySettings) -> Result<()> {
    let token = settings
        .bot_token
        .clone()
        .ok_or_else(|| anyhow!("BOT_TOKEN is not set. Add it to .env or the environment."))?;

    let allow_list = AllowList::load(&settings.allowed_users_file);
    if !allow_list.is_enforced() {
        print_warn(&format!(
            "{} not found or empty: every Telegram user may run prompts",
            settings.allowed_users_file.display()
        ));
    }

    let context = RelayContext {
        allow_list,
        client: ExecutionClient::new(&settings.server_url),
        prefix: settings.prefix.clone(),
    };

    let mut lifecycle = LifecycleManager::new().await?;
    lifecycle.attach(Arc::new(Mutex::new(TelegramRelay::new(token, context))));
    lifecycle.start().await?;

    GuideSection::new("Telegram Relay")
        .status("Execution server", &settings.server_url)
        .status("Prefix", &settings.prefix)
        .blank()
        .text("Press Ctrl+C to stop.")
        .print();

    tokio::signal::ctrl_c().await?;
    lifecycle.shutdown().await
}
