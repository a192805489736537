mod automate;
mod doctor;
mod relay;
mod serve;

use anyhow::{Result, anyhow, bail};
use console::style;
use std::path::PathBuf;

use crate::core::config::Settings;
use crate::core::terminal::{self, GuideSection, print_error};

fn print_help() {
    terminal::print_banner();

    GuideSection::new("Services")
        .command("serve", "Start the CLI execution server")
        .command("relay", "Start the Telegram relay bot")
        .print();

    GuideSection::new("Automation")
        .command("automate <plan.toml>", "Run a browser automation plan")
        .print();

    GuideSection::new("Diagnostics")
        .command("doctor", "Check the executor, WebDriver and relay setup")
        .command("help", "Show this help")
        .print();

    GuideSection::new("Flags")
        .command("--host <addr>", "serve: bind address (CLAUDE_SERVER_HOST)")
        .command("--port <n>", "serve: bind port (CLAUDE_SERVER_PORT)")
        .command("--server-url <url>", "relay/doctor: execution server (CLAUDE_SERVER_URL)")
        .command("--webdriver <url>", "automate/doctor: WebDriver endpoint (WEBDRIVER_URL)")
        .command("--base-url <url>", "automate: base for relative plan URLs (BASE_URL)")
        .command("--headless", "automate: run Chrome headless (HEADLESS)")
        .command("--verbose, -v", "Debug logging")
        .print();

    println!(
        "\n {} {} <command> [flags]\n",
        style("Usage:").bold(),
        style("sitepilot").green()
    );
}

/// Flags shared by every subcommand. Each one overrides its environment
/// counterpart in [`Settings`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct CommandFlags {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub server_url: Option<String>,
    pub webdriver_url: Option<String>,
    pub base_url: Option<String>,
    pub headless: bool,
    pub verbose: bool,
    pub positional: Vec<String>,
}

impl CommandFlags {
    pub(crate) fn apply(&self, settings: &mut Settings) {
        if let Some(host) = &self.host {
            settings.server.host = host.clone();
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(url) = &self.server_url {
            settings.relay.server_url = url.clone();
        }
        if let Some(url) = &self.webdriver_url {
            settings.automate.webdriver_url = url.clone();
        }
        if let Some(url) = &self.base_url {
            settings.automate.base_url = Some(url.clone());
        }
        if self.headless {
            settings.automate.headless = true;
        }
    }
}

fn flag_value(args: &[String], i: usize) -> Result<String> {
    args.get(i + 1)
        .cloned()
        .ok_or_else(|| anyhow!("{} requires a value", args[i]))
}

pub(crate) fn parse_command_flags(args: &[String], start: usize) -> Result<CommandFlags> {
    let mut flags = CommandFlags::default();
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--host" => {
                flags.host = Some(flag_value(args, i)?);
                i += 2;
            }
            "--port" | "-p" => {
                let raw = flag_value(args, i)?;
                flags.port = Some(
                    raw.parse()
                        .map_err(|_| anyhow!("invalid port '{}'", raw))?,
                );
                i += 2;
            }
            "--server-url" => {
                flags.server_url = Some(flag_value(args, i)?);
                i += 2;
            }
            "--webdriver" => {
                flags.webdriver_url = Some(flag_value(args, i)?);
                i += 2;
            }
            "--base-url" => {
                flags.base_url = Some(flag_value(args, i)?);
                i += 2;
            }
            "--headless" => {
                flags.headless = true;
                i += 1;
            }
            "--verbose" | "-v" => {
                flags.verbose = true;
                i += 1;
            }
            other if other.starts_with('-') => bail!("unknown flag '{}'", other),
            other => {
                flags.positional.push(other.to_string());
                i += 1;
            }
        }
    }
    Ok(flags)
}

pub async fn run_main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(String::as_str).unwrap_or("help");

    if matches!(command, "help" | "--help" | "-h") {
        print_help();
        return Ok(());
    }

    let flags = parse_command_flags(&args, 2)?;
    let mut settings = Settings::from_env()?;
    flags.apply(&mut settings);

    match command {
        "serve" => {
            let log_tx = crate::logging::init(flags.verbose);
            serve::run(settings.server, log_tx).await
        }
        "relay" => {
            crate::logging::init(flags.verbose);
            relay::run(settings.relay).await
        }
        "automate" => {
            let Some(plan) = flags.positional.first() else {
                bail!("Usage: sitepilot automate <plan.toml>");
            };
            crate::logging::init(flags.verbose);
            automate::run(settings.automate, PathBuf::from(plan)).await
        }
        "doctor" => doctor::run(&settings).await,
        other => {
            print_error(&format!("Unknown command '{}'", other));
            print_help();
            bail!("unknown command '{}'", other)
        }
    }
}
