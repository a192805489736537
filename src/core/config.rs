//! Settings read from the process environment (after `.env` is loaded).
//! Command-line flags are layered on top by the CLI.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::core::executor::ExecutorConfig;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 5555;
pub const DEFAULT_SERVER_URL: &str = "http://localhost:5555";
pub const DEFAULT_WEBDRIVER_URL: &str = "http://localhost:9515";
pub const DEFAULT_RELAY_PREFIX: &str = "claude:";
pub const DEFAULT_ALLOWED_USERS_FILE: &str = "allowed_users.json";

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Shared secret required as `Authorization: Bearer <token>` when set.
    pub token: Option<String>,
    pub executor: ExecutorConfig,
    pub job_retention: Duration,
    pub sweep_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub bot_token: Option<String>,
    pub server_url: String,
    pub allowed_users_file: PathBuf,
    pub prefix: String,
}

#[derive(Debug, Clone)]
pub struct AutomateSettings {
    pub webdriver_url: String,
    pub base_url: Option<String>,
    pub headless: bool,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub relay: RelaySettings,
    pub automate: AutomateSettings,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds settings from any key lookup; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let defaults = ExecutorConfig::default();
        let executor = ExecutorConfig {
            program: get("EXEC_PROGRAM").unwrap_or(defaults.program),
            args: get("EXEC_ARGS")
                .map(|raw| raw.split_whitespace().map(str::to_string).collect())
                .unwrap_or(defaults.args),
            // Present-but-empty disables the user switch.
            run_as: match lookup("EXEC_RUN_AS") {
                Some(v) if v.trim().is_empty() => None,
                Some(v) => Some(v.trim().to_string()),
                None => defaults.run_as,
            },
            timeout: secs(&get, "EXEC_TIMEOUT_SECS")?.unwrap_or(defaults.timeout),
            workdir: get("EXEC_WORKDIR").map(PathBuf::from),
        };

        let server = ServerSettings {
            host: get("CLAUDE_SERVER_HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: parse(&get, "CLAUDE_SERVER_PORT")?.unwrap_or(DEFAULT_PORT),
            token: get("EXEC_SERVER_TOKEN"),
            executor,
            job_retention: secs(&get, "JOB_RETENTION_SECS")?.unwrap_or(Duration::from_secs(3600)),
            sweep_interval: secs(&get, "JOB_SWEEP_INTERVAL_SECS")?.unwrap_or(Duration::from_secs(3600)),
        };

        let relay = RelaySettings {
            bot_token: get("BOT_TOKEN"),
            server_url: get("CLAUDE_SERVER_URL").unwrap_or_else(|| DEFAULT_SERVER_URL.to_string()),
            allowed_users_file: get("ALLOWED_USERS_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_ALLOWED_USERS_FILE)),
            prefix: get("RELAY_PREFIX").unwrap_or_else(|| DEFAULT_RELAY_PREFIX.to_string()),
        };

        let automate = AutomateSettings {
            webdriver_url: get("WEBDRIVER_URL").unwrap_or_else(|| DEFAULT_WEBDRIVER_URL.to_string()),
            base_url: get("BASE_URL"),
            headless: parse::<bool>(&get, "HEADLESS")?.unwrap_or(false),
        };

        Ok(Self {
            server,
            relay,
            automate,
        })
    }
}

fn parse<T>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    get(key)
        .map(|raw| raw.parse::<T>().with_context(|| format!("invalid {}: '{}'", key, raw)))
        .transpose()
}

fn secs(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<Duration>> {
    Ok(parse::<u64>(get, key)?.map(Duration::from_secs))
}
