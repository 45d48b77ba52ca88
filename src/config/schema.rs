use crate::channels::telegram::LONG_POLL_TIMEOUT_SECS;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

// ── Top-level config ──────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub telegram: TelegramConfig,

    #[serde(default)]
    pub submission: SubmissionConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub notifications: NotificationsConfig,

    #[serde(default)]
    pub bot: BotConfig,
}

// ── Telegram ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Bot API token issued by @BotFather
    #[serde(default)]
    pub bot_token: Option<String>,
    /// Bot API base URL (overridable for tests and self-hosted API servers)
    #[serde(default = "default_telegram_api_base")]
    pub api_base: String,
    /// Expected value of the `X-Telegram-Bot-Api-Secret-Token` webhook header
    #[serde(default)]
    pub webhook_secret: Option<String>,
    #[serde(default = "default_telegram_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            api_base: default_telegram_api_base(),
            webhook_secret: None,
            timeout_secs: default_telegram_timeout_secs(),
        }
    }
}

fn default_telegram_api_base() -> String {
    "https://api.telegram.org".into()
}

fn default_telegram_timeout_secs() -> u64 {
    40
}

// ── Thought submission API ────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionConfig {
    #[serde(default = "default_submission_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_submission_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            endpoint: default_submission_endpoint(),
            timeout_secs: default_submission_timeout_secs(),
        }
    }
}

fn default_submission_endpoint() -> String {
    "https://app.napkin.one/api/createThought".into()
}

fn default_submission_timeout_secs() -> u64 {
    15
}

// ── Store ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// "memory" | "sqlite" | "upstash"
    #[serde(default = "default_store_backend")]
    pub backend: String,
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: PathBuf,
    /// Upstash REST endpoint (e.g. `https://eu1-example.upstash.io`)
    #[serde(default)]
    pub upstash_url: Option<String>,
    #[serde(default)]
    pub upstash_token: Option<String>,
    #[serde(default = "default_store_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            sqlite_path: default_sqlite_path(),
            upstash_url: None,
            upstash_token: None,
            timeout_secs: default_store_timeout_secs(),
        }
    }
}

fn default_store_backend() -> String {
    "memory".into()
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("data/thoughtrelay.db")
}

fn default_store_timeout_secs() -> u64 {
    10
}

// ── Gateway ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_host")]
    pub host: String,
    #[serde(default = "default_gateway_port")]
    pub port: u16,
    /// Bearer token required on `/notifications/*` when set
    #[serde(default)]
    pub admin_token: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_gateway_host(),
            port: default_gateway_port(),
            admin_token: None,
        }
    }
}

fn default_gateway_host() -> String {
    "127.0.0.1".into()
}

fn default_gateway_port() -> u16 {
    8080
}

// ── Notifications ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationsConfig {
    /// Deliveries in flight at once during a broadcast
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_delivery_timeout_secs")]
    pub delivery_timeout_secs: u64,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            delivery_timeout_secs: default_delivery_timeout_secs(),
        }
    }
}

fn default_max_concurrency() -> usize {
    8
}

fn default_delivery_timeout_secs() -> u64 {
    10
}

// ── Bot behaviour ─────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BotConfig {
    /// Custom `/start` greeting per username; everyone else gets the default.
    #[serde(default)]
    pub greetings: HashMap<String, String>,
}

// ── Loading ───────────────────────────────────────────────────────

impl Config {
    /// Load config from a TOML file with env var overrides.
    ///
    /// A missing file is not an error: defaults are used and a warning logged.
    pub fn load(path: &Path) -> Result<Self> {
        let content = if path.exists() {
            std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path.display());
            String::new()
        };

        let mut config: Config = toml::from_str(&content).context("Failed to parse config file")?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to config
    pub fn apply_env_overrides(&mut self) {
        if let Some(token) = non_empty_env("TELEGRAM_TOKEN") {
            self.telegram.bot_token = Some(token);
        }
        if let Some(base) = non_empty_env("TELEGRAM_API_BASE") {
            self.telegram.api_base = base;
        }
        if let Some(secret) = non_empty_env("TELEGRAM_WEBHOOK_SECRET") {
            self.telegram.webhook_secret = Some(secret);
        }
        if let Some(endpoint) = non_empty_env("THOUGHT_API_ENDPOINT") {
            self.submission.endpoint = endpoint;
        }
        if let Some(backend) = non_empty_env("STORE_BACKEND") {
            self.store.backend = backend;
        }
        // Same variable names the hosted KV integration exports
        if let Some(url) = non_empty_env("KV_REST_API_URL") {
            self.store.upstash_url = Some(url);
        }
        if let Some(token) = non_empty_env("KV_REST_API_TOKEN") {
            self.store.upstash_token = Some(token);
        }
        if let Some(host) = non_empty_env("THOUGHTRELAY_HOST") {
            self.gateway.host = host;
        }
        if let Some(port) = non_empty_env("THOUGHTRELAY_PORT") {
            match port.parse() {
                Ok(p) => self.gateway.port = p,
                Err(_) => tracing::warn!("Ignoring invalid THOUGHTRELAY_PORT={port}"),
            }
        }
        if let Some(token) = non_empty_env("THOUGHTRELAY_ADMIN_TOKEN") {
            self.gateway.admin_token = Some(token);
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self.store.backend.as_str() {
            "memory" | "sqlite" => {}
            "upstash" => {
                if self.store.upstash_url.is_none() || self.store.upstash_token.is_none() {
                    anyhow::bail!(
                        "store.backend = \"upstash\" requires store.upstash_url and store.upstash_token \
                         (or KV_REST_API_URL / KV_REST_API_TOKEN)"
                    );
                }
            }
            other => anyhow::bail!("Unknown store backend '{other}' (expected memory, sqlite or upstash)"),
        }
        if self.notifications.max_concurrency == 0 {
            anyhow::bail!("notifications.max_concurrency must be at least 1");
        }
        if self.telegram.timeout_secs <= LONG_POLL_TIMEOUT_SECS {
            anyhow::bail!(
                "telegram.timeout_secs must exceed the {LONG_POLL_TIMEOUT_SECS}s long-poll window"
            );
        }
        if self.submission.timeout_secs == 0
            || self.store.timeout_secs == 0
            || self.notifications.delivery_timeout_secs == 0
        {
            anyhow::bail!("timeouts must be at least 1 second");
        }
        Ok(())
    }

    /// Bot token, or an error naming where to set it.
    pub fn require_bot_token(&self) -> Result<&str> {
        self.telegram
            .bot_token
            .as_deref()
            .context("telegram.bot_token is not set (config file or TELEGRAM_TOKEN)")
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}
