use super::traits::{Channel, IncomingMessage, MessageKind, ParseMode, SendMessage};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

/// Seconds a `getUpdates` call is held open by Telegram when idle.
pub const LONG_POLL_TIMEOUT_SECS: u64 = 30;

/// Subset of the Bot API `Update` object the bot consumes
#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<TelegramMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramMessage {
    pub chat: TelegramChat,
    #[serde(default)]
    pub from: Option<TelegramUser>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub sticker: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    #[serde(default)]
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
}

/// Telegram channel: Bot API over HTTPS, fed by webhook or long polling
pub struct TelegramChannel {
    bot_token: String,
    api_base: String,
    client: reqwest::Client,
}

impl TelegramChannel {
    pub fn new(bot_token: String) -> Self {
        Self {
            bot_token,
            api_base: "https://api.telegram.org".into(),
            client: reqwest::Client::new(),
        }
    }

    /// Point the channel at a different Bot API server (tests, local API server).
    pub fn with_api_base(mut self, api_base: String) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    /// Bound every Bot API call. Must exceed the long-poll timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> anyhow::Result<Self> {
        self.client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(self)
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.api_base, self.bot_token)
    }

    /// Normalize an update into an [`IncomingMessage`]; `None` for updates
    /// that carry no message (edits, callbacks, channel posts).
    pub fn parse_update(update: &Update) -> Option<IncomingMessage> {
        let message = update.message.as_ref()?;

        let (text, kind) = match (&message.text, &message.sticker) {
            (Some(text), _) if text.starts_with('/') => (text.clone(), MessageKind::Command),
            (Some(text), _) => (text.clone(), MessageKind::Text),
            (None, Some(_)) => (String::new(), MessageKind::Sticker),
            (None, None) => (String::new(), MessageKind::Other),
        };

        let from = message.from.as_ref();
        Some(IncomingMessage {
            from_username: from
                .and_then(|f| f.username.clone())
                .filter(|u| !u.is_empty()),
            from_user_id: from.map(|f| f.id),
            display_name: from.and_then(|f| f.first_name.clone()),
            text,
            kind,
            reply_target: message.chat.id.to_string(),
        })
    }

    async fn get_updates(&self, offset: i64) -> anyhow::Result<Vec<Update>> {
        let body = serde_json::json!({
            "offset": offset,
            "timeout": LONG_POLL_TIMEOUT_SECS,
            "allowed_updates": ["message"]
        });

        let resp: ApiResponse<Vec<Update>> = self
            .client
            .post(self.api_url("getUpdates"))
            .json(&body)
            .send()
            .await?
            .json()
            .await?;

        if !resp.ok {
            anyhow::bail!(
                "getUpdates failed: {}",
                resp.description.unwrap_or_else(|| "unknown error".into())
            );
        }
        Ok(resp.result.unwrap_or_default())
    }
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send(&self, message: &SendMessage) -> anyhow::Result<()> {
        let mut body = serde_json::json!({
            "chat_id": message.recipient,
            "text": message.content,
        });
        if message.parse_mode == ParseMode::Markdown {
            body["parse_mode"] = serde_json::Value::from("Markdown");
        }

        let resp = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let detail = resp
                .json::<ApiResponse<serde_json::Value>>()
                .await
                .ok()
                .and_then(|r| r.description)
                .unwrap_or_else(|| status.to_string());
            anyhow::bail!("Telegram sendMessage failed: {detail}");
        }

        Ok(())
    }

    async fn listen(&self, tx: tokio::sync::mpsc::Sender<IncomingMessage>) -> anyhow::Result<()> {
        let mut offset: i64 = 0;

        tracing::info!("Telegram channel listening for messages...");

        loop {
            let updates = match self.get_updates(offset).await {
                Ok(updates) => updates,
                Err(e) => {
                    tracing::warn!("Telegram poll error: {e}");
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    continue;
                }
            };

            for update in &updates {
                // Advance offset past this update
                offset = offset.max(update.update_id + 1);

                let Some(msg) = Self::parse_update(update) else {
                    continue;
                };

                if tx.send(msg).await.is_err() {
                    return Ok(());
                }
            }
        }
    }

    async fn health_check(&self) -> bool {
        self.client
            .get(self.api_url("getMe"))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}
