use super::traits::{NotificationEntry, Store, UserRecord};
use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

const REGISTRY_KEY: &str = "users:list";
const COUNTER_KEY: &str = "thoughts";
const HISTORY_KEY: &str = "notifications:history";

/// Redis over the Upstash REST protocol.
///
/// Each call POSTs a JSON command array (`["GET", "key"]`) with a bearer
/// token and reads `{"result": ...}` or `{"error": "..."}` back.
pub struct UpstashStore {
    url: String,
    token: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct UpstashResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

impl UpstashStore {
    pub fn new(url: &str, token: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build Upstash HTTP client")?;
        Ok(Self {
            url: url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            client,
        })
    }

    async fn command(&self, args: &[&str]) -> anyhow::Result<Value> {
        let op = args.first().copied().unwrap_or("?");
        let resp = self
            .client
            .post(&self.url)
            .bearer_auth(&self.token)
            .json(args)
            .send()
            .await
            .with_context(|| format!("Upstash {op} request failed"))?;

        let status = resp.status();
        let body: UpstashResponse = resp
            .json()
            .await
            .with_context(|| format!("Upstash {op} returned an unreadable body ({status})"))?;

        if let Some(error) = body.error {
            anyhow::bail!("Upstash {op} failed: {error}");
        }
        if !status.is_success() {
            anyhow::bail!("Upstash {op} failed with status {status}");
        }
        Ok(body.result.unwrap_or(Value::Null))
    }
}

/// Parse a counter that Redis may hand back as a number or a numeric string.
fn parse_counter(value: &Value) -> anyhow::Result<u64> {
    match value {
        Value::Null => Ok(0),
        Value::Number(n) => n
            .as_u64()
            .with_context(|| format!("Counter value {n} is not a non-negative integer")),
        Value::String(s) => s
            .trim()
            .parse()
            .with_context(|| format!("Counter value '{s}' is not an integer")),
        other => anyhow::bail!("Unexpected counter value {other}"),
    }
}

fn string_items(value: Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s),
                Value::Null => None,
                other => Some(other.to_string()),
            })
            .collect(),
        _ => Vec::new(),
    }
}

#[async_trait]
impl Store for UpstashStore {
    fn name(&self) -> &str {
        "upstash"
    }

    async fn get_user(&self, username: &str) -> anyhow::Result<Option<UserRecord>> {
        match self.command(&["GET", username]).await? {
            Value::Null => Ok(None),
            Value::String(raw) => serde_json::from_str(&raw)
                .map(Some)
                .with_context(|| format!("Corrupt user record for '{username}'")),
            other => serde_json::from_value(other)
                .map(Some)
                .with_context(|| format!("Corrupt user record for '{username}'")),
        }
    }

    async fn put_user(&self, username: &str, record: &UserRecord) -> anyhow::Result<()> {
        let json = serde_json::to_string(record)?;
        self.command(&["SET", username, &json]).await?;
        Ok(())
    }

    async fn add_to_registry(&self, username: &str) -> anyhow::Result<()> {
        self.command(&["SADD", REGISTRY_KEY, username]).await?;
        Ok(())
    }

    async fn registry_members(&self) -> anyhow::Result<Vec<String>> {
        Ok(string_items(self.command(&["SMEMBERS", REGISTRY_KEY]).await?))
    }

    async fn increment_system_counter(&self) -> anyhow::Result<u64> {
        parse_counter(&self.command(&["INCR", COUNTER_KEY]).await?)
    }

    async fn system_counter(&self) -> anyhow::Result<u64> {
        parse_counter(&self.command(&["GET", COUNTER_KEY]).await?)
    }

    async fn push_notification(
        &self,
        entry: &NotificationEntry,
        keep: usize,
    ) -> anyhow::Result<()> {
        let json = serde_json::to_string(entry)?;
        self.command(&["LPUSH", HISTORY_KEY, &json]).await?;

        // LTRIM key 1 0 empties the list; 0..keep-1 retains the newest `keep`
        let (start, stop) = match keep {
            0 => ("1".to_string(), "0".to_string()),
            n => ("0".to_string(), (n - 1).to_string()),
        };
        self.command(&["LTRIM", HISTORY_KEY, &start, &stop]).await?;
        Ok(())
    }

    async fn notifications(&self, limit: usize) -> anyhow::Result<Vec<NotificationEntry>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let stop = (limit - 1).to_string();
        let raw = self.command(&["LRANGE", HISTORY_KEY, "0", &stop]).await?;

        let mut entries = Vec::new();
        for item in string_items(raw) {
            match serde_json::from_str(&item) {
                Ok(entry) => entries.push(entry),
                Err(e) => tracing::warn!("Skipping unreadable notification history entry: {e}"),
            }
        }
        Ok(entries)
    }

    async fn health_check(&self) -> bool {
        matches!(self.command(&["PING"]).await, Ok(Value::String(ref s)) if s == "PONG")
    }
}
