//! Operator broadcasts to every registered user, plus the capped history of
//! past broadcasts.

use crate::channels::{Channel, SendMessage};
use crate::store::{NotificationEntry, Store};
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Maximum number of history entries retained and returned.
pub const HISTORY_LIMIT: usize = 100;
pub const DEFAULT_HISTORY_PAGE: usize = 50;

#[derive(Debug, thiserror::Error)]
pub enum BroadcastError {
    #[error("no registered users to notify")]
    NoRecipients,
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Outcome of one broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastReport {
    pub total_users: usize,
    pub successful: usize,
    pub failed: usize,
    pub notification_id: String,
}

pub struct Broadcaster {
    store: Arc<dyn Store>,
    channel: Arc<dyn Channel>,
    max_concurrency: usize,
    delivery_timeout: Duration,
}

impl Broadcaster {
    pub fn new(store: Arc<dyn Store>, channel: Arc<dyn Channel>) -> Self {
        Self {
            store,
            channel,
            max_concurrency: 8,
            delivery_timeout: Duration::from_secs(10),
        }
    }

    #[must_use]
    pub fn with_limits(mut self, max_concurrency: usize, delivery_timeout: Duration) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self.delivery_timeout = delivery_timeout;
        self
    }

    /// Send `📢 Notification:` + `message` to every registered user.
    ///
    /// A failed delivery (unknown user, missing chat id, send error or
    /// timeout) is counted and never aborts the rest. The history entry is
    /// written only after every delivery has finished.
    pub async fn broadcast(&self, message: &str) -> Result<BroadcastReport, BroadcastError> {
        let usernames = self.store.registry_members().await?;
        if usernames.is_empty() {
            return Err(BroadcastError::NoRecipients);
        }

        let text = format_broadcast(message);
        let deliveries: Vec<_> = usernames
            .iter()
            .map(|username| self.deliver(username, &text))
            .collect();
        let outcomes: Vec<bool> = stream::iter(deliveries)
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;

        let successful = outcomes.iter().filter(|ok| **ok).count();
        let report = BroadcastReport {
            total_users: usernames.len(),
            successful,
            failed: usernames.len() - successful,
            notification_id: new_notification_id(),
        };

        let entry = NotificationEntry {
            id: report.notification_id.clone(),
            message: message.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            sent_to: report.successful as u64,
        };
        self.store.push_notification(&entry, HISTORY_LIMIT).await?;

        tracing::info!(
            id = %report.notification_id,
            total = report.total_users,
            successful = report.successful,
            failed = report.failed,
            "Broadcast finished"
        );
        Ok(report)
    }

    /// Most recent broadcasts, newest first, at most [`HISTORY_LIMIT`].
    pub async fn history(&self, limit: usize) -> anyhow::Result<Vec<NotificationEntry>> {
        self.store.notifications(limit.min(HISTORY_LIMIT)).await
    }

    async fn deliver(&self, username: &str, text: &str) -> bool {
        let chat_id = match self.store.get_user(username).await {
            Ok(Some(record)) => match record.user_id {
                Some(id) => id,
                None => {
                    tracing::warn!(username, "Skipping broadcast: no chat id on record");
                    return false;
                }
            },
            Ok(None) => {
                tracing::warn!(username, "Skipping broadcast: registered user has no record");
                return false;
            }
            Err(e) => {
                tracing::warn!(username, "Skipping broadcast: store lookup failed: {e:#}");
                return false;
            }
        };

        let outgoing = SendMessage::new(text, chat_id.to_string());
        match tokio::time::timeout(self.delivery_timeout, self.channel.send(&outgoing)).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::warn!(username, "Broadcast delivery failed: {e:#}");
                false
            }
            Err(_) => {
                tracing::warn!(username, "Broadcast delivery timed out");
                false
            }
        }
    }
}

pub fn format_broadcast(message: &str) -> String {
    format!("📢 Notification:\n\n{message}")
}

/// `notif_<unix millis>_<9 random lowercase alphanumerics>`
pub fn new_notification_id() -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let random = uuid::Uuid::new_v4().simple().to_string();
    format!("notif_{millis}_{}", &random[..9])
}
