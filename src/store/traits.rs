use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Persisted per-user state, keyed by Telegram username.
///
/// Field names match the JSON layout already present in deployed stores,
/// so `user_id` stays snake_case on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Napkin API token; empty means unset.
    #[serde(default)]
    pub token: String,
    /// Napkin account email; `None` or empty means unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Successful submissions made by this user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thoughts: Option<u64>,
    /// Telegram numeric id, set on first contact and never overwritten.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
}

impl UserRecord {
    /// Fresh record for a user seen for the first time.
    pub fn new(user_id: Option<i64>) -> Self {
        Self {
            token: String::new(),
            email: None,
            thoughts: None,
            user_id,
        }
    }

    pub fn thought_count(&self) -> u64 {
        self.thoughts.unwrap_or(0)
    }

    /// Both Napkin credentials are present and non-empty.
    pub fn has_credentials(&self) -> bool {
        !self.token.is_empty() && self.email.as_deref().is_some_and(|e| !e.is_empty())
    }
}

/// One past broadcast, stored newest-first in a capped list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEntry {
    pub id: String,
    pub message: String,
    /// RFC 3339
    pub timestamp: String,
    pub sent_to: u64,
}

/// Core store trait: implement for any key-value backend.
///
/// Every operation may fail (network, disk); callers surface failures instead
/// of retrying.
#[async_trait]
pub trait Store: Send + Sync {
    /// Backend name
    fn name(&self) -> &str;

    /// Load a user record by username
    async fn get_user(&self, username: &str) -> anyhow::Result<Option<UserRecord>>;

    /// Create or replace a user record
    async fn put_user(&self, username: &str, record: &UserRecord) -> anyhow::Result<()>;

    /// Add a username to the broadcast registry (set semantics)
    async fn add_to_registry(&self, username: &str) -> anyhow::Result<()>;

    /// All registered usernames, in no particular order
    async fn registry_members(&self) -> anyhow::Result<Vec<String>>;

    /// Increment the global thought counter, returning the new value
    async fn increment_system_counter(&self) -> anyhow::Result<u64>;

    /// Current global thought counter; 0 when never incremented
    async fn system_counter(&self) -> anyhow::Result<u64>;

    /// Prepend a history entry and keep only the `keep` most recent
    async fn push_notification(&self, entry: &NotificationEntry, keep: usize)
        -> anyhow::Result<()>;

    /// Up to `limit` history entries, newest first
    async fn notifications(&self, limit: usize) -> anyhow::Result<Vec<NotificationEntry>>;

    /// Health check
    async fn health_check(&self) -> bool {
        true
    }
}
