use super::traits::{NotificationEntry, Store, UserRecord};
use anyhow::Context;
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;

const SYSTEM_COUNTER: &str = "thoughts";

/// SQLite-backed store for single-node deployments.
///
/// User records are kept as the same JSON documents the Redis backend
/// stores, so data can be moved between backends verbatim.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create store directory {}", parent.display())
                })?;
            }
        }

        let conn = Connection::open(path).context("SQLite failed to open database")?;
        // WAL mode: concurrent reads during writes, crash-safe
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous  = NORMAL;",
        )?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_schema(conn: &Connection) -> anyhow::Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS users (
                username    TEXT PRIMARY KEY,
                record      TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS registry (
                username    TEXT PRIMARY KEY
            );
            CREATE TABLE IF NOT EXISTS counters (
                name        TEXT PRIMARY KEY,
                value       INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS notifications (
                seq         INTEGER PRIMARY KEY AUTOINCREMENT,
                entry       TEXT NOT NULL
            );",
        )?;
        Ok(())
    }

    /// Run blocking SQLite work off the async executor.
    async fn with_conn<T, F>(&self, f: F) -> anyhow::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> anyhow::Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            f(&conn)
        })
        .await?
    }
}

#[async_trait]
impl Store for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn get_user(&self, username: &str) -> anyhow::Result<Option<UserRecord>> {
        let username = username.to_string();
        self.with_conn(move |conn| {
            let raw: Option<String> = conn
                .query_row(
                    "SELECT record FROM users WHERE username = ?1",
                    params![username],
                    |row| row.get(0),
                )
                .optional()?;
            raw.map(|json| {
                serde_json::from_str::<UserRecord>(&json)
                    .with_context(|| format!("Corrupt user record for '{username}'"))
            })
            .transpose()
        })
        .await
    }

    async fn put_user(&self, username: &str, record: &UserRecord) -> anyhow::Result<()> {
        let username = username.to_string();
        let json = serde_json::to_string(record)?;
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO users (username, record) VALUES (?1, ?2)
                 ON CONFLICT(username) DO UPDATE SET record = excluded.record",
                params![username, json],
            )?;
            Ok(())
        })
        .await
    }

    async fn add_to_registry(&self, username: &str) -> anyhow::Result<()> {
        let username = username.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO registry (username) VALUES (?1)",
                params![username],
            )?;
            Ok(())
        })
        .await
    }

    async fn registry_members(&self) -> anyhow::Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT username FROM registry")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    async fn increment_system_counter(&self) -> anyhow::Result<u64> {
        self.with_conn(|conn| {
            let value: i64 = conn.query_row(
                "INSERT INTO counters (name, value) VALUES (?1, 1)
                 ON CONFLICT(name) DO UPDATE SET value = value + 1
                 RETURNING value",
                params![SYSTEM_COUNTER],
                |row| row.get(0),
            )?;
            Ok(u64::try_from(value).unwrap_or(0))
        })
        .await
    }

    async fn system_counter(&self) -> anyhow::Result<u64> {
        self.with_conn(|conn| {
            let value: Option<i64> = conn
                .query_row(
                    "SELECT value FROM counters WHERE name = ?1",
                    params![SYSTEM_COUNTER],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(value.and_then(|v| u64::try_from(v).ok()).unwrap_or(0))
        })
        .await
    }

    async fn push_notification(
        &self,
        entry: &NotificationEntry,
        keep: usize,
    ) -> anyhow::Result<()> {
        let json = serde_json::to_string(entry)?;
        let keep = i64::try_from(keep).unwrap_or(i64::MAX);
        self.with_conn(move |conn| {
            conn.execute("INSERT INTO notifications (entry) VALUES (?1)", params![json])?;
            conn.execute(
                "DELETE FROM notifications WHERE seq NOT IN
                    (SELECT seq FROM notifications ORDER BY seq DESC LIMIT ?1)",
                params![keep],
            )?;
            Ok(())
        })
        .await
    }

    async fn notifications(&self, limit: usize) -> anyhow::Result<Vec<NotificationEntry>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.with_conn(move |conn| {
            let mut stmt =
                conn.prepare("SELECT entry FROM notifications ORDER BY seq DESC LIMIT ?1")?;
            let rows = stmt.query_map(params![limit], |row| row.get::<_, String>(0))?;

            let mut entries = Vec::new();
            for raw in rows {
                let raw = raw?;
                match serde_json::from_str(&raw) {
                    Ok(entry) => entries.push(entry),
                    Err(e) => tracing::warn!("Skipping unreadable notification history entry: {e}"),
                }
            }
            Ok(entries)
        })
        .await
    }

    async fn health_check(&self) -> bool {
        self.with_conn(|conn| {
            Ok(conn
                .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .is_ok())
        })
        .await
        .unwrap_or(false)
    }
}
