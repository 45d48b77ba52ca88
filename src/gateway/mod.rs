//! HTTP surface: Telegram webhook, administrative notification endpoints
//! and a health check.

pub mod error;

pub use error::AppError;

use crate::bot::{self, BotContext};
use crate::channels::telegram::Update;
use crate::channels::{Channel, TelegramChannel};
use crate::config::Config;
use crate::notifications::{BroadcastError, Broadcaster, DEFAULT_HISTORY_PAGE, HISTORY_LIMIT};
use crate::store::{self, NotificationEntry, Store};
use crate::submission::{HttpThoughtApi, ThoughtApi};
use anyhow::Context;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use subtle::ConstantTimeEq;
use tower_http::trace::TraceLayer;

pub const WEBHOOK_SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub bot: BotContext,
    pub broadcaster: Broadcaster,
    /// Expected `X-Telegram-Bot-Api-Secret-Token`, if any
    pub webhook_secret: Option<String>,
    /// Bearer token guarding `/notifications/*`, if any
    pub admin_token: Option<String>,
}

impl AppState {
    /// Wire store, submission client and Telegram channel from config.
    pub fn from_config(config: &Config) -> anyhow::Result<SharedState> {
        let store: Arc<dyn Store> = Arc::from(store::create_store(&config.store)?);

        let channel: Arc<dyn Channel> = Arc::new(
            TelegramChannel::new(config.require_bot_token()?.to_string())
                .with_api_base(config.telegram.api_base.clone())
                .with_timeout(Duration::from_secs(config.telegram.timeout_secs))?,
        );

        let api: Arc<dyn ThoughtApi> = Arc::new(HttpThoughtApi::new(
            config.submission.endpoint.clone(),
            Duration::from_secs(config.submission.timeout_secs),
        )?);

        let bot = BotContext::new(store.clone(), api, channel.clone())
            .with_greetings(config.bot.greetings.clone());
        let broadcaster = Broadcaster::new(store, channel).with_limits(
            config.notifications.max_concurrency,
            Duration::from_secs(config.notifications.delivery_timeout_secs),
        );

        Ok(Arc::new(Self {
            bot,
            broadcaster,
            webhook_secret: config.telegram.webhook_secret.clone(),
            admin_token: config.gateway.admin_token.clone(),
        }))
    }
}

pub fn app(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/telegram/webhook", post(telegram_webhook))
        .route("/notifications/history", get(notification_history))
        .route("/notifications/send", post(send_notification))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until Ctrl+C.
pub async fn run_gateway(config: Config) -> anyhow::Result<()> {
    let state = AppState::from_config(&config)?;

    if !state.bot.store.health_check().await {
        tracing::warn!(store = state.bot.store.name(), "Store health check failed");
    }
    if !state.bot.channel.health_check().await {
        tracing::warn!("Telegram getMe failed; check telegram.bot_token");
    }

    let addr: SocketAddr = format!("{}:{}", config.gateway.host, config.gateway.port)
        .parse()
        .context("invalid bind address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("failed to bind TCP listener")?;

    tracing::info!(
        store = state.bot.store.name(),
        webhook_secret = state.webhook_secret.is_some(),
        admin_token = state.admin_token.is_some(),
        "Listening on http://{}",
        listener.local_addr()?
    );

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for Ctrl+C: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received, stopping server...");
}

async fn health(State(state): State<SharedState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "store": state.bot.store.name(),
    }))
}

/// Accepts one Bot API update. Anything that gets past the secret check is
/// answered 200, so Telegram never redelivers.
async fn telegram_webhook(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    if let Some(secret) = state.webhook_secret.as_deref() {
        let presented = headers
            .get(WEBHOOK_SECRET_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if !constant_time_eq(presented, secret) {
            tracing::warn!("Webhook rejected: secret token mismatch");
            return Err(AppError::Unauthorized);
        }
    }

    let update: Update = match serde_json::from_slice(&body) {
        Ok(update) => update,
        Err(e) => {
            tracing::warn!("Ignoring unparseable Telegram update: {e}");
            return Ok(StatusCode::OK);
        }
    };

    match TelegramChannel::parse_update(&update) {
        Some(msg) => {
            tracing::debug!(update_id = update.update_id, kind = ?msg.kind, "Dispatching update");
            bot::handle_message(&state.bot, &msg).await;
        }
        None => tracing::debug!(update_id = update.update_id, "Ignoring update without message"),
    }
    Ok(StatusCode::OK)
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<String>,
}

#[derive(Debug, Serialize)]
struct HistoryResponse {
    success: bool,
    message: &'static str,
    notifications: Vec<NotificationEntry>,
    count: usize,
    limit: usize,
}

/// `limit` must be an integer in `1..=100`; absent or empty means the default.
fn parse_history_limit(raw: Option<&str>) -> Result<usize, AppError> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(DEFAULT_HISTORY_PAGE);
    };
    match raw.parse::<usize>() {
        Ok(limit) if (1..=HISTORY_LIMIT).contains(&limit) => Ok(limit),
        _ => Err(AppError::BadRequest(
            "Invalid limit parameter. Must be a number between 1 and 100".into(),
        )),
    }
}

async fn notification_history(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, AppError> {
    require_admin(&state, &headers)?;
    let limit = parse_history_limit(query.limit.as_deref())?;

    let notifications = state
        .broadcaster
        .history(limit)
        .await
        .map_err(|e| AppError::failed("Failed to retrieve notification history", &e))?;

    let message = if notifications.is_empty() {
        "No notification history found"
    } else {
        "Notification history retrieved successfully"
    };
    Ok(Json(HistoryResponse {
        success: true,
        message,
        count: notifications.len(),
        notifications,
        limit,
    }))
}

async fn send_notification(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, AppError> {
    require_admin(&state, &headers)?;

    let message = serde_json::from_slice::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .filter(|m| !m.is_empty())
        .ok_or_else(|| AppError::BadRequest("Message is required and must be a string".into()))?;

    let report = match state.broadcaster.broadcast(&message).await {
        Ok(report) => report,
        Err(BroadcastError::NoRecipients) => {
            return Err(AppError::NotFound(
                "No users found to send notifications to".into(),
            ));
        }
        Err(BroadcastError::Store(e)) => {
            return Err(AppError::failed("Failed to send notification", &e));
        }
    };

    Ok(Json(serde_json::json!({
        "success": true,
        "message": "Notification sent successfully",
        "stats": {
            "totalUsers": report.total_users,
            "successful": report.successful,
            "failed": report.failed,
        },
        "notificationId": report.notification_id,
    })))
}

fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<(), AppError> {
    let Some(expected) = state.admin_token.as_deref() else {
        return Ok(());
    };
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or_default();
    if constant_time_eq(presented.trim(), expected) {
        Ok(())
    } else {
        Err(AppError::Unauthorized)
    }
}

/// Compare secrets without short-circuiting on the first differing byte.
/// Only the length is allowed to leak.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    a.len() == b.len() && bool::from(a.ct_eq(b))
}
