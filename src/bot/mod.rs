//! Per-user command and message dispatch.
//!
//! Every inbound event resolves (or registers) its sender, then goes either
//! to a command handler or to the free-text processor. Failures never
//! escape: each one becomes exactly one reply to the sender.

pub mod commands;
pub mod processor;
pub mod resolver;

pub use commands::{Command, ParsedCommand};
pub use processor::{extract_thought, ExtractedThought};
pub use resolver::{resolve, ResolvedUser};

use crate::channels::{Channel, IncomingMessage, MessageKind, SendMessage};
use crate::store::Store;
use crate::submission::{SubmissionError, ThoughtApi};
use std::collections::HashMap;
use std::sync::Arc;

pub const USERNAME_REQUIRED_REPLY: &str = "⚠️ Please set a Telegram username first!";
pub const CREDENTIALS_REQUIRED_REPLY: &str =
    "⚠️ Please set a token and an email first using /setToken and /setEmail";
pub const STORE_FAILURE_REPLY: &str =
    "⚠️ Something went wrong while saving your data. Please try again later.";
pub const STICKER_REPLY: &str = "👍";
pub const UNSUPPORTED_REPLY: &str = "I can only process text messages for now.";

#[derive(Debug, thiserror::Error)]
pub enum BotError {
    #[error("sender has no username")]
    UserIdentityMissing,
    #[error("napkin credentials not configured")]
    CredentialsNotConfigured,
    #[error("thought submission failed: {0}")]
    Submission(#[from] SubmissionError),
    #[error("store operation failed: {0:#}")]
    Store(#[from] anyhow::Error),
}

impl BotError {
    /// The single reply the sender sees for this failure.
    pub fn user_reply(&self) -> String {
        match self {
            Self::UserIdentityMissing => USERNAME_REQUIRED_REPLY.to_string(),
            Self::CredentialsNotConfigured => CREDENTIALS_REQUIRED_REPLY.to_string(),
            Self::Submission(e) => format!("Failed to send data: {e}"),
            Self::Store(_) => STORE_FAILURE_REPLY.to_string(),
        }
    }
}

/// Everything a handler needs, passed explicitly instead of living in globals.
pub struct BotContext {
    pub store: Arc<dyn Store>,
    pub api: Arc<dyn ThoughtApi>,
    pub channel: Arc<dyn Channel>,
    /// Per-username `/start` greeting overrides
    pub greetings: HashMap<String, String>,
}

impl BotContext {
    pub fn new(store: Arc<dyn Store>, api: Arc<dyn ThoughtApi>, channel: Arc<dyn Channel>) -> Self {
        Self {
            store,
            api,
            channel,
            greetings: HashMap::new(),
        }
    }

    pub fn with_greetings(mut self, greetings: HashMap<String, String>) -> Self {
        self.greetings = greetings;
        self
    }

    /// Reply to the sender of `msg`. Delivery failures are logged, not returned.
    pub async fn reply(&self, msg: &IncomingMessage, text: &str) {
        self.deliver(SendMessage::new(text, msg.reply_target.clone()))
            .await;
    }

    pub async fn reply_markdown(&self, msg: &IncomingMessage, text: &str) {
        self.deliver(SendMessage::new(text, msg.reply_target.clone()).markdown())
            .await;
    }

    async fn deliver(&self, message: SendMessage) {
        if let Err(e) = self.channel.send(&message).await {
            tracing::warn!(
                channel = self.channel.name(),
                recipient = %message.recipient,
                "Failed to deliver reply: {e:#}"
            );
        }
    }
}

/// Entry point for one inbound event.
pub async fn handle_message(ctx: &BotContext, msg: &IncomingMessage) {
    if let Err(err) = dispatch(ctx, msg).await {
        match &err {
            BotError::Store(e) => tracing::error!("Store failure while handling message: {e:#}"),
            BotError::Submission(e) => tracing::warn!(
                username = msg.from_username.as_deref().unwrap_or("-"),
                "Thought submission failed: {e}"
            ),
            BotError::UserIdentityMissing | BotError::CredentialsNotConfigured => {
                tracing::debug!("Rejected message: {err}");
            }
        }
        ctx.reply(msg, &err.user_reply()).await;
    }
}

/// Feed every message from `ctx.channel.listen` through [`handle_message`],
/// one at a time, until the listener stops.
pub async fn run_polling(ctx: &BotContext) -> anyhow::Result<()> {
    let (tx, mut rx) = tokio::sync::mpsc::channel::<IncomingMessage>(100);

    let channel = Arc::clone(&ctx.channel);
    let listener = tokio::spawn(async move {
        if let Err(e) = channel.listen(tx).await {
            tracing::error!("Channel {} error: {e:#}", channel.name());
        }
    });

    while let Some(msg) = rx.recv().await {
        handle_message(ctx, &msg).await;
    }

    listener.await?;
    Ok(())
}

async fn dispatch(ctx: &BotContext, msg: &IncomingMessage) -> Result<(), BotError> {
    let user = resolve(
        ctx.store.as_ref(),
        msg.from_username.as_deref(),
        msg.from_user_id,
    )
    .await?;

    match msg.kind {
        MessageKind::Command | MessageKind::Text => match commands::parse(&msg.text) {
            Some(parsed) => commands::execute(ctx, msg, user, parsed).await,
            None => processor::process(ctx, msg, user).await,
        },
        MessageKind::Sticker => {
            ctx.reply(msg, STICKER_REPLY).await;
            Ok(())
        }
        MessageKind::Other => {
            ctx.reply(msg, UNSUPPORTED_REPLY).await;
            Ok(())
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Test doubles shared by the bot and notification tests.

    use super::*;
    use crate::store::{NotificationEntry, UserRecord};
    use crate::submission::{ThoughtCreated, ThoughtRequest};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Records every outbound message; recipients listed in `failing` error,
    /// recipients listed in `stalled` never answer.
    /// `listen` replays whatever is queued in `inbox`, then returns.
    #[derive(Default)]
    pub struct RecordingChannel {
        pub sent: Mutex<Vec<SendMessage>>,
        pub failing: Vec<String>,
        pub stalled: Vec<String>,
        pub inbox: Mutex<Vec<IncomingMessage>>,
    }

    impl RecordingChannel {
        pub fn texts(&self) -> Vec<String> {
            self.sent.lock().iter().map(|m| m.content.clone()).collect()
        }
    }

    #[async_trait]
    impl Channel for RecordingChannel {
        fn name(&self) -> &str {
            "recording"
        }

        async fn send(&self, message: &SendMessage) -> anyhow::Result<()> {
            if self.failing.contains(&message.recipient) {
                anyhow::bail!("chat not found");
            }
            if self.stalled.contains(&message.recipient) {
                tokio::time::sleep(std::time::Duration::from_secs(30)).await;
            }
            self.sent.lock().push(message.clone());
            Ok(())
        }

        async fn listen(
            &self,
            tx: tokio::sync::mpsc::Sender<IncomingMessage>,
        ) -> anyhow::Result<()> {
            let queued = std::mem::take(&mut *self.inbox.lock());
            for msg in queued {
                if tx.send(msg).await.is_err() {
                    break;
                }
            }
            Ok(())
        }
    }

    /// Store whose every operation fails, as when the backend is unreachable.
    pub struct UnreachableStore;

    #[async_trait]
    impl Store for UnreachableStore {
        fn name(&self) -> &str {
            "unreachable"
        }

        async fn get_user(&self, _username: &str) -> anyhow::Result<Option<UserRecord>> {
            anyhow::bail!("connection refused")
        }

        async fn put_user(&self, _username: &str, _record: &UserRecord) -> anyhow::Result<()> {
            anyhow::bail!("connection refused")
        }

        async fn add_to_registry(&self, _username: &str) -> anyhow::Result<()> {
            anyhow::bail!("connection refused")
        }

        async fn registry_members(&self) -> anyhow::Result<Vec<String>> {
            anyhow::bail!("connection refused")
        }

        async fn increment_system_counter(&self) -> anyhow::Result<u64> {
            anyhow::bail!("connection refused")
        }

        async fn system_counter(&self) -> anyhow::Result<u64> {
            anyhow::bail!("connection refused")
        }

        async fn push_notification(
            &self,
            _entry: &NotificationEntry,
            _keep: usize,
        ) -> anyhow::Result<()> {
            anyhow::bail!("connection refused")
        }

        async fn notifications(&self, _limit: usize) -> anyhow::Result<Vec<NotificationEntry>> {
            anyhow::bail!("connection refused")
        }

        async fn health_check(&self) -> bool {
            false
        }
    }

    /// Scripted submission API that remembers what it was asked.
    pub struct FakeThoughtApi {
        pub requests: Mutex<Vec<ThoughtRequest>>,
        pub respond: fn() -> Result<ThoughtCreated, SubmissionError>,
    }

    impl FakeThoughtApi {
        pub fn ok() -> Self {
            Self {
                requests: Mutex::new(Vec::new()),
                respond: || {
                    Ok(ThoughtCreated {
                        url: "https://thought/1".into(),
                    })
                },
            }
        }

        pub fn failing() -> Self {
            Self {
                requests: Mutex::new(Vec::new()),
                respond: || {
                    Err(SubmissionError::Status {
                        status: 500,
                        body: "boom".into(),
                    })
                },
            }
        }

        pub fn calls(&self) -> usize {
            self.requests.lock().len()
        }
    }

    #[async_trait]
    impl ThoughtApi for FakeThoughtApi {
        async fn create_thought(
            &self,
            request: &ThoughtRequest,
        ) -> Result<ThoughtCreated, SubmissionError> {
            self.requests.lock().push(request.clone());
            (self.respond)()
        }
    }

    pub fn message(username: Option<&str>, user_id: Option<i64>, text: &str) -> IncomingMessage {
        let kind = if text.starts_with('/') {
            MessageKind::Command
        } else {
            MessageKind::Text
        };
        IncomingMessage {
            from_username: username.map(str::to_string),
            from_user_id: user_id,
            display_name: None,
            text: text.to_string(),
            kind,
            reply_target: user_id.unwrap_or(1).to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::store::{MemoryStore, UserRecord};

    struct Harness {
        store: Arc<MemoryStore>,
        api: Arc<FakeThoughtApi>,
        channel: Arc<RecordingChannel>,
        ctx: BotContext,
    }

    fn harness(api: FakeThoughtApi) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let api = Arc::new(api);
        let channel = Arc::new(RecordingChannel::default());
        let ctx = BotContext::new(store.clone(), api.clone(), channel.clone());
        Harness {
            store,
            api,
            channel,
            ctx,
        }
    }

    async fn configure(store: &MemoryStore, username: &str, user_id: i64) {
        let mut record = UserRecord::new(Some(user_id));
        record.token = "tok".into();
        record.email = Some("me@example.com".into());
        store.put_user(username, &record).await.unwrap();
        store.add_to_registry(username).await.unwrap();
    }

    #[tokio::test]
    async fn missing_username_gets_prompt_and_no_state() {
        let h = harness(FakeThoughtApi::ok());
        handle_message(&h.ctx, &message(None, Some(5), "/countMyThoughts")).await;
        handle_message(&h.ctx, &message(None, Some(5), "a thought")).await;

        assert_eq!(
            h.channel.texts(),
            vec![USERNAME_REQUIRED_REPLY, USERNAME_REQUIRED_REPLY]
        );
        assert!(h.store.registry_members().await.unwrap().is_empty());
        assert_eq!(h.api.calls(), 0);
    }

    #[tokio::test]
    async fn any_event_registers_the_sender() {
        let h = harness(FakeThoughtApi::ok());
        handle_message(&h.ctx, &message(Some("alice"), Some(5), "/help")).await;

        assert!(h.store.get_user("alice").await.unwrap().is_some());
        assert_eq!(h.store.registry_members().await.unwrap(), vec!["alice"]);
    }

    #[tokio::test]
    async fn set_token_and_email_persist_and_echo() {
        let h = harness(FakeThoughtApi::ok());
        handle_message(&h.ctx, &message(Some("alice"), Some(5), "/setToken abc extra")).await;
        handle_message(&h.ctx, &message(Some("alice"), Some(5), "/setEmail a@b.co")).await;

        let record = h.store.get_user("alice").await.unwrap().unwrap();
        assert_eq!(record.token, "abc");
        assert_eq!(record.email.as_deref(), Some("a@b.co"));
        assert_eq!(
            h.channel.texts(),
            vec!["👍 Token set to: abc", "👍 Email set to: a@b.co"]
        );
    }

    #[tokio::test]
    async fn set_token_without_value_prompts_and_changes_nothing() {
        let h = harness(FakeThoughtApi::ok());
        configure(&h.store, "alice", 5).await;

        handle_message(&h.ctx, &message(Some("alice"), Some(5), "/setToken")).await;
        handle_message(&h.ctx, &message(Some("alice"), Some(5), "/setEmail")).await;

        let record = h.store.get_user("alice").await.unwrap().unwrap();
        assert_eq!(record.token, "tok");
        assert_eq!(record.email.as_deref(), Some("me@example.com"));
        assert_eq!(
            h.channel.texts(),
            vec!["⚠️ Please provide a token!", "⚠️ Please provide an email!"]
        );
    }

    #[tokio::test]
    async fn counters_default_to_zero() {
        let h = harness(FakeThoughtApi::ok());
        handle_message(&h.ctx, &message(Some("alice"), Some(5), "/countMyThoughts")).await;
        handle_message(&h.ctx, &message(Some("alice"), Some(5), "/countSystemThoughts")).await;

        assert_eq!(
            h.channel.texts(),
            vec![
                "You have created 0 thoughts!",
                "The system has created 0 thoughts!"
            ]
        );
    }

    #[tokio::test]
    async fn help_is_sent_as_markdown() {
        let h = harness(FakeThoughtApi::ok());
        handle_message(&h.ctx, &message(Some("alice"), Some(5), "/help")).await;

        let sent = h.channel.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].content, commands::HELP_TEXT);
        assert_eq!(sent[0].parse_mode, crate::channels::ParseMode::Markdown);
    }

    #[tokio::test]
    async fn start_uses_display_name_or_configured_greeting() {
        let mut h = harness(FakeThoughtApi::ok());
        let mut msg = message(Some("alice"), Some(5), "/start");
        msg.display_name = Some("Alice".into());
        handle_message(&h.ctx, &msg).await;

        h.ctx.greetings =
            HashMap::from([("anna_0x".to_string(), "Hi Anna! 🌟".to_string())]);
        handle_message(&h.ctx, &message(Some("anna_0x"), Some(6), "/start")).await;

        let texts = h.channel.texts();
        assert!(texts[0].starts_with("Welcome Alice! 🌟"));
        assert_eq!(texts[1], "Hi Anna! 🌟");
    }

    #[tokio::test]
    async fn ineligible_user_never_reaches_the_api() {
        let h = harness(FakeThoughtApi::ok());
        handle_message(&h.ctx, &message(Some("alice"), Some(5), "hello https://x.io")).await;

        // token set, email still absent
        handle_message(&h.ctx, &message(Some("alice"), Some(5), "/setToken abc")).await;
        handle_message(&h.ctx, &message(Some("alice"), Some(5), "hello again")).await;

        assert_eq!(h.api.calls(), 0);
        let texts = h.channel.texts();
        assert_eq!(texts[0], CREDENTIALS_REQUIRED_REPLY);
        assert_eq!(texts[2], CREDENTIALS_REQUIRED_REPLY);
    }

    #[tokio::test]
    async fn successful_submission_updates_both_counters() {
        let h = harness(FakeThoughtApi::ok());
        configure(&h.store, "alice", 5).await;

        handle_message(&h.ctx, &message(Some("alice"), Some(5), "check https://x.io/a out")).await;

        let requests = h.api.requests.lock().clone();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].thought, "check out");
        assert_eq!(requests[0].source_url, "https://x.io/a");
        assert_eq!(requests[0].email, "me@example.com");
        assert_eq!(requests[0].token, "tok");

        let record = h.store.get_user("alice").await.unwrap().unwrap();
        assert_eq!(record.thought_count(), 1);
        assert_eq!(h.store.system_counter().await.unwrap(), 1);
        assert_eq!(
            h.channel.texts(),
            vec![
                "I found a URL in your message: https://x.io/a. I'll include it in the thought!",
                "Thought sent successfully! Direct link: https://thought/1"
            ]
        );
    }

    #[tokio::test]
    async fn failed_submission_leaves_counters_alone() {
        let h = harness(FakeThoughtApi::failing());
        configure(&h.store, "alice", 5).await;

        handle_message(&h.ctx, &message(Some("alice"), Some(5), "a plain thought")).await;

        assert_eq!(h.api.calls(), 1);
        let record = h.store.get_user("alice").await.unwrap().unwrap();
        assert_eq!(record.thought_count(), 0);
        assert_eq!(h.store.system_counter().await.unwrap(), 0);
        assert_eq!(
            h.channel.texts(),
            vec!["Failed to send data: Request failed with status code 500"]
        );
    }

    #[tokio::test]
    async fn unknown_command_is_submitted_as_a_thought() {
        let h = harness(FakeThoughtApi::ok());
        configure(&h.store, "alice", 5).await;

        handle_message(&h.ctx, &message(Some("alice"), Some(5), "/todo buy milk")).await;

        assert_eq!(h.api.calls(), 1);
        assert_eq!(h.api.requests.lock()[0].thought, "/todo buy milk");
    }

    #[tokio::test]
    async fn stickers_and_other_media_get_fixed_replies() {
        let h = harness(FakeThoughtApi::ok());
        let mut sticker = message(Some("alice"), Some(5), "");
        sticker.kind = MessageKind::Sticker;
        let mut photo = message(Some("alice"), Some(5), "");
        photo.kind = MessageKind::Other;

        handle_message(&h.ctx, &sticker).await;
        handle_message(&h.ctx, &photo).await;

        assert_eq!(h.channel.texts(), vec![STICKER_REPLY, UNSUPPORTED_REPLY]);
        assert_eq!(h.api.calls(), 0);
    }

    #[tokio::test]
    async fn polling_handles_every_queued_message() {
        let h = harness(FakeThoughtApi::ok());
        h.channel.inbox.lock().extend([
            message(Some("alice"), Some(5), "/countMyThoughts"),
            message(Some("bob"), Some(6), "/countSystemThoughts"),
        ]);

        run_polling(&h.ctx).await.unwrap();

        assert_eq!(
            h.channel.texts(),
            vec![
                "You have created 0 thoughts!",
                "The system has created 0 thoughts!"
            ]
        );
        assert_eq!(
            h.store.registry_members().await.unwrap(),
            vec!["alice", "bob"]
        );
    }

    #[tokio::test]
    async fn store_outage_gets_one_generic_reply_and_no_submission() {
        let api = Arc::new(FakeThoughtApi::ok());
        let channel = Arc::new(RecordingChannel::default());
        let ctx = BotContext::new(Arc::new(UnreachableStore), api.clone(), channel.clone());

        handle_message(&ctx, &message(Some("alice"), Some(5), "a thought")).await;
        handle_message(&ctx, &message(Some("alice"), Some(5), "/countSystemThoughts")).await;

        assert_eq!(
            channel.texts(),
            vec![STORE_FAILURE_REPLY, STORE_FAILURE_REPLY]
        );
        assert_eq!(api.calls(), 0);
    }
}
