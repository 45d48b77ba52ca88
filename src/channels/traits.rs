use async_trait::async_trait;

/// What an inbound chat event carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    Command,
    Sticker,
    Other,
}

/// A normalized message received from a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    /// Platform handle; `None` for accounts without a username
    pub from_username: Option<String>,
    /// Stable numeric account id, when the platform provides one
    pub from_user_id: Option<i64>,
    /// First name or similar, used for greetings
    pub display_name: Option<String>,
    pub text: String,
    pub kind: MessageKind,
    /// Where replies go (Telegram chat id)
    pub reply_target: String,
}

/// Optional rendering hint for outbound text
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ParseMode {
    #[default]
    Plain,
    Markdown,
}

/// A message to send through a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendMessage {
    pub content: String,
    pub recipient: String,
    pub parse_mode: ParseMode,
}

impl SendMessage {
    pub fn new(content: impl Into<String>, recipient: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            recipient: recipient.into(),
            parse_mode: ParseMode::Plain,
        }
    }

    pub fn markdown(mut self) -> Self {
        self.parse_mode = ParseMode::Markdown;
        self
    }
}

/// Core channel trait: implement for any messaging platform
#[async_trait]
pub trait Channel: Send + Sync {
    /// Human-readable channel name
    fn name(&self) -> &str;

    /// Send a message through this channel
    async fn send(&self, message: &SendMessage) -> anyhow::Result<()>;

    /// Start listening for incoming messages (long-running)
    async fn listen(&self, tx: tokio::sync::mpsc::Sender<IncomingMessage>) -> anyhow::Result<()>;

    /// Check if channel is healthy
    async fn health_check(&self) -> bool {
        true
    }
}
