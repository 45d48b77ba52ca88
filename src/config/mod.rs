pub mod schema;

pub use schema::{
    BotConfig, Config, GatewayConfig, NotificationsConfig, StoreConfig, SubmissionConfig,
    TelegramConfig,
};
