use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use thoughtrelay::bot;
use thoughtrelay::config::Config;
use thoughtrelay::gateway::{self, AppState};
use thoughtrelay::notifications::{DEFAULT_HISTORY_PAGE, HISTORY_LIMIT};
use thoughtrelay::store;
use tracing_subscriber::{fmt, EnvFilter};

/// `thoughtrelay` - Telegram bot that files your messages as Napkin thoughts.
#[derive(Parser, Debug)]
#[command(name = "thoughtrelay")]
#[command(version)]
#[command(about = "Relay Telegram messages to Napkin as thoughts.", long_about = None)]
struct Cli {
    /// Path to TOML config file
    #[arg(short, long, default_value = "thoughtrelay.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve the Telegram webhook and admin endpoints
    Serve,

    /// Long-poll the Bot API instead of receiving webhooks
    Poll,

    /// Send a notification to every registered user
    Broadcast {
        /// Notification text
        message: String,
    },

    /// Show recent notifications, newest first
    History {
        /// Number of entries (1-100)
        #[arg(short, long, default_value_t = DEFAULT_HISTORY_PAGE)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("thoughtrelay=info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    match cli.command {
        Commands::Serve => gateway::run_gateway(config).await,

        Commands::Poll => {
            let state = AppState::from_config(&config)?;
            tracing::info!(store = state.bot.store.name(), "Polling Telegram for updates");
            bot::run_polling(&state.bot).await
        }

        Commands::Broadcast { message } => {
            let state = AppState::from_config(&config)?;
            let report = state.broadcaster.broadcast(&message).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }

        Commands::History { limit } => {
            if !(1..=HISTORY_LIMIT).contains(&limit) {
                anyhow::bail!("--limit must be between 1 and {HISTORY_LIMIT}");
            }
            let store = store::create_store(&config.store)?;
            let entries = store.notifications(limit).await?;
            println!("{}", serde_json::to_string_pretty(&entries)?);
            Ok(())
        }
    }
}
