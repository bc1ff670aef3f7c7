mod bot;
mod config;
mod providers;
mod telegram_log;

use std::sync::Arc;

use teloxide::prelude::*;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use bot::{
    CommandRegistry, IncomingMessage, LifecycleController, RepliedMessage, SessionStore,
    TelegramClient,
};
use config::Config;

struct BotState {
    registry: CommandRegistry,
    controller: Arc<LifecycleController>,
}

fn env_filter() -> EnvFilter {
    EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into())
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "nourbot.json".to_string());
    let config = match Config::load(&config_path, |key| std::env::var(key).ok()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    let bot = Bot::new(&config.telegram_bot_token);

    // Setup logging
    let log_dir = config.data_dir.join("logs");
    let log_file = std::fs::create_dir_all(&log_dir).and_then(|_| {
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_dir.join("nourbot.log"))
    });
    let (file_writer, _guard) = match log_file {
        Ok(file) => {
            let (writer, guard) = tracing_appender::non_blocking(file);
            (Some(writer), Some(guard))
        }
        Err(e) => {
            eprintln!("File logging disabled, cannot open {}: {e}", log_dir.display());
            (None, None)
        }
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(env_filter()),
        )
        .with(file_writer.map(|writer| {
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(env_filter())
        }))
        .with(
            config
                .log_chat_id
                .map(|chat_id| telegram_log::OperatorAlertLayer::new(bot.clone(), chat_id)),
        )
        .init();

    info!("🚀 Starting nourbot...");
    info!("Loaded config from {config_path}");

    let bot_username = match bot.get_me().await {
        Ok(me) => {
            info!("Bot user ID: {}, username: @{}", me.id, me.username());
            Some(me.username().to_string())
        }
        Err(e) => {
            warn!("Failed to get bot info: {e}");
            None
        }
    };

    let registry = CommandRegistry::new(bot_username, providers::from_config(&config));
    let commands: Vec<&str> = registry.available().map(|c| c.name).collect();
    info!("Commands enabled: {}", commands.join(", "));

    let sessions = Arc::new(SessionStore::new(config.chat_history_turns));
    let transport = Arc::new(TelegramClient::new(bot.clone()));
    let controller = LifecycleController::new(transport, sessions, config.provider_timeout)
        .with_slow_notice(config.slow_notice);

    let state = Arc::new(BotState {
        registry,
        controller: Arc::new(controller),
    });

    let handler = Update::filter_message().endpoint(handle_new_message);

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

async fn handle_new_message(msg: Message, state: Arc<BotState>) -> ResponseResult<()> {
    let Some(incoming) = telegram_to_incoming(&msg) else {
        return Ok(());
    };

    let resolution = state.registry.resolve(&incoming);
    // Matched commands are spawned; the dispatcher moves on immediately.
    state
        .controller
        .handle(resolution, incoming.chat_id, incoming.message_id)
        .await;

    Ok(())
}

fn telegram_to_incoming(msg: &Message) -> Option<IncomingMessage> {
    let text = msg.text()?;

    let sender = msg
        .from
        .as_ref()
        .map(|u| match u.username {
            Some(ref username) => format!("@{username}"),
            None => u.first_name.clone(),
        })
        .unwrap_or_else(|| "unknown".to_string());

    let reply_to = msg.reply_to_message().map(|reply| RepliedMessage {
        message_id: reply.id.0 as i64,
        text: reply.text().map(str::to_string),
        // Largest size comes last
        photo_file_id: reply
            .photo()
            .and_then(|sizes| sizes.last())
            .map(|size| size.file.id.0.clone()),
    });

    Some(IncomingMessage {
        chat_id: msg.chat.id.0,
        message_id: msg.id.0 as i64,
        sender,
        text: text.to_string(),
        reply_to,
    })
}
