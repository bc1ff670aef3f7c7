use std::time::Duration;

use teloxide::prelude::*;
use teloxide::types::ChatId;
use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

/// Flush early once this many alerts are waiting.
const MAX_BATCH: usize = 20;
const FLUSH_INTERVAL: Duration = Duration::from_secs(5);
const MAX_ALERT_CHARS: usize = 4000;

/// Forwards WARN and ERROR events to an operator chat, batched.
pub struct OperatorAlertLayer {
    tx: mpsc::UnboundedSender<String>,
}

impl OperatorAlertLayer {
    pub fn new(bot: Bot, chat_id: ChatId) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            let mut buffer: Vec<String> = Vec::new();
            let mut interval = tokio::time::interval(FLUSH_INTERVAL);

            loop {
                tokio::select! {
                    alert = rx.recv() => {
                        match alert {
                            Some(text) => {
                                buffer.push(text);
                                if buffer.len() >= MAX_BATCH {
                                    flush_buffer(&bot, chat_id, &mut buffer).await;
                                }
                            }
                            None => {
                                flush_buffer(&bot, chat_id, &mut buffer).await;
                                break;
                            }
                        }
                    }
                    _ = interval.tick() => {
                        flush_buffer(&bot, chat_id, &mut buffer).await;
                    }
                }
            }
        });

        Self { tx }
    }
}

async fn flush_buffer(bot: &Bot, chat_id: ChatId, buffer: &mut Vec<String>) {
    if buffer.is_empty() {
        return;
    }
    let combined = buffer.join("\n");
    buffer.clear();

    let text = if combined.chars().count() > MAX_ALERT_CHARS {
        let truncated: String = combined.chars().take(MAX_ALERT_CHARS).collect();
        format!("{truncated}...")
    } else {
        combined
    };
    // Logging here would feed the layer back into itself.
    if let Err(e) = bot.send_message(chat_id, &text).await {
        eprintln!("Failed to send operator alert: {e}");
    }
}

#[derive(Default)]
struct AlertVisitor {
    message: String,
    fields: Vec<String>,
}

impl Visit for AlertVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.fields.push(format!("{} = {:?}", field.name(), value));
        }
    }
}

/// Render one event as a single alert line.
fn format_alert(level: Level, target: &str, visitor: AlertVisitor) -> String {
    let prefix = if level == Level::ERROR { "❌" } else { "⚠️" };
    let mut line = format!("{prefix} [{target}] {}", visitor.message);
    if !visitor.fields.is_empty() {
        line.push_str(&format!(" ({})", visitor.fields.join(", ")));
    }
    line
}

impl<S: Subscriber> Layer<S> for OperatorAlertLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let level = *metadata.level();

        // Only WARN and ERROR reach operators
        if level > Level::WARN {
            return;
        }

        let mut visitor = AlertVisitor::default();
        event.record(&mut visitor);

        if self.tx.send(format_alert(level, metadata.target(), visitor)).is_err() {
            eprintln!("Alert channel closed, message dropped");
        }
    }
}
