//! Request lifecycle: acknowledge → invoke → resolve → cleanup.
//!
//! Every matched command goes through [`LifecycleController::run`], which
//! guarantees exactly one terminal message per invocation: the formatted
//! result, or the command's fixed failure notice. Placeholders are always
//! deleted and replaced, never edited into the final answer.

use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::bot::formatter::{self, Image, RenderContext, Rendered};
use crate::bot::message::preview;
use crate::bot::registry::{Invocation, RequestTemplate, Resolution};
use crate::bot::session::SessionStore;
use crate::bot::transport::{PhotoSource, TextFormat, Transport, TransportError};
use crate::providers::{ProviderError, ProviderOutput, ProviderRequest};

/// Shown in place of the placeholder when a provider is slow.
const SLOW_NOTICE: &str = "Still working on it, this is taking longer than usual...";

/// In-flight bookkeeping for one invocation.
#[derive(Debug)]
pub struct PendingRequest {
    pub chat_id: i64,
    pub origin_message_id: i64,
    pub ack_message_id: Option<i64>,
    pub started_at: Instant,
}

/// Why an invocation ended with the failure notice.
#[derive(Debug, thiserror::Error)]
pub enum Failure {
    #[error("{provider}: {source}")]
    Provider {
        provider: &'static str,
        #[source]
        source: ProviderError,
    },
    #[error("photo lookup failed: {0}")]
    Attachment(#[source] TransportError),
    #[error("result delivery failed: {0}")]
    Delivery(#[source] TransportError),
}

/// Terminal state of an invocation.
#[derive(Debug)]
pub enum Outcome {
    Delivered,
    Failed(Failure),
}

pub struct LifecycleController {
    transport: Arc<dyn Transport>,
    sessions: Arc<SessionStore>,
    timeout: Duration,
    slow_notice_after: Option<Duration>,
}

impl LifecycleController {
    pub fn new(
        transport: Arc<dyn Transport>,
        sessions: Arc<SessionStore>,
        timeout: Duration,
    ) -> Self {
        Self {
            transport,
            sessions,
            timeout,
            slow_notice_after: None,
        }
    }

    pub fn with_slow_notice(mut self, after: Option<Duration>) -> Self {
        self.slow_notice_after = after;
        self
    }

    /// Act on a registry resolution. Matched commands run on their own task
    /// so a slow provider never holds up the next update.
    pub async fn handle(
        self: &Arc<Self>,
        resolution: Resolution,
        chat_id: i64,
        message_id: i64,
    ) -> Option<JoinHandle<Outcome>> {
        match resolution {
            Resolution::NoMatch => None,
            Resolution::Static(text) => {
                self.send_notice(chat_id, &text, None).await;
                None
            }
            Resolution::MissingPrecondition(notice) => {
                info!("❔ Precondition missing in chat {}: {}", chat_id, notice);
                self.send_notice(chat_id, notice, Some(message_id)).await;
                None
            }
            Resolution::Unavailable(notice) => {
                info!("🚫 Command unavailable in chat {}: {}", chat_id, notice);
                self.send_notice(chat_id, &notice, Some(message_id)).await;
                None
            }
            Resolution::Matched(invocation) => {
                let controller = Arc::clone(self);
                Some(tokio::spawn(async move { controller.run(invocation).await }))
            }
        }
    }

    async fn send_notice(&self, chat_id: i64, text: &str, reply_to: Option<i64>) {
        if let Err(e) = self.transport.send_text(chat_id, text, TextFormat::Plain, reply_to).await {
            warn!("Failed to send notice: {e}");
        }
    }

    /// Run one invocation to completion.
    pub async fn run(&self, invocation: Invocation) -> Outcome {
        let spec = invocation.spec.clone();
        info!(
            "▶️ /{} in chat {} via {}: \"{}\"",
            spec.name,
            invocation.chat_id,
            invocation.provider.name(),
            preview(invocation.argument.as_deref().unwrap_or_default())
        );

        let mut pending = PendingRequest {
            chat_id: invocation.chat_id,
            origin_message_id: invocation.message_id,
            ack_message_id: None,
            started_at: Instant::now(),
        };

        // Acknowledge (best effort)
        match self
            .transport
            .send_text(pending.chat_id, spec.placeholder, TextFormat::Plain, None)
            .await
        {
            Ok(id) => pending.ack_message_id = Some(id),
            Err(e) => warn!("Placeholder not shown for /{}: {e}", spec.name),
        }

        // Invoke
        let result = self.invoke(&invocation, &pending).await;

        // Resolve
        self.remove_placeholder(&pending).await;

        let outcome = match result {
            Ok(output) => self.deliver(&invocation, &pending, output).await,
            Err(failure) => Err(failure),
        };

        let elapsed = pending.started_at.elapsed();
        match outcome {
            Ok(()) => {
                info!("✅ /{} done in {:.1}s", spec.name, elapsed.as_secs_f32());
                Outcome::Delivered
            }
            Err(failure) => {
                warn!(
                    "❌ /{} failed after {:.1}s: {failure}",
                    spec.name,
                    elapsed.as_secs_f32()
                );
                if let Err(e) = self
                    .transport
                    .send_text(
                        pending.chat_id,
                        spec.failure_notice,
                        TextFormat::Plain,
                        Some(pending.origin_message_id),
                    )
                    .await
                {
                    error!("Failure notice for /{} could not be sent: {e}", spec.name);
                }
                Outcome::Failed(failure)
            }
        }
    }

    async fn invoke(
        &self,
        invocation: &Invocation,
        pending: &PendingRequest,
    ) -> Result<ProviderOutput, Failure> {
        let request = self.build_request(invocation).await?;
        let provider = invocation.provider.as_ref();

        let call = tokio::time::timeout(self.timeout, provider.invoke(request));
        tokio::pin!(call);

        let result = match (self.slow_notice_after, pending.ack_message_id) {
            (Some(after), Some(ack_id)) => {
                tokio::select! {
                    result = &mut call => result,
                    _ = tokio::time::sleep(after) => {
                        if let Err(e) = self
                            .transport
                            .edit_text(pending.chat_id, ack_id, SLOW_NOTICE)
                            .await
                        {
                            warn!("Slow notice not shown: {e}");
                        }
                        call.await
                    }
                }
            }
            _ => call.await,
        };

        result
            .unwrap_or(Err(ProviderError::Timeout))
            .map_err(|source| Failure::Provider {
                provider: provider.name(),
                source,
            })
    }

    async fn build_request(&self, invocation: &Invocation) -> Result<ProviderRequest, Failure> {
        let argument = invocation.argument.clone().unwrap_or_default();
        let replied_text = invocation.replied_text.clone().unwrap_or_default();

        let request = match invocation.spec.template {
            RequestTemplate::Text => ProviderRequest::Text { prompt: argument },
            RequestTemplate::Conversation => ProviderRequest::Conversation {
                context: self.sessions.build_context(invocation.chat_id).await,
                prompt: argument,
            },
            RequestTemplate::Image => ProviderRequest::Image { prompt: argument },
            RequestTemplate::Describe { default_prompt } => {
                let file_id = invocation.replied_photo.as_deref().unwrap_or_default();
                let image_url = self
                    .transport
                    .file_url(file_id)
                    .await
                    .map_err(Failure::Attachment)?;
                let prompt = invocation
                    .argument
                    .clone()
                    .unwrap_or_else(|| default_prompt.to_string());
                ProviderRequest::Describe { image_url, prompt }
            }
            RequestTemplate::Translate => ProviderRequest::Translate {
                text: replied_text,
                target: argument,
            },
            RequestTemplate::DetectLanguage => {
                ProviderRequest::DetectLanguage { text: replied_text }
            }
            RequestTemplate::Geocode => ProviderRequest::Geocode { location: argument },
            RequestTemplate::Weather => ProviderRequest::Weather { location: argument },
            RequestTemplate::LocalTime => ProviderRequest::LocalTime { location: argument },
        };

        Ok(request)
    }

    async fn remove_placeholder(&self, pending: &PendingRequest) {
        if let Some(ack_id) = pending.ack_message_id
            && let Err(e) = self.transport.delete_message(pending.chat_id, ack_id).await
        {
            warn!("Placeholder {} not removed: {e}", ack_id);
        }
    }

    async fn deliver(
        &self,
        invocation: &Invocation,
        pending: &PendingRequest,
        output: ProviderOutput,
    ) -> Result<(), Failure> {
        let spec = &invocation.spec;

        // Keep the raw answer for the session before formatting touches it.
        let answer = match (&output, spec.template) {
            (ProviderOutput::Text(text), RequestTemplate::Conversation) => Some(text.clone()),
            _ => None,
        };

        let ctx = RenderContext {
            sender: &invocation.sender,
            prompt: invocation.argument.as_deref(),
        };
        let rendered =
            formatter::render(spec.output, output, &ctx).map_err(|source| Failure::Provider {
                provider: invocation.provider.name(),
                source,
            })?;

        let reply_to = Some(pending.origin_message_id);
        match rendered {
            Rendered::Text { text, format } => {
                self.transport
                    .send_text(pending.chat_id, &text, format, reply_to)
                    .await
                    .map_err(Failure::Delivery)?;
            }
            Rendered::Photo {
                image: Image::Url(url),
                caption,
                format,
            } => {
                self.transport
                    .send_photo(
                        pending.chat_id,
                        PhotoSource::Url(url),
                        caption.as_deref(),
                        format,
                        reply_to,
                    )
                    .await
                    .map_err(Failure::Delivery)?;
            }
            Rendered::Photo {
                image: Image::Bytes(data),
                caption,
                format,
            } => {
                // Removed when `staged` drops, whether or not the upload worked.
                let staged = stage_image(&data).map_err(Failure::Delivery)?;
                self.transport
                    .send_photo(
                        pending.chat_id,
                        PhotoSource::File(staged.path().to_path_buf()),
                        caption.as_deref(),
                        format,
                        reply_to,
                    )
                    .await
                    .map_err(Failure::Delivery)?;
            }
        }

        if let (Some(answer), Some(user_text)) = (answer, invocation.argument.as_deref()) {
            self.sessions.append_exchange(invocation.chat_id, user_text, &answer).await;
        }

        Ok(())
    }
}

/// Write image bytes to a temporary PNG that is deleted on drop.
fn stage_image(data: &[u8]) -> Result<tempfile::NamedTempFile, TransportError> {
    let mut file = tempfile::Builder::new()
        .prefix("nourbot_image_")
        .suffix(".png")
        .tempfile()
        .map_err(|e| TransportError::new("stage image", e))?;
    file.write_all(data)
        .and_then(|_| file.flush())
        .map_err(|e| TransportError::new("stage image", e))?;
    Ok(file)
}
