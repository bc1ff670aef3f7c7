//! Turns provider output into what the chat transport sends.

use crate::bot::message::{html_escape, truncate_chars};
use crate::bot::transport::TextFormat;
use crate::providers::{ProviderError, ProviderOutput};

/// Telegram rejects text messages longer than this.
pub const MAX_TEXT_CHARS: usize = 4096;
/// Telegram rejects photo captions longer than this.
pub const MAX_CAPTION_CHARS: usize = 1024;
/// Room left for the prompt inside an art caption.
const MAX_PROMPT_IN_CAPTION: usize = 900;

/// Per-command display rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputRule {
    /// Reply text as-is, no markup.
    Plain,
    /// Reply text parsed as Markdown.
    Markdown,
    /// Markdown reply preceded by a blank line.
    Spaced,
    /// Photo without caption.
    Photo,
    /// Photo with an attribution caption naming the requester and prompt.
    ArtPhoto,
}

/// Image payload ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Image {
    Bytes(Vec<u8>),
    Url(String),
}

/// Final message content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rendered {
    Text {
        text: String,
        format: TextFormat,
    },
    Photo {
        image: Image,
        caption: Option<String>,
        format: TextFormat,
    },
}

/// Request details a caption may mention.
pub struct RenderContext<'a> {
    pub sender: &'a str,
    pub prompt: Option<&'a str>,
}

/// Render provider output according to the command's rule.
///
/// A text rule given an image (or the reverse) is a provider contract breach
/// and surfaces as [`ProviderError::Malformed`].
pub fn render(
    rule: OutputRule,
    output: ProviderOutput,
    ctx: &RenderContext<'_>,
) -> Result<Rendered, ProviderError> {
    match (rule, output) {
        (OutputRule::Plain, ProviderOutput::Text(text)) => {
            Ok(text_message(text, TextFormat::Plain))
        }
        (OutputRule::Markdown, ProviderOutput::Text(text)) => {
            Ok(text_message(text, TextFormat::Markdown))
        }
        (OutputRule::Spaced, ProviderOutput::Text(text)) => {
            Ok(text_message(format!("\n\n{text}"), TextFormat::Markdown))
        }
        (OutputRule::Photo, output) => Ok(Rendered::Photo {
            image: image_of(output)?,
            caption: None,
            format: TextFormat::Plain,
        }),
        (OutputRule::ArtPhoto, output) => Ok(Rendered::Photo {
            image: image_of(output)?,
            caption: Some(art_caption(ctx)),
            format: TextFormat::Html,
        }),
        (rule, ProviderOutput::ImageBytes(_) | ProviderOutput::ImageUrl(_)) => Err(
            ProviderError::Malformed(format!("image output for text rule {rule:?}")),
        ),
    }
}

fn text_message(text: String, format: TextFormat) -> Rendered {
    Rendered::Text {
        text: truncate_chars(&text, MAX_TEXT_CHARS),
        format,
    }
}

fn image_of(output: ProviderOutput) -> Result<Image, ProviderError> {
    match output {
        ProviderOutput::ImageBytes(data) => Ok(Image::Bytes(data)),
        ProviderOutput::ImageUrl(url) => Ok(Image::Url(url)),
        ProviderOutput::Text(_) => {
            Err(ProviderError::Malformed("text output for photo rule".into()))
        }
    }
}

fn art_caption(ctx: &RenderContext<'_>) -> String {
    let prompt = truncate_chars(ctx.prompt.unwrap_or_default(), MAX_PROMPT_IN_CAPTION);
    let caption = format!(
        "✅ AI Art\n\nGenerated by {}\nPrompt❤️: <code>{}.</code>",
        html_escape(ctx.sender),
        html_escape(&prompt)
    );
    // Escaping can only grow the prompt; a cut caption would break the HTML.
    if caption.chars().count() > MAX_CAPTION_CHARS {
        format!("✅ AI Art\n\nGenerated by {}", html_escape(ctx.sender))
    } else {
        caption
    }
}
