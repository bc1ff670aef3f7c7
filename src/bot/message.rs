//! Transport-neutral view of an inbound chat message.

/// The message a command was sent in reply to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepliedMessage {
    pub message_id: i64,
    /// Text body, if the replied-to message was a text message.
    pub text: Option<String>,
    /// File id of the largest photo size, if the replied-to message carried a photo.
    pub photo_file_id: Option<String>,
}

/// An inbound text message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    /// Conversation identifier (negative = group, positive = DM).
    pub chat_id: i64,
    pub message_id: i64,
    /// "@username" when the sender has one, first name otherwise.
    pub sender: String,
    pub text: String,
    pub reply_to: Option<RepliedMessage>,
}

/// Escape a string for Telegram HTML parse mode.
pub fn html_escape(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '<' => result.push_str("&lt;"),
            '>' => result.push_str("&gt;"),
            '&' => result.push_str("&amp;"),
            _ => result.push(c),
        }
    }
    result
}

/// Truncate to at most `max_chars` characters, appending "..." when cut.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let keep = max_chars.saturating_sub(3);
    let mut out: String = s.chars().take(keep).collect();
    out.push_str("...");
    out
}

/// Short single-line preview for logs.
pub fn preview(s: &str) -> String {
    truncate_chars(&s.replace('\n', " "), 50)
}
