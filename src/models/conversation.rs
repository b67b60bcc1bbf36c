use chrono::Utc;
use serde::{ Serialize, Deserialize };
use uuid::Uuid;

use super::chat::{ ContentPart, MessageContent, Role };

/// Title given to a conversation before the first user message names it.
pub const DEFAULT_TITLE: &str = "New Chat";

const TITLE_MAX_CHARS: usize = 30;

/// A message as persisted in the conversation store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: String,
    pub role: Role,
    pub content: MessageContent,
    pub timestamp: i64,
}

/// A persisted, titled chat session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    #[serde(rename = "createdAt")]
    pub created_at: i64,
    #[serde(rename = "updatedAt")]
    pub updated_at: i64,
    pub messages: Vec<StoredMessage>,
    pub model: Option<String>,
}

/// Container for the on-disk conversations document.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ConversationsData {
    pub conversations: Vec<Conversation>,
}

impl Conversation {
    pub fn new(model: Option<String>) -> Self {
        let now = now_millis();
        Self {
            id: generate_id(),
            title: DEFAULT_TITLE.to_string(),
            created_at: now,
            updated_at: now,
            messages: Vec::new(),
            model,
        }
    }
}

pub fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Derive a conversation title from the first user message.
///
/// Short text passes through unchanged. Longer text is cut at the last
/// word boundary inside the first 30 characters when one falls past the
/// midpoint, otherwise hard-truncated, with an ellipsis appended.
pub fn generate_title(content: &MessageContent) -> String {
    let text = match content {
        MessageContent::Text(t) => t.as_str(),
        MessageContent::Parts(parts) =>
            parts
                .iter()
                .find_map(|p| {
                    match p {
                        ContentPart::Text { text } => Some(text.as_str()),
                        _ => None,
                    }
                })
                .unwrap_or("New conversation"),
    };

    if text.chars().count() <= TITLE_MAX_CHARS {
        return text.to_string();
    }

    let truncated: String = text.chars().take(TITLE_MAX_CHARS).collect();
    // The midpoint rule counts characters, not bytes.
    let mut cut = truncated.len();
    for (char_idx, (byte_idx, ch)) in truncated.char_indices().enumerate() {
        if ch == ' ' && char_idx > TITLE_MAX_CHARS / 2 {
            cut = byte_idx;
        }
    }
    format!("{}...", &truncated[..cut])
}
