use base64::Engine;
use serde::{ Serialize, Deserialize };

/// Who produced a message in the transcript.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImageRef {
    pub url: String,
}

/// One part of a multi-modal message body. The wire shape matches the
/// gateway's OpenAI-compatible format: `{"type":"text","text":...}` or
/// `{"type":"image_url","image_url":{"url":...}}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageRef },
}

/// Message body. The gateway distinguishes a bare string from a parts
/// sequence, so both shapes are kept rather than normalizing to one.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

impl Message {
    pub fn user(content: MessageContent) -> Self {
        Self { role: Role::User, content }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(text.into()),
        }
    }

    /// The text portion of the message, empty if there is none.
    pub fn text(&self) -> &str {
        match &self.content {
            MessageContent::Text(t) => t,
            MessageContent::Parts(parts) =>
                parts
                    .iter()
                    .find_map(|p| {
                        match p {
                            ContentPart::Text { text } => Some(text.as_str()),
                            _ => None,
                        }
                    })
                    .unwrap_or(""),
        }
    }

    /// All attached image URLs (remote or data URIs), in order.
    pub fn images(&self) -> Vec<&str> {
        match &self.content {
            MessageContent::Text(_) => Vec::new(),
            MessageContent::Parts(parts) =>
                parts
                    .iter()
                    .filter_map(|p| {
                        match p {
                            ContentPart::ImageUrl { image_url } => Some(image_url.url.as_str()),
                            _ => None,
                        }
                    })
                    .collect(),
        }
    }
}

/// Build the content of an outgoing user message from raw input.
///
/// Returns `None` when the trimmed text is empty and no images are
/// attached; the caller must not send in that case. With images the
/// result is a parts sequence, image parts first and a single trailing
/// text part when text is non-empty. Without images the plain string is
/// used directly.
pub fn build_user_content(text: &str, images: &[String]) -> Option<MessageContent> {
    let trimmed = text.trim();
    if trimmed.is_empty() && images.is_empty() {
        return None;
    }

    if images.is_empty() {
        return Some(MessageContent::Text(trimmed.to_string()));
    }

    let mut parts: Vec<ContentPart> = images
        .iter()
        .map(|url| ContentPart::ImageUrl {
            image_url: ImageRef { url: url.clone() },
        })
        .collect();
    if !trimmed.is_empty() {
        parts.push(ContentPart::Text { text: trimmed.to_string() });
    }

    Some(MessageContent::Parts(parts))
}

/// Encode raw image bytes as an inline data URI for attachment.
pub fn image_data_uri(mime: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime, base64::engine::general_purpose::STANDARD.encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_submission_is_refused() {
        assert_eq!(build_user_content("", &[]), None);
        assert_eq!(build_user_content("   \n", &[]), None);
    }

    #[test]
    fn plain_text_stays_a_bare_string() {
        let content = build_user_content("  hello  ", &[]).unwrap();
        assert_eq!(content, MessageContent::Text("hello".to_string()));
    }

    #[test]
    fn images_come_first_then_text() {
        let images = vec!["data:image/png;base64,AAAA".to_string()];
        let content = build_user_content("hello", &images).unwrap();
        match content {
            MessageContent::Parts(parts) => {
                assert_eq!(parts.len(), 2);
                assert!(matches!(&parts[0], ContentPart::ImageUrl { image_url } if
                    image_url.url == "data:image/png;base64,AAAA"));
                assert!(matches!(&parts[1], ContentPart::Text { text } if text == "hello"));
            }
            other => panic!("expected parts, got {:?}", other),
        }
    }

    #[test]
    fn image_only_submission_has_no_text_part() {
        let images = vec!["https://example.com/a.png".to_string()];
        let content = build_user_content("", &images).unwrap();
        match content {
            MessageContent::Parts(parts) => {
                assert_eq!(parts.len(), 1);
            }
            other => panic!("expected parts, got {:?}", other),
        }
    }

    #[test]
    fn wire_shape_matches_gateway_format() {
        let msg = Message::user(
            build_user_content("hi", &["https://example.com/a.png".to_string()]).unwrap()
        );
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "role": "user",
                "content": [
                    { "type": "image_url", "image_url": { "url": "https://example.com/a.png" } },
                    { "type": "text", "text": "hi" }
                ]
            })
        );

        let plain = Message::assistant("hello");
        let json = serde_json::to_value(&plain).unwrap();
        assert_eq!(json, serde_json::json!({ "role": "assistant", "content": "hello" }));
    }

    #[test]
    fn text_and_images_accessors() {
        let msg = Message::user(
            build_user_content("caption", &["u1".to_string(), "u2".to_string()]).unwrap()
        );
        assert_eq!(msg.text(), "caption");
        assert_eq!(msg.images(), vec!["u1", "u2"]);

        let plain = Message::assistant("reply");
        assert_eq!(plain.text(), "reply");
        assert!(plain.images().is_empty());
    }

    #[test]
    fn data_uri_encoding() {
        let uri = image_data_uri("image/png", b"abc");
        assert_eq!(uri, "data:image/png;base64,YWJj");
    }
}
