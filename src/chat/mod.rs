use async_trait::async_trait;
use futures::StreamExt;
use log::{ error, info };
use std::error::Error;
use std::sync::Arc;

use crate::gateway::{ GatewayClient, GatewayError };
use crate::history::ConversationStore;
use crate::models::chat::{ build_user_content, Message, Role };
use crate::models::conversation::{
    generate_id,
    generate_title,
    now_millis,
    Conversation,
    StoredMessage,
    DEFAULT_TITLE,
};

/// Prefix of the synthesized assistant message shown when a call fails.
pub const CHAT_ERROR_PREFIX: &str = "Chat error";

/// How an applied delta changes the transcript.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Commit {
    /// First content of the reply: append a new assistant message.
    Append,
    /// Further content: replace the last message with the new total.
    ReplaceLast,
}

/// Single-slot accumulator for the in-flight assistant reply.
#[derive(Debug, Default)]
pub struct StreamState {
    accumulated: String,
    committed: bool,
}

impl StreamState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one delta in. Empty deltas change nothing.
    pub fn apply(&mut self, delta: &str) -> Option<Commit> {
        if delta.is_empty() {
            return None;
        }
        self.accumulated.push_str(delta);
        if self.committed {
            Some(Commit::ReplaceLast)
        } else {
            self.committed = true;
            Some(Commit::Append)
        }
    }

    pub fn text(&self) -> &str {
        &self.accumulated
    }
}

/// Observer of transcript snapshots, called after every applied delta
/// so a front end can re-render progressively.
#[async_trait]
pub trait TranscriptPublisher: Send + Sync {
    async fn publish(&self, messages: &[Message]);
}

/// Publisher that drops every snapshot.
pub struct NullPublisher;

#[async_trait]
impl TranscriptPublisher for NullPublisher {
    async fn publish(&self, _messages: &[Message]) {}
}

/// Drives one streaming chat exchange against the gateway.
///
/// Appends the user turn, streams the assistant reply into the
/// transcript (append once, then replace-last), and on any failure
/// appends a single synthesized error message instead. The user's
/// message is never removed. `&mut self` keeps one call in flight at a
/// time per consumer.
pub struct StreamingChatConsumer {
    client: GatewayClient,
}

impl StreamingChatConsumer {
    pub fn new(client: GatewayClient) -> Self {
        Self { client }
    }

    pub async fn send(
        &mut self,
        prior: &[Message],
        user_message: Message,
        model: &str,
        publisher: &dyn TranscriptPublisher
    ) -> Vec<Message> {
        let mut transcript: Vec<Message> = prior.to_vec();
        transcript.push(user_message);
        publisher.publish(&transcript).await;

        if let Err(e) = self.stream_reply(&mut transcript, model, publisher).await {
            error!("Chat request failed: {}", e);
            transcript.push(Message::assistant(format!("{}: {}", CHAT_ERROR_PREFIX, e)));
            publisher.publish(&transcript).await;
        }

        transcript
    }

    async fn stream_reply(
        &self,
        transcript: &mut Vec<Message>,
        model: &str,
        publisher: &dyn TranscriptPublisher
    ) -> Result<(), GatewayError> {
        let mut deltas = self.client.stream_chat(transcript, model).await?;
        let mut state = StreamState::new();

        while let Some(item) = deltas.next().await {
            let delta = item?;
            match state.apply(&delta) {
                Some(Commit::Append) => {
                    transcript.push(Message::assistant(state.text()));
                }
                Some(Commit::ReplaceLast) => {
                    if let Some(last) = transcript.last_mut() {
                        *last = Message::assistant(state.text());
                    }
                }
                None => {
                    continue;
                }
            }
            publisher.publish(transcript).await;
        }

        Ok(())
    }
}

/// One chat view's worth of state: the live transcript, the backing
/// conversation record, and the persistence wiring around the consumer.
pub struct ChatSession {
    consumer: StreamingChatConsumer,
    store: Arc<dyn ConversationStore>,
    transcript: Vec<Message>,
    conversation: Option<Conversation>,
    model: String,
}

impl ChatSession {
    pub fn new(client: GatewayClient, store: Arc<dyn ConversationStore>, model: String) -> Self {
        Self {
            consumer: StreamingChatConsumer::new(client),
            store,
            transcript: Vec::new(),
            conversation: None,
            model,
        }
    }

    /// Resume a stored conversation.
    pub fn open(&mut self, conversation: Conversation) {
        self.transcript = conversation.messages
            .iter()
            .map(|m| Message { role: m.role, content: m.content.clone() })
            .collect();
        if let Some(model) = &conversation.model {
            self.model = model.clone();
        }
        self.conversation = Some(conversation);
    }

    /// Drop the current transcript. The next send lazily creates a
    /// fresh conversation; nothing is persisted until then.
    pub fn start_new(&mut self) {
        self.transcript.clear();
        self.conversation = None;
    }

    pub fn messages(&self) -> &[Message] {
        &self.transcript
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation.as_ref().map(|c| c.id.as_str())
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn set_model(&mut self, model: String) {
        self.model = model;
    }

    /// Send one user turn and stream the reply. Returns `false` without
    /// any network call when the submission is empty.
    pub async fn send(
        &mut self,
        text: &str,
        images: &[String],
        publisher: &dyn TranscriptPublisher
    ) -> Result<bool, Box<dyn Error + Send + Sync>> {
        let Some(content) = build_user_content(text, images) else {
            return Ok(false);
        };

        let prior = std::mem::take(&mut self.transcript);
        let user_message = Message::user(content);
        self.transcript = self.consumer.send(&prior, user_message, &self.model, publisher).await;
        self.persist().await?;

        Ok(true)
    }

    /// Commit the transcript to the store: create the conversation on
    /// first send, reuse message ids and timestamps by position, derive
    /// the title from the first user message while still default, bump
    /// `updatedAt`.
    async fn persist(&mut self) -> Result<(), Box<dyn Error + Send + Sync>> {
        let mut conv = match self.conversation.take() {
            Some(c) => c,
            None => {
                let c = Conversation::new(Some(self.model.clone()));
                info!("Created conversation {}", c.id);
                self.store.create(&c).await?;
                c
            }
        };

        let now = now_millis();
        let stored: Vec<StoredMessage> = self.transcript
            .iter()
            .enumerate()
            .map(|(i, m)| {
                let existing = conv.messages.get(i);
                StoredMessage {
                    id: existing.map(|e| e.id.clone()).unwrap_or_else(generate_id),
                    role: m.role,
                    content: m.content.clone(),
                    timestamp: existing.map(|e| e.timestamp).unwrap_or(now),
                }
            })
            .collect();

        if conv.title == DEFAULT_TITLE {
            if let Some(first_user) = self.transcript.iter().find(|m| m.role == Role::User) {
                conv.title = generate_title(&first_user.content);
            }
        }

        conv.messages = stored;
        conv.updated_at = now;
        conv.model = Some(self.model.clone());

        let snapshot = conv.clone();
        self.conversation = Some(conv);
        self.store.update(&snapshot).await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_content_appends_then_replaces() {
        let mut state = StreamState::new();
        assert_eq!(state.apply("Hi"), Some(Commit::Append));
        assert_eq!(state.apply(" there"), Some(Commit::ReplaceLast));
        assert_eq!(state.text(), "Hi there");
    }

    #[test]
    fn empty_deltas_are_no_ops() {
        let mut state = StreamState::new();
        assert_eq!(state.apply(""), None);
        // Still uncommitted: the next real delta appends.
        assert_eq!(state.apply("x"), Some(Commit::Append));
        assert_eq!(state.apply(""), None);
        assert_eq!(state.text(), "x");
    }

    #[test]
    fn error_message_format_matches_transcript_contract() {
        let msg = format!("{}: {}", CHAT_ERROR_PREFIX, GatewayError::Status(500));
        assert_eq!(msg, "Chat error: HTTP error! status: 500");
    }
}
