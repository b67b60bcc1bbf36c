use futures::{ Stream, StreamExt };
use log::debug;
use serde::{ Serialize, Deserialize };
use std::pin::Pin;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::{ GatewayClient, GatewayError };
use crate::models::chat::Message;

/// Incremental assistant-text fragments from one streaming call.
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<String, GatewayError>> + Send>>;

const DATA_PREFIX: &str = "data: ";
const DONE_PAYLOAD: &str = "[DONE]";

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    stream: bool,
}

#[derive(Deserialize)]
struct ChatStreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

/// Rolling buffer that turns arbitrary chunk boundaries into complete
/// lines. An SSE line may span several network chunks; the trailing
/// partial line is retained until its newline arrives, so the decoded
/// output does not depend on where the transport split the body.
///
/// Splitting happens on raw bytes and each line is decoded only once it
/// is complete, so a chunk boundary inside a multi-byte character is
/// reassembled instead of decoded as replacement characters.
#[derive(Debug, Default)]
pub struct SseLineBuffer {
    buf: Vec<u8>,
}

impl SseLineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and drain every complete line it closed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line);
            lines.push(text.trim_end_matches(['\r', '\n']).to_string());
        }
        lines
    }
}

/// Extract the content delta from one SSE line, if it carries any.
///
/// Lines without the `data: ` prefix, the `[DONE]` terminator, frames
/// that fail to parse and frames with absent or empty content all yield
/// `None`; none of them ends the stream or raises an error.
pub fn parse_frame(line: &str) -> Option<String> {
    let data = line.strip_prefix(DATA_PREFIX)?;
    if data == DONE_PAYLOAD {
        return None;
    }
    let chunk: ChatStreamChunk = match serde_json::from_str(data) {
        Ok(c) => c,
        Err(e) => {
            debug!("Skipping malformed frame ({}): {}", e, data);
            return None;
        }
    };
    let content = chunk.choices.into_iter().next()?.delta.content?;
    if content.is_empty() {
        None
    } else {
        Some(content)
    }
}

impl GatewayClient {
    /// Issue a streaming chat-completion call and return the assistant
    /// reply as a stream of text deltas in arrival order.
    ///
    /// A non-2xx status fails the call before any delta is produced.
    /// Read failures mid-stream surface as one `Err` item and end the
    /// stream.
    pub async fn stream_chat(
        &self,
        messages: &[Message],
        model: &str
    ) -> Result<DeltaStream, GatewayError> {
        let url = format!("{}/v1/chat/completions", self.endpoint().base_url());
        let req = ChatRequest { model, messages, stream: true };

        let resp = self.http().post(&url).json(&req).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(GatewayError::Status(status.as_u16()));
        }

        let (tx, rx) = mpsc::channel(32);

        tokio::spawn(async move {
            let mut body = resp.bytes_stream();
            let mut lines = SseLineBuffer::new();

            while let Some(chunk_result) = body.next().await {
                match chunk_result {
                    Ok(bytes) => {
                        debug!("Gateway raw chunk: {} bytes", bytes.len());
                        for line in lines.push(&bytes) {
                            if let Some(content) = parse_frame(&line) {
                                if tx.send(Ok(content)).await.is_err() {
                                    // Receiver dropped, stop reading.
                                    return;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(GatewayError::Read(e.to_string()))).await;
                        return;
                    }
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}
