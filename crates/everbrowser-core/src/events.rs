//! Typed events streamed to the client for one request

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// One event in a chat response stream.
///
/// Serialized as `{"type": "...", ...}`, one per SSE `data:` line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ChatEvent {
    Start,
    Token { content: String },
    /// A tool ran; its echoed output was kept from the client.
    ToolInternalSuppressed { tool: String },
    Error {
        #[serde(rename = "error")]
        message: String,
    },
    End,
}

impl ChatEvent {
    pub fn token(content: impl Into<String>) -> Self {
        ChatEvent::Token {
            content: content.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ChatEvent::Error {
            message: message.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ChatEvent::End | ChatEvent::Error { .. })
    }
}

/// Where the orchestrator writes events for one request.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Deliver one event. Returns false once the client is gone.
    async fn emit(&self, event: ChatEvent) -> bool;

    /// Liveness of the client connection.
    fn is_connected(&self) -> bool;
}

/// Sink backed by a tokio channel. Dropping the receiver disconnects it.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<ChatEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<ChatEvent>) -> Self {
        Self { tx }
    }

    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<ChatEvent>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn emit(&self, event: ChatEvent) -> bool {
        self.tx.send(event).await.is_ok()
    }

    fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }
}
