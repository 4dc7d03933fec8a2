//! Chatlens IPC
//!
//! Event bus between the transport adapter and the analysis engine

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;

static NEXT_TRACE_COUNTER: AtomicU64 = AtomicU64::new(1);

fn now_unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn generate_trace_id() -> String {
    let ts = now_unix_secs();
    let n = NEXT_TRACE_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("trace-{}-{}", ts, n)
}

fn default_schema_version() -> u16 {
    1
}

fn default_trace_id() -> String {
    generate_trace_id()
}

/// One inbound chat update, already authorized by the adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default = "default_schema_version")]
    pub schema_version: u16,
    #[serde(default = "default_trace_id")]
    pub trace_id: String,
    pub message: InboundMessage,
}

impl Envelope {
    pub fn new(message: InboundMessage) -> Self {
        Self {
            schema_version: default_schema_version(),
            trace_id: generate_trace_id(),
            message,
        }
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub chat_id: i64,
    pub message_id: i64,
    pub epoch_seconds: i64,
    pub from: Sender,
    pub text: Option<String>,
    #[serde(default)]
    pub media: Option<MediaKind>,
    #[serde(default)]
    pub reply_to: Option<ReplyRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sender {
    pub user_id: i64,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

impl Sender {
    pub fn full_name(&self) -> String {
        let mut full = String::new();
        if let Some(first) = &self.first_name {
            full.push_str(first);
        }
        if let Some(last) = &self.last_name {
            if !full.is_empty() {
                full.push(' ');
            }
            full.push_str(last);
        }
        full
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum MediaKind {
    #[serde(rename = "sticker")]
    Sticker { file_id: String },
    #[serde(rename = "gif")]
    Gif { file_id: String },
    #[serde(rename = "image")]
    Image { file_id: String },
    #[serde(rename = "video")]
    Video { file_id: String },
    #[serde(rename = "audio")]
    Audio { file_id: String },
    #[serde(rename = "voice")]
    Voice { file_id: String },
    #[serde(rename = "chat_title")]
    ChatTitle { title: String },
    #[serde(rename = "chat_photo")]
    ChatPhoto { file_id: String },
    #[serde(rename = "pinned_message")]
    PinnedMessage {
        message_id: i64,
        user_id: i64,
        text: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyRef {
    pub message_id: i64,
    pub user_id: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParseMode {
    Markdown,
    Html,
}

impl ParseMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParseMode::Markdown => "Markdown",
            ParseMode::Html => "HTML",
        }
    }
}

/// A reply for the adapter to deliver. Ordering within one handler
/// invocation is preserved by the broadcast channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub chat_id: i64,
    pub kind: OutboundKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OutboundKind {
    #[serde(rename = "text")]
    Text {
        text: String,
        parse_mode: Option<ParseMode>,
        reply_to: Option<i64>,
    },
    #[serde(rename = "photo")]
    Photo {
        path: PathBuf,
        caption: Option<String>,
    },
}

pub const EVENT_BUS_CAPACITY: usize = 256;
pub const OUTBOUND_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct EventBus {
    inbound: broadcast::Sender<Envelope>,
    outbound: broadcast::Sender<OutboundMessage>,
}

impl EventBus {
    pub fn new() -> Self {
        let (inbound_tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        let (outbound_tx, _) = broadcast::channel(OUTBOUND_CAPACITY);

        Self {
            inbound: inbound_tx,
            outbound: outbound_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.inbound.subscribe()
    }

    pub fn publish(&self, envelope: Envelope) -> anyhow::Result<()> {
        self.inbound.send(envelope)?;
        Ok(())
    }

    pub fn outbound_sender(&self) -> broadcast::Sender<OutboundMessage> {
        self.outbound.clone()
    }

    pub fn outbound_subscribe(&self) -> broadcast::Receiver<OutboundMessage> {
        self.outbound.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_message() -> InboundMessage {
        InboundMessage {
            chat_id: -100123,
            message_id: 42,
            epoch_seconds: 1700000000,
            from: Sender {
                user_id: 7,
                username: Some("alice".to_string()),
                first_name: Some("Alice".to_string()),
                last_name: None,
            },
            text: Some("hello".to_string()),
            media: None,
            reply_to: None,
        }
    }

    #[test]
    fn envelope_has_trace_id_and_schema_version() {
        let env = Envelope::new(sample_message());
        assert_eq!(env.schema_version, 1);
        assert!(env.trace_id.starts_with("trace-"));
    }

    #[test]
    fn trace_id_different_for_each_envelope() {
        let env1 = Envelope::new(sample_message());
        let env2 = Envelope::new(sample_message());
        assert_ne!(env1.trace_id, env2.trace_id);
    }

    #[test]
    fn serialize_roundtrip() {
        let env = Envelope::new(sample_message());
        let json = env.to_json().expect("serialize");
        let parsed = Envelope::from_json(&json).expect("deserialize");
        assert_eq!(parsed.trace_id, env.trace_id);
        assert_eq!(parsed.message.chat_id, -100123);
        assert_eq!(parsed.message.from.user_id, 7);
    }

    #[test]
    fn full_name_joins_present_parts() {
        let mut sender = sample_message().from;
        assert_eq!(sender.full_name(), "Alice");
        sender.last_name = Some("Liddell".to_string());
        assert_eq!(sender.full_name(), "Alice Liddell");
        sender.first_name = None;
        assert_eq!(sender.full_name(), "Liddell");
    }
}
