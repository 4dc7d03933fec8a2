//! Chatlens Telegram Adapter
//!
//! Telegram Bot API long-polling with offset persistence, client recreation,
//! chat whitelisting, and message chunking

use anyhow::{anyhow, Result};
use chatlens_config::Config;
use chatlens_ipc::{
    Envelope, EventBus, InboundMessage, MediaKind, OutboundKind, OutboundMessage, ParseMode,
    ReplyRef, Sender,
};
use chatlens_locale::{Bundle, Locale};
use reqwest::{Client, ClientBuilder};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::fs;
use tokio::sync::broadcast;
use tracing::{info, warn};

const TELEGRAM_MAX_MESSAGE_LEN: usize = 4096;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramUpdate {
    pub update_id: i64,
    pub message: Option<TelegramMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramMessage {
    pub message_id: i64,
    pub date: i64,
    pub text: Option<String>,
    pub caption: Option<String>,
    #[serde(default)]
    pub sticker: Option<TelegramFile>,
    #[serde(default)]
    pub animation: Option<TelegramFile>,
    #[serde(default)]
    pub photo: Option<Vec<TelegramPhotoSize>>,
    #[serde(default)]
    pub video: Option<TelegramFile>,
    #[serde(default)]
    pub audio: Option<TelegramFile>,
    #[serde(default)]
    pub voice: Option<TelegramFile>,
    #[serde(default)]
    pub new_chat_title: Option<String>,
    #[serde(default)]
    pub new_chat_photo: Option<Vec<TelegramPhotoSize>>,
    #[serde(default)]
    pub pinned_message: Option<Box<TelegramMessage>>,
    pub chat: TelegramChat,
    pub from: Option<TelegramUser>,
    #[serde(default)]
    pub reply_to_message: Option<Box<TelegramReplyToMessage>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramFile {
    pub file_id: String,
    #[serde(default)]
    pub file_size: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramPhotoSize {
    pub file_id: String,
    pub width: i64,
    pub height: i64,
    #[serde(default)]
    pub file_size: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
    #[serde(rename = "type")]
    pub chat_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    #[serde(default)]
    pub is_bot: Option<bool>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramReplyToMessage {
    pub message_id: i64,
    pub from: Option<TelegramUser>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: T,
}

#[derive(Debug)]
enum GateDecision {
    Accept(InboundMessage),
    Reject(String),
    Ignore,
}

pub struct TelegramAdapter {
    client: Client,
    bot_token: String,
    api_url: String,
    chat_whitelist: HashSet<i64>,
    data_dir: PathBuf,
    poll_timeout_secs: u64,
    client_recreate_interval_secs: u64,
    bundle: Bundle,
    default_locale: Locale,
    event_bus: Option<EventBus>,
}

impl TelegramAdapter {
    pub fn new(config: &Config, bundle: Bundle) -> Self {
        let api_url = format!("https://api.telegram.org/bot{}", config.bot.bot_token);
        let client = Self::build_client();
        let poll_timeout_secs = config.telegram.poll_timeout_secs.unwrap_or(60);
        let client_recreate_interval_secs =
            config.telegram.client_recreate_interval_secs.unwrap_or(600);

        Self {
            client,
            bot_token: config.bot.bot_token.clone(),
            api_url,
            chat_whitelist: config.chat_whitelist(),
            data_dir: config.data_dir(),
            poll_timeout_secs,
            client_recreate_interval_secs,
            bundle,
            default_locale: config.default_locale(),
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    fn build_client() -> Client {
        ClientBuilder::new()
            .pool_idle_timeout(Duration::from_secs(600))
            .pool_max_idle_per_host(10)
            .tcp_keepalive(Some(Duration::from_secs(30)))
            .timeout(Duration::from_secs(180))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build HTTP client")
    }

    fn offset_path(&self) -> PathBuf {
        let runtime_dir = self.data_dir.join("runtime");
        let _ = std::fs::create_dir_all(&runtime_dir);
        let bot_id = self.bot_token.split(':').next().unwrap_or("default");
        runtime_dir.join(format!("telegram.{}.offset", bot_id))
    }

    fn is_chat_allowed(&self, chat_id: i64) -> bool {
        self.chat_whitelist.contains(&chat_id)
    }

    async fn read_offset(&self) -> Option<i64> {
        let p = self.offset_path();
        match fs::read_to_string(&p).await {
            Ok(content) => content.trim().parse().ok(),
            Err(_) => None,
        }
    }

    async fn write_offset(&self, offset: i64) {
        let p = self.offset_path();
        if let Some(parent) = p.parent() {
            let _ = fs::create_dir_all(parent).await;
        }
        let _ = fs::write(&p, format!("{}\n", offset)).await;
    }

    pub async fn get_updates(
        &self,
        client: &Client,
        offset: Option<i64>,
    ) -> Result<Vec<TelegramUpdate>> {
        let url = format!("{}/getUpdates", self.api_url);

        let mut payload = serde_json::json!({
            "timeout": self.poll_timeout_secs,
            "allowed_updates": ["message"],
        });

        if let Some(offset) = offset {
            payload["offset"] = serde_json::json!(offset);
        }

        let resp = client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| anyhow!("telegram getUpdates request failed: {}", e))?
            .error_for_status()
            .map_err(|e| anyhow!("telegram getUpdates HTTP error: {}", e))?;

        let parsed: ApiResponse<Vec<TelegramUpdate>> = resp
            .json()
            .await
            .map_err(|e| anyhow!("telegram getUpdates decode failed: {}", e))?;

        if !parsed.ok {
            return Err(anyhow!("telegram getUpdates returned ok=false"));
        }

        Ok(parsed.result)
    }

    /// Sends a text reply, splitting into fixed-size chunks of at most 4096
    /// characters. Chunks are delivered in order and concatenate back to the
    /// original text; only the first chunk replies to `reply_to`.
    pub async fn send_text(
        &self,
        chat_id: i64,
        text: &str,
        parse_mode: Option<ParseMode>,
        reply_to: Option<i64>,
    ) -> Result<()> {
        let chunks = chunk_text(text);

        for (i, chunk) in chunks.iter().enumerate() {
            let url = format!("{}/sendMessage", self.api_url);

            let mut payload = serde_json::json!({
                "chat_id": chat_id,
                "text": chunk,
            });

            if let Some(mode) = parse_mode {
                payload["parse_mode"] = serde_json::json!(mode.as_str());
            }

            if i == 0 {
                if let Some(reply_to_message_id) = reply_to {
                    payload["reply_to_message_id"] = serde_json::json!(reply_to_message_id);
                }
            }

            self.send_with_parse_mode_fallback(&url, payload).await?;
        }

        Ok(())
    }

    /// Uploads a local image with sendPhoto. The file stays in place; the
    /// caller decides when to delete it.
    pub async fn send_photo(&self, chat_id: i64, path: &Path, caption: Option<&str>) -> Result<()> {
        let url = format!("{}/sendPhoto", self.api_url);

        let bytes = fs::read(path)
            .await
            .map_err(|e| anyhow!("failed to read photo {}: {}", path.display(), e))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image.png".to_string());

        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("image/png")
            .map_err(|e| anyhow!("invalid photo mime type: {}", e))?;
        let mut form = reqwest::multipart::Form::new()
            .text("chat_id", chat_id.to_string())
            .part("photo", part);
        if let Some(caption) = caption {
            form = form.text("caption", caption.to_string());
        }

        let resp = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| anyhow!("telegram sendPhoto request failed: {}", e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("telegram sendPhoto HTTP {}: {}", status, body));
        }

        let parsed: ApiResponse<serde_json::Value> = resp
            .json()
            .await
            .map_err(|e| anyhow!("telegram sendPhoto decode failed: {}", e))?;
        if !parsed.ok {
            return Err(anyhow!("telegram sendPhoto returned ok=false"));
        }

        Ok(())
    }

    async fn send_with_parse_mode_fallback(
        &self,
        url: &str,
        payload: serde_json::Value,
    ) -> Result<()> {
        let endpoint = url.rsplit('/').next().unwrap_or("telegram");
        let has_parse_mode = payload.get("parse_mode").is_some();

        let first_resp = self
            .client
            .post(url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| anyhow!("telegram {} request failed: {}", endpoint, e))?;

        if first_resp.status().is_success() {
            let parsed: ApiResponse<serde_json::Value> = first_resp
                .json()
                .await
                .map_err(|e| anyhow!("telegram {} decode failed: {}", endpoint, e))?;
            if parsed.ok {
                return Ok(());
            }
            if !has_parse_mode {
                return Err(anyhow!("telegram {} returned ok=false", endpoint));
            }
            warn!(
                "telegram {} returned ok=false with formatted payload, retrying without parse_mode",
                endpoint
            );
        } else {
            let status = first_resp.status();
            let body = first_resp.text().await.unwrap_or_default();
            if !has_parse_mode {
                return Err(anyhow!("telegram {} HTTP {}: {}", endpoint, status, body));
            }
            warn!(
                "telegram {} HTTP {} with formatted payload, retrying without parse_mode: {}",
                endpoint, status, body
            );
        }

        let mut fallback_payload = payload;
        if let Some(obj) = fallback_payload.as_object_mut() {
            obj.remove("parse_mode");
        }

        let fallback_resp = self
            .client
            .post(url)
            .json(&fallback_payload)
            .send()
            .await
            .map_err(|e| anyhow!("telegram {} fallback request failed: {}", endpoint, e))?;

        if !fallback_resp.status().is_success() {
            let status = fallback_resp.status();
            let body = fallback_resp.text().await.unwrap_or_default();
            return Err(anyhow!(
                "telegram {} fallback HTTP {}: {}",
                endpoint,
                status,
                body
            ));
        }

        let parsed: ApiResponse<serde_json::Value> = fallback_resp
            .json()
            .await
            .map_err(|e| anyhow!("telegram {} fallback decode failed: {}", endpoint, e))?;
        if !parsed.ok {
            return Err(anyhow!("telegram {} fallback returned ok=false", endpoint));
        }

        Ok(())
    }

    pub async fn poll(&self) -> Result<()> {
        let mut offset: Option<i64> = self.read_offset().await;

        info!(offset = ?offset, "Telegram polling started");

        let mut client = self.client.clone();
        let mut client_recreate_at =
            Instant::now() + Duration::from_secs(self.client_recreate_interval_secs);

        loop {
            if Instant::now() >= client_recreate_at {
                info!("Recreating HTTP client to prevent stale connections");
                client = Self::build_client();
                client_recreate_at =
                    Instant::now() + Duration::from_secs(self.client_recreate_interval_secs);
            }

            let updates = match self.get_updates(&client, offset).await {
                Ok(v) => v,
                Err(err) => {
                    warn!("Telegram polling error: {}", err);
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    continue;
                }
            };

            for update in updates {
                offset = Some(update.update_id + 1);
                self.write_offset(update.update_id + 1).await;

                if let Some(message) = &update.message {
                    self.handle_message(message).await;
                }
            }
        }
    }

    /// The whitelist gate. Messages from unauthorized chats never become
    /// envelopes; they yield exactly one localized notice naming the chat
    /// id. Authorized messages with nothing worth recording are dropped.
    fn screen_message(&self, message: &TelegramMessage) -> GateDecision {
        let chat_id = message.chat.id;
        if !self.is_chat_allowed(chat_id) {
            let notice = self
                .bundle
                .format(
                    self.default_locale,
                    "unauthorized.notice",
                    &[&chat_id.to_string()],
                )
                .unwrap_or_else(|_| format!("This chat is not authorized: {}", chat_id));
            return GateDecision::Reject(notice);
        }
        match to_inbound_message(message) {
            Some(inbound) => GateDecision::Accept(inbound),
            None => GateDecision::Ignore,
        }
    }

    async fn handle_message(&self, message: &TelegramMessage) {
        match self.screen_message(message) {
            GateDecision::Reject(notice) => {
                info!(
                    "Rejecting message from unauthorized chat {}",
                    message.chat.id
                );
                if let Err(e) = self.send_text(message.chat.id, &notice, None, None).await {
                    warn!("Failed to send unauthorized notice: {}", e);
                }
            }
            GateDecision::Accept(inbound) => {
                if let Some(event_bus) = &self.event_bus {
                    if let Err(e) = event_bus.publish(Envelope::new(inbound)) {
                        warn!("Failed to publish message to event bus: {}", e);
                    }
                } else {
                    info!("No event bus configured, message not forwarded");
                }
            }
            GateDecision::Ignore => {}
        }
    }

    pub async fn run_outbound_handler(&self, mut receiver: broadcast::Receiver<OutboundMessage>) {
        info!("Telegram outbound handler started");

        loop {
            match receiver.recv().await {
                Ok(msg) => {
                    let send_result = match &msg.kind {
                        OutboundKind::Text {
                            text,
                            parse_mode,
                            reply_to,
                        } => {
                            self.send_text(msg.chat_id, text, *parse_mode, *reply_to)
                                .await
                        }
                        OutboundKind::Photo { path, caption } => {
                            let result = self
                                .send_photo(msg.chat_id, path, caption.as_deref())
                                .await;
                            let _ = fs::remove_file(path).await;
                            result
                        }
                    };

                    if let Err(e) = send_result {
                        warn!("Failed to send outbound message: {}", e);
                    }
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!("Telegram outbound handler stopped: channel closed");
                    break;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        "Telegram outbound handler lagged; skipped {} messages",
                        skipped
                    );
                }
            }
        }
    }
}

/// Converts a wire message into the bus representation. Returns `None` for
/// updates with no sender or nothing worth recording.
fn to_inbound_message(message: &TelegramMessage) -> Option<InboundMessage> {
    let from = message.from.as_ref()?;
    let media = media_kind(message);
    let text = message.text.clone().or_else(|| message.caption.clone());
    if text.is_none() && media.is_none() {
        return None;
    }

    let reply_to = message.reply_to_message.as_ref().map(|reply| ReplyRef {
        message_id: reply.message_id,
        user_id: reply.from.as_ref().map(|u| u.id).unwrap_or(0),
    });

    Some(InboundMessage {
        chat_id: message.chat.id,
        message_id: message.message_id,
        epoch_seconds: message.date,
        from: Sender {
            user_id: from.id,
            username: from.username.clone(),
            first_name: from.first_name.clone(),
            last_name: from.last_name.clone(),
        },
        text,
        media,
        reply_to,
    })
}

fn media_kind(message: &TelegramMessage) -> Option<MediaKind> {
    if let Some(sticker) = &message.sticker {
        return Some(MediaKind::Sticker {
            file_id: sticker.file_id.clone(),
        });
    }
    if let Some(animation) = &message.animation {
        return Some(MediaKind::Gif {
            file_id: animation.file_id.clone(),
        });
    }
    if let Some(sizes) = &message.photo {
        if let Some(best) = sizes
            .iter()
            .max_by_key(|item| item.width.saturating_mul(item.height))
        {
            return Some(MediaKind::Image {
                file_id: best.file_id.clone(),
            });
        }
    }
    if let Some(video) = &message.video {
        return Some(MediaKind::Video {
            file_id: video.file_id.clone(),
        });
    }
    if let Some(audio) = &message.audio {
        return Some(MediaKind::Audio {
            file_id: audio.file_id.clone(),
        });
    }
    if let Some(voice) = &message.voice {
        return Some(MediaKind::Voice {
            file_id: voice.file_id.clone(),
        });
    }
    if let Some(title) = &message.new_chat_title {
        return Some(MediaKind::ChatTitle {
            title: title.clone(),
        });
    }
    if let Some(sizes) = &message.new_chat_photo {
        if let Some(best) = sizes
            .iter()
            .max_by_key(|item| item.width.saturating_mul(item.height))
        {
            return Some(MediaKind::ChatPhoto {
                file_id: best.file_id.clone(),
            });
        }
    }
    if let Some(pinned) = &message.pinned_message {
        return Some(MediaKind::PinnedMessage {
            message_id: pinned.message_id,
            user_id: pinned.from.as_ref().map(|u| u.id).unwrap_or(0),
            text: pinned.text.clone(),
        });
    }
    None
}

/// Splits text into fixed-size chunks of at most [`TELEGRAM_MAX_MESSAGE_LEN`]
/// characters. The chunks concatenate back to the input unchanged.
fn chunk_text(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= TELEGRAM_MAX_MESSAGE_LEN {
        return vec![text.to_string()];
    }

    chars
        .chunks(TELEGRAM_MAX_MESSAGE_LEN)
        .map(|chunk| chunk.iter().collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire_message(text: Option<&str>) -> TelegramMessage {
        TelegramMessage {
            message_id: 42,
            date: 1700000000,
            text: text.map(|t| t.to_string()),
            caption: None,
            sticker: None,
            animation: None,
            photo: None,
            video: None,
            audio: None,
            voice: None,
            new_chat_title: None,
            new_chat_photo: None,
            pinned_message: None,
            chat: TelegramChat {
                id: -100123,
                chat_type: "supergroup".to_string(),
            },
            from: Some(TelegramUser {
                id: 7,
                is_bot: Some(false),
                username: Some("alice".to_string()),
                first_name: Some("Alice".to_string()),
                last_name: None,
            }),
            reply_to_message: None,
        }
    }

    #[test]
    fn chunk_text_short_message_is_single_chunk() {
        let chunks = chunk_text("hello");
        assert_eq!(chunks, vec!["hello".to_string()]);
    }

    #[test]
    fn chunk_text_count_is_ceiling_of_length_over_limit() {
        let text = "a".repeat(4096 * 2 + 1);
        let chunks = chunk_text(&text);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].chars().count(), 1);
    }

    #[test]
    fn chunk_text_concatenates_back_to_input() {
        let text = format!("{}{}", "\u{1F600}".repeat(5000), "fine");
        let chunks = chunk_text(&text);
        assert!(chunks.len() > 1);
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn chunk_text_respects_limit_by_characters() {
        let text = "abc\u{1F600}".repeat(1500);
        let chunks = chunk_text(&text);
        assert!(chunks.iter().all(|chunk| chunk.chars().count() <= 4096));
    }

    #[test]
    fn inbound_message_carries_text_and_sender() {
        let message = wire_message(Some("hello"));
        let inbound = to_inbound_message(&message).expect("inbound");
        assert_eq!(inbound.chat_id, -100123);
        assert_eq!(inbound.message_id, 42);
        assert_eq!(inbound.from.user_id, 7);
        assert_eq!(inbound.text.as_deref(), Some("hello"));
        assert!(inbound.media.is_none());
    }

    #[test]
    fn message_without_content_is_dropped() {
        let message = wire_message(None);
        assert!(to_inbound_message(&message).is_none());
    }

    #[test]
    fn pinned_message_maps_to_media_kind() {
        let mut message = wire_message(None);
        message.pinned_message = Some(Box::new(wire_message(Some("pinned text"))));
        let inbound = to_inbound_message(&message).expect("inbound");
        match inbound.media {
            Some(MediaKind::PinnedMessage {
                message_id,
                user_id,
                text,
            }) => {
                assert_eq!(message_id, 42);
                assert_eq!(user_id, 7);
                assert_eq!(text.as_deref(), Some("pinned text"));
            }
            other => panic!("unexpected media: {:?}", other),
        }
    }

    #[test]
    fn largest_photo_size_is_selected() {
        let mut message = wire_message(None);
        message.photo = Some(vec![
            TelegramPhotoSize {
                file_id: "small".to_string(),
                width: 90,
                height: 90,
                file_size: None,
            },
            TelegramPhotoSize {
                file_id: "large".to_string(),
                width: 800,
                height: 600,
                file_size: None,
            },
        ]);
        match media_kind(&message) {
            Some(MediaKind::Image { file_id }) => assert_eq!(file_id, "large"),
            other => panic!("unexpected media: {:?}", other),
        }
    }

    #[test]
    fn explicit_reply_is_preserved() {
        let mut message = wire_message(Some("re: hello"));
        message.reply_to_message = Some(Box::new(TelegramReplyToMessage {
            message_id: 17,
            from: Some(TelegramUser {
                id: 99,
                is_bot: Some(false),
                username: None,
                first_name: None,
                last_name: None,
            }),
        }));
        let inbound = to_inbound_message(&message).expect("inbound");
        let reply = inbound.reply_to.expect("reply");
        assert_eq!(reply.message_id, 17);
        assert_eq!(reply.user_id, 99);
    }

    fn adapter() -> TelegramAdapter {
        let config = Config::from_toml(&format!(
            r#"
            [bot]
            bot_name = "MyBot"
            bot_token = "123456:TESTTOKEN"
            chat_whitelist = [-100123]
            default_language = "en_US"
            temp_dir = "{tmp}"
            "#,
            tmp = std::env::temp_dir().display()
        ))
        .expect("config");
        TelegramAdapter::new(&config, Bundle::load().expect("bundles"))
    }

    #[test]
    fn whitelisted_chat_passes_the_gate() {
        let adapter = adapter();
        let message = wire_message(Some(">rank -a"));
        match adapter.screen_message(&message) {
            GateDecision::Accept(inbound) => {
                assert_eq!(inbound.chat_id, -100123);
                assert_eq!(inbound.text.as_deref(), Some(">rank -a"));
            }
            other => panic!("unexpected decision: {:?}", other),
        }
    }

    #[test]
    fn unauthorized_chat_yields_a_notice_and_no_envelope() {
        let adapter = adapter();
        let mut message = wire_message(Some(">rank -a"));
        message.chat.id = 555;
        match adapter.screen_message(&message) {
            GateDecision::Reject(notice) => assert!(notice.contains("555")),
            other => panic!("unexpected decision: {:?}", other),
        }
    }

    #[test]
    fn empty_update_from_a_whitelisted_chat_is_ignored() {
        let adapter = adapter();
        let message = wire_message(None);
        match adapter.screen_message(&message) {
            GateDecision::Ignore => {}
            other => panic!("unexpected decision: {:?}", other),
        }
    }
}
