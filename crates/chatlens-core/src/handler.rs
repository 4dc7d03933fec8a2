//! Handler capability interface and registry.

use anyhow::{anyhow, Result};
use chatlens_ipc::{InboundMessage, OutboundKind, OutboundMessage, ParseMode};
use chatlens_locale::{Bundle, Locale};
use chatlens_storage::Storage;
use chrono::FixedOffset;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::warn;

pub const TIMEZONE_OPTION: &str = "timezone";

/// One command capability: a unique name, a help string, and a side-effect
/// only `handle`. `data_source_chat_id` is the sole source of truth for
/// whose data to read; `receiver_chat_id` only ever receives replies.
///
/// Returning `Err` means a collaborator failed mid-command; argument errors
/// are the handler's to report (localized, with its help text) and are not
/// errors at this boundary.
#[async_trait::async_trait]
pub trait Handler: Send + Sync {
    fn name(&self) -> &'static str;

    fn help(&self) -> String;

    async fn handle(
        &self,
        receiver_chat_id: i64,
        data_source_chat_id: i64,
        arguments: &[String],
        message: &InboundMessage,
        locale: Locale,
    ) -> Result<()>;
}

/// Shared collaborators handed to every handler at construction.
pub struct HandlerEnv {
    outbound: broadcast::Sender<OutboundMessage>,
    pub bundle: Bundle,
    pub db_path: PathBuf,
    pub default_locale: Locale,
    pub default_timezone: FixedOffset,
}

impl HandlerEnv {
    pub fn new(
        outbound: broadcast::Sender<OutboundMessage>,
        bundle: Bundle,
        db_path: PathBuf,
        default_locale: Locale,
        default_timezone: FixedOffset,
    ) -> Self {
        Self {
            outbound,
            bundle,
            db_path,
            default_locale,
            default_timezone,
        }
    }

    pub fn send_text(
        &self,
        chat_id: i64,
        text: String,
        parse_mode: Option<ParseMode>,
        reply_to: Option<i64>,
    ) {
        let message = OutboundMessage {
            chat_id,
            kind: OutboundKind::Text {
                text,
                parse_mode,
                reply_to,
            },
        };
        if let Err(e) = self.outbound.send(message) {
            warn!("Failed to queue outbound text: {}", e);
        }
    }

    pub fn send_photo(&self, chat_id: i64, path: PathBuf, caption: Option<String>) {
        let message = OutboundMessage {
            chat_id,
            kind: OutboundKind::Photo { path, caption },
        };
        if let Err(e) = self.outbound.send(message) {
            warn!("Failed to queue outbound photo: {}", e);
        }
    }

    /// Pre-formatted fixed-width help goes out as a Markdown code block.
    pub fn send_help(&self, chat_id: i64, help: &str) {
        self.send_text(
            chat_id,
            code_block(help),
            Some(ParseMode::Markdown),
            None,
        );
    }

    pub fn text(&self, locale: Locale, key: &str) -> Result<String> {
        Ok(self.bundle.get(locale, key)?.to_string())
    }

    pub fn format(&self, locale: Locale, key: &str, args: &[&str]) -> Result<String> {
        Ok(self.bundle.format(locale, key, args)?)
    }

    pub fn open_storage(&self) -> Result<Storage> {
        Storage::open(&self.db_path)
    }

    /// The chat's timezone option as a fixed offset, falling back to the
    /// configured default when absent or unparseable.
    pub fn chat_timezone(&self, storage: &Storage, chat_id: i64) -> FixedOffset {
        match storage.get_option(chat_id, TIMEZONE_OPTION) {
            Ok(Some(value)) => value.parse().unwrap_or(self.default_timezone),
            Ok(None) => self.default_timezone,
            Err(e) => {
                warn!("Failed to read timezone option for chat {}: {}", chat_id, e);
                self.default_timezone
            }
        }
    }
}

pub fn code_block(text: &str) -> String {
    format!("```\n{}\n```", text)
}

/// Renders a clap command definition as fixed-width help text.
pub fn render_help(command: &clap::Command) -> String {
    command.clone().render_help().to_string()
}

/// Command name to handler, built once at startup. Duplicate names abort
/// startup entirely rather than leaving a partially-registered map.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn Handler>) -> Result<()> {
        let name = handler.name().to_string();
        if self.handlers.insert(name.clone(), handler).is_some() {
            return Err(anyhow!(
                "failed to register handler, duplicated command name: {}",
                name
            ));
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(name).cloned()
    }

    pub fn command_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }
}
