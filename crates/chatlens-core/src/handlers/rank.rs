use crate::handler::{render_help, Handler, HandlerEnv};
use crate::handlers::{base_command, format_epoch, DATE_FORMAT};
use anyhow::Result;
use chatlens_ipc::InboundMessage;
use chatlens_locale::Locale;
use chatlens_storage::MessageType;
use chrono::{FixedOffset, LocalResult, TimeZone, Timelike, Utc};
use clap::{Arg, ArgAction};
use std::sync::Arc;
use tracing::warn;

const RANK_REFRESH_OPTION: &str = "rank_refresh_hour";
const DEFAULT_REFRESH_HOUR: u32 = 0;
const MEDAL_EMOJI: [&str; 3] = ["\u{1F947}", "\u{1F948}", "\u{1F949}"];

pub struct RankHandler {
    env: Arc<HandlerEnv>,
    command: clap::Command,
}

struct RankArgs {
    daily: bool,
    message_type: MessageType,
}

impl RankHandler {
    pub fn new(env: Arc<HandlerEnv>) -> Self {
        let command = base_command(
            "rank",
            "Computes a rank based on the number of messages of the given type. \
             By default it outputs a daily rank for text messages.",
        )
        .arg(
            Arg::new("all")
                .short('a')
                .long("all")
                .action(ArgAction::SetTrue)
                .help("Set this option if you want to get rank based on all past messages."),
        )
        .arg(
            Arg::new("type")
                .short('t')
                .long("type")
                .value_name("messagetype")
                .help("The type of messages, e.g. text, sticker, image, voice."),
        );
        Self { env, command }
    }

    fn parse_args(&self, arguments: &[String]) -> Option<RankArgs> {
        let matches = self
            .command
            .clone()
            .try_get_matches_from(arguments)
            .ok()?;
        let daily = !matches.get_flag("all");
        let message_type = match matches.get_one::<String>("type") {
            Some(value) => {
                let parsed: MessageType = value.parse().ok()?;
                if parsed == MessageType::Unknown {
                    return None;
                }
                parsed
            }
            None => MessageType::Text,
        };
        Some(RankArgs {
            daily,
            message_type,
        })
    }

    fn title_key(message_type: MessageType) -> Option<&'static str> {
        match message_type {
            MessageType::Text => Some("rank.title.text"),
            MessageType::Sticker => Some("rank.title.sticker"),
            MessageType::Gif => Some("rank.title.gif"),
            MessageType::Image => Some("rank.title.image"),
            MessageType::Video => Some("rank.title.video"),
            MessageType::Audio => Some("rank.title.audio"),
            MessageType::Voice => Some("rank.title.voice"),
            MessageType::Command => Some("rank.title.command"),
            MessageType::ChatTitle => Some("rank.title.chatTitle"),
            MessageType::ChatPhoto => Some("rank.title.chatPhoto"),
            _ => None,
        }
    }
}

/// Start of the current rank day: the most recent occurrence of the
/// refresh hour in the chat's timezone.
fn daily_window_start(refresh_hour: u32, tz: FixedOffset) -> i64 {
    let now = Utc::now().with_timezone(&tz);
    let mut day = now.date_naive();
    if now.hour() < refresh_hour {
        day = day.pred_opt().unwrap_or(day);
    }
    let local = day
        .and_hms_opt(refresh_hour, 0, 0)
        .unwrap_or_else(|| day.and_hms_opt(0, 0, 0).expect("midnight exists"));
    match tz.from_local_datetime(&local) {
        LocalResult::Single(dt) => dt.timestamp(),
        _ => now.timestamp(),
    }
}

#[async_trait::async_trait]
impl Handler for RankHandler {
    fn name(&self) -> &'static str {
        "rank"
    }

    fn help(&self) -> String {
        render_help(&self.command)
    }

    async fn handle(
        &self,
        receiver_chat_id: i64,
        data_source_chat_id: i64,
        arguments: &[String],
        _message: &InboundMessage,
        locale: Locale,
    ) -> Result<()> {
        let Some(args) = self.parse_args(arguments) else {
            self.env.send_text(
                receiver_chat_id,
                self.env.text(locale, "common.invalidCommand")?,
                None,
                None,
            );
            self.env.send_help(receiver_chat_id, &self.help());
            return Ok(());
        };

        let storage = self.env.open_storage()?;
        let tz = self.env.chat_timezone(&storage, data_source_chat_id);
        let refresh_hour = match storage.get_option(data_source_chat_id, RANK_REFRESH_OPTION) {
            Ok(Some(value)) => value.parse().unwrap_or(DEFAULT_REFRESH_HOUR),
            Ok(None) => DEFAULT_REFRESH_HOUR,
            Err(e) => {
                warn!("Failed to read rank refresh option: {}", e);
                DEFAULT_REFRESH_HOUR
            }
        };

        let mut start_epoch_seconds = 0;
        let mut end_epoch_seconds = i64::MAX;
        if args.daily {
            start_epoch_seconds = daily_window_start(refresh_hour, tz);
            end_epoch_seconds = start_epoch_seconds + 24 * 3600;
        }
        let rank = storage.rank(
            data_source_chat_id,
            start_epoch_seconds,
            end_epoch_seconds,
            args.message_type,
        )?;
        if !args.daily && !rank.is_empty() {
            let oldest = storage.messages_by_time(
                data_source_chat_id,
                &[args.message_type],
                1,
                true,
                true,
            )?;
            if let Some(first) = oldest.first() {
                start_epoch_seconds = first.epoch_seconds;
            }
        }

        let mut text = String::new();
        if let Some(key) = Self::title_key(args.message_type) {
            text.push_str(&format!("\u{1F3C6} {}\n\n", self.env.text(locale, key)?));
        }
        let start_str = format_epoch(start_epoch_seconds, &tz, DATE_FORMAT);
        if args.daily {
            let end_str = format_epoch(end_epoch_seconds, &tz, DATE_FORMAT);
            text.push_str(&format!("{}\n", self.env.text(locale, "rank.text.daily")?));
            text.push_str(&format!(
                "{}: {}\n",
                self.env.text(locale, "rank.text.from")?,
                start_str
            ));
            text.push_str(&format!(
                "{}: {}\n\n",
                self.env.text(locale, "rank.text.to")?,
                end_str
            ));
        } else {
            text.push_str(&format!("{}\n", self.env.text(locale, "rank.text.total")?));
            text.push_str(&format!(
                "{}: {}\n\n",
                self.env.text(locale, "rank.text.from")?,
                start_str
            ));
        }

        for (i, (user, count)) in rank.iter().enumerate() {
            if i < MEDAL_EMOJI.len() {
                text.push_str(&format!("{}  ", MEDAL_EMOJI[i]));
            } else {
                text.push_str(&format!(" {}.  ", i + 1));
            }
            text.push_str(&format!("{}: {}\n", user.full_name(), count));
        }
        if rank.is_empty() {
            text.push_str(&format!(
                "{}: {}",
                self.env.text(locale, "rank.text.emptyResult")?,
                args.message_type.as_str()
            ));
        }

        self.env.send_text(receiver_chat_id, text, None, None);
        Ok(())
    }
}
