use crate::codec::CommandCodec;
use crate::handler::{render_help, Handler, HandlerEnv};
use crate::handlers::{base_command, format_epoch, DATE_FORMAT};
use anyhow::Result;
use chatlens_ipc::InboundMessage;
use chatlens_locale::Locale;
use chatlens_storage::{MessageRecord, MessageType, UserRecord};
use chrono::FixedOffset;
use clap::{Arg, ArgAction};
use std::collections::HashMap;
use std::sync::Arc;

const MAX_ENTRIES: usize = 100;
const DEFAULT_ENTRIES: usize = 10;
const MAX_SNIPPET_CHARS: usize = 80;
const VALID_TYPES: [MessageType; 3] = [
    MessageType::ChatTitle,
    MessageType::Command,
    MessageType::PinnedMessage,
];

pub struct HistoryHandler {
    env: Arc<HandlerEnv>,
    codec: CommandCodec,
    command: clap::Command,
}

struct HistoryArgs {
    message_type: MessageType,
    entries: usize,
    show_user: bool,
}

impl HistoryHandler {
    pub fn new(env: Arc<HandlerEnv>) -> Self {
        let command = base_command(
            "history",
            "Outputs the history of chat titles, commands, or pinned messages.",
        )
        .arg(
            Arg::new("type")
                .short('t')
                .long("type")
                .value_name("messagetype")
                .help("The type of messages. Valid args: chat_title, command, pinned_message."),
        )
        .arg(
            Arg::new("number")
                .short('n')
                .long("number")
                .value_name("count")
                .help("The number of latest results you want to show. Range: (0, 100]."),
        )
        .arg(
            Arg::new("user")
                .short('u')
                .long("user")
                .action(ArgAction::SetTrue)
                .help("Set this option if you want to show the sender of each message."),
        );
        Self {
            env,
            codec: CommandCodec::new(),
            command,
        }
    }

    fn parse_args(&self, arguments: &[String]) -> Option<HistoryArgs> {
        let matches = self
            .command
            .clone()
            .try_get_matches_from(arguments)
            .ok()?;

        let message_type = match matches.get_one::<String>("type") {
            Some(value) => {
                let parsed: MessageType = value.parse().ok()?;
                if !VALID_TYPES.contains(&parsed) {
                    return None;
                }
                parsed
            }
            None => MessageType::ChatTitle,
        };
        let entries = match matches.get_one::<String>("number") {
            Some(value) => {
                let parsed: usize = value.parse().ok()?;
                if parsed == 0 || parsed > MAX_ENTRIES {
                    return None;
                }
                parsed
            }
            None => DEFAULT_ENTRIES,
        };
        Some(HistoryArgs {
            message_type,
            entries,
            show_user: matches.get_flag("user"),
        })
    }

    fn title_key(message_type: MessageType) -> &'static str {
        match message_type {
            MessageType::Command => "history.title.command",
            MessageType::PinnedMessage => "history.title.pinnedMessage",
            _ => "history.title.chatTitle",
        }
    }

    fn item_text(
        &self,
        record: &MessageRecord,
        args: &HistoryArgs,
        users: &HashMap<i64, UserRecord>,
        tz: &FixedOffset,
        locale: Locale,
    ) -> Result<String> {
        let mut user_id = record.user_id;
        let mut item = String::new();
        match args.message_type {
            MessageType::Command | MessageType::ChatTitle => item.push_str(&record.content),
            MessageType::PinnedMessage => {
                // The pinned message's author sits in the reply column; 0
                // means the pin came from an unrecorded source.
                user_id = record.reply_to_user_id;
                if user_id == 0 {
                    return Ok(String::new());
                }
                item.push_str("------\n");
                item.push_str(&format_epoch(record.epoch_seconds, tz, DATE_FORMAT));
                if record.reply_to_message_id > 0 {
                    item.push_str("    ");
                    item.push_str(&self.codec.clickable_goto_command(record.reply_to_message_id));
                }
                item.push('\n');
                if record.content.is_empty() {
                    item.push_str(&self.env.text(locale, "history.text.nonTextMessage")?);
                } else {
                    item.push_str(&snippet(&record.content));
                }
            }
            _ => return Ok(String::new()),
        }
        if args.show_user {
            // Missing users are usually bots, which never get recorded.
            let name = users
                .get(&user_id)
                .map(|u| u.full_name())
                .unwrap_or_else(|| "bot".to_string());
            item.push_str(&format!("\n    \u{2014}\u{2014}{}", name));
        }
        item.push('\n');
        Ok(item)
    }
}

fn snippet(text: &str) -> String {
    if text.chars().count() <= MAX_SNIPPET_CHARS {
        return text.to_string();
    }
    let truncated: String = text.chars().take(MAX_SNIPPET_CHARS - 3).collect();
    format!("{}...", truncated)
}

#[async_trait::async_trait]
impl Handler for HistoryHandler {
    fn name(&self) -> &'static str {
        "history"
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
        // Latest entries, presented oldest first.
        let records = storage.messages_by_time(
            data_source_chat_id,
            &[args.message_type],
            args.entries,
            false,
            true,
        )?;
        let users = storage.get_users()?;
        let tz = self.env.chat_timezone(&storage, data_source_chat_id);

        if records.is_empty() {
            let text = format!(
                "{}: {}",
                self.env.text(locale, "common.noMessageWithType")?,
                args.message_type.as_str()
            );
            self.env.send_text(receiver_chat_id, text, None, None);
            return Ok(());
        }

        let mut text = format!(
            "{}\n{}\n\n",
            self.env.text(locale, Self::title_key(args.message_type))?,
            self.env.format(
                locale,
                "common.numLatestMessages",
                &[&records.len().to_string()]
            )?
        );
        for record in &records {
            text.push_str(&self.item_text(record, &args, &users, &tz, locale)?);
        }
        self.env.send_text(receiver_chat_id, text, None, None);
        Ok(())
    }
}
