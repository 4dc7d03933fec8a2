use crate::handler::{code_block, render_help, Handler, HandlerEnv};
use crate::handlers::{base_command, now_epoch_seconds};
use anyhow::Result;
use chatlens_ipc::{InboundMessage, ParseMode};
use chatlens_locale::Locale;
use clap::Arg;
use std::sync::Arc;

const MAX_TIME_RANGE_DAYS: i64 = 90;
const DEFAULT_TIME_RANGE_DAYS: i64 = 7;
const MAX_BAR_WIDTH: usize = 30;

pub struct TimestatsHandler {
    env: Arc<HandlerEnv>,
    command: clap::Command,
}

impl TimestatsHandler {
    pub fn new(env: Arc<HandlerEnv>) -> Self {
        let command = base_command(
            "timestats",
            "Shows how the chat's messages distribute over the hours of the day.",
        )
        .arg(
            Arg::new("day")
                .short('d')
                .long("day")
                .value_name("days")
                .help("Compute over the messages of the last n days. Range: (0, 90]. Default: 7."),
        );
        Self { env, command }
    }

    fn parse_days(&self, arguments: &[String]) -> Option<i64> {
        let matches = self
            .command
            .clone()
            .try_get_matches_from(arguments)
            .ok()?;
        match matches.get_one::<String>("day") {
            Some(value) => {
                let days: i64 = value.parse().ok()?;
                if days <= 0 || days > MAX_TIME_RANGE_DAYS {
                    return None;
                }
                Some(days)
            }
            None => Some(DEFAULT_TIME_RANGE_DAYS),
        }
    }
}

/// Message count per hour of day, with timestamps shifted by the chat's
/// UTC offset first.
fn hour_histogram(epochs: &[i64], utc_offset_seconds: i64) -> [i64; 24] {
    let mut counts = [0i64; 24];
    for epoch in epochs {
        let hour = ((epoch + utc_offset_seconds).div_euclid(3600)).rem_euclid(24);
        counts[hour as usize] += 1;
    }
    counts
}

fn bar_chart(counts: &[i64; 24]) -> String {
    let max = counts.iter().copied().max().unwrap_or(0).max(1);
    let mut chart = String::new();
    for (hour, count) in counts.iter().enumerate() {
        let width = ((count * MAX_BAR_WIDTH as i64) + max - 1) / max;
        let bar = "\u{2588}".repeat(width.max(0) as usize);
        chart.push_str(&format!("{:02} |{} {}\n", hour, bar, count));
    }
    chart
}

#[async_trait::async_trait]
impl Handler for TimestatsHandler {
    fn name(&self) -> &'static str {
        "timestats"
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
        let Some(days) = self.parse_days(arguments) else {
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
        let start_epoch_seconds = now_epoch_seconds() - days * 24 * 3600;
        let epochs =
            storage.message_epochs(data_source_chat_id, start_epoch_seconds, i64::MAX)?;
        if epochs.is_empty() {
            self.env.send_text(
                receiver_chat_id,
                self.env.text(locale, "timestats.empty")?,
                None,
                None,
            );
            return Ok(());
        }
        let tz = self.env.chat_timezone(&storage, data_source_chat_id);

        let counts = hour_histogram(&epochs, tz.local_minus_utc() as i64);
        let title = self
            .env
            .format(locale, "timestats.title", &[&days.to_string()])?;
        let text = format!("{}\n{}", title, code_block(&bar_chart(&counts)));
        self.env
            .send_text(receiver_chat_id, text, Some(ParseMode::Markdown), None);
        Ok(())
    }
}
