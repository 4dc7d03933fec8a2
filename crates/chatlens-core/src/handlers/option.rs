use crate::handler::{render_help, Handler, HandlerEnv, TIMEZONE_OPTION};
use crate::handlers::base_command;
use anyhow::Result;
use chatlens_ipc::InboundMessage;
use chatlens_locale::Locale;
use chrono::FixedOffset;
use clap::Arg;
use std::sync::Arc;

const LANGUAGE_OPTION: &str = "language";
const RANK_REFRESH_OPTION: &str = "rank_refresh_hour";

pub struct OptionHandler {
    env: Arc<HandlerEnv>,
    command: clap::Command,
}

impl OptionHandler {
    pub fn new(env: Arc<HandlerEnv>) -> Self {
        let command = base_command("option", "Sets bot options for this chat.")
            .arg(
                Arg::new("language")
                    .short('L')
                    .long("language")
                    .value_name("code")
                    .help("Language. Valid args: en_US, zh_CN."),
            )
            .arg(
                Arg::new("timezone")
                    .short('T')
                    .long("timezone")
                    .value_name("offset")
                    .help("Timezone as a fixed UTC offset, e.g. +08:00."),
            )
            .arg(
                Arg::new("rank_refresh")
                    .short('R')
                    .long("rank_refresh")
                    .value_name("hour")
                    .help("The hour of day when daily ranks reset. Expects an integer from 0 to 23."),
            );
        Self { env, command }
    }

    /// Validated (name, value) pairs to persist, or None on any invalid or
    /// missing input.
    fn parse_updates(&self, arguments: &[String]) -> Option<Vec<(&'static str, String)>> {
        let matches = self
            .command
            .clone()
            .try_get_matches_from(arguments)
            .ok()?;

        let mut updates = Vec::new();
        if let Some(value) = matches.get_one::<String>("language") {
            value.parse::<Locale>().ok()?;
            updates.push((LANGUAGE_OPTION, value.clone()));
        }
        if let Some(value) = matches.get_one::<String>("timezone") {
            value.parse::<FixedOffset>().ok()?;
            updates.push((TIMEZONE_OPTION, value.clone()));
        }
        if let Some(value) = matches.get_one::<String>("rank_refresh") {
            let hour: i64 = value.parse().ok()?;
            if !(0..=23).contains(&hour) {
                return None;
            }
            updates.push((RANK_REFRESH_OPTION, value.clone()));
        }

        if updates.is_empty() {
            return None;
        }
        Some(updates)
    }
}

#[async_trait::async_trait]
impl Handler for OptionHandler {
    fn name(&self) -> &'static str {
        "option"
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
        let Some(updates) = self.parse_updates(arguments) else {
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
        for (name, value) in &updates {
            storage.set_option(data_source_chat_id, name, value)?;
        }

        let summary = updates
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect::<Vec<_>>()
            .join(", ");
        let text = format!(
            "{}: [{}]",
            self.env.text(locale, "option.success")?,
            summary
        );
        self.env.send_text(receiver_chat_id, text, None, None);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatlens_ipc::EventBus;
    use chatlens_locale::Bundle;

    fn handler() -> OptionHandler {
        let bus = EventBus::new();
        let env = Arc::new(HandlerEnv::new(
            bus.outbound_sender(),
            Bundle::load().unwrap(),
            std::env::temp_dir().join("chatlens-option-test.db"),
            Locale::EnUs,
            FixedOffset::east_opt(0).unwrap(),
        ));
        OptionHandler::new(env)
    }

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn valid_options_collect_updates() {
        let h = handler();
        let updates = h
            .parse_updates(&args(&["-L", "zh_CN", "-T", "+08:00", "-R", "4"]))
            .unwrap();
        assert_eq!(
            updates,
            vec![
                ("language", "zh_CN".to_string()),
                ("timezone", "+08:00".to_string()),
                ("rank_refresh_hour", "4".to_string()),
            ]
        );
    }

    #[test]
    fn unknown_language_is_rejected() {
        let h = handler();
        assert!(h.parse_updates(&args(&["-L", "fr_FR"])).is_none());
    }

    #[test]
    fn out_of_range_refresh_hour_is_rejected() {
        let h = handler();
        assert!(h.parse_updates(&args(&["-R", "24"])).is_none());
        assert!(h.parse_updates(&args(&["-R", "-1"])).is_none());
    }

    #[test]
    fn no_options_is_invalid() {
        let h = handler();
        assert!(h.parse_updates(&[]).is_none());
    }
}
