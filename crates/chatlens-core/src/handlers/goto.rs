use crate::handler::{render_help, Handler, HandlerEnv};
use crate::handlers::base_command;
use anyhow::Result;
use chatlens_ipc::InboundMessage;
use chatlens_locale::Locale;
use clap::Arg;
use std::sync::Arc;

pub struct GotoHandler {
    env: Arc<HandlerEnv>,
    command: clap::Command,
}

impl GotoHandler {
    pub fn new(env: Arc<HandlerEnv>) -> Self {
        let command = base_command(
            "goto",
            "Outputs a message which replies to the message you want to go to. \
             By clicking the replied message, you can jump to it.",
        )
        .arg(
            Arg::new("message")
                .short('m')
                .long("message")
                .value_name("id")
                .required(true)
                .help("The id of the message you want to go to."),
        );
        Self { env, command }
    }

    fn parse_message_id(&self, arguments: &[String]) -> Option<i64> {
        let matches = self
            .command
            .clone()
            .try_get_matches_from(arguments)
            .ok()?;
        matches.get_one::<String>("message")?.parse().ok()
    }
}

#[async_trait::async_trait]
impl Handler for GotoHandler {
    fn name(&self) -> &'static str {
        "goto"
    }

    fn help(&self) -> String {
        render_help(&self.command)
    }

    async fn handle(
        &self,
        receiver_chat_id: i64,
        _data_source_chat_id: i64,
        arguments: &[String],
        _message: &InboundMessage,
        locale: Locale,
    ) -> Result<()> {
        let Some(message_id) = self.parse_message_id(arguments) else {
            self.env.send_text(
                receiver_chat_id,
                self.env.text(locale, "common.invalidCommand")?,
                None,
                None,
            );
            self.env.send_help(receiver_chat_id, &self.help());
            return Ok(());
        };

        let text = format!(
            "{} ID={}",
            self.env.text(locale, "goto.response")?,
            message_id
        );
        self.env
            .send_text(receiver_chat_id, text, None, Some(message_id));
        Ok(())
    }
}
