use crate::handler::{render_help, Handler, HandlerEnv};
use crate::handlers::base_command;
use anyhow::Result;
use chatlens_ipc::InboundMessage;
use chatlens_locale::Locale;
use std::sync::Arc;

pub struct EchoHandler {
    env: Arc<HandlerEnv>,
    command: clap::Command,
}

impl EchoHandler {
    pub fn new(env: Arc<HandlerEnv>) -> Self {
        Self {
            env,
            command: base_command("echo [text]", "Outputs the strings being passed as arguments."),
        }
    }
}

#[async_trait::async_trait]
impl Handler for EchoHandler {
    fn name(&self) -> &'static str {
        "echo"
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
        _locale: Locale,
    ) -> Result<()> {
        if arguments.is_empty() {
            self.env.send_help(receiver_chat_id, &self.help());
        } else {
            self.env
                .send_text(receiver_chat_id, arguments.join(" "), None, None);
        }
        Ok(())
    }
}
