use crate::handler::{render_help, Handler, HandlerEnv, HandlerRegistry};
use crate::handlers::base_command;
use anyhow::Result;
use chatlens_ipc::InboundMessage;
use chatlens_locale::Locale;
use std::sync::{Arc, OnceLock};

/// Needs the finished registry to show other commands' help, but is itself
/// a registry member; the registry is attached after construction.
pub struct HelpHandler {
    env: Arc<HandlerEnv>,
    registry: OnceLock<Arc<HandlerRegistry>>,
}

impl HelpHandler {
    pub fn new(env: Arc<HandlerEnv>) -> Arc<Self> {
        Arc::new(Self {
            env,
            registry: OnceLock::new(),
        })
    }

    pub fn attach_registry(&self, registry: Arc<HandlerRegistry>) {
        let _ = self.registry.set(registry);
    }
}

#[async_trait::async_trait]
impl Handler for HelpHandler {
    fn name(&self) -> &'static str {
        "help"
    }

    fn help(&self) -> String {
        let mut description =
            String::from("Shows help information for all commands.\nCommand list:");
        if let Some(registry) = self.registry.get() {
            for name in registry.command_names() {
                description.push_str("\n  ");
                description.push_str(&name);
            }
        }
        let command = base_command("help [command name]", "").about(description);
        render_help(&command)
    }

    async fn handle(
        &self,
        receiver_chat_id: i64,
        _data_source_chat_id: i64,
        arguments: &[String],
        _message: &InboundMessage,
        _locale: Locale,
    ) -> Result<()> {
        let requested = arguments
            .first()
            .and_then(|name| self.registry.get()?.get(name));
        match requested {
            Some(handler) => self.env.send_help(receiver_chat_id, &handler.help()),
            None => self.env.send_help(receiver_chat_id, &self.help()),
        }
        Ok(())
    }
}
