use crate::codec::CommandCodec;
use crate::handler::{render_help, Handler, HandlerEnv};
use crate::handlers::{base_command, format_epoch, SHORT_DATE_FORMAT};
use anyhow::Result;
use chatlens_ipc::InboundMessage;
use chatlens_locale::Locale;
use chatlens_nlp::{NlpService, TextEntry};
use chatlens_storage::{MessageType, Storage};
use chrono::{Datelike, Utc};
use clap::Arg;
use std::sync::Arc;
use tracing::warn;

const MAX_MESSAGES: usize = 3000;
const DEFAULT_MESSAGES: usize = 500;

pub struct KeywordHandler {
    env: Arc<HandlerEnv>,
    codec: CommandCodec,
    nlp: Arc<dyn NlpService>,
    /// How many global word counts to load per request and to ask the
    /// service for when refreshing the monthly table.
    word_count_limit: usize,
    command: clap::Command,
}

impl KeywordHandler {
    pub fn new(env: Arc<HandlerEnv>, nlp: Arc<dyn NlpService>, word_count_limit: usize) -> Self {
        let command = base_command(
            "keyword",
            "Merges the latest messages into topics and extracts keywords for each.",
        )
        .arg(
            Arg::new("number")
                .short('n')
                .long("number")
                .value_name("count")
                .help("The number of latest messages to analyze. Range: (0, 3000]. Default: 500."),
        );
        Self {
            env,
            codec: CommandCodec::new(),
            nlp,
            word_count_limit,
            command,
        }
    }

    fn parse_count(&self, arguments: &[String]) -> Option<usize> {
        let matches = self
            .command
            .clone()
            .try_get_matches_from(arguments)
            .ok()?;
        match matches.get_one::<String>("number") {
            Some(value) => {
                let count: usize = value.parse().ok()?;
                if count == 0 || count > MAX_MESSAGES {
                    return None;
                }
                Some(count)
            }
            None => Some(DEFAULT_MESSAGES),
        }
    }

    /// Folds the analyzed texts into the chat's monthly word-count table.
    /// Strictly best effort, never fails the command.
    async fn update_word_counts(&self, storage: &Storage, chat_id: i64, texts: &[TextEntry]) {
        let now = Utc::now();
        let month_index = (now.year() as i64 - 1970) * 12 + now.month0() as i64;
        match storage.max_word_count_time_range_index(chat_id) {
            Ok(index) if index >= month_index => return,
            Ok(_) => {}
            Err(e) => {
                warn!("Failed to read word count index for chat {}: {}", chat_id, e);
                return;
            }
        }
        let plain: Vec<String> = texts.iter().map(|t| t.text.clone()).collect();
        let words = match self.nlp.count_words(&plain, self.word_count_limit).await {
            Ok(words) => words,
            Err(e) => {
                warn!("Failed to count words for chat {}: {}", chat_id, e);
                return;
            }
        };
        for word in &words {
            if let Err(e) =
                storage.add_or_update_word_count(chat_id, month_index, &word.word, word.count)
            {
                warn!("Failed to store word count for chat {}: {}", chat_id, e);
                return;
            }
        }
    }
}

#[async_trait::async_trait]
impl Handler for KeywordHandler {
    fn name(&self) -> &'static str {
        "keyword"
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
        let Some(count) = self.parse_count(arguments) else {
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
        let records = storage.messages_by_time(
            data_source_chat_id,
            &MessageType::ALL,
            count,
            false,
            true,
        )?;
        let texts: Vec<TextEntry> = records
            .iter()
            .filter(|r| !r.content.is_empty())
            .map(|r| TextEntry {
                message_id: r.message_id,
                epoch_seconds: r.epoch_seconds,
                text: r.content.clone(),
            })
            .collect();
        let word_counts = storage.get_word_counts(data_source_chat_id, self.word_count_limit)?;

        let clusters = self.nlp.compute_keywords(&texts, &word_counts).await?;
        if clusters.is_empty() {
            self.env.send_text(
                receiver_chat_id,
                self.env.text(locale, "keyword.empty")?,
                None,
                None,
            );
            return Ok(());
        }

        let tz = self.env.chat_timezone(&storage, data_source_chat_id);
        let mut text = format!(
            "{}\n",
            self.env
                .format(locale, "keyword.title", &[&count.to_string()])?
        );
        for cluster in &clusters {
            let keywords: Vec<&str> = cluster
                .keywords
                .iter()
                .map(String::as_str)
                .filter(|k| !k.starts_with("//"))
                .collect();
            if keywords.is_empty() {
                continue;
            }
            text.push_str("------\n");
            text.push_str(&format_epoch(
                cluster.start_epoch_seconds,
                &tz,
                SHORT_DATE_FORMAT,
            ));
            if cluster.first_message_id > 0 {
                text.push_str("    ");
                text.push_str(&self.codec.clickable_goto_command(cluster.first_message_id));
            }
            text.push('\n');
            text.push_str(&keywords.join(", "));
            text.push('\n');
        }
        self.env.send_text(receiver_chat_id, text, None, None);

        self.update_word_counts(&storage, data_source_chat_id, &texts)
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatlens_ipc::EventBus;
    use chatlens_locale::Bundle;
    use chatlens_nlp::{KeywordCluster, WordCount};
    use chrono::FixedOffset;
    use std::collections::HashMap;

    struct NoopNlp;

    #[async_trait::async_trait]
    impl NlpService for NoopNlp {
        async fn compute_keywords(
            &self,
            _texts: &[TextEntry],
            _global_word_counts: &HashMap<String, i64>,
        ) -> Result<Vec<KeywordCluster>> {
            Ok(Vec::new())
        }

        async fn count_words(&self, _texts: &[String], _limit: usize) -> Result<Vec<WordCount>> {
            Ok(Vec::new())
        }
    }

    #[derive(Default)]
    struct RecordingNlp {
        count_words_limit: std::sync::Mutex<Option<usize>>,
    }

    #[async_trait::async_trait]
    impl NlpService for RecordingNlp {
        async fn compute_keywords(
            &self,
            _texts: &[TextEntry],
            _global_word_counts: &HashMap<String, i64>,
        ) -> Result<Vec<KeywordCluster>> {
            Ok(Vec::new())
        }

        async fn count_words(&self, _texts: &[String], limit: usize) -> Result<Vec<WordCount>> {
            *self.count_words_limit.lock().unwrap() = Some(limit);
            Ok(Vec::new())
        }
    }

    fn handler_with(nlp: Arc<dyn NlpService>, word_count_limit: usize, tag: &str) -> KeywordHandler {
        let bus = EventBus::new();
        let env = Arc::new(HandlerEnv::new(
            bus.outbound_sender(),
            Bundle::load().unwrap(),
            std::env::temp_dir().join(format!(
                "chatlens-keyword-{}-{}.db",
                tag,
                std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .unwrap()
                    .as_nanos()
            )),
            Locale::EnUs,
            FixedOffset::east_opt(0).unwrap(),
        ));
        KeywordHandler::new(env, nlp, word_count_limit)
    }

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn message_count_is_bounded() {
        let h = handler_with(Arc::new(NoopNlp), 500, "bounds");
        assert_eq!(h.parse_count(&[]), Some(500));
        assert_eq!(h.parse_count(&args(&["-n", "3000"])), Some(3000));
        assert_eq!(h.parse_count(&args(&["-n", "3001"])), None);
        assert_eq!(h.parse_count(&args(&["-n", "0"])), None);
        assert_eq!(h.parse_count(&args(&["-n", "lots"])), None);
    }

    #[tokio::test]
    async fn configured_word_count_limit_reaches_the_service() {
        let nlp = Arc::new(RecordingNlp::default());
        let h = handler_with(nlp.clone(), 123, "limit");
        let storage = h.env.open_storage().unwrap();
        let texts = vec![TextEntry {
            message_id: 1,
            epoch_seconds: 1700000000,
            text: "tea or coffee".to_string(),
        }];

        h.update_word_counts(&storage, -100, &texts).await;
        assert_eq!(*nlp.count_words_limit.lock().unwrap(), Some(123));
    }
}
