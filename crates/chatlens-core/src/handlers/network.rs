use crate::handler::{render_help, Handler, HandlerEnv};
use crate::handlers::{base_command, now_epoch_seconds};
use anyhow::Result;
use chatlens_ipc::InboundMessage;
use chatlens_locale::Locale;
use chatlens_render::{Graphviz, ReplyGraph};
use clap::Arg;
use std::collections::HashMap;
use std::sync::Arc;

const MAX_TIME_RANGE_DAYS: i64 = 90;
const DEFAULT_TIME_RANGE_DAYS: i64 = 1;
const MAX_EDGES: usize = 50;
const IMPLICIT_REPLY_RANGE: usize = 10;
const EXPLICIT_REPLY_SCORE: f64 = 1.0;
const IMPLICIT_REPLY_SCORE: f64 = EXPLICIT_REPLY_SCORE / IMPLICIT_REPLY_RANGE as f64;
const EXPLICIT_EDGE_COLOR: &str = "red";
const IMPLICIT_EDGE_COLOR: &str = "blue";

pub struct NetworkHandler {
    env: Arc<HandlerEnv>,
    graphviz: Graphviz,
    command: clap::Command,
}

impl NetworkHandler {
    pub fn new(env: Arc<HandlerEnv>, graphviz: Graphviz) -> Self {
        let command = base_command(
            "network",
            "Draws a graph of who replies to whom in this chat.",
        )
        .arg(
            Arg::new("day")
                .short('d')
                .long("day")
                .value_name("days")
                .help("Compute over the messages of the last n days. Range: (0, 90]. Default: 1."),
        );
        Self {
            env,
            graphviz,
            command,
        }
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

/// One aggregated reply relation between two users. Explicit and implicit
/// relations between the same pair stay separate edges.
#[derive(Debug, PartialEq)]
struct ReplyEdge {
    from_user_id: i64,
    to_user_id: i64,
    score: f64,
    explicit: bool,
}

/// Scores reply relations over `(user_id, reply_to_user_id)` pairs ordered
/// by time. An explicit reply scores 1.0 to its target; every message also
/// weakly relates its sender to the previous few senders.
fn score_reply_edges(pairs: &[(i64, i64)]) -> Vec<ReplyEdge> {
    let mut scores: HashMap<(i64, i64, bool), f64> = HashMap::new();
    for (i, (user_id, reply_to_user_id)) in pairs.iter().enumerate() {
        if *reply_to_user_id != 0 {
            *scores
                .entry((*user_id, *reply_to_user_id, true))
                .or_insert(0.0) += EXPLICIT_REPLY_SCORE;
        }
        for j in i.saturating_sub(IMPLICIT_REPLY_RANGE)..i {
            let previous_user_id = pairs[j].0;
            if previous_user_id == *user_id {
                continue;
            }
            *scores
                .entry((*user_id, previous_user_id, false))
                .or_insert(0.0) += IMPLICIT_REPLY_SCORE;
        }
    }

    let mut edges: Vec<ReplyEdge> = scores
        .into_iter()
        .map(|((from_user_id, to_user_id, explicit), score)| ReplyEdge {
            from_user_id,
            to_user_id,
            score,
            explicit,
        })
        .collect();
    edges.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    edges.truncate(MAX_EDGES);
    edges
}

#[async_trait::async_trait]
impl Handler for NetworkHandler {
    fn name(&self) -> &'static str {
        "network"
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
        let pairs = storage.reply_pairs(data_source_chat_id, start_epoch_seconds, i64::MAX)?;
        let users = storage.get_users()?;

        let edges = score_reply_edges(&pairs);
        let mut graph = ReplyGraph::new();
        for edge in &edges {
            // Users missing from the table cannot be labeled; skip the edge.
            let (Some(from), Some(to)) = (
                users.get(&edge.from_user_id),
                users.get(&edge.to_user_id),
            ) else {
                continue;
            };
            graph.add_node(edge.from_user_id, &from.full_name());
            graph.add_node(edge.to_user_id, &to.full_name());
            graph.add_edge(edge.from_user_id, edge.to_user_id, edge.score, edge.explicit);
        }
        if graph.is_empty() {
            self.env.send_text(
                receiver_chat_id,
                self.env.text(locale, "network.empty")?,
                None,
                None,
            );
            return Ok(());
        }

        let dot = graph.to_dot(EXPLICIT_EDGE_COLOR, IMPLICIT_EDGE_COLOR);
        let png = self.graphviz.render_png(&dot).await?;
        let caption = self
            .env
            .format(locale, "network.caption", &[&days.to_string()])?;
        self.env.send_photo(receiver_chat_id, png, Some(caption));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatlens_ipc::EventBus;
    use chatlens_locale::Bundle;
    use chrono::FixedOffset;
    use std::path::Path;

    fn handler() -> NetworkHandler {
        let bus = EventBus::new();
        let env = Arc::new(HandlerEnv::new(
            bus.outbound_sender(),
            Bundle::load().unwrap(),
            std::env::temp_dir().join("chatlens-network-test.db"),
            Locale::EnUs,
            FixedOffset::east_opt(0).unwrap(),
        ));
        NetworkHandler::new(env, Graphviz::new("dot", Path::new("/tmp")))
    }

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn edge_score(edges: &[ReplyEdge], from: i64, to: i64, explicit: bool) -> Option<f64> {
        edges
            .iter()
            .find(|e| e.from_user_id == from && e.to_user_id == to && e.explicit == explicit)
            .map(|e| e.score)
    }

    #[test]
    fn day_range_is_bounded() {
        let h = handler();
        assert_eq!(h.parse_days(&[]), Some(1));
        assert_eq!(h.parse_days(&args(&["-d", "90"])), Some(90));
        assert_eq!(h.parse_days(&args(&["-d", "91"])), None);
        assert_eq!(h.parse_days(&args(&["-d", "0"])), None);
    }

    #[test]
    fn explicit_replies_score_one_each() {
        let edges = score_reply_edges(&[(1, 2), (1, 2), (2, 0)]);
        assert_eq!(edge_score(&edges, 1, 2, true), Some(2.0));
    }

    #[test]
    fn recent_senders_relate_implicitly() {
        // User 2's message follows user 1's, so 2 weakly relates to 1.
        let edges = score_reply_edges(&[(1, 0), (2, 0)]);
        assert_eq!(edge_score(&edges, 2, 1, false), Some(IMPLICIT_REPLY_SCORE));
        assert_eq!(edge_score(&edges, 1, 2, false), None);
    }

    #[test]
    fn consecutive_messages_from_same_user_do_not_self_relate() {
        let edges = score_reply_edges(&[(1, 0), (1, 0), (1, 0)]);
        assert!(edges.is_empty());
    }

    #[test]
    fn explicit_and_implicit_edges_stay_separate() {
        let edges = score_reply_edges(&[(1, 0), (2, 1)]);
        assert_eq!(edge_score(&edges, 2, 1, true), Some(1.0));
        assert_eq!(edge_score(&edges, 2, 1, false), Some(IMPLICIT_REPLY_SCORE));
    }

    #[test]
    fn edge_list_is_capped_and_sorted() {
        // 60 distinct pairs of explicit replies, one of them repeated.
        let mut pairs = Vec::new();
        for i in 0..60 {
            pairs.push((100 + i, 200 + i));
        }
        pairs.push((100, 200));
        let edges = score_reply_edges(&pairs);
        assert_eq!(edges.len(), MAX_EDGES);
        assert_eq!(edges[0].from_user_id, 100);
        assert_eq!(edges[0].score, 2.0);
        assert!(edges.windows(2).all(|w| w[0].score >= w[1].score));
    }
}
