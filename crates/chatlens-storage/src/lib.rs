//! Chatlens Storage
//!
//! SQLite persistence for messages, users, per-chat options, and word counts.
//! A connection is opened per command invocation and dropped when done; no
//! connection is held across independent commands.

use anyhow::{anyhow, Result};
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;

/// Persisted classification of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Unknown,
    Text,
    Command,
    Sticker,
    Gif,
    Image,
    Video,
    Audio,
    Voice,
    ChatTitle,
    ChatPhoto,
    PinnedMessage,
}

impl MessageType {
    pub const ALL: [MessageType; 12] = [
        MessageType::Unknown,
        MessageType::Text,
        MessageType::Command,
        MessageType::Sticker,
        MessageType::Gif,
        MessageType::Image,
        MessageType::Video,
        MessageType::Audio,
        MessageType::Voice,
        MessageType::ChatTitle,
        MessageType::ChatPhoto,
        MessageType::PinnedMessage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Unknown => "unknown",
            MessageType::Text => "text",
            MessageType::Command => "command",
            MessageType::Sticker => "sticker",
            MessageType::Gif => "gif",
            MessageType::Image => "image",
            MessageType::Video => "video",
            MessageType::Audio => "audio",
            MessageType::Voice => "voice",
            MessageType::ChatTitle => "chat_title",
            MessageType::ChatPhoto => "chat_photo",
            MessageType::PinnedMessage => "pinned_message",
        }
    }
}

impl FromStr for MessageType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        MessageType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| anyhow!("unknown message type: {}", s))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    pub chat_id: i64,
    pub message_id: i64,
    pub epoch_seconds: i64,
    pub user_id: i64,
    /// 0 means "not a reply".
    pub reply_to_message_id: i64,
    /// 0 means "not a reply".
    pub reply_to_user_id: i64,
    pub content: String,
    pub message_type: MessageType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub user_id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl UserRecord {
    pub fn full_name(&self) -> String {
        let mut full = String::new();
        if let Some(first) = &self.first_name {
            full.push_str(first);
        }
        if let Some(last) = &self.last_name {
            if !full.is_empty() {
                full.push(' ');
            }
            full.push_str(last);
        }
        if full.is_empty() {
            full = format!("user {}", self.user_id);
        }
        full
    }
}

pub struct Storage {
    conn: Mutex<rusqlite::Connection>,
}

impl Storage {
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = rusqlite::Connection::open(db_path.as_ref())?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS messages (
                chat_id INTEGER NOT NULL,
                message_id INTEGER NOT NULL,
                epoch_seconds INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                reply_to_message_id INTEGER NOT NULL DEFAULT 0,
                reply_to_user_id INTEGER NOT NULL DEFAULT 0,
                content TEXT NOT NULL DEFAULT '',
                type TEXT NOT NULL,
                PRIMARY KEY (chat_id, message_id)
            );

            CREATE INDEX IF NOT EXISTS idx_messages_chat_time
            ON messages(chat_id, epoch_seconds);

            CREATE TABLE IF NOT EXISTS users (
                user_id INTEGER PRIMARY KEY,
                username TEXT,
                first_name TEXT,
                last_name TEXT
            );

            CREATE TABLE IF NOT EXISTS options (
                chat_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (chat_id, name)
            );

            CREATE TABLE IF NOT EXISTS word_counts (
                chat_id INTEGER NOT NULL,
                time_range_index INTEGER NOT NULL,
                word TEXT NOT NULL,
                count INTEGER NOT NULL,
                PRIMARY KEY (chat_id, time_range_index, word)
            );
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn add_message(&self, message: &MessageRecord) -> Result<()> {
        self.conn.lock().unwrap().execute(
            "INSERT OR REPLACE INTO messages
             (chat_id, message_id, epoch_seconds, user_id, reply_to_message_id, reply_to_user_id, content, type)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            (
                message.chat_id,
                message.message_id,
                message.epoch_seconds,
                message.user_id,
                message.reply_to_message_id,
                message.reply_to_user_id,
                &message.content,
                message.message_type.as_str(),
            ),
        )?;
        Ok(())
    }

    pub fn upsert_user(&self, user: &UserRecord) -> Result<()> {
        self.conn.lock().unwrap().execute(
            "INSERT INTO users (user_id, username, first_name, last_name)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(user_id)
             DO UPDATE SET username = excluded.username,
                           first_name = excluded.first_name,
                           last_name = excluded.last_name",
            (
                user.user_id,
                &user.username,
                &user.first_name,
                &user.last_name,
            ),
        )?;
        Ok(())
    }

    pub fn get_users(&self) -> Result<HashMap<i64, UserRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT user_id, username, first_name, last_name FROM users")?;
        let rows = stmt.query_map([], |row| {
            Ok(UserRecord {
                user_id: row.get(0)?,
                username: row.get(1)?,
                first_name: row.get(2)?,
                last_name: row.get(3)?,
            })
        })?;

        let mut users = HashMap::new();
        for user in rows {
            let user = user?;
            users.insert(user.user_id, user);
        }
        Ok(users)
    }

    pub fn set_option(&self, chat_id: i64, name: &str, value: &str) -> Result<()> {
        self.conn.lock().unwrap().execute(
            "INSERT OR REPLACE INTO options (chat_id, name, value) VALUES (?1, ?2, ?3)",
            (chat_id, name, value),
        )?;
        Ok(())
    }

    pub fn get_option(&self, chat_id: i64, name: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT value FROM options WHERE chat_id = ?1 AND name = ?2")?;
        let value: Option<String> = stmt
            .query_row((chat_id, name), |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    /// Per-user message counts of the given type in the given time range,
    /// descending.
    pub fn rank(
        &self,
        chat_id: i64,
        start_epoch_seconds: i64,
        end_epoch_seconds: i64,
        message_type: MessageType,
    ) -> Result<Vec<(UserRecord, i64)>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT m.user_id, u.username, u.first_name, u.last_name, COUNT(*) AS n
             FROM messages m LEFT JOIN users u ON m.user_id = u.user_id
             WHERE m.chat_id = ?1 AND m.type = ?2
               AND m.epoch_seconds >= ?3 AND m.epoch_seconds < ?4
             GROUP BY m.user_id
             ORDER BY n DESC",
        )?;

        let rows = stmt.query_map(
            (
                chat_id,
                message_type.as_str(),
                start_epoch_seconds,
                end_epoch_seconds,
            ),
            |row| {
                Ok((
                    UserRecord {
                        user_id: row.get(0)?,
                        username: row.get(1)?,
                        first_name: row.get(2)?,
                        last_name: row.get(3)?,
                    },
                    row.get::<_, i64>(4)?,
                ))
            },
        )?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    /// Latest or oldest messages of the given types, time-sorted. `ascending`
    /// controls the order of the returned list, not which end is taken.
    pub fn messages_by_time(
        &self,
        chat_id: i64,
        types: &[MessageType],
        limit: usize,
        oldest: bool,
        ascending: bool,
    ) -> Result<Vec<MessageRecord>> {
        if types.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = types
            .iter()
            .enumerate()
            .map(|(i, _)| format!("?{}", i + 2))
            .collect::<Vec<_>>()
            .join(", ");
        let order = if oldest { "ASC" } else { "DESC" };
        let sql = format!(
            "SELECT chat_id, message_id, epoch_seconds, user_id,
                    reply_to_message_id, reply_to_user_id, content, type
             FROM messages
             WHERE chat_id = ?1 AND type IN ({placeholders})
             ORDER BY epoch_seconds {order}
             LIMIT {limit}",
        );

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&sql)?;
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(chat_id)];
        for t in types {
            params.push(Box::new(t.as_str()));
        }
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let rows = stmt.query_map(param_refs.as_slice(), Self::row_to_message)?;
        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }

        // The LIMIT ran against the requested end; flip if the caller wants
        // the other presentation order.
        let fetched_ascending = oldest;
        if fetched_ascending != ascending {
            messages.reverse();
        }
        Ok(messages)
    }

    /// (user_id, reply_to_user_id) for every message in the time range, in
    /// ascending time order. reply_to_user_id 0 means the message was not an
    /// explicit reply.
    pub fn reply_pairs(
        &self,
        chat_id: i64,
        start_epoch_seconds: i64,
        end_epoch_seconds: i64,
    ) -> Result<Vec<(i64, i64)>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT user_id, reply_to_user_id FROM messages
             WHERE chat_id = ?1 AND epoch_seconds >= ?2 AND epoch_seconds < ?3
             ORDER BY epoch_seconds ASC",
        )?;
        let rows = stmt.query_map(
            (chat_id, start_epoch_seconds, end_epoch_seconds),
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
        )?;

        let mut pairs = Vec::new();
        for row in rows {
            pairs.push(row?);
        }
        Ok(pairs)
    }

    /// Timestamps of all messages in the time range, for time-of-day stats.
    pub fn message_epochs(
        &self,
        chat_id: i64,
        start_epoch_seconds: i64,
        end_epoch_seconds: i64,
    ) -> Result<Vec<i64>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT epoch_seconds FROM messages
             WHERE chat_id = ?1 AND epoch_seconds >= ?2 AND epoch_seconds < ?3",
        )?;
        let rows = stmt.query_map((chat_id, start_epoch_seconds, end_epoch_seconds), |row| {
            row.get::<_, i64>(0)
        })?;

        let mut epochs = Vec::new();
        for row in rows {
            epochs.push(row?);
        }
        Ok(epochs)
    }

    /// Accumulated counts of the most frequent words, summed over all time
    /// range indexes, descending.
    pub fn get_word_counts(&self, chat_id: i64, limit: usize) -> Result<HashMap<String, i64>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT word, SUM(count) AS total FROM word_counts
             WHERE chat_id = ?1
             GROUP BY word
             ORDER BY total DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map((chat_id, limit as i64), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut counts = HashMap::new();
        for row in rows {
            let (word, count) = row?;
            counts.insert(word, count);
        }
        Ok(counts)
    }

    pub fn add_or_update_word_count(
        &self,
        chat_id: i64,
        time_range_index: i64,
        word: &str,
        count: i64,
    ) -> Result<()> {
        self.conn.lock().unwrap().execute(
            "INSERT INTO word_counts (chat_id, time_range_index, word, count)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(chat_id, time_range_index, word)
             DO UPDATE SET count = excluded.count",
            (chat_id, time_range_index, word, count),
        )?;
        Ok(())
    }

    /// Word counting runs incrementally; the max index marks where to
    /// continue. -1 when nothing has been counted yet.
    pub fn max_word_count_time_range_index(&self, chat_id: i64) -> Result<i64> {
        let max: Option<i64> = self.conn.lock().unwrap().query_row(
            "SELECT MAX(time_range_index) FROM word_counts WHERE chat_id = ?1",
            [chat_id],
            |row| row.get(0),
        )?;
        Ok(max.unwrap_or(-1))
    }

    fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRecord> {
        let type_str: String = row.get(7)?;
        Ok(MessageRecord {
            chat_id: row.get(0)?,
            message_id: row.get(1)?,
            epoch_seconds: row.get(2)?,
            user_id: row.get(3)?,
            reply_to_message_id: row.get(4)?,
            reply_to_user_id: row.get(5)?,
            content: row.get(6)?,
            message_type: type_str.parse().unwrap_or(MessageType::Unknown),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_db_path(name: &str) -> std::path::PathBuf {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        std::env::temp_dir().join(format!("chatlens-storage-{}-{}.db", name, ts))
    }

    fn message(chat_id: i64, message_id: i64, epoch: i64, user_id: i64) -> MessageRecord {
        MessageRecord {
            chat_id,
            message_id,
            epoch_seconds: epoch,
            user_id,
            reply_to_message_id: 0,
            reply_to_user_id: 0,
            content: format!("m{}", message_id),
            message_type: MessageType::Text,
        }
    }

    #[test]
    fn message_type_roundtrip() {
        for t in MessageType::ALL {
            assert_eq!(t.as_str().parse::<MessageType>().unwrap(), t);
        }
        assert!("dance".parse::<MessageType>().is_err());
    }

    #[test]
    fn options_roundtrip_and_overwrite() {
        let storage = Storage::open(temp_db_path("options")).expect("storage");
        assert_eq!(storage.get_option(1, "language").unwrap(), None);
        storage.set_option(1, "language", "en_US").unwrap();
        storage.set_option(1, "language", "zh_CN").unwrap();
        assert_eq!(
            storage.get_option(1, "language").unwrap(),
            Some("zh_CN".to_string())
        );
        assert_eq!(storage.get_option(2, "language").unwrap(), None);
    }

    #[test]
    fn rank_counts_and_orders_by_message_count() {
        let storage = Storage::open(temp_db_path("rank")).expect("storage");
        storage
            .upsert_user(&UserRecord {
                user_id: 1,
                username: Some("alice".into()),
                first_name: Some("Alice".into()),
                last_name: None,
            })
            .unwrap();
        for (id, user) in [(1, 1), (2, 1), (3, 1), (4, 2)] {
            storage.add_message(&message(10, id, 1000 + id, user)).unwrap();
        }

        let rank = storage.rank(10, 0, i64::MAX, MessageType::Text).unwrap();
        assert_eq!(rank.len(), 2);
        assert_eq!(rank[0].0.user_id, 1);
        assert_eq!(rank[0].1, 3);
        assert_eq!(rank[0].0.full_name(), "Alice");
        // User 2 was never recorded in the users table.
        assert_eq!(rank[1].0.full_name(), "user 2");
        assert_eq!(rank[1].1, 1);
    }

    #[test]
    fn messages_by_time_takes_latest_in_ascending_order() {
        let storage = Storage::open(temp_db_path("bytime")).expect("storage");
        for id in 1..=5 {
            storage.add_message(&message(10, id, 1000 + id, 1)).unwrap();
        }

        let latest = storage
            .messages_by_time(10, &[MessageType::Text], 3, false, true)
            .unwrap();
        assert_eq!(
            latest.iter().map(|m| m.message_id).collect::<Vec<_>>(),
            vec![3, 4, 5]
        );

        let oldest = storage
            .messages_by_time(10, &[MessageType::Text], 2, true, true)
            .unwrap();
        assert_eq!(
            oldest.iter().map(|m| m.message_id).collect::<Vec<_>>(),
            vec![1, 2]
        );
    }

    #[test]
    fn reply_pairs_preserve_time_order() {
        let storage = Storage::open(temp_db_path("replies")).expect("storage");
        let mut m1 = message(10, 1, 1001, 1);
        let mut m2 = message(10, 2, 1002, 2);
        m2.reply_to_message_id = 1;
        m2.reply_to_user_id = 1;
        let m3 = message(10, 3, 1003, 3);
        m1.content = "hello".into();
        for m in [&m1, &m2, &m3] {
            storage.add_message(m).unwrap();
        }

        let pairs = storage.reply_pairs(10, 0, i64::MAX).unwrap();
        assert_eq!(pairs, vec![(1, 0), (2, 1), (3, 0)]);
    }

    #[test]
    fn word_counts_accumulate_across_ranges() {
        let storage = Storage::open(temp_db_path("words")).expect("storage");
        assert_eq!(storage.max_word_count_time_range_index(10).unwrap(), -1);
        storage.add_or_update_word_count(10, 0, "tea", 3).unwrap();
        storage.add_or_update_word_count(10, 1, "tea", 2).unwrap();
        storage.add_or_update_word_count(10, 1, "cake", 1).unwrap();

        let counts = storage.get_word_counts(10, 10).unwrap();
        assert_eq!(counts["tea"], 5);
        assert_eq!(counts["cake"], 1);
        assert_eq!(storage.max_word_count_time_range_index(10).unwrap(), 1);
    }
}
