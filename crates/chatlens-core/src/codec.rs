//! Two-form command codec.
//!
//! Commands have a clickable form (`/goto___m_123456@MyBot`) usable as a
//! native Telegram command, and a non-clickable form (`>goto -m 123456`)
//! embeddable in prose with CLI-style flags. The two transforms are not
//! perfect inverses: runs of 2+ underscores collapse to "_-", so
//! `/goto___m_123456` decodes to `>goto -m 123456` but re-encodes to
//! `/goto__m_123456`. That asymmetry is long-standing observable behavior
//! and must not be normalized away.

use crate::error::CommandError;
use regex::Regex;

pub const CLICKABLE_PREFIX: char = '/';
pub const NON_CLICKABLE_PREFIX: char = '>';

pub struct CommandCodec {
    mention_or_space: Regex,
    underscore_run: Regex,
    dash_or_space: Regex,
}

impl CommandCodec {
    pub fn new() -> Self {
        Self {
            mention_or_space: Regex::new(r"[@\s]+").expect("valid regex"),
            underscore_run: Regex::new(r"_{2,}").expect("valid regex"),
            dash_or_space: Regex::new(r"[-\s]").expect("valid regex"),
        }
    }

    /// Decodes a clickable command into its non-clickable form: keep only
    /// the first `@`/whitespace-delimited segment, collapse each run of 2+
    /// underscores to `"_-"`, turn remaining underscores into spaces, and
    /// swap the prefix.
    pub fn to_non_clickable(&self, text: &str) -> Result<String, CommandError> {
        if !text.starts_with(CLICKABLE_PREFIX) || text.chars().count() <= 1 {
            return Err(CommandError::Format(text.to_string()));
        }
        let first_segment = self
            .mention_or_space
            .split(text)
            .next()
            .unwrap_or_default();
        let collapsed = self.underscore_run.replace_all(first_segment, "_-");
        let spaced = collapsed.replace('_', " ");
        Ok(spaced.replacen(CLICKABLE_PREFIX, &NON_CLICKABLE_PREFIX.to_string(), 1))
    }

    /// Encodes a non-clickable command into its clickable form: every dash
    /// and whitespace character becomes an underscore, and the prefix is
    /// swapped. No segment truncation; multi-token arguments round-trip.
    pub fn to_clickable(&self, text: &str) -> Result<String, CommandError> {
        if !text.starts_with(NON_CLICKABLE_PREFIX) || text.chars().count() <= 1 {
            return Err(CommandError::Format(text.to_string()));
        }
        let underscored = self.dash_or_space.replace_all(text, "_");
        Ok(underscored.replacen(NON_CLICKABLE_PREFIX, &CLICKABLE_PREFIX.to_string(), 1))
    }

    /// A clickable goto command pointing at a message, for embedding in
    /// digest replies.
    pub fn clickable_goto_command(&self, message_id: i64) -> String {
        self.to_clickable(&format!(">goto -m {}", message_id))
            .expect("goto command has the non-clickable prefix")
    }
}

impl Default for CommandCodec {
    fn default() -> Self {
        Self::new()
    }
}
