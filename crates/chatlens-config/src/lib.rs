//! Chatlens Configuration
//!
//! TOML configuration loading, validated once before the bot starts

use anyhow::{anyhow, Context, Result};
use chatlens_locale::Locale;
use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub bot: BotConfig,
    #[serde(default)]
    pub core: CoreConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    pub nlp: Option<NlpConfig>,
    #[serde(default)]
    pub graphviz: GraphvizConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    pub bot_name: String,
    pub bot_token: String,
    #[serde(default)]
    pub chat_whitelist: Vec<i64>,
    #[serde(default)]
    pub debug_users: Vec<i64>,
    pub default_language: String,
    #[serde(default = "default_timezone")]
    pub default_timezone: String,
    pub temp_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CoreConfig {
    pub data_dir: Option<String>,
    pub log_level: Option<String>,
    pub log_retention_days: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TelegramConfig {
    pub poll_timeout_secs: Option<u64>,
    pub client_recreate_interval_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NlpConfig {
    pub server_url: String,
    #[serde(default = "default_keyword_request_limit")]
    pub keyword_request_limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphvizConfig {
    #[serde(default = "default_dot_path")]
    pub dot_path: String,
}

impl Default for GraphvizConfig {
    fn default() -> Self {
        Self {
            dot_path: default_dot_path(),
        }
    }
}

fn default_timezone() -> String {
    "+00:00".to_string()
}

fn default_keyword_request_limit() -> usize {
    500
}

fn default_dot_path() -> String {
    "dot".to_string()
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).with_context(|| {
            format!("failed to read config file {}", path.as_ref().display())
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        self.bot
            .default_language
            .parse::<Locale>()
            .map_err(|_| {
                anyhow!(
                    "invalid default_language '{}', acceptable values: {:?}",
                    self.bot.default_language,
                    Locale::ALL.map(|l| l.code())
                )
            })?;
        self.bot
            .default_timezone
            .parse::<FixedOffset>()
            .map_err(|e| {
                anyhow!(
                    "invalid default_timezone '{}': {}",
                    self.bot.default_timezone,
                    e
                )
            })?;
        if !Path::new(&self.bot.temp_dir).is_dir() {
            return Err(anyhow!(
                "invalid temp_dir, no such directory: {}",
                self.bot.temp_dir
            ));
        }
        Ok(())
    }

    /// Validated at load; falls back to en_US rather than panicking.
    pub fn default_locale(&self) -> Locale {
        self.bot
            .default_language
            .parse()
            .unwrap_or(Locale::EnUs)
    }

    pub fn default_timezone(&self) -> FixedOffset {
        self.bot
            .default_timezone
            .parse()
            .unwrap_or_else(|_| FixedOffset::east_opt(0).expect("utc offset"))
    }

    pub fn chat_whitelist(&self) -> HashSet<i64> {
        self.bot.chat_whitelist.iter().copied().collect()
    }

    pub fn debug_users(&self) -> HashSet<i64> {
        self.bot.debug_users.iter().copied().collect()
    }

    pub fn data_dir(&self) -> PathBuf {
        match &self.core.data_dir {
            Some(dir) => PathBuf::from(dir),
            None => dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".chatlens"),
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir().join("chatlens.db")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir().join("logs")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(language: &str) -> String {
        format!(
            r#"
            [bot]
            bot_name = "MyBot"
            bot_token = "123456:TESTTOKEN"
            chat_whitelist = [-100123, 42]
            debug_users = [777]
            default_language = "{language}"
            default_timezone = "+08:00"
            temp_dir = "{tmp}"

            [core]
            log_retention_days = 3

            [nlp]
            server_url = "http://127.0.0.1:9010"
            "#,
            tmp = std::env::temp_dir().display()
        )
    }

    #[test]
    fn parses_valid_config() {
        let config = Config::from_toml(&sample("en_US")).expect("config");
        assert_eq!(config.bot.bot_name, "MyBot");
        assert!(config.chat_whitelist().contains(&42));
        assert!(config.debug_users().contains(&777));
        assert_eq!(config.default_locale(), Locale::EnUs);
        assert_eq!(config.default_timezone().local_minus_utc(), 8 * 3600);
        assert_eq!(config.nlp.as_ref().unwrap().keyword_request_limit, 500);
        assert_eq!(config.core.log_retention_days, Some(3));
    }

    #[test]
    fn rejects_unknown_language() {
        let err = Config::from_toml(&sample("eo_EO")).unwrap_err();
        assert!(err.to_string().contains("default_language"));
    }

    #[test]
    fn rejects_missing_temp_dir() {
        let content = sample("en_US").replace(
            &std::env::temp_dir().display().to_string(),
            "/no/such/dir/anywhere",
        );
        let err = Config::from_toml(&content).unwrap_err();
        assert!(err.to_string().contains("temp_dir"));
    }
}
