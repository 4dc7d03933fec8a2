//! Chatlens Locale
//!
//! Display locales and embedded response-string bundles

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const EN_US_BUNDLE: &str = include_str!("../locales/en_US.toml");
const ZH_CN_BUNDLE: &str = include_str!("../locales/zh_CN.toml");

/// Display locale of a chat. Replies, help text, and error notices are
/// rendered in the resolved locale of the data-source chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Locale {
    #[default]
    EnUs,
    ZhCn,
}

impl Locale {
    pub const ALL: [Locale; 2] = [Locale::EnUs, Locale::ZhCn];

    pub fn code(&self) -> &'static str {
        match self {
            Locale::EnUs => "en_US",
            Locale::ZhCn => "zh_CN",
        }
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LocaleError {
    #[error("unknown locale: {0}")]
    UnknownLocale(String),
    #[error("missing response string: {locale}/{key}")]
    MissingKey { locale: Locale, key: String },
}

impl FromStr for Locale {
    type Err = LocaleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "en_US" => Ok(Locale::EnUs),
            "zh_CN" => Ok(Locale::ZhCn),
            other => Err(LocaleError::UnknownLocale(other.to_string())),
        }
    }
}

/// Response-string lookup table for all supported locales, parsed once at
/// start-up from the embedded TOML bundles and shared by reference.
#[derive(Clone)]
pub struct Bundle {
    tables: HashMap<Locale, HashMap<String, String>>,
}

impl Bundle {
    pub fn load() -> Result<Self, toml::de::Error> {
        Self::from_sources(&[(Locale::EnUs, EN_US_BUNDLE), (Locale::ZhCn, ZH_CN_BUNDLE)])
    }

    /// Builds a bundle from raw TOML tables, one per locale. `load` uses
    /// this with the embedded sources; custom tables are mainly for tests.
    pub fn from_sources(sources: &[(Locale, &str)]) -> Result<Self, toml::de::Error> {
        let mut tables = HashMap::new();
        for (locale, source) in sources {
            tables.insert(*locale, toml::from_str(source)?);
        }
        Ok(Self { tables })
    }

    /// Looks up a response string. A missing key fails the whole command
    /// instead of being silently swallowed.
    pub fn get(&self, locale: Locale, key: &str) -> Result<&str, LocaleError> {
        self.tables
            .get(&locale)
            .and_then(|table| table.get(key))
            .map(String::as_str)
            .ok_or_else(|| LocaleError::MissingKey {
                locale,
                key: key.to_string(),
            })
    }

    /// Looks up a response string and substitutes `{0}`, `{1}`, ... with the
    /// given arguments.
    pub fn format(&self, locale: Locale, key: &str, args: &[&str]) -> Result<String, LocaleError> {
        let mut text = self.get(locale, key)?.to_string();
        for (i, arg) in args.iter().enumerate() {
            text = text.replace(&format!("{{{}}}", i), arg);
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_known_locales() {
        assert_eq!("en_US".parse::<Locale>().unwrap(), Locale::EnUs);
        assert_eq!("zh_CN".parse::<Locale>().unwrap(), Locale::ZhCn);
        assert!("fr_FR".parse::<Locale>().is_err());
    }

    #[test]
    fn bundles_resolve_in_both_locales() {
        let bundle = Bundle::load().expect("bundles");
        let en = bundle.get(Locale::EnUs, "common.noSuchCommand").unwrap();
        let zh = bundle.get(Locale::ZhCn, "common.noSuchCommand").unwrap();
        assert!(!en.is_empty());
        assert!(!zh.is_empty());
        assert_ne!(en, zh);
    }

    #[test]
    fn missing_key_is_an_error() {
        let bundle = Bundle::load().expect("bundles");
        let err = bundle.get(Locale::EnUs, "no.such.key").unwrap_err();
        assert_eq!(
            err,
            LocaleError::MissingKey {
                locale: Locale::EnUs,
                key: "no.such.key".to_string()
            }
        );
    }

    #[test]
    fn format_substitutes_positional_args() {
        let bundle = Bundle::load().expect("bundles");
        let text = bundle
            .format(Locale::EnUs, "unauthorized.notice", &["-100123"])
            .unwrap();
        assert!(text.contains("-100123"));
        assert!(!text.contains("{0}"));
    }

    #[test]
    fn every_en_key_has_a_zh_counterpart() {
        let bundle = Bundle::load().expect("bundles");
        let en_keys: Vec<_> = bundle.tables[&Locale::EnUs].keys().collect();
        for key in en_keys {
            assert!(
                bundle.tables[&Locale::ZhCn].contains_key(key),
                "zh_CN missing {key}"
            );
        }
    }
}
