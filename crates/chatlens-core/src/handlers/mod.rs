//! Concrete command handlers.

pub mod echo;
pub mod goto;
pub mod help;
pub mod history;
pub mod keyword;
pub mod network;
pub mod option;
pub mod rank;
pub mod timestats;

pub use echo::EchoHandler;
pub use goto::GotoHandler;
pub use help::HelpHandler;
pub use history::HistoryHandler;
pub use keyword::KeywordHandler;
pub use network::NetworkHandler;
pub use option::OptionHandler;
pub use rank::RankHandler;
pub use timestats::TimestatsHandler;

use chrono::{FixedOffset, TimeZone, Utc};

pub(crate) const DATE_FORMAT: &str = "%Y/%m/%d %H:%M %:z";
pub(crate) const SHORT_DATE_FORMAT: &str = "%m/%d %H:%M %:z";

/// Flag parsing uses clap builder commands fed with pre-split tokens; the
/// auto help flag is off so a stray `-h` reports invalid input like any
/// other unknown flag.
pub(crate) fn base_command(name: &'static str, about: &'static str) -> clap::Command {
    clap::Command::new(name)
        .about(about)
        .no_binary_name(true)
        .disable_help_flag(true)
}

pub(crate) fn format_epoch(epoch_seconds: i64, tz: &FixedOffset, format: &str) -> String {
    match Utc.timestamp_opt(epoch_seconds, 0) {
        chrono::LocalResult::Single(dt) => dt.with_timezone(tz).format(format).to_string(),
        _ => epoch_seconds.to_string(),
    }
}

pub(crate) fn now_epoch_seconds() -> i64 {
    Utc::now().timestamp()
}
