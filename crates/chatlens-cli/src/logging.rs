//! Tracing output for the chatlens binary.
//!
//! Events go to stderr and to one log file per day under the data
//! directory. Rotation is encoded in the file name, so pruning old files
//! goes by the date in the name rather than filesystem timestamps.

use anyhow::{Context, Result};
use chrono::{Duration, Local, NaiveDate};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const FILE_STEM: &str = "chatlens";
pub const DEFAULT_RETENTION_DAYS: u32 = 7;

/// A directory of daily log files named `chatlens.YYYY-MM-DD.log`.
pub struct LogDir {
    dir: PathBuf,
    retention_days: u32,
}

impl LogDir {
    pub fn new(dir: PathBuf, retention_days: u32) -> Self {
        Self {
            dir,
            retention_days,
        }
    }

    pub fn current_file(&self) -> PathBuf {
        self.file_for(Local::now().date_naive())
    }

    fn file_for(&self, date: NaiveDate) -> PathBuf {
        self.dir
            .join(format!("{}.{}.log", FILE_STEM, date.format("%Y-%m-%d")))
    }

    /// Log files present on disk, newest first. Files that do not follow
    /// the daily naming scheme are not ours and are left alone.
    pub fn files(&self) -> Result<Vec<PathBuf>> {
        let mut dated = Vec::new();
        for entry in fs::read_dir(&self.dir)
            .with_context(|| format!("failed to read log directory {}", self.dir.display()))?
        {
            let path = entry?.path();
            if let Some(date) = Self::date_of(&path) {
                dated.push((date, path));
            }
        }
        dated.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(dated.into_iter().map(|(_, path)| path).collect())
    }

    /// Deletes files dated before the retention window. Returns how many
    /// were removed.
    pub fn prune(&self) -> Result<usize> {
        let cutoff = Local::now().date_naive() - Duration::days(self.retention_days as i64);
        let mut removed = 0;
        for path in self.files()? {
            let Some(date) = Self::date_of(&path) else {
                continue;
            };
            if date < cutoff {
                fs::remove_file(&path)
                    .with_context(|| format!("failed to delete old log {}", path.display()))?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn date_of(path: &Path) -> Option<NaiveDate> {
        let name = path.file_name()?.to_str()?;
        let date = name
            .strip_prefix(FILE_STEM)?
            .strip_prefix('.')?
            .strip_suffix(".log")?;
        NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
    }
}

pub struct LoggingGuard {
    _guard: WorkerGuard,
}

pub fn init(logs: &LogDir, log_level: &str) -> Result<LoggingGuard> {
    fs::create_dir_all(&logs.dir)?;
    match logs.prune() {
        Ok(0) => {}
        Ok(removed) => eprintln!("Removed {} old log file(s)", removed),
        Err(e) => eprintln!("Failed to prune old logs: {}", e),
    }

    let file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(logs.current_file())?;
    let (writer, guard) = tracing_appender::non_blocking(file);

    let file_layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .with_filter(env_filter(log_level));

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_filter(env_filter(log_level));

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .try_init()?;

    Ok(LoggingGuard { _guard: guard })
}

fn env_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_log_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "chatlens-logs-{}-{}",
            tag,
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn current_file_is_dated_today() {
        let logs = LogDir::new(temp_log_dir("today"), DEFAULT_RETENTION_DAYS);
        let name = logs.current_file();
        let name = name.file_name().unwrap().to_str().unwrap().to_string();
        let today = Local::now().date_naive().format("%Y-%m-%d").to_string();
        assert_eq!(name, format!("chatlens.{}.log", today));
    }

    #[test]
    fn prune_goes_by_the_date_in_the_name() {
        let dir = temp_log_dir("prune");
        let logs = LogDir::new(dir.clone(), DEFAULT_RETENTION_DAYS);
        fs::write(dir.join("chatlens.2020-01-01.log"), "old").unwrap();
        fs::write(logs.current_file(), "current").unwrap();
        fs::write(dir.join("notes.txt"), "unrelated").unwrap();

        assert_eq!(logs.prune().unwrap(), 1);
        assert!(!dir.join("chatlens.2020-01-01.log").exists());
        assert!(logs.current_file().exists());
        assert!(dir.join("notes.txt").exists());
    }

    #[test]
    fn files_are_listed_newest_first() {
        let dir = temp_log_dir("list");
        let logs = LogDir::new(dir.clone(), DEFAULT_RETENTION_DAYS);
        fs::write(dir.join("chatlens.2024-01-02.log"), "").unwrap();
        fs::write(dir.join("chatlens.2024-03-04.log"), "").unwrap();
        fs::write(dir.join("README"), "").unwrap();

        let files = logs.files().unwrap();
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("chatlens.2024-03-04.log"));
        assert!(files[1].ends_with("chatlens.2024-01-02.log"));
    }
}
