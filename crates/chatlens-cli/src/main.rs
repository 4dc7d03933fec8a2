//! Chatlens CLI
//!
//! Command-line interface for the Chatlens Telegram statistics bot

mod logging;

use anyhow::{anyhow, Result};
use chatlens_config::Config;
use chatlens_core::auth::AuthGate;
use chatlens_core::dispatcher::Dispatcher;
use chatlens_core::engine::Engine;
use chatlens_core::handler::{HandlerEnv, HandlerRegistry};
use chatlens_core::handlers::{
    EchoHandler, GotoHandler, HelpHandler, HistoryHandler, KeywordHandler, NetworkHandler,
    OptionHandler, RankHandler, TimestatsHandler,
};
use chatlens_ipc::EventBus;
use chatlens_locale::Bundle;
use chatlens_nlp::HttpNlpClient;
use chatlens_render::Graphviz;
use chatlens_storage::Storage;
use chatlens_telegram::TelegramAdapter;
use clap::{Parser, Subcommand};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "chatlens")]
#[command(about = "Telegram chat statistics bot", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long)]
    config: Option<String>,

    /// Log level (overrides config)
    #[arg(short, long)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the bot in the foreground
    Start,

    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },

    /// Log management commands
    Logs {
        #[command(subcommand)]
        action: LogCommands,
    },

    /// Show version
    Version,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Validate configuration
    Validate,
}

#[derive(Subcommand)]
enum LogCommands {
    /// Show log files and sizes
    List,
    /// Show last N lines of the current log
    Tail {
        /// Number of lines to show
        #[arg(short, long, default_value = "50")]
        lines: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start => {
            let config = load_config(cli.config)?;
            let log_level = cli
                .log_level
                .or_else(|| config.core.log_level.clone())
                .unwrap_or_else(|| "info".to_string());

            let data_dir = config.data_dir();
            fs::create_dir_all(&data_dir)?;
            let logs = logging::LogDir::new(config.log_dir(), log_retention(&config));
            let _logging_guard = logging::init(&logs, &log_level)?;

            run_bot(config).await?;
        }

        Commands::Config { action } => match action {
            ConfigCommands::Validate => match load_config(cli.config) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => {
                    eprintln!("Configuration is invalid: {}", e);
                    std::process::exit(1);
                }
            },
        },

        Commands::Logs { action } => {
            let config = load_config(cli.config)?;
            let logs = logging::LogDir::new(config.log_dir(), log_retention(&config));
            match action {
                LogCommands::List => {
                    let files = logs.files()?;
                    if files.is_empty() {
                        println!("No log files in {}", config.log_dir().display());
                    }
                    for file in files {
                        let metadata = fs::metadata(&file)?;
                        let name = file
                            .file_name()
                            .map(|n| n.to_string_lossy().to_string())
                            .unwrap_or_default();
                        println!("  {} ({} bytes)", name, metadata.len());
                    }
                }
                LogCommands::Tail { lines } => {
                    let current_log = logs.current_file();
                    if current_log.exists() {
                        let content = fs::read_to_string(&current_log)?;
                        let all_lines: Vec<&str> = content.lines().collect();
                        let start = all_lines.len().saturating_sub(lines);
                        for line in &all_lines[start..] {
                            println!("{}", line);
                        }
                    } else {
                        println!("No log file found at {}", current_log.display());
                    }
                }
            }
        }

        Commands::Version => {
            println!("chatlens {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

fn log_retention(config: &Config) -> u32 {
    config
        .core
        .log_retention_days
        .unwrap_or(logging::DEFAULT_RETENTION_DAYS)
}

fn load_config(config_path: Option<String>) -> Result<Config> {
    let path = config_path.unwrap_or_else(|| {
        dirs::home_dir()
            .unwrap_or_else(|| ".".into())
            .join(".chatlens/config.toml")
            .to_string_lossy()
            .to_string()
    });
    Config::load(path)
}

async fn run_bot(config: Config) -> Result<()> {
    // Creates the schema on first run; every later access reopens the file.
    Storage::open(config.db_path())?;

    let bundle = Bundle::load().map_err(|e| anyhow!("failed to load locale bundles: {}", e))?;
    let event_bus = EventBus::new();

    let env = Arc::new(HandlerEnv::new(
        event_bus.outbound_sender(),
        bundle.clone(),
        config.db_path(),
        config.default_locale(),
        config.default_timezone(),
    ));

    let help = HelpHandler::new(env.clone());
    let mut registry = HandlerRegistry::new();
    registry.register(Arc::new(EchoHandler::new(env.clone())))?;
    registry.register(Arc::new(GotoHandler::new(env.clone())))?;
    registry.register(help.clone())?;
    registry.register(Arc::new(OptionHandler::new(env.clone())))?;
    registry.register(Arc::new(RankHandler::new(env.clone())))?;
    registry.register(Arc::new(HistoryHandler::new(env.clone())))?;
    registry.register(Arc::new(TimestatsHandler::new(env.clone())))?;
    registry.register(Arc::new(NetworkHandler::new(
        env.clone(),
        Graphviz::new(&config.graphviz.dot_path, Path::new(&config.bot.temp_dir)),
    )))?;
    match &config.nlp {
        Some(nlp) => {
            let client = Arc::new(HttpNlpClient::new(&nlp.server_url));
            registry.register(Arc::new(KeywordHandler::new(
                env.clone(),
                client,
                nlp.keyword_request_limit,
            )))?;
        }
        None => warn!("No NLP server configured, keyword command disabled"),
    }
    let registry = Arc::new(registry);
    help.attach_registry(registry.clone());

    let auth = AuthGate::new(config.chat_whitelist(), config.debug_users());
    let dispatcher = Arc::new(Dispatcher::new(auth, registry, env));
    let engine = Engine::new(event_bus.clone(), dispatcher, config.db_path());

    let adapter = Arc::new(TelegramAdapter::new(&config, bundle).with_event_bus(event_bus.clone()));
    let poll_adapter = adapter.clone();
    let outbound_receiver = event_bus.outbound_subscribe();

    info!(bot = %config.bot.bot_name, "Starting Chatlens");

    let poll_task = tokio::spawn(async move {
        if let Err(e) = poll_adapter.poll().await {
            error!("Telegram polling stopped: {}", e);
        }
    });
    let outbound_task =
        tokio::spawn(async move { adapter.run_outbound_handler(outbound_receiver).await });
    let engine_task = tokio::spawn(async move { engine.run().await });

    tokio::select! {
        _ = poll_task => error!("Polling task exited"),
        _ = outbound_task => error!("Outbound task exited"),
        _ = engine_task => error!("Engine task exited"),
    }

    Ok(())
}
