//! Market Monitor - Headless Server
//!
//! Runs the configured monitors and the Telegram command router until
//! interrupted.

mod config;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use config::{AppConfig, BOT_TOKEN_ENV};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use monitor_alerts::{CommandHandler, CommandRouter, TelegramNotifier};
use monitor_core::MonitorConfig;
use monitor_engine::{MonitorFactory, MonitorSupervisor};
use monitor_feeds::{HttpSession, SessionConfig};

/// Market Monitor CLI
#[derive(Parser, Debug)]
#[command(name = "market-monitor")]
#[command(about = "Crypto market monitors with Telegram alerts", long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Log level: trace, debug, info, warn, error (overrides the config file)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Validate the configuration, print the monitor table and exit
    #[arg(long, default_value_t = false)]
    check_config: bool,
}

fn parse_level(level: &str) -> Level {
    match level.to_ascii_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Console logging, plus a daily file under `log_dir` when set.
///
/// `RUST_LOG` takes precedence over `level`. The returned guard flushes the
/// file writer when dropped.
fn init_logging(level: &str, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::default().add_directive(LevelFilter::from_level(parse_level(level)).into())
    });

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact();

    let mut guard = None;
    let file_layer = log_dir.and_then(|dir| {
        let appender = RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix("market-monitor")
            .filename_suffix("log")
            .build(dir);
        match appender {
            Ok(appender) => {
                let (writer, worker) = tracing_appender::non_blocking(appender);
                guard = Some(worker);
                Some(
                    tracing_subscriber::fmt::layer()
                        .with_writer(writer)
                        .with_ansi(false)
                        .with_target(false),
                )
            }
            Err(e) => {
                eprintln!("Cannot log to {}: {}", dir.display(), e);
                None
            }
        }
    });

    if let Err(e) = tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
    {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
    guard
}

/// Resolve every entry and dry-build it; returns whether all are usable.
fn print_monitor_table(config: &AppConfig) -> bool {
    let factory = MonitorFactory::with_defaults();
    let mut ok = true;

    println!(
        "{:<20} {:<18} {:<8} {:>9}  {:<24} status",
        "name", "kind", "enabled", "interval", "target"
    );
    for (name, resolved) in config.monitor_configs() {
        match resolved.and_then(|cfg| factory.build(&cfg).map(|_| cfg)) {
            Ok(cfg) => {
                let target = match cfg.target.thread_id {
                    Some(thread) => format!("{}#{}", cfg.target.chat_id, thread),
                    None => cfg.target.chat_id.to_string(),
                };
                println!(
                    "{:<20} {:<18} {:<8} {:>8}s  {:<24} ok",
                    name, cfg.kind.as_str(), cfg.enabled, cfg.interval_secs, target
                );
            }
            Err(e) => {
                ok = false;
                println!("{:<20} {:<18} {:<8} {:>9}  {:<24} {}", name, "-", "-", "-", "-", e);
            }
        }
    }
    ok
}

fn monitor_configs(config: &AppConfig) -> Vec<MonitorConfig> {
    config
        .monitor_configs()
        .into_iter()
        .filter_map(|(name, resolved)| match resolved {
            Ok(cfg) => Some(cfg),
            Err(e) => {
                error!(monitor = %name, error = %e, "Invalid monitor entry, skipping");
                None
            }
        })
        .collect()
}

async fn run(config: AppConfig, token: String) -> std::io::Result<()> {
    let notifier = TelegramNotifier::new(&token);
    let bot = notifier.bot().clone();
    let adhoc = HttpSession::new(SessionConfig::new("adhoc").with_proxy(config.proxy_url.clone()));

    let supervisor = Arc::new(
        MonitorSupervisor::new(Arc::new(notifier)).with_adhoc_session(Arc::new(adhoc)),
    );

    let registered = supervisor.initialize(monitor_configs(&config));
    if registered == 0 {
        warn!("No monitors registered, only commands will be served");
    }
    supervisor.start_all();

    let shutdown = CancellationToken::new();
    let router = CommandRouter::new(bot, supervisor.clone() as Arc<dyn CommandHandler>)
        .with_allowed_chats(config.allowed_chats.clone());
    let router_handle = tokio::spawn(router.run(shutdown.clone()));

    info!("Press Ctrl+C to stop...");
    let signal = tokio::signal::ctrl_c().await;
    match &signal {
        Ok(()) => warn!("Shutdown signal received"),
        Err(e) => error!(error = %e, "Failed to listen for Ctrl+C, shutting down"),
    }

    shutdown.cancel();
    supervisor
        .shutdown_all(Duration::from_secs(config.shutdown_timeout_secs))
        .await;
    if tokio::time::timeout(Duration::from_secs(2), router_handle).await.is_err() {
        warn!("Command router did not stop in time");
    }

    info!("👋 Market Monitor stopped");
    signal
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    let config = match AppConfig::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ {}", e);
            return ExitCode::from(2);
        }
    };

    let level = args.log_level.clone().unwrap_or_else(|| config.log_level.clone());
    let _log_guard = init_logging(&level, config.log_dir.as_deref());

    if args.check_config {
        return if print_monitor_table(&config) {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        };
    }

    let token = match config.resolve_token(std::env::var(BOT_TOKEN_ENV).ok()) {
        Ok(token) => token,
        Err(e) => {
            error!(error = %e, "Cannot start the Telegram bot");
            return ExitCode::from(2);
        }
    };

    info!("🚀 Market Monitor starting...");
    info!("  Config: {}", args.config.display());
    info!("  Monitors configured: {}", config.monitors.len());
    info!("  Allowed chats: {}", config.allowed_chats.len());

    match run(config, token).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Server stopped with an error");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("debug"), Level::DEBUG);
        assert_eq!(parse_level("WARN"), Level::WARN);
        assert_eq!(parse_level("unknown"), Level::INFO);
    }

    #[test]
    fn test_args_defaults() {
        let args = Args::parse_from(["market-monitor"]);
        assert_eq!(args.config, PathBuf::from("config.json"));
        assert!(args.log_level.is_none());
        assert!(!args.check_config);

        let args = Args::parse_from(["market-monitor", "-c", "prod.json", "--check-config"]);
        assert_eq!(args.config, PathBuf::from("prod.json"));
        assert!(args.check_config);
    }

    #[test]
    fn test_invalid_entries_are_skipped() {
        let config: AppConfig = serde_json::from_value(json!({
            "chat_id": -1,
            "monitors": {
                "funding": {},
                "nonsense": {},
                "volume": { "top_n": 5 }
            }
        }))
        .unwrap();
        let names: Vec<String> = monitor_configs(&config).into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["funding", "volume"]);
        assert!(!print_monitor_table(&config));
    }
}
