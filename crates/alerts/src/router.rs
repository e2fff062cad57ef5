//! Inbound chat commands.

use std::sync::Arc;

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::ParseMode;
use teloxide::utils::command::BotCommands;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::format::{escape_html, split_text, MAX_MESSAGE_LEN};

/// Bot commands.
#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase", description = "Available commands:")]
pub enum Command {
    #[command(description = "Show help")]
    Help,
    #[command(description = "Monitor status. Usage: /status [name]")]
    Status(String),
    #[command(
        description = "Monitor settings. Usage: /config <name> [get | set <key> <value> | add <item> | remove <item>]"
    )]
    Config(String),
    #[command(description = "Run a monitor now. Usage: /check <name>")]
    Check(String),
    #[command(description = "Run the funding rate monitor now")]
    Funding,
    #[command(description = "Account position report. Usage: /position [days]")]
    Position(String),
    #[command(description = "Snapshot of one contract. Usage: /symbol BTCUSDT")]
    Symbol(String),
}

/// Backend answering commands; implemented by the monitor supervisor.
///
/// Every method returns the reply text (HTML). Errors are rendered into the
/// reply, never propagated to the transport.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn status(&self, name: Option<&str>) -> String;
    async fn config(&self, args: &str) -> String;
    async fn check(&self, name: &str) -> String;
    async fn funding(&self) -> String;
    async fn position(&self, args: &str) -> String;
    async fn symbol(&self, symbol: &str) -> String;
}

/// Map a parsed command to its reply.
pub async fn handle_command(handler: &dyn CommandHandler, command: Command) -> String {
    match command {
        Command::Help => escape_html(&Command::descriptions().to_string()),
        Command::Status(name) => {
            let name = name.trim();
            handler
                .status(if name.is_empty() { None } else { Some(name) })
                .await
        }
        Command::Config(args) => handler.config(args.trim()).await,
        Command::Check(name) => match name.trim() {
            "" => "Usage: /check &lt;name&gt;".to_string(),
            name => handler.check(name).await,
        },
        Command::Funding => handler.funding().await,
        Command::Position(args) => handler.position(args.trim()).await,
        Command::Symbol(symbol) => match symbol.trim() {
            "" => "Usage: /symbol &lt;SYMBOL&gt;".to_string(),
            symbol => handler.symbol(symbol).await,
        },
    }
}

fn is_allowed(allowed: &[i64], chat_id: i64) -> bool {
    allowed.is_empty() || allowed.contains(&chat_id)
}

/// Long-polling command dispatcher.
pub struct CommandRouter {
    bot: Bot,
    handler: Arc<dyn CommandHandler>,
    allowed_chats: Vec<i64>,
}

impl CommandRouter {
    pub fn new(bot: Bot, handler: Arc<dyn CommandHandler>) -> Self {
        Self {
            bot,
            handler,
            allowed_chats: Vec::new(),
        }
    }

    /// Restrict commands to these chats; empty accepts every chat.
    pub fn with_allowed_chats(mut self, chats: Vec<i64>) -> Self {
        self.allowed_chats = chats;
        self
    }

    /// Run until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        let handler = self.handler;
        let allowed = Arc::new(self.allowed_chats);

        let schema = Update::filter_message()
            .filter(move |msg: Message| {
                let ok = is_allowed(&allowed, msg.chat.id.0);
                if !ok {
                    debug!(chat_id = msg.chat.id.0, "Ignoring command from unlisted chat");
                }
                ok
            })
            .filter_command::<Command>()
            .endpoint(move |bot: Bot, msg: Message, cmd: Command| {
                let handler = Arc::clone(&handler);
                async move { reply(bot, msg, handler.as_ref(), cmd).await }
            });

        let mut dispatcher = Dispatcher::builder(self.bot, schema)
            .default_handler(|_| async {})
            .build();

        let token = dispatcher.shutdown_token();
        tokio::spawn(async move {
            shutdown.cancelled().await;
            // Err only when the dispatcher is not running yet or already stopping
            match token.shutdown() {
                Ok(done) => done.await,
                Err(e) => debug!(error = %e, "Dispatcher shutdown skipped"),
            }
        });

        info!("Command router started");
        dispatcher.dispatch().await;
        info!("Command router stopped");
    }
}

async fn reply(
    bot: Bot,
    msg: Message,
    handler: &dyn CommandHandler,
    cmd: Command,
) -> Result<(), teloxide::RequestError> {
    debug!(chat_id = msg.chat.id.0, command = ?cmd, "Command received");
    let text = handle_command(handler, cmd).await;

    for part in split_text(&text, MAX_MESSAGE_LEN) {
        let mut request = bot
            .send_message(msg.chat.id, part)
            .parse_mode(ParseMode::Html);
        if let Some(thread) = msg.thread_id {
            request = request.message_thread_id(thread);
        }
        if let Err(e) = request.await {
            warn!(chat_id = msg.chat.id.0, error = %e, "Failed to send command reply");
            return Err(e);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Echo {
        calls: Mutex<Vec<String>>,
    }

    impl Echo {
        fn record(&self, call: String) -> String {
            self.calls.lock().unwrap().push(call.clone());
            call
        }
    }

    #[async_trait]
    impl CommandHandler for Echo {
        async fn status(&self, name: Option<&str>) -> String {
            self.record(format!("status:{:?}", name))
        }
        async fn config(&self, args: &str) -> String {
            self.record(format!("config:{}", args))
        }
        async fn check(&self, name: &str) -> String {
            self.record(format!("check:{}", name))
        }
        async fn funding(&self) -> String {
            self.record("funding".to_string())
        }
        async fn position(&self, args: &str) -> String {
            self.record(format!("position:{}", args))
        }
        async fn symbol(&self, symbol: &str) -> String {
            self.record(format!("symbol:{}", symbol))
        }
    }

    fn parse(text: &str) -> Command {
        Command::parse(text, "monitor_bot").unwrap()
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse("/status"), Command::Status(String::new()));
        assert_eq!(parse("/status funding_rate"), Command::Status("funding_rate".into()));
        assert_eq!(
            parse("/config funding_rate set threshold 0.002"),
            Command::Config("funding_rate set threshold 0.002".into())
        );
        assert_eq!(parse("/position 7"), Command::Position("7".into()));
        assert_eq!(parse("/funding"), Command::Funding);
        assert!(Command::parse("/unknown", "monitor_bot").is_err());
    }

    #[tokio::test]
    async fn test_dispatch_to_handler() {
        let echo = Echo::default();
        assert_eq!(handle_command(&echo, parse("/status")).await, "status:None");
        assert_eq!(
            handle_command(&echo, parse("/status  oi ")).await,
            "status:Some(\"oi\")"
        );
        assert_eq!(handle_command(&echo, parse("/symbol btcusdt")).await, "symbol:btcusdt");
        assert_eq!(handle_command(&echo, parse("/position")).await, "position:");
    }

    #[tokio::test]
    async fn test_missing_argument_usage() {
        let echo = Echo::default();
        let reply = handle_command(&echo, parse("/check")).await;
        assert!(reply.starts_with("Usage"));
        assert!(echo.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_help_is_html_safe() {
        let help = handle_command(&Echo::default(), Command::Help).await;
        assert!(help.contains("/status"));
        assert!(!help.contains("<name>"));
    }

    #[test]
    fn test_allowed_chats() {
        assert!(is_allowed(&[], 5));
        assert!(is_allowed(&[5, 6], 6));
        assert!(!is_allowed(&[5], 7));
    }
}
