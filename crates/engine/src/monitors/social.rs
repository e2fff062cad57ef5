//! New posts from followed social accounts.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use monitor_alerts::{escape_html, truncate_chars};
use monitor_core::{positive, MonitorConfig, MonitorError, MonitorResult, Settings};
use monitor_feeds::{Post, TwitterApi};
use tracing::{debug, info, warn};

use crate::monitor::{lock, CheckOutcome, Monitor, MonitorContext, MonitorCore};

pub struct SocialPostMonitor {
    core: MonitorCore,
    api: TwitterApi,
    /// Newest post id seen per account.
    last_seen: Mutex<HashMap<String, u64>>,
}

impl SocialPostMonitor {
    pub fn new(config: &MonitorConfig) -> MonitorResult<Self> {
        Self::with_api(config, TwitterApi::default())
    }

    pub fn with_api(config: &MonitorConfig, api: TwitterApi) -> MonitorResult<Self> {
        let schema = Settings::new(&config.name, config.enabled, config.interval_secs)
            .text("bearer_token", "")
            .secret()
            .int("max_results", 5)
            .validate_with(positive)
            .bool("announce_backlog", false)
            .int("text_limit", 4000)
            .validate_with(positive);

        Ok(Self {
            core: MonitorCore::new(config, schema)?,
            api,
            last_seen: Mutex::new(HashMap::new()),
        })
    }

    pub fn build(config: &MonitorConfig) -> MonitorResult<Arc<dyn Monitor>> {
        Ok(Arc::new(Self::new(config)?))
    }

    /// Posts newer than the last seen one, oldest first. Primes the account on first sight.
    fn unseen(&self, account: &str, posts: Vec<Post>, announce_backlog: bool) -> Vec<Post> {
        let Some(newest) = posts.iter().map(Post::numeric_id).max() else {
            return Vec::new();
        };

        let mut last_seen = lock(&self.last_seen);
        let previous = last_seen.get(account).copied();
        if previous.map_or(true, |p| newest > p) {
            last_seen.insert(account.to_string(), newest);
        }

        let mut fresh: Vec<Post> = match previous {
            Some(seen) => posts.into_iter().filter(|p| p.numeric_id() > seen).collect(),
            None if announce_backlog => posts,
            None => {
                debug!(monitor = %self.core.name(), account = account, newest = newest, "Primed last seen post");
                Vec::new()
            }
        };
        fresh.sort_by_key(Post::numeric_id);
        fresh
    }
}

fn format_post(account: &str, post: &Post, text_limit: usize) -> String {
    format!(
        "🐦 <b>New post</b> from <code>{}</code>\n\n{}\n\n🔗 <a href=\"{}\">Open post</a>",
        escape_html(account),
        escape_html(&truncate_chars(&post.text, text_limit)),
        post.url()
    )
}

#[async_trait]
impl Monitor for SocialPostMonitor {
    fn core(&self) -> &MonitorCore {
        &self.core
    }

    async fn check(&self, ctx: &MonitorContext) -> MonitorResult<CheckOutcome> {
        let settings = self.core.settings();
        let token = settings.get_text("bearer_token").trim();
        if token.is_empty() {
            return Err(MonitorError::InvalidValue {
                key: "bearer_token".to_string(),
                reason: "no bearer token configured".to_string(),
            });
        }
        let max_results = u32::try_from(settings.get_u64("max_results")).unwrap_or(5);
        let text_limit = settings.get_u64("text_limit") as usize;
        let announce_backlog = settings.get_bool("announce_backlog");

        let mut sent = 0usize;
        let mut failure = None;
        for account in self.core.watchlist().iter() {
            let since = lock(&self.last_seen).get(account).map(u64::to_string);
            let posts = match self
                .api
                .recent_posts(ctx.session.as_ref(), token, account, max_results, since.as_deref())
                .await
            {
                Ok(posts) => posts,
                Err(e) => {
                    warn!(monitor = %self.core.name(), account = account, error = %e, "Timeline fetch failed");
                    failure = Some(e);
                    continue;
                }
            };

            for post in self.unseen(account, posts, announce_backlog) {
                ctx.notifier
                    .send_message(ctx.target, &format_post(account, &post, text_limit))
                    .await?;
                sent += 1;
            }
        }

        if sent > 0 {
            info!(monitor = %self.core.name(), posts = sent, "New posts sent");
        }
        match failure {
            Some(e) if sent == 0 => Err(e.into()),
            _ => Ok(CheckOutcome::alerted(sent)),
        }
    }

    fn status_details(&self) -> Vec<String> {
        vec![format!("primed accounts: <code>{}</code>", lock(&self.last_seen).len())]
    }

    fn add_to_watchlist(&self, item: &str) -> MonitorResult<String> {
        self.core.watchlist_add(item)
    }

    fn remove_from_watchlist(&self, item: &str) -> MonitorResult<String> {
        let reply = self.core.watchlist_remove(item)?;
        lock(&self.last_seen).remove(&item.trim().to_uppercase());
        Ok(reply)
    }
}
