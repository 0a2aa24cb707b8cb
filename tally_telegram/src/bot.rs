use crate::{Command, Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tally_core::{
    CancelReport, InboundEvent, Orchestrator, QueueError, ResetOutcome, StatusReport, UserKey,
};
use teloxide::prelude::*;
use tokio::time::sleep;
use tracing::{info, warn};

/// Telegram front end over the conversation orchestrator.
#[derive(Clone)]
pub struct TallyBot {
    /// Teloxide bot instance
    pub bot: Bot,
    orchestrator: Arc<Orchestrator>,
    /// Allowed chat IDs; empty means everyone
    allowed_chats: Vec<i64>,
}

impl TallyBot {
    pub fn new(
        token: String,
        orchestrator: Arc<Orchestrator>,
        allowed_chats: &[String],
    ) -> Result<Self> {
        if token.trim().is_empty() {
            return Err(Error::Config("telegram.token is empty".to_string()));
        }

        // Parse allowed chat IDs
        let allowed_chats = allowed_chats
            .iter()
            .filter_map(|s| s.parse::<i64>().ok())
            .collect();

        Ok(Self {
            bot: Bot::new(token),
            orchestrator,
            allowed_chats,
        })
    }

    /// Check if a chat is allowed
    #[must_use]
    pub fn is_allowed(&self, chat_id: i64) -> bool {
        self.allowed_chats.is_empty() || self.allowed_chats.contains(&chat_id)
    }

    /// Orchestrator key for a Telegram chat.
    #[must_use]
    pub fn chat_key(chat_id: i64) -> UserKey {
        UserKey::from(format!("tg:{chat_id}"))
    }

    /// Run one event through the orchestrator.
    ///
    /// `None` means the turn was discarded by a concurrent /reset; the
    /// caller should stay silent rather than answer a wiped conversation.
    pub async fn process(&self, event: InboundEvent) -> Option<String> {
        match self.orchestrator.handle(event).await {
            Ok(reply) => Some(reply),
            Err(QueueError::Discarded) => None,
        }
    }

    /// Cancel the current step; `None` when a reset raced the cancel.
    pub async fn cancel(&self, chat_id: i64) -> Option<CancelReport> {
        match self.orchestrator.cancel(&Self::chat_key(chat_id)).await {
            Ok(report) => Some(report),
            Err(QueueError::Discarded) => None,
        }
    }

    #[must_use]
    pub fn reset(&self, chat_id: i64) -> ResetOutcome {
        self.orchestrator.reset(&Self::chat_key(chat_id))
    }

    #[must_use]
    pub fn status(&self, chat_id: i64) -> StatusReport {
        self.orchestrator.status(&Self::chat_key(chat_id))
    }

    /// Test connection to Telegram API with backoff retry.
    /// Starts at 2s, increases by 2s each attempt, max 10s delay.
    /// Retries indefinitely until connection succeeds.
    async fn test_connection(&self) -> Result<()> {
        const INITIAL_DELAY_SECS: u64 = 2;
        const MAX_DELAY_SECS: u64 = 10;

        let mut attempt = 1u64;
        loop {
            match self.bot.get_me().await {
                Ok(bot_user) => {
                    info!(
                        "Connected to Telegram API: @{} (id: {})",
                        bot_user
                            .user
                            .username
                            .unwrap_or_else(|| "no username".to_string()),
                        bot_user.user.id
                    );
                    return Ok(());
                }
                Err(e) => {
                    let delay_secs = (INITIAL_DELAY_SECS * attempt).min(MAX_DELAY_SECS);
                    let delay = Duration::from_secs(delay_secs);

                    warn!("Connection attempt {attempt} failed: {e}. Retrying in {delay_secs}s...");

                    // Only show detailed help on first failure
                    if attempt == 1 {
                        warn!("This may be due to:");
                        warn!("  - Network connectivity issues");
                        warn!("  - Firewall blocking api.telegram.org");
                        warn!("  - Invalid bot token");
                        warn!("  - Telegram API being temporarily unavailable");
                        warn!("  - Proxy or VPN configuration required");
                    }

                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Run the bot
    pub async fn run(self) -> Result<()> {
        use teloxide::dispatching::{Dispatcher, UpdateFilterExt};
        use teloxide::dptree;
        use teloxide::types::Update;

        // Wait out flaky networks before starting the dispatcher
        self.test_connection().await?;
        self.bot.set_my_commands(Command::bot_commands()).await?;

        let bot = self.bot.clone();

        let schema = dptree::entry().branch(Update::filter_message().endpoint({
            let bot_clone = self.clone();
            move |_bot: Bot, msg: teloxide::types::Message| {
                let bot_clone = bot_clone.clone();
                async move { crate::handler::handle_message(bot_clone, msg).await }
            }
        }));

        Dispatcher::builder(bot, schema)
            .enable_ctrlc_handler()
            .build()
            .dispatch()
            .await;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_core::FlowCatalog;

    fn bot(allow_from: &[String]) -> TallyBot {
        let orchestrator = Arc::new(Orchestrator::new(Arc::new(FlowCatalog::new())));
        TallyBot::new("123:token".to_string(), orchestrator, allow_from).unwrap()
    }

    #[test]
    fn empty_allow_list_means_everyone() {
        let bot = bot(&[]);
        assert!(bot.is_allowed(42));
        assert!(bot.is_allowed(-100_500));
    }

    #[test]
    fn allow_list_filters_unknown_chats_and_bad_entries() {
        let bot = bot(&["42".to_string(), "not a number".to_string()]);
        assert!(bot.is_allowed(42));
        assert!(!bot.is_allowed(43));
    }

    #[test]
    fn empty_token_is_rejected() {
        let orchestrator = Arc::new(Orchestrator::new(Arc::new(FlowCatalog::new())));
        assert!(TallyBot::new("  ".to_string(), orchestrator, &[]).is_err());
    }

    #[test]
    fn chat_keys_are_namespaced() {
        assert_eq!(TallyBot::chat_key(42).to_string(), "tg:42");
    }
}
