//! Telegram adapter (teloxide).
//!
//! This crate implements the `tbm-core` client ports over the Telegram Bot API.

use std::{
    sync::{Arc, OnceLock},
    time::Duration,
};

use async_trait::async_trait;
use regex::Regex;
use teloxide::prelude::*;
use tokio_util::sync::CancellationToken;

pub mod convert;
mod polling;

use tbm_core::{
    domain::{BotCommand, BotId, ChatId, Credential, MessageId, MessageRef},
    errors::Error,
    messaging::port::{BotClient, BotClientFactory, UpdateHandler},
    Result,
};

/// Extra time the HTTP client waits on top of the long-poll timeout.
const HTTP_GRACE: Duration = Duration::from_secs(10);

static TOKEN_RE: OnceLock<Regex> = OnceLock::new();

/// Bot API tokens look like `123456:AA...`.
pub fn is_valid_token(token: &str) -> bool {
    TOKEN_RE
        .get_or_init(|| Regex::new(r"^[0-9]+:[A-Za-z0-9_-]+$").expect("valid regex"))
        .is_match(token)
}

/// Builds one `TelegramClient` per bot.
#[derive(Clone, Debug)]
pub struct TelegramClientFactory {
    api_url: Option<reqwest::Url>,
    poll_timeout: Duration,
}

impl TelegramClientFactory {
    pub fn new(poll_timeout: Duration) -> Self {
        Self {
            api_url: None,
            poll_timeout,
        }
    }

    /// Point every client at a different Bot API server.
    pub fn with_api_url(mut self, url: &str) -> Result<Self> {
        let url = reqwest::Url::parse(url)
            .map_err(|e| Error::Config(format!("invalid TELEGRAM_API_URL '{url}': {e}")))?;
        self.api_url = Some(url);
        Ok(self)
    }
}

#[async_trait]
impl BotClientFactory for TelegramClientFactory {
    async fn connect(
        &self,
        bot_id: BotId,
        credential: &Credential,
    ) -> Result<Arc<dyn BotClient>> {
        let fail = |reason: String| Error::ConstructionFailed { bot_id, reason };

        if !is_valid_token(credential.expose()) {
            return Err(fail(format!("malformed bot token {credential}")));
        }

        // Long polling holds the request open for `poll_timeout`; the HTTP
        // client must outlive it.
        let http = teloxide::net::default_reqwest_settings()
            .timeout(self.poll_timeout.saturating_add(HTTP_GRACE))
            .build()
            .map_err(|e| fail(format!("http client: {e}")))?;

        let mut bot = Bot::with_client(credential.expose(), http);
        if let Some(url) = &self.api_url {
            bot = bot.set_api_url(url.clone());
        }

        Ok(Arc::new(TelegramClient::new(bot_id, bot, self.poll_timeout)))
    }
}

#[derive(Clone)]
pub struct TelegramClient {
    bot_id: BotId,
    bot: Bot,
    poll_timeout: Duration,
}

impl TelegramClient {
    pub fn new(bot_id: BotId, bot: Bot, poll_timeout: Duration) -> Self {
        Self {
            bot_id,
            bot,
            poll_timeout,
        }
    }

    pub fn bot(&self) -> Bot {
        self.bot.clone()
    }

    fn tg_chat(chat_id: ChatId) -> teloxide::types::ChatId {
        teloxide::types::ChatId(chat_id.0)
    }

    fn map_err(e: teloxide::RequestError) -> Error {
        Error::Transport(format!("telegram error: {e}"))
    }
}

#[async_trait]
impl BotClient for TelegramClient {
    async fn send_text(&self, chat_id: ChatId, text: &str) -> Result<MessageRef> {
        let msg = self
            .bot
            .send_message(Self::tg_chat(chat_id), text.to_string())
            .await
            .map_err(Self::map_err)?;

        Ok(MessageRef {
            chat_id,
            message_id: MessageId(msg.id.0),
        })
    }

    async fn set_commands(&self, commands: &[BotCommand]) -> Result<()> {
        let tg: Vec<teloxide::types::BotCommand> = commands
            .iter()
            .map(|c| teloxide::types::BotCommand::new(c.command.clone(), c.description.clone()))
            .collect();
        self.bot
            .set_my_commands(tg)
            .await
            .map_err(Self::map_err)?;
        Ok(())
    }

    async fn run_receive_loop(
        &self,
        cancel: CancellationToken,
        on_update: UpdateHandler,
    ) -> Result<()> {
        polling::run(self, cancel, on_update).await
    }
}
