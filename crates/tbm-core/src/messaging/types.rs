use serde::Serialize;

use crate::domain::{BotId, ChatId, UserId};

/// Cross-messenger inbound update.
///
/// Telegram-specific fields stay in the adapter; only `raw` carries the
/// original payload for logging.
#[derive(Clone, Debug)]
pub struct IncomingUpdate {
    pub update_id: i64,
    /// `None` for updates that are not messages (callbacks, edits, polls, ...).
    pub message: Option<IncomingMessage>,
    pub raw: serde_json::Value,
}

#[derive(Clone, Debug)]
pub struct IncomingMessage {
    pub chat_id: ChatId,
    /// Absent for channel posts.
    pub from: Option<UserId>,
    pub text: Option<String>,
    pub kind: MessageKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    File,
    Other,
}

/// Unified view of one inbound message, addressed to a specific bot.
#[derive(Clone, Debug, Serialize)]
pub struct InboundMessage {
    pub from_user: Option<UserId>,
    pub to_bot: BotId,
    pub content: String,
    pub kind: MessageKind,
    pub raw: serde_json::Value,
}

impl InboundMessage {
    /// Returns `None` when the update carries no message payload.
    pub fn from_update(bot_id: BotId, update: &IncomingUpdate) -> Option<Self> {
        let msg = update.message.as_ref()?;
        Some(Self {
            from_user: msg.from,
            to_bot: bot_id,
            content: msg.text.clone().unwrap_or_default(),
            kind: msg.kind,
            raw: update.raw.clone(),
        })
    }
}
