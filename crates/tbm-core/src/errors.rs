use crate::domain::BotId;

/// Core error type for the bot manager.
///
/// Adapter crates should map their specific errors into this type so lifecycle
/// failures (construction, missing instance, send) are reported consistently.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("bot {bot_id}: client construction failed: {reason}")]
    ConstructionFailed { bot_id: BotId, reason: String },

    #[error("bot {0} does not exist")]
    NotFound(BotId),

    #[error("bot {0} is not started")]
    NotStarted(BotId),

    #[error("bot {0} is already running with a different credential")]
    ConflictingCredential(BotId),

    #[error("bot {bot_id}: command registration failed: {reason}")]
    CommandRegistrationFailed { bot_id: BotId, reason: String },

    #[error("bot {bot_id}: send failed: {reason}")]
    SendFailed { bot_id: BotId, reason: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
