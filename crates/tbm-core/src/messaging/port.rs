use std::{future::Future, pin::Pin, sync::Arc};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{
    domain::{BotCommand, BotId, ChatId, Credential, MessageRef},
    messaging::types::IncomingUpdate,
    Result,
};

pub type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Callback the receive loop invokes for every inbound update.
pub type UpdateHandler = Arc<dyn Fn(IncomingUpdate) -> BoxFuture + Send + Sync>;

/// Builds a platform client for one bot credential.
#[async_trait]
pub trait BotClientFactory: Send + Sync {
    async fn connect(&self, bot_id: BotId, credential: &Credential)
        -> Result<Arc<dyn BotClient>>;
}

/// Connection to the messaging platform, owned by exactly one bot instance.
///
/// Implementations must be internally synchronized: sends may run concurrently
/// with the receive loop.
#[async_trait]
pub trait BotClient: Send + Sync {
    async fn send_text(&self, chat_id: ChatId, text: &str) -> Result<MessageRef>;

    async fn set_commands(&self, commands: &[BotCommand]) -> Result<()>;

    /// Pull updates until `cancel` fires.
    ///
    /// Returns `Ok(())` on cancellation and `Err` when the transport can no
    /// longer make progress. Updates are handed to `on_update` one at a time,
    /// in arrival order.
    async fn run_receive_loop(
        &self,
        cancel: CancellationToken,
        on_update: UpdateHandler,
    ) -> Result<()>;
}
