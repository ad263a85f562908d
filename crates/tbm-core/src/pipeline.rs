use std::sync::Arc;

use tracing::{debug, warn};

use crate::{
    domain::{BotId, MessageRef},
    manager::BotManager,
    messaging::{
        port::{BoxFuture, UpdateHandler},
        types::{InboundMessage, IncomingUpdate},
    },
    session::UserSession,
    Result,
};

/// Per-bot dispatch from inbound updates to outbound sends.
///
/// The business action is an echo: a non-empty text message is sent back to
/// its sender, once, through the same bot.
#[derive(Clone)]
pub struct MessagePipeline {
    manager: BotManager,
}

impl MessagePipeline {
    pub fn new(manager: BotManager) -> Self {
        Self { manager }
    }

    /// Returns the sent reply, or `None` when the update needed no reply.
    pub async fn handle_update(
        &self,
        bot_id: BotId,
        update: IncomingUpdate,
    ) -> Result<Option<MessageRef>> {
        let Some(msg) = InboundMessage::from_update(bot_id, &update) else {
            return Ok(None);
        };
        debug!(
            bot_id = %bot_id,
            update_id = update.update_id,
            kind = ?msg.kind,
            raw = %msg.raw,
            "inbound message"
        );

        let Some(user_id) = msg.from_user else {
            return Ok(None);
        };

        let now_ms = chrono::Utc::now().timestamp_millis();
        self.manager.sessions().update(user_id, |prev| {
            UserSession::record(prev, bot_id, &msg.content, now_ms)
        });

        if msg.content.is_empty() {
            return Ok(None);
        }

        let sent = self
            .manager
            .reply_to_user(bot_id, user_id, &msg.content)
            .await?;
        Ok(Some(sent))
    }

    /// Callback for a bot's receive loop. Per-update errors are logged, never
    /// propagated, so one bad update cannot end the loop.
    pub fn handler(&self, bot_id: BotId) -> UpdateHandler {
        let pipeline = self.clone();
        Arc::new(move |update: IncomingUpdate| -> BoxFuture {
            let pipeline = pipeline.clone();
            Box::pin(async move {
                if let Err(e) = pipeline.handle_update(bot_id, update).await {
                    warn!(bot_id = %bot_id, error = %e, "failed to handle update");
                }
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::{ChatId, Credential, UserId},
        errors::Error,
        manager::ManagerConfig,
        messaging::types::{IncomingMessage, MessageKind},
        testing::{wait_until, FakeFactory},
    };

    fn text_update(id: i64, from: i64, text: &str) -> IncomingUpdate {
        IncomingUpdate {
            update_id: id,
            message: Some(IncomingMessage {
                chat_id: ChatId(from),
                from: Some(UserId(from)),
                text: Some(text.to_string()),
                kind: MessageKind::Text,
            }),
            raw: serde_json::json!({ "update_id": id }),
        }
    }

    async fn started() -> (BotManager, Arc<FakeFactory>) {
        let factory = Arc::new(FakeFactory::default());
        let mgr = BotManager::new(factory.clone(), ManagerConfig::default());
        mgr.start(BotId(1), Credential::new("1:secret"))
            .await
            .unwrap();
        (mgr, factory)
    }

    #[tokio::test]
    async fn echoes_text_once_through_receive_loop() {
        let (_mgr, factory) = started().await;
        let client = factory.client(0);

        client.push(text_update(1, 42, "hi"));
        wait_until(|| !client.sends.lock().unwrap().is_empty()).await;
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;

        assert_eq!(
            client.sends.lock().unwrap().as_slice(),
            &[(ChatId(42), "hi".to_string())]
        );
    }

    #[tokio::test]
    async fn empty_text_sends_nothing() {
        let (mgr, factory) = started().await;
        let pipeline = MessagePipeline::new(mgr);

        let out = pipeline
            .handle_update(BotId(1), text_update(1, 42, ""))
            .await
            .unwrap();
        assert!(out.is_none());
        assert!(factory.client(0).sends.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_without_message_is_ignored() {
        let (mgr, factory) = started().await;
        let pipeline = MessagePipeline::new(mgr.clone());

        let upd = IncomingUpdate {
            update_id: 9,
            message: None,
            raw: serde_json::Value::Null,
        };
        assert!(pipeline.handle_update(BotId(1), upd).await.unwrap().is_none());
        assert!(factory.client(0).sends.lock().unwrap().is_empty());
        assert!(mgr.sessions().is_empty());
    }

    #[tokio::test]
    async fn message_without_sender_is_ignored() {
        let (mgr, factory) = started().await;
        let pipeline = MessagePipeline::new(mgr);

        let mut upd = text_update(3, 42, "channel post");
        if let Some(m) = upd.message.as_mut() {
            m.from = None;
        }
        assert!(pipeline.handle_update(BotId(1), upd).await.unwrap().is_none());
        assert!(factory.client(0).sends.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn reply_errors_reach_the_caller() {
        let (mgr, _factory) = started().await;
        let pipeline = MessagePipeline::new(mgr.clone());
        mgr.stop(BotId(1)).await.unwrap();

        let err = pipeline
            .handle_update(BotId(1), text_update(1, 42, "hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotStarted(BotId(1))));
    }

    #[tokio::test]
    async fn records_user_session() {
        let (mgr, _factory) = started().await;
        let pipeline = MessagePipeline::new(mgr.clone());

        pipeline
            .handle_update(BotId(1), text_update(1, 42, "first"))
            .await
            .unwrap();
        pipeline
            .handle_update(BotId(1), text_update(2, 42, "second"))
            .await
            .unwrap();

        let s = mgr.sessions().load(UserId(42)).unwrap();
        assert_eq!(s.bot_id, Some(BotId(1)));
        assert_eq!(s.last_text.as_deref(), Some("second"));
        assert_eq!(s.message_count, 2);
    }
}
