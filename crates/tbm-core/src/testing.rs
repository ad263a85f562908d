//! In-process fakes for the messaging ports.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    domain::{BotCommand, BotId, ChatId, Credential, MessageId, MessageRef},
    errors::Error,
    messaging::{
        port::{BotClient, BotClientFactory, UpdateHandler},
        types::IncomingUpdate,
    },
    Result,
};

#[derive(Default)]
pub struct FakeFactory {
    pub connect_delay: Duration,
    pub fail_connect: bool,
    pub hang_commands: bool,
    pub hang_sends: bool,
    pub fail_sends: bool,
    pub connects: AtomicUsize,
    pub clients: Mutex<Vec<Arc<FakeClient>>>,
}

impl FakeFactory {
    pub fn client(&self, idx: usize) -> Arc<FakeClient> {
        self.clients.lock().unwrap()[idx].clone()
    }
}

#[async_trait]
impl BotClientFactory for FakeFactory {
    async fn connect(
        &self,
        bot_id: BotId,
        _credential: &Credential,
    ) -> Result<Arc<dyn BotClient>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }
        if self.fail_connect {
            return Err(Error::ConstructionFailed {
                bot_id,
                reason: "bad token".to_string(),
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let client = Arc::new(FakeClient {
            hang_commands: self.hang_commands,
            hang_sends: self.hang_sends,
            fail_sends: self.fail_sends,
            inbound_tx: Some(tx),
            inbound_rx: tokio::sync::Mutex::new(Some(rx)),
            ..Default::default()
        });
        self.clients.lock().unwrap().push(client.clone());
        Ok(client)
    }
}

#[derive(Default)]
pub struct FakeClient {
    pub hang_commands: bool,
    pub hang_sends: bool,
    pub fail_sends: bool,
    pub sends: Mutex<Vec<(ChatId, String)>>,
    pub commands: Mutex<Vec<Vec<BotCommand>>>,
    pub loops: AtomicUsize,
    /// Cancel to make the receive loop fail like a dead transport.
    pub broken: CancellationToken,
    inbound_tx: Option<mpsc::UnboundedSender<IncomingUpdate>>,
    inbound_rx: tokio::sync::Mutex<Option<mpsc::UnboundedReceiver<IncomingUpdate>>>,
}

impl FakeClient {
    /// Queue an update for the receive loop.
    pub fn push(&self, update: IncomingUpdate) {
        if let Some(tx) = &self.inbound_tx {
            let _ = tx.send(update);
        }
    }
}

#[async_trait]
impl BotClient for FakeClient {
    async fn send_text(&self, chat_id: ChatId, text: &str) -> Result<MessageRef> {
        let id = {
            let mut sends = self.sends.lock().unwrap();
            sends.push((chat_id, text.to_string()));
            sends.len() as i32
        };
        if self.hang_sends {
            std::future::pending::<()>().await;
        }
        if self.fail_sends {
            return Err(Error::Transport("chat not found".to_string()));
        }
        Ok(MessageRef {
            chat_id,
            message_id: MessageId(id),
        })
    }

    async fn set_commands(&self, commands: &[BotCommand]) -> Result<()> {
        if self.hang_commands {
            std::future::pending::<()>().await;
        }
        self.commands.lock().unwrap().push(commands.to_vec());
        Ok(())
    }

    async fn run_receive_loop(
        &self,
        cancel: CancellationToken,
        on_update: UpdateHandler,
    ) -> Result<()> {
        self.loops.fetch_add(1, Ordering::SeqCst);
        let mut rx = self.inbound_rx.lock().await.take();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = self.broken.cancelled() => {
                    return Err(Error::Transport("connection lost".to_string()))
                }
                upd = recv(&mut rx) => match upd {
                    Some(u) => on_update(u).await,
                    None => return Err(Error::Transport("inbound closed".to_string())),
                },
            }
        }
    }
}

async fn recv(rx: &mut Option<mpsc::UnboundedReceiver<IncomingUpdate>>) -> Option<IncomingUpdate> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Poll `cond` until it holds, panicking after two seconds.
pub async fn wait_until(cond: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !cond() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
