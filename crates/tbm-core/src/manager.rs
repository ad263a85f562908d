//! Registry and lifecycle control for many concurrently running bots.
//!
//! - `start` / `stop` are serialized by one control mutex (rare, control plane)
//! - `get` / `reply_to_user` only touch the sharded registry (hot, data plane)
//! - every bot owns one background worker: command registration, then the
//!   receive loop until its cancellation token fires

use std::{fmt, sync::Arc, time::Duration};

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    domain::{default_commands, BotCommand, BotId, ChatId, Credential, MessageRef, UserId},
    errors::Error,
    messaging::port::{BotClient, BotClientFactory},
    pipeline::MessagePipeline,
    session::{SessionStore, UserSession},
    Result,
};

#[derive(Clone, Debug)]
pub struct ManagerConfig {
    /// Command menu registered for every bot on start.
    pub commands: Vec<BotCommand>,
    /// Deadline for the command registration call.
    pub command_timeout: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            commands: default_commands(),
            command_timeout: Duration::from_secs(5),
        }
    }
}

/// A registered bot: identity, credential, platform client and stop signal.
///
/// Only the manager creates instances, and only fully constructed ones are
/// ever inserted into the registry.
pub struct BotInstance {
    id: BotId,
    credential: Credential,
    client: Arc<dyn BotClient>,
    cancel: CancellationToken,
    finished: CancellationToken,
}

impl BotInstance {
    pub fn id(&self) -> BotId {
        self.id
    }

    pub fn client(&self) -> &Arc<dyn BotClient> {
        &self.client
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// True once the background worker has fully exited.
    pub fn is_finished(&self) -> bool {
        self.finished.is_cancelled()
    }

    /// Wait until the background worker has exited.
    pub async fn wait_terminated(&self) {
        self.finished.cancelled().await
    }

    fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl fmt::Debug for BotInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BotInstance")
            .field("id", &self.id)
            .field("credential", &self.credential)
            .field("cancelled", &self.is_cancelled())
            .field("finished", &self.is_finished())
            .finish()
    }
}

#[derive(Clone)]
pub struct BotManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    cfg: ManagerConfig,
    factory: Arc<dyn BotClientFactory>,
    bots: DashMap<BotId, Arc<BotInstance>>,
    control: Mutex<()>,
    sessions: Arc<SessionStore<UserSession>>,
}

impl BotManager {
    pub fn new(factory: Arc<dyn BotClientFactory>, cfg: ManagerConfig) -> Self {
        Self::with_sessions(factory, cfg, Arc::new(SessionStore::new()))
    }

    pub fn with_sessions(
        factory: Arc<dyn BotClientFactory>,
        cfg: ManagerConfig,
        sessions: Arc<SessionStore<UserSession>>,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                cfg,
                factory,
                bots: DashMap::new(),
                control: Mutex::new(()),
                sessions,
            }),
        }
    }

    pub fn sessions(&self) -> &Arc<SessionStore<UserSession>> {
        &self.inner.sessions
    }

    /// Start a bot, or return the running instance for `bot_id`.
    ///
    /// Returns as soon as the instance is registered; command registration and
    /// the receive loop run on a background task.
    pub async fn start(&self, bot_id: BotId, credential: Credential) -> Result<Arc<BotInstance>> {
        let _guard = self.inner.control.lock().await;

        if let Some(existing) = self.inner.bots.get(&bot_id).map(|e| e.value().clone()) {
            if !existing.is_cancelled() {
                if existing.credential != credential {
                    warn!(bot_id = %bot_id, "start rejected: bot runs with a different credential");
                    return Err(Error::ConflictingCredential(bot_id));
                }
                debug!(bot_id = %bot_id, "bot already running");
                return Ok(existing);
            }
            // Worker died on its own and has not evicted itself yet.
            self.inner.bots.remove(&bot_id);
        }

        let cancel = CancellationToken::new();
        let client = match self.inner.factory.connect(bot_id, &credential).await {
            Ok(c) => c,
            Err(e) => {
                cancel.cancel();
                warn!(bot_id = %bot_id, error = %e, "failed to create bot client");
                return Err(match e {
                    Error::ConstructionFailed { .. } => e,
                    other => Error::ConstructionFailed {
                        bot_id,
                        reason: other.to_string(),
                    },
                });
            }
        };

        let instance = Arc::new(BotInstance {
            id: bot_id,
            credential,
            client,
            cancel,
            finished: CancellationToken::new(),
        });
        self.inner.bots.insert(bot_id, instance.clone());

        tokio::spawn(self.clone().run_worker(instance.clone()));
        info!(bot_id = %bot_id, credential = %instance.credential, "bot registered");

        Ok(instance)
    }

    /// Cancel and unregister a bot. Does not wait for its worker to exit.
    pub async fn stop(&self, bot_id: BotId) -> Result<()> {
        self.take(bot_id).await.map(|_| ())
    }

    /// Like `stop`, then wait for the worker to finish unwinding.
    pub async fn stop_and_wait(&self, bot_id: BotId) -> Result<()> {
        let instance = self.take(bot_id).await?;
        instance.wait_terminated().await;
        Ok(())
    }

    async fn take(&self, bot_id: BotId) -> Result<Arc<BotInstance>> {
        let _guard = self.inner.control.lock().await;

        let Some(instance) = self.inner.bots.get(&bot_id).map(|e| e.value().clone()) else {
            return Err(Error::NotFound(bot_id));
        };
        let was_live = !instance.is_cancelled();
        instance.cancel();
        self.inner.bots.remove(&bot_id);

        if !was_live {
            return Err(Error::NotFound(bot_id));
        }
        info!(bot_id = %bot_id, "bot stopped");
        Ok(instance)
    }

    /// Registry lookup. Never blocks behind `start` / `stop`.
    pub fn get(&self, bot_id: BotId) -> Option<Arc<BotInstance>> {
        self.inner
            .bots
            .get(&bot_id)
            .map(|e| e.value().clone())
            .filter(|i| !i.is_cancelled())
    }

    pub fn bot_ids(&self) -> Vec<BotId> {
        let mut ids: Vec<BotId> = self
            .inner
            .bots
            .iter()
            .filter(|e| !e.value().is_cancelled())
            .map(|e| *e.key())
            .collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.bot_ids().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Best-effort: bounded by the configured deadline and by the bot's own
    /// cancellation.
    pub async fn register_commands(
        &self,
        instance: &BotInstance,
        commands: &[BotCommand],
    ) -> Result<()> {
        let bot_id = instance.id;
        let timeout = self.inner.cfg.command_timeout;
        let fail = |reason: String| Error::CommandRegistrationFailed { bot_id, reason };

        tokio::select! {
            res = tokio::time::timeout(timeout, instance.client.set_commands(commands)) => match res {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(fail(e.to_string())),
                Err(_) => Err(fail(format!("timed out after {}ms", timeout.as_millis()))),
            },
            _ = instance.cancel.cancelled() => Err(fail("bot stopped".to_string())),
        }
    }

    /// Send `text` to a user's private chat through bot `bot_id`.
    ///
    /// The send is abandoned if the bot is stopped while it is in flight.
    pub async fn reply_to_user(
        &self,
        bot_id: BotId,
        user_id: UserId,
        text: &str,
    ) -> Result<MessageRef> {
        let Some(instance) = self.get(bot_id) else {
            return Err(Error::NotStarted(bot_id));
        };

        tokio::select! {
            res = instance.client.send_text(ChatId::from(user_id), text) => {
                res.map_err(|e| Error::SendFailed { bot_id, reason: e.to_string() })
            }
            _ = instance.cancel.cancelled() => Err(Error::SendFailed {
                bot_id,
                reason: "bot stopped during send".to_string(),
            }),
        }
    }

    /// Stop every bot and wait for all workers to exit.
    pub async fn shutdown(&self) {
        let instances: Vec<Arc<BotInstance>> = {
            let _guard = self.inner.control.lock().await;
            let all: Vec<_> = self.inner.bots.iter().map(|e| e.value().clone()).collect();
            for inst in &all {
                inst.cancel();
            }
            self.inner.bots.clear();
            all
        };

        info!(count = instances.len(), "shutting down bots");
        for inst in instances {
            inst.wait_terminated().await;
        }
    }

    async fn run_worker(self, instance: Arc<BotInstance>) {
        let _finished = instance.finished.clone().drop_guard();
        let bot_id = instance.id;

        match self
            .register_commands(&instance, &self.inner.cfg.commands)
            .await
        {
            Ok(()) => info!(bot_id = %bot_id, "commands registered"),
            Err(e) => warn!(bot_id = %bot_id, error = %e, "continuing without commands"),
        }

        if instance.is_cancelled() {
            return;
        }

        info!(bot_id = %bot_id, "bot started");
        let handler = MessagePipeline::new(self.clone()).handler(bot_id);
        let res = instance
            .client
            .run_receive_loop(instance.cancel.clone(), handler)
            .await;

        if instance.is_cancelled() {
            debug!(bot_id = %bot_id, "receive loop exited after stop");
            return;
        }

        match res {
            Ok(()) => error!(bot_id = %bot_id, "receive loop ended unexpectedly; bot stopped"),
            Err(e) => error!(bot_id = %bot_id, error = %e, "receive loop failed; bot stopped"),
        }
        self.evict(&instance).await;
    }

    /// Drop a dead instance, unless it was already replaced.
    async fn evict(&self, instance: &Arc<BotInstance>) {
        instance.cancel();
        let _guard = self.inner.control.lock().await;
        self.inner
            .bots
            .remove_if(&instance.id, |_, cur| Arc::ptr_eq(cur, instance));
    }
}
