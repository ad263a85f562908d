use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};

use tbm_core::{
    config::{AnnounceConfig, Config},
    BotManager,
};
use tbm_telegram::TelegramClientFactory;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tbm_core::logging::init("tbm")?;

    let cfg = Config::load().context("failed to load configuration")?;

    let mut factory = TelegramClientFactory::new(cfg.poll_timeout);
    if let Some(url) = &cfg.api_url {
        factory = factory.with_api_url(url)?;
    }
    let manager = BotManager::new(Arc::new(factory), cfg.manager_config());

    for spec in &cfg.bots {
        match manager.start(spec.id, spec.credential.clone()).await {
            Ok(_) => info!(bot_id = %spec.id, "bot launched"),
            Err(e) => error!(bot_id = %spec.id, error = %e, "failed to launch bot"),
        }
    }
    if manager.is_empty() {
        anyhow::bail!("no bot could be started");
    }

    let announcer = cfg
        .announce
        .clone()
        .map(|a| tokio::spawn(announce_loop(manager.clone(), a)));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutdown requested");

    if let Some(handle) = announcer {
        handle.abort();
    }
    manager.shutdown().await;
    info!("all bots stopped");

    Ok(())
}

/// Periodically push a fixed message to one user.
async fn announce_loop(manager: BotManager, cfg: AnnounceConfig) {
    let mut ticker = tokio::time::interval(cfg.interval);
    // The first tick completes immediately; wait a full interval first.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        if let Err(e) = manager
            .reply_to_user(cfg.bot_id, cfg.user_id, &cfg.text)
            .await
        {
            warn!(bot_id = %cfg.bot_id, user_id = %cfg.user_id, error = %e, "announcement failed");
        }
    }
}
