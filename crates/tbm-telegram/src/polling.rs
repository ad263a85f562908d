//! Long-polling receive loop.

use std::time::Duration;

use teloxide::{prelude::*, requests::Request, ApiError, RequestError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use tbm_core::{errors::Error, messaging::port::UpdateHandler, Result};

use crate::{convert::convert_update, TelegramClient};

/// Pause after a failed `getUpdates` before polling again.
const ERROR_PAUSE: Duration = Duration::from_secs(1);

enum PollFailure {
    /// The loop cannot continue (revoked token, another poller took over).
    Fatal(Error),
    /// Poll again after the given pause.
    Pause(Duration),
}

fn classify(e: RequestError) -> PollFailure {
    match e {
        RequestError::Api(ApiError::NotFound) => {
            PollFailure::Fatal(Error::Transport("bot token was rejected".to_string()))
        }
        RequestError::Api(ApiError::TerminatedByOtherGetUpdates) => PollFailure::Fatal(
            Error::Transport("another getUpdates consumer is running for this bot".to_string()),
        ),
        RequestError::RetryAfter(d) => PollFailure::Pause(d),
        _ => PollFailure::Pause(ERROR_PAUSE),
    }
}

pub(crate) async fn run(
    client: &TelegramClient,
    cancel: CancellationToken,
    on_update: UpdateHandler,
) -> Result<()> {
    let bot_id = client.bot_id;
    let timeout_secs = u32::try_from(client.poll_timeout.as_secs()).unwrap_or(u32::MAX);
    let mut offset: i32 = 0;

    loop {
        let req = client
            .bot
            .get_updates()
            .offset(offset)
            .timeout(timeout_secs)
            .send();

        let res = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            res = req => res,
        };

        match res {
            Ok(updates) => {
                if !updates.is_empty() {
                    debug!(bot_id = %bot_id, count = updates.len(), "received updates");
                }
                for upd in updates {
                    offset = upd.id + 1;
                    if cancel.is_cancelled() {
                        return Ok(());
                    }
                    on_update(convert_update(&upd)).await;
                }
            }
            Err(e) => {
                let reason = e.to_string();
                match classify(e) {
                    PollFailure::Fatal(err) => return Err(err),
                    PollFailure::Pause(pause) => {
                        warn!(
                            bot_id = %bot_id,
                            error = %reason,
                            pause_ms = pause.as_millis() as u64,
                            "getUpdates failed"
                        );
                        tokio::select! {
                            _ = cancel.cancelled() => return Ok(()),
                            _ = tokio::time::sleep(pause) => {}
                        }
                    }
                }
            }
        }
    }
}
