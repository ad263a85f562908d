use std::{env, fs, path::Path, time::Duration};

use crate::{
    domain::{default_commands, BotCommand, BotId, Credential, UserId},
    errors::Error,
    manager::ManagerConfig,
    Result,
};

/// Telegram holds a `getUpdates` request open for at most 50 seconds.
const MAX_POLL_TIMEOUT_SECS: u64 = 50;

/// One bot the process should start at boot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BotSpec {
    pub id: BotId,
    pub credential: Credential,
}

/// Periodic proactive message sent through one of the configured bots.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnnounceConfig {
    pub bot_id: BotId,
    pub user_id: UserId,
    pub text: String,
    pub interval: Duration,
}

/// Typed configuration, read from the environment (and an optional `.env`).
#[derive(Clone, Debug)]
pub struct Config {
    pub bots: Vec<BotSpec>,
    pub commands: Vec<BotCommand>,
    pub command_timeout: Duration,

    // Telegram transport
    pub api_url: Option<String>,
    pub poll_timeout: Duration,

    pub announce: Option<AnnounceConfig>,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        // Bots: TBM_BOTS wins; single-bot shorthand otherwise.
        let mut bots = match env_str("TBM_BOTS").and_then(non_empty) {
            Some(raw) => parse_bots(&raw)?,
            None => Vec::new(),
        };
        if let Some(token) = env_str("TELEGRAM_BOT_TOKEN").and_then(non_empty) {
            let id = match env_i64("TELEGRAM_BOT_ID") {
                Some(id) => BotId(id),
                None => bot_id_from_token(&token).ok_or_else(|| {
                    Error::Config(
                        "TELEGRAM_BOT_ID is required when the token has no numeric prefix"
                            .to_string(),
                    )
                })?,
            };
            if !bots.iter().any(|b| b.id == id) {
                bots.push(BotSpec {
                    id,
                    credential: Credential::new(token),
                });
            }
        }
        if bots.is_empty() {
            return Err(Error::Config(
                "TBM_BOTS or TELEGRAM_BOT_TOKEN environment variable is required".to_string(),
            ));
        }

        let commands = match env_str("TBM_COMMANDS").and_then(non_empty) {
            Some(raw) => parse_commands(&raw)?,
            None => default_commands(),
        };
        let command_timeout =
            Duration::from_millis(env_u64("TBM_COMMAND_TIMEOUT_MS").unwrap_or(5_000));

        let api_url = env_str("TELEGRAM_API_URL").and_then(non_empty);
        let poll_timeout = clamp_poll_timeout(env_u64("TBM_POLL_TIMEOUT_SECS").unwrap_or(30));

        let announce = match env_i64("TBM_ANNOUNCE_USER_ID") {
            Some(user_id) => {
                let bot_id = env_i64("TBM_ANNOUNCE_BOT_ID")
                    .map(BotId)
                    .unwrap_or(bots[0].id);
                if !bots.iter().any(|b| b.id == bot_id) {
                    return Err(Error::Config(format!(
                        "TBM_ANNOUNCE_BOT_ID {bot_id} is not a configured bot"
                    )));
                }
                let interval = env_u64("TBM_ANNOUNCE_INTERVAL_SECS").unwrap_or(60).max(1);
                Some(AnnounceConfig {
                    bot_id,
                    user_id: UserId(user_id),
                    text: env_str("TBM_ANNOUNCE_TEXT")
                        .and_then(non_empty)
                        .unwrap_or_else(|| "Hello! I'm a bot.".to_string()),
                    interval: Duration::from_secs(interval),
                })
            }
            None => None,
        };

        Ok(Self {
            bots,
            commands,
            command_timeout,
            api_url,
            poll_timeout,
            announce,
        })
    }

    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            commands: self.commands.clone(),
            command_timeout: self.command_timeout,
        }
    }
}

/// Parse `id=token,id=token`.
pub fn parse_bots(raw: &str) -> Result<Vec<BotSpec>> {
    let mut out: Vec<BotSpec> = Vec::new();
    for item in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let Some((id, token)) = item.split_once('=') else {
            return Err(Error::Config(format!(
                "TBM_BOTS entry must look like <bot_id>=<token>, got {}",
                redact_entry(item)
            )));
        };
        let id = id
            .trim()
            .parse::<i64>()
            .map_err(|_| {
                Error::Config(format!("TBM_BOTS: invalid bot id '{}'", redact_entry(id.trim())))
            })?;
        let token = token.trim();
        if token.is_empty() {
            return Err(Error::Config(format!("TBM_BOTS: empty token for bot {id}")));
        }
        if out.iter().any(|b| b.id.0 == id) {
            return Err(Error::Config(format!("TBM_BOTS: duplicate bot id {id}")));
        }
        out.push(BotSpec {
            id: BotId(id),
            credential: Credential::new(token),
        });
    }
    Ok(out)
}

/// Parse `name:description,name:description`. A leading `/` is dropped.
pub fn parse_commands(raw: &str) -> Result<Vec<BotCommand>> {
    let mut out = Vec::new();
    for item in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (name, desc) = item.split_once(':').ok_or_else(|| {
            Error::Config(format!(
                "TBM_COMMANDS entry must look like <name>:<description>, got '{item}'"
            ))
        })?;
        let name = name.trim().trim_start_matches('/');
        let desc = desc.trim();
        if name.is_empty() || desc.is_empty() {
            return Err(Error::Config(format!(
                "TBM_COMMANDS entry has an empty name or description: '{item}'"
            )));
        }
        out.push(BotCommand::new(name, desc));
    }
    Ok(out)
}

pub fn clamp_poll_timeout(secs: u64) -> Duration {
    Duration::from_secs(secs.min(MAX_POLL_TIMEOUT_SECS))
}

/// Bot tokens are `<bot_id>:<secret>`.
pub fn bot_id_from_token(token: &str) -> Option<BotId> {
    let (prefix, _) = token.split_once(':')?;
    prefix.trim().parse::<i64>().ok().map(BotId)
}

fn redact_entry(item: &str) -> String {
    format!("{}", Credential::new(item))
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_i64(key: &str) -> Option<i64> {
    env_str(key).and_then(|s| s.trim().parse::<i64>().ok())
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
