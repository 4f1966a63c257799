//! Discord bridge adapter (spec §4.11). Polls each configured channel's
//! message list with a snowflake `after` high-water mark; Discord
//! snowflakes are monotonically increasing so no separate self-echo
//! check is needed beyond comparing `author.id` to the bot's own id.

use crate::consumer::{load_bridge_config, resolve_token, PlatformAdapter};
use cccc_core::CoreError;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DiscordConfig {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default = "default_true")]
    pub require_prefix: bool,
}

fn default_true() -> bool {
    true
}

pub fn load_config(path: &Path) -> Result<DiscordConfig, CoreError> {
    let mut config: DiscordConfig = load_bridge_config(path)?;
    config.bot_token = resolve_token(config.bot_token, "DISCORD_BOT_TOKEN")?;
    Ok(config)
}

/// Per-channel snowflake high-water mark, persisted at
/// `state/discord-after-<channel>.json`.
pub struct SnowflakeCursor {
    path: PathBuf,
}

impl SnowflakeCursor {
    pub fn new(home: &Path, channel: &str) -> Self {
        SnowflakeCursor {
            path: home.join("state").join(format!("discord-after-{channel}.json")),
        }
    }

    pub fn load(&self) -> Option<String> {
        std::fs::read_to_string(&self.path).ok()
    }

    pub fn save(&self, snowflake: &str) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, snowflake)?;
        std::fs::rename(&tmp, &self.path)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscordMessage {
    pub id: String,
    pub content: String,
    pub author: DiscordAuthor,
    #[serde(default)]
    pub attachments: Vec<DiscordAttachment>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscordAuthor {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscordAttachment {
    pub url: String,
    pub filename: String,
    #[serde(default)]
    pub content_type: Option<String>,
}

pub struct DiscordAdapter {
    client: reqwest::blocking::Client,
    bot_token: String,
}

impl DiscordAdapter {
    pub fn new(bot_token: String) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .expect("discord http client");
        DiscordAdapter { client, bot_token }
    }

    /// The bot's own user id, used to filter its own posts out of
    /// polled channel history.
    pub fn self_id(&self) -> reqwest::Result<String> {
        #[derive(Deserialize)]
        struct Me {
            id: String,
        }
        let me: Me = self
            .client
            .get("https://discord.com/api/v10/users/@me")
            .header("Authorization", format!("Bot {}", self.bot_token))
            .send()?
            .json()?;
        Ok(me.id)
    }

    pub fn messages_after(&self, channel_id: &str, after: Option<&str>) -> reqwest::Result<Vec<DiscordMessage>> {
        let url = format!("https://discord.com/api/v10/channels/{channel_id}/messages");
        let mut query = vec![("limit", "100".to_string())];
        if let Some(after) = after {
            query.push(("after", after.to_string()));
        }
        let mut messages: Vec<DiscordMessage> = self
            .client
            .get(url)
            .header("Authorization", format!("Bot {}", self.bot_token))
            .query(&query)
            .send()?
            .json()?;
        // Discord returns newest-first; callers want oldest-first so the
        // highest snowflake ends up last for cursor advancement.
        messages.reverse();
        Ok(messages)
    }
}

impl PlatformAdapter for DiscordAdapter {
    fn post(&self, channel: &str, text: &str) -> bool {
        #[derive(Serialize)]
        struct PostBody<'a> {
            content: &'a str,
        }
        let url = format!("https://discord.com/api/v10/channels/{channel}/messages");
        let result = self
            .client
            .post(url)
            .header("Authorization", format!("Bot {}", self.bot_token))
            .json(&PostBody { content: text })
            .send();
        match result {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                tracing::warn!(status = %resp.status(), channel = %channel, "discord message post rejected");
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, channel = %channel, "discord message post failed");
                false
            }
        }
    }

    fn name(&self) -> &str {
        "discord"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn snowflake_cursor_round_trips() {
        let dir = tempdir().unwrap();
        let cursor = SnowflakeCursor::new(dir.path(), "99887766");
        assert!(cursor.load().is_none());
        cursor.save("123456789012345678").unwrap();
        assert_eq!(cursor.load().unwrap(), "123456789012345678");
    }
}
