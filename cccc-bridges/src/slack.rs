//! Slack bridge adapter (spec §4.11). Polls `conversations.history` per
//! channel with a `ts` high-water mark, tracking the bot's own
//! `bot_user_id` so its own posts never loop back in as inbound traffic.

use crate::consumer::{load_bridge_config, resolve_token, PlatformAdapter};
use cccc_core::CoreError;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SlackConfig {
    #[serde(default)]
    pub bot_token: String,
    /// Socket-mode app-level token (`xapp-...`). Not used by this
    /// adapter's REST polling loop; read from config/env so operators
    /// can keep one settings shape across deployment modes.
    #[serde(default)]
    pub app_token: Option<String>,
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default = "default_true")]
    pub require_prefix: bool,
}

fn default_true() -> bool {
    true
}

pub fn load_config(path: &Path) -> Result<SlackConfig, CoreError> {
    let mut config: SlackConfig = load_bridge_config(path)?;
    config.bot_token = resolve_token(config.bot_token, "SLACK_BOT_TOKEN")?;
    if config.app_token.is_none() {
        config.app_token = std::env::var("SLACK_APP_TOKEN").ok();
    }
    Ok(config)
}

/// Per-channel `ts` high-water mark, persisted at
/// `state/slack-history-<channel>.json`.
pub struct HistoryCursor {
    path: PathBuf,
}

impl HistoryCursor {
    pub fn new(home: &Path, channel: &str) -> Self {
        HistoryCursor {
            path: home.join("state").join(format!("slack-history-{channel}.json")),
        }
    }

    pub fn load(&self) -> Option<String> {
        std::fs::read_to_string(&self.path).ok()
    }

    pub fn save(&self, ts: &str) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, ts)?;
        std::fs::rename(&tmp, &self.path)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SlackMessage {
    pub ts: String,
    pub text: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub bot_id: Option<String>,
    #[serde(default)]
    pub files: Vec<SlackFile>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SlackFile {
    pub id: String,
    pub name: String,
    pub mimetype: String,
    pub url_private: String,
}

impl SlackMessage {
    /// True when this message was authored by the bridge's own bot
    /// identity and must not be treated as inbound user traffic.
    pub fn is_self_echo(&self, bot_user_id: &str) -> bool {
        self.user.as_deref() == Some(bot_user_id) || self.bot_id.is_some()
    }
}

pub struct SlackAdapter {
    client: reqwest::blocking::Client,
    bot_token: String,
}

impl SlackAdapter {
    pub fn new(bot_token: String) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .expect("slack http client");
        SlackAdapter { client, bot_token }
    }

    /// Resolves the bridge's own bot user id via `auth.test`, used to
    /// filter self-echo out of polled history.
    pub fn bot_user_id(&self) -> reqwest::Result<String> {
        #[derive(Deserialize)]
        struct AuthTest {
            user_id: String,
        }
        let resp: AuthTest = self
            .client
            .post("https://slack.com/api/auth.test")
            .bearer_auth(&self.bot_token)
            .send()?
            .json()?;
        Ok(resp.user_id)
    }

    pub fn history_since(&self, channel: &str, oldest: Option<&str>) -> reqwest::Result<Vec<SlackMessage>> {
        #[derive(Deserialize)]
        struct HistoryResp {
            #[serde(default)]
            messages: Vec<SlackMessage>,
        }
        let mut query = vec![("channel", channel.to_string())];
        if let Some(oldest) = oldest {
            query.push(("oldest", oldest.to_string()));
        }
        let resp: HistoryResp = self
            .client
            .get("https://slack.com/api/conversations.history")
            .bearer_auth(&self.bot_token)
            .query(&query)
            .send()?
            .json()?;
        Ok(resp.messages)
    }
}

impl PlatformAdapter for SlackAdapter {
    fn post(&self, channel: &str, text: &str) -> bool {
        #[derive(Serialize)]
        struct PostBody<'a> {
            channel: &'a str,
            text: &'a str,
        }
        let result = self
            .client
            .post("https://slack.com/api/chat.postMessage")
            .bearer_auth(&self.bot_token)
            .json(&PostBody { channel, text })
            .send();
        match result {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                tracing::warn!(status = %resp.status(), channel = %channel, "slack chat.postMessage rejected");
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, channel = %channel, "slack chat.postMessage failed");
                false
            }
        }
    }

    fn name(&self) -> &str {
        "slack"
    }
}
