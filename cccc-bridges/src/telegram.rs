//! Telegram bridge adapter (spec §4.11). Fullest of the four adapters:
//! in addition to the shared outbox-cursor contract, it tracks its own
//! `update_id` high-water mark (Telegram's own pagination cursor, layered
//! on top of — not a replacement for — the shared outbox cursor).

use crate::consumer::{load_bridge_config, resolve_token, PlatformAdapter};
use crate::inbound::parse_bot_mention;
use cccc_core::CoreError;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default)]
    pub bot_handle: Option<String>,
    #[serde(default = "default_true")]
    pub require_prefix: bool,
}

fn default_true() -> bool {
    true
}

pub fn load_config(path: &Path) -> Result<TelegramConfig, CoreError> {
    let mut config: TelegramConfig = load_bridge_config(path)?;
    config.bot_token = resolve_token(config.bot_token, "TELEGRAM_BOT_TOKEN")?;
    Ok(config)
}

#[derive(Debug, Deserialize)]
struct GetUpdatesResponse {
    result: Vec<TelegramUpdate>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramUpdate {
    pub update_id: i64,
    pub message: Option<TelegramMessage>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramMessage {
    pub chat: TelegramChat,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub document: Option<TelegramDocument>,
    #[serde(default)]
    pub photo: Vec<TelegramPhotoSize>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
pub struct TelegramDocument {
    pub file_id: String,
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramPhotoSize {
    pub file_id: String,
}

/// The `update_id` high-water mark persisted at `state/telegram-offset.json`.
/// This sits above the shared outbox cursor (spec §4.11, §3 "Cursor" —
/// the offset concept generalizes beyond the outbox file).
pub struct UpdateOffset {
    path: PathBuf,
}

impl UpdateOffset {
    pub fn new(home: &Path) -> Self {
        UpdateOffset {
            path: home.join("state").join("telegram-offset.json"),
        }
    }

    pub fn load(&self) -> i64 {
        std::fs::read_to_string(&self.path)
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(0)
    }

    pub fn save(&self, update_id: i64) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, update_id.to_string())?;
        std::fs::rename(&tmp, &self.path)
    }
}

pub struct TelegramAdapter {
    client: reqwest::blocking::Client,
    bot_token: String,
}

impl TelegramAdapter {
    pub fn new(bot_token: String) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .expect("telegram http client");
        TelegramAdapter { client, bot_token }
    }

    fn api_url(&self, method: &str) -> String {
        format!("https://api.telegram.org/bot{}/{method}", self.bot_token)
    }

    /// Long-polls `getUpdates` with a 25s server-side wait, starting just
    /// past `offset`. Returns the raw updates; the caller advances
    /// `UpdateOffset` past the highest `update_id` it successfully
    /// processed, mirroring the shared outbox cursor's commit-on-success
    /// contract.
    pub fn get_updates(&self, offset: i64) -> reqwest::Result<Vec<TelegramUpdate>> {
        let resp: GetUpdatesResponse = self
            .client
            .get(self.api_url("getUpdates"))
            .query(&[
                ("offset", (offset + 1).to_string()),
                ("timeout", "25".to_string()),
            ])
            .send()?
            .json()?;
        Ok(resp.result)
    }

    pub fn get_file_path(&self, file_id: &str) -> reqwest::Result<Option<String>> {
        #[derive(Deserialize)]
        struct FileResp {
            result: FileResult,
        }
        #[derive(Deserialize)]
        struct FileResult {
            file_path: Option<String>,
        }
        let resp: FileResp = self
            .client
            .get(self.api_url("getFile"))
            .query(&[("file_id", file_id)])
            .send()?
            .json()?;
        Ok(resp.result.file_path)
    }

    pub fn download_file(&self, file_path: &str) -> reqwest::Result<Vec<u8>> {
        let url = format!("https://api.telegram.org/file/bot{}/{file_path}", self.bot_token);
        Ok(self.client.get(url).send()?.bytes()?.to_vec())
    }
}

impl PlatformAdapter for TelegramAdapter {
    fn post(&self, channel: &str, text: &str) -> bool {
        let result = self
            .client
            .post(self.api_url("sendMessage"))
            .form(&[("chat_id", channel), ("text", text)])
            .send();
        match result {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                tracing::warn!(status = %resp.status(), channel = %channel, "telegram sendMessage rejected");
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, channel = %channel, "telegram sendMessage failed");
                false
            }
        }
    }

    fn name(&self) -> &str {
        "telegram"
    }
}

/// Extracts the inbound text for a message, resolving a bot-mention into
/// its body when `bot_handle` is configured and no explicit routing
/// prefix is present (the mention stands in for an explicit prefix).
pub fn effective_text(text: &str, bot_handle: Option<&str>) -> String {
    if let Some(handle) = bot_handle {
        if let Some(body) = parse_bot_mention(text, handle) {
            return body;
        }
    }
    text.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn update_offset_round_trips() {
        let dir = tempdir().unwrap();
        let offset = UpdateOffset::new(dir.path());
        assert_eq!(offset.load(), 0);
        offset.save(42).unwrap();
        assert_eq!(offset.load(), 42);
    }

    #[test]
    fn effective_text_strips_bot_mention() {
        assert_eq!(effective_text("@ccccbot a: hi", Some("ccccbot")), "a: hi");
    }

    #[test]
    fn effective_text_passes_through_without_mention() {
        assert_eq!(effective_text("a: hi", Some("ccccbot")), "a: hi");
    }
}
