//! WeCom (Enterprise WeChat) bridge adapter (spec §4.11). Thinnest of
//! the four: outbound posting through the app message API, with the
//! corp access-token cache the platform requires (tokens expire after
//! roughly two hours and must be refreshed, not requested per call).

use crate::consumer::{load_bridge_config, PlatformAdapter};
use cccc_core::CoreError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WeComConfig {
    pub corp_id: String,
    pub corp_secret: String,
    pub agent_id: i64,
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default = "default_true")]
    pub require_prefix: bool,
}

fn default_true() -> bool {
    true
}

pub fn load_config(path: &Path) -> Result<WeComConfig, CoreError> {
    load_bridge_config(path)
}

struct CachedToken {
    token: String,
    expires_at: Instant,
}

pub struct WeComAdapter {
    client: reqwest::blocking::Client,
    corp_id: String,
    corp_secret: String,
    agent_id: i64,
    token: Mutex<Option<CachedToken>>,
}

impl WeComAdapter {
    pub fn new(corp_id: String, corp_secret: String, agent_id: i64) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .expect("wecom http client");
        WeComAdapter {
            client,
            corp_id,
            corp_secret,
            agent_id,
            token: Mutex::new(None),
        }
    }

    /// Returns a cached token if it has more than 60s of life left,
    /// otherwise fetches and caches a new one.
    fn access_token(&self) -> reqwest::Result<String> {
        let mut guard = self.token.lock().unwrap();
        if let Some(cached) = guard.as_ref() {
            if cached.expires_at > Instant::now() + Duration::from_secs(60) {
                return Ok(cached.token.clone());
            }
        }
        #[derive(Deserialize)]
        struct TokenResp {
            access_token: String,
            expires_in: u64,
        }
        let resp: TokenResp = self
            .client
            .get("https://qyapi.weixin.qq.com/cgi-bin/gettoken")
            .query(&[("corpid", &self.corp_id), ("corpsecret", &self.corp_secret)])
            .send()?
            .json()?;
        let token = resp.access_token.clone();
        *guard = Some(CachedToken {
            token: resp.access_token,
            expires_at: Instant::now() + Duration::from_secs(resp.expires_in),
        });
        Ok(token)
    }
}

impl PlatformAdapter for WeComAdapter {
    fn post(&self, channel: &str, text: &str) -> bool {
        #[derive(Serialize)]
        struct TextBody<'a> {
            content: &'a str,
        }
        #[derive(Serialize)]
        struct SendBody<'a> {
            touser: &'a str,
            msgtype: &'a str,
            agentid: i64,
            text: TextBody<'a>,
        }
        let token = match self.access_token() {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(error = %e, "wecom access token fetch failed");
                return false;
            }
        };
        let url = format!("https://qyapi.weixin.qq.com/cgi-bin/message/send?access_token={token}");
        let body = SendBody {
            touser: channel,
            msgtype: "text",
            agentid: self.agent_id,
            text: TextBody { content: text },
        };
        let result = self.client.post(url).json(&body).send();
        match result {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                tracing::warn!(status = %resp.status(), channel = %channel, "wecom message send rejected");
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, channel = %channel, "wecom message send failed");
                false
            }
        }
    }

    fn name(&self) -> &str {
        "wecom"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_config_with_default_require_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge_wecom.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "corp_id: wwabc123\ncorp_secret: secret\nagent_id: 1000002\nchannels: [\"user1\"]"
        )
        .unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.corp_id, "wwabc123");
        assert_eq!(config.agent_id, 1000002);
        assert!(config.require_prefix);
    }

    #[test]
    fn adapter_starts_with_no_cached_token() {
        let adapter = WeComAdapter::new("wwabc123".to_string(), "secret".to_string(), 1000002);
        assert!(adapter.token.lock().unwrap().is_none());
    }
}
