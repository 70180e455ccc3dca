/// Network-backed player: drives a player's HTTP control interface
/// (VLC-style `requests/status.json` / `requests/playlist.json`).
///
/// Commands are plain GETs with query-encoded arguments and basic auth with an
/// empty user name.  Times in the status document are whole seconds.
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use pilot_proto::config::NetworkConfig;
use reqwest::Url;
use serde_json::Value;
use tracing::{debug, info};

use super::{BackendStatus, PlayerBackend};
use crate::error::BackendError;

const STATUS_PATH: &str = "/requests/status.json";
const PLAYLIST_PATH: &str = "/requests/playlist.json";

pub struct NetworkBackend {
    client: reqwest::Client,
    base_url: String,
    password: String,
    root: PathBuf,
    current: Option<String>,
}

impl NetworkBackend {
    pub fn new(config: &NetworkConfig, root: PathBuf) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms.max(1)))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            password: config.password.clone(),
            root,
            current: None,
        })
    }

    async fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<Value, BackendError> {
        let resp = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .query(query)
            .basic_auth("", Some(&self.password))
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(BackendError::HttpStatus(status));
        }
        Ok(resp.json::<Value>().await?)
    }

    async fn command(&self, command: &str, extra: &[(&str, &str)]) -> Result<(), BackendError> {
        debug!("network: {} {:?}", command, extra);
        let mut query = vec![("command", command)];
        query.extend_from_slice(extra);
        self.get(STATUS_PATH, &query).await.map(|_| ())
    }

    fn file_uri(&self, filename: &str) -> Result<String, BackendError> {
        let path = self.root.join(filename);
        let absolute = if path.is_absolute() {
            path
        } else {
            std::env::current_dir()?.join(path)
        };
        Url::from_file_path(&absolute)
            .map(|url| url.to_string())
            .map_err(|_| BackendError::Protocol(format!("not a file path: {}", absolute.display())))
    }
}

/// Find the playlist leaf marked `current` and return its name.
fn find_current(node: &Value) -> Option<String> {
    if node.get("current").is_some() {
        if let Some(name) = node.get("name").and_then(Value::as_str) {
            return Some(name.to_string());
        }
    }
    node.get("children")?
        .as_array()?
        .iter()
        .find_map(find_current)
}

fn seconds(value: &Value) -> Duration {
    value
        .as_f64()
        .filter(|s| s.is_finite() && *s > 0.0)
        .map(Duration::from_secs_f64)
        .unwrap_or(Duration::ZERO)
}

/// Milliseconds to the nearest whole second, halves away from zero.
fn whole_seconds(delta_ms: i64) -> i64 {
    delta_ms.saturating_add(500 * delta_ms.signum()) / 1000
}

fn display_name(path: &str) -> &str {
    Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(path)
}

#[async_trait]
impl PlayerBackend for NetworkBackend {
    fn name(&self) -> &'static str {
        "network"
    }

    async fn start(&mut self, filename: &str) -> Result<(), BackendError> {
        let uri = self.file_uri(filename)?;
        // Clear whatever the player had queued so the new item plays alone.
        self.command("pl_stop", &[]).await?;
        self.command("pl_empty", &[]).await?;
        self.current = None;
        self.command("in_play", &[("input", uri.as_str())]).await?;
        info!("network: playing {}", uri);
        self.current = Some(filename.to_string());
        Ok(())
    }

    async fn pause(&mut self) -> Result<(), BackendError> {
        self.command("pl_forcepause", &[]).await
    }

    async fn resume(&mut self) -> Result<(), BackendError> {
        self.command("pl_forceresume", &[]).await
    }

    async fn stop(&mut self) -> Result<(), BackendError> {
        self.current = None;
        self.command("pl_stop", &[]).await
    }

    async fn seek(&mut self, delta_ms: i64) -> Result<(), BackendError> {
        let secs = whole_seconds(delta_ms);
        if secs == 0 {
            debug!("network: seek of {} ms rounds to nothing", delta_ms);
            return Ok(());
        }
        let val = format!("{:+}s", secs);
        self.command("seek", &[("val", val.as_str())]).await
    }

    async fn query_status(&mut self) -> Result<BackendStatus, BackendError> {
        let status = self.get(STATUS_PATH, &[]).await?;
        let playlist = self.get(PLAYLIST_PATH, &[]).await?;

        let state = status.get("state").and_then(Value::as_str).unwrap_or("stopped");
        let current = find_current(&playlist);
        if state == "stopped" {
            return Ok(BackendStatus::default());
        }

        let playing = match (&self.current, current) {
            (_, None) => return Ok(BackendStatus::default()),
            (Some(ours), Some(_)) => ours.clone(),
            (None, Some(theirs)) => display_name(&theirs).to_string(),
        };

        Ok(BackendStatus {
            playing: Some(playing),
            paused: state == "paused",
            position: seconds(&status["time"]),
            duration: seconds(&status["length"]),
        })
    }
}
