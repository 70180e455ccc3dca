use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::platform;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub library: LibraryConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub player: PlayerConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub simulated: SimulatedConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Where playable media lives and which part of it is served.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryConfig {
    #[serde(default = "default_root")]
    pub root: PathBuf,
    /// Top-level folders under `root` that are scanned.
    #[serde(default = "default_folders")]
    pub folders: Vec<String>,
    /// File extensions (without the dot) treated as playable video.
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Spawn a local player binary, control it over the session bus.
    #[default]
    Process,
    /// Drive a player's HTTP control interface.
    Network,
    /// Virtual clock, no hardware.
    Simulated,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default)]
    pub kind: BackendKind,
}

/// Process-backed player settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerConfig {
    #[serde(default = "default_player_binary")]
    pub binary: String,
    /// Extra arguments placed before the file path.
    #[serde(default)]
    pub args: Vec<String>,
    /// File holding the player's session bus address.
    #[serde(default = "default_bus_address_file")]
    pub bus_address_file: PathBuf,
    /// File holding the player's session bus daemon pid.
    #[serde(default = "default_bus_pid_file")]
    pub bus_pid_file: PathBuf,
    #[serde(default = "default_bus_destination")]
    pub bus_destination: String,
    /// Command (program then leading arguments) used to send session-bus
    /// messages.  Method name and arguments are appended per call.
    #[serde(default = "default_bus_command")]
    pub bus_command: Vec<String>,
    #[serde(default = "default_control_timeout_ms")]
    pub control_timeout_ms: u64,
    /// How long `stop` waits for a clean exit before killing the player.
    #[serde(default = "default_stop_grace_ms")]
    pub stop_grace_ms: u64,
}

/// HTTP-controlled player settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_network_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_network_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatedConfig {
    /// Probability in `[0, 1]` that any operation fails.
    #[serde(default)]
    pub failure_rate: f64,
    /// Artificial latency added to every operation.
    #[serde(default)]
    pub op_delay_ms: u64,
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
}

/// HDMI-CEC remote control settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(default = "default_remote_enabled")]
    pub enabled: bool,
    #[serde(default = "default_cec_binary")]
    pub binary: String,
    /// Arguments for the CEC client; `-o <osd_name>` is appended.
    #[serde(default = "default_cec_args")]
    pub args: Vec<String>,
    /// Name shown on the TV's source menu.
    #[serde(default = "default_osd_name")]
    pub osd_name: String,
    /// Seek distance for the fast-forward / rewind keys.
    #[serde(default = "default_seek_step_secs")]
    pub seek_step_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            folders: default_folders(),
            extensions: default_extensions(),
        }
    }
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            binary: default_player_binary(),
            args: Vec::new(),
            bus_address_file: default_bus_address_file(),
            bus_pid_file: default_bus_pid_file(),
            bus_destination: default_bus_destination(),
            bus_command: default_bus_command(),
            control_timeout_ms: default_control_timeout_ms(),
            stop_grace_ms: default_stop_grace_ms(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            base_url: default_network_base_url(),
            password: String::new(),
            timeout_ms: default_network_timeout_ms(),
        }
    }
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            failure_rate: 0.0,
            op_delay_ms: 0,
            tick_ms: default_tick_ms(),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            enabled: default_remote_enabled(),
            binary: default_cec_binary(),
            args: default_cec_args(),
            osd_name: default_osd_name(),
            seek_step_secs: default_seek_step_secs(),
        }
    }
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    platform::DEFAULT_HTTP_PORT
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_folders() -> Vec<String> {
    vec!["TV".to_string(), "Movies".to_string()]
}

fn default_extensions() -> Vec<String> {
    [
        "mp4", "avi", "mpg", "mov", "wmv", "mkv", "m4v", "webm", "flv", "3gp",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_player_binary() -> String {
    "omxplayer".to_string()
}

fn default_bus_address_file() -> PathBuf {
    platform::temp_dir().join(format!("omxplayerdbus.{}", platform::current_user()))
}

fn default_bus_pid_file() -> PathBuf {
    platform::temp_dir().join(format!("omxplayerdbus.{}.pid", platform::current_user()))
}

fn default_bus_destination() -> String {
    "org.mpris.MediaPlayer2.omxplayer".to_string()
}

fn default_bus_command() -> Vec<String> {
    vec!["dbus-send".to_string()]
}

fn default_control_timeout_ms() -> u64 {
    2000
}

fn default_stop_grace_ms() -> u64 {
    3000
}

fn default_network_base_url() -> String {
    "http://127.0.0.1:8081".to_string()
}

fn default_network_timeout_ms() -> u64 {
    3000
}

fn default_tick_ms() -> u64 {
    1000
}

fn default_remote_enabled() -> bool {
    true
}

fn default_cec_binary() -> String {
    "cec-client".to_string()
}

fn default_cec_args() -> Vec<String> {
    ["-d", "31", "-t", "p"].iter().map(|s| s.to_string()).collect()
}

fn default_osd_name() -> String {
    "pilot".to_string()
}

fn default_seek_step_secs() -> u64 {
    30
}

impl Config {
    /// Load the config at the default location, writing defaults on first run.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(config_path: &Path) -> anyhow::Result<Self> {
        if !config_path.exists() {
            let config = Self::default();
            config.save_to(config_path)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(config_path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to(&self, config_path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.http.port, 8080);
        assert_eq!(config.backend.kind, BackendKind::Process);
        assert_eq!(config.library.folders, vec!["TV", "Movies"]);
        assert!(config.library.extensions.iter().any(|e| e == "mkv"));
        assert_eq!(config.player.binary, "omxplayer");
        assert!(config.remote.enabled);
        assert!(config
            .player
            .bus_address_file
            .to_string_lossy()
            .contains("omxplayerdbus."));
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [backend]
            kind = "simulated"

            [simulated]
            failure_rate = 0.5

            [library]
            root = "/media/usb"
            "#,
        )
        .unwrap();
        assert_eq!(config.backend.kind, BackendKind::Simulated);
        assert_eq!(config.simulated.failure_rate, 0.5);
        assert_eq!(config.simulated.tick_ms, 1000);
        assert_eq!(config.library.root, PathBuf::from("/media/usb"));
        assert_eq!(config.library.folders, vec!["TV", "Movies"]);
        assert_eq!(config.http.port, 8080);
    }

    #[test]
    fn test_unknown_backend_kind_rejected() {
        let parsed: Result<Config, _> = toml::from_str("[backend]\nkind = \"chromecast\"\n");
        assert!(parsed.is_err());
    }
}
