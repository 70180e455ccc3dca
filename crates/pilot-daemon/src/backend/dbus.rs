/// Out-of-band control of the player over its private session bus.
///
/// The player publishes its bus address and bus daemon pid in two well-known
/// files when it starts.  Every call reads them fresh, then runs the bus send
/// command with an environment holding nothing but those two values:
///
/// ```text
///   dbus-send --print-reply=literal --session --dest=<dest> \
///       /org/mpris/MediaPlayer2 <method> [args...]
/// ```
///
/// Replies are read in `literal` form, e.g. `   int64 5000000`.
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use pilot_proto::config::PlayerConfig;
use pilot_proto::platform;
use tokio::process::Command;
use tracing::debug;

use crate::error::BackendError;

/// `Action` code toggling play/pause.
pub const ACTION_PLAY_PAUSE: i32 = 16;
/// `Action` code asking the player to quit playback.
pub const ACTION_STOP: i32 = 15;

const OBJECT_PATH: &str = "/org/mpris/MediaPlayer2";
const METHOD_ACTION: &str = "org.mpris.MediaPlayer2.Player.Action";
const METHOD_SEEK: &str = "org.mpris.MediaPlayer2.Player.Seek";
const PROPERTY_PREFIX: &str = "org.freedesktop.DBus.Properties.";

pub struct ControlBus {
    program: PathBuf,
    leading_args: Vec<String>,
    address_file: PathBuf,
    pid_file: PathBuf,
    destination: String,
    timeout: Duration,
}

impl ControlBus {
    pub fn new(config: &PlayerConfig) -> Self {
        let mut command = config.bus_command.iter();
        let program_name = command
            .next()
            .cloned()
            .unwrap_or_else(|| "dbus-send".to_string());
        // The child runs with a cleared environment, so resolve against our PATH now.
        let program =
            platform::find_binary(&program_name).unwrap_or_else(|| PathBuf::from(&program_name));

        Self {
            program,
            leading_args: command.cloned().collect(),
            address_file: config.bus_address_file.clone(),
            pid_file: config.bus_pid_file.clone(),
            destination: config.bus_destination.clone(),
            timeout: Duration::from_millis(config.control_timeout_ms.max(1)),
        }
    }

    pub async fn action(&self, code: i32) -> Result<(), BackendError> {
        self.call(METHOD_ACTION, &[format!("int32:{}", code)])
            .await
            .map(|_| ())
    }

    /// Relative seek, in microseconds.
    pub async fn seek(&self, offset_us: i64) -> Result<(), BackendError> {
        self.call(METHOD_SEEK, &[format!("int64:{}", offset_us)])
            .await
            .map(|_| ())
    }

    pub async fn position(&self) -> Result<Duration, BackendError> {
        self.micros_property("Position").await
    }

    pub async fn duration(&self) -> Result<Duration, BackendError> {
        self.micros_property("Duration").await
    }

    async fn micros_property(&self, name: &str) -> Result<Duration, BackendError> {
        let method = format!("{}{}", PROPERTY_PREFIX, name);
        let reply = self.call(&method, &[]).await?;
        let micros = parse_literal_int64(&reply)
            .ok_or_else(|| BackendError::Protocol(format!("{}: {:?}", name, reply.trim())))?;
        Ok(Duration::from_micros(micros.max(0) as u64))
    }

    async fn session_env(&self) -> Result<(String, String), BackendError> {
        let address = read_trimmed(&self.address_file).await?;
        let pid = read_trimmed(&self.pid_file).await?;
        Ok((address, pid))
    }

    async fn call(&self, method: &str, args: &[String]) -> Result<String, BackendError> {
        let (address, pid) = self.session_env().await?;

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.leading_args)
            .arg("--print-reply=literal")
            .arg("--session")
            .arg(format!("--reply-timeout={}", self.timeout.as_millis()))
            .arg(format!("--dest={}", self.destination))
            .arg(OBJECT_PATH)
            .arg(method)
            .args(args)
            .env_clear()
            .env("DBUS_SESSION_BUS_ADDRESS", address)
            .env("DBUS_SESSION_BUS_PID", pid)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        debug!("control bus: {} {}", method, args.join(" "));

        // Small allowance on top of the bus's own reply timeout.
        let deadline = self.timeout + Duration::from_millis(500);
        let output = tokio::time::timeout(deadline, cmd.output())
            .await
            .map_err(|_| BackendError::Timeout(deadline))?
            .map_err(|e| {
                BackendError::ControlBus(format!("running {}: {}", self.program.display(), e))
            })?;

        if !output.status.success() {
            return Err(BackendError::ControlBus(format!(
                "{} failed ({}): {}",
                method,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

async fn read_trimmed(path: &std::path::Path) -> Result<String, BackendError> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| BackendError::ControlBus(format!("reading {}: {}", path.display(), e)))?;
    Ok(raw.trim().to_string())
}

/// Extract the value from a literal reply such as `   int64 5000000`.
pub fn parse_literal_int64(reply: &str) -> Option<i64> {
    let mut tokens = reply.split_whitespace();
    while let Some(token) = tokens.next() {
        if token == "int64" {
            return tokens.next()?.parse().ok();
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_literal_int64() {
        assert_eq!(parse_literal_int64("   int64 5000000\n"), Some(5_000_000));
        assert_eq!(parse_literal_int64("variant       int64 -42"), Some(-42));
        assert_eq!(parse_literal_int64("   double 1.5"), None);
        assert_eq!(parse_literal_int64(""), None);
        assert_eq!(parse_literal_int64("int64"), None);
    }

    #[tokio::test]
    async fn test_missing_address_file_is_control_bus_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = PlayerConfig {
            bus_address_file: dir.path().join("missing"),
            bus_pid_file: dir.path().join("missing.pid"),
            ..PlayerConfig::default()
        };
        let bus = ControlBus::new(&config);
        match bus.action(ACTION_PLAY_PAUSE).await {
            Err(BackendError::ControlBus(msg)) => assert!(msg.contains("missing")),
            other => panic!("expected control bus error, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_call_passes_session_env_and_reads_reply() {
        let dir = tempfile::tempdir().unwrap();
        let address_file = dir.path().join("bus");
        let pid_file = dir.path().join("bus.pid");
        std::fs::write(&address_file, "unix:abstract=/tmp/dbus-test\n").unwrap();
        std::fs::write(&pid_file, "4242\n").unwrap();

        let script = r#"echo "int64 $DBUS_SESSION_BUS_PID""#;
        let config = PlayerConfig {
            bus_address_file: address_file,
            bus_pid_file: pid_file,
            bus_command: vec!["sh".into(), "-c".into(), script.into(), "bus".into()],
            ..PlayerConfig::default()
        };
        let bus = ControlBus::new(&config);
        assert_eq!(bus.position().await.unwrap(), Duration::from_micros(4242));
    }
}
