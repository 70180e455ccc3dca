/// Process-backed player: one spawned player binary per item.
///
/// The child's stdin is held open but never written (the player quits on
/// EOF); stdout and stderr are drained line by line on their own tasks so a
/// chatty player never stalls on a full pipe.  Mid-session commands go over
/// the control bus instead, see [`super::dbus`].
use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pilot_proto::config::PlayerConfig;
use pilot_proto::platform;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tracing::{debug, info, warn};

use super::dbus::{ControlBus, ACTION_PLAY_PAUSE, ACTION_STOP};
use super::{BackendStatus, PlayerBackend};
use crate::error::BackendError;

/// Lines of player output kept for post-mortem logging.
const OUTPUT_TAIL: usize = 50;

type OutputTail = Arc<Mutex<VecDeque<String>>>;

struct PlayerHandle {
    filename: String,
    child: Child,
    _stdin: Option<ChildStdin>,
    paused: bool,
    output: OutputTail,
}

impl PlayerHandle {
    fn log_tail(&self) {
        let tail = self.output.lock().unwrap_or_else(|e| e.into_inner());
        for line in tail.iter() {
            warn!("player output: {}", line);
        }
    }
}

pub struct ProcessBackend {
    config: PlayerConfig,
    root: PathBuf,
    bus: ControlBus,
    handle: Option<PlayerHandle>,
}

impl ProcessBackend {
    pub fn new(config: PlayerConfig, root: PathBuf) -> Self {
        let bus = ControlBus::new(&config);
        Self {
            config,
            root,
            bus,
            handle: None,
        }
    }

    fn spawn(&self, filename: &str) -> Result<PlayerHandle, BackendError> {
        let binary = platform::find_binary(&self.config.binary)
            .ok_or_else(|| BackendError::BinaryNotFound(self.config.binary.clone()))?;
        let path = self.root.join(filename);

        let mut child = Command::new(&binary)
            .args(&self.config.args)
            .arg(&path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| BackendError::Spawn {
                binary: binary.display().to_string(),
                source,
            })?;
        info!(
            "player: spawned {} (pid {:?}) for {}",
            binary.display(),
            child.id(),
            path.display()
        );

        let output: OutputTail = Arc::new(Mutex::new(VecDeque::with_capacity(OUTPUT_TAIL)));
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(drain(stdout, "stdout", Arc::clone(&output)));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(drain(stderr, "stderr", Arc::clone(&output)));
        }

        Ok(PlayerHandle {
            filename: filename.to_string(),
            _stdin: child.stdin.take(),
            child,
            paused: false,
            output,
        })
    }

    /// Ask the player to quit, wait for it, kill it if it will not go.
    async fn shutdown(&self, mut handle: PlayerHandle) -> Result<(), BackendError> {
        if let Ok(Some(status)) = handle.child.try_wait() {
            info!("player: {} had already exited ({})", handle.filename, status);
            return Ok(());
        }

        let grace = Duration::from_millis(self.config.stop_grace_ms);
        match self.bus.action(ACTION_STOP).await {
            Ok(()) => match tokio::time::timeout(grace, handle.child.wait()).await {
                Ok(Ok(status)) => {
                    info!("player: {} stopped ({})", handle.filename, status);
                    return Ok(());
                }
                Ok(Err(e)) => warn!("player: wait failed: {}", e),
                Err(_) => warn!("player: still running {:?} after stop, killing", grace),
            },
            Err(e) => warn!("player: stop message failed ({}), killing", e),
        }

        if let Err(e) = handle.child.kill().await {
            // Lost the race with a natural exit: nothing left to kill.
            if handle.child.try_wait()?.is_none() {
                return Err(e.into());
            }
        }
        info!("player: {} killed", handle.filename);
        Ok(())
    }
}

async fn drain<R>(reader: R, stream: &'static str, tail: OutputTail)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                debug!("player {}: {}", stream, line);
                let mut tail = tail.lock().unwrap_or_else(|e| e.into_inner());
                if tail.len() == OUTPUT_TAIL {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            Ok(None) => break,
            Err(e) => {
                debug!("player {}: read error: {}", stream, e);
                break;
            }
        }
    }
}

#[async_trait]
impl PlayerBackend for ProcessBackend {
    fn name(&self) -> &'static str {
        "process"
    }

    async fn start(&mut self, filename: &str) -> Result<(), BackendError> {
        if let Some(old) = self.handle.take() {
            warn!("player: replacing running {}", old.filename);
            if let Err(e) = self.shutdown(old).await {
                warn!("player: failed to stop previous player: {}", e);
            }
        }
        self.handle = Some(self.spawn(filename)?);
        Ok(())
    }

    async fn pause(&mut self) -> Result<(), BackendError> {
        let Some(handle) = self.handle.as_mut() else {
            return Ok(());
        };
        self.bus.action(ACTION_PLAY_PAUSE).await?;
        handle.paused = true;
        Ok(())
    }

    async fn resume(&mut self) -> Result<(), BackendError> {
        let Some(handle) = self.handle.as_mut() else {
            return Ok(());
        };
        self.bus.action(ACTION_PLAY_PAUSE).await?;
        handle.paused = false;
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), BackendError> {
        match self.handle.take() {
            Some(handle) => self.shutdown(handle).await,
            None => Ok(()),
        }
    }

    async fn seek(&mut self, delta_ms: i64) -> Result<(), BackendError> {
        if self.handle.is_none() {
            return Ok(());
        }
        self.bus.seek(delta_ms.saturating_mul(1000)).await
    }

    async fn query_status(&mut self) -> Result<BackendStatus, BackendError> {
        let Some(handle) = self.handle.as_mut() else {
            return Ok(BackendStatus::default());
        };

        match handle.child.try_wait() {
            Ok(Some(status)) => {
                info!("player: {} exited on its own ({})", handle.filename, status);
                if !status.success() {
                    handle.log_tail();
                }
                self.handle = None;
                return Ok(BackendStatus::default());
            }
            Ok(None) => {}
            Err(e) => warn!("player: try_wait failed: {}", e),
        }

        let position = self.bus.position().await.unwrap_or_else(|e| {
            debug!("player: position unavailable: {}", e);
            Duration::ZERO
        });
        let duration = self.bus.duration().await.unwrap_or_else(|e| {
            debug!("player: duration unavailable: {}", e);
            Duration::ZERO
        });

        Ok(BackendStatus {
            playing: Some(handle.filename.clone()),
            paused: handle.paused,
            position,
            duration,
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::path::Path;

    /// A player that prints a line and then idles until killed.
    fn idle_player() -> (String, Vec<String>) {
        (
            "sh".to_string(),
            vec![
                "-c".to_string(),
                "echo \"playing $1\"; exec sleep 30".to_string(),
                "player".to_string(),
            ],
        )
    }

    /// Bus command that appends every call to `log` and answers property reads.
    fn recording_bus(log: &Path) -> Vec<String> {
        let script = format!(
            r#"case "$*" in
  *Position*) echo "   int64 5000000" ;;
  *Duration*) echo "   int64 60000000" ;;
esac
echo "$*" >> {}"#,
            log.display()
        );
        vec!["sh".into(), "-c".into(), script, "bus".into()]
    }

    fn config(dir: &Path, with_bus_files: bool) -> PlayerConfig {
        let (binary, args) = idle_player();
        let address_file = dir.join("bus");
        let pid_file = dir.join("bus.pid");
        if with_bus_files {
            std::fs::write(&address_file, "unix:path=/nonexistent\n").unwrap();
            std::fs::write(&pid_file, "1\n").unwrap();
        }
        PlayerConfig {
            binary,
            args,
            bus_address_file: address_file,
            bus_pid_file: pid_file,
            bus_command: recording_bus(&dir.join("calls.log")),
            control_timeout_ms: 2000,
            stop_grace_ms: 200,
            ..PlayerConfig::default()
        }
    }

    fn calls(dir: &Path) -> String {
        std::fs::read_to_string(dir.join("calls.log")).unwrap_or_default()
    }

    #[tokio::test]
    async fn test_start_pause_status_stop() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = ProcessBackend::new(config(dir.path(), true), dir.path().to_path_buf());

        backend.start("Movies/a.mp4").await.unwrap();
        backend.pause().await.unwrap();

        let status = backend.query_status().await.unwrap();
        assert_eq!(status.playing.as_deref(), Some("Movies/a.mp4"));
        assert!(status.paused);
        assert_eq!(status.position, Duration::from_secs(5));
        assert_eq!(status.duration, Duration::from_secs(60));

        // The fake bus never stops the player, so this exercises the kill path.
        backend.stop().await.unwrap();
        assert_eq!(backend.query_status().await.unwrap(), BackendStatus::default());

        let log = calls(dir.path());
        assert!(log.contains("Player.Action int32:16"));
        assert!(log.contains("Player.Action int32:15"));
    }

    #[tokio::test]
    async fn test_stop_kills_when_bus_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = ProcessBackend::new(config(dir.path(), false), dir.path().to_path_buf());

        backend.start("TV/show.mkv").await.unwrap();
        assert!(backend.pause().await.is_err());
        backend.stop().await.unwrap();
        assert!(backend.query_status().await.unwrap().playing.is_none());
    }

    #[tokio::test]
    async fn test_seek_sends_microseconds() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = ProcessBackend::new(config(dir.path(), true), dir.path().to_path_buf());

        // Idle seek does not touch the bus.
        backend.seek(1000).await.unwrap();
        assert!(calls(dir.path()).is_empty());

        backend.start("Movies/a.mp4").await.unwrap();
        backend.seek(-30_000).await.unwrap();
        assert!(calls(dir.path()).contains("Player.Seek int64:-30000000"));
        backend.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_natural_exit_reports_idle() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path(), true);
        cfg.args = vec!["-c".into(), "exit 0".into(), "player".into()];
        let mut backend = ProcessBackend::new(cfg, dir.path().to_path_buf());

        backend.start("Movies/short.mp4").await.unwrap();
        let mut status = backend.query_status().await.unwrap();
        for _ in 0..50 {
            if status.playing.is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            status = backend.query_status().await.unwrap();
        }
        assert!(status.playing.is_none());
        backend.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path(), true);
        cfg.binary = "no-such-player-binary".into();
        let mut backend = ProcessBackend::new(cfg, dir.path().to_path_buf());
        assert!(matches!(
            backend.start("Movies/a.mp4").await,
            Err(BackendError::BinaryNotFound(_))
        ));
        assert!(backend.query_status().await.unwrap().playing.is_none());
    }
}
