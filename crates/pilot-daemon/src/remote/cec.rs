/// Link to the display over HDMI-CEC through a `cec-client` child process.
///
/// The client's stdout is the key-press feed; its stdin takes commands such
/// as `on 0` and `standby 0` (device 0 is the TV).  Failures of the link are
/// recorded on the controller and never bring the daemon down.
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use pilot_proto::config::RemoteConfig;
use pilot_proto::platform;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::Subscriptions;
use crate::controller::{Controller, PowerControl};

pub struct RemoteLink {
    stdin: Mutex<Option<ChildStdin>>,
    cancel: CancellationToken,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl RemoteLink {
    /// Spawn the client and start feeding `subs`.  `None` when the client
    /// could not be started; the reason is on the controller.
    pub async fn start(
        config: &RemoteConfig,
        subs: Arc<Subscriptions>,
        controller: Arc<Controller>,
    ) -> Option<Arc<Self>> {
        let Some(binary) = platform::find_binary(&config.binary) else {
            controller
                .record_hardware_error(Some(format!("{} not found", config.binary)))
                .await;
            return None;
        };

        let spawned = Command::new(&binary)
            .args(&config.args)
            .arg("-o")
            .arg(&config.osd_name)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                controller
                    .record_hardware_error(Some(format!("spawning {}: {}", binary.display(), e)))
                    .await;
                return None;
            }
        };
        info!(
            "Remote: started {} (pid {:?})",
            binary.display(),
            child.id()
        );

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(drain_stderr(stderr));
        }
        let Some(stdout) = child.stdout.take() else {
            controller
                .record_hardware_error(Some("remote client has no stdout".to_string()))
                .await;
            return None;
        };

        let stdin = child.stdin.take();
        let cancel = CancellationToken::new();
        let reader = tokio::spawn(read_events(
            child,
            stdout,
            subs,
            controller,
            cancel.clone(),
        ));

        Some(Arc::new(Self {
            stdin: Mutex::new(stdin),
            cancel,
            reader: Mutex::new(Some(reader)),
        }))
    }

    /// Switch the TV on or put it in standby.
    pub async fn power(&self, on: bool) -> Result<(), String> {
        let command = if on { "on 0\n" } else { "standby 0\n" };
        let mut stdin = self.stdin.lock().await;
        let pipe = stdin
            .as_mut()
            .ok_or_else(|| "remote link is closed".to_string())?;
        pipe.write_all(command.as_bytes())
            .await
            .map_err(|e| format!("writing to remote client: {}", e))?;
        pipe.flush()
            .await
            .map_err(|e| format!("writing to remote client: {}", e))?;
        debug!("Remote: sent {}", command.trim_end());
        Ok(())
    }

    /// Kill the client and wait for the reader to finish.
    pub async fn shutdown(&self) {
        self.stdin.lock().await.take();
        self.cancel.cancel();
        if let Some(reader) = self.reader.lock().await.take() {
            if let Err(e) = reader.await {
                warn!("Remote: reader task failed: {}", e);
            }
        }
    }
}

#[async_trait]
impl PowerControl for RemoteLink {
    async fn set_power(&self, on: bool) -> Result<(), String> {
        self.power(on).await
    }
}

async fn read_events(
    mut child: Child,
    stdout: ChildStdout,
    subs: Arc<Subscriptions>,
    controller: Arc<Controller>,
    cancel: CancellationToken,
) {
    let mut lines = BufReader::new(stdout).lines();
    let mut connected = false;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Remote: stopping client");
                if let Err(e) = child.kill().await {
                    debug!("Remote: kill: {}", e);
                }
                return;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    trace!("cec: {}", line);
                    if !connected {
                        connected = true;
                        controller.record_hardware_error(None).await;
                    }
                    subs.handle_line(&line).await;
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Remote: read error: {}", e);
                    break;
                }
            }
        }
    }

    let reason = tokio::select! {
        _ = cancel.cancelled() => {
            if let Err(e) = child.kill().await {
                debug!("Remote: kill: {}", e);
            }
            return;
        }
        status = child.wait() => match status {
            Ok(status) => format!("remote client exited ({})", status),
            Err(e) => format!("remote client lost: {}", e),
        }
    };
    controller.record_hardware_error(Some(reason)).await;
}

async fn drain_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!("cec stderr: {}", line);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::controller::tests::{library, simulated};
    use crate::remote::default_bindings;
    use pilot_proto::protocol::Status;
    use std::path::Path;
    use std::time::Duration;

    fn fake_client(script: &str) -> RemoteConfig {
        RemoteConfig {
            binary: "sh".into(),
            args: vec!["-c".into(), script.into(), "cec".into()],
            ..RemoteConfig::default()
        }
    }

    fn controller() -> Arc<Controller> {
        Arc::new(Controller::new(simulated(0.0), library(&["Movies/a.mp4"])))
    }

    async fn wait_for<F>(controller: &Controller, mut done: F) -> Status
    where
        F: FnMut(&Status) -> bool,
    {
        for _ in 0..100 {
            let status = controller.status().await;
            if done(&status) {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        controller.status().await
    }

    async fn wait_for_file(path: &Path, expected: &str) -> String {
        for _ in 0..100 {
            let content = std::fs::read_to_string(path).unwrap_or_default();
            if content == expected {
                return content;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        std::fs::read_to_string(path).unwrap_or_default()
    }

    #[tokio::test]
    async fn test_key_press_feed_and_power_commands() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("stdin.log");
        let script = format!(
            r#"echo "key pressed: play (44, 0)"
while read line; do echo "$line" >> {}; done"#,
            log.display()
        );

        let controller = controller();
        controller
            .record_hardware_error(Some("stale".into()))
            .await;
        controller.play("Movies/a.mp4").await.unwrap();
        controller.pause().await.unwrap();

        let subs = Arc::new(default_bindings(Arc::clone(&controller), 30));
        let link = RemoteLink::start(&fake_client(&script), subs, Arc::clone(&controller))
            .await
            .unwrap();

        let status = wait_for(&controller, |s| !s.paused).await;
        assert!(!status.paused);
        assert_eq!(status.playing, "Movies/a.mp4");
        assert!(status.hardware_error.is_none());

        link.power(true).await.unwrap();
        link.power(false).await.unwrap();
        assert_eq!(wait_for_file(&log, "on 0\nstandby 0\n").await, "on 0\nstandby 0\n");

        link.shutdown().await;
        assert!(link.power(true).await.is_err());
    }

    #[tokio::test]
    async fn test_missing_client_is_recorded() {
        let controller = controller();
        let config = RemoteConfig {
            binary: "no-such-cec-client".into(),
            ..RemoteConfig::default()
        };
        let subs = Arc::new(Subscriptions::default());
        assert!(RemoteLink::start(&config, subs, Arc::clone(&controller))
            .await
            .is_none());
        let error = controller.status().await.hardware_error.unwrap();
        assert!(error.contains("no-such-cec-client"));
    }

    #[tokio::test]
    async fn test_client_exit_is_recorded() {
        let controller = controller();
        let subs = Arc::new(Subscriptions::default());
        let link = RemoteLink::start(&fake_client("exit 3"), subs, Arc::clone(&controller))
            .await
            .unwrap();

        let status = wait_for(&controller, |s| s.hardware_error.is_some()).await;
        assert!(status.hardware_error.unwrap().contains("exited"));
        link.shutdown().await;
    }
}
