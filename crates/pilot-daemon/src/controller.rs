/// Controller: single owner of the playback session and the player backend.
///
/// HTTP handlers and the CEC remote both call the public methods below; each
/// takes the one session lock for its whole duration, so at most one command
/// is in flight against the backend and later callers queue behind it.
///
/// ```text
///   Idle ──play(file)──► Playing ──pause──► Paused
///    ▲                     │  ▲               │
///    │                     │  └────resume─────┘
///    └───────stop──────────┴──────────────────┘
/// ```
///
/// Invalid transitions (pause while idle or paused, resume while playing,
/// stop or seek while idle) are logged no-ops, never errors: the remote
/// fires them blindly.  A transport failure mid-session stops the player and
/// drops the session back to idle.
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use pilot_proto::protocol::{PlaybackState, Status};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::backend::{apply_seek, PlayerBackend};
use crate::error::ControlError;
use crate::library::Library;

/// Hardware power switch for the display.
#[async_trait]
pub trait PowerControl: Send + Sync {
    async fn set_power(&self, on: bool) -> Result<(), String>;
}

// ── session ───────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct PlaybackSession {
    filename: Option<String>,
    paused: bool,
    position: Duration,
    duration: Duration,
    last_hardware_error: Option<String>,
}

impl PlaybackSession {
    fn state(&self) -> PlaybackState {
        match (&self.filename, self.paused) {
            (None, _) => PlaybackState::Idle,
            (Some(_), false) => PlaybackState::Playing,
            (Some(_), true) => PlaybackState::Paused,
        }
    }

    fn begin(&mut self, filename: &str) {
        self.filename = Some(filename.to_string());
        self.paused = false;
        self.position = Duration::ZERO;
        self.duration = Duration::ZERO;
    }

    /// Back to idle.  The hardware error belongs to the CEC link, not to
    /// playback, and survives.
    fn reset(&mut self) {
        self.filename = None;
        self.paused = false;
        self.position = Duration::ZERO;
        self.duration = Duration::ZERO;
    }

    fn set_timeline(&mut self, position: Duration, duration: Duration) {
        self.duration = duration;
        self.position = if duration.is_zero() {
            position
        } else {
            position.min(duration)
        };
    }

    fn snapshot(&self) -> Status {
        Status {
            playing: self.filename.clone().unwrap_or_default(),
            paused: self.paused,
            state: self.state(),
            position_ms: self.position.as_millis() as u64,
            duration_ms: self.duration.as_millis() as u64,
            hardware_error: self.last_hardware_error.clone(),
        }
    }
}

// ── locked state ──────────────────────────────────────────────────────────────

struct Inner {
    session: PlaybackSession,
    backend: Box<dyn PlayerBackend>,
}

impl Inner {
    /// Pull position/duration from the backend; notice a player that ended
    /// on its own.  An unreachable backend leaves the session as it is.
    async fn refresh(&mut self) {
        let Some(filename) = self.session.filename.clone() else {
            return;
        };
        let reported = match self.backend.query_status().await {
            Ok(reported) => reported,
            Err(e) => {
                debug!("Controller: status of {} unavailable: {}", filename, e);
                return;
            }
        };
        if reported.playing.is_none() {
            info!("Controller: {} is no longer playing, back to idle", filename);
            self.session.reset();
            return;
        }
        if reported.paused != self.session.paused {
            debug!(
                "Controller: {} reports paused={}, keeping {}",
                self.backend.name(),
                reported.paused,
                self.session.paused
            );
        }
        self.session.set_timeline(reported.position, reported.duration);
    }

    async fn snapshot(&mut self) -> Status {
        self.refresh().await;
        self.session.snapshot()
    }

    /// Transport failure: make sure nothing is left running, then go idle.
    async fn fail_safe(&mut self) {
        if let Err(e) = self.backend.stop().await {
            warn!("Controller: cleanup stop failed too: {}", e);
        }
        self.session.reset();
    }

    async fn start(&mut self, filename: &str) -> Result<(), ControlError> {
        match self.backend.start(filename).await {
            Ok(()) => {
                info!("Controller: playing {} via {}", filename, self.backend.name());
                self.session.begin(filename);
                Ok(())
            }
            Err(e) => {
                warn!("Controller: start {} failed: {}", filename, e);
                self.fail_safe().await;
                Err(e.into())
            }
        }
    }

    async fn pause(&mut self) -> Result<(), ControlError> {
        match self.backend.pause().await {
            Ok(()) => {
                self.session.paused = true;
                Ok(())
            }
            Err(e) => {
                warn!("Controller: pause failed: {}", e);
                self.fail_safe().await;
                Err(e.into())
            }
        }
    }

    async fn resume(&mut self) -> Result<(), ControlError> {
        match self.backend.resume().await {
            Ok(()) => {
                self.session.paused = false;
                Ok(())
            }
            Err(e) => {
                warn!("Controller: resume failed: {}", e);
                self.fail_safe().await;
                Err(e.into())
            }
        }
    }

    /// Always ends idle; a backend error is still reported.
    async fn stop(&mut self) -> Result<(), ControlError> {
        let result = self.backend.stop().await;
        self.session.reset();
        result.map_err(|e| {
            warn!("Controller: stop reported: {}", e);
            e.into()
        })
    }

    async fn seek(&mut self, delta_ms: i64) -> Result<(), ControlError> {
        match self.backend.seek(delta_ms).await {
            Ok(()) => {
                let position = apply_seek(self.session.position, delta_ms, self.session.duration);
                self.session.position = position;
                Ok(())
            }
            Err(e) => {
                warn!("Controller: seek failed: {}", e);
                self.fail_safe().await;
                Err(e.into())
            }
        }
    }
}

// ── controller ────────────────────────────────────────────────────────────────

pub struct Controller {
    inner: Mutex<Inner>,
    library: Arc<RwLock<Library>>,
    power: OnceLock<Arc<dyn PowerControl>>,
}

impl Controller {
    pub fn new(backend: Box<dyn PlayerBackend>, library: Arc<RwLock<Library>>) -> Self {
        info!("Controller: using {} backend", backend.name());
        Self {
            inner: Mutex::new(Inner {
                session: PlaybackSession::default(),
                backend,
            }),
            library,
            power: OnceLock::new(),
        }
    }

    /// Attach the display's power switch.  Only the first call takes effect.
    pub fn attach_power(&self, power: Arc<dyn PowerControl>) {
        if self.power.set(power).is_err() {
            warn!("Controller: power control already attached");
        }
    }

    pub async fn status(&self) -> Status {
        self.inner.lock().await.snapshot().await
    }

    /// Play `filename`; an empty name resumes whatever is paused.
    ///
    /// Already busy: the same file resumes (if paused) or is left alone (if
    /// playing); a different file stops the current one first.
    pub async fn play(&self, filename: &str) -> Result<Status, ControlError> {
        if filename.is_empty() {
            return self.resume().await;
        }
        if !self.library.read().await.contains(filename) {
            return Err(ControlError::NotFound(filename.to_string()));
        }

        let mut inner = self.inner.lock().await;
        let same = inner.session.filename.as_deref() == Some(filename);
        match inner.session.state() {
            PlaybackState::Paused if same => {
                info!("Controller: resuming {}", filename);
                inner.resume().await?;
            }
            PlaybackState::Playing if same => {
                info!("Controller: already playing {}", filename);
            }
            PlaybackState::Playing | PlaybackState::Paused => {
                info!(
                    "Controller: switching from {:?} to {}",
                    inner.session.filename, filename
                );
                inner.stop().await?;
                inner.start(filename).await?;
            }
            PlaybackState::Idle => inner.start(filename).await?,
        }
        Ok(inner.snapshot().await)
    }

    pub async fn pause(&self) -> Result<Status, ControlError> {
        let mut inner = self.inner.lock().await;
        match inner.session.state() {
            PlaybackState::Idle => info!("Controller: pause ignored, nothing is playing"),
            PlaybackState::Paused => info!("Controller: pause ignored, already paused"),
            PlaybackState::Playing => inner.pause().await?,
        }
        Ok(inner.snapshot().await)
    }

    pub async fn resume(&self) -> Result<Status, ControlError> {
        let mut inner = self.inner.lock().await;
        match inner.session.state() {
            PlaybackState::Idle => info!("Controller: resume ignored, nothing is playing"),
            PlaybackState::Playing => info!("Controller: resume ignored, not paused"),
            PlaybackState::Paused => inner.resume().await?,
        }
        Ok(inner.snapshot().await)
    }

    /// Pause when playing, resume when paused, in one locked step.
    pub async fn toggle_pause(&self) -> Result<Status, ControlError> {
        let mut inner = self.inner.lock().await;
        match inner.session.state() {
            PlaybackState::Idle => info!("Controller: toggle ignored, nothing is playing"),
            PlaybackState::Playing => inner.pause().await?,
            PlaybackState::Paused => inner.resume().await?,
        }
        Ok(inner.snapshot().await)
    }

    pub async fn stop(&self) -> Result<Status, ControlError> {
        let mut inner = self.inner.lock().await;
        if inner.session.state() == PlaybackState::Idle {
            info!("Controller: stop ignored, nothing is playing");
        } else {
            inner.stop().await?;
        }
        Ok(inner.snapshot().await)
    }

    pub async fn seek(&self, delta_ms: i64) -> Result<Status, ControlError> {
        let mut inner = self.inner.lock().await;
        if inner.session.state() == PlaybackState::Idle {
            info!("Controller: seek ignored, nothing is playing");
        } else {
            inner.seek(delta_ms).await?;
        }
        Ok(inner.snapshot().await)
    }

    pub async fn turn_on(&self) -> Result<Status, ControlError> {
        self.set_power(true).await
    }

    pub async fn turn_off(&self) -> Result<Status, ControlError> {
        self.set_power(false).await
    }

    async fn set_power(&self, on: bool) -> Result<Status, ControlError> {
        let power = self
            .power
            .get()
            .ok_or(ControlError::Unsupported("hardware power control"))?;
        let mut inner = self.inner.lock().await;
        info!("Controller: turning display {}", if on { "on" } else { "off" });
        power.set_power(on).await.map_err(ControlError::Hardware)?;
        Ok(inner.snapshot().await)
    }

    /// Record (or clear, with `None`) the state of the CEC link.
    pub async fn record_hardware_error(&self, error: Option<String>) {
        let mut inner = self.inner.lock().await;
        if let Some(e) = &error {
            warn!("Controller: remote control unavailable: {}", e);
        }
        inner.session.last_hardware_error = error;
    }

    /// Stop anything still playing; used on daemon exit.
    pub async fn shutdown(&self) {
        let mut inner = self.inner.lock().await;
        if inner.session.state() != PlaybackState::Idle {
            info!("Controller: shutdown, stopping playback");
            if let Err(e) = inner.stop().await {
                warn!("Controller: stop on shutdown failed: {}", e);
            }
        }
    }
}
