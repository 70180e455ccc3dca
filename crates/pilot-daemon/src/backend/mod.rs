//! Player backends.
//!
//! Every backend speaks the same small command set; the controller picks one
//! at startup from `backend.kind` and never looks behind the trait.
//!
//! ```text
//!   Controller ──► Box<dyn PlayerBackend>
//!                     ├── ProcessBackend    spawned player + session-bus control
//!                     ├── NetworkBackend    player's HTTP control interface
//!                     └── SimulatedBackend  virtual clock, fault injection
//! ```
pub mod dbus;
pub mod network;
pub mod process;
pub mod simulated;

use std::time::Duration;

use async_trait::async_trait;
use pilot_proto::config::{BackendKind, Config};

use crate::error::BackendError;

pub use network::NetworkBackend;
pub use process::ProcessBackend;
pub use simulated::SimulatedBackend;

/// What the backend believes is happening right now.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendStatus {
    /// `None` when nothing is loaded (never started, stopped, or finished).
    pub playing: Option<String>,
    pub paused: bool,
    pub position: Duration,
    /// Zero while unknown.
    pub duration: Duration,
}

#[async_trait]
pub trait PlayerBackend: Send {
    /// Short label for logs.
    fn name(&self) -> &'static str;

    /// Begin playing `filename`, relative to the media root.
    async fn start(&mut self, filename: &str) -> Result<(), BackendError>;

    async fn pause(&mut self) -> Result<(), BackendError>;

    async fn resume(&mut self) -> Result<(), BackendError>;

    /// Stop playback and release whatever the backend holds.  Stopping an
    /// idle backend succeeds.
    async fn stop(&mut self) -> Result<(), BackendError>;

    /// Move the playhead by `delta_ms` (negative rewinds).
    async fn seek(&mut self, delta_ms: i64) -> Result<(), BackendError>;

    /// Side-effect-free read, bounded by a timeout.  `Ok` with nothing
    /// playing means the player is known to be idle; `Err` means it could not
    /// be asked.
    async fn query_status(&mut self) -> Result<BackendStatus, BackendError>;
}

/// Build the backend selected by `config.backend.kind`.
pub fn build(config: &Config) -> anyhow::Result<Box<dyn PlayerBackend>> {
    let backend: Box<dyn PlayerBackend> = match config.backend.kind {
        BackendKind::Process => Box::new(ProcessBackend::new(
            config.player.clone(),
            config.library.root.clone(),
        )),
        BackendKind::Network => Box::new(NetworkBackend::new(
            &config.network,
            config.library.root.clone(),
        )?),
        BackendKind::Simulated => Box::new(SimulatedBackend::new(config.simulated.clone())),
    };
    Ok(backend)
}

/// Offset `position` by `delta_ms`, clamped to `[0, duration]`.  A zero
/// duration means "unknown" and only the lower bound applies.
pub fn apply_seek(position: Duration, delta_ms: i64, duration: Duration) -> Duration {
    let delta = Duration::from_millis(delta_ms.unsigned_abs());
    let moved = if delta_ms < 0 {
        position.saturating_sub(delta)
    } else {
        position.saturating_add(delta)
    };
    if duration.is_zero() {
        moved
    } else {
        moved.min(duration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_seek_clamps() {
        let d = Duration::from_secs(100);
        assert_eq!(apply_seek(Duration::from_secs(10), 5_000, d), Duration::from_secs(15));
        assert_eq!(apply_seek(Duration::from_secs(10), 500_000, d), d);
        assert_eq!(apply_seek(Duration::from_secs(10), -60_000, d), Duration::ZERO);
    }

    #[test]
    fn test_apply_seek_unknown_duration() {
        assert_eq!(
            apply_seek(Duration::from_secs(10), 500_000, Duration::ZERO),
            Duration::from_secs(510)
        );
        assert_eq!(apply_seek(Duration::ZERO, -1, Duration::ZERO), Duration::ZERO);
    }
}
