/// Simulated player: a virtual clock, no hardware.
///
/// A ticker task advances the position once per `tick_ms` while something is
/// playing and not paused.  Every operation can be slowed down and made to
/// fail at random, which is how the controller's failure handling is
/// exercised without a TV attached.
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pilot_proto::config::SimulatedConfig;
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{apply_seek, BackendStatus, PlayerBackend};
use crate::error::BackendError;

#[derive(Debug, Default)]
struct VirtualClock {
    playing: Option<String>,
    paused: bool,
    position: Duration,
    duration: Duration,
}

impl VirtualClock {
    fn advance(&mut self, step: Duration) {
        if self.playing.is_some() && !self.paused {
            self.position = (self.position + step).min(self.duration);
        }
    }
}

pub struct SimulatedBackend {
    config: SimulatedConfig,
    clock: Arc<Mutex<VirtualClock>>,
    ticker: CancellationToken,
}

impl SimulatedBackend {
    /// Must be called from within a tokio runtime (spawns the ticker).
    pub fn new(config: SimulatedConfig) -> Self {
        let clock = Arc::new(Mutex::new(VirtualClock::default()));
        let ticker = CancellationToken::new();
        let tick = Duration::from_millis(config.tick_ms.max(1));
        tokio::spawn(run_ticker(Arc::clone(&clock), tick, ticker.clone()));
        Self {
            config,
            clock,
            ticker,
        }
    }

    fn clock(&self) -> std::sync::MutexGuard<'_, VirtualClock> {
        self.clock.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Apply the configured latency, then roll for an injected failure.
    async fn roll(&self, op: &'static str) -> Result<(), BackendError> {
        if self.config.op_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.op_delay_ms)).await;
        }
        let rate = self.config.failure_rate.clamp(0.0, 1.0);
        let failed = rate > 0.0 && rand::thread_rng().gen_bool(rate);
        if failed {
            debug!("simulated: injecting {} failure", op);
            return Err(BackendError::Injected(op));
        }
        Ok(())
    }
}

impl Drop for SimulatedBackend {
    fn drop(&mut self) {
        self.ticker.cancel();
    }
}

async fn run_ticker(clock: Arc<Mutex<VirtualClock>>, tick: Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(tick);
    // The first tick completes immediately.
    interval.tick().await;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                clock.lock().unwrap_or_else(|e| e.into_inner()).advance(tick);
            }
        }
    }
}

/// A plausible running time: between one minute and an hour.
fn random_duration() -> Duration {
    Duration::from_millis(rand::thread_rng().gen_range(60_000..3_600_000))
}

#[async_trait]
impl PlayerBackend for SimulatedBackend {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn start(&mut self, filename: &str) -> Result<(), BackendError> {
        self.roll("start").await?;
        let mut clock = self.clock();
        clock.playing = Some(filename.to_string());
        clock.paused = false;
        clock.position = Duration::ZERO;
        clock.duration = random_duration();
        debug!("simulated: playing {} ({:?})", filename, clock.duration);
        Ok(())
    }

    async fn pause(&mut self) -> Result<(), BackendError> {
        self.roll("pause").await?;
        self.clock().paused = true;
        Ok(())
    }

    async fn resume(&mut self) -> Result<(), BackendError> {
        self.roll("resume").await?;
        self.clock().paused = false;
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), BackendError> {
        // Cleared first: even a failed stop leaves nothing playing.
        *self.clock() = VirtualClock::default();
        self.roll("stop").await
    }

    async fn seek(&mut self, delta_ms: i64) -> Result<(), BackendError> {
        let idle = self.clock().playing.is_none();
        if idle {
            return Ok(());
        }
        self.roll("seek").await?;
        let mut clock = self.clock();
        clock.position = apply_seek(clock.position, delta_ms, clock.duration);
        Ok(())
    }

    async fn query_status(&mut self) -> Result<BackendStatus, BackendError> {
        let clock = self.clock();
        Ok(BackendStatus {
            playing: clock.playing.clone(),
            paused: clock.paused,
            position: clock.position,
            duration: clock.duration,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(failure_rate: f64, tick_ms: u64) -> SimulatedBackend {
        SimulatedBackend::new(SimulatedConfig {
            failure_rate,
            op_delay_ms: 0,
            tick_ms,
        })
    }

    #[tokio::test]
    async fn test_ticker_advances_only_while_playing() {
        let mut sim = backend(0.0, 10);
        sim.start("Movies/a.mp4").await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let status = sim.query_status().await.unwrap();
        assert_eq!(status.playing.as_deref(), Some("Movies/a.mp4"));
        assert!(status.position > Duration::ZERO);
        assert!(status.position <= status.duration);

        sim.pause().await.unwrap();
        let frozen = sim.query_status().await.unwrap().position;
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(sim.query_status().await.unwrap().position, frozen);
    }

    #[tokio::test]
    async fn test_seek_clamps_to_duration() {
        let mut sim = backend(0.0, 60_000);
        sim.start("Movies/a.mp4").await.unwrap();
        let duration = sim.query_status().await.unwrap().duration;

        sim.seek(duration.as_millis() as i64 * 2).await.unwrap();
        assert_eq!(sim.query_status().await.unwrap().position, duration);

        sim.seek(-(duration.as_millis() as i64) * 3).await.unwrap();
        assert_eq!(sim.query_status().await.unwrap().position, Duration::ZERO);
    }

    #[tokio::test]
    async fn test_injected_failures_leave_state_untouched() {
        let mut sim = backend(1.0, 60_000);
        assert!(matches!(
            sim.start("Movies/a.mp4").await,
            Err(BackendError::Injected("start"))
        ));
        assert_eq!(sim.query_status().await.unwrap(), BackendStatus::default());

        // A failing stop still clears the clock.
        assert!(sim.stop().await.is_err());
        assert!(sim.query_status().await.unwrap().playing.is_none());
    }

    #[tokio::test]
    async fn test_idle_seek_is_noop() {
        let mut sim = backend(1.0, 60_000);
        sim.seek(10_000).await.unwrap();
    }
}
