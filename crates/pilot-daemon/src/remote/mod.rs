//! HDMI-CEC remote control.
//!
//! ```text
//!   cec-client stdout ──► classify(line) ──► Subscriptions ──► Controller
//!   Controller::turn_on/off ──► RemoteLink ──► cec-client stdin
//! ```
//!
//! The subscription table is filled once at startup, then shared read-only.
pub mod cec;
pub mod classifier;

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use tracing::{debug, warn};

use crate::controller::Controller;

pub use cec::RemoteLink;
pub use classifier::classify;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteEvent {
    Unknown,
    Pause,
    Play,
    Stop,
    FastForward,
    Rewind,
}

type Callback = Box<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// At most one callback per event kind.
#[derive(Default)]
pub struct Subscriptions {
    callbacks: HashMap<RemoteEvent, Callback>,
}

impl Subscriptions {
    /// Register `callback` for `event`, replacing any earlier one.
    pub fn on<F>(&mut self, event: RemoteEvent, callback: F)
    where
        F: Fn() -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        if self.callbacks.insert(event, Box::new(callback)).is_some() {
            debug!("Remote: replaced {:?} callback", event);
        }
    }

    /// Run the callback bound to `event`, if any.
    pub async fn dispatch(&self, event: RemoteEvent) {
        match self.callbacks.get(&event) {
            Some(callback) => callback().await,
            None => debug!("Remote: no callback for {:?}", event),
        }
    }

    /// Classify one line of client output and dispatch it.
    pub async fn handle_line(&self, line: &str) {
        let event = classify(line);
        if event != RemoteEvent::Unknown {
            debug!("Remote: {:?}", event);
            self.dispatch(event).await;
        }
    }
}

/// Bind the remote keys to controller operations.
pub fn default_bindings(controller: Arc<Controller>, seek_step_secs: u64) -> Subscriptions {
    let step_ms = i64::try_from(seek_step_secs.saturating_mul(1000)).unwrap_or(i64::MAX);
    let mut subs = Subscriptions::default();

    let c = Arc::clone(&controller);
    subs.on(RemoteEvent::Pause, move || {
        let c = Arc::clone(&c);
        Box::pin(async move { report("pause", c.toggle_pause().await) })
    });

    let c = Arc::clone(&controller);
    subs.on(RemoteEvent::Play, move || {
        let c = Arc::clone(&c);
        Box::pin(async move { report("play", c.resume().await) })
    });

    let c = Arc::clone(&controller);
    subs.on(RemoteEvent::Stop, move || {
        let c = Arc::clone(&c);
        Box::pin(async move { report("stop", c.stop().await) })
    });

    let c = Arc::clone(&controller);
    subs.on(RemoteEvent::FastForward, move || {
        let c = Arc::clone(&c);
        Box::pin(async move { report("fast forward", c.seek(step_ms).await) })
    });

    let c = controller;
    subs.on(RemoteEvent::Rewind, move || {
        let c = Arc::clone(&c);
        Box::pin(async move { report("rewind", c.seek(-step_ms).await) })
    });

    subs
}

fn report<T>(key: &str, result: Result<T, crate::error::ControlError>) {
    if let Err(e) = result {
        warn!("Remote: {} failed: {}", key, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::tests::{library, simulated};
    use pilot_proto::protocol::PlaybackState;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_on_overwrites_previous_callback() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let mut subs = Subscriptions::default();

        let f = Arc::clone(&first);
        subs.on(RemoteEvent::Stop, move || {
            let f = Arc::clone(&f);
            Box::pin(async move {
                f.fetch_add(1, Ordering::SeqCst);
            })
        });
        let s = Arc::clone(&second);
        subs.on(RemoteEvent::Stop, move || {
            let s = Arc::clone(&s);
            Box::pin(async move {
                s.fetch_add(1, Ordering::SeqCst);
            })
        });

        subs.handle_line("key pressed: stop (45) current(ff) duration(0)").await;
        subs.handle_line("something else entirely").await;
        subs.dispatch(RemoteEvent::Rewind).await;

        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_remote_play_resumes_paused_session() {
        let controller = Arc::new(Controller::new(
            simulated(0.0),
            library(&["Movies/a.mp4"]),
        ));
        let subs = default_bindings(Arc::clone(&controller), 30);

        controller.play("Movies/a.mp4").await.unwrap();
        controller.pause().await.unwrap();
        assert_eq!(controller.status().await.state, PlaybackState::Paused);

        subs.handle_line("key pressed: play (44, 0)").await;
        let status = controller.status().await;
        assert_eq!(status.state, PlaybackState::Playing);
        assert!(!status.paused);
        assert_eq!(status.playing, "Movies/a.mp4");

        subs.handle_line("key pressed: pause (46, 0)").await;
        assert!(controller.status().await.paused);
        subs.handle_line("key pressed: pause (46, 0)").await;
        assert!(!controller.status().await.paused);

        subs.handle_line("key pressed: Fast forward (49, 0)").await;
        assert_eq!(controller.status().await.position_ms, 30_000);
        subs.handle_line("key pressed: rewind (48, 0)").await;
        assert_eq!(controller.status().await.position_ms, 0);

        subs.handle_line("key pressed: stop (45) current(ff) duration(0)").await;
        assert!(controller.status().await.is_idle());
        // Idle stop from the remote is harmless.
        subs.handle_line("key pressed: stop (45) current(ff) duration(0)").await;
        assert!(controller.status().await.is_idle());
    }
}
