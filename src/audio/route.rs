//! Input-device route changes: detection, debounce, and hot-swap restarts.
//!
//! [`DeviceWatcher`] polls the current input device identity (cpal has no
//! portable device-change notification) and emits a [`RouteChangeEvent`]
//! whenever it moves.  [`RouteChangeCoordinator`] consumes those events,
//! debounces bursts — unplugging a headset often produces several rapid
//! changes while the OS renegotiates — and then drives one
//! [`CaptureEngine::hot_swap`] per settled burst.
//!
//! Hot-swap failures never reach a user command.  They are logged and
//! surfaced through the [`RouteStatus`] flag; the session is left either on
//! the previous device (if still valid) or stalled until the next route
//! change gives the coordinator another chance.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use super::capture::{CaptureEngine, CaptureError};

// ---------------------------------------------------------------------------
// RouteChangeEvent
// ---------------------------------------------------------------------------

/// The current input device changed identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteChangeEvent {
    pub old_device: String,
    pub new_device: String,
}

// ---------------------------------------------------------------------------
// DeviceWatcher
// ---------------------------------------------------------------------------

/// Polls a device-identity source and reports changes.
pub struct DeviceWatcher;

impl DeviceWatcher {
    /// Spawn the polling task.  `current_name` is queried every
    /// `poll_interval`; a changed (non-`None`) name emits one event.  The
    /// task ends when the receiving side of `events_tx` goes away.
    pub fn spawn(
        poll_interval: Duration,
        current_name: impl Fn() -> Option<String> + Send + 'static,
        events_tx: mpsc::Sender<RouteChangeEvent>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut last = current_name();
            loop {
                tokio::time::sleep(poll_interval).await;
                if events_tx.is_closed() {
                    break;
                }

                let Some(name) = current_name() else { continue };
                match &last {
                    Some(prev) if *prev != name => {
                        let event = RouteChangeEvent {
                            old_device: prev.clone(),
                            new_device: name.clone(),
                        };
                        log::info!(
                            "route: device changed '{}' -> '{}'",
                            event.old_device,
                            event.new_device
                        );
                        if events_tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    _ => {}
                }
                last = Some(name);
            }
        })
    }
}

/// Identity of the system default input device, if any.
pub fn default_device_name() -> Option<String> {
    use cpal::traits::{DeviceTrait, HostTrait};
    cpal::default_host()
        .default_input_device()
        .and_then(|d| d.name().ok())
}

// ---------------------------------------------------------------------------
// RouteStatus
// ---------------------------------------------------------------------------

/// Observable outcome of the most recent hot-swap attempt.
#[derive(Clone, Debug, Default)]
pub struct RouteStatus {
    stalled: Arc<AtomicBool>,
}

impl RouteStatus {
    /// `true` when the last route change left the session without a live
    /// stream.  Clears when a later swap succeeds.
    pub fn is_stalled(&self) -> bool {
        self.stalled.load(Ordering::Relaxed)
    }

    fn set(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::Relaxed);
    }
}

// ---------------------------------------------------------------------------
// RouteChangeCoordinator
// ---------------------------------------------------------------------------

pub struct RouteChangeCoordinator {
    engine: Arc<tokio::sync::Mutex<CaptureEngine>>,
    debounce: Duration,
    status: RouteStatus,
}

impl RouteChangeCoordinator {
    pub fn new(
        engine: Arc<tokio::sync::Mutex<CaptureEngine>>,
        debounce: Duration,
    ) -> (Self, RouteStatus) {
        let status = RouteStatus::default();
        (
            Self {
                engine,
                debounce,
                status: status.clone(),
            },
            status,
        )
    }

    /// Consume route events until the channel closes.
    pub async fn run(self, mut events_rx: mpsc::Receiver<RouteChangeEvent>) {
        while let Some(first) = events_rx.recv().await {
            let mut settled = first;

            // Debounce: absorb the burst until a quiet window elapses.
            loop {
                match tokio::time::timeout(self.debounce, events_rx.recv()).await {
                    Ok(Some(event)) => settled = event,
                    Ok(None) | Err(_) => break,
                }
            }

            let mut engine = self.engine.lock().await;
            if !engine.is_active() {
                log::debug!(
                    "route: ignoring change to '{}' with no session",
                    settled.new_device
                );
                continue;
            }

            match engine.hot_swap().await {
                Ok(()) => {
                    self.status.set(false);
                }
                Err(CaptureError::NoActiveSession) => {}
                Err(e) => {
                    // Availability over consistency: flag and stall, the
                    // file keeps whatever was captured.
                    log::warn!(
                        "route: hot-swap to '{}' failed, session stalled: {e}",
                        settled.new_device
                    );
                    self.status.set(true);
                }
            }
        }
        log::debug!("route: coordinator shutting down");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::capture::CaptureConfig;
    use crate::audio::format::FormatSpec;
    use crate::audio::input::{MockDriver, MockInput};
    use crate::audio::sink::FlushPolicy;
    use tempfile::tempdir;

    fn engine_with_mock() -> (Arc<tokio::sync::Mutex<CaptureEngine>>, MockDriver) {
        let (input, driver) = MockInput::new(FormatSpec::new(16_000.0, 1));
        let config = CaptureConfig {
            settle_delay: Duration::ZERO,
            flush: FlushPolicy {
                poll_interval: Duration::from_millis(2),
                stable_reads: 2,
                max_attempts: 10,
            },
            ..CaptureConfig::default()
        };
        (
            Arc::new(tokio::sync::Mutex::new(CaptureEngine::new(
                Box::new(input),
                config,
            ))),
            driver,
        )
    }

    fn event(n: u32) -> RouteChangeEvent {
        RouteChangeEvent {
            old_device: format!("dev-{}", n - 1),
            new_device: format!("dev-{n}"),
        }
    }

    #[tokio::test]
    async fn burst_of_events_causes_single_hot_swap() {
        let dir = tempdir().unwrap();
        let (engine, driver) = engine_with_mock();
        let _rx = engine.lock().await.start(dir.path().join("b.wav")).unwrap();

        let (tx, rx) = mpsc::channel(8);
        let (coordinator, status) =
            RouteChangeCoordinator::new(engine.clone(), Duration::from_millis(20));
        let task = tokio::spawn(coordinator.run(rx));

        // Three rapid changes — flapping — then quiet.
        for n in 1..=3 {
            tx.send(event(n)).await.unwrap();
        }
        drop(tx);
        task.await.unwrap();

        assert_eq!(driver.rebinds(), 1, "debounce collapsed the burst");
        assert!(!status.is_stalled());

        engine.lock().await.stop().await.unwrap();
    }

    #[tokio::test]
    async fn events_without_session_are_ignored() {
        let (engine, driver) = engine_with_mock();

        let (tx, rx) = mpsc::channel(8);
        let (coordinator, _status) =
            RouteChangeCoordinator::new(engine.clone(), Duration::from_millis(5));
        let task = tokio::spawn(coordinator.run(rx));

        tx.send(event(1)).await.unwrap();
        drop(tx);
        task.await.unwrap();

        assert_eq!(driver.rebinds(), 0);
    }

    #[tokio::test]
    async fn failed_swap_sets_stalled_and_later_swap_clears_it() {
        let dir = tempdir().unwrap();
        let (engine, driver) = engine_with_mock();
        let _rx = engine.lock().await.start(dir.path().join("s.wav")).unwrap();

        let (tx, rx) = mpsc::channel(8);
        let (coordinator, status) =
            RouteChangeCoordinator::new(engine.clone(), Duration::from_millis(5));
        let task = tokio::spawn(coordinator.run(rx));

        // First change lands on a device mid-renegotiation.
        driver.set_format(FormatSpec::new(0.0, 0));
        tx.send(event(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(status.is_stalled());

        // Next change finds a healthy device.
        driver.set_format(FormatSpec::new(48_000.0, 1));
        tx.send(event(2)).await.unwrap();
        drop(tx);
        task.await.unwrap();

        assert!(!status.is_stalled());
        assert!(driver.is_streaming());

        engine.lock().await.stop().await.unwrap();
    }

    #[tokio::test]
    async fn watcher_emits_on_identity_change() {
        let names = Arc::new(std::sync::Mutex::new("mic-a".to_string()));
        let names_for_poll = names.clone();

        let (tx, mut rx) = mpsc::channel(8);
        let task = DeviceWatcher::spawn(
            Duration::from_millis(5),
            move || Some(names_for_poll.lock().unwrap().clone()),
            tx,
        );

        tokio::time::sleep(Duration::from_millis(15)).await;
        *names.lock().unwrap() = "mic-b".to_string();

        let event = rx.recv().await.expect("route change event");
        assert_eq!(event.old_device, "mic-a");
        assert_eq!(event.new_device, "mic-b");

        drop(rx);
        let _ = task.await;
    }
}
