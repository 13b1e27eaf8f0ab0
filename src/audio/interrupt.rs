//! External interruption handling (another audio consumer taking priority).
//!
//! [`InterruptionCoordinator`] pauses capture when an interruption begins
//! and — only when the end signal says so — resumes it afterwards.  It
//! never tears session state down: an interruption that ends without
//! "should resume" leaves the recording paused for the caller to resume
//! explicitly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use super::capture::{CaptureEngine, CaptureError};

// ---------------------------------------------------------------------------
// InterruptionEvent
// ---------------------------------------------------------------------------

/// Interruption begin/end signals from the platform audio layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptionEvent {
    Began,
    Ended { should_resume: bool },
}

// ---------------------------------------------------------------------------
// InterruptionStatus
// ---------------------------------------------------------------------------

/// Observable "session is currently interrupted" flag.
#[derive(Clone, Debug, Default)]
pub struct InterruptionStatus {
    interrupted: Arc<AtomicBool>,
}

impl InterruptionStatus {
    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::Relaxed)
    }

    fn set(&self, value: bool) {
        self.interrupted.store(value, Ordering::Relaxed);
    }
}

// ---------------------------------------------------------------------------
// InterruptionCoordinator
// ---------------------------------------------------------------------------

pub struct InterruptionCoordinator {
    engine: Arc<tokio::sync::Mutex<CaptureEngine>>,
    status: InterruptionStatus,
}

impl InterruptionCoordinator {
    pub fn new(engine: Arc<tokio::sync::Mutex<CaptureEngine>>) -> (Self, InterruptionStatus) {
        let status = InterruptionStatus::default();
        (
            Self {
                engine,
                status: status.clone(),
            },
            status,
        )
    }

    /// Consume interruption events until the channel closes.
    pub async fn run(self, mut events_rx: mpsc::Receiver<InterruptionEvent>) {
        while let Some(event) = events_rx.recv().await {
            match event {
                InterruptionEvent::Began => {
                    let mut engine = self.engine.lock().await;
                    match engine.pause() {
                        Ok(()) => log::info!("interrupt: began, capture paused"),
                        // Nothing recording: still note the interruption.
                        Err(CaptureError::CannotPause) => {
                            log::debug!("interrupt: began with nothing to pause")
                        }
                        Err(e) => log::warn!("interrupt: pause failed: {e}"),
                    }
                    self.status.set(true);
                }
                InterruptionEvent::Ended { should_resume } => {
                    if should_resume && self.status.is_interrupted() {
                        let mut engine = self.engine.lock().await;
                        match engine.resume() {
                            Ok(()) => log::info!("interrupt: ended, capture resumed"),
                            Err(CaptureError::CannotResume) => {
                                log::debug!("interrupt: ended with nothing to resume")
                            }
                            Err(e) => {
                                // Leave paused; the caller resumes manually.
                                log::warn!(
                                    "interrupt: resume failed, recording stays paused: {e}"
                                );
                            }
                        }
                    } else {
                        log::info!("interrupt: ended, leaving capture paused");
                    }
                    self.status.set(false);
                }
            }
        }
        log::debug!("interrupt: coordinator shutting down");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
