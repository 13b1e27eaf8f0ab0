//! Externally observed session state machine.
//!
//! ```text
//! Idle ──start()──▶ Recording ⇄ Paused
//!                      │  (pause/resume)
//!                      ├──stop()───▶ Stopping ──▶ Idle
//!                      └──cancel()─────────────▶ Idle
//! ```
//!
//! Route-change hot-swaps and interruption handling are internal
//! sub-transitions inside `Recording`/`Paused` and never show up here.
//!
//! The per-state session data (original format, pause bookkeeping, sink)
//! lives in the capture engine's own tagged state, where only the fields
//! valid for each state exist; this enum is the phase the consumer layer
//! observes.

// ---------------------------------------------------------------------------
// SessionPhase
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// No session; ready to start.
    Idle,
    /// Capturing and transcribing.
    Recording,
    /// Session alive, buffer production suspended.
    Paused,
    /// `stop()` in progress: stream down, finalization pending.
    Stopping,
}

impl SessionPhase {
    /// `true` while a session exists in any form.
    pub fn is_active(&self) -> bool {
        !matches!(self, SessionPhase::Idle)
    }

    /// `true` when `pause()` is a legal command.
    pub fn can_pause(&self) -> bool {
        matches!(self, SessionPhase::Recording)
    }

    /// `true` when `resume()` is a legal command.
    pub fn can_resume(&self) -> bool {
        matches!(self, SessionPhase::Paused)
    }

    /// Short label for status displays.
    pub fn label(&self) -> &'static str {
        match self {
            SessionPhase::Idle => "Idle",
            SessionPhase::Recording => "Recording",
            SessionPhase::Paused => "Paused",
            SessionPhase::Stopping => "Stopping",
        }
    }
}

impl Default for SessionPhase {
    fn default() -> Self {
        SessionPhase::Idle
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_phase_is_idle() {
        assert_eq!(SessionPhase::default(), SessionPhase::Idle);
    }

    #[test]
    fn idle_is_not_active() {
        assert!(!SessionPhase::Idle.is_active());
    }

    #[test]
    fn non_idle_phases_are_active() {
        assert!(SessionPhase::Recording.is_active());
        assert!(SessionPhase::Paused.is_active());
        assert!(SessionPhase::Stopping.is_active());
    }

    #[test]
    fn only_recording_can_pause() {
        assert!(SessionPhase::Recording.can_pause());
        assert!(!SessionPhase::Idle.can_pause());
        assert!(!SessionPhase::Paused.can_pause());
        assert!(!SessionPhase::Stopping.can_pause());
    }

    #[test]
    fn only_paused_can_resume() {
        assert!(SessionPhase::Paused.can_resume());
        assert!(!SessionPhase::Recording.can_resume());
        assert!(!SessionPhase::Idle.can_resume());
    }

    #[test]
    fn labels() {
        assert_eq!(SessionPhase::Idle.label(), "Idle");
        assert_eq!(SessionPhase::Recording.label(), "Recording");
        assert_eq!(SessionPhase::Paused.label(), "Paused");
        assert_eq!(SessionPhase::Stopping.label(), "Stopping");
    }
}
