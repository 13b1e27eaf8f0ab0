//! Transcription pipeline and session orchestration.
//!
//! [`TranscriptionPipeline`] feeds captured audio to a recognition engine
//! and reconciles its incremental results; [`VoiceRecorder`] composes it
//! with the capture engine behind the `start/stop/pause/resume/cancel`
//! command surface and the [`SessionPhase`] state machine.

pub mod reconcile;
pub mod runner;
pub mod state;
pub mod transcribe;

pub use reconcile::{normalize_whitespace, TranscriptState};
pub use runner::{FinishedRecording, RecorderError, VoiceRecorder};
pub use state::SessionPhase;
pub use transcribe::{PipelineError, StopOutcome, TranscriptionPipeline};
