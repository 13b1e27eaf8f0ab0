//! # livenote
//!
//! Live voice-note capture and streaming transcription.
//!
//! The crate records microphone audio to a WAV file while simultaneously
//! streaming it through a speech-recognition engine, reconciling the
//! engine's incremental output into a stable transcript.  Device hot-swaps
//! and external interruptions are absorbed mid-session without breaking the
//! output file or the transcript.
//!
//! # Architecture
//!
//! ```text
//! Microphone ─▶ CaptureEngine ─┬─▶ WavSink (one continuous file)
//!   ▲  ▲                       └─▶ bounded channel
//!   │  └─ RouteChangeCoordinator        │
//!   └──── InterruptionCoordinator       ▼
//!                               TranscriptionPipeline
//!                        (FormatConverter ▶ RecognitionEngine)
//!                                       │
//!                                       ▼
//!                               TranscriptState ─▶ display text
//! ```
//!
//! [`pipeline::VoiceRecorder`] is the composition root; see `src/main.rs`
//! for the full wiring.

pub mod audio;
pub mod config;
pub mod pipeline;
pub mod stt;

pub use audio::{CaptureEngine, CaptureError, FormatSpec, LevelHandle};
pub use pipeline::{FinishedRecording, SessionPhase, VoiceRecorder};
pub use stt::{EngineAvailability, RecognitionEngine, RecognitionResult};
