//! Speech-to-text: the engine contract and the Whisper implementation.
//!
//! The transcription pipeline only ever sees [`RecognitionEngine`]; the
//! concrete backend is chosen at composition time.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use livenote::stt::{DecodeParams, StreamParams, WhisperStreamEngine};
//!
//! let engine = WhisperStreamEngine::load(
//!     "models/ggml-base.en.bin",
//!     DecodeParams::default(),
//!     StreamParams::default(),
//! )
//! .expect("model missing — download it first");
//! ```

pub mod engine;
pub mod whisper;

pub use engine::{
    EngineAvailability, RecognitionEngine, RecognitionResult, RecognitionSession, SttError,
};
pub use whisper::{DecodeParams, StreamParams, WhisperStreamEngine};

// test-only re-export so pipeline test modules can import the mock without
// spelling out the full path.
#[cfg(test)]
pub use engine::MockRecognitionEngine;
