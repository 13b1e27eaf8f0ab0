//! Recognition engine contract.
//!
//! [`RecognitionEngine`] is the seam between the transcription pipeline and
//! whatever speech-to-text backend is in use.  It is object-safe and
//! `Send + Sync` so it can live behind an `Arc<dyn RecognitionEngine>`.
//!
//! A session is a pair of explicitly-typed channels
//! ([`RecognitionSession`]): the pipeline's feeder task owns the input
//! sender, the results task owns the output receiver, and nobody else
//! touches either end — strict single-producer/single-consumer.  Closing
//! the input sender signals end-of-input; the engine closes the output side
//! once it has drained everything.
//!
//! [`MockRecognitionEngine`] (test-only) scripts a result sequence so the
//! pipeline can be tested without a model file.

use thiserror::Error;
use tokio::sync::mpsc;

use crate::audio::{AudioBuffer, FormatSpec};

// ---------------------------------------------------------------------------
// SttError
// ---------------------------------------------------------------------------

/// Errors from recognition-engine implementations.
#[derive(Debug, Clone, Error)]
pub enum SttError {
    /// The model file was not found at the configured path.
    #[error("model not found: {0}")]
    ModelNotFound(String),

    /// The backend failed to initialise its context.
    #[error("engine context initialisation failed: {0}")]
    ContextInit(String),

    /// An error occurred during a decode pass.
    #[error("decode error: {0}")]
    Decode(String),

    /// The engine is not in the [`EngineAvailability::Available`] state.
    #[error("engine unavailable: {0:?}")]
    Unavailable(EngineAvailability),
}

// ---------------------------------------------------------------------------
// EngineAvailability
// ---------------------------------------------------------------------------

/// Asset/model availability state of a recognition engine.
///
/// Callers must query this before starting a session and refuse to start
/// unless `Available`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineAvailability {
    /// Ready to transcribe.
    Available,
    /// This device/configuration cannot run the engine at all.
    NotEligible,
    /// The engine is disabled in configuration.
    NotEnabled,
    /// The model asset has not finished arriving on disk.
    ModelDownloading,
}

// ---------------------------------------------------------------------------
// RecognitionResult
// ---------------------------------------------------------------------------

/// One incremental output from the engine.
///
/// Non-final results are volatile hypotheses that wholly replace their
/// predecessor; a final result is immutable once emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognitionResult {
    pub text: String,
    pub is_final: bool,
}

impl RecognitionResult {
    pub fn volatile(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: false,
        }
    }

    pub fn finalized(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: true,
        }
    }
}

// ---------------------------------------------------------------------------
// RecognitionSession
// ---------------------------------------------------------------------------

/// Live engine session: feed buffers in, read results out.
///
/// Dropping `audio_tx` is the end-of-input signal.  A session that has
/// completed cannot be reused; start a fresh one per recording.
pub struct RecognitionSession {
    pub audio_tx: mpsc::Sender<AudioBuffer>,
    pub results_rx: mpsc::Receiver<RecognitionResult>,
}

// ---------------------------------------------------------------------------
// RecognitionEngine trait
// ---------------------------------------------------------------------------

/// Object-safe, thread-safe interface to a speech-to-text backend.
pub trait RecognitionEngine: Send + Sync {
    /// Current asset/model availability.
    fn availability(&self) -> EngineAvailability;

    /// The fixed format this engine consumes; the pipeline converts into it.
    fn required_format(&self) -> FormatSpec;

    /// Open a streaming session.  `format` is the format the caller will
    /// actually feed — implementations may reject formats they cannot take.
    fn start_session(&self, format: FormatSpec) -> Result<RecognitionSession, SttError>;
}

// Compile-time assertion: Box<dyn RecognitionEngine> must be constructible.
const _: fn() = || {
    fn _assert_object_safe(_: Box<dyn RecognitionEngine>) {}
};

// ---------------------------------------------------------------------------
// MockRecognitionEngine  (test-only)
// ---------------------------------------------------------------------------

/// Test double that emits a scripted result per received buffer, then a
/// configurable tail at end-of-input.
#[cfg(test)]
pub struct MockRecognitionEngine {
    availability: EngineAvailability,
    /// Results emitted one per incoming buffer, in order; extra buffers
    /// produce nothing.
    per_buffer: Vec<RecognitionResult>,
    /// Results emitted after the input channel closes.
    on_drain: Vec<RecognitionResult>,
    /// When set, the drain phase never completes (hung-engine simulation).
    hang_on_drain: bool,
}

#[cfg(test)]
impl MockRecognitionEngine {
    pub fn scripted(
        per_buffer: Vec<RecognitionResult>,
        on_drain: Vec<RecognitionResult>,
    ) -> Self {
        Self {
            availability: EngineAvailability::Available,
            per_buffer,
            on_drain,
            hang_on_drain: false,
        }
    }

    /// An engine that consumes audio but never produces text.
    pub fn silent() -> Self {
        Self::scripted(Vec::new(), Vec::new())
    }

    pub fn unavailable(availability: EngineAvailability) -> Self {
        Self {
            availability,
            per_buffer: Vec::new(),
            on_drain: Vec::new(),
            hang_on_drain: false,
        }
    }

    /// An engine that never finishes draining — for timeout tests.
    pub fn hanging(per_buffer: Vec<RecognitionResult>) -> Self {
        Self {
            availability: EngineAvailability::Available,
            per_buffer,
            on_drain: Vec::new(),
            hang_on_drain: true,
        }
    }
}

#[cfg(test)]
impl RecognitionEngine for MockRecognitionEngine {
    fn availability(&self) -> EngineAvailability {
        self.availability
    }

    fn required_format(&self) -> FormatSpec {
        FormatSpec::recognition()
    }

    fn start_session(&self, _format: FormatSpec) -> Result<RecognitionSession, SttError> {
        if self.availability != EngineAvailability::Available {
            return Err(SttError::Unavailable(self.availability));
        }

        let (audio_tx, mut audio_rx) = mpsc::channel::<AudioBuffer>(32);
        let (results_tx, results_rx) = mpsc::channel::<RecognitionResult>(32);

        let per_buffer = self.per_buffer.clone();
        let on_drain = self.on_drain.clone();
        let hang = self.hang_on_drain;

        tokio::spawn(async move {
            let mut index = 0usize;
            while let Some(_buffer) = audio_rx.recv().await {
                if let Some(result) = per_buffer.get(index) {
                    if results_tx.send(result.clone()).await.is_err() {
                        return;
                    }
                }
                index += 1;
            }

            if hang {
                // Simulate a wedged engine: hold the results channel open.
                std::future::pending::<()>().await;
            } else {
                for result in on_drain {
                    if results_tx.send(result).await.is_err() {
                        return;
                    }
                }
            }
        });

        Ok(RecognitionSession {
            audio_tx,
            results_rx,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn box_dyn_engine_compiles() {
        // If this test compiles, the trait is object-safe.
        let engine: Box<dyn RecognitionEngine> = Box::new(MockRecognitionEngine::silent());
        assert_eq!(engine.availability(), EngineAvailability::Available);
    }

    #[test]
    fn unavailable_mock_refuses_sessions() {
        let engine = MockRecognitionEngine::unavailable(EngineAvailability::ModelDownloading);
        assert!(matches!(
            engine.start_session(FormatSpec::recognition()),
            Err(SttError::Unavailable(EngineAvailability::ModelDownloading))
        ));
    }

    #[tokio::test]
    async fn scripted_mock_emits_per_buffer_then_drain() {
        let engine = MockRecognitionEngine::scripted(
            vec![RecognitionResult::volatile("he")],
            vec![RecognitionResult::finalized("hello")],
        );
        let mut session = engine.start_session(FormatSpec::recognition()).unwrap();

        session
            .audio_tx
            .send(AudioBuffer::new(vec![0.0; 160], FormatSpec::recognition()))
            .await
            .unwrap();
        drop(session.audio_tx);

        assert_eq!(
            session.results_rx.recv().await,
            Some(RecognitionResult::volatile("he"))
        );
        assert_eq!(
            session.results_rx.recv().await,
            Some(RecognitionResult::finalized("hello"))
        );
        assert_eq!(session.results_rx.recv().await, None);
    }
}
