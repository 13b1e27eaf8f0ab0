//! The recorder: composition root for capture + transcription.
//!
//! [`VoiceRecorder`] owns the externally observed [`SessionPhase`] machine
//! and wires the capture engine and the transcription pipeline together
//! behind the five commands the consumer layer issues:
//! `start / stop / pause / resume / cancel`.
//!
//! The capture engine sits behind an `Arc<tokio::sync::Mutex<…>>` so the
//! route-change and interruption coordinators can mutate its lifecycle
//! beside the recorder without the pipeline noticing.
//!
//! # Command flow
//!
//! ```text
//! start()  ─▶ engine availability gate ─▶ capture.start() ─▶ pipeline.start()
//! stop()   ─▶ capture.stop()  (closes buffer channel, flush-polls file)
//!          ─▶ pipeline.stop() (bounded finalization) ─▶ FinishedRecording
//! cancel() ─▶ capture.cancel() (file deleted) ─▶ pipeline.reset()
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::audio::{CaptureEngine, CaptureError, LevelHandle, StoppedRecording};
use crate::stt::{EngineAvailability, RecognitionEngine};

use super::state::SessionPhase;
use super::transcribe::{PipelineError, TranscriptionPipeline};

// ---------------------------------------------------------------------------
// RecorderError
// ---------------------------------------------------------------------------

/// Errors surfaced by recorder commands.
#[derive(Debug, Error)]
pub enum RecorderError {
    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

// ---------------------------------------------------------------------------
// FinishedRecording
// ---------------------------------------------------------------------------

/// Everything a completed session produced.
#[derive(Debug)]
pub struct FinishedRecording {
    /// Finalized audio file and timing.
    pub audio: StoppedRecording,
    /// Normalized final transcript.
    pub transcript: String,
    /// The transcription finalization wait expired; `transcript` holds
    /// whatever had been finalized by then.
    pub transcript_timed_out: bool,
}

// ---------------------------------------------------------------------------
// VoiceRecorder
// ---------------------------------------------------------------------------

pub struct VoiceRecorder {
    capture: Arc<tokio::sync::Mutex<CaptureEngine>>,
    pipeline: TranscriptionPipeline,
    recognition: Arc<dyn RecognitionEngine>,
    phase: SessionPhase,
    levels: LevelHandle,
}

impl VoiceRecorder {
    pub fn new(
        capture: CaptureEngine,
        recognition: Arc<dyn RecognitionEngine>,
        finalize_timeout: Duration,
    ) -> Self {
        let levels = capture.levels();
        Self {
            capture: Arc::new(tokio::sync::Mutex::new(capture)),
            pipeline: TranscriptionPipeline::new(recognition.clone(), finalize_timeout),
            recognition,
            phase: SessionPhase::Idle,
            levels,
        }
    }

    /// Shared handle to the capture engine for the route-change and
    /// interruption coordinators.
    pub fn capture_engine(&self) -> Arc<tokio::sync::Mutex<CaptureEngine>> {
        self.capture.clone()
    }

    // -----------------------------------------------------------------------
    // Telemetry
    // -----------------------------------------------------------------------

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Finalized + volatile transcript for display.
    pub fn display_text(&self) -> String {
        self.pipeline.display_text()
    }

    /// Input level / voice-detected handle.
    pub fn levels(&self) -> LevelHandle {
        self.levels.clone()
    }

    /// Paused-adjusted recording duration so far.
    pub async fn duration(&self) -> Duration {
        self.capture.lock().await.duration()
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    /// Start a session recording to `output_path`.
    ///
    /// The recognition engine is gated first — an unavailable engine
    /// refuses the start before any hardware is touched.  A failure
    /// anywhere leaves the recorder in `Idle` with no partial side
    /// effects (a capture that started is cancelled, its file removed).
    pub async fn start(&mut self, output_path: PathBuf) -> Result<(), RecorderError> {
        if self.phase.is_active() {
            return Err(CaptureError::SessionActive.into());
        }

        let availability = self.recognition.availability();
        if availability != EngineAvailability::Available {
            return Err(PipelineError::EngineUnavailable(availability).into());
        }

        let mut capture = self.capture.lock().await;
        let buffer_rx = capture.start(output_path)?;
        let format = capture.original_format().expect("session just started");

        if let Err(e) = self.pipeline.start(buffer_rx, format) {
            // Unwind the capture side before surfacing.
            if let Err(ce) = capture.cancel() {
                log::warn!("recorder: rollback cancel failed: {ce}");
            }
            return Err(e.into());
        }

        self.phase = SessionPhase::Recording;
        log::info!("recorder: session started");
        Ok(())
    }

    /// Stop the session: finalize the file, then the transcript.
    pub async fn stop(&mut self) -> Result<FinishedRecording, RecorderError> {
        if !self.phase.is_active() {
            return Err(CaptureError::NoActiveSession.into());
        }
        self.phase = SessionPhase::Stopping;

        // Stopping capture drops the buffer channel's senders — that is the
        // pipeline's end-of-input signal, sent before we await it.
        let audio = match self.capture.lock().await.stop().await {
            Ok(audio) => audio,
            Err(e) => {
                self.phase = SessionPhase::Idle;
                self.pipeline.reset();
                return Err(e.into());
            }
        };

        let outcome = self.pipeline.stop().await?;
        self.phase = SessionPhase::Idle;

        Ok(FinishedRecording {
            audio,
            transcript: outcome.text,
            transcript_timed_out: outcome.timed_out,
        })
    }

    /// Suspend buffer production; the session and transcript stay alive.
    pub async fn pause(&mut self) -> Result<(), RecorderError> {
        if !self.phase.can_pause() {
            return Err(CaptureError::CannotPause.into());
        }
        self.capture.lock().await.pause()?;
        self.pipeline.set_paused(true);
        self.phase = SessionPhase::Paused;
        Ok(())
    }

    /// Restart buffer production after a pause.
    pub async fn resume(&mut self) -> Result<(), RecorderError> {
        if !self.phase.can_resume() {
            return Err(CaptureError::CannotResume.into());
        }
        self.capture.lock().await.resume()?;
        self.pipeline.set_paused(false);
        self.phase = SessionPhase::Recording;
        Ok(())
    }

    /// Tear the session down and discard the audio file and transcript.
    pub async fn cancel(&mut self) -> Result<(), RecorderError> {
        if !self.phase.is_active() {
            return Err(CaptureError::NoActiveSession.into());
        }
        let result = self.capture.lock().await.cancel();
        self.pipeline.reset();
        self.phase = SessionPhase::Idle;
        result?;
        Ok(())
    }
}

impl std::fmt::Debug for VoiceRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceRecorder")
            .field("phase", &self.phase.label())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
