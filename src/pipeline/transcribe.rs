//! Streaming transcription: buffer feed, result consumption, finalization.
//!
//! [`TranscriptionPipeline`] connects the capture engine's buffer channel
//! to a [`RecognitionEngine`] session with two concurrent tasks:
//!
//! * the **feeder** (single producer) converts each buffer into the
//!   engine's required format and enqueues it, signalling a oneshot once
//!   the *first* buffer has been enqueued;
//! * the **results** task (single consumer) waits for that signal — an
//!   explicit readiness handshake, not a fixed startup delay — then folds
//!   every `(text, is_final)` result into the shared [`TranscriptState`].
//!
//! End-of-input is the upstream channel closing (capture stop drops the
//! sender); the feeder flushes its converter tail and drops the engine's
//! input sender, the engine drains, the results stream closes, and both
//! tasks finish.  [`stop`](TranscriptionPipeline::stop) waits for all of
//! that under a bounded timeout so a wedged engine can never hang the stop
//! path; on expiry the tasks are aborted and whatever text has accumulated
//! is returned anyway.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::audio::{AudioBuffer, ConvertError, FormatConverter, FormatSpec};
use crate::stt::{EngineAvailability, RecognitionEngine, SttError};

use super::reconcile::TranscriptState;

// ---------------------------------------------------------------------------
// PipelineError
// ---------------------------------------------------------------------------

/// Errors from starting or stopping the transcription pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The engine is not in the `Available` state.
    #[error("recognition engine unavailable: {0:?}")]
    EngineUnavailable(EngineAvailability),

    /// `start` called while a transcription is already running.
    #[error("transcription already running")]
    AlreadyRunning,

    /// `stop` called with nothing running.
    #[error("no transcription in progress")]
    NotRunning,

    #[error(transparent)]
    Convert(#[from] ConvertError),

    #[error(transparent)]
    Stt(#[from] SttError),
}

/// Result of [`TranscriptionPipeline::stop`].
#[derive(Debug)]
pub struct StopOutcome {
    /// Finalized transcript, whitespace-collapsed and trimmed.
    pub text: String,
    /// `true` when the bounded finalization wait expired and the pipeline
    /// tasks had to be aborted; `text` still carries everything that was
    /// finalized before the timeout.
    pub timed_out: bool,
}

// ---------------------------------------------------------------------------
// TranscriptionPipeline
// ---------------------------------------------------------------------------

struct RunningTasks {
    feeder: JoinHandle<()>,
    results: JoinHandle<()>,
}

pub struct TranscriptionPipeline {
    engine: Arc<dyn RecognitionEngine>,
    transcript: Arc<Mutex<TranscriptState>>,
    finalize_timeout: Duration,
    paused: Arc<AtomicBool>,
    running: Option<RunningTasks>,
}

impl TranscriptionPipeline {
    pub fn new(engine: Arc<dyn RecognitionEngine>, finalize_timeout: Duration) -> Self {
        Self {
            engine,
            transcript: Arc::new(Mutex::new(TranscriptState::new())),
            finalize_timeout,
            paused: Arc::new(AtomicBool::new(false)),
            running: None,
        }
    }

    /// Current display transcript (finalized + volatile hypothesis).
    pub fn display_text(&self) -> String {
        self.transcript.lock().unwrap().display_text()
    }

    /// `true` while the feeder/results tasks exist.
    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Mirror of the capture-level pause: while set, incoming gaps are
    /// expected and not treated as errors.  Buffer suspension itself
    /// happens in the capture engine.
    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Relaxed);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    // -----------------------------------------------------------------------
    // start
    // -----------------------------------------------------------------------

    /// Begin streaming `buffer_rx` (buffers in `format`) into the engine.
    ///
    /// Clears the transcript, opens a fresh engine session, and spawns the
    /// feeder and results tasks.  Refuses to start unless the engine
    /// reports `Available`.
    pub fn start(
        &mut self,
        buffer_rx: mpsc::Receiver<AudioBuffer>,
        format: FormatSpec,
    ) -> Result<(), PipelineError> {
        if self.running.is_some() {
            return Err(PipelineError::AlreadyRunning);
        }

        let availability = self.engine.availability();
        if availability != EngineAvailability::Available {
            return Err(PipelineError::EngineUnavailable(availability));
        }

        let target = self.engine.required_format();
        let converter = if format.stream_compatible(&target) {
            None
        } else {
            Some(FormatConverter::new(format, target)?)
        };

        let session = self.engine.start_session(target)?;

        self.transcript.lock().unwrap().clear();
        self.paused.store(false, Ordering::Relaxed);

        let (first_tx, first_rx) = oneshot::channel();
        let feeder = tokio::spawn(run_feeder(
            buffer_rx,
            session.audio_tx,
            converter,
            first_tx,
        ));
        let results = tokio::spawn(run_results(
            session.results_rx,
            self.transcript.clone(),
            first_rx,
        ));

        self.running = Some(RunningTasks { feeder, results });
        log::debug!("pipeline: transcription started ({format} -> {target})");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // stop / reset
    // -----------------------------------------------------------------------

    /// Await pipeline completion and return the normalized finalized text.
    ///
    /// The upstream buffer channel must already be closed (capture stop
    /// does this); the wait is bounded by the configured timeout either
    /// way.
    pub async fn stop(&mut self) -> Result<StopOutcome, PipelineError> {
        let Some(tasks) = self.running.take() else {
            return Err(PipelineError::NotRunning);
        };

        let mut feeder = tasks.feeder;
        let mut results = tasks.results;

        let joined = tokio::time::timeout(self.finalize_timeout, async {
            let _ = (&mut feeder).await;
            let _ = (&mut results).await;
        })
        .await;

        let timed_out = joined.is_err();
        if timed_out {
            log::warn!(
                "pipeline: finalization timed out after {:?}, aborting tasks",
                self.finalize_timeout
            );
            feeder.abort();
            results.abort();
        }

        let text = self.transcript.lock().unwrap().final_normalized();
        log::debug!("pipeline: transcription stopped ({} chars)", text.len());
        Ok(StopOutcome { text, timed_out })
    }

    /// Abort both tasks and clear all transcript state.
    ///
    /// The engine session handles die with the tasks; sessions are
    /// per-recording and never reused, so the next `start` opens a fresh
    /// one.
    pub fn reset(&mut self) {
        if let Some(tasks) = self.running.take() {
            tasks.feeder.abort();
            tasks.results.abort();
        }
        self.transcript.lock().unwrap().clear();
        self.paused.store(false, Ordering::Relaxed);
        log::debug!("pipeline: reset");
    }
}

impl std::fmt::Debug for TranscriptionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranscriptionPipeline")
            .field("running", &self.running.is_some())
            .field("paused", &self.is_paused())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

/// Single producer into the engine's input queue.
async fn run_feeder(
    mut buffer_rx: mpsc::Receiver<AudioBuffer>,
    audio_tx: mpsc::Sender<AudioBuffer>,
    mut converter: Option<FormatConverter>,
    first_tx: oneshot::Sender<()>,
) {
    let mut first = Some(first_tx);

    while let Some(buffer) = buffer_rx.recv().await {
        let converted = match converter.as_mut() {
            Some(conv) => match conv.convert(&buffer) {
                Ok(out) => out,
                Err(e) => {
                    // Non-fatal: drop this buffer, keep the stream alive.
                    log::warn!("pipeline: conversion failed, dropping buffer: {e}");
                    continue;
                }
            },
            None => buffer,
        };

        if converted.is_empty() {
            continue;
        }
        if audio_tx.send(converted).await.is_err() {
            log::debug!("pipeline: engine input closed, feeder exiting");
            return;
        }
        if let Some(tx) = first.take() {
            let _ = tx.send(());
        }
    }

    // Upstream closed: push the converter's tail before signalling
    // end-of-input by dropping the sender.
    if let Some(conv) = converter.as_mut() {
        match conv.flush() {
            Ok(tail) if !tail.is_empty() => {
                let _ = audio_tx.send(tail).await;
            }
            Ok(_) => {}
            Err(e) => log::warn!("pipeline: converter flush failed: {e}"),
        }
    }
}

/// Single consumer of the engine's result stream.
async fn run_results(
    mut results_rx: mpsc::Receiver<crate::stt::RecognitionResult>,
    transcript: Arc<Mutex<TranscriptState>>,
    first_rx: oneshot::Receiver<()>,
) {
    // Don't drive the engine's output before the first buffer is enqueued.
    // A closed sender (feeder exited without feeding) falls through to the
    // drain loop, which then just observes the stream closing.
    let _ = first_rx.await;

    while let Some(result) = results_rx.recv().await {
        transcript.lock().unwrap().apply(&result);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stt::{MockRecognitionEngine, RecognitionResult};

    fn silent_buffer() -> AudioBuffer {
        AudioBuffer::new(vec![0.0_f32; 1600], FormatSpec::recognition())
    }

    fn pipeline_with(engine: MockRecognitionEngine) -> TranscriptionPipeline {
        TranscriptionPipeline::new(Arc::new(engine), Duration::from_millis(500))
    }

    #[tokio::test]
    async fn finalized_results_accumulate_into_stop_text() {
        // Two buffers produce "hello" then "world" as finalized segments.
        let engine = MockRecognitionEngine::scripted(
            vec![
                RecognitionResult::finalized("hello"),
                RecognitionResult::finalized("world"),
            ],
            Vec::new(),
        );
        let mut pipeline = pipeline_with(engine);

        let (tx, rx) = mpsc::channel(8);
        pipeline.start(rx, FormatSpec::recognition()).unwrap();

        tx.send(silent_buffer()).await.unwrap();
        tx.send(silent_buffer()).await.unwrap();
        drop(tx);

        let outcome = pipeline.stop().await.unwrap();
        assert!(!outcome.timed_out);
        assert_eq!(outcome.text, "hello world");
    }

    #[tokio::test]
    async fn volatile_results_show_in_display_but_not_final_text() {
        let engine = MockRecognitionEngine::scripted(
            vec![
                RecognitionResult::volatile("wor"),
                RecognitionResult::volatile("world"),
            ],
            Vec::new(),
        );
        let mut pipeline = pipeline_with(engine);

        let (tx, rx) = mpsc::channel(8);
        pipeline.start(rx, FormatSpec::recognition()).unwrap();

        tx.send(silent_buffer()).await.unwrap();
        tx.send(silent_buffer()).await.unwrap();
        // Give the results task time to apply both hypotheses.
        tokio::time::sleep(Duration::from_millis(50)).await;

        // The second hypothesis replaced the first wholesale.
        assert_eq!(pipeline.display_text(), "world");

        drop(tx);
        let outcome = pipeline.stop().await.unwrap();
        assert_eq!(outcome.text, "", "volatile text must not be finalized");
    }

    #[tokio::test]
    async fn stop_normalizes_whitespace() {
        let engine = MockRecognitionEngine::scripted(
            vec![RecognitionResult::finalized("  multiple   spaces\n\n")],
            vec![RecognitionResult::finalized("tail  words ")],
        );
        let mut pipeline = pipeline_with(engine);

        let (tx, rx) = mpsc::channel(8);
        pipeline.start(rx, FormatSpec::recognition()).unwrap();
        tx.send(silent_buffer()).await.unwrap();
        drop(tx);

        let outcome = pipeline.stop().await.unwrap();
        assert_eq!(outcome.text, "multiple spaces tail words");
    }

    #[tokio::test]
    async fn hung_engine_times_out_but_returns_accumulated_text() {
        let engine =
            MockRecognitionEngine::hanging(vec![RecognitionResult::finalized("partial answer")]);
        let mut pipeline = TranscriptionPipeline::new(Arc::new(engine), Duration::from_millis(80));

        let (tx, rx) = mpsc::channel(8);
        pipeline.start(rx, FormatSpec::recognition()).unwrap();
        tx.send(silent_buffer()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        drop(tx);

        let outcome = pipeline.stop().await.unwrap();
        assert!(outcome.timed_out, "wedged engine must trip the timeout");
        assert_eq!(outcome.text, "partial answer");
    }

    #[tokio::test]
    async fn unavailable_engine_refuses_to_start() {
        let engine = MockRecognitionEngine::unavailable(EngineAvailability::NotEnabled);
        let mut pipeline = pipeline_with(engine);

        let (_tx, rx) = mpsc::channel::<AudioBuffer>(8);
        let err = pipeline.start(rx, FormatSpec::recognition()).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::EngineUnavailable(EngineAvailability::NotEnabled)
        ));
        assert!(!pipeline.is_running());
    }

    #[tokio::test]
    async fn double_start_is_rejected() {
        let mut pipeline = pipeline_with(MockRecognitionEngine::silent());

        let (_tx, rx) = mpsc::channel(8);
        pipeline.start(rx, FormatSpec::recognition()).unwrap();

        let (_tx2, rx2) = mpsc::channel::<AudioBuffer>(8);
        assert!(matches!(
            pipeline.start(rx2, FormatSpec::recognition()).unwrap_err(),
            PipelineError::AlreadyRunning
        ));
    }

    #[tokio::test]
    async fn stop_without_start_is_an_error() {
        let mut pipeline = pipeline_with(MockRecognitionEngine::silent());
        assert!(matches!(
            pipeline.stop().await.unwrap_err(),
            PipelineError::NotRunning
        ));
    }

    #[tokio::test]
    async fn reset_clears_transcript_and_tasks() {
        let engine = MockRecognitionEngine::scripted(
            vec![RecognitionResult::finalized("hello")],
            Vec::new(),
        );
        let mut pipeline = pipeline_with(engine);

        let (tx, rx) = mpsc::channel(8);
        pipeline.start(rx, FormatSpec::recognition()).unwrap();
        tx.send(silent_buffer()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(pipeline.display_text(), "hello");

        pipeline.reset();
        assert!(!pipeline.is_running());
        assert_eq!(pipeline.display_text(), "");

        // A fresh start works after reset.
        let (_tx2, rx2) = mpsc::channel(8);
        pipeline.start(rx2, FormatSpec::recognition()).unwrap();
    }

    #[tokio::test]
    async fn pause_flag_mirrors() {
        let pipeline = pipeline_with(MockRecognitionEngine::silent());
        assert!(!pipeline.is_paused());
        pipeline.set_paused(true);
        assert!(pipeline.is_paused());
        pipeline.set_paused(false);
        assert!(!pipeline.is_paused());
    }

    /// The feeder converts 48 kHz stereo into the engine's 16 kHz mono
    /// before enqueuing — the engine must still see audio (and emit its
    /// scripted result) despite the format mismatch at the inlet.
    #[tokio::test]
    async fn feeder_converts_foreign_formats() {
        let engine = MockRecognitionEngine::scripted(
            vec![RecognitionResult::finalized("converted")],
            Vec::new(),
        );
        let mut pipeline = pipeline_with(engine);

        let source = FormatSpec::new(48_000.0, 2);
        let (tx, rx) = mpsc::channel(8);
        pipeline.start(rx, source).unwrap();

        // One second of stereo 48 kHz — plenty to push the resampler FIFO
        // through at least one chunk.
        for _ in 0..10 {
            tx.send(AudioBuffer::new(vec![0.05_f32; 9_600], source))
                .await
                .unwrap();
        }
        drop(tx);

        let outcome = pipeline.stop().await.unwrap();
        assert_eq!(outcome.text, "converted");
    }
}
