//! Streaming Whisper engine.
//!
//! [`WhisperStreamEngine`] adapts whisper.cpp — a batch decoder — to the
//! incremental [`RecognitionEngine`] contract.  A dedicated worker thread
//! drains the session's input queue and accumulates 16 kHz mono samples
//! into an *open segment*:
//!
//! * on a cadence (`partial_interval`) the open segment is re-decoded and
//!   the hypothesis emitted as a volatile result, wholly replacing the
//!   previous one;
//! * once the segment's tail goes silent for `silence_hold` (or the
//!   segment hits `max_segment`), one last decode emits the finalized text
//!   and the segment resets;
//! * at end-of-input the remainder is decoded and finalized.
//!
//! A new `WhisperState` is created per decode call, so the context can be
//! shared without locking.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use crate::audio::{level, AudioBuffer, FormatSpec};

use super::engine::{
    EngineAvailability, RecognitionEngine, RecognitionResult, RecognitionSession, SttError,
};

/// Minimum samples worth decoding: 0.5 s at 16 kHz.  Whisper produces
/// garbage (or errors) below this.
const MIN_DECODE_SAMPLES: usize = 8_000;

// ---------------------------------------------------------------------------
// DecodeParams
// ---------------------------------------------------------------------------

/// Parameters for a single Whisper inference pass.
#[derive(Debug, Clone)]
pub struct DecodeParams {
    /// ISO-639-1 language code, or `"auto"` for built-in detection.
    pub language: String,
    /// CPU threads handed to Whisper, capped at 8.
    pub n_threads: i32,
    /// Suppress Whisper's progress output to stderr.
    pub suppress_progress: bool,
}

impl Default for DecodeParams {
    fn default() -> Self {
        Self {
            language: "auto".into(),
            n_threads: optimal_threads(),
            suppress_progress: true,
        }
    }
}

/// Physical CPU threads to use for inference, capped at 8 — Whisper sees
/// diminishing returns beyond that.
pub(crate) fn optimal_threads() -> i32 {
    std::thread::available_parallelism()
        .map(|n| n.get().min(8) as i32)
        .unwrap_or(4)
}

// ---------------------------------------------------------------------------
// StreamParams
// ---------------------------------------------------------------------------

/// Cadence and segmentation tunables for the streaming worker.
#[derive(Debug, Clone)]
pub struct StreamParams {
    /// Minimum new audio between partial re-decodes of the open segment.
    pub partial_interval: Duration,
    /// Trailing silence that finalizes the open segment.
    pub silence_hold: Duration,
    /// Hard cap on the open segment before forced finalization.
    pub max_segment: Duration,
    /// RMS below which a buffer counts as silence.
    pub silence_rms_threshold: f32,
}

impl Default for StreamParams {
    fn default() -> Self {
        Self {
            partial_interval: Duration::from_millis(1_000),
            silence_hold: Duration::from_millis(600),
            max_segment: Duration::from_secs(25),
            silence_rms_threshold: 0.01,
        }
    }
}

// ---------------------------------------------------------------------------
// WhisperStreamEngine
// ---------------------------------------------------------------------------

/// Shared whisper context.  `WhisperContext` holds a raw pointer but the
/// model weights are read-only after loading and whisper-rs itself declares
/// the context Send + Sync; the wrapper restates that for the `Arc`.
struct SharedContext(WhisperContext);

// SAFETY: WhisperContext is Send+Sync as declared by whisper-rs.
unsafe impl Send for SharedContext {}
unsafe impl Sync for SharedContext {}

/// Production [`RecognitionEngine`] backed by a Whisper GGML model.
pub struct WhisperStreamEngine {
    ctx: Arc<SharedContext>,
    decode: DecodeParams,
    stream: StreamParams,
    model_path: PathBuf,
}

impl WhisperStreamEngine {
    /// Availability of an engine that *would* be built from this
    /// configuration, without paying the model-load cost.
    ///
    /// `NotEnabled` when transcription is switched off; `ModelDownloading`
    /// while the model file has not arrived on disk (fetching it is a
    /// higher-layer concern); `Available` otherwise.
    pub fn probe(enabled: bool, model_path: &Path) -> EngineAvailability {
        if !enabled {
            EngineAvailability::NotEnabled
        } else if !model_path.exists() {
            EngineAvailability::ModelDownloading
        } else {
            EngineAvailability::Available
        }
    }

    /// Load a GGML model and prepare the engine.
    ///
    /// # Errors
    ///
    /// - [`SttError::ModelNotFound`] — `model_path` does not exist.
    /// - [`SttError::ContextInit`] — whisper-rs failed to load the file.
    pub fn load(
        model_path: impl AsRef<Path>,
        decode: DecodeParams,
        stream: StreamParams,
    ) -> Result<Self, SttError> {
        let path = model_path.as_ref();

        if !path.exists() {
            return Err(SttError::ModelNotFound(path.display().to_string()));
        }
        let path_str = path
            .to_str()
            .ok_or_else(|| SttError::ModelNotFound(path.display().to_string()))?;

        let ctx = WhisperContext::new_with_params(path_str, WhisperContextParameters::default())
            .map_err(|e| SttError::ContextInit(e.to_string()))?;

        log::info!("whisper: loaded model {}", path.display());

        Ok(Self {
            ctx: Arc::new(SharedContext(ctx)),
            decode,
            stream,
            model_path: path.to_path_buf(),
        })
    }

    /// Path of the loaded model.
    pub fn model_path(&self) -> &Path {
        &self.model_path
    }
}

impl RecognitionEngine for WhisperStreamEngine {
    fn availability(&self) -> EngineAvailability {
        // A loaded engine is by definition available.
        EngineAvailability::Available
    }

    fn required_format(&self) -> FormatSpec {
        FormatSpec::recognition()
    }

    fn start_session(&self, format: FormatSpec) -> Result<RecognitionSession, SttError> {
        let required = self.required_format();
        if !format.stream_compatible(&required) {
            return Err(SttError::Decode(format!(
                "unsupported input format {format}, expected {required}"
            )));
        }

        let (audio_tx, audio_rx) = mpsc::channel::<AudioBuffer>(64);
        let (results_tx, results_rx) = mpsc::channel::<RecognitionResult>(64);

        let ctx = self.ctx.clone();
        let decode = self.decode.clone();
        let stream = self.stream.clone();

        std::thread::Builder::new()
            .name("livenote-whisper".into())
            .spawn(move || run_worker(ctx, decode, stream, audio_rx, results_tx))
            .map_err(|e| SttError::ContextInit(e.to_string()))?;

        Ok(RecognitionSession {
            audio_tx,
            results_rx,
        })
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

fn run_worker(
    ctx: Arc<SharedContext>,
    decode: DecodeParams,
    stream: StreamParams,
    mut audio_rx: mpsc::Receiver<AudioBuffer>,
    results_tx: mpsc::Sender<RecognitionResult>,
) {
    let rate = FormatSpec::recognition().sample_rate;
    let partial_samples = (stream.partial_interval.as_secs_f64() * rate) as usize;
    let silence_samples = (stream.silence_hold.as_secs_f64() * rate) as usize;
    let max_samples = (stream.max_segment.as_secs_f64() * rate) as usize;

    let mut segment: Vec<f32> = Vec::new();
    let mut since_decode = 0usize;
    let mut trailing_silence = 0usize;
    let mut voiced = false;

    while let Some(buffer) = audio_rx.blocking_recv() {
        since_decode += buffer.samples.len();
        if level::rms(&buffer.samples) < stream.silence_rms_threshold {
            trailing_silence += buffer.samples.len();
        } else {
            trailing_silence = 0;
            voiced = true;
        }
        segment.extend_from_slice(&buffer.samples);

        let silence_break = voiced && trailing_silence >= silence_samples;
        let cap_break = segment.len() >= max_samples;

        if silence_break || cap_break {
            if voiced && segment.len() >= MIN_DECODE_SAMPLES {
                match decode_segment(&ctx, &decode, &segment) {
                    Ok(text) => {
                        if results_tx
                            .blocking_send(RecognitionResult::finalized(text))
                            .is_err()
                        {
                            return;
                        }
                    }
                    Err(e) => log::warn!("whisper: segment decode failed, dropping: {e}"),
                }
            }
            segment.clear();
            since_decode = 0;
            trailing_silence = 0;
            voiced = false;
        } else if voiced && since_decode >= partial_samples && segment.len() >= MIN_DECODE_SAMPLES
        {
            match decode_segment(&ctx, &decode, &segment) {
                Ok(text) => {
                    if results_tx
                        .blocking_send(RecognitionResult::volatile(text))
                        .is_err()
                    {
                        return;
                    }
                }
                Err(e) => log::warn!("whisper: partial decode failed: {e}"),
            }
            since_decode = 0;
        }
    }

    // End of input: finalize whatever is left.
    if voiced && segment.len() >= MIN_DECODE_SAMPLES {
        match decode_segment(&ctx, &decode, &segment) {
            Ok(text) => {
                let _ = results_tx.blocking_send(RecognitionResult::finalized(text));
            }
            Err(e) => log::warn!("whisper: final decode failed: {e}"),
        }
    }
    // results_tx drops here, closing the output stream.
}

/// One blocking inference pass over `audio`, returning the concatenated
/// segment text.
fn decode_segment(
    ctx: &SharedContext,
    decode: &DecodeParams,
    audio: &[f32],
) -> Result<String, SttError> {
    let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });

    let lang: Option<&str> = if decode.language == "auto" {
        None
    } else {
        Some(decode.language.as_str())
    };
    params.set_language(lang);
    params.set_n_threads(decode.n_threads);

    if decode.suppress_progress {
        params.set_print_progress(false);
        params.set_print_realtime(false);
    }

    let mut state = ctx
        .0
        .create_state()
        .map_err(|e| SttError::ContextInit(e.to_string()))?;

    state
        .full(params, audio)
        .map_err(|e| SttError::Decode(e.to_string()))?;

    let n_segments = state
        .full_n_segments()
        .map_err(|e| SttError::Decode(e.to_string()))?;

    let mut text = String::new();
    for i in 0..n_segments {
        let piece = state
            .full_get_segment_text(i)
            .map_err(|e| SttError::Decode(format!("segment {i}: {e}")))?;
        text.push_str(&piece);
    }

    Ok(text.trim().to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_model_returns_model_not_found() {
        let result = WhisperStreamEngine::load(
            "/nonexistent/model.bin",
            DecodeParams::default(),
            StreamParams::default(),
        );
        assert!(matches!(result, Err(SttError::ModelNotFound(_))));
    }

    #[test]
    fn probe_disabled_is_not_enabled() {
        assert_eq!(
            WhisperStreamEngine::probe(false, Path::new("/nonexistent/model.bin")),
            EngineAvailability::NotEnabled
        );
    }

    #[test]
    fn probe_missing_model_is_downloading() {
        assert_eq!(
            WhisperStreamEngine::probe(true, Path::new("/nonexistent/model.bin")),
            EngineAvailability::ModelDownloading
        );
    }

    #[test]
    fn probe_present_model_is_available() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.bin");
        std::fs::write(&path, b"stub").unwrap();
        assert_eq!(
            WhisperStreamEngine::probe(true, &path),
            EngineAvailability::Available
        );
    }

    #[test]
    fn optimal_threads_is_positive_and_at_most_8() {
        let t = optimal_threads();
        assert!((1..=8).contains(&t));
    }

    #[test]
    fn default_stream_params_are_ordered() {
        let p = StreamParams::default();
        assert!(p.silence_hold < p.partial_interval * 2);
        assert!(p.partial_interval < p.max_segment);
    }
}
