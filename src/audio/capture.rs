//! Live capture engine: hardware stream → WAV sink + buffer channel.
//!
//! [`CaptureEngine`] owns the session lifecycle.  `start()` locks the
//! session's *original format* to whatever the hardware reports, opens the
//! WAV sink in that format, installs the real-time callback, and hands back
//! the receiving end of a bounded buffer channel.  The callback does three
//! things and nothing else: a synchronous sink write, a non-blocking
//! `try_send`, and a throttled level-meter update.
//!
//! Mid-session the hardware can be swapped out underneath the session
//! ([`hot_swap`](CaptureEngine::hot_swap)) without touching the sink, the
//! channel, or anything downstream; if the new device's format diverges
//! from the original, a [`FormatConverter`] is spliced into the callback
//! path so every consumer keeps seeing the original format.
//!
//! Teardown ordering is strict everywhere: the previous stream is stopped
//! and its thread joined before a new one is installed, so two callbacks
//! can never race on the sink or the channel.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::mpsc;

use super::buffer::AudioBuffer;
use super::convert::{ConvertError, FormatConverter};
use super::format::FormatSpec;
use super::input::{AudioInput, InputError, StreamHandle};
use super::level::{LevelHandle, LevelMeter};
use super::sink::{wait_for_flush, FlushPolicy, SinkError, WavSink};

// ---------------------------------------------------------------------------
// CaptureError
// ---------------------------------------------------------------------------

/// Errors from the capture engine.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The hardware reported a degenerate format (zero rate or channels) at
    /// start or after a hot-swap.
    #[error("audio system not ready: degenerate input format {0}")]
    HardwareNotReady(FormatSpec),

    /// A capture session is already running.
    #[error("a capture session is already active")]
    SessionActive,

    /// stop/pause/resume/cancel called with no session.
    #[error("no active capture session")]
    NoActiveSession,

    /// `pause()` called while not recording.
    #[error("cannot pause: no recording in progress")]
    CannotPause,

    /// `resume()` called while not paused.
    #[error("cannot resume: capture is not paused")]
    CannotResume,

    #[error(transparent)]
    Input(#[from] InputError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error(transparent)]
    Convert(#[from] ConvertError),
}

// ---------------------------------------------------------------------------
// CaptureConfig
// ---------------------------------------------------------------------------

/// Tunables for a capture engine.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Bound of the buffer channel between the callback and the pipeline.
    pub channel_capacity: usize,
    /// Level-meter publish rate cap (UI frame rate).
    pub level_update_hz: u32,
    /// Raw RMS threshold for the voice-detected flag.
    pub voice_rms_threshold: f32,
    /// Post-stop file flush polling policy.
    pub flush: FlushPolicy,
    /// Settle delay after stopping a stream during a hot-swap, giving the
    /// new device time to finish renegotiation.
    pub settle_delay: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 64,
            level_update_hz: 30,
            voice_rms_threshold: 0.015,
            flush: FlushPolicy::default(),
            settle_delay: Duration::from_millis(300),
        }
    }
}

// ---------------------------------------------------------------------------
// Session state
// ---------------------------------------------------------------------------

/// Shared sink slot: written by the callback, taken by stop/cancel.  The
/// mutex is only ever contended at teardown, after the stream is joined.
type SharedSink = Arc<Mutex<Option<WavSink>>>;

struct ActiveSession {
    original_format: FormatSpec,
    hardware_format: FormatSpec,
    started_at: Instant,
    total_paused: Duration,
    sink: SharedSink,
    tx: mpsc::Sender<AudioBuffer>,
    /// `None` when the session is stalled after a failed hot-swap.
    stream: Option<StreamHandle>,
}

enum CaptureState {
    Idle,
    Recording(ActiveSession),
    Paused {
        session: ActiveSession,
        pause_started: Instant,
    },
}

/// Result of a successful [`CaptureEngine::stop`].
#[derive(Debug)]
pub struct StoppedRecording {
    /// Finalized WAV file.
    pub path: PathBuf,
    /// Wall-clock recording time minus accumulated paused time.
    pub duration: Duration,
    /// On-disk size at the end of the flush poll (last observed size when
    /// the poll never stabilized).
    pub file_size: u64,
}

// ---------------------------------------------------------------------------
// CaptureEngine
// ---------------------------------------------------------------------------

pub struct CaptureEngine {
    input: Box<dyn AudioInput>,
    config: CaptureConfig,
    state: CaptureState,
    levels: LevelHandle,
    dropped_buffers: Arc<AtomicU64>,
}

impl CaptureEngine {
    pub fn new(input: Box<dyn AudioInput>, config: CaptureConfig) -> Self {
        Self {
            input,
            config,
            state: CaptureState::Idle,
            levels: LevelHandle::new(),
            dropped_buffers: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Handle the UI polls for level / voice telemetry.
    pub fn levels(&self) -> LevelHandle {
        self.levels.clone()
    }

    /// Buffers dropped because the downstream channel was full.
    pub fn dropped_buffers(&self) -> u64 {
        self.dropped_buffers.load(Ordering::Relaxed)
    }

    /// Identity of the currently bound input device.
    pub fn device_name(&self) -> String {
        self.input.device_name()
    }

    /// `true` while a session exists (recording or paused).
    pub fn is_active(&self) -> bool {
        !matches!(self.state, CaptureState::Idle)
    }

    /// The format locked at session start; `None` while idle.
    pub fn original_format(&self) -> Option<FormatSpec> {
        match &self.state {
            CaptureState::Idle => None,
            CaptureState::Recording(s) => Some(s.original_format),
            CaptureState::Paused { session, .. } => Some(session.original_format),
        }
    }

    /// Recording time so far, wall clock minus paused time.
    pub fn duration(&self) -> Duration {
        match &self.state {
            CaptureState::Idle => Duration::ZERO,
            CaptureState::Recording(s) => s.started_at.elapsed().saturating_sub(s.total_paused),
            CaptureState::Paused {
                session,
                pause_started,
            } => session
                .started_at
                .elapsed()
                .saturating_sub(session.total_paused + pause_started.elapsed()),
        }
    }

    // -----------------------------------------------------------------------
    // start
    // -----------------------------------------------------------------------

    /// Begin a capture session writing to `output_path`.
    ///
    /// Locks the original format, opens the sink, starts the stream, and
    /// returns the buffer channel.  On mid-setup failure every partial side
    /// effect is rolled back (the sink file is deleted) before the error
    /// surfaces; the engine is left in `Idle`.
    pub fn start(
        &mut self,
        output_path: PathBuf,
    ) -> Result<mpsc::Receiver<AudioBuffer>, CaptureError> {
        if self.is_active() {
            return Err(CaptureError::SessionActive);
        }

        let format = self.input.current_format();
        if format.is_degenerate() {
            return Err(CaptureError::HardwareNotReady(format));
        }

        let sink: SharedSink = Arc::new(Mutex::new(Some(WavSink::create(&output_path, format)?)));
        let (tx, rx) = mpsc::channel(self.config.channel_capacity);

        self.levels.clear();
        self.dropped_buffers.store(0, Ordering::Relaxed);

        let callback = self.build_callback(sink.clone(), tx.clone(), format, None);
        let stream = match self.input.start_stream(callback) {
            Ok(stream) => stream,
            Err(e) => {
                // Roll back: no half-activated session, no orphan file.
                if let Some(s) = sink.lock().unwrap().take() {
                    if let Err(de) = s.discard() {
                        log::warn!("capture: rollback discard failed: {de}");
                    }
                }
                return Err(e.into());
            }
        };

        log::info!(
            "capture: started on '{}' ({format}) -> {}",
            self.input.device_name(),
            output_path.display()
        );

        self.state = CaptureState::Recording(ActiveSession {
            original_format: format,
            hardware_format: format,
            started_at: Instant::now(),
            total_paused: Duration::ZERO,
            sink,
            tx,
            stream: Some(stream),
        });

        Ok(rx)
    }

    /// The real-time callback: sink write, non-blocking push, metered level.
    fn build_callback(
        &self,
        sink: SharedSink,
        tx: mpsc::Sender<AudioBuffer>,
        hardware_format: FormatSpec,
        mut converter: Option<FormatConverter>,
    ) -> super::input::BufferCallback {
        let mut meter = LevelMeter::new(
            self.levels.clone(),
            self.config.level_update_hz,
            self.config.voice_rms_threshold,
        );
        let dropped = self.dropped_buffers.clone();

        Box::new(move |data: &[f32]| {
            let raw = AudioBuffer::new(data.to_vec(), hardware_format);
            let buf = match converter.as_mut() {
                Some(conv) => match conv.convert(&raw) {
                    Ok(converted) => converted,
                    Err(e) => {
                        log::warn!("capture: buffer conversion failed, dropping: {e}");
                        return;
                    }
                },
                None => raw,
            };

            // The converter's FIFO may hold everything back early on.
            if !buf.is_empty() {
                if let Ok(mut guard) = sink.lock() {
                    if let Some(sink) = guard.as_mut() {
                        if let Err(e) = sink.write(&buf.samples) {
                            log::warn!("capture: sink write failed, dropping buffer: {e}");
                        }
                    }
                }

                if let Err(mpsc::error::TrySendError::Full(_)) = tx.try_send(buf) {
                    dropped.fetch_add(1, Ordering::Relaxed);
                }
            }

            meter.observe(data);
        })
    }

    // -----------------------------------------------------------------------
    // stop / cancel
    // -----------------------------------------------------------------------

    /// Stop the session, finalize the file, and wait for the flush to
    /// settle.  Returns the file path, the paused-adjusted duration, and
    /// the final observed size.
    pub async fn stop(&mut self) -> Result<StoppedRecording, CaptureError> {
        let (session, final_pause) = match std::mem::replace(&mut self.state, CaptureState::Idle) {
            CaptureState::Idle => return Err(CaptureError::NoActiveSession),
            CaptureState::Recording(s) => (s, Duration::ZERO),
            CaptureState::Paused {
                session,
                pause_started,
            } => (session, pause_started.elapsed()),
        };

        if let Some(stream) = session.stream {
            stream.stop();
        }

        let total_paused = session.total_paused + final_pause;
        let duration = session.started_at.elapsed().saturating_sub(total_paused);

        let sink = session
            .sink
            .lock()
            .unwrap()
            .take()
            .expect("sink taken before stop");
        let path = sink.finalize()?;

        let (file_size, stabilized) = wait_for_flush(&path, self.config.flush).await;
        if !stabilized {
            log::warn!(
                "capture: proceeding with unstabilized file size {file_size} for {}",
                path.display()
            );
        }

        self.levels.clear();
        log::info!(
            "capture: stopped, {:.1}s recorded to {} ({file_size} bytes)",
            duration.as_secs_f64(),
            path.display()
        );

        Ok(StoppedRecording {
            path,
            duration,
            file_size,
        })
    }

    /// Tear down like `stop()`, but delete the output file.
    pub fn cancel(&mut self) -> Result<(), CaptureError> {
        let session = match std::mem::replace(&mut self.state, CaptureState::Idle) {
            CaptureState::Idle => return Err(CaptureError::NoActiveSession),
            CaptureState::Recording(s) => s,
            CaptureState::Paused { session, .. } => session,
        };

        if let Some(stream) = session.stream {
            stream.stop();
        }

        if let Some(sink) = session.sink.lock().unwrap().take() {
            sink.discard()?;
        }

        self.levels.clear();
        log::info!("capture: cancelled");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // pause / resume
    // -----------------------------------------------------------------------

    /// Stop buffer production without ending the session.
    pub fn pause(&mut self) -> Result<(), CaptureError> {
        match std::mem::replace(&mut self.state, CaptureState::Idle) {
            CaptureState::Recording(mut session) => {
                if let Some(stream) = session.stream.take() {
                    stream.stop();
                }
                self.levels.clear();
                self.state = CaptureState::Paused {
                    session,
                    pause_started: Instant::now(),
                };
                log::debug!("capture: paused");
                Ok(())
            }
            other => {
                self.state = other;
                Err(CaptureError::CannotPause)
            }
        }
    }

    /// Restart buffer production and account the paused time.
    pub fn resume(&mut self) -> Result<(), CaptureError> {
        match std::mem::replace(&mut self.state, CaptureState::Idle) {
            CaptureState::Paused {
                mut session,
                pause_started,
            } => {
                let converter = match self.converter_for(&session) {
                    Ok(c) => c,
                    Err(e) => {
                        self.state = CaptureState::Paused {
                            session,
                            pause_started,
                        };
                        return Err(e);
                    }
                };

                let callback = self.build_callback(
                    session.sink.clone(),
                    session.tx.clone(),
                    session.hardware_format,
                    converter,
                );

                match self.input.start_stream(callback) {
                    Ok(stream) => {
                        session.total_paused += pause_started.elapsed();
                        session.stream = Some(stream);
                        self.state = CaptureState::Recording(session);
                        log::debug!("capture: resumed");
                        Ok(())
                    }
                    Err(e) => {
                        // Still paused; the caller may retry.
                        self.state = CaptureState::Paused {
                            session,
                            pause_started,
                        };
                        Err(e.into())
                    }
                }
            }
            other => {
                self.state = other;
                Err(CaptureError::CannotResume)
            }
        }
    }

    // -----------------------------------------------------------------------
    // hot_swap
    // -----------------------------------------------------------------------

    /// Rebind to the current input device mid-session.
    ///
    /// The sink, the buffer channel, and everything downstream are left
    /// untouched; only the hardware binding and (if the new format diverges
    /// from the original) the callback-side converter change.  On failure
    /// the session is left stalled — no stream — awaiting the next route
    /// change; the error is returned for the coordinator to log and flag,
    /// never to propagate into a user command.
    pub async fn hot_swap(&mut self) -> Result<(), CaptureError> {
        match &mut self.state {
            CaptureState::Idle => Err(CaptureError::NoActiveSession),
            CaptureState::Paused { session, .. } => {
                // No stream while paused; refresh the binding so resume
                // picks up the true post-change format.
                self.input.rebind()?;
                let format = self.input.current_format();
                if format.is_degenerate() {
                    return Err(CaptureError::HardwareNotReady(format));
                }
                session.hardware_format = format;
                Ok(())
            }
            CaptureState::Recording(_) => {
                let CaptureState::Recording(mut session) =
                    std::mem::replace(&mut self.state, CaptureState::Idle)
                else {
                    unreachable!()
                };

                if let Some(stream) = session.stream.take() {
                    stream.stop();
                }

                tokio::time::sleep(self.config.settle_delay).await;

                let result = self.swap_stream(&mut session).await;
                // Session survives either way; on failure it is stalled
                // (stream == None) until the next route change.
                self.state = CaptureState::Recording(session);
                result
            }
        }
    }

    async fn swap_stream(&mut self, session: &mut ActiveSession) -> Result<(), CaptureError> {
        // A fresh binding: restarting the old one can report a stale format.
        self.input.rebind()?;

        let format = self.input.current_format();
        if format.is_degenerate() {
            return Err(CaptureError::HardwareNotReady(format));
        }
        session.hardware_format = format;

        let converter = self.converter_for(session)?;
        if converter.is_some() {
            log::info!(
                "capture: hot-swap bridging {format} -> {}",
                session.original_format
            );
        }

        let callback = self.build_callback(
            session.sink.clone(),
            session.tx.clone(),
            session.hardware_format,
            converter,
        );
        session.stream = Some(self.input.start_stream(callback)?);

        log::info!(
            "capture: hot-swapped to '{}' ({format})",
            self.input.device_name()
        );
        Ok(())
    }

    /// A fresh converter when the hardware format diverges from the
    /// session's original format; `None` when they match.  Always freshly
    /// constructed — resampler state must not straddle a discontinuity.
    fn converter_for(
        &self,
        session: &ActiveSession,
    ) -> Result<Option<FormatConverter>, CaptureError> {
        if session
            .hardware_format
            .stream_compatible(&session.original_format)
        {
            Ok(None)
        } else {
            Ok(Some(FormatConverter::new(
                session.hardware_format,
                session.original_format,
            )?))
        }
    }
}

impl std::fmt::Debug for CaptureEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &self.state {
            CaptureState::Idle => "Idle",
            CaptureState::Recording(_) => "Recording",
            CaptureState::Paused { .. } => "Paused",
        };
        f.debug_struct("CaptureEngine")
            .field("state", &state)
            .field("device", &self.input.device_name())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
