//! Durable WAV storage for the live recording.
//!
//! [`WavSink`] wraps a `hound::WavWriter` over a buffered file.  The
//! real-time callback writes into it synchronously (buffered, so a write is
//! a memcpy in the common case); the control side finalizes or discards it
//! when the session ends.
//!
//! File flush lags stream stop — the OS may still be committing the header
//! and tail when the hardware stream is already down.  [`wait_for_flush`]
//! polls the on-disk size until it holds still for a configured number of
//! consecutive reads.  Never stabilizing is a soft failure: the caller
//! proceeds with the last observed size.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::Duration;

use hound::{SampleFormat, WavSpec, WavWriter};
use thiserror::Error;

use super::format::{FormatSpec, SampleEncoding};

// ---------------------------------------------------------------------------
// SinkError
// ---------------------------------------------------------------------------

/// Errors from creating or writing the WAV sink.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("wav error: {0}")]
    Wav(#[from] hound::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// FlushPolicy
// ---------------------------------------------------------------------------

/// Parameters for the post-stop file-size stability poll.
#[derive(Debug, Clone, Copy)]
pub struct FlushPolicy {
    /// Delay between size reads.
    pub poll_interval: Duration,
    /// Consecutive identical reads required to call the file stable.
    pub stable_reads: u32,
    /// Total read attempts before giving up (soft failure).
    pub max_attempts: u32,
}

impl Default for FlushPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
            stable_reads: 3,
            max_attempts: 20,
        }
    }
}

// ---------------------------------------------------------------------------
// WavSink
// ---------------------------------------------------------------------------

/// A WAV file being written in a fixed [`FormatSpec`].
pub struct WavSink {
    writer: WavWriter<BufWriter<File>>,
    path: PathBuf,
    format: FormatSpec,
    frames_written: u64,
}

impl WavSink {
    /// Create the file and write the WAV header for `format`.
    pub fn create(path: impl AsRef<Path>, format: FormatSpec) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let spec = WavSpec {
            channels: format.channels,
            sample_rate: format.sample_rate as u32,
            bits_per_sample: format.encoding.bits_per_sample(),
            sample_format: match format.encoding {
                SampleEncoding::F32 => SampleFormat::Float,
                SampleEncoding::I16 => SampleFormat::Int,
            },
        };

        let writer = WavWriter::create(&path, spec)?;
        log::debug!("sink: created {} ({format})", path.display());

        Ok(Self {
            writer,
            path,
            format,
            frames_written: 0,
        })
    }

    /// Append interleaved `f32` samples, encoding them per the sink format.
    pub fn write(&mut self, samples: &[f32]) -> Result<(), SinkError> {
        match self.format.encoding {
            SampleEncoding::F32 => {
                for &s in samples {
                    self.writer.write_sample(s)?;
                }
            }
            SampleEncoding::I16 => {
                for &s in samples {
                    let v = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                    self.writer.write_sample(v)?;
                }
            }
        }
        self.frames_written += samples.len() as u64 / self.format.channels.max(1) as u64;
        Ok(())
    }

    /// Path of the file being written.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Format the sink was opened with.
    pub fn format(&self) -> FormatSpec {
        self.format
    }

    /// Total frames written so far.
    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Finish the header and close the file, returning its path.
    pub fn finalize(self) -> Result<PathBuf, SinkError> {
        let path = self.path.clone();
        self.writer.finalize()?;
        log::debug!("sink: finalized {}", path.display());
        Ok(path)
    }

    /// Close and delete the file (cancelled session).
    pub fn discard(self) -> Result<(), SinkError> {
        let path = self.path.clone();
        // Finalize first so the writer's drop doesn't race the removal.
        self.writer.finalize()?;
        std::fs::remove_file(&path)?;
        log::debug!("sink: discarded {}", path.display());
        Ok(())
    }
}

impl std::fmt::Debug for WavSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WavSink")
            .field("path", &self.path)
            .field("format", &self.format)
            .field("frames_written", &self.frames_written)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// wait_for_flush
// ---------------------------------------------------------------------------

/// Poll `path`'s size until it is stable per `policy`.
///
/// Returns `(last_size, stabilized)`.  A missing file reads as size 0 —
/// callers treat that the same as any other unstable outcome.
pub async fn wait_for_flush(path: &Path, policy: FlushPolicy) -> (u64, bool) {
    let mut last_size: u64 = 0;
    let mut stable: u32 = 0;

    for attempt in 0..policy.max_attempts {
        let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);

        if attempt > 0 && size == last_size {
            stable += 1;
            if stable >= policy.stable_reads {
                return (size, true);
            }
        } else {
            stable = 0;
        }
        last_size = size;

        tokio::time::sleep(policy.poll_interval).await;
    }

    log::warn!(
        "sink: {} never stabilized after {} reads (last size {last_size})",
        path.display(),
        policy.max_attempts
    );
    (last_size, false)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
