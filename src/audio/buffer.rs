//! Owned audio buffers as delivered by the hardware callback.
//!
//! An [`AudioBuffer`] is one contiguous block of interleaved `f32` samples
//! tagged with the [`FormatSpec`] it is in and the instant it was captured.
//! Buffers are produced on the real-time audio thread and cross into the
//! async world as immutable messages over a bounded channel; conversion
//! produces a *new* buffer, never mutates one in place.

use std::time::Instant;

use super::format::FormatSpec;

// ---------------------------------------------------------------------------
// AudioBuffer
// ---------------------------------------------------------------------------

/// A single captured block of PCM audio.
///
/// Samples are interleaved `f32` in `[-1.0, 1.0]`.  `frames()` is the number
/// of sample frames (`samples.len() / channels`).
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    /// Interleaved PCM samples in `[-1.0, 1.0]`.
    pub samples: Vec<f32>,
    /// Format the samples are in.
    pub format: FormatSpec,
    /// Wall-clock instant the hardware delivered this buffer.
    pub captured_at: Instant,
}

impl AudioBuffer {
    /// Wrap raw samples captured now.
    pub fn new(samples: Vec<f32>, format: FormatSpec) -> Self {
        Self {
            samples,
            format,
            captured_at: Instant::now(),
        }
    }

    /// An empty buffer in `format` — used for zero-length conversion results.
    pub fn empty(format: FormatSpec) -> Self {
        Self::new(Vec::new(), format)
    }

    /// Number of sample frames (samples per channel).
    pub fn frames(&self) -> usize {
        if self.format.channels == 0 {
            return 0;
        }
        self.samples.len() / self.format.channels as usize
    }

    /// Duration covered by this buffer.
    pub fn duration_secs(&self) -> f64 {
        if self.format.sample_rate <= 0.0 {
            return 0.0;
        }
        self.frames() as f64 / self.format.sample_rate
    }

    /// Returns `true` when the buffer holds no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    /// `AudioBuffer` must be `Send` so it can cross thread boundaries.
    #[test]
    fn audio_buffer_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<AudioBuffer>();
    }

    #[test]
    fn frames_counts_per_channel() {
        let buf = AudioBuffer::new(vec![0.0; 512], FormatSpec::new(48_000.0, 2));
        assert_eq!(buf.frames(), 256);
    }

    #[test]
    fn duration_matches_rate() {
        let buf = AudioBuffer::new(vec![0.0; 480], FormatSpec::new(48_000.0, 1));
        assert!((buf.duration_secs() - 0.01).abs() < 1e-9);
    }

    #[test]
    fn empty_buffer_has_zero_frames() {
        let buf = AudioBuffer::empty(FormatSpec::recognition());
        assert!(buf.is_empty());
        assert_eq!(buf.frames(), 0);
        assert_eq!(buf.duration_secs(), 0.0);
    }
}
