//! Audio format descriptors.
//!
//! [`FormatSpec`] is the immutable value type that travels with every
//! [`crate::audio::AudioBuffer`] and pins down a [`crate::audio::WavSink`]'s
//! on-disk layout.  A capture session locks one `FormatSpec` at start
//! (`original_format`) and every downstream consumer relies on it staying
//! fixed — format divergence after a device hot-swap is bridged by a
//! [`crate::audio::FormatConverter`], never propagated.

// ---------------------------------------------------------------------------
// SampleEncoding
// ---------------------------------------------------------------------------

/// On-device / on-disk sample encoding.
///
/// In-memory the crate always works with `f32` samples in `[-1.0, 1.0]`;
/// the encoding only matters at the hardware and file boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleEncoding {
    /// 32-bit IEEE float.
    F32,
    /// 16-bit signed integer.
    I16,
}

impl SampleEncoding {
    /// Bits per sample as written to a WAV header.
    pub fn bits_per_sample(self) -> u16 {
        match self {
            SampleEncoding::F32 => 32,
            SampleEncoding::I16 => 16,
        }
    }
}

// ---------------------------------------------------------------------------
// FormatSpec
// ---------------------------------------------------------------------------

/// Immutable description of a PCM audio format.
///
/// Two specs are interchangeable for streaming purposes iff they compare
/// equal on rate and channel count; encoding differences are absorbed at the
/// boundaries (samples are `f32` in memory regardless).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FormatSpec {
    /// Sample rate in Hz (e.g. 44100.0, 48000.0, 16000.0).
    pub sample_rate: f64,
    /// Number of interleaved channels (1 = mono, 2 = stereo, …).
    pub channels: u16,
    /// Sample encoding at the hardware / file boundary.
    pub encoding: SampleEncoding,
    /// Whether multi-channel samples are interleaved frame-by-frame.
    pub interleaved: bool,
}

impl FormatSpec {
    /// Convenience constructor for an interleaved `f32` format.
    pub fn new(sample_rate: f64, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            encoding: SampleEncoding::F32,
            interleaved: true,
        }
    }

    /// The fixed format consumed by the recognition engine: 16 kHz mono f32.
    pub fn recognition() -> Self {
        Self::new(16_000.0, 1)
    }

    /// A format is degenerate when it cannot carry audio at all — zero
    /// sample rate or zero channels.  Degenerate formats show up when a
    /// device is queried mid-renegotiation and must be rejected.
    pub fn is_degenerate(&self) -> bool {
        self.sample_rate <= 0.0 || self.channels == 0
    }

    /// Returns `true` when converting from `self` to `other` is a no-op
    /// for the streaming path (same rate and channel count).
    pub fn stream_compatible(&self, other: &FormatSpec) -> bool {
        (self.sample_rate - other.sample_rate).abs() < f64::EPSILON
            && self.channels == other.channels
    }
}

impl std::fmt::Display for FormatSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} Hz / {} ch / {:?}",
            self.sample_rate, self.channels, self.encoding
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognition_format_is_16k_mono() {
        let spec = FormatSpec::recognition();
        assert_eq!(spec.sample_rate, 16_000.0);
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.encoding, SampleEncoding::F32);
    }

    #[test]
    fn zero_rate_is_degenerate() {
        assert!(FormatSpec::new(0.0, 1).is_degenerate());
    }

    #[test]
    fn zero_channels_is_degenerate() {
        assert!(FormatSpec::new(48_000.0, 0).is_degenerate());
    }

    #[test]
    fn normal_format_is_not_degenerate() {
        assert!(!FormatSpec::new(44_100.0, 2).is_degenerate());
    }

    #[test]
    fn stream_compatible_ignores_encoding() {
        let a = FormatSpec::new(48_000.0, 1);
        let mut b = a;
        b.encoding = SampleEncoding::I16;
        assert!(a.stream_compatible(&b));
    }

    #[test]
    fn stream_compatible_rejects_rate_mismatch() {
        let a = FormatSpec::new(48_000.0, 1);
        let b = FormatSpec::new(44_100.0, 1);
        assert!(!a.stream_compatible(&b));
    }

    #[test]
    fn bits_per_sample() {
        assert_eq!(SampleEncoding::F32.bits_per_sample(), 32);
        assert_eq!(SampleEncoding::I16.bits_per_sample(), 16);
    }
}
