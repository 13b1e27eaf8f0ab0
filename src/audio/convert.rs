//! Sample format conversion between two fixed [`FormatSpec`]s.
//!
//! [`FormatConverter`] bridges a source format to a target format in three
//! steps: downmix the interleaved input to mono, resample with
//! `rubato::SincFixedIn` (`BlackmanHarris2` window), then fan the mono
//! signal out to the target channel count.  The resampler needs fixed-size
//! input chunks, so a small internal FIFO absorbs whatever buffer sizes the
//! hardware delivers; output therefore lags input by up to one chunk plus
//! the sinc filter delay.
//!
//! A converter carries resampler state between calls and must be
//! [`reset`](FormatConverter::reset) (or rebuilt) across discontinuous audio
//! segments — e.g. after a device hot-swap — so non-contiguous audio is not
//! filtered as if it were contiguous.

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use thiserror::Error;

use super::buffer::AudioBuffer;
use super::format::FormatSpec;

/// Input frames handed to the resampler per process call.
const RESAMPLE_CHUNK: usize = 1024;

// ---------------------------------------------------------------------------
// ConvertError
// ---------------------------------------------------------------------------

/// Errors from constructing or driving a [`FormatConverter`].
#[derive(Debug, Error)]
pub enum ConvertError {
    /// The two formats cannot be bridged (degenerate format, or the
    /// resampler rejected the rate ratio).
    #[error("cannot convert {from} to {to}: {reason}")]
    ConversionFailed {
        from: FormatSpec,
        to: FormatSpec,
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// FormatConverter
// ---------------------------------------------------------------------------

/// Converts [`AudioBuffer`]s from one fixed format to another.
///
/// # Example
///
/// ```rust,no_run
/// use livenote::audio::{AudioBuffer, FormatConverter, FormatSpec};
///
/// let source = FormatSpec::new(48_000.0, 2);
/// let target = FormatSpec::recognition(); // 16 kHz mono
/// let mut conv = FormatConverter::new(source, target).unwrap();
///
/// let input = AudioBuffer::new(vec![0.0; 960], source);
/// let output = conv.convert(&input).unwrap();
/// assert_eq!(output.format, target);
/// ```
pub struct FormatConverter {
    source: FormatSpec,
    target: FormatSpec,
    /// `None` when source and target rates match (channel mapping only).
    resampler: Option<SincFixedIn<f32>>,
    /// Mono samples waiting for a full resampler chunk.
    pending: Vec<f32>,
}

impl FormatConverter {
    /// Build a converter from `source` to `target`.
    ///
    /// # Errors
    ///
    /// [`ConvertError::ConversionFailed`] when either format is degenerate
    /// or the resampler cannot be constructed for the rate ratio.
    pub fn new(source: FormatSpec, target: FormatSpec) -> Result<Self, ConvertError> {
        if source.is_degenerate() || target.is_degenerate() {
            return Err(ConvertError::ConversionFailed {
                from: source,
                to: target,
                reason: "degenerate format".into(),
            });
        }

        let resampler = if (source.sample_rate - target.sample_rate).abs() < f64::EPSILON {
            None
        } else {
            let params = SincInterpolationParameters {
                sinc_len: 128,
                f_cutoff: 0.95,
                interpolation: SincInterpolationType::Linear,
                oversampling_factor: 128,
                window: WindowFunction::BlackmanHarris2,
            };
            let ratio = target.sample_rate / source.sample_rate;
            let resampler =
                SincFixedIn::<f32>::new(ratio, 2.0, params, RESAMPLE_CHUNK, 1).map_err(|e| {
                    ConvertError::ConversionFailed {
                        from: source,
                        to: target,
                        reason: e.to_string(),
                    }
                })?;
            Some(resampler)
        };

        Ok(Self {
            source,
            target,
            resampler,
            pending: Vec::with_capacity(RESAMPLE_CHUNK * 2),
        })
    }

    /// The source format this converter accepts.
    pub fn source(&self) -> FormatSpec {
        self.source
    }

    /// The target format this converter produces.
    pub fn target(&self) -> FormatSpec {
        self.target
    }

    /// Convert one buffer, producing a new buffer in the target format.
    ///
    /// A zero-length input returns a zero-length output without error.
    /// Because of internal chunking, output may be empty until enough input
    /// has accumulated; no audio is lost, only delayed.
    pub fn convert(&mut self, input: &AudioBuffer) -> Result<AudioBuffer, ConvertError> {
        if input.is_empty() {
            return Ok(AudioBuffer::empty(self.target));
        }

        let mono = downmix_to_mono(&input.samples, input.format.channels);

        let resampled = match &mut self.resampler {
            None => mono,
            Some(resampler) => {
                self.pending.extend_from_slice(&mono);

                let ratio = self.target.sample_rate / self.source.sample_rate;
                // Sized for the worst case plus resampler priming margin.
                let mut out =
                    Vec::with_capacity((mono.len() as f64 * ratio).ceil() as usize + RESAMPLE_CHUNK);

                while self.pending.len() >= RESAMPLE_CHUNK {
                    let chunk: Vec<f32> = self.pending.drain(..RESAMPLE_CHUNK).collect();
                    let frames = resampler.process(&[chunk], None).map_err(|e| {
                        ConvertError::ConversionFailed {
                            from: self.source,
                            to: self.target,
                            reason: e.to_string(),
                        }
                    })?;
                    out.extend_from_slice(&frames[0]);
                }
                out
            }
        };

        Ok(AudioBuffer::new(
            fan_out(&resampled, self.target.channels),
            self.target,
        ))
    }

    /// Drain pending input and internal filter delay, producing the tail of
    /// the converted stream.  Call once at end-of-input.
    pub fn flush(&mut self) -> Result<AudioBuffer, ConvertError> {
        let Some(resampler) = &mut self.resampler else {
            return Ok(AudioBuffer::empty(self.target));
        };

        let mut out = Vec::new();

        if !self.pending.is_empty() {
            let remainder: Vec<f32> = self.pending.drain(..).collect();
            let frames = resampler
                .process_partial(Some(&[remainder]), None)
                .map_err(|e| ConvertError::ConversionFailed {
                    from: self.source,
                    to: self.target,
                    reason: e.to_string(),
                })?;
            out.extend_from_slice(&frames[0]);
        }

        let tail = resampler
            .process_partial::<Vec<f32>>(None, None)
            .map_err(|e| ConvertError::ConversionFailed {
                from: self.source,
                to: self.target,
                reason: e.to_string(),
            })?;
        out.extend_from_slice(&tail[0]);

        Ok(AudioBuffer::new(fan_out(&out, self.target.channels), self.target))
    }

    /// Discard resampler state and pending input.
    ///
    /// Required between discontinuous segments (hot-swap) — the sinc filter
    /// history must not straddle the gap.
    pub fn reset(&mut self) {
        self.pending.clear();
        if let Some(resampler) = &mut self.resampler {
            resampler.reset();
        }
    }
}

impl std::fmt::Debug for FormatConverter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormatConverter")
            .field("source", &self.source)
            .field("target", &self.target)
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Channel mapping helpers
// ---------------------------------------------------------------------------

/// Mix interleaved multi-channel audio down to mono by averaging all
/// channels.  `channels == 1` returns an owned copy; `channels == 0` returns
/// empty.
pub fn downmix_to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    match channels {
        0 => Vec::new(),
        1 => samples.to_vec(),
        n => {
            let n = n as usize;
            samples
                .chunks_exact(n)
                .map(|frame| frame.iter().sum::<f32>() / n as f32)
                .collect()
        }
    }
}

/// Duplicate a mono signal into `channels` interleaved channels.
fn fan_out(mono: &[f32], channels: u16) -> Vec<f32> {
    match channels {
        0 => Vec::new(),
        1 => mono.to_vec(),
        n => {
            let n = n as usize;
            let mut out = Vec::with_capacity(mono.len() * n);
            for &s in mono {
                for _ in 0..n {
                    out.push(s);
                }
            }
            out
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // ---- downmix / fan-out -------------------------------------------------

    #[test]
    fn downmix_already_mono() {
        let input = vec![0.1_f32, 0.2, 0.3];
        assert_eq!(downmix_to_mono(&input, 1), input);
    }

    #[test]
    fn downmix_two_channel_averages() {
        let input = vec![1.0_f32, -1.0, 0.5, 0.5];
        let out = downmix_to_mono(&input, 2);
        assert_eq!(out.len(), 2);
        assert!((out[0] - 0.0).abs() < 1e-6);
        assert!((out[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn downmix_zero_channels_is_empty() {
        assert!(downmix_to_mono(&[1.0_f32, 2.0], 0).is_empty());
    }

    #[test]
    fn fan_out_duplicates_frames() {
        let out = fan_out(&[0.25_f32, -0.25], 2);
        assert_eq!(out, vec![0.25, 0.25, -0.25, -0.25]);
    }

    // ---- construction ------------------------------------------------------

    #[test]
    fn degenerate_source_fails_construction() {
        let err = FormatConverter::new(FormatSpec::new(0.0, 1), FormatSpec::recognition());
        assert!(matches!(err, Err(ConvertError::ConversionFailed { .. })));
    }

    #[test]
    fn degenerate_target_fails_construction() {
        let err = FormatConverter::new(FormatSpec::new(48_000.0, 2), FormatSpec::new(16_000.0, 0));
        assert!(matches!(err, Err(ConvertError::ConversionFailed { .. })));
    }

    #[test]
    fn same_rate_needs_no_resampler() {
        let conv =
            FormatConverter::new(FormatSpec::new(16_000.0, 2), FormatSpec::recognition()).unwrap();
        assert!(conv.resampler.is_none());
    }

    // ---- convert -----------------------------------------------------------

    #[test]
    fn zero_frame_input_yields_zero_frame_output() {
        let source = FormatSpec::new(48_000.0, 2);
        let mut conv = FormatConverter::new(source, FormatSpec::recognition()).unwrap();
        let out = conv.convert(&AudioBuffer::empty(source)).unwrap();
        assert!(out.is_empty());
        assert_eq!(out.format, FormatSpec::recognition());
    }

    #[test]
    fn same_rate_stereo_to_mono_converts_immediately() {
        let source = FormatSpec::new(16_000.0, 2);
        let mut conv = FormatConverter::new(source, FormatSpec::recognition()).unwrap();

        let input = AudioBuffer::new(vec![0.5_f32, 0.5, -0.5, -0.5], source);
        let out = conv.convert(&input).unwrap();
        assert_eq!(out.samples.len(), 2);
        assert!((out.samples[0] - 0.5).abs() < 1e-6);
        assert!((out.samples[1] + 0.5).abs() < 1e-6);
    }

    /// Feeding several chunks of a DC signal through a 48 kHz → 16 kHz
    /// converter must eventually produce roughly one third as many frames,
    /// and the amplitude must survive the filter.
    #[test]
    fn downsample_preserves_amplitude_and_ratio() {
        let source = FormatSpec::new(48_000.0, 1);
        let mut conv = FormatConverter::new(source, FormatSpec::recognition()).unwrap();

        let mut produced = 0usize;
        let total_in = 48_000usize;
        let chunk = 480usize;
        let mut all: Vec<f32> = Vec::new();
        for _ in 0..(total_in / chunk) {
            let out = conv
                .convert(&AudioBuffer::new(vec![0.5_f32; chunk], source))
                .unwrap();
            produced += out.samples.len();
            all.extend_from_slice(&out.samples);
        }
        let tail = conv.flush().unwrap();
        produced += tail.samples.len();
        all.extend_from_slice(&tail.samples);

        // 1 second in → ~16 000 frames out, within one chunk of slack.
        assert!(
            produced.abs_diff(16_000) < RESAMPLE_CHUNK,
            "expected ~16000 frames, got {produced}"
        );

        // Skip the filter's priming transient, then check the plateau.
        let settled = &all[all.len() / 4..all.len() * 3 / 4];
        for &s in settled {
            assert!((s - 0.5).abs() < 0.05, "amplitude drift: {s}");
        }
    }

    #[test]
    fn reset_clears_pending_input() {
        let source = FormatSpec::new(48_000.0, 1);
        let mut conv = FormatConverter::new(source, FormatSpec::recognition()).unwrap();

        // Less than one chunk: stays pending.
        let _ = conv
            .convert(&AudioBuffer::new(vec![0.1_f32; 100], source))
            .unwrap();
        assert!(!conv.pending.is_empty());

        conv.reset();
        assert!(conv.pending.is_empty());
    }
}
