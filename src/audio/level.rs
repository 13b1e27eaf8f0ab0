//! Input level metering and energy-based voice detection.
//!
//! The real-time callback owns a [`LevelMeter`] and feeds it every buffer;
//! the UI-facing side holds a [`LevelHandle`] and polls it whenever it wants.
//! Updates are throttled to a bounded rate inside the meter so per-buffer
//! hardware cadence never turns into per-buffer cross-thread signaling.
//!
//! Two measurements are kept deliberately separate:
//!
//! * the **visual level** is peak-based (snappy, matches what users expect a
//!   meter to do), and
//! * the **voice-detected flag** is RMS-based, because RMS power is stable
//!   against single-sample transients that would make a peak-based flag
//!   flicker.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Meter floor; anything at or below this reads as silence.
const FLOOR_DB: f32 = -60.0;

// ---------------------------------------------------------------------------
// Scalar helpers
// ---------------------------------------------------------------------------

/// Root-mean-square amplitude of `samples`. Empty input is silence (0.0).
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let mean_sq: f32 = samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32;
    mean_sq.sqrt()
}

/// Peak absolute amplitude of `samples`.
pub fn peak(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0_f32, |acc, s| acc.max(s.abs()))
}

/// Convert a linear amplitude to decibels, clamped to the meter floor.
pub fn amplitude_to_db(amplitude: f32) -> f32 {
    if amplitude <= 0.0 {
        return FLOOR_DB;
    }
    (20.0 * amplitude.log10()).max(FLOOR_DB)
}

/// Map a dB value from `[FLOOR_DB, 0]` into `[0.0, 1.0]`.
pub fn normalize_db(db: f32) -> f32 {
    ((db - FLOOR_DB) / -FLOOR_DB).clamp(0.0, 1.0)
}

// ---------------------------------------------------------------------------
// LevelHandle
// ---------------------------------------------------------------------------

/// Cheap-to-clone reader handle for the current input level.
///
/// Values are stored as `f32` bit patterns in atomics so the real-time
/// thread publishes without locks.
#[derive(Clone, Debug, Default)]
pub struct LevelHandle {
    inner: Arc<LevelShared>,
}

#[derive(Debug)]
struct LevelShared {
    /// Peak-based visual level, normalized `[0, 1]`.
    level_bits: AtomicU32,
    /// RMS level, normalized `[0, 1]`.
    rms_bits: AtomicU32,
    voice: AtomicBool,
}

impl Default for LevelShared {
    fn default() -> Self {
        Self {
            level_bits: AtomicU32::new(0.0_f32.to_bits()),
            rms_bits: AtomicU32::new(0.0_f32.to_bits()),
            voice: AtomicBool::new(false),
        }
    }
}

impl LevelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current peak-based input level in `[0.0, 1.0]`.
    pub fn level(&self) -> f32 {
        f32::from_bits(self.inner.level_bits.load(Ordering::Relaxed))
    }

    /// Current RMS input level in `[0.0, 1.0]`.
    pub fn rms_level(&self) -> f32 {
        f32::from_bits(self.inner.rms_bits.load(Ordering::Relaxed))
    }

    /// `true` while RMS power exceeds the configured voice threshold.
    pub fn is_voice_detected(&self) -> bool {
        self.inner.voice.load(Ordering::Relaxed)
    }

    /// Reset to silence (new session, pause).
    pub fn clear(&self) {
        self.inner.level_bits.store(0.0_f32.to_bits(), Ordering::Relaxed);
        self.inner.rms_bits.store(0.0_f32.to_bits(), Ordering::Relaxed);
        self.inner.voice.store(false, Ordering::Relaxed);
    }

    fn publish(&self, level: f32, rms_level: f32, voice: bool) {
        self.inner.level_bits.store(level.to_bits(), Ordering::Relaxed);
        self.inner.rms_bits.store(rms_level.to_bits(), Ordering::Relaxed);
        self.inner.voice.store(voice, Ordering::Relaxed);
    }
}

// ---------------------------------------------------------------------------
// LevelMeter
// ---------------------------------------------------------------------------

/// Callback-side meter: measures every buffer, publishes at a bounded rate.
#[derive(Debug)]
pub struct LevelMeter {
    handle: LevelHandle,
    /// Raw RMS threshold above which the voice flag is raised.
    voice_rms_threshold: f32,
    min_interval: Duration,
    last_publish: Option<Instant>,
}

impl LevelMeter {
    /// `update_hz` caps how often the shared handle is written (e.g. 30 for
    /// a UI frame rate); `voice_rms_threshold` is compared against raw RMS.
    pub fn new(handle: LevelHandle, update_hz: u32, voice_rms_threshold: f32) -> Self {
        let min_interval = if update_hz == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(1.0 / update_hz as f64)
        };
        Self {
            handle,
            voice_rms_threshold,
            min_interval,
            last_publish: None,
        }
    }

    /// Measure one buffer.  Publishes only when the throttle interval has
    /// elapsed since the last publish.
    pub fn observe(&mut self, samples: &[f32]) {
        let now = Instant::now();
        if let Some(last) = self.last_publish {
            if now.duration_since(last) < self.min_interval {
                return;
            }
        }
        self.last_publish = Some(now);

        let rms_amp = rms(samples);
        let peak_amp = peak(samples);

        self.handle.publish(
            normalize_db(amplitude_to_db(peak_amp)),
            normalize_db(amplitude_to_db(rms_amp)),
            rms_amp > self.voice_rms_threshold,
        );
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // ---- scalar helpers ----------------------------------------------------

    #[test]
    fn rms_of_empty_is_zero() {
        assert_eq!(rms(&[]), 0.0);
    }

    #[test]
    fn rms_of_dc_signal() {
        let out = rms(&[0.5_f32; 100]);
        assert!((out - 0.5).abs() < 1e-6);
    }

    #[test]
    fn peak_finds_largest_magnitude() {
        assert_eq!(peak(&[0.1_f32, -0.8, 0.3]), 0.8);
    }

    #[test]
    fn silence_maps_to_floor() {
        assert_eq!(amplitude_to_db(0.0), FLOOR_DB);
        assert_eq!(normalize_db(FLOOR_DB), 0.0);
    }

    #[test]
    fn full_scale_maps_to_one() {
        assert_eq!(amplitude_to_db(1.0), 0.0);
        assert_eq!(normalize_db(0.0), 1.0);
    }

    #[test]
    fn normalize_is_clamped() {
        assert_eq!(normalize_db(-120.0), 0.0);
        assert_eq!(normalize_db(6.0), 1.0);
    }

    // ---- meter / handle ----------------------------------------------------

    #[test]
    fn handle_defaults_to_silence() {
        let handle = LevelHandle::new();
        assert_eq!(handle.level(), 0.0);
        assert!(!handle.is_voice_detected());
    }

    #[test]
    fn loud_buffer_raises_voice_flag() {
        let handle = LevelHandle::new();
        let mut meter = LevelMeter::new(handle.clone(), 0, 0.01);
        meter.observe(&[0.5_f32; 480]);

        assert!(handle.is_voice_detected());
        assert!(handle.level() > 0.5);
    }

    #[test]
    fn quiet_buffer_keeps_voice_flag_low() {
        let handle = LevelHandle::new();
        let mut meter = LevelMeter::new(handle.clone(), 0, 0.01);
        meter.observe(&[0.001_f32; 480]);

        assert!(!handle.is_voice_detected());
    }

    /// Transient spike: peak level jumps, but RMS stays below the voice
    /// threshold — the two measurements must disagree.
    #[test]
    fn transient_moves_peak_not_voice() {
        let handle = LevelHandle::new();
        let mut meter = LevelMeter::new(handle.clone(), 0, 0.05);

        let mut samples = vec![0.0_f32; 4_800];
        samples[0] = 0.9;
        meter.observe(&samples);

        assert!(handle.level() > 0.9);
        assert!(!handle.is_voice_detected());
    }

    #[test]
    fn throttle_suppresses_rapid_updates() {
        let handle = LevelHandle::new();
        // 1 Hz throttle: the second observe inside the same second is dropped.
        let mut meter = LevelMeter::new(handle.clone(), 1, 0.01);

        meter.observe(&[0.5_f32; 480]);
        assert!(handle.is_voice_detected());

        meter.observe(&[0.0_f32; 480]);
        // Still the first publish's values.
        assert!(handle.is_voice_detected());
    }

    #[test]
    fn clear_resets_to_silence() {
        let handle = LevelHandle::new();
        let mut meter = LevelMeter::new(handle.clone(), 0, 0.01);
        meter.observe(&[0.5_f32; 480]);
        handle.clear();

        assert_eq!(handle.level(), 0.0);
        assert!(!handle.is_voice_detected());
    }
}
