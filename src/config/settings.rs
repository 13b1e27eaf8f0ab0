//! Recorder settings, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files and shared across
//! threads.  Conversion helpers hand the subsystems their own typed
//! configs ([`RecorderConfig::capture`], [`RecorderConfig::decode_params`],
//! …) so the rest of the crate never sees raw milliseconds.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::audio::{CaptureConfig, FlushPolicy};
use crate::stt::{DecodeParams, StreamParams};

use super::AppPaths;

// ---------------------------------------------------------------------------
// AudioSettings
// ---------------------------------------------------------------------------

/// Capture-side settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioSettings {
    /// Bound of the callback → pipeline buffer channel.
    pub channel_capacity: usize,
    /// Level-meter publish rate cap in Hz (match the UI frame rate).
    pub level_update_hz: u32,
    /// Raw RMS threshold for the voice-detected flag.
    pub voice_rms_threshold: f32,
    /// Where recordings are written — `None` means the platform default.
    pub output_dir: Option<PathBuf>,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            channel_capacity: 64,
            level_update_hz: 30,
            voice_rms_threshold: 0.015,
            output_dir: None,
        }
    }
}

// ---------------------------------------------------------------------------
// TimingSettings
// ---------------------------------------------------------------------------

/// Debounce, settle, polling, and timeout windows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingSettings {
    /// Quiet window before a route-change burst triggers one hot-swap.
    pub route_debounce_ms: u64,
    /// Settle delay after stopping a stream during a hot-swap.
    pub route_settle_ms: u64,
    /// Device-identity poll interval for the watcher.
    pub device_poll_ms: u64,
    /// Delay between file-size reads after stop.
    pub flush_poll_interval_ms: u64,
    /// Consecutive identical size reads that count as stable.
    pub flush_stable_reads: u32,
    /// Total size reads before giving up (soft failure).
    pub flush_max_attempts: u32,
    /// Bound on the wait for pending transcription results at stop.
    pub finalize_timeout_ms: u64,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            route_debounce_ms: 180,
            route_settle_ms: 300,
            device_poll_ms: 500,
            flush_poll_interval_ms: 50,
            flush_stable_reads: 3,
            flush_max_attempts: 20,
            finalize_timeout_ms: 2_000,
        }
    }
}

// ---------------------------------------------------------------------------
// EngineSettings
// ---------------------------------------------------------------------------

/// Settings for the Whisper recognition engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Whether live transcription is active at all.
    pub enabled: bool,
    /// GGML model file name under the models directory.
    pub model_file: String,
    /// ISO-639-1 speech language, or `"auto"` for built-in detection.
    pub language: String,
    /// Minimum new audio between partial re-decodes.
    pub partial_interval_ms: u64,
    /// Trailing silence that finalizes a segment.
    pub silence_hold_ms: u64,
    /// Hard cap on an open segment.
    pub max_segment_secs: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            model_file: "ggml-base.en.bin".into(),
            language: "auto".into(),
            partial_interval_ms: 1_000,
            silence_hold_ms: 600,
            max_segment_secs: 25,
        }
    }
}

// ---------------------------------------------------------------------------
// RecorderConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level configuration, serialised as `settings.toml`.
///
/// # Persistence
///
/// ```rust,no_run
/// use livenote::config::RecorderConfig;
///
/// // Load (returns Default when file is missing)
/// let config = RecorderConfig::load().unwrap();
/// // config.save().unwrap();
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecorderConfig {
    /// Capture settings.
    pub audio: AudioSettings,
    /// Debounce / polling / timeout windows.
    pub timing: TimingSettings,
    /// Recognition engine settings.
    pub engine: EngineSettings,
}

impl RecorderConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(RecorderConfig::default())` when the file does not exist
    /// yet (first-run scenario) so callers never need to special-case a
    /// missing file.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path (useful for tests).
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`,
    /// creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Save to an explicit path (useful for tests).
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Typed views for the subsystems
    // -----------------------------------------------------------------------

    pub fn capture(&self) -> CaptureConfig {
        CaptureConfig {
            channel_capacity: self.audio.channel_capacity,
            level_update_hz: self.audio.level_update_hz,
            voice_rms_threshold: self.audio.voice_rms_threshold,
            flush: FlushPolicy {
                poll_interval: Duration::from_millis(self.timing.flush_poll_interval_ms),
                stable_reads: self.timing.flush_stable_reads,
                max_attempts: self.timing.flush_max_attempts,
            },
            settle_delay: Duration::from_millis(self.timing.route_settle_ms),
        }
    }

    pub fn decode_params(&self) -> DecodeParams {
        DecodeParams {
            language: self.engine.language.clone(),
            ..DecodeParams::default()
        }
    }

    pub fn stream_params(&self) -> StreamParams {
        StreamParams {
            partial_interval: Duration::from_millis(self.engine.partial_interval_ms),
            silence_hold: Duration::from_millis(self.engine.silence_hold_ms),
            max_segment: Duration::from_secs(self.engine.max_segment_secs),
            ..StreamParams::default()
        }
    }

    pub fn finalize_timeout(&self) -> Duration {
        Duration::from_millis(self.timing.finalize_timeout_ms)
    }

    pub fn route_debounce(&self) -> Duration {
        Duration::from_millis(self.timing.route_debounce_ms)
    }

    pub fn device_poll_interval(&self) -> Duration {
        Duration::from_millis(self.timing.device_poll_ms)
    }

    /// Resolved model path under `paths`.
    pub fn model_path(&self, paths: &AppPaths) -> PathBuf {
        paths.models_dir.join(&self.engine.model_file)
    }

    /// Resolved recordings directory.
    pub fn output_dir(&self, paths: &AppPaths) -> PathBuf {
        self.audio
            .output_dir
            .clone()
            .unwrap_or_else(|| paths.recordings_dir.clone())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    /// A default `RecorderConfig` must survive a TOML round trip unchanged.
    #[test]
    fn round_trip_toml() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("settings.toml");

        let original = RecorderConfig::default();
        original.save_to(&path).expect("save");

        let loaded = RecorderConfig::load_from(&path).expect("load");

        assert_eq!(original.audio.channel_capacity, loaded.audio.channel_capacity);
        assert_eq!(original.audio.level_update_hz, loaded.audio.level_update_hz);
        assert_eq!(
            original.audio.voice_rms_threshold,
            loaded.audio.voice_rms_threshold
        );
        assert_eq!(original.timing.route_debounce_ms, loaded.timing.route_debounce_ms);
        assert_eq!(original.timing.flush_stable_reads, loaded.timing.flush_stable_reads);
        assert_eq!(
            original.timing.finalize_timeout_ms,
            loaded.timing.finalize_timeout_ms
        );
        assert_eq!(original.engine.enabled, loaded.engine.enabled);
        assert_eq!(original.engine.model_file, loaded.engine.model_file);
        assert_eq!(original.engine.language, loaded.engine.language);
    }

    /// `load_from` on a non-existent path must return `Default` without error.
    #[test]
    fn load_missing_returns_default() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("nonexistent.toml");

        let config = RecorderConfig::load_from(&path).expect("should not error");
        let default = RecorderConfig::default();

        assert_eq!(config.engine.model_file, default.engine.model_file);
        assert_eq!(config.timing.route_debounce_ms, default.timing.route_debounce_ms);
    }

    #[test]
    fn typed_views_carry_the_raw_values() {
        let config = RecorderConfig::default();

        let capture = config.capture();
        assert_eq!(capture.channel_capacity, config.audio.channel_capacity);
        assert_eq!(
            capture.settle_delay,
            Duration::from_millis(config.timing.route_settle_ms)
        );
        assert_eq!(capture.flush.stable_reads, config.timing.flush_stable_reads);

        let stream = config.stream_params();
        assert_eq!(
            stream.partial_interval,
            Duration::from_millis(config.engine.partial_interval_ms)
        );

        assert_eq!(config.finalize_timeout(), Duration::from_millis(2_000));
    }

    #[test]
    fn model_path_joins_models_dir() {
        let config = RecorderConfig::default();
        let paths = AppPaths::new();
        let path = config.model_path(&paths);
        assert!(path.starts_with(&paths.models_dir));
        assert!(path.ends_with(&config.engine.model_file));
    }
}
