//! Configuration: `RecorderConfig` (TOML-persisted settings), per-subsystem
//! typed views, and `AppPaths` for cross-platform data directories.

pub mod paths;
pub mod settings;

pub use paths::AppPaths;
pub use settings::{AudioSettings, EngineSettings, RecorderConfig, TimingSettings};
