//! Audio subsystem — capture, conversion, persistence, and telemetry.
//!
//! # Data flow
//!
//! ```text
//! Microphone → AudioInput callback ─┬─▶ WavSink (durable file)
//!                                   ├─▶ bounded channel → pipeline
//!                                   └─▶ LevelMeter (throttled telemetry)
//! ```
//!
//! [`CaptureEngine`] owns this whole path.  [`RouteChangeCoordinator`] and
//! [`InterruptionCoordinator`] sit beside it, restarting or pausing the
//! hardware binding mid-session without the downstream consumers noticing.

pub mod buffer;
pub mod capture;
pub mod convert;
pub mod format;
pub mod input;
pub mod interrupt;
pub mod level;
pub mod route;
pub mod sink;

pub use buffer::AudioBuffer;
pub use capture::{CaptureConfig, CaptureEngine, CaptureError, StoppedRecording};
pub use convert::{downmix_to_mono, ConvertError, FormatConverter};
pub use format::{FormatSpec, SampleEncoding};
pub use input::{AudioInput, BufferCallback, CpalInput, InputError, StreamHandle};
pub use interrupt::{InterruptionCoordinator, InterruptionEvent, InterruptionStatus};
pub use level::{LevelHandle, LevelMeter};
pub use route::{
    default_device_name, DeviceWatcher, RouteChangeCoordinator, RouteChangeEvent, RouteStatus,
};
pub use sink::{wait_for_flush, FlushPolicy, SinkError, WavSink};
