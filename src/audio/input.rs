//! Hardware audio input seam.
//!
//! [`AudioInput`] abstracts the microphone so the capture engine can be
//! driven by real hardware ([`CpalInput`]) in production and by a scripted
//! [`MockInput`] in tests.  Implementations deliver raw interleaved `f32`
//! buffers to a callback on a dedicated audio thread.
//!
//! The cpal stream object is not `Send` on every platform, so each stream
//! lives on its own thread for its whole life: [`AudioInput::start_stream`]
//! spawns the thread, [`StreamHandle::stop`] signals it and **joins** it.
//! After `stop` returns, the callback is guaranteed to never run again —
//! the teardown-ordering invariant the pause/resume and hot-swap paths
//! depend on.

use std::sync::mpsc;
use std::thread;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use thiserror::Error;

use super::format::FormatSpec;

/// Callback invoked with each raw hardware buffer (interleaved `f32`).
pub type BufferCallback = Box<dyn FnMut(&[f32]) + Send + 'static>;

// ---------------------------------------------------------------------------
// InputError
// ---------------------------------------------------------------------------

/// Errors from acquiring or starting a hardware input.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("no input device found on the default audio host")]
    NoDevice,

    #[error("failed to query default input config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("failed to build input stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("failed to start audio stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("audio thread died before the stream started")]
    StreamThreadDied,

    #[error("failed to spawn audio thread: {0}")]
    Thread(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// StreamHandle
// ---------------------------------------------------------------------------

/// Handle to a running input stream.
///
/// [`stop`](Self::stop) signals the stream thread and joins it, making
/// "fully stopped" observable to the caller.  Dropping the handle stops the
/// stream too, but without the join guarantee — prefer `stop`.
pub struct StreamHandle {
    stop_tx: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl StreamHandle {
    fn new(stop_tx: mpsc::Sender<()>, join: thread::JoinHandle<()>) -> Self {
        Self {
            stop_tx,
            join: Some(join),
        }
    }

    /// Stop the stream and wait for its thread to exit.
    pub fn stop(mut self) {
        let _ = self.stop_tx.send(());
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
    }
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// AudioInput
// ---------------------------------------------------------------------------

/// A source of live PCM audio.
pub trait AudioInput: Send {
    /// Format the bound device currently delivers.
    fn current_format(&self) -> FormatSpec;

    /// Identity of the bound device, for route-change detection.
    fn device_name(&self) -> String;

    /// Discard the current device binding and acquire a fresh one.
    ///
    /// A stopped-then-restarted binding can report a stale cached format;
    /// after a route change the format must be read off a new binding.
    fn rebind(&mut self) -> Result<(), InputError>;

    /// Start delivering buffers to `on_buffer` on a dedicated thread.
    fn start_stream(&mut self, on_buffer: BufferCallback) -> Result<StreamHandle, InputError>;
}

// ---------------------------------------------------------------------------
// CpalInput
// ---------------------------------------------------------------------------

/// Production input bound to the system default device via `cpal`.
pub struct CpalInput {
    device: cpal::Device,
    config: cpal::StreamConfig,
    format: FormatSpec,
    name: String,
}

impl CpalInput {
    /// Bind to the system default input device and its preferred config.
    pub fn new() -> Result<Self, InputError> {
        let (device, config, format, name) = Self::acquire()?;
        Ok(Self {
            device,
            config,
            format,
            name,
        })
    }

    fn acquire() -> Result<(cpal::Device, cpal::StreamConfig, FormatSpec, String), InputError> {
        let host = cpal::default_host();
        let device = host.default_input_device().ok_or(InputError::NoDevice)?;

        let supported = device.default_input_config()?;
        let format = FormatSpec::new(
            supported.sample_rate().0 as f64,
            supported.channels(),
        );
        let config: cpal::StreamConfig = supported.into();
        let name = device.name().unwrap_or_else(|_| "<unknown>".into());

        Ok((device, config, format, name))
    }
}

impl AudioInput for CpalInput {
    fn current_format(&self) -> FormatSpec {
        self.format
    }

    fn device_name(&self) -> String {
        self.name.clone()
    }

    fn rebind(&mut self) -> Result<(), InputError> {
        let (device, config, format, name) = Self::acquire()?;
        log::debug!("input: rebound to '{name}' ({format})");
        self.device = device;
        self.config = config;
        self.format = format;
        self.name = name;
        Ok(())
    }

    fn start_stream(&mut self, mut on_buffer: BufferCallback) -> Result<StreamHandle, InputError> {
        let device = self.device.clone();
        let config = self.config.clone();

        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), InputError>>();

        // The cpal stream must be created and dropped on the same thread.
        let join = thread::Builder::new()
            .name("livenote-audio".into())
            .spawn(move || {
                let stream = device.build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        on_buffer(data);
                    },
                    |err: cpal::StreamError| {
                        log::error!("input: cpal stream error: {err}");
                    },
                    None,
                );

                let stream = match stream {
                    Ok(s) => s,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.into()));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(e.into()));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                // Park until told to stop; dropping the stream ends delivery.
                let _ = stop_rx.recv();
                drop(stream);
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(StreamHandle::new(stop_tx, join)),
            Ok(Err(e)) => {
                let _ = join.join();
                Err(e)
            }
            Err(_) => Err(InputError::StreamThreadDied),
        }
    }
}

// ---------------------------------------------------------------------------
// MockInput  (test-only)
// ---------------------------------------------------------------------------

/// Scripted input for tests: a [`MockDriver`] pushes sample blocks that a
/// running stream delivers to the installed callback.
#[cfg(test)]
pub struct MockInput {
    shared: std::sync::Arc<MockShared>,
}

#[cfg(test)]
pub struct MockDriver {
    shared: std::sync::Arc<MockShared>,
    feed_tx: mpsc::Sender<Vec<f32>>,
}

#[cfg(test)]
struct MockShared {
    format: std::sync::Mutex<FormatSpec>,
    name: std::sync::Mutex<String>,
    feed_rx: std::sync::Mutex<mpsc::Receiver<Vec<f32>>>,
    streaming: std::sync::atomic::AtomicBool,
    delivered: std::sync::atomic::AtomicUsize,
    rebinds: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl MockInput {
    /// Create a mock bound to `format`, plus the driver tests use to feed it.
    pub fn new(format: FormatSpec) -> (Self, MockDriver) {
        let (feed_tx, feed_rx) = mpsc::channel();
        let shared = std::sync::Arc::new(MockShared {
            format: std::sync::Mutex::new(format),
            name: std::sync::Mutex::new("mock-mic".into()),
            feed_rx: std::sync::Mutex::new(feed_rx),
            streaming: std::sync::atomic::AtomicBool::new(false),
            delivered: std::sync::atomic::AtomicUsize::new(0),
            rebinds: std::sync::atomic::AtomicUsize::new(0),
        });
        (
            Self {
                shared: shared.clone(),
            },
            MockDriver { shared, feed_tx },
        )
    }
}

#[cfg(test)]
impl MockDriver {
    /// Push one block of samples and wait until a running stream delivers it.
    ///
    /// Panics if nothing consumes the block within a second — a test pushing
    /// while no stream is active is a bug in the test.
    pub fn push(&self, samples: Vec<f32>) {
        use std::sync::atomic::Ordering;

        let before = self.shared.delivered.load(Ordering::SeqCst);
        self.feed_tx.send(samples).expect("mock feed closed");

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(1);
        while self.shared.delivered.load(Ordering::SeqCst) <= before {
            assert!(
                std::time::Instant::now() < deadline,
                "mock buffer not delivered — no active stream?"
            );
            thread::yield_now();
        }
    }

    /// Change the format the *next* (re)bind will report.
    pub fn set_format(&self, format: FormatSpec) {
        *self.shared.format.lock().unwrap() = format;
    }

    /// Change the reported device identity.
    pub fn set_name(&self, name: &str) {
        *self.shared.name.lock().unwrap() = name.to_string();
    }

    /// `true` while a stream thread is delivering.
    pub fn is_streaming(&self) -> bool {
        self.shared
            .streaming
            .load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Number of `rebind` calls observed.
    pub fn rebinds(&self) -> usize {
        self.shared
            .rebinds
            .load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
impl AudioInput for MockInput {
    fn current_format(&self) -> FormatSpec {
        *self.shared.format.lock().unwrap()
    }

    fn device_name(&self) -> String {
        self.shared.name.lock().unwrap().clone()
    }

    fn rebind(&mut self) -> Result<(), InputError> {
        self.shared
            .rebinds
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }

    fn start_stream(&mut self, mut on_buffer: BufferCallback) -> Result<StreamHandle, InputError> {
        use std::sync::atomic::Ordering;
        use std::time::Duration;

        let shared = self.shared.clone();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        shared.streaming.store(true, Ordering::SeqCst);
        let join = thread::spawn(move || {
            loop {
                if stop_rx.try_recv().is_ok() {
                    break;
                }
                let block = {
                    let rx = shared.feed_rx.lock().unwrap();
                    rx.recv_timeout(Duration::from_millis(2))
                };
                if let Ok(samples) = block {
                    on_buffer(&samples);
                    shared.delivered.fetch_add(1, Ordering::SeqCst);
                }
            }
            shared.streaming.store(false, Ordering::SeqCst);
        });

        Ok(StreamHandle::new(stop_tx, join))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_stream_delivers_pushed_buffers() {
        let (mut input, driver) = MockInput::new(FormatSpec::new(48_000.0, 1));

        let (seen_tx, seen_rx) = mpsc::channel::<usize>();
        let handle = input
            .start_stream(Box::new(move |data| {
                let _ = seen_tx.send(data.len());
            }))
            .unwrap();

        driver.push(vec![0.0_f32; 480]);
        assert_eq!(seen_rx.recv().unwrap(), 480);

        handle.stop();
        assert!(!driver.is_streaming());
    }

    #[test]
    fn stop_joins_before_returning() {
        let (mut input, driver) = MockInput::new(FormatSpec::new(48_000.0, 1));
        let handle = input.start_stream(Box::new(|_| {})).unwrap();
        assert!(driver.is_streaming());

        handle.stop();
        // Joined: the flag flip is observable immediately after stop().
        assert!(!driver.is_streaming());
    }

    #[test]
    fn rebind_reports_updated_format() {
        let (mut input, driver) = MockInput::new(FormatSpec::new(48_000.0, 1));
        driver.set_format(FormatSpec::new(44_100.0, 2));
        input.rebind().unwrap();

        assert_eq!(input.current_format(), FormatSpec::new(44_100.0, 2));
        assert_eq!(driver.rebinds(), 1);
    }
}
