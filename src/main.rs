//! Demo CLI — record a voice note until Enter is pressed.
//!
//! # Startup sequence
//!
//! 1. Initialise logging.
//! 2. Load [`RecorderConfig`] from disk (returns default on first run).
//! 3. Probe recognition-engine availability; refuse to start otherwise.
//! 4. Load the Whisper model and build the [`VoiceRecorder`].
//! 5. Spawn the device watcher + route-change coordinator.
//! 6. Record until Enter, echoing the live transcript and input level.
//! 7. Stop, print the transcript and the output file path.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context};
use tokio::sync::mpsc;

use livenote::audio::{
    default_device_name, CaptureEngine, CpalInput, DeviceWatcher, RouteChangeCoordinator,
};
use livenote::config::{AppPaths, RecorderConfig};
use livenote::pipeline::VoiceRecorder;
use livenote::stt::{EngineAvailability, WhisperStreamEngine};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = RecorderConfig::load().context("loading settings.toml")?;
    let paths = AppPaths::new();
    let model_path = config.model_path(&paths);

    match WhisperStreamEngine::probe(config.engine.enabled, &model_path) {
        EngineAvailability::Available => {}
        EngineAvailability::NotEnabled => {
            bail!("transcription is disabled in settings.toml (engine.enabled = false)")
        }
        EngineAvailability::ModelDownloading => bail!(
            "model file missing: {} — download a Whisper GGML model there first",
            model_path.display()
        ),
        EngineAvailability::NotEligible => {
            bail!("this device/configuration cannot run the recognition engine")
        }
    }

    let engine = Arc::new(WhisperStreamEngine::load(
        &model_path,
        config.decode_params(),
        config.stream_params(),
    )?);

    let input = CpalInput::new().context("binding default input device")?;
    let capture = CaptureEngine::new(Box::new(input), config.capture());
    let mut recorder = VoiceRecorder::new(capture, engine, config.finalize_timeout());

    // Route-change plumbing: watcher polls the default device identity,
    // coordinator debounces and hot-swaps.
    let (route_tx, route_rx) = mpsc::channel(16);
    let watcher = DeviceWatcher::spawn(
        config.device_poll_interval(),
        default_device_name,
        route_tx,
    );
    let (coordinator, route_status) =
        RouteChangeCoordinator::new(recorder.capture_engine(), config.route_debounce());
    let coordinator_task = tokio::spawn(coordinator.run(route_rx));

    let output_dir = config.output_dir(&paths);
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let output_path = output_dir.join(format!("note-{stamp}.wav"));

    recorder.start(output_path).await?;
    println!("Recording… press Enter to stop.");

    // Reader thread so the async loop below never blocks on stdin.
    let (stop_tx, mut stop_rx) = mpsc::channel::<()>(1);
    std::thread::spawn(move || {
        let mut line = String::new();
        let _ = std::io::stdin().read_line(&mut line);
        let _ = stop_tx.blocking_send(());
    });

    let levels = recorder.levels();
    let mut ticker = tokio::time::interval(Duration::from_millis(500));
    loop {
        tokio::select! {
            _ = stop_rx.recv() => break,
            _ = ticker.tick() => {
                let text = recorder.display_text();
                let voice = if levels.is_voice_detected() { "●" } else { "○" };
                let stalled = if route_status.is_stalled() { " [device stalled]" } else { "" };
                println!(
                    "[{:>5.1}s] {voice} lvl {:.2}{stalled} | {text}",
                    recorder.duration().await.as_secs_f64(),
                    levels.level(),
                );
            }
        }
    }

    let finished = recorder.stop().await?;
    watcher.abort();
    coordinator_task.abort();

    if finished.transcript_timed_out {
        log::warn!("finalization timed out — transcript may be incomplete");
    }
    println!();
    println!("Transcript: {}", finished.transcript);
    println!(
        "Saved {:.1}s of audio ({} bytes) to {}",
        finished.audio.duration.as_secs_f64(),
        finished.audio.file_size,
        finished.audio.path.display()
    );

    Ok(())
}
