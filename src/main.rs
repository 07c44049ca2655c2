//! scopy-acq - Headless Entry Point
//!
//! Builds a tree with one mock device, runs a time-domain and a
//! frequency-domain instrument on it as a sync cluster for a fixed number of
//! frames, logs what the instruments saw and saves their sessions.
//!
//! Usage: `scopy-acq [FRAMES]`

use anyhow::{Context, Result};
use scopy_acq::{
    acq_tree::{lock_tree, AcqNodeId, AcqNodeKind, AcqTree, FloatChannelNode, SharedAcqTree},
    analysis::peak_bin,
    backend::{ChannelInfo, DeviceBackend, MockDataPattern, MockDevice, SharedDevice},
    config::{self, keys, InstrumentSession, PreferenceStore, Preferences},
    controller::{AcquisitionController, ControllerEvent, FrameCounter, ResourceManager},
    pipeline::TopBlock,
    sync::SyncController,
    types::{DataFormat, InstrumentKind},
};
use std::time::{Duration, Instant};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FRAMES: u64 = 200;
const RUN_TIMEOUT: Duration = Duration::from_secs(60);
const DEVICE_URI: &str = "local:mock0";
const SAMPLE_RATE: f64 = 1_000_000.0;

fn main() -> Result<()> {
    let _guard = init_logging();

    let frames = match std::env::args().nth(1) {
        Some(arg) => arg
            .parse::<u64>()
            .with_context(|| format!("invalid frame count: {}", arg))?,
        None => DEFAULT_FRAMES,
    };

    tracing::info!("Starting scopy-acq for {} frames", frames);
    run(frames)
}

/// Stderr plus a daily log file under the app data dir. The guard flushes
/// the file writer on drop.
fn init_logging() -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,scopy_acq=debug"));

    let (file_layer, guard) = match config::ensure_app_data_dir() {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir.join("logs"), "scopy-acq.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_thread_ids(true);
            (Some(layer), Some(guard))
        }
        Err(_) => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
    guard
}

/// root -> top block "adc" -> mock device -> two channels
fn build_tree() -> Result<(SharedAcqTree, AcqNodeId)> {
    let format = DataFormat {
        bits: 12,
        signed: true,
    };
    let device = MockDevice::new(DEVICE_URI, SAMPLE_RATE)
        .with_channel_info(
            ChannelInfo::new("voltage0").with_format(format).with_scale(0.5),
            MockDataPattern::Sine {
                frequency: 10_000.0,
                amplitude: 1500.0,
                offset: 0.0,
            },
        )
        .with_channel_info(
            ChannelInfo::new("voltage1").with_format(format).with_scale(0.5),
            MockDataPattern::Square {
                frequency: 2_500.0,
                amplitude: 800.0,
                offset: -400.0,
            },
        );
    let channels = device.channels();
    let device = SharedDevice::new(Box::new(device));

    let tree = AcqTree::shared();
    let top = {
        let mut t = lock_tree(&tree);
        let root = t.root();
        let top = t.create("adc", AcqNodeKind::TopBlock(TopBlock::shared("adc")));
        t.add_tree_child(root, top)?;

        let dev = t.create(DEVICE_URI, AcqNodeKind::DeviceSource(device.clone()));
        t.add_tree_child(top, dev)?;
        for info in channels {
            let name = info.name.clone();
            let node = t.create(
                name,
                AcqNodeKind::FloatChannel(FloatChannelNode {
                    device: device.clone(),
                    info,
                }),
            );
            t.add_tree_child(dev, node)?;
        }
        top
    };
    Ok((tree, top))
}

fn run(frames: u64) -> Result<()> {
    let (tree, top) = build_tree()?;
    let mut store = PreferenceStore::new(Preferences::load_or_default());
    let resources = ResourceManager::new();
    let sync = SyncController::shared("adc_sync");

    let mut time = AcquisitionController::new(
        "adc_time",
        InstrumentKind::Time,
        tree.clone(),
        top,
        store.preferences().clone(),
        resources.clone(),
    )?
    .with_preferences(store.subscribe())
    .with_plot(Box::new(FrameCounter::default()))
    .with_sync(sync.clone())?;

    let mut fft = AcquisitionController::new(
        "adc_fft",
        InstrumentKind::Frequency,
        tree.clone(),
        top,
        store.preferences().clone(),
        resources,
    )?
    .with_preferences(store.subscribe())
    .with_plot(Box::new(FrameCounter::default()))
    .with_sync(sync)?;

    for controller in [&mut time, &mut fft] {
        if let Some(session) = InstrumentSession::load(controller.name()) {
            if let Err(e) = controller.apply_session(&session) {
                tracing::warn!("{}: ignoring saved session: {}", controller.name(), e);
            }
        }
    }

    let time_events = time.subscribe();
    let fft_events = fft.subscribe();
    time.start().context("starting adc_time")?;
    fft.start().context("starting adc_fft")?;

    // Redraw rate follows the preference without a restart.
    store.set(keys::PLOT_TARGET_FPS, serde_json::json!(30.0))?;

    let started = Instant::now();
    while time.frames() < frames && started.elapsed() < RUN_TIMEOUT {
        time.poll();
        fft.poll();
        for event in time_events.try_iter().chain(fft_events.try_iter()) {
            if let ControllerEvent::RequestDisconnect { uri } = event {
                anyhow::bail!("device {} failed", uri);
            }
        }
        if !time.is_started() && !fft.is_started() {
            break;
        }
        std::thread::sleep(Duration::from_millis(1));
    }

    tracing::info!(
        "adc_time: {} frames, adc_fft: {} frames in {:.2?} (redraw every {:?})",
        time.frames(),
        fft.frames(),
        started.elapsed(),
        time.update_interval()
    );
    for curve in time.curves() {
        tracing::info!("adc_time {}: {} points", curve.name(), curve.len());
    }
    for curve in fft.curves() {
        let peak = curve.with_data(|x, y| {
            peak_bin(y).and_then(|(i, db)| x.get(i).map(|freq| (*freq, db)))
        });
        match peak {
            Some((freq, db)) => {
                tracing::info!("adc_fft {}: peak {:.0} Hz at {:.1} dB", curve.name(), freq, db)
            }
            None => tracing::info!("adc_fft {}: no data", curve.name()),
        }
    }

    time.stop();
    fft.stop();

    for controller in [&time, &fft] {
        match controller.session().save() {
            Ok(path) => tracing::info!("Saved {} session to {:?}", controller.name(), path),
            Err(e) => tracing::warn!("Failed to save {} session: {}", controller.name(), e),
        }
    }
    tracing::info!("Shutting down...");
    Ok(())
}
