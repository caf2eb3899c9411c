use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use decklink_bridge::config::{AppConfig, ConfigStore, SimConfig, SimDeviceKind};
use decklink_bridge::error::AppError;
use decklink_bridge::events::{DeckLinkEvent, EventBus};
use decklink_bridge::utils::LogThrottler;
use decklink_bridge::video::hal::{CompletionResult, ScheduledFrame};
use decklink_bridge::video::sim::{SimDevice, SimDeviceConfig, SimDriver};
use decklink_bridge::video::{
    CaptureController, CaptureStats, DeviceDescriptor, DeviceDiscovery, DisplayModeId, FrameBridge,
    OutputController, PlaybackStats, ProfileCallback, RectangleOverlay, ScheduleOutcome, VideoFrame,
};
use decklink_bridge::warn_throttled;

/// Frames buffered between the capture callback and the playback pump
const PUMP_QUEUE_DEPTH: usize = 8;

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// decklink-bridge command line arguments
#[derive(Parser, Debug)]
#[command(name = "decklink-bridge")]
#[command(version, about = "Capture, overlay and play out video on DeckLink devices", long_about = None)]
struct CliArgs {
    /// Configuration file (defaults are used when it does not exist)
    #[arg(short = 'c', long, value_name = "FILE", default_value = "decklink-bridge.toml")]
    config: PathBuf,

    /// Capture device name substring (overrides config)
    #[arg(long, value_name = "NAME")]
    input: Option<String>,

    /// Playback device name substring (overrides config)
    #[arg(long, value_name = "NAME")]
    output: Option<String>,

    /// Capture display mode, e.g. HD1080p5994 (overrides config)
    #[arg(long, value_name = "MODE")]
    input_mode: Option<DisplayModeId>,

    /// Playback display mode (overrides config)
    #[arg(long, value_name = "MODE")]
    output_mode: Option<DisplayModeId>,

    /// Follow input format changes (overrides config)
    #[arg(long)]
    detect_format: bool,

    /// Stop after scheduling this many frames
    #[arg(short = 'n', long, value_name = "COUNT")]
    frames: Option<u64>,

    /// List discovered devices as JSON and exit
    #[arg(long)]
    list_devices: bool,

    /// Write the effective configuration back to the config file
    #[arg(long)]
    save_config: bool,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Serialize)]
struct RunSummary {
    frames_forwarded: u64,
    capture: CaptureStats,
    playback: PlaybackStats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_level, args.verbose);

    tracing::info!(
        "Starting decklink-bridge v{} (built {})",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_DATE")
    );

    let store = ConfigStore::open(&args.config).await?;
    let mut config = (*store.get()).clone();
    apply_cli_overrides(&mut config, &args);
    config.validate()?;
    if args.save_config {
        store.set(config.clone()).await?;
        tracing::info!("Configuration saved to {}", store.path().display());
    }

    let events = Arc::new(EventBus::new());
    let driver = build_sim_driver(&config.sim);
    let discovery = DeviceDiscovery::new(driver, events.clone());
    discovery.enable()?;

    if args.list_devices {
        let summaries: Vec<_> = discovery
            .devices()
            .into_iter()
            .map(|d| DeviceDescriptor::query(d).summary())
            .collect();
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        discovery.disable()?;
        return Ok(());
    }

    let input_device = discovery
        .find_by_name(&config.input.device_match)
        .ok_or_else(|| AppError::DeviceNotFound(config.input.device_match.clone()))?;
    let output_device = discovery
        .find_by_name(&config.output.device_match)
        .ok_or_else(|| AppError::DeviceNotFound(config.output.device_match.clone()))?;
    let watched = [input_device.persistent_id(), output_device.persistent_id()];

    let profile_callback = ProfileCallback::new(events.clone());
    let capture = CaptureController::new(input_device, profile_callback.clone(), events.clone())?;
    let output = Arc::new(OutputController::new(
        output_device,
        profile_callback,
        events.clone(),
    )?);

    if let Some(connection) = config.input.connection {
        capture.set_input_connection(connection.to_video_connection())?;
    }
    if let Some(link) = config.output.link_configuration {
        output.set_link_configuration(link)?;
    }
    if !output.is_display_mode_supported(config.output.display_mode, config.output.pixel_format) {
        tracing::warn!(
            "{} does not report support for {} {}",
            output.display_name(),
            config.output.display_mode,
            config.output.pixel_format
        );
    }

    output.prepare_for_playback_with_format(
        config.output.display_mode,
        config.output.pixel_format,
        Arc::new(|frame: ScheduledFrame, result: CompletionResult| {
            if result != CompletionResult::Completed {
                tracing::debug!("Frame {} completed as {:?}", frame.id(), result);
            }
        }),
    )?;

    // Capture callback -> pump thread: the callback only copies and enqueues
    let (frame_tx, frame_rx) = mpsc::channel::<VideoFrame>(PUMP_QUEUE_DEPTH);
    let throttler = LogThrottler::default();
    let on_frame = move |frame: &VideoFrame| {
        let copied = match FrameBridge::copy_frame(
            frame.data(),
            frame.width(),
            frame.height(),
            frame.stride as usize,
            frame.format,
            frame.sequence,
        ) {
            Ok(copied) => copied.with_flags(frame.flags),
            Err(e) => {
                warn_throttled!(throttler, "copy", "Dropping captured frame: {}", e);
                return;
            }
        };
        if frame_tx.try_send(copied).is_err() {
            warn_throttled!(throttler, "queue_full", "Playback pump is behind, dropping frame");
        }
    };

    let bridge = if config.overlay.enabled {
        FrameBridge::new(Box::new(RectangleOverlay::new(
            config.overlay.width,
            config.overlay.height,
            config.overlay.thickness,
        )))
    } else {
        FrameBridge::passthrough()
    };
    let mut pump = tokio::task::spawn_blocking({
        let output = output.clone();
        let limit = args.frames;
        move || run_pump(frame_rx, bridge, &output, limit)
    });

    capture.start_capture(
        config.input.display_mode,
        Arc::new(on_frame),
        config.input.apply_detected_format,
    )?;

    tracing::info!(
        "Bridging {} -> {} ({} frames)",
        capture.display_name(),
        output.display_name(),
        args.frames.map_or("unlimited".to_string(), |n| n.to_string())
    );

    let mut event_rx = events.subscribe();
    let mut pump_result = None;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown signal received");
                break;
            }
            result = &mut pump => {
                pump_result = Some(result);
                break;
            }
            event = event_rx.recv() => match event {
                Ok(event) => {
                    if !handle_event(&event, &watched) {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::debug!("Event monitor lagged by {} events", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    // Stopping capture drops the callback and with it the pump's sender
    if let Err(e) = capture.stop_capture() {
        tracing::error!("Failed to stop capture: {}", e);
    }
    let frames_forwarded = match pump_result {
        Some(result) => result?,
        None => pump.await?,
    };

    let stopper = output.clone();
    if let Err(e) = tokio::task::spawn_blocking(move || stopper.stop_playback()).await? {
        tracing::error!("Failed to stop playback: {}", e);
    }
    discovery.disable()?;

    let summary = RunSummary {
        frames_forwarded,
        capture: capture.stats(),
        playback: output.stats(),
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Process and schedule frames until the capture side hangs up or `limit` is reached
fn run_pump(
    mut frames: mpsc::Receiver<VideoFrame>,
    mut bridge: FrameBridge,
    output: &OutputController,
    limit: Option<u64>,
) -> u64 {
    let mut forwarded = 0u64;
    while let Some(frame) = frames.blocking_recv() {
        let processed = match bridge.process(&frame) {
            Ok(processed) => processed,
            Err(e) => {
                tracing::warn!("Frame #{} not processed: {}", frame.sequence, e);
                continue;
            }
        };
        match output.schedule_frame(&processed) {
            Ok(ScheduleOutcome::Scheduled { stream_time }) => {
                tracing::trace!("Frame #{} scheduled at {}", processed.sequence, stream_time);
                forwarded += 1;
            }
            Ok(ScheduleOutcome::Dropped) => {}
            Err(e) => {
                tracing::error!("Playback rejected frame #{}: {}", processed.sequence, e);
                break;
            }
        }
        if limit.is_some_and(|n| forwarded >= n) {
            tracing::info!("Forwarded {} frames", forwarded);
            break;
        }
    }
    forwarded
}

/// Log an event; returns false when the pipeline has to shut down
fn handle_event(event: &DeckLinkEvent, watched: &[u64]) -> bool {
    match event {
        DeckLinkEvent::DeviceRemoved { device } if watched.contains(&device.id) => {
            tracing::warn!("{} was removed", device.name);
            false
        }
        DeckLinkEvent::ProfileChanging(notice) => {
            tracing::warn!(
                "Profile change on {} stops running streams",
                notice.profile.device_name
            );
            false
        }
        DeckLinkEvent::InputFormatChangeFailed { device, error, .. } => {
            tracing::error!("Capture on {} stopped: {}", device.name, error);
            !watched.contains(&device.id)
        }
        DeckLinkEvent::InputFormatChanged {
            device,
            display_mode,
            pixel_format,
            ..
        } => {
            tracing::info!("{} now receives {} {}", device.name, display_mode, pixel_format);
            true
        }
        DeckLinkEvent::VideoFrameArrived { .. } | DeckLinkEvent::ScheduledFrameCompleted { .. } => {
            true
        }
        other => {
            tracing::debug!("Event: {}", other.event_name());
            true
        }
    }
}

fn apply_cli_overrides(config: &mut AppConfig, args: &CliArgs) {
    if let Some(name) = &args.input {
        config.input.device_match = name.clone();
    }
    if let Some(name) = &args.output {
        config.output.device_match = name.clone();
    }
    if let Some(mode) = args.input_mode {
        config.input.display_mode = mode;
    }
    if let Some(mode) = args.output_mode {
        config.output.display_mode = mode;
    }
    if args.detect_format {
        config.input.apply_detected_format = true;
    }
}

/// Create the emulated devices named in the configuration
fn build_sim_driver(sim: &SimConfig) -> Arc<SimDriver> {
    SimDriver::with_devices(sim.devices.iter().map(|entry| {
        let base = match entry.kind {
            SimDeviceKind::Duplex => SimDeviceConfig::duplex(entry.name.clone()),
            SimDeviceKind::Input => SimDeviceConfig::input_only(entry.name.clone()),
            SimDeviceKind::Output => SimDeviceConfig::output_only(entry.name.clone()),
        };
        let mut config = base
            .with_pacing(sim.pacing)
            .with_minimum_preroll(entry.minimum_preroll_frames);
        if entry.quad_link {
            config = config.with_quad_link();
        }
        SimDevice::new(config)
    }))
}

fn init_logging(level: LogLevel, verbose_count: u8) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "decklink_bridge=error",
        LogLevel::Warn => "decklink_bridge=warn",
        LogLevel::Info => "decklink_bridge=info",
        LogLevel::Verbose => "decklink_bridge=debug",
        LogLevel::Debug => "decklink_bridge=debug",
        LogLevel::Trace => "decklink_bridge=trace",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}
