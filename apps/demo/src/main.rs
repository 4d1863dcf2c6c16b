use a3d_core::{
    BufferCaps, ControlPacket, EarParams, EngineConfig, ReflectionParams, SoundBuffer,
    WaveFormat, MAX_SOURCE_REFLECTIONS,
};
use a3d_reflections::backends::{SimDevice, SimStats};
use a3d_reflections::{DalVoice, ServiceState, SlotSnapshot};
use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Drive a simulated hardware voice with early reflections
#[derive(Parser, Debug)]
#[command(name = "a3d-demo", version, about)]
struct Args {
    /// Engine config file (defaults to the platform config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of reflections to request
    #[arg(long, default_value_t = 4, value_parser = clap::value_parser!(u8).range(0..=8))]
    reflections: u8,

    /// Simulated playback time in seconds
    #[arg(long, default_value_t = 2.0)]
    seconds: f32,

    /// Control packet interval in milliseconds
    #[arg(long, default_value_t = 20)]
    tick_ms: u64,

    /// Print the final report as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Serialize)]
struct Report {
    elapsed_ms: u64,
    source_cursor: u32,
    reflections_ready: usize,
    armed: usize,
    service: ServiceState,
    slots: Vec<SlotSnapshot>,
    device: SimStats,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,a3d=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let config_path = match args.config {
        Some(path) => path,
        None => default_config_path()?,
    };
    let config = EngineConfig::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    tracing::info!("Using config {}", config_path.display());

    let device = SimDevice::hardware(32);
    let source = device.create_buffer(
        BufferCaps {
            flags: SimDevice::reflection_flags(),
            buffer_bytes: 65536,
        },
        WaveFormat::new(2, config.base_sample_rate, 16),
    );

    let mut voice = DalVoice::new(Arc::new(device.clone()), source.clone(), &config);
    if !voice.has_reflections() {
        tracing::warn!("Reflections unavailable, driving the dry voice only");
    }

    let packet = build_packet(usize::from(args.reflections));

    // First packet arrives before playback, so reflections wait on notifications
    voice.set_control(&packet)?;
    source.play(true)?;
    tracing::info!(
        reflections = args.reflections,
        armed = voice.engine().map_or(0, |e| e.armed_count()),
        "Source playing"
    );

    let tick = Duration::from_millis(args.tick_ms.max(1));
    let total = Duration::from_secs_f32(args.seconds.max(0.0));
    let mut elapsed = Duration::ZERO;
    let mut interval = tokio::time::interval(tick);

    while elapsed < total {
        tokio::select! {
            _ = interval.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
        }

        device.advance(tick);
        elapsed += tick;

        // Identical packets only re-track drift
        if let Err(e) = voice.set_control(&packet) {
            tracing::warn!("Control update failed: {}", e);
        }
    }

    let report = Report {
        elapsed_ms: elapsed.as_millis() as u64,
        source_cursor: source.current_position()?,
        reflections_ready: voice.reflections_ready(),
        armed: voice.engine().map_or(0, |e| e.armed_count()),
        service: voice
            .engine()
            .map_or(ServiceState::Idle, |e| e.service_state()),
        slots: voice.engine().map(|e| e.snapshot()).unwrap_or_default(),
        device: device.stats(),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    drop(voice);
    tracing::info!(released = device.stats().released, "Shut down");
    Ok(())
}

/// A packet with `count` reflections spread around the listener.
fn build_packet(count: usize) -> ControlPacket {
    let ear = |azimuth: f32, gain: f32, delay: f32| EarParams {
        azimuth,
        elevation: 0.0,
        gain,
        delay,
    };

    let mut packet = ControlPacket {
        left_ear: ear(-0.1, 0.9, 0.0),
        right_ear: ear(0.1, 0.9, 0.0),
        alpha: 0.1,
        freq_factor: 1.0,
        ..Default::default()
    };

    for (i, entry) in packet
        .reflections
        .iter_mut()
        .take(count.min(MAX_SOURCE_REFLECTIONS))
        .enumerate()
    {
        let n = (i + 1) as f32;
        let azimuth = std::f32::consts::TAU * n / MAX_SOURCE_REFLECTIONS as f32;
        *entry = ReflectionParams {
            enable: true,
            available: true,
            mute: false,
            alpha: 0.2,
            left_ear: ear(azimuth - 0.05, 0.6 / n, 0.004 * n),
            right_ear: ear(azimuth + 0.05, 0.6 / n, 0.004 * n + 0.0005),
        };
    }
    packet
}

fn print_report(report: &Report) {
    println!(
        "{} ms simulated, source cursor {}, {} reflections ready ({} armed), service {:?}",
        report.elapsed_ms,
        report.source_cursor,
        report.reflections_ready,
        report.armed,
        report.service
    );
    for slot in report.slots.iter().filter(|s| s.active) {
        println!(
            "  slot {}: offset {} bytes{}",
            slot.index,
            slot.offset,
            if slot.armed { " (armed)" } else { "" }
        );
    }
    println!(
        "  device: {} created, {} duplicated, {} released, {} plays",
        report.device.created, report.device.duplicated, report.device.released, report.device.plays
    );
}

/// Platform config location, e.g. `~/.config/a3d/reflections.toml` on Linux.
fn default_config_path() -> Result<PathBuf> {
    let config_dir =
        dirs::config_dir().ok_or_else(|| anyhow::anyhow!("Failed to get config directory"))?;
    Ok(config_dir.join("a3d").join("reflections.toml"))
}
