//! Edge node for a hot-fire test stand: samples analog sensor channels on a
//! fixed period, frames calibrated telemetry, streams it to the ground
//! router and executes valve commands with fail-safe reversion on link loss.

mod adc;
mod config;
mod framer;
mod link;
mod sensors;
mod valve;

use adc::{sim::SimulatedAdc, Converter};
use clap::Parser;
use config::DeviceConfig;
use framer::Framer;
use hotfire_protocol::types::TelemetryFrame;
use sensors::SensorManager;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use valve::ValveController;

/// Depth of the frame hand-off channel to the link task. When it is full the
/// newest frame is dropped: telemetry favours freshness over completeness.
const FRAME_CHANNEL_DEPTH: usize = 8;

#[derive(Parser)]
struct Cli {
    /// Path to the device configuration file
    #[arg(short, long)]
    config: PathBuf,

    /// Address of the ground router's edge port
    #[arg(short, long, default_value = "127.0.0.1:5770")]
    router: String,

    /// Sampling period in milliseconds
    #[arg(short, long, default_value_t = 100)]
    period: u64,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let config = match DeviceConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("configuration error: {e}");
            std::process::exit(1);
        }
    };

    info!(
        "device {}: {} sensor channels on {} ADCs, {} valves",
        config.device_id,
        config.sensors.len(),
        config.adc_count,
        config.valves.len()
    );

    for channel in &config.sensors {
        debug!(
            "channel {}: ADC {} input {:?}, unit {}",
            channel.id, channel.adc_index, channel.input, channel.unit
        );
    }

    let channels: Arc<[config::SensorChannel]> = config.sensors.clone().into();

    // No stand hardware access from a host build; every ADC index gets the
    // deterministic simulated converter. The hardware driver is
    // adc::ads112c04 behind the same trait.
    let adcs: Vec<Box<dyn Converter>> = (0..config.adc_count)
        .map(|_| Box::new(SimulatedAdc::new()) as Box<dyn Converter>)
        .collect();

    let manager = SensorManager::new(channels.clone(), adcs);
    let framer = Framer::new(&config.device_id, channels.clone());

    // Valves reach their defaults before the link can accept any command.
    let mut valves = ValveController::new(&config.device_id, &config.valves);
    valves.on_boot();

    let (frame_tx, frame_rx) = mpsc::channel(FRAME_CHANNEL_DEPTH);
    let period = Duration::from_millis(cli.period);

    tokio::spawn(sampling_loop(
        manager,
        channels,
        framer,
        frame_tx,
        period,
    ));

    link::run(cli.router, config.device_id, valves, frame_rx).await;
}

/// Fixed-period scan, calibrate and frame loop. Runs for the process
/// lifetime; the timer is level triggered, so an overrunning scan is
/// reported as a deadline miss and the next scan starts immediately rather
/// than accumulating backlog.
async fn sampling_loop(
    mut manager: SensorManager,
    channels: Arc<[config::SensorChannel]>,
    mut framer: Framer,
    frame_tx: mpsc::Sender<TelemetryFrame>,
    period: Duration,
) {
    let boot = Instant::now();
    let mut next = boot + period;

    loop {
        tokio::time::sleep_until(next).await;

        let scan = manager.scan();
        let calibrated = sensors::calibrate_scan(&channels, &scan);
        let frame = framer.tick(&calibrated, boot.elapsed().as_millis() as u64);

        if frame_tx.try_send(frame).is_err() {
            debug!("link busy, dropping frame");
        }

        next += period;
        let now = Instant::now();
        if next < now {
            manager.note_deadline_miss();
            let stats = manager.statistics();
            warn!(
                "scan overran its period ({} misses in {} scans)",
                stats.deadline_misses, stats.scans
            );
            next = now;
        }
    }
}
