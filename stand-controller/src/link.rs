//! Bidirectional link to the ground router.
//!
//! The link is a persistent TCP stream: telemetry frames go out, valve
//! commands come in. Connection loss triggers fail-safe reversion of every
//! valve and reconnection with capped exponential backoff. While
//! disconnected, outbound frames are discarded (stale telemetry is not worth
//! delivering once connectivity resumes) and sampling continues so
//! monitoring resumes immediately at reconnect.

use crate::valve::ValveController;
use hotfire_protocol::{
    message::{EdgeHello, EdgeMessage, RouterToEdge},
    types::TelemetryFrame,
    wire::{self, WireError},
};
use serde::Serialize;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const BACKOFF_BASE: Duration = Duration::from_millis(250);
const BACKOFF_CAP: Duration = Duration::from_secs(10);

/// Bound on any single write to the router. A peer that stops draining the
/// stream is link loss and must trigger fail-safe reversion well inside the
/// reversion bound, not whenever the kernel buffers happen to fill. Commands
/// are read interleaved with frame writes, so this also bounds how long a
/// frame write can delay actuation.
const WRITE_TIMEOUT: Duration = Duration::from_millis(100);

async fn write_bounded<T, W>(writer: &mut W, message: &T) -> Result<(), WireError>
where
    T: Serialize,
    W: AsyncWrite + Unpin,
{
    match tokio::time::timeout(WRITE_TIMEOUT, wire::write_message(writer, message)).await {
        Ok(result) => result,
        Err(_) => Err(WireError::Io(std::io::ErrorKind::TimedOut.into())),
    }
}

pub(crate) async fn run(
    router_addr: String,
    device_id: String,
    mut valves: ValveController,
    mut frames: mpsc::Receiver<TelemetryFrame>,
) {
    let mut backoff = BACKOFF_BASE;

    loop {
        debug!("connecting to router at {router_addr}");
        match TcpStream::connect(&router_addr).await {
            Ok(stream) => {
                info!("link connected to {router_addr}");
                backoff = BACKOFF_BASE;

                match run_connection(stream, &device_id, &mut valves, &mut frames).await {
                    Ok(()) => info!("link closed"),
                    Err(e) => warn!("link lost: {e}"),
                }

                // Safety reversion happens before any reconnection attempt.
                valves.on_link_lost();
            }
            Err(e) => {
                debug!("connection attempt failed: {e}");
            }
        }

        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(BACKOFF_CAP);

        // Drop frames that accumulated while disconnected.
        while frames.try_recv().is_ok() {}
    }
}

/// Services one established connection until it fails or either side closes.
///
/// Inbound commands are handled interleaved with frame sends, so actuation
/// latency is bounded by at most one in-flight frame write, not by the
/// sampling period.
pub(crate) async fn run_connection<S>(
    stream: S,
    device_id: &str,
    valves: &mut ValveController,
    frames: &mut mpsc::Receiver<TelemetryFrame>,
) -> Result<(), WireError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut reader, mut writer) = tokio::io::split(stream);

    let hello = EdgeMessage::Hello(EdgeHello {
        device_id: device_id.to_owned(),
        version: env!("CARGO_PKG_VERSION").to_owned(),
    });
    write_bounded(&mut writer, &hello).await?;

    // Report the (safe) valve configuration before accepting any command.
    for report in valves.reports() {
        write_bounded(&mut writer, &EdgeMessage::Valve(report)).await?;
    }

    let mut rx_buffer = Vec::new();

    loop {
        tokio::select! {
            frame = frames.recv() => {
                let Some(frame) = frame else {
                    // Sampling has stopped; only happens at shutdown.
                    return Ok(());
                };
                write_bounded(&mut writer, &EdgeMessage::Frame(frame)).await?;
            }

            message = wire::read_message::<RouterToEdge, _>(&mut reader, &mut rx_buffer) => {
                match message? {
                    RouterToEdge::Command(command) => {
                        let ack = valves.apply(&command);
                        write_bounded(&mut writer, &EdgeMessage::Ack(ack)).await?;

                        if let Some(report) = valves.report_for(&command.valve_id) {
                            write_bounded(&mut writer, &EdgeMessage::Valve(report)).await?;
                        }
                    }
                }
            }
        }
    }
}
