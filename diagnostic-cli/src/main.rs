//! Diagnostic client for the ground router: prints live telemetry and can
//! issue a valve command and wait for its acknowledgement.

use chrono::Local;
use clap::{Parser, Subcommand, ValueEnum};
use hotfire_protocol::{
    message::{ClientHello, ClientMessage, RouterMessage},
    types::{Command, ValveState},
    wire,
};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::net::TcpStream;
use tracing::{error, info, warn};

const HEARTBEAT_PERIOD: Duration = Duration::from_secs(1);

#[derive(Parser)]
struct Cli {
    /// Address of the ground router's client port
    #[arg(short, long, default_value = "127.0.0.1:5771")]
    router: String,

    /// Client identifier presented to the router
    #[arg(long, default_value = "diagnostic-cli")]
    client_id: String,

    /// Only receive the named channels (default: all channels)
    #[arg(long)]
    subscribe: Vec<String>,

    /// Format to print received messages in
    #[arg(short, long, default_value = "summary")]
    format: PrintFormat,

    #[command(subcommand)]
    action: Option<Action>,
}

#[derive(Clone, ValueEnum)]
enum PrintFormat {
    Summary,
    Debug,
    DebugPretty,
}

#[derive(Subcommand)]
enum Action {
    /// Command a valve and exit once the router reports the outcome
    Actuate {
        /// Target device id
        device: String,
        /// Target valve id
        valve: String,
        /// Desired valve state
        #[arg(value_enum)]
        state: DesiredState,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum DesiredState {
    Open,
    Closed,
}

impl From<DesiredState> for ValveState {
    fn from(state: DesiredState) -> Self {
        match state {
            DesiredState::Open => ValveState::Open,
            DesiredState::Closed => ValveState::Closed,
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let stream = match TcpStream::connect(&cli.router).await {
        Ok(stream) => stream,
        Err(e) => {
            error!("failed to connect to router at {}: {e}", cli.router);
            std::process::exit(1);
        }
    };
    let (mut reader, mut writer) = stream.into_split();
    info!("connected to router at {}", cli.router);

    let hello = ClientMessage::Hello(ClientHello {
        client_id: cli.client_id.clone(),
        subscribe: if cli.subscribe.is_empty() {
            None
        } else {
            Some(cli.subscribe.clone())
        },
    });
    wire::write_message(&mut writer, &hello).await.unwrap();

    // Command ids need only be unique per client; wall-clock millis are
    // plenty for a one-shot tool.
    let awaiting_ack = match &cli.action {
        None => None,
        Some(Action::Actuate {
            device,
            valve,
            state,
        }) => {
            let command_id = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("system clock before unix epoch")
                .as_millis() as u64;
            let command = Command {
                device_id: device.clone(),
                valve_id: valve.clone(),
                desired_state: (*state).into(),
                command_id,
                client_id: cli.client_id.clone(),
            };
            info!("commanding {valve} on {device} to {}", command.desired_state);
            wire::write_message(&mut writer, &ClientMessage::Command(command))
                .await
                .unwrap();
            Some(command_id)
        }
    };

    let mut heartbeat = tokio::time::interval(HEARTBEAT_PERIOD);
    let mut rx_buffer = Vec::new();

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                if let Err(e) = wire::write_message(&mut writer, &ClientMessage::Heartbeat).await {
                    error!("router connection lost: {e}");
                    std::process::exit(1);
                }
            }

            message = wire::read_message::<RouterMessage, _>(&mut reader, &mut rx_buffer) => {
                let message = match message {
                    Ok(message) => message,
                    Err(e) => {
                        error!("router connection lost: {e}");
                        std::process::exit(1);
                    }
                };

                print_message(&cli.format, &message);

                if let (RouterMessage::Ack(ack), Some(command_id)) = (&message, awaiting_ack) {
                    if ack.command_id == command_id {
                        info!("command outcome: {}", ack.status);
                        if let Some(reason) = &ack.reason {
                            warn!("reason: {reason}");
                        }
                        return;
                    }
                }
            }
        }
    }
}

fn print_message(format: &PrintFormat, message: &RouterMessage) {
    let stamp = Local::now().format("%H:%M:%S%.3f");
    match format {
        PrintFormat::Debug => println!("{stamp} {message:?}"),
        PrintFormat::DebugPretty => info!("Received:\n{message:#?}"),
        PrintFormat::Summary => match message {
            RouterMessage::Frame(frame) => {
                let readings: Vec<String> = frame
                    .readings
                    .iter()
                    .map(|reading| {
                        format!(
                            "{}={:.2}{}",
                            reading.channel_id,
                            reading.value,
                            if reading.valid { "" } else { " (stale)" }
                        )
                    })
                    .collect();
                println!(
                    "{stamp} [{}] #{} {}",
                    frame.device_id,
                    frame.sequence,
                    readings.join(" ")
                );
            }
            RouterMessage::Valve(report) => {
                println!(
                    "{stamp} [{}] valve {} is {}{}",
                    report.device_id,
                    report.valve_id,
                    report.state,
                    if report.settled { "" } else { " (settling)" }
                );
            }
            RouterMessage::Ack(ack) => {
                println!("{stamp} command {} -> {}", ack.command_id, ack.status);
            }
        },
    }
}
