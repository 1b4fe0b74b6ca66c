//! Ground router: ingests the telemetry stream from the stand controller,
//! fans it out to every connected client and relays valve commands back to
//! the stand with bounded retries.

mod broker;
mod client;
mod edge;
mod session;

use broker::Broker;
use clap::Parser;
use tracing::info;

#[derive(Parser)]
struct Cli {
    /// Address to accept the edge device connection on
    #[arg(long, default_value = "0.0.0.0:5770")]
    edge_listen: String,

    /// Address to accept client connections on
    #[arg(long, default_value = "0.0.0.0:5771")]
    client_listen: String,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let (events, broker) = Broker::new();
    info!("ground router starting");

    tokio::spawn(edge::listen(cli.edge_listen, events.clone()));
    tokio::spawn(client::listen(cli.client_listen, events));

    broker.run().await;
}
