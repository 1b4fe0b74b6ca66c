//! Edge-device-facing connection.

use crate::broker::{Broker, BrokerEvent};

use hotfire_protocol::{
    message::EdgeMessage,
    wire::{self, WireError},
};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

const HELLO_TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) async fn listen(address: String, events: mpsc::Sender<BrokerEvent>) {
    let listener = match TcpListener::bind(&address).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("failed to bind edge listener on {address}: {e}");
            std::process::exit(1);
        }
    };
    info!("listening for the edge device on {address}");

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                tokio::spawn(serve(stream, peer, events.clone()));
            }
            Err(e) => warn!("edge accept failed: {e}"),
        }
    }
}

async fn serve(stream: TcpStream, peer: SocketAddr, events: mpsc::Sender<BrokerEvent>) {
    let (mut reader, mut writer) = stream.into_split();
    let mut rx_buffer = Vec::new();

    let hello = match tokio::time::timeout(
        HELLO_TIMEOUT,
        wire::read_message::<EdgeMessage, _>(&mut reader, &mut rx_buffer),
    )
    .await
    {
        Ok(Ok(EdgeMessage::Hello(hello))) => hello,
        Ok(Ok(_)) => {
            warn!("edge {peer} sent traffic before hello, dropping");
            return;
        }
        Ok(Err(e)) => {
            warn!("edge {peer} handshake failed: {e}");
            return;
        }
        Err(_) => {
            warn!("edge {peer} did not introduce itself, dropping");
            return;
        }
    };

    info!(
        "edge device {} (version {}) connected from {peer}",
        hello.device_id, hello.version
    );

    let outbound = Broker::edge_outbound();
    if events
        .send(BrokerEvent::EdgeConnected {
            device_id: hello.device_id,
            tx: outbound.clone(),
        })
        .await
        .is_err()
    {
        return;
    }

    loop {
        tokio::select! {
            queued = outbound.next() => {
                let Some(message) = queued else {
                    // Superseded by a newer edge connection.
                    break;
                };
                if let Err(e) = wire::write_message(&mut writer, &message).await {
                    debug!("edge write failed: {e}");
                    break;
                }
            }

            message = wire::read_message::<EdgeMessage, _>(&mut reader, &mut rx_buffer) => {
                let event = match message {
                    Ok(EdgeMessage::Frame(frame)) => BrokerEvent::FrameReceived(frame),
                    Ok(EdgeMessage::Ack(ack)) => BrokerEvent::AckReceived(ack),
                    Ok(EdgeMessage::Valve(report)) => BrokerEvent::ValveReported(report),
                    Ok(EdgeMessage::Hello(_)) => {
                        debug!("edge sent a second hello, ignoring");
                        continue;
                    }
                    Err(WireError::ConnectionClosed) => break,
                    Err(e) => {
                        warn!("edge read failed: {e}");
                        break;
                    }
                };
                if events.send(event).await.is_err() {
                    break;
                }
            }
        }
    }

    let _ = events
        .send(BrokerEvent::EdgeDisconnected { tx: outbound })
        .await;
}
