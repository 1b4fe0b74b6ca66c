//! Client-facing connections.

use crate::broker::{Broker, BrokerEvent};

use hotfire_protocol::{
    message::ClientMessage,
    wire::{self, WireError},
};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// A connection that has not introduced itself within this bound is dropped.
const HELLO_TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) async fn listen(address: String, events: mpsc::Sender<BrokerEvent>) {
    let listener = match TcpListener::bind(&address).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("failed to bind client listener on {address}: {e}");
            std::process::exit(1);
        }
    };
    info!("listening for clients on {address}");

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                tokio::spawn(serve(stream, peer, events.clone()));
            }
            Err(e) => warn!("client accept failed: {e}"),
        }
    }
}

async fn serve(stream: TcpStream, peer: SocketAddr, events: mpsc::Sender<BrokerEvent>) {
    let (mut reader, mut writer) = stream.into_split();
    let mut rx_buffer = Vec::new();

    let hello = match tokio::time::timeout(
        HELLO_TIMEOUT,
        wire::read_message::<ClientMessage, _>(&mut reader, &mut rx_buffer),
    )
    .await
    {
        Ok(Ok(ClientMessage::Hello(hello))) => hello,
        Ok(Ok(_)) => {
            warn!("client {peer} sent traffic before hello, dropping");
            return;
        }
        Ok(Err(e)) => {
            warn!("client {peer} handshake failed: {e}");
            return;
        }
        Err(_) => {
            warn!("client {peer} did not introduce itself, dropping");
            return;
        }
    };

    let client_id = hello.client_id.clone();
    let outbound = Broker::client_outbound();

    if events
        .send(BrokerEvent::ClientConnected {
            hello,
            tx: outbound.clone(),
        })
        .await
        .is_err()
    {
        return;
    }

    debug!("client {client_id} connected from {peer}");

    loop {
        tokio::select! {
            queued = outbound.next() => {
                let Some(message) = queued else {
                    // Broker closed this session (heartbeat expiry or
                    // supersession).
                    break;
                };
                if let Err(e) = wire::write_message(&mut writer, &message).await {
                    debug!("client {client_id} write failed: {e}");
                    break;
                }
            }

            message = wire::read_message::<ClientMessage, _>(&mut reader, &mut rx_buffer) => {
                match message {
                    Ok(ClientMessage::Heartbeat) => {
                        let event = BrokerEvent::Heartbeat { client_id: client_id.clone() };
                        if events.send(event).await.is_err() {
                            break;
                        }
                    }
                    Ok(ClientMessage::Command(command)) => {
                        if events.send(BrokerEvent::CommandSubmitted(command)).await.is_err() {
                            break;
                        }
                    }
                    Ok(ClientMessage::Hello(_)) => {
                        debug!("client {client_id} sent a second hello, ignoring");
                    }
                    Err(WireError::ConnectionClosed) => break,
                    Err(e) => {
                        warn!("client {client_id} read failed: {e}");
                        break;
                    }
                }
            }
        }
    }

    let _ = events
        .send(BrokerEvent::ClientDisconnected {
            client_id,
            tx: outbound,
        })
        .await;
}
