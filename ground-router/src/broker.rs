//! Central coordinator.
//!
//! One task owns the session table, the edge link and the pending-command
//! table; every connection task communicates with it exclusively through
//! [`BrokerEvent`]s, so session add/remove never races with broadcast
//! iteration and no client can block ingestion from the edge device.

use crate::session::{Outbound, OUTBOUND_QUEUE_DEPTH};
use hotfire_protocol::{
    message::{ClientHello, RouterMessage, RouterToEdge},
    types::{Command, CommandAck, CommandStatus, TelemetryFrame, ValveReport},
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// A client session is torn down if nothing is heard from it for this long.
pub(crate) const HEARTBEAT_EXPIRY: Duration = Duration::from_secs(5);

/// Time to wait for the edge to acknowledge a relayed command before
/// retrying it.
const ACK_TIMEOUT: Duration = Duration::from_millis(500);

/// Retries after the initial send before a command is reported failed.
const COMMAND_RETRY_LIMIT: u32 = 3;

const HOUSEKEEPING_PERIOD: Duration = Duration::from_millis(250);

const EVENT_CHANNEL_DEPTH: usize = 256;

pub(crate) enum BrokerEvent {
    EdgeConnected {
        device_id: String,
        tx: Arc<Outbound<RouterToEdge>>,
    },
    EdgeDisconnected {
        tx: Arc<Outbound<RouterToEdge>>,
    },
    FrameReceived(TelemetryFrame),
    ValveReported(ValveReport),
    AckReceived(CommandAck),
    ClientConnected {
        hello: ClientHello,
        tx: Arc<Outbound<RouterMessage>>,
    },
    ClientDisconnected {
        client_id: String,
        tx: Arc<Outbound<RouterMessage>>,
    },
    Heartbeat {
        client_id: String,
    },
    CommandSubmitted(Command),
}

struct ClientSession {
    /// Channel ids this session wants, or `None` for all.
    subscription: Option<HashSet<String>>,
    outbound: Arc<Outbound<RouterMessage>>,
    deadline: Instant,
    /// Sequence number of the last frame queued for this session.
    last_sequence: Option<u64>,
}

impl ClientSession {
    fn log_teardown(&self, client_id: &str) {
        let stats = self.outbound.statistics();
        debug!(
            "client {client_id} session: {} messages queued, {} discarded, last frame {:?}",
            stats.total, stats.discarded, self.last_sequence
        );
    }
}

struct EdgeLink {
    device_id: String,
    outbound: Arc<Outbound<RouterToEdge>>,
}

struct PendingCommand {
    command: Command,
    attempts: u32,
    deadline: Instant,
}

pub(crate) struct Broker {
    events: mpsc::Receiver<BrokerEvent>,
    sessions: HashMap<String, ClientSession>,
    edge: Option<EdgeLink>,
    pending: HashMap<(String, u64), PendingCommand>,
}

impl Broker {
    pub(crate) fn new() -> (mpsc::Sender<BrokerEvent>, Self) {
        let (tx, events) = mpsc::channel(EVENT_CHANNEL_DEPTH);
        (
            tx,
            Self {
                events,
                sessions: HashMap::new(),
                edge: None,
                pending: HashMap::new(),
            },
        )
    }

    pub(crate) async fn run(mut self) {
        let mut housekeeping = tokio::time::interval(HOUSEKEEPING_PERIOD);

        loop {
            tokio::select! {
                event = self.events.recv() => {
                    match event {
                        Some(event) => self.handle(event),
                        None => break,
                    }
                }
                _ = housekeeping.tick() => self.housekeep(),
            }
        }
    }

    fn handle(&mut self, event: BrokerEvent) {
        match event {
            BrokerEvent::EdgeConnected { device_id, tx } => {
                if let Some(previous) = self.edge.take() {
                    warn!(
                        "edge {} superseded by new connection for {}",
                        previous.device_id, device_id
                    );
                    previous.outbound.close();
                }
                info!("edge device {device_id} connected");
                self.edge = Some(EdgeLink {
                    device_id,
                    outbound: tx,
                });
            }

            BrokerEvent::EdgeDisconnected { tx } => {
                // Only the currently active connection clears the link; a
                // superseded connection's teardown must not.
                if let Some(edge) = &self.edge {
                    if Arc::ptr_eq(&edge.outbound, &tx) {
                        info!("edge device {} disconnected", edge.device_id);
                        self.edge = None;
                    }
                }
            }

            BrokerEvent::FrameReceived(frame) => self.broadcast_frame(frame),

            BrokerEvent::ValveReported(report) => {
                for session in self.sessions.values() {
                    session.outbound.push(RouterMessage::Valve(report.clone()));
                }
            }

            BrokerEvent::AckReceived(ack) => {
                let key = (ack.client_id.clone(), ack.command_id);
                if self.pending.remove(&key).is_none() {
                    debug!("ack for unknown command {} from {}", ack.command_id, ack.client_id);
                }
                if let Some(session) = self.sessions.get(&ack.client_id) {
                    session.outbound.push(RouterMessage::Ack(ack));
                }
            }

            BrokerEvent::ClientConnected { hello, tx } => {
                if let Some(previous) = self.sessions.remove(&hello.client_id) {
                    warn!("client {} superseded by new connection", hello.client_id);
                    previous.outbound.close();
                }
                info!("client {} connected", hello.client_id);
                self.sessions.insert(
                    hello.client_id,
                    ClientSession {
                        subscription: hello.subscribe.map(|ids| ids.into_iter().collect()),
                        outbound: tx,
                        deadline: Instant::now() + HEARTBEAT_EXPIRY,
                        last_sequence: None,
                    },
                );
            }

            BrokerEvent::ClientDisconnected { client_id, tx } => {
                if let Some(session) = self.sessions.get(&client_id) {
                    if Arc::ptr_eq(&session.outbound, &tx) {
                        info!("client {client_id} disconnected");
                        session.log_teardown(&client_id);
                        self.sessions.remove(&client_id);
                    }
                }
            }

            BrokerEvent::Heartbeat { client_id } => {
                if let Some(session) = self.sessions.get_mut(&client_id) {
                    session.deadline = Instant::now() + HEARTBEAT_EXPIRY;
                }
            }

            BrokerEvent::CommandSubmitted(command) => self.submit_command(command),
        }
    }

    fn broadcast_frame(&mut self, frame: TelemetryFrame) {
        for session in self.sessions.values_mut() {
            match &session.subscription {
                None => {
                    session.outbound.push(RouterMessage::Frame(frame.clone()));
                    session.last_sequence = Some(frame.sequence);
                }
                Some(wanted) => {
                    let mut filtered = frame.clone();
                    filtered
                        .readings
                        .retain(|reading| wanted.contains(&reading.channel_id));
                    if !filtered.readings.is_empty() {
                        session.outbound.push(RouterMessage::Frame(filtered));
                        session.last_sequence = Some(frame.sequence);
                    }
                }
            }
        }
    }

    /// Commands are relayed at-least-once; the edge deduplicates by command
    /// id, which makes retries safe.
    fn submit_command(&mut self, command: Command) {
        // Any traffic proves the client alive.
        let client_id = command.client_id.clone();
        self.handle(BrokerEvent::Heartbeat {
            client_id: client_id.clone(),
        });

        let key = (client_id, command.command_id);
        if self.pending.contains_key(&key) {
            debug!("command {} already in flight", command.command_id);
            return;
        }

        if let Some(edge) = &self.edge {
            edge.outbound.push(RouterToEdge::Command(command.clone()));
        } else {
            debug!("no edge connection, command {} held for retry", command.command_id);
        }

        self.pending.insert(
            key,
            PendingCommand {
                command,
                attempts: 1,
                deadline: Instant::now() + ACK_TIMEOUT,
            },
        );
    }

    fn housekeep(&mut self) {
        let now = Instant::now();

        // Heartbeat expiry.
        let expired: Vec<String> = self
            .sessions
            .iter()
            .filter(|(_, session)| session.deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();
        for client_id in expired {
            warn!("client {client_id} missed heartbeats, forcing disconnect");
            if let Some(session) = self.sessions.remove(&client_id) {
                session.log_teardown(&client_id);
                session.outbound.close();
            }
        }

        // Command retries.
        let mut failed = Vec::new();
        for (key, pending) in &mut self.pending {
            if pending.deadline > now {
                continue;
            }

            if pending.attempts > COMMAND_RETRY_LIMIT {
                failed.push(key.clone());
                continue;
            }

            pending.attempts += 1;
            pending.deadline = now + ACK_TIMEOUT;
            if let Some(edge) = &self.edge {
                debug!(
                    "retrying command {} (attempt {})",
                    pending.command.command_id, pending.attempts
                );
                edge.outbound
                    .push(RouterToEdge::Command(pending.command.clone()));
            }
        }

        for key in failed {
            if let Some(pending) = self.pending.remove(&key) {
                warn!(
                    "command {} from {} unacknowledged after {} attempts",
                    pending.command.command_id, pending.command.client_id, pending.attempts
                );
                if let Some(session) = self.sessions.get(&pending.command.client_id) {
                    session.outbound.push(RouterMessage::Ack(CommandAck {
                        command_id: pending.command.command_id,
                        client_id: pending.command.client_id.clone(),
                        status: CommandStatus::Rejected,
                        reason: Some("no acknowledgement from device".to_owned()),
                    }));
                }
            }
        }
    }

    pub(crate) fn client_outbound() -> Arc<Outbound<RouterMessage>> {
        Arc::new(Outbound::new(OUTBOUND_QUEUE_DEPTH))
    }

    pub(crate) fn edge_outbound() -> Arc<Outbound<RouterToEdge>> {
        Arc::new(Outbound::new(OUTBOUND_QUEUE_DEPTH))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hotfire_protocol::types::{Reading, ValveState};

    fn broker() -> Broker {
        Broker::new().1
    }

    fn connect_client(broker: &mut Broker, client_id: &str) -> Arc<Outbound<RouterMessage>> {
        let tx = Broker::client_outbound();
        broker.handle(BrokerEvent::ClientConnected {
            hello: ClientHello {
                client_id: client_id.to_owned(),
                subscribe: None,
            },
            tx: tx.clone(),
        });
        tx
    }

    fn connect_edge(broker: &mut Broker) -> Arc<Outbound<RouterToEdge>> {
        let tx = Broker::edge_outbound();
        broker.handle(BrokerEvent::EdgeConnected {
            device_id: "StandA".to_owned(),
            tx: tx.clone(),
        });
        tx
    }

    fn frame(sequence: u64) -> TelemetryFrame {
        TelemetryFrame {
            device_id: "StandA".to_owned(),
            sequence,
            millis_since_boot: sequence * 100,
            readings: vec![
                Reading {
                    channel_id: "PTFill".to_owned(),
                    value: 500.0,
                    valid: true,
                },
                Reading {
                    channel_id: "TCEngine".to_owned(),
                    value: 20.0,
                    valid: true,
                },
            ],
        }
    }

    fn command(command_id: u64) -> Command {
        Command {
            device_id: "StandA".to_owned(),
            valve_id: "AVDump".to_owned(),
            desired_state: ValveState::Closed,
            command_id,
            client_id: "console".to_owned(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_session_is_bounded_and_does_not_block_others() {
        let mut broker = broker();
        let healthy = connect_client(&mut broker, "healthy");
        let stalled = connect_client(&mut broker, "stalled");

        let received = {
            let healthy = healthy.clone();
            tokio::spawn(async move {
                let mut sequences = Vec::new();
                while let Some(RouterMessage::Frame(frame)) = healthy.next().await {
                    sequences.push(frame.sequence);
                }
                sequences
            })
        };

        let total = (OUTBOUND_QUEUE_DEPTH + 10) as u64;
        for sequence in 0..total {
            broker.handle(BrokerEvent::FrameReceived(frame(sequence)));
            // Give the healthy consumer a chance to drain.
            tokio::task::yield_now().await;
        }

        // The stalled session's queue never exceeds its bound and evicted
        // the oldest frames.
        assert_eq!(stalled.len(), OUTBOUND_QUEUE_DEPTH);
        assert_eq!(stalled.statistics().discarded, 10);
        let Some(RouterMessage::Frame(oldest)) = stalled.next().await else {
            panic!("expected a frame");
        };
        assert_eq!(oldest.sequence, 10);

        // The healthy session saw everything.
        healthy.close();
        assert_eq!(received.await.unwrap().len(), total as usize);
    }

    #[tokio::test(start_paused = true)]
    async fn subscription_filters_frame_readings() {
        let mut broker = broker();
        let tx = Broker::client_outbound();
        broker.handle(BrokerEvent::ClientConnected {
            hello: ClientHello {
                client_id: "pressures".to_owned(),
                subscribe: Some(vec!["PTFill".to_owned()]),
            },
            tx: tx.clone(),
        });

        broker.handle(BrokerEvent::FrameReceived(frame(0)));

        let Some(RouterMessage::Frame(received)) = tx.next().await else {
            panic!("expected a frame");
        };
        assert_eq!(received.readings.len(), 1);
        assert_eq!(received.readings[0].channel_id, "PTFill");
    }

    #[tokio::test(start_paused = true)]
    async fn session_records_last_delivered_frame_sequence() {
        let mut broker = broker();
        connect_client(&mut broker, "console");

        // Subscribed to a channel no frame carries, so nothing is delivered.
        let tx = Broker::client_outbound();
        broker.handle(BrokerEvent::ClientConnected {
            hello: ClientHello {
                client_id: "thrust".to_owned(),
                subscribe: Some(vec!["LCThrust".to_owned()]),
            },
            tx,
        });

        broker.handle(BrokerEvent::FrameReceived(frame(0)));
        broker.handle(BrokerEvent::FrameReceived(frame(1)));

        assert_eq!(broker.sessions["console"].last_sequence, Some(1));
        assert_eq!(broker.sessions["thrust"].last_sequence, None);
    }

    #[tokio::test(start_paused = true)]
    async fn command_is_relayed_and_ack_routed_back() {
        let mut broker = broker();
        let console = connect_client(&mut broker, "console");
        let edge = connect_edge(&mut broker);

        broker.handle(BrokerEvent::CommandSubmitted(command(7)));

        let Some(RouterToEdge::Command(relayed)) = edge.next().await else {
            panic!("expected relayed command");
        };
        assert_eq!(relayed.command_id, 7);

        broker.handle(BrokerEvent::AckReceived(CommandAck {
            command_id: 7,
            client_id: "console".to_owned(),
            status: CommandStatus::Applied,
            reason: None,
        }));

        let Some(RouterMessage::Ack(ack)) = console.next().await else {
            panic!("expected ack");
        };
        assert_eq!(ack.status, CommandStatus::Applied);

        // Acknowledged commands are not retried.
        tokio::time::advance(ACK_TIMEOUT * 2).await;
        broker.housekeep();
        assert_eq!(edge.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unacknowledged_command_is_retried_then_reported_failed() {
        let mut broker = broker();
        let console = connect_client(&mut broker, "console");
        let edge = connect_edge(&mut broker);

        broker.handle(BrokerEvent::CommandSubmitted(command(9)));
        assert!(matches!(
            edge.next().await,
            Some(RouterToEdge::Command(_))
        ));

        // Each housekeeping pass after the ack timeout resends once, up to
        // the retry limit.
        for _ in 0..COMMAND_RETRY_LIMIT {
            tokio::time::advance(ACK_TIMEOUT * 2).await;
            broker.handle(BrokerEvent::Heartbeat {
                client_id: "console".to_owned(),
            });
            broker.housekeep();
            assert!(matches!(
                edge.next().await,
                Some(RouterToEdge::Command(_))
            ));
        }

        tokio::time::advance(ACK_TIMEOUT * 2).await;
        broker.handle(BrokerEvent::Heartbeat {
            client_id: "console".to_owned(),
        });
        broker.housekeep();

        assert_eq!(edge.len(), 0);
        let Some(RouterMessage::Ack(ack)) = console.next().await else {
            panic!("expected synthetic ack");
        };
        assert_eq!(ack.status, CommandStatus::Rejected);
        assert!(ack.reason.unwrap().contains("no acknowledgement"));
    }

    #[tokio::test(start_paused = true)]
    async fn missed_heartbeats_force_disconnect() {
        let mut broker = broker();
        let quiet = connect_client(&mut broker, "quiet");
        let chatty = connect_client(&mut broker, "chatty");

        tokio::time::advance(HEARTBEAT_EXPIRY / 2).await;
        broker.handle(BrokerEvent::Heartbeat {
            client_id: "chatty".to_owned(),
        });

        tokio::time::advance(HEARTBEAT_EXPIRY / 2).await;
        broker.housekeep();

        // The quiet session was closed, the chatty one survives.
        assert_eq!(quiet.next().await, None);
        broker.handle(BrokerEvent::FrameReceived(frame(0)));
        assert!(matches!(
            chatty.next().await,
            Some(RouterMessage::Frame(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn superseded_connection_teardown_keeps_new_session() {
        let mut broker = broker();
        let first = connect_client(&mut broker, "console");
        let second = connect_client(&mut broker, "console");

        // The first connection was closed when the second arrived.
        assert_eq!(first.next().await, None);

        // Its teardown event must not remove the new session.
        broker.handle(BrokerEvent::ClientDisconnected {
            client_id: "console".to_owned(),
            tx: first,
        });
        broker.handle(BrokerEvent::FrameReceived(frame(0)));
        assert!(matches!(
            second.next().await,
            Some(RouterMessage::Frame(_))
        ));
    }
}
