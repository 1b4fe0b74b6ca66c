use crate::types::{Command, CommandAck, TelemetryFrame, ValveReport};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeHello {
    pub device_id: String,
    pub version: String,
}

/// Messages sent by the stand controller to the ground router.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EdgeMessage {
    Hello(EdgeHello),
    Frame(TelemetryFrame),
    Ack(CommandAck),
    Valve(ValveReport),
}

/// Messages sent by the ground router to the stand controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RouterToEdge {
    Command(Command),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientHello {
    pub client_id: String,
    /// Channel ids to receive, or `None` for all channels.
    pub subscribe: Option<Vec<String>>,
}

/// Messages sent by a client to the ground router.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientMessage {
    Hello(ClientHello),
    Heartbeat,
    Command(Command),
}

/// Messages sent by the ground router to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RouterMessage {
    Frame(TelemetryFrame),
    Ack(CommandAck),
    Valve(ValveReport),
}
