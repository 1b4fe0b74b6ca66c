use serde::{Deserialize, Serialize};

/// Position of a solenoid valve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
pub enum ValveState {
    Open,
    Closed,
}

/// One calibrated channel reading within a telemetry frame.
///
/// `valid` is false when the most recent conversion or calibration for the
/// channel failed; in that case `value` is the last known good value (or 0.0
/// if the channel has never produced one).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub channel_id: String,
    pub value: f32,
    pub valid: bool,
}

/// One sampling tick's worth of readings from a single device.
///
/// `sequence` starts at 0 at device boot and strictly increases for the
/// lifetime of the process, including across link drops.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryFrame {
    pub device_id: String,
    pub sequence: u64,
    pub millis_since_boot: u64,
    pub readings: Vec<Reading>,
}

/// A request to drive a valve to a given state.
///
/// `command_id` is unique per issuing client and is the idempotency key: the
/// device applies a given `(client_id, command_id)` pair at most once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub device_id: String,
    pub valve_id: String,
    pub desired_state: ValveState,
    pub command_id: u64,
    pub client_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
pub enum CommandStatus {
    Applied,
    Rejected,
    Duplicate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandAck {
    pub command_id: u64,
    pub client_id: String,
    pub status: CommandStatus,
    pub reason: Option<String>,
}

/// Unsolicited valve state report, sent after every actuation and after
/// fail-safe reversion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValveReport {
    pub device_id: String,
    pub valve_id: String,
    pub state: ValveState,
    pub settled: bool,
}
