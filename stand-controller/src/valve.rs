//! Valve ownership and fail-safe actuation.
//!
//! The controller is the single owner of valve output state. It drives every
//! valve to its configured default before the link is allowed to accept
//! commands, applies validated commands idempotently, and reverts everything
//! to defaults when the link is lost.

use crate::config::ValveConfig;
use hotfire_protocol::types::{Command, CommandAck, CommandStatus, ValveReport, ValveState};
use std::collections::{HashMap, VecDeque};
use tokio::time::{Duration, Instant};
use tracing::{info, warn};

/// Time allowed for a solenoid to physically reach a commanded position.
pub(crate) const SETTLE_INTERVAL: Duration = Duration::from_millis(150);

/// Number of `(client, command id)` pairs remembered for deduplication.
const DEDUP_HISTORY: usize = 64;

/// Where a valve is in its actuation cycle.
#[cfg(test)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ValvePhase {
    /// At the configured default, no command since boot or last reversion.
    Default,
    /// Commanded and waiting out the settle interval.
    Settling(ValveState),
    /// Commanded and settled.
    Confirmed(ValveState),
}

struct Valve {
    config: ValveConfig,
    state: ValveState,
    /// Whether the output pin is energised. The pin is inactive in the
    /// default state, so a wiring or power loss also yields the default.
    pin_active: bool,
    settle_until: Option<Instant>,
    commanded: bool,
}

impl Valve {
    fn new(config: ValveConfig) -> Self {
        let state = config.default_state;
        Self {
            config,
            state,
            pin_active: false,
            settle_until: None,
            commanded: false,
        }
    }

    fn drive(&mut self, state: ValveState) {
        self.pin_active = state != self.config.default_state;
        self.state = state;
        self.settle_until = Some(Instant::now() + SETTLE_INTERVAL);
        self.commanded = true;
    }

    fn revert(&mut self) {
        self.pin_active = false;
        self.state = self.config.default_state;
        self.settle_until = Some(Instant::now() + SETTLE_INTERVAL);
        self.commanded = false;
    }

    fn settled(&self) -> bool {
        match self.settle_until {
            Some(deadline) => Instant::now() >= deadline,
            None => true,
        }
    }

    #[cfg(test)]
    fn phase(&self) -> ValvePhase {
        if !self.commanded {
            ValvePhase::Default
        } else if self.settled() {
            ValvePhase::Confirmed(self.state)
        } else {
            ValvePhase::Settling(self.state)
        }
    }
}

pub(crate) struct ValveController {
    device_id: String,
    valves: Vec<Valve>,
    applied: HashMap<(String, u64), CommandAck>,
    applied_order: VecDeque<(String, u64)>,
}

impl ValveController {
    pub(crate) fn new(device_id: &str, configs: &[ValveConfig]) -> Self {
        Self {
            device_id: device_id.to_owned(),
            valves: configs.iter().cloned().map(Valve::new).collect(),
            applied: HashMap::new(),
            applied_order: VecDeque::new(),
        }
    }

    /// Drives every valve to its configured default state. Must complete
    /// before the link transport starts accepting commands.
    pub(crate) fn on_boot(&mut self) {
        for valve in &mut self.valves {
            valve.revert();
            info!(
                "valve {} ({:?} on pin {}) set to default state {}",
                valve.config.id, valve.config.kind, valve.config.pin, valve.config.default_state
            );
        }
    }

    /// Reverts every valve to its default state. Invoked on detected link
    /// loss: an actuator must never stay in a commanded state without
    /// command authority over a pressurised stand.
    pub(crate) fn on_link_lost(&mut self) {
        for valve in &mut self.valves {
            if valve.state != valve.config.default_state || valve.commanded {
                warn!(
                    "valve {} reverting to default state {}",
                    valve.config.id, valve.config.default_state
                );
            }
            valve.revert();
        }
    }

    /// Validates and applies a command, returning the acknowledgement to
    /// send back. Replays of an already applied `(client, command id)` pair
    /// are acknowledged as duplicates without re-actuation. A command for a
    /// valve that has not yet settled supersedes the previous one.
    pub(crate) fn apply(&mut self, command: &Command) -> CommandAck {
        let key = (command.client_id.clone(), command.command_id);

        if let Some(previous) = self.applied.get(&key) {
            let mut ack = previous.clone();
            ack.status = CommandStatus::Duplicate;
            return ack;
        }

        if command.device_id != self.device_id {
            return reject(command, format!("unknown device id {:?}", command.device_id));
        }

        let Some(valve) = self
            .valves
            .iter_mut()
            .find(|valve| valve.config.id == command.valve_id)
        else {
            return reject(command, format!("unknown valve id {:?}", command.valve_id));
        };

        if !valve.settled() {
            info!(
                "valve {}: superseding unsettled command with {}",
                valve.config.id, command.desired_state
            );
        }
        valve.drive(command.desired_state);
        info!(
            "valve {} commanded {} by {}",
            valve.config.id, command.desired_state, command.client_id
        );

        let ack = CommandAck {
            command_id: command.command_id,
            client_id: command.client_id.clone(),
            status: CommandStatus::Applied,
            reason: None,
        };

        self.applied.insert(key.clone(), ack.clone());
        self.applied_order.push_back(key);
        if self.applied_order.len() > DEDUP_HISTORY {
            if let Some(oldest) = self.applied_order.pop_front() {
                self.applied.remove(&oldest);
            }
        }

        ack
    }

    /// Current state of every valve, for reporting upstream.
    pub(crate) fn reports(&self) -> Vec<ValveReport> {
        self.valves
            .iter()
            .map(|valve| ValveReport {
                device_id: self.device_id.clone(),
                valve_id: valve.config.id.clone(),
                state: valve.state,
                settled: valve.settled(),
            })
            .collect()
    }

    pub(crate) fn report_for(&self, valve_id: &str) -> Option<ValveReport> {
        self.reports()
            .into_iter()
            .find(|report| report.valve_id == valve_id)
    }

    #[cfg(test)]
    fn phase_of(&self, valve_id: &str) -> ValvePhase {
        self.valves
            .iter()
            .find(|valve| valve.config.id == valve_id)
            .unwrap()
            .phase()
    }

    #[cfg(test)]
    fn state_of(&self, valve_id: &str) -> ValveState {
        self.valves
            .iter()
            .find(|valve| valve.config.id == valve_id)
            .unwrap()
            .state
    }
}

fn reject(command: &Command, reason: String) -> CommandAck {
    warn!(
        "rejecting command {} from {}: {reason}",
        command.command_id, command.client_id
    );
    CommandAck {
        command_id: command.command_id,
        client_id: command.client_id.clone(),
        status: CommandStatus::Rejected,
        reason: Some(reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ValveKind;

    fn controller() -> ValveController {
        let configs = vec![
            ValveConfig {
                id: "AVDump".to_owned(),
                pin: 4,
                default_state: ValveState::Open,
                kind: ValveKind::Solenoid,
            },
            ValveConfig {
                id: "AVFeed".to_owned(),
                pin: 5,
                default_state: ValveState::Closed,
                kind: ValveKind::Solenoid,
            },
        ];
        let mut controller = ValveController::new("StandA", &configs);
        controller.on_boot();
        controller
    }

    fn close_dump(command_id: u64) -> Command {
        Command {
            device_id: "StandA".to_owned(),
            valve_id: "AVDump".to_owned(),
            desired_state: ValveState::Closed,
            command_id,
            client_id: "console".to_owned(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn boot_puts_valves_in_default_states() {
        let controller = controller();
        assert_eq!(controller.state_of("AVDump"), ValveState::Open);
        assert_eq!(controller.state_of("AVFeed"), ValveState::Closed);
        assert_eq!(controller.phase_of("AVDump"), ValvePhase::Default);
    }

    #[tokio::test(start_paused = true)]
    async fn command_settles_then_confirms() {
        let mut controller = controller();
        let ack = controller.apply(&close_dump(1));
        assert_eq!(ack.status, CommandStatus::Applied);
        assert_eq!(
            controller.phase_of("AVDump"),
            ValvePhase::Settling(ValveState::Closed)
        );

        tokio::time::advance(SETTLE_INTERVAL).await;
        assert_eq!(
            controller.phase_of("AVDump"),
            ValvePhase::Confirmed(ValveState::Closed)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_command_id_is_a_no_op() {
        let mut controller = controller();
        assert_eq!(controller.apply(&close_dump(7)).status, CommandStatus::Applied);
        tokio::time::advance(SETTLE_INTERVAL).await;
        let settled_at = controller.report_for("AVDump").unwrap();
        assert!(settled_at.settled);

        let replay = controller.apply(&close_dump(7));
        assert_eq!(replay.status, CommandStatus::Duplicate);
        // No re-actuation: the valve did not go back into settling.
        assert!(controller.report_for("AVDump").unwrap().settled);
        assert_eq!(controller.state_of("AVDump"), ValveState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_valve_and_device_are_rejected() {
        let mut controller = controller();

        let mut command = close_dump(1);
        command.valve_id = "AVNope".to_owned();
        let ack = controller.apply(&command);
        assert_eq!(ack.status, CommandStatus::Rejected);
        assert!(ack.reason.unwrap().contains("AVNope"));

        let mut command = close_dump(2);
        command.device_id = "StandB".to_owned();
        assert_eq!(controller.apply(&command).status, CommandStatus::Rejected);

        // A rejected command id is not remembered as applied.
        let ack = controller.apply(&close_dump(2));
        assert_eq!(ack.status, CommandStatus::Applied);
    }

    #[tokio::test(start_paused = true)]
    async fn newer_command_supersedes_unsettled_one() {
        let mut controller = controller();
        controller.apply(&close_dump(1));

        let mut reopen = close_dump(2);
        reopen.desired_state = ValveState::Open;
        assert_eq!(controller.apply(&reopen).status, CommandStatus::Applied);
        assert_eq!(controller.state_of("AVDump"), ValveState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn link_loss_reverts_every_valve() {
        let mut controller = controller();
        controller.apply(&close_dump(1));

        let mut feed_open = close_dump(2);
        feed_open.valve_id = "AVFeed".to_owned();
        feed_open.desired_state = ValveState::Open;
        controller.apply(&feed_open);

        controller.on_link_lost();
        assert_eq!(controller.state_of("AVDump"), ValveState::Open);
        assert_eq!(controller.state_of("AVFeed"), ValveState::Closed);
        assert_eq!(controller.phase_of("AVDump"), ValvePhase::Default);
    }
}
