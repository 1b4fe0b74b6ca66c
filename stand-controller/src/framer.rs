//! Assembles one telemetry frame per sampling tick.

use crate::config::SensorChannel;
use crate::sensors::CalibratedScan;
use hotfire_protocol::types::{Reading, TelemetryFrame};
use std::sync::Arc;

/// Batches one reading per channel per tick into a sequenced frame.
///
/// Sequence numbers start at 0 at boot, strictly increase and are consumed
/// even when a frame ends up unsent: the link drops unsendable frames rather
/// than queueing them, and the gap in delivered sequence numbers is how a
/// consumer sees that.
pub(crate) struct Framer {
    device_id: String,
    channels: Arc<[SensorChannel]>,
    sequence: u64,
    /// Last good value per channel, reported stale when the current scan
    /// failed for that channel.
    last_valid: Vec<Option<f32>>,
}

impl Framer {
    pub(crate) fn new(device_id: &str, channels: Arc<[SensorChannel]>) -> Self {
        let last_valid = vec![None; channels.len()];
        Self {
            device_id: device_id.to_owned(),
            channels,
            sequence: 0,
            last_valid,
        }
    }

    pub(crate) fn tick(&mut self, scan: &CalibratedScan, millis_since_boot: u64) -> TelemetryFrame {
        let readings = scan
            .iter()
            .map(|&(index, value)| {
                let channel_id = self.channels[index].id.clone();
                match value {
                    Ok(value) => {
                        self.last_valid[index] = Some(value);
                        Reading {
                            channel_id,
                            value,
                            valid: true,
                        }
                    }
                    Err(_) => Reading {
                        channel_id,
                        value: self.last_valid[index].unwrap_or(0.0),
                        valid: false,
                    },
                }
            })
            .collect();

        let frame = TelemetryFrame {
            device_id: self.device_id.clone(),
            sequence: self.sequence,
            millis_since_boot,
            readings,
        };
        self.sequence += 1;
        frame
    }
}
