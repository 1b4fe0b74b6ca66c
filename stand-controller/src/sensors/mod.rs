//! Sensor scanning and calibration.

pub(crate) mod calibrate;
pub(crate) mod thermocouple;

use crate::adc::{AdcError, Converter, Gain};
use crate::config::{SensorChannel, SensorKind};
use calibrate::CalibrationFault;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

impl SensorKind {
    /// PGA gain used when sampling a channel of this kind. Load cell bridge
    /// outputs are millivolt-level and need the gain; everything else is
    /// read at unity.
    pub(crate) fn gain(&self) -> Gain {
        match self {
            SensorKind::LoadCell { .. } => Gain::X8,
            _ => Gain::X1,
        }
    }
}

/// A fault scoped to a single channel within a scan.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub(crate) enum SensorFault {
    #[error(transparent)]
    Adc(#[from] AdcError),

    #[error(transparent)]
    Calibration(#[from] CalibrationFault),
}

/// Raw conversion results in scan order, as channel indices into the
/// configured channel list.
pub(crate) type RawScan = Vec<(usize, Result<i16, AdcError>)>;

/// Calibrated values in scan order.
pub(crate) type CalibratedScan = Vec<(usize, Result<f32, SensorFault>)>;

#[derive(Debug, Default, Clone, PartialEq)]
pub(crate) struct ScanStatistics {
    pub(crate) scans: u64,
    pub(crate) deadline_misses: u64,
    pub(crate) channel_faults: u64,
}

/// Owns the ADC device handles and executes the fixed-period scan.
///
/// Channels are grouped by ADC index so each device is visited once per
/// scan pass; within a device channels are sampled sequentially, since each
/// converter runs one conversion at a time.
pub(crate) struct SensorManager {
    channels: Arc<[SensorChannel]>,
    adcs: Vec<Box<dyn Converter>>,
    order: Vec<usize>,
    stats: ScanStatistics,
}

impl SensorManager {
    pub(crate) fn new(channels: Arc<[SensorChannel]>, adcs: Vec<Box<dyn Converter>>) -> Self {
        let mut order: Vec<usize> = (0..channels.len()).collect();
        order.sort_by_key(|&index| channels[index].adc_index);

        Self {
            channels,
            adcs,
            order,
            stats: ScanStatistics::default(),
        }
    }

    /// Runs one scan across every configured channel. A conversion failure
    /// is reported for that channel alone and never fails the whole scan.
    pub(crate) fn scan(&mut self) -> RawScan {
        self.stats.scans += 1;

        self.order
            .iter()
            .map(|&index| {
                let channel = &self.channels[index];
                let result =
                    self.adcs[channel.adc_index].acquire(channel.input, channel.kind.gain());

                if let Err(fault) = &result {
                    self.stats.channel_faults += 1;
                    warn!("channel {}: conversion failed: {fault}", channel.id);
                }

                (index, result)
            })
            .collect()
    }

    pub(crate) fn note_deadline_miss(&mut self) {
        self.stats.deadline_misses += 1;
    }

    pub(crate) fn statistics(&self) -> ScanStatistics {
        self.stats.clone()
    }
}

/// Applies per-kind calibration to a raw scan.
pub(crate) fn calibrate_scan(channels: &[SensorChannel], scan: &RawScan) -> CalibratedScan {
    scan.iter()
        .map(|&(index, raw)| {
            let channel = &channels[index];
            let value = match raw {
                Ok(code) => match calibrate::calibrate(code, &channel.kind) {
                    Ok(value) => Ok(value),
                    Err(fault) => {
                        warn!("channel {}: calibration fault: {fault}", channel.id);
                        Err(SensorFault::Calibration(fault))
                    }
                },
                Err(fault) => Err(SensorFault::Adc(fault)),
            };
            (index, value)
        })
        .collect()
}
