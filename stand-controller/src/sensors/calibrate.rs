//! Conversion of raw ADC codes into physical-unit values.
//!
//! Calibration is a pure function of the raw code and the channel's
//! kind-specific parameters. A result outside the kind's physical envelope
//! is a fault, never a clamped value.

use super::thermocouple;
use crate::adc::{code_to_volts, Gain, REFERENCE_VOLTS};
use crate::config::SensorKind;
use thiserror::Error;

/// Tolerated excursion below zero for quantities that are physically
/// non-negative, as a fraction of full scale. Covers offset error and noise
/// around a true zero.
const ZERO_MARGIN: f32 = 0.02;

/// Tolerated excursion above the rated maximum, as a fraction of the rating.
const OVERRANGE_MARGIN: f32 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub(crate) enum CalibrationFault {
    #[error("raw value outside the calibrated range")]
    OutOfRange,

    #[error("calibrated value outside the physical envelope")]
    Envelope,
}

pub(crate) fn calibrate(code: i16, kind: &SensorKind) -> Result<f32, CalibrationFault> {
    match kind {
        SensorKind::Thermocouple { tc_type } => {
            let millivolts = f64::from(code_to_volts(code, Gain::X1)) * 1000.0;
            let celsius = thermocouple::linearize(*tc_type, millivolts)?;
            if celsius < -273.15 {
                return Err(CalibrationFault::Envelope);
            }
            Ok(celsius)
        }

        SensorKind::PressureTransducer { max_pressure_psi } => {
            let volts = code_to_volts(code, Gain::X1);
            let psi = volts / REFERENCE_VOLTS * max_pressure_psi;
            if psi < -ZERO_MARGIN * max_pressure_psi
                || psi > (1.0 + OVERRANGE_MARGIN) * max_pressure_psi
            {
                return Err(CalibrationFault::Envelope);
            }
            Ok(psi)
        }

        SensorKind::LoadCell {
            rating_newtons,
            excitation_volts,
            sensitivity_mv_per_v,
        } => {
            let volts = code_to_volts(code, Gain::X8);
            let full_scale_volts = excitation_volts * sensitivity_mv_per_v / 1000.0;
            let newtons = volts / full_scale_volts * rating_newtons;
            if newtons.abs() > (1.0 + OVERRANGE_MARGIN) * rating_newtons {
                return Err(CalibrationFault::Envelope);
            }
            Ok(newtons)
        }
    }
}
