//! Analog-to-digital converter handling.
//!
//! Each physical ADC performs one conversion at a time; the [`Converter`]
//! trait models that by taking `&mut self` for every acquisition. The real
//! hardware is a 16-bit delta-sigma converter ([`ads112c04`]); a
//! deterministic [`sim::SimulatedAdc`] stands in when running without the
//! stand attached.

// Only instantiated when the stand hardware is attached.
#[allow(dead_code)]
pub(crate) mod ads112c04;
pub(crate) mod sim;

use thiserror::Error;

/// Internal reference voltage, volts.
pub(crate) const REFERENCE_VOLTS: f32 = 2.048;

/// Positive full-scale raw code (16-bit bipolar).
pub(crate) const FULL_SCALE_CODE: f32 = 32768.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum AdcInput {
    /// One pin measured against ground.
    SingleEnded(u8),
    /// A (positive, negative) pin pair.
    Differential(u8, u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Gain {
    X1,
    X8,
}

impl Gain {
    pub(crate) fn factor(self) -> f32 {
        match self {
            Gain::X1 => 1.0,
            Gain::X8 => 8.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub(crate) enum AdcError {
    #[error("I2C bus fault")]
    Bus,

    #[error("conversion did not complete in time")]
    ConversionTimeout,

    #[error("input pins not routable on this device")]
    InvalidInput,
}

pub(crate) trait Converter: Send {
    /// Runs one conversion on `input` and returns the raw signed code.
    fn acquire(&mut self, input: AdcInput, gain: Gain) -> Result<i16, AdcError>;
}

/// Converts a raw code to volts at the converter input, undoing the PGA gain.
pub(crate) fn code_to_volts(code: i16, gain: Gain) -> f32 {
    (f32::from(code) / FULL_SCALE_CODE) * REFERENCE_VOLTS / gain.factor()
}

/// Converts an input voltage to the raw code the converter would report.
pub(crate) fn volts_to_code(volts: f32, gain: Gain) -> i16 {
    let code = ((volts * gain.factor() / REFERENCE_VOLTS) * FULL_SCALE_CODE).round();
    code.clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16
}
