//! Deterministic stand-in for a physical ADC, used when running without the
//! stand attached and in tests.

use super::{volts_to_code, AdcError, AdcInput, Converter, Gain};
use std::collections::HashMap;

/// Produces a slow sine around a per-input base level. Levels can be pinned
/// exactly with [`SimulatedAdc::with_level`], in which case no ripple is
/// applied.
pub(crate) struct SimulatedAdc {
    pinned: HashMap<AdcInput, f32>,
    ticks: u64,
}

impl SimulatedAdc {
    pub(crate) fn new() -> Self {
        Self {
            pinned: HashMap::new(),
            ticks: 0,
        }
    }

    /// Pins `input` to an exact voltage.
    pub(crate) fn with_level(mut self, input: AdcInput, volts: f32) -> Self {
        self.pinned.insert(input, volts);
        self
    }

    fn volts(&self, input: AdcInput) -> f32 {
        if let Some(volts) = self.pinned.get(&input) {
            return *volts;
        }

        let pin = match input {
            AdcInput::SingleEnded(pin) => pin,
            AdcInput::Differential(high, _) => high,
        };
        let base = 0.2 + 0.1 * f32::from(pin);
        let phase = (self.ticks as f32) / 50.0 + f32::from(pin);
        base + 0.05 * phase.sin()
    }
}

impl Converter for SimulatedAdc {
    fn acquire(&mut self, input: AdcInput, gain: Gain) -> Result<i16, AdcError> {
        self.ticks += 1;
        Ok(volts_to_code(self.volts(input), gain))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adc::code_to_volts;

    #[test]
    fn pinned_level_round_trips() {
        let mut adc = SimulatedAdc::new().with_level(AdcInput::SingleEnded(0), 1.024);
        let code = adc.acquire(AdcInput::SingleEnded(0), Gain::X1).unwrap();
        let volts = code_to_volts(code, Gain::X1);
        assert!((volts - 1.024).abs() < 1e-3);
    }

    #[test]
    fn gain_is_undone_by_code_to_volts() {
        let mut adc = SimulatedAdc::new().with_level(AdcInput::Differential(0, 1), 0.01);
        let code = adc.acquire(AdcInput::Differential(0, 1), Gain::X8).unwrap();
        let volts = code_to_volts(code, Gain::X8);
        assert!((volts - 0.01).abs() < 1e-4);
    }
}
