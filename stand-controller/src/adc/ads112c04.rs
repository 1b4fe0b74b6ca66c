//! Driver for the TI ADS112C04 16-bit delta-sigma ADC on an I2C bus.
//!
//! The bus itself is behind the [`I2cBus`] trait so the register protocol can
//! be exercised against a scripted device model in tests.

use super::{AdcError, AdcInput, Converter, Gain};
use std::time::Duration;

const CMD_RESET: u8 = 0x06;
const CMD_START: u8 = 0x08;
const CMD_POWER_DOWN: u8 = 0x02;
const CMD_RDATA: u8 = 0x10;

const fn wreg(register: u8) -> u8 {
    0x40 | ((register & 0x03) << 2)
}

const fn rreg(register: u8) -> u8 {
    0x20 | ((register & 0x03) << 2)
}

/// Register 1: data rate 600 SPS, normal mode, single-shot, internal
/// reference, temperature sensor off.
const REG1_CONFIG: u8 = 0b110 << 5;

/// DRDY flag in register 2.
const DRDY: u8 = 0x80;

const DRDY_POLL_INTERVAL: Duration = Duration::from_micros(500);
const DRDY_POLL_LIMIT: usize = 100;

/// Minimal blocking I2C transaction interface.
pub(crate) trait I2cBus: Send {
    fn write(&mut self, address: u8, bytes: &[u8]) -> Result<(), ()>;
    fn read(&mut self, address: u8, buffer: &mut [u8]) -> Result<(), ()>;
}

pub(crate) struct Ads112c04<B> {
    bus: B,
    address: u8,
    /// Last value written to register 0, to skip redundant mux switches.
    active_config: Option<u8>,
}

impl<B: I2cBus> Ads112c04<B> {
    pub(crate) fn new(bus: B, address: u8) -> Result<Self, AdcError> {
        let mut adc = Self {
            bus,
            address,
            active_config: None,
        };
        adc.command(CMD_RESET)?;
        adc.write_register(1, REG1_CONFIG)?;
        Ok(adc)
    }

    pub(crate) fn power_down(&mut self) -> Result<(), AdcError> {
        self.command(CMD_POWER_DOWN)
    }

    /// Register 0 value for an input selection: MUX[7:4], GAIN[3:1],
    /// PGA_BYPASS[0]. The PGA is bypassed for single-ended gain-1 reads.
    fn input_register(input: AdcInput, gain: Gain) -> Result<u8, AdcError> {
        let mux = match input {
            AdcInput::SingleEnded(pin) if pin < 4 => 0b1000 | pin,
            AdcInput::Differential(0, 1) => 0b0000,
            AdcInput::Differential(0, 2) => 0b0001,
            AdcInput::Differential(0, 3) => 0b0010,
            AdcInput::Differential(1, 0) => 0b0011,
            AdcInput::Differential(1, 2) => 0b0100,
            AdcInput::Differential(1, 3) => 0b0101,
            AdcInput::Differential(2, 3) => 0b0110,
            AdcInput::Differential(3, 2) => 0b0111,
            _ => return Err(AdcError::InvalidInput),
        };
        let (gain_bits, bypass) = match (input, gain) {
            (AdcInput::SingleEnded(_), Gain::X1) => (0b000, 1),
            (_, Gain::X1) => (0b000, 0),
            (_, Gain::X8) => (0b011, 0),
        };
        Ok((mux << 4) | (gain_bits << 1) | bypass)
    }

    fn command(&mut self, command: u8) -> Result<(), AdcError> {
        self.bus
            .write(self.address, &[command])
            .map_err(|()| AdcError::Bus)
    }

    fn write_register(&mut self, register: u8, value: u8) -> Result<(), AdcError> {
        self.bus
            .write(self.address, &[wreg(register), value])
            .map_err(|()| AdcError::Bus)
    }

    fn read_register(&mut self, register: u8) -> Result<u8, AdcError> {
        self.bus
            .write(self.address, &[rreg(register)])
            .map_err(|()| AdcError::Bus)?;
        let mut buffer = [0u8; 1];
        self.bus
            .read(self.address, &mut buffer)
            .map_err(|()| AdcError::Bus)?;
        Ok(buffer[0])
    }

    fn read_data(&mut self) -> Result<i16, AdcError> {
        self.bus
            .write(self.address, &[CMD_RDATA])
            .map_err(|()| AdcError::Bus)?;
        let mut buffer = [0u8; 2];
        self.bus
            .read(self.address, &mut buffer)
            .map_err(|()| AdcError::Bus)?;
        Ok(i16::from_be_bytes(buffer))
    }
}

impl<B: I2cBus> Converter for Ads112c04<B> {
    fn acquire(&mut self, input: AdcInput, gain: Gain) -> Result<i16, AdcError> {
        let config = Self::input_register(input, gain)?;

        if self.active_config != Some(config) {
            self.write_register(0, config)?;

            // Verify the mux actually switched before trusting a conversion.
            let readback = self.read_register(0)?;
            if readback != config {
                self.active_config = None;
                return Err(AdcError::Bus);
            }
            self.active_config = Some(config);
        }

        self.command(CMD_START)?;

        for _ in 0..DRDY_POLL_LIMIT {
            if self.read_register(2)? & DRDY != 0 {
                return self.read_data();
            }
            std::thread::sleep(DRDY_POLL_INTERVAL);
        }

        Err(AdcError::ConversionTimeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Behavioural model of the device's register protocol.
    struct DeviceModel {
        registers: [u8; 4],
        sample: i16,
        /// Conversions remaining before DRDY asserts; `None` never asserts.
        drdy_after: Option<usize>,
        pending_read: Vec<u8>,
        started: bool,
    }

    impl DeviceModel {
        fn new(sample: i16) -> Self {
            Self {
                registers: [0; 4],
                sample,
                drdy_after: Some(1),
                pending_read: Vec::new(),
                started: false,
            }
        }
    }

    impl I2cBus for DeviceModel {
        fn write(&mut self, _address: u8, bytes: &[u8]) -> Result<(), ()> {
            match bytes[0] {
                CMD_RESET => self.registers = [0; 4],
                CMD_START => self.started = true,
                CMD_POWER_DOWN => self.started = false,
                CMD_RDATA => self.pending_read = self.sample.to_be_bytes().to_vec(),
                byte if byte & 0xF0 == 0x40 => {
                    let register = usize::from((byte >> 2) & 0x03);
                    self.registers[register] = bytes[1];
                }
                byte if byte & 0xF0 == 0x20 => {
                    let register = usize::from((byte >> 2) & 0x03);
                    let mut value = self.registers[register];
                    if register == 2 && self.started {
                        match &mut self.drdy_after {
                            Some(0) | None => {}
                            Some(n) => *n -= 1,
                        }
                        if self.drdy_after == Some(0) {
                            value |= DRDY;
                        }
                    }
                    self.pending_read = vec![value];
                }
                _ => return Err(()),
            }
            Ok(())
        }

        fn read(&mut self, _address: u8, buffer: &mut [u8]) -> Result<(), ()> {
            if self.pending_read.len() != buffer.len() {
                return Err(());
            }
            buffer.copy_from_slice(&self.pending_read);
            Ok(())
        }
    }

    #[test]
    fn single_ended_acquisition() {
        let mut adc = Ads112c04::new(DeviceModel::new(16384), 0x48).unwrap();
        let code = adc.acquire(AdcInput::SingleEnded(2), Gain::X1).unwrap();
        assert_eq!(code, 16384);
        // MUX 0b1010, gain 1, PGA bypassed
        assert_eq!(adc.active_config, Some(0b1010_000_1));
    }

    #[test]
    fn differential_acquisition_with_gain() {
        let mut adc = Ads112c04::new(DeviceModel::new(-512), 0x48).unwrap();
        let code = adc.acquire(AdcInput::Differential(0, 1), Gain::X8).unwrap();
        assert_eq!(code, -512);
        // MUX 0b0000, gain 8, PGA in circuit
        assert_eq!(adc.active_config, Some(0b0000_011_0));
    }

    #[test]
    fn unroutable_input_is_rejected() {
        let mut adc = Ads112c04::new(DeviceModel::new(0), 0x48).unwrap();
        assert_eq!(
            adc.acquire(AdcInput::Differential(3, 0), Gain::X1),
            Err(AdcError::InvalidInput)
        );
    }

    #[test]
    fn stuck_conversion_times_out() {
        let mut model = DeviceModel::new(0);
        model.drdy_after = None;
        let mut adc = Ads112c04::new(model, 0x48).unwrap();
        assert_eq!(
            adc.acquire(AdcInput::SingleEnded(0), Gain::X1),
            Err(AdcError::ConversionTimeout)
        );
    }
}
