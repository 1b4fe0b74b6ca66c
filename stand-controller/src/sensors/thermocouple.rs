//! Thermocouple linearization.
//!
//! Inverse (voltage to temperature) polynomial coefficients from the NIST
//! ITS-90 thermocouple tables, one coefficient set per voltage range. A
//! voltage outside every range for the type is an error, never extrapolated.

use super::calibrate::CalibrationFault;
use crate::config::ThermocoupleType;

struct Segment {
    min_mv: f64,
    max_mv: f64,
    coefficients: &'static [f64],
}

const TYPE_K: &[Segment] = &[
    Segment {
        min_mv: -5.891,
        max_mv: 0.0,
        coefficients: &[
            0.0,
            2.517_346_2e1,
            -1.166_287_8,
            -1.083_363_8,
            -8.977_354_0e-1,
            -3.734_237_7e-1,
            -8.663_264_3e-2,
            -1.045_059_8e-2,
            -5.192_057_7e-4,
        ],
    },
    Segment {
        min_mv: 0.0,
        max_mv: 20.644,
        coefficients: &[
            0.0,
            2.508_355e1,
            7.860_106e-2,
            -2.503_131e-1,
            8.315_270e-2,
            -1.228_034e-2,
            9.804_036e-4,
            -4.413_030e-5,
            1.057_734e-6,
            -1.052_755e-8,
        ],
    },
    Segment {
        min_mv: 20.644,
        max_mv: 54.886,
        coefficients: &[
            -1.318_058e2,
            4.830_222e1,
            -1.646_031,
            5.464_731e-2,
            -9.650_715e-4,
            8.802_193e-6,
            -3.110_810e-8,
        ],
    },
];

const TYPE_T: &[Segment] = &[
    Segment {
        min_mv: -5.603,
        max_mv: 0.0,
        coefficients: &[
            0.0,
            2.594_919_2e1,
            -2.131_696_7e-1,
            7.901_869_2e-1,
            4.252_777_7e-1,
            1.330_447_3e-1,
            2.024_144_6e-2,
            1.266_817_1e-3,
        ],
    },
    Segment {
        min_mv: 0.0,
        max_mv: 20.872,
        coefficients: &[
            0.0,
            2.592_800e1,
            -7.602_961e-1,
            4.637_791e-2,
            -2.165_394e-3,
            6.048_144e-5,
            -7.293_422e-7,
        ],
    },
];

fn segments(tc_type: ThermocoupleType) -> &'static [Segment] {
    match tc_type {
        ThermocoupleType::K => TYPE_K,
        ThermocoupleType::T => TYPE_T,
    }
}

/// Converts a junction voltage in millivolts to degrees Celsius.
pub(crate) fn linearize(tc_type: ThermocoupleType, millivolts: f64) -> Result<f32, CalibrationFault> {
    let segment = segments(tc_type)
        .iter()
        .find(|segment| millivolts >= segment.min_mv && millivolts <= segment.max_mv)
        .ok_or(CalibrationFault::OutOfRange)?;

    let celsius = segment
        .coefficients
        .iter()
        .rev()
        .fold(0.0f64, |acc, &c| acc * millivolts + c);

    Ok(celsius as f32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_k_reference_points() {
        // 0 mV is the reference junction temperature.
        assert!(linearize(ThermocoupleType::K, 0.0).unwrap().abs() < 0.01);

        // ITS-90 table: 100 C corresponds to 4.096 mV.
        let t = linearize(ThermocoupleType::K, 4.096).unwrap();
        assert!((t - 100.0).abs() < 0.1, "got {t}");

        // 500 C corresponds to 20.644 mV, the upper end of the mid segment.
        let t = linearize(ThermocoupleType::K, 20.644).unwrap();
        assert!((t - 500.0).abs() < 0.2, "got {t}");
    }

    #[test]
    fn type_t_reference_points() {
        // ITS-90 table: 100 C corresponds to 4.279 mV.
        let t = linearize(ThermocoupleType::T, 4.279).unwrap();
        assert!((t - 100.0).abs() < 0.1, "got {t}");

        // -100 C corresponds to -3.379 mV.
        let t = linearize(ThermocoupleType::T, -3.379).unwrap();
        assert!((t + 100.0).abs() < 0.2, "got {t}");
    }

    #[test]
    fn out_of_range_voltage_is_rejected() {
        assert_eq!(
            linearize(ThermocoupleType::K, 60.0),
            Err(CalibrationFault::OutOfRange)
        );
        assert_eq!(
            linearize(ThermocoupleType::T, -6.0),
            Err(CalibrationFault::OutOfRange)
        );
    }
}
