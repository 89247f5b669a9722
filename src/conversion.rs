//! Code/physical-unit conversions.
//!
//! Fuel-gauge conversions are parameterised by [`GaugeScale`] so boards whose
//! front end differs from the stock LTC2944 reuse the same arithmetic. The
//! inverse functions round to the nearest code and clamp to the register
//! range; a forward/inverse round trip never moves a code by more than one LSB.

use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::types::{ChargeUnits, Prescaler, TemperatureUnits};

const FULL_CODE: f64 = 65535.0;
const HALF_CODE: f64 = LTC2944_CURRENT_ZERO_CODE as f64;
const KELVIN_OFFSET: f64 = 273.15;

/// Full-scale constants of a coulomb counter
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GaugeScale {
    /// Charge LSB in Ah at 50 mOhm sense and M = 4096
    pub charge_lsb: f64,
    pub full_scale_voltage: f64,
    /// Sense voltage producing a full-scale current code
    pub full_scale_current: f64,
    pub full_scale_temperature: f64,
}

impl Default for GaugeScale {
    fn default() -> Self {
        Self::LTC2944
    }
}

impl GaugeScale {
    /// Full-scale values from the LTC2944 datasheet
    pub const LTC2944: GaugeScale = GaugeScale {
        charge_lsb: LTC2944_CHARGE_LSB,
        full_scale_voltage: LTC2944_FULLSCALE_VOLTAGE,
        full_scale_current: LTC2944_FULLSCALE_CURRENT,
        full_scale_temperature: LTC2944_FULLSCALE_TEMPERATURE,
    };

    /// Milliamp-hours represented by one charge code
    fn mah_per_code(&self, sense_resistor: f64, prescaler: Prescaler) -> f64 {
        1000.0 * self.charge_lsb * f64::from(prescaler.factor()) * 50e-3 / (sense_resistor * 4096.0)
    }

    /// Accumulated charge code to mAh or coulombs
    pub fn code_to_charge(
        &self,
        code: u16,
        sense_resistor: f64,
        prescaler: Prescaler,
        units: ChargeUnits,
    ) -> f64 {
        let mah = f64::from(code) * self.mah_per_code(sense_resistor, prescaler);
        match units {
            ChargeUnits::MilliampHours => mah,
            ChargeUnits::Coulombs => mah * COULOMBS_PER_MAH,
        }
    }

    /// Charge threshold in `units` to a 16-bit code
    pub fn charge_to_code(
        &self,
        charge: f64,
        sense_resistor: f64,
        prescaler: Prescaler,
        units: ChargeUnits,
    ) -> u16 {
        let mah = match units {
            ChargeUnits::MilliampHours => charge,
            ChargeUnits::Coulombs => charge / COULOMBS_PER_MAH,
        };
        to_code(mah / self.mah_per_code(sense_resistor, prescaler))
    }

    /// Signed current in amperes; codes above 0x7FFF are charging
    pub fn code_to_current(&self, code: u16, sense_resistor: f64) -> f64 {
        (f64::from(code) - HALF_CODE) / HALF_CODE * (self.full_scale_current / sense_resistor)
    }

    /// Current in amperes to a threshold code
    pub fn current_to_code(&self, amps: f64, sense_resistor: f64) -> u16 {
        to_code(amps * sense_resistor / self.full_scale_current * HALF_CODE + HALF_CODE)
    }

    /// Battery voltage in volts
    pub fn code_to_voltage(&self, code: u16) -> f64 {
        f64::from(code) * (self.full_scale_voltage / FULL_CODE)
    }

    /// Volts to a voltage threshold code
    pub fn voltage_to_code(&self, volts: f64) -> u16 {
        to_code(volts / self.full_scale_voltage * FULL_CODE)
    }

    /// Die temperature in `units`
    pub fn code_to_temperature(&self, code: u16, units: TemperatureUnits) -> f64 {
        let kelvin = f64::from(code) * (self.full_scale_temperature / FULL_CODE);
        match units {
            TemperatureUnits::Kelvin => kelvin,
            TemperatureUnits::Celsius => kelvin - KELVIN_OFFSET,
        }
    }

    /// Temperature in `units` to a 16-bit threshold code
    pub fn temperature_to_code(&self, temperature: f64, units: TemperatureUnits) -> u16 {
        let kelvin = match units {
            TemperatureUnits::Kelvin => temperature,
            TemperatureUnits::Celsius => temperature + KELVIN_OFFSET,
        };
        to_code(kelvin / self.full_scale_temperature * FULL_CODE)
    }
}

fn to_code(raw: f64) -> u16 {
    if raw.is_nan() {
        return 0;
    }
    raw.round().clamp(0.0, FULL_CODE) as u16
}

/// Cell or GPIO code to volts
pub fn afe_voltage(code: u16) -> f64 {
    f64::from(code) * AFE_CODE_LSB
}

/// Sum-of-cells code to volts; the SC measurement is attenuated by 20
pub fn sum_of_cells(code: u16) -> f64 {
    f64::from(code) * AFE_CODE_LSB * 20.0
}

/// Internal die temperature in degrees Celsius (7.5 mV/K)
pub fn die_temperature(code: u16) -> f64 {
    f64::from(code) * (AFE_CODE_LSB / 0.0075) - 273.0
}

#[cfg(test)]
mod tests {
    use super::*;

    const R: f64 = SENSE_RESISTOR;

    #[test]
    fn voltage_round_trip_within_one_lsb() {
        let scale = GaugeScale::LTC2944;
        for code in 0..=u16::MAX {
            let back = scale.voltage_to_code(scale.code_to_voltage(code));
            assert!(back.abs_diff(code) <= 1, "code {code} came back as {back}");
        }
    }

    #[test]
    fn current_round_trip_keeps_zero_offset() {
        let scale = GaugeScale::LTC2944;
        assert_eq!(scale.code_to_current(0x7FFF, R), 0.0);
        assert_eq!(scale.current_to_code(0.0, R), 0x7FFF);
        for code in (0..=u16::MAX).step_by(97) {
            let back = scale.current_to_code(scale.code_to_current(code, R), R);
            assert!(back.abs_diff(code) <= 1);
        }
    }

    #[test]
    fn current_full_scale_matches_sense_range() {
        let scale = GaugeScale::LTC2944;
        // 64 mV across 100 mOhm
        assert!((scale.code_to_current(0xFFFE, R) - 0.64).abs() < 1e-9);
        assert!((scale.code_to_current(0, R) + 0.64).abs() < 1e-4);
    }

    #[test]
    fn charge_is_proportional_to_prescaler() {
        let scale = GaugeScale::LTC2944;
        let code = 0x8000;
        let reference = scale.code_to_charge(code, R, Prescaler::M4096, ChargeUnits::MilliampHours);
        for prescaler in Prescaler::ALL {
            let charge = scale.code_to_charge(code, R, prescaler, ChargeUnits::MilliampHours);
            let expected = reference * f64::from(prescaler.factor()) / 4096.0;
            assert!((charge - expected).abs() < 1e-9 * reference.max(1.0));
        }
    }

    #[test]
    fn coulombs_are_mah_times_three_point_six() {
        let scale = GaugeScale::LTC2944;
        let mah = scale.code_to_charge(1000, R, Prescaler::M4096, ChargeUnits::MilliampHours);
        let coulombs = scale.code_to_charge(1000, R, Prescaler::M4096, ChargeUnits::Coulombs);
        assert!((coulombs - mah * 3.6).abs() < 1e-9);
        // 0.34 mAh per code at 50 mOhm halves to 0.17 mAh at 100 mOhm
        assert!((mah - 170.0).abs() < 1e-9);
    }

    #[test]
    fn charge_round_trip_within_one_lsb() {
        let scale = GaugeScale::LTC2944;
        for prescaler in Prescaler::ALL {
            for code in (0..=u16::MAX).step_by(251) {
                let c = scale.code_to_charge(code, R, prescaler, ChargeUnits::Coulombs);
                let back = scale.charge_to_code(c, R, prescaler, ChargeUnits::Coulombs);
                assert!(back.abs_diff(code) <= 1);
            }
        }
    }

    #[test]
    fn temperature_units() {
        let scale = GaugeScale::LTC2944;
        let code = scale.temperature_to_code(25.0, TemperatureUnits::Celsius);
        let kelvin = scale.code_to_temperature(code, TemperatureUnits::Kelvin);
        let celsius = scale.code_to_temperature(code, TemperatureUnits::Celsius);
        assert!((kelvin - celsius - 273.15).abs() < 1e-9);
        assert!((celsius - 25.0).abs() < 510.0 / 65535.0);
    }

    #[test]
    fn inverse_clamps_out_of_range_values() {
        let scale = GaugeScale::LTC2944;
        assert_eq!(scale.voltage_to_code(100.0), u16::MAX);
        assert_eq!(scale.voltage_to_code(-1.0), 0);
        assert_eq!(scale.current_to_code(10.0, R), u16::MAX);
    }

    #[test]
    fn front_end_scales() {
        assert!((afe_voltage(33000) - 3.3).abs() < 1e-12);
        assert!((sum_of_cells(2000) - 4.0).abs() < 1e-12);
        // 300 K reads as 22500 codes at 7.5 mV/K
        assert!((die_temperature(22500) - 27.0).abs() < 1e-9);
    }
}
