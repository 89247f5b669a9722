//! Board settings and the LTC6811 configuration register contents.

use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::conversion::GaugeScale;
use crate::error::{BmsError, Result};
use crate::types::{AuxChannels, CellChannels, ConversionMode, StatChannels};

/// Steps performed on every pass of the continuous measurement loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopSteps {
    pub write_config: bool,
    pub read_config: bool,
    pub measure_cell: bool,
    pub measure_aux: bool,
    pub measure_stat: bool,
    pub print_pec: bool,
}

impl Default for LoopSteps {
    fn default() -> Self {
        Self {
            write_config: false,
            read_config: false,
            measure_cell: true,
            measure_aux: false,
            measure_stat: false,
            print_pec: false,
        }
    }
}

/// Static description of the board, loaded once at start-up
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardSettings {
    /// Number of LTC6811s in the daisy chain
    pub total_ic: usize,
    pub conversion_mode: ConversionMode,
    pub discharge_permitted: bool,
    pub cell_channels: CellChannels,
    pub aux_channels: AuxChannels,
    pub stat_channels: StatChannels,
    pub over_voltage: u16,
    pub under_voltage: u16,
    pub loop_steps: LoopSteps,
    pub loop_interval_ms: u64,
    /// Coulomb counter sense resistor in ohms
    pub sense_resistor: f64,
    pub gauge_scale: GaugeScale,
    pub automatic_delay_ms: u64,
    pub scan_delay_ms: u64,
    pub pwm_duty: [u8; GROUP_DATA_LEN],
    pub sctrl_pulses: [u8; GROUP_DATA_LEN],
}

impl Default for BoardSettings {
    fn default() -> Self {
        Self {
            total_ic: 1,
            conversion_mode: ConversionMode::Khz7,
            discharge_permitted: true,
            cell_channels: CellChannels::All,
            aux_channels: AuxChannels::All,
            stat_channels: StatChannels::All,
            over_voltage: OV_THRESHOLD,
            under_voltage: UV_THRESHOLD,
            loop_steps: LoopSteps::default(),
            loop_interval_ms: MEASUREMENT_LOOP_TIME_MS,
            sense_resistor: SENSE_RESISTOR,
            gauge_scale: GaugeScale::LTC2944,
            automatic_delay_ms: AUTOMATIC_MODE_DISPLAY_DELAY_MS,
            scan_delay_ms: SCAN_MODE_DISPLAY_DELAY_MS,
            pwm_duty: [PWM_DUTY_DEFAULT; GROUP_DATA_LEN],
            sctrl_pulses: [SCTRL_PULSES_DEFAULT; GROUP_DATA_LEN],
        }
    }
}

/// Fields of the configuration register group, shared by every IC
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfiguration {
    /// Keep the reference powered between conversions
    pub refon: bool,
    pub adc_option: bool,
    /// GPIO1..GPIO5 pull-down off (true) or on (false)
    pub gpio: [bool; 5],
    /// Discharge switches for cells 1..12
    pub discharge: [bool; CELL_CHANNELS],
    /// Discharge timeout code, DCTO0..DCTO3
    pub discharge_timeout: [bool; 4],
    /// Under-voltage comparison code, LSB 100 uV
    pub under_voltage: u16,
    /// Over-voltage comparison code, LSB 100 uV
    pub over_voltage: u16,
}

impl Default for DeviceConfiguration {
    fn default() -> Self {
        Self {
            refon: true,
            adc_option: false,
            gpio: [false, false, true, true, true],
            discharge: [false; CELL_CHANNELS],
            // 4 minute timeout
            discharge_timeout: [true, false, true, false],
            under_voltage: UV_THRESHOLD,
            over_voltage: OV_THRESHOLD,
        }
    }
}

impl DeviceConfiguration {
    pub fn from_settings(settings: &BoardSettings) -> Self {
        Self {
            under_voltage: settings.under_voltage,
            over_voltage: settings.over_voltage,
            ..Self::default()
        }
    }

    /// Close the discharge switch across `cell` (1-based)
    pub fn set_discharge(&mut self, cell: u8) -> Result<()> {
        match cell {
            1..=12 => {
                self.discharge[cell as usize - 1] = true;
                Ok(())
            }
            _ => Err(BmsError::InvalidInput(format!(
                "S pin {cell} out of range 1-{CELL_CHANNELS}"
            ))),
        }
    }

    pub fn clear_discharge(&mut self) {
        self.discharge = [false; CELL_CHANNELS];
    }

    /// Pack into the six CFGR bytes
    pub fn encode(&self) -> [u8; GROUP_DATA_LEN] {
        let mut cfg = [0u8; GROUP_DATA_LEN];

        for (i, &high) in self.gpio.iter().enumerate() {
            if high {
                cfg[0] |= 1 << (i + 3);
            }
        }
        if self.refon {
            cfg[0] |= 0x04;
        }
        if self.adc_option {
            cfg[0] |= 0x01;
        }

        let vuv = (self.under_voltage / 16).saturating_sub(1);
        let vov = self.over_voltage / 16;
        cfg[1] = (vuv & 0xFF) as u8;
        cfg[2] = ((vov & 0x0F) << 4) as u8 | ((vuv >> 8) & 0x0F) as u8;
        cfg[3] = ((vov >> 4) & 0xFF) as u8;

        for (i, &on) in self.discharge.iter().enumerate() {
            if on {
                if i < 8 {
                    cfg[4] |= 1 << i;
                } else {
                    cfg[5] |= 1 << (i - 8);
                }
            }
        }
        for (i, &bit) in self.discharge_timeout.iter().enumerate() {
            if bit {
                cfg[5] |= 1 << (i + 4);
            }
        }
        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_configuration_bytes() {
        let cfg = DeviceConfiguration::default().encode();
        // GPIO3-5 high, REFON
        assert_eq!(cfg[0], 0xE4);
        // VUV = 25000/16 - 1 = 1561 = 0x619, VOV = 44000/16 = 2750 = 0xABE
        assert_eq!(cfg[1], 0x19);
        assert_eq!(cfg[2], 0xE6);
        assert_eq!(cfg[3], 0xAB);
        assert_eq!(cfg[4], 0x00);
        assert_eq!(cfg[5], 0x50);
    }

    #[test]
    fn discharge_bits_span_both_bytes() {
        let mut config = DeviceConfiguration::default();
        config.set_discharge(1).unwrap();
        config.set_discharge(9).unwrap();
        config.set_discharge(12).unwrap();
        let cfg = config.encode();
        assert_eq!(cfg[4], 0x01);
        assert_eq!(cfg[5], 0x59);

        config.clear_discharge();
        assert_eq!(config.encode()[4], 0);
    }

    #[test]
    fn discharge_pin_out_of_range() {
        let mut config = DeviceConfiguration::default();
        assert!(config.set_discharge(0).is_err());
        assert!(config.set_discharge(13).is_err());
        assert_eq!(config, DeviceConfiguration::default());
    }

    #[test]
    fn settings_fill_missing_fields_with_defaults() {
        let settings: BoardSettings =
            serde_json::from_str(r#"{ "total_ic": 2, "loop_steps": { "measure_aux": true } }"#)
                .unwrap();
        assert_eq!(settings.total_ic, 2);
        assert!(settings.loop_steps.measure_aux);
        assert!(settings.loop_steps.measure_cell);
        assert_eq!(settings.scan_delay_ms, SCAN_MODE_DISPLAY_DELAY_MS);
    }
}
