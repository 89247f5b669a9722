//! LTC2944 coulomb counter: session settings, mode control and sampling.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::alerts::check_alerts;
use crate::constants::*;
use crate::conversion::GaugeScale;
use crate::error::{BmsError, Result};
use crate::transport::FuelGaugeBus;
use crate::types::{
    AlertPinMode, ChargeUnits, FuelGaugeMode, FuelGaugeReading, Prescaler, TemperatureUnits,
};

/// Quantity an alert threshold pair applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ThresholdKind {
    Charge,
    Voltage,
    Current,
    Temperature,
}

impl ThresholdKind {
    /// High and low threshold registers
    pub fn registers(self) -> (u8, u8) {
        match self {
            ThresholdKind::Charge => (
                LTC2944_CHARGE_THRESH_HIGH_MSB_REG,
                LTC2944_CHARGE_THRESH_LOW_MSB_REG,
            ),
            ThresholdKind::Voltage => (
                LTC2944_VOLTAGE_THRESH_HIGH_MSB_REG,
                LTC2944_VOLTAGE_THRESH_LOW_MSB_REG,
            ),
            ThresholdKind::Current => (
                LTC2944_CURRENT_THRESH_HIGH_MSB_REG,
                LTC2944_CURRENT_THRESH_LOW_MSB_REG,
            ),
            ThresholdKind::Temperature => (
                LTC2944_TEMPERATURE_THRESH_HIGH_REG,
                LTC2944_TEMPERATURE_THRESH_LOW_REG,
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ThresholdLevel {
    High,
    Low,
}

/// High/low pair of threshold codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ThresholdCodes {
    pub high: u16,
    pub low: u16,
}

impl Default for ThresholdCodes {
    fn default() -> Self {
        Self {
            high: 0xFFFF,
            low: 0x0000,
        }
    }
}

/// Threshold codes last written to the device, power-on values until then
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Thresholds {
    pub charge: ThresholdCodes,
    pub voltage: ThresholdCodes,
    pub current: ThresholdCodes,
    pub temperature: ThresholdCodes,
}

impl Thresholds {
    fn pair_mut(&mut self, kind: ThresholdKind) -> &mut ThresholdCodes {
        match kind {
            ThresholdKind::Charge => &mut self.charge,
            ThresholdKind::Voltage => &mut self.voltage,
            ThresholdKind::Current => &mut self.current,
            ThresholdKind::Temperature => &mut self.temperature,
        }
    }
}

/// Operator-selected fuel-gauge settings kept for the life of the process
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FuelGaugeSession {
    pub mode: FuelGaugeMode,
    pub prescaler: Prescaler,
    pub alert_pin: AlertPinMode,
    pub charge_units: ChargeUnits,
    pub temperature_units: TemperatureUnits,
    pub thresholds: Thresholds,
    pub sense_resistor: f64,
    pub scale: GaugeScale,
}

impl Default for FuelGaugeSession {
    fn default() -> Self {
        Self::new(SENSE_RESISTOR, GaugeScale::LTC2944)
    }
}

impl FuelGaugeSession {
    pub fn new(sense_resistor: f64, scale: GaugeScale) -> Self {
        Self {
            mode: FuelGaugeMode::Sleep,
            prescaler: Prescaler::M4096,
            alert_pin: AlertPinMode::Alert,
            charge_units: ChargeUnits::MilliampHours,
            temperature_units: TemperatureUnits::Celsius,
            thresholds: Thresholds::default(),
            sense_resistor,
            scale,
        }
    }

    /// Control register value selecting `mode` with the session prescaler and pin mode
    pub fn control_byte(&self, mode: FuelGaugeMode) -> u8 {
        match mode {
            FuelGaugeMode::Shutdown => mode.bits(),
            _ => mode.bits() | self.prescaler.bits() | self.alert_pin.bits(),
        }
    }

    /// Threshold code for a physical value in the session units
    pub fn threshold_code(&self, kind: ThresholdKind, value: f64) -> u16 {
        let scale = &self.scale;
        match kind {
            ThresholdKind::Charge => {
                scale.charge_to_code(value, self.sense_resistor, self.prescaler, self.charge_units)
            }
            ThresholdKind::Voltage => scale.voltage_to_code(value),
            ThresholdKind::Current => scale.current_to_code(value, self.sense_resistor),
            ThresholdKind::Temperature => scale.temperature_to_code(value, self.temperature_units),
        }
    }

    /// Convert raw register contents into a reading in the session units
    pub fn convert(
        &self,
        snapshot: &GaugeSnapshot,
        timestamp: DateTime<Utc>,
        stale: bool,
    ) -> FuelGaugeReading {
        let scale = &self.scale;
        FuelGaugeReading {
            timestamp,
            mode: self.mode,
            charge: scale.code_to_charge(
                snapshot.charge,
                self.sense_resistor,
                self.prescaler,
                self.charge_units,
            ),
            charge_units: self.charge_units,
            current: snapshot
                .current
                .map(|code| scale.code_to_current(code, self.sense_resistor)),
            voltage: snapshot.voltage.map(|code| scale.code_to_voltage(code)),
            temperature: snapshot
                .temperature
                .map(|code| scale.code_to_temperature(code, self.temperature_units)),
            temperature_units: self.temperature_units,
            alerts: check_alerts(snapshot.status),
            stale,
        }
    }
}

/// Raw register contents read in one sample
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GaugeSnapshot {
    pub status: u8,
    pub charge: u16,
    pub voltage: Option<u16>,
    pub current: Option<u16>,
    pub temperature: Option<u16>,
}

/// Accumulates missing acknowledges across a sequence of bus accesses.
///
/// A NACK does not stop the sequence; the remaining accesses still run and the
/// first unacknowledged register is remembered. Any other bus error is passed
/// straight through.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AckStatus {
    nack: Option<u8>,
}

impl AckStatus {
    pub fn record<T>(&mut self, result: Result<T>) -> Result<Option<T>> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(BmsError::NoAcknowledge { register }) => {
                log::warn!("No acknowledge from fuel gauge at register {register:#04x}");
                self.nack.get_or_insert(register);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    pub fn is_nack(&self) -> bool {
        self.nack.is_some()
    }

    pub fn into_result(self) -> Result<()> {
        match self.nack {
            Some(register) => Err(BmsError::NoAcknowledge { register }),
            None => Ok(()),
        }
    }
}

/// LTC2944 driver bound to a bus
pub struct FuelGauge<B> {
    bus: B,
    session: FuelGaugeSession,
}

impl<B: FuelGaugeBus> FuelGauge<B> {
    pub fn new(bus: B, session: FuelGaugeSession) -> Self {
        Self { bus, session }
    }

    pub fn session(&self) -> &FuelGaugeSession {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut FuelGaugeSession {
        &mut self.session
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    /// Write the control register for `mode` using the session prescaler and pin mode
    pub fn set_mode(&mut self, mode: FuelGaugeMode, ack: &mut AckStatus) -> Result<()> {
        let control = self.session.control_byte(mode);
        log::info!("fuel gauge {:?} mode, control {:#04x}", mode, control);
        ack.record(self.bus.write_byte(LTC2944_CONTROL_REG, control))?;
        self.session.mode = mode;
        Ok(())
    }

    /// Read the registers the current mode keeps up to date.
    ///
    /// In sleep mode only the charge counter and status are read; the ADC
    /// registers hold nothing new.
    pub fn snapshot(&mut self, ack: &mut AckStatus) -> Result<GaugeSnapshot> {
        let charge = ack
            .record(self.bus.read_word(LTC2944_ACCUM_CHARGE_MSB_REG))?
            .unwrap_or_default();
        let (voltage, current, temperature) = if self.session.mode == FuelGaugeMode::Sleep {
            (None, None, None)
        } else {
            (
                ack.record(self.bus.read_word(LTC2944_VOLTAGE_MSB_REG))?,
                ack.record(self.bus.read_word(LTC2944_CURRENT_MSB_REG))?,
                ack.record(self.bus.read_word(LTC2944_TEMPERATURE_MSB_REG))?,
            )
        };
        let status = ack
            .record(self.bus.read_byte(LTC2944_STATUS_REG))?
            .unwrap_or_default();
        Ok(GaugeSnapshot {
            status,
            charge,
            voltage,
            current,
            temperature,
        })
    }

    /// Take a snapshot and convert it
    pub fn sample(
        &mut self,
        timestamp: DateTime<Utc>,
        stale: bool,
        ack: &mut AckStatus,
    ) -> Result<FuelGaugeReading> {
        let snapshot = self.snapshot(ack)?;
        Ok(self.session.convert(&snapshot, timestamp, stale))
    }

    /// Convert `value` and program it into one threshold register.
    ///
    /// The temperature thresholds are 8-bit registers and receive the upper
    /// byte of the code.
    pub fn write_threshold(
        &mut self,
        kind: ThresholdKind,
        level: ThresholdLevel,
        value: f64,
        ack: &mut AckStatus,
    ) -> Result<u16> {
        let code = self.session.threshold_code(kind, value);
        let (high, low) = kind.registers();
        let register = match level {
            ThresholdLevel::High => high,
            ThresholdLevel::Low => low,
        };
        log::debug!("{:?} {:?} threshold {} -> {:#06x}", kind, level, value, code);
        let written = match kind {
            ThresholdKind::Temperature => self.bus.write_byte(register, (code >> 8) as u8),
            _ => self.bus.write_word(register, code),
        };
        if ack.record(written)?.is_some() {
            let pair = self.session.thresholds.pair_mut(kind);
            match level {
                ThresholdLevel::High => pair.high = code,
                ThresholdLevel::Low => pair.low = code,
            }
        }
        Ok(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimulatedGauge;

    #[test]
    fn control_byte_merges_session_fields() {
        let mut session = FuelGaugeSession::default();
        assert_eq!(session.control_byte(FuelGaugeMode::Automatic), 0xC0 | 0x30 | 0x04);
        session.prescaler = Prescaler::M16;
        session.alert_pin = AlertPinMode::ChargeComplete;
        assert_eq!(session.control_byte(FuelGaugeMode::Scan), 0x80 | 0x10 | 0x02);
        assert_eq!(session.control_byte(FuelGaugeMode::Shutdown), 0x01);
    }

    #[test]
    fn sleep_mode_reads_charge_and_status_only() {
        let mut gauge = FuelGauge::new(SimulatedGauge::default(), FuelGaugeSession::default());
        let mut ack = AckStatus::default();
        gauge.set_mode(FuelGaugeMode::Sleep, &mut ack).unwrap();
        gauge.bus_mut().clear_log();

        let reading = gauge.sample(Utc::now(), false, &mut ack).unwrap();
        assert!(reading.current.is_none());
        assert!(reading.voltage.is_none());
        assert!(reading.temperature.is_none());
        assert_eq!(
            gauge.bus().reads(),
            &[LTC2944_ACCUM_CHARGE_MSB_REG, LTC2944_STATUS_REG]
        );
    }

    #[test]
    fn nack_is_accumulated_not_fatal() {
        let mut bus = SimulatedGauge::default();
        bus.nack_register(LTC2944_VOLTAGE_MSB_REG);
        let mut gauge = FuelGauge::new(bus, FuelGaugeSession::default());
        let mut ack = AckStatus::default();
        gauge.set_mode(FuelGaugeMode::Automatic, &mut ack).unwrap();

        let snapshot = gauge.snapshot(&mut ack).unwrap();
        assert!(ack.is_nack());
        assert!(snapshot.voltage.is_none());
        assert!(snapshot.current.is_some());
        assert!(matches!(
            ack.into_result(),
            Err(BmsError::NoAcknowledge { register }) if register == LTC2944_VOLTAGE_MSB_REG
        ));
    }

    #[test]
    fn temperature_threshold_writes_high_byte() {
        let mut gauge = FuelGauge::new(SimulatedGauge::default(), FuelGaugeSession::default());
        let mut ack = AckStatus::default();
        let code = gauge
            .write_threshold(ThresholdKind::Temperature, ThresholdLevel::High, 60.0, &mut ack)
            .unwrap();
        assert_eq!(
            gauge.bus().register(LTC2944_TEMPERATURE_THRESH_HIGH_REG),
            (code >> 8) as u8
        );
        assert_eq!(gauge.session().thresholds.temperature.high, code);
    }

    #[test]
    fn charge_threshold_uses_session_units() {
        let mut session = FuelGaugeSession::default();
        session.charge_units = ChargeUnits::Coulombs;
        let coulombs = session.threshold_code(ThresholdKind::Charge, 612.0);
        session.charge_units = ChargeUnits::MilliampHours;
        let mah = session.threshold_code(ThresholdKind::Charge, 170.0);
        // 170 mAh is 612 C; both are 1000 codes at 0.1 ohm, M = 4096
        assert_eq!(coulombs, 1000);
        assert_eq!(mah, 1000);
    }
}
