use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::alerts::AlertSet;
use crate::constants::*;
use crate::register::OpenWire;

/// ADC conversion speed, encoded into the MD bits of conversion commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConversionMode {
    /// 422 Hz, or 1 kHz with ADCOPT set
    Hz422,
    /// 27 kHz, or 14 kHz with ADCOPT set
    Khz27,
    /// 7 kHz, or 3 kHz with ADCOPT set
    Khz7,
    /// 26 Hz, or 2 kHz with ADCOPT set
    Hz26,
}

impl ConversionMode {
    /// MD field value
    pub fn bits(self) -> u16 {
        match self {
            ConversionMode::Hz422 => 0,
            ConversionMode::Khz27 => 1,
            ConversionMode::Khz7 => 2,
            ConversionMode::Hz26 => 3,
        }
    }

    /// Merge the MD field into a base command code
    pub fn apply(self, base: u16) -> u16 {
        let md = self.bits();
        base | ((md & 0x02) >> 1) << 8 | (md & 0x01) << 7
    }
}

/// Cell channels converted by ADCV and ADOW
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellChannels {
    All,
    C1C7,
    C2C8,
    C3C9,
    C4C10,
    C5C11,
    C6C12,
}

impl CellChannels {
    pub fn bits(self) -> u16 {
        self as u16
    }
}

/// Auxiliary channels converted by ADAX
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuxChannels {
    All,
    Gpio1,
    Gpio2,
    Gpio3,
    Gpio4,
    Gpio5,
    Vref2,
}

impl AuxChannels {
    pub fn bits(self) -> u16 {
        self as u16
    }
}

/// Status channels converted by ADSTAT
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatChannels {
    All,
    SumOfCells,
    InternalTemperature,
    AnalogSupply,
    DigitalSupply,
}

impl StatChannels {
    pub fn bits(self) -> u16 {
        self as u16
    }
}

/// Self-test pattern selector (ST bits)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelfTest {
    One,
    Two,
}

impl SelfTest {
    pub fn bits(self) -> u16 {
        match self {
            SelfTest::One => 1,
            SelfTest::Two => 2,
        }
    }

    /// Code every channel must read back after a digital self test
    pub fn expected_code(self, mode: ConversionMode, adc_option: bool) -> u16 {
        match (mode, adc_option, self) {
            (ConversionMode::Khz27, false, SelfTest::One) => 0x9565,
            (ConversionMode::Khz27, false, SelfTest::Two) => 0x6A9A,
            (ConversionMode::Khz27, true, SelfTest::One) => 0x9553,
            (ConversionMode::Khz27, true, SelfTest::Two) => 0x6AAC,
            (_, _, SelfTest::One) => 0x9555,
            (_, _, SelfTest::Two) => 0x6AAA,
        }
    }
}

/// Which register groups a read-back fetches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegisterSelect {
    All,
    GroupA,
    GroupB,
    GroupC,
    GroupD,
}

/// ADC register family a test result refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdcRegister {
    Cell,
    Aux,
    Stat,
}

/// How the isoSPI ports are woken before a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    /// Full wake pulse per IC, needed after the core has gone to sleep
    FromSleep,
    /// Short dummy transfer, enough when the port has only gone idle
    FromIdle,
}

/// LTC2944 ADC operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FuelGaugeMode {
    Automatic,
    Scan,
    Manual,
    Sleep,
    Shutdown,
}

impl FuelGaugeMode {
    /// ADC mode bits of the control register
    pub fn bits(self) -> u8 {
        match self {
            FuelGaugeMode::Automatic => LTC2944_AUTOMATIC_MODE,
            FuelGaugeMode::Scan => LTC2944_SCAN_MODE,
            FuelGaugeMode::Manual => LTC2944_MANUAL_MODE,
            FuelGaugeMode::Sleep => LTC2944_SLEEP_MODE,
            FuelGaugeMode::Shutdown => LTC2944_SHUTDOWN_MODE,
        }
    }
}

/// Coulomb counter prescaler M
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Prescaler {
    M1,
    M4,
    M16,
    M64,
    M256,
    M1024,
    M4096,
}

impl Prescaler {
    pub const ALL: [Prescaler; 7] = [
        Prescaler::M1,
        Prescaler::M4,
        Prescaler::M16,
        Prescaler::M64,
        Prescaler::M256,
        Prescaler::M1024,
        Prescaler::M4096,
    ];

    /// Division factor applied to the charge counter
    pub fn factor(self) -> u16 {
        match self {
            Prescaler::M1 => 1,
            Prescaler::M4 => 4,
            Prescaler::M16 => 16,
            Prescaler::M64 => 64,
            Prescaler::M256 => 256,
            Prescaler::M1024 => 1024,
            Prescaler::M4096 => 4096,
        }
    }

    /// Prescaler bits of the control register
    pub fn bits(self) -> u8 {
        match self {
            Prescaler::M1 => 0x00,
            Prescaler::M4 => 0x08,
            Prescaler::M16 => 0x10,
            Prescaler::M64 => 0x18,
            Prescaler::M256 => 0x20,
            Prescaler::M1024 => 0x28,
            Prescaler::M4096 => 0x30,
        }
    }
}

/// Function of the AL#/CC# pin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertPinMode {
    Alert,
    ChargeComplete,
    Disabled,
}

impl AlertPinMode {
    pub fn bits(self) -> u8 {
        match self {
            AlertPinMode::Alert => LTC2944_ALERT_MODE,
            AlertPinMode::ChargeComplete => LTC2944_CHARGE_COMPLETE_MODE,
            AlertPinMode::Disabled => LTC2944_DISABLE_ALCC_PIN,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChargeUnits {
    MilliampHours,
    Coulombs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TemperatureUnits {
    Celsius,
    Kelvin,
}

/// Transmitted and received bytes of one register group on one IC
#[derive(Debug, Clone, Serialize)]
pub struct RegisterFrame {
    pub ic: usize,
    pub data: [u8; GROUP_DATA_LEN],
    pub pec: u16,
}

/// Cell voltages of one IC, in volts
#[derive(Debug, Clone, Serialize)]
pub struct CellVoltages {
    pub ic: usize,
    pub volts: Vec<f64>,
}

/// GPIO and reference voltages of one IC, in volts
#[derive(Debug, Clone, Serialize)]
pub struct AuxVoltages {
    pub ic: usize,
    pub gpio: [f64; 5],
    pub vref2: f64,
}

/// Decoded status register groups of one IC
#[derive(Debug, Clone, Serialize)]
pub struct StatusReading {
    pub ic: usize,
    pub sum_of_cells: f64,
    pub die_temperature: f64,
    pub analog_supply: f64,
    pub digital_supply: f64,
    pub flags: [u8; 3],
    pub mux_fail: bool,
    pub thermal_shutdown: bool,
}

/// One fuel gauge sample in physical units
#[derive(Debug, Clone, Serialize)]
pub struct FuelGaugeReading {
    pub timestamp: DateTime<Utc>,
    pub mode: FuelGaugeMode,
    pub charge: f64,
    pub charge_units: ChargeUnits,
    /// Absent in sleep mode, where only the charge counter runs
    pub current: Option<f64>,
    pub voltage: Option<f64>,
    pub temperature: Option<f64>,
    pub temperature_units: TemperatureUnits,
    pub alerts: AlertSet,
    /// Set in manual mode once the single conversion has been read
    pub stale: bool,
}

/// Structured output handed to the presentation layer
#[derive(Debug, Clone, Serialize)]
pub enum Report {
    ConversionTime { micros: u64 },
    ConfigWritten(Vec<RegisterFrame>),
    ConfigRead(Vec<RegisterFrame>),
    Cells {
        timestamp: DateTime<Utc>,
        datalog: bool,
        ics: Vec<CellVoltages>,
    },
    Aux { datalog: bool, ics: Vec<AuxVoltages> },
    Status(Vec<StatusReading>),
    SumOfCells(Vec<f64>),
    MuxTest { passed: Vec<bool> },
    SelfTest { register: AdcRegister, errors: u32 },
    Overlap { errors: u32 },
    Redundancy { register: AdcRegister, errors: u32 },
    OpenWire(Vec<OpenWire>),
    OpenWireMulti(Vec<Vec<u16>>),
    PecCount(Vec<u32>),
    PwmWritten(Vec<RegisterFrame>),
    PwmRead(Vec<RegisterFrame>),
    SControlWritten(Vec<RegisterFrame>),
    SControlRead(Vec<RegisterFrame>),
    CommWritten(Vec<RegisterFrame>),
    CommRead(Vec<RegisterFrame>),
    CrcError { ics: Vec<usize> },
    FuelGauge(FuelGaugeReading),
    /// Menu or value prompt waiting for operator input
    Prompt(String),
    Notice(String),
}
