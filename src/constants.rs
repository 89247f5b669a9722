//! Protocol constants for LTC6811 daisy chains and the LTC2944 fuel gauge.
//!
//! This module defines the command codes sent over the isoSPI chain, the
//! register map of the coulomb counter, and the timing and threshold
//! defaults used by the demonstration board.

/// Number of cell voltage channels per LTC6811
pub const CELL_CHANNELS: usize = 12;

/// Number of auxiliary channels (GPIO1-5 and VREF2)
pub const AUX_CHANNELS: usize = 6;

/// Number of status code words (SC, ITMP, VA, VD)
pub const STAT_CHANNELS: usize = 4;

/// Code words carried by one register group
pub const CODES_PER_GROUP: usize = 3;

/// Data bytes in one register group
pub const GROUP_DATA_LEN: usize = 6;

/// Data bytes plus the two PEC bytes
pub const GROUP_FRAME_LEN: usize = 8;

// Register group write commands
pub const WRCFGA: u16 = 0x0001;
pub const WRPWM: u16 = 0x0020;
pub const WRSCTRL: u16 = 0x0014;
pub const WRCOMM: u16 = 0x0721;

// Register group read commands
pub const RDCFGA: u16 = 0x0002;
pub const RDCVA: u16 = 0x0004;
pub const RDCVB: u16 = 0x0006;
pub const RDCVC: u16 = 0x0008;
pub const RDCVD: u16 = 0x000A;
pub const RDAUXA: u16 = 0x000C;
pub const RDAUXB: u16 = 0x000E;
pub const RDSTATA: u16 = 0x0010;
pub const RDSTATB: u16 = 0x0012;
pub const RDSCTRL: u16 = 0x0016;
pub const RDPWM: u16 = 0x0022;
pub const RDCOMM: u16 = 0x0722;

// Conversion commands, before mode/option bits are merged in
pub const ADCV: u16 = 0x0260;
pub const ADOW: u16 = 0x0228;
pub const CVST: u16 = 0x0207;
pub const ADOL: u16 = 0x0201;
pub const ADAX: u16 = 0x0460;
pub const ADAXD: u16 = 0x0400;
pub const AXST: u16 = 0x0407;
pub const ADSTAT: u16 = 0x0468;
pub const ADSTATD: u16 = 0x0408;
pub const STATST: u16 = 0x040F;
pub const ADCVAX: u16 = 0x046F;
pub const ADCVSC: u16 = 0x0467;

// Control commands
pub const CLRCELL: u16 = 0x0711;
pub const CLRAUX: u16 = 0x0712;
pub const CLRSTAT: u16 = 0x0713;
pub const PLADC: u16 = 0x0714;
pub const DIAGN: u16 = 0x0715;
pub const STCOMM: u16 = 0x0723;
pub const STSCTRL: u16 = 0x0019;
pub const CLRSCTRL: u16 = 0x0018;

/// Value a cleared code register reads back as
pub const CLEARED_CODE: u16 = 0xFFFF;

/// Redundancy test failure floor; codes at or above this are faults
pub const REDUNDANCY_FAULT_CODE: u16 = 0xFF00;

/// Allowed C7/C8 disagreement in the overlap test, in 100 uV codes
pub const OVERLAP_TOLERANCE: i32 = 200;

/// Pull-up minus pull-down difference marking an open wire, in 100 uV codes
pub const OPEN_WIRE_THRESHOLD: i32 = 4000;

/// Number of ADOW conversions issued per pull direction
pub const OPEN_WIRE_REPEATS: usize = 2;

/// Default over-voltage threshold code (4.4 V, LSB 100 uV)
pub const OV_THRESHOLD: u16 = 44000;

/// Default under-voltage threshold code (2.5 V, LSB 100 uV)
pub const UV_THRESHOLD: u16 = 25000;

/// Cell and aux code LSB in volts
pub const AFE_CODE_LSB: f64 = 0.0001;

/// Default PWM duty cycle byte (two S pins per byte)
pub const PWM_DUTY_DEFAULT: u8 = 0x88;

/// Default S-control pulse byte (two S pins per byte)
pub const SCTRL_PULSES_DEFAULT: u8 = 0xFF;

/// COMM payload for the SPI pass-through demo (three bytes 0x11 0x25 0x17)
pub const COMM_SPI_WRITE: [u8; 6] = [0x81, 0x10, 0xA2, 0x50, 0xA1, 0x79];

/// COMM payload writing 0x11 to address 0x00 of a 24LC025 EEPROM
pub const COMM_I2C_WRITE: [u8; 6] = [0x6A, 0x08, 0x00, 0x08, 0x01, 0x19];

/// COMM payload setting the EEPROM word address and issuing a read start
pub const COMM_I2C_READ_ADDRESS: [u8; 6] = [0x6A, 0x08, 0x00, 0x08, 0x6A, 0x18];

/// COMM payload clocking the EEPROM data back out
pub const COMM_I2C_READ_DATA: [u8; 6] = [0x0F, 0xF9, 0x7F, 0xF9, 0x7F, 0xF9];

/// Upper bound on PLADC status reads before a poll gives up
pub const POLL_READ_LIMIT: u32 = 200_000;

/// Isolation-port wake pulse held low per IC when waking from sleep
pub const WAKE_SLEEP_PULSE_US: u32 = 300;

/// Settling time after each wake-from-sleep pulse
pub const WAKE_SLEEP_SETTLE_US: u32 = 10;

/// I2C address of the LTC2944
pub const LTC2944_I2C_ADDRESS: u8 = 0x64;

// LTC2944 register map
pub const LTC2944_STATUS_REG: u8 = 0x00;
pub const LTC2944_CONTROL_REG: u8 = 0x01;
pub const LTC2944_ACCUM_CHARGE_MSB_REG: u8 = 0x02;
pub const LTC2944_CHARGE_THRESH_HIGH_MSB_REG: u8 = 0x04;
pub const LTC2944_CHARGE_THRESH_LOW_MSB_REG: u8 = 0x06;
pub const LTC2944_VOLTAGE_MSB_REG: u8 = 0x08;
pub const LTC2944_VOLTAGE_THRESH_HIGH_MSB_REG: u8 = 0x0A;
pub const LTC2944_VOLTAGE_THRESH_LOW_MSB_REG: u8 = 0x0C;
pub const LTC2944_CURRENT_MSB_REG: u8 = 0x0E;
pub const LTC2944_CURRENT_THRESH_HIGH_MSB_REG: u8 = 0x10;
pub const LTC2944_CURRENT_THRESH_LOW_MSB_REG: u8 = 0x12;
pub const LTC2944_TEMPERATURE_MSB_REG: u8 = 0x14;
pub const LTC2944_TEMPERATURE_THRESH_HIGH_REG: u8 = 0x16;
pub const LTC2944_TEMPERATURE_THRESH_LOW_REG: u8 = 0x17;

// LTC2944 control register fields
pub const LTC2944_AUTOMATIC_MODE: u8 = 0xC0;
pub const LTC2944_SCAN_MODE: u8 = 0x80;
pub const LTC2944_MANUAL_MODE: u8 = 0x40;
pub const LTC2944_SLEEP_MODE: u8 = 0x00;
pub const LTC2944_SHUTDOWN_MODE: u8 = 0x01;
pub const LTC2944_ALERT_MODE: u8 = 0x04;
pub const LTC2944_CHARGE_COMPLETE_MODE: u8 = 0x02;
pub const LTC2944_DISABLE_ALCC_PIN: u8 = 0x00;

/// Charge LSB in Ah at 50 mOhm sense and M = 4096
pub const LTC2944_CHARGE_LSB: f64 = 0.34e-3;

/// Full-scale voltage of the SENSE- ADC
pub const LTC2944_FULLSCALE_VOLTAGE: f64 = 70.0;

/// Full-scale sense voltage of the current ADC
pub const LTC2944_FULLSCALE_CURRENT: f64 = 64e-3;

/// Full-scale temperature in kelvin
pub const LTC2944_FULLSCALE_TEMPERATURE: f64 = 510.0;

/// Zero-current code of the current register
pub const LTC2944_CURRENT_ZERO_CODE: u16 = 0x7FFF;

/// Coulombs per milliamp-hour
pub const COULOMBS_PER_MAH: f64 = 3.6;

/// Sense resistor fitted on the demonstration board, in ohms
pub const SENSE_RESISTOR: f64 = 0.100;

/// Delay between readings in automatic and manual mode, milliseconds
pub const AUTOMATIC_MODE_DISPLAY_DELAY_MS: u64 = 1000;

/// Delay between readings in scan mode, milliseconds
pub const SCAN_MODE_DISPLAY_DELAY_MS: u64 = 5000;

/// Extra settle time before each sleep-mode reading, milliseconds
pub const SLEEP_MODE_SETTLE_MS: u64 = 100;

/// Delay between measurement loop iterations, milliseconds
pub const MEASUREMENT_LOOP_TIME_MS: u64 = 900;

/// BLE module baud rate on the telemetry serial port
pub const BLE_BAUD_RATE: u32 = 9600;
