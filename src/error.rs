//! Error types for battery-monitor and fuel-gauge operations.

use thiserror::Error;

use crate::sequencer::SequencerState;

/// Result type alias for BMS host operations.
pub type Result<T> = std::result::Result<T, BmsError>;

/// Error types for daisy-chain and fuel-gauge communication.
#[derive(Error, Debug)]
pub enum BmsError {
    /// Serial port communication error
    #[error("Serial port error: {0}")]
    SerialPort(#[from] serialport::Error),

    /// General I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// SPI bus error reported by the daisy-chain transport
    #[error("SPI error: {0:?}")]
    Spi(embedded_hal::spi::ErrorKind),

    /// I2C bus error other than a missing acknowledge
    #[error("I2C error: {0:?}")]
    I2c(embedded_hal::i2c::ErrorKind),

    /// Register group from an IC failed its packet error code check or was
    /// never received
    #[error("PEC mismatch on IC {ic}")]
    Crc {
        /// Chain position of the IC, counted from 1
        ic: usize,
    },

    /// Fuel gauge did not acknowledge a register access
    #[error("No acknowledge from fuel gauge at register {register:#04x}")]
    NoAcknowledge {
        /// Register address being accessed
        register: u8,
    },

    /// Opcode has no matching command
    #[error("Unknown command: {0}")]
    UnknownCommand(u32),

    /// Sequencer step issued in a state that does not allow it
    #[error("{step} not allowed while {state:?}")]
    OutOfSequence {
        /// Step that was attempted
        step: &'static str,
        /// State the sequencer was in
        state: SequencerState,
    },

    /// Register group selection not available for this register kind
    #[error("Register group {0:?} is not available here")]
    InvalidRegisterGroup(crate::types::RegisterSelect),

    /// User supplied a value outside the accepted range
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Console closed while a value was expected
    #[error("Input closed")]
    InputClosed,
}
