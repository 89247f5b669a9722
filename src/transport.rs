//! Collaborator interfaces for the daisy chain, the fuel-gauge bus and time,
//! plus adapters binding them to `embedded-hal` buses and the host clock.

use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use embedded_hal::i2c::{self, I2c};
use embedded_hal::spi::{self, Operation, SpiDevice};

use crate::constants::*;
use crate::error::{BmsError, Result};
use crate::pec::pec15;
use crate::types::Wake;

/// Data following a command on the chain
#[derive(Debug, Clone, Copy)]
pub enum Payload<'a> {
    None,
    /// One register group per IC, indexed by chain position
    PerIc(&'a [[u8; GROUP_DATA_LEN]]),
    /// Extra clock bytes, as STCOMM needs to shift the COMM data out
    Clocks(usize),
}

/// isoSPI daisy chain of LTC6811s
pub trait DaisyChain {
    fn wake(&mut self, wake: Wake) -> Result<()>;

    fn send_command(&mut self, command: u16, payload: Payload<'_>) -> Result<()>;

    /// Block until the running conversion completes and report how long it took
    fn poll_conversion(&mut self) -> Result<Duration>;

    /// Issue a read command and return one frame (data + PEC) per IC
    fn read_back(&mut self, command: u16, ic_count: usize) -> Result<Vec<[u8; GROUP_FRAME_LEN]>>;
}

/// Register-addressed bus to the coulomb counter. Word accesses are MSB first.
pub trait FuelGaugeBus {
    fn read_byte(&mut self, register: u8) -> Result<u8>;
    fn read_word(&mut self, register: u8) -> Result<u16>;
    fn write_byte(&mut self, register: u8, value: u8) -> Result<()>;
    fn write_word(&mut self, register: u8, value: u16) -> Result<()>;
}

/// Source of delays and timestamps
pub trait Clock {
    fn delay(&mut self, duration: Duration);
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock of the host
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn delay(&mut self, duration: Duration) {
        thread::sleep(duration);
    }

    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

fn command_frame(command: u16) -> [u8; 4] {
    let cmd = command.to_be_bytes();
    let pec = pec15(&cmd).to_be_bytes();
    [cmd[0], cmd[1], pec[0], pec[1]]
}

/// LTC6811 chain behind an `embedded-hal` SPI device (typically through an
/// LTC6820 isoSPI bridge)
pub struct SpiDaisyChain<S> {
    spi: S,
    total_ic: usize,
}

impl<S: SpiDevice> SpiDaisyChain<S> {
    /// Chain of `total_ic` LTC6811s on `spi`
    pub fn new(spi: S, total_ic: usize) -> Self {
        Self { spi, total_ic }
    }

    /// Give back the SPI device
    pub fn release(self) -> S {
        self.spi
    }

    fn transact(&mut self, operations: &mut [Operation<'_, u8>]) -> Result<()> {
        self.spi
            .transaction(operations)
            .map_err(|e| BmsError::Spi(spi::Error::kind(&e)))
    }
}

impl<S: SpiDevice> DaisyChain for SpiDaisyChain<S> {
    fn wake(&mut self, wake: Wake) -> Result<()> {
        for _ in 0..self.total_ic {
            match wake {
                Wake::FromSleep => {
                    self.transact(&mut [Operation::DelayNs(WAKE_SLEEP_PULSE_US * 1000)])?;
                    thread::sleep(Duration::from_micros(u64::from(WAKE_SLEEP_SETTLE_US)));
                }
                Wake::FromIdle => self.transact(&mut [Operation::Write(&[0xFF])])?,
            }
        }
        Ok(())
    }

    fn send_command(&mut self, command: u16, payload: Payload<'_>) -> Result<()> {
        let mut buffer = command_frame(command).to_vec();
        match payload {
            Payload::None => {}
            Payload::PerIc(groups) => {
                // The first group shifted in ends up in the last IC of the chain
                for data in groups.iter().rev() {
                    buffer.extend_from_slice(data);
                    buffer.extend_from_slice(&pec15(data).to_be_bytes());
                }
            }
            Payload::Clocks(count) => buffer.extend(std::iter::repeat(0xFF).take(count)),
        }
        log::debug!("SPI write {:04X}: {:02X?}", command, buffer);
        self.transact(&mut [Operation::Write(&buffer)])
    }

    fn poll_conversion(&mut self) -> Result<Duration> {
        let started = Instant::now();
        let cmd = command_frame(PLADC);
        for _ in 0..POLL_READ_LIMIT {
            let mut status = [0u8; 1];
            self.transact(&mut [Operation::Write(&cmd), Operation::Read(&mut status)])?;
            if status[0] != 0 {
                break;
            }
        }
        Ok(started.elapsed())
    }

    fn read_back(&mut self, command: u16, ic_count: usize) -> Result<Vec<[u8; GROUP_FRAME_LEN]>> {
        let cmd = command_frame(command);
        let mut raw = vec![0u8; ic_count * GROUP_FRAME_LEN];
        self.transact(&mut [Operation::Write(&cmd), Operation::Read(&mut raw)])?;
        log::debug!("SPI read {:04X}: {:02X?}", command, raw);
        Ok(raw
            .chunks_exact(GROUP_FRAME_LEN)
            .map(|chunk| {
                let mut frame = [0u8; GROUP_FRAME_LEN];
                frame.copy_from_slice(chunk);
                frame
            })
            .collect())
    }
}

/// LTC2944 behind an `embedded-hal` I2C bus
pub struct I2cFuelGauge<I> {
    i2c: I,
    address: u8,
}

impl<I: I2c> I2cFuelGauge<I> {
    /// LTC2944 at its fixed bus address
    pub fn new(i2c: I) -> Self {
        Self::with_address(i2c, LTC2944_I2C_ADDRESS)
    }

    /// Gauge at a non-default 7-bit address
    pub fn with_address(i2c: I, address: u8) -> Self {
        Self { i2c, address }
    }

    /// Give back the I2C bus
    pub fn release(self) -> I {
        self.i2c
    }
}

fn i2c_error<E: i2c::Error>(register: u8) -> impl FnOnce(E) -> BmsError {
    move |e| match e.kind() {
        i2c::ErrorKind::NoAcknowledge(_) => BmsError::NoAcknowledge { register },
        kind => BmsError::I2c(kind),
    }
}

impl<I: I2c> FuelGaugeBus for I2cFuelGauge<I> {
    fn read_byte(&mut self, register: u8) -> Result<u8> {
        let mut value = [0u8; 1];
        self.i2c
            .write_read(self.address, &[register], &mut value)
            .map_err(i2c_error(register))?;
        Ok(value[0])
    }

    fn read_word(&mut self, register: u8) -> Result<u16> {
        let mut value = [0u8; 2];
        self.i2c
            .write_read(self.address, &[register], &mut value)
            .map_err(i2c_error(register))?;
        Ok(u16::from_be_bytes(value))
    }

    fn write_byte(&mut self, register: u8, value: u8) -> Result<()> {
        self.i2c
            .write(self.address, &[register, value])
            .map_err(i2c_error(register))
    }

    fn write_word(&mut self, register: u8, value: u16) -> Result<()> {
        let [msb, lsb] = value.to_be_bytes();
        self.i2c
            .write(self.address, &[register, msb, lsb])
            .map_err(i2c_error(register))
    }
}
