//! Simulated devices for running without hardware.
//!
//! [`SimulatedChain`] answers LTC6811 commands with PEC-correct frames and can
//! corrupt frames, fail whole reads, break sense wires or fail the mux test
//! on chosen ICs.
//! [`SimulatedGauge`] is an LTC2944 register file that logs bus traffic and
//! can refuse to acknowledge chosen registers. [`ManualClock`] and
//! [`ScriptedConsole`] stand in for the clock and the operator.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::console::{Console, Input};
use crate::constants::*;
use crate::error::{BmsError, Result};
use crate::pec::seal;
use crate::transport::{Clock, DaisyChain, FuelGaugeBus, Payload};
use crate::types::{ConversionMode, SelfTest, Wake};

/// Conversion time reported for every poll
const SIMULATED_CONVERSION_TIME: Duration = Duration::from_micros(2335);

#[derive(Debug, Clone)]
struct SimulatedIc {
    // Inputs seen by the ADCs
    cell_inputs: [u16; CELL_CHANNELS],
    aux_inputs: [u16; AUX_CHANNELS],
    open_wires: Vec<u16>,
    mux_fault: bool,
    corrupt_frames: usize,

    // Register contents
    config: [u8; GROUP_DATA_LEN],
    pwm: [u8; GROUP_DATA_LEN],
    sctrl: [u8; GROUP_DATA_LEN],
    comm: [u8; GROUP_DATA_LEN],
    cells: [u16; CELL_CHANNELS],
    aux: [u16; AUX_CHANNELS],
    stat: [u16; STAT_CHANNELS],
    mux_fail: bool,
}

impl Default for SimulatedIc {
    fn default() -> Self {
        Self {
            cell_inputs: [36000; CELL_CHANNELS],
            aux_inputs: [15000, 15000, 15000, 15000, 15000, 30000],
            open_wires: Vec::new(),
            mux_fault: false,
            corrupt_frames: 0,
            config: [0; GROUP_DATA_LEN],
            pwm: [0; GROUP_DATA_LEN],
            sctrl: [0; GROUP_DATA_LEN],
            comm: [0; GROUP_DATA_LEN],
            cells: [CLEARED_CODE; CELL_CHANNELS],
            aux: [CLEARED_CODE; AUX_CHANNELS],
            stat: [CLEARED_CODE; STAT_CHANNELS],
            mux_fail: false,
        }
    }
}

impl SimulatedIc {
    fn adc_option(&self) -> bool {
        self.config[0] & 0x01 != 0
    }

    fn status_inputs(&self) -> [u16; STAT_CHANNELS] {
        let sum: u32 = self.cell_inputs.iter().map(|&c| u32::from(c)).sum();
        // 25 C die, 5 V analog, 3 V digital supply
        [(sum / 20) as u16, 22350, 50000, 30000]
    }

    fn convert_cells(&mut self, channels: u16) {
        for (i, cell) in self.cells.iter_mut().enumerate() {
            if channels == 0 || i as u16 % 6 + 1 == channels {
                *cell = self.cell_inputs[i];
            }
        }
    }

    fn convert_open_wire(&mut self, pull_up: bool) {
        self.cells = self.cell_inputs;
        for &wire in &self.open_wires {
            match (wire as usize, pull_up) {
                (0, true) => self.cells[0] = 0,
                (CELL_CHANNELS, false) => self.cells[CELL_CHANNELS - 1] = 0,
                (w, true) if w < CELL_CHANNELS => self.cells[w] = 0,
                _ => {}
            }
        }
    }

    fn group(codes: &[u16]) -> [u8; GROUP_DATA_LEN] {
        let mut data = [0u8; GROUP_DATA_LEN];
        for (k, code) in codes.iter().take(CODES_PER_GROUP).enumerate() {
            data[2 * k..2 * k + 2].copy_from_slice(&code.to_le_bytes());
        }
        data
    }

    fn read_group(&self, command: u16) -> [u8; GROUP_DATA_LEN] {
        match command {
            RDCFGA => self.config,
            RDPWM => self.pwm,
            RDSCTRL => self.sctrl,
            RDCOMM => self.comm,
            RDCVA => Self::group(&self.cells[0..3]),
            RDCVB => Self::group(&self.cells[3..6]),
            RDCVC => Self::group(&self.cells[6..9]),
            RDCVD => Self::group(&self.cells[9..12]),
            RDAUXA => Self::group(&self.aux[0..3]),
            RDAUXB => Self::group(&self.aux[3..6]),
            RDSTATA => Self::group(&self.stat[0..3]),
            RDSTATB => {
                let [lo, hi] = self.stat[3].to_le_bytes();
                [lo, hi, 0, 0, 0, u8::from(self.mux_fail) << 1]
            }
            _ => [0; GROUP_DATA_LEN],
        }
    }
}

fn conversion_mode(command: u16) -> ConversionMode {
    match ((command >> 8) & 0x01) << 1 | (command >> 7) & 0x01 {
        0 => ConversionMode::Hz422,
        1 => ConversionMode::Khz27,
        2 => ConversionMode::Khz7,
        _ => ConversionMode::Hz26,
    }
}

fn self_test(low: u16) -> SelfTest {
    if low & 0x40 != 0 {
        SelfTest::Two
    } else {
        SelfTest::One
    }
}

/// LTC6811 daisy chain held in memory
#[derive(Debug, Clone)]
pub struct SimulatedChain {
    ics: Vec<SimulatedIc>,
    commands: Vec<u16>,
    wakes: usize,
    conversion_pending: bool,
    failed_reads: usize,
}

impl SimulatedChain {
    pub fn new(total_ic: usize) -> Self {
        Self {
            ics: vec![SimulatedIc::default(); total_ic],
            commands: Vec::new(),
            wakes: 0,
            conversion_pending: false,
            failed_reads: 0,
        }
    }

    /// Voltages presented to the cell inputs of `ic`, in volts
    pub fn set_cell_voltages(&mut self, ic: usize, volts: &[f64]) {
        if let Some(sim) = self.ics.get_mut(ic) {
            for (input, v) in sim.cell_inputs.iter_mut().zip(volts) {
                *input = (v / AFE_CODE_LSB).round().clamp(0.0, 65535.0) as u16;
            }
        }
    }

    /// Break sense wire C`wire` (0..=12) of `ic`
    pub fn open_wire(&mut self, ic: usize, wire: u16) {
        if let Some(sim) = self.ics.get_mut(ic) {
            sim.open_wires.push(wire);
        }
    }

    pub fn set_mux_fault(&mut self, ic: usize, fault: bool) {
        if let Some(sim) = self.ics.get_mut(ic) {
            sim.mux_fault = fault;
        }
    }

    /// Flip a bit in the next `frames` frames returned by `ic`
    pub fn corrupt_frames(&mut self, ic: usize, frames: usize) {
        if let Some(sim) = self.ics.get_mut(ic) {
            sim.corrupt_frames = frames;
        }
    }

    /// Fail the next `reads` read commands with an SPI error
    pub fn fail_reads(&mut self, reads: usize) {
        self.failed_reads = reads;
    }

    /// Every command code received, in order
    pub fn commands(&self) -> &[u16] {
        &self.commands
    }

    pub fn wakes(&self) -> usize {
        self.wakes
    }

    /// Configuration bytes last written to `ic`
    pub fn config(&self, ic: usize) -> Option<[u8; GROUP_DATA_LEN]> {
        self.ics.get(ic).map(|sim| sim.config)
    }

    fn write_groups(&mut self, command: u16, payload: Payload<'_>) {
        let Payload::PerIc(groups) = payload else {
            return;
        };
        for (sim, data) in self.ics.iter_mut().zip(groups) {
            match command {
                WRCFGA => sim.config = *data,
                WRPWM => sim.pwm = *data,
                WRSCTRL => sim.sctrl = *data,
                _ => sim.comm = *data,
            }
        }
    }

    fn convert(&mut self, command: u16) {
        let mode = conversion_mode(command);
        let stripped = command & !0x0180;
        let low = stripped & 0x6F;
        for sim in &mut self.ics {
            if stripped & 0x0200 != 0 {
                match low {
                    0x60..=0x66 => sim.convert_cells(low & 0x07),
                    0x28..=0x2E => sim.convert_open_wire(false),
                    0x68..=0x6E => sim.convert_open_wire(true),
                    0x27 | 0x47 => {
                        sim.cells = [self_test(low).expected_code(mode, sim.adc_option()); CELL_CHANNELS]
                    }
                    0x01 => {
                        sim.cells = sim.cell_inputs;
                        sim.cells[7] = sim.cells[6];
                    }
                    _ => log::warn!("simulated chain ignored command {command:#06x}"),
                }
            } else {
                match low {
                    0x6F => {
                        sim.convert_cells(0);
                        sim.aux[0] = sim.aux_inputs[0];
                        sim.aux[1] = sim.aux_inputs[1];
                    }
                    0x67 => {
                        sim.convert_cells(0);
                        sim.stat[0] = sim.status_inputs()[0];
                    }
                    0x60..=0x66 | 0x00..=0x06 => sim.aux = sim.aux_inputs,
                    0x27 | 0x47 => {
                        sim.aux = [self_test(low).expected_code(mode, sim.adc_option()); AUX_CHANNELS]
                    }
                    0x68..=0x6C | 0x08..=0x0C => sim.stat = sim.status_inputs(),
                    0x2F | 0x4F => {
                        sim.stat = [self_test(low).expected_code(mode, sim.adc_option()); STAT_CHANNELS]
                    }
                    _ => log::warn!("simulated chain ignored command {command:#06x}"),
                }
            }
        }
        self.conversion_pending = true;
    }
}

impl DaisyChain for SimulatedChain {
    fn wake(&mut self, _wake: Wake) -> Result<()> {
        self.wakes += 1;
        Ok(())
    }

    fn send_command(&mut self, command: u16, payload: Payload<'_>) -> Result<()> {
        self.commands.push(command);
        match command {
            WRCFGA | WRPWM | WRSCTRL | WRCOMM => self.write_groups(command, payload),
            CLRCELL => self.ics.iter_mut().for_each(|s| s.cells = [CLEARED_CODE; CELL_CHANNELS]),
            CLRAUX => self.ics.iter_mut().for_each(|s| s.aux = [CLEARED_CODE; AUX_CHANNELS]),
            CLRSTAT => self.ics.iter_mut().for_each(|s| s.stat = [CLEARED_CODE; STAT_CHANNELS]),
            CLRSCTRL => self.ics.iter_mut().for_each(|s| s.sctrl = [0; GROUP_DATA_LEN]),
            STSCTRL | STCOMM => {}
            DIAGN => {
                for sim in &mut self.ics {
                    sim.mux_fail = sim.mux_fault;
                }
                self.conversion_pending = true;
            }
            _ => self.convert(command),
        }
        Ok(())
    }

    fn poll_conversion(&mut self) -> Result<Duration> {
        let pending = std::mem::take(&mut self.conversion_pending);
        Ok(if pending {
            SIMULATED_CONVERSION_TIME
        } else {
            Duration::ZERO
        })
    }

    fn read_back(&mut self, command: u16, ic_count: usize) -> Result<Vec<[u8; GROUP_FRAME_LEN]>> {
        self.commands.push(command);
        if self.failed_reads > 0 {
            self.failed_reads -= 1;
            return Err(BmsError::Spi(embedded_hal::spi::ErrorKind::Other));
        }
        Ok(self
            .ics
            .iter_mut()
            .take(ic_count)
            .map(|sim| {
                let mut frame = seal(sim.read_group(command));
                if sim.corrupt_frames > 0 {
                    sim.corrupt_frames -= 1;
                    frame[0] ^= 0x01;
                }
                frame
            })
            .collect())
    }
}

/// LTC2944 register file
#[derive(Debug, Clone)]
pub struct SimulatedGauge {
    registers: [u8; 0x18],
    nack: HashSet<u8>,
    reads: Vec<u8>,
    writes: Vec<(u8, u16)>,
}

impl Default for SimulatedGauge {
    fn default() -> Self {
        let mut gauge = Self {
            registers: [0; 0x18],
            nack: HashSet::new(),
            reads: Vec::new(),
            writes: Vec::new(),
        };
        gauge.registers[usize::from(LTC2944_CONTROL_REG)] = 0x3C;
        gauge.set_word(LTC2944_ACCUM_CHARGE_MSB_REG, 0x7FFF);
        gauge.set_word(LTC2944_CHARGE_THRESH_HIGH_MSB_REG, 0xFFFF);
        gauge.set_word(LTC2944_VOLTAGE_THRESH_HIGH_MSB_REG, 0xFFFF);
        gauge.set_word(LTC2944_CURRENT_THRESH_HIGH_MSB_REG, 0xFFFF);
        gauge.registers[usize::from(LTC2944_TEMPERATURE_THRESH_HIGH_REG)] = 0xFF;
        // 12.6 V, 100 mA charging, 25 C
        gauge.set_word(LTC2944_VOLTAGE_MSB_REG, 11796);
        gauge.set_word(LTC2944_CURRENT_MSB_REG, 0x7FFF + 5119);
        gauge.set_word(LTC2944_TEMPERATURE_MSB_REG, 38312);
        gauge
    }
}

impl SimulatedGauge {
    pub fn register(&self, register: u8) -> u8 {
        self.registers
            .get(usize::from(register))
            .copied()
            .unwrap_or_default()
    }

    pub fn word(&self, register: u8) -> u16 {
        u16::from_be_bytes([self.register(register), self.register(register.wrapping_add(1))])
    }

    pub fn set_byte(&mut self, register: u8, value: u8) {
        if let Some(slot) = self.registers.get_mut(usize::from(register)) {
            *slot = value;
        }
    }

    pub fn set_word(&mut self, register: u8, value: u16) {
        let [msb, lsb] = value.to_be_bytes();
        self.set_byte(register, msb);
        self.set_byte(register.wrapping_add(1), lsb);
    }

    /// Refuse to acknowledge any access to `register`
    pub fn nack_register(&mut self, register: u8) {
        self.nack.insert(register);
    }

    /// Registers read, in order
    pub fn reads(&self) -> &[u8] {
        &self.reads
    }

    /// Registers written with the value, in order
    pub fn writes(&self) -> &[(u8, u16)] {
        &self.writes
    }

    pub fn clear_log(&mut self) {
        self.reads.clear();
        self.writes.clear();
    }

    fn check(&self, register: u8) -> Result<()> {
        if self.nack.contains(&register) || usize::from(register) >= self.registers.len() {
            Err(BmsError::NoAcknowledge { register })
        } else {
            Ok(())
        }
    }
}

impl FuelGaugeBus for SimulatedGauge {
    fn read_byte(&mut self, register: u8) -> Result<u8> {
        self.check(register)?;
        self.reads.push(register);
        Ok(self.register(register))
    }

    fn read_word(&mut self, register: u8) -> Result<u16> {
        self.check(register)?;
        self.reads.push(register);
        Ok(self.word(register))
    }

    fn write_byte(&mut self, register: u8, value: u8) -> Result<()> {
        self.check(register)?;
        self.writes.push((register, u16::from(value)));
        self.set_byte(register, value);
        Ok(())
    }

    fn write_word(&mut self, register: u8, value: u16) -> Result<()> {
        self.check(register)?;
        self.writes.push((register, value));
        self.set_word(register, value);
        Ok(())
    }
}

/// Clock that advances only when asked to delay
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    start: DateTime<Utc>,
    delays: Vec<Duration>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            start,
            delays: Vec::new(),
        }
    }

    /// Every delay requested, in order
    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }

    pub fn elapsed(&self) -> Duration {
        self.delays.iter().sum()
    }
}

impl Clock for ManualClock {
    fn delay(&mut self, duration: Duration) {
        self.delays.push(duration);
    }

    fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.elapsed())
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.start + elapsed
    }
}

/// Console replaying a fixed list of tokens.
///
/// `poll_input` reports nothing for the first `idle_polls` calls, then hands
/// out the queued tokens. Once the queue is empty it behaves like a closed
/// console: `read_input` fails and `poll_input` returns the menu token.
#[derive(Debug, Clone, Default)]
pub struct ScriptedConsole {
    inputs: VecDeque<Input>,
    idle_polls: usize,
}

impl ScriptedConsole {
    pub fn new(inputs: impl IntoIterator<Item = Input>) -> Self {
        Self {
            inputs: inputs.into_iter().collect(),
            idle_polls: 0,
        }
    }

    /// Parse whitespace-separated tokens, e.g. `"1 2 4.2 m"`
    pub fn from_tokens(tokens: &str) -> Result<Self> {
        let inputs = tokens
            .split_whitespace()
            .map(str::parse)
            .collect::<Result<Vec<Input>>>()?;
        Ok(Self::new(inputs))
    }

    pub fn with_idle_polls(mut self, idle_polls: usize) -> Self {
        self.idle_polls = idle_polls;
        self
    }

    pub fn remaining(&self) -> usize {
        self.inputs.len()
    }
}

impl Console for ScriptedConsole {
    fn read_input(&mut self) -> Result<Input> {
        self.inputs.pop_front().ok_or(BmsError::InputClosed)
    }

    fn poll_input(&mut self) -> Option<Input> {
        if self.idle_polls > 0 {
            self.idle_polls -= 1;
            return None;
        }
        Some(self.inputs.pop_front().unwrap_or(Input::Menu))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pec::{PacketIntegrity, Pec15};

    #[test]
    fn frames_carry_valid_pec() {
        let mut chain = SimulatedChain::new(2);
        chain.send_command(ADCV | 0x0100, Payload::None).unwrap();
        let frames = chain.read_back(RDCVA, 2).unwrap();
        assert!(frames.iter().all(|f| Pec15.verify(f)));
        assert_eq!(u16::from_le_bytes([frames[0][0], frames[0][1]]), 36000);
    }

    #[test]
    fn corruption_is_limited_to_one_ic() {
        let mut chain = SimulatedChain::new(2);
        chain.corrupt_frames(1, 1);
        let frames = chain.read_back(RDCFGA, 2).unwrap();
        assert!(Pec15.verify(&frames[0]));
        assert!(!Pec15.verify(&frames[1]));
        let frames = chain.read_back(RDCFGA, 2).unwrap();
        assert!(Pec15.verify(&frames[1]));
    }

    #[test]
    fn gauge_logs_and_nacks() {
        let mut gauge = SimulatedGauge::default();
        gauge.nack_register(LTC2944_STATUS_REG);
        assert!(gauge.read_byte(LTC2944_STATUS_REG).is_err());
        gauge.write_word(LTC2944_VOLTAGE_THRESH_HIGH_MSB_REG, 0x1234).unwrap();
        assert_eq!(gauge.word(LTC2944_VOLTAGE_THRESH_HIGH_MSB_REG), 0x1234);
        assert_eq!(gauge.writes(), &[(LTC2944_VOLTAGE_THRESH_HIGH_MSB_REG, 0x1234)]);
    }

    #[test]
    fn scripted_console_closes_with_menu() {
        let mut console = ScriptedConsole::from_tokens("3 m").unwrap().with_idle_polls(1);
        assert_eq!(console.poll_input(), None);
        assert_eq!(console.poll_input(), Some(Input::Number(3.0)));
        assert_eq!(console.read_input().unwrap(), Input::Menu);
        assert!(console.read_input().is_err());
        assert_eq!(console.poll_input(), Some(Input::Menu));
    }
}
