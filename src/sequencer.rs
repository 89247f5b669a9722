//! Ordering of wake, conversion, poll and read-back on the daisy chain.
//!
//! Every measurement follows the same path through [`SequencerState`]:
//!
//! ```text
//! Idle -> Awake -> ConversionStarted -> Polling -> ResultsAvailable
//! ```
//!
//! A wake is accepted in any state and only moves `Idle` forward. Starting a
//! conversion needs an awake chain, polling needs a started conversion, and
//! reads need an awake chain. Steps issued out of order fail with
//! [`BmsError::OutOfSequence`] before anything reaches the transport.

use std::time::Duration;

use crate::config::DeviceConfiguration;
use crate::constants::*;
use crate::error::{BmsError, Result};
use crate::pec::{PacketIntegrity, Pec15};
use crate::register::{AnalogFrontEnd, Chain, OpenWire, ReadOutcome, Readback, RegisterGroup};
use crate::transport::{DaisyChain, Payload};
use crate::types::*;

/// Verification result of the last read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    Verified,
    CrcError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencerState {
    Idle,
    Awake,
    ConversionStarted,
    Polling,
    ResultsAvailable(Verification),
}

/// ADC operations that end with a conversion the host has to wait for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversion {
    Cells {
        mode: ConversionMode,
        discharge: bool,
        channels: CellChannels,
    },
    Aux {
        mode: ConversionMode,
        channels: AuxChannels,
    },
    Status {
        mode: ConversionMode,
        channels: StatChannels,
    },
    /// Cells plus GPIO1 and GPIO2
    CellsAndGpio { mode: ConversionMode, discharge: bool },
    /// Cells plus the sum-of-cells status measurement
    CellsAndSum { mode: ConversionMode, discharge: bool },
    CellSelfTest { mode: ConversionMode, test: SelfTest },
    AuxSelfTest { mode: ConversionMode, test: SelfTest },
    StatusSelfTest { mode: ConversionMode, test: SelfTest },
    /// Cell 7 measured by both ADCs
    Overlap { mode: ConversionMode, discharge: bool },
    AuxRedundancy {
        mode: ConversionMode,
        channels: AuxChannels,
    },
    StatusRedundancy {
        mode: ConversionMode,
        channels: StatChannels,
    },
    OpenWire {
        mode: ConversionMode,
        pull_up: bool,
        discharge: bool,
        channels: CellChannels,
    },
    MuxDiagnostic,
}

impl Conversion {
    pub fn command(self) -> u16 {
        let flag = |set: bool, shift: u16| u16::from(set) << shift;
        match self {
            Conversion::Cells {
                mode,
                discharge,
                channels,
            } => mode.apply(ADCV) | flag(discharge, 4) | channels.bits(),
            Conversion::Aux { mode, channels } => mode.apply(ADAX) | channels.bits(),
            Conversion::Status { mode, channels } => mode.apply(ADSTAT) | channels.bits(),
            Conversion::CellsAndGpio { mode, discharge } => mode.apply(ADCVAX) | flag(discharge, 4),
            Conversion::CellsAndSum { mode, discharge } => mode.apply(ADCVSC) | flag(discharge, 4),
            Conversion::CellSelfTest { mode, test } => mode.apply(CVST) | test.bits() << 5,
            Conversion::AuxSelfTest { mode, test } => mode.apply(AXST) | test.bits() << 5,
            Conversion::StatusSelfTest { mode, test } => mode.apply(STATST) | test.bits() << 5,
            Conversion::Overlap { mode, discharge } => mode.apply(ADOL) | flag(discharge, 4),
            Conversion::AuxRedundancy { mode, channels } => mode.apply(ADAXD) | channels.bits(),
            Conversion::StatusRedundancy { mode, channels } => {
                mode.apply(ADSTATD) | channels.bits()
            }
            Conversion::OpenWire {
                mode,
                pull_up,
                discharge,
                channels,
            } => mode.apply(ADOW) | flag(pull_up, 6) | flag(discharge, 4) | channels.bits(),
            Conversion::MuxDiagnostic => DIAGN,
        }
    }
}

/// Register groups the host writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteGroup {
    Config,
    Pwm,
    SControl,
    Comm,
}

impl WriteGroup {
    fn command(self) -> u16 {
        match self {
            WriteGroup::Config => WRCFGA,
            WriteGroup::Pwm => WRPWM,
            WriteGroup::SControl => WRSCTRL,
            WriteGroup::Comm => WRCOMM,
        }
    }

    fn group(self, ic: &AnalogFrontEnd) -> &RegisterGroup {
        match self {
            WriteGroup::Config => &ic.config,
            WriteGroup::Pwm => &ic.pwm,
            WriteGroup::SControl => &ic.sctrl,
            WriteGroup::Comm => &ic.com,
        }
    }
}

/// Error count of a self test, alongside which ICs could not be checked
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TestResult {
    pub errors: u32,
    pub outcome: ReadOutcome,
}

/// Drives one daisy chain and owns its register model
pub struct MeasurementSequencer<T> {
    transport: T,
    verifier: Box<dyn PacketIntegrity>,
    chain: Chain,
    state: SequencerState,
    last_conversion_time: Option<Duration>,
}

impl<T: DaisyChain> MeasurementSequencer<T> {
    pub fn new(transport: T, total_ic: usize) -> Self {
        Self::with_verifier(transport, total_ic, Pec15)
    }

    pub fn with_verifier(
        transport: T,
        total_ic: usize,
        verifier: impl PacketIntegrity + 'static,
    ) -> Self {
        Self {
            transport,
            verifier: Box::new(verifier),
            chain: Chain::new(total_ic),
            state: SequencerState::Idle,
            last_conversion_time: None,
        }
    }

    pub fn state(&self) -> SequencerState {
        self.state
    }

    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    pub fn chain_mut(&mut self) -> &mut Chain {
        &mut self.chain
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Duration reported by the most recent poll
    pub fn last_conversion_time(&self) -> Option<Duration> {
        self.last_conversion_time
    }

    /// Forget the wake state; the chain drops back to sleep between commands
    pub fn release(&mut self) {
        self.state = SequencerState::Idle;
    }

    fn require_awake(&self, step: &'static str) -> Result<()> {
        match self.state {
            SequencerState::Idle => Err(BmsError::OutOfSequence {
                step,
                state: self.state,
            }),
            _ => Ok(()),
        }
    }

    pub fn wake(&mut self, wake: Wake) -> Result<()> {
        self.transport.wake(wake)?;
        if self.state == SequencerState::Idle {
            self.state = SequencerState::Awake;
        }
        Ok(())
    }

    pub fn start(&mut self, conversion: Conversion) -> Result<()> {
        self.require_awake("start conversion")?;
        if self.state == SequencerState::ConversionStarted {
            return Err(BmsError::OutOfSequence {
                step: "start conversion",
                state: self.state,
            });
        }
        self.transport.send_command(conversion.command(), Payload::None)?;
        self.state = SequencerState::ConversionStarted;
        Ok(())
    }

    pub fn poll(&mut self) -> Result<Duration> {
        if self.state != SequencerState::ConversionStarted {
            return Err(BmsError::OutOfSequence {
                step: "poll",
                state: self.state,
            });
        }
        self.state = SequencerState::Polling;
        let elapsed = self.transport.poll_conversion()?;
        log::debug!("conversion completed in {} us", elapsed.as_micros());
        self.last_conversion_time = Some(elapsed);
        Ok(elapsed)
    }

    /// Start a conversion and wait for it
    pub fn convert(&mut self, conversion: Conversion) -> Result<Duration> {
        self.start(conversion)?;
        self.poll()
    }

    /// Send a command that takes no data and starts no conversion
    pub fn command(&mut self, command: u16) -> Result<()> {
        self.require_awake("command")?;
        self.transport.send_command(command, Payload::None)
    }

    /// Fetch register groups from every IC and commit the ones that verify.
    ///
    /// A read the transport cannot complete counts as a verification failure
    /// on every IC; nothing is committed for that read.
    pub fn read(&mut self, readbacks: &[Readback]) -> Result<ReadOutcome> {
        self.require_awake("read")?;
        let ic_count = self.chain.len();
        let mut reads = Vec::with_capacity(readbacks.len());
        for &readback in readbacks {
            match self.transport.read_back(readback.command(), ic_count) {
                Ok(frames) => reads.push((readback, frames)),
                Err(e) => {
                    log::warn!("read {:#06x} failed: {e}", readback.command());
                    let outcome = self.chain.reject_all();
                    self.state = SequencerState::ResultsAvailable(Verification::CrcError);
                    return Ok(outcome);
                }
            }
        }
        let outcome = self.chain.commit(&reads, self.verifier.as_ref());
        self.state = SequencerState::ResultsAvailable(if outcome.is_verified() {
            Verification::Verified
        } else {
            Verification::CrcError
        });
        Ok(outcome)
    }

    /// Send the tx buffers of `group` to every IC
    pub fn write(&mut self, group: WriteGroup) -> Result<()> {
        self.require_awake("write")?;
        let data: Vec<[u8; GROUP_DATA_LEN]> = self
            .chain
            .ics()
            .iter()
            .map(|ic| *group.group(ic).tx())
            .collect();
        self.transport
            .send_command(group.command(), Payload::PerIc(&data))
    }

    pub fn write_config(&mut self, config: &DeviceConfiguration) -> Result<()> {
        let bytes = config.encode();
        for ic in self.chain.ics_mut() {
            ic.config.set_tx(bytes);
        }
        self.write(WriteGroup::Config)
    }

    pub fn read_config(&mut self) -> Result<ReadOutcome> {
        self.read(&[Readback::Config])
    }

    pub fn read_cells(&mut self, select: RegisterSelect) -> Result<ReadOutcome> {
        self.read(&Readback::cells(select))
    }

    pub fn read_aux(&mut self, select: RegisterSelect) -> Result<ReadOutcome> {
        self.read(&Readback::aux(select)?)
    }

    pub fn read_stat(&mut self, select: RegisterSelect) -> Result<ReadOutcome> {
        self.read(&Readback::stat(select)?)
    }

    /// Shift `bytes` COMM bytes out of the GPIO I2C/SPI master
    pub fn start_comm(&mut self, bytes: usize) -> Result<()> {
        self.require_awake("start comm")?;
        self.transport
            .send_command(STCOMM, Payload::Clocks(bytes * 3))
    }

    /// Clear, convert with a digital test pattern and compare every code read back
    pub fn run_self_test(
        &mut self,
        register: AdcRegister,
        mode: ConversionMode,
        adc_option: bool,
    ) -> Result<TestResult> {
        let mut result = TestResult::default();
        for test in [SelfTest::One, SelfTest::Two] {
            let expected = test.expected_code(mode, adc_option);
            self.wake(Wake::FromIdle)?;
            let outcome = match register {
                AdcRegister::Cell => {
                    self.command(CLRCELL)?;
                    self.convert(Conversion::CellSelfTest { mode, test })?;
                    self.wake(Wake::FromIdle)?;
                    self.read_cells(RegisterSelect::All)?
                }
                AdcRegister::Aux => {
                    self.command(CLRAUX)?;
                    self.convert(Conversion::AuxSelfTest { mode, test })?;
                    self.wake(Wake::FromIdle)?;
                    self.read_aux(RegisterSelect::All)?
                }
                AdcRegister::Stat => {
                    self.command(CLRSTAT)?;
                    self.convert(Conversion::StatusSelfTest { mode, test })?;
                    self.wake(Wake::FromIdle)?;
                    self.read_stat(RegisterSelect::All)?
                }
            };
            result.errors += self.count_codes(register, &outcome, |code| code != expected);
            result.outcome.merge(outcome);
        }
        Ok(result)
    }

    /// Compare cell 7 as measured by ADC1 and ADC2; counts ICs that disagree
    pub fn run_overlap_test(&mut self, mode: ConversionMode) -> Result<TestResult> {
        self.wake(Wake::FromIdle)?;
        self.convert(Conversion::Overlap {
            mode,
            discharge: false,
        })?;
        self.wake(Wake::FromIdle)?;
        let outcome = self.read_cells(RegisterSelect::All)?;
        let errors = self
            .verified_ics(&outcome)
            .filter(|ic| {
                let codes = ic.cell_codes();
                let delta = i32::from(codes[6]) - i32::from(codes[7]);
                delta.abs() > OVERLAP_TOLERANCE
            })
            .count() as u32;
        Ok(TestResult { errors, outcome })
    }

    /// Redundant digital filter conversion; any code at the fault floor counts
    pub fn run_redundancy_test(
        &mut self,
        register: AdcRegister,
        mode: ConversionMode,
    ) -> Result<TestResult> {
        self.wake(Wake::FromIdle)?;
        let outcome = match register {
            AdcRegister::Aux => {
                self.command(CLRAUX)?;
                self.convert(Conversion::AuxRedundancy {
                    mode,
                    channels: AuxChannels::All,
                })?;
                self.wake(Wake::FromIdle)?;
                self.read_aux(RegisterSelect::All)?
            }
            AdcRegister::Stat => {
                self.command(CLRSTAT)?;
                self.convert(Conversion::StatusRedundancy {
                    mode,
                    channels: StatChannels::All,
                })?;
                self.wake(Wake::FromIdle)?;
                self.read_stat(RegisterSelect::All)?
            }
            AdcRegister::Cell => {
                return Err(BmsError::InvalidInput(
                    "cell registers have no redundancy test".into(),
                ))
            }
        };
        let errors = self.count_codes(register, &outcome, |code| code >= REDUNDANCY_FAULT_CODE);
        Ok(TestResult { errors, outcome })
    }

    /// Multiplexer decoder self test; one pass flag per IC
    pub fn run_mux_test(&mut self) -> Result<(Vec<bool>, ReadOutcome)> {
        self.convert(Conversion::MuxDiagnostic)?;
        let outcome = self.read_stat(RegisterSelect::GroupB)?;
        let passed = self
            .chain
            .ics()
            .iter()
            .map(|ic| !ic.status_codes().mux_fail)
            .collect();
        Ok((passed, outcome))
    }

    /// Open-wire check recording one open wire per IC in `system_open_wire`
    pub fn run_open_wire_single(&mut self, mode: ConversionMode) -> Result<ReadOutcome> {
        let (opens, outcome) = self.open_wire_scan(mode)?;
        for (index, wires) in opens.iter().enumerate() {
            if outcome.failed.contains(&index) {
                continue;
            }
            let found = wires.first().copied().map(OpenWire).unwrap_or(OpenWire::NONE);
            if found.is_fault() {
                log::warn!("open wire C{} on IC {}", found.0, index + 1);
            }
            self.chain.ics_mut()[index].system_open_wire = found;
        }
        Ok(outcome)
    }

    /// Open-wire check reporting every open wire per IC
    pub fn run_open_wire_multi(&mut self, mode: ConversionMode) -> Result<(Vec<Vec<u16>>, ReadOutcome)> {
        let (mut opens, outcome) = self.open_wire_scan(mode)?;
        for &index in &outcome.failed {
            opens[index].clear();
        }
        for (index, ic) in self.chain.ics_mut().iter_mut().enumerate() {
            if !outcome.failed.contains(&index) {
                ic.system_open_wire = opens[index].first().copied().map(OpenWire).unwrap_or(OpenWire::NONE);
            }
        }
        Ok((opens, outcome))
    }

    fn open_wire_scan(&mut self, mode: ConversionMode) -> Result<(Vec<Vec<u16>>, ReadOutcome)> {
        let (pull_up, mut outcome) = self.open_wire_codes(mode, true)?;
        let (pull_down, down_outcome) = self.open_wire_codes(mode, false)?;
        outcome.merge(down_outcome);

        let opens = pull_up
            .iter()
            .zip(&pull_down)
            .map(|(up, down)| open_wires(up, down))
            .collect();
        Ok((opens, outcome))
    }

    fn open_wire_codes(
        &mut self,
        mode: ConversionMode,
        pull_up: bool,
    ) -> Result<(Vec<[u16; CELL_CHANNELS]>, ReadOutcome)> {
        self.wake(Wake::FromSleep)?;
        for _ in 0..OPEN_WIRE_REPEATS {
            self.convert(Conversion::OpenWire {
                mode,
                pull_up,
                discharge: false,
                channels: CellChannels::All,
            })?;
        }
        self.wake(Wake::FromIdle)?;
        let outcome = self.read_cells(RegisterSelect::All)?;
        let codes = self.chain.ics().iter().map(|ic| *ic.cell_codes()).collect();
        Ok((codes, outcome))
    }

    fn verified_ics<'a>(
        &'a self,
        outcome: &'a ReadOutcome,
    ) -> impl Iterator<Item = &'a AnalogFrontEnd> + 'a {
        self.chain
            .ics()
            .iter()
            .enumerate()
            .filter(move |(index, _)| !outcome.failed.contains(index))
            .map(|(_, ic)| ic)
    }

    fn count_codes(
        &self,
        register: AdcRegister,
        outcome: &ReadOutcome,
        is_error: impl Fn(u16) -> bool,
    ) -> u32 {
        self.verified_ics(outcome)
            .map(|ic| {
                let codes: &[u16] = match register {
                    AdcRegister::Cell => ic.cell_codes(),
                    AdcRegister::Aux => ic.aux_codes(),
                    AdcRegister::Stat => &ic.status_codes().codes,
                };
                codes.iter().filter(|&&code| is_error(code)).count() as u32
            })
            .sum()
    }
}

/// Open sense wires from pull-up and pull-down cell codes.
///
/// Wire n (1..=11) is open when the pull-up reading of cell n+1 is more than
/// the threshold below its pull-down reading. Wire 0 is open when cell 1
/// reads zero with pull-up current, wire 12 when cell 12 reads zero with
/// pull-down current.
pub fn open_wires(pull_up: &[u16; CELL_CHANNELS], pull_down: &[u16; CELL_CHANNELS]) -> Vec<u16> {
    let mut wires = Vec::new();
    if pull_up[0] == 0 {
        wires.push(0);
    }
    for cell in 1..CELL_CHANNELS {
        let delta = i32::from(pull_up[cell]) - i32::from(pull_down[cell]);
        if delta < -OPEN_WIRE_THRESHOLD {
            wires.push(cell as u16);
        }
    }
    if pull_down[CELL_CHANNELS - 1] == 0 {
        wires.push(CELL_CHANNELS as u16);
    }
    wires
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversion_commands() {
        let mode = ConversionMode::Khz7;
        let adcv = Conversion::Cells {
            mode,
            discharge: true,
            channels: CellChannels::All,
        };
        assert_eq!(adcv.command(), 0x0370);
        let adax = Conversion::Aux {
            mode,
            channels: AuxChannels::All,
        };
        assert_eq!(adax.command(), 0x0560);
        let adow_pu = Conversion::OpenWire {
            mode: ConversionMode::Khz27,
            pull_up: true,
            discharge: false,
            channels: CellChannels::All,
        };
        assert_eq!(adow_pu.command(), 0x02E8);
        let cvst = Conversion::CellSelfTest {
            mode,
            test: SelfTest::Two,
        };
        assert_eq!(cvst.command(), 0x0347);
        assert_eq!(Conversion::MuxDiagnostic.command(), DIAGN);
    }

    #[test]
    fn failed_read_leaves_results_unverified() {
        let mut transport = crate::sim::SimulatedChain::new(2);
        transport.fail_reads(1);
        let mut sequencer = MeasurementSequencer::new(transport, 2);
        sequencer.wake(Wake::FromSleep).unwrap();

        let outcome = sequencer.read_cells(RegisterSelect::All).unwrap();

        assert_eq!(outcome.failed, vec![0, 1]);
        assert_eq!(
            sequencer.state(),
            SequencerState::ResultsAvailable(Verification::CrcError)
        );
        assert_eq!(sequencer.chain().crc_counts(), vec![1, 1]);
        assert_eq!(sequencer.chain().ic(0).unwrap().cell_codes(), &[CLEARED_CODE; CELL_CHANNELS]);

        // The next read goes through again
        let outcome = sequencer.read_cells(RegisterSelect::All).unwrap();
        assert!(outcome.is_verified());
        assert_eq!(sequencer.chain().crc_counts(), vec![1, 1]);
    }

    #[test]
    fn open_wire_rules() {
        let healthy = [36000u16; CELL_CHANNELS];
        assert!(open_wires(&healthy, &healthy).is_empty());

        // Wire C4 broken: cell 5 collapses under pull-up current
        let mut up = healthy;
        up[4] = 20000;
        assert_eq!(open_wires(&up, &healthy), vec![4]);

        let mut up = healthy;
        up[0] = 0;
        let mut down = healthy;
        down[11] = 0;
        assert_eq!(open_wires(&up, &down), vec![0, 12]);
    }
}
