//! Opcode-driven command execution.
//!
//! [`CommandDispatcher`] owns the sequencer, the fuel gauge, the device
//! configuration and the clock. Every command ends with the chain released
//! back to `Idle` and a [`DispatchOutcome`]; no failure leaves the dispatcher
//! unable to take the next opcode.

use std::time::Duration;

use crate::config::{BoardSettings, DeviceConfiguration};
use crate::console::{Console, Input};
use crate::constants::*;
use crate::error::{BmsError, Result};
use crate::fuel_gauge::{AckStatus, FuelGauge, FuelGaugeSession};
use crate::presentation::Presenter;
use crate::register::{ReadOutcome, Readback};
use crate::sequencer::{Conversion, MeasurementSequencer, WriteGroup};
use crate::settings::run_settings;
use crate::transport::{Clock, DaisyChain, FuelGaugeBus};
use crate::types::*;

/// Main menu shown for the `m` token
pub const MENU: &str = "\
List of LTC6811 Commands:
 Write and Read Configuration: 1                      |Loop measurements with datalog output: 12   |Set Discharge: 23
 Read Configuration: 2                                |Clear Registers: 13                         |Clear Discharge: 24
 Start Cell Voltage Conversion: 3                     |Run Mux Self Test: 15                       |Write and Read of PWM: 25
 Read Cell Voltages: 4                                |Run ADC Self Test: 16                       |Write and Read of S control: 26
 Start Aux Voltage Conversion: 5                      |ADC overlap Test: 17                        |Clear S control register: 27
 Read Aux Voltages: 6                                 |Run Digital Redundancy Test: 18             |SPI Communication: 28
 Start Stat Voltage Conversion: 7                     |Open Wire Test for single cell: 19          |I2C Communication Write to Slave: 29
 Read Stat Voltages: 8                                |Open Wire Test for multiple cells: 20       |I2C Communication Read from Slave: 30
 Start Combined Cell Voltage and GPIO1, GPIO2 Conversion and Poll Status: 9
 Start Cell Voltage and Sum of cells Conversion and Poll Status: 10
 Loop Measurements: 11                                |Print PEC Counter: 21                       |Set GPIO Configuration: 31
 Measure Cells, Aux and Stat: 14                      |Reset PEC Counter: 22
LTC2944 Commands:
 Automatic Mode: 41  Scan Mode: 42  Manual Mode: 43  Sleep Mode: 44  Shutdown Mode: 45  Settings: 46
 Loop Measurements with Fuel Gauge: 47

Print 'm' for menu
Please enter command:";

/// One operator command with its parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    WriteReadConfig,
    ReadConfig,
    StartCells,
    ReadCells,
    StartAux,
    ReadAux,
    StartStatus,
    ReadStatus,
    CellsAndGpio,
    CellsAndSum,
    /// Continuous measurement until the menu token; `datalog` selects the compact layout
    MeasurementLoop { datalog: bool },
    ClearAndRead,
    MeasureAll,
    MuxTest,
    SelfTest,
    Overlap,
    Redundancy,
    OpenWireSingle,
    OpenWireMulti,
    PecCount,
    ResetPecCount,
    /// Close the discharge switch on S pin `pin` (1-based)
    SetDischarge { pin: u8 },
    ClearDischarge,
    Pwm,
    SControl,
    ClearSControl,
    SpiComm,
    I2cWrite,
    I2cRead,
    GpioConfig,
    FuelGauge(FuelGaugeMode),
    Settings,
    /// Measurement loop plus a scan-mode fuel gauge reading each pass
    CombinedLoop,
}

impl Command {
    /// Map an opcode to a command, prompting for any parameter it needs
    pub fn resolve(
        opcode: u32,
        console: &mut dyn Console,
        presenter: &mut dyn Presenter,
    ) -> Result<Command> {
        let command = match opcode {
            1 => Command::WriteReadConfig,
            2 => Command::ReadConfig,
            3 => Command::StartCells,
            4 => Command::ReadCells,
            5 => Command::StartAux,
            6 => Command::ReadAux,
            7 => Command::StartStatus,
            8 => Command::ReadStatus,
            9 => Command::CellsAndGpio,
            10 => Command::CellsAndSum,
            11 => Command::MeasurementLoop { datalog: false },
            12 => Command::MeasurementLoop { datalog: true },
            13 => Command::ClearAndRead,
            14 => Command::MeasureAll,
            15 => Command::MuxTest,
            16 => Command::SelfTest,
            17 => Command::Overlap,
            18 => Command::Redundancy,
            19 => Command::OpenWireSingle,
            20 => Command::OpenWireMulti,
            21 => Command::PecCount,
            22 => Command::ResetPecCount,
            23 => {
                presenter.present(Report::Prompt("Please enter the Spin number".into()));
                let input = console.read_input()?;
                let pin = input
                    .selection()
                    .and_then(|n| u8::try_from(n).ok())
                    .ok_or_else(|| BmsError::InvalidInput(format!("S pin {input:?}")))?;
                Command::SetDischarge { pin }
            }
            24 => Command::ClearDischarge,
            25 => Command::Pwm,
            26 => Command::SControl,
            27 => Command::ClearSControl,
            28 => Command::SpiComm,
            29 => Command::I2cWrite,
            30 => Command::I2cRead,
            31 => Command::GpioConfig,
            41 => Command::FuelGauge(FuelGaugeMode::Automatic),
            42 => Command::FuelGauge(FuelGaugeMode::Scan),
            43 => Command::FuelGauge(FuelGaugeMode::Manual),
            44 => Command::FuelGauge(FuelGaugeMode::Sleep),
            45 => Command::FuelGauge(FuelGaugeMode::Shutdown),
            46 => Command::Settings,
            47 => Command::CombinedLoop,
            other => return Err(BmsError::UnknownCommand(other)),
        };
        Ok(command)
    }
}

/// How a command ended
#[derive(Debug)]
pub enum DispatchOutcome {
    Completed,
    /// Some ICs failed PEC verification and kept their previous data
    Partial { failed_ics: Vec<usize> },
    NoAcknowledge { register: u8 },
    UnknownCommand(u32),
    Failed(BmsError),
    /// The menu token was entered instead of an opcode
    ShowMenu,
}

impl DispatchOutcome {
    fn from_result(result: Result<ReadOutcome>) -> Self {
        match result {
            Ok(outcome) if outcome.is_verified() => DispatchOutcome::Completed,
            Ok(outcome) => DispatchOutcome::Partial {
                failed_ics: outcome.failed,
            },
            Err(BmsError::NoAcknowledge { register }) => DispatchOutcome::NoAcknowledge { register },
            Err(BmsError::UnknownCommand(opcode)) => DispatchOutcome::UnknownCommand(opcode),
            Err(e) => DispatchOutcome::Failed(e),
        }
    }
}

fn millis(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

fn micros(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX)
}

/// Runs operator commands against one daisy chain and one fuel gauge
pub struct CommandDispatcher<T, B, C> {
    sequencer: MeasurementSequencer<T>,
    gauge: FuelGauge<B>,
    config: DeviceConfiguration,
    settings: BoardSettings,
    clock: C,
}

impl<T: DaisyChain, B: FuelGaugeBus, C: Clock> CommandDispatcher<T, B, C> {
    pub fn new(transport: T, bus: B, clock: C, settings: BoardSettings) -> Self {
        let session = FuelGaugeSession::new(settings.sense_resistor, settings.gauge_scale);
        Self {
            sequencer: MeasurementSequencer::new(transport, settings.total_ic),
            gauge: FuelGauge::new(bus, session),
            config: DeviceConfiguration::from_settings(&settings),
            settings,
            clock,
        }
    }

    pub fn sequencer(&self) -> &MeasurementSequencer<T> {
        &self.sequencer
    }

    pub fn sequencer_mut(&mut self) -> &mut MeasurementSequencer<T> {
        &mut self.sequencer
    }

    pub fn gauge(&self) -> &FuelGauge<B> {
        &self.gauge
    }

    pub fn gauge_mut(&mut self) -> &mut FuelGauge<B> {
        &mut self.gauge
    }

    pub fn config(&self) -> &DeviceConfiguration {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut DeviceConfiguration {
        &mut self.config
    }

    pub fn settings(&self) -> &BoardSettings {
        &self.settings
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Show the menu, then execute tokens until the console closes
    pub fn run(&mut self, console: &mut dyn Console, presenter: &mut dyn Presenter) -> Result<()> {
        presenter.present(Report::Prompt(MENU.into()));
        loop {
            let input = match console.read_input() {
                Ok(input) => input,
                Err(BmsError::InputClosed) => return Ok(()),
                Err(e) => return Err(e),
            };
            match self.execute_input(input, console, presenter) {
                DispatchOutcome::ShowMenu => presenter.present(Report::Prompt(MENU.into())),
                DispatchOutcome::UnknownCommand(opcode) => {
                    presenter.present(Report::Notice(format!("Incorrect Option: {opcode}")))
                }
                DispatchOutcome::Failed(e) => presenter.present(Report::Notice(e.to_string())),
                DispatchOutcome::NoAcknowledge { register } => presenter.present(Report::Notice(
                    format!("No Acknowledge from LTC2944 at register {register:#04x}"),
                )),
                DispatchOutcome::Completed | DispatchOutcome::Partial { .. } => {}
            }
            presenter.present(Report::Prompt("Please enter command:".into()));
        }
    }

    /// Execute a console token: an opcode, or the menu sentinel
    pub fn execute_input(
        &mut self,
        input: Input,
        console: &mut dyn Console,
        presenter: &mut dyn Presenter,
    ) -> DispatchOutcome {
        match input {
            Input::Menu => DispatchOutcome::ShowMenu,
            Input::Number(n) => match input.selection() {
                Some(opcode) => self.execute(opcode, console, presenter),
                None => DispatchOutcome::Failed(BmsError::InvalidInput(format!("opcode {n}"))),
            },
        }
    }

    /// Execute one opcode
    pub fn execute(
        &mut self,
        opcode: u32,
        console: &mut dyn Console,
        presenter: &mut dyn Presenter,
    ) -> DispatchOutcome {
        let command = match Command::resolve(opcode, console, presenter) {
            Ok(command) => command,
            Err(e) => {
                log::warn!("opcode {opcode}: {e}");
                return DispatchOutcome::from_result(Err(e));
            }
        };
        log::debug!("opcode {opcode} -> {command:?}");
        let result = self.dispatch(command, console, presenter);
        self.sequencer.release();
        if let Err(e) = &result {
            log::warn!("{command:?} failed: {e}");
        }
        DispatchOutcome::from_result(result)
    }

    fn dispatch(
        &mut self,
        command: Command,
        console: &mut dyn Console,
        presenter: &mut dyn Presenter,
    ) -> Result<ReadOutcome> {
        let mode = self.settings.conversion_mode;
        let discharge = self.settings.discharge_permitted;
        let mut outcome = ReadOutcome::default();

        match command {
            Command::WriteReadConfig => {
                self.write_config(presenter)?;
                outcome = self.read_config(presenter)?;
            }
            Command::GpioConfig => self.write_config(presenter)?,
            Command::ReadConfig => outcome = self.read_config(presenter)?,
            Command::StartCells => self.start(
                Conversion::Cells {
                    mode,
                    discharge,
                    channels: self.settings.cell_channels,
                },
                presenter,
            )?,
            Command::ReadCells => outcome = self.read_cells(false, presenter)?,
            Command::StartAux => self.start(
                Conversion::Aux {
                    mode,
                    channels: self.settings.aux_channels,
                },
                presenter,
            )?,
            Command::ReadAux => outcome = self.read_aux(RegisterSelect::All, false, presenter)?,
            Command::StartStatus => self.start(
                Conversion::Status {
                    mode,
                    channels: self.settings.stat_channels,
                },
                presenter,
            )?,
            Command::ReadStatus => outcome = self.read_status(RegisterSelect::All, presenter)?,
            Command::CellsAndGpio => {
                self.start(Conversion::CellsAndGpio { mode, discharge }, presenter)?;
                outcome = self.read_cells(false, presenter)?;
                outcome.merge(self.read_aux(RegisterSelect::GroupA, false, presenter)?);
            }
            Command::CellsAndSum => {
                self.start(Conversion::CellsAndSum { mode, discharge }, presenter)?;
                outcome = self.read_cells(false, presenter)?;
                self.sequencer.wake(Wake::FromIdle)?;
                let stat = self.sequencer.read_stat(RegisterSelect::GroupA)?;
                let socs = self
                    .sequencer
                    .chain()
                    .ics()
                    .iter()
                    .enumerate()
                    .map(|(i, ic)| ic.status(i).sum_of_cells)
                    .collect();
                presenter.present(Report::SumOfCells(socs));
                outcome.merge(Self::checked(stat, presenter));
            }
            Command::MeasurementLoop { datalog } => {
                outcome = self.measurement_loop(datalog, false, console, presenter)?
            }
            Command::CombinedLoop => outcome = self.measurement_loop(false, true, console, presenter)?,
            Command::ClearAndRead => {
                self.sequencer.wake(Wake::FromSleep)?;
                for clear in [CLRCELL, CLRAUX, CLRSTAT] {
                    self.sequencer.command(clear)?;
                }
                outcome = self.read_cells(false, presenter)?;
                outcome.merge(self.read_aux(RegisterSelect::All, false, presenter)?);
                outcome.merge(self.read_status(RegisterSelect::All, presenter)?);
            }
            Command::MeasureAll => {
                let conversions = [
                    Conversion::Cells {
                        mode,
                        discharge,
                        channels: CellChannels::All,
                    },
                    Conversion::Aux {
                        mode,
                        channels: AuxChannels::All,
                    },
                    Conversion::Status {
                        mode,
                        channels: StatChannels::All,
                    },
                ];
                for (step, conversion) in conversions.into_iter().enumerate() {
                    self.start(conversion, presenter)?;
                    outcome.merge(match step {
                        0 => self.read_cells(false, presenter)?,
                        1 => self.read_aux(RegisterSelect::All, false, presenter)?,
                        _ => self.read_status(RegisterSelect::All, presenter)?,
                    });
                }
            }
            Command::MuxTest => {
                self.sequencer.wake(Wake::FromSleep)?;
                let (passed, read) = self.sequencer.run_mux_test()?;
                presenter.present(Report::MuxTest { passed });
                outcome = Self::checked(read, presenter);
            }
            Command::SelfTest => {
                for register in [AdcRegister::Cell, AdcRegister::Aux, AdcRegister::Stat] {
                    self.sequencer.wake(Wake::FromSleep)?;
                    let result =
                        self.sequencer
                            .run_self_test(register, mode, self.config.adc_option)?;
                    presenter.present(Report::SelfTest {
                        register,
                        errors: result.errors,
                    });
                    outcome.merge(Self::checked(result.outcome, presenter));
                }
            }
            Command::Overlap => {
                self.sequencer.wake(Wake::FromSleep)?;
                let result = self.sequencer.run_overlap_test(mode)?;
                presenter.present(Report::Overlap {
                    errors: result.errors,
                });
                outcome = Self::checked(result.outcome, presenter);
            }
            Command::Redundancy => {
                for register in [AdcRegister::Aux, AdcRegister::Stat] {
                    self.sequencer.wake(Wake::FromSleep)?;
                    let result = self.sequencer.run_redundancy_test(register, mode)?;
                    presenter.present(Report::Redundancy {
                        register,
                        errors: result.errors,
                    });
                    outcome.merge(Self::checked(result.outcome, presenter));
                }
            }
            Command::OpenWireSingle => {
                let read = self.sequencer.run_open_wire_single(mode)?;
                let wires = self
                    .sequencer
                    .chain()
                    .ics()
                    .iter()
                    .map(|ic| ic.system_open_wire)
                    .collect();
                presenter.present(Report::OpenWire(wires));
                outcome = Self::checked(read, presenter);
            }
            Command::OpenWireMulti => {
                let (wires, read) = self.sequencer.run_open_wire_multi(mode)?;
                presenter.present(Report::OpenWireMulti(wires));
                outcome = Self::checked(read, presenter);
            }
            Command::PecCount => self.present_pec(presenter),
            Command::ResetPecCount => {
                self.sequencer.chain_mut().reset_crc_counts();
                self.present_pec(presenter);
            }
            Command::SetDischarge { pin } => {
                self.config.set_discharge(pin)?;
                self.write_config(presenter)?;
                outcome = self.read_config(presenter)?;
            }
            Command::ClearDischarge => {
                self.config.clear_discharge();
                self.write_config(presenter)?;
                outcome = self.read_config(presenter)?;
            }
            Command::Pwm => {
                let duty = self.settings.pwm_duty;
                self.write_group(WriteGroup::Pwm, duty, presenter)?;
                outcome = self.read_group(Readback::Pwm, presenter)?;
            }
            Command::SControl => {
                let pulses = self.settings.sctrl_pulses;
                self.write_group(WriteGroup::SControl, pulses, presenter)?;
                self.sequencer.command(STSCTRL)?;
                outcome = self.read_group(Readback::SControl, presenter)?;
            }
            Command::ClearSControl => {
                self.sequencer.wake(Wake::FromSleep)?;
                self.sequencer.command(CLRSCTRL)?;
                outcome = self.read_group(Readback::SControl, presenter)?;
            }
            Command::SpiComm => {
                self.write_group(WriteGroup::Comm, COMM_SPI_WRITE, presenter)?;
                self.sequencer.start_comm(3)?;
                outcome = self.read_group(Readback::Comm, presenter)?;
            }
            Command::I2cWrite => {
                self.write_group(WriteGroup::Comm, COMM_I2C_WRITE, presenter)?;
                self.sequencer.start_comm(3)?;
                outcome = self.read_group(Readback::Comm, presenter)?;
            }
            Command::I2cRead => {
                self.write_group(WriteGroup::Comm, COMM_I2C_READ_ADDRESS, presenter)?;
                self.sequencer.start_comm(3)?;
                self.write_group(WriteGroup::Comm, COMM_I2C_READ_DATA, presenter)?;
                self.sequencer.start_comm(1)?;
                outcome = self.read_group(Readback::Comm, presenter)?;
            }
            Command::FuelGauge(mode) => self.run_gauge(mode, console, presenter)?,
            Command::Settings => run_settings(&mut self.gauge, console, presenter)?,
        }
        Ok(outcome)
    }

    fn checked(outcome: ReadOutcome, presenter: &mut dyn Presenter) -> ReadOutcome {
        if !outcome.is_verified() {
            presenter.present(Report::CrcError {
                ics: outcome.failed.clone(),
            });
        }
        outcome
    }

    /// Wake from sleep, run one conversion and report its duration
    fn start(&mut self, conversion: Conversion, presenter: &mut dyn Presenter) -> Result<()> {
        self.sequencer.wake(Wake::FromSleep)?;
        let elapsed = self.sequencer.convert(conversion)?;
        presenter.present(Report::ConversionTime {
            micros: micros(elapsed),
        });
        Ok(())
    }

    fn write_config(&mut self, presenter: &mut dyn Presenter) -> Result<()> {
        self.sequencer.wake(Wake::FromSleep)?;
        self.sequencer.write_config(&self.config)?;
        presenter.present(Report::ConfigWritten(self.sequencer.chain().config_written()));
        Ok(())
    }

    fn read_config(&mut self, presenter: &mut dyn Presenter) -> Result<ReadOutcome> {
        self.sequencer.wake(Wake::FromSleep)?;
        let outcome = self.sequencer.read_config()?;
        presenter.present(Report::ConfigRead(self.sequencer.chain().config_read()));
        Ok(Self::checked(outcome, presenter))
    }

    fn read_cells(&mut self, datalog: bool, presenter: &mut dyn Presenter) -> Result<ReadOutcome> {
        self.sequencer.wake(Wake::FromIdle)?;
        let outcome = self.sequencer.read_cells(RegisterSelect::All)?;
        let ics = self
            .sequencer
            .chain()
            .ics()
            .iter()
            .enumerate()
            .map(|(i, ic)| ic.cell_voltages(i))
            .collect();
        presenter.present(Report::Cells {
            timestamp: self.clock.now(),
            datalog,
            ics,
        });
        Ok(Self::checked(outcome, presenter))
    }

    fn read_aux(
        &mut self,
        select: RegisterSelect,
        datalog: bool,
        presenter: &mut dyn Presenter,
    ) -> Result<ReadOutcome> {
        self.sequencer.wake(Wake::FromIdle)?;
        let outcome = self.sequencer.read_aux(select)?;
        let ics = self
            .sequencer
            .chain()
            .ics()
            .iter()
            .enumerate()
            .map(|(i, ic)| ic.aux_voltages(i))
            .collect();
        presenter.present(Report::Aux { datalog, ics });
        Ok(Self::checked(outcome, presenter))
    }

    fn read_status(&mut self, select: RegisterSelect, presenter: &mut dyn Presenter) -> Result<ReadOutcome> {
        self.sequencer.wake(Wake::FromIdle)?;
        let outcome = self.sequencer.read_stat(select)?;
        let ics = self
            .sequencer
            .chain()
            .ics()
            .iter()
            .enumerate()
            .map(|(i, ic)| ic.status(i))
            .collect();
        presenter.present(Report::Status(ics));
        Ok(Self::checked(outcome, presenter))
    }

    /// Load the same bytes into every IC's tx buffer of `group` and write them
    fn write_group(
        &mut self,
        group: WriteGroup,
        data: [u8; GROUP_DATA_LEN],
        presenter: &mut dyn Presenter,
    ) -> Result<()> {
        for ic in self.sequencer.chain_mut().ics_mut() {
            match group {
                WriteGroup::Config => ic.config.set_tx(data),
                WriteGroup::Pwm => ic.pwm.set_tx(data),
                WriteGroup::SControl => ic.sctrl.set_tx(data),
                WriteGroup::Comm => ic.com.set_tx(data),
            }
        }
        self.sequencer.wake(Wake::FromSleep)?;
        self.sequencer.write(group)?;
        let chain = self.sequencer.chain();
        let report = match group {
            WriteGroup::Config => Report::ConfigWritten(chain.config_written()),
            WriteGroup::Pwm => Report::PwmWritten(chain.tx_frames(|ic| &ic.pwm)),
            WriteGroup::SControl => Report::SControlWritten(chain.tx_frames(|ic| &ic.sctrl)),
            WriteGroup::Comm => Report::CommWritten(chain.tx_frames(|ic| &ic.com)),
        };
        presenter.present(report);
        Ok(())
    }

    fn read_group(&mut self, readback: Readback, presenter: &mut dyn Presenter) -> Result<ReadOutcome> {
        self.sequencer.wake(Wake::FromIdle)?;
        let outcome = self.sequencer.read(&[readback])?;
        let chain = self.sequencer.chain();
        let report = match readback {
            Readback::Pwm => Report::PwmRead(chain.rx_frames(|ic| &ic.pwm)),
            Readback::SControl => Report::SControlRead(chain.rx_frames(|ic| &ic.sctrl)),
            Readback::Comm => Report::CommRead(chain.rx_frames(|ic| &ic.com)),
            _ => Report::ConfigRead(chain.config_read()),
        };
        presenter.present(report);
        Ok(Self::checked(outcome, presenter))
    }

    fn present_pec(&self, presenter: &mut dyn Presenter) {
        presenter.present(Report::PecCount(self.sequencer.chain().crc_counts()));
    }

    /// One pass of the enabled loop steps
    fn measurement_pass(&mut self, datalog: bool, presenter: &mut dyn Presenter) -> Result<ReadOutcome> {
        let steps = self.settings.loop_steps;
        let mode = self.settings.conversion_mode;
        let discharge = self.settings.discharge_permitted;
        let mut outcome = ReadOutcome::default();

        if steps.write_config {
            self.write_config(presenter)?;
        }
        if steps.read_config {
            outcome.merge(self.read_config(presenter)?);
        }
        if steps.measure_cell {
            self.sequencer.wake(Wake::FromIdle)?;
            self.sequencer.convert(Conversion::Cells {
                mode,
                discharge,
                channels: self.settings.cell_channels,
            })?;
            outcome.merge(self.read_cells(datalog, presenter)?);
        }
        if steps.measure_aux {
            self.sequencer.wake(Wake::FromIdle)?;
            self.sequencer.convert(Conversion::Aux {
                mode,
                channels: self.settings.aux_channels,
            })?;
            outcome.merge(self.read_aux(RegisterSelect::All, datalog, presenter)?);
        }
        if steps.measure_stat {
            self.sequencer.wake(Wake::FromIdle)?;
            self.sequencer.convert(Conversion::Status {
                mode,
                channels: self.settings.stat_channels,
            })?;
            outcome.merge(self.read_status(RegisterSelect::All, presenter)?);
        }
        if steps.print_pec {
            self.present_pec(presenter);
        }
        Ok(outcome)
    }

    /// Repeat measurement passes until the menu token arrives.
    ///
    /// The configuration is written once up front. With `with_gauge` each pass
    /// also takes a scan-mode fuel gauge reading.
    fn measurement_loop(
        &mut self,
        datalog: bool,
        with_gauge: bool,
        console: &mut dyn Console,
        presenter: &mut dyn Presenter,
    ) -> Result<ReadOutcome> {
        let mut outcome = ReadOutcome::default();
        let mut ack = AckStatus::default();

        self.write_config(presenter)?;
        if with_gauge {
            self.gauge.set_mode(FuelGaugeMode::Scan, &mut ack)?;
        }
        presenter.present(Report::Notice("transmit 'm' to quit".into()));

        loop {
            outcome.merge(self.measurement_pass(datalog, presenter)?);
            if with_gauge {
                let reading = self.gauge.sample(self.clock.now(), false, &mut ack)?;
                presenter.present(Report::FuelGauge(reading));
                self.clock.delay(millis(self.settings.scan_delay_ms));
            }
            self.clock.delay(millis(self.settings.loop_interval_ms));
            if console.poll_input() == Some(Input::Menu) {
                break;
            }
        }
        ack.into_result()?;
        Ok(outcome)
    }

    /// Put the fuel gauge in `mode` and report readings until input or a NACK
    fn run_gauge(
        &mut self,
        mode: FuelGaugeMode,
        console: &mut dyn Console,
        presenter: &mut dyn Presenter,
    ) -> Result<()> {
        let mut ack = AckStatus::default();
        self.gauge.set_mode(mode, &mut ack)?;
        if mode == FuelGaugeMode::Shutdown {
            presenter.present(Report::Notice("LTC2944 Has Been ShutDown".into()));
            return ack.into_result();
        }

        let interval = match mode {
            FuelGaugeMode::Scan => self.settings.scan_delay_ms,
            _ => self.settings.automatic_delay_ms,
        };
        let mut first = true;
        loop {
            if mode == FuelGaugeMode::Sleep {
                self.clock.delay(millis(SLEEP_MODE_SETTLE_MS));
            }
            let stale = mode == FuelGaugeMode::Manual && !first;
            let reading = self.gauge.sample(self.clock.now(), stale, &mut ack)?;
            presenter.present(Report::FuelGauge(reading));
            first = false;

            self.clock.delay(millis(interval));
            if ack.is_nack() || console.poll_input().is_some() {
                break;
            }
        }
        ack.into_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{ManualClock, ScriptedConsole, SimulatedChain, SimulatedGauge};

    type SimDispatcher = CommandDispatcher<SimulatedChain, SimulatedGauge, ManualClock>;

    fn dispatcher(total_ic: usize) -> SimDispatcher {
        let settings = BoardSettings {
            total_ic,
            ..BoardSettings::default()
        };
        CommandDispatcher::new(
            SimulatedChain::new(total_ic),
            SimulatedGauge::default(),
            ManualClock::default(),
            settings,
        )
    }

    #[test]
    fn every_listed_opcode_resolves() {
        let mut console = ScriptedConsole::from_tokens("5").unwrap();
        let mut reports: Vec<Report> = Vec::new();
        for opcode in (1..=31).chain(41..=47) {
            let command = Command::resolve(opcode, &mut console, &mut reports);
            assert!(command.is_ok(), "opcode {opcode}");
        }
        assert!(matches!(
            Command::resolve(32, &mut console, &mut reports),
            Err(BmsError::UnknownCommand(32))
        ));
    }

    #[test]
    fn discharge_prompt_reads_pin() {
        let mut console = ScriptedConsole::from_tokens("7").unwrap();
        let mut reports: Vec<Report> = Vec::new();
        let command = Command::resolve(23, &mut console, &mut reports).unwrap();
        assert_eq!(command, Command::SetDischarge { pin: 7 });
        assert!(matches!(reports.as_slice(), [Report::Prompt(_)]));
    }

    #[test]
    fn start_conversion_reports_duration() {
        let mut bms = dispatcher(1);
        let mut console = ScriptedConsole::default();
        let mut reports: Vec<Report> = Vec::new();
        let outcome = bms.execute(3, &mut console, &mut reports);
        assert!(matches!(outcome, DispatchOutcome::Completed));
        assert!(matches!(reports.as_slice(), [Report::ConversionTime { micros: 2335 }]));
        // ADCV, 7 kHz, discharge permitted, all cells
        assert_eq!(bms.sequencer().transport().commands(), &[0x0370]);
    }

    #[test]
    fn write_read_config_round_trip() {
        let mut bms = dispatcher(2);
        let mut console = ScriptedConsole::default();
        let mut reports: Vec<Report> = Vec::new();
        let outcome = bms.execute(1, &mut console, &mut reports);
        assert!(matches!(outcome, DispatchOutcome::Completed));
        let expected = bms.config().encode();
        assert_eq!(bms.sequencer().transport().config(1), Some(expected));
        match reports.last() {
            Some(Report::ConfigRead(frames)) => {
                assert_eq!(frames.len(), 2);
                assert_eq!(frames[0].data, expected);
            }
            other => panic!("unexpected report {other:?}"),
        }
    }

    #[test]
    fn chain_is_released_after_each_command() {
        let mut bms = dispatcher(1);
        let mut console = ScriptedConsole::default();
        let mut reports: Vec<Report> = Vec::new();
        bms.execute(14, &mut console, &mut reports);
        assert_eq!(bms.sequencer().state(), crate::sequencer::SequencerState::Idle);
    }

    #[test]
    fn shutdown_writes_control_and_returns() {
        let mut bms = dispatcher(1);
        let mut console = ScriptedConsole::default();
        let mut reports: Vec<Report> = Vec::new();
        let outcome = bms.execute(45, &mut console, &mut reports);
        assert!(matches!(outcome, DispatchOutcome::Completed));
        assert_eq!(
            bms.gauge().bus().writes(),
            &[(LTC2944_CONTROL_REG, u16::from(LTC2944_SHUTDOWN_MODE))]
        );
        assert!(bms.gauge().bus().reads().is_empty());
    }

    #[test]
    fn menu_token_and_fractional_opcodes() {
        let mut bms = dispatcher(1);
        let mut console = ScriptedConsole::default();
        let mut reports: Vec<Report> = Vec::new();
        assert!(matches!(
            bms.execute_input(Input::Menu, &mut console, &mut reports),
            DispatchOutcome::ShowMenu
        ));
        assert!(matches!(
            bms.execute_input(Input::Number(1.5), &mut console, &mut reports),
            DispatchOutcome::Failed(BmsError::InvalidInput(_))
        ));
        assert!(reports.is_empty());
    }
}
