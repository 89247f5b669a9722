//! Interactive fuel-gauge settings workflow.
//!
//! ```text
//! Root ─┬─ 1 AlertThresholds ─ 1..4 ─ AwaitHigh(kind) ─ AwaitLow(kind)
//!       ├─ 2 Prescaler        (1..7 select M = 1..4096)
//!       ├─ 3 AlertPin         (1 alert, 2 charge complete, 3 disabled)
//!       └─ 4 Units            (1 mAh, 2 C, 3 Celsius, 4 Kelvin)
//! ```
//!
//! The menu token goes back one level and leaves the workflow from `Root`.
//! Threshold values are physical quantities in the session units. A missing
//! acknowledge finishes the threshold pair being entered and then ends the
//! workflow with [`BmsError::NoAcknowledge`](crate::error::BmsError::NoAcknowledge).

use crate::console::{Console, Input};
use crate::error::Result;
use crate::fuel_gauge::{AckStatus, FuelGauge, ThresholdKind, ThresholdLevel};
use crate::presentation::Presenter;
use crate::transport::FuelGaugeBus;
use crate::types::{AlertPinMode, ChargeUnits, Prescaler, Report, TemperatureUnits};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsState {
    Root,
    AlertThresholds,
    AwaitHigh(ThresholdKind),
    AwaitLow(ThresholdKind),
    Prescaler,
    AlertPin,
    Units,
    Done,
}

const THRESHOLD_KINDS: [ThresholdKind; 4] = [
    ThresholdKind::Charge,
    ThresholdKind::Voltage,
    ThresholdKind::Current,
    ThresholdKind::Temperature,
];

#[derive(Debug, Clone)]
pub struct SettingsWorkflow {
    state: SettingsState,
    ack: AckStatus,
}

impl Default for SettingsWorkflow {
    fn default() -> Self {
        Self::new()
    }
}

impl SettingsWorkflow {
    pub fn new() -> Self {
        Self {
            state: SettingsState::Root,
            ack: AckStatus::default(),
        }
    }

    pub fn state(&self) -> SettingsState {
        self.state
    }

    pub fn prompt(&self) -> String {
        match self.state {
            SettingsState::Root => "1-Set Alert Thresholds\n2-Set Prescaler Value\n\
                 3-Set AL#/CC# Pin State\n4-Set Units\nm-Main Menu"
                .into(),
            SettingsState::AlertThresholds => "1-Set Charge Thresholds\n2-Set Voltage Thresholds\n\
                 3-Set Current Thresholds\n4-Set Temperature Thresholds\nm-Main Menu"
                .into(),
            SettingsState::AwaitHigh(kind) => format!("Enter Max {kind:?} Threshold:"),
            SettingsState::AwaitLow(kind) => format!("Enter Min {kind:?} Threshold:"),
            SettingsState::Prescaler => Prescaler::ALL
                .iter()
                .enumerate()
                .map(|(i, m)| format!("{}-Set Prescaler M = {}\n", i + 1, m.factor()))
                .chain(std::iter::once("m-Main Menu".to_string()))
                .collect(),
            SettingsState::AlertPin => "1-Enable Alert Mode\n2-Enable Charge Complete Mode\n\
                 3-Disable AL#/CC# Pin\nm-Main Menu"
                .into(),
            SettingsState::Units => "1-Set Charge Units to mAh\n2-Set Charge Units to Coulombs\n\
                 3-Set Temperature Units to Celsius\n4-Set Temperature Units to Kelvin\nm-Main Menu"
                .into(),
            SettingsState::Done => String::new(),
        }
    }

    /// Apply one operator token
    pub fn handle<B: FuelGaugeBus>(
        &mut self,
        gauge: &mut FuelGauge<B>,
        input: Input,
        presenter: &mut dyn Presenter,
    ) -> Result<SettingsState> {
        let choice = input.selection().map(|n| n as usize);
        self.state = match (self.state, input) {
            (SettingsState::Done, _) => SettingsState::Done,
            (SettingsState::Root, Input::Menu) => SettingsState::Done,
            (SettingsState::AwaitHigh(_), Input::Menu) => SettingsState::AlertThresholds,
            (SettingsState::AwaitLow(_), Input::Menu) => self.after_pair(),
            (_, Input::Menu) => SettingsState::Root,

            (SettingsState::AwaitHigh(kind), Input::Number(value)) => {
                gauge.write_threshold(kind, ThresholdLevel::High, value, &mut self.ack)?;
                SettingsState::AwaitLow(kind)
            }
            (SettingsState::AwaitLow(kind), Input::Number(value)) => {
                gauge.write_threshold(kind, ThresholdLevel::Low, value, &mut self.ack)?;
                self.after_pair()
            }

            (SettingsState::Root, _) => match choice {
                Some(1) => SettingsState::AlertThresholds,
                Some(2) => SettingsState::Prescaler,
                Some(3) => SettingsState::AlertPin,
                Some(4) => SettingsState::Units,
                _ => Self::incorrect(SettingsState::Root, presenter),
            },
            (SettingsState::AlertThresholds, _) => match choice {
                Some(n @ 1..=4) => SettingsState::AwaitHigh(THRESHOLD_KINDS[n - 1]),
                _ => Self::incorrect(SettingsState::AlertThresholds, presenter),
            },
            (SettingsState::Prescaler, _) => {
                match choice {
                    Some(n @ 1..=7) => {
                        let prescaler = Prescaler::ALL[n - 1];
                        gauge.session_mut().prescaler = prescaler;
                        presenter.present(Report::Notice(format!(
                            "Prescaler set to {}",
                            prescaler.factor()
                        )));
                    }
                    _ => {
                        Self::incorrect(SettingsState::Prescaler, presenter);
                    }
                }
                SettingsState::Prescaler
            }
            (SettingsState::AlertPin, _) => {
                let mode = match choice {
                    Some(1) => Some(AlertPinMode::Alert),
                    Some(2) => Some(AlertPinMode::ChargeComplete),
                    Some(3) => Some(AlertPinMode::Disabled),
                    _ => None,
                };
                match mode {
                    Some(mode) => {
                        gauge.session_mut().alert_pin = mode;
                        presenter.present(Report::Notice(format!("AL#/CC# pin: {mode:?}")));
                    }
                    None => {
                        Self::incorrect(SettingsState::AlertPin, presenter);
                    }
                }
                SettingsState::AlertPin
            }
            (SettingsState::Units, _) => {
                let session = gauge.session_mut();
                match choice {
                    Some(1) => session.charge_units = ChargeUnits::MilliampHours,
                    Some(2) => session.charge_units = ChargeUnits::Coulombs,
                    Some(3) => session.temperature_units = TemperatureUnits::Celsius,
                    Some(4) => session.temperature_units = TemperatureUnits::Kelvin,
                    _ => {
                        Self::incorrect(SettingsState::Units, presenter);
                    }
                }
                SettingsState::Units
            }
        };
        Ok(self.state)
    }

    /// Prompt and apply tokens until the workflow ends
    pub fn run<B: FuelGaugeBus>(
        mut self,
        gauge: &mut FuelGauge<B>,
        console: &mut dyn Console,
        presenter: &mut dyn Presenter,
    ) -> Result<()> {
        while self.state != SettingsState::Done {
            presenter.present(Report::Prompt(self.prompt()));
            let input = console.read_input()?;
            self.handle(gauge, input, presenter)?;
        }
        self.ack.into_result()
    }

    fn after_pair(&self) -> SettingsState {
        if self.ack.is_nack() {
            SettingsState::Done
        } else {
            SettingsState::AlertThresholds
        }
    }

    fn incorrect(state: SettingsState, presenter: &mut dyn Presenter) -> SettingsState {
        presenter.present(Report::Notice("Incorrect Option".into()));
        state
    }
}

/// Run the settings workflow from its root menu
pub fn run_settings<B: FuelGaugeBus>(
    gauge: &mut FuelGauge<B>,
    console: &mut dyn Console,
    presenter: &mut dyn Presenter,
) -> Result<()> {
    SettingsWorkflow::new().run(gauge, console, presenter)
}
