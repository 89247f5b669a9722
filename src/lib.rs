//! # BMS Host Library
//!
//! Host-side orchestration for a daisy chain of LTC6811 multicell battery
//! monitors and an LTC2944 coulomb counter.
//!
//! The library sequences wake, conversion, poll and read-back on the chain,
//! verifies every received register group with its packet error code,
//! converts raw codes into physical units and manages the fuel-gauge alert
//! thresholds.
//!
//! ## Features
//!
//! - Opcode-driven [`CommandDispatcher`] covering measurements, self tests,
//!   open-wire detection, discharge control and COMM pass-through
//! - Per-IC PEC verification; a corrupted IC keeps its previous data
//! - Fuel-gauge modes, alert decoding and an interactive settings workflow
//! - `embedded-hal` 1.0 adapters for real hardware and in-memory simulated
//!   devices for running without it
//!
//! ## Example
//!
//! ```no_run
//! use bms_host::sim::{SimulatedChain, SimulatedGauge};
//! use bms_host::{BoardSettings, CommandDispatcher, StdinConsole, SystemClock, TextPresenter};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = BoardSettings::default();
//!     let mut bms = CommandDispatcher::new(
//!         SimulatedChain::new(settings.total_ic),
//!         SimulatedGauge::default(),
//!         SystemClock,
//!         settings,
//!     );
//!     bms.run(&mut StdinConsole::spawn(), &mut TextPresenter::stdout())?;
//!     Ok(())
//! }
//! ```

pub mod alerts;
pub mod config;
pub mod console;
pub mod constants;
pub mod conversion;
pub mod dispatcher;
pub mod error;
pub mod fuel_gauge;
pub mod pec;
pub mod presentation;
pub mod register;
pub mod sequencer;
pub mod settings;
pub mod sim;
pub mod transport;
pub mod types;

pub use alerts::{check_alerts, AlertKind, AlertSet};
pub use config::{BoardSettings, DeviceConfiguration, LoopSteps};
pub use console::{Console, Input, StdinConsole};
pub use dispatcher::{Command, CommandDispatcher, DispatchOutcome};
pub use error::{BmsError, Result};
pub use fuel_gauge::{FuelGauge, FuelGaugeSession};
pub use presentation::{BleTelemetry, Presenter, TextPresenter};
pub use sequencer::{MeasurementSequencer, SequencerState};
pub use transport::{Clock, DaisyChain, FuelGaugeBus, I2cFuelGauge, SpiDaisyChain, SystemClock};
pub use types::*;
