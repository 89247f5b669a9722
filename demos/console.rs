//! Interactive Console Example
//!
//! Runs the full command menu against simulated devices:
//! - Optional board settings loaded from a JSON file
//! - Optional BLE telemetry of cell voltages on a serial port
//! - Opcodes and the `m` token entered on standard input
//!
//! Usage:
//!   cargo run --example console                          # Default board
//!   cargo run --example console -- board.json            # Settings from JSON
//!   cargo run --example console -- board.json --ble      # Pick a BLE port
//!
//! Set RUST_LOG environment variable to control logging:
//!   RUST_LOG=debug cargo run --example console

use bms_host::sim::{SimulatedChain, SimulatedGauge};
use bms_host::{
    BleTelemetry, BmsError, BoardSettings, CommandDispatcher, Result, StdinConsole, SystemClock,
    TextPresenter,
};
use inquire::Select;
use log::info;

/// Interactive serial port selection using inquire
fn select_port() -> Result<String> {
    let ports = BleTelemetry::list_ports()?;
    if ports.is_empty() {
        return Err(BmsError::InvalidInput("no serial ports found".into()));
    }

    let port_names: Vec<String> = ports.iter().map(|p| p.port_name.clone()).collect();
    Select::new("Select the BLE module port:", port_names)
        .prompt()
        .map_err(|e| BmsError::InvalidInput(format!("selection cancelled: {e}")))
}

fn load_settings(path: Option<&String>) -> Result<BoardSettings> {
    let Some(path) = path else {
        return Ok(BoardSettings::default());
    };
    let text = std::fs::read_to_string(path)?;
    let settings = serde_json::from_str(&text)
        .map_err(|e| BmsError::InvalidInput(format!("{path}: {e}")))?;
    info!("Loaded board settings from {path}");
    Ok(settings)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let settings = load_settings(args.iter().find(|a| !a.starts_with("--")))?;
    let ble = if args.iter().any(|a| a == "--ble") {
        Some(BleTelemetry::open(&select_port()?)?)
    } else {
        None
    };

    info!(
        "Simulating {} LTC6811 IC(s) and an LTC2944 fuel gauge",
        settings.total_ic
    );
    let mut bms = CommandDispatcher::new(
        SimulatedChain::new(settings.total_ic),
        SimulatedGauge::default(),
        SystemClock,
        settings,
    );

    // Terminal output, mirrored to the BLE link when one was opened
    let mut output = (TextPresenter::stdout(), ble);
    bms.run(&mut StdinConsole::spawn(), &mut output)
}
