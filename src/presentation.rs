//! Output of [`Report`]s: text for a terminal and cell telemetry for a BLE
//! serial bridge.

use std::fmt::Write as _;
use std::io::{self, Write};
use std::time::Duration;

use serialport::SerialPort;

use crate::constants::*;
use crate::error::Result;
use crate::types::*;

/// Receiver of structured output
pub trait Presenter {
    fn present(&mut self, report: Report);
}

impl Presenter for Vec<Report> {
    fn present(&mut self, report: Report) {
        self.push(report);
    }
}

/// Send every report to both presenters
impl<A: Presenter, B: Presenter> Presenter for (A, B) {
    fn present(&mut self, report: Report) {
        self.0.present(report.clone());
        self.1.present(report);
    }
}

/// Absent presenters drop every report
impl<P: Presenter> Presenter for Option<P> {
    fn present(&mut self, report: Report) {
        if let Some(presenter) = self {
            presenter.present(report);
        }
    }
}

impl<P: Presenter + ?Sized> Presenter for &mut P {
    fn present(&mut self, report: Report) {
        (**self).present(report);
    }
}

fn hex_frames(out: &mut String, label: &str, frames: &[RegisterFrame], pec_label: &str) {
    for frame in frames {
        let _ = write!(out, "{} {}", label, frame.ic + 1);
        for byte in frame.data {
            let _ = write!(out, ", 0x{byte:02X}");
        }
        let [msb, lsb] = frame.pec.to_be_bytes();
        let _ = writeln!(out, ", {pec_label} PEC: 0x{msb:02X}, 0x{lsb:02X}");
    }
}

fn written(out: &mut String, title: &str, label: &str, frames: &[RegisterFrame]) {
    let _ = writeln!(out, "{title}");
    hex_frames(out, label, frames, "Calculated");
}

fn received(out: &mut String, title: &str, label: &str, frames: &[RegisterFrame]) {
    let _ = writeln!(out, "{title}");
    hex_frames(out, label, frames, "Received");
}

fn pass_fail(passed: bool) -> &'static str {
    if passed {
        "PASS"
    } else {
        "FAIL"
    }
}

fn register_name(register: AdcRegister) -> &'static str {
    match register {
        AdcRegister::Cell => "Cell",
        AdcRegister::Aux => "Aux",
        AdcRegister::Stat => "Stat",
    }
}

/// Cell voltages in the layout used on the terminal and the BLE link
pub fn format_cells(ics: &[CellVoltages], datalog: bool) -> String {
    let mut out = String::new();
    for ic in ics {
        if datalog {
            out.push_str(" Cells :");
            for v in &ic.volts {
                let _ = write!(out, "{v:.4},");
            }
        } else {
            let _ = write!(out, " IC {}: ", ic.ic + 1);
            for (i, v) in ic.volts.iter().enumerate() {
                let _ = write!(out, " C{}:{v:.4},", i + 1);
            }
            out.push('\n');
        }
    }
    out
}

fn format_gauge(out: &mut String, reading: &FuelGaugeReading) {
    match reading.charge_units {
        ChargeUnits::MilliampHours => {
            let _ = writeln!(out, "mAh: {:.4} mAh", reading.charge);
        }
        ChargeUnits::Coulombs => {
            let _ = writeln!(out, "Coulombs: {:.4} C", reading.charge);
        }
    }
    let stale = if reading.stale {
        "     ***** Stale Data ******"
    } else {
        ""
    };
    let unit = match reading.temperature_units {
        TemperatureUnits::Celsius => "C",
        TemperatureUnits::Kelvin => "K",
    };
    let mut line = |name: &str, value: Option<f64>, unit: &str| {
        let _ = match value {
            Some(v) => writeln!(out, "{name} {v:.4} {unit}{stale}"),
            None => writeln!(out, "{name}     ADC Sleep..."),
        };
    };
    line("Current", reading.current, "A");
    line("Voltage", reading.voltage, "V");
    line("Temperature", reading.temperature, unit);
    for alert in reading.alerts.iter() {
        let _ = writeln!(out, "Alert: {}", alert.description());
    }
}

/// Render a report as terminal text
pub fn format_report(report: &Report) -> String {
    let mut out = String::new();
    match report {
        Report::ConversionTime { micros } => {
            let _ = writeln!(out, "Conversion completed in:{:.1}ms", *micros as f64 / 1000.0);
        }
        Report::ConfigWritten(frames) => written(&mut out, "Written Configuration: ", "CFGA IC", frames),
        Report::ConfigRead(frames) => received(&mut out, "Received Configuration ", "CFGA IC", frames),
        Report::Cells {
            timestamp,
            datalog,
            ics,
        } => {
            if !datalog {
                let _ = writeln!(out, "DateTime:\t{}", timestamp.format("%Y-%m-%dT%H:%M:%S"));
            }
            out.push_str(&format_cells(ics, *datalog));
        }
        Report::Aux { datalog, ics } => {
            for ic in ics {
                if *datalog {
                    let _ = write!(out, "AUX  IC {}: ", ic.ic + 1);
                    for v in ic.gpio.iter().chain(std::iter::once(&ic.vref2)) {
                        let _ = write!(out, "{v:.4},");
                    }
                } else {
                    let _ = write!(out, " IC {}:", ic.ic + 1);
                    for (i, v) in ic.gpio.iter().enumerate() {
                        let _ = write!(out, " GPIO-{}:{v:.4},", i + 1);
                    }
                    let _ = writeln!(out, " Vref2:{:.4}", ic.vref2);
                }
            }
        }
        Report::Status(ics) => {
            for s in ics {
                let _ = writeln!(
                    out,
                    " IC {}:  SOC:{:.4}, Itemp:{:.4}, VregA:{:.4}, VregD:{:.4}",
                    s.ic + 1,
                    s.sum_of_cells,
                    s.die_temperature,
                    s.analog_supply,
                    s.digital_supply
                );
                let _ = writeln!(
                    out,
                    " Flags: 0x{:02X}, 0x{:02X}, 0x{:02X}   Mux fail flag: 0x{:02X}   THSD: 0x{:02X}",
                    s.flags[0],
                    s.flags[1],
                    s.flags[2],
                    u8::from(s.mux_fail),
                    u8::from(s.thermal_shutdown)
                );
            }
        }
        Report::SumOfCells(socs) => {
            for (i, soc) in socs.iter().enumerate() {
                let _ = write!(out, " IC {}:  SOC:{soc:.4},", i + 1);
            }
            out.push('\n');
        }
        Report::MuxTest { passed } => {
            for (i, ok) in passed.iter().enumerate() {
                let _ = writeln!(out, " IC {}\nMux Test: {}", i + 1, pass_fail(*ok));
            }
        }
        Report::SelfTest { register, errors } => {
            let _ = writeln!(
                out,
                "{}\n{errors} : errors detected in Digital Filter and Memory",
                register_name(*register)
            );
        }
        Report::Overlap { errors } => {
            let _ = writeln!(out, "Overlap Test: {}", pass_fail(*errors == 0));
        }
        Report::Redundancy { register, errors } => {
            let _ = writeln!(
                out,
                "{}\n{errors} : errors detected in Measurement",
                register_name(*register)
            );
        }
        Report::OpenWire(wires) => {
            for (i, wire) in wires.iter().enumerate() {
                let _ = match wire.wire() {
                    None => writeln!(out, "No Opens Detected on IC {}", i + 1),
                    Some(w) => writeln!(out, "There is an open wire on IC {} Channel: {w}", i + 1),
                };
            }
        }
        Report::OpenWireMulti(wires) => {
            for (i, open) in wires.iter().enumerate() {
                let _ = if open.is_empty() {
                    writeln!(out, "No Opens Detected on IC {}", i + 1)
                } else {
                    writeln!(out, "Open wires on IC {}: {open:?}", i + 1)
                };
            }
        }
        Report::PecCount(counts) => {
            for (i, count) in counts.iter().enumerate() {
                let _ = writeln!(out, "{count} : PEC Errors Detected on IC{}", i + 1);
            }
        }
        Report::PwmWritten(frames) => written(&mut out, "Written PWM Configuration: ", "IC", frames),
        Report::PwmRead(frames) => received(&mut out, "Received pwm Configuration:", "IC", frames),
        Report::SControlWritten(frames) => {
            written(&mut out, "Written Data in Sctrl register: ", " IC:", frames)
        }
        Report::SControlRead(frames) => {
            received(&mut out, "Received Data in Sctrl register:", " IC:", frames)
        }
        Report::CommWritten(frames) => {
            written(&mut out, "Written Data in COMM Register: ", " IC-", frames)
        }
        Report::CommRead(frames) => received(&mut out, "Received Data in COMM register:", " IC-", frames),
        Report::CrcError { ics } => {
            let list: Vec<String> = ics.iter().map(|ic| (ic + 1).to_string()).collect();
            let _ = writeln!(
                out,
                "A PEC error was detected in the received data (IC {})",
                list.join(", ")
            );
        }
        Report::FuelGauge(reading) => format_gauge(&mut out, reading),
        Report::Prompt(text) | Report::Notice(text) => {
            let _ = writeln!(out, "{text}");
        }
    }
    out
}

/// Writes every report as text
pub struct TextPresenter<W> {
    out: W,
}

impl TextPresenter<io::Stdout> {
    pub fn stdout() -> Self {
        Self { out: io::stdout() }
    }
}

impl<W: Write> TextPresenter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> Presenter for TextPresenter<W> {
    fn present(&mut self, report: Report) {
        let text = format_report(&report);
        if let Err(e) = writeln!(self.out, "{text}").and_then(|_| self.out.flush()) {
            log::warn!("Failed to write report: {e}");
        }
    }
}

/// Forwards cell voltages to a BLE UART module on a serial port
pub struct BleTelemetry {
    port: Box<dyn SerialPort>,
}

impl BleTelemetry {
    pub fn open(port_name: &str) -> Result<Self> {
        let port = serialport::new(port_name, BLE_BAUD_RATE)
            .timeout(Duration::from_millis(100))
            .open()?;
        log::info!("BLE telemetry on {port_name} at {BLE_BAUD_RATE} baud");
        Ok(Self { port })
    }

    /// List available serial ports
    pub fn list_ports() -> Result<Vec<serialport::SerialPortInfo>> {
        Ok(serialport::available_ports()?)
    }

    pub fn send_cells(&mut self, ics: &[CellVoltages], datalog: bool) -> Result<()> {
        let mut text = format_cells(ics, datalog);
        text.push_str("\n\n");
        self.port.write_all(text.as_bytes())?;
        Ok(())
    }
}

impl Presenter for BleTelemetry {
    fn present(&mut self, report: Report) {
        if let Report::Cells { datalog, ics, .. } = report {
            if let Err(e) = self.send_cells(&ics, datalog) {
                log::warn!("BLE write failed: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::register::OpenWire;

    #[test]
    fn cell_lines_match_terminal_layout() {
        let ics = vec![CellVoltages {
            ic: 0,
            volts: vec![3.6, 3.61],
        }];
        assert_eq!(format_cells(&ics, false), " IC 1:  C1:3.6000, C2:3.6100,\n");
        assert_eq!(format_cells(&ics, true), " Cells :3.6000,3.6100,");
    }

    #[test]
    fn open_wire_sentinel_is_no_fault() {
        let text = format_report(&Report::OpenWire(vec![OpenWire::NONE, OpenWire(5)]));
        assert!(text.contains("No Opens Detected on IC 1"));
        assert!(text.contains("open wire on IC 2 Channel: 5"));
    }

    #[test]
    fn written_frames_show_calculated_pec() {
        let frame = RegisterFrame {
            ic: 0,
            data: [0xE4, 0x19, 0xE6, 0xAB, 0x00, 0x50],
            pec: 0x1234,
        };
        let text = format_report(&Report::ConfigWritten(vec![frame]));
        assert!(text.contains("CFGA IC 1, 0xE4, 0x19, 0xE6, 0xAB, 0x00, 0x50, Calculated PEC: 0x12, 0x34"));
    }

    #[test]
    fn tee_reaches_both() {
        let mut tee: (Vec<Report>, Vec<Report>) = (Vec::new(), Vec::new());
        tee.present(Report::Overlap { errors: 0 });
        assert_eq!(tee.0.len(), 1);
        assert_eq!(tee.1.len(), 1);
    }

    #[test]
    fn missing_mirror_only_reaches_the_first() {
        let mut tee: (Vec<Report>, Option<Vec<Report>>) = (Vec::new(), None);
        tee.present(Report::Overlap { errors: 0 });
        assert_eq!(tee.0.len(), 1);
        assert!(tee.1.is_none());

        tee.1 = Some(Vec::new());
        tee.present(Report::Overlap { errors: 0 });
        assert_eq!(tee.1.map(|r| r.len()), Some(1));
    }
}
