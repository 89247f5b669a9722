use std::time::Duration;

use bms_host::constants::*;
use bms_host::sim::{ManualClock, ScriptedConsole, SimulatedChain, SimulatedGauge};
use bms_host::{
    BoardSettings, CommandDispatcher, DispatchOutcome, FuelGaugeReading, Prescaler, Report,
};

type SimDispatcher = CommandDispatcher<SimulatedChain, SimulatedGauge, ManualClock>;

fn dispatcher() -> SimDispatcher {
    CommandDispatcher::new(
        SimulatedChain::new(1),
        SimulatedGauge::default(),
        ManualClock::default(),
        BoardSettings::default(),
    )
}

fn readings(reports: &[Report]) -> Vec<&FuelGaugeReading> {
    reports
        .iter()
        .filter_map(|r| match r {
            Report::FuelGauge(reading) => Some(reading),
            _ => None,
        })
        .collect()
}

#[test]
fn automatic_mode_reads_until_input() {
    let mut bms = dispatcher();
    let mut console = ScriptedConsole::from_tokens("1").unwrap().with_idle_polls(2);
    let mut reports: Vec<Report> = Vec::new();

    let outcome = bms.execute(41, &mut console, &mut reports);

    assert!(matches!(outcome, DispatchOutcome::Completed));
    let readings = readings(&reports);
    assert_eq!(readings.len(), 3);
    let first = readings[0];
    assert!((first.voltage.unwrap() - 12.6).abs() < 0.01);
    assert!((first.current.unwrap() - 0.1).abs() < 0.001);
    assert!((first.temperature.unwrap() - 25.0).abs() < 0.1);
    assert_eq!(bms.clock().delays(), &[Duration::from_millis(1000); 3]);
    assert_eq!(
        bms.gauge().bus().writes()[0],
        (LTC2944_CONTROL_REG, u16::from(LTC2944_AUTOMATIC_MODE | 0x30 | LTC2944_ALERT_MODE))
    );
    assert_eq!(console.remaining(), 0);
}

#[test]
fn manual_mode_marks_later_readings_stale() {
    let mut bms = dispatcher();
    let mut console = ScriptedConsole::default().with_idle_polls(2);
    let mut reports: Vec<Report> = Vec::new();
    bms.execute(43, &mut console, &mut reports);

    let stale: Vec<bool> = readings(&reports).iter().map(|r| r.stale).collect();
    assert_eq!(stale, vec![false, true, true]);
}

#[test]
fn sleep_mode_settles_and_skips_adc_registers() {
    let mut bms = dispatcher();
    let mut console = ScriptedConsole::default();
    let mut reports: Vec<Report> = Vec::new();
    bms.execute(44, &mut console, &mut reports);

    let readings = readings(&reports);
    assert_eq!(readings.len(), 1);
    assert!(readings[0].current.is_none());
    assert!(readings[0].voltage.is_none());
    assert_eq!(
        bms.clock().delays(),
        &[
            Duration::from_millis(SLEEP_MODE_SETTLE_MS),
            Duration::from_millis(AUTOMATIC_MODE_DISPLAY_DELAY_MS)
        ]
    );
}

#[test]
fn nack_stops_the_gauge_loop() {
    let mut bms = dispatcher();
    bms.gauge_mut().bus_mut().nack_register(LTC2944_VOLTAGE_MSB_REG);
    // Plenty of idle polls; the NACK alone must end the loop
    let mut console = ScriptedConsole::default().with_idle_polls(10);
    let mut reports: Vec<Report> = Vec::new();

    let outcome = bms.execute(41, &mut console, &mut reports);

    assert!(matches!(
        outcome,
        DispatchOutcome::NoAcknowledge { register } if register == LTC2944_VOLTAGE_MSB_REG
    ));
    assert_eq!(readings(&reports).len(), 1);
}

#[test]
fn scan_mode_uses_prescaler_chosen_in_settings() {
    let mut bms = dispatcher();
    let mut console = ScriptedConsole::from_tokens("2 1 m m").unwrap();
    let mut reports: Vec<Report> = Vec::new();

    let outcome = bms.execute(46, &mut console, &mut reports);
    assert!(matches!(outcome, DispatchOutcome::Completed));
    assert_eq!(bms.gauge().session().prescaler, Prescaler::M1);
    assert!(bms.gauge().bus().writes().is_empty());

    bms.execute(42, &mut console, &mut reports);
    assert_eq!(
        bms.gauge().bus().writes(),
        &[(LTC2944_CONTROL_REG, u16::from(LTC2944_SCAN_MODE | LTC2944_ALERT_MODE))]
    );
    assert_eq!(bms.clock().delays(), &[Duration::from_millis(5000)]);
}

#[test]
fn voltage_thresholds_through_settings() {
    let mut bms = dispatcher();
    let mut console = ScriptedConsole::from_tokens("1 2 4.2 1.0 m m").unwrap();
    let mut reports: Vec<Report> = Vec::new();

    bms.execute(46, &mut console, &mut reports);

    let code = |volts: f64| (volts / LTC2944_FULLSCALE_VOLTAGE * 65535.0).round() as u16;
    assert_eq!(
        bms.gauge().bus().writes(),
        &[
            (LTC2944_VOLTAGE_THRESH_HIGH_MSB_REG, code(4.2)),
            (LTC2944_VOLTAGE_THRESH_LOW_MSB_REG, code(1.0)),
        ]
    );
    assert!(reports.iter().any(|r| matches!(r, Report::Prompt(_))));
}

#[test]
fn combined_loop_adds_a_scan_reading_per_pass() {
    let mut bms = dispatcher();
    let mut console = ScriptedConsole::default();
    let mut reports: Vec<Report> = Vec::new();

    let outcome = bms.execute(47, &mut console, &mut reports);

    assert!(matches!(outcome, DispatchOutcome::Completed));
    assert!(reports.iter().any(|r| matches!(r, Report::Cells { .. })));
    assert_eq!(readings(&reports).len(), 1);
    assert_eq!(
        bms.gauge().bus().writes(),
        &[(LTC2944_CONTROL_REG, u16::from(LTC2944_SCAN_MODE | 0x30 | LTC2944_ALERT_MODE))]
    );
    assert_eq!(
        bms.clock().delays(),
        &[Duration::from_millis(5000), Duration::from_millis(900)]
    );
}

#[test]
fn alerts_are_attached_to_readings() {
    let mut bms = dispatcher();
    bms.gauge_mut().bus_mut().set_byte(LTC2944_STATUS_REG, 0b0000_1001);
    let mut console = ScriptedConsole::default();
    let mut reports: Vec<Report> = Vec::new();
    bms.execute(41, &mut console, &mut reports);

    let alerts = readings(&reports)[0].alerts;
    assert!(alerts.contains(bms_host::AlertKind::Uvlo));
    assert!(alerts.contains(bms_host::AlertKind::ChargeHigh));
    assert_eq!(alerts.len(), 2);
}
