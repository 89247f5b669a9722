use std::time::Duration;

use bms_host::register::OpenWire;
use bms_host::sequencer::SequencerState;
use bms_host::sim::{ManualClock, ScriptedConsole, SimulatedChain, SimulatedGauge};
use bms_host::{BmsError, BoardSettings, CommandDispatcher, DispatchOutcome, Input, Report};

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

fn run(bms: &mut SimDispatcher, opcode: u32) -> (DispatchOutcome, Vec<Report>) {
    let mut console = ScriptedConsole::default();
    let mut reports: Vec<Report> = Vec::new();
    let outcome = bms.execute(opcode, &mut console, &mut reports);
    (outcome, reports)
}

#[test]
fn crc_failure_on_one_ic_keeps_its_previous_cells() {
    let mut bms = dispatcher(2);
    run(&mut bms, 3);
    let (outcome, _) = run(&mut bms, 4);
    assert!(matches!(outcome, DispatchOutcome::Completed));

    let sim = bms.sequencer_mut().transport_mut();
    sim.set_cell_voltages(0, &[3.7; 12]);
    sim.set_cell_voltages(1, &[3.8; 12]);
    sim.corrupt_frames(1, 1);

    run(&mut bms, 3);
    let (outcome, reports) = run(&mut bms, 4);

    match outcome {
        DispatchOutcome::Partial { failed_ics } => assert_eq!(failed_ics, vec![1]),
        other => panic!("expected partial outcome, got {other:?}"),
    }
    let chain = bms.sequencer().chain();
    assert_eq!(chain.ic(0).unwrap().cell_codes(), &[37000; 12]);
    assert_eq!(chain.ic(1).unwrap().cell_codes(), &[36000; 12]);
    assert_eq!(chain.crc_counts(), vec![0, 1]);
    assert!(reports
        .iter()
        .any(|r| matches!(r, Report::CrcError { ics } if ics == &vec![1])));
}

#[test]
fn failed_read_counts_as_crc_error_on_every_ic() {
    let mut bms = dispatcher(2);
    run(&mut bms, 3);
    let (outcome, _) = run(&mut bms, 4);
    assert!(matches!(outcome, DispatchOutcome::Completed));

    let sim = bms.sequencer_mut().transport_mut();
    sim.set_cell_voltages(0, &[3.7; 12]);
    sim.set_cell_voltages(1, &[3.8; 12]);
    sim.fail_reads(1);

    run(&mut bms, 3);
    let (outcome, reports) = run(&mut bms, 4);

    match outcome {
        DispatchOutcome::Partial { failed_ics } => assert_eq!(failed_ics, vec![0, 1]),
        other => panic!("expected partial outcome, got {other:?}"),
    }
    let chain = bms.sequencer().chain();
    assert_eq!(chain.ic(0).unwrap().cell_codes(), &[36000; 12]);
    assert_eq!(chain.ic(1).unwrap().cell_codes(), &[36000; 12]);
    assert_eq!(chain.crc_counts(), vec![1, 1]);
    assert!(reports
        .iter()
        .any(|r| matches!(r, Report::CrcError { ics } if ics == &vec![0, 1])));
}

#[test]
fn gpio_configuration_is_written_without_read_back() {
    use bms_host::constants::{RDCFGA, WRCFGA};

    let mut bms = dispatcher(1);
    let (outcome, reports) = run(&mut bms, 31);

    assert!(matches!(outcome, DispatchOutcome::Completed));
    assert_eq!(bms.sequencer().transport().commands(), &[WRCFGA]);
    assert!(!bms.sequencer().transport().commands().contains(&RDCFGA));
    assert!(matches!(reports.as_slice(), [Report::ConfigWritten(_)]));
}

#[test]
fn unknown_opcode_changes_nothing() {
    let mut bms = dispatcher(1);
    let config = bms.config().clone();
    let (outcome, reports) = run(&mut bms, 9999);

    assert!(matches!(outcome, DispatchOutcome::UnknownCommand(9999)));
    assert!(reports.is_empty());
    assert!(bms.sequencer().transport().commands().is_empty());
    assert_eq!(bms.sequencer().transport().wakes(), 0);
    assert_eq!(bms.sequencer().state(), SequencerState::Idle);
    assert_eq!(bms.config(), &config);
    assert!(bms.gauge().bus().writes().is_empty());
}

#[test]
fn single_open_wire_test_reports_sentinel_and_fault() {
    let mut bms = dispatcher(2);
    bms.sequencer_mut().transport_mut().open_wire(1, 5);
    let (outcome, reports) = run(&mut bms, 19);

    assert!(matches!(outcome, DispatchOutcome::Completed));
    match reports.last() {
        Some(Report::OpenWire(wires)) => assert_eq!(wires, &vec![OpenWire::NONE, OpenWire(5)]),
        other => panic!("unexpected report {other:?}"),
    }
    assert_eq!(bms.sequencer().chain().ic(1).unwrap().system_open_wire, OpenWire(5));
}

#[test]
fn multi_open_wire_test_finds_both_end_wires() {
    let mut bms = dispatcher(2);
    let sim = bms.sequencer_mut().transport_mut();
    sim.open_wire(0, 0);
    sim.open_wire(0, 12);
    let (_, reports) = run(&mut bms, 20);

    match reports.last() {
        Some(Report::OpenWireMulti(wires)) => assert_eq!(wires, &vec![vec![0, 12], vec![]]),
        other => panic!("unexpected report {other:?}"),
    }
}

#[test]
fn diagnostics_pass_on_a_healthy_chain() {
    let mut bms = dispatcher(2);

    let (_, reports) = run(&mut bms, 16);
    let self_tests: Vec<u32> = reports
        .iter()
        .filter_map(|r| match r {
            Report::SelfTest { errors, .. } => Some(*errors),
            _ => None,
        })
        .collect();
    assert_eq!(self_tests, vec![0, 0, 0]);

    let (_, reports) = run(&mut bms, 17);
    assert!(reports.iter().any(|r| matches!(r, Report::Overlap { errors: 0 })));

    let (_, reports) = run(&mut bms, 18);
    let redundancy = reports
        .iter()
        .filter(|r| matches!(r, Report::Redundancy { errors: 0, .. }))
        .count();
    assert_eq!(redundancy, 2);
}

#[test]
fn mux_fault_fails_only_that_ic() {
    let mut bms = dispatcher(2);
    bms.sequencer_mut().transport_mut().set_mux_fault(1, true);
    let (_, reports) = run(&mut bms, 15);
    match reports.last() {
        Some(Report::MuxTest { passed }) => assert_eq!(passed, &vec![true, false]),
        other => panic!("unexpected report {other:?}"),
    }
}

#[test]
fn measurement_loop_stops_on_menu_token_only() {
    let mut bms = dispatcher(1);
    // A number is consumed without stopping; the closed console then yields the menu token
    let mut console = ScriptedConsole::new([Input::Number(5.0)]).with_idle_polls(1);
    let mut reports: Vec<Report> = Vec::new();

    let outcome = bms.execute(11, &mut console, &mut reports);

    assert!(matches!(outcome, DispatchOutcome::Completed));
    let cells = reports
        .iter()
        .filter(|r| matches!(r, Report::Cells { datalog: false, .. }))
        .count();
    assert_eq!(cells, 3);
    assert_eq!(bms.clock().delays(), &[Duration::from_millis(900); 3]);
    assert_eq!(bms.sequencer().transport().commands()[0], bms_host::constants::WRCFGA);
}

#[test]
fn datalog_loop_uses_compact_layout() {
    let mut bms = dispatcher(1);
    let (_, reports) = run(&mut bms, 12);
    assert!(reports
        .iter()
        .any(|r| matches!(r, Report::Cells { datalog: true, .. })));
}

#[test]
fn discharge_pin_is_written_to_configuration() {
    let mut bms = dispatcher(1);
    let mut console = ScriptedConsole::from_tokens("9").unwrap();
    let mut reports: Vec<Report> = Vec::new();
    let outcome = bms.execute(23, &mut console, &mut reports);

    assert!(matches!(outcome, DispatchOutcome::Completed));
    let config = bms.sequencer().transport().config(0).unwrap();
    // DCC9 is bit 0 of CFGR5, above the 4 minute timeout code
    assert_eq!(config[5], 0x51);

    let (_, _) = run(&mut bms, 24);
    assert_eq!(bms.sequencer().transport().config(0).unwrap()[5], 0x50);
}

#[test]
fn out_of_range_discharge_pin_sends_nothing() {
    let mut bms = dispatcher(1);
    let mut console = ScriptedConsole::from_tokens("13").unwrap();
    let mut reports: Vec<Report> = Vec::new();
    let outcome = bms.execute(23, &mut console, &mut reports);

    assert!(matches!(outcome, DispatchOutcome::Failed(BmsError::InvalidInput(_))));
    assert!(bms.sequencer().transport().commands().is_empty());
    assert_eq!(bms.sequencer().state(), SequencerState::Idle);
}

#[test]
fn comm_i2c_read_writes_twice_before_reading() {
    use bms_host::constants::*;

    let mut bms = dispatcher(1);
    let (outcome, reports) = run(&mut bms, 30);
    assert!(matches!(outcome, DispatchOutcome::Completed));
    assert_eq!(
        bms.sequencer().transport().commands(),
        &[WRCOMM, STCOMM, WRCOMM, STCOMM, RDCOMM]
    );
    match reports.last() {
        Some(Report::CommRead(frames)) => assert_eq!(frames[0].data, COMM_I2C_READ_DATA),
        other => panic!("unexpected report {other:?}"),
    }
}

#[test]
fn pec_counter_reset() {
    let mut bms = dispatcher(2);
    bms.sequencer_mut().transport_mut().corrupt_frames(0, 1);
    run(&mut bms, 2);
    let (_, reports) = run(&mut bms, 21);
    assert!(matches!(reports.as_slice(), [Report::PecCount(c)] if c == &vec![1, 0]));

    let (_, reports) = run(&mut bms, 22);
    assert!(matches!(reports.as_slice(), [Report::PecCount(c)] if c == &vec![0, 0]));
}
