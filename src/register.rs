//! In-memory mirror of the register groups of every IC in the daisy chain.
//!
//! Reads are committed per IC only after every frame fetched for that IC has
//! passed verification. A failing IC keeps its previous contents and has its
//! PEC counter bumped once for the read.

use serde::Serialize;

use crate::constants::*;
use crate::conversion::{afe_voltage, die_temperature, sum_of_cells};
use crate::error::{BmsError, Result};
use crate::pec::{pec15, PacketIntegrity};
use crate::types::{AuxVoltages, CellVoltages, RegisterFrame, RegisterSelect, StatusReading};

/// Transmit/receive buffers of one register group
#[derive(Debug, Clone, Default)]
pub struct RegisterGroup {
    tx: [u8; GROUP_DATA_LEN],
    rx: Option<[u8; GROUP_FRAME_LEN]>,
}

impl RegisterGroup {
    /// Stage data for the next write of this group
    pub fn set_tx(&mut self, data: [u8; GROUP_DATA_LEN]) {
        self.tx = data;
    }

    /// Data staged for writing
    pub fn tx(&self) -> &[u8; GROUP_DATA_LEN] {
        &self.tx
    }

    /// Last verified frame, data followed by the received PEC
    pub fn rx(&self) -> Option<&[u8; GROUP_FRAME_LEN]> {
        self.rx.as_ref()
    }

    fn tx_frame(&self, ic: usize) -> RegisterFrame {
        RegisterFrame {
            ic,
            data: self.tx,
            pec: pec15(&self.tx),
        }
    }

    fn rx_frame(&self, ic: usize) -> Option<RegisterFrame> {
        self.rx.map(|frame| {
            let mut data = [0u8; GROUP_DATA_LEN];
            data.copy_from_slice(&frame[..GROUP_DATA_LEN]);
            RegisterFrame {
                ic,
                data,
                pec: u16::from_be_bytes([frame[GROUP_DATA_LEN], frame[GROUP_DATA_LEN + 1]]),
            }
        })
    }
}

/// Result of the open-wire test on one IC.
///
/// `0xFFFF` means no open wire was found. Any other value is the index n of
/// the open sense wire Cn (0..=12). Wire n is the top terminal of cell n and
/// the bottom terminal of cell n+1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OpenWire(pub u16);

impl OpenWire {
    /// No open wire found
    pub const NONE: OpenWire = OpenWire(0xFFFF);

    /// True when a wire index is recorded
    pub fn is_fault(self) -> bool {
        self != Self::NONE
    }

    /// Index of the open wire, if any
    pub fn wire(self) -> Option<u16> {
        self.is_fault().then_some(self.0)
    }
}

impl Default for OpenWire {
    fn default() -> Self {
        Self::NONE
    }
}

/// Raw status register contents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusCodes {
    /// SC, ITMP, VA, VD
    pub codes: [u16; STAT_CHANNELS],
    pub flags: [u8; 3],
    pub mux_fail: bool,
    pub thermal_shutdown: bool,
}

impl Default for StatusCodes {
    fn default() -> Self {
        Self {
            codes: [CLEARED_CODE; STAT_CHANNELS],
            flags: [0; 3],
            mux_fail: false,
            thermal_shutdown: false,
        }
    }
}

/// One LTC6811 in the chain
#[derive(Debug, Clone)]
pub struct AnalogFrontEnd {
    pub config: RegisterGroup,
    pub pwm: RegisterGroup,
    pub sctrl: RegisterGroup,
    pub com: RegisterGroup,
    cells: [u16; CELL_CHANNELS],
    aux: [u16; AUX_CHANNELS],
    stat: StatusCodes,
    crc_count: u32,
    pub system_open_wire: OpenWire,
}

impl Default for AnalogFrontEnd {
    fn default() -> Self {
        Self {
            config: RegisterGroup::default(),
            pwm: RegisterGroup::default(),
            sctrl: RegisterGroup::default(),
            com: RegisterGroup::default(),
            cells: [CLEARED_CODE; CELL_CHANNELS],
            aux: [CLEARED_CODE; AUX_CHANNELS],
            stat: StatusCodes::default(),
            crc_count: 0,
            system_open_wire: OpenWire::NONE,
        }
    }
}

impl AnalogFrontEnd {
    /// Raw cell codes C1..C12; `0xFFFF` after a clear
    pub fn cell_codes(&self) -> &[u16; CELL_CHANNELS] {
        &self.cells
    }

    /// Raw GPIO1..GPIO5 and VREF2 codes
    pub fn aux_codes(&self) -> &[u16; AUX_CHANNELS] {
        &self.aux
    }

    /// Raw status registers
    pub fn status_codes(&self) -> &StatusCodes {
        &self.stat
    }

    /// Reads rejected for this IC since the last reset
    pub fn crc_count(&self) -> u32 {
        self.crc_count
    }

    /// Record one rejected read
    pub fn mark_crc_failure(&mut self) {
        self.crc_count = self.crc_count.saturating_add(1);
    }

    /// Clear the rejected-read counter
    pub fn reset_crc_count(&mut self) {
        self.crc_count = 0;
    }

    fn apply(&mut self, readback: Readback, frame: &[u8; GROUP_FRAME_LEN]) {
        let word = |k: usize| u16::from_le_bytes([frame[2 * k], frame[2 * k + 1]]);
        match readback {
            Readback::Config => self.config.rx = Some(*frame),
            Readback::Pwm => self.pwm.rx = Some(*frame),
            Readback::SControl => self.sctrl.rx = Some(*frame),
            Readback::Comm => self.com.rx = Some(*frame),
            Readback::Cells(group) => {
                for k in 0..CODES_PER_GROUP {
                    self.cells[group as usize * CODES_PER_GROUP + k] = word(k);
                }
            }
            Readback::Aux(group) => {
                for k in 0..CODES_PER_GROUP {
                    self.aux[group as usize * CODES_PER_GROUP + k] = word(k);
                }
            }
            Readback::Stat(0) => {
                for k in 0..CODES_PER_GROUP {
                    self.stat.codes[k] = word(k);
                }
            }
            Readback::Stat(_) => {
                self.stat.codes[3] = word(0);
                self.stat.flags = [frame[2], frame[3], frame[4]];
                self.stat.mux_fail = frame[5] & 0x02 != 0;
                self.stat.thermal_shutdown = frame[5] & 0x01 != 0;
            }
        }
    }

    /// Cell codes in volts, tagged with chain position `ic`
    pub fn cell_voltages(&self, ic: usize) -> CellVoltages {
        CellVoltages {
            ic,
            volts: self.cells.iter().map(|&c| afe_voltage(c)).collect(),
        }
    }

    /// GPIO and reference codes in volts
    pub fn aux_voltages(&self, ic: usize) -> AuxVoltages {
        let mut gpio = [0.0; 5];
        for (volts, &code) in gpio.iter_mut().zip(&self.aux[..5]) {
            *volts = afe_voltage(code);
        }
        AuxVoltages {
            ic,
            gpio,
            vref2: afe_voltage(self.aux[5]),
        }
    }

    /// Decoded status registers
    pub fn status(&self, ic: usize) -> StatusReading {
        StatusReading {
            ic,
            sum_of_cells: sum_of_cells(self.stat.codes[0]),
            die_temperature: die_temperature(self.stat.codes[1]),
            analog_supply: afe_voltage(self.stat.codes[2]),
            digital_supply: afe_voltage(self.stat.codes[3]),
            flags: self.stat.flags,
            mux_fail: self.stat.mux_fail,
            thermal_shutdown: self.stat.thermal_shutdown,
        }
    }
}

/// A register group read command and where its data lands in the model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readback {
    Config,
    Cells(u8),
    Aux(u8),
    Stat(u8),
    Pwm,
    SControl,
    Comm,
}

impl Readback {
    /// Read command code for this group
    pub fn command(self) -> u16 {
        match self {
            Readback::Config => RDCFGA,
            Readback::Cells(0) => RDCVA,
            Readback::Cells(1) => RDCVB,
            Readback::Cells(2) => RDCVC,
            Readback::Cells(_) => RDCVD,
            Readback::Aux(0) => RDAUXA,
            Readback::Aux(_) => RDAUXB,
            Readback::Stat(0) => RDSTATA,
            Readback::Stat(_) => RDSTATB,
            Readback::Pwm => RDPWM,
            Readback::SControl => RDSCTRL,
            Readback::Comm => RDCOMM,
        }
    }

    /// Cell voltage groups covered by `select`
    pub fn cells(select: RegisterSelect) -> Vec<Readback> {
        match select {
            RegisterSelect::All => (0..4).map(Readback::Cells).collect(),
            RegisterSelect::GroupA => vec![Readback::Cells(0)],
            RegisterSelect::GroupB => vec![Readback::Cells(1)],
            RegisterSelect::GroupC => vec![Readback::Cells(2)],
            RegisterSelect::GroupD => vec![Readback::Cells(3)],
        }
    }

    /// Auxiliary groups covered by `select`; only A and B exist
    pub fn aux(select: RegisterSelect) -> Result<Vec<Readback>> {
        match select {
            RegisterSelect::All => Ok(vec![Readback::Aux(0), Readback::Aux(1)]),
            RegisterSelect::GroupA => Ok(vec![Readback::Aux(0)]),
            RegisterSelect::GroupB => Ok(vec![Readback::Aux(1)]),
            other => Err(BmsError::InvalidRegisterGroup(other)),
        }
    }

    /// Status groups covered by `select`; only A and B exist
    pub fn stat(select: RegisterSelect) -> Result<Vec<Readback>> {
        match select {
            RegisterSelect::All => Ok(vec![Readback::Stat(0), Readback::Stat(1)]),
            RegisterSelect::GroupA => Ok(vec![Readback::Stat(0)]),
            RegisterSelect::GroupB => Ok(vec![Readback::Stat(1)]),
            other => Err(BmsError::InvalidRegisterGroup(other)),
        }
    }
}

/// Which ICs failed verification during a read
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadOutcome {
    pub failed: Vec<usize>,
}

impl ReadOutcome {
    /// True when every IC verified
    pub fn is_verified(&self) -> bool {
        self.failed.is_empty()
    }

    /// Union of the failed ICs of two reads
    pub fn merge(&mut self, other: ReadOutcome) {
        for ic in other.failed {
            if !self.failed.contains(&ic) {
                self.failed.push(ic);
            }
        }
        self.failed.sort_unstable();
    }
}

/// Register model of the whole daisy chain, indexed by chain position
#[derive(Debug, Clone)]
pub struct Chain {
    ics: Vec<AnalogFrontEnd>,
}

impl Chain {
    /// Model of `total_ic` ICs in their power-on state
    pub fn new(total_ic: usize) -> Self {
        Self {
            ics: vec![AnalogFrontEnd::default(); total_ic],
        }
    }

    pub fn len(&self) -> usize {
        self.ics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ics.is_empty()
    }

    /// IC at chain position `index`
    pub fn ic(&self, index: usize) -> Option<&AnalogFrontEnd> {
        self.ics.get(index)
    }

    pub fn ics(&self) -> &[AnalogFrontEnd] {
        &self.ics
    }

    pub fn ics_mut(&mut self) -> &mut [AnalogFrontEnd] {
        &mut self.ics
    }

    /// Verify and commit the frames of one read cycle.
    ///
    /// `reads` holds, per register group read, one frame per IC. An IC whose
    /// frame count is short or whose any frame fails verification is left
    /// untouched apart from its PEC counter.
    pub fn commit(
        &mut self,
        reads: &[(Readback, Vec<[u8; GROUP_FRAME_LEN]>)],
        verifier: &dyn PacketIntegrity,
    ) -> ReadOutcome {
        let mut outcome = ReadOutcome::default();
        for (index, ic) in self.ics.iter_mut().enumerate() {
            let verified = reads.iter().all(|(_, frames)| {
                frames
                    .get(index)
                    .map(|frame| verifier.verify(frame))
                    .unwrap_or(false)
            });
            if verified {
                for (readback, frames) in reads {
                    ic.apply(*readback, &frames[index]);
                }
            } else {
                log::warn!("{}, keeping previous data", BmsError::Crc { ic: index + 1 });
                ic.mark_crc_failure();
                outcome.failed.push(index);
            }
        }
        outcome
    }

    /// Count a read that never arrived as a failure on every IC
    pub fn reject_all(&mut self) -> ReadOutcome {
        for (index, ic) in self.ics.iter_mut().enumerate() {
            log::warn!("{}, keeping previous data", BmsError::Crc { ic: index + 1 });
            ic.mark_crc_failure();
        }
        ReadOutcome {
            failed: (0..self.ics.len()).collect(),
        }
    }

    /// Configuration frames staged for writing, with computed PECs
    pub fn config_written(&self) -> Vec<RegisterFrame> {
        self.tx_frames(|ic| &ic.config)
    }

    /// Configuration frames last read back
    pub fn config_read(&self) -> Vec<RegisterFrame> {
        self.rx_frames(|ic| &ic.config)
    }

    /// Staged frames of one register group, one per IC
    pub fn tx_frames(&self, group: impl Fn(&AnalogFrontEnd) -> &RegisterGroup) -> Vec<RegisterFrame> {
        self.ics
            .iter()
            .enumerate()
            .map(|(i, ic)| group(ic).tx_frame(i))
            .collect()
    }

    /// Verified frames of one register group for ICs that have one
    pub fn rx_frames(&self, group: impl Fn(&AnalogFrontEnd) -> &RegisterGroup) -> Vec<RegisterFrame> {
        self.ics
            .iter()
            .enumerate()
            .filter_map(|(i, ic)| group(ic).rx_frame(i))
            .collect()
    }

    /// Rejected-read counter of every IC
    pub fn crc_counts(&self) -> Vec<u32> {
        self.ics.iter().map(AnalogFrontEnd::crc_count).collect()
    }

    /// Clear every rejected-read counter
    pub fn reset_crc_counts(&mut self) {
        for ic in &mut self.ics {
            ic.reset_crc_count();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pec::{seal, Pec15};

    fn cell_frame(codes: [u16; 3]) -> [u8; GROUP_FRAME_LEN] {
        let mut data = [0u8; GROUP_DATA_LEN];
        for (k, code) in codes.iter().enumerate() {
            data[2 * k..2 * k + 2].copy_from_slice(&code.to_le_bytes());
        }
        seal(data)
    }

    #[test]
    fn verified_frames_are_decoded() {
        let mut chain = Chain::new(1);
        let reads = vec![(Readback::Cells(1), vec![cell_frame([36000, 36100, 36200])])];
        let outcome = chain.commit(&reads, &Pec15);
        assert!(outcome.is_verified());
        let ic = chain.ic(0).unwrap();
        assert_eq!(&ic.cell_codes()[3..6], &[36000, 36100, 36200]);
        assert_eq!(ic.cell_codes()[0], CLEARED_CODE);
    }

    #[test]
    fn corrupted_ic_keeps_previous_codes() {
        let mut chain = Chain::new(2);
        let good = vec![(
            Readback::Cells(0),
            vec![cell_frame([1, 2, 3]), cell_frame([4, 5, 6])],
        )];
        chain.commit(&good, &Pec15);

        let mut bad = cell_frame([40, 50, 60]);
        bad[0] ^= 0xFF;
        let next = vec![(Readback::Cells(0), vec![cell_frame([10, 20, 30]), bad])];
        let outcome = chain.commit(&next, &Pec15);

        assert_eq!(outcome.failed, vec![1]);
        assert_eq!(&chain.ic(0).unwrap().cell_codes()[..3], &[10, 20, 30]);
        assert_eq!(&chain.ic(1).unwrap().cell_codes()[..3], &[4, 5, 6]);
        assert_eq!(chain.crc_counts(), vec![0, 1]);
    }

    #[test]
    fn one_bad_group_rejects_the_whole_ic() {
        let mut chain = Chain::new(1);
        let mut bad = cell_frame([7, 8, 9]);
        bad[7] ^= 0x01;
        let reads = vec![
            (Readback::Cells(0), vec![cell_frame([1, 2, 3])]),
            (Readback::Cells(1), vec![bad]),
        ];
        let outcome = chain.commit(&reads, &Pec15);
        assert_eq!(outcome.failed, vec![0]);
        assert_eq!(chain.ic(0).unwrap().cell_codes()[0], CLEARED_CODE);
        assert_eq!(chain.ic(0).unwrap().crc_count(), 1);
    }

    #[test]
    fn rejected_read_bumps_every_ic() {
        let mut chain = Chain::new(3);
        chain.commit(&[(Readback::Cells(0), vec![cell_frame([1, 2, 3]); 3])], &Pec15);

        let outcome = chain.reject_all();

        assert_eq!(outcome.failed, vec![0, 1, 2]);
        assert_eq!(chain.crc_counts(), vec![1, 1, 1]);
        assert_eq!(&chain.ic(2).unwrap().cell_codes()[..3], &[1, 2, 3]);
        assert_eq!(BmsError::Crc { ic: 3 }.to_string(), "PEC mismatch on IC 3");
    }

    #[test]
    fn status_group_b_flags() {
        let mut chain = Chain::new(1);
        let reads = vec![(
            Readback::Stat(1),
            vec![seal([0x10, 0x27, 0xAA, 0x55, 0x0F, 0x03])],
        )];
        chain.commit(&reads, &Pec15);
        let stat = chain.ic(0).unwrap().status_codes();
        assert_eq!(stat.codes[3], 10000);
        assert_eq!(stat.flags, [0xAA, 0x55, 0x0F]);
        assert!(stat.mux_fail);
        assert!(stat.thermal_shutdown);
    }

    #[test]
    fn open_wire_sentinel() {
        assert!(!OpenWire::NONE.is_fault());
        assert_eq!(OpenWire(0xFFFF).wire(), None);
        assert_eq!(OpenWire(5).wire(), Some(5));
    }

    #[test]
    fn aux_rejects_cell_only_groups() {
        assert!(Readback::aux(RegisterSelect::GroupC).is_err());
        assert_eq!(Readback::stat(RegisterSelect::GroupB).unwrap(), vec![Readback::Stat(1)]);
    }
}
