//! LTC2944 status register alerts.

use serde::Serialize;

/// One alert bit of the status register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AlertKind {
    Uvlo,
    Voltage,
    ChargeLow,
    ChargeHigh,
    Temperature,
    ChargeOverUnderFlow,
    Current,
}

impl AlertKind {
    /// All alerts, ordered by status bit
    pub const ALL: [AlertKind; 7] = [
        AlertKind::Uvlo,
        AlertKind::Voltage,
        AlertKind::ChargeLow,
        AlertKind::ChargeHigh,
        AlertKind::Temperature,
        AlertKind::ChargeOverUnderFlow,
        AlertKind::Current,
    ];

    pub fn bit(self) -> u8 {
        self as u8
    }

    pub fn description(self) -> &'static str {
        match self {
            AlertKind::Uvlo => "UVLO Alert",
            AlertKind::Voltage => "Voltage Alert",
            AlertKind::ChargeLow => "Charge Low Alert",
            AlertKind::ChargeHigh => "Charge High Alert",
            AlertKind::Temperature => "Temperature Alert",
            AlertKind::ChargeOverUnderFlow => "Charge Over/Under Flow Alert",
            AlertKind::Current => "Current Alert",
        }
    }
}

/// Set of alerts raised in one status read
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AlertSet(u8);

impl AlertSet {
    pub fn contains(self, kind: AlertKind) -> bool {
        self.0 & (1 << kind.bit()) != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Raised alerts, highest status bit first
    pub fn iter(self) -> impl Iterator<Item = AlertKind> {
        AlertKind::ALL
            .into_iter()
            .rev()
            .filter(move |&kind| self.contains(kind))
    }
}

/// Decode the status register into the alerts it reports
pub fn check_alerts(status: u8) -> AlertSet {
    let alerts = AlertSet(status & 0x7F);
    for kind in alerts.iter() {
        log::warn!("Alert: {}", kind.description());
    }
    alerts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uvlo_and_charge_high() {
        let alerts = check_alerts(0b0000_1001);
        assert_eq!(alerts.len(), 2);
        assert!(alerts.contains(AlertKind::Uvlo));
        assert!(alerts.contains(AlertKind::ChargeHigh));
        assert!(!alerts.contains(AlertKind::ChargeLow));
    }

    #[test]
    fn every_bit_maps_to_one_kind() {
        for kind in AlertKind::ALL {
            let alerts = check_alerts(1 << kind.bit());
            assert_eq!(alerts.iter().collect::<Vec<_>>(), vec![kind]);
        }
        assert!(check_alerts(0).is_empty());
        // Bit 7 is reserved
        assert!(check_alerts(0x80).is_empty());
    }

    #[test]
    fn iteration_starts_at_the_highest_bit() {
        let order: Vec<_> = check_alerts(0x7F).iter().collect();
        assert_eq!(order.first(), Some(&AlertKind::Current));
        assert_eq!(order.last(), Some(&AlertKind::Uvlo));
    }
}
