//! # Chip Operating States

use serde::Serialize;

/// Operating state reported by REQUEST_DEVICE_STATE
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChipState {
    Sleep,
    SpiActive,
    Ready,
    Ready2,
    TxTune,
    RxTune,
    Tx,
    Rx,
    /// Any code the driver does not know (including "no change")
    Unknown,
}

impl ChipState {
    /// Decode the low nibble of the first state response byte
    pub fn from_code(code: u8) -> Self {
        match code & 0x0F {
            1 => ChipState::Sleep,
            2 => ChipState::SpiActive,
            3 => ChipState::Ready,
            4 => ChipState::Ready2,
            5 => ChipState::TxTune,
            6 => ChipState::RxTune,
            7 => ChipState::Tx,
            8 => ChipState::Rx,
            _ => ChipState::Unknown,
        }
    }

    /// Numeric code as used by CHANGE_STATE
    pub fn code(self) -> u8 {
        match self {
            ChipState::Sleep => 1,
            ChipState::SpiActive => 2,
            ChipState::Ready => 3,
            ChipState::Ready2 => 4,
            ChipState::TxTune => 5,
            ChipState::RxTune => 6,
            ChipState::Tx => 7,
            ChipState::Rx => 8,
            ChipState::Unknown => 0,
        }
    }

    /// Transitions the driver is allowed to request
    ///
    /// RX and TX are never entered directly from each other; the driver
    /// always routes through READY.
    pub fn can_enter(self, next: ChipState) -> bool {
        if self == next {
            return true;
        }

        match (self, next) {
            (ChipState::Rx, ChipState::Tx) | (ChipState::Tx, ChipState::Rx) => false,
            (_, ChipState::Ready) => true,
            (ChipState::Ready, ChipState::Rx) | (ChipState::Ready, ChipState::Tx) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_code_masks_high_nibble() {
        assert_eq!(ChipState::from_code(0x03), ChipState::Ready);
        assert_eq!(ChipState::from_code(0xF7), ChipState::Tx);
        assert_eq!(ChipState::from_code(0x08), ChipState::Rx);
        assert_eq!(ChipState::from_code(0x00), ChipState::Unknown);
        assert_eq!(ChipState::from_code(0x0C), ChipState::Unknown);
    }

    #[test]
    fn test_code_round_trip_for_known_states() {
        for code in 1..=8u8 {
            assert_eq!(ChipState::from_code(code).code(), code);
        }
    }

    #[test]
    fn test_rx_tx_route_through_ready() {
        assert!(!ChipState::Rx.can_enter(ChipState::Tx));
        assert!(!ChipState::Tx.can_enter(ChipState::Rx));
        assert!(ChipState::Rx.can_enter(ChipState::Ready));
        assert!(ChipState::Ready.can_enter(ChipState::Tx));
        assert!(ChipState::Tx.can_enter(ChipState::Ready));
        assert!(ChipState::Ready.can_enter(ChipState::Rx));
    }

    #[test]
    fn test_unknown_recovers_through_ready() {
        assert!(ChipState::Unknown.can_enter(ChipState::Ready));
        assert!(!ChipState::Unknown.can_enter(ChipState::Tx));
        assert!(ChipState::Tx.can_enter(ChipState::Tx));
    }
}
