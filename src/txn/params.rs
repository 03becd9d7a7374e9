//! Transaction parameters

use serde::{Deserialize, Serialize};
use std::ops::BitOr;

use crate::constants::TX_PARAM_NONE;

/// Flag set passed to `PersistentHeap::begin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TxParams(u32);

impl TxParams {
    /// No special flags.
    pub const NONE: TxParams = TxParams(TX_PARAM_NONE);

    /// Reject every mutation with `PMHEAP_TX_STATE`.
    pub const READ_ONLY: TxParams = TxParams(0x1);

    const KNOWN: u32 = 0x1;

    /// Build from raw bits, rejecting unknown flags.
    pub fn from_bits(bits: u32) -> Option<Self> {
        if bits & !Self::KNOWN != 0 {
            None
        } else {
            Some(TxParams(bits))
        }
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: TxParams) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_read_only(self) -> bool {
        self.contains(TxParams::READ_ONLY)
    }
}

impl BitOr for TxParams {
    type Output = TxParams;

    fn bitor(self, rhs: TxParams) -> TxParams {
        TxParams(self.0 | rhs.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_none() {
        assert_eq!(TxParams::default(), TxParams::NONE);
        assert_eq!(TxParams::NONE.bits(), TX_PARAM_NONE);
        assert!(!TxParams::NONE.is_read_only());
    }

    #[test]
    fn test_from_bits() {
        assert_eq!(TxParams::from_bits(1), Some(TxParams::READ_ONLY));
        assert_eq!(TxParams::from_bits(0x80), None);
        assert!((TxParams::NONE | TxParams::READ_ONLY).is_read_only());
    }
}
