//! Access Port registers and the `MemoryAp` view.

use bitfield::bitfield;

/// AP register addresses within the currently selected bank.
pub mod addr {
    pub const CSW: u16 = 0x00;
    pub const TAR: u16 = 0x04;
    pub const DRW: u16 = 0x0C;
    pub const CFG: u16 = 0xF4;
    pub const BASE: u16 = 0xF8;
    pub const IDR: u16 = 0xFC;
}

bitfield! {
    /// Control/Status Word of a MEM-AP.
    #[derive(Clone, Copy)]
    pub struct Csw(u32);
    impl Debug;
    pub dbgswenable, set_dbgswenable: 31;
    pub mastertype_debug, set_mastertype_debug: 29;
    pub spiden, set_spiden: 23;
    pub hprot1, set_hprot1: 25;
    pub trinprog, _: 7;
    pub deviceen, _: 6;
    pub addrinc_single, set_addrinc_single: 4;
    pub u8, size, set_size: 2, 0;
}

impl Csw {
    pub const SIZE_BYTE: u8 = 0;
    pub const SIZE_HALF: u8 = 1;
    pub const SIZE_WORD: u8 = 2;

    /// Base value this core always programs: debug software access, the
    /// debug master type, and single auto-increment enabled. Size is set
    /// per-transfer by the memory engine.
    pub fn base() -> Self {
        let mut csw = Csw(0);
        csw.set_dbgswenable(true);
        csw.set_mastertype_debug(true);
        csw.set_spiden(true);
        csw.set_addrinc_single(true);
        csw
    }

    pub fn with_size(mut self, size: u8) -> Self {
        self.set_size(size);
        self
    }
}

impl From<u32> for Csw {
    fn from(raw: u32) -> Self {
        Csw(raw)
    }
}

impl From<Csw> for u32 {
    fn from(csw: Csw) -> Self {
        csw.0
    }
}

/// A view into one AP belonging to a DP.
#[derive(Debug, Clone, Copy)]
pub struct MemoryAp {
    pub apsel: u8,
    /// Cached CSW base value (protection bits + bus type); refreshed by the
    /// memory engine before every chunk.
    pub csw_base: Csw,
}

impl MemoryAp {
    pub fn new(apsel: u8) -> Self {
        Self {
            apsel,
            csw_base: Csw::base(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_csw_sets_expected_bits() {
        let csw = Csw::base();
        assert!(csw.dbgswenable());
        assert!(csw.mastertype_debug());
        assert!(csw.addrinc_single());
        assert_eq!(csw.size(), 0);
    }

    #[test]
    fn with_size_only_touches_size_field() {
        let csw = Csw::base().with_size(Csw::SIZE_WORD);
        assert_eq!(csw.size(), Csw::SIZE_WORD);
        assert!(csw.dbgswenable());
    }
}
