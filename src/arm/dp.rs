//! Debug Port registers and the SWD/JTAG backend split.

use bitfield::bitfield;
use jep106::JEP106Code;

/// Addresses a single Debug Port on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DpAddress {
    /// The single DP on the bus; only valid when there is exactly one.
    Default,
    /// A DPv2+ multidrop target, selected with the contained `TARGETSEL` value.
    Multidrop(u32),
}

impl DpAddress {
    pub(crate) fn targetsel(self) -> Option<u32> {
        match self {
            DpAddress::Default => None,
            DpAddress::Multidrop(v) => Some(v),
        }
    }
}

/// DP protocol version, from `DPIDR.version`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DpVersion {
    /// JTAG-only DP, no `DPIDR`.
    V0,
    V1,
    V2,
    /// ADIv6 DP.
    V3,
}

impl DpVersion {
    pub(crate) fn from_bits(bits: u8) -> Self {
        match bits {
            1 => DpVersion::V1,
            2 => DpVersion::V2,
            3 => DpVersion::V3,
            _ => DpVersion::V0,
        }
    }

    pub(crate) fn supports_targetsel(self) -> bool {
        matches!(self, DpVersion::V2 | DpVersion::V3)
    }
}

bitfield! {
    /// `ABORT` register (write-only). Clears sticky error flags and requests
    /// a `DAPABORT` of the current AP transfer.
    #[derive(Clone, Copy, Default)]
    pub struct Abort(u32);
    impl Debug;
    pub orunerrclr, set_orunerrclr: 4;
    pub wderrclr, set_wderrclr: 3;
    pub stkerrclr, set_stkerrclr: 2;
    pub stkcmpclr, set_stkcmpclr: 1;
    pub dapabort, set_dapabort: 0;
}

bitfield! {
    /// `CTRL/STAT` register.
    #[derive(Clone, Copy, Default)]
    pub struct CtrlStat(u32);
    impl Debug;
    pub csyspwrupack, _: 31;
    pub csyspwrupreq, set_csyspwrupreq: 30;
    pub cdbgpwrupack, _: 29;
    pub cdbgpwrupreq, set_cdbgpwrupreq: 28;
    pub wdataerr, _: 7;
    pub stickyerr, _: 5;
    pub stickycmp, _: 4;
    pub stickyorun, _: 1;
    pub orundetect, set_orundetect: 0;
}

impl CtrlStat {
    /// The four sticky bits as a tightly packed nibble, matching the layout
    /// `abort.write_mask` expects from [`Abort::from_sticky_bits`].
    pub(crate) fn sticky_bits(self) -> u8 {
        (self.stickyorun() as u8)
            | (self.stickycmp() as u8) << 1
            | (self.stickyerr() as u8) << 2
            | (self.wdataerr() as u8) << 3
    }
}

impl Abort {
    /// Build the `ABORT` clear mask corresponding to a set of sticky bits
    /// read out of `CTRL/STAT` (same nibble layout as [`CtrlStat::sticky_bits`]).
    pub(crate) fn from_sticky_bits(bits: u8) -> Self {
        let mut abort = Abort(0);
        abort.set_orunerrclr(bits & 0x1 != 0);
        abort.set_stkcmpclr(bits & 0x2 != 0);
        abort.set_stkerrclr(bits & 0x4 != 0);
        abort.set_wderrclr(bits & 0x8 != 0);
        abort
    }
}

impl From<u32> for Abort {
    fn from(raw: u32) -> Self {
        Abort(raw)
    }
}

impl From<Abort> for u32 {
    fn from(abort: Abort) -> Self {
        abort.0
    }
}

impl From<u32> for CtrlStat {
    fn from(raw: u32) -> Self {
        CtrlStat(raw)
    }
}

impl From<CtrlStat> for u32 {
    fn from(ctrl: CtrlStat) -> Self {
        ctrl.0
    }
}

impl From<u32> for Select {
    fn from(raw: u32) -> Self {
        Select(raw)
    }
}

impl From<Select> for u32 {
    fn from(select: Select) -> Self {
        select.0
    }
}

bitfield! {
    /// `SELECT` register: AP bank selection and (DPv1) DP register bank.
    #[derive(Clone, Copy, Default)]
    pub struct Select(u32);
    impl Debug;
    pub u8, apsel, set_apsel: 31, 24;
    pub u8, apbanksel, set_apbanksel: 7, 4;
    pub u8, dpbanksel, set_dpbanksel: 3, 0;
}

bitfield! {
    /// `DPIDR`/`IDCODE`: identity of the DP, read at line reset.
    #[derive(Clone, Copy)]
    pub struct Dpidr(u32);
    impl Debug;
    pub u8, revision, _: 31, 28;
    pub u8, part_no, _: 27, 20;
    pub min, _: 16;
    pub u8, version, _: 15, 12;
    pub u16, designer, _: 11, 1;
}

impl Dpidr {
    pub fn dp_version(self) -> DpVersion {
        DpVersion::from_bits(self.version())
    }

    pub fn jep106(self) -> JEP106Code {
        let designer = self.designer();
        JEP106Code::new((designer >> 7) as u8, (designer & 0x7F) as u8)
    }
}

/// DP register addresses (word-aligned, within the active bank).
pub mod addr {
    /// Read: `DPIDR`/`IDCODE`. Write: `ABORT`.
    pub const ABORT_IDCODE: u16 = 0x0;
    pub const CTRL_STAT: u16 = 0x4;
    pub const SELECT: u16 = 0x8;
    /// Read: `RDBUFF`. Write (DPv2+): `TARGETSEL` (no-ack).
    pub const RDBUFF_TARGETSEL: u16 = 0xC;
}

/// Sticky fault state captured from the last transaction issued on this DP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StickyFault {
    #[default]
    None,
    Wait,
    Fault,
    NoResponse,
}

/// Per-link backend split: SWD and JTAG recover from a `NO_RESPONSE`/protocol
/// fault differently, but share the rest of the DP state machine.
pub trait DpBackend: std::fmt::Debug {
    /// Whether this link supports the SWD-only phantom-data-phase absorption
    /// and line-reset recovery path.
    fn is_swd(&self) -> bool;
}

#[derive(Debug, Default)]
pub struct SwdBackend;
impl DpBackend for SwdBackend {
    fn is_swd(&self) -> bool {
        true
    }
}

#[derive(Debug, Default)]
pub struct JtagBackend;
impl DpBackend for JtagBackend {
    fn is_swd(&self) -> bool {
        false
    }
}

/// One ADI debug-port session: identity, link kind, and the fault state the
/// transaction engine consults between operations.
#[derive(Debug)]
pub struct Dp<B: DpBackend> {
    pub address: DpAddress,
    pub version: DpVersion,
    pub fault: StickyFault,
    pub select: Select,
    backend: B,
}

impl<B: DpBackend + Default> Dp<B> {
    pub fn new(address: DpAddress) -> Self {
        Self {
            address,
            version: DpVersion::V1,
            fault: StickyFault::None,
            select: Select(0),
            backend: B::default(),
        }
    }
}

impl<B: DpBackend> Dp<B> {
    pub fn is_swd(&self) -> bool {
        self.backend.is_swd()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sticky_bits_round_trip_through_abort_mask() {
        let mut ctrl = CtrlStat(0);
        ctrl.0 |= 1 << 1; // stickyorun
        ctrl.0 |= 1 << 5; // stickyerr
        let bits = ctrl.sticky_bits();
        let abort = Abort::from_sticky_bits(bits);
        assert!(abort.orunerrclr());
        assert!(abort.stkerrclr());
        assert!(!abort.stkcmpclr());
        assert!(!abort.wderrclr());
    }

    #[test]
    fn dp_version_from_dpidr_bits() {
        assert_eq!(DpVersion::from_bits(2), DpVersion::V2);
        assert!(DpVersion::V2.supports_targetsel());
        assert!(!DpVersion::V1.supports_targetsel());
    }
}
