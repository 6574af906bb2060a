//! Probe capability and adaptor-quirk bitmasks.
//!
//! Mirrors the capability byte returned by `DAP_Info(CAPABILITIES)` and the
//! adaptor-specific corrections applied based on product string and
//! firmware version.

use bitflags::bitflags;

bitflags! {
    /// Capabilities reported by `DAP_Info(CAPABILITIES)`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Capabilities: u16 {
        const SWD = 1 << 0;
        const JTAG = 1 << 1;
        const SWO_UART = 1 << 2;
        const SWO_MANCHESTER = 1 << 3;
        const ATOMIC = 1 << 4;
        const TEST_DOMAIN_TIMER = 1 << 5;
        const SWO_STREAMING = 1 << 6;
    }
}

impl Capabilities {
    pub(crate) fn from_info_byte(byte: u8) -> Self {
        Capabilities::from_bits_truncate(byte as u16)
    }
}

bitflags! {
    /// Adaptor-specific workarounds selected during the connect handshake.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Quirks: u16 {
        /// Adaptor mis-handles JTAG scan chains with more than one TAP.
        const NO_JTAG_MULTI_TAP = 1 << 0;
        /// Adaptor omits the data phase after a NO_RESPONSE ack on SWD.
        const BAD_SWD_NO_RESP_DATA_PHASE = 1 << 1;
        /// `DAP_SWD_Sequence` IN-sequence responses need a one-bit shift correction.
        const BROKEN_SWD_SEQUENCE = 1 << 2;
        /// An extra zero-length USB IN must be issued after a full-packet bulk IN.
        const NEEDS_EXTRA_ZLP_READ = 1 << 3;
        /// `DAP_SWD_Sequence` is not implemented; emulate with `DAP_SWJ_Sequence`.
        const NO_SWD_SEQUENCE = 1 << 4;
    }
}

/// Parsed `v[major].minor[.rev]` CMSIS-DAP protocol version string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DapVersion {
    pub major: u8,
    pub minor: u8,
    pub revision: u8,
}

impl DapVersion {
    /// At or above this version, `DAP_Info(ADAPTOR_VERSION)` should be queried.
    pub(crate) fn supports_adaptor_version(&self) -> bool {
        (self.major, self.minor) >= (1, 3) || (self.major, self.minor) >= (2, 1)
    }

    pub(crate) fn at_least(&self, major: u8, minor: u8) -> bool {
        (self.major, self.minor) >= (major, minor)
    }

    /// Parse a `"[v]major.minor[.rev]"` string as reported by
    /// `DAP_Info(CMSIS_DAP_VERSION)`.
    pub(crate) fn parse(s: &str) -> Option<Self> {
        let s = s.trim().trim_start_matches(['v', 'V']);
        let mut parts = s.split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next().unwrap_or("0").parse().ok()?;
        let revision = parts.next().unwrap_or("0").parse().ok()?;
        Some(DapVersion {
            major,
            minor,
            revision,
        })
    }

    /// MCU-Link firmware >= v1.10 encodes `minor` as tens-of-hundredths, e.g.
    /// a reported "1.10" really means minor=1, revision=0. Split it back out.
    pub(crate) fn fixup_mculink(self) -> Self {
        if self.major == 1 && self.minor >= 10 {
            DapVersion {
                major: self.major,
                minor: self.minor / 10,
                revision: self.minor % 10,
            }
        } else {
            self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_with_and_without_leading_v() {
        assert_eq!(
            DapVersion::parse("v1.3.1"),
            Some(DapVersion {
                major: 1,
                minor: 3,
                revision: 1
            })
        );
        assert_eq!(
            DapVersion::parse("2.1"),
            Some(DapVersion {
                major: 2,
                minor: 1,
                revision: 0
            })
        );
    }

    #[test]
    fn adaptor_version_gate() {
        assert!(DapVersion::parse("1.3.0").unwrap().supports_adaptor_version());
        assert!(DapVersion::parse("2.1.0").unwrap().supports_adaptor_version());
        assert!(!DapVersion::parse("1.2.0").unwrap().supports_adaptor_version());
    }

    #[test]
    fn mculink_minor_revision_split() {
        let v = DapVersion::parse("v1.10").unwrap().fixup_mculink();
        assert_eq!(v, DapVersion { major: 1, minor: 1, revision: 0 });
    }
}
