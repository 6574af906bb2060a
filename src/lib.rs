//! ADIv5 transaction engine and CMSIS-DAP back-end.
//!
//! This crate implements the host side of the ARM Debug Interface v5
//! (ADIv5) protocol stack over a CMSIS-DAP debug adaptor, reached via either
//! USB HID (CMSIS-DAPv1) or USB Bulk (CMSIS-DAPv2). It covers four layers:
//!
//! - [`probe::transport`] — USB framing (L1)
//! - [`probe::commands`] — CMSIS-DAP command encoding/decoding (L2)
//! - [`arm::communication_interface`] — DP/AP transaction engine (L3)
//! - [`arm::memory`] — target memory read/write (L4)
//!
//! Target-specific core drivers, the GDB server, probe enumeration and other
//! probe back-ends are external collaborators and are out of scope here.

pub mod arm;
mod error;
pub mod probe;

pub use error::{ArmError, DapError};
pub use probe::{Probe, ProbeConfig, WireProtocol};

/// Re-exports of the types a target-specific driver typically needs.
pub mod prelude {
    pub use crate::arm::{
        ap::MemoryAp,
        dp::{Dp, DpAddress},
        memory::Align,
    };
    pub use crate::error::{ArmError, DapError};
    pub use crate::probe::{Probe, ProbeConfig, WireProtocol};
}
