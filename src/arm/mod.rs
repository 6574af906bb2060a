//! ADIv5 transaction engine (L3) and target-memory engine (L4).

pub mod ap;
pub mod communication_interface;
pub mod dp;
pub mod memory;
pub mod sequences;

use dp::{Dp, DpBackend, JtagBackend, SwdBackend};
use crate::error::ArmError;
use crate::probe::{Probe, WireProtocol};

use ap::MemoryAp;

/// One ADIv5 debug session: the probe, the DP it has selected, and the AP
/// bank selected for memory access. Combines L3 and L4 into the single
/// handle a target-specific driver actually wants to hold.
pub struct ArmProbe<B: DpBackend> {
    pub probe: Probe,
    pub dp: Dp<B>,
    pub ap: MemoryAp,
}

impl<B: DpBackend> std::fmt::Debug for ArmProbe<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArmProbe")
            .field("dp", &self.dp)
            .field("ap", &self.ap)
            .finish_non_exhaustive()
    }
}

impl<B: DpBackend + Default> ArmProbe<B> {
    pub fn new(probe: Probe, address: dp::DpAddress, apsel: u8) -> Self {
        Self {
            probe,
            dp: Dp::new(address),
            ap: MemoryAp::new(apsel),
        }
    }
}

impl<B: DpBackend> ArmProbe<B> {
    pub fn dp_read(&mut self, reg: u16) -> Result<u32, ArmError> {
        communication_interface::dp_read(&mut self.probe, &mut self.dp, reg)
    }

    pub fn dp_write(&mut self, reg: u16, value: u32) -> Result<(), ArmError> {
        communication_interface::dp_write(&mut self.probe, &mut self.dp, reg, value)
    }

    pub fn ap_read(&mut self, addr: u16) -> Result<u32, ArmError> {
        communication_interface::ap_read(&mut self.probe, &mut self.dp, &self.ap, addr)
    }

    pub fn ap_write(&mut self, addr: u16, value: u32) -> Result<(), ArmError> {
        communication_interface::ap_write(&mut self.probe, &mut self.dp, &self.ap, addr, value)
    }

    pub fn error(&mut self, recover: bool) -> Result<u8, ArmError> {
        communication_interface::error(&mut self.probe, &mut self.dp, recover)
    }

    pub fn mem_read(&mut self, dst: &mut [u8], src: u64) -> Result<(), ArmError> {
        memory::mem_read(&mut self.probe, &mut self.dp, &mut self.ap, dst, src)
    }

    pub fn mem_write(&mut self, dst: u64, src: &[u8], align: memory::Align) -> Result<(), ArmError> {
        memory::mem_write(&mut self.probe, &mut self.dp, &mut self.ap, dst, src, align)
    }
}

/// Open a probe and bring up a single-DP ADIv5 session on whichever wire
/// protocol the probe was configured for.
pub enum Session {
    Swd(ArmProbe<SwdBackend>),
    Jtag(ArmProbe<JtagBackend>),
}

impl Session {
    pub fn connect(mut probe: Probe, address: dp::DpAddress, apsel: u8) -> Result<Self, ArmError> {
        let protocol = probe.connect()?;
        Ok(match protocol {
            WireProtocol::Swd => Session::Swd(ArmProbe::new(probe, address, apsel)),
            WireProtocol::Jtag => Session::Jtag(ArmProbe::new(probe, address, apsel)),
        })
    }
}
