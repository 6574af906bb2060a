//! Probe session: owns the transport, the negotiated capabilities/quirks,
//! and drives the CMSIS-DAP connect handshake.
//!
//! All per-session state (`capabilities`, `quirks`, `cmsis_dap_version`,
//! `packet_size`, the USB handle) is carried as fields of this single
//! `Probe` value, which is passed explicitly through the layers above it
//! rather than kept as process-global mutable state.

pub mod capabilities;
pub mod commands;
pub mod transport;

use tracing::debug;

use crate::error::{ArmError, CmsisDapError};
use capabilities::{Capabilities, DapVersion, Quirks};
use commands::{general, send_command, transfer, Request};
use transport::Transport;

/// Which wire protocol the probe is currently connected with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireProtocol {
    Swd,
    Jtag,
}

/// Connection options a caller can request; analogous to the CLI flags the
/// out-of-scope BMDA front-end would otherwise parse.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Requested protocol; `None` lets the adaptor pick its default.
    pub protocol: Option<WireProtocol>,
    /// Requested SWJ clock, in Hz.
    pub swj_clock_hz: u32,
    /// Downgrade a failed Bulk (CMSIS-DAPv2) open to HID instead of erroring.
    pub allow_hid_fallback: bool,
    /// Zero-based JTAG scan-chain index; ignored in SWD mode.
    pub dap_index: u8,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            protocol: None,
            swj_clock_hz: 1_000_000,
            allow_hid_fallback: true,
            dap_index: 0,
        }
    }
}

/// One CMSIS-DAP probe session.
pub struct Probe {
    transport: Box<dyn Transport>,
    capabilities: Capabilities,
    quirks: Quirks,
    packet_size: usize,
    cmsis_dap_version: DapVersion,
    protocol: Option<WireProtocol>,
    config: ProbeConfig,
}

impl Probe {
    /// Open a session over an already-connected transport and run the
    /// post-open handshake: Disconnect, `DAP_Info(CMSIS_DAP_VERSION)`,
    /// conditionally `DAP_Info(ADAPTOR_VERSION)`, `DAP_Info(PACKET_SIZE)`,
    /// `DAP_Info(CAPABILITIES)`, quirk assignment.
    pub fn open(transport: Box<dyn Transport>, config: ProbeConfig) -> Result<Self, ArmError> {
        let mut probe = Self {
            transport,
            capabilities: Capabilities::empty(),
            quirks: Quirks::empty(),
            packet_size: 64,
            cmsis_dap_version: DapVersion::default(),
            protocol: None,
            config,
        };

        probe.send(general::DisconnectRequest)?;

        let version_str = probe
            .send(general::InfoRequest(general::InfoId::CmsisDapVersion))?
            .as_string()
            .unwrap_or_default();
        probe.cmsis_dap_version = DapVersion::parse(&version_str)
            .unwrap_or_default()
            .fixup_mculink();
        debug!("CMSIS-DAP version {:?}", probe.cmsis_dap_version);

        if probe.cmsis_dap_version.supports_adaptor_version() {
            let _ = probe.send(general::InfoRequest(general::InfoId::AdaptorVersion));
        }

        if let Ok(resp) = probe.send(general::InfoRequest(general::InfoId::PacketSize)) {
            if let Ok(size) = resp.as_u16() {
                probe.packet_size = size as usize;
            }
        }

        if let Ok(resp) = probe.send(general::InfoRequest(general::InfoId::Capabilities)) {
            if let Ok(byte) = resp.as_u8() {
                probe.capabilities = Capabilities::from_info_byte(byte);
            }
        }

        if !probe.cmsis_dap_version.at_least(1, 2) {
            probe.quirks.insert(Quirks::NO_SWD_SEQUENCE);
        }

        probe.send(transfer::ConfigureRequest::default())?;

        Ok(probe)
    }

    /// Apply a vendor-specific quirk set, for callers that identify the
    /// adaptor by product string/version (ORBTrace and similar) before the
    /// handshake runs far enough for this core to infer it generically.
    pub fn apply_quirks(&mut self, quirks: Quirks) {
        self.quirks.insert(quirks);
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn quirks(&self) -> Quirks {
        self.quirks
    }

    pub fn packet_size(&self) -> usize {
        self.packet_size
    }

    pub fn protocol(&self) -> Option<WireProtocol> {
        self.protocol
    }

    pub fn dap_index(&self) -> u8 {
        self.config.dap_index
    }

    /// Connect in the requested (or adaptor-default) wire protocol.
    pub fn connect(&mut self) -> Result<WireProtocol, ArmError> {
        let port = match self.config.protocol {
            Some(WireProtocol::Swd) => general::ConnectPort::Swd,
            Some(WireProtocol::Jtag) => general::ConnectPort::Jtag,
            None => general::ConnectPort::Default,
        };
        let resp = self.send(general::ConnectRequest(port))?;
        let protocol = match resp {
            general::ConnectResponse::Swd => WireProtocol::Swd,
            general::ConnectResponse::Jtag => WireProtocol::Jtag,
            general::ConnectResponse::Failed => {
                return Err(CmsisDapError::ErrorResponse.into())
            }
        };
        self.protocol = Some(protocol);
        self.send(general::HostStatusRequest { connected: true })?;
        self.send(commands::swj::ClockRequest(self.config.swj_clock_hz))?;
        Ok(protocol)
    }

    /// Send one CMSIS-DAP command and decode its response.
    pub fn send<R: Request>(&mut self, request: R) -> Result<R::Response, ArmError> {
        send_command(self.transport.as_mut(), self.quirks, &request).map_err(ArmError::from)
    }

    pub(crate) fn transport_mut(&mut self) -> &mut dyn Transport {
        self.transport.as_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use transport::mock::MockTransport;

    /// Build a canned `DAP_Info` response: echoed command byte 0x00,
    /// length-prefixed payload.
    fn info_response(payload: &[u8]) -> Vec<u8> {
        let mut out = vec![0x00, payload.len() as u8];
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn open_runs_full_handshake_and_applies_no_swd_sequence_quirk_on_old_firmware() {
        let mut t = MockTransport::new(64, false);
        // DAP_Disconnect
        t.queue_read(vec![0x03, 0x00]);
        // DAP_Info(CMSIS_DAP_VERSION) -> "1.1.0"
        t.queue_read(info_response(b"1.1.0"));
        // DAP_Info(PACKET_SIZE) -> 64
        t.queue_read(info_response(&64u16.to_le_bytes()));
        // DAP_Info(CAPABILITIES) -> SWD+JTAG
        t.queue_read(info_response(&[0x03]));
        // DAP_TransferConfigure
        t.queue_read(vec![0x04, 0x00]);

        let probe = Probe::open(Box::new(t), ProbeConfig::default()).unwrap();
        assert!(probe.quirks().contains(Quirks::NO_SWD_SEQUENCE));
        assert_eq!(probe.packet_size(), 64);
        assert!(probe.capabilities().contains(Capabilities::SWD));
    }
}
