//! `DAP_Info`, `DAP_HostStatus`, `DAP_Connect`, `DAP_Disconnect`.

use super::{CommandId, Request};
use crate::error::CmsisDapError;

/// Information IDs understood by `DAP_Info`.
#[derive(Debug, Clone, Copy)]
pub enum InfoId {
    CmsisDapVersion = 0x04,
    AdaptorVersion = 0x09,
    Capabilities = 0xF0,
    PacketSize = 0xFF,
}

#[derive(Debug)]
pub struct InfoRequest(pub InfoId);

/// Response to `DAP_Info`: the raw, still-encoded bytes. Callers decode
/// according to the `InfoId` they asked for.
#[derive(Debug)]
pub struct InfoResponse(pub Vec<u8>);

impl InfoResponse {
    pub fn as_string(&self) -> Result<String, CmsisDapError> {
        std::str::from_utf8(&self.0)
            .map(|s| s.trim_end_matches('\0').to_owned())
            .map_err(|_| CmsisDapError::UnexpectedAnswer)
    }

    pub fn as_u16(&self) -> Result<u16, CmsisDapError> {
        if self.0.len() < 2 {
            return Err(CmsisDapError::NotEnoughData);
        }
        Ok(u16::from_le_bytes([self.0[0], self.0[1]]))
    }

    pub fn as_u8(&self) -> Result<u8, CmsisDapError> {
        self.0.first().copied().ok_or(CmsisDapError::NotEnoughData)
    }
}

impl Request for InfoRequest {
    const COMMAND_ID: CommandId = CommandId::Info;
    type Response = InfoResponse;

    fn to_bytes(&self, buffer: &mut [u8]) -> Result<usize, CmsisDapError> {
        buffer[0] = self.0 as u8;
        Ok(1)
    }

    fn parse_response(&self, buffer: &[u8]) -> Result<Self::Response, CmsisDapError> {
        let len = *buffer.first().ok_or(CmsisDapError::NotEnoughData)? as usize;
        if buffer.len() < 1 + len {
            return Err(CmsisDapError::NotEnoughData);
        }
        Ok(InfoResponse(buffer[1..1 + len].to_vec()))
    }
}

/// `DAP_HostStatus`: LED state. We only model the "connected" LED, which is
/// all target drivers above this core need.
#[derive(Debug)]
pub struct HostStatusRequest {
    pub connected: bool,
}

impl Request for HostStatusRequest {
    const COMMAND_ID: CommandId = CommandId::HostStatus;
    type Response = ();

    fn to_bytes(&self, buffer: &mut [u8]) -> Result<usize, CmsisDapError> {
        buffer[0] = 0; // type = connect LED
        buffer[1] = self.connected as u8;
        Ok(2)
    }

    fn parse_response(&self, _buffer: &[u8]) -> Result<Self::Response, CmsisDapError> {
        Ok(())
    }
}

/// `DAP_Connect`: select SWD or JTAG.
#[derive(Debug, Clone, Copy)]
pub enum ConnectPort {
    Default = 0x00,
    Swd = 0x01,
    Jtag = 0x02,
}

#[derive(Debug)]
pub struct ConnectRequest(pub ConnectPort);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectResponse {
    Failed,
    Swd,
    Jtag,
}

impl Request for ConnectRequest {
    const COMMAND_ID: CommandId = CommandId::Connect;
    type Response = ConnectResponse;

    fn to_bytes(&self, buffer: &mut [u8]) -> Result<usize, CmsisDapError> {
        buffer[0] = self.0 as u8;
        Ok(1)
    }

    fn parse_response(&self, buffer: &[u8]) -> Result<Self::Response, CmsisDapError> {
        match buffer.first() {
            Some(0) => Ok(ConnectResponse::Failed),
            Some(1) => Ok(ConnectResponse::Swd),
            Some(2) => Ok(ConnectResponse::Jtag),
            _ => Err(CmsisDapError::UnexpectedAnswer),
        }
    }
}

/// `DAP_Disconnect`: park the adaptor.
#[derive(Debug, Default)]
pub struct DisconnectRequest;

impl Request for DisconnectRequest {
    const COMMAND_ID: CommandId = CommandId::Disconnect;
    type Response = ();

    fn to_bytes(&self, _buffer: &mut [u8]) -> Result<usize, CmsisDapError> {
        Ok(0)
    }

    fn parse_response(&self, buffer: &[u8]) -> Result<Self::Response, CmsisDapError> {
        match buffer.first() {
            Some(0x00) => Ok(()),
            _ => Err(CmsisDapError::ErrorResponse),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn info_response_trims_trailing_nul_from_strings() {
        let resp = InfoResponse(b"1.3.1\0".to_vec());
        assert_eq!(resp.as_string().unwrap(), "1.3.1");
    }

    #[test]
    fn info_request_parses_length_prefixed_payload() {
        let req = InfoRequest(InfoId::PacketSize);
        let resp = req.parse_response(&[2, 0x40, 0x00]).unwrap();
        assert_eq!(resp.as_u16().unwrap(), 0x0040);
    }

    #[test]
    fn connect_response_maps_all_three_outcomes() {
        let req = ConnectRequest(ConnectPort::Swd);
        assert_eq!(req.parse_response(&[0]).unwrap(), ConnectResponse::Failed);
        assert_eq!(req.parse_response(&[1]).unwrap(), ConnectResponse::Swd);
        assert_eq!(req.parse_response(&[2]).unwrap(), ConnectResponse::Jtag);
        assert!(req.parse_response(&[3]).is_err());
    }
}
