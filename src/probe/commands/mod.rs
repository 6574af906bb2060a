//! CMSIS-DAP Command Framing (L2).
//!
//! Each command is `[cmd_byte, args…]` on the wire and comes back as
//! `[cmd_byte, payload…]`; [`super::transport::exchange`] already validates
//! the echo and strips the command byte, so [`Request::parse_response`]
//! only ever sees the payload.

pub mod general;
pub mod jtag;
pub mod swd;
pub mod swj;
pub mod transfer;

use crate::error::CmsisDapError;
use crate::probe::capabilities::Quirks;
use crate::probe::transport::{self, Transport};

/// CMSIS-DAP command identifiers used by this core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandId {
    Info = 0x00,
    HostStatus = 0x01,
    Connect = 0x02,
    Disconnect = 0x03,
    TransferConfigure = 0x04,
    Transfer = 0x05,
    TransferBlock = 0x06,
    SwjPins = 0x10,
    SwjClock = 0x11,
    SwjSequence = 0x12,
    SwdConfigure = 0x13,
    JtagSequence = 0x14,
    JtagConfigure = 0x15,
    SwdSequence = 0x1D,
}

/// A single CMSIS-DAP command: encodes its own request bytes and decodes its
/// own response bytes.
pub trait Request {
    const COMMAND_ID: CommandId;
    type Response;

    /// Write this request's arguments (not including the command byte) to
    /// `buffer`, returning the number of bytes written.
    fn to_bytes(&self, buffer: &mut [u8]) -> Result<usize, CmsisDapError>;

    /// Parse `buffer` (the response payload, with the echoed command byte
    /// already stripped) into this request's response type.
    fn parse_response(&self, buffer: &[u8]) -> Result<Self::Response, CmsisDapError>;
}

/// Frame, send and decode one [`Request`].
pub fn send_command<R: Request>(
    transport: &mut dyn Transport,
    quirks: Quirks,
    request: &R,
) -> Result<R::Response, CmsisDapError> {
    let mut buffer = vec![0u8; transport.packet_size().max(64) + 8];
    buffer[0] = R::COMMAND_ID as u8;
    let len = request.to_bytes(&mut buffer[1..])? + 1;

    let response = transport::exchange(transport, quirks, &buffer[..len])?;
    request.parse_response(&response)
}

/// A 3-bit protocol acknowledgement, as returned by `DAP_Transfer` and
/// `DAP_TransferBlock`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    Ok = 1,
    Wait = 2,
    Fault = 4,
    NoResponse = 7,
}

impl Ack {
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits & 0x7 {
            1 => Some(Ack::Ok),
            2 => Some(Ack::Wait),
            4 => Some(Ack::Fault),
            7 => Some(Ack::NoResponse),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_ids_match_the_wire_byte_table() {
        assert_eq!(CommandId::Info as u8, 0x00);
        assert_eq!(CommandId::Transfer as u8, 0x05);
        assert_eq!(CommandId::TransferBlock as u8, 0x06);
        assert_eq!(CommandId::SwjSequence as u8, 0x12);
        assert_eq!(CommandId::JtagSequence as u8, 0x14);
        assert_eq!(CommandId::SwdSequence as u8, 0x1D);
    }

    #[test]
    fn ack_decodes_known_bit_patterns_and_rejects_the_rest() {
        assert_eq!(Ack::from_bits(1), Some(Ack::Ok));
        assert_eq!(Ack::from_bits(2), Some(Ack::Wait));
        assert_eq!(Ack::from_bits(4), Some(Ack::Fault));
        assert_eq!(Ack::from_bits(7), Some(Ack::NoResponse));
        assert_eq!(Ack::from_bits(3), None);
        assert_eq!(Ack::from_bits(0), None);
    }
}
