//! `DAP_SWJ_Pins`, `DAP_SWJ_Clock`, `DAP_SWJ_Sequence`.

use bitfield::bitfield;

use super::{CommandId, Request};
use crate::error::CmsisDapError;

bitfield! {
    /// SWJ pin mask/values, as used by both the `select` and `output` fields
    /// of `DAP_SWJ_Pins`.
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct Pins(u8);
    impl Debug;
    pub nreset, set_nreset: 7;
    pub ntrst, set_ntrst: 5;
    pub tdo, set_tdo: 3;
    pub tdi, set_tdi: 2;
    pub swdio_tms, set_swdio_tms: 1;
    pub swclk_tck, set_swclk_tck: 0;
}

/// `DAP_SWJ_Pins`: drive `select`'d pins to `output` and sample after `wait_us`.
#[derive(Debug)]
pub struct PinsRequest {
    pub output: Pins,
    pub select: Pins,
    pub wait_us: u32,
}

impl Request for PinsRequest {
    const COMMAND_ID: CommandId = CommandId::SwjPins;
    type Response = Pins;

    fn to_bytes(&self, buffer: &mut [u8]) -> Result<usize, CmsisDapError> {
        buffer[0] = self.output.0;
        buffer[1] = self.select.0;
        buffer[2..6].copy_from_slice(&self.wait_us.to_le_bytes());
        Ok(6)
    }

    fn parse_response(&self, buffer: &[u8]) -> Result<Self::Response, CmsisDapError> {
        Ok(Pins(*buffer.first().ok_or(CmsisDapError::NotEnoughData)?))
    }
}

/// `DAP_SWJ_Clock`: request a clock rate in Hz.
#[derive(Debug)]
pub struct ClockRequest(pub u32);

impl Request for ClockRequest {
    const COMMAND_ID: CommandId = CommandId::SwjClock;
    type Response = ();

    fn to_bytes(&self, buffer: &mut [u8]) -> Result<usize, CmsisDapError> {
        buffer[0..4].copy_from_slice(&self.0.to_le_bytes());
        Ok(4)
    }

    fn parse_response(&self, buffer: &[u8]) -> Result<Self::Response, CmsisDapError> {
        match buffer.first() {
            Some(0x00) => Ok(()),
            _ => Err(CmsisDapError::ErrorResponse),
        }
    }
}

/// `DAP_SWJ_Sequence`: a raw bit stream of 1..256 cycles, LSB-first.
#[derive(Debug)]
pub struct SequenceRequest {
    bit_count: u16,
    data: Vec<u8>,
}

impl SequenceRequest {
    /// `cycles` must be in 1..=256; `data` holds `ceil(cycles/8)` bytes.
    pub fn new(cycles: usize, data: &[u8]) -> Result<Self, CmsisDapError> {
        if cycles == 0 || cycles > 256 {
            return Err(CmsisDapError::TooMuchData);
        }
        let needed = cycles.div_ceil(8);
        if data.len() < needed {
            return Err(CmsisDapError::NotEnoughData);
        }
        Ok(Self {
            bit_count: cycles as u16,
            data: data[..needed].to_vec(),
        })
    }

    /// Build a sequence from an LSB-first bit pattern packed into a `u64`,
    /// as used for the SWD line reset and `TARGETSEL` writes.
    pub fn from_bits(cycles: usize, bits: u64) -> Result<Self, CmsisDapError> {
        let bytes = bits.to_le_bytes();
        Self::new(cycles, &bytes)
    }
}

impl Request for SequenceRequest {
    const COMMAND_ID: CommandId = CommandId::SwjSequence;
    type Response = ();

    fn to_bytes(&self, buffer: &mut [u8]) -> Result<usize, CmsisDapError> {
        // A cycle count of exactly 256 is encoded as 0 on the wire.
        buffer[0] = if self.bit_count == 256 {
            0
        } else {
            self.bit_count as u8
        };
        buffer[1..1 + self.data.len()].copy_from_slice(&self.data);
        Ok(1 + self.data.len())
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
    fn sequence_rejects_zero_and_over_256_cycles() {
        assert!(SequenceRequest::new(0, &[0]).is_err());
        assert!(SequenceRequest::new(257, &[0; 33]).is_err());
        assert!(SequenceRequest::new(256, &[0xFF; 32]).is_ok());
    }

    #[test]
    fn line_reset_sequence_is_64_cycles_of_mostly_ones() {
        // 50 high clocks + >=2 low clocks, padded to 64 total, matches the
        // canonical `FF FF FF FF FF FF FF 0F` line-reset byte pattern.
        let seq = SequenceRequest::from_bits(64, 0x0FFF_FFFF_FFFF_FFFF).unwrap();
        let mut buf = [0u8; 9];
        let n = seq.to_bytes(&mut buf).unwrap();
        assert_eq!(n, 9);
        assert_eq!(buf[0], 0); // 64 cycles encodes as 0
        assert_eq!(&buf[1..9], &[0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x0F]);
    }
}
