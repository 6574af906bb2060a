//! `DAP_SWD_Configure`, `DAP_SWD_Sequence`.

use super::{CommandId, Request};
use crate::error::CmsisDapError;

/// `DAP_SWD_Configure`: turnaround cycle count and data-phase behaviour.
///
/// This core always runs with the CMSIS-DAP default (1 turnaround cycle, no
/// forced data phase on WAIT/FAULT), so the request carries no fields.
#[derive(Debug, Default)]
pub struct ConfigureRequest;

impl Request for ConfigureRequest {
    const COMMAND_ID: CommandId = CommandId::SwdConfigure;
    type Response = ();

    fn to_bytes(&self, buffer: &mut [u8]) -> Result<usize, CmsisDapError> {
        buffer[0] = 0;
        Ok(1)
    }

    fn parse_response(&self, buffer: &[u8]) -> Result<Self::Response, CmsisDapError> {
        match buffer.first() {
            Some(0x00) => Ok(()),
            _ => Err(CmsisDapError::ErrorResponse),
        }
    }
}

/// One SWD in/out sub-sequence, as packed into `DAP_SWD_Sequence`.
#[derive(Debug, Clone, Copy)]
pub struct Sequence {
    /// Clock cycles, 1..=64.
    pub cycles: u8,
    pub direction: Direction,
    /// OUT data, LSB-first; unused bytes beyond `ceil(cycles/8)` are ignored.
    pub data: [u8; 8],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Out,
    In,
}

impl Sequence {
    pub fn out(cycles: u8, data: [u8; 8]) -> Self {
        Self {
            cycles,
            direction: Direction::Out,
            data,
        }
    }

    pub fn input(cycles: u8) -> Self {
        Self {
            cycles,
            direction: Direction::In,
            data: [0; 8],
        }
    }

    fn byte_count(&self) -> usize {
        let cycles = if self.cycles == 0 { 64 } else { self.cycles };
        (cycles as usize).div_ceil(8)
    }
}

/// `DAP_SWD_Sequence`: up to 5 sub-sequences.
#[derive(Debug)]
pub struct SequenceRequest {
    pub sequences: Vec<Sequence>,
}

impl SequenceRequest {
    pub fn new(sequences: Vec<Sequence>) -> Result<Self, CmsisDapError> {
        if sequences.is_empty() || sequences.len() > 5 {
            return Err(CmsisDapError::TooMuchData);
        }
        Ok(Self { sequences })
    }
}

#[derive(Debug)]
pub struct SequenceResponse {
    /// IN data, one `Vec<u8>` per IN sub-sequence, in request order.
    pub in_data: Vec<Vec<u8>>,
}

impl Request for SequenceRequest {
    const COMMAND_ID: CommandId = CommandId::SwdSequence;
    type Response = SequenceResponse;

    /// `bits[5:0]` = clock count (0 encodes 64); bit 7 = direction (0=out, 1=in).
    fn to_bytes(&self, buffer: &mut [u8]) -> Result<usize, CmsisDapError> {
        let mut offset = 0;
        buffer[offset] = self.sequences.len() as u8;
        offset += 1;

        for seq in &self.sequences {
            let cycles_field = seq.cycles & 0x3F;
            let info = cycles_field | ((seq.direction == Direction::In) as u8) << 7;
            buffer[offset] = info;
            offset += 1;

            if seq.direction == Direction::Out {
                let n = seq.byte_count();
                buffer[offset..offset + n].copy_from_slice(&seq.data[..n]);
                offset += n;
            }
        }
        Ok(offset)
    }

    fn parse_response(&self, buffer: &[u8]) -> Result<Self::Response, CmsisDapError> {
        let status = *buffer.first().ok_or(CmsisDapError::NotEnoughData)?;
        if status != 0 {
            return Err(CmsisDapError::ErrorResponse);
        }
        let mut offset = 1;
        let mut in_data = Vec::new();
        for seq in &self.sequences {
            if seq.direction == Direction::In {
                let n = seq.byte_count();
                if buffer.len() < offset + n {
                    return Err(CmsisDapError::NotEnoughData);
                }
                in_data.push(buffer[offset..offset + n].to_vec());
                offset += n;
            }
        }
        Ok(SequenceResponse { in_data })
    }
}

/// Corrects the `BROKEN_SWD_SEQUENCE` quirk: some adaptors shift every IN
/// sub-sequence's response by one bit. Detected on the DP IDR read
/// (`1D 01 08 A5`) whose corrupted response begins `00 03 ee`; once seen,
/// every subsequent IN sub-sequence on this probe needs the same fix.
///
/// Walks each IN sub-sequence backwards, rotating every byte right by one
/// bit while carrying in the MSb of the preceding byte.
pub fn correct_broken_sequence(bytes: &mut [u8]) {
    let mut carry = 0u8;
    for byte in bytes.iter_mut().rev() {
        let new_carry = *byte & 0x01;
        *byte = (*byte >> 1) | (carry << 7);
        carry = new_carry;
    }
}

/// Whether `request`/`response` match the telltale DP IDR read that reveals
/// the `BROKEN_SWD_SEQUENCE` quirk.
pub fn is_broken_sequence_telltale(request: &[u8], response: &[u8]) -> bool {
    request.starts_with(&[0x04, 0x08, 0xa5]) && response.starts_with(&[0x00, 0x03, 0xee])
}

/// Apply [`correct_broken_sequence`] independently to each IN sub-sequence's
/// byte range within a full `DAP_SWD_Sequence` response (status byte at
/// `response[0]` is left untouched).
pub fn correct_broken_in_sequences(sequences: &[Sequence], response: &mut [u8]) {
    let mut offset = 1;
    for seq in sequences {
        if seq.direction == Direction::In {
            let n = seq.byte_count();
            if response.len() >= offset + n {
                correct_broken_sequence(&mut response[offset..offset + n]);
            }
            offset += n;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_cycles_and_direction_bit() {
        let req = SequenceRequest::new(vec![Sequence::out(8, [0xA5, 0, 0, 0, 0, 0, 0, 0])]).unwrap();
        let mut buf = [0u8; 4];
        let n = req.to_bytes(&mut buf).unwrap();
        assert_eq!(&buf[..n], &[0x01, 0x08, 0xA5]);
    }

    #[test]
    fn sixty_four_cycles_encodes_as_zero() {
        let req = SequenceRequest::new(vec![Sequence::input(64)]).unwrap();
        let mut buf = [0u8; 4];
        req.to_bytes(&mut buf).unwrap();
        assert_eq!(buf[1] & 0x3F, 0);
    }

    #[test]
    fn rejects_more_than_five_subsequences() {
        let seqs = vec![Sequence::input(8); 6];
        assert!(SequenceRequest::new(seqs).is_err());
    }

    #[test]
    fn broken_sequence_correction_propagates_msb_backwards() {
        // 0b00000011, 0b11101110 shifted right by one bit, chained.
        let mut bytes = [0x03u8, 0xee];
        correct_broken_sequence(&mut bytes);
        // Expected: last byte's dropped bit (0) feeds nothing (no successor);
        // first byte picks up the MSb carried from the second byte (0).
        assert_eq!(bytes, [0x01, 0x77]);
    }

    #[test]
    fn detects_idr_read_telltale() {
        assert!(is_broken_sequence_telltale(
            &[0x04, 0x08, 0xa5],
            &[0x00, 0x03, 0xee, 0x12]
        ));
        assert!(!is_broken_sequence_telltale(&[0x04, 0x08, 0xa5], &[0x01, 0x03, 0xee]));
    }

    #[test]
    fn corrects_only_in_subsequences_leaving_status_byte_alone() {
        let seqs = vec![Sequence::out(8, [0xA5, 0, 0, 0, 0, 0, 0, 0]), Sequence::input(8)];
        let mut response = vec![0x00, 0x03, 0xee];
        correct_broken_in_sequences(&seqs, &mut response);
        assert_eq!(response, vec![0x00, 0x01, 0x77]);
    }
}
