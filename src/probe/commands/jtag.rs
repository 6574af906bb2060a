//! `DAP_JTAG_Configure`, `DAP_JTAG_Sequence`.

use super::{CommandId, Request};
use crate::error::CmsisDapError;

/// `DAP_JTAG_Configure`: IR lengths of every TAP in the scan chain.
#[derive(Debug)]
pub struct ConfigureRequest {
    pub ir_lengths: Vec<u8>,
}

impl Request for ConfigureRequest {
    const COMMAND_ID: CommandId = CommandId::JtagConfigure;
    type Response = ();

    fn to_bytes(&self, buffer: &mut [u8]) -> Result<usize, CmsisDapError> {
        buffer[0] = self.ir_lengths.len() as u8;
        buffer[1..1 + self.ir_lengths.len()].copy_from_slice(&self.ir_lengths);
        Ok(1 + self.ir_lengths.len())
    }

    fn parse_response(&self, buffer: &[u8]) -> Result<Self::Response, CmsisDapError> {
        match buffer.first() {
            Some(0x00) => Ok(()),
            _ => Err(CmsisDapError::ErrorResponse),
        }
    }
}

/// One JTAG sub-sequence: bit 7 = TDO capture, bit 6 = TMS value,
/// bits[5:0] = clock count (0 = 64).
#[derive(Debug, Clone, Copy)]
pub struct Sequence {
    pub cycles: u8,
    pub tms: bool,
    pub capture_tdo: bool,
    pub tdi: [u8; 8],
}

impl Sequence {
    fn byte_count(&self) -> usize {
        let cycles = if self.cycles == 0 { 64 } else { self.cycles };
        (cycles as usize).div_ceil(8)
    }
}

/// Encode a TMS+TDI shift of `cycles` clocks, optionally driving TMS high on
/// the final cycle to exit a JTAG scan state (`IR-SHIFT`/`DR-SHIFT` exit).
///
/// A request for `final_tms=true` is split into `(cycles-1, TMS=0)` followed
/// by `(1, TMS=1)`, except `cycles == 1` which collapses to a single
/// sub-sequence with `TMS=1`.
pub fn tdi_tdo_sequence(cycles: usize, tdi: &[u8], capture_tdo: bool, final_tms: bool) -> Vec<Sequence> {
    let mut data = [0u8; 8];
    let n = tdi.len().min(8);
    data[..n].copy_from_slice(&tdi[..n]);

    if !final_tms {
        return vec![Sequence {
            cycles: (cycles % 64) as u8,
            tms: false,
            capture_tdo,
            tdi: data,
        }];
    }

    if cycles <= 1 {
        return vec![Sequence {
            cycles: 1,
            tms: true,
            capture_tdo,
            tdi: data,
        }];
    }

    // The last bit of `tdi` becomes its own one-cycle sub-sequence with TMS=1.
    let last_bit = (tdi[(cycles - 1) / 8] >> ((cycles - 1) % 8)) & 1;
    vec![
        Sequence {
            cycles: ((cycles - 1) % 64) as u8,
            tms: false,
            capture_tdo,
            tdi: data,
        },
        Sequence {
            cycles: 1,
            tms: true,
            capture_tdo,
            tdi: [last_bit, 0, 0, 0, 0, 0, 0, 0],
        },
    ]
}

/// A pure TMS sequence (no data capture), used for scan-chain navigation.
pub fn tms_sequence(tms_bits: u8, cycles: u8) -> Sequence {
    Sequence {
        cycles,
        tms: tms_bits != 0,
        capture_tdo: false,
        tdi: [0; 8],
    }
}

#[derive(Debug)]
pub struct SequenceRequest {
    pub sequences: Vec<Sequence>,
}

impl SequenceRequest {
    pub fn new(sequences: Vec<Sequence>) -> Result<Self, CmsisDapError> {
        if sequences.is_empty() || sequences.len() > (u8::MAX as usize) {
            return Err(CmsisDapError::TooMuchData);
        }
        for seq in &sequences {
            if seq.cycles as usize > 64 {
                return Err(CmsisDapError::TooMuchData);
            }
        }
        Ok(Self { sequences })
    }
}

#[derive(Debug)]
pub struct SequenceResponse {
    /// TDO bytes for each sub-sequence that requested capture, in order.
    pub tdo: Vec<Vec<u8>>,
}

impl Request for SequenceRequest {
    const COMMAND_ID: CommandId = CommandId::JtagSequence;
    type Response = SequenceResponse;

    fn to_bytes(&self, buffer: &mut [u8]) -> Result<usize, CmsisDapError> {
        let mut offset = 0;
        buffer[offset] = self.sequences.len() as u8;
        offset += 1;

        for seq in &self.sequences {
            let cycles_field = if seq.cycles == 64 { 0 } else { seq.cycles };
            let info = cycles_field
                | (seq.tms as u8) << 6
                | (seq.capture_tdo as u8) << 7;
            buffer[offset] = info;
            offset += 1;

            let n = seq.byte_count();
            buffer[offset..offset + n].copy_from_slice(&seq.tdi[..n]);
            offset += n;
        }
        Ok(offset)
    }

    fn parse_response(&self, buffer: &[u8]) -> Result<Self::Response, CmsisDapError> {
        let status = *buffer.first().ok_or(CmsisDapError::NotEnoughData)?;
        if status != 0 {
            return Err(CmsisDapError::ErrorResponse);
        }
        let mut offset = 1;
        let mut tdo = Vec::new();
        for seq in &self.sequences {
            if seq.capture_tdo {
                let n = seq.byte_count();
                if buffer.len() < offset + n {
                    return Err(CmsisDapError::NotEnoughData);
                }
                tdo.push(buffer[offset..offset + n].to_vec());
                offset += n;
            }
        }
        Ok(SequenceResponse { tdo })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sixty_four_cycles_encodes_as_zero_length_byte() {
        let req = SequenceRequest::new(vec![Sequence {
            cycles: 64,
            tms: false,
            capture_tdo: true,
            tdi: [0xFF; 8],
        }])
        .unwrap();
        let mut buf = [0u8; 16];
        req.to_bytes(&mut buf).unwrap();
        assert_eq!(buf[1] & 0x3F, 0);
    }

    #[test]
    fn rejects_subsequence_over_64_cycles() {
        let seq = Sequence {
            cycles: 65,
            tms: false,
            capture_tdo: false,
            tdi: [0; 8],
        };
        assert!(SequenceRequest::new(vec![seq]).is_err());
    }

    #[test]
    fn final_tms_splits_into_n_minus_one_plus_one_subsequence() {
        let seqs = tdi_tdo_sequence(9, &[0xFF, 0x01], false, true);
        assert_eq!(seqs.len(), 2);
        assert_eq!(seqs[0].cycles, 8);
        assert!(!seqs[0].tms);
        assert_eq!(seqs[1].cycles, 1);
        assert!(seqs[1].tms);
    }

    #[test]
    fn final_tms_with_one_cycle_collapses_to_single_subsequence() {
        let seqs = tdi_tdo_sequence(1, &[0x01], false, true);
        assert_eq!(seqs.len(), 1);
        assert_eq!(seqs[0].cycles, 1);
        assert!(seqs[0].tms);
    }
}
