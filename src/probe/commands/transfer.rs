//! `DAP_Transfer`, `DAP_TransferBlock`, `DAP_TransferConfigure`.

use super::{Ack, CommandId, Request};
use crate::error::CmsisDapError;

/// Default wait-retry count configured via `DAP_TransferConfigure`; the
/// transaction engine never imposes its own WAIT retry bound on top of this.
pub const DEFAULT_WAIT_RETRY: u16 = 128;

#[derive(Debug)]
pub struct ConfigureRequest {
    pub idle_cycles: u8,
    pub wait_retry: u16,
    pub match_retry: u16,
}

impl Default for ConfigureRequest {
    fn default() -> Self {
        Self {
            idle_cycles: 0,
            wait_retry: DEFAULT_WAIT_RETRY,
            match_retry: 0,
        }
    }
}

impl Request for ConfigureRequest {
    const COMMAND_ID: CommandId = CommandId::TransferConfigure;
    type Response = ();

    fn to_bytes(&self, buffer: &mut [u8]) -> Result<usize, CmsisDapError> {
        buffer[0] = self.idle_cycles;
        buffer[1..3].copy_from_slice(&self.wait_retry.to_le_bytes());
        buffer[3..5].copy_from_slice(&self.match_retry.to_le_bytes());
        Ok(5)
    }

    fn parse_response(&self, buffer: &[u8]) -> Result<Self::Response, CmsisDapError> {
        match buffer.first() {
            Some(0x00) => Ok(()),
            _ => Err(CmsisDapError::ErrorResponse),
        }
    }
}

/// `request_byte` field of a single transfer request: bit 0 = AP-not-DP,
/// bit 1 = read-not-write, bits 2-3 = register address A[3:2].
#[derive(Debug, Clone, Copy)]
pub struct InnerTransfer {
    pub ap_not_dp: bool,
    pub read: bool,
    pub a2: bool,
    pub a3: bool,
    /// Write data, or `None` for a read.
    pub data: Option<u32>,
}

impl InnerTransfer {
    fn request_byte(&self) -> u8 {
        (self.ap_not_dp as u8)
            | (self.read as u8) << 1
            | (self.a2 as u8) << 2
            | (self.a3 as u8) << 3
    }
}

/// `DAP_Transfer`: up to 12 packed DP/AP requests.
#[derive(Debug)]
pub struct TransferRequest {
    pub dap_index: u8,
    pub transfers: Vec<InnerTransfer>,
}

impl TransferRequest {
    pub fn new(dap_index: u8, transfers: Vec<InnerTransfer>) -> Result<Self, CmsisDapError> {
        if transfers.is_empty() || transfers.len() > 12 {
            return Err(CmsisDapError::TooManyTransfers);
        }
        Ok(Self {
            dap_index,
            transfers,
        })
    }
}

#[derive(Debug)]
pub struct TransferResponse {
    pub processed: usize,
    pub ack: Ack,
    pub protocol_error: bool,
    /// One entry per read in the request, in order, for however many
    /// transfers were actually processed.
    pub reads: Vec<u32>,
}

impl Request for TransferRequest {
    const COMMAND_ID: CommandId = CommandId::Transfer;
    type Response = TransferResponse;

    fn to_bytes(&self, buffer: &mut [u8]) -> Result<usize, CmsisDapError> {
        let mut offset = 0;
        buffer[offset] = self.dap_index;
        offset += 1;
        buffer[offset] = self.transfers.len() as u8;
        offset += 1;

        for t in &self.transfers {
            buffer[offset] = t.request_byte();
            offset += 1;
            if let Some(data) = t.data {
                buffer[offset..offset + 4].copy_from_slice(&data.to_le_bytes());
                offset += 4;
            }
        }
        Ok(offset)
    }

    fn parse_response(&self, buffer: &[u8]) -> Result<Self::Response, CmsisDapError> {
        if buffer.len() < 2 {
            return Err(CmsisDapError::NotEnoughData);
        }
        let processed = buffer[0] as usize;
        let status = buffer[1];
        let ack = Ack::from_bits(status).ok_or(CmsisDapError::UnexpectedAnswer)?;
        let protocol_error = status & 0x08 != 0;

        let mut offset = 2;
        let mut reads = Vec::new();
        // Only transfers up to `processed` actually produced data; the last
        // one's ack is `ack` above, all earlier ones implicitly succeeded.
        for t in self.transfers.iter().take(processed) {
            if t.read {
                if buffer.len() < offset + 4 {
                    break;
                }
                reads.push(u32::from_le_bytes(
                    buffer[offset..offset + 4].try_into().unwrap(),
                ));
                offset += 4;
            }
        }

        Ok(TransferResponse {
            processed,
            ack,
            protocol_error,
            reads,
        })
    }
}

/// `DAP_TransferBlock`: one register, one direction, up to 256 beats.
#[derive(Debug)]
pub struct TransferBlockRequest {
    pub dap_index: u8,
    pub ap_not_dp: bool,
    pub read: bool,
    pub a2: bool,
    pub a3: bool,
    pub count: u16,
    pub write_data: Vec<u32>,
}

impl TransferBlockRequest {
    pub fn read(dap_index: u8, ap_not_dp: bool, a2: bool, a3: bool, count: u16) -> Result<Self, CmsisDapError> {
        if count as usize > 256 {
            return Err(CmsisDapError::TooManyBlockBeats);
        }
        Ok(Self {
            dap_index,
            ap_not_dp,
            read: true,
            a2,
            a3,
            count,
            write_data: Vec::new(),
        })
    }

    pub fn write(
        dap_index: u8,
        ap_not_dp: bool,
        a2: bool,
        a3: bool,
        data: Vec<u32>,
    ) -> Result<Self, CmsisDapError> {
        if data.len() > 256 {
            return Err(CmsisDapError::TooManyBlockBeats);
        }
        Ok(Self {
            dap_index,
            ap_not_dp,
            read: false,
            a2,
            a3,
            count: data.len() as u16,
            write_data: data,
        })
    }

    fn reg_byte(&self) -> u8 {
        (self.ap_not_dp as u8) | (self.read as u8) << 1 | (self.a2 as u8) << 2 | (self.a3 as u8) << 3
    }
}

#[derive(Debug)]
pub struct TransferBlockResponse {
    pub blocks_processed: u16,
    pub status: u8,
    pub reads: Vec<u32>,
}

impl Request for TransferBlockRequest {
    const COMMAND_ID: CommandId = CommandId::TransferBlock;
    type Response = TransferBlockResponse;

    fn to_bytes(&self, buffer: &mut [u8]) -> Result<usize, CmsisDapError> {
        let mut offset = 0;
        buffer[offset] = self.dap_index;
        offset += 1;
        buffer[offset..offset + 2].copy_from_slice(&self.count.to_le_bytes());
        offset += 2;
        buffer[offset] = self.reg_byte();
        offset += 1;

        if !self.read {
            for word in &self.write_data {
                buffer[offset..offset + 4].copy_from_slice(&word.to_le_bytes());
                offset += 4;
            }
        }
        Ok(offset)
    }

    fn parse_response(&self, buffer: &[u8]) -> Result<Self::Response, CmsisDapError> {
        if buffer.len() < 3 {
            return Err(CmsisDapError::NotEnoughData);
        }
        let blocks_processed = u16::from_le_bytes([buffer[0], buffer[1]]);
        let status = buffer[2];

        let mut reads = Vec::new();
        if self.read {
            let available = (buffer.len() - 3) / 4;
            let n = (blocks_processed as usize).min(available);
            for i in 0..n {
                let off = 3 + i * 4;
                reads.push(u32::from_le_bytes(buffer[off..off + 4].try_into().unwrap()));
            }
        }

        Ok(TransferBlockResponse {
            blocks_processed,
            status,
            reads,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_and_over_twelve_transfers() {
        assert!(TransferRequest::new(0, vec![]).is_err());
        let t = InnerTransfer {
            ap_not_dp: false,
            read: true,
            a2: false,
            a3: false,
            data: None,
        };
        assert!(TransferRequest::new(0, vec![t; 13]).is_err());
        assert!(TransferRequest::new(0, vec![t; 12]).is_ok());
    }

    #[test]
    fn rejects_over_256_block_beats() {
        assert!(TransferBlockRequest::read(0, true, false, false, 257).is_err());
        assert!(TransferBlockRequest::read(0, true, false, false, 256).is_ok());
    }

    #[test]
    fn dp_ctrl_stat_read_matches_seed_scenario_bytes() {
        // DAP_Transfer DP read of CTRL/STAT (0x04): read-DP addr 4 | RnW.
        let t = InnerTransfer {
            ap_not_dp: false,
            read: true,
            a2: true,
            a3: false,
            data: None,
        };
        let req = TransferRequest::new(0, vec![t]).unwrap();
        let mut buf = [0u8; 8];
        let n = req.to_bytes(&mut buf).unwrap();
        assert_eq!(&buf[..n], &[0x00, 0x01, 0x06]);

        let resp = req.parse_response(&[0x01, 0x01, 0x78, 0x56, 0x34, 0x12]).unwrap();
        assert_eq!(resp.ack, Ack::Ok);
        assert_eq!(resp.reads, vec![0x1234_5678]);
    }

    #[test]
    fn block_read_of_sixteen_words_matches_seed_scenario_bytes() {
        // Block read of 16 words, reg = DRW|APnDP|RnW = 0x0F.
        let req = TransferBlockRequest::read(0, true, true, true, 16).unwrap();
        let mut buf = [0u8; 8];
        let n = req.to_bytes(&mut buf).unwrap();
        assert_eq!(&buf[..n], &[0x00, 0x10, 0x00, 0x0F]);

        let mut response = vec![0x10, 0x00, 0x01];
        response.extend((0u32..16).flat_map(|i| i.to_le_bytes()));
        let resp = req.parse_response(&response).unwrap();
        assert_eq!(resp.blocks_processed, 16);
        assert_eq!(resp.reads.len(), 16);
    }

    #[test]
    fn partial_block_read_copies_only_what_was_actually_returned() {
        // WAIT cuts the block short: 4 beats processed out of 16 requested.
        let req = TransferBlockRequest::read(0, true, true, true, 16).unwrap();
        let mut response = vec![0x04, 0x00, 0x02]; // blocks_processed=4, status=WAIT
        response.extend((0u32..4).flat_map(|i| i.to_le_bytes()));
        let resp = req.parse_response(&response).unwrap();
        assert_eq!(resp.blocks_processed, 4);
        assert_eq!(resp.reads.len(), 4);
    }
}
