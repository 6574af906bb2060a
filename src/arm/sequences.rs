//! Bit-level SWD primitives and the JTAG scan-chain helpers built on top of
//! the CMSIS-DAP sequence commands.
//!
//! Built on `DAP_SWD_Sequence` when the adaptor supports it; falls back to
//! `DAP_SWJ_Sequence` under the `NO_SWD_SEQUENCE` quirk for OUT-only traffic.

use tracing::debug;

use crate::error::{ArmError, CmsisDapError};
use crate::probe::capabilities::Quirks;
use crate::probe::commands::{jtag, swd, swj, Request};
use crate::probe::transport;
use crate::probe::Probe;

fn compute_parity(value: u64, bits: u8) -> bool {
    let mask = if bits >= 64 { u64::MAX } else { (1u64 << bits) - 1 };
    (value & mask).count_ones() % 2 == 1
}

/// Send a single `DAP_SWD_Sequence` request, applying the `BROKEN_SWD_SEQUENCE`
/// correction and (on first detection) latching the quirk for the rest of the
/// session.
fn exchange_swd_sequence(
    probe: &mut Probe,
    request: swd::SequenceRequest,
) -> Result<swd::SequenceResponse, ArmError> {
    let mut buffer = vec![0u8; probe.packet_size().max(64) + 8];
    buffer[0] = <swd::SequenceRequest as Request>::COMMAND_ID as u8;
    let len = request.to_bytes(&mut buffer[1..])? + 1;

    let quirks = probe.quirks();
    let mut response = transport::exchange(probe.transport_mut(), quirks, &buffer[..len])?;

    if !quirks.contains(Quirks::BROKEN_SWD_SEQUENCE)
        && swd::is_broken_sequence_telltale(&buffer[..len], &response)
    {
        debug!("BROKEN_SWD_SEQUENCE telltale observed, latching quirk for this session");
        probe.apply_quirks(Quirks::BROKEN_SWD_SEQUENCE);
    }
    if probe.quirks().contains(Quirks::BROKEN_SWD_SEQUENCE) {
        swd::correct_broken_in_sequences(&request.sequences, &mut response);
    }

    Ok(request.parse_response(&response)?)
}

/// Send a list of SWD sub-sequences, transparently emulating via
/// `DAP_SWJ_Sequence` under the `NO_SWD_SEQUENCE` quirk.
fn send_swd_sequences(
    probe: &mut Probe,
    sequences: Vec<swd::Sequence>,
) -> Result<swd::SequenceResponse, ArmError> {
    if probe.quirks().contains(Quirks::NO_SWD_SEQUENCE) {
        if sequences.iter().any(|s| s.direction == swd::Direction::In) {
            return Err(CmsisDapError::SwdSequenceNeedsInput.into());
        }
        for seq in &sequences {
            let n = if seq.cycles == 0 { 64 } else { seq.cycles as usize };
            let bits = u64::from_le_bytes(seq.data);
            let req = swj::SequenceRequest::from_bits(n, bits)?;
            probe.send(req)?;
        }
        return Ok(swd::SequenceResponse { in_data: Vec::new() });
    }

    let request = swd::SequenceRequest::new(sequences)?;
    exchange_swd_sequence(probe, request)
}

/// `seq_out(bits, n)`: send `n` bits LSB-first, `n <= 64`.
pub fn seq_out(probe: &mut Probe, bits: u64, n: u8) -> Result<(), ArmError> {
    let mut data = [0u8; 8];
    data.copy_from_slice(&bits.to_le_bytes());
    send_swd_sequences(probe, vec![swd::Sequence::out(n, data)])?;
    Ok(())
}

/// `seq_out_parity(bits, n)`: `n` bits plus one even (XOR) parity bit.
pub fn seq_out_parity(probe: &mut Probe, bits: u64, n: u8) -> Result<(), ArmError> {
    let parity = compute_parity(bits, n) as u64;
    let combined = bits | (parity << n);
    seq_out(probe, combined, n + 1)
}

/// `seq_in(n)`: receive `n` bits LSB-first.
pub fn seq_in(probe: &mut Probe, n: u8) -> Result<u64, ArmError> {
    let response = send_swd_sequences(probe, vec![swd::Sequence::input(n)])?;
    let bytes = response
        .in_data
        .first()
        .ok_or(CmsisDapError::NotEnoughData)?;
    let mut buf = [0u8; 8];
    buf[..bytes.len()].copy_from_slice(bytes);
    Ok(u64::from_le_bytes(buf))
}

/// `seq_in_parity(n)`: receive `n` bits plus a parity bit; the returned flag
/// is `true` when the received parity matches the recomputed one.
pub fn seq_in_parity(probe: &mut Probe, n: u8) -> Result<(u64, bool), ArmError> {
    let raw = seq_in(probe, n + 1)?;
    let mask = (1u64 << n) - 1;
    let value = raw & mask;
    let received_parity = (raw >> n) & 1 == 1;
    let ok = received_parity == compute_parity(value, n);
    Ok((value, ok))
}

/// A line reset: 50 high clocks followed by at least 2 low clocks, padded to
/// 64 total cycles and sent as one `DAP_SWJ_Sequence`.
pub fn line_reset(probe: &mut Probe) -> Result<(), ArmError> {
    debug!("issuing SWD line reset");
    let req = swj::SequenceRequest::from_bits(64, 0x0FFF_FFFF_FFFF_FFFF)?;
    probe.send(req)?;
    Ok(())
}

fn swd_request_byte(ap_not_dp: bool, read: bool, a2: bool, a3: bool) -> u8 {
    let parity = (ap_not_dp as u8) ^ (read as u8) ^ (a2 as u8) ^ (a3 as u8);
    let mut byte = 1; // start bit
    byte |= (ap_not_dp as u8) << 1;
    byte |= (read as u8) << 2;
    byte |= (a2 as u8) << 3;
    byte |= (a3 as u8) << 4;
    byte |= parity << 5;
    byte |= 1 << 7; // park bit
    byte
}

/// A raw DP write that does not wait for an ack, used only for `TARGETSEL`
/// during DPv2+ recovery: OUT 8-bit packet request, IN 4 cycles (turnaround +
/// 3 ack bits, discarded), OUT 1 turnaround bit, OUT 33 bits (data + parity).
pub fn dp_low_write_no_check(probe: &mut Probe, reg: u16, value: u32) -> Result<(), ArmError> {
    let a2 = reg & 0x4 != 0;
    let a3 = reg & 0x8 != 0;
    let request_byte = swd_request_byte(false, false, a2, a3);

    let parity = (value.count_ones() % 2) as u64;
    let mut data_bytes = [0u8; 8];
    let packed = (value as u64) | (parity << 32);
    data_bytes.copy_from_slice(&packed.to_le_bytes());

    let sequences = vec![
        swd::Sequence::out(8, [request_byte, 0, 0, 0, 0, 0, 0, 0]),
        swd::Sequence::input(4),
        swd::Sequence::out(1, [0; 8]),
        swd::Sequence::out(33, data_bytes),
    ];
    send_swd_sequences(probe, sequences)?;
    Ok(())
}

/// Supplemental JTAG navigation helpers, mirrored on the same sequence
/// primitives as [`crate::probe::commands::jtag`].
pub mod jtag_seq {
    use super::*;

    /// Shift `cycles` bits of TDI through the scan chain, optionally
    /// capturing TDO, exiting the current scan state on the final cycle when
    /// `final_tms` is set.
    pub fn tdi_tdo(
        probe: &mut Probe,
        cycles: usize,
        tdi: &[u8],
        capture_tdo: bool,
        final_tms: bool,
    ) -> Result<Vec<u8>, ArmError> {
        let sequences = jtag::tdi_tdo_sequence(cycles, tdi, capture_tdo, final_tms);
        let request = jtag::SequenceRequest::new(sequences)?;
        let response = probe.send(request)?;
        Ok(response.tdo.into_iter().flatten().collect())
    }

    /// Drive a pure TMS sequence for scan-chain navigation (no data capture).
    pub fn tms(probe: &mut Probe, tms_bits: u8, cycles: u8) -> Result<(), ArmError> {
        let request = jtag::SequenceRequest::new(vec![jtag::tms_sequence(tms_bits, cycles)])?;
        probe.send(request)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parity_is_xor_of_bits() {
        assert!(!compute_parity(0b0000, 4));
        assert!(compute_parity(0b0001, 4));
        assert!(compute_parity(0b0111, 4));
        assert!(!compute_parity(0b1111, 4));
    }

    #[test]
    fn idr_read_packet_request_byte_matches_known_wire_value() {
        // DP IDR read: APnDP=0, RnW=1, A2=0, A3=0 -> 0xA5 on the wire.
        assert_eq!(swd_request_byte(false, true, false, false), 0xA5);
    }

    #[test]
    fn targetsel_write_packet_request_byte() {
        // DP write to 0x0C (A2=1, A3=1), RnW=0, APnDP=0.
        assert_eq!(swd_request_byte(false, false, true, true), 0x99);
    }
}
