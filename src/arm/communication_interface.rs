//! ADIv5 Transaction Engine (L3): DP/AP register access, sticky-flag error
//! recovery, fault taxonomy, ABORT issuance, DP link re-selection on DPv2+.

use tracing::{debug, warn};

use super::ap::{addr as ap_addr, MemoryAp};
use super::dp::{addr as dp_addr, Abort, CtrlStat, Dp, DpBackend, Select, StickyFault};
use super::sequences;
use crate::error::ArmError;
use crate::probe::capabilities::Quirks;
use crate::probe::commands::transfer::{InnerTransfer, TransferBlockRequest, TransferRequest};
use crate::probe::commands::Ack;
use crate::probe::Probe;

fn inner_transfer(ap_not_dp: bool, read: bool, addr: u16, data: Option<u32>) -> InnerTransfer {
    InnerTransfer {
        ap_not_dp,
        read,
        a2: addr & 0x4 != 0,
        a3: addr & 0x8 != 0,
        data,
    }
}

/// Outcome of dispatching a `DAP_Transfer` status byte onto the DP's fault
/// state.
fn dispatch_status<B: DpBackend>(
    probe: &mut Probe,
    dp: &mut Dp<B>,
    ack: Ack,
    protocol_error: bool,
) -> Result<(), ArmError> {
    if protocol_error {
        return Err(ArmError::InvalidAck(ack as u8));
    }
    match ack {
        Ack::Ok => {
            dp.fault = StickyFault::None;
            Ok(())
        }
        Ack::Wait => {
            dp.fault = StickyFault::Wait;
            Ok(())
        }
        Ack::Fault => {
            dp.fault = StickyFault::Fault;
            warn!("DP/AP transfer faulted");
            Ok(())
        }
        Ack::NoResponse => {
            dp.fault = StickyFault::NoResponse;
            warn!("DP/AP transfer got no response");
            if dp.is_swd() && probe.quirks().contains(Quirks::BAD_SWD_NO_RESP_DATA_PHASE) {
                debug!("absorbing phantom data phase after NO_RESPONSE");
                let _ = sequences::seq_in_parity(probe, 32);
            }
            Ok(())
        }
    }
}

/// Send a packed `DAP_Transfer` of 1-12 sub-requests as one USB command and
/// dispatch the status byte onto `dp.fault`. Returns one entry per read
/// sub-request, in request order.
fn perform_packed_transfer<B: DpBackend>(
    probe: &mut Probe,
    dp: &mut Dp<B>,
    transfers: Vec<InnerTransfer>,
) -> Result<Vec<u32>, ArmError> {
    let request = TransferRequest::new(0, transfers)?;
    let response = probe.send(request)?;

    // Invalid ack / protocol error is the only fatal outcome here; WAIT,
    // FAULT and NO_RESPONSE just leave the fault recorded on `dp` and read
    // back as zero, per the "inspect dp.fault, not every op" policy.
    dispatch_status(probe, dp, response.ack, response.protocol_error)?;
    Ok(response.reads)
}

/// One un-retried DP or AP transfer; used directly by [`dp_low_access`] and
/// as the inner step of the recoverable wrappers below.
fn perform_transfer<B: DpBackend>(
    probe: &mut Probe,
    dp: &mut Dp<B>,
    ap_not_dp: bool,
    read: bool,
    addr: u16,
    data: Option<u32>,
) -> Result<u32, ArmError> {
    let transfer = inner_transfer(ap_not_dp, read, addr, data);
    let reads = perform_packed_transfer(probe, dp, vec![transfer])?;
    Ok(reads.first().copied().unwrap_or(0))
}

/// `perform_transfer_recoverable`: retry exactly once, via `error(true)`,
/// when the first attempt leaves `dp.fault == NoResponse`.
fn perform_transfer_recoverable<B: DpBackend>(
    probe: &mut Probe,
    dp: &mut Dp<B>,
    ap_not_dp: bool,
    read: bool,
    addr: u16,
    data: Option<u32>,
) -> Result<u32, ArmError> {
    let first = perform_transfer(probe, dp, ap_not_dp, read, addr, data)?;
    if matches!(dp.fault, StickyFault::NoResponse) {
        warn!("recovering from NO_RESPONSE and retrying once");
        error(probe, dp, true)?;
        return perform_transfer(probe, dp, ap_not_dp, read, addr, data);
    }
    Ok(first)
}

/// The memory engine's single-beat fast path: packs `SELECT`, `CSW`, `TAR`
/// and the `DRW` read/write into one `DAP_Transfer` of four sub-requests, no
/// separate block command. Retried once via `error(true)` on `NO_RESPONSE`,
/// matching the other AP accesses.
pub fn single_beat_transfer<B: DpBackend>(
    probe: &mut Probe,
    dp: &mut Dp<B>,
    ap: &MemoryAp,
    csw: u32,
    tar: u32,
    read: bool,
    write_data: Option<u32>,
) -> Result<u32, ArmError> {
    let mut select = Select::from(0);
    select.set_apsel(ap.apsel);
    select.set_apbanksel(0);
    select.set_dpbanksel(dp.select.dpbanksel());
    dp.select = select;

    let transfers = vec![
        inner_transfer(false, false, dp_addr::SELECT, Some(u32::from(select))),
        inner_transfer(true, false, ap_addr::CSW, Some(csw)),
        inner_transfer(true, false, ap_addr::TAR, Some(tar)),
        inner_transfer(true, read, ap_addr::DRW, if read { None } else { write_data }),
    ];

    let first = perform_packed_transfer(probe, dp, transfers.clone())?;
    if matches!(dp.fault, StickyFault::NoResponse) {
        warn!("recovering from NO_RESPONSE and retrying once");
        error(probe, dp, true)?;
        let retried = perform_packed_transfer(probe, dp, transfers)?;
        return Ok(retried.first().copied().unwrap_or(0));
    }
    Ok(first.first().copied().unwrap_or(0))
}

/// `dp_low_access(rnw, reg, value)`: single DP/AP transfer, no retry.
pub fn dp_low_access<B: DpBackend>(
    probe: &mut Probe,
    dp: &mut Dp<B>,
    read: bool,
    reg: u16,
    value: u32,
) -> Result<u32, ArmError> {
    select_dp_bank(probe, dp, reg)?;
    perform_transfer(probe, dp, false, read, reg, if read { None } else { Some(value) })
}

fn select_dp_bank<B: DpBackend>(probe: &mut Probe, dp: &mut Dp<B>, reg: u16) -> Result<(), ArmError> {
    if reg != dp_addr::SELECT && reg != dp_addr::ABORT_IDCODE {
        let bank = ((reg & 0xF0) >> 4) as u8;
        if dp.select.dpbanksel() != bank {
            dp.select.set_dpbanksel(bank);
            perform_transfer(probe, dp, false, false, dp_addr::SELECT, Some(u32::from(dp.select)))?;
        }
    }
    Ok(())
}

/// `dp_read(reg)`: retries on WAIT are the adaptor's own job (`DAP_TransferConfigure`);
/// this only adds the one NO_RESPONSE recovery attempt.
pub fn dp_read<B: DpBackend>(probe: &mut Probe, dp: &mut Dp<B>, reg: u16) -> Result<u32, ArmError> {
    select_dp_bank(probe, dp, reg)?;
    perform_transfer_recoverable(probe, dp, false, true, reg, None)
}

/// `dp_write(reg, value)`.
pub fn dp_write<B: DpBackend>(
    probe: &mut Probe,
    dp: &mut Dp<B>,
    reg: u16,
    value: u32,
) -> Result<(), ArmError> {
    select_dp_bank(probe, dp, reg)?;
    perform_transfer_recoverable(probe, dp, false, false, reg, Some(value))?;
    Ok(())
}

/// Select the AP bank (`SELECT.apsel`/`apbanksel`), matching the invariant
/// that every AP operation is preceded by a `SELECT` write.
fn select_ap<B: DpBackend>(probe: &mut Probe, dp: &mut Dp<B>, ap: &MemoryAp, addr: u16) -> Result<(), ArmError> {
    let bank = ((addr & 0xF0) >> 4) as u8;
    let mut select = Select::from(0);
    select.set_apsel(ap.apsel);
    select.set_apbanksel(bank);
    select.set_dpbanksel(dp.select.dpbanksel());
    if u32::from(select) != u32::from(dp.select) {
        dp.select = select;
        perform_transfer(probe, dp, false, false, dp_addr::SELECT, Some(u32::from(select)))?;
    }
    Ok(())
}

/// `ap_read(addr)`: `SELECT` then the AP access.
pub fn ap_read<B: DpBackend>(
    probe: &mut Probe,
    dp: &mut Dp<B>,
    ap: &MemoryAp,
    addr: u16,
) -> Result<u32, ArmError> {
    select_ap(probe, dp, ap, addr)?;
    perform_transfer_recoverable(probe, dp, true, true, addr, None)
}

/// `ap_write(addr, value)`.
pub fn ap_write<B: DpBackend>(
    probe: &mut Probe,
    dp: &mut Dp<B>,
    ap: &MemoryAp,
    addr: u16,
    value: u32,
) -> Result<(), ArmError> {
    select_ap(probe, dp, ap, addr)?;
    perform_transfer_recoverable(probe, dp, true, false, addr, Some(value))?;
    Ok(())
}

/// `abort(mask)`: single DP write to the `ABORT` register.
pub fn abort<B: DpBackend>(probe: &mut Probe, dp: &mut Dp<B>, mask: Abort) -> Result<(), ArmError> {
    perform_transfer(probe, dp, false, false, dp_addr::ABORT_IDCODE, Some(u32::from(mask)))?;
    Ok(())
}

/// `error(recover)`: clear sticky flags. On SWD, when DPv2+ and a recovery
/// was requested (or a fault is pending), runs line reset + `TARGETSEL` +
/// `DPIDR` re-select first. Returns the sticky-bit nibble that was cleared.
pub fn error<B: DpBackend>(probe: &mut Probe, dp: &mut Dp<B>, recover: bool) -> Result<u8, ArmError> {
    let needs_recovery = recover || !matches!(dp.fault, StickyFault::None);

    if dp.is_swd() && needs_recovery {
        sequences::line_reset(probe)?;
        if let Some(targetsel) = dp.version.supports_targetsel().then(|| dp.address.targetsel()).flatten() {
            sequences::dp_low_write_no_check(probe, dp_addr::RDBUFF_TARGETSEL, targetsel)?;
        }
        let _ = perform_transfer(probe, dp, false, true, dp_addr::ABORT_IDCODE, None)?;
    }

    let ctrl = CtrlStat::from(perform_transfer(probe, dp, false, true, dp_addr::CTRL_STAT, None)?);
    let sticky = ctrl.sticky_bits();
    if sticky != 0 {
        let mask = Abort::from_sticky_bits(sticky);
        abort(probe, dp, mask)?;
    }
    dp.fault = StickyFault::None;
    Ok(sticky)
}

/// Issue a `DAP_TransferBlock` read of `count` beats from AP register `addr`,
/// filling `out` with whatever beats were actually returned. Implements the
/// "copy what was read, then set fault if short" resolution: a WAIT-truncated
/// block still yields its partial data, and any shortfall marks `dp.fault`.
pub fn perform_transfer_block_read<B: DpBackend>(
    probe: &mut Probe,
    dp: &mut Dp<B>,
    ap: &MemoryAp,
    addr: u16,
    count: u16,
) -> Result<Vec<u32>, ArmError> {
    select_ap(probe, dp, ap, addr)?;
    let a2 = addr & 0x4 != 0;
    let a3 = addr & 0x8 != 0;
    let request = TransferBlockRequest::read(0, true, a2, a3, count)?;
    let response = probe.send(request)?;

    if response.blocks_processed < count {
        dp.fault = StickyFault::Fault;
        warn!(
            "block read returned {} of {} requested beats",
            response.blocks_processed, count
        );
        if response.status & 0x4 != 0 {
            abort_fault(probe, dp)?;
        }
    } else {
        dp.fault = StickyFault::None;
    }

    Ok(response.reads)
}

/// Issue a `DAP_TransferBlock` write of `data` beats to AP register `addr`.
pub fn perform_transfer_block_write<B: DpBackend>(
    probe: &mut Probe,
    dp: &mut Dp<B>,
    ap: &MemoryAp,
    addr: u16,
    data: Vec<u32>,
) -> Result<(), ArmError> {
    select_ap(probe, dp, ap, addr)?;
    let a2 = addr & 0x4 != 0;
    let a3 = addr & 0x8 != 0;
    let requested = data.len() as u16;
    let request = TransferBlockRequest::write(0, true, a2, a3, data)?;
    let response = probe.send(request)?;

    if response.blocks_processed < requested {
        dp.fault = StickyFault::Fault;
        warn!(
            "block write only accepted {} of {} beats",
            response.blocks_processed, requested
        );
        if response.status & 0x4 != 0 {
            abort_fault(probe, dp)?;
        }
    } else {
        dp.fault = StickyFault::None;
    }
    Ok(())
}

fn abort_fault<B: DpBackend>(probe: &mut Probe, dp: &mut Dp<B>) -> Result<(), ArmError> {
    let mut mask = Abort::from(0);
    mask.set_dapabort(true);
    abort(probe, dp, mask)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arm::dp::{DpAddress, SwdBackend};
    use crate::probe::{transport::mock::MockTransport, ProbeConfig};

    fn open_probe_with(reads: Vec<Vec<u8>>) -> Probe {
        let mut t = MockTransport::new(64, false);
        t.queue_read(vec![0x03, 0x00]); // disconnect
        t.queue_read({
            let mut v = vec![0x00, 0x03];
            v.extend_from_slice(b"2.1");
            v
        });
        t.queue_read(vec![0x00, 0x01, 0x00]); // adaptor version (empty string ok)
        t.queue_read({
            let mut v = vec![0x00, 0x02];
            v.extend_from_slice(&64u16.to_le_bytes());
            v
        });
        t.queue_read(vec![0x00, 0x01, 0x03]); // capabilities
        t.queue_read(vec![0x04, 0x00]); // transfer configure
        for r in reads {
            t.queue_read(r);
        }
        Probe::open(Box::new(t), ProbeConfig::default()).unwrap()
    }

    #[test]
    fn dp_read_of_ctrl_stat_decodes_little_endian_word() {
        let mut probe = open_probe_with(vec![vec![0x01, 0x01, 0x78, 0x56, 0x34, 0x12]]);
        let mut dp: Dp<SwdBackend> = Dp::new(DpAddress::Default);
        let value = dp_read(&mut probe, &mut dp, dp_addr::CTRL_STAT).unwrap();
        assert_eq!(value, 0x1234_5678);
    }

    #[test]
    fn error_with_no_pending_fault_is_idempotent_on_jtag() {
        use crate::arm::dp::JtagBackend;
        let mut probe = open_probe_with(vec![
            vec![0x01, 0x01, 0, 0, 0, 0], // CTRL/STAT read, first call
            vec![0x01, 0x01, 0, 0, 0, 0], // CTRL/STAT read, second call
        ]);
        let mut dp: Dp<JtagBackend> = Dp::new(DpAddress::Default);
        let first = error(&mut probe, &mut dp, false).unwrap();
        let second = error(&mut probe, &mut dp, false).unwrap();
        assert_eq!(first, 0);
        assert_eq!(second, 0);
        assert!(matches!(dp.fault, StickyFault::None));
    }
}
