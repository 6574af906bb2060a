//! Probe Transport (L1) — USB HID and USB Bulk framing.
//!
//! Two transports share one contract: hand the framing layer a command
//! buffer, get back the response bytes. All of the USB-specific oddities
//! (report IDs, packet padding, command-echo resynchronisation, ZLP quirks)
//! are handled here so that [`crate::probe::commands`] never has to think
//! about the wire.

use std::time::Duration;

use tracing::{debug, trace};

use super::capabilities::Quirks;
use crate::error::CmsisDapError;

/// Maximum time a transport may block on an OUT transfer.
pub const TRANSFER_TIMEOUT_MS: u64 = 100;
/// Maximum time a transport may block on an IN transfer before giving up.
pub const READ_TIMEOUT_MS: u64 = 1000;
/// Number of times a HID transport retries a desynced IN read.
const HID_READ_RETRIES: usize = 3;

/// Shared contract implemented by the HID and Bulk back-ends.
///
/// Implementors are responsible only for the raw byte shuttling; framing
/// (report IDs, padding, echo resync, ZLP quirk) is handled by
/// [`exchange`], which is transport-agnostic.
pub trait Transport: Send {
    /// Write `buf` to the probe. Must not block longer than
    /// [`TRANSFER_TIMEOUT_MS`].
    fn write(&mut self, buf: &[u8]) -> Result<(), CmsisDapError>;

    /// Read up to `buf.len()` bytes from the probe, blocking at most
    /// `timeout`. Returns the number of bytes read.
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, CmsisDapError>;

    /// Issue a zero-length IN read (used by the `NEEDS_EXTRA_ZLP_READ` quirk).
    fn read_zlp(&mut self) -> Result<(), CmsisDapError>;

    /// Negotiated maximum DAP packet size, not including any HID report-ID byte.
    fn packet_size(&self) -> usize;

    /// Whether this transport is HID (report based) rather than Bulk.
    fn is_hid(&self) -> bool;
}

/// Frame and exchange one CMSIS-DAP command.
///
/// `request` is the full command buffer starting with the command byte
/// (`request[0]`); the returned buffer starts at the status byte that
/// follows the echoed command byte (i.e. the command byte itself is
/// stripped).
pub fn exchange(
    transport: &mut dyn Transport,
    quirks: Quirks,
    request: &[u8],
) -> Result<Vec<u8>, CmsisDapError> {
    let command_id = request[0];

    let out = if transport.is_hid() {
        // HID requires a full-size report: a leading zero report-ID byte,
        // the command, and 0xFF padding out to the packet size.
        let mut buf = vec![0xFFu8; transport.packet_size() + 1];
        buf[0] = 0;
        buf[1..1 + request.len()].copy_from_slice(request);
        buf
    } else {
        request.to_vec()
    };

    trace!("transmit: {:02x?}", out);
    transport.write(&out)?;

    let mut response = vec![0u8; transport.packet_size() + 1];
    let retries = if transport.is_hid() { HID_READ_RETRIES } else { 1 };
    let mut n = 0;
    let mut synced = false;
    for attempt in 0..retries {
        n = transport.read(&mut response, Duration::from_millis(READ_TIMEOUT_MS))?;
        if n > 0 && response[0] == command_id {
            synced = true;
            break;
        }
        debug!(
            "desynced response on attempt {}/{}: got {:#x}, expected {:#x}",
            attempt + 1,
            retries,
            response.first().copied().unwrap_or(0),
            command_id
        );
    }
    if !synced {
        return Err(CmsisDapError::ReadTimeout);
    }

    if !transport.is_hid() && quirks.contains(Quirks::NEEDS_EXTRA_ZLP_READ) && n == transport.packet_size() {
        debug!("NEEDS_EXTRA_ZLP_READ quirk: draining zero-length IN");
        transport.read_zlp()?;
    }

    trace!("receive: {:02x?}", &response[..n]);
    Ok(response[1..n].to_vec())
}

#[cfg(feature = "hid")]
mod hid {
    use super::*;

    /// CMSIS-DAPv1 transport over a USB HID report.
    pub struct HidTransport {
        handle: hidapi::HidDevice,
        report_size: usize,
    }

    impl HidTransport {
        pub fn new(handle: hidapi::HidDevice, report_size: usize) -> Self {
            Self { handle, report_size }
        }
    }

    impl Transport for HidTransport {
        fn write(&mut self, buf: &[u8]) -> Result<(), CmsisDapError> {
            self.handle.write(buf)?;
            Ok(())
        }

        fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, CmsisDapError> {
            Ok(self
                .handle
                .read_timeout(buf, timeout.as_millis() as i32)?)
        }

        fn read_zlp(&mut self) -> Result<(), CmsisDapError> {
            // HID never needs the ZLP quirk; nothing to do.
            Ok(())
        }

        fn packet_size(&self) -> usize {
            // One byte is reserved for the HID report ID.
            self.report_size.saturating_sub(1)
        }

        fn is_hid(&self) -> bool {
            true
        }
    }
}
#[cfg(feature = "hid")]
pub use hid::HidTransport;

#[cfg(feature = "bulk")]
mod bulk {
    use super::*;

    /// CMSIS-DAPv2 transport over USB Bulk endpoints.
    pub struct BulkTransport {
        handle: rusb::DeviceHandle<rusb::Context>,
        out_ep: u8,
        in_ep: u8,
        max_packet_size: usize,
    }

    impl BulkTransport {
        pub fn new(
            handle: rusb::DeviceHandle<rusb::Context>,
            out_ep: u8,
            in_ep: u8,
            max_packet_size: usize,
        ) -> Self {
            Self {
                handle,
                out_ep,
                in_ep,
                max_packet_size,
            }
        }
    }

    impl Transport for BulkTransport {
        fn write(&mut self, buf: &[u8]) -> Result<(), CmsisDapError> {
            let timeout = Duration::from_millis(TRANSFER_TIMEOUT_MS);
            self.handle.write_bulk(self.out_ep, buf, timeout)?;
            Ok(())
        }

        fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, CmsisDapError> {
            match self.handle.read_bulk(self.in_ep, buf, timeout) {
                Ok(n) => Ok(n),
                Err(rusb::Error::Timeout) => Err(CmsisDapError::ReadTimeout),
                Err(e) => Err(e.into()),
            }
        }

        fn read_zlp(&mut self) -> Result<(), CmsisDapError> {
            let mut discard = [0u8; 1];
            match self
                .handle
                .read_bulk(self.in_ep, &mut discard, Duration::from_millis(READ_TIMEOUT_MS))
            {
                Ok(_) | Err(rusb::Error::Timeout) => Ok(()),
                Err(e) => Err(e.into()),
            }
        }

        fn packet_size(&self) -> usize {
            self.max_packet_size
        }

        fn is_hid(&self) -> bool {
            false
        }
    }
}
#[cfg(feature = "bulk")]
pub use bulk::BulkTransport;

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::collections::VecDeque;

    /// In-memory loopback transport used by unit tests.
    ///
    /// `reads` is a queue of canned IN responses, consumed one per `read()`
    /// call (so retry behaviour can be exercised by queuing a desynced
    /// response ahead of the real one). `writes` records every OUT transfer
    /// for post-hoc assertions.
    #[derive(Default)]
    pub struct MockTransport {
        pub writes: Vec<Vec<u8>>,
        pub reads: VecDeque<Vec<u8>>,
        pub packet_size: usize,
        pub hid: bool,
        pub zlp_reads: usize,
    }

    impl MockTransport {
        pub fn new(packet_size: usize, hid: bool) -> Self {
            Self {
                writes: Vec::new(),
                reads: VecDeque::new(),
                packet_size,
                hid,
                zlp_reads: 0,
            }
        }

        pub fn queue_read(&mut self, response: Vec<u8>) {
            self.reads.push_back(response);
        }
    }

    impl Transport for MockTransport {
        fn write(&mut self, buf: &[u8]) -> Result<(), CmsisDapError> {
            self.writes.push(buf.to_vec());
            Ok(())
        }

        fn read(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize, CmsisDapError> {
            let response = self.reads.pop_front().expect("no more queued reads");
            buf[..response.len()].copy_from_slice(&response);
            Ok(response.len())
        }

        fn read_zlp(&mut self) -> Result<(), CmsisDapError> {
            self.zlp_reads += 1;
            Ok(())
        }

        fn packet_size(&self) -> usize {
            self.packet_size
        }

        fn is_hid(&self) -> bool {
            self.hid
        }
    }

    #[test]
    fn exchange_strips_command_byte_and_validates_echo() {
        let mut t = MockTransport::new(64, false);
        t.queue_read(vec![0x00, 0x01, b'B', b'M']);
        let resp = exchange(&mut t, Quirks::empty(), &[0x00, 0x01]).unwrap();
        assert_eq!(resp, vec![0x01, b'B', b'M']);
    }

    #[test]
    fn hid_retries_on_desync_then_succeeds() {
        let mut t = MockTransport::new(64, true);
        // Stale response from a previous command, then the real answer.
        t.queue_read(vec![0xAB, 0x00]);
        t.queue_read(vec![0x04, 0x00]);
        let resp = exchange(&mut t, Quirks::empty(), &[0x04]).unwrap();
        assert_eq!(resp, vec![0x00]);
    }

    #[test]
    fn exhausting_retries_times_out() {
        let mut t = MockTransport::new(64, true);
        t.queue_read(vec![0xAB]);
        t.queue_read(vec![0xAB]);
        t.queue_read(vec![0xAB]);
        let err = exchange(&mut t, Quirks::empty(), &[0x04]).unwrap_err();
        assert!(matches!(err, CmsisDapError::ReadTimeout));
    }

    #[test]
    fn needs_extra_zlp_read_quirk_drains_zero_length_in() {
        let mut t = MockTransport::new(4, false);
        t.queue_read(vec![0x06, 0x01, 0x02, 0x03]);
        let _ = exchange(&mut t, Quirks::NEEDS_EXTRA_ZLP_READ, &[0x06]).unwrap();
        assert_eq!(t.zlp_reads, 1);
    }

    #[test]
    fn no_zlp_read_when_response_shorter_than_packet() {
        let mut t = MockTransport::new(64, false);
        t.queue_read(vec![0x06, 0x01]);
        let _ = exchange(&mut t, Quirks::NEEDS_EXTRA_ZLP_READ, &[0x06]).unwrap();
        assert_eq!(t.zlp_reads, 0);
    }
}
