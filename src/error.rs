//! Crate-wide error types.
//!
//! Splits a low-level protocol error (`DapError`, raised by a single DP/AP
//! access) from a higher-level error that wraps it together with transport
//! and access-port failures (`ArmError`).

use thiserror::Error;

/// Error raised by a single low-level DP/AP access.
#[derive(Debug, Error, docsplay::Display)]
pub enum DapError {
    /// An error occurred in the SWD communication between probe and target.
    SwdProtocol,
    /// The target device did not respond to the request (NO_RESPONSE/NO_ACK).
    NoAcknowledge,
    /// The target device responded with a FAULT response to the request.
    FaultResponse,
    /// Target device responded with a WAIT response to the request.
    WaitResponse,
    /// The parity bit on the read request was incorrect.
    IncorrectParity,
    /// The command response did not echo the command byte that was sent.
    ProtocolError,
}

/// Errors raised by the CMSIS-DAP command framing layer (L2) and transport (L1).
#[derive(Debug, Error)]
pub enum CmsisDapError {
    #[error("unexpected answer from probe")]
    UnexpectedAnswer,
    #[error("probe responded with an error status")]
    ErrorResponse,
    #[error("too much data for a single SWJ/SWD/JTAG sequence command")]
    TooMuchData,
    #[error("not enough data in response from probe")]
    NotEnoughData,
    #[error("more than 12 requests packed into a single DAP_Transfer")]
    TooManyTransfers,
    #[error("more than 256 beats requested in a single DAP_TransferBlock")]
    TooManyBlockBeats,
    #[error("a DAP_SWD_Sequence request needs IN sub-sequences, which NO_SWD_SEQUENCE can't emulate")]
    SwdSequenceNeedsInput,
    #[cfg(feature = "hid")]
    #[error("HID transport error")]
    HidApi(#[from] hidapi::HidError),
    #[cfg(feature = "bulk")]
    #[error("USB bulk transport error")]
    UsbError(#[from] rusb::Error),
    #[error("transport read timed out")]
    ReadTimeout,
}

/// Top-level error returned by the ADIv5 transaction engine and memory engine.
#[derive(Debug, Error, docsplay::Display)]
pub enum ArmError {
    /// A timeout occurred while waiting for the probe to respond.
    Timeout,

    /// An invalid acknowledgement ({0:#x}) was returned by the probe; the protocol state is
    /// no longer trustworthy.
    InvalidAck(u8),

    /// An error occurred in the communication with the debug port or access port.
    Dap(#[from] DapError),

    /// An error occurred in the CMSIS-DAP command framing or USB transport layer.
    CmsisDap(#[from] CmsisDapError),

    /// {0} requests were packed into a single DAP_Transfer, but at most 12 are allowed.
    TooManyTransferRequests(usize),

    /// {0} beats were requested in a single DAP_TransferBlock, but at most 256 are allowed.
    TooManyBlockBeats(usize),

    /// A memory access at address {address:#010x} of length {length} is not valid.
    InvalidMemoryAccess { address: u64, length: usize },

    /// The requested access port {0:#x} does not exist on this debug port.
    ApDoesNotExist(u8),

    /// Target device is not an ARM device or is not supported by this engine.
    NoArmTarget,
}
