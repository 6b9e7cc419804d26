//! Error taxonomy for the FEL/FES protocol engine.

use thiserror::Error;

/// All failure kinds the protocol engine can raise.
#[derive(Debug, Error)]
pub enum FelError {
    /// A bulk-in transfer returned fewer bytes than requested and the
    /// resynchronization rule did not recover.
    #[error("transport returned {got} bytes, expected {expected} ({bytes_done} bytes completed before failure)")]
    TransportShort {
        expected: usize,
        got: usize,
        bytes_done: u64,
    },

    /// The 13-byte CSW envelope had the wrong magic or a non-zero status.
    #[error("bad USB envelope: {0}")]
    BadEnvelope(String),

    /// `AWFELStatusResponse.state != 0`.
    #[error("command failed with device status {state}")]
    CommandFailed { state: u8 },

    /// `AWFESVerifyStatusResponse.crc != 0` on an MBR/erase path.
    #[error("verification failed: crc=0x{crc:08x} last_error={last_error}")]
    VerifyFailed { crc: u32, last_error: i32 },

    /// Caller supplied an invalid argument (missing address/length, wrong
    /// MBR size, invalid tag combination, oversized transmite-upload).
    #[error("bad argument: {0}")]
    BadArgument(String),

    /// The underlying USB transfer layer reported a driver-level error.
    #[error("USB error: {0}")]
    Usb(#[from] nusb::transfer::TransferError),
}

pub type FelResult<T> = Result<T, FelError>;
