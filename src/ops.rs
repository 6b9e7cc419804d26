//! Command primitives: the public operations a [`Session`] exposes.

use log::debug;

use crate::chunker::{step_address, Chunker};
use crate::error::{FelError, FelResult};
use crate::progress::Reporter;
use crate::session::Session;
use crate::wire::{
    FelCommand, FelMessage, FelStatusResponse, FesCommand, FesTransportRequest,
    FesVerifyStatusResponse, MediaIndex, Mode, StandardRequest, TransmiteDirection,
    VerifyDeviceResponse, MAX_CHUNK, MBR_SIZE,
};

fn fel_status(status_bytes: &[u8]) -> FelResult<FelStatusResponse> {
    let status = FelStatusResponse::decode(status_bytes)
        .map_err(|e| FelError::BadEnvelope(e.to_string()))?;
    if status.state != 0 {
        return Err(FelError::CommandFailed {
            state: status.state,
        });
    }
    Ok(status)
}

fn upload_opcode(mode: Mode) -> u16 {
    match mode {
        Mode::Fel => FelCommand::Upload as u16,
        Mode::Fes => FesCommand::Upload as u16,
    }
}

fn download_opcode(mode: Mode) -> u16 {
    match mode {
        Mode::Fel => FelCommand::Download as u16,
        Mode::Fes => FesCommand::Download as u16,
    }
}

fn run_opcode(mode: Mode) -> u16 {
    match mode {
        Mode::Fel => FelCommand::Run as u16,
        Mode::Fes => FesCommand::Run as u16,
    }
}

/// Sends `AWFELStandardRequest{cmd=FEL_VERIFY_DEVICE}` and returns the
/// device's identity and current boot mode.
pub fn device_info(session: &Session) -> FelResult<VerifyDeviceResponse> {
    let transport = session.transport();
    let request = StandardRequest {
        cmd: FelCommand::VerifyDevice as u16,
    }
    .encode();
    transport.write_shape(&request)?;
    let payload = transport.read_shape(VerifyDeviceResponse::SIZE)?;
    let response =
        VerifyDeviceResponse::decode(&payload).map_err(|e| FelError::BadEnvelope(e.to_string()))?;
    let status_bytes = transport.read_shape(FelStatusResponse::SIZE)?;
    fel_status(&status_bytes)?;
    debug!("device_info: {:x?}", response);
    Ok(response)
}

/// Reads `length` bytes from `address`, looping through [`Chunker`] chunks
/// and stepping the address per [`crate::chunker::step_address`].
pub fn read(
    session: &Session,
    mut address: u32,
    length: usize,
    tags: crate::wire::Tags,
    mode: Mode,
    reporter: &mut dyn Reporter,
) -> FelResult<Vec<u8>> {
    let transport = session.transport();
    let mut out = Vec::with_capacity(length);
    for chunk in Chunker::new(length) {
        let message = FelMessage {
            cmd: upload_opcode(mode),
            address,
            len: chunk.len as u32,
            flags: tags.bits(),
        }
        .encode();
        let done = out.len() as u64;
        transport
            .write_shape(&message)
            .map_err(|e| with_bytes_done(e, done))?;
        let payload = transport
            .read_shape(chunk.len)
            .map_err(|e| with_bytes_done(e, done))?;
        let status_bytes = transport
            .read_shape(FelStatusResponse::SIZE)
            .map_err(|e| with_bytes_done(e, done))?;
        fel_status(&status_bytes).map_err(|e| with_bytes_done(e, done))?;
        out.extend_from_slice(&payload);
        reporter.report("read", out.len() as u64, length as u64);
        address = step_address(address, chunk.len, tags, mode);
    }
    reporter.finish();
    Ok(out)
}

/// Writes `payload` to `address`, looping through [`Chunker`] chunks and
/// stepping the address per [`crate::chunker::step_address`].
pub fn write(
    session: &Session,
    mut address: u32,
    payload: &[u8],
    tags: crate::wire::Tags,
    mode: Mode,
    reporter: &mut dyn Reporter,
) -> FelResult<()> {
    let transport = session.transport();
    let total = payload.len();
    let mut done = 0usize;
    for chunk in Chunker::new(total) {
        let data = &payload[chunk.offset..chunk.offset + chunk.len];
        let message = FelMessage {
            cmd: download_opcode(mode),
            address,
            len: chunk.len as u32,
            flags: tags.bits(),
        }
        .encode();
        transport
            .write_shape(&message)
            .map_err(|e| with_bytes_done(e, done as u64))?;
        transport
            .write_shape(data)
            .map_err(|e| with_bytes_done(e, done as u64))?;
        let status_bytes = transport
            .read_shape(FelStatusResponse::SIZE)
            .map_err(|e| with_bytes_done(e, done as u64))?;
        fel_status(&status_bytes).map_err(|e| with_bytes_done(e, done as u64))?;
        done += chunk.len;
        reporter.report("write", done as u64, total as u64);
        address = step_address(address, chunk.len, tags, mode);
    }
    reporter.finish();
    Ok(())
}

/// Executes code at `address`. Control returns before the device-side code
/// observably completes.
pub fn run(session: &Session, address: u32, mode: Mode) -> FelResult<()> {
    let transport = session.transport();
    let message = FelMessage {
        cmd: run_opcode(mode),
        address,
        len: 0,
        flags: 0,
    }
    .encode();
    transport.write_shape(&message)?;
    let status_bytes = transport.read_shape(FelStatusResponse::SIZE)?;
    fel_status(&status_bytes)?;
    Ok(())
}

/// FES-only: queries the verification status, e.g. after `write_mbr`.
pub fn verify_status(
    session: &Session,
    tags: crate::wire::Tags,
) -> FelResult<FesVerifyStatusResponse> {
    let transport = session.transport();
    let message = FelMessage {
        cmd: FesCommand::VerifyStatus as u16,
        address: 0,
        len: 0,
        flags: tags.bits(),
    }
    .encode();
    transport.write_shape(&message)?;
    let payload = transport.read_shape(FesVerifyStatusResponse::SIZE)?;
    let response = FesVerifyStatusResponse::decode(&payload)
        .map_err(|e| FelError::BadEnvelope(e.to_string()))?;
    let status_bytes = transport.read_shape(FelStatusResponse::SIZE)?;
    fel_status(&status_bytes)?;
    Ok(response)
}

/// FES-only: turns the NAND storage driver on or off.
pub fn set_storage_state(session: &Session, on: bool) -> FelResult<()> {
    let transport = session.transport();
    let cmd = if on {
        FesCommand::FlashSetOn
    } else {
        FesCommand::FlashSetOff
    };
    let request = StandardRequest { cmd: cmd as u16 }.encode();
    transport.write_shape(&request)?;
    let status_bytes = transport.read_shape(FelStatusResponse::SIZE)?;
    fel_status(&status_bytes)?;
    Ok(())
}

fn check_mbr_size(len: usize) -> FelResult<()> {
    if len != MBR_SIZE {
        return Err(FelError::BadArgument(format!(
            "MBR image must be exactly {MBR_SIZE} bytes, got {len}"
        )));
    }
    Ok(())
}

/// FES-only: programs the sunxi MBR. `mbr_bytes` must be exactly
/// [`MBR_SIZE`] (65536) bytes. Returns the CRC verification result.
pub fn write_mbr(
    session: &Session,
    mbr_bytes: &[u8],
    erase: bool,
    reporter: &mut dyn Reporter,
) -> FelResult<FesVerifyStatusResponse> {
    check_mbr_size(mbr_bytes.len())?;

    let erase_flag_payload: [u8; 4] = if erase { [0x01, 0, 0, 0] } else { [0, 0, 0, 0] };
    write(
        session,
        0,
        &erase_flag_payload,
        crate::wire::Tags::ERASE | crate::wire::Tags::FINISH,
        Mode::Fes,
        reporter,
    )?;

    write(
        session,
        0,
        mbr_bytes,
        crate::wire::Tags::MBR | crate::wire::Tags::FINISH,
        Mode::Fes,
        reporter,
    )?;

    let status = verify_status(session, crate::wire::Tags::MBR)?;
    if !status.ok() {
        return Err(FelError::VerifyFailed {
            crc: status.crc,
            last_error: status.last_error,
        });
    }
    Ok(status)
}

/// FES-only low-level transport: reads at most one `MAX_CHUNK` worth of
/// bytes from `media_index` at `address`. Longer reads are a `BadArgument`,
/// not a silent truncation.
///
/// TODO: whether a `transmite` upload longer than one chunk should instead
/// iterate with sector-stepping the way `write` does is left unresolved by
/// the protocol notes this driver was built from; until that is confirmed
/// against real firmware, callers must chunk manually.
fn check_transmite_read_length(length: usize) -> FelResult<()> {
    if length > MAX_CHUNK {
        return Err(FelError::BadArgument(format!(
            "transmite_read of {length} bytes exceeds MAX_CHUNK ({MAX_CHUNK})"
        )));
    }
    Ok(())
}

pub fn transmite_read(
    session: &Session,
    address: u32,
    length: usize,
    media_index: MediaIndex,
) -> FelResult<Vec<u8>> {
    check_transmite_read_length(length)?;
    let transport = session.transport();
    let request = FesTransportRequest {
        cmd: FesCommand::RwTransmite as u16,
        address,
        len: length as u32,
        media_index,
        direction: TransmiteDirection::Upload,
    }
    .encode();
    transport.write_shape(&request)?;
    let payload = transport.read_shape(length)?;
    let status_bytes = transport.read_shape(FelStatusResponse::SIZE)?;
    fel_status(&status_bytes)?;
    Ok(payload)
}

/// FES-only low-level transport: writes `bytes` to `media_index` at
/// `address`, chunking and sector-stepping like [`write`].
pub fn transmite_write(
    session: &Session,
    mut address: u32,
    bytes: &[u8],
    media_index: MediaIndex,
    reporter: &mut dyn Reporter,
) -> FelResult<()> {
    let transport = session.transport();
    let total = bytes.len();
    let mut done = 0usize;
    for chunk in Chunker::new(total) {
        let data = &bytes[chunk.offset..chunk.offset + chunk.len];
        let request = FesTransportRequest {
            cmd: FesCommand::RwTransmite as u16,
            address,
            len: chunk.len as u32,
            media_index,
            direction: TransmiteDirection::Download,
        }
        .encode();
        transport
            .write_shape(&request)
            .map_err(|e| with_bytes_done(e, done as u64))?;
        transport
            .write_shape(data)
            .map_err(|e| with_bytes_done(e, done as u64))?;
        let status_bytes = transport
            .read_shape(FelStatusResponse::SIZE)
            .map_err(|e| with_bytes_done(e, done as u64))?;
        fel_status(&status_bytes).map_err(|e| with_bytes_done(e, done as u64))?;
        done += chunk.len;
        reporter.report("transmite", done as u64, total as u64);
        address = address.wrapping_add(((chunk.len / 512) as u32).max(1));
    }
    reporter.finish();
    Ok(())
}

/// Debug-only: sends a raw `AWFELMessage` built from caller-supplied fields
/// and returns the status record as-is, without treating a non-zero `state`
/// as an error. Used by the `request` CLI subcommand to probe a command's
/// status directly instead of going through a command primitive above.
pub fn raw_request(
    session: &Session,
    cmd: u16,
    address: u32,
    len: u32,
    flags: u32,
) -> FelResult<FelStatusResponse> {
    let transport = session.transport();
    let message = FelMessage {
        cmd,
        address,
        len,
        flags,
    }
    .encode();
    transport.write_shape(&message)?;
    let status_bytes = transport.read_shape(FelStatusResponse::SIZE)?;
    FelStatusResponse::decode(&status_bytes).map_err(|e| FelError::BadEnvelope(e.to_string()))
}

fn with_bytes_done(err: FelError, bytes_done: u64) -> FelError {
    match err {
        FelError::TransportShort {
            expected, got, ..
        } => FelError::TransportShort {
            expected,
            got,
            bytes_done,
        },
        other => other,
    }
}
