//! End-to-end protocol scenarios driven against the in-process fake device,
//! exercising the wire layer the way a real FEL/FES session would.

use awfel::transport::test_support::FakeDevice;
use awfel::transport::Transport;
use awfel::wire::{
    FelCommand, FelMessage, FelStatusResponse, FesCommand, FesVerifyStatusResponse,
    StandardRequest, Tags, VerifyDeviceResponse,
};

fn verify_device_reply(mode: u16) -> Vec<u8> {
    let mut bytes = vec![0u8; VerifyDeviceResponse::SIZE];
    bytes[0..8].copy_from_slice(b"AWUSBFEX");
    bytes[8..12].copy_from_slice(&0x0016_2300u32.to_le_bytes());
    bytes[12..16].copy_from_slice(&1u32.to_le_bytes());
    bytes[16..18].copy_from_slice(&mode.to_le_bytes());
    bytes[20..24].copy_from_slice(&0x7E00u32.to_le_bytes());
    bytes
}

#[test]
fn scenario_1_verify_device() {
    let dev = FakeDevice::new();
    dev.push_envelope(0); // write_shape(request)
    dev.push_reply(verify_device_reply(0));
    dev.push_envelope(0); // read_shape(VerifyDeviceResponse)
    dev.push_status(0);
    dev.push_envelope(0); // read_shape(FelStatusResponse)

    let transport = Transport::new(&dev);
    let request = StandardRequest {
        cmd: FelCommand::VerifyDevice as u16,
    }
    .encode();
    transport.write_shape(&request).unwrap();
    let payload = transport.read_shape(VerifyDeviceResponse::SIZE).unwrap();
    let info = VerifyDeviceResponse::decode(&payload).unwrap();
    let status = transport.read_shape(FelStatusResponse::SIZE).unwrap();
    let status = FelStatusResponse::decode(&status).unwrap();

    assert_eq!(info.board, 0x0016_2300);
    assert_eq!(info.data_start_address, 0x7E00);
    assert_eq!(info.device_mode(), Some(awfel::Mode::Fel));
    assert_eq!(status.state, 0);
}

#[test]
fn scenario_2_read_100_bytes_fel_dram() {
    let dev = FakeDevice::new();
    dev.push_envelope(0);
    dev.push_reply(vec![0x5a; 100]);
    dev.push_envelope(0);
    dev.push_status(0);
    dev.push_envelope(0);

    let transport = Transport::new(&dev);
    let message = FelMessage {
        cmd: FelCommand::Upload as u16,
        address: 0x4010_0000,
        len: 100,
        flags: Tags::DRAM.bits(),
    }
    .encode();
    transport.write_shape(&message).unwrap();
    let payload = transport.read_shape(100).unwrap();
    let status = transport.read_shape(FelStatusResponse::SIZE).unwrap();
    let status = FelStatusResponse::decode(&status).unwrap();

    assert_eq!(payload, vec![0x5a; 100]);
    assert_eq!(status.state, 0);

    let next = awfel::step_address(0x4010_0000, 100, Tags::DRAM, awfel::Mode::Fel);
    assert_eq!(next, 0x4010_0000 + 100);
}

#[test]
fn scenario_3_write_70000_bytes_fes_nand_address_math() {
    use awfel::wire::MAX_CHUNK;
    use awfel::Chunker;

    let mut address = 0x8000u32;
    let chunks: Vec<_> = Chunker::new(70_000).collect();
    assert_eq!(chunks.len(), 2);

    let dev = FakeDevice::new();
    for _ in &chunks {
        dev.push_envelope(0); // message write_shape
        dev.push_envelope(0); // payload write_shape
        dev.push_status(0); // status read_shape payload
        dev.push_envelope(0); // status read_shape envelope
    }
    let transport = Transport::new(&dev);

    for chunk in &chunks {
        let message = FelMessage {
            cmd: FesCommand::Download as u16,
            address,
            len: chunk.len as u32,
            flags: Tags::NONE.bits(),
        }
        .encode();
        transport.write_shape(&message).unwrap();
        transport.write_shape(&vec![0u8; chunk.len]).unwrap();
        let status = transport.read_shape(FelStatusResponse::SIZE).unwrap();
        assert_eq!(FelStatusResponse::decode(&status).unwrap().state, 0);
        address = awfel::step_address(address, chunk.len, Tags::NONE, awfel::Mode::Fes);
    }

    assert_eq!(chunks[0].len, MAX_CHUNK);
    assert_eq!(address, 0x8088);
}

#[test]
fn scenario_4_mbr_program_sequence() {
    const MBR_SIZE: usize = awfel::MBR_SIZE;

    let dev = FakeDevice::new();
    // erase-flag write: message write_shape, payload write_shape, status read_shape
    dev.push_envelope(0);
    dev.push_envelope(0);
    dev.push_status(0);
    dev.push_envelope(0);
    // mbr write: message write_shape, payload write_shape, status read_shape
    dev.push_envelope(0);
    dev.push_envelope(0);
    dev.push_status(0);
    dev.push_envelope(0);
    // verify_status: message write_shape, verify-status read_shape, status read_shape
    dev.push_envelope(0);
    let mut ok_status = vec![0u8; FesVerifyStatusResponse::SIZE];
    ok_status[0..4].copy_from_slice(&FesVerifyStatusResponse::EXPECTED_FLAGS.to_le_bytes());
    dev.push_reply(ok_status);
    dev.push_envelope(0);
    dev.push_status(0);
    dev.push_envelope(0);

    let transport = Transport::new(&dev);

    let erase_message = FelMessage {
        cmd: FesCommand::Download as u16,
        address: 0,
        len: 4,
        flags: (Tags::ERASE | Tags::FINISH).bits(),
    }
    .encode();
    transport.write_shape(&erase_message).unwrap();
    transport.write_shape(&[0x01, 0, 0, 0]).unwrap();
    let status = transport.read_shape(FelStatusResponse::SIZE).unwrap();
    assert_eq!(FelStatusResponse::decode(&status).unwrap().state, 0);

    let mbr_message = FelMessage {
        cmd: FesCommand::Download as u16,
        address: 0,
        len: MBR_SIZE as u32,
        flags: (Tags::MBR | Tags::FINISH).bits(),
    }
    .encode();
    transport.write_shape(&mbr_message).unwrap();
    transport.write_shape(&vec![0u8; MBR_SIZE]).unwrap();
    let status = transport.read_shape(FelStatusResponse::SIZE).unwrap();
    assert_eq!(FelStatusResponse::decode(&status).unwrap().state, 0);

    let verify_message = FelMessage {
        cmd: FesCommand::VerifyStatus as u16,
        address: 0,
        len: 0,
        flags: Tags::MBR.bits(),
    }
    .encode();
    transport.write_shape(&verify_message).unwrap();
    let payload = transport
        .read_shape(FesVerifyStatusResponse::SIZE)
        .unwrap();
    let verify = FesVerifyStatusResponse::decode(&payload).unwrap();
    let status = transport.read_shape(FelStatusResponse::SIZE).unwrap();
    assert_eq!(FelStatusResponse::decode(&status).unwrap().state, 0);

    assert!(verify.ok());
}

#[test]
fn scenario_5_resynchronization_discards_stray_packets() {
    let dev = FakeDevice::new();
    dev.push_envelope(0);
    // Device jumps ahead and emits a stray status record before the real
    // payload; the resync rule must discard it and keep waiting.
    dev.push_status(0);
    dev.push_reply(vec![0x77; 512]);
    dev.push_envelope(0);
    dev.push_status(0);
    dev.push_envelope(0);

    let transport = Transport::new(&dev);
    let message = FelMessage {
        cmd: FelCommand::Upload as u16,
        address: 0x4010_0000,
        len: 512,
        flags: Tags::DRAM.bits(),
    }
    .encode();
    transport.write_shape(&message).unwrap();
    let payload = transport.read_shape(512).unwrap();
    let status = transport.read_shape(FelStatusResponse::SIZE).unwrap();

    assert_eq!(payload, vec![0x77; 512]);
    assert_eq!(FelStatusResponse::decode(&status).unwrap().state, 0);
}

#[test]
fn scenario_6_command_failure_after_run() {
    let dev = FakeDevice::new();
    dev.push_envelope(0);
    dev.push_status(1);
    dev.push_envelope(0);

    let transport = Transport::new(&dev);
    let message = FelMessage {
        cmd: FelCommand::Run as u16,
        address: 0x4010_0000,
        len: 0,
        flags: 0,
    }
    .encode();
    transport.write_shape(&message).unwrap();
    let status_bytes = transport.read_shape(FelStatusResponse::SIZE).unwrap();
    let status = FelStatusResponse::decode(&status_bytes).unwrap();

    assert_eq!(status.state, 1);
}
