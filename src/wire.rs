//! Fixed-size little-endian wire records for the FEL/FES bulk protocol.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor, Read, Write};

/// Maximum chunk size for a single FEL/FES read or write operation.
pub const MAX_CHUNK: usize = 65_536;

/// Size in bytes a sunxi MBR image must have.
pub const MBR_SIZE: usize = 65_536;

/// Which opcode family a command belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// ROM-resident FEL mode.
    Fel,
    /// Post-DRAM FES mode.
    Fes,
}

/// FEL opcode family (ROM mode).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum FelCommand {
    VerifyDevice = 0x0001,
    Download = 0x0101,
    Run = 0x0102,
    Upload = 0x0103,
}

/// FES opcode family (post-DRAM mode).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum FesCommand {
    Download = 0x0101,
    Run = 0x0102,
    Upload = 0x0103,
    RwTransmite = 0x0201,
    VerifyStatus = 0x0202,
    VerifyValue = 0x0203,
    FlashSetOn = 0x0204,
    FlashSetOff = 0x0205,
    QueryStorage = 0x0206,
    SetToolMode = 0x0207,
}

bitflags::bitflags! {
    /// Tag bits carried in the `flags` field of [`FelMessage`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Tags: u32 {
        const NONE = 0;
        const DRAM = 0x01;
        const MBR = 0x02;
        const ERASE = 0x04;
        const FINISH = 0x08;
        const UBOOT = 0x10;
        const BOOT0 = 0x20;
    }
}

/// Media selector used by [`FesTransportRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MediaIndex {
    Dram = 0,
    PhysicalLog = 1,
    Physical = 2,
}

impl Default for MediaIndex {
    fn default() -> Self {
        MediaIndex::Dram
    }
}

/// Transfer direction used by [`FesTransportRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TransmiteDirection {
    Download = 0,
    Upload = 1,
}

/// The inner USB bulk-only command byte, not to be confused with a FEL opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum UsbDirection {
    Write = 0x12,
    Read = 0x11,
}

/// 32-byte bulk-only request header that precedes every FEL/FES transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsbRequest {
    pub direction: UsbDirection,
    pub len: u32,
}

impl UsbRequest {
    pub const SIZE: usize = 32;

    pub fn encode(self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        let mut cur = Cursor::new(&mut buf[..]);
        cur.write_all(b"AWUC").unwrap();
        cur.write_u32::<LittleEndian>(0).unwrap(); // tag
        cur.write_u32::<LittleEndian>(self.len).unwrap();
        cur.write_u16::<LittleEndian>(0).unwrap(); // resv1
        cur.write_u8(0).unwrap(); // resv2
        cur.write_u8(0x0c).unwrap(); // cmd_len, fixed
        cur.write_u8(self.direction as u8).unwrap();
        cur.write_u8(0).unwrap(); // resv3
        cur.write_u32::<LittleEndian>(self.len).unwrap(); // len2
        buf
    }
}

/// 13-byte bulk-only status envelope (CSW) that closes every transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsbResponse {
    pub residue: u32,
    pub csw_status: u8,
}

impl UsbResponse {
    pub const SIZE: usize = 13;

    pub fn decode(bytes: &[u8]) -> io::Result<Self> {
        if bytes.len() != Self::SIZE {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "short AWUS envelope"));
        }
        let mut cur = Cursor::new(bytes);
        let mut magic = [0u8; 4];
        cur.read_exact(&mut magic)?;
        if &magic != b"AWUS" {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "bad AWUS magic"));
        }
        let _tag = cur.read_u32::<LittleEndian>()?;
        let residue = cur.read_u32::<LittleEndian>()?;
        let csw_status = cur.read_u8()?;
        Ok(UsbResponse {
            residue,
            csw_status,
        })
    }
}

/// 16-byte standard FEL/FES request carrying only an opcode, used by commands
/// with no address/length/flags payload of their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StandardRequest {
    pub cmd: u16,
}

impl StandardRequest {
    pub const SIZE: usize = 16;

    pub fn encode(self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        let mut cur = Cursor::new(&mut buf[..]);
        cur.write_u16::<LittleEndian>(self.cmd).unwrap();
        cur.write_u16::<LittleEndian>(0).unwrap(); // tag
        buf
    }
}

/// 16-byte polymorphic inner envelope shared by most FEL/FES commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FelMessage {
    pub cmd: u16,
    pub address: u32,
    pub len: u32,
    pub flags: u32,
}

impl FelMessage {
    pub const SIZE: usize = 16;

    pub fn encode(self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        let mut cur = Cursor::new(&mut buf[..]);
        cur.write_u16::<LittleEndian>(self.cmd).unwrap();
        cur.write_u16::<LittleEndian>(0).unwrap(); // tag
        cur.write_u32::<LittleEndian>(self.address).unwrap();
        cur.write_u32::<LittleEndian>(self.len).unwrap();
        cur.write_u32::<LittleEndian>(self.flags).unwrap();
        buf
    }
}

/// 16-byte low-level transport request used by `RW_TRANSMITE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FesTransportRequest {
    pub cmd: u16,
    pub address: u32,
    pub len: u32,
    pub media_index: MediaIndex,
    pub direction: TransmiteDirection,
}

impl FesTransportRequest {
    pub const SIZE: usize = 16;

    pub fn encode(self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        let mut cur = Cursor::new(&mut buf[..]);
        cur.write_u16::<LittleEndian>(self.cmd).unwrap();
        cur.write_u16::<LittleEndian>(0).unwrap(); // tag
        cur.write_u32::<LittleEndian>(self.address).unwrap();
        cur.write_u32::<LittleEndian>(self.len).unwrap();
        cur.write_u8(self.media_index as u8).unwrap();
        cur.write_u8(self.direction as u8).unwrap();
        cur.write_u16::<LittleEndian>(0).unwrap(); // resv
        buf
    }
}

/// 8-byte status record that terminates every logical FEL/FES command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FelStatusResponse {
    pub state: u8,
}

impl FelStatusResponse {
    pub const SIZE: usize = 8;

    pub fn decode(bytes: &[u8]) -> io::Result<Self> {
        if bytes.len() != Self::SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "short FEL status response",
            ));
        }
        let mut cur = Cursor::new(bytes);
        let _mark = cur.read_u16::<LittleEndian>()?;
        let _tag = cur.read_u16::<LittleEndian>()?;
        let state = cur.read_u8()?;
        Ok(FelStatusResponse { state })
    }
}

/// 32-byte `VERIFY_DEVICE` reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifyDeviceResponse {
    pub board: u32,
    pub firmware: u32,
    pub mode: u16,
    pub data_flag: u8,
    pub data_length: u8,
    pub data_start_address: u32,
}

impl VerifyDeviceResponse {
    pub const SIZE: usize = 32;

    pub fn decode(bytes: &[u8]) -> io::Result<Self> {
        if bytes.len() != Self::SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "short AWUSBFEX response",
            ));
        }
        let mut cur = Cursor::new(bytes);
        let mut magic = [0u8; 8];
        cur.read_exact(&mut magic)?;
        if &magic != b"AWUSBFEX" {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "bad AWUSBFEX magic",
            ));
        }
        let board = cur.read_u32::<LittleEndian>()?;
        let firmware = cur.read_u32::<LittleEndian>()?;
        let mode = cur.read_u16::<LittleEndian>()?;
        let data_flag = cur.read_u8()?;
        let data_length = cur.read_u8()?;
        let data_start_address = cur.read_u32::<LittleEndian>()?;
        Ok(VerifyDeviceResponse {
            board,
            firmware,
            mode,
            data_flag,
            data_length,
            data_start_address,
        })
    }

    /// The device's reported boot mode, if recognized.
    pub fn device_mode(&self) -> Option<Mode> {
        match self.mode {
            0 => Some(Mode::Fel),
            1 => Some(Mode::Fes),
            _ => None,
        }
    }
}

/// 12-byte `FES_VERIFY_STATUS` reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FesVerifyStatusResponse {
    pub flags: u32,
    pub crc: u32,
    pub last_error: i32,
}

impl FesVerifyStatusResponse {
    pub const SIZE: usize = 12;
    pub const EXPECTED_FLAGS: u32 = 0x6a61_7603;

    pub fn decode(bytes: &[u8]) -> io::Result<Self> {
        if bytes.len() != Self::SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "short FES verify-status response",
            ));
        }
        let mut cur = Cursor::new(bytes);
        let flags = cur.read_u32::<LittleEndian>()?;
        let crc = cur.read_u32::<LittleEndian>()?;
        let last_error = cur.read_i32::<LittleEndian>()?;
        Ok(FesVerifyStatusResponse {
            flags,
            crc,
            last_error,
        })
    }

    pub fn ok(&self) -> bool {
        self.crc == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usb_request_write_shape() {
        let buf = UsbRequest {
            direction: UsbDirection::Write,
            len: 0x5678,
        }
        .encode();
        assert_eq!(&buf[0..4], b"AWUC");
        assert_eq!(u32::from_le_bytes(buf[8..12].try_into().unwrap()), 0x5678);
        assert_eq!(buf[15], 0x0c);
        assert_eq!(buf[16], UsbDirection::Write as u8);
        assert_eq!(u32::from_le_bytes(buf[18..22].try_into().unwrap()), 0x5678);
    }

    #[test]
    fn usb_request_read_shape() {
        let buf = UsbRequest {
            direction: UsbDirection::Read,
            len: 100,
        }
        .encode();
        assert_eq!(&buf[0..4], b"AWUC");
        assert_eq!(buf[16], UsbDirection::Read as u8);
        assert_eq!(u32::from_le_bytes(buf[8..12].try_into().unwrap()), 100);
        assert_eq!(u32::from_le_bytes(buf[18..22].try_into().unwrap()), 100);
    }

    #[test]
    fn usb_response_decode_rejects_bad_magic() {
        let mut bytes = [0u8; UsbResponse::SIZE];
        bytes[0..4].copy_from_slice(b"XXXX");
        assert!(UsbResponse::decode(&bytes).is_err());
    }

    #[test]
    fn usb_response_decode_round_trip() {
        let mut bytes = [0u8; UsbResponse::SIZE];
        bytes[0..4].copy_from_slice(b"AWUS");
        bytes[8..12].copy_from_slice(&100u32.to_le_bytes());
        bytes[12] = 0;
        let resp = UsbResponse::decode(&bytes).unwrap();
        assert_eq!(resp.residue, 100);
        assert_eq!(resp.csw_status, 0);
    }

    #[test]
    fn fel_message_encode() {
        let buf = FelMessage {
            cmd: FelCommand::Upload as u16,
            address: 0x40100000,
            len: 100,
            flags: Tags::NONE.bits(),
        }
        .encode();
        assert_eq!(u16::from_le_bytes(buf[0..2].try_into().unwrap()), 0x0103);
        assert_eq!(u32::from_le_bytes(buf[4..8].try_into().unwrap()), 0x40100000);
        assert_eq!(u32::from_le_bytes(buf[8..12].try_into().unwrap()), 100);
        assert_eq!(u32::from_le_bytes(buf[12..16].try_into().unwrap()), 0);
    }

    #[test]
    fn fel_status_response_decode() {
        let mut bytes = [0u8; FelStatusResponse::SIZE];
        bytes[4] = 1;
        let resp = FelStatusResponse::decode(&bytes).unwrap();
        assert_eq!(resp.state, 1);
    }

    #[test]
    fn verify_device_response_decode() {
        let mut bytes = [0u8; VerifyDeviceResponse::SIZE];
        bytes[0..8].copy_from_slice(b"AWUSBFEX");
        bytes[8..12].copy_from_slice(&0x0016_2300u32.to_le_bytes());
        bytes[12..16].copy_from_slice(&1u32.to_le_bytes());
        bytes[16..18].copy_from_slice(&0u16.to_le_bytes());
        bytes[20..24].copy_from_slice(&0x7E00u32.to_le_bytes());
        let resp = VerifyDeviceResponse::decode(&bytes).unwrap();
        assert_eq!(resp.board, 0x0016_2300);
        assert_eq!(resp.firmware, 1);
        assert_eq!(resp.data_start_address, 0x7E00);
        assert_eq!(resp.device_mode(), Some(Mode::Fel));
    }

    #[test]
    fn fes_verify_status_response_decode() {
        let mut bytes = [0u8; FesVerifyStatusResponse::SIZE];
        bytes[0..4].copy_from_slice(&FesVerifyStatusResponse::EXPECTED_FLAGS.to_le_bytes());
        bytes[8..12].copy_from_slice(&(-1i32).to_le_bytes());
        let resp = FesVerifyStatusResponse::decode(&bytes).unwrap();
        assert_eq!(resp.flags, FesVerifyStatusResponse::EXPECTED_FLAGS);
        assert_eq!(resp.crc, 0);
        assert_eq!(resp.last_error, -1);
        assert!(resp.ok());
    }

    #[test]
    fn tags_compose_by_or() {
        let t = Tags::ERASE | Tags::FINISH;
        assert!(t.contains(Tags::ERASE));
        assert!(t.contains(Tags::FINISH));
        assert!(!t.contains(Tags::MBR));
    }
}
