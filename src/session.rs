//! Owns the USB device handle pair for the lifetime of a FEL/FES session.

use log::{debug, error};
use nusb::transfer::{Direction, EndpointType};

use crate::error::FelError;
use crate::transport::{NusbEndpoints, Transport};

/// USB vendor ID 0x1f3a: Allwinner Technology Co., Ltd.
pub const VENDOR_ALLWINNER: u16 = 0x1f3a;
/// Product 0xefe8: sunxi SoC OTG connector in FEL/FES mode.
pub const PRODUCT_FEL: u16 = 0xefe8;

/// Errors that can occur while acquiring a [`Session`].
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("failed to list USB devices: {0}")]
    ListDevices(#[source] std::io::Error),
    #[error("no Allwinner FEL device found (vendor 0x{VENDOR_ALLWINNER:04x} product 0x{PRODUCT_FEL:04x})")]
    NoDevice,
    #[error("no Allwinner FEL device at index {index} ({found} connected); pass --device N to select one of the devices found")]
    NoDeviceAtIndex { index: usize, found: usize },
    #[error("failed to open USB device: {0}")]
    OpenDevice(#[source] std::io::Error),
    #[error("failed to claim USB interface 0: {0}")]
    ClaimInterface(#[source] std::io::Error),
    #[error("device has no usable bulk IN/OUT endpoint pair on interface 0")]
    NoBulkEndpoints,
}

/// Finds the connected Allwinner FEL/FES device at `index` among all
/// matching devices (in enumeration order), failing if there is none or if
/// `index` is out of range.
///
/// `index` disambiguates when more than one matching device is attached;
/// pass `0` when only one is expected.
pub fn find_device(index: usize) -> Result<nusb::DeviceInfo, SessionError> {
    let devices: Vec<_> = nusb::list_devices()
        .map_err(SessionError::ListDevices)?
        .filter(|dev| dev.vendor_id() == VENDOR_ALLWINNER && dev.product_id() == PRODUCT_FEL)
        .inspect(|dev| debug!("Allwinner FEL/FES device: {:?}", dev))
        .collect();

    if devices.is_empty() {
        error!("cannot find any Allwinner FEL device connected");
        return Err(SessionError::NoDevice);
    }
    let found = devices.len();
    devices.into_iter().nth(index).ok_or_else(|| {
        error!("device index {index} out of range: {found} Allwinner FEL device(s) connected");
        SessionError::NoDeviceAtIndex { index, found }
    })
}

/// An open FEL/FES session: a claimed interface 0 with its bulk endpoint
/// pair resolved.
///
/// The claimed interface is released when the `Session` is dropped, on
/// every exit path including error unwinding, because interface release is
/// driven by `nusb::Interface`'s own `Drop` implementation.
pub struct Session {
    interface: nusb::Interface,
    endpoint_in: u8,
    endpoint_out: u8,
}

impl Session {
    /// Opens `device`, claims interface 0, and locates its first bulk-IN
    /// and bulk-OUT endpoints.
    pub fn open(device: &nusb::DeviceInfo) -> Result<Self, SessionError> {
        let handle = device.open().map_err(SessionError::OpenDevice)?;
        let interface = handle
            .claim_interface(0)
            .map_err(SessionError::ClaimInterface)?;

        let mut endpoint_in = None;
        let mut endpoint_out = None;
        for descriptor in interface.descriptors() {
            for endpoint in descriptor.endpoints() {
                if endpoint.transfer_type() != EndpointType::Bulk {
                    continue;
                }
                match endpoint.direction() {
                    Direction::In if endpoint_in.is_none() => {
                        endpoint_in = Some(endpoint.address())
                    }
                    Direction::Out if endpoint_out.is_none() => {
                        endpoint_out = Some(endpoint.address())
                    }
                    _ => {}
                }
            }
        }

        let (Some(endpoint_in), Some(endpoint_out)) = (endpoint_in, endpoint_out) else {
            return Err(SessionError::NoBulkEndpoints);
        };
        debug!("bulk IN 0x{endpoint_in:02x}, bulk OUT 0x{endpoint_out:02x}");

        Ok(Self {
            interface,
            endpoint_in,
            endpoint_out,
        })
    }

    /// Builds a [`Transport`] bound to this session's endpoint pair.
    pub fn transport(&self) -> Transport<NusbEndpoints<'_>> {
        Transport::new(NusbEndpoints::new(
            &self.interface,
            self.endpoint_in,
            self.endpoint_out,
        ))
    }
}

impl From<SessionError> for FelError {
    fn from(err: SessionError) -> Self {
        FelError::BadArgument(err.to_string())
    }
}

/// Convenience: open the first connected device and claim a session.
pub fn open_default() -> Result<Session, SessionError> {
    let device = find_device(0)?;
    Session::open(&device)
}
