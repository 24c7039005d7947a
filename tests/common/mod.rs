//! A USB host, and a loopback device, for integration tests

#![allow(dead_code)]

use usb_device::{
    control::{Request, RequestType},
    device::UsbVidPid,
    endpoint::EndpointAddress,
    UsbDirection,
};
use usbd_core::{
    emulated::{EmulatedPhy, HostResult},
    ClassHandler, ConfigAttributes, Configuration, ControlResponse, EndpointDescriptor,
    Interface, Io, TransferType, UsbDevice, UsbDeviceBuilder, FIRST_USER_STRING,
};

pub const VID_PID: UsbVidPid = UsbVidPid(0x5824, 0x27dd);

/// Vendor request that stores the data stage
pub const STORE: u8 = 0x01;
/// Vendor request that returns what was stored
pub const LOAD: u8 = 0x02;

pub const BULK: [EndpointDescriptor; 2] = [
    EndpointDescriptor::new(0x81, TransferType::Bulk, 64, 0),
    EndpointDescriptor::new(0x01, TransferType::Bulk, 64, 0),
];
pub const BULK_AND_INTERRUPT: [EndpointDescriptor; 3] = [
    BULK[0],
    BULK[1],
    EndpointDescriptor::new(0x82, TransferType::Interrupt, 8, 10),
];
pub const ISOCHRONOUS: [EndpointDescriptor; 1] =
    [EndpointDescriptor::new(0x03, TransferType::Isochronous, 64, 1)];
/// The emulated transceiver can't do isochronous transfers on endpoint 9
pub const UNSUPPORTED: [EndpointDescriptor; 1] =
    [EndpointDescriptor::new(0x89, TransferType::Isochronous, 64, 1)];
pub const INTERRUPT: [EndpointDescriptor; 1] =
    [EndpointDescriptor::new(0x84, TransferType::Interrupt, 16, 1)];

pub static INTERFACES: [Interface; 5] = [
    Interface::vendor(0, 0, &BULK),
    Interface::vendor(0, 1, &BULK_AND_INTERRUPT),
    Interface::vendor(1, 0, &[]),
    Interface::vendor(1, 1, &ISOCHRONOUS),
    Interface::vendor(1, 2, &UNSUPPORTED),
];
static INTERRUPT_INTERFACES: [Interface; 1] = [Interface::vendor(0, 0, &INTERRUPT)];
static UNSUPPORTED_INTERFACES: [Interface; 1] = [Interface::vendor(0, 0, &UNSUPPORTED)];

pub static CONFIGURATIONS: [Configuration; 3] = [
    Configuration {
        value: 1,
        attributes: ConfigAttributes::RESERVED.union(ConfigAttributes::REMOTE_WAKEUP),
        max_power_ma: 100,
        string: FIRST_USER_STRING,
        interfaces: &INTERFACES,
    },
    Configuration {
        value: 2,
        attributes: ConfigAttributes::RESERVED.union(ConfigAttributes::SELF_POWERED),
        max_power_ma: 0,
        string: 0,
        interfaces: &INTERRUPT_INTERFACES,
    },
    Configuration {
        value: 3,
        attributes: ConfigAttributes::RESERVED,
        max_power_ma: 100,
        string: 0,
        interfaces: &UNSUPPORTED_INTERFACES,
    },
];

pub static STRINGS: [&str; 1] = ["Loopback"];

pub fn ep1_in() -> EndpointAddress {
    EndpointAddress::from(0x81)
}

pub fn ep1_out() -> EndpointAddress {
    EndpointAddress::from(0x01)
}

/// Stores vendor control data, and echoes bulk packets
pub struct Loopback {
    pub stored: [u8; 256],
    pub len: usize,
    pub control_requests: usize,
    pub configured: Vec<u8>,
    pub interfaces: Vec<(u8, u8)>,
    pub resets: usize,
    pub frames: Vec<u16>,
}

impl Loopback {
    pub fn new() -> Self {
        Self {
            stored: [0; 256],
            len: 0,
            control_requests: 0,
            configured: Vec::new(),
            interfaces: Vec::new(),
            resets: 0,
            frames: Vec::new(),
        }
    }
}

impl ClassHandler<EmulatedPhy> for Loopback {
    fn control_request(&mut self, req: &Request, buffer: &mut [u8]) -> ControlResponse {
        if req.request_type != RequestType::Vendor {
            return ControlResponse::Stall;
        }
        self.control_requests += 1;
        match (req.direction, req.request) {
            (UsbDirection::Out, STORE) => ControlResponse::Ack,
            (UsbDirection::In, LOAD) => {
                buffer[..self.len].copy_from_slice(&self.stored[..self.len]);
                ControlResponse::Data(self.len)
            }
            _ => ControlResponse::Stall,
        }
    }

    fn control_out(&mut self, req: &Request, data: &[u8]) -> bool {
        if req.request != STORE {
            return false;
        }
        self.stored[..data.len()].copy_from_slice(data);
        self.len = data.len();
        true
    }

    fn configured(&mut self, io: &mut Io<'_, EmulatedPhy>, configuration: u8) {
        self.configured.push(configuration);
        if configuration == 1 {
            io.read_start(ep1_out()).unwrap();
        }
    }

    fn interface_changed(
        &mut self,
        _: &mut Io<'_, EmulatedPhy>,
        interface: u8,
        alternate_setting: u8,
    ) {
        self.interfaces.push((interface, alternate_setting));
    }

    fn endpoint_out(&mut self, io: &mut Io<'_, EmulatedPhy>, ep: EndpointAddress) {
        let mut buffer = [0; 64];
        let len = io.read_result(ep, &mut buffer).unwrap();
        io.write(ep1_in(), &buffer[..len]).unwrap();
    }

    fn endpoint_in(&mut self, io: &mut Io<'_, EmulatedPhy>, _: EndpointAddress) {
        io.read_start(ep1_out()).unwrap();
    }

    fn reset(&mut self) {
        self.resets += 1;
    }

    fn sof(&mut self, frame_number: u16) {
        self.frames.push(frame_number);
    }
}

pub type Device = UsbDevice<'static, EmulatedPhy, Loopback>;

pub fn builder(phy: EmulatedPhy) -> UsbDeviceBuilder<'static, EmulatedPhy, Loopback> {
    UsbDeviceBuilder::new(phy, Loopback::new(), VID_PID, &CONFIGURATIONS)
        .manufacturer("imaginary")
        .product("loopback")
        .serial_number("0001")
        .strings(&STRINGS)
        .max_packet_size_0(64)
}

/// A powered, connected device that the host hasn't reset
pub fn attached(mut device: Device) -> Device {
    device.phy_mut().host_power(true);
    device.connect();
    device.process();
    device
}

pub fn device() -> Device {
    attached(builder(EmulatedPhy::new()).build().unwrap())
}

/// A device that the host reset, and addressed
pub fn addressed() -> Device {
    let mut device = device();
    reset(&mut device);
    control_out(&mut device, set_address(5), &[]).unwrap();
    device
}

/// The host rejected the request
#[derive(Debug, PartialEq, Eq)]
pub struct Stalled;

const RETRIES: usize = 8;

/// Run one transaction, processing device events between attempts
fn transact<F>(device: &mut Device, mut transaction: F) -> HostResult
where
    F: FnMut(&mut EmulatedPhy) -> HostResult,
{
    for _ in 0..RETRIES {
        let result = transaction(device.phy_mut());
        device.process();
        if result != HostResult::Nak {
            return result;
        }
    }
    HostResult::Nak
}

fn length(setup: &[u8; 8]) -> usize {
    usize::from(u16::from_le_bytes([setup[6], setup[7]]))
}

pub fn reset(device: &mut Device) {
    device.phy_mut().host_reset();
    device.process();
}

/// A device-to-host control transfer
pub fn control_in(device: &mut Device, setup: [u8; 8], data: &mut [u8]) -> Result<usize, Stalled> {
    device.phy_mut().host_setup(setup);
    device.process();

    if length(&setup) == 0 {
        return match transact(device, |phy| phy.host_in_ep0(&mut [])) {
            HostResult::Data(0) => Ok(0),
            HostResult::Stall => Err(Stalled),
            other => panic!("status stage {other:?}"),
        };
    }

    let max_packet = usize::from(device.max_packet_size_0());
    let mut total = 0;
    loop {
        let mut packet = [0; 64];
        match transact(device, |phy| phy.host_in_ep0(&mut packet[..max_packet])) {
            HostResult::Data(len) => {
                data[total..total + len].copy_from_slice(&packet[..len]);
                total += len;
                assert!(total <= length(&setup), "device sent more than wLength");
                if len < max_packet || total == length(&setup) {
                    break;
                }
            }
            HostResult::Stall => return Err(Stalled),
            other => panic!("data stage {other:?}"),
        }
    }

    match transact(device, |phy| phy.host_out_ep0(&[])) {
        HostResult::Ack => Ok(total),
        HostResult::Stall => Err(Stalled),
        other => panic!("status stage {other:?}"),
    }
}

/// A host-to-device control transfer
pub fn control_out(device: &mut Device, setup: [u8; 8], data: &[u8]) -> Result<(), Stalled> {
    device.phy_mut().host_setup(setup);
    device.process();

    let max_packet = usize::from(device.max_packet_size_0());
    for chunk in data.chunks(max_packet) {
        match transact(device, |phy| phy.host_out_ep0(chunk)) {
            HostResult::Ack => {}
            HostResult::Stall => return Err(Stalled),
            other => panic!("data stage {other:?}"),
        }
    }

    match transact(device, |phy| phy.host_in_ep0(&mut [])) {
        HostResult::Data(0) => Ok(()),
        HostResult::Stall => Err(Stalled),
        other => panic!("status stage {other:?}"),
    }
}

/// Reset, address, and configure the device
pub fn enumerate(device: &mut Device, address: u8) {
    reset(device);
    let mut buffer = [0; 256];
    let len = control_in(device, get_descriptor(1, 0, 64), &mut buffer).unwrap();
    assert_eq!(len, 18);
    control_out(device, set_address(address), &[]).unwrap();
    let len = control_in(device, get_descriptor(2, 0, 255), &mut buffer).unwrap();
    assert_eq!(usize::from(u16::from_le_bytes([buffer[2], buffer[3]])), len);
    control_out(device, set_configuration(1), &[]).unwrap();
}

//
// Requests
//

pub fn setup(request_type: u8, request: u8, value: u16, index: u16, length: u16) -> [u8; 8] {
    let [value_lo, value_hi] = value.to_le_bytes();
    let [index_lo, index_hi] = index.to_le_bytes();
    let [length_lo, length_hi] = length.to_le_bytes();
    [
        request_type,
        request,
        value_lo,
        value_hi,
        index_lo,
        index_hi,
        length_lo,
        length_hi,
    ]
}

pub fn get_status(recipient: u8, index: u16) -> [u8; 8] {
    setup(0x80 | recipient, 0, 0, index, 2)
}

pub fn clear_feature(recipient: u8, feature: u16, index: u16) -> [u8; 8] {
    setup(recipient, 1, feature, index, 0)
}

pub fn set_feature(recipient: u8, feature: u16, index: u16) -> [u8; 8] {
    setup(recipient, 3, feature, index, 0)
}

pub fn set_address(address: u8) -> [u8; 8] {
    setup(0x00, 5, address.into(), 0, 0)
}

pub fn get_descriptor(kind: u8, index: u8, length: u16) -> [u8; 8] {
    setup(0x80, 6, u16::from_le_bytes([index, kind]), 0, length)
}

pub fn get_configuration() -> [u8; 8] {
    setup(0x80, 8, 0, 0, 1)
}

pub fn set_configuration(value: u8) -> [u8; 8] {
    setup(0x00, 9, value.into(), 0, 0)
}

pub fn get_interface(interface: u16) -> [u8; 8] {
    setup(0x81, 10, 0, interface, 1)
}

pub fn set_interface(interface: u16, alternate_setting: u16) -> [u8; 8] {
    setup(0x01, 11, alternate_setting, interface, 0)
}

pub fn store(length: u16) -> [u8; 8] {
    setup(0x40, STORE, 0, 0, length)
}

pub fn load(length: u16) -> [u8; 8] {
    setup(0xC0, LOAD, 0, 0, length)
}

pub const DEVICE: u8 = 0;
pub const INTERFACE: u8 = 1;
pub const ENDPOINT: u8 = 2;
