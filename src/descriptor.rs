//! Descriptor model and USB 2.0 serialization
//!
//! Descriptors are static data supplied by the application. The device
//! core serializes them on demand, into the control buffer, when the host
//! issues GetDescriptor.

use crate::phy::TransferType;
use usb_device::{descriptor::descriptor_type, endpoint::EndpointAddress, UsbError};

/// String index of the manufacturer string
pub const MANUFACTURER_STRING: u8 = 1;
/// String index of the product string
pub const PRODUCT_STRING: u8 = 2;
/// String index of the serial number string
pub const SERIAL_NUMBER_STRING: u8 = 3;
/// String index of the first entry in [`Descriptors::strings`]
pub const FIRST_USER_STRING: u8 = 4;

/// US English
pub const LANG_ID_EN_US: u16 = 0x0409;

const DEVICE_LEN: usize = 18;
const CONFIGURATION_LEN: usize = 9;
const INTERFACE_LEN: usize = 9;
const ENDPOINT_LEN: usize = 7;

/// An endpoint in an interface's alternate setting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointDescriptor {
    /// `bEndpointAddress`; bit 7 set for IN endpoints
    pub address: u8,
    pub kind: TransferType,
    pub max_packet_size: u16,
    /// Polling interval, in frames. Ignored for bulk endpoints.
    pub interval: u8,
}

impl EndpointDescriptor {
    pub const fn new(address: u8, kind: TransferType, max_packet_size: u16, interval: u8) -> Self {
        Self {
            address,
            kind,
            max_packet_size,
            interval,
        }
    }

    pub fn endpoint_address(&self) -> EndpointAddress {
        EndpointAddress::from(self.address)
    }
}

/// One alternate setting of an interface
///
/// Declare one `Interface` for each (number, alternate setting) pair.
/// Alternate setting 0 is selected when the configuration is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interface<'a> {
    pub number: u8,
    pub alternate_setting: u8,
    pub class: u8,
    pub sub_class: u8,
    pub protocol: u8,
    /// String index, or 0
    pub string: u8,
    /// Class-specific descriptors, emitted right after the interface
    /// descriptor
    pub extra: &'a [u8],
    pub endpoints: &'a [EndpointDescriptor],
}

impl<'a> Interface<'a> {
    /// An interface with vendor-specific class codes, no strings, and no
    /// class-specific descriptors
    pub const fn vendor(
        number: u8,
        alternate_setting: u8,
        endpoints: &'a [EndpointDescriptor],
    ) -> Self {
        Self {
            number,
            alternate_setting,
            class: 0xFF,
            sub_class: 0,
            protocol: 0,
            string: 0,
            extra: &[],
            endpoints,
        }
    }
}

bitflags::bitflags! {
    /// Configuration `bmAttributes`
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ConfigAttributes: u8 {
        /// Reserved, always set when serialized
        const RESERVED = 0x80;
        const SELF_POWERED = 0x40;
        const REMOTE_WAKEUP = 0x20;
    }
}

/// A device configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Configuration<'a> {
    /// `bConfigurationValue`, never 0
    pub value: u8,
    pub attributes: ConfigAttributes,
    /// Maximum bus power, in milliamps
    pub max_power_ma: u16,
    /// String index, or 0
    pub string: u8,
    /// Every alternate setting of every interface
    pub interfaces: &'a [Interface<'a>],
}

impl<'a> Configuration<'a> {
    /// Find an interface's alternate setting
    pub fn interface(&self, number: u8, alternate_setting: u8) -> Option<&Interface<'a>> {
        self.interfaces
            .iter()
            .find(|iface| iface.number == number && iface.alternate_setting == alternate_setting)
    }

    /// Indicates if the configuration declares interface `number`
    pub fn has_interface(&self, number: u8) -> bool {
        self.interfaces.iter().any(|iface| iface.number == number)
    }

    /// Iterate the alternate setting 0 of each interface
    pub fn default_interfaces(&self) -> impl Iterator<Item = &Interface<'a>> {
        self.interfaces
            .iter()
            .filter(|iface| iface.alternate_setting == 0)
    }

    /// `bNumInterfaces`
    pub fn interface_count(&self) -> u8 {
        self.default_interfaces().count() as u8
    }

    /// `wTotalLength`
    pub fn total_length(&self) -> usize {
        CONFIGURATION_LEN
            + self
                .interfaces
                .iter()
                .map(|iface| INTERFACE_LEN + iface.extra.len() + ENDPOINT_LEN * iface.endpoints.len())
                .sum::<usize>()
    }
}

/// Fields of the device descriptor that the application chooses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub vendor_id: u16,
    pub product_id: u16,
    /// `bcdDevice`
    pub device_release: u16,
    pub class: u8,
    pub sub_class: u8,
    pub protocol: u8,
    /// Negotiated with the transceiver during construction
    pub max_packet_size_0: u8,
}

/// The complete, static descriptor set of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Descriptors<'a> {
    pub configurations: &'a [Configuration<'a>],
    pub lang_id: u16,
    pub manufacturer: Option<&'a str>,
    pub product: Option<&'a str>,
    pub serial_number: Option<&'a str>,
    /// Strings referenced by configurations and interfaces, starting at
    /// [`FIRST_USER_STRING`]
    pub strings: &'a [&'a str],
}

impl<'a> Descriptors<'a> {
    pub const fn new(configurations: &'a [Configuration<'a>]) -> Self {
        Self {
            configurations,
            lang_id: LANG_ID_EN_US,
            manufacturer: None,
            product: None,
            serial_number: None,
            strings: &[],
        }
    }

    /// Find a configuration by its `bConfigurationValue`
    pub fn configuration(&self, value: u8) -> Option<&Configuration<'a>> {
        self.configurations.iter().find(|config| config.value == value)
    }

    /// Look up a string by its index; index 0 is not a string
    pub fn string(&self, index: u8) -> Option<&'a str> {
        match index {
            0 => None,
            MANUFACTURER_STRING => self.manufacturer,
            PRODUCT_STRING => self.product,
            SERIAL_NUMBER_STRING => self.serial_number,
            _ => self
                .strings
                .get(usize::from(index - FIRST_USER_STRING))
                .copied(),
        }
    }

    /// Indicates if any configuration may signal remote wakeup
    pub fn supports_remote_wakeup(&self) -> bool {
        self.configurations
            .iter()
            .any(|config| config.attributes.contains(ConfigAttributes::REMOTE_WAKEUP))
    }

    fn string_index(text: Option<&str>, index: u8) -> u8 {
        text.map_or(0, |_| index)
    }
}

/// Writes descriptors into a buffer
struct Writer<'b> {
    buffer: &'b mut [u8],
    position: usize,
}

impl<'b> Writer<'b> {
    fn new(buffer: &'b mut [u8]) -> Self {
        Self {
            buffer,
            position: 0,
        }
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), UsbError> {
        let end = self.position + bytes.len();
        self.buffer
            .get_mut(self.position..end)
            .ok_or(UsbError::BufferOverflow)?
            .copy_from_slice(bytes);
        self.position = end;
        Ok(())
    }

    /// Write a descriptor, prefixed by its length and type
    fn descriptor(&mut self, kind: u8, body: &[u8]) -> Result<(), UsbError> {
        let length = u8::try_from(body.len() + 2).map_err(|_| UsbError::BufferOverflow)?;
        self.write(&[length, kind])?;
        self.write(body)
    }
}

/// Serialize the device descriptor, returning its length
pub fn device(
    descriptors: &Descriptors,
    device: &DeviceDescriptor,
    buffer: &mut [u8],
) -> Result<usize, UsbError> {
    let mut writer = Writer::new(buffer);
    let [vid_lo, vid_hi] = device.vendor_id.to_le_bytes();
    let [pid_lo, pid_hi] = device.product_id.to_le_bytes();
    let [rel_lo, rel_hi] = device.device_release.to_le_bytes();
    writer.descriptor(
        descriptor_type::DEVICE,
        &[
            0x00, // bcdUSB 2.00
            0x02,
            device.class,
            device.sub_class,
            device.protocol,
            device.max_packet_size_0,
            vid_lo,
            vid_hi,
            pid_lo,
            pid_hi,
            rel_lo,
            rel_hi,
            Descriptors::string_index(descriptors.manufacturer, MANUFACTURER_STRING),
            Descriptors::string_index(descriptors.product, PRODUCT_STRING),
            Descriptors::string_index(descriptors.serial_number, SERIAL_NUMBER_STRING),
            descriptors.configurations.len() as u8,
        ],
    )?;
    debug_assert_eq!(writer.position, DEVICE_LEN);
    Ok(writer.position)
}

/// Serialize a configuration and all of its interfaces and endpoints,
/// returning the total length
pub fn configuration(config: &Configuration, buffer: &mut [u8]) -> Result<usize, UsbError> {
    let mut writer = Writer::new(buffer);
    let total = u16::try_from(config.total_length()).map_err(|_| UsbError::BufferOverflow)?;
    let [total_lo, total_hi] = total.to_le_bytes();
    writer.descriptor(
        descriptor_type::CONFIGURATION,
        &[
            total_lo,
            total_hi,
            config.interface_count(),
            config.value,
            config.string,
            (config.attributes | ConfigAttributes::RESERVED).bits(),
            // bMaxPower is in 2 mA units
            (config.max_power_ma / 2).min(u8::MAX.into()) as u8,
        ],
    )?;

    for iface in config.interfaces {
        writer.descriptor(
            descriptor_type::INTERFACE,
            &[
                iface.number,
                iface.alternate_setting,
                iface.endpoints.len() as u8,
                iface.class,
                iface.sub_class,
                iface.protocol,
                iface.string,
            ],
        )?;
        writer.write(iface.extra)?;
        for ep in iface.endpoints {
            let [mps_lo, mps_hi] = ep.max_packet_size.to_le_bytes();
            writer.descriptor(
                descriptor_type::ENDPOINT,
                &[
                    ep.address,
                    ep.kind as u8,
                    mps_lo,
                    mps_hi,
                    ep.interval,
                ],
            )?;
        }
    }

    debug_assert_eq!(writer.position, config.total_length());
    Ok(writer.position)
}

/// Serialize string descriptor 0, the supported language IDs
pub fn languages(lang_id: u16, buffer: &mut [u8]) -> Result<usize, UsbError> {
    let mut writer = Writer::new(buffer);
    writer.descriptor(descriptor_type::STRING, &lang_id.to_le_bytes())?;
    Ok(writer.position)
}

/// Serialize a string descriptor as UTF-16LE
pub fn string(text: &str, buffer: &mut [u8]) -> Result<usize, UsbError> {
    let mut writer = Writer::new(buffer);
    let units = text.encode_utf16().count();
    let length = u8::try_from(2 + 2 * units).map_err(|_| UsbError::BufferOverflow)?;
    writer.write(&[length, descriptor_type::STRING])?;
    for unit in text.encode_utf16() {
        writer.write(&unit.to_le_bytes())?;
    }
    Ok(writer.position)
}
