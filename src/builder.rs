//! Device construction

use crate::{
    class::ClassHandler,
    descriptor::{Configuration, DeviceDescriptor, Descriptors, FIRST_USER_STRING},
    device::{DeviceCore, UsbDevice},
    phy::Phy,
    CONTROL_BUFFER_SIZE, MAX_ENDPOINTS, MAX_INTERFACES,
};
use usb_device::device::UsbVidPid;

/// Describes why a device couldn't be built
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-03", derive(defmt_03::Format))]
pub enum BuilderError {
    /// There are no configurations
    NoConfigurations,
    /// A configuration value is 0
    InvalidConfigurationValue(u8),
    /// Two configurations have the same value
    DuplicateConfiguration(u8),
    /// An interface number is too large
    InvalidInterface(u8),
    /// An interface doesn't declare alternate setting 0
    MissingDefaultAlternateSetting(u8),
    /// An alternate setting declares endpoint 0, or an endpoint number that's
    /// out of range
    InvalidEndpoint(u8),
    /// An alternate setting declares the same endpoint twice
    DuplicateEndpoint(u8),
    /// The configuration descriptor doesn't fit the control buffer
    ConfigurationTooLong(u8),
    /// The default configuration isn't declared
    UnknownDefaultConfiguration(u8),
    /// There are more strings than string indices
    TooManyStrings,
    /// Endpoint 0 packet size is not 8, 16, 32, or 64
    InvalidPacketSize0(u8),
    /// Requested bus power is above 500mA
    InvalidMaxPower(u16),
}

/// Builds a [`UsbDevice`]
///
/// ```
/// use usbd_core::{
///     emulated::EmulatedPhy, ConfigAttributes, Configuration, EndpointDescriptor,
///     Interface, TransferType, UsbDeviceBuilder,
/// };
/// use usb_device::device::UsbVidPid;
///
/// const ENDPOINTS: [EndpointDescriptor; 2] = [
///     EndpointDescriptor::new(0x81, TransferType::Bulk, 64, 0),
///     EndpointDescriptor::new(0x01, TransferType::Bulk, 64, 0),
/// ];
/// const INTERFACES: [Interface; 1] = [Interface::vendor(0, 0, &ENDPOINTS)];
/// const CONFIGURATIONS: [Configuration; 1] = [Configuration {
///     value: 1,
///     attributes: ConfigAttributes::RESERVED,
///     max_power_ma: 100,
///     string: 0,
///     interfaces: &INTERFACES,
/// }];
///
/// let device = UsbDeviceBuilder::new(
///     EmulatedPhy::new(),
///     (),
///     UsbVidPid(0x5824, 0x27dd),
///     &CONFIGURATIONS,
/// )
/// .product("Loopback")
/// .max_packet_size_0(64)
/// .build()
/// .unwrap();
/// assert!(!device.configured());
/// ```
pub struct UsbDeviceBuilder<'a, P, C> {
    phy: P,
    class: C,
    descriptors: Descriptors<'a>,
    device: DeviceDescriptor,
    default_configuration: Option<u8>,
}

impl<'a, P, C> UsbDeviceBuilder<'a, P, C>
where
    P: Phy,
    C: ClassHandler<P>,
{
    pub fn new(
        phy: P,
        class: C,
        vid_pid: UsbVidPid,
        configurations: &'a [Configuration<'a>],
    ) -> Self {
        Self {
            phy,
            class,
            descriptors: Descriptors::new(configurations),
            device: DeviceDescriptor {
                vendor_id: vid_pid.0,
                product_id: vid_pid.1,
                device_release: 0x0010,
                class: 0,
                sub_class: 0,
                protocol: 0,
                max_packet_size_0: 8,
            },
            default_configuration: None,
        }
    }

    /// `bcdDevice`
    pub fn device_release(mut self, release: u16) -> Self {
        self.device.device_release = release;
        self
    }

    /// Device class triple; all zeros defers to the interfaces
    pub fn device_class(mut self, class: u8, sub_class: u8, protocol: u8) -> Self {
        self.device.class = class;
        self.device.sub_class = sub_class;
        self.device.protocol = protocol;
        self
    }

    /// The requested endpoint 0 packet size
    ///
    /// The transceiver may round the size; see [`UsbDevice::max_packet_size_0()`].
    pub fn max_packet_size_0(mut self, max_packet_size: u8) -> Self {
        self.device.max_packet_size_0 = max_packet_size;
        self
    }

    /// Enter this configuration as soon as the host assigns an address
    pub fn default_configuration(mut self, value: u8) -> Self {
        self.default_configuration = Some(value);
        self
    }

    pub fn lang_id(mut self, lang_id: u16) -> Self {
        self.descriptors.lang_id = lang_id;
        self
    }

    pub fn manufacturer(mut self, manufacturer: &'a str) -> Self {
        self.descriptors.manufacturer = Some(manufacturer);
        self
    }

    pub fn product(mut self, product: &'a str) -> Self {
        self.descriptors.product = Some(product);
        self
    }

    pub fn serial_number(mut self, serial_number: &'a str) -> Self {
        self.descriptors.serial_number = Some(serial_number);
        self
    }

    /// Strings for configurations and interfaces
    ///
    /// The first string has index [`FIRST_USER_STRING`].
    pub fn strings(mut self, strings: &'a [&'a str]) -> Self {
        self.descriptors.strings = strings;
        self
    }

    /// Validate the descriptors, and initialize the transceiver
    pub fn build(self) -> Result<UsbDevice<'a, P, C>, BuilderError> {
        validate(&self.descriptors, &self.device, self.default_configuration)?;
        let core = DeviceCore::new(
            self.class,
            self.descriptors,
            self.device,
            self.default_configuration,
        );
        Ok(UsbDevice::new(self.phy, core))
    }
}

fn validate(
    descriptors: &Descriptors,
    device: &DeviceDescriptor,
    default_configuration: Option<u8>,
) -> Result<(), BuilderError> {
    if !matches!(device.max_packet_size_0, 8 | 16 | 32 | 64) {
        return Err(BuilderError::InvalidPacketSize0(device.max_packet_size_0));
    }
    if descriptors.configurations.is_empty() {
        return Err(BuilderError::NoConfigurations);
    }
    if descriptors.strings.len() > usize::from(u8::MAX - FIRST_USER_STRING) + 1 {
        return Err(BuilderError::TooManyStrings);
    }

    for (idx, config) in descriptors.configurations.iter().enumerate() {
        if config.value == 0 {
            return Err(BuilderError::InvalidConfigurationValue(config.value));
        }
        if descriptors.configurations[..idx]
            .iter()
            .any(|other| other.value == config.value)
        {
            return Err(BuilderError::DuplicateConfiguration(config.value));
        }
        if config.max_power_ma > 500 {
            return Err(BuilderError::InvalidMaxPower(config.max_power_ma));
        }
        if config.total_length() > CONTROL_BUFFER_SIZE {
            return Err(BuilderError::ConfigurationTooLong(config.value));
        }
        validate_interfaces(config)?;
    }

    match default_configuration {
        Some(value) if descriptors.configuration(value).is_none() => {
            Err(BuilderError::UnknownDefaultConfiguration(value))
        }
        _ => Ok(()),
    }
}

fn validate_interfaces(config: &Configuration) -> Result<(), BuilderError> {
    for iface in config.interfaces {
        if usize::from(iface.number) >= MAX_INTERFACES {
            return Err(BuilderError::InvalidInterface(iface.number));
        }
        if config.interface(iface.number, 0).is_none() {
            return Err(BuilderError::MissingDefaultAlternateSetting(iface.number));
        }
        for (idx, ep) in iface.endpoints.iter().enumerate() {
            let addr = ep.endpoint_address();
            if addr.index() == 0 || addr.index() >= MAX_ENDPOINTS / 2 {
                return Err(BuilderError::InvalidEndpoint(ep.address));
            }
            if iface.endpoints[..idx]
                .iter()
                .any(|other| other.address == ep.address)
            {
                return Err(BuilderError::DuplicateEndpoint(ep.address));
            }
        }
    }
    Ok(())
}
