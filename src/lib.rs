//! A USB device protocol core
//!
//! `usbd-core` implements the device side of USB chapter 9 above a
//! pluggable transceiver. It enumerates, answers standard requests, and
//! manages endpoints, while a [`ClassHandler`] implements the device's
//! function.
//!
//! To interface the library, implement [`Phy`] for your transceiver. The
//! transceiver captures bus events in interrupt context, usually with an
//! [`EventCapture`], and raises a [`ProcessSignal`]. Your firmware then
//! calls [`UsbDevice::process()`] from thread context, where all protocol
//! handling happens.
//!
//! The [`emulated`] module provides a software transceiver, paired with a
//! host model, for testing classes without hardware.
//!
//! # Example
//!
//! ```
//! use usbd_core::{
//!     emulated::{EmulatedPhy, HostResult},
//!     ConfigAttributes, Configuration, UsbDeviceBuilder,
//! };
//! use usb_device::device::UsbVidPid;
//!
//! static CONFIGURATIONS: [Configuration; 1] = [Configuration {
//!     value: 1,
//!     attributes: ConfigAttributes::RESERVED,
//!     max_power_ma: 100,
//!     string: 0,
//!     interfaces: &[],
//! }];
//!
//! let mut device = UsbDeviceBuilder::new(
//!     EmulatedPhy::new(),
//!     (),
//!     UsbVidPid(0x5824, 0x27dd),
//!     &CONFIGURATIONS,
//! )
//! .max_packet_size_0(64)
//! .build()
//! .unwrap();
//!
//! device.phy_mut().host_power(true);
//! device.connect();
//! device.process();
//!
//! device.phy_mut().host_reset();
//! device.process();
//!
//! // SET_CONFIGURATION(1) is refused until the device has an address
//! device.phy_mut().host_setup([0x00, 0x09, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00]);
//! device.process();
//! assert_eq!(device.phy_mut().host_in_ep0(&mut []), HostResult::Stall);
//! assert!(!device.configured());
//! ```

#![no_std]

#[macro_use]
mod log;

mod builder;
mod capture;
mod class;
mod control;
mod descriptor;
mod device;
mod endpoint;
mod events;
mod phy;
mod setup;
mod standard;
mod table;

pub mod emulated;

pub use builder::{BuilderError, UsbDeviceBuilder};
pub use capture::{Captured, EventCapture};
pub use class::{ClassHandler, ControlResponse};
pub use control::{Completion, ControlPipe, Reply, Stage};
pub use descriptor::{
    ConfigAttributes, Configuration, Descriptors, DeviceDescriptor, EndpointDescriptor,
    Interface, FIRST_USER_STRING, LANG_ID_EN_US, MANUFACTURER_STRING, PRODUCT_STRING,
    SERIAL_NUMBER_STRING,
};
pub use device::{Counters, DeviceState, UsbDevice};
pub use endpoint::{EndpointInfo, Endpoints, Io};
pub use events::{FlagSignal, PendInterrupt, PhyEvents, ProcessSignal};
pub use phy::{Phy, TransferType};
pub use table::{EndpointSlot, EndpointTable, SlotDirection, SlotKinds, SLOT_COUNT};

/// Sixteen endpoint numbers, two directions
pub const MAX_ENDPOINTS: usize = 16 * 2;

/// Interfaces per configuration
pub const MAX_INTERFACES: usize = 16;

/// Capacity of the endpoint 0 data stage buffer
///
/// Configuration descriptors, and OUT data stages, must fit.
pub const CONTROL_BUFFER_SIZE: usize = 256;

/// Timing that a transceiver, and its integration, must meet
pub mod timing {
    /// Minimum time between a disconnect and the next connect
    pub const MIN_DISCONNECT_TIME_US: u32 = 1000;
    /// The host expects the new address this soon after SetAddress
    pub const SET_ADDRESS_LATENCY_MS: u32 = 2;
    /// Bound on handling a bus reset
    pub const RESET_LATENCY_MS: u32 = 10;
    /// Bound on the time between an event and its `process()` call
    pub const INTERRUPT_LATENCY_MS: u32 = 100;
}
