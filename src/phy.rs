//! Physical transceiver abstraction
//!
//! A [`Phy`] is implemented once per hardware family. The device core
//! only ever talks to the hardware through this trait, and only ever
//! learns about bus activity through the [`PhyEvents`] that a `Phy`
//! dispatches from [`Phy::process()`].
//!
//! # Defined behavior
//!
//! - Any endpoint configuration that fits the [`EndpointTable`] returned by
//!   [`endpoint_table()`](Phy::endpoint_table) can be used, and all endpoints
//!   of a valid configuration can be used concurrently.
//! - Events are only dispatched while the `Phy` is initialized. While
//!   unpowered, only [`PhyEvents::power`] is dispatched.
//! - On a bus reset, the `Phy` removes all endpoints except endpoint 0.
//! - `in` and `out` events only occur for endpoints that have been added.
//! - Endpoint 0 NAKs everything except SETUP packets until one of
//!   [`ep0_read()`](Phy::ep0_read), [`ep0_write()`](Phy::ep0_write) or
//!   [`ep0_stall()`](Phy::ep0_stall) is called. An endpoint 0 stall is
//!   cleared when the next SETUP packet arrives.
//!
//! # Undefined behavior
//!
//! These are timing and usage assumptions, not errors that anyone
//! recovers from.
//!
//! - Calling [`endpoint_add()`](Phy::endpoint_add) or
//!   [`endpoint_remove()`](Phy::endpoint_remove) outside of servicing a
//!   SetConfiguration or SetInterface request.
//! - Calling any `endpoint_*` method on endpoint 0.
//! - Interrupt latency above [`timing::INTERRUPT_LATENCY_MS`], above
//!   [`timing::SET_ADDRESS_LATENCY_MS`] while the address is being set, or
//!   above [`timing::RESET_LATENCY_MS`] while a reset is handled.
//!
//! [`PhyEvents`]: crate::PhyEvents
//! [`PhyEvents::power`]: crate::PhyEvents::power
//! [`EndpointTable`]: crate::EndpointTable
//! [`timing::INTERRUPT_LATENCY_MS`]: crate::timing::INTERRUPT_LATENCY_MS
//! [`timing::SET_ADDRESS_LATENCY_MS`]: crate::timing::SET_ADDRESS_LATENCY_MS
//! [`timing::RESET_LATENCY_MS`]: crate::timing::RESET_LATENCY_MS

use crate::{events::PhyEvents, table::EndpointTable};
use usb_device::endpoint::EndpointAddress;

/// USB transfer type of an endpoint
///
/// The discriminant is the value of the transfer type bits in an
/// endpoint descriptor's `bmAttributes`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum TransferType {
    /// Control endpoint. Only endpoint 0 is a control endpoint.
    Control = 0b00,
    /// Isochronous endpoint
    Isochronous = 0b01,
    /// Bulk endpoint
    Bulk = 0b10,
    /// Interrupt endpoint
    Interrupt = 0b11,
}

/// The hardware contract of a USB device transceiver
///
/// See the module-level documentation for the defined and undefined
/// behaviors of a `Phy`.
pub trait Phy: Sized {
    /// Indicates that the hardware applies a new address only after the
    /// status stage of the SetAddress request.
    ///
    /// When `true`, the core calls [`set_address()`](Phy::set_address) as soon
    /// as it accepts the SetAddress SETUP packet, and relies on the hardware to
    /// defer the change. When `false`, the core calls `set_address()` once the
    /// status stage completes.
    const SET_ADDRESS_BEFORE_STATUS: bool = false;

    /// Initialize the transceiver
    ///
    /// Must be called before any other method. Events may be dispatched
    /// from [`process()`](Phy::process) once this returns.
    fn init(&mut self);

    /// Power down the transceiver
    ///
    /// Disable interrupts and stop dispatching events. No event is
    /// dispatched after `deinit()` returns until the next `init()`.
    fn deinit(&mut self);

    /// Check if USB power is present
    ///
    /// Hardware that cannot sense VBUS must always return `true`.
    fn powered(&self) -> bool;

    /// Make the device visible to the host by enabling the pull-up
    fn connect(&mut self);

    /// Detach from the host by disabling the pull-up
    ///
    /// The bus must then stay idle for at least
    /// [`MIN_DISCONNECT_TIME_US`](crate::timing::MIN_DISCONNECT_TIME_US) before
    /// the next `connect()`, or the host may never issue a reset. The caller
    /// honors this delay.
    fn disconnect(&mut self);

    /// The device entered the configured state
    ///
    /// Enable added endpoints if they are not enabled already.
    fn configure(&mut self);

    /// The device is leaving the configured state
    ///
    /// The transceiver may disable every endpoint other than endpoint 0.
    fn unconfigure(&mut self);

    /// Dispatch [`PhyEvents::sof`](crate::PhyEvents::sof) on every frame
    fn sof_enable(&mut self);

    /// Stop dispatching start-of-frame events
    fn sof_disable(&mut self);

    /// Program the device address
    fn set_address(&mut self, address: u8);

    /// Signal a remote wakeup to the host
    fn remote_wakeup(&mut self);

    /// Describes the endpoints the hardware can realize
    fn endpoint_table(&self) -> &EndpointTable;

    /// Set the max packet size of endpoint 0
    ///
    /// Returns the max packet size actually used by the hardware.
    fn ep0_set_max_packet(&mut self, max_packet: u16) -> u16;

    /// Copy the most recent SETUP packet into `buffer`
    fn ep0_setup_read_result(&mut self, buffer: &mut [u8; 8]);

    /// Start receiving a packet of up to `size` bytes on endpoint 0
    fn ep0_read(&mut self, size: usize);

    /// Copy the packet received after [`ep0_read()`](Phy::ep0_read) into `buffer`
    ///
    /// Returns the number of bytes copied.
    fn ep0_read_result(&mut self, buffer: &mut [u8]) -> usize;

    /// Write one packet on endpoint 0
    ///
    /// An empty `buffer` sends a zero-length packet.
    fn ep0_write(&mut self, buffer: &[u8]);

    /// Stall endpoint 0 until the next SETUP packet
    fn ep0_stall(&mut self);

    /// Configure and enable a non-zero endpoint
    ///
    /// Returns `false` if the hardware cannot realize the endpoint.
    fn endpoint_add(&mut self, ep: EndpointAddress, max_packet: u16, kind: TransferType) -> bool;

    /// Disable a non-zero endpoint
    fn endpoint_remove(&mut self, ep: EndpointAddress);

    /// Set the HALT feature on an endpoint
    fn endpoint_stall(&mut self, ep: EndpointAddress);

    /// Clear the HALT feature on an endpoint
    ///
    /// This also resets the endpoint's data toggle.
    fn endpoint_unstall(&mut self, ep: EndpointAddress);

    /// Start a read of up to `size` bytes on an OUT endpoint
    ///
    /// Returns `false` if the read could not be started.
    fn endpoint_read(&mut self, ep: EndpointAddress, size: usize) -> bool;

    /// Copy the packet received by the last `endpoint_read()` into `buffer`
    ///
    /// Returns the number of bytes copied.
    fn endpoint_read_result(&mut self, ep: EndpointAddress, buffer: &mut [u8]) -> usize;

    /// Start a write on an IN endpoint
    ///
    /// Returns `false` if the data could not be prepared for transmission.
    fn endpoint_write(&mut self, ep: EndpointAddress, buffer: &[u8]) -> bool;

    /// Abort a write that has not yet been sent
    ///
    /// The effect on OUT endpoints is implementation defined.
    fn endpoint_abort(&mut self, ep: EndpointAddress);

    /// Dispatch all captured hardware events to `events`
    ///
    /// This is the only place where [`PhyEvents`](crate::PhyEvents) are
    /// called. It must run outside of interrupt context, in response to a
    /// [`ProcessSignal`](crate::ProcessSignal).
    fn process<E: PhyEvents<Self>>(&mut self, events: &mut E);
}
