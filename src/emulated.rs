//! A transceiver that lives entirely in RAM
//!
//! [`EmulatedPhy`] realizes the whole [`Phy`] contract without hardware.
//! Its `host_*` methods play the role of the USB host and of the interrupt
//! handler: each one changes the emulated bus, captures the matching event
//! in an [`EventCapture`], and raises a [`FlagSignal`]. Nothing is
//! dispatched until someone calls `process()`.
//!
//! ```
//! use usbd_core::{emulated::{EmulatedPhy, HostResult}, Phy};
//!
//! let mut phy = EmulatedPhy::new();
//! phy.host_power(true);
//! phy.init();
//! phy.connect();
//!
//! phy.host_reset();
//! assert!(phy.is_process_pending());
//!
//! // Endpoint 0 NAKs until the device responds.
//! let mut buffer = [0; 8];
//! assert_eq!(phy.host_in_ep0(&mut buffer), HostResult::Nak);
//! ```

use crate::{
    capture::{Captured, EventCapture},
    events::{FlagSignal, PhyEvents, ProcessSignal},
    phy::{Phy, TransferType},
    table::{EndpointSlot, EndpointTable, SlotDirection, SlotKinds, SLOT_COUNT},
    MAX_ENDPOINTS,
};
use usb_device::{endpoint::EndpointAddress, UsbDirection};

/// Largest packet the emulated hardware can move
pub const MAX_PACKET_SIZE: usize = 64;

/// The emulated endpoint capabilities
///
/// Endpoints 1 through 7 support every transfer type in both directions.
/// Endpoints 8 through 15 support bulk and interrupt transfers in one
/// direction at a time.
pub const ENDPOINT_TABLE: EndpointTable = {
    let mut slots = [EndpointSlot {
        kinds: SlotKinds::DATA,
        direction: SlotDirection::InAndOut,
        max_packet_size: MAX_PACKET_SIZE as u16,
    }; SLOT_COUNT];
    slots[0] = EndpointSlot {
        kinds: SlotKinds::CONTROL,
        direction: SlotDirection::InAndOut,
        max_packet_size: MAX_PACKET_SIZE as u16,
    };
    let mut number = 8;
    while number < SLOT_COUNT {
        slots[number] = EndpointSlot {
            kinds: SlotKinds::BULK.union(SlotKinds::INTERRUPT),
            direction: SlotDirection::InOrOut,
            max_packet_size: MAX_PACKET_SIZE as u16,
        };
        number += 1;
    }
    EndpointTable {
        buffer_bytes: 1024,
        slots,
    }
};

/// The host's view of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostResult {
    /// The device accepted an OUT packet
    Ack,
    /// The device sent an IN packet of this many bytes
    Data(usize),
    /// The device isn't ready
    Nak,
    /// The device stalled the endpoint
    Stall,
}

#[derive(Debug, Clone, Copy)]
struct Packet {
    data: [u8; MAX_PACKET_SIZE],
    len: usize,
}

impl Packet {
    const EMPTY: Self = Self {
        data: [0; MAX_PACKET_SIZE],
        len: 0,
    };

    fn new(bytes: &[u8]) -> Self {
        let mut packet = Self::EMPTY;
        let len = bytes.len().min(MAX_PACKET_SIZE);
        packet.data[..len].copy_from_slice(&bytes[..len]);
        packet.len = len;
        packet
    }

    fn copy_to(&self, buffer: &mut [u8]) -> usize {
        let len = self.len.min(buffer.len());
        buffer[..len].copy_from_slice(&self.data[..len]);
        len
    }
}

/// Per-direction endpoint state, including endpoint 0
#[derive(Debug, Clone, Copy)]
struct Endpoint {
    added: bool,
    kind: TransferType,
    max_packet: usize,
    stalled: bool,
    /// An armed read, and its size
    read: Option<usize>,
    /// An armed write
    write: Option<Packet>,
    /// The last packet the host sent
    received: Packet,
}

impl Endpoint {
    const REMOVED: Self = Self {
        added: false,
        kind: TransferType::Bulk,
        max_packet: 0,
        stalled: false,
        read: None,
        write: None,
        received: Packet::EMPTY,
    };
}

/// Produces an index into the endpoint collection
fn index(ep_addr: EndpointAddress) -> usize {
    (ep_addr.index() * 2) + (UsbDirection::In == ep_addr.direction()) as usize
}

fn ep0_out() -> EndpointAddress {
    EndpointAddress::from_parts(0, UsbDirection::Out)
}

fn ep0_in() -> EndpointAddress {
    EndpointAddress::from_parts(0, UsbDirection::In)
}

/// A USB device transceiver, emulated in RAM
#[derive(Debug)]
pub struct EmulatedPhy {
    capture: EventCapture,
    signal: FlagSignal,
    initialized: bool,
    vbus: bool,
    connected: bool,
    configured: bool,
    sof_enabled: bool,
    address: u8,
    setup: [u8; 8],
    endpoints: [Endpoint; MAX_ENDPOINTS],
    remote_wakeups: u32,
    ep0_stalls: u32,
}

impl Default for EmulatedPhy {
    fn default() -> Self {
        Self::new()
    }
}

impl EmulatedPhy {
    /// An unpowered, uninitialized transceiver
    pub const fn new() -> Self {
        Self {
            capture: EventCapture::new(),
            signal: FlagSignal::new(),
            initialized: false,
            vbus: false,
            connected: false,
            configured: false,
            sof_enabled: false,
            address: 0,
            setup: [0; 8],
            endpoints: [Endpoint::REMOVED; MAX_ENDPOINTS],
            remote_wakeups: 0,
            ep0_stalls: 0,
        }
    }

    /// Indicates if the host can see the device
    fn on_bus(&self) -> bool {
        self.initialized && self.vbus && self.connected
    }

    fn signal(&self) {
        self.signal.start_process();
    }

    fn endpoint(&mut self, addr: EndpointAddress) -> Option<&mut Endpoint> {
        self.endpoints.get_mut(index(addr))
    }

    /// Remove every endpoint but endpoint 0, and cancel all transfers
    fn bus_reset(&mut self) {
        for (idx, ep) in self.endpoints.iter_mut().enumerate() {
            if idx < 2 {
                ep.stalled = false;
                ep.read = None;
                ep.write = None;
            } else {
                *ep = Endpoint::REMOVED;
            }
        }
        self.address = 0;
        self.configured = false;
    }

    //
    // Host side
    //

    /// Apply, or remove, VBUS
    pub fn host_power(&mut self, present: bool) {
        self.vbus = present;
        if !present {
            self.bus_reset();
        }
        if self.initialized {
            self.capture.power(present);
            self.signal();
        }
    }

    /// Reset the bus
    pub fn host_reset(&mut self) {
        if !self.on_bus() {
            return;
        }
        self.bus_reset();
        self.capture.reset();
        self.signal();
    }

    /// Stop all bus activity, so that the device suspends
    pub fn host_suspend(&mut self) {
        if self.on_bus() {
            self.capture.suspend(true);
            self.signal();
        }
    }

    /// Resume bus activity
    pub fn host_resume(&mut self) {
        if self.on_bus() {
            self.capture.suspend(false);
            self.signal();
        }
    }

    /// Send a start of frame
    pub fn host_sof(&mut self, frame_number: u16) {
        if self.on_bus() && self.sof_enabled {
            self.capture.sof(frame_number);
            self.signal();
        }
    }

    /// Send a SETUP packet to endpoint 0
    ///
    /// This clears a stall on endpoint 0, and cancels any armed transfer.
    pub fn host_setup(&mut self, packet: [u8; 8]) {
        if !self.on_bus() {
            return;
        }
        self.setup = packet;
        for ep in &mut self.endpoints[..2] {
            ep.stalled = false;
            ep.read = None;
            ep.write = None;
        }
        self.capture.setup();
        self.signal();
    }

    /// Request an IN packet from endpoint 0
    pub fn host_in_ep0(&mut self, buffer: &mut [u8]) -> HostResult {
        self.host_in_endpoint(ep0_in(), buffer)
    }

    /// Send an OUT packet to endpoint 0
    pub fn host_out_ep0(&mut self, data: &[u8]) -> HostResult {
        self.host_out_endpoint(ep0_out(), data)
    }

    /// Request an IN packet from endpoint `number`
    pub fn host_in(&mut self, number: usize, buffer: &mut [u8]) -> HostResult {
        self.host_in_endpoint(EndpointAddress::from_parts(number, UsbDirection::In), buffer)
    }

    /// Send an OUT packet to endpoint `number`
    pub fn host_out(&mut self, number: usize, data: &[u8]) -> HostResult {
        self.host_out_endpoint(EndpointAddress::from_parts(number, UsbDirection::Out), data)
    }

    fn host_in_endpoint(&mut self, addr: EndpointAddress, buffer: &mut [u8]) -> HostResult {
        if !self.on_bus() {
            return HostResult::Nak;
        }
        let Some(ep) = self.endpoint(addr) else {
            return HostResult::Nak;
        };
        if addr.index() != 0 && !ep.added {
            return HostResult::Nak;
        }
        if ep.stalled {
            return HostResult::Stall;
        }
        let Some(packet) = ep.write.take() else {
            return HostResult::Nak;
        };
        let len = packet.copy_to(buffer);
        self.capture.ep_in(addr.index() as u8);
        self.signal();
        HostResult::Data(len)
    }

    fn host_out_endpoint(&mut self, addr: EndpointAddress, data: &[u8]) -> HostResult {
        if !self.on_bus() {
            return HostResult::Nak;
        }
        let Some(ep) = self.endpoint(addr) else {
            return HostResult::Nak;
        };
        if addr.index() != 0 && !ep.added {
            return HostResult::Nak;
        }
        if ep.stalled {
            return HostResult::Stall;
        }
        match ep.read {
            None => HostResult::Nak,
            // Babble
            Some(size) if data.len() > size => HostResult::Stall,
            Some(_) => {
                ep.read = None;
                ep.received = Packet::new(data);
                self.capture.ep_out(addr.index() as u8);
                self.signal();
                HostResult::Ack
            }
        }
    }

    //
    // Observers
    //

    /// Indicates if the pull-up is enabled
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Indicates if VBUS is present
    pub fn is_powered(&self) -> bool {
        self.vbus
    }

    /// Indicates if the transceiver is initialized
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// The programmed device address
    pub fn address(&self) -> u8 {
        self.address
    }

    /// Indicates if the device told the transceiver that it's configured
    pub fn is_configured(&self) -> bool {
        self.configured
    }

    /// Indicates if start of frame events are enabled
    pub fn is_sof_enabled(&self) -> bool {
        self.sof_enabled
    }

    /// How many times the device signaled remote wakeup
    pub fn remote_wakeups(&self) -> u32 {
        self.remote_wakeups
    }

    /// How many times the device stalled endpoint 0
    pub fn ep0_stalls(&self) -> u32 {
        self.ep0_stalls
    }

    /// Indicates if the device added the endpoint
    pub fn is_endpoint_added(&self, addr: EndpointAddress) -> bool {
        self.endpoints
            .get(index(addr))
            .map_or(false, |ep| ep.added)
    }

    /// Indicates if the endpoint is stalled
    pub fn is_endpoint_stalled(&self, addr: EndpointAddress) -> bool {
        self.endpoints
            .get(index(addr))
            .map_or(false, |ep| ep.stalled)
    }

    /// Indicates if the interrupt handler asked for `process()`
    pub fn is_process_pending(&self) -> bool {
        self.signal.is_pending()
    }

    /// Take the captured events, without dispatching them
    pub fn take_events(&mut self) -> Captured {
        self.signal.take();
        self.capture.drain()
    }
}

impl Phy for EmulatedPhy {
    fn init(&mut self) {
        let vbus = self.vbus;
        *self = Self::new();
        self.vbus = vbus;
        self.initialized = true;
        debug!("EMULATED INIT");
    }

    fn deinit(&mut self) {
        self.bus_reset();
        self.connected = false;
        self.initialized = false;
        self.sof_enabled = false;
        self.take_events();
    }

    fn powered(&self) -> bool {
        self.vbus
    }

    fn connect(&mut self) {
        self.connected = true;
    }

    fn disconnect(&mut self) {
        self.connected = false;
        self.bus_reset();
    }

    fn configure(&mut self) {
        self.configured = true;
    }

    fn unconfigure(&mut self) {
        self.configured = false;
    }

    fn sof_enable(&mut self) {
        self.sof_enabled = true;
    }

    fn sof_disable(&mut self) {
        self.sof_enabled = false;
    }

    fn set_address(&mut self, address: u8) {
        self.address = address;
    }

    fn remote_wakeup(&mut self) {
        self.remote_wakeups = self.remote_wakeups.saturating_add(1);
        // The host answers with resume signaling
        if self.on_bus() {
            self.capture.suspend(false);
            self.signal();
        }
    }

    fn endpoint_table(&self) -> &EndpointTable {
        &ENDPOINT_TABLE
    }

    fn ep0_set_max_packet(&mut self, max_packet: u16) -> u16 {
        let max_packet = match max_packet {
            0..=8 => 8,
            9..=16 => 16,
            17..=32 => 32,
            _ => 64,
        };
        for ep in &mut self.endpoints[..2] {
            ep.max_packet = max_packet;
            ep.kind = TransferType::Control;
        }
        max_packet as u16
    }

    fn ep0_setup_read_result(&mut self, buffer: &mut [u8; 8]) {
        *buffer = self.setup;
    }

    fn ep0_read(&mut self, size: usize) {
        let ep = &mut self.endpoints[index(ep0_out())];
        ep.read = Some(size.min(ep.max_packet));
    }

    fn ep0_read_result(&mut self, buffer: &mut [u8]) -> usize {
        let ep = &mut self.endpoints[index(ep0_out())];
        let len = ep.received.copy_to(buffer);
        ep.received = Packet::EMPTY;
        len
    }

    fn ep0_write(&mut self, buffer: &[u8]) {
        let ep = &mut self.endpoints[index(ep0_in())];
        debug_assert!(buffer.len() <= ep.max_packet);
        ep.write = Some(Packet::new(buffer));
    }

    fn ep0_stall(&mut self) {
        for ep in &mut self.endpoints[..2] {
            ep.stalled = true;
            ep.read = None;
            ep.write = None;
        }
        self.ep0_stalls = self.ep0_stalls.saturating_add(1);
    }

    fn endpoint_add(&mut self, addr: EndpointAddress, max_packet: u16, kind: TransferType) -> bool {
        debug_assert_ne!(addr.index(), 0);
        if usize::from(max_packet) > MAX_PACKET_SIZE {
            return false;
        }
        match self.endpoint(addr) {
            Some(ep) if !ep.added => {
                *ep = Endpoint {
                    added: true,
                    kind,
                    max_packet: max_packet.into(),
                    ..Endpoint::REMOVED
                };
                true
            }
            _ => false,
        }
    }

    fn endpoint_remove(&mut self, addr: EndpointAddress) {
        if let Some(ep) = self.endpoint(addr) {
            *ep = Endpoint::REMOVED;
        }
    }

    fn endpoint_stall(&mut self, addr: EndpointAddress) {
        if let Some(ep) = self.endpoint(addr) {
            ep.stalled = true;
        }
    }

    fn endpoint_unstall(&mut self, addr: EndpointAddress) {
        if let Some(ep) = self.endpoint(addr) {
            ep.stalled = false;
        }
    }

    fn endpoint_read(&mut self, addr: EndpointAddress, size: usize) -> bool {
        match self.endpoint(addr) {
            Some(ep) if ep.added && ep.read.is_none() => {
                ep.read = Some(size.min(ep.max_packet));
                true
            }
            _ => false,
        }
    }

    fn endpoint_read_result(&mut self, addr: EndpointAddress, buffer: &mut [u8]) -> usize {
        match self.endpoint(addr) {
            Some(ep) => {
                let len = ep.received.copy_to(buffer);
                ep.received = Packet::EMPTY;
                len
            }
            None => 0,
        }
    }

    fn endpoint_write(&mut self, addr: EndpointAddress, buffer: &[u8]) -> bool {
        match self.endpoint(addr) {
            Some(ep) if ep.added && ep.write.is_none() && buffer.len() <= ep.max_packet => {
                ep.write = Some(Packet::new(buffer));
                true
            }
            _ => false,
        }
    }

    fn endpoint_abort(&mut self, addr: EndpointAddress) {
        if let Some(ep) = self.endpoint(addr) {
            ep.write = None;
            ep.read = None;
        }
    }

    fn process<E: PhyEvents<Self>>(&mut self, events: &mut E) {
        if !self.initialized {
            return;
        }
        while self.signal.take() {
            let captured = self.capture.drain();
            captured.dispatch(self, events);
        }
    }
}
