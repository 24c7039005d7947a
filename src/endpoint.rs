//! Endpoint state manager
//!
//! Tracks the runtime state of every non-zero endpoint above the
//! transceiver. Endpoint 0 is never tracked here; it's permanent, and
//! driven by the control pipe.

use crate::{
    descriptor::EndpointDescriptor,
    phy::{Phy, TransferType},
    MAX_ENDPOINTS,
};
use usb_device::{endpoint::EndpointAddress, UsbDirection, UsbError};

/// Produces an index into the endpoint collection
fn index(ep_addr: EndpointAddress) -> usize {
    (ep_addr.index() * 2) + (UsbDirection::In == ep_addr.direction()) as usize
}

/// Runtime state of one endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointInfo {
    pub address: EndpointAddress,
    pub kind: TransferType,
    pub max_packet: u16,
    /// Enabled in the transceiver
    pub enabled: bool,
    /// The HALT feature is set
    pub halted: bool,
    /// A read or write was started, and hasn't completed
    pub pending: bool,
}

/// The set of added endpoints
///
/// Endpoints may only be added or removed while the window is open. The
/// device opens the window while it services SetConfiguration and
/// SetInterface.
#[derive(Debug)]
pub struct Endpoints {
    list: [Option<EndpointInfo>; MAX_ENDPOINTS],
    window: bool,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self::new()
    }
}

impl Endpoints {
    pub const fn new() -> Self {
        Self {
            list: [None; MAX_ENDPOINTS],
            window: false,
        }
    }

    /// Allow `add()` and `remove()`
    pub(crate) fn open_window(&mut self) {
        self.window = true;
    }

    pub(crate) fn close_window(&mut self) {
        self.window = false;
    }

    /// Returns the endpoint, if it's added
    pub fn get(&self, addr: EndpointAddress) -> Option<&EndpointInfo> {
        self.list.get(index(addr))?.as_ref()
    }

    fn get_mut(&mut self, addr: EndpointAddress) -> Option<&mut EndpointInfo> {
        self.list.get_mut(index(addr))?.as_mut()
    }

    /// Iterate all added endpoints
    pub fn iter(&self) -> impl Iterator<Item = &EndpointInfo> {
        self.list.iter().flatten()
    }

    /// Indicates if no endpoints are added
    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    /// Add, and enable, an endpoint
    ///
    /// The endpoint is checked against the transceiver's endpoint table, and
    /// against the endpoints that are already added, before it's given to the
    /// transceiver.
    pub(crate) fn add<P: Phy>(
        &mut self,
        phy: &mut P,
        descriptor: &EndpointDescriptor,
    ) -> Result<(), UsbError> {
        debug_assert!(self.window, "endpoint added outside of SetConfiguration / SetInterface");
        let addr = descriptor.endpoint_address();
        if addr.index() == 0 {
            return Err(UsbError::InvalidEndpoint);
        }
        if self.get(addr).is_some() {
            return Err(UsbError::EndpointOverflow);
        }

        phy.endpoint_table().admits(
            self.iter().map(|ep| (ep.address, ep.max_packet)),
            addr,
            descriptor.max_packet_size,
            descriptor.kind,
        )?;

        if !phy.endpoint_add(addr, descriptor.max_packet_size, descriptor.kind) {
            warn!("EP{} {:?} REJECTED", addr.index(), addr.direction());
            return Err(UsbError::EndpointMemoryOverflow);
        }

        debug!(
            "ADD EP{} {:?} {:?} {}",
            addr.index(),
            addr.direction(),
            descriptor.kind,
            descriptor.max_packet_size
        );
        self.list[index(addr)] = Some(EndpointInfo {
            address: addr,
            kind: descriptor.kind,
            max_packet: descriptor.max_packet_size,
            enabled: true,
            halted: false,
            pending: false,
        });
        Ok(())
    }

    /// Remove an endpoint, aborting any pending transfer
    ///
    /// Does nothing if the endpoint isn't added.
    pub(crate) fn remove<P: Phy>(&mut self, phy: &mut P, addr: EndpointAddress) {
        debug_assert!(self.window, "endpoint removed outside of SetConfiguration / SetInterface");
        if let Some(ep) = self.list.get_mut(index(addr)).and_then(Option::take) {
            if ep.pending {
                phy.endpoint_abort(addr);
            }
            phy.endpoint_remove(addr);
            debug!("REMOVE EP{} {:?}", addr.index(), addr.direction());
        }
    }

    /// Remove every endpoint
    pub(crate) fn remove_all<P: Phy>(&mut self, phy: &mut P) {
        for idx in 0..self.list.len() {
            if let Some(ep) = self.list[idx] {
                self.remove(phy, ep.address);
            }
        }
    }

    /// Forget every endpoint, without telling the transceiver
    ///
    /// Used after a bus reset, where the transceiver has already removed its
    /// endpoints, and aborted their transfers.
    pub(crate) fn forget(&mut self) {
        self.list = [None; MAX_ENDPOINTS];
        self.window = false;
    }

    /// Set or clear the HALT feature
    ///
    /// The flag and the transceiver change together. Clearing HALT also resets
    /// the data toggle, even if the endpoint wasn't halted. Returns `false` if
    /// the endpoint isn't added.
    pub(crate) fn set_halted<P: Phy>(
        &mut self,
        phy: &mut P,
        addr: EndpointAddress,
        halted: bool,
    ) -> bool {
        let Some(ep) = self.get_mut(addr) else {
            return false;
        };
        ep.halted = halted;
        if halted {
            phy.endpoint_stall(addr);
        } else {
            phy.endpoint_unstall(addr);
        }
        debug!("EP{} {:?} HALT {}", addr.index(), addr.direction(), halted);
        true
    }

    /// A transfer completed on `addr`
    ///
    /// Returns `false` if the endpoint isn't added.
    pub(crate) fn complete(&mut self, addr: EndpointAddress) -> bool {
        match self.get_mut(addr) {
            Some(ep) => {
                ep.pending = false;
                true
            }
            None => false,
        }
    }
}

/// Endpoint I/O for class handlers
///
/// An `Io` pairs the transceiver with the endpoint state, so that every
/// transfer is checked against, and recorded in, the endpoint manager.
pub struct Io<'r, P> {
    phy: &'r mut P,
    endpoints: &'r mut Endpoints,
}

impl<'r, P: Phy> Io<'r, P> {
    pub(crate) fn new(phy: &'r mut P, endpoints: &'r mut Endpoints) -> Self {
        Self { phy, endpoints }
    }

    fn endpoint(
        &mut self,
        addr: EndpointAddress,
        direction: UsbDirection,
    ) -> Result<&mut EndpointInfo, UsbError> {
        if addr.index() == 0 || addr.direction() != direction {
            return Err(UsbError::InvalidEndpoint);
        }
        self.endpoints
            .get_mut(addr)
            .ok_or(UsbError::InvalidEndpoint)
    }

    /// Start a write of one packet on an IN endpoint
    ///
    /// Completion is signaled through the class handler's `endpoint_in`.
    pub fn write(&mut self, addr: EndpointAddress, data: &[u8]) -> Result<(), UsbError> {
        let ep = self.endpoint(addr, UsbDirection::In)?;
        if ep.halted {
            return Err(UsbError::InvalidState);
        }
        if ep.pending {
            return Err(UsbError::WouldBlock);
        }
        if data.len() > usize::from(ep.max_packet) {
            return Err(UsbError::BufferOverflow);
        }
        if !self.phy.endpoint_write(addr, data) {
            return Err(UsbError::WouldBlock);
        }
        if let Some(ep) = self.endpoints.get_mut(addr) {
            ep.pending = true;
        }
        trace!("EP{} IN {}", addr.index(), data.len());
        Ok(())
    }

    /// Start a read of one packet on an OUT endpoint
    ///
    /// Completion is signaled through the class handler's `endpoint_out`.
    pub fn read_start(&mut self, addr: EndpointAddress) -> Result<(), UsbError> {
        let ep = self.endpoint(addr, UsbDirection::Out)?;
        if ep.halted {
            return Err(UsbError::InvalidState);
        }
        if ep.pending {
            return Err(UsbError::WouldBlock);
        }
        let size = usize::from(ep.max_packet);
        if !self.phy.endpoint_read(addr, size) {
            return Err(UsbError::WouldBlock);
        }
        if let Some(ep) = self.endpoints.get_mut(addr) {
            ep.pending = true;
        }
        Ok(())
    }

    /// Copy the packet received on an OUT endpoint
    ///
    /// Returns `WouldBlock` while the read is still pending.
    pub fn read_result(&mut self, addr: EndpointAddress, buffer: &mut [u8]) -> Result<usize, UsbError> {
        let ep = self.endpoint(addr, UsbDirection::Out)?;
        if ep.pending {
            return Err(UsbError::WouldBlock);
        }
        let read = self.phy.endpoint_read_result(addr, buffer);
        trace!("EP{} OUT {}", addr.index(), read);
        Ok(read)
    }

    /// Abort a pending transfer
    pub fn abort(&mut self, addr: EndpointAddress) -> Result<(), UsbError> {
        if addr.index() == 0 {
            return Err(UsbError::InvalidEndpoint);
        }
        let ep = self
            .endpoints
            .get_mut(addr)
            .ok_or(UsbError::InvalidEndpoint)?;
        if ep.pending {
            ep.pending = false;
            self.phy.endpoint_abort(addr);
        }
        Ok(())
    }

    /// Set or clear the HALT feature from the device side
    pub fn set_halted(&mut self, addr: EndpointAddress, halted: bool) -> Result<(), UsbError> {
        if addr.index() != 0 && self.endpoints.set_halted(self.phy, addr, halted) {
            Ok(())
        } else {
            Err(UsbError::InvalidEndpoint)
        }
    }

    /// Indicates if the endpoint is halted
    pub fn is_halted(&self, addr: EndpointAddress) -> Result<bool, UsbError> {
        self.endpoints
            .get(addr)
            .map(|ep| ep.halted)
            .ok_or(UsbError::InvalidEndpoint)
    }

    /// Indicates if a transfer is pending on the endpoint
    pub fn is_pending(&self, addr: EndpointAddress) -> Result<bool, UsbError> {
        self.endpoints
            .get(addr)
            .map(|ep| ep.pending)
            .ok_or(UsbError::InvalidEndpoint)
    }

    /// Access the transceiver
    pub fn phy(&mut self) -> &mut P {
        self.phy
    }

    /// Access the endpoint state
    pub fn endpoints(&self) -> &Endpoints {
        self.endpoints
    }
}
