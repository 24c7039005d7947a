//! The class / vendor collaborator boundary

use crate::{endpoint::Io, phy::Phy};
use usb_device::{control::Request, endpoint::EndpointAddress};

/// Response to a class or vendor control request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlResponse {
    /// Reject the request
    Stall,
    /// Accept a request without a data stage, or an OUT request
    Ack,
    /// Send the first `n` bytes of the buffer as the data stage
    Data(usize),
}

/// Implements USB classes, and vendor requests, on top of the device core
///
/// Every method has a default that declines or ignores. `()` is a handler
/// that implements no class at all.
pub trait ClassHandler<P: Phy> {
    /// Handle a class or vendor control request
    ///
    /// For device-to-host requests, write up to `req.length` bytes into `buffer`
    /// and return [`ControlResponse::Data`]. For host-to-device requests with a
    /// data stage, return [`ControlResponse::Ack`] to receive the data through
    /// [`control_out()`](ClassHandler::control_out). For requests without a
    /// data stage, `Ack` completes the request.
    fn control_request(&mut self, req: &Request, buffer: &mut [u8]) -> ControlResponse {
        let _ = (req, buffer);
        ControlResponse::Stall
    }

    /// The data stage of an accepted host-to-device request
    ///
    /// Return `true` to acknowledge the request, or `false` to stall.
    fn control_out(&mut self, req: &Request, data: &[u8]) -> bool {
        let _ = (req, data);
        false
    }

    /// Provide a descriptor that the device core doesn't know
    ///
    /// Write the descriptor into `buffer`, and return its length.
    fn get_descriptor(&mut self, req: &Request, buffer: &mut [u8]) -> Option<usize> {
        let _ = (req, buffer);
        None
    }

    /// The host selected a configuration
    ///
    /// `configuration` is 0 when the device is deconfigured. Endpoints of each
    /// interface's default alternate setting are added.
    fn configured(&mut self, io: &mut Io<'_, P>, configuration: u8) {
        let _ = (io, configuration);
    }

    /// The host selected an interface's alternate setting
    fn interface_changed(&mut self, io: &mut Io<'_, P>, interface: u8, alternate_setting: u8) {
        let _ = (io, interface, alternate_setting);
    }

    /// A write completed on an IN endpoint
    fn endpoint_in(&mut self, io: &mut Io<'_, P>, ep: EndpointAddress) {
        let _ = (io, ep);
    }

    /// A read completed on an OUT endpoint
    fn endpoint_out(&mut self, io: &mut Io<'_, P>, ep: EndpointAddress) {
        let _ = (io, ep);
    }

    /// The bus was reset. All endpoints are gone.
    fn reset(&mut self) {}

    /// The bus was suspended, or resumed
    fn suspend(&mut self, suspended: bool) {
        let _ = suspended;
    }

    /// Start of frame
    fn sof(&mut self, frame_number: u16) {
        let _ = frame_number;
    }

    /// USB power changed
    fn power(&mut self, present: bool) {
        let _ = present;
    }
}

impl<P: Phy> ClassHandler<P> for () {}
