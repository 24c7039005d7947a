//! Device lifecycle
//!
//! [`UsbDevice`] pairs a transceiver with the protocol state that reacts to
//! its events. The protocol state is a [`DeviceCore`]; it implements
//! [`PhyEvents`], and it's what the transceiver dispatches to from
//! `process()`.

use crate::{
    class::{ClassHandler, ControlResponse},
    control::{Completion, ControlPipe, Reply},
    descriptor::{DeviceDescriptor, Descriptors},
    endpoint::{Endpoints, Io},
    events::PhyEvents,
    phy::Phy,
    setup::{self, Kind},
    standard, MAX_INTERFACES,
};
use usb_device::{
    control::{Request, RequestType},
    endpoint::EndpointAddress,
    UsbDirection, UsbError,
};

/// Top-level device state
///
/// Suspension is tracked separately; see [`UsbDevice::is_suspended()`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DeviceState {
    /// No VBUS
    Unpowered,
    /// VBUS present, but the host hasn't reset the device
    Powered,
    /// Reset, and using address 0
    Default,
    /// The host assigned an address
    Addressed,
    /// The host selected a configuration
    Configured,
}

/// Bus event counters
///
/// Counters saturate, and only decrease when cleared.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Counters {
    pub reset: u32,
    pub suspend: u32,
    pub resume: u32,
}

/// The protocol state of a USB device
///
/// This is the event sink that a [`UsbDevice`] hands to its transceiver.
pub struct DeviceCore<'a, C> {
    pub(crate) class: C,
    pub(crate) descriptors: Descriptors<'a>,
    pub(crate) device: DeviceDescriptor,
    pub(crate) default_configuration: Option<u8>,
    pub(crate) control: ControlPipe,
    pub(crate) endpoints: Endpoints,
    pub(crate) state: DeviceState,
    pub(crate) suspended: bool,
    pub(crate) address: u8,
    pub(crate) pending_address: Option<u8>,
    pub(crate) configuration: u8,
    pub(crate) alternate_settings: [u8; MAX_INTERFACES],
    pub(crate) remote_wakeup_enabled: bool,
    pub(crate) counters: Counters,
}

impl<'a, C> DeviceCore<'a, C> {
    pub(crate) fn new(
        class: C,
        descriptors: Descriptors<'a>,
        device: DeviceDescriptor,
        default_configuration: Option<u8>,
    ) -> Self {
        Self {
            class,
            descriptors,
            device,
            default_configuration,
            control: ControlPipe::new(device.max_packet_size_0 as u16),
            endpoints: Endpoints::new(),
            state: DeviceState::Unpowered,
            suspended: false,
            address: 0,
            pending_address: None,
            configuration: 0,
            alternate_settings: [0; MAX_INTERFACES],
            remote_wakeup_enabled: false,
            counters: Counters::default(),
        }
    }

    /// Forget everything that belongs to a bus session
    fn end_session(&mut self) {
        self.control.reset();
        self.endpoints.forget();
        self.suspended = false;
        self.address = 0;
        self.pending_address = None;
        self.configuration = 0;
        self.alternate_settings = [0; MAX_INTERFACES];
        self.remote_wakeup_enabled = false;
    }

    pub(crate) fn state(&self) -> DeviceState {
        self.state
    }
}

impl<'a, C> DeviceCore<'a, C> {
    /// Select configuration `value`
    ///
    /// The endpoints of the previous configuration are removed, then the
    /// endpoints of each interface's alternate setting 0 are added. If an
    /// endpoint can't be added, everything added so far is removed and the
    /// device is left in the Addressed state.
    pub(crate) fn set_configuration<P>(&mut self, phy: &mut P, value: u8) -> Result<(), UsbError>
    where
        P: Phy,
        C: ClassHandler<P>,
    {
        let config = *self
            .descriptors
            .configuration(value)
            .ok_or(UsbError::InvalidState)?;

        self.endpoints.open_window();
        if self.state == DeviceState::Configured {
            self.endpoints.remove_all(phy);
        }
        for iface in config.default_interfaces() {
            for ep in iface.endpoints {
                if let Err(err) = self.endpoints.add(phy, ep) {
                    warn!("CONFIGURATION {} REJECTED {:?}", value, err);
                    self.endpoints.remove_all(phy);
                    self.endpoints.close_window();
                    let was_configured = self.state == DeviceState::Configured;
                    self.enter_addressed(phy);
                    if was_configured {
                        self.class
                            .configured(&mut Io::new(phy, &mut self.endpoints), 0);
                    }
                    return Err(err);
                }
            }
        }
        self.endpoints.close_window();

        phy.configure();
        self.state = DeviceState::Configured;
        self.configuration = value;
        self.alternate_settings = [0; MAX_INTERFACES];
        debug!("CONFIGURED {}", value);
        self.class
            .configured(&mut Io::new(phy, &mut self.endpoints), value);
        Ok(())
    }

    /// Return to the Addressed state, removing all endpoints
    pub(crate) fn deconfigure<P>(&mut self, phy: &mut P)
    where
        P: Phy,
        C: ClassHandler<P>,
    {
        if self.state != DeviceState::Configured {
            return;
        }
        self.endpoints.open_window();
        self.endpoints.remove_all(phy);
        self.endpoints.close_window();
        self.enter_addressed(phy);
        debug!("DECONFIGURED");
        self.class
            .configured(&mut Io::new(phy, &mut self.endpoints), 0);
    }

    fn enter_addressed<P: Phy>(&mut self, phy: &mut P) {
        if self.state == DeviceState::Configured {
            phy.unconfigure();
        }
        self.state = DeviceState::Addressed;
        self.configuration = 0;
        self.alternate_settings = [0; MAX_INTERFACES];
    }

    /// Select an interface's alternate setting
    ///
    /// The endpoints of the current alternate setting are replaced by those of
    /// the new alternate setting. If the new endpoints can't be added, the
    /// previous alternate setting is restored.
    pub(crate) fn set_interface<P>(
        &mut self,
        phy: &mut P,
        interface: u8,
        alternate_setting: u8,
    ) -> Result<(), UsbError>
    where
        P: Phy,
        C: ClassHandler<P>,
    {
        if self.state != DeviceState::Configured || usize::from(interface) >= MAX_INTERFACES {
            return Err(UsbError::InvalidState);
        }
        let config = *self
            .descriptors
            .configuration(self.configuration)
            .ok_or(UsbError::InvalidState)?;
        let new = *config
            .interface(interface, alternate_setting)
            .ok_or(UsbError::InvalidState)?;
        let previous = config
            .interface(interface, self.alternate_settings[usize::from(interface)])
            .copied();

        self.endpoints.open_window();
        if let Some(previous) = &previous {
            for ep in previous.endpoints {
                self.endpoints.remove(phy, ep.endpoint_address());
            }
        }
        for (idx, ep) in new.endpoints.iter().enumerate() {
            if let Err(err) = self.endpoints.add(phy, ep) {
                warn!(
                    "INTERFACE {} ALT {} REJECTED {:?}",
                    interface, alternate_setting, err
                );
                for added in &new.endpoints[..idx] {
                    self.endpoints.remove(phy, added.endpoint_address());
                }
                if let Some(previous) = &previous {
                    for ep in previous.endpoints {
                        let _ = self.endpoints.add(phy, ep);
                    }
                }
                self.endpoints.close_window();
                return Err(err);
            }
        }
        self.endpoints.close_window();

        self.alternate_settings[usize::from(interface)] = alternate_setting;
        debug!("INTERFACE {} ALT {}", interface, alternate_setting);
        self.class.interface_changed(
            &mut Io::new(phy, &mut self.endpoints),
            interface,
            alternate_setting,
        );
        Ok(())
    }

    /// A control request finished its status stage
    fn complete<P>(&mut self, phy: &mut P, req: &Request)
    where
        P: Phy,
        C: ClassHandler<P>,
    {
        if req.request_type != RequestType::Standard || req.request != Request::SET_ADDRESS {
            return;
        }
        let Some(address) = self.pending_address.take() else {
            return;
        };
        if !P::SET_ADDRESS_BEFORE_STATUS {
            phy.set_address(address);
        }
        self.address = address;
        debug!("ADDRESS {}", address);
        if address == 0 {
            self.state = DeviceState::Default;
            return;
        }
        self.state = DeviceState::Addressed;
        if let Some(value) = self.default_configuration {
            let _ = self.set_configuration(phy, value);
        }
    }

    /// Offer a class or vendor request to the class handler
    fn class_request<P>(&mut self, req: &Request) -> Reply
    where
        P: Phy,
        C: ClassHandler<P>,
    {
        let buffer = self.control.reply_buffer();
        let response = ClassHandler::<P>::control_request(&mut self.class, req, buffer);
        match (response, req.direction) {
            (ControlResponse::Stall, _) => Reply::Stall,
            (ControlResponse::Ack, UsbDirection::Out) if req.length > 0 => Reply::Out,
            (ControlResponse::Ack, UsbDirection::Out) => Reply::Status,
            (ControlResponse::Ack, UsbDirection::In) => Reply::In(0),
            (ControlResponse::Data(len), UsbDirection::In) => Reply::In(len),
            (ControlResponse::Data(_), UsbDirection::Out) => Reply::Stall,
        }
    }
}

impl<'a, P, C> PhyEvents<P> for DeviceCore<'a, C>
where
    P: Phy,
    C: ClassHandler<P>,
{
    fn power(&mut self, phy: &mut P, present: bool) {
        debug!("POWER {}", present);
        if present {
            if self.state == DeviceState::Unpowered {
                self.state = DeviceState::Powered;
            }
        } else {
            if self.state == DeviceState::Configured {
                phy.unconfigure();
            }
            self.end_session();
            self.state = DeviceState::Unpowered;
        }
        self.class.power(present);
    }

    fn suspend(&mut self, _: &mut P, suspended: bool) {
        if self.suspended == suspended {
            return;
        }
        self.suspended = suspended;
        if suspended {
            debug!("SUSPEND");
            self.counters.suspend = self.counters.suspend.saturating_add(1);
        } else {
            debug!("RESUME");
            self.counters.resume = self.counters.resume.saturating_add(1);
        }
        self.class.suspend(suspended);
    }

    fn sof(&mut self, _: &mut P, frame_number: u16) {
        self.class.sof(frame_number);
    }

    fn reset(&mut self, phy: &mut P) {
        debug!("RESET");
        if self.state == DeviceState::Configured {
            phy.unconfigure();
        }
        self.end_session();
        self.counters.reset = self.counters.reset.saturating_add(1);
        if self.state != DeviceState::Unpowered {
            self.state = DeviceState::Default;
        }
        self.class.reset();
    }

    fn ep0_setup(&mut self, phy: &mut P) {
        let req = self.control.setup(phy);
        let reply = match setup::classify(&req) {
            Kind::Standard(request) => standard::handle(self, phy, &req, request),
            Kind::Class | Kind::Vendor => self.class_request::<P>(&req),
            Kind::Invalid => Reply::Stall,
        };
        self.control.respond(phy, reply);
    }

    fn ep0_out(&mut self, phy: &mut P) {
        match self.control.out_complete(phy) {
            Some(Completion::DataReceived(req)) => {
                if self.class.control_out(&req, self.control.data()) {
                    self.control.accept(phy);
                } else {
                    self.control.reject(phy);
                }
            }
            Some(Completion::Complete(req)) => self.complete(phy, &req),
            None => {}
        }
    }

    fn ep0_in(&mut self, phy: &mut P) {
        if let Some(Completion::Complete(req)) = self.control.in_complete(phy) {
            self.complete(phy, &req);
        }
    }

    fn endpoint_in(&mut self, phy: &mut P, ep: EndpointAddress) {
        if self.endpoints.complete(ep) {
            self.class
                .endpoint_in(&mut Io::new(phy, &mut self.endpoints), ep);
        } else {
            warn!("EP{} IN DROPPED", ep.index());
        }
    }

    fn endpoint_out(&mut self, phy: &mut P, ep: EndpointAddress) {
        if self.endpoints.complete(ep) {
            self.class
                .endpoint_out(&mut Io::new(phy, &mut self.endpoints), ep);
        } else {
            warn!("EP{} OUT DROPPED", ep.index());
        }
    }
}

/// A USB device
///
/// Construct a `UsbDevice` with a [`UsbDeviceBuilder`](crate::UsbDeviceBuilder).
/// Call [`process()`](UsbDevice::process) whenever the transceiver's
/// [`ProcessSignal`](crate::ProcessSignal) fires.
pub struct UsbDevice<'a, P, C> {
    phy: P,
    core: DeviceCore<'a, C>,
}

impl<'a, P, C> UsbDevice<'a, P, C>
where
    P: Phy,
    C: ClassHandler<P>,
{
    /// Initialize the transceiver, and negotiate the endpoint 0 packet size
    pub(crate) fn new(mut phy: P, mut core: DeviceCore<'a, C>) -> Self {
        phy.init();
        let max_packet = phy.ep0_set_max_packet(core.device.max_packet_size_0.into());
        core.device.max_packet_size_0 = max_packet as u8;
        core.control.set_max_packet(max_packet);
        core.state = if phy.powered() {
            DeviceState::Powered
        } else {
            DeviceState::Unpowered
        };
        debug!("INIT EP0 {}", max_packet);
        Self { phy, core }
    }

    /// Dispatch all pending transceiver events
    pub fn process(&mut self) {
        self.phy.process(&mut self.core);
    }

    /// Make the device visible to the host
    ///
    /// The device reaches the Default state when the host resets it.
    pub fn connect(&mut self) {
        debug!("CONNECT");
        self.phy.connect();
    }

    /// Detach from the host
    ///
    /// All endpoints are removed, and the device returns to the Powered state.
    /// Wait at least [`MIN_DISCONNECT_TIME_US`](crate::timing::MIN_DISCONNECT_TIME_US)
    /// before the next [`connect()`](UsbDevice::connect).
    pub fn disconnect(&mut self) {
        debug!("DISCONNECT");
        let was_configured = self.core.state == DeviceState::Configured;
        self.core.endpoints.open_window();
        self.core.endpoints.remove_all(&mut self.phy);
        self.core.endpoints.close_window();
        if was_configured {
            self.phy.unconfigure();
        }
        self.phy.disconnect();
        self.core.end_session();
        self.core.state = if self.phy.powered() {
            DeviceState::Powered
        } else {
            DeviceState::Unpowered
        };
        if was_configured {
            self.core
                .class
                .configured(&mut Io::new(&mut self.phy, &mut self.core.endpoints), 0);
        }
    }

    /// Disconnect, and release the transceiver and the class
    pub fn deinit(mut self) -> (P, C) {
        self.disconnect();
        self.phy.deinit();
        (self.phy, self.core.class)
    }

    /// Indicates if the host selected a configuration
    pub fn configured(&self) -> bool {
        self.core.state == DeviceState::Configured
    }

    pub fn state(&self) -> DeviceState {
        self.core.state()
    }

    /// Indicates if the bus is suspended
    pub fn is_suspended(&self) -> bool {
        self.core.suspended
    }

    /// The active configuration value, or 0
    pub fn configuration(&self) -> u8 {
        self.core.configuration
    }

    /// The selected alternate setting of an interface
    ///
    /// Returns `None` if the device isn't configured, or if the active
    /// configuration doesn't have the interface.
    pub fn alternate_setting(&self, interface: u8) -> Option<u8> {
        let config = self
            .core
            .descriptors
            .configuration(self.core.configuration)?;
        (self.configured() && config.has_interface(interface))
            .then(|| self.core.alternate_settings[usize::from(interface)])
    }

    /// The assigned device address
    pub fn address(&self) -> u8 {
        self.core.address
    }

    /// The endpoint 0 max packet size used by the transceiver
    pub fn max_packet_size_0(&self) -> u8 {
        self.core.device.max_packet_size_0
    }

    /// Indicates if the host enabled remote wakeup
    pub fn remote_wakeup_enabled(&self) -> bool {
        self.core.remote_wakeup_enabled
    }

    /// Wake the host
    ///
    /// Only signals while the bus is suspended, and while the host has enabled
    /// remote wakeup. Returns `true` if the device signaled.
    pub fn remote_wakeup(&mut self) -> bool {
        if self.core.suspended && self.core.remote_wakeup_enabled {
            debug!("REMOTE WAKEUP");
            self.phy.remote_wakeup();
            true
        } else {
            false
        }
    }

    /// Enable or disable start of frame events
    pub fn set_sof_enabled(&mut self, enabled: bool) {
        if enabled {
            self.phy.sof_enable();
        } else {
            self.phy.sof_disable();
        }
    }

    /// Number of bus resets since construction, or since the last clear
    pub fn reset_count(&self) -> u32 {
        self.core.counters.reset
    }

    pub fn clear_reset_count(&mut self) {
        self.core.counters.reset = 0;
    }

    /// Number of bus suspends since construction, or since the last clear
    pub fn suspend_count(&self) -> u32 {
        self.core.counters.suspend
    }

    pub fn clear_suspend_count(&mut self) {
        self.core.counters.suspend = 0;
    }

    /// Number of bus resumes since construction, or since the last clear
    pub fn resume_count(&self) -> u32 {
        self.core.counters.resume
    }

    pub fn clear_resume_count(&mut self) {
        self.core.counters.resume = 0;
    }

    /// All counters at once
    pub fn counters(&self) -> Counters {
        self.core.counters
    }

    /// Endpoint I/O, outside of class handler callbacks
    pub fn io(&mut self) -> Io<'_, P> {
        Io::new(&mut self.phy, &mut self.core.endpoints)
    }

    /// The state of the added endpoints
    pub fn endpoints(&self) -> &Endpoints {
        &self.core.endpoints
    }

    pub fn descriptors(&self) -> &Descriptors<'a> {
        &self.core.descriptors
    }

    pub fn phy(&self) -> &P {
        &self.phy
    }

    pub fn phy_mut(&mut self) -> &mut P {
        &mut self.phy
    }

    pub fn class(&self) -> &C {
        &self.core.class
    }

    pub fn class_mut(&mut self) -> &mut C {
        &mut self.core.class
    }
}
