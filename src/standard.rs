//! Standard requests
//!
//! Chapter 9 requests that the device core answers itself. Each handler
//! returns how the control pipe should respond; a handler never touches
//! endpoint 0 directly.

use crate::{
    class::ClassHandler,
    control::Reply,
    descriptor,
    device::{DeviceCore, DeviceState},
    phy::Phy,
    setup::{descriptor_type_index, StandardRequest},
};
use usb_device::{
    control::{Recipient, Request},
    descriptor::descriptor_type,
    endpoint::EndpointAddress,
};

/// Device feature selector for test modes
const FEATURE_TEST_MODE: u16 = 2;

/// Descriptor types that only high-speed capable devices provide
const DEVICE_QUALIFIER: u8 = 6;
const OTHER_SPEED_CONFIGURATION: u8 = 7;

/// GetStatus device bits
const STATUS_SELF_POWERED: u8 = 1 << 0;
const STATUS_REMOTE_WAKEUP: u8 = 1 << 1;

/// GetStatus endpoint bits
const STATUS_HALT: u8 = 1 << 0;

/// Answer a standard request
pub(crate) fn handle<P, C>(
    core: &mut DeviceCore<'_, C>,
    phy: &mut P,
    req: &Request,
    request: StandardRequest,
) -> Reply
where
    P: Phy,
    C: ClassHandler<P>,
{
    let no_data_stage = matches!(
        request,
        StandardRequest::ClearFeature
            | StandardRequest::SetFeature
            | StandardRequest::SetAddress
            | StandardRequest::SetConfiguration
            | StandardRequest::SetInterface
    );
    if no_data_stage && req.length != 0 {
        return Reply::Stall;
    }

    match request {
        StandardRequest::GetStatus => get_status(core, req),
        StandardRequest::ClearFeature => feature(core, phy, req, false),
        StandardRequest::SetFeature => feature(core, phy, req, true),
        StandardRequest::SetAddress => set_address(core, phy, req),
        StandardRequest::GetDescriptor => get_descriptor(core, req),
        StandardRequest::GetConfiguration => get_configuration(core),
        StandardRequest::SetConfiguration => set_configuration(core, phy, req),
        StandardRequest::GetInterface => get_interface(core, req),
        StandardRequest::SetInterface => set_interface(core, phy, req),
        // No descriptor is writable, and there are no synchronized
        // isochronous endpoints.
        StandardRequest::SetDescriptor | StandardRequest::SynchFrame => Reply::Stall,
    }
}

/// Answer a request with a small, fixed reply
fn reply<C>(core: &mut DeviceCore<'_, C>, bytes: &[u8]) -> Reply {
    core.control.reply_buffer()[..bytes.len()].copy_from_slice(bytes);
    Reply::In(bytes.len())
}

fn is_addressed<C>(core: &DeviceCore<'_, C>) -> bool {
    core.state >= DeviceState::Addressed
}

fn is_configured<C>(core: &DeviceCore<'_, C>) -> bool {
    core.state == DeviceState::Configured
}

/// A one-byte field carried in a two-byte request field
fn low_byte(field: u16) -> Option<u8> {
    u8::try_from(field).ok()
}

/// The interface in `wIndex` belongs to the active configuration
fn has_interface<C>(core: &DeviceCore<'_, C>, req: &Request) -> bool {
    is_configured(core)
        && low_byte(req.index).map_or(false, |interface| {
            core.descriptors
                .configuration(core.configuration)
                .map_or(false, |config| config.has_interface(interface))
        })
}

fn get_status<C>(core: &mut DeviceCore<'_, C>, req: &Request) -> Reply {
    match req.recipient {
        Recipient::Device => {
            let config = core
                .descriptors
                .configuration(core.configuration)
                .or_else(|| core.descriptors.configurations.first());
            let mut status = 0;
            if config.map_or(false, |config| {
                config
                    .attributes
                    .contains(descriptor::ConfigAttributes::SELF_POWERED)
            }) {
                status |= STATUS_SELF_POWERED;
            }
            if core.remote_wakeup_enabled {
                status |= STATUS_REMOTE_WAKEUP;
            }
            reply(core, &[status, 0])
        }
        Recipient::Interface if has_interface(core, req) => reply(core, &[0, 0]),
        Recipient::Endpoint => {
            let Some(ep) = low_byte(req.index).map(EndpointAddress::from) else {
                return Reply::Stall;
            };
            if ep.index() == 0 {
                return reply(core, &[0, 0]);
            }
            match core.endpoints.get(ep) {
                Some(info) if is_configured(core) => {
                    let status = if info.halted { STATUS_HALT } else { 0 };
                    reply(core, &[status, 0])
                }
                _ => Reply::Stall,
            }
        }
        _ => Reply::Stall,
    }
}

fn feature<P, C>(core: &mut DeviceCore<'_, C>, phy: &mut P, req: &Request, set: bool) -> Reply
where
    P: Phy,
{
    match (req.recipient, req.value) {
        (Recipient::Device, Request::FEATURE_DEVICE_REMOTE_WAKEUP) => {
            if set && !core.descriptors.supports_remote_wakeup() {
                return Reply::Stall;
            }
            core.remote_wakeup_enabled = set;
            debug!("REMOTE WAKEUP ENABLED {}", set);
            Reply::Status
        }
        (Recipient::Device, FEATURE_TEST_MODE) => Reply::Stall,
        (Recipient::Endpoint, Request::FEATURE_ENDPOINT_HALT) => {
            let Some(ep) = low_byte(req.index).map(EndpointAddress::from) else {
                return Reply::Stall;
            };
            if ep.index() == 0 {
                // Endpoint 0 can't be halted by the host; its stall clears
                // with the next SETUP packet.
                return if set { Reply::Stall } else { Reply::Status };
            }
            if is_configured(core) && core.endpoints.set_halted(phy, ep, set) {
                Reply::Status
            } else {
                Reply::Stall
            }
        }
        _ => Reply::Stall,
    }
}

fn set_address<P, C>(core: &mut DeviceCore<'_, C>, phy: &mut P, req: &Request) -> Reply
where
    P: Phy,
{
    if req.recipient != Recipient::Device || req.value > 127 || is_configured(core) {
        return Reply::Stall;
    }
    let address = req.value as u8;
    core.pending_address = Some(address);
    if P::SET_ADDRESS_BEFORE_STATUS {
        phy.set_address(address);
    }
    Reply::Status
}

fn get_descriptor<P, C>(core: &mut DeviceCore<'_, C>, req: &Request) -> Reply
where
    P: Phy,
    C: ClassHandler<P>,
{
    let (kind, index) = descriptor_type_index(req);
    let buffer = core.control.reply_buffer();
    let descriptors = &core.descriptors;
    let written = match (req.recipient, kind) {
        (Recipient::Device, descriptor_type::DEVICE) => {
            descriptor::device(descriptors, &core.device, buffer).ok()
        }
        (Recipient::Device, descriptor_type::CONFIGURATION) => descriptors
            .configurations
            .get(usize::from(index))
            .and_then(|config| descriptor::configuration(config, buffer).ok()),
        (Recipient::Device, descriptor_type::STRING) if index == 0 => {
            descriptor::languages(descriptors.lang_id, buffer).ok()
        }
        (Recipient::Device, descriptor_type::STRING) => descriptors
            .string(index)
            .and_then(|text| descriptor::string(text, buffer).ok()),
        (
            Recipient::Device,
            descriptor_type::INTERFACE
            | descriptor_type::ENDPOINT
            | DEVICE_QUALIFIER
            | OTHER_SPEED_CONFIGURATION,
        ) => None,
        _ => ClassHandler::<P>::get_descriptor(&mut core.class, req, buffer),
    };
    written.map_or(Reply::Stall, Reply::In)
}

fn get_configuration<C>(core: &mut DeviceCore<'_, C>) -> Reply {
    let value = if is_configured(core) {
        core.configuration
    } else {
        0
    };
    reply(core, &[value])
}

fn set_configuration<P, C>(core: &mut DeviceCore<'_, C>, phy: &mut P, req: &Request) -> Reply
where
    P: Phy,
    C: ClassHandler<P>,
{
    if !is_addressed(core) || req.recipient != Recipient::Device {
        return Reply::Stall;
    }
    match low_byte(req.value) {
        None => Reply::Stall,
        Some(0) => {
            core.deconfigure(phy);
            Reply::Status
        }
        Some(value) => match core.set_configuration(phy, value) {
            Ok(()) => Reply::Status,
            Err(_) => Reply::Stall,
        },
    }
}

fn get_interface<C>(core: &mut DeviceCore<'_, C>, req: &Request) -> Reply {
    if req.recipient != Recipient::Interface || !has_interface(core, req) {
        return Reply::Stall;
    }
    let alternate_setting = core
        .alternate_settings
        .get(usize::from(req.index))
        .copied()
        .unwrap_or(0);
    reply(core, &[alternate_setting])
}

fn set_interface<P, C>(core: &mut DeviceCore<'_, C>, phy: &mut P, req: &Request) -> Reply
where
    P: Phy,
    C: ClassHandler<P>,
{
    let (Some(interface), Some(alternate_setting)) = (low_byte(req.index), low_byte(req.value))
    else {
        return Reply::Stall;
    };
    if req.recipient != Recipient::Interface {
        return Reply::Stall;
    }
    match core.set_interface(phy, interface, alternate_setting) {
        Ok(()) => Reply::Status,
        Err(_) => Reply::Stall,
    }
}
