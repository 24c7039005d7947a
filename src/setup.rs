//! SETUP packet decoding and request classification

use usb_device::{
    control::{Recipient, Request, RequestType},
    UsbDirection,
};

/// Decode an 8 byte SETUP packet
pub fn parse(packet: &[u8; 8]) -> Request {
    let request_type = packet[0];
    Request {
        direction: if request_type & 0x80 != 0 {
            UsbDirection::In
        } else {
            UsbDirection::Out
        },
        request_type: match (request_type >> 5) & 0b11 {
            0 => RequestType::Standard,
            1 => RequestType::Class,
            2 => RequestType::Vendor,
            _ => RequestType::Reserved,
        },
        recipient: match request_type & 0b1_1111 {
            0 => Recipient::Device,
            1 => Recipient::Interface,
            2 => Recipient::Endpoint,
            3 => Recipient::Other,
            _ => Recipient::Reserved,
        },
        request: packet[1],
        value: u16::from_le_bytes([packet[2], packet[3]]),
        index: u16::from_le_bytes([packet[4], packet[5]]),
        length: u16::from_le_bytes([packet[6], packet[7]]),
    }
}

/// The requests defined in chapter 9 of the USB 2.0 specification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StandardRequest {
    GetStatus,
    ClearFeature,
    SetFeature,
    SetAddress,
    GetDescriptor,
    SetDescriptor,
    GetConfiguration,
    SetConfiguration,
    GetInterface,
    SetInterface,
    SynchFrame,
}

/// Standard requests, indexed by `bRequest`, with their data stage direction
///
/// `None` entries are reserved request codes.
const STANDARD: [Option<(StandardRequest, UsbDirection)>; 13] = {
    use StandardRequest::*;
    use UsbDirection::{In, Out};
    [
        Some((GetStatus, In)),         // 0x00
        Some((ClearFeature, Out)),     // 0x01
        None,                          // 0x02
        Some((SetFeature, Out)),       // 0x03
        None,                          // 0x04
        Some((SetAddress, Out)),       // 0x05
        Some((GetDescriptor, In)),     // 0x06
        Some((SetDescriptor, Out)),    // 0x07
        Some((GetConfiguration, In)),  // 0x08
        Some((SetConfiguration, Out)), // 0x09
        Some((GetInterface, In)),      // 0x0A
        Some((SetInterface, Out)),     // 0x0B
        Some((SynchFrame, In)),        // 0x0C
    ]
};

/// Who handles a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// Handled by the device core
    Standard(StandardRequest),
    /// Forwarded to the class handler
    Class,
    /// Forwarded to the class handler
    Vendor,
    /// Reserved type, unknown standard request, or a standard request
    /// with the wrong direction. Always stalls.
    Invalid,
}

/// Classify a decoded request
pub fn classify(req: &Request) -> Kind {
    match req.request_type {
        RequestType::Standard => STANDARD
            .get(usize::from(req.request))
            .copied()
            .flatten()
            .filter(|&(_, direction)| direction == req.direction)
            .map_or(Kind::Invalid, |(standard, _)| Kind::Standard(standard)),
        RequestType::Class => Kind::Class,
        RequestType::Vendor => Kind::Vendor,
        RequestType::Reserved => Kind::Invalid,
    }
}

/// Split a GetDescriptor `wValue` into the descriptor type and index
pub fn descriptor_type_index(req: &Request) -> (u8, u8) {
    ((req.value >> 8) as u8, req.value as u8)
}
