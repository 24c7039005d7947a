//! Endpoint resource table
//!
//! An [`EndpointTable`] describes which endpoints a transceiver can realize.
//! There's one [`EndpointSlot`] per endpoint number; the slot says which
//! transfer types and directions that endpoint number supports, and how
//! large its packets may be. All slots share one pool of packet memory.
//!
//! Every combination of endpoints admitted by the table must be usable at
//! the same time.

use crate::phy::TransferType;
use usb_device::{endpoint::EndpointAddress, UsbDirection, UsbError};

/// Number of endpoint numbers a table describes
pub const SLOT_COUNT: usize = 16;

bitflags::bitflags! {
    /// The transfer types an endpoint slot supports
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SlotKinds: u8 {
        const CONTROL = 1 << 0;
        const ISOCHRONOUS = 1 << 1;
        const BULK = 1 << 2;
        const INTERRUPT = 1 << 3;
    }
}

impl SlotKinds {
    /// Non-control transfers
    pub const DATA: Self = Self::ISOCHRONOUS.union(Self::BULK).union(Self::INTERRUPT);

    /// Indicates if the slot supports `kind`
    pub fn supports(self, kind: TransferType) -> bool {
        self.contains(match kind {
            TransferType::Control => Self::CONTROL,
            TransferType::Isochronous => Self::ISOCHRONOUS,
            TransferType::Bulk => Self::BULK,
            TransferType::Interrupt => Self::INTERRUPT,
        })
    }
}

/// Which directions of an endpoint number the hardware provides
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotDirection {
    /// Only the IN endpoint
    In,
    /// Only the OUT endpoint
    Out,
    /// Both the IN and OUT endpoints, at the same time
    InAndOut,
    /// Either the IN or the OUT endpoint, but not both at once
    InOrOut,
}

impl SlotDirection {
    fn allows(self, direction: UsbDirection) -> bool {
        match (self, direction) {
            (Self::In, UsbDirection::Out) | (Self::Out, UsbDirection::In) => false,
            _ => true,
        }
    }
}

/// Constraints on a single endpoint number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointSlot {
    /// Supported transfer types
    pub kinds: SlotKinds,
    /// Supported directions
    pub direction: SlotDirection,
    /// Largest supported max packet size
    pub max_packet_size: u16,
}

impl EndpointSlot {
    /// A slot that supports nothing
    pub const UNUSED: Self = Self {
        kinds: SlotKinds::empty(),
        direction: SlotDirection::InAndOut,
        max_packet_size: 0,
    };
}

/// Describes every endpoint a transceiver can realize
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointTable {
    /// Packet memory shared by all non-zero endpoints, in bytes
    ///
    /// Each added endpoint consumes its max packet size.
    pub buffer_bytes: u32,
    /// One slot per endpoint number; slot 0 describes endpoint 0
    pub slots: [EndpointSlot; SLOT_COUNT],
}

/// Packet size used when checking the concurrency minimum
const MINIMUM_PACKET_SIZE: u16 = 64;

impl EndpointTable {
    /// Returns the slot for `ep`'s endpoint number
    pub fn slot(&self, ep: EndpointAddress) -> &EndpointSlot {
        &self.slots[ep.index() % SLOT_COUNT]
    }

    /// Indicates if the table describes `ep` with `kind` and `max_packet`
    ///
    /// This only checks the slot. See [`admits()`](Self::admits) to also check
    /// the rest of the active endpoints.
    pub fn supports(&self, ep: EndpointAddress, max_packet: u16, kind: TransferType) -> bool {
        let slot = self.slot(ep);
        ep.index() < SLOT_COUNT
            && slot.kinds.supports(kind)
            && slot.direction.allows(ep.direction())
            && max_packet <= slot.max_packet_size
    }

    /// Check if `ep` can be added next to the `active` endpoints
    ///
    /// `active` produces the address and max packet size of every non-zero
    /// endpoint that's already added.
    pub fn admits<A>(
        &self,
        active: A,
        ep: EndpointAddress,
        max_packet: u16,
        kind: TransferType,
    ) -> Result<(), UsbError>
    where
        A: IntoIterator<Item = (EndpointAddress, u16)>,
    {
        if ep.index() == 0 || ep.index() >= SLOT_COUNT {
            return Err(UsbError::InvalidEndpoint);
        }
        let slot = self.slot(ep);
        if !slot.kinds.supports(kind) || !slot.direction.allows(ep.direction()) {
            return Err(UsbError::Unsupported);
        }
        if max_packet > slot.max_packet_size {
            return Err(UsbError::EndpointMemoryOverflow);
        }

        let mut used = u32::from(max_packet);
        for (addr, size) in active {
            if addr.index() == ep.index() {
                if addr.direction() == ep.direction()
                    || slot.direction == SlotDirection::InOrOut
                {
                    return Err(UsbError::EndpointOverflow);
                }
            }
            used += u32::from(size);
        }

        if used > self.buffer_bytes {
            Err(UsbError::EndpointMemoryOverflow)
        } else {
            Ok(())
        }
    }

    /// Indicates if the table meets the concurrency minimum
    ///
    /// That's a control endpoint 0, and one isochronous, one interrupt and one
    /// bulk endpoint in each direction, all at the same time, each with a
    /// 64 byte max packet size.
    pub fn guarantees_minimum(&self) -> bool {
        let ep0 = &self.slots[0];
        if !ep0.kinds.contains(SlotKinds::CONTROL)
            || ep0.direction != SlotDirection::InAndOut
            || ep0.max_packet_size < 8
        {
            return false;
        }

        const WANTED: [(TransferType, UsbDirection); 6] = [
            (TransferType::Isochronous, UsbDirection::In),
            (TransferType::Isochronous, UsbDirection::Out),
            (TransferType::Interrupt, UsbDirection::In),
            (TransferType::Interrupt, UsbDirection::Out),
            (TransferType::Bulk, UsbDirection::In),
            (TransferType::Bulk, UsbDirection::Out),
        ];

        let mut chosen: [Option<(EndpointAddress, u16)>; WANTED.len()] = [None; WANTED.len()];
        for (idx, &(kind, direction)) in WANTED.iter().enumerate() {
            let found = (1..SLOT_COUNT)
                .map(|number| EndpointAddress::from_parts(number, direction))
                .find(|&ep| {
                    self.admits(
                        chosen[..idx].iter().flatten().copied(),
                        ep,
                        MINIMUM_PACKET_SIZE,
                        kind,
                    )
                    .is_ok()
                });
            match found {
                Some(ep) => chosen[idx] = Some((ep, MINIMUM_PACKET_SIZE)),
                None => return false,
            }
        }
        true
    }
}
