//! Interrupt-safe event capture
//!
//! An [`EventCapture`] is the only memory shared between a transceiver's
//! interrupt handler and the deferred `process()` context. The interrupt
//! handler is the single producer: it records what the hardware signaled,
//! then raises a [`ProcessSignal`](crate::ProcessSignal). `process()` is
//! the single consumer: it [`drain()`](EventCapture::drain)s the capture and
//! [`dispatch()`](Captured::dispatch)es the result.
//!
//! Repeated occurrences of the same event before a drain coalesce. That's
//! intended for duplicate SETUP packets: only the most recent SETUP packet
//! is still in the hardware's setup buffer, so the core sees it once.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::events::PhyEvents;
use usb_device::{endpoint::EndpointAddress, UsbDirection};

bitflags::bitflags! {
    /// Bus-level events waiting for dispatch
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Pending: u32 {
        /// VBUS changed
        const POWER = 1 << 0;
        /// VBUS was removed, even if it's since been restored
        const POWER_LOST = 1 << 6;
        /// Bus reset
        const RESET = 1 << 1;
        /// Bus went idle
        const SUSPEND = 1 << 2;
        /// Bus activity resumed
        const RESUME = 1 << 3;
        /// Start of frame
        const SOF = 1 << 4;
        /// SETUP packet on endpoint 0
        const SETUP = 1 << 5;
    }
}

/// Events recorded from interrupt context
///
/// Allocate one per transceiver, typically in a `static`, and share it
/// between the interrupt handler and the transceiver.
///
/// ```
/// use usbd_core::EventCapture;
///
/// static CAPTURE: EventCapture = EventCapture::new();
///
/// // USB ISR:
/// CAPTURE.setup();
/// CAPTURE.ep_in(0);
///
/// // process():
/// let captured = CAPTURE.drain();
/// assert!(!captured.is_empty());
/// assert!(CAPTURE.drain().is_empty());
/// ```
#[derive(Debug, Default)]
pub struct EventCapture {
    pending: AtomicU32,
    powered: AtomicBool,
    suspended: AtomicBool,
    frame: AtomicU32,
    /// Bit N is set when a write on IN endpoint N completed
    ep_in: AtomicU32,
    /// Bit N is set when a read on OUT endpoint N completed
    ep_out: AtomicU32,
}

impl EventCapture {
    /// Create an empty capture
    pub const fn new() -> Self {
        Self {
            pending: AtomicU32::new(0),
            powered: AtomicBool::new(false),
            suspended: AtomicBool::new(false),
            frame: AtomicU32::new(0),
            ep_in: AtomicU32::new(0),
            ep_out: AtomicU32::new(0),
        }
    }

    fn raise(&self, pending: Pending) {
        self.pending.fetch_or(pending.bits(), Ordering::AcqRel);
    }

    /// VBUS was applied or removed
    ///
    /// Removing VBUS ends the bus session, so everything captured before it
    /// is discarded. The loss is kept even if VBUS returns before the next
    /// drain.
    pub fn power(&self, present: bool) {
        self.powered.store(present, Ordering::Release);
        if present {
            self.raise(Pending::POWER);
        } else {
            self.ep_in.store(0, Ordering::Release);
            self.ep_out.store(0, Ordering::Release);
            self.pending.fetch_and(Pending::POWER_LOST.bits(), Ordering::AcqRel);
            self.suspended.store(false, Ordering::Release);
            self.raise(Pending::POWER | Pending::POWER_LOST);
        }
    }

    /// The host reset the bus
    ///
    /// Everything captured before the reset belongs to the previous bus
    /// session, and is discarded. Power state survives.
    pub fn reset(&self) {
        self.ep_in.store(0, Ordering::Release);
        self.ep_out.store(0, Ordering::Release);
        self.pending.fetch_and(
            (Pending::POWER | Pending::POWER_LOST).bits(),
            Ordering::AcqRel,
        );
        self.suspended.store(false, Ordering::Release);
        self.raise(Pending::RESET);
    }

    /// The bus was suspended (`true`) or resumed (`false`)
    pub fn suspend(&self, suspended: bool) {
        self.suspended.store(suspended, Ordering::Release);
        self.raise(if suspended {
            Pending::SUSPEND
        } else {
            Pending::RESUME
        });
    }

    /// A start of frame with the given frame number
    pub fn sof(&self, frame_number: u16) {
        self.frame.store(frame_number.into(), Ordering::Release);
        self.raise(Pending::SOF);
    }

    /// A SETUP packet is waiting in the endpoint 0 setup buffer
    pub fn setup(&self) {
        self.raise(Pending::SETUP);
    }

    /// A write completed on IN endpoint `number`, which may be 0
    pub fn ep_in(&self, number: u8) {
        self.ep_in.fetch_or(1 << (number & 0xF), Ordering::AcqRel);
    }

    /// A read completed on OUT endpoint `number`, which may be 0
    pub fn ep_out(&self, number: u8) {
        self.ep_out.fetch_or(1 << (number & 0xF), Ordering::AcqRel);
    }

    /// Take everything captured so far
    ///
    /// The bus events are taken before the endpoint completions. A reset or
    /// power loss that interrupts the drain clears the completion masks, and
    /// the transceiver can't complete a transfer again until the core
    /// handles that event, so this drain never carries a completion from the
    /// wrong session.
    pub fn drain(&self) -> Captured {
        let pending = Pending::from_bits_truncate(self.pending.swap(0, Ordering::AcqRel));
        Captured {
            pending,
            powered: self.powered.load(Ordering::Acquire),
            suspended: self.suspended.load(Ordering::Acquire),
            frame: self.frame.load(Ordering::Acquire) as u16,
            ep_in: self.ep_in.swap(0, Ordering::AcqRel) as u16,
            ep_out: self.ep_out.swap(0, Ordering::AcqRel) as u16,
        }
    }
}

/// A snapshot of captured events, ready for dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Captured {
    pending: Pending,
    powered: bool,
    suspended: bool,
    frame: u16,
    ep_in: u16,
    ep_out: u16,
}

impl Captured {
    /// Indicates if there's nothing to dispatch
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.ep_in == 0 && self.ep_out == 0
    }

    /// Dispatch the events, in precedence order
    ///
    /// 1. power; a loss is dispatched before a restore, and nothing else is
    ///    dispatched if power is still removed
    /// 2. reset
    /// 3. suspend / resume
    /// 4. start of frame
    /// 5. IN completions, endpoint 0 first
    /// 6. OUT completions, endpoint 0 first
    /// 7. SETUP
    ///
    /// IN completions precede OUT completions so that a slow consumer can't
    /// stall a producer that's mid-handshake. Completions precede SETUP so
    /// that a completion from the previous control transfer is never
    /// applied to the new one.
    pub fn dispatch<P, E: PhyEvents<P>>(self, phy: &mut P, events: &mut E) {
        if self.pending.contains(Pending::POWER_LOST) {
            events.power(phy, false);
            if !self.powered {
                return;
            }
            events.power(phy, true);
        } else if self.pending.contains(Pending::POWER) {
            events.power(phy, self.powered);
            if !self.powered {
                return;
            }
        }

        if self.pending.contains(Pending::RESET) {
            events.reset(phy);
        }

        match (
            self.pending.contains(Pending::SUSPEND),
            self.pending.contains(Pending::RESUME),
        ) {
            (true, true) => {
                events.suspend(phy, !self.suspended);
                events.suspend(phy, self.suspended);
            }
            (true, false) => events.suspend(phy, true),
            (false, true) => events.suspend(phy, false),
            (false, false) => {}
        }

        if self.pending.contains(Pending::SOF) {
            events.sof(phy, self.frame);
        }

        for number in bits(self.ep_in) {
            if number == 0 {
                events.ep0_in(phy);
            } else {
                events.endpoint_in(phy, EndpointAddress::from_parts(number, UsbDirection::In));
            }
        }

        for number in bits(self.ep_out) {
            if number == 0 {
                events.ep0_out(phy);
            } else {
                events.endpoint_out(phy, EndpointAddress::from_parts(number, UsbDirection::Out));
            }
        }

        if self.pending.contains(Pending::SETUP) {
            events.ep0_setup(phy);
        }
    }
}

/// Iterate the set bits of `mask`, lowest first
fn bits(mut mask: u16) -> impl Iterator<Item = usize> {
    core::iter::from_fn(move || {
        if mask == 0 {
            None
        } else {
            let number = mask.trailing_zeros() as usize;
            mask &= mask - 1;
            Some(number)
        }
    })
}
