//! Event sink, and the interrupt-to-deferred handoff
//!
//! Hardware activity reaches the device core in two steps. In interrupt
//! context, a transceiver only captures what happened (see
//! [`EventCapture`](crate::EventCapture)) and raises a [`ProcessSignal`].
//! Later, outside of interrupt context, someone calls `process()`, and
//! the transceiver dispatches the captured activity as [`PhyEvents`].

use core::sync::atomic::{AtomicBool, Ordering};
use cortex_m::interrupt::InterruptNumber;
use usb_device::endpoint::EndpointAddress;

/// Callbacks a [`Phy`](crate::Phy) dispatches from `process()`
///
/// Every callback receives the transceiver that dispatched it, so that the
/// handler can respond with more I/O requests.
pub trait PhyEvents<P> {
    /// USB power was applied (`true`) or removed (`false`)
    fn power(&mut self, phy: &mut P, present: bool);
    /// The bus was suspended (`true`) or resumed (`false`)
    fn suspend(&mut self, phy: &mut P, suspended: bool);
    /// A start-of-frame was seen. Only dispatched while SOF is enabled.
    fn sof(&mut self, phy: &mut P, frame_number: u16);
    /// The host reset the bus
    fn reset(&mut self, phy: &mut P);
    /// A SETUP packet arrived on endpoint 0
    fn ep0_setup(&mut self, phy: &mut P);
    /// The packet requested by `ep0_read()` arrived
    fn ep0_out(&mut self, phy: &mut P);
    /// The packet written by `ep0_write()` was sent
    fn ep0_in(&mut self, phy: &mut P);
    /// A write on the non-zero IN endpoint `ep` completed
    fn endpoint_in(&mut self, phy: &mut P, ep: EndpointAddress);
    /// A read on the non-zero OUT endpoint `ep` completed
    fn endpoint_out(&mut self, phy: &mut P, ep: EndpointAddress);
}

/// Requests that `process()` runs soon
///
/// This is the only thing a transceiver may do from interrupt context
/// besides capturing raw events. Implementations must not run any
/// protocol logic.
pub trait ProcessSignal {
    /// Ask for `process()` to be called outside of interrupt context
    fn start_process(&self);
}

/// A "work pending" flag for polling loops
///
/// The interrupt handler raises the flag; the main loop calls
/// [`take()`](FlagSignal::take) and runs `process()` when it returns `true`.
///
/// ```
/// use usbd_core::{FlagSignal, ProcessSignal};
///
/// static WORK: FlagSignal = FlagSignal::new();
///
/// WORK.start_process(); // From the USB ISR
/// assert!(WORK.take());  // From the main loop
/// assert!(!WORK.take());
/// ```
#[derive(Debug, Default)]
pub struct FlagSignal(AtomicBool);

impl FlagSignal {
    /// Create a lowered flag
    pub const fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    /// Indicates if work is pending, without lowering the flag
    pub fn is_pending(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Lower the flag, returning `true` if work was pending
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

impl ProcessSignal for FlagSignal {
    fn start_process(&self) {
        self.0.store(true, Ordering::Release);
    }
}

/// Pends an interrupt to run `process()`
///
/// Use a spare, lower-priority interrupt as the deferred context. The USB
/// ISR captures events and pends it; the pended handler calls `process()`.
/// This keeps protocol processing out of the USB interrupt, bounding its
/// latency.
#[derive(Debug, Clone, Copy)]
pub struct PendInterrupt<I>(pub I);

impl<I: InterruptNumber> ProcessSignal for PendInterrupt<I> {
    fn start_process(&self) {
        cortex_m::peripheral::NVIC::pend(self.0);
    }
}
