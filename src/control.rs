//! Control transfers on endpoint 0
//!
//! [`ControlPipe`] owns the single control transfer context, and moves
//! data through endpoint 0 in max packet sized chunks. It doesn't know what
//! requests mean; the device decides that, and tells the pipe how to
//! respond.

use core::cmp::min;

use crate::{phy::Phy, setup, CONTROL_BUFFER_SIZE};
use usb_device::{control::Request, UsbDirection};

/// Control transfer stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// No control transfer in progress
    Idle,
    /// Sending data to the host
    DataIn,
    /// Receiving data from the host
    DataOut,
    /// Waiting for the status stage to complete. The direction is the
    /// direction of the status packet.
    Status(UsbDirection),
}

/// How the device responds to a SETUP packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// Reject the request
    Stall,
    /// Complete a request that has no data stage
    Status,
    /// Send the first `n` bytes of the control buffer
    In(usize),
    /// Receive the data stage into the control buffer
    Out,
}

/// Something the device needs to act on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The OUT data stage is in the buffer. Respond with
    /// [`accept()`](ControlPipe::accept) or [`reject()`](ControlPipe::reject).
    DataReceived(Request),
    /// The status stage completed; the request is done
    Complete(Request),
}

/// The endpoint 0 data pump
#[derive(Debug)]
pub struct ControlPipe {
    buffer: [u8; CONTROL_BUFFER_SIZE],
    stage: Stage,
    request: Option<Request>,
    /// Bytes to send, or to receive
    len: usize,
    /// Bytes sent, or received
    position: usize,
    /// The IN data stage ends with a zero-length packet
    zlp: bool,
    /// The last IN packet of the data stage was written
    last_sent: bool,
    max_packet: usize,
}

impl ControlPipe {
    pub const fn new(max_packet: u16) -> Self {
        Self {
            buffer: [0; CONTROL_BUFFER_SIZE],
            stage: Stage::Idle,
            request: None,
            len: 0,
            position: 0,
            zlp: false,
            last_sent: false,
            max_packet: max_packet as usize,
        }
    }

    pub fn set_max_packet(&mut self, max_packet: u16) {
        self.max_packet = usize::from(max_packet).max(1);
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// The request that owns the current control transfer
    pub fn request(&self) -> Option<&Request> {
        self.request.as_ref()
    }

    /// Drop any in-flight transfer
    pub fn reset(&mut self) {
        self.stage = Stage::Idle;
        self.request = None;
        self.len = 0;
        self.position = 0;
        self.zlp = false;
        self.last_sent = false;
    }

    /// Read and decode a new SETUP packet
    ///
    /// Any transfer in progress is discarded.
    pub fn setup<P: Phy>(&mut self, phy: &mut P) -> Request {
        let mut packet = [0; 8];
        phy.ep0_setup_read_result(&mut packet);
        let req = setup::parse(&packet);
        if self.stage != Stage::Idle {
            debug!("EP0 SETUP DISCARDS {:?}", self.stage);
        }
        self.reset();
        self.request = Some(req);
        trace!("EP0 SETUP {:?}", req);
        req
    }

    /// The buffer for a reply to the current IN request
    ///
    /// Replies longer than the request's `wLength` are cut short when
    /// they're sent.
    pub fn reply_buffer(&mut self) -> &mut [u8] {
        &mut self.buffer
    }

    /// Data received in the OUT data stage
    pub fn data(&self) -> &[u8] {
        &self.buffer[..self.position]
    }

    /// Respond to the current SETUP packet
    pub fn respond<P: Phy>(&mut self, phy: &mut P, reply: Reply) {
        let Some(req) = self.request else {
            return;
        };
        match reply {
            Reply::Stall => self.reject(phy),
            Reply::Status => self.accept(phy),
            // Without a data stage, the status stage is always IN.
            Reply::In(_) if req.length == 0 => self.accept(phy),
            Reply::In(len) => {
                let length = usize::from(req.length);
                self.len = min(min(len, length), CONTROL_BUFFER_SIZE);
                self.position = 0;
                self.zlp = self.len < length && self.len % self.max_packet == 0;
                self.last_sent = false;
                self.stage = Stage::DataIn;
                self.send_in(phy);
            }
            Reply::Out => {
                let length = usize::from(req.length);
                if length > CONTROL_BUFFER_SIZE {
                    warn!("EP0 OUT {} EXCEEDS BUFFER", length);
                    self.reject(phy);
                } else if length == 0 {
                    self.accept(phy);
                } else {
                    self.len = length;
                    self.position = 0;
                    self.stage = Stage::DataOut;
                    phy.ep0_read(self.max_packet);
                }
            }
        }
    }

    /// Acknowledge the request with a zero-length status packet
    pub fn accept<P: Phy>(&mut self, phy: &mut P) {
        self.stage = Stage::Status(UsbDirection::In);
        phy.ep0_write(&[]);
    }

    /// Stall endpoint 0, and drop the request
    ///
    /// The stall clears when the next SETUP packet arrives.
    pub fn reject<P: Phy>(&mut self, phy: &mut P) {
        debug!("EP0 STALL {:?}", self.request);
        phy.ep0_stall();
        self.reset();
    }

    /// Write the next IN packet
    ///
    /// The status stage read is armed together with the last packet, so that
    /// a lost acknowledgement of that packet can't wedge the transfer.
    fn send_in<P: Phy>(&mut self, phy: &mut P) {
        let chunk = min(self.max_packet, self.len - self.position);
        let start = self.position;
        self.position += chunk;
        let last = chunk < self.max_packet || (self.position == self.len && !self.zlp);
        if chunk == 0 {
            self.zlp = false;
        }
        if last {
            self.last_sent = true;
            phy.ep0_read(self.max_packet);
        }
        trace!("EP0 IN {}", chunk);
        phy.ep0_write(&self.buffer[start..start + chunk]);
    }

    /// Endpoint 0 finished sending a packet
    pub fn in_complete<P: Phy>(&mut self, phy: &mut P) -> Option<Completion> {
        match self.stage {
            Stage::DataIn if self.last_sent => {
                self.stage = Stage::Status(UsbDirection::Out);
                None
            }
            Stage::DataIn => {
                self.send_in(phy);
                None
            }
            Stage::Status(UsbDirection::In) => {
                let req = self.request?;
                self.reset();
                Some(Completion::Complete(req))
            }
            _ => None,
        }
    }

    /// Endpoint 0 received a packet
    pub fn out_complete<P: Phy>(&mut self, phy: &mut P) -> Option<Completion> {
        match self.stage {
            Stage::DataOut => {
                let read = phy.ep0_read_result(&mut self.buffer[self.position..self.len]);
                self.position += read;
                trace!("EP0 OUT {}", read);
                if read < self.max_packet || self.position >= self.len {
                    Some(Completion::DataReceived(self.request?))
                } else {
                    phy.ep0_read(self.max_packet);
                    None
                }
            }
            // The host may finish the status stage before the device sees the
            // last IN packet's acknowledgement.
            Stage::Status(UsbDirection::Out) | Stage::DataIn if self.last_sent => {
                let mut status = [0; 0];
                phy.ep0_read_result(&mut status);
                let req = self.request?;
                self.reset();
                Some(Completion::Complete(req))
            }
            _ => None,
        }
    }
}
