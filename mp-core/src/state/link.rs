//! Half-duplex link discipline: one frame in flight, the rest wait.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::frame::Frame;
use crate::message::Command;

/// Who a frame was sent for. Replies carry the owner of the frame they
/// answer, which is how late replies to a finished request are spotted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    /// Keepalive and connect probes.
    Session,
    /// The authentication request with this id.
    Request(u64),
    /// The running bulk transfer or maintenance command.
    Transfer,
}

/// A frame on its way to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outgoing {
    pub command: Command,
    pub frame: Frame,
    pub owner: Owner,
}

/// The frame currently waiting for a reply.
#[derive(Debug, Clone, Copy)]
pub struct InFlight {
    pub command: Command,
    pub owner: Owner,
    pub sent_at: Instant,
}

impl InFlight {
    pub fn deadline(&self, timeout: Duration) -> Instant {
        self.sent_at + timeout
    }
}

#[derive(Debug, Default)]
pub struct Link {
    in_flight: Option<InFlight>,
    outbox: VecDeque<Outgoing>,
}

impl Link {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` when nothing is waiting for a reply.
    pub fn is_idle(&self) -> bool {
        self.in_flight.is_none()
    }

    pub fn in_flight(&self) -> Option<&InFlight> {
        self.in_flight.as_ref()
    }

    pub fn queued(&self) -> usize {
        self.outbox.len()
    }

    /// Offer a frame to the link. Returns it back when it may go out now;
    /// otherwise it waits in the outbox.
    pub fn submit(&mut self, out: Outgoing, now: Instant) -> Option<Frame> {
        if self.in_flight.is_some() {
            self.outbox.push_back(out);
            return None;
        }
        Some(self.mark_sent(out, now))
    }

    /// A reply arrived: release the in-flight slot and hand out the next
    /// waiting frame, if any. Returns the owner of the answered frame.
    pub fn on_reply(&mut self, now: Instant) -> (Option<InFlight>, Option<Frame>) {
        let answered = self.in_flight.take();
        let next = self.outbox.pop_front().map(|out| self.mark_sent(out, now));
        (answered, next)
    }

    /// Forget everything in flight or queued.
    pub fn clear(&mut self) {
        self.in_flight = None;
        self.outbox.clear();
    }

    fn mark_sent(&mut self, out: Outgoing, now: Instant) -> Frame {
        self.in_flight = Some(InFlight {
            command: out.command,
            owner: out.owner,
            sent_at: now,
        });
        out.frame
    }
}
