//! Receive-side reassembly and flow-control window.
//!
//! [`ReassemblyBuffer`] turns DATA segments arriving in any order into an
//! ordered byte stream:
//!
//! - Segments ahead of `next_expected` are **buffered**, bounded by the
//!   advertised window (in bytes).
//! - Whenever the segment starting at `next_expected` is present, it and every
//!   contiguous successor are **flushed** to the delivered stream.
//! - Duplicates (already buffered, or already delivered and now behind
//!   `next_expected`) change nothing.
//! - After every accepted or duplicate segment the caller replies with a
//!   cumulative ACK carrying [`ReassemblyBuffer::next_expected`].
//!
//! This module only manages state; all socket I/O is the caller's
//! responsibility.

use std::collections::VecDeque;

use crate::seq;

/// An out-of-order segment waiting for the gap before it to fill.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSegment {
    pub seqno: u16,
    pub payload: Vec<u8>,
}

/// What happened to one inbound DATA segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataOutcome {
    /// Payload larger than the remaining window; dropped without an ACK.
    WindowOverflow,
    /// New data, buffered or delivered.  `delivered` counts the bytes flushed
    /// to the output stream by this segment (0 if it filled no gap).
    Accepted { ack: u16, delivered: usize },
    /// Data seen before; nothing changed.
    Duplicate { ack: u16 },
}

impl DataOutcome {
    /// Cumulative ACK to send back, if any.
    pub fn ack(&self) -> Option<u16> {
        match *self {
            DataOutcome::WindowOverflow => None,
            DataOutcome::Accepted { ack, .. } | DataOutcome::Duplicate { ack } => Some(ack),
        }
    }
}

/// Receive-side state for one connection.
#[derive(Debug)]
pub struct ReassemblyBuffer {
    /// Next in-order byte expected from the peer.
    next_expected: u16,
    /// Advertised window in bytes.
    window: usize,
    /// `window` minus the bytes held in `pending`.
    remaining: usize,
    /// Out-of-order segments ordered by distance from `next_expected`.
    pending: VecDeque<PendingSegment>,
    /// In-order bytes not yet taken by the consumer.
    delivered: VecDeque<u8>,
}

impl ReassemblyBuffer {
    /// Create an empty buffer expecting `next_expected` first.
    ///
    /// After the handshake this is the peer's SYN sequence number plus one.
    pub fn new(next_expected: u16, window: usize) -> Self {
        Self {
            next_expected,
            window,
            remaining: window,
            pending: VecDeque::new(),
            delivered: VecDeque::new(),
        }
    }

    pub fn next_expected(&self) -> u16 {
        self.next_expected
    }

    /// Bytes still available for out-of-order buffering.
    pub fn remaining_window(&self) -> usize {
        self.remaining
    }

    /// Bytes held out of order, waiting for a gap to fill.
    pub fn buffered_bytes(&self) -> usize {
        self.window - self.remaining
    }

    pub fn pending_segments(&self) -> usize {
        self.pending.len()
    }

    /// Process an inbound DATA segment.
    pub fn on_data(&mut self, seqno: u16, payload: &[u8]) -> DataOutcome {
        let len = payload.len();
        let in_order = seqno == self.next_expected;

        // The in-order segment is flushed straight away and never occupies
        // the window, so it is admitted even when the window is full.
        if len > self.remaining && !in_order {
            return DataOutcome::WindowOverflow;
        }

        if !seq::in_receive_window(seqno, self.next_expected, self.window) {
            return DataOutcome::Duplicate {
                ack: self.next_expected,
            };
        }

        if in_order {
            self.deliver(payload);
        } else {
            let offset = seq::distance(self.next_expected, seqno);
            let idx = self
                .pending
                .partition_point(|p| seq::distance(self.next_expected, p.seqno) < offset);
            if self.pending.get(idx).is_some_and(|p| p.seqno == seqno) {
                return DataOutcome::Duplicate {
                    ack: self.next_expected,
                };
            }
            self.pending.insert(
                idx,
                PendingSegment {
                    seqno,
                    payload: payload.to_vec(),
                },
            );
            self.remaining -= len;
        }

        let direct = if in_order { len } else { 0 };
        let delivered = direct + self.flush();
        DataOutcome::Accepted {
            ack: self.next_expected,
            delivered,
        }
    }

    /// Advance past a FIN (one sequence unit) and return the ACK for it.
    ///
    /// A FIN that is not at `next_expected` is acknowledged at face value
    /// without moving the stream.
    pub fn on_fin(&mut self, fin_seq: u16) -> u16 {
        let ack = seq::advance(fin_seq, 1);
        if fin_seq == self.next_expected {
            self.next_expected = ack;
        }
        ack
    }

    /// Drain every in-order byte delivered so far.
    pub fn take_delivered(&mut self) -> Vec<u8> {
        self.delivered.drain(..).collect()
    }

    fn deliver(&mut self, payload: &[u8]) {
        self.delivered.extend(payload.iter().copied());
        self.next_expected = seq::advance(self.next_expected, payload.len());
    }

    /// Move every contiguous pending segment to the delivered stream.
    fn flush(&mut self) -> usize {
        let mut flushed = 0;
        while self
            .pending
            .front()
            .is_some_and(|p| p.seqno == self.next_expected)
        {
            let Some(seg) = self.pending.pop_front() else {
                break;
            };
            self.remaining += seg.payload.len();
            flushed += seg.payload.len();
            self.deliver(&seg.payload);
        }
        flushed
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
