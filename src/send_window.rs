//! Send-side sliding window.
//!
//! [`SendWindow`] holds every segment that has been handed to the network but
//! not yet cumulatively acknowledged.  The window is measured in **payload
//! bytes**: at most `max_window` bytes of DATA may be outstanding at once.
//!
//! # Protocol contract
//!
//! - Each entry is keyed by the sequence number an ACK for it would carry,
//!   i.e. `advance(seqno, sequence_len)`.
//! - ACKs are **cumulative**: acknowledging `K` removes every entry whose key
//!   is not after `K` (measured from the window base).
//! - Three consecutive ACKs carrying the same number trigger a single fast
//!   retransmission of the oldest entry.
//!
//! This module only manages state; all socket I/O and timer scheduling is the
//! caller's responsibility.

use std::collections::VecDeque;

use crate::packet::Segment;
use crate::seq;

/// Identical ACKs in a row that trigger a fast retransmit.
pub const DUP_ACK_THRESHOLD: u32 = 3;

// ---------------------------------------------------------------------------
// UnackedEntry
// ---------------------------------------------------------------------------

/// A single in-flight segment.
#[derive(Debug, Clone)]
pub struct UnackedEntry {
    /// Sequence number carried by the segment itself.
    pub seqno: u16,
    /// Sequence number an ACK covering this segment carries.
    pub ack_key: u16,
    /// Encoded segment, resent verbatim on retransmission.
    pub bytes: Vec<u8>,
    /// DATA payload length (0 for SYN/FIN).
    pub payload_len: usize,
}

// ---------------------------------------------------------------------------
// AckOutcome
// ---------------------------------------------------------------------------

/// What a single inbound ACK did to the window.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AckOutcome {
    /// Entries removed by this ACK.
    pub acked_segments: usize,
    /// Payload bytes returned to the window.
    pub freed_bytes: usize,
    /// The ACK acknowledged nothing new.
    pub duplicate: bool,
    /// Encoded oldest entry to resend immediately (fast retransmit).
    pub fast_retransmit: Option<Vec<u8>>,
}

impl AckOutcome {
    pub fn advanced(&self) -> bool {
        self.acked_segments > 0
    }
}

// ---------------------------------------------------------------------------
// SendWindow
// ---------------------------------------------------------------------------

/// Unacknowledged-segment manager for one connection.
///
/// # Sequence-number layout
///
/// ```text
///  send_base          next_seq
///      │                  │
///  ────┼──────────────────┼──────────────────▶ seq space (mod 65536)
///      │ <── in flight ──▶│ <── sendable ───▶
/// ```
#[derive(Debug)]
pub struct SendWindow {
    /// First sequence number not yet acknowledged (left window edge).
    send_base: u16,
    /// Sequence number to use for the next new segment.
    next_seq: u16,
    max_window: usize,
    /// `max_window` minus the payload bytes currently in flight.
    remaining: usize,
    /// In-flight segments in transmission order (front = oldest).
    entries: VecDeque<UnackedEntry>,
    last_ack: Option<u16>,
    dup_run: u32,
}

impl SendWindow {
    /// Create an empty window whose first segment will carry `initial_seq`.
    pub fn new(initial_seq: u16, max_window: usize) -> Self {
        Self {
            send_base: initial_seq,
            next_seq: initial_seq,
            max_window,
            remaining: max_window,
            entries: VecDeque::new(),
            last_ack: None,
            dup_run: 0,
        }
    }

    pub fn next_seq(&self) -> u16 {
        self.next_seq
    }

    pub fn send_base(&self) -> u16 {
        self.send_base
    }

    /// Payload bytes that may still be put in flight.
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    /// Payload bytes currently awaiting acknowledgement.
    pub fn outstanding_bytes(&self) -> usize {
        self.max_window - self.remaining
    }

    /// `true` when a DATA segment of `len` payload bytes fits.
    pub fn has_capacity(&self, len: usize) -> bool {
        len <= self.remaining
    }

    pub fn in_flight(&self) -> usize {
        self.entries.len()
    }

    pub fn has_unacked(&self) -> bool {
        !self.entries.is_empty()
    }

    /// Oldest unacknowledged entry, the one the retransmission timer guards.
    pub fn oldest(&self) -> Option<&UnackedEntry> {
        self.entries.front()
    }

    /// Iterate over all in-flight entries from oldest to newest.
    pub fn entries(&self) -> impl Iterator<Item = &UnackedEntry> {
        self.entries.iter()
    }

    /// Place a segment into the window and advance `next_seq`.
    ///
    /// Returns the ACK number that will acknowledge it.
    ///
    /// # Panics
    ///
    /// Panics in debug mode if the segment does not carry `next_seq` or its
    /// payload does not fit.  Check [`has_capacity`](Self::has_capacity)
    /// before composing the segment.
    pub fn enqueue(&mut self, segment: &Segment) -> u16 {
        let payload_len = segment.payload.len();
        debug_assert_eq!(segment.seqno, self.next_seq, "segment out of sequence");
        debug_assert!(
            self.has_capacity(payload_len),
            "enqueue of {payload_len} bytes with only {} remaining",
            self.remaining
        );

        if self.entries.is_empty() {
            self.send_base = segment.seqno;
        }
        let ack_key = seq::advance(segment.seqno, segment.sequence_len());
        self.entries.push_back(UnackedEntry {
            seqno: segment.seqno,
            ack_key,
            bytes: segment.encode(),
            payload_len,
        });
        self.remaining = self.remaining.saturating_sub(payload_len);
        self.next_seq = ack_key;
        ack_key
    }

    /// Process a cumulative ACK.
    ///
    /// Removes every entry the ACK covers and reports what changed.  An ACK
    /// that covers nothing (stale, repeated, or beyond anything sent) is
    /// flagged as a duplicate and leaves the window untouched.
    pub fn on_ack(&mut self, ack: u16) -> AckOutcome {
        if self.last_ack == Some(ack) {
            self.dup_run += 1;
        } else {
            self.last_ack = Some(ack);
            self.dup_run = 1;
        }

        let mut outcome = AckOutcome::default();
        let base = self.send_base;
        let in_range = self.has_unacked()
            && seq::distance(base, ack) != 0
            && seq::not_after(base, ack, self.next_seq);

        if in_range {
            while self
                .entries
                .front()
                .is_some_and(|front| seq::not_after(base, front.ack_key, ack))
            {
                let Some(entry) = self.entries.pop_front() else {
                    break;
                };
                self.send_base = entry.ack_key;
                self.remaining += entry.payload_len;
                outcome.freed_bytes += entry.payload_len;
                outcome.acked_segments += 1;
            }
        }

        outcome.duplicate = outcome.acked_segments == 0;
        if self.dup_run == DUP_ACK_THRESHOLD {
            outcome.fast_retransmit = self.oldest().map(|e| e.bytes.clone());
        }
        outcome
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
