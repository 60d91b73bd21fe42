//! Per-connection counters, frozen and returned when a transfer completes.

use std::fmt;

/// Sender-side counters.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SenderStats {
    /// Payload bytes sent for the first time.
    pub original_bytes_sent: u64,
    /// Payload bytes cumulatively acknowledged by the receiver.
    pub original_bytes_acked: u64,
    /// DATA segments sent for the first time.
    pub original_segments_sent: u64,
    /// Segments resent by the timer or by fast retransmit.
    pub retransmitted_segments: u64,
    /// ACKs that acknowledged nothing new.
    pub duplicate_acks_received: u64,
    /// Outbound segments discarded by the forward loss injector.
    pub segments_dropped: u64,
    /// Inbound ACKs discarded by the reverse loss injector.
    pub acks_dropped: u64,
}

impl fmt::Display for SenderStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Original data sent:       {}", self.original_bytes_sent)?;
        writeln!(f, "Original data acked:      {}", self.original_bytes_acked)?;
        writeln!(f, "Original segments sent:   {}", self.original_segments_sent)?;
        writeln!(f, "Retransmitted segments:   {}", self.retransmitted_segments)?;
        writeln!(f, "Dup acks received:        {}", self.duplicate_acks_received)?;
        writeln!(f, "Data segments dropped:    {}", self.segments_dropped)?;
        writeln!(f, "Ack segments dropped:     {}", self.acks_dropped)
    }
}

/// Receiver-side counters.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReceiverStats {
    /// Payload bytes accepted for the first time.
    pub original_bytes_received: u64,
    /// DATA segments accepted for the first time.
    pub original_segments_received: u64,
    /// DATA segments already buffered or already delivered.
    pub duplicate_segments_received: u64,
    /// DATA segments dropped because they did not fit the receive window.
    pub window_overflow_drops: u64,
    /// Inbound segments discarded by the loss injector.
    pub segments_dropped: u64,
    /// ACKs repeating the previous acknowledgement number.
    pub duplicate_acks_sent: u64,
}

impl fmt::Display for ReceiverStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Original data received:     {}", self.original_bytes_received)?;
        writeln!(f, "Original segments received: {}", self.original_segments_received)?;
        writeln!(f, "Dup data segments received: {}", self.duplicate_segments_received)?;
        writeln!(f, "Window overflow drops:      {}", self.window_overflow_drops)?;
        writeln!(f, "Data segments dropped:      {}", self.segments_dropped)?;
        writeln!(f, "Dup acks sent:              {}", self.duplicate_acks_sent)
    }
}
