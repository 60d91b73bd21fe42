//! Connection finite-state machine (FSM) types.
//!
//! This module defines every state either peer can occupy.  Transitions live
//! in [`crate::sender`] (initiator) and [`crate::receiver`] (responder); both
//! roles share this one enum so logs and errors read the same on each side.
//!
//! ```text
//!  sender:    CLOSED ──SYN──▶ SYN_SENT ──ACK(S+1)──▶ ESTABLISHED
//!  receiver:  CLOSED ───────▶ LISTEN ───SYN/ACK───▶ ESTABLISHED
//!
//!  ESTABLISHED ──FIN──▶ CLOSING ──▶ TIME_WAIT (receiver, 2×MSL) ──▶ CLOSED
//!                          │
//!                          └── window drained (sender) ───────────▶ CLOSED
//! ```

/// All possible states of the connection FSM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No connection exists; initial and final state.
    #[default]
    Closed,
    /// Receiver is waiting for the peer's SYN.
    Listen,
    /// Sender has sent SYN and is waiting for its ACK.
    SynSent,
    /// Handshake complete; data transfer in progress.
    Established,
    /// FIN sent (sender) or received (receiver); waiting for teardown.
    Closing,
    /// Receiver absorbs retransmitted FINs for 2×MSL before closing.
    TimeWait,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectionState::Closed => "CLOSED",
            ConnectionState::Listen => "LISTEN",
            ConnectionState::SynSent => "SYN_SENT",
            ConnectionState::Established => "ESTABLISHED",
            ConnectionState::Closing => "CLOSING",
            ConnectionState::TimeWait => "TIME_WAIT",
        };
        f.write_str(name)
    }
}
