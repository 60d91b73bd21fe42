//! `stp-over-udp`: a simple reliable transport protocol (STP) over UDP.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────────┐     DATA / SYN / FIN     ┌──────────────┐
//!  │    Sender    │─────────────────────────▶│   Receiver   │
//!  │ send_window  │                          │  reassembly  │
//!  │ timer        │◀─────────────────────────│              │
//!  └──────┬───────┘      cumulative ACKs     └──────┬───────┘
//!         │                                         │
//!  ┌──────▼─────────────────────────────────────────▼───────┐
//!  │ connection: Outbound (loss + events), Liveness, errors │
//!  └──────┬─────────────────────────────────────────────────┘
//!         │ encoded segments
//!  ┌──────▼──────┐
//!  │   Socket    │  (thin async wrapper around tokio UdpSocket)
//!  └─────────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`packet`]     : 4-byte-header wire format
//! - [`seq`]        : 16-bit wrapping sequence arithmetic
//! - [`loss`]       : pluggable packet-loss injection
//! - [`send_window`]: unacknowledged segments, cumulative ACKs, fast retransmit
//! - [`timer`]      : generation-counted retransmission timer
//! - [`reassembly`] : out-of-order buffering and receive window
//! - [`state`]      : connection FSM states
//! - [`connection`] : errors, shutdown flag, and the outbound path
//! - [`sender`]     : active open, windowed transfer, FIN
//! - [`receiver`]   : passive open, reassembly, TIME_WAIT
//! - [`events`]     : diagnostic event stream and sinks
//! - [`stats`]      : per-role counters
//! - [`config`]     : validated connection parameters
//! - [`socket`]     : async UDP socket abstraction

pub mod config;
pub mod connection;
pub mod events;
pub mod loss;
pub mod packet;
pub mod reassembly;
pub mod receiver;
pub mod send_window;
pub mod sender;
pub mod seq;
pub mod socket;
pub mod state;
pub mod stats;
pub mod timer;

pub use config::{ReceiverConfig, SenderConfig};
pub use connection::ConnError;
pub use receiver::Receiver;
pub use sender::Sender;
pub use socket::Socket;
