//! Plumbing shared by both connection roles.
//!
//! [`crate::sender::Sender`] and [`crate::receiver::Receiver`] each drive
//! their own half of the state machine, but they report errors, signal
//! shutdown, and put segments on the wire the same way.  Those pieces live
//! here:
//! - [`ConnError`]: every way a session can fail.
//! - [`Liveness`]: the cooperative shutdown flag all workers observe.
//! - [`Outbound`]: socket + peer + loss injector + event recorder, the one
//!   path every outgoing segment takes.

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::watch;

use crate::config::ConfigError;
use crate::events::{EventKind, EventRecorder};
use crate::loss::LossInjector;
use crate::packet::{Segment, SegmentKind};
use crate::socket::{Socket, SocketError};
use crate::state::ConnectionState;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that end a session.
///
/// Malformed datagrams, window overflows, and timeouts are recoverable and
/// never surface here.
#[derive(Debug, Error)]
pub enum ConnError {
    #[error(transparent)]
    Socket(#[from] SocketError),
    /// Reading the source or writing the output stream failed.
    #[error("stream I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("protocol violation: unexpected {kind} segment in {state}")]
    ProtocolViolation {
        state: ConnectionState,
        kind: SegmentKind,
    },
    #[error("protocol violation: segment from unexpected peer {addr} in {state}")]
    UnexpectedPeer {
        state: ConnectionState,
        addr: SocketAddr,
    },
    #[error("operation not valid in state {0}")]
    BadState(ConnectionState),
    /// Another worker shut the connection down.
    #[error("connection aborted")]
    Aborted,
    #[error("connection worker panicked: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

// ---------------------------------------------------------------------------
// Liveness
// ---------------------------------------------------------------------------

/// Cooperative shutdown flag shared by every worker of one connection.
///
/// Cloning yields another handle to the same flag.  Once shut down it stays
/// down.
#[derive(Debug, Clone)]
pub struct Liveness {
    tx: Arc<watch::Sender<bool>>,
}

impl Liveness {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(true);
        Self { tx: Arc::new(tx) }
    }

    pub fn is_alive(&self) -> bool {
        *self.tx.borrow()
    }

    /// Flip the flag; every task waiting in [`stopped`](Self::stopped) wakes.
    pub fn shutdown(&self) {
        self.tx.send_replace(false);
    }

    /// Resolve once the connection has been shut down.
    pub async fn stopped(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|alive| !alive).await;
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// The outgoing half of a connection.
///
/// Every transmit first consults the loss injector; a dropped segment is
/// reported as [`EventKind::Dropped`] and never reaches the socket.
#[derive(Debug, Clone)]
pub struct Outbound {
    socket: Arc<Socket>,
    peer: SocketAddr,
    loss: LossInjector,
    events: EventRecorder,
}

impl Outbound {
    pub fn new(
        socket: Arc<Socket>,
        peer: SocketAddr,
        loss: LossInjector,
        events: EventRecorder,
    ) -> Self {
        Self {
            socket,
            peer,
            loss,
            events,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn events(&self) -> &EventRecorder {
        &self.events
    }

    /// First transmission of `segment`.  Returns `false` if it was dropped.
    pub async fn transmit(&self, segment: &Segment) -> Result<bool, SocketError> {
        self.put(
            &segment.encode(),
            segment.kind,
            segment.seqno,
            segment.payload.len(),
            EventKind::Sent,
        )
        .await
    }

    /// Resend already-encoded segment bytes.  Returns `false` if dropped.
    pub async fn retransmit(&self, bytes: &[u8]) -> Result<bool, SocketError> {
        let segment = Segment::decode(bytes)?;
        self.put(
            bytes,
            segment.kind,
            segment.seqno,
            segment.payload.len(),
            EventKind::Resent,
        )
        .await
    }

    async fn put(
        &self,
        bytes: &[u8],
        kind: SegmentKind,
        seqno: u16,
        len: usize,
        event: EventKind,
    ) -> Result<bool, SocketError> {
        if self.loss.should_drop() {
            log::debug!("loss injector dropped outbound {kind} seq={seqno} len={len}");
            self.events.record(EventKind::Dropped, kind, seqno, len);
            return Ok(false);
        }
        self.socket.send_raw(bytes, self.peer).await?;
        self.events.record(event, kind, seqno, len);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn liveness_wakes_waiters_on_shutdown() {
        let liveness = Liveness::new();
        assert!(liveness.is_alive());

        let waiter = {
            let liveness = liveness.clone();
            tokio::spawn(async move { liveness.stopped().await })
        };
        liveness.shutdown();
        waiter.await.unwrap();
        assert!(!liveness.is_alive());
    }

    #[tokio::test]
    async fn stopped_resolves_immediately_after_shutdown() {
        let liveness = Liveness::new();
        liveness.shutdown();
        liveness.stopped().await;
    }
}
