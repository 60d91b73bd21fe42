//! Receiving side of an STP connection.
//!
//! [`Receiver`] waits in `LISTEN` for a SYN from the expected sender port,
//! reassembles DATA into an ordered byte stream, answers every accepted or
//! duplicate segment with a cumulative ACK, and after the FIN lingers in
//! `TIME_WAIT` for 2×MSL re-acknowledging retransmitted FINs.
//!
//! A single task owns all receive-side state, so nothing here is locked.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::time::{timeout_at, Instant};

use crate::config::ReceiverConfig;
use crate::connection::{ConnError, Outbound};
use crate::events::{EventKind, EventRecorder, EventSink, LogSink};
use crate::loss::LossInjector;
use crate::packet::{Segment, SegmentKind};
use crate::reassembly::{DataOutcome, ReassemblyBuffer};
use crate::seq;
use crate::socket::{Socket, SocketError};
use crate::state::ConnectionState;
use crate::stats::ReceiverStats;

/// The responding end of a connection.
pub struct Receiver {
    /// Current FSM state.
    pub state: ConnectionState,
    socket: Arc<Socket>,
    config: ReceiverConfig,
    /// Applied to every inbound segment before it is processed.
    loss: LossInjector,
    sink: Arc<dyn EventSink>,
    /// Started by the first datagram that arrives.
    events: Option<EventRecorder>,
    /// ACK path back to the sender, set once the SYN is accepted.
    out: Option<Outbound>,
    buffer: ReassemblyBuffer,
    last_ack: Option<u16>,
    stats: ReceiverStats,
}

impl Receiver {
    pub fn new(socket: Socket, config: ReceiverConfig) -> Self {
        Self {
            state: ConnectionState::Closed,
            socket: Arc::new(socket),
            buffer: ReassemblyBuffer::new(0, config.max_window),
            config,
            loss: LossInjector::lossless(),
            sink: Arc::new(LogSink),
            events: None,
            out: None,
            last_ack: None,
            stats: ReceiverStats::default(),
        }
    }

    /// Drop inbound segments with `loss` before processing them.
    pub fn with_loss(mut self, loss: LossInjector) -> Self {
        self.loss = loss;
        self
    }

    pub fn with_events(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr
    }

    pub fn stats(&self) -> &ReceiverStats {
        &self.stats
    }

    /// Address of the connected sender, once a SYN has been accepted.
    pub fn peer(&self) -> Option<SocketAddr> {
        self.out.as_ref().map(Outbound::peer)
    }

    /// Passive open.
    ///
    /// The first segment that survives the loss injector must be a SYN from
    /// the configured sender port; anything else is a protocol violation.
    pub async fn accept(&mut self) -> Result<(), ConnError> {
        if self.state != ConnectionState::Closed {
            return Err(ConnError::BadState(self.state));
        }
        self.config.validate()?;

        self.state = ConnectionState::Listen;
        log::info!(
            "[receiver] CLOSED → LISTEN on {} (sender port {})",
            self.socket.local_addr,
            self.config.sender_port
        );

        let (syn, addr) = self.recv_segment(None).await?;
        if addr.port() != self.config.sender_port {
            return Err(ConnError::UnexpectedPeer {
                state: self.state,
                addr,
            });
        }
        if syn.kind != SegmentKind::Syn {
            return Err(ConnError::ProtocolViolation {
                state: self.state,
                kind: syn.kind,
            });
        }

        let ack = seq::advance(syn.seqno, syn.sequence_len());
        self.buffer = ReassemblyBuffer::new(ack, self.config.max_window);
        self.out = Some(Outbound::new(
            self.socket.clone(),
            addr,
            LossInjector::lossless(),
            self.recorder().clone(),
        ));
        self.send_ack(ack).await?;

        self.state = ConnectionState::Established;
        log::info!("[receiver] LISTEN → ESTABLISHED peer={addr} isn={}", syn.seqno);
        Ok(())
    }

    /// Write the peer's byte stream to `output` until the connection closes.
    ///
    /// Returns after `TIME_WAIT` has expired; the connection is `CLOSED`.
    pub async fn receive<W>(&mut self, output: &mut W) -> Result<ReceiverStats, ConnError>
    where
        W: AsyncWrite + Unpin,
    {
        let peer = match (&self.out, self.state) {
            (Some(out), ConnectionState::Established) => out.peer(),
            _ => return Err(ConnError::BadState(self.state)),
        };

        loop {
            let (segment, _) = self.recv_segment(Some(peer)).await?;
            match segment.kind {
                SegmentKind::Data => self.on_data(&segment, output).await?,
                SegmentKind::Syn => {
                    // Our SYN-ACK was lost; the sender is still in SYN_SENT.
                    self.send_ack(seq::advance(segment.seqno, 1)).await?;
                }
                SegmentKind::Fin => {
                    let ack = self.buffer.on_fin(segment.seqno);
                    self.send_ack(ack).await?;
                    self.state = ConnectionState::Closing;
                    log::info!("[receiver] ESTABLISHED → CLOSING fin={}", segment.seqno);
                    break;
                }
                SegmentKind::Ack => {
                    return Err(ConnError::ProtocolViolation {
                        state: self.state,
                        kind: segment.kind,
                    });
                }
            }
        }

        output.flush().await?;
        self.time_wait(peer).await?;

        self.state = ConnectionState::Closed;
        log::info!("[receiver] TIME_WAIT → CLOSED");
        Ok(self.stats.clone())
    }

    /// Accept a connection and write its stream to `output`.
    pub async fn run<W>(mut self, mut output: W) -> Result<ReceiverStats, ConnError>
    where
        W: AsyncWrite + Unpin,
    {
        self.accept().await?;
        self.receive(&mut output).await
    }

    async fn on_data<W>(&mut self, segment: &Segment, output: &mut W) -> Result<(), ConnError>
    where
        W: AsyncWrite + Unpin,
    {
        let len = segment.payload.len();
        let outcome = self.buffer.on_data(segment.seqno, &segment.payload);
        match outcome {
            DataOutcome::WindowOverflow => {
                self.stats.window_overflow_drops += 1;
                log::debug!(
                    "[receiver] window overflow, dropping seq={} len={len} (remaining {})",
                    segment.seqno,
                    self.buffer.remaining_window()
                );
                return Ok(());
            }
            DataOutcome::Accepted { delivered, .. } => {
                self.stats.original_bytes_received += len as u64;
                self.stats.original_segments_received += 1;
                log::debug!(
                    "[receiver] ← DATA seq={} len={len} delivered={delivered}",
                    segment.seqno
                );
            }
            DataOutcome::Duplicate { .. } => {
                self.stats.duplicate_segments_received += 1;
                log::debug!("[receiver] ← duplicate DATA seq={}", segment.seqno);
            }
        }

        let delivered = self.buffer.take_delivered();
        if !delivered.is_empty() {
            output.write_all(&delivered).await?;
        }
        if let Some(ack) = outcome.ack() {
            self.send_ack(ack).await?;
        }
        Ok(())
    }

    /// Linger for 2×MSL, re-acknowledging any retransmitted FIN.
    async fn time_wait(&mut self, peer: SocketAddr) -> Result<(), ConnError> {
        self.state = ConnectionState::TimeWait;
        log::info!("[receiver] CLOSING → TIME_WAIT for {:?}", self.config.msl * 2);

        let deadline = Instant::now() + self.config.msl * 2;
        loop {
            let Ok(received) = timeout_at(deadline, self.recv_segment(Some(peer))).await else {
                return Ok(());
            };
            let (segment, _) = received?;
            if segment.kind != SegmentKind::Fin {
                return Err(ConnError::ProtocolViolation {
                    state: self.state,
                    kind: segment.kind,
                });
            }
            let ack = self.buffer.on_fin(segment.seqno);
            self.send_ack(ack).await?;
        }
    }

    async fn send_ack(&mut self, ack: u16) -> Result<(), ConnError> {
        let Some(out) = &self.out else {
            return Err(ConnError::BadState(self.state));
        };
        if self.last_ack == Some(ack) {
            self.stats.duplicate_acks_sent += 1;
        }
        self.last_ack = Some(ack);
        log::debug!("[receiver] → ACK {ack}");
        out.transmit(&Segment::ack(ack)).await?;
        Ok(())
    }

    fn recorder(&mut self) -> &EventRecorder {
        let sink = &self.sink;
        self.events
            .get_or_insert_with(|| EventRecorder::new(sink.clone()))
    }

    /// Next decodable segment that survives the loss injector.
    ///
    /// With `peer` set, datagrams from any other address are ignored.
    async fn recv_segment(
        &mut self,
        peer: Option<SocketAddr>,
    ) -> Result<(Segment, SocketAddr), ConnError> {
        loop {
            let (segment, addr) = match self.socket.recv_from().await {
                Ok(pair) => pair,
                Err(SocketError::Packet(e)) => {
                    log::debug!("[receiver] discarding malformed datagram: {e}");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            if peer.is_some_and(|p| p != addr) {
                log::debug!("[receiver] ignoring datagram from {addr}");
                continue;
            }

            let dropped = self.loss.should_drop();
            let events = self.recorder();
            let len = segment.payload.len();
            if dropped {
                events.record(EventKind::Dropped, segment.kind, segment.seqno, len);
                self.stats.segments_dropped += 1;
                continue;
            }
            events.record(EventKind::Received, segment.kind, segment.seqno, len);
            return Ok((segment, addr));
        }
    }
}

impl std::fmt::Debug for Receiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Receiver")
            .field("state", &self.state)
            .field("config", &self.config)
            .field("buffer", &self.buffer)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn receive_before_accept_is_rejected() {
        let socket = Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let mut receiver = Receiver::new(socket, ReceiverConfig::new(50_000, 1000));
        let mut out = Vec::new();
        let err = receiver.receive(&mut out).await.unwrap_err();
        assert!(matches!(err, ConnError::BadState(ConnectionState::Closed)));
    }

    #[tokio::test]
    async fn invalid_window_fails_before_listening() {
        let socket = Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let mut receiver = Receiver::new(socket, ReceiverConfig::new(50_000, 40_000));
        let err = receiver.accept().await.unwrap_err();
        assert!(matches!(err, ConnError::Config(_)));
        assert_eq!(receiver.state, ConnectionState::Closed);
    }
}
