//! Sending side of an STP connection.
//!
//! [`Sender`] performs the active open, streams a byte source to the peer
//! through a byte-bounded sliding window, then closes with a FIN.
//!
//! # Workers
//!
//! Once the handshake completes, [`Sender::send_stream`] runs three workers
//! against one shared `SenderShared`:
//!
//! ```text
//!   producer ──enqueue──▶ ┌────────────────────────┐ ◀──on_ack── ack loop
//!      ▲                  │ SenderCore (std Mutex) │                │
//!      └───window_opened──│ window, timer, stats   │──ticket──▶ timer loop
//!                         └────────────────────────┘
//! ```
//!
//! - the **producer** (the calling task) reads 1000-byte chunks and blocks on
//!   `window_opened` while the window is full;
//! - the **ack loop** applies cumulative ACKs and fast retransmits;
//! - the **timer loop** resends the oldest entry each time its ticket
//!   survives a full RTO.
//!
//! The core lock is never held across an `.await`.  A worker that fails
//! stores its error and flips the shared [`Liveness`]; the others wind down
//! and the first recorded error is returned.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rand::Rng;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{watch, Notify};
use tokio::time::{sleep, timeout_at, Instant};

use crate::config::SenderConfig;
use crate::connection::{ConnError, Liveness, Outbound};
use crate::events::{EventKind, EventRecorder, EventSink, LogSink};
use crate::loss::LossInjector;
use crate::packet::{Segment, SegmentKind, MAX_PAYLOAD};
use crate::send_window::SendWindow;
use crate::seq;
use crate::socket::{Socket, SocketError};
use crate::state::ConnectionState;
use crate::stats::SenderStats;
use crate::timer::{RetransmitTimer, TimerTicket};

// ---------------------------------------------------------------------------
// Sender
// ---------------------------------------------------------------------------

/// The initiating end of a connection.
pub struct Sender {
    /// Current FSM state.
    pub state: ConnectionState,
    socket: Arc<Socket>,
    peer: SocketAddr,
    config: SenderConfig,
    forward: LossInjector,
    reverse: LossInjector,
    sink: Arc<dyn EventSink>,
    /// Set by a successful [`connect`](Self::connect).
    session: Option<Session>,
    stats: SenderStats,
}

/// What the handshake leaves behind for the transfer.
struct Session {
    out: Outbound,
    initial_seqno: u16,
}

impl Sender {
    /// Build a sender that will talk to `peer` from `socket`.
    ///
    /// Loss injectors are taken from the configured probabilities and events
    /// go to the `log` facade until replaced.
    pub fn new(socket: Socket, peer: SocketAddr, config: SenderConfig) -> Self {
        Self {
            state: ConnectionState::Closed,
            socket: Arc::new(socket),
            peer,
            forward: LossInjector::new(config.forward_loss),
            reverse: LossInjector::new(config.reverse_loss),
            config,
            sink: Arc::new(LogSink),
            session: None,
            stats: SenderStats::default(),
        }
    }

    /// Replace the forward (outbound) and reverse (inbound ACK) injectors.
    pub fn with_loss(mut self, forward: LossInjector, reverse: LossInjector) -> Self {
        self.forward = forward;
        self.reverse = reverse;
        self
    }

    pub fn with_events(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr
    }

    /// Sequence number carried by the SYN, once connected.
    pub fn initial_seqno(&self) -> Option<u16> {
        self.session.as_ref().map(|s| s.initial_seqno)
    }

    /// Counters accumulated so far.
    pub fn stats(&self) -> &SenderStats {
        &self.stats
    }

    // -----------------------------------------------------------------------
    // Handshake
    // -----------------------------------------------------------------------

    /// Active open: send SYN every RTO until the matching ACK arrives.
    ///
    /// Retries are unbounded.  ACKs for another sequence number are ignored;
    /// any other segment kind aborts with a protocol violation.
    pub async fn connect(&mut self) -> Result<(), ConnError> {
        if self.state != ConnectionState::Closed || self.session.is_some() {
            return Err(ConnError::BadState(self.state));
        }
        self.config.validate()?;

        let isn = self
            .config
            .initial_seqno
            .unwrap_or_else(|| rand::rng().random());
        let events = EventRecorder::new(self.sink.clone());
        let out = Outbound::new(
            self.socket.clone(),
            self.peer,
            self.forward.clone(),
            events.clone(),
        );

        let syn = Segment::syn(isn);
        let syn_bytes = syn.encode();
        let expected = seq::advance(isn, syn.sequence_len());

        self.state = ConnectionState::SynSent;
        log::info!("[sender] CLOSED → SYN_SENT isn={isn} peer={}", self.peer);

        let mut first = true;
        loop {
            let sent = if first {
                out.transmit(&syn).await?
            } else {
                self.stats.retransmitted_segments += 1;
                log::debug!("[sender] SYN timeout, resending seq={isn}");
                out.retransmit(&syn_bytes).await?
            };
            if !sent {
                self.stats.segments_dropped += 1;
            }
            first = false;

            let deadline = Instant::now() + self.config.rto;
            if self.await_syn_ack(&events, expected, deadline).await? {
                break;
            }
        }

        self.state = ConnectionState::Established;
        log::info!("[sender] SYN_SENT → ESTABLISHED");
        self.session = Some(Session {
            out,
            initial_seqno: isn,
        });
        Ok(())
    }

    /// Wait until `deadline` for ACK(`expected`).  `Ok(false)` on timeout.
    async fn await_syn_ack(
        &mut self,
        events: &EventRecorder,
        expected: u16,
        deadline: Instant,
    ) -> Result<bool, ConnError> {
        loop {
            let received = match timeout_at(deadline, self.socket.recv_from()).await {
                Err(_elapsed) => return Ok(false),
                Ok(received) => received,
            };
            let (segment, addr) = match received {
                Ok(pair) => pair,
                Err(SocketError::Packet(e)) => {
                    log::debug!("[sender] discarding malformed datagram: {e}");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            if addr != self.peer {
                log::debug!("[sender] ignoring datagram from {addr}");
                continue;
            }
            if self.reverse.should_drop() {
                self.stats.acks_dropped += 1;
                events.record(
                    EventKind::Dropped,
                    segment.kind,
                    segment.seqno,
                    segment.payload.len(),
                );
                continue;
            }
            events.record(
                EventKind::Received,
                segment.kind,
                segment.seqno,
                segment.payload.len(),
            );

            if segment.kind != SegmentKind::Ack {
                return Err(ConnError::ProtocolViolation {
                    state: self.state,
                    kind: segment.kind,
                });
            }
            if segment.seqno == expected {
                return Ok(true);
            }
            log::debug!(
                "[sender] ignoring ACK {} while waiting for {expected}",
                segment.seqno
            );
        }
    }

    // -----------------------------------------------------------------------
    // Transfer and teardown
    // -----------------------------------------------------------------------

    /// Stream `source` to the peer, then close with FIN.
    ///
    /// Returns once every byte and the FIN have been acknowledged.  The
    /// connection is `CLOSED` afterwards, whether or not it succeeded.
    pub async fn send_stream<R>(&mut self, mut source: R) -> Result<SenderStats, ConnError>
    where
        R: AsyncRead + Unpin,
    {
        if self.state != ConnectionState::Established {
            return Err(ConnError::BadState(self.state));
        }
        let Some(session) = self.session.take() else {
            return Err(ConnError::BadState(self.state));
        };

        let first_data = seq::advance(session.initial_seqno, 1);
        let (timer_tx, timer_rx) = watch::channel(None);
        let shared = Arc::new(SenderShared {
            core: Mutex::new(SenderCore {
                window: SendWindow::new(first_data, self.config.max_window),
                timer: RetransmitTimer::new(self.config.rto),
                stats: self.stats.clone(),
                state: self.state,
                resending: 0,
            }),
            socket: self.socket.clone(),
            out: session.out,
            reverse: self.reverse.clone(),
            liveness: Liveness::new(),
            window_opened: Notify::new(),
            timer_tx,
            failure: Mutex::new(None),
        });

        let acks = tokio::spawn(ack_loop(shared.clone()));
        let timer = tokio::spawn(timer_loop(shared.clone(), timer_rx));

        if let Err(e) = shared.produce(&mut source).await {
            shared.fail(e);
        }
        shared.liveness.shutdown();
        let acks_joined = acks.await;
        let timer_joined = timer.await;

        let final_stats = {
            let core = shared.lock();
            core.stats.clone()
        };
        self.stats = final_stats.clone();
        self.state = ConnectionState::Closed;

        acks_joined?;
        timer_joined?;
        match shared.take_failure() {
            Some(err) => Err(err),
            None => {
                log::info!("[sender] CLOSING → CLOSED");
                Ok(final_stats)
            }
        }
    }

    /// Connect, stream `source`, and close.
    pub async fn run<R>(mut self, source: R) -> Result<SenderStats, ConnError>
    where
        R: AsyncRead + Unpin,
    {
        self.connect().await?;
        self.send_stream(source).await
    }
}

impl std::fmt::Debug for Sender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sender")
            .field("state", &self.state)
            .field("peer", &self.peer)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// State mutated by more than one worker, always under one lock.
struct SenderCore {
    window: SendWindow,
    timer: RetransmitTimer,
    stats: SenderStats,
    state: ConnectionState,
    /// Retransmissions taken from the window but not yet on the wire.
    resending: usize,
}

impl SenderCore {
    /// Nothing unacknowledged and nothing about to be resent.
    fn is_drained(&self) -> bool {
        !self.window.has_unacked() && self.resending == 0
    }
}

struct SenderShared {
    core: Mutex<SenderCore>,
    socket: Arc<Socket>,
    out: Outbound,
    reverse: LossInjector,
    liveness: Liveness,
    /// Signalled whenever an ACK frees window space or a resend completes.
    window_opened: Notify,
    /// Latest timer ticket, published under the core lock.
    timer_tx: watch::Sender<Option<TimerTicket>>,
    failure: Mutex<Option<ConnError>>,
}

impl SenderShared {
    fn lock(&self) -> MutexGuard<'_, SenderCore> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record the first fatal error and stop every worker.
    fn fail(&self, err: ConnError) {
        let mut slot = self.failure.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            log::warn!("[sender] connection failed: {err}");
            *slot = Some(err);
        }
        drop(slot);
        self.liveness.shutdown();
    }

    fn take_failure(&self) -> Option<ConnError> {
        self.failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Point the timer at the window's oldest entry and publish the change.
    fn rebind_timer(&self, core: &mut SenderCore) {
        let oldest = core.window.oldest().map(|e| e.ack_key);
        if core.timer.follow_oldest(oldest) {
            self.timer_tx.send_replace(core.timer.ticket());
        }
    }

    /// Block until `ready` holds or the connection dies.
    async fn wait_until(&self, ready: impl Fn(&SenderCore) -> bool) -> Result<(), ConnError> {
        loop {
            let notified = self.window_opened.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let is_ready = ready(&*self.lock());
            if is_ready {
                return Ok(());
            }
            if !self.liveness.is_alive() {
                return Err(ConnError::Aborted);
            }
            tokio::select! {
                _ = &mut notified => {}
                _ = self.liveness.stopped() => return Err(ConnError::Aborted),
            }
        }
    }

    /// Enqueue `segment` at the head of the window and transmit it.
    async fn push(&self, build: impl FnOnce(u16) -> Segment) -> Result<(), ConnError> {
        let segment = {
            let mut core = self.lock();
            let segment = build(core.window.next_seq());
            core.window.enqueue(&segment);
            if segment.kind == SegmentKind::Data {
                core.stats.original_bytes_sent += segment.payload.len() as u64;
                core.stats.original_segments_sent += 1;
            }
            self.rebind_timer(&mut core);
            segment
        };
        log::debug!(
            "[sender] → {} seq={} len={}",
            segment.kind,
            segment.seqno,
            segment.payload.len()
        );
        if !self.out.transmit(&segment).await? {
            self.lock().stats.segments_dropped += 1;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Producer
    // -----------------------------------------------------------------------

    async fn produce<R>(&self, source: &mut R) -> Result<(), ConnError>
    where
        R: AsyncRead + Unpin,
    {
        loop {
            let chunk = read_chunk(source).await?;
            if chunk.is_empty() {
                break;
            }
            let len = chunk.len();
            self.wait_until(|core| core.window.has_capacity(len)).await?;
            self.push(|seqno| Segment::data(seqno, chunk)).await?;
        }

        // Every DATA byte must be acknowledged, and no stale copy still on
        // its way out, before the FIN goes out.
        self.wait_until(SenderCore::is_drained).await?;
        {
            let mut core = self.lock();
            core.state = ConnectionState::Closing;
        }
        log::info!("[sender] ESTABLISHED → CLOSING");
        self.push(Segment::fin).await?;
        self.wait_until(SenderCore::is_drained).await?;

        self.lock().state = ConnectionState::Closed;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // ACK listener
    // -----------------------------------------------------------------------

    async fn receive_acks(&self) -> Result<(), ConnError> {
        let peer = self.out.peer();
        loop {
            let received = tokio::select! {
                received = self.socket.recv_from() => received,
                _ = self.liveness.stopped() => return Ok(()),
            };
            let (segment, addr) = match received {
                Ok(pair) => pair,
                Err(SocketError::Packet(e)) => {
                    log::debug!("[sender] discarding malformed datagram: {e}");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            if addr != peer {
                log::debug!("[sender] ignoring datagram from {addr}");
                continue;
            }

            let events = self.out.events();
            if self.reverse.should_drop() {
                self.lock().stats.acks_dropped += 1;
                events.record(
                    EventKind::Dropped,
                    segment.kind,
                    segment.seqno,
                    segment.payload.len(),
                );
                continue;
            }
            events.record(
                EventKind::Received,
                segment.kind,
                segment.seqno,
                segment.payload.len(),
            );

            if segment.kind != SegmentKind::Ack {
                let state = self.lock().state;
                return Err(ConnError::ProtocolViolation {
                    state,
                    kind: segment.kind,
                });
            }

            let outcome = {
                let mut core = self.lock();
                let outcome = core.window.on_ack(segment.seqno);
                core.stats.original_bytes_acked += outcome.freed_bytes as u64;
                if outcome.duplicate {
                    core.stats.duplicate_acks_received += 1;
                }
                if outcome.fast_retransmit.is_some() {
                    core.stats.retransmitted_segments += 1;
                    core.resending += 1;
                }
                self.rebind_timer(&mut core);
                outcome
            };
            log::debug!(
                "[sender] ← ACK {} acked={} dup={}",
                segment.seqno,
                outcome.acked_segments,
                outcome.duplicate
            );

            if outcome.advanced() {
                self.window_opened.notify_one();
            }
            if let Some(bytes) = outcome.fast_retransmit {
                log::debug!("[sender] fast retransmit after triple ACK {}", segment.seqno);
                self.resend(&bytes).await?;
            }
        }
    }

    // -----------------------------------------------------------------------
    // Retransmission timer
    // -----------------------------------------------------------------------

    async fn run_timer(
        &self,
        mut tickets: watch::Receiver<Option<TimerTicket>>,
    ) -> Result<(), ConnError> {
        loop {
            let current = *tickets.borrow_and_update();
            let Some(ticket) = current else {
                tokio::select! {
                    changed = tickets.changed() => if changed.is_err() { return Ok(()) },
                    _ = self.liveness.stopped() => return Ok(()),
                }
                continue;
            };
            let rto = self.lock().timer.rto();
            tokio::select! {
                _ = sleep(rto) => self.fire(ticket).await?,
                changed = tickets.changed() => if changed.is_err() { return Ok(()) },
                _ = self.liveness.stopped() => return Ok(()),
            }
        }
    }

    /// Resend the oldest entry if `ticket` still guards it.
    async fn fire(&self, ticket: TimerTicket) -> Result<(), ConnError> {
        let resend = {
            let mut core = self.lock();
            let oldest = core
                .window
                .oldest()
                .filter(|e| e.ack_key == ticket.key)
                .map(|e| e.bytes.clone());
            if core.timer.is_current(&ticket) && oldest.is_some() {
                core.stats.retransmitted_segments += 1;
                core.resending += 1;
                oldest
            } else {
                None
            }
        };
        let Some(bytes) = resend else {
            return Ok(());
        };
        log::debug!("[sender] timeout, resending segment acked by {}", ticket.key);
        self.resend(&bytes).await
    }

    /// Put a retransmission claimed via `resending` on the wire.
    async fn resend(&self, bytes: &[u8]) -> Result<(), ConnError> {
        let sent = self.out.retransmit(bytes).await;
        {
            let mut core = self.lock();
            core.resending -= 1;
            if matches!(sent, Ok(false)) {
                core.stats.segments_dropped += 1;
            }
        }
        self.window_opened.notify_one();
        sent?;
        Ok(())
    }
}

async fn ack_loop(shared: Arc<SenderShared>) {
    if let Err(e) = shared.receive_acks().await {
        shared.fail(e);
    }
}

async fn timer_loop(shared: Arc<SenderShared>, tickets: watch::Receiver<Option<TimerTicket>>) {
    if let Err(e) = shared.run_timer(tickets).await {
        shared.fail(e);
    }
}

/// Read up to one full payload from `source`.  Empty means end of stream.
async fn read_chunk<R>(source: &mut R) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut chunk = Vec::with_capacity(MAX_PAYLOAD);
    (&mut *source)
        .take(MAX_PAYLOAD as u64)
        .read_to_end(&mut chunk)
        .await?;
    Ok(chunk)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_chunk_splits_at_max_payload() {
        let data = vec![7u8; 2500];
        let mut source = &data[..];
        let mut sizes = Vec::new();
        loop {
            let chunk = read_chunk(&mut source).await.unwrap();
            if chunk.is_empty() {
                break;
            }
            sizes.push(chunk.len());
        }
        assert_eq!(sizes, vec![1000, 1000, 500]);
    }

    #[tokio::test]
    async fn send_stream_before_connect_is_rejected() {
        let socket = Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let peer = "127.0.0.1:9".parse().unwrap();
        let mut sender = Sender::new(socket, peer, SenderConfig::default());
        let err = sender.send_stream(&b"data"[..]).await.unwrap_err();
        assert!(matches!(err, ConnError::BadState(ConnectionState::Closed)));
    }

    #[tokio::test]
    async fn invalid_config_fails_before_any_traffic() {
        let socket = Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let peer = "127.0.0.1:9".parse().unwrap();
        let config = SenderConfig {
            max_window: 10,
            ..SenderConfig::default()
        };
        let mut sender = Sender::new(socket, peer, config);
        let err = sender.connect().await.unwrap_err();
        assert!(matches!(err, ConnError::Config(_)));
        assert_eq!(sender.state, ConnectionState::Closed);
    }
}
