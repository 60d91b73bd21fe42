//! Integration tests for connection setup and teardown.
//!
//! A raw [`Socket`] plays one side of the conversation so each test controls
//! exactly which segments the peer under test sees.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use stp_over_udp::{
    config::{ReceiverConfig, SenderConfig},
    connection::ConnError,
    events::{EventKind, MemorySink},
    loss::{LossInjector, LossOracle},
    packet::{Segment, SegmentKind},
    receiver::Receiver,
    sender::Sender,
    socket::Socket,
    state::ConnectionState,
};
use tokio::time::timeout;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn bind() -> Socket {
    Socket::bind("127.0.0.1:0".parse::<SocketAddr>().unwrap())
        .await
        .expect("bind loopback socket")
}

fn receiver_config(sender_port: u16) -> ReceiverConfig {
    ReceiverConfig {
        msl: Duration::from_millis(25),
        ..ReceiverConfig::new(sender_port, 1000)
    }
}

async fn recv(socket: &Socket) -> Segment {
    let (segment, _) = timeout(Duration::from_secs(5), socket.recv_from())
        .await
        .expect("no reply within 5s")
        .expect("recv failed");
    segment
}

/// Drops only the first packet it is asked about.
struct DropFirst(std::sync::atomic::AtomicBool);

impl LossOracle for DropFirst {
    fn should_drop(&self, _probability: f64) -> bool {
        !self.0.swap(true, std::sync::atomic::Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Receiver side
// ---------------------------------------------------------------------------

/// SYN 65535 is answered with ACK 0, and a FIN at 0 with ACK 1.
#[tokio::test]
async fn syn_at_top_of_sequence_space_wraps_ack() {
    let peer = bind().await;
    let socket = bind().await;
    let receiver_addr = socket.local_addr;
    let receiver = Receiver::new(socket, receiver_config(peer.local_addr.port()));

    let task = tokio::spawn(async move {
        let mut out = Vec::new();
        let result = receiver.run(&mut out).await;
        result.map(|stats| (stats, out))
    });

    peer.send_to(&Segment::syn(65_535), receiver_addr).await.unwrap();
    let ack = recv(&peer).await;
    assert_eq!(ack.kind, SegmentKind::Ack);
    assert_eq!(ack.seqno, 0);

    peer.send_to(&Segment::fin(0), receiver_addr).await.unwrap();
    let ack = recv(&peer).await;
    assert_eq!(ack.kind, SegmentKind::Ack);
    assert_eq!(ack.seqno, 1);

    let (stats, out) = timeout(Duration::from_secs(5), task)
        .await
        .expect("receiver did not close")
        .expect("receiver panicked")
        .expect("receiver failed");
    assert!(out.is_empty());
    assert_eq!(stats.original_bytes_received, 0);
}

/// A retransmitted FIN during TIME_WAIT is acknowledged again.
#[tokio::test]
async fn time_wait_reacknowledges_fin() {
    let peer = bind().await;
    let socket = bind().await;
    let receiver_addr = socket.local_addr;
    let config = ReceiverConfig {
        msl: Duration::from_millis(200),
        ..ReceiverConfig::new(peer.local_addr.port(), 1000)
    };
    let receiver = Receiver::new(socket, config);
    let task = tokio::spawn(async move {
        let mut out = Vec::new();
        let result = receiver.run(&mut out).await;
        result.map(|stats| (stats, out))
    });

    peer.send_to(&Segment::syn(100), receiver_addr).await.unwrap();
    assert_eq!(recv(&peer).await.seqno, 101);
    peer.send_to(&Segment::data(101, b"abc".to_vec()), receiver_addr)
        .await
        .unwrap();
    assert_eq!(recv(&peer).await.seqno, 104);
    peer.send_to(&Segment::fin(104), receiver_addr).await.unwrap();
    assert_eq!(recv(&peer).await.seqno, 105);
    peer.send_to(&Segment::fin(104), receiver_addr).await.unwrap();
    assert_eq!(recv(&peer).await.seqno, 105);

    let (stats, out) = task.await.unwrap().unwrap();
    assert_eq!(out, b"abc");
    assert_eq!(stats.duplicate_acks_sent, 1);
}

/// Anything but a SYN while listening aborts the session.
#[tokio::test]
async fn data_in_listen_is_a_protocol_violation() {
    let peer = bind().await;
    let socket = bind().await;
    let receiver_addr = socket.local_addr;
    let mut receiver = Receiver::new(socket, receiver_config(peer.local_addr.port()));

    let task = tokio::spawn(async move {
        let result = receiver.accept().await;
        (result, receiver.state)
    });
    peer.send_to(&Segment::data(1, b"early".to_vec()), receiver_addr)
        .await
        .unwrap();

    let (result, state) = timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
    assert!(matches!(
        result,
        Err(ConnError::ProtocolViolation {
            state: ConnectionState::Listen,
            kind: SegmentKind::Data
        })
    ));
    assert_eq!(state, ConnectionState::Listen);
}

#[tokio::test]
async fn syn_from_unexpected_port_is_rejected() {
    let expected = bind().await;
    let intruder = bind().await;
    let socket = bind().await;
    let receiver_addr = socket.local_addr;
    let mut receiver = Receiver::new(socket, receiver_config(expected.local_addr.port()));

    let task = tokio::spawn(async move { receiver.accept().await });
    intruder.send_to(&Segment::syn(7), receiver_addr).await.unwrap();

    let result = timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
    assert!(matches!(result, Err(ConnError::UnexpectedPeer { .. })));
}

/// Undecodable datagrams are skipped without a reply.
#[tokio::test]
async fn malformed_datagram_is_ignored() {
    let peer = bind().await;
    let socket = bind().await;
    let receiver_addr = socket.local_addr;
    let receiver = Receiver::new(socket, receiver_config(peer.local_addr.port()));
    let task = tokio::spawn(async move {
        let mut out = Vec::new();
        receiver.run(&mut out).await
    });

    peer.send_raw(&[0, 9, 0, 0], receiver_addr).await.unwrap();
    peer.send_raw(&[0], receiver_addr).await.unwrap();
    peer.send_to(&Segment::syn(5), receiver_addr).await.unwrap();
    let ack = recv(&peer).await;
    assert_eq!(ack.seqno, 6);

    peer.send_to(&Segment::fin(6), receiver_addr).await.unwrap();
    assert_eq!(recv(&peer).await.seqno, 7);
    task.await.unwrap().unwrap();
}

// ---------------------------------------------------------------------------
// Sender side
// ---------------------------------------------------------------------------

/// The sender resends its SYN every RTO until it is acknowledged.
#[tokio::test]
async fn sender_retries_syn_until_acknowledged() {
    let peer = bind().await;
    let socket = bind().await;
    let config = SenderConfig {
        rto: Duration::from_millis(50),
        initial_seqno: Some(4000),
        ..SenderConfig::default()
    };
    let sink = Arc::new(MemorySink::new());
    let mut sender = Sender::new(socket, peer.local_addr, config).with_events(sink.clone());
    let sender_addr = sender.local_addr();

    let task = tokio::spawn(async move {
        let result = sender.connect().await;
        result.map(|()| sender)
    });

    // Leave the first two SYNs unanswered.
    for _ in 0..3 {
        let syn = recv(&peer).await;
        assert_eq!(syn.kind, SegmentKind::Syn);
        assert_eq!(syn.seqno, 4000);
    }
    peer.send_to(&Segment::ack(4001), sender_addr).await.unwrap();

    let sender = timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap()
        .expect("connect failed");
    assert_eq!(sender.state, ConnectionState::Established);
    assert_eq!(sender.initial_seqno(), Some(4000));
    assert!(sender.stats().retransmitted_segments >= 2);

    let events = sink.events();
    assert_eq!(events[0].kind, EventKind::Sent);
    assert!(events
        .iter()
        .any(|e| e.kind == EventKind::Resent && e.segment == SegmentKind::Syn));
}

/// An ACK for the wrong sequence number is ignored while in SYN_SENT.
#[tokio::test]
async fn sender_ignores_mismatched_syn_ack() {
    let peer = bind().await;
    let socket = bind().await;
    let config = SenderConfig {
        rto: Duration::from_secs(5),
        initial_seqno: Some(10),
        ..SenderConfig::default()
    };
    let mut sender = Sender::new(socket, peer.local_addr, config);
    let sender_addr = sender.local_addr();
    let task = tokio::spawn(async move { sender.connect().await });

    assert_eq!(recv(&peer).await.seqno, 10);
    peer.send_to(&Segment::ack(99), sender_addr).await.unwrap();
    peer.send_to(&Segment::ack(11), sender_addr).await.unwrap();

    timeout(Duration::from_secs(2), task)
        .await
        .expect("mismatched ACK should not stall the handshake")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn non_ack_in_syn_sent_is_a_protocol_violation() {
    let peer = bind().await;
    let socket = bind().await;
    let mut sender = Sender::new(socket, peer.local_addr, SenderConfig::default());
    let sender_addr = sender.local_addr();
    let task = tokio::spawn(async move { sender.connect().await });

    let syn = recv(&peer).await;
    peer.send_to(&Segment::fin(syn.seqno), sender_addr).await.unwrap();

    let result = timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
    assert!(matches!(
        result,
        Err(ConnError::ProtocolViolation {
            state: ConnectionState::SynSent,
            kind: SegmentKind::Fin
        })
    ));
}

/// Losing the SYN-ACK makes the sender resend its SYN; the established
/// receiver answers the duplicate SYN and the transfer still completes.
#[tokio::test]
async fn lost_syn_ack_is_recovered() {
    let receiver_socket = bind().await;
    let sender_socket = bind().await;
    let receiver = Receiver::new(
        receiver_socket,
        receiver_config(sender_socket.local_addr.port()),
    );
    let config = SenderConfig {
        rto: Duration::from_millis(50),
        ..SenderConfig::default()
    };
    let reverse = LossInjector::with_oracle(
        0.0,
        Arc::new(DropFirst(std::sync::atomic::AtomicBool::new(false))),
    );
    let sender = Sender::new(sender_socket, receiver.local_addr(), config)
        .with_loss(LossInjector::lossless(), reverse);

    let rx = tokio::spawn(async move {
        let mut out = Vec::new();
        let result = receiver.run(&mut out).await;
        result.map(|stats| (stats, out))
    });
    let data = b"hello after a lost handshake".to_vec();
    let sent = timeout(Duration::from_secs(10), sender.run(&data[..]))
        .await
        .unwrap()
        .unwrap();
    let (_, out) = timeout(Duration::from_secs(10), rx).await.unwrap().unwrap().unwrap();

    assert_eq!(out, data);
    assert_eq!(sent.acks_dropped, 1);
    assert!(sent.retransmitted_segments >= 1);
}

/// Once in TIME_WAIT only FIN retransmissions are legal.
#[tokio::test]
async fn data_in_time_wait_is_a_protocol_violation() {
    let peer = bind().await;
    let socket = bind().await;
    let receiver_addr = socket.local_addr;
    let config = ReceiverConfig {
        msl: Duration::from_secs(2),
        ..ReceiverConfig::new(peer.local_addr.port(), 1000)
    };
    let receiver = Receiver::new(socket, config);
    let task = tokio::spawn(async move {
        let mut out = Vec::new();
        receiver.run(&mut out).await
    });

    peer.send_to(&Segment::syn(300), receiver_addr).await.unwrap();
    assert_eq!(recv(&peer).await.seqno, 301);
    peer.send_to(&Segment::fin(301), receiver_addr).await.unwrap();
    assert_eq!(recv(&peer).await.seqno, 302);
    peer.send_to(&Segment::data(302, b"late".to_vec()), receiver_addr)
        .await
        .unwrap();

    let result = timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
    assert!(matches!(
        result,
        Err(ConnError::ProtocolViolation {
            state: ConnectionState::TimeWait,
            kind: SegmentKind::Data
        })
    ));
}

/// The receiver never sends data, so an ACK arriving after the handshake is
/// a violation.
#[tokio::test]
async fn ack_at_established_receiver_is_a_protocol_violation() {
    let peer = bind().await;
    let socket = bind().await;
    let receiver_addr = socket.local_addr;
    let receiver = Receiver::new(socket, receiver_config(peer.local_addr.port()));
    let task = tokio::spawn(async move {
        let mut out = Vec::new();
        receiver.run(&mut out).await
    });

    peer.send_to(&Segment::syn(9), receiver_addr).await.unwrap();
    assert_eq!(recv(&peer).await.seqno, 10);
    peer.send_to(&Segment::ack(10), receiver_addr).await.unwrap();

    let result = timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
    assert!(matches!(
        result,
        Err(ConnError::ProtocolViolation {
            state: ConnectionState::Established,
            kind: SegmentKind::Ack
        })
    ));
}
