//! End-to-end transfers over the in-memory simulator.
//!
//! Each test wires a [`Sender`] and a [`Receiver`] to the two ends of a
//! simulated link and drives both concurrently on the test runtime with
//! `tokio::join!`.  Acknowledgment timeouts are shortened so the loss
//! scenarios finish quickly.

use std::net::SocketAddr;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use udp_arq::observer::PacketStatus;
use udp_arq::packet::{encode_ack, END_OF_STREAM};
use udp_arq::simulator::{pair, SimSocket, SimulatorConfig};
use udp_arq::{
    receive_stream, send_stream, ArqError, Framing, MemoryObserver, ReceiveReport,
    ReceiverConfig, SendReport, SenderConfig, Transport, WindowSize,
};

const ACK_TIMEOUT: Duration = Duration::from_millis(50);

fn window(n: u32) -> WindowSize {
    WindowSize::new(n).expect("valid window")
}

fn sender_config(w: u32) -> SenderConfig {
    SenderConfig::new(window(w)).with_ack_timeout(ACK_TIMEOUT)
}

fn receiver_config(w: u32) -> ReceiverConfig {
    ReceiverConfig::new(window(w))
}

/// Deterministic bytes, including zeros.
fn sample(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn peer_of(sock: &SimSocket) -> SocketAddr {
    sock.local_addr().expect("sim address")
}

/// Run a full transfer of `input` from `a` to `b` and return both reports
/// together with what the receiver wrote.
async fn run_transfer(
    a: &SimSocket,
    b: &SimSocket,
    input: &[u8],
    scfg: SenderConfig,
    rcfg: ReceiverConfig,
    sobs: &MemoryObserver,
    robs: &MemoryObserver,
) -> (SendReport, ReceiveReport, Vec<u8>) {
    let mut output = Vec::new();
    let (sent, received) = tokio::join!(
        send_stream(a, peer_of(b), input, scfg, sobs),
        receive_stream(b, &mut output, rcfg, robs),
    );
    (
        sent.expect("sender failed"),
        received.expect("receiver failed"),
        output,
    )
}

// ---------------------------------------------------------------------------
// Clean link
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_four_chunks_then_end_of_stream() {
    let (a, b) = pair(SimulatorConfig::perfect(), SimulatorConfig::perfect());
    let (sobs, robs) = (MemoryObserver::new(), MemoryObserver::new());
    let input = sample(3500);

    let (sent, received, output) =
        run_transfer(&a, &b, &input, sender_config(4), receiver_config(4), &sobs, &robs).await;

    assert_eq!(output, input);
    assert_eq!(sobs.seqs_with(PacketStatus::Sent), vec![1, 2, 3, 4, 0]);
    assert_eq!(sobs.seqs_with(PacketStatus::AckReceived), vec![1, 2, 3, 4, 0]);
    assert!(sobs.seqs_with(PacketStatus::Retransmitted).is_empty());

    let sizes: Vec<usize> = sobs
        .events()
        .iter()
        .filter(|e| e.status == PacketStatus::Sent)
        .map(|e| e.size)
        .collect();
    assert_eq!(sizes, vec![1000, 1000, 1000, 500, 0]);

    assert_eq!(sent.chunks, 4);
    assert_eq!(sent.bytes, 3500);
    assert_eq!(sent.retransmissions, 0);
    assert_eq!(received.chunks, 4);
    assert_eq!(received.bytes, 3500);
    assert_eq!(received.peer, Some(peer_of(&a)));
    assert_eq!(robs.seqs_with(PacketStatus::AckSent), vec![1, 2, 3, 4, 0]);
}

#[tokio::test]
async fn test_empty_input_sends_only_end_of_stream() {
    let (a, b) = pair(SimulatorConfig::perfect(), SimulatorConfig::perfect());
    let (sobs, robs) = (MemoryObserver::new(), MemoryObserver::new());

    let (sent, received, output) =
        run_transfer(&a, &b, &[], sender_config(4), receiver_config(4), &sobs, &robs).await;

    assert!(output.is_empty());
    assert_eq!(sobs.seqs_with(PacketStatus::Sent), vec![END_OF_STREAM]);
    assert_eq!(robs.seqs_with(PacketStatus::AckSent), vec![END_OF_STREAM]);
    assert_eq!(sent.chunks, 0);
    assert_eq!(received.chunks, 0);
}

#[tokio::test]
async fn test_exact_multiple_of_chunk_size() {
    let (a, b) = pair(SimulatorConfig::perfect(), SimulatorConfig::perfect());
    let (sobs, robs) = (MemoryObserver::new(), MemoryObserver::new());
    let input = sample(3000);

    let (sent, _, output) =
        run_transfer(&a, &b, &input, sender_config(2), receiver_config(2), &sobs, &robs).await;

    assert_eq!(output, input);
    assert_eq!(sent.chunks, 3);
    assert_eq!(sobs.seqs_with(PacketStatus::Sent), vec![1, 2, 3, 0]);
}

#[tokio::test]
async fn test_binary_zeros_survive_length_prefixed_framing() {
    let (a, b) = pair(SimulatorConfig::perfect(), SimulatorConfig::perfect());
    let (sobs, robs) = (MemoryObserver::new(), MemoryObserver::new());
    let mut input = vec![0u8; 2500];
    input[1200] = 0xff;

    let (_, _, output) =
        run_transfer(&a, &b, &input, sender_config(4), receiver_config(4), &sobs, &robs).await;

    assert_eq!(output, input);
}

#[tokio::test]
async fn test_padded_framing_carries_text() {
    let (a, b) = pair(SimulatorConfig::perfect(), SimulatorConfig::perfect());
    let (sobs, robs) = (MemoryObserver::new(), MemoryObserver::new());
    let input: Vec<u8> = b"the quick brown fox jumps over the lazy dog\n"
        .iter()
        .copied()
        .cycle()
        .take(2200)
        .collect();

    let (_, _, output) = run_transfer(
        &a,
        &b,
        &input,
        sender_config(3).with_framing(Framing::ZeroPadded),
        receiver_config(3).with_framing(Framing::ZeroPadded),
        &sobs,
        &robs,
    )
    .await;

    assert_eq!(output, input);
}

#[tokio::test]
async fn test_padded_framing_strips_trailing_zeros() {
    let (a, b) = pair(SimulatorConfig::perfect(), SimulatorConfig::perfect());
    let (sobs, robs) = (MemoryObserver::new(), MemoryObserver::new());

    let (_, _, output) = run_transfer(
        &a,
        &b,
        b"abc\0\0",
        sender_config(1).with_framing(Framing::ZeroPadded),
        receiver_config(1).with_framing(Framing::ZeroPadded),
        &sobs,
        &robs,
    )
    .await;

    assert_eq!(output, b"abc");
}

// ---------------------------------------------------------------------------
// Loss and retransmission
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_lost_ack_retransmits_only_that_packet() {
    let (a, b) = pair(SimulatorConfig::perfect(), SimulatorConfig::perfect());
    let (sobs, robs) = (MemoryObserver::new(), MemoryObserver::new());
    let input = sample(3500);

    let ack_two = encode_ack(2);
    let mut dropped = false;
    b.set_drop_rule(move |frame| {
        if !dropped && frame == ack_two {
            dropped = true;
            return true;
        }
        false
    });

    let (sent, received, output) =
        run_transfer(&a, &b, &input, sender_config(4), receiver_config(4), &sobs, &robs).await;

    assert_eq!(output, input);
    assert_eq!(sobs.seqs_with(PacketStatus::Retransmitted), vec![2]);
    assert_eq!(sent.retransmissions, 1);
    assert_eq!(sent.timeouts, 1);
    assert_eq!(robs.seqs_with(PacketStatus::AckResent), vec![2]);
    assert_eq!(received.duplicates, 1);
    assert_eq!(received.chunks, 4);
    assert_eq!(b.stats().dropped, 1);
}

#[tokio::test]
async fn test_lost_data_packet_is_resent_and_gap_filled() {
    let (a, b) = pair(SimulatorConfig::perfect(), SimulatorConfig::perfect());
    let (sobs, robs) = (MemoryObserver::new(), MemoryObserver::new());
    let input = sample(5000);

    // Drop the first transmission of seq 3.
    let mut dropped = false;
    a.set_drop_rule(move |frame| {
        if !dropped && frame[..4] == 3u32.to_be_bytes() {
            dropped = true;
            return true;
        }
        false
    });

    let (_, received, output) =
        run_transfer(&a, &b, &input, sender_config(5), receiver_config(5), &sobs, &robs).await;

    assert_eq!(output, input);
    assert_eq!(sobs.seqs_with(PacketStatus::Retransmitted), vec![3]);
    assert_eq!(received.duplicates, 0);
    assert_eq!(received.chunks, 5);
}

#[tokio::test]
async fn test_every_ack_lost_aborts_after_three_timeouts() {
    let (a, b) = pair(SimulatorConfig::perfect(), SimulatorConfig::perfect());
    let (sobs, robs) = (MemoryObserver::new(), MemoryObserver::new());
    let input = sample(3500);
    b.set_drop_rule(|_| true);

    let mut output = Vec::new();
    let result = {
        let send = send_stream(&a, peer_of(&b), &input[..], sender_config(4), &sobs);
        let recv = receive_stream(&b, &mut output, receiver_config(4), &robs);
        tokio::select! {
            r = send => r,
            _ = recv => panic!("receiver finished without end of stream"),
        }
    };

    match result {
        Err(ArqError::RetransmissionLimitExceeded { base, timeouts }) => {
            assert_eq!(base, 1);
            assert_eq!(timeouts, 3);
        }
        other => panic!("expected retransmission limit, got {other:?}"),
    }

    // Two retransmission rounds of four packets before the third timeout.
    assert_eq!(
        sobs.seqs_with(PacketStatus::Retransmitted),
        vec![1, 2, 3, 4, 1, 2, 3, 4]
    );
    assert!(sobs.seqs_with(PacketStatus::AckReceived).is_empty());
    assert!(sobs
        .messages()
        .iter()
        .any(|m| m == "retransmission limit reached"));

    // Everything the receiver got is already on the sink.
    assert_eq!(output, input);
}

#[tokio::test]
async fn test_timeout_limit_is_configurable() {
    let (a, b) = pair(SimulatorConfig::perfect(), SimulatorConfig::perfect());
    let (sobs, robs) = (MemoryObserver::new(), MemoryObserver::new());
    b.set_drop_rule(|_| true);

    let mut output = Vec::new();
    let result = {
        let send = send_stream(
            &a,
            peer_of(&b),
            &b"hello"[..],
            sender_config(1).with_max_timeouts(1),
            &sobs,
        );
        let recv = receive_stream(&b, &mut output, receiver_config(1), &robs);
        tokio::select! {
            r = send => r,
            _ = recv => panic!("receiver finished without end of stream"),
        }
    };

    assert!(matches!(
        result,
        Err(ArqError::RetransmissionLimitExceeded { timeouts: 1, .. })
    ));
    assert!(sobs.seqs_with(PacketStatus::Retransmitted).is_empty());
}

#[tokio::test]
async fn test_stop_and_wait_over_lossy_link() {
    let (a, b) = pair(
        SimulatorConfig::lossy(0.2, 0.0, 0.0, 11),
        SimulatorConfig::lossy(0.2, 0.0, 0.0, 12),
    );
    let (sobs, robs) = (MemoryObserver::new(), MemoryObserver::new());
    let input = sample(6000);

    let (sent, _, output) = run_transfer(
        &a,
        &b,
        &input,
        sender_config(1).with_max_timeouts(20),
        receiver_config(1).with_linger(Duration::from_millis(500)),
        &sobs,
        &robs,
    )
    .await;

    assert_eq!(output, input);
    assert_eq!(sent.chunks, 6);
}

#[tokio::test]
async fn test_random_faults_in_both_directions() {
    for seed in [1u64, 2, 3] {
        let (a, b) = pair(
            SimulatorConfig::lossy(0.1, 0.05, 0.1, seed),
            SimulatorConfig::lossy(0.1, 0.05, 0.1, seed + 100),
        );
        let (sobs, robs) = (MemoryObserver::new(), MemoryObserver::new());
        let mut rng = StdRng::seed_from_u64(seed);
        let input: Vec<u8> = (0..20_500).map(|_| rng.random()).collect();

        let (sent, received, output) = run_transfer(
            &a,
            &b,
            &input,
            sender_config(8).with_max_timeouts(20),
            receiver_config(8).with_linger(Duration::from_millis(500)),
            &sobs,
            &robs,
        )
        .await;

        assert_eq!(output, input, "seed {seed}");
        assert_eq!(sent.chunks, 21, "seed {seed}");
        assert_eq!(received.chunks, 21, "seed {seed}");
    }
}

// ---------------------------------------------------------------------------
// Stray and malformed datagrams
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_receiver_handles_out_of_order_arrival() {
    let (a, b) = pair(SimulatorConfig::perfect(), SimulatorConfig::perfect());
    let robs = MemoryObserver::new();
    let framing = Framing::default();
    let b_addr = peer_of(&b);

    for (seq, payload) in [
        (3u32, &b"three"[..]),
        (1, &b"one"[..]),
        (2, &b"two"[..]),
        (0, &b""[..]),
    ] {
        let frame = framing.encode_data(seq, payload).expect("encode");
        a.send_to(&frame, b_addr).await.expect("send");
    }

    let mut output = Vec::new();
    let received = receive_stream(&b, &mut output, receiver_config(3), &robs)
        .await
        .expect("receiver failed");

    assert_eq!(output, b"onetwothree");
    assert_eq!(received.chunks, 3);
    assert_eq!(robs.seqs_with(PacketStatus::AckSent), vec![3, 1, 2, 0]);

    let mut acks = Vec::new();
    let mut buf = [0u8; 16];
    for _ in 0..4 {
        let (n, _) = a.recv_from(&mut buf).await.expect("ack");
        acks.push(udp_arq::packet::decode_ack(&buf[..n]).expect("decode ack"));
    }
    assert_eq!(acks, vec![3, 1, 2, 0]);
}

#[tokio::test]
async fn test_receiver_acks_last_delivered_for_packets_beyond_window() {
    let (a, b) = pair(SimulatorConfig::perfect(), SimulatorConfig::perfect());
    let robs = MemoryObserver::new();
    let framing = Framing::default();
    let b_addr = peer_of(&b);

    // W=2: seq 5 is beyond the window before and after seq 1 is delivered.
    for (seq, payload) in [
        (5u32, &b"far"[..]),
        (1, &b"a"[..]),
        (5, &b"far"[..]),
        (0, &b""[..]),
    ] {
        let frame = framing.encode_data(seq, payload).expect("encode");
        a.send_to(&frame, b_addr).await.expect("send");
    }

    let mut output = Vec::new();
    receive_stream(&b, &mut output, receiver_config(2), &robs)
        .await
        .expect("receiver failed");

    assert_eq!(output, b"a");
    // No ack while base is 1; afterwards the last delivered seq.
    assert_eq!(robs.seqs_with(PacketStatus::AckSent), vec![1, 0]);
    assert_eq!(robs.seqs_with(PacketStatus::AckResent), vec![1]);
}

#[tokio::test]
async fn test_receiver_ignores_foreign_peer_and_garbage() {
    let (a, b) = pair(SimulatorConfig::perfect(), SimulatorConfig::perfect());
    let robs = MemoryObserver::new();
    let framing = Framing::default();
    let a_addr = peer_of(&a);
    let b_addr = peer_of(&b);
    let intruder: SocketAddr = "10.0.0.99:6666".parse().expect("addr");

    // Garbage first: it must not lock the peer.
    b.inject(b"not a frame", intruder);
    a.send_to(&framing.encode_data(1, b"real-1").expect("encode"), b_addr)
        .await
        .expect("send");
    b.inject(&framing.encode_data(2, b"evil").expect("encode"), intruder);
    a.send_to(&framing.encode_data(2, b"real-2").expect("encode"), b_addr)
        .await
        .expect("send");
    b.inject(&framing.encode_data(0, b"").expect("encode"), intruder);
    a.send_to(&framing.encode_data(0, b"").expect("encode"), b_addr)
        .await
        .expect("send");

    let mut output = Vec::new();
    let received = receive_stream(&b, &mut output, receiver_config(4), &robs)
        .await
        .expect("receiver failed");

    assert_eq!(output, b"real-1real-2");
    assert_eq!(received.peer, Some(a_addr));

    let dropped: Vec<_> = robs
        .events()
        .into_iter()
        .filter(|e| e.status == PacketStatus::Dropped)
        .collect();
    assert_eq!(dropped.len(), 3);
    assert_eq!(dropped[0].note, Some("malformed"));
    assert!(dropped[1..].iter().all(|e| e.note == Some("unknown peer")));
    assert!(robs
        .events()
        .iter()
        .filter(|e| e.status == PacketStatus::AckSent)
        .all(|e| e.peer == Some(a_addr)));
}

#[tokio::test]
async fn test_sender_ignores_foreign_and_malformed_acks() {
    let (a, b) = pair(SimulatorConfig::perfect(), SimulatorConfig::perfect());
    let (sobs, robs) = (MemoryObserver::new(), MemoryObserver::new());
    let intruder: SocketAddr = "10.0.0.99:6666".parse().expect("addr");
    let input = sample(1500);

    // A forged ack would otherwise complete seq 1 before it is delivered.
    a.inject(&encode_ack(1), intruder);
    a.inject(b"xy", peer_of(&b));

    let (sent, _, output) =
        run_transfer(&a, &b, &input, sender_config(2), receiver_config(2), &sobs, &robs).await;

    assert_eq!(output, input);
    assert_eq!(sent.chunks, 2);
    let notes: Vec<_> = sobs
        .events()
        .into_iter()
        .filter(|e| e.status == PacketStatus::Dropped)
        .map(|e| e.note)
        .collect();
    assert_eq!(notes, vec![Some("unknown peer"), Some("malformed")]);
}

#[tokio::test]
async fn test_linger_reacknowledges_repeated_end_of_stream() {
    let (a, b) = pair(SimulatorConfig::perfect(), SimulatorConfig::perfect());
    let (sobs, robs) = (MemoryObserver::new(), MemoryObserver::new());
    let input = sample(1200);

    // Lose the first ack of end-of-stream; the sender resends it and the
    // lingering receiver answers again.
    let mut dropped = false;
    b.set_drop_rule(move |frame| {
        if !dropped && frame == encode_ack(END_OF_STREAM) {
            dropped = true;
            return true;
        }
        false
    });

    let (sent, _, output) = run_transfer(
        &a,
        &b,
        &input,
        sender_config(4),
        receiver_config(4).with_linger(Duration::from_millis(500)),
        &sobs,
        &robs,
    )
    .await;

    assert_eq!(output, input);
    assert_eq!(sobs.seqs_with(PacketStatus::Retransmitted), vec![END_OF_STREAM]);
    assert_eq!(sent.timeouts, 1);
    assert_eq!(
        robs.seqs_with(PacketStatus::AckSent),
        vec![1, 2, END_OF_STREAM, END_OF_STREAM]
    );
}

#[tokio::test]
async fn test_invalid_sender_config_is_rejected() {
    let (a, b) = pair(SimulatorConfig::perfect(), SimulatorConfig::perfect());
    let sobs = MemoryObserver::new();

    let result = send_stream(
        &a,
        peer_of(&b),
        &b"data"[..],
        sender_config(4).with_ack_timeout(Duration::ZERO),
        &sobs,
    )
    .await;

    assert!(matches!(result, Err(ArqError::Config(_))));
    assert!(sobs.events().is_empty());
    assert_eq!(a.stats().sent, 0);
}
