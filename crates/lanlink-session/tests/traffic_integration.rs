//! Integration tests for traffic between admitted members: heartbeats and the
//! lag flag, application payload relaying, and file transfers.
//!
//! Every test wires real [`Session`]s (and, where a test needs to misbehave on
//! purpose, a scripted [`RawPeer`]) over a [`MemoryNetwork`].  Time only moves
//! when a test advances a [`ManualClock`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use lanlink_core::protocol::{
    AlivePing, AppMessage, JoinRequest, Negotiation, SlotFlags, XferData, XferInfo,
    BROADCAST_SLOT, HOST_SLOT, SESSION_PROTOCOL_VERSION,
};
use lanlink_core::{Millis, Packet, PeerAddress};
use lanlink_session::application::{
    AcceptAll, ClientState, EventLog, NetworkEvent, Notification, SessionPolicy,
};
use lanlink_session::infrastructure::clock::ManualClock;
use lanlink_session::infrastructure::network::mock::{MemoryNetwork, RawPeer};
use lanlink_session::infrastructure::network::Transport;
use lanlink_session::infrastructure::storage::config::SessionConfig;
use lanlink_session::infrastructure::storage::files::FsFileStore;
use lanlink_session::Session;
use uuid::Uuid;

const HOST: PeerAddress = PeerAddress::new(10, 1, 0, 1);
const ALICE: PeerAddress = PeerAddress::new(10, 1, 0, 2);
const BOB: PeerAddress = PeerAddress::new(10, 1, 0, 3);
const RAW: PeerAddress = PeerAddress::new(10, 1, 0, 9);
const PORT: u16 = 28800;

// ── Harness ───────────────────────────────────────────────────────────────────

struct Node {
    session: Session,
    log: EventLog,
    clock: ManualClock,
    dir: PathBuf,
}

impl Node {
    fn downloads(&self) -> PathBuf {
        self.dir.join("downloads")
    }
}

fn node_with(
    net: &MemoryNetwork,
    addr: PeerAddress,
    configure: impl FnOnce(&mut SessionConfig),
    policy: impl SessionPolicy + 'static,
) -> Node {
    let dir = std::env::temp_dir().join(format!("lanlink_traffic_{}", Uuid::new_v4()));
    let mut config = SessionConfig::default();
    config.storage.bookmarks_file = dir.join("bookmarks.txt");
    config.storage.blacklist_file = dir.join("blacklist.txt");
    config.storage.download_dir = dir.join("downloads");
    configure(&mut config);

    let clock = ManualClock::new(Millis(1_000));
    let log = EventLog::new();
    let session = Session::new(
        config,
        Box::new(net.transport(addr)),
        Box::new(clock.clone()),
        Box::new(FsFileStore),
    )
    .expect("session must build")
    .with_listener(log.clone())
    .with_policy(policy);
    Node {
        session,
        log,
        clock,
        dir,
    }
}

fn node(net: &MemoryNetwork, addr: PeerAddress) -> Node {
    node_with(net, addr, |_| {}, AcceptAll)
}

fn settle(sessions: &[&Session]) {
    for _ in 0..4 {
        for session in sessions {
            session.service();
        }
    }
}

/// A host with `members` joined clients, all finished loading.
fn hosted(net: &MemoryNetwork, members: &[PeerAddress]) -> (Node, Vec<Node>) {
    let host = node(net, HOST);
    host.session.host().expect("host");
    let clients: Vec<Node> = members.iter().map(|addr| node(net, *addr)).collect();
    for client in &clients {
        client.session.join(HOST, None).expect("join");
        let mut all: Vec<&Session> = vec![&host.session];
        all.extend(clients.iter().map(|c| &c.session));
        settle(&all);
        client.session.finish_loading().expect("finish loading");
    }
    let mut all: Vec<&Session> = vec![&host.session];
    all.extend(clients.iter().map(|c| &c.session));
    settle(&all);
    (host, clients)
}

/// A scripted member admitted into the host's next free slot.
fn raw_member(net: &MemoryNetwork, host: &Node) -> RawPeer {
    let mut raw = net.raw_connect(RAW, HOST, PORT);
    raw.send_packet(&Packet::ServerCmd(Negotiation::JoinRequest(JoinRequest {
        protocol_version: SESSION_PROTOCOL_VERSION,
        name: "scripted".to_string(),
        password: String::new(),
    })));
    host.session.service();
    raw.received();
    raw
}

fn app_messages(log: &EventLog) -> Vec<AppMessage> {
    log.take()
        .into_iter()
        .filter_map(|n| match n {
            Notification::App(message) => Some(message),
            _ => None,
        })
        .collect()
}

fn write_source(dir: &Path, name: &str, len: usize) -> (PathBuf, Vec<u8>) {
    std::fs::create_dir_all(dir).unwrap();
    let bytes: Vec<u8> = (0..len).map(|i| (i * 7 % 256) as u8).collect();
    let path = dir.join(name);
    std::fs::write(&path, &bytes).unwrap();
    (path, bytes)
}

// ── Heartbeat and lag ─────────────────────────────────────────────────────────

#[test]
fn test_lag_is_flagged_once_and_cleared_by_a_fresh_echo() {
    // Arrange: a member that never answers pings on its own.
    let net = MemoryNetwork::new();
    let host = node(&net, HOST);
    host.session.host().unwrap();
    let mut raw = raw_member(&net, &host);
    let lag_events = |log: &EventLog| {
        log.network_events()
            .iter()
            .filter(|e| matches!(e, NetworkEvent::LagDetected { slot: 1 }))
            .count()
    };

    // Act: stay silent past the threshold, then keep silent another interval.
    host.clock.advance(Duration::from_millis(1_500));
    host.session.service();
    host.clock.advance(Duration::from_millis(350));
    host.session.service();

    // Assert: flagged exactly once, and members are told.
    assert_eq!(lag_events(&host.log), 1);
    let flags = host.session.slot_flags(1).unwrap().expect("slot 1");
    assert!(flags.contains(SlotFlags::LAGGING));
    let received = raw.received();
    assert!(received.iter().any(|p| matches!(
        p,
        Packet::ServerCmd(Negotiation::ClientDetails(info))
            if info.id == 1 && info.flags.contains(SlotFlags::LAGGING)
    )));

    // Act: echo the latest ping straight back.
    let latest = received
        .iter()
        .rev()
        .find_map(|p| match p {
            Packet::Alive(ping) if !ping.response => Some(*ping),
            _ => None,
        })
        .expect("host must have pinged");
    raw.send_packet(&Packet::Alive(AlivePing {
        response: true,
        ..latest
    }));
    host.session.service();

    // Assert: cleared without a second event.
    let flags = host.session.slot_flags(1).unwrap().expect("slot 1");
    assert!(!flags.contains(SlotFlags::LAGGING));
    assert_eq!(lag_events(&host.log), 1);
    let stats = host.session.slot_stats(1).unwrap().expect("slot 1");
    assert_eq!(stats.last_rtt, Some(Duration::ZERO));

    // Act: silence again.
    host.clock.advance(Duration::from_millis(1_500));
    host.session.service();

    // Assert: a new episode is a new event.
    assert_eq!(lag_events(&host.log), 2);
}

#[test]
fn test_responsive_member_never_lags() {
    let net = MemoryNetwork::new();
    let (host, clients) = hosted(&net, &[ALICE]);

    for _ in 0..20 {
        host.clock.advance(Duration::from_millis(350));
        clients[0].clock.advance(Duration::from_millis(350));
        settle(&[&host.session, &clients[0].session]);
    }

    assert!(!host
        .log
        .network_events()
        .iter()
        .any(|e| matches!(e, NetworkEvent::LagDetected { .. })));
    let stats = host.session.slot_stats(1).unwrap().expect("slot 1");
    assert!(stats.last_rtt.is_some());
}

// ── Application payloads ──────────────────────────────────────────────────────

#[test]
fn test_host_relays_directed_and_broadcast_payloads() {
    // Arrange
    let net = MemoryNetwork::new();
    let (host, clients) = hosted(&net, &[ALICE, BOB]);
    let (alice, bob) = (&clients[0], &clients[1]);
    for log in [&host.log, &alice.log, &bob.log] {
        log.take();
    }

    // Act: alice writes to bob only.
    alice.session.send_app(2, b"psst".to_vec()).unwrap();
    settle(&[&host.session, &alice.session, &bob.session]);

    // Assert
    assert_eq!(
        app_messages(&bob.log),
        vec![AppMessage {
            from: 1,
            to: 2,
            body: b"psst".to_vec()
        }]
    );
    assert!(app_messages(&host.log).is_empty());

    // Act: alice writes to everyone.
    alice.session.send_app(BROADCAST_SLOT, b"hello all".to_vec()).unwrap();
    settle(&[&host.session, &alice.session, &bob.session]);

    // Assert: host and bob see it, alice does not get an echo.
    assert_eq!(app_messages(&host.log).len(), 1);
    assert_eq!(app_messages(&bob.log).len(), 1);
    assert!(app_messages(&alice.log).is_empty());
}

#[test]
fn test_host_stamps_the_real_sender_slot() {
    // Arrange
    let net = MemoryNetwork::new();
    let host = node(&net, HOST);
    host.session.host().unwrap();
    let mut raw = raw_member(&net, &host);
    host.log.take();

    // Act: the payload claims to come from slot 7.
    raw.send_packet(&Packet::App(AppMessage {
        from: 7,
        to: HOST_SLOT,
        body: b"trust me".to_vec(),
    }));
    host.session.service();

    // Assert
    let messages = app_messages(&host.log);
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].from, 1);
}

/// Drops payloads that start with `!`.
struct NoBang;

impl SessionPolicy for NoBang {
    fn validate_app_message(&self, message: &AppMessage) -> bool {
        !message.body.starts_with(b"!")
    }
}

#[test]
fn test_validator_drops_rejected_payloads_on_receive() {
    let net = MemoryNetwork::new();
    let host = node_with(&net, HOST, |_| {}, NoBang);
    host.session.host().unwrap();
    let mut raw = raw_member(&net, &host);
    host.log.take();

    raw.send_packet(&Packet::App(AppMessage {
        from: 1,
        to: HOST_SLOT,
        body: b"!shout".to_vec(),
    }));
    raw.send_packet(&Packet::App(AppMessage {
        from: 1,
        to: HOST_SLOT,
        body: b"talk".to_vec(),
    }));
    host.session.service();

    let bodies: Vec<Vec<u8>> = app_messages(&host.log).into_iter().map(|m| m.body).collect();
    assert_eq!(bodies, vec![b"talk".to_vec()]);
}

#[test]
fn test_payloads_from_unadmitted_peers_are_ignored() {
    let net = MemoryNetwork::new();
    let host = node(&net, HOST);
    host.session.host().unwrap();
    let mut raw = net.raw_connect(RAW, HOST, PORT);

    raw.send_packet(&Packet::App(AppMessage {
        from: 1,
        to: HOST_SLOT,
        body: b"early".to_vec(),
    }));
    host.session.service();

    assert!(app_messages(&host.log).is_empty());
}

// ── Stream handling ───────────────────────────────────────────────────────────

#[test]
fn test_oversized_frame_closes_the_connection() {
    // Arrange
    let net = MemoryNetwork::new();
    let host = node(&net, HOST);
    host.session.host().unwrap();
    let mut raw = raw_member(&net, &host);
    host.log.take();

    // Act: a header declaring 65535 bytes, far past the 8192-byte buffer.
    raw.send_bytes(&[3, 7, 0xFF, 0xFF]);
    host.session.service();

    // Assert
    assert_eq!(
        host.log.network_events(),
        vec![
            NetworkEvent::MalformedPacket { slot: 1 },
            NetworkEvent::ConnectionLost { slot: 1 },
        ]
    );
    assert_eq!(host.session.occupied_slots().unwrap(), 1);
    assert!(raw.is_closed());
}

#[test]
fn test_frame_shorter_than_its_header_closes_the_connection() {
    let net = MemoryNetwork::new();
    let host = node(&net, HOST);
    host.session.host().unwrap();
    let mut raw = raw_member(&net, &host);

    raw.send_bytes(&[3, 7, 0x00, 0x02]);
    host.session.service();

    assert!(host
        .log
        .network_events()
        .contains(&NetworkEvent::MalformedPacket { slot: 1 }));
    assert_eq!(host.session.occupied_slots().unwrap(), 1);
    assert!(raw.is_closed());
}

#[test]
fn test_session_reassembles_frames_split_across_reads() {
    // Arrange: every stream read returns at most three bytes.
    let net = MemoryNetwork::new();
    net.set_read_chunk(3);
    let host = node(&net, HOST);
    let alice = node(&net, ALICE);
    host.session.host().unwrap();

    // Act
    alice.session.join(HOST, None).unwrap();
    for _ in 0..20 {
        settle(&[&host.session, &alice.session]);
    }
    let body: Vec<u8> = (0..300).map(|i| (i % 251) as u8).collect();
    alice.session.send_app(HOST_SLOT, body.clone()).unwrap();
    for _ in 0..20 {
        settle(&[&host.session, &alice.session]);
    }

    // Assert
    assert_eq!(alice.session.client_state().unwrap(), ClientState::Joined);
    assert_eq!(host.session.roster().unwrap().len(), 2);
    let received = app_messages(&host.log);
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].body, body);
    for log in [&host.log, &alice.log] {
        assert!(!log
            .network_events()
            .iter()
            .any(|e| matches!(e, NetworkEvent::MalformedPacket { .. })));
    }
}

#[test]
fn test_readiness_notification_dispatches_without_a_poll() {
    // Arrange
    let net = MemoryNetwork::new();
    let host = node(&net, HOST);
    host.session.host().unwrap();
    let mut raw = raw_member(&net, &host);
    raw.send_packet(&Packet::App(AppMessage {
        from: 1,
        to: HOST_SLOT,
        body: b"ready".to_vec(),
    }));
    let ready = net.transport(HOST).poll_readable();
    assert_eq!(ready.len(), 1);

    // Act: the environment reports readiness; no service() call is made.
    host.session.notify_readable(ready[0]);

    // Assert
    let bodies: Vec<Vec<u8>> = app_messages(&host.log).into_iter().map(|m| m.body).collect();
    assert_eq!(bodies, vec![b"ready".to_vec()]);
}

// ── File transfer ─────────────────────────────────────────────────────────────

#[test]
fn test_member_file_arrives_complete_and_is_renamed_after_end() {
    // Arrange
    let net = MemoryNetwork::new();
    let (host, clients) = hosted(&net, &[ALICE]);
    let alice = &clients[0];
    let (source, bytes) = write_source(&alice.dir, "level.map", 5_000);
    let temp = host.downloads().join("level.map.RECV");
    let done = host.downloads().join("level.map");

    // Act: start, and let the host accept.
    let id = alice.session.send_file(HOST_SLOT, &source, None).expect("send");
    host.session.service();

    // Assert: only the temporary file exists while the transfer runs.
    assert!(temp.exists());
    assert!(!done.exists());
    assert_eq!(host.session.transfers().unwrap().len(), 1);

    // Act: run to completion.
    for _ in 0..4 {
        settle(&[&alice.session, &host.session]);
    }

    // Assert
    assert_eq!(std::fs::read(&done).expect("final file"), bytes);
    assert!(!temp.exists());
    assert!(host.log.contains(&Notification::Network(NetworkEvent::TransferCompleted {
        id,
        alias: "level.map".to_string(),
        bytes: 5_000,
        path: Some(done.clone()),
    })));
    assert!(alice.log.contains(&Notification::Network(NetworkEvent::TransferCompleted {
        id,
        alias: "level.map".to_string(),
        bytes: 5_000,
        path: None,
    })));
    assert!(host.session.transfers().unwrap().is_empty());
    assert!(alice.session.transfers().unwrap().is_empty());
}

#[test]
fn test_host_sends_file_under_an_alias() {
    let net = MemoryNetwork::new();
    let (host, clients) = hosted(&net, &[ALICE]);
    let alice = &clients[0];
    let (source, bytes) = write_source(&host.dir, "local-name.bin", 2_048);

    host.session
        .send_file(1, &source, Some("shared.bin".to_string()))
        .expect("send");
    for _ in 0..4 {
        settle(&[&host.session, &alice.session]);
    }

    assert_eq!(
        std::fs::read(alice.downloads().join("shared.bin")).expect("received"),
        bytes
    );
}

#[test]
fn test_dropped_connection_leaves_only_the_temporary_file() {
    // Arrange: a scripted sender in slot 1.
    let net = MemoryNetwork::new();
    let host = node(&net, HOST);
    host.session.host().unwrap();
    let mut raw = raw_member(&net, &host);
    let id = (1 << 8) | 1;
    raw.send_packet(&Packet::XferInfo(XferInfo::Start {
        id,
        alias: "big.bin".to_string(),
        total_size: 5_000,
    }));
    host.session.service();
    raw.send_packet(&Packet::XferData(XferData {
        id,
        bytes: vec![0xAB; 2_048],
    }));
    host.session.service();

    // Act
    raw.hang_up();
    host.session.service();

    // Assert
    assert!(host.downloads().join("big.bin.RECV").exists());
    assert!(!host.downloads().join("big.bin").exists());
    assert!(host
        .log
        .contains(&Notification::Network(NetworkEvent::ConnectionLost { slot: 1 })));
    assert!(host
        .log
        .network_events()
        .iter()
        .any(|e| matches!(e, NetworkEvent::TransferFailed { id: failed, .. } if *failed == id)));
    assert!(host.session.transfers().unwrap().is_empty());
}

#[test]
fn test_short_transfer_is_not_renamed() {
    let net = MemoryNetwork::new();
    let host = node(&net, HOST);
    host.session.host().unwrap();
    let mut raw = raw_member(&net, &host);
    let id = (1 << 8) | 1;

    raw.send_packet(&Packet::XferInfo(XferInfo::Start {
        id,
        alias: "short.bin".to_string(),
        total_size: 100,
    }));
    raw.send_packet(&Packet::XferData(XferData {
        id,
        bytes: vec![1; 40],
    }));
    raw.send_packet(&Packet::XferInfo(XferInfo::End { id }));
    host.session.service();

    assert!(host.downloads().join("short.bin.RECV").exists());
    assert!(!host.downloads().join("short.bin").exists());
}

#[test]
fn test_unsafe_alias_is_aborted_without_touching_disk() {
    let net = MemoryNetwork::new();
    let host = node(&net, HOST);
    host.session.host().unwrap();
    let mut raw = raw_member(&net, &host);
    let id = (1 << 8) | 1;

    raw.send_packet(&Packet::XferInfo(XferInfo::Start {
        id,
        alias: "../escape.bin".to_string(),
        total_size: 10,
    }));
    host.session.service();

    assert!(raw
        .received()
        .contains(&Packet::XferInfo(XferInfo::Abort { id })));
    assert!(!host.downloads().exists());
}

#[test]
fn test_transfer_id_owned_by_another_member_is_aborted() {
    let net = MemoryNetwork::new();
    let host = node(&net, HOST);
    host.session.host().unwrap();
    let mut raw = raw_member(&net, &host);
    let forged = (1 << 8) | 5;

    raw.send_packet(&Packet::XferInfo(XferInfo::Start {
        id: forged,
        alias: "x.bin".to_string(),
        total_size: 10,
    }));
    host.session.service();

    assert!(raw
        .received()
        .contains(&Packet::XferInfo(XferInfo::Abort { id: forged })));
    assert!(host.session.transfers().unwrap().is_empty());
}

#[test]
fn test_cancel_reaches_the_other_end() {
    // Arrange
    let net = MemoryNetwork::new();
    let (host, clients) = hosted(&net, &[ALICE]);
    let alice = &clients[0];
    let (source, _) = write_source(&alice.dir, "movie.bin", 50_000);
    let id = alice.session.send_file(HOST_SLOT, &source, None).unwrap();
    settle(&[&alice.session, &host.session]);

    // Act
    alice.session.cancel_transfer(id).unwrap();
    settle(&[&alice.session, &host.session]);

    // Assert
    let failed = |log: &EventLog| {
        log.network_events()
            .iter()
            .any(|e| matches!(e, NetworkEvent::TransferFailed { id: f, .. } if *f == id))
    };
    assert!(failed(&alice.log));
    assert!(failed(&host.log));
    assert!(host.session.transfers().unwrap().is_empty());
    assert!(!host.downloads().join("movie.bin").exists());
}
