//! Criterion benchmarks for the LanLink packet codec and frame buffer.
//!
//! Measures encoding and decoding of the packets a session exchanges most
//! often, and frame extraction from a buffer holding a burst of frames.
//!
//! Run with:
//! ```bash
//! cargo bench --package lanlink-core --bench codec_bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use lanlink_core::protocol::{
    AlivePing, AppMessage, FrameBuffer, MemberInfo, Negotiation, ServerDescription, ServerOptions,
    ServerType, SlotFlags, XferData, XferInfo, XFER_CHUNK_SIZE,
};
use lanlink_core::{decode_packet, encode_packet, Packet};

// ── Packet fixtures ───────────────────────────────────────────────────────────

fn make_alive() -> Packet {
    Packet::Alive(AlivePing {
        response: false,
        slot: 3,
        stamp_ms: 1_234_567,
    })
}

fn make_app() -> Packet {
    Packet::App(AppMessage {
        from: 2,
        to: 0xFF,
        body: vec![0x5A; 64],
    })
}

fn make_server_details() -> Packet {
    Packet::ServerCmd(Negotiation::ServerDetails(ServerDescription {
        name: "Benchmark Hall".to_string(),
        description: "eight players, cooperative".to_string(),
        server_type: ServerType::Cooperative,
        options: ServerOptions(ServerOptions::FRIENDLY_FIRE),
        min_level: 1,
        max_level: 50,
        max_players: 8,
        player_count: 5,
        session_port: 28800,
        uptime_secs: 3600,
    }))
}

fn make_client_details() -> Packet {
    Packet::ServerCmd(Negotiation::ClientDetails(MemberInfo {
        id: 4,
        flags: SlotFlags(SlotFlags::CONNECTED | SlotFlags::LAGGING),
        name: "bench-player".to_string(),
    }))
}

fn make_xfer_data() -> Packet {
    Packet::XferData(XferData {
        id: 0x0000_0103,
        bytes: vec![0xA5; XFER_CHUNK_SIZE],
    })
}

fn make_xfer_ack() -> Packet {
    Packet::XferInfo(XferInfo::Ack { id: 0x0000_0103 })
}

fn fixtures() -> Vec<(&'static str, Packet)> {
    vec![
        ("Alive", make_alive()),
        ("App(64)", make_app()),
        ("ServerDetails", make_server_details()),
        ("ClientDetails", make_client_details()),
        ("XferData(2048)", make_xfer_data()),
        ("XferAck", make_xfer_ack()),
    ]
}

// ── Benchmark groups ──────────────────────────────────────────────────────────

/// Benchmarks `encode_packet` for each fixture.
fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_packet");
    for (name, packet) in fixtures() {
        group.bench_with_input(BenchmarkId::new("packet", name), &packet, |b, packet| {
            b.iter(|| encode_packet(black_box(packet)).expect("encode must succeed"))
        });
    }
    group.finish();
}

/// Benchmarks `decode_packet` from pre-encoded bytes.
fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_packet");
    for (name, packet) in fixtures() {
        let bytes = encode_packet(&packet).expect("encode must succeed for benchmark setup");
        group.bench_with_input(BenchmarkId::new("packet", name), &bytes, |b, bytes| {
            b.iter(|| decode_packet(black_box(bytes)).expect("decode must succeed"))
        });
    }
    group.finish();
}

/// Benchmarks extracting a burst of heartbeat frames from one buffer fill,
/// the pattern of a busy host's read path.
fn bench_frame_extraction(c: &mut Criterion) {
    let frame = encode_packet(&make_alive()).expect("encode must succeed for benchmark setup");
    let burst: Vec<u8> = frame.iter().copied().cycle().take(frame.len() * 400).collect();

    c.bench_function("frame_buffer_burst_400", |b| {
        b.iter(|| {
            let mut buffer = FrameBuffer::new();
            buffer.extend_from_slice(black_box(&burst));
            let mut count = 0usize;
            while let Ok(Some(frame)) = buffer.next_frame() {
                count += black_box(frame).len();
            }
            buffer.compact();
            count
        })
    });
}

criterion_group!(benches, bench_encode, bench_decode, bench_frame_extraction);
criterion_main!(benches);
