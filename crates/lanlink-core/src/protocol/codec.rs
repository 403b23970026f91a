//! Binary codec for encoding and decoding LanLink packets.
//!
//! Wire format:
//! ```text
//! [version:1][type:1][size:2][payload:N]
//! ```
//! `size` is the total frame size (header + payload).  All multi-byte integers
//! are big-endian.
//!
//! Validation happens before anything is dispatched: the version must equal
//! [`PROTOCOL_VERSION`], the declared size must lie in
//! `HEADER_SIZE..=BUFFER_CAPACITY`, the type byte must be a known, non-reserved
//! type, and for `ServerCmd` packets the sub-type must be a known
//! negotiation kind.

use crate::protocol::messages::{
    AlivePing, AllowJoin, AppMessage, DisconnectReason, DiscoveryPing, JoinRequest, MemberInfo,
    Negotiation, NegotiationKind, Packet, PacketType, ServerDescription, ServerOptions,
    ServerType, SlotFlags, XferData, XferInfo, BUFFER_CAPACITY, HEADER_SIZE, PROTOCOL_VERSION,
};
use thiserror::Error;

/// Errors that can occur during packet encoding or decoding.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The byte slice is shorter than the minimum required length.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The protocol version in the header is not the one this build speaks.
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// The declared frame size is below the header size or above the buffer
    /// capacity.
    #[error("invalid frame size: {declared}")]
    InvalidSize { declared: usize },

    /// The packet type byte is not recognized or is reserved.
    #[error("unknown packet type: 0x{0:02X}")]
    UnknownPacketType(u8),

    /// The `ServerCmd` sub-type byte is not a known negotiation kind.
    #[error("unknown negotiation kind: {0}")]
    UnknownNegotiationKind(u8),

    /// The payload could not be parsed (field out of range, UTF-8 error, etc.).
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// An outgoing packet would not fit into a peer's receive buffer.
    #[error("packet of {size} bytes exceeds the {BUFFER_CAPACITY}-byte limit")]
    PayloadTooLarge { size: usize },
}

impl ProtocolError {
    /// Returns `true` if the error leaves the byte stream unrecoverable and
    /// the connection must be torn down.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ProtocolError::InvalidSize { .. })
    }
}

// ── Header ────────────────────────────────────────────────────────────────────

/// The 4-byte header in front of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub version: u8,
    pub packet_type: u8,
    /// Total frame size, header included.
    pub size: u16,
}

impl PacketHeader {
    /// Reads a header from the first [`HEADER_SIZE`] bytes without validating
    /// it.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InsufficientData`] if fewer than four bytes
    /// are available.
    pub fn parse(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() < HEADER_SIZE {
            return Err(ProtocolError::InsufficientData {
                needed: HEADER_SIZE,
                available: bytes.len(),
            });
        }
        Ok(Self {
            version: bytes[0],
            packet_type: bytes[1],
            size: u16::from_be_bytes([bytes[2], bytes[3]]),
        })
    }

    /// Checks only the declared size, which is all a stream reader needs to
    /// delimit frames.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidSize`] for sizes outside
    /// `HEADER_SIZE..=BUFFER_CAPACITY`.
    pub fn validate_size(&self) -> Result<usize, ProtocolError> {
        let size = self.size as usize;
        if size < HEADER_SIZE || size > BUFFER_CAPACITY {
            return Err(ProtocolError::InvalidSize { declared: size });
        }
        Ok(size)
    }

    /// Validates the whole header: size, version, and packet type.
    ///
    /// # Errors
    ///
    /// Returns the first [`ProtocolError`] encountered.
    pub fn validate(&self) -> Result<PacketType, ProtocolError> {
        self.validate_size()?;
        if self.version != PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion(self.version));
        }
        match PacketType::try_from(self.packet_type) {
            Ok(PacketType::Generic) | Err(()) => {
                Err(ProtocolError::UnknownPacketType(self.packet_type))
            }
            Ok(packet_type) => Ok(packet_type),
        }
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a [`Packet`] into a complete frame including the header.
///
/// # Errors
///
/// Returns [`ProtocolError::PayloadTooLarge`] if the frame would exceed
/// [`BUFFER_CAPACITY`].
///
/// # Examples
///
/// ```rust
/// use lanlink_core::protocol::{decode_packet, encode_packet};
/// use lanlink_core::protocol::messages::{AlivePing, Packet};
///
/// let packet = Packet::Alive(AlivePing { response: false, slot: 2, stamp_ms: 99 });
/// let bytes = encode_packet(&packet).unwrap();
/// let (decoded, consumed) = decode_packet(&bytes).unwrap();
/// assert_eq!(decoded, packet);
/// assert_eq!(consumed, bytes.len());
/// ```
pub fn encode_packet(packet: &Packet) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = Vec::with_capacity(64);
    buf.push(PROTOCOL_VERSION);
    buf.push(packet.packet_type() as u8);
    buf.extend_from_slice(&[0x00, 0x00]); // size, patched below

    encode_payload(&mut buf, packet);

    let size = buf.len();
    if size > BUFFER_CAPACITY {
        return Err(ProtocolError::PayloadTooLarge { size });
    }
    buf[2..4].copy_from_slice(&(size as u16).to_be_bytes());
    Ok(buf)
}

/// Decodes one [`Packet`] from the beginning of `bytes`.
///
/// Returns the packet and the number of bytes consumed (the declared frame
/// size), so the caller can advance its read cursor.
///
/// # Errors
///
/// Returns [`ProtocolError`] if the header is invalid, the frame is
/// incomplete, or the payload is malformed.
pub fn decode_packet(bytes: &[u8]) -> Result<(Packet, usize), ProtocolError> {
    let header = PacketHeader::parse(bytes)?;
    let packet_type = header.validate()?;
    let size = header.size as usize;
    if bytes.len() < size {
        return Err(ProtocolError::InsufficientData {
            needed: size,
            available: bytes.len(),
        });
    }

    let payload = &bytes[HEADER_SIZE..size];
    let packet = decode_payload(packet_type, payload)?;
    Ok((packet, size))
}

// ── Payload encoding ──────────────────────────────────────────────────────────

fn encode_payload(buf: &mut Vec<u8>, packet: &Packet) {
    match packet {
        Packet::ServerCmd(msg) => encode_negotiation(buf, msg),
        Packet::App(m) => {
            buf.push(m.from);
            buf.push(m.to);
            buf.extend_from_slice(&m.body);
        }
        Packet::BroadcastPing(DiscoveryPing::Query) => buf.push(0x00),
        Packet::BroadcastPing(DiscoveryPing::Announce(desc)) => {
            buf.push(0x01);
            encode_server_description(buf, desc);
        }
        Packet::Alive(ping) => {
            buf.push(u8::from(ping.response));
            buf.push(ping.slot);
            buf.extend_from_slice(&ping.stamp_ms.to_be_bytes());
        }
        Packet::XferData(data) => {
            buf.extend_from_slice(&data.id.to_be_bytes());
            let len = data.bytes.len().min(u16::MAX as usize);
            buf.extend_from_slice(&(len as u16).to_be_bytes());
            buf.extend_from_slice(&data.bytes[..len]);
        }
        Packet::XferInfo(info) => encode_xfer_info(buf, info),
    }
}

fn encode_negotiation(buf: &mut Vec<u8>, msg: &Negotiation) {
    buf.push(msg.kind() as u8);
    match msg {
        Negotiation::JoinRequest(req) => {
            buf.extend_from_slice(&req.protocol_version.to_be_bytes());
            write_length_prefixed_string(buf, &req.name);
            write_length_prefixed_string(buf, &req.password);
        }
        Negotiation::AllowJoin(allow) => {
            buf.push(allow.assigned_id);
            buf.push(allow.max_players);
            buf.push(allow.server_type as u8);
            buf.push(allow.options.0);
            buf.push(allow.members.len() as u8);
            for member in &allow.members {
                encode_member(buf, member);
            }
        }
        Negotiation::DisallowJoin { reason } => buf.push(*reason as u8),
        Negotiation::ClientDetails(member) => encode_member(buf, member),
        Negotiation::ServerDetails(desc) => encode_server_description(buf, desc),
        Negotiation::ClientDisconnect { reason, slot } => {
            buf.push(*reason as u8);
            buf.push(*slot);
        }
        Negotiation::ServerDisconnect { reason } => buf.push(*reason as u8),
    }
}

fn encode_member(buf: &mut Vec<u8>, member: &MemberInfo) {
    buf.push(member.id);
    buf.push(member.flags.0);
    write_length_prefixed_string(buf, &member.name);
}

fn encode_server_description(buf: &mut Vec<u8>, desc: &ServerDescription) {
    buf.push(desc.server_type as u8);
    buf.push(desc.options.0);
    buf.push(desc.min_level);
    buf.push(desc.max_level);
    buf.push(desc.max_players);
    buf.push(desc.player_count);
    buf.extend_from_slice(&desc.session_port.to_be_bytes());
    buf.extend_from_slice(&desc.uptime_secs.to_be_bytes());
    write_length_prefixed_string(buf, &desc.name);
    write_length_prefixed_string(buf, &desc.description);
}

fn encode_xfer_info(buf: &mut Vec<u8>, info: &XferInfo) {
    let kind = match info {
        XferInfo::Start { .. } => 0x00,
        XferInfo::Ack { .. } => 0x01,
        XferInfo::End { .. } => 0x02,
        XferInfo::Abort { .. } => 0x03,
    };
    buf.push(kind);
    buf.extend_from_slice(&info.id().to_be_bytes());
    if let XferInfo::Start {
        alias, total_size, ..
    } = info
    {
        buf.extend_from_slice(&total_size.to_be_bytes());
        write_length_prefixed_string(buf, alias);
    }
}

// ── Payload decoding ──────────────────────────────────────────────────────────

fn decode_payload(packet_type: PacketType, p: &[u8]) -> Result<Packet, ProtocolError> {
    match packet_type {
        PacketType::ServerCmd => decode_negotiation(p).map(Packet::ServerCmd),
        PacketType::App => {
            require_len(p, 2, "App")?;
            Ok(Packet::App(AppMessage {
                from: p[0],
                to: p[1],
                body: p[2..].to_vec(),
            }))
        }
        PacketType::BroadcastPing => {
            require_len(p, 1, "BroadcastPing")?;
            match p[0] {
                0x00 => Ok(Packet::BroadcastPing(DiscoveryPing::Query)),
                0x01 => decode_server_description(&p[1..])
                    .map(|desc| Packet::BroadcastPing(DiscoveryPing::Announce(desc))),
                other => Err(ProtocolError::MalformedPayload(format!(
                    "unknown discovery ping kind: {other}"
                ))),
            }
        }
        PacketType::Alive => {
            require_len(p, 10, "Alive")?;
            Ok(Packet::Alive(AlivePing {
                response: p[0] != 0,
                slot: p[1],
                stamp_ms: read_u64(p, 2)?,
            }))
        }
        PacketType::XferData => {
            require_len(p, 6, "XferData")?;
            let id = read_u32(p, 0)?;
            let len = u16::from_be_bytes([p[4], p[5]]) as usize;
            require_len(p, 6 + len, "XferData.bytes")?;
            Ok(Packet::XferData(XferData {
                id,
                bytes: p[6..6 + len].to_vec(),
            }))
        }
        PacketType::XferInfo => decode_xfer_info(p).map(Packet::XferInfo),
        PacketType::Generic => Err(ProtocolError::UnknownPacketType(PacketType::Generic as u8)),
    }
}

fn decode_negotiation(p: &[u8]) -> Result<Negotiation, ProtocolError> {
    require_len(p, 1, "ServerCmd")?;
    let kind = NegotiationKind::try_from(p[0])
        .map_err(|_| ProtocolError::UnknownNegotiationKind(p[0]))?;
    let body = &p[1..];
    match kind {
        NegotiationKind::JoinRequest => {
            require_len(body, 2, "JoinRequest")?;
            let protocol_version = u16::from_be_bytes([body[0], body[1]]);
            let (name, name_end) = read_length_prefixed_string(body, 2)?;
            let (password, _) = read_length_prefixed_string(body, name_end)?;
            Ok(Negotiation::JoinRequest(JoinRequest {
                protocol_version,
                name,
                password,
            }))
        }
        NegotiationKind::AllowJoin => {
            require_len(body, 5, "AllowJoin")?;
            let server_type = read_server_type(body[2])?;
            let count = body[4] as usize;
            let mut members = Vec::with_capacity(count);
            let mut off = 5;
            for _ in 0..count {
                let (member, next) = decode_member(body, off)?;
                members.push(member);
                off = next;
            }
            Ok(Negotiation::AllowJoin(AllowJoin {
                assigned_id: body[0],
                max_players: body[1],
                server_type,
                options: ServerOptions(body[3]),
                members,
            }))
        }
        NegotiationKind::DisallowJoin => {
            require_len(body, 1, "DisallowJoin")?;
            Ok(Negotiation::DisallowJoin {
                reason: read_reason(body[0])?,
            })
        }
        NegotiationKind::ClientDetails => {
            let (member, _) = decode_member(body, 0)?;
            Ok(Negotiation::ClientDetails(member))
        }
        NegotiationKind::ServerDetails => {
            decode_server_description(body).map(Negotiation::ServerDetails)
        }
        NegotiationKind::ClientDisconnect => {
            require_len(body, 2, "ClientDisconnect")?;
            Ok(Negotiation::ClientDisconnect {
                reason: read_reason(body[0])?,
                slot: body[1],
            })
        }
        NegotiationKind::ServerDisconnect => {
            require_len(body, 1, "ServerDisconnect")?;
            Ok(Negotiation::ServerDisconnect {
                reason: read_reason(body[0])?,
            })
        }
    }
}

fn decode_member(p: &[u8], offset: usize) -> Result<(MemberInfo, usize), ProtocolError> {
    require_len(p, offset + 2, "MemberInfo")?;
    let id = p[offset];
    let flags = SlotFlags(p[offset + 1]);
    let (name, end) = read_length_prefixed_string(p, offset + 2)?;
    Ok((MemberInfo { id, flags, name }, end))
}

fn decode_server_description(p: &[u8]) -> Result<ServerDescription, ProtocolError> {
    // 6 single bytes + 2 (port) + 4 (uptime)
    require_len(p, 12, "ServerDescription")?;
    let server_type = read_server_type(p[0])?;
    let session_port = u16::from_be_bytes([p[6], p[7]]);
    let uptime_secs = read_u32(p, 8)?;
    let (name, name_end) = read_length_prefixed_string(p, 12)?;
    let (description, _) = read_length_prefixed_string(p, name_end)?;
    Ok(ServerDescription {
        name,
        description,
        server_type,
        options: ServerOptions(p[1]),
        min_level: p[2],
        max_level: p[3],
        max_players: p[4],
        player_count: p[5],
        session_port,
        uptime_secs,
    })
}

fn decode_xfer_info(p: &[u8]) -> Result<XferInfo, ProtocolError> {
    require_len(p, 5, "XferInfo")?;
    let id = read_u32(p, 1)?;
    match p[0] {
        0x00 => {
            require_len(p, 9, "XferInfo.Start")?;
            let total_size = read_u32(p, 5)?;
            let (alias, _) = read_length_prefixed_string(p, 9)?;
            Ok(XferInfo::Start {
                id,
                alias,
                total_size,
            })
        }
        0x01 => Ok(XferInfo::Ack { id }),
        0x02 => Ok(XferInfo::End { id }),
        0x03 => Ok(XferInfo::Abort { id }),
        other => Err(ProtocolError::MalformedPayload(format!(
            "unknown transfer info kind: {other}"
        ))),
    }
}

// ── Utility helpers ───────────────────────────────────────────────────────────

fn read_reason(byte: u8) -> Result<DisconnectReason, ProtocolError> {
    DisconnectReason::try_from(byte)
        .map_err(|_| ProtocolError::MalformedPayload(format!("unknown disconnect reason: {byte}")))
}

fn read_server_type(byte: u8) -> Result<ServerType, ProtocolError> {
    ServerType::try_from(byte)
        .map_err(|_| ProtocolError::MalformedPayload(format!("unknown server type: {byte}")))
}

fn require_len(buf: &[u8], needed: usize, context: &str) -> Result<(), ProtocolError> {
    if buf.len() < needed {
        Err(ProtocolError::MalformedPayload(format!(
            "{context}: need {needed} bytes, got {}",
            buf.len()
        )))
    } else {
        Ok(())
    }
}

fn read_u32(buf: &[u8], offset: usize) -> Result<u32, ProtocolError> {
    match buf.get(offset..offset + 4) {
        Some(b) => Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]])),
        None => Err(ProtocolError::InsufficientData {
            needed: offset + 4,
            available: buf.len(),
        }),
    }
}

fn read_u64(buf: &[u8], offset: usize) -> Result<u64, ProtocolError> {
    match buf.get(offset..offset + 8) {
        Some(b) => {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(b);
            Ok(u64::from_be_bytes(raw))
        }
        None => Err(ProtocolError::InsufficientData {
            needed: offset + 8,
            available: buf.len(),
        }),
    }
}

/// Writes a 2-byte length prefix followed by the UTF-8 string bytes.
fn write_length_prefixed_string(buf: &mut Vec<u8>, s: &str) {
    let bytes = s.as_bytes();
    let len = bytes.len().min(u16::MAX as usize);
    buf.extend_from_slice(&(len as u16).to_be_bytes());
    buf.extend_from_slice(&bytes[..len]);
}

/// Reads a 2-byte length prefix and then that many UTF-8 bytes.
/// Returns the string and the offset of the byte after the string.
fn read_length_prefixed_string(buf: &[u8], offset: usize) -> Result<(String, usize), ProtocolError> {
    if buf.len() < offset + 2 {
        return Err(ProtocolError::MalformedPayload(format!(
            "need 2 bytes for string length at offset {offset}"
        )));
    }
    let len = u16::from_be_bytes([buf[offset], buf[offset + 1]]) as usize;
    let start = offset + 2;
    if buf.len() < start + len {
        return Err(ProtocolError::MalformedPayload(format!(
            "string of length {len} at offset {start} exceeds buffer"
        )));
    }
    let s = std::str::from_utf8(&buf[start..start + len])
        .map_err(|e| ProtocolError::MalformedPayload(format!("invalid UTF-8: {e}")))?
        .to_string();
    Ok((s, start + len))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::{ServerOptions, SlotFlags};

    fn frame(version: u8, packet_type: u8, payload: &[u8]) -> Vec<u8> {
        let size = (HEADER_SIZE + payload.len()) as u16;
        let mut bytes = vec![version, packet_type];
        bytes.extend_from_slice(&size.to_be_bytes());
        bytes.extend_from_slice(payload);
        bytes
    }

    // ── Header validation ────────────────────────────────────────────────────

    #[test]
    fn test_decode_rejects_wrong_version_before_payload() {
        // Arrange: a well-formed ALIVE payload behind a foreign version byte
        let bytes = frame(PROTOCOL_VERSION + 1, PacketType::Alive as u8, &[0; 10]);

        // Act
        let result = decode_packet(&bytes);

        // Assert
        assert_eq!(result, Err(ProtocolError::UnsupportedVersion(PROTOCOL_VERSION + 1)));
    }

    #[test]
    fn test_header_with_zero_size_is_invalid() {
        let header = PacketHeader {
            version: PROTOCOL_VERSION,
            packet_type: PacketType::App as u8,
            size: 0,
        };
        assert_eq!(header.validate(), Err(ProtocolError::InvalidSize { declared: 0 }));
    }

    #[test]
    fn test_header_above_capacity_is_invalid() {
        let header = PacketHeader {
            version: PROTOCOL_VERSION,
            packet_type: PacketType::App as u8,
            size: (BUFFER_CAPACITY + 1) as u16,
        };
        let err = header.validate().unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_header_at_capacity_is_valid() {
        let header = PacketHeader {
            version: PROTOCOL_VERSION,
            packet_type: PacketType::App as u8,
            size: BUFFER_CAPACITY as u16,
        };
        assert_eq!(header.validate(), Ok(PacketType::App));
    }

    #[test]
    fn test_generic_packet_type_is_rejected() {
        let bytes = frame(PROTOCOL_VERSION, PacketType::Generic as u8, &[]);
        assert_eq!(decode_packet(&bytes), Err(ProtocolError::UnknownPacketType(0)));
    }

    #[test]
    fn test_unknown_negotiation_kind_is_rejected() {
        let bytes = frame(PROTOCOL_VERSION, PacketType::ServerCmd as u8, &[42]);
        assert_eq!(decode_packet(&bytes), Err(ProtocolError::UnknownNegotiationKind(42)));
    }

    #[test]
    fn test_unknown_disconnect_reason_is_malformed() {
        let bytes = frame(
            PROTOCOL_VERSION,
            PacketType::ServerCmd as u8,
            &[NegotiationKind::ServerDisconnect as u8, 99],
        );
        assert!(matches!(decode_packet(&bytes), Err(ProtocolError::MalformedPayload(_))));
    }

    #[test]
    fn test_decode_reports_incomplete_frame() {
        let mut bytes = encode_packet(&Packet::App(AppMessage {
            from: 1,
            to: 2,
            body: vec![7; 20],
        }))
        .unwrap();
        bytes.truncate(10);
        assert!(matches!(
            decode_packet(&bytes),
            Err(ProtocolError::InsufficientData { needed: 26, available: 10 })
        ));
    }

    // ── Encoding ─────────────────────────────────────────────────────────────

    #[test]
    fn test_encode_writes_total_size_into_header() {
        let bytes = encode_packet(&Packet::App(AppMessage {
            from: 0,
            to: 1,
            body: vec![1, 2, 3],
        }))
        .unwrap();
        let header = PacketHeader::parse(&bytes).unwrap();
        assert_eq!(header.size as usize, bytes.len());
        assert_eq!(bytes.len(), HEADER_SIZE + 2 + 3);
    }

    #[test]
    fn test_encode_refuses_packets_larger_than_buffer() {
        let packet = Packet::App(AppMessage {
            from: 0,
            to: 1,
            body: vec![0; BUFFER_CAPACITY],
        });
        assert!(matches!(
            encode_packet(&packet),
            Err(ProtocolError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn test_allow_join_preserves_roster_order() {
        // Arrange
        let packet = Packet::ServerCmd(Negotiation::AllowJoin(AllowJoin {
            assigned_id: 2,
            max_players: 4,
            server_type: ServerType::Roleplay,
            options: ServerOptions(ServerOptions::PASSWORD),
            members: vec![
                MemberInfo {
                    id: 0,
                    flags: SlotFlags(SlotFlags::CONNECTED),
                    name: "host".to_string(),
                },
                MemberInfo {
                    id: 2,
                    flags: SlotFlags(SlotFlags::CONNECTED | SlotFlags::LOADING),
                    name: "newcomer".to_string(),
                },
            ],
        }));

        // Act
        let (decoded, _) = decode_packet(&encode_packet(&packet).unwrap()).unwrap();

        // Assert
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_xfer_start_carries_alias_and_size() {
        let packet = Packet::XferInfo(XferInfo::Start {
            id: 0x0102_0304,
            alias: "map.dat".to_string(),
            total_size: 70_000,
        });
        let (decoded, _) = decode_packet(&encode_packet(&packet).unwrap()).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_xfer_data_with_short_body_is_malformed() {
        // Declares 10 bytes of chunk data but supplies 2.
        let mut payload = 7u32.to_be_bytes().to_vec();
        payload.extend_from_slice(&10u16.to_be_bytes());
        payload.extend_from_slice(&[1, 2]);
        let bytes = frame(PROTOCOL_VERSION, PacketType::XferData as u8, &payload);
        assert!(matches!(decode_packet(&bytes), Err(ProtocolError::MalformedPayload(_))));
    }

    #[test]
    fn test_discovery_announce_carries_description() {
        let packet = Packet::BroadcastPing(DiscoveryPing::Announce(ServerDescription {
            name: "Dusk Keep".to_string(),
            description: "weekly raid".to_string(),
            server_type: ServerType::Cooperative,
            options: ServerOptions(ServerOptions::KEY_SHARING),
            min_level: 5,
            max_level: 30,
            max_players: 6,
            player_count: 3,
            session_port: 28800,
            uptime_secs: 3600,
        }));
        let (decoded, n) = decode_packet(&encode_packet(&packet).unwrap()).unwrap();
        assert_eq!(decoded, packet);
        assert!(n > HEADER_SIZE);
    }
}
