//! All LanLink protocol packet types.
//!
//! Every packet travels as a 4-byte header followed by a type-specific
//! payload.  The header carries the protocol version, the packet type byte,
//! and the total frame size (header + payload).  Session-negotiation packets
//! share a single packet type (`ServerCmd`) and carry a sub-type byte as the
//! first payload byte.

use serde::{Deserialize, Serialize};

// ── Protocol constants ────────────────────────────────────────────────────────

/// Current protocol version byte carried in every frame header.
pub const PROTOCOL_VERSION: u8 = 0x03;

/// Negotiation-level protocol version exchanged inside JOIN_REQUEST.
///
/// Applications may replace this with their own build number through the
/// session configuration; hosts refuse clients whose value differs.
pub const SESSION_PROTOCOL_VERSION: u16 = 0x0100;

/// Size of the frame header in bytes.
pub const HEADER_SIZE: usize = 4;

/// Capacity of each per-connection receive buffer, and therefore the largest
/// frame the protocol admits.
pub const BUFFER_CAPACITY: usize = 8192;

/// Maximum number of connection slots, the host's own slot included.
pub const MAX_CLIENTS: usize = 8;

/// Largest chunk carried by a single XFER_DATA packet.
pub const XFER_CHUNK_SIZE: usize = 2048;

/// Slot id used by the host for its own identity.
pub const HOST_SLOT: u8 = 0;

/// Destination id meaning "every member of the session".
pub const BROADCAST_SLOT: u8 = 0xFF;

// ── Packet type codes ─────────────────────────────────────────────────────────

/// Packet type byte in the frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PacketType {
    /// Reserved; never sent and rejected on receipt.
    Generic = 0x00,
    ServerCmd = 0x01,
    App = 0x07,
    BroadcastPing = 0x08,
    Alive = 0x09,
    XferData = 0x0A,
    XferInfo = 0x0B,
}

impl TryFrom<u8> for PacketType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(PacketType::Generic),
            0x01 => Ok(PacketType::ServerCmd),
            0x07 => Ok(PacketType::App),
            0x08 => Ok(PacketType::BroadcastPing),
            0x09 => Ok(PacketType::Alive),
            0x0A => Ok(PacketType::XferData),
            0x0B => Ok(PacketType::XferInfo),
            _ => Err(()),
        }
    }
}

/// Session-negotiation sub-type carried as the first byte of a `ServerCmd`
/// payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum NegotiationKind {
    JoinRequest = 0,
    AllowJoin = 1,
    DisallowJoin = 2,
    ClientDetails = 3,
    ServerDetails = 4,
    ClientDisconnect = 5,
    ServerDisconnect = 6,
}

impl TryFrom<u8> for NegotiationKind {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(NegotiationKind::JoinRequest),
            1 => Ok(NegotiationKind::AllowJoin),
            2 => Ok(NegotiationKind::DisallowJoin),
            3 => Ok(NegotiationKind::ClientDetails),
            4 => Ok(NegotiationKind::ServerDetails),
            5 => Ok(NegotiationKind::ClientDisconnect),
            6 => Ok(NegotiationKind::ServerDisconnect),
            _ => Err(()),
        }
    }
}

/// Why a member left, or why a join attempt was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum DisconnectReason {
    Leave = 0,
    WrongPassword = 1,
    Banned = 2,
    IncompatibleProtocol = 3,
    Disallowed = 4,
    AppSpecific = 5,
}

impl TryFrom<u8> for DisconnectReason {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(DisconnectReason::Leave),
            1 => Ok(DisconnectReason::WrongPassword),
            2 => Ok(DisconnectReason::Banned),
            3 => Ok(DisconnectReason::IncompatibleProtocol),
            4 => Ok(DisconnectReason::Disallowed),
            5 => Ok(DisconnectReason::AppSpecific),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            DisconnectReason::Leave => "left the session",
            DisconnectReason::WrongPassword => "wrong password",
            DisconnectReason::Banned => "banned",
            DisconnectReason::IncompatibleProtocol => "incompatible protocol",
            DisconnectReason::Disallowed => "join disallowed",
            DisconnectReason::AppSpecific => "rejected by application",
        };
        f.write_str(text)
    }
}

// ── Server description ────────────────────────────────────────────────────────

/// Game style advertised by a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ServerType {
    #[default]
    FreeForAll = 0,
    Cooperative = 1,
    Roleplay = 2,
}

impl TryFrom<u8> for ServerType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ServerType::FreeForAll),
            1 => Ok(ServerType::Cooperative),
            2 => Ok(ServerType::Roleplay),
            _ => Err(()),
        }
    }
}

/// Server option bitmask.
///
/// Bit layout:
/// - Bit 0: player killing allowed
/// - Bit 1: friendly fire
/// - Bit 2: private chat
/// - Bit 3: password protected
/// - Bit 4: pinned / bookmarked (local meaning only)
/// - Bit 5: auto-equip
/// - Bit 6: key sharing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerOptions(pub u8);

impl ServerOptions {
    pub const PLAYER_KILLING: u8 = 1 << 0;
    pub const FRIENDLY_FIRE: u8 = 1 << 1;
    pub const PRIVATE_CHAT: u8 = 1 << 2;
    pub const PASSWORD: u8 = 1 << 3;
    pub const BOOKMARKED: u8 = 1 << 4;
    pub const AUTO_EQUIP: u8 = 1 << 5;
    pub const KEY_SHARING: u8 = 1 << 6;

    /// Returns `true` if every bit in `mask` is set.
    pub fn contains(&self, mask: u8) -> bool {
        self.0 & mask == mask
    }

    /// Sets or clears the bits in `mask`.
    pub fn set(&mut self, mask: u8, on: bool) {
        if on {
            self.0 |= mask;
        } else {
            self.0 &= !mask;
        }
    }
}

/// Live description of a hosted server, sent in discovery announcements and
/// SERVER_DETAILS.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ServerDescription {
    pub name: String,
    pub description: String,
    pub server_type: ServerType,
    pub options: ServerOptions,
    pub min_level: u8,
    pub max_level: u8,
    pub max_players: u8,
    pub player_count: u8,
    /// TCP port on which the host accepts session connections.
    pub session_port: u16,
    pub uptime_secs: u32,
}

// ── Session negotiation ───────────────────────────────────────────────────────

/// Slot flag bitmask mirrored in rosters and CLIENT_DETAILS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SlotFlags(pub u8);

impl SlotFlags {
    pub const CONNECTED: u8 = 1 << 0;
    pub const LOADING: u8 = 1 << 1;
    pub const WAITING: u8 = 1 << 2;
    pub const SHUTTING_DOWN: u8 = 1 << 3;
    pub const LAGGING: u8 = 1 << 4;

    pub fn contains(&self, mask: u8) -> bool {
        self.0 & mask == mask
    }

    pub fn insert(&mut self, mask: u8) {
        self.0 |= mask;
    }

    pub fn remove(&mut self, mask: u8) {
        self.0 &= !mask;
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

/// One member as described to other members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberInfo {
    pub id: u8,
    pub flags: SlotFlags,
    pub name: String,
}

/// JOIN_REQUEST: first packet a client sends after connecting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRequest {
    pub protocol_version: u16,
    pub name: String,
    /// Empty when the client supplies no password.
    pub password: String,
}

/// ALLOW_JOIN: full roster handed to a newly admitted member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowJoin {
    /// Slot id assigned to the receiver.
    pub assigned_id: u8,
    pub max_players: u8,
    pub server_type: ServerType,
    pub options: ServerOptions,
    pub members: Vec<MemberInfo>,
}

/// Session-negotiation message (`ServerCmd` payload).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Negotiation {
    JoinRequest(JoinRequest),
    AllowJoin(AllowJoin),
    DisallowJoin { reason: DisconnectReason },
    ClientDetails(MemberInfo),
    ServerDetails(ServerDescription),
    ClientDisconnect { reason: DisconnectReason, slot: u8 },
    ServerDisconnect { reason: DisconnectReason },
}

impl Negotiation {
    /// Returns the sub-type byte for this message.
    pub fn kind(&self) -> NegotiationKind {
        match self {
            Negotiation::JoinRequest(_) => NegotiationKind::JoinRequest,
            Negotiation::AllowJoin(_) => NegotiationKind::AllowJoin,
            Negotiation::DisallowJoin { .. } => NegotiationKind::DisallowJoin,
            Negotiation::ClientDetails(_) => NegotiationKind::ClientDetails,
            Negotiation::ServerDetails(_) => NegotiationKind::ServerDetails,
            Negotiation::ClientDisconnect { .. } => NegotiationKind::ClientDisconnect,
            Negotiation::ServerDisconnect { .. } => NegotiationKind::ServerDisconnect,
        }
    }
}

// ── Application, discovery, heartbeat ─────────────────────────────────────────

/// APP: opaque application payload routed between members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppMessage {
    pub from: u8,
    /// Destination slot, or [`BROADCAST_SLOT`].
    pub to: u8,
    pub body: Vec<u8>,
}

/// BROADCAST_PING: discovery traffic on the datagram channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscoveryPing {
    /// "Who is hosting?" Hosts answer with SERVER_DETAILS.
    Query,
    /// Periodic host announcement.
    Announce(ServerDescription),
}

/// ALIVE: heartbeat on a session connection, liveness probe on the
/// discovery channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlivePing {
    /// `false` for a request, `true` for the echoed response.
    pub response: bool,
    /// Slot the ping targets (unused on the discovery channel).
    pub slot: u8,
    /// Sender's clock when the request was issued, echoed unchanged.
    pub stamp_ms: u64,
}

// ── File transfer ─────────────────────────────────────────────────────────────

/// Control messages of the stop-and-wait file transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum XferInfo {
    Start { id: u32, alias: String, total_size: u32 },
    Ack { id: u32 },
    End { id: u32 },
    Abort { id: u32 },
}

impl XferInfo {
    pub fn id(&self) -> u32 {
        match self {
            XferInfo::Start { id, .. }
            | XferInfo::Ack { id }
            | XferInfo::End { id }
            | XferInfo::Abort { id } => *id,
        }
    }
}

/// XFER_DATA: one chunk of file content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct XferData {
    pub id: u32,
    pub bytes: Vec<u8>,
}

// ── Top-level packet ──────────────────────────────────────────────────────────

/// Every packet the session layer sends or receives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Packet {
    ServerCmd(Negotiation),
    App(AppMessage),
    BroadcastPing(DiscoveryPing),
    Alive(AlivePing),
    XferData(XferData),
    XferInfo(XferInfo),
}

impl Packet {
    /// Returns the header type byte for this packet.
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::ServerCmd(_) => PacketType::ServerCmd,
            Packet::App(_) => PacketType::App,
            Packet::BroadcastPing(_) => PacketType::BroadcastPing,
            Packet::Alive(_) => PacketType::Alive,
            Packet::XferData(_) => PacketType::XferData,
            Packet::XferInfo(_) => PacketType::XferInfo,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_type_try_from_accepts_every_defined_code() {
        for code in [0x00u8, 0x01, 0x07, 0x08, 0x09, 0x0A, 0x0B] {
            let parsed = PacketType::try_from(code).expect("defined code");
            assert_eq!(parsed as u8, code);
        }
    }

    #[test]
    fn test_packet_type_try_from_rejects_gap_codes() {
        assert!(PacketType::try_from(0x02).is_err());
        assert!(PacketType::try_from(0xFF).is_err());
    }

    #[test]
    fn test_negotiation_kind_rejects_values_past_server_disconnect() {
        assert_eq!(NegotiationKind::try_from(6), Ok(NegotiationKind::ServerDisconnect));
        assert!(NegotiationKind::try_from(7).is_err());
    }

    #[test]
    fn test_slot_flags_insert_and_remove() {
        // Arrange
        let mut flags = SlotFlags::default();

        // Act
        flags.insert(SlotFlags::CONNECTED | SlotFlags::LOADING);
        flags.remove(SlotFlags::LOADING);

        // Assert
        assert!(flags.contains(SlotFlags::CONNECTED));
        assert!(!flags.contains(SlotFlags::LOADING));
    }

    #[test]
    fn test_server_options_set_clears_only_requested_bits() {
        let mut options = ServerOptions(ServerOptions::PASSWORD | ServerOptions::FRIENDLY_FIRE);
        options.set(ServerOptions::PASSWORD, false);
        assert_eq!(options.0, ServerOptions::FRIENDLY_FIRE);
    }

    #[test]
    fn test_negotiation_kind_matches_variant() {
        let msg = Negotiation::ClientDisconnect {
            reason: DisconnectReason::Banned,
            slot: 3,
        };
        assert_eq!(msg.kind(), NegotiationKind::ClientDisconnect);
    }
}
