//! Connection registry: the fixed arena of member slots.
//!
//! The registry owns [`MAX_CLIENTS`] slots.  Slot `i` is always the member
//! with id `i`; the host's own identity lives in slot 0.  Slots are addressed
//! by a [`SlotHandle`] carrying the slot index and a generation counter that
//! is bumped every time the slot is reset, so a handle kept past a teardown
//! resolves to nothing instead of to the next occupant.
//!
//! # Slot lifecycle (host side)
//!
//! ```text
//! free ──accept──► occupied (no flags)
//!                      │ JOIN_REQUEST passes every check
//!                      ▼
//!                 CONNECTED | WAITING ──admit──► CONNECTED | LOADING
//!                                                      │ client finished loading
//!                                                      ▼
//!                                                  CONNECTED
//! any state ──loss / disconnect / kick / ban──► reset (generation + 1)
//! ```
//!
//! When the process is a client, the same slots mirror the host's roster
//! (no sockets) and the [`LocalClient`] describes the connection to the host.

use std::time::Duration;

use lanlink_core::protocol::{FrameBuffer, MemberInfo, SlotFlags, HOST_SLOT, MAX_CLIENTS};
use lanlink_core::{Millis, PeerAddress};
use tracing::debug;

use crate::infrastructure::network::SocketId;

/// Generation-checked reference to a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotHandle {
    pub index: u8,
    generation: u32,
}

/// Returned by [`Registry::acquire`] when every slot is taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotExhausted;

/// Per-connection traffic counters and heartbeat samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrafficStats {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub packets_sent: u64,
    pub packets_received: u64,
    pub accepted_at: Millis,
    pub last_rtt: Option<Duration>,
    pub rtt_sampled_at: Option<Millis>,
}

impl TrafficStats {
    fn started(now: Millis) -> Self {
        Self {
            accepted_at: now,
            ..Self::default()
        }
    }

    /// Time since the last heartbeat sample, or since accept if none.
    pub fn silence(&self, now: Millis) -> Duration {
        now.saturating_since(self.rtt_sampled_at.unwrap_or(self.accepted_at))
    }
}

/// One registry entry.
#[derive(Debug)]
pub struct ConnectionSlot {
    generation: u32,
    occupied: bool,
    pub id: u8,
    pub name: String,
    pub socket: Option<SocketId>,
    pub addr: Option<PeerAddress>,
    pub flags: SlotFlags,
    pub buffer: FrameBuffer,
    pub stats: TrafficStats,
}

impl ConnectionSlot {
    fn empty(id: u8) -> Self {
        Self {
            generation: 0,
            occupied: false,
            id,
            name: String::new(),
            socket: None,
            addr: None,
            flags: SlotFlags::default(),
            buffer: FrameBuffer::new(),
            stats: TrafficStats::default(),
        }
    }

    pub fn is_occupied(&self) -> bool {
        self.occupied
    }

    /// Occupied and past the join checks.
    pub fn is_member(&self) -> bool {
        self.occupied && self.flags.contains(SlotFlags::CONNECTED)
    }

    /// A remote member that may exchange session traffic: connected, admitted,
    /// and reachable through a socket.
    pub fn is_active_remote(&self) -> bool {
        self.is_member() && self.socket.is_some() && !self.flags.contains(SlotFlags::WAITING)
    }

    pub fn member_info(&self) -> MemberInfo {
        MemberInfo {
            id: self.id,
            flags: self.flags,
            name: self.name.clone(),
        }
    }

    fn handle(&self) -> SlotHandle {
        SlotHandle {
            index: self.id,
            generation: self.generation,
        }
    }
}

/// Where the client stands with its host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientState {
    #[default]
    Disconnected,
    Connecting,
    AwaitingJoinResponse,
    Joined,
}

/// This process's identity while it is a client.
#[derive(Debug)]
pub struct LocalClient {
    pub state: ClientState,
    /// Assigned by the host in ALLOW_JOIN.
    pub id: Option<u8>,
    pub name: String,
    pub socket: Option<SocketId>,
    pub host_addr: Option<PeerAddress>,
    pub flags: SlotFlags,
    pub buffer: FrameBuffer,
    pub stats: TrafficStats,
}

impl LocalClient {
    fn new() -> Self {
        Self {
            state: ClientState::Disconnected,
            id: None,
            name: String::new(),
            socket: None,
            host_addr: None,
            flags: SlotFlags::default(),
            buffer: FrameBuffer::new(),
            stats: TrafficStats::default(),
        }
    }
}

/// The other end of a session socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Peer {
    /// A member connected to this host.
    Slot(SlotHandle),
    /// This client's connection to its host.
    Local,
}

impl std::fmt::Display for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Peer::Slot(h) => write!(f, "slot {}", h.index),
            Peer::Local => f.write_str("host connection"),
        }
    }
}

/// Fixed arena of member slots plus the local client descriptor.
pub struct Registry {
    slots: Vec<ConnectionSlot>,
    pub local: LocalClient,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            slots: (0..MAX_CLIENTS as u8).map(ConnectionSlot::empty).collect(),
            local: LocalClient::new(),
        }
    }

    /// Claims slot 0 for the host itself.
    pub fn claim_host_slot(&mut self, name: &str, now: Millis) -> SlotHandle {
        let slot = &mut self.slots[HOST_SLOT as usize];
        slot.occupied = true;
        slot.name = name.to_string();
        slot.flags = SlotFlags(SlotFlags::CONNECTED);
        slot.stats = TrafficStats::started(now);
        slot.handle()
    }

    /// Takes the first free slot among `1..capacity` for a newly accepted
    /// socket.  Slot 0 is the host's and is never handed out.
    pub fn acquire(
        &mut self,
        socket: SocketId,
        addr: PeerAddress,
        capacity: u8,
        now: Millis,
    ) -> Result<SlotHandle, SlotExhausted> {
        let limit = usize::from(capacity).min(MAX_CLIENTS);
        let slot = self
            .slots
            .iter_mut()
            .take(limit)
            .skip(1)
            .find(|s| !s.occupied)
            .ok_or(SlotExhausted)?;
        slot.occupied = true;
        slot.socket = Some(socket);
        slot.addr = Some(addr);
        slot.flags = SlotFlags::default();
        slot.stats = TrafficStats::started(now);
        debug!("slot {} acquired by {addr}", slot.id);
        Ok(slot.handle())
    }

    /// Number of occupied slots (host included).
    pub fn occupied_count(&self) -> usize {
        self.slots.iter().filter(|s| s.occupied).count()
    }

    /// Number of members past the join checks (host included).
    pub fn member_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_member()).count()
    }

    pub fn get(&self, handle: SlotHandle) -> Option<&ConnectionSlot> {
        self.slots
            .get(usize::from(handle.index))
            .filter(|s| s.occupied && s.generation == handle.generation)
    }

    pub fn get_mut(&mut self, handle: SlotHandle) -> Option<&mut ConnectionSlot> {
        self.slots
            .get_mut(usize::from(handle.index))
            .filter(|s| s.occupied && s.generation == handle.generation)
    }

    /// Current handle of the occupied slot with member id `id`.
    pub fn handle_of(&self, id: u8) -> Option<SlotHandle> {
        self.slots
            .get(usize::from(id))
            .filter(|s| s.occupied)
            .map(ConnectionSlot::handle)
    }

    /// Maps a socket to the peer it belongs to.
    pub fn lookup_socket(&self, socket: SocketId) -> Option<Peer> {
        if self.local.socket == Some(socket) {
            return Some(Peer::Local);
        }
        self.slots
            .iter()
            .find(|s| s.occupied && s.socket == Some(socket))
            .map(|s| Peer::Slot(s.handle()))
    }

    pub fn set_flag(&mut self, handle: SlotHandle, mask: u8) -> bool {
        match self.get_mut(handle) {
            Some(slot) => {
                slot.flags.insert(mask);
                true
            }
            None => false,
        }
    }

    pub fn clear_flag(&mut self, handle: SlotHandle, mask: u8) -> bool {
        match self.get_mut(handle) {
            Some(slot) => {
                slot.flags.remove(mask);
                true
            }
            None => false,
        }
    }

    /// Handles of every remote member that may receive session traffic.
    pub fn active_remotes(&self) -> Vec<SlotHandle> {
        self.slots
            .iter()
            .filter(|s| s.is_active_remote())
            .map(ConnectionSlot::handle)
            .collect()
    }

    /// Occupied slots that never got past the join checks, with their
    /// accept times.
    pub fn unjoined(&self) -> Vec<(SlotHandle, Millis)> {
        self.slots
            .iter()
            .filter(|s| s.occupied && !s.is_member())
            .map(|s| (s.handle(), s.stats.accepted_at))
            .collect()
    }

    /// Handles of every occupied slot with a socket (members or not).
    pub fn connected_sockets(&self) -> Vec<SlotHandle> {
        self.slots
            .iter()
            .filter(|s| s.occupied && s.socket.is_some())
            .map(ConnectionSlot::handle)
            .collect()
    }

    /// Roster of every member, host included, ordered by id.
    pub fn roster(&self) -> Vec<MemberInfo> {
        self.slots
            .iter()
            .filter(|s| s.is_member())
            .map(ConnectionSlot::member_info)
            .collect()
    }

    /// Client side: stores one roster entry received from the host.
    ///
    /// Returns `true` if the entry was not present before.
    pub fn mirror_member(&mut self, info: &MemberInfo) -> bool {
        let Some(slot) = self.slots.get_mut(usize::from(info.id)) else {
            return false;
        };
        let created = !slot.occupied;
        slot.occupied = true;
        slot.name = info.name.clone();
        slot.flags = info.flags;
        slot.flags.insert(SlotFlags::CONNECTED);
        created
    }

    /// Empties the slot and invalidates outstanding handles.  Returns the
    /// socket the slot held so the caller can close it.
    ///
    /// Transfers owned by the slot must be released before calling this.
    pub fn reset(&mut self, handle: SlotHandle) -> Option<SocketId> {
        let slot = self.get_mut(handle)?;
        let socket = slot.socket.take();
        let id = slot.id;
        let generation = slot.generation.wrapping_add(1);
        *slot = ConnectionSlot::empty(id);
        slot.generation = generation;
        debug!("slot {id} reset");
        socket
    }

    /// Clears every slot, the host slot included.  Returns the sockets that
    /// were held.
    pub fn reset_all(&mut self) -> Vec<SocketId> {
        let handles: Vec<SlotHandle> = self
            .slots
            .iter()
            .filter(|s| s.occupied)
            .map(ConnectionSlot::handle)
            .collect();
        handles.into_iter().filter_map(|h| self.reset(h)).collect()
    }

    /// Returns the local client descriptor to its disconnected state and the
    /// socket it held.
    pub fn reset_local(&mut self) -> Option<SocketId> {
        let socket = self.local.socket.take();
        self.local = LocalClient::new();
        socket
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
