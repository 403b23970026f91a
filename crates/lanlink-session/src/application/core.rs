//! Session state and the single packet dispatcher.
//!
//! [`SessionCore`] owns every piece of mutable session state together with the
//! collaborators (transport, clock, file store, policy).  The protocol
//! handlers live in sibling modules as further `impl SessionCore` blocks:
//!
//! | Module          | Handles                                              |
//! |-----------------|------------------------------------------------------|
//! | `negotiation`   | ServerCmd packets, accept, admit, kick, ban, leave   |
//! | `heartbeat`     | Alive packets on session streams, lag tracking       |
//! | `discovery`     | the datagram channel, bookmark timers                |
//! | `transfer`      | XferInfo / XferData packets                          |
//!
//! # Read path
//!
//! Polling and asynchronous readiness notifications both end up in
//! [`SessionCore::read_socket`]: bytes are read into the peer's frame buffer,
//! complete frames are extracted, decoded, and passed to
//! [`SessionCore::dispatch_frame`], which branches on the packet type and the
//! current [`Role`].
//!
//! # Teardown
//!
//! A fatal socket or framing error does not tear the peer down on the spot,
//! because the handler that noticed it may still be iterating over peers.
//! The peer is marked doomed instead and [`SessionCore::reap`] releases it
//! once the current batch of work is finished.

use std::time::Duration;

use lanlink_core::protocol::{
    decode_packet, encode_packet, DisconnectReason, Negotiation, Packet, ServerDescription,
    ServerOptions, TransferIdAllocator, HOST_SLOT,
};
use lanlink_core::{Blacklist, BookmarkStore, Clock, Millis};
use tracing::{debug, info, warn};

use super::events::{NetworkEvent, Notification, SessionPolicy};
use super::registry::{Peer, Registry, SlotHandle, TrafficStats};
use super::transfer::TransferTable;
use crate::infrastructure::network::{SocketError, SocketId, Transport};
use crate::infrastructure::storage::config::SessionConfig;
use crate::infrastructure::storage::files::FileStore;

/// Reads attempted per socket per call before yielding to the other peers.
const MAX_READS_PER_CALL: usize = 16;

/// How long a refused peer may keep its slot while the refusal drains.
pub(crate) const REJECT_LINGER: Duration = Duration::from_millis(5000);

/// How long an accepted connection may hold a slot without sending
/// JOIN_REQUEST.
pub(crate) const JOIN_DEADLINE: Duration = Duration::from_millis(5000);

/// What this process currently is in the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    #[default]
    Idle,
    Host,
    Client,
}

/// Why a doomed peer is being torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Teardown {
    /// The socket closed or failed.
    Lost,
    /// The peer broke framing; the stream cannot be resynchronised.
    Malformed,
}

/// Last firing time of each periodic task.  `None` fires on the next tick.
#[derive(Debug, Default)]
pub(crate) struct Timers {
    pub broadcast: Option<Millis>,
    pub heartbeat: Option<Millis>,
    pub alive: Option<Millis>,
    pub sweep: Option<Millis>,
}

impl Timers {
    /// Returns `true` and re-arms `timer` if `interval` has passed.
    pub fn due(timer: &mut Option<Millis>, now: Millis, interval: Duration) -> bool {
        match *timer {
            Some(last) if !now.has_elapsed(last, interval) => false,
            _ => {
                *timer = Some(now);
                true
            }
        }
    }
}

/// All mutable session state.
pub(crate) struct SessionCore {
    pub config: SessionConfig,
    pub transport: Box<dyn Transport>,
    pub clock: Box<dyn Clock>,
    pub files: Box<dyn FileStore>,
    pub policy: Box<dyn SessionPolicy>,
    pub role: Role,
    pub registry: Registry,
    pub bookmarks: BookmarkStore,
    pub blacklist: Blacklist,
    pub transfers: TransferTable,
    pub transfer_ids: TransferIdAllocator,
    pub timers: Timers,
    pub hosting_since: Millis,
    pub discovery_open: bool,
    /// Client side: the host's latest SERVER_DETAILS.
    pub remote_server: Option<ServerDescription>,
    /// Refused slots waiting for the peer to hang up.
    pub lingering: Vec<(SlotHandle, Millis)>,
    doomed: Vec<(Peer, Teardown)>,
    outbox: Vec<Notification>,
}

impl SessionCore {
    pub fn new(
        config: SessionConfig,
        transport: Box<dyn Transport>,
        clock: Box<dyn Clock>,
        files: Box<dyn FileStore>,
        policy: Box<dyn SessionPolicy>,
        bookmarks: BookmarkStore,
        blacklist: Blacklist,
    ) -> Self {
        Self {
            config,
            transport,
            clock,
            files,
            policy,
            role: Role::Idle,
            registry: Registry::new(),
            bookmarks,
            blacklist,
            transfers: TransferTable::new(),
            transfer_ids: TransferIdAllocator::new(),
            timers: Timers::default(),
            hosting_since: Millis::default(),
            discovery_open: false,
            remote_server: None,
            lingering: Vec::new(),
            doomed: Vec::new(),
            outbox: Vec::new(),
        }
    }

    // ── Notifications ────────────────────────────────────────────────────────

    pub fn emit(&mut self, notification: Notification) {
        self.outbox.push(notification);
    }

    pub fn event(&mut self, event: NetworkEvent) {
        self.outbox.push(Notification::Network(event));
    }

    pub fn take_notifications(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.outbox)
    }

    // ── Identity helpers ─────────────────────────────────────────────────────

    /// This process's member id, once it has one.
    pub fn own_id(&self) -> Option<u8> {
        match self.role {
            Role::Host => Some(HOST_SLOT),
            Role::Client => self.registry.local.id,
            Role::Idle => None,
        }
    }

    /// Member id of the process at the other end of `peer`.
    pub fn peer_id(&self, peer: Peer) -> u8 {
        match peer {
            Peer::Slot(h) => h.index,
            Peer::Local => HOST_SLOT,
        }
    }

    /// Resolves a member id to a peer that can receive session traffic.
    pub fn peer_for_id(&self, id: u8) -> Option<Peer> {
        match self.role {
            Role::Host => self
                .registry
                .handle_of(id)
                .filter(|h| self.registry.get(*h).is_some_and(|s| s.is_active_remote()))
                .map(Peer::Slot),
            Role::Client if id == HOST_SLOT && self.registry.local.socket.is_some() => Some(Peer::Local),
            _ => None,
        }
    }

    /// `true` if `peer` is allowed to exchange application-level traffic.
    pub fn is_admitted(&self, peer: Peer) -> bool {
        match (self.role, peer) {
            (Role::Host, Peer::Slot(h)) => self.registry.get(h).is_some_and(|s| s.is_active_remote()),
            (Role::Client, Peer::Local) => {
                self.registry.local.state == super::registry::ClientState::Joined
            }
            _ => false,
        }
    }

    fn socket_of(&self, peer: Peer) -> Option<SocketId> {
        match peer {
            Peer::Slot(h) => self.registry.get(h).and_then(|s| s.socket),
            Peer::Local => self.registry.local.socket,
        }
    }

    fn stats_mut(&mut self, peer: Peer) -> Option<&mut TrafficStats> {
        match peer {
            Peer::Slot(h) => self.registry.get_mut(h).map(|s| &mut s.stats),
            Peer::Local => Some(&mut self.registry.local.stats),
        }
    }

    /// The host's own live description.
    pub fn server_description(&self, now: Millis) -> ServerDescription {
        let server = &self.config.server;
        let mut options = server.options;
        options.set(ServerOptions::PASSWORD, server.password().is_some());
        options.set(ServerOptions::BOOKMARKED, false);
        ServerDescription {
            name: server.name.clone(),
            description: server.description.clone(),
            server_type: server.server_type,
            options,
            min_level: server.min_level,
            max_level: server.max_level,
            max_players: server.max_players(),
            player_count: u8::try_from(self.registry.member_count()).unwrap_or(u8::MAX),
            session_port: self.config.network.session_port,
            uptime_secs: u32::try_from(now.saturating_since(self.hosting_since).as_secs())
                .unwrap_or(u32::MAX),
        }
    }

    // ── Send path ────────────────────────────────────────────────────────────

    /// Validates, encodes, and sends `packet` to `peer`.
    ///
    /// Validation failures are logged and the packet is dropped.  A fatal
    /// socket error dooms the peer.  Returns `true` if the bytes were handed
    /// to the transport.
    pub fn send_to(&mut self, peer: Peer, packet: &Packet) -> bool {
        if let Packet::App(message) = packet {
            if !self.policy.validate_app_message(message) {
                warn!("application payload to {} rejected by validator", message.to);
                return false;
            }
        }
        let frame = match encode_packet(packet) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("dropping outgoing {:?} packet: {e}", packet.packet_type());
                return false;
            }
        };
        let Some(socket) = self.socket_of(peer) else {
            debug!("no socket for {peer}; {:?} packet dropped", packet.packet_type());
            return false;
        };
        match self.transport.send(socket, &frame) {
            Ok(()) => {
                if let Some(stats) = self.stats_mut(peer) {
                    stats.bytes_sent += frame.len() as u64;
                    stats.packets_sent += 1;
                }
                true
            }
            Err(e) if e.is_transient() => {
                debug!("send to {peer} would block; {:?} packet dropped", packet.packet_type());
                false
            }
            Err(e) => {
                warn!("send to {peer} failed: {e}");
                self.doom(peer, Teardown::Lost);
                false
            }
        }
    }

    /// Sends `packet` to every admitted remote member except `except`.
    pub fn broadcast(&mut self, packet: &Packet, except: Option<SlotHandle>) {
        for h in self.registry.active_remotes() {
            if Some(h) != except {
                self.send_to(Peer::Slot(h), packet);
            }
        }
    }

    /// Host side: pushes the live server description to every member.
    pub fn push_server_details(&mut self) {
        if self.role != Role::Host {
            return;
        }
        let details = self.server_description(self.clock.now());
        self.broadcast(&Packet::ServerCmd(Negotiation::ServerDetails(details)), None);
    }

    // ── Read path ────────────────────────────────────────────────────────────

    /// Drains `socket` into its frame buffer and dispatches complete frames.
    pub fn read_socket(&mut self, socket: SocketId) {
        let Some(peer) = self.registry.lookup_socket(socket) else {
            debug!("readable {socket} belongs to no peer");
            return;
        };

        for _ in 0..MAX_READS_PER_CALL {
            if !self.is_attached(peer, socket) {
                return;
            }
            let received = {
                let buffer = match peer {
                    Peer::Slot(h) => match self.registry.get_mut(h) {
                        Some(slot) => &mut slot.buffer,
                        None => return,
                    },
                    Peer::Local => &mut self.registry.local.buffer,
                };
                if buffer.spare() == 0 {
                    buffer.compact();
                }
                self.transport.recv(socket, buffer.spare_capacity_mut())
            };

            match received {
                Ok(n) => {
                    if let Some(stats) = self.stats_mut(peer) {
                        stats.bytes_received += n as u64;
                    }
                    self.commit_and_dispatch(peer, socket, n);
                }
                Err(e) if e.is_transient() => return,
                Err(SocketError::Closed) => {
                    debug!("{peer} closed its connection");
                    self.doom(peer, Teardown::Lost);
                    return;
                }
                Err(e) => {
                    warn!("read from {peer} failed: {e}");
                    self.doom(peer, Teardown::Lost);
                    return;
                }
            }
        }
    }

    /// `true` while `socket` still belongs to `peer` and the peer is not
    /// awaiting teardown.  Handlers may release a peer mid-batch.
    fn is_attached(&self, peer: Peer, socket: SocketId) -> bool {
        !self.is_doomed(peer) && self.registry.lookup_socket(socket) == Some(peer)
    }

    fn commit_and_dispatch(&mut self, peer: Peer, socket: SocketId, n: usize) {
        let mut frames = Vec::new();
        let mut broken = None;
        {
            let buffer = match peer {
                Peer::Slot(h) => match self.registry.get_mut(h) {
                    Some(slot) => &mut slot.buffer,
                    None => return,
                },
                Peer::Local => &mut self.registry.local.buffer,
            };
            buffer.commit(n);
            loop {
                match buffer.next_frame() {
                    Ok(Some(frame)) => frames.push(frame),
                    Ok(None) => break,
                    Err(e) => {
                        broken = Some(e);
                        break;
                    }
                }
            }
            buffer.compact();
        }

        for frame in frames {
            if !self.is_attached(peer, socket) {
                return;
            }
            self.dispatch_frame(peer, &frame);
        }

        if let Some(e) = broken.filter(|_| self.is_attached(peer, socket)) {
            warn!("framing violation from {peer}: {e}; closing connection");
            let slot = self.peer_id(peer);
            self.event(NetworkEvent::MalformedPacket { slot });
            self.doom(peer, Teardown::Malformed);
        }
    }

    /// Decodes one complete frame and routes it by packet type.
    pub fn dispatch_frame(&mut self, peer: Peer, frame: &[u8]) {
        let packet = match decode_packet(frame) {
            Ok((packet, _)) => packet,
            Err(e) => {
                warn!("dropping frame from {peer}: {e}");
                let slot = self.peer_id(peer);
                self.event(NetworkEvent::MalformedPacket { slot });
                return;
            }
        };
        if let Some(stats) = self.stats_mut(peer) {
            stats.packets_received += 1;
        }

        match packet {
            Packet::ServerCmd(message) => self.handle_negotiation(peer, message),
            Packet::App(message) => self.handle_app(peer, message),
            Packet::Alive(ping) => self.handle_heartbeat(peer, ping),
            Packet::XferInfo(info) => self.handle_xfer_info(peer, info),
            Packet::XferData(data) => self.handle_xfer_data(peer, data),
            Packet::BroadcastPing(_) => debug!("discovery packet on a session stream ignored"),
        }
    }

    // ── Tick ─────────────────────────────────────────────────────────────────

    /// One pass of polling and timers.
    pub fn tick(&mut self) {
        let now = self.clock.now();
        if self.role == Role::Host {
            self.accept_connections(now);
        }
        for socket in self.transport.poll_readable() {
            self.read_socket(socket);
            self.reap();
        }
        self.poll_discovery(now);
        self.run_timers(now);
        self.reap();
    }

    fn run_timers(&mut self, now: Millis) {
        if self.role == Role::Host {
            if Timers::due(&mut self.timers.heartbeat, now, super::heartbeat::PING_INTERVAL) {
                self.ping_members(now);
            }
            if Timers::due(&mut self.timers.broadcast, now, super::discovery::BROADCAST_INTERVAL) {
                self.announce(now);
                self.push_server_details();
            }
            self.expire_lingering(now);
        }
        self.discovery_timers(now);
    }

    fn expire_lingering(&mut self, now: Millis) {
        let expired: Vec<SlotHandle> = self
            .lingering
            .iter()
            .filter(|(_, since)| now.saturating_since(*since) > REJECT_LINGER)
            .map(|(h, _)| *h)
            .collect();
        for h in expired {
            debug!("refused slot {} did not hang up; closing", h.index);
            self.release_slot(h, None);
        }

        // Refused slots run on their own clock above.
        let silent: Vec<SlotHandle> = self
            .registry
            .unjoined()
            .into_iter()
            .filter(|(h, _)| !self.lingering.iter().any(|(l, _)| l == h))
            .filter(|(_, accepted)| now.saturating_since(*accepted) > JOIN_DEADLINE)
            .map(|(h, _)| h)
            .collect();
        for h in silent {
            info!("slot {} sent no join request within {JOIN_DEADLINE:?}; closing", h.index);
            self.release_slot(h, None);
        }
    }

    // ── Teardown ─────────────────────────────────────────────────────────────

    pub fn doom(&mut self, peer: Peer, cause: Teardown) {
        if !self.is_doomed(peer) {
            self.doomed.push((peer, cause));
        }
    }

    fn is_doomed(&self, peer: Peer) -> bool {
        self.doomed.iter().any(|(p, _)| *p == peer)
    }

    /// Releases every doomed peer.
    pub fn reap(&mut self) {
        while let Some((peer, cause)) = self.doomed.pop() {
            debug!("tearing down {peer} ({cause:?})");
            match peer {
                Peer::Slot(h) => self.release_slot(h, None),
                Peer::Local if self.registry.local.socket.is_some() => {
                    self.end_client_session(None, true)
                }
                Peer::Local => {}
            }
        }
    }

    /// Host side: cancels the slot's transfers, closes its socket, and clears
    /// it.  Members are announced as gone to everyone else; `reason` is
    /// `None` when the connection failed without a goodbye.
    pub fn release_slot(&mut self, h: SlotHandle, reason: Option<DisconnectReason>) {
        let Some(slot) = self.registry.get(h) else {
            return;
        };
        let id = slot.id;
        let name = slot.name.clone();
        let was_member = slot.is_member();

        self.cancel_transfers_with(id, "connection closed");
        if let Some(socket) = self.registry.reset(h) {
            self.transport.close(socket);
        }
        self.lingering.retain(|(l, _)| *l != h);

        if !was_member {
            return;
        }
        let notice = reason.unwrap_or(DisconnectReason::Leave);
        self.broadcast(
            &Packet::ServerCmd(Negotiation::ClientDisconnect {
                reason: notice,
                slot: id,
            }),
            None,
        );
        match reason {
            Some(reason) => {
                info!("{name} (slot {id}) left: {reason}");
                self.event(NetworkEvent::ClientLeft {
                    slot: id,
                    name,
                    reason,
                });
            }
            None => {
                warn!("lost connection to {name} (slot {id})");
                self.event(NetworkEvent::ConnectionLost { slot: id });
            }
        }
        self.push_server_details();
    }

    /// Client side: drops the connection to the host and forgets the roster.
    ///
    /// With `notify` set a [`NetworkEvent::Disconnected`] carrying `reason`
    /// is raised.
    pub fn end_client_session(&mut self, reason: Option<DisconnectReason>, notify: bool) {
        self.cancel_all_transfers("connection closed");
        if let Some(socket) = self.registry.reset_local() {
            self.transport.close(socket);
        }
        self.registry.reset_all();
        self.remote_server = None;
        self.role = Role::Idle;
        if notify {
            match reason {
                Some(r) => info!("session ended: {r}"),
                None => warn!("connection to host lost"),
            }
            self.event(NetworkEvent::Disconnected { reason });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_fires_immediately_then_waits_for_interval() {
        // Arrange
        let mut timer = None;
        let interval = Duration::from_millis(350);

        // Act / Assert
        assert!(Timers::due(&mut timer, Millis(1_000), interval));
        assert!(!Timers::due(&mut timer, Millis(1_349), interval));
        assert!(Timers::due(&mut timer, Millis(1_350), interval));
        assert_eq!(timer, Some(Millis(1_350)));
    }

    #[test]
    fn test_timer_survives_clock_running_backwards() {
        let mut timer = Some(Millis(5_000));
        assert!(!Timers::due(&mut timer, Millis(10), Duration::from_millis(350)));
    }
}
