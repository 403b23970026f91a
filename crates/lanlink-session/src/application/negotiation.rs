//! Session negotiation: joining, admission, details, and disconnects.
//!
//! # Host side
//!
//! A JOIN_REQUEST runs through these checks in order; the first failure
//! answers CLIENT_DISCONNECT with the matching reason and shuts down the
//! socket's send side:
//!
//! 1. blacklist → `Banned`
//! 2. protocol version → `IncompatibleProtocol`
//! 3. password (only when one is configured) → `WrongPassword`
//! 4. [`SessionPolicy::accept_join`](super::events::SessionPolicy::accept_join) → `AppSpecific`
//!
//! A request that passes marks the slot `CONNECTED | WAITING`.  Admission
//! (immediately with `auto_join`, otherwise on [`SessionCore::admit`]) clears
//! `WAITING`, tells everyone else about the newcomer, hands the newcomer the
//! full roster in ALLOW_JOIN, and marks it `LOADING`.
//!
//! When every slot is taken the accepted socket gets DISALLOW_JOIN and is
//! closed without ever entering the registry.
//!
//! # Client side
//!
//! ```text
//! Disconnected ──join──► Connecting ──connected──► AwaitingJoinResponse
//!                                                   │            │
//!                                        ALLOW_JOIN │            │ DISALLOW_JOIN /
//!                                                   ▼            │ CLIENT_DISCONNECT
//!                                                Joined          ▼
//!                                                           Disconnected
//! ```

use lanlink_core::protocol::{
    AllowJoin, AppMessage, DisconnectReason, JoinRequest, MemberInfo, Negotiation, Packet,
    ServerDescription, SlotFlags, BROADCAST_SLOT, HEADER_SIZE, BUFFER_CAPACITY, HOST_SLOT,
};
use lanlink_core::{Millis, PeerAddress, ProtocolError};
use tracing::{debug, info, warn};

use super::core::{Role, SessionCore};
use super::events::{JoinCandidate, JoinOutcome, NetworkEvent, Notification};
use super::registry::{ClientState, Peer, SlotExhausted, SlotHandle};
use super::SessionError;
use crate::infrastructure::network::SocketId;
use crate::infrastructure::storage::lists::{save_blacklist, save_bookmarks};

/// Bytes of an APP payload taken by the from/to header.
const APP_ROUTING_BYTES: usize = 2;

impl SessionCore {
    // ── Host: accept ─────────────────────────────────────────────────────────

    /// Accepts every pending connection into a free slot.
    pub(crate) fn accept_connections(&mut self, now: Millis) {
        loop {
            let (socket, addr) = match self.transport.accept() {
                Ok(Some(pending)) => pending,
                Ok(None) => return,
                Err(e) => {
                    warn!("accept failed: {e}");
                    return;
                }
            };
            let capacity = self.config.server.max_players();
            match self.registry.acquire(socket, addr, capacity, now) {
                Ok(h) => info!("accepted {addr} into slot {}", h.index),
                Err(SlotExhausted) => self.refuse_unslotted(socket, addr),
            }
        }
    }

    /// Answers a connection that found no free slot.  The registry is not
    /// touched.
    fn refuse_unslotted(&mut self, socket: SocketId, addr: PeerAddress) {
        warn!("all {} slots in use; refusing {addr}", self.config.server.max_players());
        let refusal = Packet::ServerCmd(Negotiation::DisallowJoin {
            reason: DisconnectReason::Disallowed,
        });
        match lanlink_core::encode_packet(&refusal) {
            Ok(frame) => {
                if let Err(e) = self.transport.send(socket, &frame) {
                    debug!("could not deliver refusal to {addr}: {e}");
                }
            }
            Err(e) => warn!("could not encode refusal: {e}"),
        }
        self.transport.shutdown_send(socket);
        self.transport.close(socket);
        self.event(NetworkEvent::JoinRejected {
            address: addr,
            reason: DisconnectReason::Disallowed,
        });
    }

    // ── Dispatch ─────────────────────────────────────────────────────────────

    pub(crate) fn handle_negotiation(&mut self, peer: Peer, message: Negotiation) {
        match (self.role, peer) {
            (Role::Host, Peer::Slot(h)) => self.host_negotiation(h, message),
            (Role::Client, Peer::Local) => self.client_negotiation(message),
            (role, _) => debug!("{:?} from {peer} ignored while {role:?}", message.kind()),
        }
    }

    fn host_negotiation(&mut self, h: SlotHandle, message: Negotiation) {
        match message {
            Negotiation::JoinRequest(request) => self.handle_join_request(h, request),
            Negotiation::ClientDetails(info) => self.handle_client_details(h, info),
            Negotiation::ClientDisconnect { reason, .. } => {
                if self.registry.get(h).is_some_and(|s| s.is_member()) {
                    self.release_slot(h, Some(reason));
                } else {
                    self.release_slot(h, None);
                }
            }
            other => warn!("unexpected {:?} from slot {}", other.kind(), h.index),
        }
    }

    fn client_negotiation(&mut self, message: Negotiation) {
        let awaiting = self.registry.local.state == ClientState::AwaitingJoinResponse;
        match message {
            Negotiation::AllowJoin(allow) if awaiting => self.handle_allow_join(allow),
            Negotiation::DisallowJoin { reason } if awaiting => self.handle_refusal(reason),
            Negotiation::ClientDisconnect { reason, .. } if awaiting => self.handle_refusal(reason),
            Negotiation::ClientDisconnect { reason, slot } => self.handle_member_left(slot, reason),
            Negotiation::ClientDetails(info) => self.handle_member_details(info),
            Negotiation::ServerDetails(details) => self.handle_server_details(details),
            Negotiation::ServerDisconnect { reason } => {
                self.end_client_session(Some(reason), true);
            }
            other => warn!("unexpected {:?} from host", other.kind()),
        }
    }

    // ── Host: join checks and admission ──────────────────────────────────────

    fn handle_join_request(&mut self, h: SlotHandle, request: JoinRequest) {
        let Some(slot) = self.registry.get(h) else {
            return;
        };
        if slot.flags.contains(SlotFlags::CONNECTED) || slot.flags.contains(SlotFlags::SHUTTING_DOWN) {
            warn!("repeated join request from slot {} ignored", h.index);
            return;
        }
        let Some(addr) = slot.addr else {
            return;
        };

        let refusal = if self.blacklist.is_address_banned(addr) {
            Some(DisconnectReason::Banned)
        } else if request.protocol_version != self.config.server.protocol_version {
            Some(DisconnectReason::IncompatibleProtocol)
        } else if self
            .config
            .server
            .password()
            .is_some_and(|expected| expected != request.password)
        {
            Some(DisconnectReason::WrongPassword)
        } else {
            let candidate = JoinCandidate {
                slot: h.index,
                address: addr,
                name: request.name.clone(),
            };
            (!self.policy.accept_join(&candidate)).then_some(DisconnectReason::AppSpecific)
        };

        if let Some(reason) = refusal {
            self.refuse(h, addr, reason);
            return;
        }

        if let Some(slot) = self.registry.get_mut(h) {
            slot.name = request.name;
            slot.flags.insert(SlotFlags::CONNECTED | SlotFlags::WAITING);
            info!("{} from {addr} passed join checks (slot {})", slot.name, h.index);
        }
        if self.config.server.auto_join {
            self.admit_slot(h);
        } else if let Some(slot) = self.registry.get(h) {
            let name = slot.name.clone();
            self.event(NetworkEvent::JoinPending { slot: h.index, name });
        }
    }

    /// Answers a failed join check and leaves the slot unconnected until the
    /// peer hangs up.
    fn refuse(&mut self, h: SlotHandle, addr: PeerAddress, reason: DisconnectReason) {
        warn!("refusing join from {addr}: {reason}");
        self.send_to(
            Peer::Slot(h),
            &Packet::ServerCmd(Negotiation::ClientDisconnect {
                reason,
                slot: h.index,
            }),
        );
        let socket = self.registry.get_mut(h).and_then(|slot| {
            slot.flags = SlotFlags(SlotFlags::SHUTTING_DOWN);
            slot.socket
        });
        if let Some(socket) = socket {
            self.transport.shutdown_send(socket);
        }
        let now = self.clock.now();
        self.lingering.push((h, now));
        self.event(NetworkEvent::JoinRejected {
            address: addr,
            reason,
        });
    }

    /// Completes admission of a slot that passed every join check.
    pub(crate) fn admit_slot(&mut self, h: SlotHandle) {
        self.registry.clear_flag(h, SlotFlags::WAITING);
        let Some(info) = self.registry.get(h).map(|s| s.member_info()) else {
            return;
        };

        self.broadcast(&Packet::ServerCmd(Negotiation::ClientDetails(info.clone())), Some(h));

        let now = self.clock.now();
        let description = self.server_description(now);
        let allow = AllowJoin {
            assigned_id: h.index,
            max_players: description.max_players,
            server_type: description.server_type,
            options: description.options,
            members: self.registry.roster(),
        };
        self.send_to(Peer::Slot(h), &Packet::ServerCmd(Negotiation::AllowJoin(allow)));
        self.registry.set_flag(h, SlotFlags::LOADING);

        info!("{} joined as slot {}", info.name, h.index);
        self.event(NetworkEvent::ClientJoined {
            slot: h.index,
            name: info.name,
        });
        self.push_server_details();
    }

    fn handle_client_details(&mut self, h: SlotHandle, info: MemberInfo) {
        let Some(slot) = self.registry.get_mut(h) else {
            return;
        };
        if !slot.is_active_remote() {
            debug!("details from unadmitted slot {} ignored", h.index);
            return;
        }
        let finished = slot.flags.contains(SlotFlags::LOADING) && !info.flags.contains(SlotFlags::LOADING);
        if finished {
            slot.flags.remove(SlotFlags::LOADING);
        }
        if !info.name.is_empty() {
            slot.name = info.name;
        }
        let updated = slot.member_info();

        self.broadcast(&Packet::ServerCmd(Negotiation::ClientDetails(updated)), Some(h));
        if finished {
            info!("slot {} finished loading", h.index);
            self.event(NetworkEvent::LoadingFinished { slot: h.index });
        }
    }

    // ── Client: responses ────────────────────────────────────────────────────

    fn handle_allow_join(&mut self, allow: AllowJoin) {
        let local = &mut self.registry.local;
        local.id = Some(allow.assigned_id);
        local.state = ClientState::Joined;
        local.flags = SlotFlags(SlotFlags::CONNECTED | SlotFlags::LOADING);

        self.registry.reset_all();
        for member in &allow.members {
            self.registry.mirror_member(member);
        }
        let own = MemberInfo {
            id: allow.assigned_id,
            flags: self.registry.local.flags,
            name: self.registry.local.name.clone(),
        };
        self.registry.mirror_member(&own);

        info!(
            "joined as slot {} ({} members, max {})",
            allow.assigned_id,
            allow.members.len(),
            allow.max_players
        );
        self.emit(Notification::Join(JoinOutcome::Accepted {
            id: allow.assigned_id,
            members: allow.members,
        }));
    }

    fn handle_refusal(&mut self, reason: DisconnectReason) {
        warn!("join refused: {reason}");
        self.emit(Notification::Join(JoinOutcome::Refused { reason }));
        self.event(NetworkEvent::Disallowed { reason });
        self.end_client_session(Some(reason), false);
    }

    fn handle_member_left(&mut self, slot: u8, reason: DisconnectReason) {
        if Some(slot) == self.registry.local.id {
            self.end_client_session(Some(reason), true);
            return;
        }
        let Some(h) = self.registry.handle_of(slot) else {
            return;
        };
        let name = self.registry.get(h).map(|s| s.name.clone()).unwrap_or_default();
        self.registry.reset(h);
        info!("{name} (slot {slot}) left: {reason}");
        self.event(NetworkEvent::ClientLeft { slot, name, reason });
    }

    fn handle_member_details(&mut self, info: MemberInfo) {
        if self.registry.local.state != ClientState::Joined {
            return;
        }
        if Some(info.id) == self.registry.local.id {
            self.registry.local.flags = info.flags;
        }
        if self.registry.mirror_member(&info) {
            self.event(NetworkEvent::ClientJoined {
                slot: info.id,
                name: info.name,
            });
        }
    }

    fn handle_server_details(&mut self, details: ServerDescription) {
        if let Some(addr) = self.registry.local.host_addr {
            let now = self.clock.now();
            if self.bookmarks.record_discovery(addr, &details, now) {
                self.emit(Notification::ServerListChanged);
            }
        }
        self.remote_server = Some(details);
    }

    // ── Application payloads ─────────────────────────────────────────────────

    pub(crate) fn handle_app(&mut self, peer: Peer, mut message: AppMessage) {
        if !self.is_admitted(peer) {
            debug!("application payload from unadmitted {peer} dropped");
            return;
        }
        if !self.policy.validate_app_message(&message) {
            warn!("application payload from {peer} rejected by validator");
            return;
        }
        match peer {
            Peer::Local => self.emit(Notification::App(message)),
            Peer::Slot(h) => {
                // The sender's slot is authoritative, whatever the packet claims.
                message.from = h.index;
                match message.to {
                    HOST_SLOT => self.emit(Notification::App(message)),
                    BROADCAST_SLOT => {
                        self.broadcast(&Packet::App(message.clone()), Some(h));
                        self.emit(Notification::App(message));
                    }
                    to => match self.peer_for_id(to) {
                        Some(target) => {
                            self.send_to(target, &Packet::App(message));
                        }
                        None => debug!("application payload for absent slot {to} dropped"),
                    },
                }
            }
        }
    }

    /// Sends an application payload to member `to` or to everyone.
    pub(crate) fn send_app(&mut self, to: u8, body: Vec<u8>) -> Result<(), SessionError> {
        let from = self.own_id().ok_or(SessionError::NotConnected)?;
        let size = HEADER_SIZE + APP_ROUTING_BYTES + body.len();
        if size > BUFFER_CAPACITY {
            return Err(ProtocolError::PayloadTooLarge { size }.into());
        }
        let packet = Packet::App(AppMessage { from, to, body });
        match self.role {
            Role::Client => {
                if self.registry.local.state != ClientState::Joined {
                    return Err(SessionError::NotConnected);
                }
                self.send_to(Peer::Local, &packet);
            }
            Role::Host => match to {
                BROADCAST_SLOT => self.broadcast(&packet, None),
                HOST_SLOT => debug!("application payload addressed to self dropped"),
                _ => {
                    let target = self.peer_for_id(to).ok_or(SessionError::UnknownSlot(to))?;
                    self.send_to(target, &packet);
                }
            },
            Role::Idle => return Err(SessionError::NotConnected),
        }
        Ok(())
    }

    // ── Public operations ────────────────────────────────────────────────────

    /// Starts hosting: listens on the session port and claims slot 0.
    pub(crate) fn start_hosting(&mut self) -> Result<(), SessionError> {
        if self.role != Role::Idle {
            return Err(SessionError::AlreadyActive);
        }
        self.transport.listen(self.config.network.session_port)?;
        let now = self.clock.now();
        self.registry.reset_all();
        self.registry.claim_host_slot(&self.config.player.name, now);
        self.hosting_since = now;
        self.timers = Default::default();
        self.role = Role::Host;
        self.ensure_discovery();
        info!(
            "hosting \"{}\" on port {} ({} slots)",
            self.config.server.name,
            self.config.network.session_port,
            self.config.server.max_players()
        );
        Ok(())
    }

    /// Connects to a host and sends JOIN_REQUEST.
    pub(crate) fn join_host(&mut self, addr: PeerAddress, port: u16) -> Result<(), SessionError> {
        if self.role != Role::Idle {
            return Err(SessionError::AlreadyActive);
        }
        self.registry.local.state = ClientState::Connecting;
        let socket = match self.transport.connect(addr, port) {
            Ok(socket) => socket,
            Err(e) => {
                warn!("could not connect to {addr}:{port}: {e}");
                self.registry.reset_local();
                return Err(e.into());
            }
        };

        let local = &mut self.registry.local;
        local.socket = Some(socket);
        local.host_addr = Some(addr);
        local.name = self.config.player.name.clone();
        local.state = ClientState::AwaitingJoinResponse;
        local.stats.accepted_at = self.clock.now();
        self.role = Role::Client;
        self.timers = Default::default();

        let request = JoinRequest {
            protocol_version: self.config.server.protocol_version,
            name: self.config.player.name.clone(),
            password: self.config.player.join_password.clone().unwrap_or_default(),
        };
        self.send_to(Peer::Local, &Packet::ServerCmd(Negotiation::JoinRequest(request)));
        self.ensure_discovery();
        info!("connected to {addr}:{port}; join requested");
        Ok(())
    }

    /// Host side: admits a member held in the waiting state.
    pub(crate) fn admit(&mut self, slot: u8) -> Result<(), SessionError> {
        if self.role != Role::Host {
            return Err(SessionError::NotHosting);
        }
        let h = self
            .registry
            .handle_of(slot)
            .filter(|h| {
                self.registry
                    .get(*h)
                    .is_some_and(|s| s.is_member() && s.flags.contains(SlotFlags::WAITING))
            })
            .ok_or(SessionError::UnknownSlot(slot))?;
        self.admit_slot(h);
        Ok(())
    }

    /// Client side: reports that loading finished.
    pub(crate) fn finish_loading(&mut self) -> Result<(), SessionError> {
        if self.role != Role::Client || self.registry.local.state != ClientState::Joined {
            return Err(SessionError::NotConnected);
        }
        let local = &mut self.registry.local;
        local.flags.remove(SlotFlags::LOADING);
        let info = MemberInfo {
            id: local.id.unwrap_or(HOST_SLOT),
            flags: local.flags,
            name: local.name.clone(),
        };
        self.registry.mirror_member(&info);
        self.send_to(Peer::Local, &Packet::ServerCmd(Negotiation::ClientDetails(info)));
        Ok(())
    }

    /// Host side: removes a member with `reason`.
    pub(crate) fn kick(&mut self, slot: u8, reason: DisconnectReason) -> Result<(), SessionError> {
        if self.role != Role::Host {
            return Err(SessionError::NotHosting);
        }
        let h = self
            .registry
            .handle_of(slot)
            .filter(|_| slot != HOST_SLOT)
            .ok_or(SessionError::UnknownSlot(slot))?;
        self.send_to(
            Peer::Slot(h),
            &Packet::ServerCmd(Negotiation::ClientDisconnect { reason, slot }),
        );
        if let Some(socket) = self.registry.get(h).and_then(|s| s.socket) {
            self.transport.shutdown_send(socket);
        }
        info!("removing slot {slot}: {reason}");
        self.release_slot(h, Some(reason));
        Ok(())
    }

    /// Host side: blacklists a member's address, persists the blacklist, and
    /// kicks the member with `Banned`.
    pub(crate) fn ban(&mut self, slot: u8) -> Result<(), SessionError> {
        if self.role != Role::Host {
            return Err(SessionError::NotHosting);
        }
        let addr = self
            .registry
            .handle_of(slot)
            .filter(|_| slot != HOST_SLOT)
            .and_then(|h| self.registry.get(h))
            .and_then(|s| s.addr)
            .ok_or(SessionError::UnknownSlot(slot))?;
        if self.blacklist.add(&addr.to_string()) {
            info!("banned {addr}");
            let path = self.config.storage.blacklist_file.clone();
            if let Err(e) = save_blacklist(self.files.as_ref(), &path, &self.blacklist) {
                warn!("blacklist not saved: {e}");
            }
        }
        self.kick(slot, DisconnectReason::Banned)
    }

    /// Client side: leaves the session.
    pub(crate) fn leave(&mut self) -> Result<(), SessionError> {
        if self.role != Role::Client {
            return Err(SessionError::NotConnected);
        }
        let slot = self.registry.local.id.unwrap_or(HOST_SLOT);
        self.send_to(
            Peer::Local,
            &Packet::ServerCmd(Negotiation::ClientDisconnect {
                reason: DisconnectReason::Leave,
                slot,
            }),
        );
        if let Some(socket) = self.registry.local.socket {
            self.transport.shutdown_send(socket);
        }
        self.end_client_session(Some(DisconnectReason::Leave), true);
        Ok(())
    }

    /// Host side: tells every member the session is over and closes them.
    fn stop_hosting(&mut self) {
        let goodbye = Packet::ServerCmd(Negotiation::ServerDisconnect {
            reason: DisconnectReason::Leave,
        });
        for h in self.registry.connected_sockets() {
            self.send_to(Peer::Slot(h), &goodbye);
        }
        self.cancel_all_transfers("session closed");
        for socket in self.registry.reset_all() {
            self.transport.shutdown_send(socket);
            self.transport.close(socket);
        }
        self.lingering.clear();
        self.transport.stop_listening();
        self.role = Role::Idle;
        info!("stopped hosting");
    }

    /// Ends whatever session is active and saves bookmarks if they changed.
    pub(crate) fn shutdown(&mut self) -> Result<(), SessionError> {
        match self.role {
            Role::Host => self.stop_hosting(),
            Role::Client => self.leave()?,
            Role::Idle => {}
        }
        self.reap();
        if self.bookmarks.is_dirty() {
            let path = self.config.storage.bookmarks_file.clone();
            save_bookmarks(self.files.as_ref(), &path, &mut self.bookmarks)?;
        }
        Ok(())
    }
}
