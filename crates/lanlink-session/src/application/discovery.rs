//! LAN discovery on the datagram channel and bookmark maintenance.
//!
//! | Traffic                       | Sent by         | Effect on receipt                      |
//! |-------------------------------|-----------------|----------------------------------------|
//! | BROADCAST_PING announce       | host, every 5 s | bookmark created / refreshed           |
//! | BROADCAST_PING query          | anyone          | a host answers with SERVER_DETAILS     |
//! | SERVER_DETAILS (datagram)     | host            | same as an announce                    |
//! | ALIVE request                 | anyone, 350 ms  | echoed in place as a response          |
//! | ALIVE response                | anyone          | bookmark round-trip estimate updated   |
//!
//! Unpinned bookmarks that have not been refreshed for 10 s are purged by a
//! sweep every 5 s.  Pinned bookmarks stay until the user removes them.

use std::time::Duration;

use lanlink_core::protocol::{
    AlivePing, DiscoveryPing, Negotiation, Packet, ServerDescription, BUFFER_CAPACITY, HOST_SLOT,
};
use lanlink_core::{decode_packet, encode_packet, LastSeen, Millis, PeerAddress, ServerBookmark};
use tracing::{debug, info, warn};

use super::core::{Role, SessionCore, Timers};
use super::events::Notification;
use super::SessionError;
use crate::infrastructure::network::SocketError;

/// Interval between host announcements.
pub const BROADCAST_INTERVAL: Duration = Duration::from_millis(5000);

/// Interval between liveness pings to every bookmark.
pub const ALIVE_INTERVAL: Duration = Duration::from_millis(350);

/// Interval between bookmark staleness sweeps.
pub const SWEEP_INTERVAL: Duration = Duration::from_millis(5000);

/// Datagrams handled per tick before yielding.
const MAX_DATAGRAMS_PER_TICK: usize = 64;

/// `true` if the visible fields of a bookmark changed.  Refresh times and
/// round-trip estimates are not shown in the list and do not count.
fn listing_changed(before: Option<&ServerBookmark>, after: Option<&ServerBookmark>) -> bool {
    fn visible(entry: &ServerBookmark) -> ServerBookmark {
        let mut entry = entry.clone();
        if !entry.is_pinned() {
            entry.last_seen = LastSeen::At(Millis(0));
        }
        entry.rtt = None;
        entry
    }
    match (before, after) {
        (Some(a), Some(b)) => visible(a) != visible(b),
        (None, None) => false,
        _ => true,
    }
}

impl SessionCore {
    /// Opens the discovery channel if it is not open yet.  Returns `false` if
    /// the channel is unavailable.
    pub(crate) fn ensure_discovery(&mut self) -> bool {
        if self.discovery_open {
            return true;
        }
        let port = self.config.network.discovery_port;
        match self.transport.open_discovery(port) {
            Ok(()) => {
                debug!("discovery channel open on port {port}");
                self.discovery_open = true;
            }
            Err(e) => warn!("discovery channel unavailable on port {port}: {e}"),
        }
        self.discovery_open
    }

    fn send_discovery(&mut self, to: Option<PeerAddress>, packet: &Packet) {
        let frame = match encode_packet(packet) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("dropping outgoing {:?} datagram: {e}", packet.packet_type());
                return;
            }
        };
        match self.transport.send_datagram(to, &frame) {
            Ok(()) => {}
            Err(SocketError::WouldBlock) => debug!("discovery send would block"),
            Err(e) => match to {
                Some(addr) => debug!("datagram to {addr} failed: {e}"),
                None => warn!("broadcast failed: {e}"),
            },
        }
    }

    // ── Receive ──────────────────────────────────────────────────────────────

    /// Handles every datagram waiting on the discovery channel.
    pub(crate) fn poll_discovery(&mut self, now: Millis) {
        if !self.discovery_open {
            return;
        }
        let mut buf = vec![0u8; BUFFER_CAPACITY];
        for _ in 0..MAX_DATAGRAMS_PER_TICK {
            let (n, from) = match self.transport.recv_datagram(&mut buf) {
                Ok(Some(received)) => received,
                Ok(None) | Err(SocketError::WouldBlock) => return,
                Err(e) => {
                    warn!("discovery receive failed: {e}");
                    return;
                }
            };
            match decode_packet(&buf[..n]) {
                Ok((packet, _)) => self.handle_datagram(from, packet, now),
                Err(e) => debug!("dropping datagram from {from}: {e}"),
            }
        }
    }

    fn handle_datagram(&mut self, from: PeerAddress, packet: Packet, now: Millis) {
        match packet {
            Packet::BroadcastPing(DiscoveryPing::Query) => {
                if self.role == Role::Host {
                    let details = self.server_description(now);
                    self.send_discovery(Some(from), &Packet::ServerCmd(Negotiation::ServerDetails(details)));
                }
            }
            Packet::BroadcastPing(DiscoveryPing::Announce(server))
            | Packet::ServerCmd(Negotiation::ServerDetails(server)) => {
                self.record_server(from, server, now);
            }
            Packet::Alive(ping) if !ping.response => {
                let echo = Packet::Alive(AlivePing {
                    response: true,
                    ..ping
                });
                self.send_discovery(Some(from), &echo);
            }
            Packet::Alive(ping) => {
                let rtt = now.saturating_since(Millis(ping.stamp_ms));
                if !self.bookmarks.record_rtt(from, rtt) {
                    debug!("alive response from unlisted {from}");
                }
            }
            other => debug!("{:?} datagram from {from} ignored", other.packet_type()),
        }
    }

    fn record_server(&mut self, from: PeerAddress, server: ServerDescription, now: Millis) {
        let before = self.bookmarks.get(from).cloned();
        if self.bookmarks.record_discovery(from, &server, now) {
            info!("discovered \"{}\" at {from}", server.name);
        }
        if listing_changed(before.as_ref(), self.bookmarks.get(from)) {
            self.emit(Notification::ServerListChanged);
        }
        self.emit(Notification::ServerBroadcast { from, server });
    }

    // ── Send ─────────────────────────────────────────────────────────────────

    /// Host side: broadcasts the server description, unless disabled.
    pub(crate) fn announce(&mut self, now: Millis) {
        if !self.config.network.broadcast_enabled || !self.ensure_discovery() {
            return;
        }
        let description = self.server_description(now);
        debug!(
            "announcing \"{}\" ({}/{} players)",
            description.name, description.player_count, description.max_players
        );
        self.send_discovery(None, &Packet::BroadcastPing(DiscoveryPing::Announce(description)));
    }

    /// Alive pings to every bookmark and the staleness sweep.
    pub(crate) fn discovery_timers(&mut self, now: Millis) {
        if !self.discovery_open {
            return;
        }
        if Timers::due(&mut self.timers.alive, now, ALIVE_INTERVAL) {
            let ping = Packet::Alive(AlivePing {
                response: false,
                slot: HOST_SLOT,
                stamp_ms: now.0,
            });
            for addr in self.bookmarks.addresses() {
                self.send_discovery(Some(addr), &ping);
            }
        }
        if Timers::due(&mut self.timers.sweep, now, SWEEP_INTERVAL) {
            let purged = self.bookmarks.sweep(now);
            if !purged.is_empty() {
                info!("purged {} stale server(s)", purged.len());
                self.emit(Notification::ServerListChanged);
            }
        }
    }

    /// Asks every host on the LAN, and every bookmarked address, to describe
    /// itself.
    pub(crate) fn refresh_servers(&mut self) -> Result<(), SessionError> {
        if !self.discovery_open {
            self.transport.open_discovery(self.config.network.discovery_port)?;
            self.discovery_open = true;
        }
        let query = Packet::BroadcastPing(DiscoveryPing::Query);
        self.send_discovery(None, &query);
        for addr in self.bookmarks.addresses() {
            self.send_discovery(Some(addr), &query);
        }
        Ok(())
    }

    /// Pins `addr` and asks it to describe itself.
    pub(crate) fn add_bookmark(&mut self, addr: PeerAddress) {
        self.bookmarks.add_bookmark(addr);
        info!("bookmarked {addr}");
        self.emit(Notification::ServerListChanged);
        if self.discovery_open {
            self.send_discovery(Some(addr), &Packet::BroadcastPing(DiscoveryPing::Query));
        }
    }

    /// Forgets `addr`, pinned or not.  Returns `false` if it was unknown.
    pub(crate) fn remove_bookmark(&mut self, addr: PeerAddress) -> bool {
        let removed = self.bookmarks.remove(addr).is_some();
        if removed {
            info!("removed bookmark {addr}");
            self.emit(Notification::ServerListChanged);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDR: PeerAddress = PeerAddress::new(192, 168, 1, 20);

    fn entry(players: u8, seen: u64) -> ServerBookmark {
        let mut e = ServerBookmark::placeholder(ADDR, LastSeen::At(Millis(seen)));
        e.player_count = players;
        e
    }

    #[test]
    fn test_refresh_alone_is_not_a_listing_change() {
        let mut later = entry(2, 9_000);
        later.rtt = Some(Duration::from_millis(12));
        assert!(!listing_changed(Some(&entry(2, 1_000)), Some(&later)));
    }

    #[test]
    fn test_player_count_change_is_a_listing_change() {
        assert!(listing_changed(Some(&entry(2, 1_000)), Some(&entry(3, 1_000))));
    }

    #[test]
    fn test_new_entry_is_a_listing_change() {
        assert!(listing_changed(None, Some(&entry(0, 0))));
        assert!(!listing_changed(None, None));
    }
}
