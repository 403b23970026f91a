//! Heartbeat pings on session streams and the per-slot lag flag.
//!
//! The host sends every admitted member an ALIVE request every
//! [`PING_INTERVAL`], stamped with its own clock.  The member echoes it back
//! unchanged with the response bit set, and the host turns the echo into a
//! round-trip sample.
//!
//! A member is lagging while its measured delay exceeds [`LAG_THRESHOLD`].
//! Between samples the delay is the silence since the last sample (or since
//! the accept if there has never been one).  The flag is edge-triggered:
//! [`NetworkEvent::LagDetected`] fires only when it goes up, and it only comes
//! down when a fresh sample below the threshold arrives.

use std::time::Duration;

use lanlink_core::protocol::{AlivePing, Negotiation, Packet, SlotFlags};
use lanlink_core::Millis;
use tracing::{debug, info, warn};

use super::core::{Role, SessionCore};
use super::events::NetworkEvent;
use super::registry::{Peer, SlotHandle};

/// Interval between host pings to each member.
pub const PING_INTERVAL: Duration = Duration::from_millis(350);

/// Delay above which a member is flagged as lagging.
pub const LAG_THRESHOLD: Duration = Duration::from_millis(1400);

/// Change of a member's lag state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LagTransition {
    Started,
    Recovered,
}

/// Decides whether the lag flag changes.
///
/// `measured` is either a fresh round-trip sample (`fresh_sample = true`) or
/// the silence since the last one.  Silence can raise the flag but never
/// clears it.
pub fn evaluate(lagging: bool, measured: Duration, fresh_sample: bool) -> Option<LagTransition> {
    let over = measured > LAG_THRESHOLD;
    match (lagging, over) {
        (false, true) => Some(LagTransition::Started),
        (true, false) if fresh_sample => Some(LagTransition::Recovered),
        _ => None,
    }
}

impl SessionCore {
    /// Host side: pings every admitted member and checks for silence.
    pub(crate) fn ping_members(&mut self, now: Millis) {
        for h in self.registry.active_remotes() {
            let ping = Packet::Alive(AlivePing {
                response: false,
                slot: h.index,
                stamp_ms: now.0,
            });
            self.send_to(Peer::Slot(h), &ping);

            let Some(slot) = self.registry.get(h) else {
                continue;
            };
            let lagging = slot.flags.contains(SlotFlags::LAGGING);
            let silence = slot.stats.silence(now);
            if let Some(transition) = evaluate(lagging, silence, false) {
                self.apply_lag(h, transition, silence);
            }
        }
    }

    pub(crate) fn handle_heartbeat(&mut self, peer: Peer, ping: AlivePing) {
        match (self.role, peer, ping.response) {
            (_, _, false) => {
                let echo = Packet::Alive(AlivePing {
                    response: true,
                    ..ping
                });
                self.send_to(peer, &echo);
            }
            (Role::Host, Peer::Slot(h), true) => self.record_pong(h, ping),
            _ => debug!("unexpected heartbeat response from {peer}"),
        }
    }

    fn record_pong(&mut self, h: SlotHandle, ping: AlivePing) {
        if ping.slot != h.index {
            warn!("heartbeat echo for slot {} arrived on slot {}", ping.slot, h.index);
            return;
        }
        let now = self.clock.now();
        let rtt = now.saturating_since(Millis(ping.stamp_ms));
        let Some(slot) = self.registry.get_mut(h) else {
            return;
        };
        slot.stats.last_rtt = Some(rtt);
        slot.stats.rtt_sampled_at = Some(now);
        let lagging = slot.flags.contains(SlotFlags::LAGGING);
        if let Some(transition) = evaluate(lagging, rtt, true) {
            self.apply_lag(h, transition, rtt);
        }
    }

    fn apply_lag(&mut self, h: SlotHandle, transition: LagTransition, measured: Duration) {
        match transition {
            LagTransition::Started => {
                self.registry.set_flag(h, SlotFlags::LAGGING);
                warn!("slot {} is lagging ({} ms)", h.index, measured.as_millis());
                self.event(NetworkEvent::LagDetected { slot: h.index });
            }
            LagTransition::Recovered => {
                self.registry.clear_flag(h, SlotFlags::LAGGING);
                info!("slot {} recovered ({} ms)", h.index, measured.as_millis());
            }
        }
        if let Some(info) = self.registry.get(h).map(|s| s.member_info()) {
            self.broadcast(&Packet::ServerCmd(Negotiation::ClientDetails(info)), None);
        }
    }
}
