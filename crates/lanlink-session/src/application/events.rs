//! Notifications the session delivers to the embedding application.
//!
//! The application registers one [`SessionListener`] at setup.  Everything the
//! session reports (membership changes, application payloads, join outcomes,
//! discovery updates) flows through it.  A [`SessionPolicy`] answers the two
//! questions the session cannot decide on its own: whether an application
//! payload is acceptable and whether a candidate may join.
//!
//! # Delivery order (for beginners)
//!
//! Handlers run while the session is in the middle of processing a packet, so
//! notifications are not delivered on the spot.  They are queued and handed to
//! the listener once the session has released its internal state.  This is
//! what allows a listener to call straight back into the session (for example
//! to send a reply) from inside a callback.

use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

use lanlink_core::protocol::{AppMessage, DisconnectReason, MemberInfo, ServerDescription};
use lanlink_core::PeerAddress;

/// Generic network events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkEvent {
    /// A member was admitted (host) or appeared in the roster (client).
    ClientJoined { slot: u8, name: String },
    /// A member left or was removed.
    ClientLeft {
        slot: u8,
        name: String,
        reason: DisconnectReason,
    },
    /// Host side: a member's connection failed without a goodbye.
    ConnectionLost { slot: u8 },
    /// Host side: a join attempt was refused.
    JoinRejected {
        address: PeerAddress,
        reason: DisconnectReason,
    },
    /// Host side: a candidate passed every join check and waits for
    /// [`Session::admit`](crate::application::Session::admit).
    JoinPending { slot: u8, name: String },
    /// Client side: the host refused the join request.
    Disallowed { reason: DisconnectReason },
    /// Client side: the session with the host ended.  `None` means the
    /// connection failed without a disconnect notice.
    Disconnected { reason: Option<DisconnectReason> },
    /// A member finished loading and is fully active.
    LoadingFinished { slot: u8 },
    /// Host side: a member's heartbeat went silent for too long.
    LagDetected { slot: u8 },
    /// A frame from this peer failed validation and was dropped.
    MalformedPacket { slot: u8 },
    TransferStarted {
        id: u32,
        alias: String,
        peer: u8,
        incoming: bool,
    },
    TransferCompleted {
        id: u32,
        alias: String,
        bytes: u64,
        /// Final location of a received file; `None` for outgoing transfers.
        path: Option<PathBuf>,
    },
    TransferFailed {
        id: u32,
        alias: String,
        reason: String,
    },
}

/// Result of a join attempt, reported to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    Accepted { id: u8, members: Vec<MemberInfo> },
    Refused { reason: DisconnectReason },
}

/// What the host knows about a peer asking to join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinCandidate {
    pub slot: u8,
    pub address: PeerAddress,
    pub name: String,
}

/// Queued notification, one variant per listener callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Network(NetworkEvent),
    App(AppMessage),
    Join(JoinOutcome),
    ServerListChanged,
    ServerBroadcast {
        from: PeerAddress,
        server: ServerDescription,
    },
}

/// Callbacks through which the session reports to the application.
///
/// Every method has an empty default so implementors only override what they
/// care about.
#[cfg_attr(test, mockall::automock)]
pub trait SessionListener {
    fn on_network_event(&mut self, _event: &NetworkEvent) {}

    fn on_app_message(&mut self, _message: &AppMessage) {}

    fn on_join_response(&mut self, _outcome: &JoinOutcome) {}

    /// The visible server list may have changed.
    fn on_server_list_changed(&mut self) {}

    /// A host description arrived on the discovery channel.
    fn on_server_broadcast(&mut self, _from: PeerAddress, _server: &ServerDescription) {}
}

/// Routes a queued notification to the matching callback.
pub(crate) fn deliver(listener: &mut dyn SessionListener, notification: &Notification) {
    match notification {
        Notification::Network(event) => listener.on_network_event(event),
        Notification::App(message) => listener.on_app_message(message),
        Notification::Join(outcome) => listener.on_join_response(outcome),
        Notification::ServerListChanged => listener.on_server_list_changed(),
        Notification::ServerBroadcast { from, server } => listener.on_server_broadcast(*from, server),
    }
}

/// Application decisions consulted during packet handling.
///
/// Policies run while the session state is borrowed and must not call back
/// into the session.
#[cfg_attr(test, mockall::automock)]
pub trait SessionPolicy {
    /// Returns `false` to drop an application payload.  Runs on send and on
    /// receive.
    fn validate_app_message(&self, _message: &AppMessage) -> bool {
        true
    }

    /// Returns `false` to refuse a join with reason `AppSpecific`.
    fn accept_join(&self, _candidate: &JoinCandidate) -> bool {
        true
    }
}

/// Policy that accepts everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl SessionPolicy for AcceptAll {}

/// Listener that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullListener;

impl SessionListener for NullListener {}

/// Listener that records every notification.  Clones share the same log.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    entries: Rc<RefCell<Vec<Notification>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes and returns everything recorded so far.
    pub fn take(&self) -> Vec<Notification> {
        std::mem::take(&mut *self.entries.borrow_mut())
    }

    /// Network events recorded so far, without draining.
    pub fn network_events(&self) -> Vec<NetworkEvent> {
        self.entries
            .borrow()
            .iter()
            .filter_map(|n| match n {
                Notification::Network(e) => Some(e.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn contains(&self, notification: &Notification) -> bool {
        self.entries.borrow().contains(notification)
    }
}

impl SessionListener for EventLog {
    fn on_network_event(&mut self, event: &NetworkEvent) {
        self.entries
            .borrow_mut()
            .push(Notification::Network(event.clone()));
    }

    fn on_app_message(&mut self, message: &AppMessage) {
        self.entries
            .borrow_mut()
            .push(Notification::App(message.clone()));
    }

    fn on_join_response(&mut self, outcome: &JoinOutcome) {
        self.entries
            .borrow_mut()
            .push(Notification::Join(outcome.clone()));
    }

    fn on_server_list_changed(&mut self) {
        self.entries.borrow_mut().push(Notification::ServerListChanged);
    }

    fn on_server_broadcast(&mut self, from: PeerAddress, server: &ServerDescription) {
        self.entries.borrow_mut().push(Notification::ServerBroadcast {
            from,
            server: server.clone(),
        });
    }
}
