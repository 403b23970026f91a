//! [`Session`]: the handle the embedding application drives.
//!
//! # Threading model (for beginners)
//!
//! A session runs on one thread and never blocks.  The application calls
//! [`Session::service`] once per loop iteration; each call accepts pending
//! connections, drains every readable socket, handles discovery datagrams,
//! and fires whichever timers are due.  When the environment reports socket
//! readiness on its own, it calls [`Session::notify_readable`], which feeds
//! the same read path.
//!
//! Every method takes `&self`.  The mutable state sits in a `RefCell` that is
//! borrowed only for the duration of one operation, and listener callbacks
//! run after the borrow is released.  A listener may therefore call straight
//! back into the session, for example to send a reply from
//! `on_app_message`.
//!
//! # Re-entrancy
//!
//! A `service()` call made from inside a callback does not recurse.  It marks
//! the running call to make one more pass and returns at once.  Readiness
//! notifications arriving mid-call are queued and drained by the running call.
//! Only [`SessionPolicy`] hooks run while the state is borrowed; a policy that
//! calls back in gets [`SessionError::Busy`].

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::path::Path;

use lanlink_core::protocol::{DisconnectReason, MemberInfo, ServerDescription, SlotFlags};
use lanlink_core::{Clock, PeerAddress, ServerBookmark, ServerFilter};
use tracing::debug;

use super::core::{Role, SessionCore};
use super::events::{deliver, AcceptAll, Notification, NullListener, SessionListener, SessionPolicy};
use super::registry::{ClientState, TrafficStats};
use super::transfer::TransferStatus;
use super::SessionError;
use crate::infrastructure::network::{SocketId, Transport};
use crate::infrastructure::storage::config::SessionConfig;
use crate::infrastructure::storage::files::FileStore;
use crate::infrastructure::storage::lists::{load_blacklist, load_bookmarks};

/// A peer-hosted session endpoint: idle, hosting, or joined to a host.
pub struct Session {
    core: RefCell<SessionCore>,
    listener: RefCell<Box<dyn SessionListener>>,
    outbox: RefCell<VecDeque<Notification>>,
    pending_readable: RefCell<VecDeque<SocketId>>,
    depth: Cell<u32>,
    rerun: Cell<bool>,
}

impl Session {
    /// Creates an idle session and loads the bookmark and blacklist files
    /// named in `config`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Io`] if either file exists but cannot be read.
    pub fn new(
        config: SessionConfig,
        transport: Box<dyn Transport>,
        clock: Box<dyn Clock>,
        files: Box<dyn FileStore>,
    ) -> Result<Self, SessionError> {
        let bookmarks = load_bookmarks(files.as_ref(), &config.storage.bookmarks_file)?;
        let blacklist = load_blacklist(files.as_ref(), &config.storage.blacklist_file)?;
        let core = SessionCore::new(
            config,
            transport,
            clock,
            files,
            Box::new(AcceptAll),
            bookmarks,
            blacklist,
        );
        Ok(Self {
            core: RefCell::new(core),
            listener: RefCell::new(Box::new(NullListener)),
            outbox: RefCell::new(VecDeque::new()),
            pending_readable: RefCell::new(VecDeque::new()),
            depth: Cell::new(0),
            rerun: Cell::new(false),
        })
    }

    /// Registers the listener at setup.
    pub fn with_listener(mut self, listener: impl SessionListener + 'static) -> Self {
        *self.listener.get_mut() = Box::new(listener);
        self
    }

    /// Registers the application policy at setup.
    pub fn with_policy(mut self, policy: impl SessionPolicy + 'static) -> Self {
        self.core.get_mut().policy = Box::new(policy);
        self
    }

    /// Replaces the listener.  Fails with [`SessionError::Busy`] from inside
    /// a callback.
    pub fn set_listener(&self, listener: Box<dyn SessionListener>) -> Result<(), SessionError> {
        let mut slot = self.listener.try_borrow_mut().map_err(|_| SessionError::Busy)?;
        *slot = listener;
        Ok(())
    }

    // ── Driving ──────────────────────────────────────────────────────────────

    /// One polling pass: accept, read, discovery, timers, then notification
    /// delivery.
    pub fn service(&self) {
        self.run(true);
    }

    /// Reports that `socket` has data, as an alternative to waiting for the
    /// next [`service`](Self::service) poll.
    pub fn notify_readable(&self, socket: SocketId) {
        self.pending_readable.borrow_mut().push_back(socket);
        self.run(false);
    }

    fn run(&self, tick: bool) {
        if self.depth.get() > 0 {
            if tick {
                debug!("re-entrant service call deferred");
                self.rerun.set(true);
            }
            return;
        }
        self.depth.set(1);
        let mut tick = tick;
        loop {
            self.rerun.set(false);
            if !self.pump(tick) {
                break;
            }
            if !self.deliver() {
                break;
            }
            if self.rerun.get() {
                tick = true;
                continue;
            }
            if self.pending_readable.borrow().is_empty() && self.outbox.borrow().is_empty() {
                break;
            }
            tick = false;
        }
        self.depth.set(0);
    }

    /// Runs queued reads (and a tick) under the state borrow.  Returns
    /// `false` if the state is borrowed further up the stack.
    fn pump(&self, tick: bool) -> bool {
        let Ok(mut core) = self.core.try_borrow_mut() else {
            return false;
        };
        if tick {
            core.tick();
        }
        loop {
            let next = self.pending_readable.borrow_mut().pop_front();
            let Some(socket) = next else {
                break;
            };
            core.read_socket(socket);
            core.reap();
        }
        self.outbox.borrow_mut().extend(core.take_notifications());
        true
    }

    /// Hands queued notifications to the listener.  Returns `false` if the
    /// listener is unavailable.
    fn deliver(&self) -> bool {
        loop {
            let next = self.outbox.borrow_mut().pop_front();
            let Some(notification) = next else {
                return true;
            };
            match self.listener.try_borrow_mut() {
                Ok(mut listener) => deliver(&mut **listener, &notification),
                Err(_) => {
                    self.outbox.borrow_mut().push_front(notification);
                    return false;
                }
            }
        }
    }

    /// Runs `f` on the state, then delivers whatever it queued.
    fn with_core<T>(&self, f: impl FnOnce(&mut SessionCore) -> T) -> Result<T, SessionError> {
        let out = {
            let mut core = self.core.try_borrow_mut().map_err(|_| SessionError::Busy)?;
            let out = f(&mut *core);
            self.outbox.borrow_mut().extend(core.take_notifications());
            out
        };
        self.run(false);
        Ok(out)
    }

    fn inspect<T>(&self, f: impl FnOnce(&SessionCore) -> T) -> Result<T, SessionError> {
        let core = self.core.try_borrow().map_err(|_| SessionError::Busy)?;
        Ok(f(&*core))
    }

    // ── Session lifecycle ────────────────────────────────────────────────────

    /// Starts hosting on the configured session port.
    pub fn host(&self) -> Result<(), SessionError> {
        self.with_core(|core| core.start_hosting())?
    }

    /// Connects to a host and requests to join.  `port` defaults to the
    /// configured session port.  The password sent is
    /// `player.join_password`.
    ///
    /// # Blocking
    ///
    /// The TCP connect itself is the one blocking step in a session: with
    /// the std transport this call waits up to `network.connect_timeout_ms`
    /// (3 s by default) for the host to answer, and nothing else is serviced
    /// meanwhile.  Everything after the connect is non-blocking.
    pub fn join(&self, addr: PeerAddress, port: Option<u16>) -> Result<(), SessionError> {
        self.with_core(|core| {
            let port = port.unwrap_or(core.config.network.session_port);
            core.join_host(addr, port)
        })?
    }

    /// Host side: admits a member waiting after its join checks.
    pub fn admit(&self, slot: u8) -> Result<(), SessionError> {
        self.with_core(|core| core.admit(slot))?
    }

    /// Client side: tells the host this member finished loading.
    pub fn finish_loading(&self) -> Result<(), SessionError> {
        self.with_core(|core| core.finish_loading())?
    }

    /// Host side: removes a member.
    pub fn kick(&self, slot: u8, reason: DisconnectReason) -> Result<(), SessionError> {
        self.with_core(|core| core.kick(slot, reason))?
    }

    /// Host side: blacklists a member's address and removes it.
    pub fn ban(&self, slot: u8) -> Result<(), SessionError> {
        self.with_core(|core| core.ban(slot))?
    }

    /// Client side: leaves the session.
    pub fn leave(&self) -> Result<(), SessionError> {
        self.with_core(|core| core.leave())?
    }

    /// Ends any active session and saves changed bookmarks.
    pub fn shutdown(&self) -> Result<(), SessionError> {
        self.with_core(|core| core.shutdown())?
    }

    // ── Traffic ──────────────────────────────────────────────────────────────

    /// Sends an application payload to member `to`, or to everyone with
    /// [`BROADCAST_SLOT`](lanlink_core::protocol::BROADCAST_SLOT).
    pub fn send_app(&self, to: u8, body: Vec<u8>) -> Result<(), SessionError> {
        self.with_core(|core| core.send_app(to, body))?
    }

    /// Starts sending a file to member `to`.  Returns the transfer id.
    pub fn send_file(&self, to: u8, path: &Path, alias: Option<String>) -> Result<u32, SessionError> {
        self.with_core(|core| core.start_send(to, path, alias))?
    }

    pub fn cancel_transfer(&self, id: u32) -> Result<(), SessionError> {
        self.with_core(|core| core.cancel_transfer(id))?
    }

    // ── Discovery ────────────────────────────────────────────────────────────

    /// Queries the LAN and every bookmark for running servers.
    pub fn refresh_servers(&self) -> Result<(), SessionError> {
        self.with_core(|core| core.refresh_servers())?
    }

    pub fn add_bookmark(&self, addr: PeerAddress) -> Result<(), SessionError> {
        self.with_core(|core| core.add_bookmark(addr))
    }

    /// Returns `false` if `addr` was not listed.
    pub fn remove_bookmark(&self, addr: PeerAddress) -> Result<bool, SessionError> {
        self.with_core(|core| core.remove_bookmark(addr))
    }

    /// The visible server list under `filter`.
    pub fn server_list(&self, filter: ServerFilter) -> Result<Vec<ServerBookmark>, SessionError> {
        self.inspect(|core| core.bookmarks.filtered(filter))
    }

    // ── Inspection ───────────────────────────────────────────────────────────

    pub fn role(&self) -> Result<Role, SessionError> {
        self.inspect(|core| core.role)
    }

    /// This process's member id once hosting or admitted.
    pub fn local_id(&self) -> Result<Option<u8>, SessionError> {
        self.inspect(|core| core.own_id())
    }

    pub fn client_state(&self) -> Result<ClientState, SessionError> {
        self.inspect(|core| core.registry.local.state)
    }

    /// Every member past the join checks, host included.
    pub fn roster(&self) -> Result<Vec<MemberInfo>, SessionError> {
        self.inspect(|core| core.registry.roster())
    }

    /// Number of occupied slots, including refused peers still draining.
    pub fn occupied_slots(&self) -> Result<usize, SessionError> {
        self.inspect(|core| core.registry.occupied_count())
    }

    pub fn slot_flags(&self, slot: u8) -> Result<Option<SlotFlags>, SessionError> {
        self.inspect(|core| {
            core.registry
                .handle_of(slot)
                .and_then(|h| core.registry.get(h))
                .map(|s| s.flags)
        })
    }

    pub fn slot_stats(&self, slot: u8) -> Result<Option<TrafficStats>, SessionError> {
        self.inspect(|core| {
            core.registry
                .handle_of(slot)
                .and_then(|h| core.registry.get(h))
                .map(|s| s.stats)
        })
    }

    pub fn transfers(&self) -> Result<Vec<TransferStatus>, SessionError> {
        self.inspect(|core| core.transfers.statuses())
    }

    /// Host side: the live description.  Client side: the host's latest
    /// SERVER_DETAILS.
    pub fn server_details(&self) -> Result<Option<ServerDescription>, SessionError> {
        self.inspect(|core| match core.role {
            Role::Host => Some(core.server_description(core.clock.now())),
            _ => core.remote_server.clone(),
        })
    }

    pub fn is_banned(&self, addr: PeerAddress) -> Result<bool, SessionError> {
        self.inspect(|core| core.blacklist.is_address_banned(addr))
    }
}

#[cfg(test)]
mod tests {
    use std::cell::OnceCell;
    use std::rc::{Rc, Weak};

    use super::*;
    use crate::application::events::{EventLog, MockSessionListener};
    use crate::infrastructure::clock::ManualClock;
    use crate::infrastructure::network::mock::MemoryNetwork;
    use crate::infrastructure::storage::files::FsFileStore;
    use lanlink_core::Millis;
    use uuid::Uuid;

    const LOCAL: PeerAddress = PeerAddress::new(10, 0, 0, 1);
    const SERVER: PeerAddress = PeerAddress::new(10, 0, 0, 9);

    fn session(net: &MemoryNetwork) -> Session {
        let dir = std::env::temp_dir().join(format!("lanlink_test_{}", Uuid::new_v4()));
        let mut config = SessionConfig::default();
        config.storage.bookmarks_file = dir.join("bookmarks.txt");
        config.storage.blacklist_file = dir.join("blacklist.txt");
        config.storage.download_dir = dir.join("downloads");
        Session::new(
            config,
            Box::new(net.transport(LOCAL)),
            Box::new(ManualClock::new(Millis(1_000))),
            Box::new(FsFileStore),
        )
        .unwrap()
    }

    /// Calls back into the session from the first list-change callback.
    struct Reentrant {
        session: Rc<OnceCell<Weak<Session>>>,
        seen_roster: Rc<Cell<bool>>,
        calls: Rc<Cell<u32>>,
    }

    impl SessionListener for Reentrant {
        fn on_server_list_changed(&mut self) {
            self.calls.set(self.calls.get() + 1);
            if self.calls.get() > 1 {
                return;
            }
            if let Some(session) = self.session.get().and_then(Weak::upgrade) {
                session.service();
                self.seen_roster.set(session.roster().is_ok());
                session.add_bookmark(SERVER).unwrap();
            }
        }
    }

    #[test]
    fn test_new_session_is_idle() {
        let net = MemoryNetwork::new();
        let s = session(&net);
        assert_eq!(s.role().unwrap(), Role::Idle);
        assert_eq!(s.local_id().unwrap(), None);
        assert!(s.roster().unwrap().is_empty());
    }

    #[test]
    fn test_host_claims_slot_zero() {
        // Arrange
        let net = MemoryNetwork::new();
        let s = session(&net);

        // Act
        s.host().unwrap();

        // Assert
        assert_eq!(s.role().unwrap(), Role::Host);
        assert_eq!(s.local_id().unwrap(), Some(0));
        assert_eq!(s.roster().unwrap().len(), 1);
        assert!(matches!(s.host(), Err(SessionError::AlreadyActive)));
    }

    #[test]
    fn test_bookmark_change_is_delivered_to_listener() {
        let net = MemoryNetwork::new();
        let mut listener = MockSessionListener::new();
        listener.expect_on_server_list_changed().times(1).return_const(());
        let s = session(&net).with_listener(listener);

        s.add_bookmark(SERVER).unwrap();
    }

    #[test]
    fn test_listener_may_call_back_into_session() {
        // Arrange
        let net = MemoryNetwork::new();
        let cell = Rc::new(OnceCell::new());
        let seen_roster = Rc::new(Cell::new(false));
        let calls = Rc::new(Cell::new(0));
        let s = Rc::new(session(&net).with_listener(Reentrant {
            session: cell.clone(),
            seen_roster: seen_roster.clone(),
            calls: calls.clone(),
        }));
        let _ = cell.set(Rc::downgrade(&s));

        // Act
        s.add_bookmark(PeerAddress::new(10, 0, 0, 20)).unwrap();

        // Assert: the nested add was delivered after the first callback returned.
        assert_eq!(calls.get(), 2);
        assert!(seen_roster.get());
        assert_eq!(s.server_list(ServerFilter::default()).unwrap().len(), 2);
    }

    #[test]
    fn test_nested_service_is_deferred_not_recursive() {
        let net = MemoryNetwork::new();
        let s = session(&net);
        s.depth.set(1);

        s.service();

        assert!(s.rerun.get());
        s.depth.set(0);
    }

    #[test]
    fn test_operations_before_joining_fail_cleanly() {
        let net = MemoryNetwork::new();
        let s = session(&net);
        assert!(matches!(s.send_app(1, vec![1]), Err(SessionError::NotConnected)));
        assert!(matches!(s.kick(1, DisconnectReason::Leave), Err(SessionError::NotHosting)));
        assert!(matches!(s.leave(), Err(SessionError::NotConnected)));
        assert!(matches!(s.cancel_transfer(7), Err(SessionError::UnknownTransfer(7))));
    }

    #[test]
    fn test_event_log_listener_records_bookmark_changes() {
        let net = MemoryNetwork::new();
        let log = EventLog::new();
        let s = session(&net).with_listener(log.clone());

        s.add_bookmark(SERVER).unwrap();
        assert!(s.remove_bookmark(SERVER).unwrap());
        assert!(!s.remove_bookmark(SERVER).unwrap());

        assert_eq!(
            log.take(),
            vec![Notification::ServerListChanged, Notification::ServerListChanged]
        );
    }
}
