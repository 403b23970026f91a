//! Application layer: the session state machine.
//!
//! # What lives here? (for beginners)
//!
//! Everything that decides *what happens* when a packet arrives or a timer
//! fires.  None of it touches the OS directly: sockets, time, and files are
//! reached through the traits in [`crate::infrastructure`], so every rule in
//! this layer can be tested with the in-memory network and a manual clock.
//!
//! # Sub-modules
//!
//! - **`session`**     – [`Session`], the public handle with the per-tick
//!   entry point and the re-entrancy guard.
//! - **`core`**        – shared state and the single packet dispatcher.
//! - **`registry`**    – the eight connection slots and the local client.
//! - **`negotiation`** – joining, admission, kicks, bans, and app relaying.
//! - **`heartbeat`**   – host pings and the lag flag.
//! - **`discovery`**   – LAN announcements, queries, and bookmark upkeep.
//! - **`transfer`**    – stop-and-wait file transfer.
//! - **`events`**      – notifications, the listener, and the policy hooks.

pub(crate) mod core;
pub mod discovery;
pub mod events;
pub mod heartbeat;
pub(crate) mod negotiation;
pub mod registry;
pub mod session;
pub mod transfer;

use std::path::PathBuf;

use lanlink_core::ProtocolError;
use thiserror::Error;

use crate::infrastructure::network::SocketError;

pub use self::core::Role;
pub use events::{
    AcceptAll, EventLog, JoinCandidate, JoinOutcome, NetworkEvent, Notification, NullListener,
    SessionListener, SessionPolicy,
};
pub use registry::{ClientState, SlotExhausted, TrafficStats};
pub use session::Session;
pub use transfer::{TransferStatus, XferRole};

/// Errors returned by [`Session`] operations.
///
/// Join refusals are not errors: they travel to the peer as a
/// `DisconnectReason` and are reported through the listener.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("this operation requires hosting a session")]
    NotHosting,

    #[error("not connected to a session")]
    NotConnected,

    #[error("a session is already active")]
    AlreadyActive,

    #[error("no member in slot {0}")]
    UnknownSlot(u8),

    #[error("no active transfer {0:#x}")]
    UnknownTransfer(u32),

    #[error("invalid transfer name {0:?}")]
    InvalidAlias(String),

    #[error("{path} is too large to transfer ({len} bytes)")]
    FileTooLarge { path: PathBuf, len: u64 },

    /// The session is already inside a call further up the stack.
    #[error("session is busy")]
    Busy,

    #[error(transparent)]
    Socket(#[from] SocketError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
