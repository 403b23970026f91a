//! # lanlink-core
//!
//! Shared library for LanLink containing the wire protocol, frame
//! reassembly, and the pure domain types used by peer-hosted sessions.
//!
//! This crate has zero dependencies on sockets, timers, or the file system.
//!
//! # Architecture overview
//!
//! A LanLink session is hosted by one peer and joined by up to seven others.
//! All of them speak the same framed binary protocol:
//!
//! - **`protocol`** – How bytes travel over the network.  Packets are encoded
//!   into a 4-byte header plus payload, validated before dispatch, and
//!   reassembled from partial socket reads by a bounded
//!   [`FrameBuffer`](protocol::FrameBuffer).
//!
//! - **`domain`** – Pure bookkeeping: the bookmark store with its staleness
//!   sweep and server-list filter, the blacklist, typed peer addresses, and the
//!   millisecond clock abstraction.

pub mod domain;
pub mod protocol;

pub use domain::address::PeerAddress;
pub use domain::blacklist::Blacklist;
pub use domain::bookmark::{BookmarkStore, LastSeen, ServerBookmark, ServerFilter};
pub use domain::time::{Clock, Millis};
pub use protocol::codec::{decode_packet, encode_packet, ProtocolError};
pub use protocol::messages::Packet;
