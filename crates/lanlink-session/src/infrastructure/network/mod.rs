//! Network infrastructure: the socket collaborator the session drives.
//!
//! # Sub-modules
//!
//! - **`socket`** – [`StdTransport`](socket::StdTransport), non-blocking
//!   `std::net` TCP streams for the session channel and a UDP socket for the
//!   discovery channel.
//! - **`mock`** – [`MemoryNetwork`](mock::MemoryNetwork), an in-process
//!   network used by tests to wire hosts, clients, and scripted raw peers
//!   together without touching the OS.
//!
//! The session never blocks on a socket.  Every call either completes
//! immediately or reports [`SocketError::WouldBlock`], which the session
//! treats as "try again next tick".

pub mod mock;
pub mod socket;

use lanlink_core::PeerAddress;
use thiserror::Error;

/// Opaque handle for one stream socket owned by a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketId(pub u32);

impl std::fmt::Display for SocketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "socket#{}", self.0)
    }
}

/// Errors reported by a [`Transport`].
#[derive(Debug, Error)]
pub enum SocketError {
    /// Nothing to read, or the send buffer is momentarily full.  Retried on
    /// the next tick.
    #[error("operation would block")]
    WouldBlock,
    /// The peer closed the connection.
    #[error("connection closed")]
    Closed,
    /// The handle does not belong to this transport (already closed).
    #[error("unknown {0}")]
    UnknownSocket(SocketId),
    /// The peer stopped reading and too much outbound data piled up.
    #[error("send backlog exceeded on {0}")]
    BacklogFull(SocketId),
    /// Any other OS-level failure.
    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SocketError {
    /// Maps an `io::Error`, folding the retryable kinds into
    /// [`SocketError::WouldBlock`].
    pub fn from_io(e: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match e.kind() {
            ErrorKind::WouldBlock | ErrorKind::Interrupted | ErrorKind::TimedOut => {
                SocketError::WouldBlock
            }
            ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof => SocketError::Closed,
            _ => SocketError::Io(e),
        }
    }

    /// `true` for errors that only mean "not now".
    pub fn is_transient(&self) -> bool {
        matches!(self, SocketError::WouldBlock)
    }
}

/// Non-blocking socket primitive consumed by the session.
///
/// One transport carries both channels: reliable byte streams for session
/// traffic (TCP in production) and a datagram socket on the discovery port.
pub trait Transport {
    /// Starts accepting session connections on `port`.
    fn listen(&mut self, port: u16) -> Result<(), SocketError>;

    /// Stops accepting new session connections.
    fn stop_listening(&mut self);

    /// Returns the next pending inbound connection, if any.
    fn accept(&mut self) -> Result<Option<(SocketId, PeerAddress)>, SocketError>;

    /// Opens a stream to `addr:port`.
    fn connect(&mut self, addr: PeerAddress, port: u16) -> Result<SocketId, SocketError>;

    /// Queues `bytes` for delivery.  Either the whole slice is accepted or an
    /// error is returned.
    fn send(&mut self, socket: SocketId, bytes: &[u8]) -> Result<(), SocketError>;

    /// Reads into `buf`.  Returns [`SocketError::Closed`] once the peer has
    /// shut down its send side and everything has been read.
    fn recv(&mut self, socket: SocketId, buf: &mut [u8]) -> Result<usize, SocketError>;

    /// Shuts down the send side; the peer sees end-of-stream after draining.
    fn shutdown_send(&mut self, socket: SocketId);

    /// Releases the socket.  Unknown handles are ignored.
    fn close(&mut self, socket: SocketId);

    /// Returns the stream sockets that may have something to read.
    ///
    /// Implementations without a readiness API may return every open stream;
    /// [`recv`](Self::recv) then reports `WouldBlock` for idle ones.
    fn poll_readable(&mut self) -> Vec<SocketId>;

    /// Binds the datagram socket used for discovery on `port`.
    fn open_discovery(&mut self, port: u16) -> Result<(), SocketError>;

    /// Sends a datagram to `to`, or broadcasts it on the local network when
    /// `to` is `None`.
    fn send_datagram(&mut self, to: Option<PeerAddress>, bytes: &[u8]) -> Result<(), SocketError>;

    /// Returns the next received datagram and its sender, if any.
    fn recv_datagram(&mut self, buf: &mut [u8]) -> Result<Option<(usize, PeerAddress)>, SocketError>;
}
