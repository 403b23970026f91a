//! `std::net` implementation of [`Transport`].
//!
//! Every socket is switched to non-blocking mode right after it is created.
//! Outbound bytes go into a per-stream backlog that is flushed as far as the
//! kernel allows on every `send` and `recv`; whatever does not fit waits for
//! the next tick.
//!
//! `std` has no readiness API, so [`poll_readable`](Transport::poll_readable)
//! returns every open stream and relies on `recv` reporting `WouldBlock` for
//! idle ones.  With at most eight streams that is cheap.
//!
//! # Discovery port sharing
//!
//! Two peers on one machine cannot both bind the discovery port.  When the
//! port is taken the transport falls back to an ephemeral port: broadcasts
//! from hosts are then missed, but unicast queries and their replies still
//! work.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{Ipv4Addr, Shutdown, SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::time::Duration;

use lanlink_core::PeerAddress;
use tracing::{debug, info, warn};

use super::{SocketError, SocketId, Transport};

/// Outbound bytes a stream may accumulate before the peer is considered
/// unresponsive.
const MAX_BACKLOG: usize = 256 * 1024;

struct StreamEntry {
    stream: TcpStream,
    backlog: Vec<u8>,
}

impl StreamEntry {
    /// Writes as much of the backlog as the kernel accepts.
    fn flush(&mut self) -> Result<(), SocketError> {
        while !self.backlog.is_empty() {
            match self.stream.write(&self.backlog) {
                Ok(0) => return Err(SocketError::Closed),
                Ok(n) => {
                    self.backlog.drain(..n);
                }
                Err(e) => match SocketError::from_io(e) {
                    SocketError::WouldBlock => return Ok(()),
                    other => return Err(other),
                },
            }
        }
        Ok(())
    }
}

/// Production transport over `std::net` sockets.
pub struct StdTransport {
    bind_address: Ipv4Addr,
    connect_timeout: Duration,
    listener: Option<TcpListener>,
    streams: HashMap<SocketId, StreamEntry>,
    discovery: Option<UdpSocket>,
    discovery_port: u16,
    next_id: u32,
}

impl StdTransport {
    pub fn new(bind_address: Ipv4Addr, connect_timeout: Duration) -> Self {
        Self {
            bind_address,
            connect_timeout,
            listener: None,
            streams: HashMap::new(),
            discovery: None,
            discovery_port: 0,
            next_id: 1,
        }
    }

    fn register(&mut self, stream: TcpStream) -> Result<SocketId, SocketError> {
        stream.set_nonblocking(true)?;
        // Small frames dominate the traffic; do not let Nagle delay them.
        stream.set_nodelay(true)?;
        let id = SocketId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1).max(1);
        self.streams.insert(
            id,
            StreamEntry {
                stream,
                backlog: Vec::new(),
            },
        );
        Ok(id)
    }
}

impl Transport for StdTransport {
    fn listen(&mut self, port: u16) -> Result<(), SocketError> {
        let addr = SocketAddr::from((self.bind_address, port));
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        info!("accepting session connections on TCP {addr}");
        self.listener = Some(listener);
        Ok(())
    }

    fn stop_listening(&mut self) {
        self.listener = None;
    }

    fn accept(&mut self) -> Result<Option<(SocketId, PeerAddress)>, SocketError> {
        let Some(listener) = self.listener.as_ref() else {
            return Ok(None);
        };
        loop {
            match listener.accept() {
                Ok((stream, remote)) => match PeerAddress::from_socket_addr(remote) {
                    Some(peer) => return self.register(stream).map(|id| Some((id, peer))),
                    None => {
                        warn!("refusing non-IPv4 connection from {remote}");
                        let _ = stream.shutdown(Shutdown::Both);
                    }
                },
                Err(e) => {
                    return match SocketError::from_io(e) {
                        SocketError::WouldBlock => Ok(None),
                        other => Err(other),
                    }
                }
            }
        }
    }

    // Blocks for up to `connect_timeout`; the stream is non-blocking after.
    fn connect(&mut self, addr: PeerAddress, port: u16) -> Result<SocketId, SocketError> {
        let stream = TcpStream::connect_timeout(&addr.with_port(port), self.connect_timeout)?;
        debug!("connected to {addr}:{port}");
        self.register(stream)
    }

    fn send(&mut self, socket: SocketId, bytes: &[u8]) -> Result<(), SocketError> {
        let entry = self
            .streams
            .get_mut(&socket)
            .ok_or(SocketError::UnknownSocket(socket))?;
        if entry.backlog.len() + bytes.len() > MAX_BACKLOG {
            return Err(SocketError::BacklogFull(socket));
        }
        entry.backlog.extend_from_slice(bytes);
        entry.flush()
    }

    fn recv(&mut self, socket: SocketId, buf: &mut [u8]) -> Result<usize, SocketError> {
        let entry = self
            .streams
            .get_mut(&socket)
            .ok_or(SocketError::UnknownSocket(socket))?;
        entry.flush()?;
        if buf.is_empty() {
            return Err(SocketError::WouldBlock);
        }
        match entry.stream.read(buf) {
            Ok(0) => Err(SocketError::Closed),
            Ok(n) => Ok(n),
            Err(e) => Err(SocketError::from_io(e)),
        }
    }

    fn shutdown_send(&mut self, socket: SocketId) {
        if let Some(entry) = self.streams.get_mut(&socket) {
            let _ = entry.flush();
            if let Err(e) = entry.stream.shutdown(Shutdown::Write) {
                debug!("shutdown of {socket} failed: {e}");
            }
        }
    }

    fn close(&mut self, socket: SocketId) {
        if let Some(mut entry) = self.streams.remove(&socket) {
            let _ = entry.flush();
            let _ = entry.stream.shutdown(Shutdown::Both);
        }
    }

    fn poll_readable(&mut self) -> Vec<SocketId> {
        let mut ids: Vec<SocketId> = self.streams.keys().copied().collect();
        ids.sort();
        ids
    }

    fn open_discovery(&mut self, port: u16) -> Result<(), SocketError> {
        let socket = match UdpSocket::bind(SocketAddr::from((self.bind_address, port))) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
                warn!("discovery port {port} in use; falling back to an ephemeral port");
                UdpSocket::bind(SocketAddr::from((self.bind_address, 0)))?
            }
            Err(e) => return Err(e.into()),
        };
        socket.set_nonblocking(true)?;
        socket.set_broadcast(true)?;
        info!("discovery channel on UDP {}", socket.local_addr()?);
        self.discovery = Some(socket);
        self.discovery_port = port;
        Ok(())
    }

    fn send_datagram(&mut self, to: Option<PeerAddress>, bytes: &[u8]) -> Result<(), SocketError> {
        let Some(socket) = self.discovery.as_ref() else {
            return Err(SocketError::Closed);
        };
        let dest = to
            .unwrap_or(PeerAddress(Ipv4Addr::BROADCAST))
            .with_port(self.discovery_port);
        match socket.send_to(bytes, dest) {
            Ok(_) => Ok(()),
            Err(e) => Err(SocketError::from_io(e)),
        }
    }

    fn recv_datagram(&mut self, buf: &mut [u8]) -> Result<Option<(usize, PeerAddress)>, SocketError> {
        let Some(socket) = self.discovery.as_ref() else {
            return Ok(None);
        };
        loop {
            match socket.recv_from(buf) {
                Ok((n, from)) => match PeerAddress::from_socket_addr(from) {
                    Some(peer) => return Ok(Some((n, peer))),
                    None => continue,
                },
                Err(e) => {
                    return match SocketError::from_io(e) {
                        SocketError::WouldBlock => Ok(None),
                        other => Err(other),
                    }
                }
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
