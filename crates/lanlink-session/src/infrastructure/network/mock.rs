//! In-memory network for tests.
//!
//! A [`MemoryNetwork`] is a shared hub.  Each participant gets a
//! [`MemoryTransport`] bound to its own [`PeerAddress`]; connecting from one
//! transport to an address that is listening creates a linked pair of
//! streams, and datagrams are delivered between transports that opened their
//! discovery channel.  Tests can also open a [`RawPeer`], a scripted endpoint
//! that speaks raw frames, to exercise the host with hand-built traffic.
//!
//! Stream semantics follow TCP closely enough for the session:
//! - bytes arrive in order, and a read may return any prefix of what is queued
//!   (see [`MemoryNetwork::set_read_chunk`]);
//! - after the peer shuts down or closes, queued bytes are still readable and
//!   only then does `recv` report [`SocketError::Closed`];
//! - sending to a peer that has closed reports [`SocketError::Closed`].

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use lanlink_core::protocol::{decode_packet, encode_packet, FrameBuffer};
use lanlink_core::{Packet, PeerAddress};

use super::{SocketError, SocketId, Transport};

struct Pipe {
    owner: PeerAddress,
    remote: SocketId,
    inbox: VecDeque<u8>,
    /// The remote end will send nothing more.
    eof: bool,
}

#[derive(Default)]
struct Hub {
    next_socket: u32,
    listeners: HashMap<PeerAddress, (u16, VecDeque<(SocketId, PeerAddress)>)>,
    pipes: HashMap<SocketId, Pipe>,
    datagram_inboxes: HashMap<PeerAddress, VecDeque<(Vec<u8>, PeerAddress)>>,
    read_chunk: Option<usize>,
}

impl Hub {
    fn allocate(&mut self) -> SocketId {
        self.next_socket += 1;
        SocketId(self.next_socket)
    }

    fn link(&mut self, from: PeerAddress, to: PeerAddress) -> (SocketId, SocketId) {
        let near = self.allocate();
        let far = self.allocate();
        self.pipes.insert(
            near,
            Pipe {
                owner: from,
                remote: far,
                inbox: VecDeque::new(),
                eof: false,
            },
        );
        self.pipes.insert(
            far,
            Pipe {
                owner: to,
                remote: near,
                inbox: VecDeque::new(),
                eof: false,
            },
        );
        (near, far)
    }

    fn send(&mut self, socket: SocketId, bytes: &[u8]) -> Result<(), SocketError> {
        let remote = self
            .pipes
            .get(&socket)
            .ok_or(SocketError::UnknownSocket(socket))?
            .remote;
        let target = self.pipes.get_mut(&remote).ok_or(SocketError::Closed)?;
        target.inbox.extend(bytes.iter().copied());
        Ok(())
    }

    fn recv(&mut self, socket: SocketId, buf: &mut [u8]) -> Result<usize, SocketError> {
        let limit = self.read_chunk.unwrap_or(usize::MAX);
        let pipe = self
            .pipes
            .get_mut(&socket)
            .ok_or(SocketError::UnknownSocket(socket))?;
        if buf.is_empty() {
            return Err(SocketError::WouldBlock);
        }
        if pipe.inbox.is_empty() {
            return Err(if pipe.eof {
                SocketError::Closed
            } else {
                SocketError::WouldBlock
            });
        }
        let n = pipe.inbox.len().min(buf.len()).min(limit);
        for (slot, byte) in buf.iter_mut().zip(pipe.inbox.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn shutdown_send(&mut self, socket: SocketId) {
        if let Some(remote) = self.pipes.get(&socket).map(|p| p.remote) {
            if let Some(target) = self.pipes.get_mut(&remote) {
                target.eof = true;
            }
        }
    }

    fn close(&mut self, socket: SocketId) {
        self.shutdown_send(socket);
        self.pipes.remove(&socket);
    }
}

/// Shared in-memory network.  Cloning yields another handle to the same hub.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    hub: Arc<Mutex<Hub>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport for the participant at `address`.
    pub fn transport(&self, address: PeerAddress) -> MemoryTransport {
        MemoryTransport {
            hub: self.hub.clone(),
            local: address,
        }
    }

    /// Opens a scripted stream from `from` to the listener at `to:port`.
    ///
    /// Panics if nothing listens there.
    pub fn raw_connect(&self, from: PeerAddress, to: PeerAddress, port: u16) -> RawPeer {
        let mut transport = self.transport(from);
        let socket = transport
            .connect(to, port)
            .expect("raw_connect: nothing is listening at the target");
        RawPeer {
            transport,
            socket,
            buffer: FrameBuffer::new(),
            closed: false,
        }
    }

    /// Limits every `recv` to at most `bytes` bytes, forcing partial frames.
    pub fn set_read_chunk(&self, bytes: usize) {
        self.hub.lock().expect("lock poisoned").read_chunk = Some(bytes.max(1));
    }

    /// Simulates a dropped connection: both ends of every stream owned by
    /// `address` see end-of-stream.
    pub fn sever(&self, address: PeerAddress) {
        let mut hub = self.hub.lock().expect("lock poisoned");
        let owned: Vec<SocketId> = hub
            .pipes
            .iter()
            .filter(|(_, p)| p.owner == address)
            .map(|(id, _)| *id)
            .collect();
        for socket in owned {
            if let Some(pipe) = hub.pipes.get_mut(&socket) {
                pipe.inbox.clear();
                pipe.eof = true;
            }
            hub.shutdown_send(socket);
        }
    }

    /// Number of open stream endpoints owned by `address`.
    pub fn open_streams(&self, address: PeerAddress) -> usize {
        let hub = self.hub.lock().expect("lock poisoned");
        hub.pipes.values().filter(|p| p.owner == address).count()
    }
}

/// [`Transport`] endpoint on a [`MemoryNetwork`].
pub struct MemoryTransport {
    hub: Arc<Mutex<Hub>>,
    local: PeerAddress,
}

impl MemoryTransport {
    pub fn address(&self) -> PeerAddress {
        self.local
    }
}

impl Transport for MemoryTransport {
    fn listen(&mut self, port: u16) -> Result<(), SocketError> {
        let mut hub = self.hub.lock().expect("lock poisoned");
        hub.listeners.insert(self.local, (port, VecDeque::new()));
        Ok(())
    }

    fn stop_listening(&mut self) {
        let mut hub = self.hub.lock().expect("lock poisoned");
        hub.listeners.remove(&self.local);
    }

    fn accept(&mut self) -> Result<Option<(SocketId, PeerAddress)>, SocketError> {
        let mut hub = self.hub.lock().expect("lock poisoned");
        Ok(hub
            .listeners
            .get_mut(&self.local)
            .and_then(|(_, queue)| queue.pop_front()))
    }

    fn connect(&mut self, addr: PeerAddress, port: u16) -> Result<SocketId, SocketError> {
        let mut hub = self.hub.lock().expect("lock poisoned");
        match hub.listeners.get(&addr) {
            Some((listening, _)) if *listening == port => {}
            _ => {
                return Err(SocketError::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "connection refused",
                )))
            }
        }
        let (near, far) = hub.link(self.local, addr);
        if let Some((_, queue)) = hub.listeners.get_mut(&addr) {
            queue.push_back((far, self.local));
        }
        Ok(near)
    }

    fn send(&mut self, socket: SocketId, bytes: &[u8]) -> Result<(), SocketError> {
        self.hub.lock().expect("lock poisoned").send(socket, bytes)
    }

    fn recv(&mut self, socket: SocketId, buf: &mut [u8]) -> Result<usize, SocketError> {
        self.hub.lock().expect("lock poisoned").recv(socket, buf)
    }

    fn shutdown_send(&mut self, socket: SocketId) {
        self.hub.lock().expect("lock poisoned").shutdown_send(socket);
    }

    fn close(&mut self, socket: SocketId) {
        self.hub.lock().expect("lock poisoned").close(socket);
    }

    fn poll_readable(&mut self) -> Vec<SocketId> {
        let hub = self.hub.lock().expect("lock poisoned");
        let mut ready: Vec<SocketId> = hub
            .pipes
            .iter()
            .filter(|(_, p)| p.owner == self.local && (!p.inbox.is_empty() || p.eof))
            .map(|(id, _)| *id)
            .collect();
        ready.sort();
        ready
    }

    fn open_discovery(&mut self, _port: u16) -> Result<(), SocketError> {
        let mut hub = self.hub.lock().expect("lock poisoned");
        hub.datagram_inboxes.entry(self.local).or_default();
        Ok(())
    }

    fn send_datagram(&mut self, to: Option<PeerAddress>, bytes: &[u8]) -> Result<(), SocketError> {
        let mut hub = self.hub.lock().expect("lock poisoned");
        if !hub.datagram_inboxes.contains_key(&self.local) {
            return Err(SocketError::Closed);
        }
        let from = self.local;
        match to {
            Some(addr) => {
                // Datagrams to nobody vanish, as on a real network.
                if let Some(inbox) = hub.datagram_inboxes.get_mut(&addr) {
                    inbox.push_back((bytes.to_vec(), from));
                }
            }
            None => {
                for (addr, inbox) in hub.datagram_inboxes.iter_mut() {
                    if *addr != from {
                        inbox.push_back((bytes.to_vec(), from));
                    }
                }
            }
        }
        Ok(())
    }

    fn recv_datagram(&mut self, buf: &mut [u8]) -> Result<Option<(usize, PeerAddress)>, SocketError> {
        let mut hub = self.hub.lock().expect("lock poisoned");
        let Some(inbox) = hub.datagram_inboxes.get_mut(&self.local) else {
            return Ok(None);
        };
        Ok(inbox.pop_front().map(|(bytes, from)| {
            let n = bytes.len().min(buf.len());
            buf[..n].copy_from_slice(&bytes[..n]);
            (n, from)
        }))
    }
}

/// Scripted stream endpoint speaking raw frames.
pub struct RawPeer {
    transport: MemoryTransport,
    socket: SocketId,
    buffer: FrameBuffer,
    closed: bool,
}

impl RawPeer {
    /// Encodes and sends `packet`.
    pub fn send_packet(&mut self, packet: &Packet) {
        let frame = encode_packet(packet).expect("test packet must encode");
        self.send_bytes(&frame);
    }

    /// Sends arbitrary bytes, framed or not.
    pub fn send_bytes(&mut self, bytes: &[u8]) {
        self.transport
            .send(self.socket, bytes)
            .expect("raw peer send failed");
    }

    /// Drains everything received so far and decodes it.  Undecodable frames
    /// are skipped.
    pub fn received(&mut self) -> Vec<Packet> {
        let mut out = Vec::new();
        while self.buffer.spare() > 0 {
            match self
                .transport
                .recv(self.socket, self.buffer.spare_capacity_mut())
            {
                Ok(n) => self.buffer.commit(n),
                Err(SocketError::Closed) => {
                    self.closed = true;
                    break;
                }
                Err(_) => break,
            }
            while let Ok(Some(frame)) = self.buffer.next_frame() {
                if let Ok((packet, _)) = decode_packet(&frame) {
                    out.push(packet);
                }
            }
            self.buffer.compact();
        }
        out
    }

    /// `true` once the other side has shut down its send direction and every
    /// byte has been read.
    pub fn is_closed(&mut self) -> bool {
        if !self.closed {
            let _ = self.received();
        }
        self.closed
    }

    /// Shuts down this end's send direction.
    pub fn hang_up(&mut self) {
        self.transport.shutdown_send(self.socket);
    }
}
