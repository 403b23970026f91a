//! Stop-and-wait file transfer between two members.
//!
//! # Exchange
//!
//! ```text
//! sender                                   receiver
//!   │ ── XFER_INFO start {id, alias, size} ──► │  opens <download_dir>/<alias>.RECV
//!   │ ◄─────────── XFER_INFO ack ───────────── │
//!   │ ── XFER_DATA {id, ≤ 2048 bytes} ───────► │  appends
//!   │ ◄─────────── XFER_INFO ack ───────────── │
//!   │                  ...                     │
//!   │ ── XFER_INFO end ──────────────────────► │  renames to <alias> if the
//!   │                                          │  byte count matches the size
//! ```
//!
//! Either side may send XFER_INFO abort at any time.  Transfers are
//! point-to-point: the host may send to any admitted member, a member may
//! send to the host.
//!
//! Transfer ids carry the sender's slot id in their low byte, so a receiver
//! keys its sessions by id alone and can check that a START really comes from
//! the member the id claims.
//!
//! A transfer that does not finish (abort, connection loss, size mismatch)
//! leaves its `.RECV` file behind and never produces the final name.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use lanlink_core::protocol::{TransferIdAllocator, XferData, XferInfo, XFER_CHUNK_SIZE};
use lanlink_core::Packet;
use tracing::{debug, info, warn};

use super::core::SessionCore;
use super::events::NetworkEvent;
use super::registry::Peer;
use super::SessionError;

/// Suffix of an incoming file until it completes.
pub const TEMP_SUFFIX: &str = ".RECV";

const MAX_ALIAS_LEN: usize = 255;

/// `true` if `alias` names a plain file inside the download directory.
pub fn is_safe_alias(alias: &str) -> bool {
    !alias.is_empty()
        && alias.len() <= MAX_ALIAS_LEN
        && alias != "."
        && !alias.contains("..")
        && !alias.contains(['/', '\\', ':', '\0'])
}

/// Which end of the transfer this process is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XferRole {
    Sending,
    Receiving,
}

enum XferStream {
    Source(Box<dyn Read>),
    Sink(Box<dyn Write>),
}

impl std::fmt::Debug for XferStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            XferStream::Source(_) => f.write_str("Source"),
            XferStream::Sink(_) => f.write_str("Sink"),
        }
    }
}

#[derive(Debug)]
struct XferSession {
    alias: String,
    /// Member id of the other end.
    peer: u8,
    role: XferRole,
    total: u64,
    done: u64,
    stream: XferStream,
    /// Receiving side: `(temporary, final)` locations.
    paths: Option<(PathBuf, PathBuf)>,
}

/// Progress snapshot of one transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferStatus {
    pub id: u32,
    pub alias: String,
    pub peer: u8,
    pub role: XferRole,
    pub total: u64,
    pub done: u64,
}

/// Active transfers keyed by transfer id.
#[derive(Debug, Default)]
pub struct TransferTable {
    sessions: HashMap<u32, XferSession>,
}

impl TransferTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Snapshots of every active transfer, ordered by id.
    pub fn statuses(&self) -> Vec<TransferStatus> {
        let mut out: Vec<TransferStatus> = self
            .sessions
            .iter()
            .map(|(id, s)| TransferStatus {
                id: *id,
                alias: s.alias.clone(),
                peer: s.peer,
                role: s.role,
                total: s.total,
                done: s.done,
            })
            .collect();
        out.sort_by_key(|s| s.id);
        out
    }

    fn ids_with(&self, peer: u8) -> Vec<u32> {
        let mut ids: Vec<u32> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.peer == peer)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }
}

impl SessionCore {
    // ── Sending ──────────────────────────────────────────────────────────────

    /// Starts sending the file at `path` to member `to` under `alias` (the
    /// file name when `None`).  Returns the transfer id.
    pub(crate) fn start_send(
        &mut self,
        to: u8,
        path: &Path,
        alias: Option<String>,
    ) -> Result<u32, SessionError> {
        let own = self.own_id().ok_or(SessionError::NotConnected)?;
        let peer = self
            .peer_for_id(to)
            .filter(|p| self.is_admitted(*p))
            .ok_or(SessionError::UnknownSlot(to))?;

        let alias = alias
            .or_else(|| path.file_name().map(|n| n.to_string_lossy().into_owned()))
            .unwrap_or_default();
        if !is_safe_alias(&alias) {
            return Err(SessionError::InvalidAlias(alias));
        }

        let (source, len) = self.files.open_read(path).map_err(|source| SessionError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let total_size = u32::try_from(len).map_err(|_| SessionError::FileTooLarge {
            path: path.to_path_buf(),
            len,
        })?;

        let id = self.transfer_ids.next(own);
        self.send_to(
            peer,
            &Packet::XferInfo(XferInfo::Start {
                id,
                alias: alias.clone(),
                total_size,
            }),
        );
        self.transfers.sessions.insert(
            id,
            XferSession {
                alias: alias.clone(),
                peer: to,
                role: XferRole::Sending,
                total: len,
                done: 0,
                stream: XferStream::Source(source),
                paths: None,
            },
        );
        info!("sending {} ({len} bytes) to slot {to} as transfer {id:#x}", path.display());
        self.event(NetworkEvent::TransferStarted {
            id,
            alias,
            peer: to,
            incoming: false,
        });
        Ok(id)
    }

    /// Sends the next chunk, or END once the source is exhausted.
    fn send_next_chunk(&mut self, peer: Peer, id: u32) {
        let mut chunk = vec![0u8; XFER_CHUNK_SIZE];
        let read = match self.transfers.sessions.get_mut(&id) {
            Some(XferSession {
                stream: XferStream::Source(source),
                ..
            }) => source.read(&mut chunk),
            _ => return,
        };

        match read {
            Ok(0) => {
                self.send_to(peer, &Packet::XferInfo(XferInfo::End { id }));
                if let Some(session) = self.transfers.sessions.remove(&id) {
                    info!("transfer {id:#x} ({}) sent, {} bytes", session.alias, session.done);
                    self.event(NetworkEvent::TransferCompleted {
                        id,
                        alias: session.alias,
                        bytes: session.done,
                        path: None,
                    });
                }
            }
            Ok(n) => {
                chunk.truncate(n);
                if let Some(session) = self.transfers.sessions.get_mut(&id) {
                    session.done += n as u64;
                }
                self.send_to(peer, &Packet::XferData(XferData { id, bytes: chunk }));
            }
            Err(e) => self.fail_transfer(id, format!("read failed: {e}"), Some(peer)),
        }
    }

    // ── Receiving ────────────────────────────────────────────────────────────

    pub(crate) fn handle_xfer_info(&mut self, peer: Peer, info: XferInfo) {
        if !self.is_admitted(peer) {
            debug!("transfer control from unadmitted {peer} dropped");
            return;
        }
        let id = info.id();
        if let XferInfo::Start { alias, total_size, .. } = info {
            self.accept_incoming(peer, id, alias, total_size);
            return;
        }
        let Some(session) = self.transfers.sessions.get(&id) else {
            debug!("transfer control for unknown id {id:#x} from {peer}");
            return;
        };
        if session.peer != self.peer_id(peer) {
            warn!("{peer} sent control for transfer {id:#x} it is not part of");
            return;
        }
        let role = session.role;

        match (info, role) {
            (XferInfo::Ack { .. }, XferRole::Sending) => self.send_next_chunk(peer, id),
            (XferInfo::End { .. }, XferRole::Receiving) => self.finish_incoming(id),
            (XferInfo::Abort { .. }, _) => {
                self.fail_transfer(id, "cancelled by peer".to_string(), None);
            }
            (other, role) => debug!("{other:?} ignored by {role:?} transfer {id:#x}"),
        }
    }

    fn accept_incoming(&mut self, peer: Peer, id: u32, alias: String, total_size: u32) {
        let from = self.peer_id(peer);
        let refuse = |core: &mut SessionCore, why: &str| {
            warn!("refusing transfer {id:#x} from {peer}: {why}");
            core.send_to(peer, &Packet::XferInfo(XferInfo::Abort { id }));
        };

        if TransferIdAllocator::owner_of(id) != from {
            refuse(self, "id belongs to another member");
            return;
        }
        if self.transfers.sessions.contains_key(&id) {
            refuse(self, "duplicate transfer id");
            self.fail_transfer(id, "duplicate transfer id".to_string(), None);
            return;
        }
        if !is_safe_alias(&alias) {
            refuse(self, "unsafe file name");
            return;
        }

        let dir = &self.config.storage.download_dir;
        let final_path = dir.join(&alias);
        let temp_path = dir.join(format!("{alias}{TEMP_SUFFIX}"));
        let sink = match self.files.create(&temp_path) {
            Ok(sink) => sink,
            Err(e) => {
                refuse(self, &format!("cannot create {}: {e}", temp_path.display()));
                self.event(NetworkEvent::TransferFailed {
                    id,
                    alias,
                    reason: e.to_string(),
                });
                return;
            }
        };

        self.transfers.sessions.insert(
            id,
            XferSession {
                alias: alias.clone(),
                peer: from,
                role: XferRole::Receiving,
                total: u64::from(total_size),
                done: 0,
                stream: XferStream::Sink(sink),
                paths: Some((temp_path, final_path)),
            },
        );
        self.send_to(peer, &Packet::XferInfo(XferInfo::Ack { id }));
        info!("receiving {alias} ({total_size} bytes) from {peer} as transfer {id:#x}");
        self.event(NetworkEvent::TransferStarted {
            id,
            alias,
            peer: from,
            incoming: true,
        });
    }

    pub(crate) fn handle_xfer_data(&mut self, peer: Peer, data: XferData) {
        if !self.is_admitted(peer) {
            debug!("transfer data from unadmitted {peer} dropped");
            return;
        }
        let id = data.id;
        let from = self.peer_id(peer);
        let written = match self.transfers.sessions.get_mut(&id) {
            Some(session) if session.peer == from => {
                let len = data.bytes.len() as u64;
                if session.done + len > session.total {
                    Err(format!(
                        "{} bytes past the announced {}",
                        session.done + len - session.total,
                        session.total
                    ))
                } else if let XferStream::Sink(sink) = &mut session.stream {
                    match sink.write_all(&data.bytes) {
                        Ok(()) => {
                            session.done += len;
                            Ok(())
                        }
                        Err(e) => Err(format!("write failed: {e}")),
                    }
                } else {
                    debug!("data for outgoing transfer {id:#x} ignored");
                    return;
                }
            }
            _ => {
                debug!("data for unknown transfer {id:#x} from {peer}");
                return;
            }
        };

        match written {
            Ok(()) => {
                self.send_to(peer, &Packet::XferInfo(XferInfo::Ack { id }));
            }
            Err(reason) => self.fail_transfer(id, reason, Some(peer)),
        }
    }

    fn finish_incoming(&mut self, id: u32) {
        let Some(session) = self.transfers.sessions.remove(&id) else {
            return;
        };
        let XferSession {
            alias,
            total,
            done,
            paths,
            mut stream,
            ..
        } = session;
        let flushed = match &mut stream {
            XferStream::Sink(sink) => sink.flush(),
            XferStream::Source(_) => Ok(()),
        };
        // The temp file must be closed before it is renamed.
        drop(stream);

        let outcome = match (flushed, paths) {
            (Err(e), _) => Err(format!("flush failed: {e}")),
            (Ok(()), _) if done != total => Err(format!("received {done} of {total} bytes")),
            (Ok(()), Some((temp, final_path))) => self
                .files
                .rename(&temp, &final_path)
                .map(|()| final_path)
                .map_err(|e| format!("rename failed: {e}")),
            (Ok(()), None) => Err("no destination".to_string()),
        };

        match outcome {
            Ok(path) => {
                info!("transfer {id:#x} ({alias}) complete at {}", path.display());
                self.event(NetworkEvent::TransferCompleted {
                    id,
                    alias,
                    bytes: done,
                    path: Some(path),
                });
            }
            Err(reason) => {
                warn!("transfer {id:#x} ({alias}) failed: {reason}");
                self.event(NetworkEvent::TransferFailed { id, alias, reason });
            }
        }
    }

    // ── Cancellation ─────────────────────────────────────────────────────────

    /// Drops transfer `id` and reports it failed.  With `notify` the other end
    /// gets an abort.
    fn fail_transfer(&mut self, id: u32, reason: String, notify: Option<Peer>) {
        let Some(session) = self.transfers.sessions.remove(&id) else {
            return;
        };
        if let Some(peer) = notify {
            self.send_to(peer, &Packet::XferInfo(XferInfo::Abort { id }));
        }
        warn!("transfer {id:#x} ({}) failed: {reason}", session.alias);
        self.event(NetworkEvent::TransferFailed {
            id,
            alias: session.alias,
            reason,
        });
    }

    /// Cancels transfer `id` on request of the application.
    pub(crate) fn cancel_transfer(&mut self, id: u32) -> Result<(), SessionError> {
        let peer_id = self
            .transfers
            .sessions
            .get(&id)
            .map(|s| s.peer)
            .ok_or(SessionError::UnknownTransfer(id))?;
        let peer = self.peer_for_id(peer_id);
        self.fail_transfer(id, "cancelled".to_string(), peer);
        Ok(())
    }

    /// Drops every transfer with member `peer` without contacting it.
    pub(crate) fn cancel_transfers_with(&mut self, peer: u8, reason: &str) {
        for id in self.transfers.ids_with(peer) {
            self.fail_transfer(id, reason.to_string(), None);
        }
    }

    /// Drops every transfer without contacting anyone.
    pub(crate) fn cancel_all_transfers(&mut self, reason: &str) {
        let mut ids: Vec<u32> = self.transfers.sessions.keys().copied().collect();
        ids.sort_unstable();
        for id in ids {
            self.fail_transfer(id, reason.to_string(), None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_file_names_are_safe() {
        assert!(is_safe_alias("map.dat"));
        assert!(is_safe_alias("save game 2.bin"));
    }

    #[test]
    fn test_path_like_aliases_are_rejected() {
        for alias in ["", ".", "..", "../etc/passwd", "a/b", "a\\b", "C:evil", "nul\0"] {
            assert!(!is_safe_alias(alias), "{alias:?} should be rejected");
        }
    }

    #[test]
    fn test_overlong_alias_is_rejected() {
        assert!(!is_safe_alias(&"x".repeat(MAX_ALIAS_LEN + 1)));
    }

    #[test]
    fn test_empty_table_has_no_statuses() {
        let table = TransferTable::new();
        assert!(table.is_empty());
        assert!(table.statuses().is_empty());
    }
}
