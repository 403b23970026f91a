//! Server bookmarks: discovered and user-pinned servers.
//!
//! # Lifecycle
//!
//! ```text
//! discovery packet ──► created / refreshed (last_seen = now)
//!                            │
//!          sweep: now - last_seen > 10 s ──► purged
//!
//! add_bookmark ──► pinned (last_seen = Pinned) ──► kept until removed
//! ```
//!
//! Entries are keyed by the packed IPv4 address.  Two servers behind the same
//! address share one entry; the most recent announcement wins.
//!
//! # Bookmark file
//!
//! Pinned entries persist as plain text, one dotted-quad address per line.
//! Lines starting with `#` or `//` are comments.

use std::collections::HashMap;
use std::time::Duration;

use tracing::{debug, warn};

use super::address::PeerAddress;
use super::time::Millis;
use crate::protocol::messages::{ServerDescription, ServerOptions, ServerType};

/// Age after which an unpinned bookmark is purged.
pub const BOOKMARK_STALE_AFTER: Duration = Duration::from_millis(10_000);

/// When a bookmark was last refreshed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LastSeen {
    /// Refreshed by a discovery packet at this time.
    At(Millis),
    /// Saved by the user; never expires.
    Pinned,
}

/// A remembered or discovered server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerBookmark {
    pub address: PeerAddress,
    pub name: String,
    pub description: String,
    pub server_type: ServerType,
    pub min_level: u8,
    pub max_level: u8,
    pub max_players: u8,
    pub player_count: u8,
    pub options: ServerOptions,
    pub session_port: u16,
    pub last_seen: LastSeen,
    /// Latest round-trip estimate from the discovery-channel alive ping.
    pub rtt: Option<Duration>,
}

impl ServerBookmark {
    /// An entry with no metadata yet; the name defaults to the address.
    pub fn placeholder(address: PeerAddress, last_seen: LastSeen) -> Self {
        let mut options = ServerOptions::default();
        options.set(ServerOptions::BOOKMARKED, last_seen == LastSeen::Pinned);
        Self {
            address,
            name: address.to_string(),
            description: String::new(),
            server_type: ServerType::default(),
            min_level: 0,
            max_level: 0,
            max_players: 0,
            player_count: 0,
            options,
            session_port: 0,
            last_seen,
            rtt: None,
        }
    }

    pub fn is_pinned(&self) -> bool {
        self.last_seen == LastSeen::Pinned
    }

    fn apply(&mut self, desc: &ServerDescription) {
        self.name = desc.name.clone();
        self.description = desc.description.clone();
        self.server_type = desc.server_type;
        self.min_level = desc.min_level;
        self.max_level = desc.max_level;
        self.max_players = desc.max_players;
        self.player_count = desc.player_count;
        self.session_port = desc.session_port;
        let pinned = self.is_pinned();
        self.options = desc.options;
        self.options.set(ServerOptions::BOOKMARKED, pinned);
    }
}

// ── Server list filter ────────────────────────────────────────────────────────

/// Bitmask selecting which bookmarks appear in the visible server list.
///
/// Two criteria can be enabled:
/// - **type**: at least one of the three type bits is set; an entry passes if
///   its server type's bit is set.
/// - **bookmarked**: `BOOKMARKED_ONLY` is set; an entry passes if pinned.
///
/// With no criterion enabled every entry is listed.  Otherwise an entry is
/// listed unless every enabled criterion excludes it.  `INVERSE` negates the
/// final decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ServerFilter(pub u8);

impl ServerFilter {
    pub const FREE_FOR_ALL: u8 = 1 << 0;
    pub const COOPERATIVE: u8 = 1 << 1;
    pub const ROLEPLAY: u8 = 1 << 2;
    pub const BOOKMARKED_ONLY: u8 = 1 << 3;
    pub const INVERSE: u8 = 1 << 4;

    const TYPE_BITS: u8 = Self::FREE_FOR_ALL | Self::COOPERATIVE | Self::ROLEPLAY;

    fn type_bit(server_type: ServerType) -> u8 {
        match server_type {
            ServerType::FreeForAll => Self::FREE_FOR_ALL,
            ServerType::Cooperative => Self::COOPERATIVE,
            ServerType::Roleplay => Self::ROLEPLAY,
        }
    }

    /// Decides whether `entry` is listed.
    pub fn includes(&self, entry: &ServerBookmark) -> bool {
        let mut enabled = 0;
        let mut passed = 0;

        if self.0 & Self::TYPE_BITS != 0 {
            enabled += 1;
            if self.0 & Self::type_bit(entry.server_type) != 0 {
                passed += 1;
            }
        }
        if self.0 & Self::BOOKMARKED_ONLY != 0 {
            enabled += 1;
            if entry.is_pinned() {
                passed += 1;
            }
        }

        let included = enabled == 0 || passed > 0;
        included != (self.0 & Self::INVERSE != 0)
    }
}

// ── Store ─────────────────────────────────────────────────────────────────────

/// All known servers, keyed by packed address.
#[derive(Debug, Clone, Default)]
pub struct BookmarkStore {
    entries: HashMap<u32, ServerBookmark>,
    dirty: bool,
}

impl BookmarkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses the bookmark file.  Every listed address becomes a pinned
    /// entry; unparseable lines are logged and skipped.
    pub fn parse(text: &str) -> Self {
        let mut store = Self::new();
        for (line_no, line) in text.lines().enumerate() {
            if is_comment_or_blank(line) {
                continue;
            }
            match line.parse::<PeerAddress>() {
                Ok(addr) => {
                    store
                        .entries
                        .insert(addr.packed(), ServerBookmark::placeholder(addr, LastSeen::Pinned));
                }
                Err(e) => warn!("bookmark file line {}: {e}", line_no + 1),
            }
        }
        store
    }

    /// Serialises the pinned entries, sorted by address.
    pub fn to_text(&self) -> String {
        let mut pinned: Vec<PeerAddress> = self
            .entries
            .values()
            .filter(|b| b.is_pinned())
            .map(|b| b.address)
            .collect();
        pinned.sort();

        let mut out = String::from("# bookmarked servers, one address per line\n");
        for addr in pinned {
            out.push_str(&addr.to_string());
            out.push('\n');
        }
        out
    }

    /// Creates or refreshes the entry for `addr` from a discovery packet.
    ///
    /// Returns `true` if the entry did not exist before.
    pub fn record_discovery(&mut self, addr: PeerAddress, desc: &ServerDescription, now: Millis) -> bool {
        let mut created = false;
        let entry = self.entries.entry(addr.packed()).or_insert_with(|| {
            created = true;
            ServerBookmark::placeholder(addr, LastSeen::At(now))
        });
        // Colliding servers behind one address overwrite each other.
        entry.address = addr;
        entry.apply(desc);
        if !entry.is_pinned() {
            entry.last_seen = LastSeen::At(now);
        }
        created
    }

    /// Pins `addr`, creating a placeholder if it is unknown.
    pub fn add_bookmark(&mut self, addr: PeerAddress) {
        let entry = self
            .entries
            .entry(addr.packed())
            .or_insert_with(|| ServerBookmark::placeholder(addr, LastSeen::Pinned));
        if !entry.is_pinned() {
            entry.last_seen = LastSeen::Pinned;
        }
        entry.options.set(ServerOptions::BOOKMARKED, true);
        self.dirty = true;
    }

    /// Removes `addr` regardless of its pinned state.
    pub fn remove(&mut self, addr: PeerAddress) -> Option<ServerBookmark> {
        let removed = self.entries.remove(&addr.packed());
        if removed.as_ref().is_some_and(ServerBookmark::is_pinned) {
            self.dirty = true;
        }
        removed
    }

    /// Purges unpinned entries older than [`BOOKMARK_STALE_AFTER`] and
    /// returns their addresses.
    pub fn sweep(&mut self, now: Millis) -> Vec<PeerAddress> {
        let mut purged = Vec::new();
        self.entries.retain(|_, entry| match entry.last_seen {
            LastSeen::Pinned => true,
            LastSeen::At(seen) => {
                let keep = now.saturating_since(seen) <= BOOKMARK_STALE_AFTER;
                if !keep {
                    debug!("bookmark {} went stale", entry.address);
                    purged.push(entry.address);
                }
                keep
            }
        });
        purged
    }

    /// Stores a round-trip estimate; returns `false` for unknown addresses.
    pub fn record_rtt(&mut self, addr: PeerAddress, rtt: Duration) -> bool {
        match self.entries.get_mut(&addr.packed()) {
            Some(entry) => {
                entry.rtt = Some(rtt);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, addr: PeerAddress) -> Option<&ServerBookmark> {
        self.entries.get(&addr.packed())
    }

    pub fn addresses(&self) -> Vec<PeerAddress> {
        let mut out: Vec<PeerAddress> = self.entries.values().map(|b| b.address).collect();
        out.sort();
        out
    }

    /// The visible server list: entries accepted by `filter`, sorted by
    /// address.
    pub fn filtered(&self, filter: ServerFilter) -> Vec<ServerBookmark> {
        let mut out: Vec<ServerBookmark> = self
            .entries
            .values()
            .filter(|b| filter.includes(b))
            .cloned()
            .collect();
        out.sort_by_key(|b| b.address);
        out
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `true` if the pinned set changed since load or the last
    /// [`mark_clean`](Self::mark_clean).
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }
}

/// Shared line filter for the bookmark and blacklist text formats.
pub(crate) fn is_comment_or_blank(line: &str) -> bool {
    let line = line.trim();
    line.is_empty() || line.starts_with('#') || line.starts_with("//")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(name: &str, server_type: ServerType) -> ServerDescription {
        ServerDescription {
            name: name.to_string(),
            server_type,
            max_players: 8,
            player_count: 2,
            session_port: 28800,
            ..ServerDescription::default()
        }
    }

    const A: PeerAddress = PeerAddress::new(192, 168, 1, 10);
    const B: PeerAddress = PeerAddress::new(192, 168, 1, 11);

    // ── Discovery and sweep ──────────────────────────────────────────────────

    #[test]
    fn test_record_discovery_creates_then_refreshes() {
        let mut store = BookmarkStore::new();
        assert!(store.record_discovery(A, &desc("one", ServerType::FreeForAll), Millis(0)));
        assert!(!store.record_discovery(A, &desc("renamed", ServerType::FreeForAll), Millis(100)));
        let entry = store.get(A).unwrap();
        assert_eq!(entry.name, "renamed");
        assert_eq!(entry.last_seen, LastSeen::At(Millis(100)));
    }

    #[test]
    fn test_sweep_purges_entries_older_than_ten_seconds() {
        // Arrange
        let mut store = BookmarkStore::new();
        store.record_discovery(A, &desc("old", ServerType::FreeForAll), Millis(1_000));
        store.record_discovery(B, &desc("fresh", ServerType::FreeForAll), Millis(5_000));

        // Act
        let purged = store.sweep(Millis(11_001));

        // Assert
        assert_eq!(purged, vec![A]);
        assert!(store.get(B).is_some());
    }

    #[test]
    fn test_sweep_keeps_entry_exactly_at_threshold() {
        let mut store = BookmarkStore::new();
        store.record_discovery(A, &desc("edge", ServerType::FreeForAll), Millis(0));
        assert!(store.sweep(Millis(10_000)).is_empty());
    }

    #[test]
    fn test_pinned_entries_survive_any_age() {
        let mut store = BookmarkStore::new();
        store.add_bookmark(A);
        store.record_discovery(A, &desc("pinned", ServerType::Cooperative), Millis(0));
        assert!(store.sweep(Millis(u64::MAX)).is_empty());
        assert!(store.get(A).unwrap().is_pinned());
    }

    #[test]
    fn test_discovery_keeps_bookmarked_option_on_pinned_entries() {
        let mut store = BookmarkStore::new();
        store.add_bookmark(A);
        store.record_discovery(A, &desc("x", ServerType::FreeForAll), Millis(5));
        assert!(store.get(A).unwrap().options.contains(ServerOptions::BOOKMARKED));
    }

    // ── Dirty tracking ───────────────────────────────────────────────────────

    #[test]
    fn test_discovery_does_not_mark_store_dirty() {
        let mut store = BookmarkStore::new();
        store.record_discovery(A, &desc("x", ServerType::FreeForAll), Millis(0));
        assert!(!store.is_dirty());
    }

    #[test]
    fn test_pin_and_unpin_mark_store_dirty() {
        let mut store = BookmarkStore::new();
        store.add_bookmark(A);
        assert!(store.is_dirty());
        store.mark_clean();
        store.remove(A);
        assert!(store.is_dirty());
    }

    // ── Text format ──────────────────────────────────────────────────────────

    #[test]
    fn test_text_round_trip_reproduces_pinned_set() {
        // Arrange
        let mut store = BookmarkStore::new();
        store.add_bookmark(B);
        store.add_bookmark(A);
        store.record_discovery(
            PeerAddress::new(10, 0, 0, 1),
            &desc("transient", ServerType::Roleplay),
            Millis(0),
        );

        // Act
        let reloaded = BookmarkStore::parse(&store.to_text());

        // Assert
        assert_eq!(reloaded.addresses(), vec![A, B]);
        assert!(reloaded.filtered(ServerFilter::default()).iter().all(|b| b.is_pinned()));
        assert!(!reloaded.is_dirty());
    }

    #[test]
    fn test_parse_skips_comments_and_garbage() {
        let text = "# saved\n// legacy comment\n192.168.1.10\nnot-an-address\n\n";
        let store = BookmarkStore::parse(text);
        assert_eq!(store.addresses(), vec![A]);
    }

    // ── Filter ───────────────────────────────────────────────────────────────

    fn filter_fixture() -> BookmarkStore {
        let mut store = BookmarkStore::new();
        store.record_discovery(A, &desc("ffa", ServerType::FreeForAll), Millis(0));
        store.record_discovery(B, &desc("coop", ServerType::Cooperative), Millis(0));
        store.add_bookmark(B);
        store.record_discovery(
            PeerAddress::new(192, 168, 1, 12),
            &desc("rp", ServerType::Roleplay),
            Millis(0),
        );
        store
    }

    fn names(list: Vec<ServerBookmark>) -> Vec<String> {
        list.into_iter().map(|b| b.name).collect()
    }

    #[test]
    fn test_empty_filter_lists_everything() {
        assert_eq!(filter_fixture().filtered(ServerFilter(0)).len(), 3);
    }

    #[test]
    fn test_type_filter_selects_matching_types() {
        let filter = ServerFilter(ServerFilter::FREE_FOR_ALL | ServerFilter::ROLEPLAY);
        assert_eq!(names(filter_fixture().filtered(filter)), vec!["ffa", "rp"]);
    }

    #[test]
    fn test_combined_criteria_include_entry_passing_either() {
        // Roleplay type or bookmarked: "coop" passes only by being pinned.
        let filter = ServerFilter(ServerFilter::ROLEPLAY | ServerFilter::BOOKMARKED_ONLY);
        assert_eq!(names(filter_fixture().filtered(filter)), vec!["coop", "rp"]);
    }

    #[test]
    fn test_inverse_negates_selection() {
        let filter = ServerFilter(ServerFilter::BOOKMARKED_ONLY | ServerFilter::INVERSE);
        assert_eq!(names(filter_fixture().filtered(filter)), vec!["ffa", "rp"]);
    }

    #[test]
    fn test_record_rtt_on_unknown_address_is_ignored() {
        let mut store = BookmarkStore::new();
        assert!(!store.record_rtt(A, Duration::from_millis(4)));
    }
}
