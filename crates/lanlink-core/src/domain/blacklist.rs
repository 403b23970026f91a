//! Banned-address list consulted before any other join check.
//!
//! Entries are kept as text so operators can list host names or addresses in
//! whatever form they were banned under.  Matching is exact but
//! case-insensitive: `"Host.LAN"` bans `"host.lan"`, while `"10.0.0.1"` does
//! not ban `"10.0.0.10"`.  The list is append-only.

use super::address::PeerAddress;
use super::bookmark::is_comment_or_blank;

/// Append-only list of banned addresses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Blacklist {
    entries: Vec<String>,
}

impl Blacklist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses the blacklist file format: one entry per line, `#` and `//`
    /// lines are comments.
    pub fn parse(text: &str) -> Self {
        let mut list = Self::new();
        for line in text.lines() {
            if is_comment_or_blank(line) {
                continue;
            }
            list.add(line.trim());
        }
        list
    }

    /// Serialises the list in the file format accepted by
    /// [`parse`](Self::parse).
    pub fn to_text(&self) -> String {
        let mut out = String::from("# banned addresses, one per line\n");
        for entry in &self.entries {
            out.push_str(entry);
            out.push('\n');
        }
        out
    }

    /// Appends `entry` unless an equal entry is already present.
    ///
    /// Returns `true` if the list grew.
    pub fn add(&mut self, entry: &str) -> bool {
        let entry = entry.trim();
        if entry.is_empty() || self.is_banned(entry) {
            return false;
        }
        self.entries.push(entry.to_string());
        true
    }

    /// Case-insensitive exact membership test.
    pub fn is_banned(&self, candidate: &str) -> bool {
        let candidate = candidate.trim();
        self.entries
            .iter()
            .any(|entry| entry.eq_ignore_ascii_case(candidate))
    }

    /// Membership test for a typed address.
    pub fn is_address_banned(&self, addr: PeerAddress) -> bool {
        self.is_banned(&addr.to_string())
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
