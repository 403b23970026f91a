//! Pure domain types with no socket or file-system dependencies.
//!
//! - `time` – the monotonic [`Millis`](time::Millis) reading and the
//!   [`Clock`](time::Clock) collaborator trait.
//! - `address` – typed IPv4 peer address.
//! - `bookmark` – discovered and pinned servers, the server-list filter, and
//!   the bookmark text format.
//! - `blacklist` – banned-address list consulted during join negotiation.

pub mod address;
pub mod blacklist;
pub mod bookmark;
pub mod time;
