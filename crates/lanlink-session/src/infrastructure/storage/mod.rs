//! Storage infrastructure: everything the session reads from or writes to
//! disk.
//!
//! - **`files`**  – the [`FileStore`](files::FileStore) trait behind which
//!   transfer sources, `.RECV` temp files, and the list files are opened.
//! - **`lists`**  – loading and saving the bookmark and blacklist files.
//! - **`config`** – the TOML configuration file, with defaults for every
//!   field so a first run needs no file at all.

pub mod config;
pub mod files;
pub mod lists;
