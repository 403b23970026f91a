//! Infrastructure layer: the OS-facing collaborators the session drives.
//!
//! - **`network`** – the [`Transport`](network::Transport) trait, the
//!   `std::net` implementation, and the in-memory test network.
//! - **`clock`**   – monotonic and hand-driven clocks.
//! - **`storage`** – buffered file access, the bookmark and blacklist files,
//!   and the TOML configuration.
//!
//! **Dependency rule**: the application layer talks to this layer only
//! through traits; nothing here decides protocol behaviour.

pub mod clock;
pub mod network;
pub mod storage;
