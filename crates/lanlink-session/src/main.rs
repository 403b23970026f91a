//! `lanlink` command-line entry point.
//!
//! Hosts a session, joins one, or lists the servers visible on the LAN.
//!
//! # Usage
//!
//! ```text
//! lanlink [--config <PATH>] [--name <NAME>] [--password <PW>] [--port <PORT>] <COMMAND>
//!
//! Commands:
//!   host                          Host a session until Ctrl-C
//!   join <ADDR> [--send <FILE>]   Join the host at ADDR, optionally sending it a file
//!   servers [--seconds N] [--filter BITS]
//!                                 Run discovery for N seconds and print the server list
//! ```
//!
//! The session is driven from a single-threaded Tokio runtime: a 16 ms
//! interval calls [`Session::service`] until Ctrl-C, the session ends, or the
//! command's own work is done.  Bookmarks are saved on the way out.

use std::cell::Cell;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use lanlink_core::protocol::{AppMessage, ServerDescription, HOST_SLOT};
use lanlink_core::{PeerAddress, ServerFilter};
use lanlink_session::application::{JoinOutcome, NetworkEvent, SessionListener};
use lanlink_session::infrastructure::clock::SystemClock;
use lanlink_session::infrastructure::network::socket::StdTransport;
use lanlink_session::infrastructure::storage::config::{default_config_path, load_config};
use lanlink_session::infrastructure::storage::files::FsFileStore;
use lanlink_session::Session;

/// Period of the service tick.
const SERVICE_PERIOD: Duration = Duration::from_millis(16);

// ── CLI definition ────────────────────────────────────────────────────────────

#[derive(Debug, Parser)]
#[command(name = "lanlink", version, about = "Peer-hosted LAN sessions")]
struct Cli {
    /// Configuration file.  Defaults to the platform config directory.
    #[arg(long, global = true, env = "LANLINK_CONFIG")]
    config: Option<PathBuf>,

    /// Display name shown to other members.
    #[arg(long, global = true, env = "LANLINK_NAME")]
    name: Option<String>,

    /// Password.  `host`: the password members must send.  `join`: the
    /// password to send to the host.
    #[arg(long, global = true, env = "LANLINK_PASSWORD")]
    password: Option<String>,

    /// Session (TCP) port.
    #[arg(long, global = true)]
    port: Option<u16>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Host a session until Ctrl-C.
    Host,
    /// Join the host at ADDR.
    Join {
        address: PeerAddress,
        /// File to send to the host once admitted.
        #[arg(long)]
        send: Option<PathBuf>,
    },
    /// Print the servers visible on the LAN.
    Servers {
        /// How long to listen for announcements.
        #[arg(long, default_value_t = 3)]
        seconds: u64,
        /// Server-list filter bits (1 free-for-all, 2 cooperative,
        /// 4 roleplay, 8 bookmarked only, 16 inverse).
        #[arg(long, default_value_t = 0)]
        filter: u8,
    },
}

// ── Listener ──────────────────────────────────────────────────────────────────

/// State shared between the listener and the driving loop.
#[derive(Debug, Default)]
struct Status {
    admitted: Cell<bool>,
    finished: Cell<bool>,
    transfer: Cell<Option<u32>>,
}

/// Logs every notification and updates [`Status`].
struct LoggingListener {
    status: Rc<Status>,
}

impl SessionListener for LoggingListener {
    fn on_network_event(&mut self, event: &NetworkEvent) {
        match event {
            NetworkEvent::ClientJoined { slot, name } => info!("{name} joined (slot {slot})"),
            NetworkEvent::ClientLeft { slot, name, reason } => {
                info!("{name} left (slot {slot}): {reason}")
            }
            NetworkEvent::ConnectionLost { slot } => warn!("connection to slot {slot} lost"),
            NetworkEvent::JoinRejected { address, reason } => {
                info!("refused {address}: {reason}")
            }
            NetworkEvent::JoinPending { slot, name } => info!("{name} waits for admission (slot {slot})"),
            NetworkEvent::Disallowed { reason } => {
                warn!("join refused: {reason}");
                self.status.finished.set(true);
            }
            NetworkEvent::Disconnected { reason } => {
                match reason {
                    Some(reason) => info!("disconnected: {reason}"),
                    None => warn!("connection to host lost"),
                }
                self.status.finished.set(true);
            }
            NetworkEvent::LoadingFinished { slot } => info!("slot {slot} is ready"),
            NetworkEvent::LagDetected { slot } => warn!("slot {slot} is lagging"),
            NetworkEvent::MalformedPacket { slot } => warn!("malformed packet from slot {slot}"),
            NetworkEvent::TransferStarted {
                alias, peer, incoming, ..
            } => {
                let direction = if *incoming { "from" } else { "to" };
                info!("transfer of {alias} {direction} slot {peer} started");
            }
            NetworkEvent::TransferCompleted { id, alias, bytes, path } => {
                match path {
                    Some(path) => info!("received {alias} ({bytes} bytes) at {}", path.display()),
                    None => info!("sent {alias} ({bytes} bytes)"),
                }
                if self.status.transfer.get() == Some(*id) {
                    self.status.finished.set(true);
                }
            }
            NetworkEvent::TransferFailed { id, alias, reason } => {
                warn!("transfer of {alias} failed: {reason}");
                if self.status.transfer.get() == Some(*id) {
                    self.status.finished.set(true);
                }
            }
        }
    }

    fn on_app_message(&mut self, message: &AppMessage) {
        info!(
            "message from slot {} ({} bytes): {}",
            message.from,
            message.body.len(),
            String::from_utf8_lossy(&message.body)
        );
    }

    fn on_join_response(&mut self, outcome: &JoinOutcome) {
        if let JoinOutcome::Accepted { id, members } = outcome {
            info!("admitted as slot {id}; {} member(s) present", members.len());
            self.status.admitted.set(true);
        }
    }

    fn on_server_list_changed(&mut self) {
        debug!("server list changed");
    }

    fn on_server_broadcast(&mut self, from: PeerAddress, server: &ServerDescription) {
        debug!("announcement from {from}: \"{}\"", server.name);
    }
}

// ── Driving loop ──────────────────────────────────────────────────────────────

/// Services `session` every [`SERVICE_PERIOD`] until Ctrl-C, until the
/// listener reports the session finished, or until `limit` passes.  `each`
/// runs after every tick.
async fn drive(
    session: &Session,
    status: &Status,
    limit: Option<Duration>,
    mut each: impl FnMut(&Session) -> anyhow::Result<()>,
) -> anyhow::Result<()> {
    let mut interval = tokio::time::interval(SERVICE_PERIOD);
    let deadline = limit.map(|d| tokio::time::Instant::now() + d);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("shutdown signal received");
                return Ok(());
            }
            _ = interval.tick() => {
                session.service();
                each(session)?;
                if status.finished.get() {
                    return Ok(());
                }
                if deadline.is_some_and(|d| tokio::time::Instant::now() >= d) {
                    return Ok(());
                }
            }
        }
    }
}

fn print_servers(session: &Session, filter: ServerFilter) -> anyhow::Result<()> {
    let servers = session.server_list(filter)?;
    if servers.is_empty() {
        println!("no servers found");
        return Ok(());
    }
    for server in servers {
        let rtt = server
            .rtt
            .map(|d| format!("{} ms", d.as_millis()))
            .unwrap_or_else(|| "-".to_string());
        let pin = if server.is_pinned() { "*" } else { " " };
        println!(
            "{pin} {:<15} {:>5}  {:<24} {}/{}  {:?}  {rtt}",
            server.address.to_string(),
            server.session_port,
            server.name,
            server.player_count,
            server.max_players,
            server.server_type,
        );
    }
    Ok(())
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .clone()
        .or_else(default_config_path)
        .unwrap_or_else(|| PathBuf::from("lanlink.toml"));
    let mut config = load_config(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    if let Some(name) = cli.name {
        config.player.name = name;
    }
    if let Some(password) = cli.password {
        match cli.command {
            Command::Join { .. } => config.player.join_password = Some(password),
            _ => config.server.password = Some(password),
        }
    }
    if let Some(port) = cli.port {
        config.network.session_port = port;
    }

    // `RUST_LOG` wins over the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.storage.log_level)),
        )
        .init();
    info!("using config {}", config_path.display());

    let transport = StdTransport::new(config.network.bind_address, config.network.connect_timeout());
    let status = Rc::new(Status::default());
    let session = Session::new(
        config,
        Box::new(transport),
        Box::new(SystemClock::new()),
        Box::new(FsFileStore),
    )
    .context("failed to create session")?
    .with_listener(LoggingListener {
        status: status.clone(),
    });

    match cli.command {
        Command::Host => {
            session.host().context("failed to start hosting")?;
            info!("hosting; press Ctrl-C to stop");
            drive(&session, &status, None, |_| Ok(())).await?;
        }
        Command::Join { address, send } => {
            session
                .join(address, None)
                .with_context(|| format!("failed to join {address}"))?;
            let mut pending = send;
            let mut loaded = false;
            drive(&session, &status, None, |session| {
                if !status.admitted.get() {
                    return Ok(());
                }
                if !loaded {
                    session.finish_loading()?;
                    loaded = true;
                }
                if let Some(path) = pending.take() {
                    let id = session
                        .send_file(HOST_SLOT, &path, None)
                        .with_context(|| format!("failed to send {}", path.display()))?;
                    status.transfer.set(Some(id));
                }
                Ok(())
            })
            .await?;
        }
        Command::Servers { seconds, filter } => {
            session.refresh_servers().context("discovery unavailable")?;
            drive(&session, &status, Some(Duration::from_secs(seconds)), |_| Ok(())).await?;
            print_servers(&session, ServerFilter(filter))?;
        }
    }

    session.shutdown().context("shutdown failed")?;
    info!("lanlink stopped");
    Ok(())
}
