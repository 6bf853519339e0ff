//! # parley-server
//!
//! Chat server for the Parley network.
//!
//! This binary provides:
//! - **Session management** over plain TCP with newline-delimited JSON
//!   framing (tolerant of concatenated frames)
//! - **Channel store** backed by a single JSON document with atomic
//!   whole-file persistence
//! - **Presence tracking** with per-channel online/offline sets and
//!   guest filtering
//! - **Livestream rendezvous** notices, persisted and broadcast to
//!   channel participants
//! - **Legacy peer tracker** for older stream-discovery clients

mod config;
mod connection;
mod registry;
mod router;
mod tracker;

use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use parley_store::{ChannelStore, UserStore};

use crate::config::ServerConfig;
use crate::registry::Registry;
use crate::router::Router;
use crate::tracker::Tracker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,parley_server=debug")),
        )
        .init();

    info!("Starting Parley server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Open the stores
    // -----------------------------------------------------------------------
    let users = Arc::new(UserStore::open(config.users_path()).await);
    let channels = Arc::new(ChannelStore::open(config.channels_path()).await);

    // Stale `online` entries from an unclean shutdown must not survive
    // a restart.
    users.mark_all_offline().await?;

    let router = Arc::new(Router {
        registry: Arc::new(Registry::new()),
        channels,
        users,
        tracker: Arc::new(Tracker::new()),
    });

    // -----------------------------------------------------------------------
    // 4. Accept connections until shutdown
    // -----------------------------------------------------------------------
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening for clients");

    tokio::select! {
        result = accept_loop(listener, router) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}

async fn accept_loop(
    listener: tokio::net::TcpListener,
    router: Arc<Router>,
) -> anyhow::Result<()> {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                tokio::spawn(connection::serve(stream, peer, router.clone()));
            }
            Err(e) => {
                // Transient accept failures (EMFILE and friends) should
                // not take the server down.
                warn!(error = %e, "accept failed");
            }
        }
    }
}
