//! Legacy peer tracker.
//!
//! A flat, unauthenticated registry of `ip:port` pairs predating the
//! channel-scoped livestream announcements. Kept for older clients that
//! still discover stream peers through it. Purely in-memory; the list
//! does not survive a restart.

use std::net::Ipv4Addr;

use tokio::sync::Mutex;
use tracing::{info, warn};

use parley_shared::PeerInfo;

/// In-memory peer registry.
#[derive(Default)]
pub struct Tracker {
    peers: Mutex<Vec<PeerInfo>>,
}

impl Tracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a peer. The IP must be a literal IPv4 address; duplicate
    /// submissions are absorbed silently.
    pub async fn submit(&self, ip: &str, port: u16) -> Result<(), String> {
        if ip.parse::<Ipv4Addr>().is_err() {
            warn!(ip, "rejected peer submission with unparseable address");
            return Err("Invalid IP format".to_string());
        }

        let peer = PeerInfo {
            ip: ip.to_string(),
            port,
        };
        let mut peers = self.peers.lock().await;
        if !peers.contains(&peer) {
            info!(ip, port, "peer registered");
            peers.push(peer);
        }
        Ok(())
    }

    /// Current peer list, in submission order.
    pub async fn list(&self) -> Vec<PeerInfo> {
        self.peers.lock().await.clone()
    }
}
