//! The session/presence registry.
//!
//! Owns every piece of volatile shared state: connection-to-identity
//! bindings, per-user live status and role, per-channel presence sets,
//! and the outbound sender of each live connection. All of it sits behind
//! one mutex and is only reachable through the methods here — the raw
//! maps are never exposed.

use std::collections::{BTreeSet, HashMap};

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

use parley_net::encode_line;
use parley_shared::{Message, PresenceSnapshot, PushEvent, Role, UserStatus};

/// Identifier of one accepted connection.
pub type ConnId = Uuid;

/// Sender feeding a connection's dedicated writer task. Broadcast
/// fan-out only ever enqueues here, so a slow peer cannot stall the
/// caller.
pub type OutboundSender = mpsc::UnboundedSender<Vec<u8>>;

#[derive(Debug, Default)]
struct ChannelPresence {
    online: BTreeSet<String>,
    offline: BTreeSet<String>,
}

#[derive(Default)]
struct RegistryInner {
    /// Writer handles for every live connection, authenticated or not.
    outbound: HashMap<ConnId, OutboundSender>,
    /// Connection → authenticated username. Absence means the connection
    /// may only submit `auth` requests.
    sessions: HashMap<ConnId, String>,
    roles: HashMap<String, Role>,
    status: HashMap<String, UserStatus>,
    presence: HashMap<String, ChannelPresence>,
}

impl RegistryInner {
    /// Remove `username` from both sets of `channel`, then re-add it to
    /// exactly one based on its current live status.
    fn place(&mut self, channel: &str, username: &str) {
        let status = self
            .status
            .get(username)
            .copied()
            .unwrap_or(UserStatus::Offline);
        let entry = self.presence.entry(channel.to_string()).or_default();
        entry.online.remove(username);
        entry.offline.remove(username);
        if status.counts_as_online() {
            entry.online.insert(username.to_string());
        } else {
            entry.offline.insert(username.to_string());
        }
    }

    fn recompute_everywhere(&mut self, username: &str) {
        let channels: Vec<String> = self.presence.keys().cloned().collect();
        for channel in channels {
            self.place(&channel, username);
        }
    }
}

/// One owning component for all session and presence state.
#[derive(Default)]
pub struct Registry {
    inner: Mutex<RegistryInner>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a freshly accepted connection and its writer handle.
    pub async fn register_connection(&self, conn: ConnId, tx: OutboundSender) {
        let mut inner = self.inner.lock().await;
        inner.outbound.insert(conn, tx);
    }

    /// Bind a connection to an authenticated identity.
    ///
    /// The user's live status becomes `online` and its presence
    /// membership is recomputed in every known channel.
    pub async fn bind_session(&self, conn: ConnId, username: &str, role: Role) {
        let mut inner = self.inner.lock().await;
        inner.sessions.insert(conn, username.to_string());
        inner.roles.insert(username.to_string(), role);
        inner.status.insert(username.to_string(), UserStatus::Online);
        inner.recompute_everywhere(username);
        debug!(%conn, username, ?role, "session bound");
    }

    /// The identity bound to a connection, if any.
    pub async fn session_user(&self, conn: ConnId) -> Option<String> {
        let inner = self.inner.lock().await;
        inner.sessions.get(&conn).cloned()
    }

    pub async fn role_of(&self, username: &str) -> Option<Role> {
        let inner = self.inner.lock().await;
        inner.roles.get(username).copied()
    }

    /// Live status of a user; users the registry has never seen count as
    /// offline.
    pub async fn status_of(&self, username: &str) -> UserStatus {
        let inner = self.inner.lock().await;
        inner
            .status
            .get(username)
            .copied()
            .unwrap_or(UserStatus::Offline)
    }

    /// Apply a status transition and recompute presence everywhere.
    pub async fn set_status(&self, username: &str, status: UserStatus) {
        let mut inner = self.inner.lock().await;
        inner.status.insert(username.to_string(), status);
        inner.recompute_everywhere(username);
    }

    /// Make sure a channel has presence sets and place `username` in the
    /// correct one. Called after a successful join.
    pub async fn join_channel(&self, channel: &str, username: &str) {
        let mut inner = self.inner.lock().await;
        inner.place(channel, username);
    }

    /// Raw presence snapshot of a channel, guests included. Used for the
    /// `join_channel` response payload.
    pub async fn snapshot(&self, channel: &str) -> PresenceSnapshot {
        let inner = self.inner.lock().await;
        match inner.presence.get(channel) {
            Some(p) => PresenceSnapshot {
                online: p.online.iter().cloned().collect(),
                offline: p.offline.iter().cloned().collect(),
            },
            None => PresenceSnapshot::default(),
        }
    }

    /// Externally visible presence of a channel: guests are filtered out
    /// of both lists.
    pub async fn query(&self, channel: &str) -> PresenceSnapshot {
        let inner = self.inner.lock().await;
        let not_guest =
            |name: &&String| inner.roles.get(*name).copied() != Some(Role::Guest);
        match inner.presence.get(channel) {
            Some(p) => PresenceSnapshot {
                online: p.online.iter().filter(not_guest).cloned().collect(),
                offline: p.offline.iter().filter(not_guest).cloned().collect(),
            },
            None => PresenceSnapshot::default(),
        }
    }

    /// Tear down a connection.
    ///
    /// Returns the identity that was bound to it, exactly once — a second
    /// call for the same connection returns `None`, so concurrent
    /// disconnect paths cannot double-run cleanup. The username is
    /// removed from BOTH presence sets of every channel (departed users
    /// disappear from lists entirely), its live status becomes offline,
    /// and its role mapping is dropped.
    pub async fn disconnect(&self, conn: ConnId) -> Option<(String, Role)> {
        let mut inner = self.inner.lock().await;
        inner.outbound.remove(&conn);
        let username = inner.sessions.remove(&conn)?;

        for presence in inner.presence.values_mut() {
            presence.online.remove(&username);
            presence.offline.remove(&username);
        }
        inner.status.insert(username.clone(), UserStatus::Offline);
        let role = inner.roles.remove(&username).unwrap_or(Role::Authenticated);
        debug!(%conn, username, "session cleaned up");
        Some((username, role))
    }

    /// Fan a `new_message` push out to every connected session whose
    /// username sits in the channel's presence sets (online or offline),
    /// except the originator. Returns how many sessions were enqueued.
    pub async fn broadcast_new_message(
        &self,
        channel: &str,
        message: &Message,
        exclude: &str,
    ) -> usize {
        let payload = match encode_line(&PushEvent::new_message(message.clone())) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "failed to encode broadcast payload");
                return 0;
            }
        };

        let inner = self.inner.lock().await;
        let targets: BTreeSet<&String> = match inner.presence.get(channel) {
            Some(p) => p.online.iter().chain(p.offline.iter()).collect(),
            None => return 0,
        };

        let mut delivered = 0;
        for (conn, username) in &inner.sessions {
            if username == exclude || !targets.contains(username) {
                continue;
            }
            if let Some(tx) = inner.outbound.get(conn) {
                if tx.send(payload.clone()).is_ok() {
                    delivered += 1;
                } else {
                    warn!(%conn, username, "outbound queue closed, skipping broadcast");
                }
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn() -> ConnId {
        Uuid::new_v4()
    }

    #[tokio::test]
    async fn unauthenticated_connection_has_no_session() {
        let registry = Registry::new();
        let c = conn();
        let (tx, _rx) = mpsc::unbounded_channel();
        registry.register_connection(c, tx).await;
        assert!(registry.session_user(c).await.is_none());
    }

    #[tokio::test]
    async fn bind_places_user_online_everywhere() {
        let registry = Registry::new();
        registry.join_channel("dev", "ghost").await; // materialize a channel

        let c = conn();
        registry.bind_session(c, "alice", Role::Authenticated).await;
        let snap = registry.snapshot("dev").await;
        assert!(snap.online.contains(&"alice".to_string()));
        assert!(!snap.offline.contains(&"alice".to_string()));
    }

    #[tokio::test]
    async fn user_is_never_in_both_sets() {
        let registry = Registry::new();
        let c = conn();
        registry.bind_session(c, "alice", Role::Authenticated).await;
        registry.join_channel("dev", "alice").await;

        for status in [
            UserStatus::Offline,
            UserStatus::Online,
            UserStatus::Invisible,
            UserStatus::Offline,
        ] {
            registry.set_status("alice", status).await;
            let snap = registry.snapshot("dev").await;
            let both = snap.online.contains(&"alice".to_string())
                && snap.offline.contains(&"alice".to_string());
            assert!(!both, "alice in both sets after {status}");
        }
    }

    #[tokio::test]
    async fn invisible_counts_as_online() {
        let registry = Registry::new();
        let c = conn();
        registry.bind_session(c, "alice", Role::Authenticated).await;
        registry.join_channel("dev", "alice").await;

        registry.set_status("alice", UserStatus::Invisible).await;
        let snap = registry.snapshot("dev").await;
        assert!(snap.online.contains(&"alice".to_string()));
    }

    #[tokio::test]
    async fn query_filters_guests_from_both_sets() {
        let registry = Registry::new();
        registry
            .bind_session(conn(), "alice", Role::Authenticated)
            .await;
        registry.bind_session(conn(), "drifter", Role::Guest).await;
        registry.join_channel("dev", "alice").await;
        registry.join_channel("dev", "drifter").await;
        registry.set_status("alice", UserStatus::Offline).await;

        let raw = registry.snapshot("dev").await;
        assert!(raw.online.contains(&"drifter".to_string()));

        let visible = registry.query("dev").await;
        assert!(!visible.online.contains(&"drifter".to_string()));
        assert!(!visible.offline.contains(&"drifter".to_string()));
        assert!(visible.offline.contains(&"alice".to_string()));
    }

    #[tokio::test]
    async fn disconnect_removes_user_from_every_presence_set() {
        let registry = Registry::new();
        let c = conn();
        registry.bind_session(c, "alice", Role::Authenticated).await;
        registry.join_channel("dev", "alice").await;
        registry.join_channel("General", "alice").await;

        let (username, role) = registry.disconnect(c).await.unwrap();
        assert_eq!(username, "alice");
        assert_eq!(role, Role::Authenticated);

        for channel in ["dev", "General"] {
            let snap = registry.snapshot(channel).await;
            assert!(!snap.online.contains(&"alice".to_string()));
            assert!(!snap.offline.contains(&"alice".to_string()));
        }
    }

    #[tokio::test]
    async fn disconnect_runs_cleanup_only_once() {
        let registry = Registry::new();
        let c = conn();
        registry.bind_session(c, "alice", Role::Authenticated).await;

        assert!(registry.disconnect(c).await.is_some());
        assert!(registry.disconnect(c).await.is_none());
    }

    #[tokio::test]
    async fn broadcast_reaches_participants_but_not_streamer() {
        let registry = Registry::new();

        let (alice_conn, bob_conn, eve_conn) = (conn(), conn(), conn());
        let (alice_tx, mut alice_rx) = mpsc::unbounded_channel();
        let (bob_tx, mut bob_rx) = mpsc::unbounded_channel();
        let (eve_tx, mut eve_rx) = mpsc::unbounded_channel();

        registry.register_connection(alice_conn, alice_tx).await;
        registry.register_connection(bob_conn, bob_tx).await;
        registry.register_connection(eve_conn, eve_tx).await;
        registry
            .bind_session(alice_conn, "alice", Role::Authenticated)
            .await;
        registry
            .bind_session(bob_conn, "bob", Role::Authenticated)
            .await;
        registry
            .bind_session(eve_conn, "eve", Role::Authenticated)
            .await;

        registry.join_channel("dev", "alice").await;
        registry.join_channel("dev", "bob").await;
        // eve never joined "dev", but presence recompute on bind added
        // her to every known channel; park her somewhere else only.
        registry.set_status("bob", UserStatus::Offline).await;

        let msg = Message::livestream_start("alice", "203.0.113.7", 7001, chrono::Utc::now());
        let delivered = registry.broadcast_new_message("dev", &msg, "alice").await;
        assert!(delivered >= 1);

        // Offline participants still get the notice.
        let line = bob_rx.try_recv().expect("bob should receive the push");
        let push: PushEvent = serde_json::from_slice(&line).unwrap();
        assert!(push.is_new_message());
        assert_eq!(push.message_data.streamer.as_deref(), Some("alice"));

        // The streamer is excluded.
        assert!(alice_rx.try_recv().is_err());
        drop(eve_rx);
    }
}
