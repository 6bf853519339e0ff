//! Per-connection lifecycle.
//!
//! Each accepted socket gets a reader loop (this task) and a dedicated
//! writer task fed through an unbounded queue. Replies and broadcast
//! pushes are only ever enqueued, so a peer that stops draining its
//! socket slows nobody else down.
//!
//! Cleanup runs exactly once, whichever way the reader loop ends: the
//! registry strips the session and presence entries, and an
//! authenticated user's persisted status flips to offline.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use parley_net::{encode_line, JsonFramer};
use parley_shared::UserStatus;

use crate::registry::ConnId;
use crate::router::Router;

const READ_CHUNK: usize = 4096;

/// Drive one client connection to completion.
pub async fn serve(stream: TcpStream, peer: SocketAddr, router: Arc<Router>) {
    let conn: ConnId = Uuid::new_v4();
    info!(%conn, %peer, "connection accepted");

    let (mut reader, mut writer) = stream.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
    router.registry.register_connection(conn, tx.clone()).await;

    let writer_task = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            if writer.write_all(&line).await.is_err() {
                break;
            }
            if writer.flush().await.is_err() {
                break;
            }
        }
    });

    let mut framer = JsonFramer::new();
    let mut chunk = vec![0u8; READ_CHUNK];

    loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) => {
                debug!(%conn, "peer closed the connection");
                break;
            }
            Ok(n) => n,
            Err(e) => {
                warn!(%conn, error = %e, "read failed");
                break;
            }
        };
        framer.feed(&chunk[..n]);

        loop {
            match framer.next_value() {
                Ok(Some(value)) => {
                    if let Some(response) = router.handle(conn, peer.ip(), value).await {
                        match encode_line(&response) {
                            Ok(line) => {
                                if tx.send(line).is_err() {
                                    // Writer gone; nothing left to do here.
                                    break;
                                }
                            }
                            Err(e) => warn!(%conn, error = %e, "failed to encode response"),
                        }
                    }
                }
                Ok(None) => break,
                // The framer already discarded the rest of the read;
                // the peer gets no reply for bytes we cannot attribute
                // to a request.
                Err(e) => {
                    warn!(%conn, error = %e, "dropping undecodable input");
                    break;
                }
            }
        }
    }

    cleanup(conn, &router).await;
    drop(tx);
    let _ = writer_task.await;
    info!(%conn, %peer, "connection closed");
}

async fn cleanup(conn: ConnId, router: &Router) {
    let Some((username, role)) = router.registry.disconnect(conn).await else {
        return;
    };
    if role.is_guest() {
        return;
    }
    match router.users.persist_status(&username, UserStatus::Offline).await {
        Ok(_) => debug!(username, "persisted offline status on disconnect"),
        Err(e) => warn!(username, error = %e, "failed to persist offline status"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
    use tokio::net::TcpListener;

    use parley_shared::Response;
    use parley_store::{ChannelStore, UserStore};

    use crate::registry::Registry;
    use crate::tracker::Tracker;

    async fn spawn_server() -> (SocketAddr, Arc<Router>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let router = Arc::new(Router {
            registry: Arc::new(Registry::new()),
            channels: Arc::new(ChannelStore::open(dir.path().join("channels.json")).await),
            users: Arc::new(UserStore::open(dir.path().join("users.json")).await),
            tracker: Arc::new(Tracker::new()),
        });

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept_router = router.clone();
        tokio::spawn(async move {
            loop {
                let (stream, peer) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(_) => break,
                };
                tokio::spawn(serve(stream, peer, accept_router.clone()));
            }
        });
        (addr, router, dir)
    }

    struct TestClient {
        writer: OwnedWriteHalf,
        reader: BufReader<OwnedReadHalf>,
    }

    impl TestClient {
        async fn connect(addr: SocketAddr) -> Self {
            let stream = TcpStream::connect(addr).await.unwrap();
            let (read, writer) = stream.into_split();
            Self {
                writer,
                reader: BufReader::new(read),
            }
        }

        async fn send_raw(&mut self, bytes: &[u8]) {
            self.writer.write_all(bytes).await.unwrap();
        }

        async fn read_reply(&mut self) -> Response {
            let mut reply = String::new();
            self.reader.read_line(&mut reply).await.unwrap();
            serde_json::from_str(&reply).unwrap()
        }

        async fn request(&mut self, body: serde_json::Value) -> Response {
            let mut line = serde_json::to_vec(&body).unwrap();
            line.push(b'\n');
            self.send_raw(&line).await;
            self.read_reply().await
        }
    }

    #[tokio::test]
    async fn end_to_end_login_and_message() {
        let (addr, router, _dir) = spawn_server().await;
        router.users.register("alice", "pw").await.unwrap();

        let mut client = TestClient::connect(addr).await;
        let resp = client
            .request(json!({"type": "auth", "action": "login", "username": "alice", "password": "pw"}))
            .await;
        assert!(resp.is_success());

        let resp = client
            .request(json!({"type": "channel", "action": "join_channel", "channel_name": "General", "username": "alice"}))
            .await;
        assert!(resp.is_success());

        let resp = client
            .request(json!({"type": "channel", "action": "save_message", "channel_name": "General", "message": "hello", "username": "alice"}))
            .await;
        assert!(resp.is_success());
        assert_eq!(resp.message_data.unwrap().message, "hello");
    }

    #[tokio::test]
    async fn two_requests_in_one_write_get_two_replies() {
        let (addr, _router, _dir) = spawn_server().await;
        let mut client = TestClient::connect(addr).await;

        // No delimiter between the two objects.
        let batch = concat!(
            r#"{"type":"tracker","action":"submit_info","ip":"192.0.2.4","port":7000}"#,
            r#"{"type":"tracker","action":"get_list"}"#,
        );
        client.send_raw(batch.as_bytes()).await;

        let first = client.read_reply().await;
        let second = client.read_reply().await;
        assert!(first.is_success());
        assert_eq!(second.peers.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn disconnect_persists_offline_status() {
        let (addr, router, _dir) = spawn_server().await;
        router.users.register("alice", "pw").await.unwrap();

        {
            let mut client = TestClient::connect(addr).await;
            let resp = client
                .request(json!({"type": "auth", "action": "login", "username": "alice", "password": "pw"}))
                .await;
            assert!(resp.is_success());
        } // dropped, socket closes

        // Give the server a moment to run cleanup.
        for _ in 0..50 {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            if router.registry.status_of("alice").await == UserStatus::Offline {
                return;
            }
        }
        panic!("disconnect cleanup never ran");
    }

    #[tokio::test]
    async fn garbage_input_does_not_kill_the_connection() {
        let (addr, _router, _dir) = spawn_server().await;
        let mut client = TestClient::connect(addr).await;

        client.send_raw(b"this is not json\n").await;
        // Let the server consume the garbage in its own read before the
        // valid request goes out, so the two cannot share one read.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        // The broken read is dropped without a reply; the next valid
        // request still works.
        let resp = client
            .request(json!({"type": "tracker", "action": "get_list"}))
            .await;
        assert!(resp.is_success());
    }

    #[tokio::test]
    async fn unread_reply_does_not_block_processing() {
        let (addr, router, _dir) = spawn_server().await;
        router.users.register("alice", "pw").await.unwrap();

        let mut client = TestClient::connect(addr).await;
        let body =
            json!({"type": "auth", "action": "login", "username": "alice", "password": "pw"});
        let mut line = serde_json::to_vec(&body).unwrap();
        line.push(b'\n');
        client.send_raw(&line).await;

        // Never read the reply; the server must still consider alice
        // online because enqueueing does not depend on the peer draining.
        for _ in 0..50 {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            if router.registry.status_of("alice").await == UserStatus::Online {
                return;
            }
        }
        panic!("login never processed");
    }
}
