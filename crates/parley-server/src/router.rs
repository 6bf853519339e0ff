//! Request routing.
//!
//! One parsed JSON value in, at most one [`Response`] out. The livestream
//! start path is the only branch that deliberately produces no reply: its
//! effect is the persisted notice plus the broadcast fan-out.
//!
//! Everything except `auth` and `tracker` requires a bound session.
//! Domain errors from the stores are surfaced verbatim; infrastructure
//! errors are logged here and replaced with a generic message.

use std::net::IpAddr;
use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};

use parley_shared::{
    AuthRequest, ChannelRequest, LivestreamRequest, Message, Request, Response, Role,
    TrackerRequest,
};
use parley_store::{ChannelStore, StoreError, UserStore};

use crate::registry::{ConnId, Registry};
use crate::tracker::Tracker;

/// Shared handles the router dispatches into.
pub struct Router {
    pub registry: Arc<Registry>,
    pub channels: Arc<ChannelStore>,
    pub users: Arc<UserStore>,
    pub tracker: Arc<Tracker>,
}

impl Router {
    /// Handle one decoded frame from connection `conn`.
    ///
    /// Returns `None` when the branch is broadcast-only and owes the
    /// requester no reply.
    pub async fn handle(
        &self,
        conn: ConnId,
        peer_ip: IpAddr,
        raw: serde_json::Value,
    ) -> Option<Response> {
        let request: Request = match serde_json::from_value(raw) {
            Ok(r) => r,
            Err(e) => {
                warn!(%conn, error = %e, "unparseable request");
                return Some(Response::error("Invalid request format"));
            }
        };

        let session = self.registry.session_user(conn).await;

        match request {
            Request::Auth(auth) => Some(self.handle_auth(conn, auth, session).await),
            // The tracker predates authentication and stays open.
            Request::Tracker(tracker) => Some(self.handle_tracker(tracker).await),
            _ if session.is_none() => {
                warn!(%conn, "request on unauthenticated connection");
                Some(Response::error("Authentication required"))
            }
            Request::Channel(channel) => {
                // Checked above.
                let identity = session?;
                Some(self.handle_channel(channel, &identity).await)
            }
            Request::GetUserStatus { channel } => {
                let presence = self.registry.query(&channel).await;
                Some(Response::success().with_presence_fields(&presence))
            }
            Request::Livestream(LivestreamRequest::StartLivestream { channel_name, port }) => {
                let streamer = session?;
                self.start_livestream(&channel_name, &streamer, peer_ip, port)
                    .await;
                None
            }
        }
    }

    async fn handle_auth(
        &self,
        conn: ConnId,
        auth: AuthRequest,
        session: Option<String>,
    ) -> Response {
        match auth {
            AuthRequest::Login { username, password } => {
                match self.users.authenticate(&username, &password).await {
                    Ok(()) => {
                        self.registry
                            .bind_session(conn, &username, Role::Authenticated)
                            .await;
                        info!(username, "login");
                        Response::success_message(format!("Welcome back, {username}!"))
                            .with_role(Role::Authenticated)
                    }
                    Err(e) => {
                        warn!(username, "failed login attempt");
                        self.store_error_response(e)
                    }
                }
            }

            AuthRequest::Register { username, password } => {
                if username.is_empty() || password.is_empty() {
                    return Response::error("Username and password are required");
                }
                match self.users.register(&username, &password).await {
                    // Registration does not log the user in.
                    Ok(()) => Response::success_message("User registered successfully"),
                    Err(e) => self.store_error_response(e),
                }
            }

            AuthRequest::VisitorLogin { visitor_name } => {
                if visitor_name.is_empty() {
                    return Response::error("Visitor name is required");
                }
                self.registry
                    .bind_session(conn, &visitor_name, Role::Guest)
                    .await;
                info!(username = %visitor_name, "guest login");
                Response::success_message(format!("Welcome, {visitor_name}!"))
                    .with_role(Role::Guest)
            }

            AuthRequest::UpdateStatus { username, status } => {
                let Some(identity) = session else {
                    return Response::error("Authentication required to update status");
                };
                if identity != username {
                    warn!(identity, username, "status update identity mismatch");
                    return Response::error("Authentication mismatch for status update");
                }
                if self.registry.role_of(&identity).await == Some(Role::Guest) {
                    return Response::error("Guests cannot change status");
                }

                self.registry.set_status(&username, status).await;
                match self.users.persist_status(&username, status).await {
                    Ok(_) => Response::success_message(format!("Status changed to {status}")),
                    Err(e) => self.store_error_response(e),
                }
            }
        }
    }

    async fn handle_channel(&self, request: ChannelRequest, identity: &str) -> Response {
        match request {
            ChannelRequest::CreateChannel {
                channel_name,
                username,
            } => {
                if channel_name.is_empty() || username.is_empty() {
                    return Response::error("Channel name and username are required");
                }
                match self.channels.create(&channel_name, &username).await {
                    Ok(()) => Response::success_message(format!(
                        "Channel '{channel_name}' created successfully"
                    )),
                    Err(e) => self.store_error_response(e),
                }
            }

            ChannelRequest::ListChannels => {
                Response::success().with_channels(self.channels.list().await)
            }

            ChannelRequest::DeleteChannel {
                channel_name,
                username,
            } => match self.channels.delete(&channel_name, &username).await {
                Ok(()) => Response::success_message(format!(
                    "Channel '{channel_name}' deleted successfully"
                )),
                Err(e) => self.store_error_response(e),
            },

            ChannelRequest::JoinChannel {
                channel_name,
                username,
            } => {
                let is_guest = self.registry.role_of(&username).await == Some(Role::Guest);
                match self.channels.join(&channel_name, &username, is_guest).await {
                    Ok(outcome) => {
                        self.registry.join_channel(&channel_name, &username).await;
                        // Raw snapshot, guests included.
                        let user_list = self.registry.snapshot(&channel_name).await;
                        Response::success_message(format!(
                            "User '{username}' joined channel '{channel_name}' successfully"
                        ))
                        .with_owner(outcome.host)
                        .with_user_list(user_list)
                    }
                    Err(e) => self.store_error_response(e),
                }
            }

            ChannelRequest::SaveMessage {
                channel_name,
                message,
                username,
            } => {
                if channel_name.is_empty() || message.is_empty() || username.is_empty() {
                    return Response::error("Channel name, message, and username are required");
                }
                let live_status = self.registry.status_of(identity).await;
                match self
                    .channels
                    .save_message(&channel_name, &username, &message, identity, live_status)
                    .await
                {
                    Ok(stored) => Response::success_message("Message saved successfully")
                        .with_message_data(stored),
                    Err(e) => self.store_error_response(e),
                }
            }

            ChannelRequest::SyncToServer {
                channel_name,
                messages,
                username: _,
            } => {
                if channel_name.is_empty() {
                    return Response::error("Channel name and a list of messages are required");
                }
                match self.channels.merge_from_client(&channel_name, &messages).await {
                    Ok(report) => Response::success_message(format!(
                        "Synchronization to server for '{channel_name}' complete. {} new messages added.",
                        report.added
                    )),
                    Err(e) => self.store_error_response(e),
                }
            }

            ChannelRequest::SyncFromServer {
                channel_name,
                username,
            } => {
                if channel_name.is_empty() || username.is_empty() {
                    return Response::error("Channel name and username are required");
                }
                match self.channels.fetch_for_sync(&channel_name, &username).await {
                    Ok(messages) => Response::success().with_messages(messages),
                    Err(e) => self.store_error_response(e),
                }
            }
        }
    }

    async fn handle_tracker(&self, request: TrackerRequest) -> Response {
        match request {
            TrackerRequest::SubmitInfo { ip, port } => match self.tracker.submit(&ip, port).await {
                Ok(()) => Response::success_message("Peer added successfully"),
                Err(message) => Response::error(message),
            },
            TrackerRequest::GetList => Response::success().with_peers(self.tracker.list().await),
        }
    }

    /// Persist the rendezvous notice, then fan it out. The streamer gets
    /// no reply; a persistence failure is logged and the broadcast still
    /// goes out.
    async fn start_livestream(&self, channel_name: &str, streamer: &str, peer_ip: IpAddr, port: u16) {
        let notice = Message::livestream_start(streamer, peer_ip.to_string(), port, Utc::now());

        if let Err(e) = self
            .channels
            .save_system_message(channel_name, notice.clone())
            .await
        {
            error!(channel = channel_name, error = %e, "failed to persist livestream notice");
        }

        let delivered = self
            .registry
            .broadcast_new_message(channel_name, &notice, streamer)
            .await;
        info!(
            channel = channel_name,
            streamer, port, delivered, "livestream announced"
        );
    }

    fn store_error_response(&self, error: StoreError) -> Response {
        if error.is_internal() {
            error!(error = %error, "store operation failed");
            Response::error("Internal server error")
        } else {
            Response::error(error.to_string())
        }
    }
}
