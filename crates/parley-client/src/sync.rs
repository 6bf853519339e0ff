//! Offline-first sync engine and typed request helpers.
//!
//! [`ChatClient`] owns at most one server connection plus the local
//! offline queue. Sending falls back to the queue on any transport
//! failure; reconciliation pushes the queue first and always pulls the
//! authoritative log afterwards, whatever the push outcome.

use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use parley_shared::{
    AuthRequest, ChannelRequest, LivestreamRequest, Message, PushEvent, Request, Response,
    TrackerRequest, UserStatus,
};

use crate::cache::LocalCache;
use crate::connection::Connection;
use crate::error::{ClientError, Result};

/// Receive deadlines. The server never enforces one; these are the
/// client's own.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub connect: Duration,
    /// Ordinary request replies.
    pub reply: Duration,
    /// Send confirmation; shorter so composing stays responsive.
    pub send: Duration,
    /// Bulk channel sync.
    pub sync: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(10),
            reply: Duration::from_secs(10),
            send: Duration::from_secs(5),
            sync: Duration::from_secs(15),
        }
    }
}

/// Outcome of [`ChatClient::send_message`].
#[derive(Debug)]
pub enum SendOutcome {
    /// The server answered; the response may still carry an error status.
    Delivered(Response),
    /// The transport was unusable; the message is in the local queue.
    OfflineSave,
}

/// Outcome of [`ChatClient::reconcile`].
#[derive(Debug)]
pub struct ReconcileOutcome {
    /// Whether the local queue was accepted by the server and cleared.
    pub queue_flushed: bool,
    /// The authoritative log, for the display layer to merge.
    pub messages: Vec<Message>,
}

/// Client for one Parley server.
pub struct ChatClient {
    server_addr: String,
    pub timeouts: Timeouts,
    connection: Option<Connection>,
    cache: LocalCache,
}

impl ChatClient {
    /// Create a client for `server_addr`, opening the offline cache at
    /// `cache_path`. Does not connect.
    pub async fn new(server_addr: impl Into<String>, cache_path: impl Into<PathBuf>) -> Self {
        Self {
            server_addr: server_addr.into(),
            timeouts: Timeouts::default(),
            connection: None,
            cache: LocalCache::open(cache_path).await,
        }
    }

    pub async fn connect(&mut self) -> Result<()> {
        let connection = Connection::connect(&self.server_addr, self.timeouts.connect).await?;
        self.connection = Some(connection);
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub fn disconnect(&mut self) {
        self.connection = None;
    }

    pub fn cache(&self) -> &LocalCache {
        &self.cache
    }

    /// Pushes received while waiting for replies, oldest first.
    pub fn drain_pushes(&mut self) -> Vec<PushEvent> {
        self.connection
            .as_mut()
            .map(Connection::drain_pushes)
            .unwrap_or_default()
    }

    // -- typed request helpers ----------------------------------------------

    pub async fn login(&mut self, username: &str, password: &str) -> Result<Response> {
        self.request(
            Request::Auth(AuthRequest::Login {
                username: username.to_string(),
                password: password.to_string(),
            }),
            self.timeouts.reply,
        )
        .await
    }

    pub async fn register(&mut self, username: &str, password: &str) -> Result<Response> {
        self.request(
            Request::Auth(AuthRequest::Register {
                username: username.to_string(),
                password: password.to_string(),
            }),
            self.timeouts.reply,
        )
        .await
    }

    pub async fn visitor_login(&mut self, visitor_name: &str) -> Result<Response> {
        self.request(
            Request::Auth(AuthRequest::VisitorLogin {
                visitor_name: visitor_name.to_string(),
            }),
            self.timeouts.reply,
        )
        .await
    }

    pub async fn update_status(&mut self, username: &str, status: UserStatus) -> Result<Response> {
        self.request(
            Request::Auth(AuthRequest::UpdateStatus {
                username: username.to_string(),
                status,
            }),
            self.timeouts.reply,
        )
        .await
    }

    pub async fn create_channel(&mut self, channel: &str, username: &str) -> Result<Response> {
        self.request(
            Request::Channel(ChannelRequest::CreateChannel {
                channel_name: channel.to_string(),
                username: username.to_string(),
            }),
            self.timeouts.reply,
        )
        .await
    }

    pub async fn list_channels(&mut self) -> Result<Response> {
        self.request(
            Request::Channel(ChannelRequest::ListChannels),
            self.timeouts.reply,
        )
        .await
    }

    pub async fn delete_channel(&mut self, channel: &str, username: &str) -> Result<Response> {
        self.request(
            Request::Channel(ChannelRequest::DeleteChannel {
                channel_name: channel.to_string(),
                username: username.to_string(),
            }),
            self.timeouts.reply,
        )
        .await
    }

    pub async fn join_channel(&mut self, channel: &str, username: &str) -> Result<Response> {
        self.request(
            Request::Channel(ChannelRequest::JoinChannel {
                channel_name: channel.to_string(),
                username: username.to_string(),
            }),
            self.timeouts.reply,
        )
        .await
    }

    pub async fn get_user_status(&mut self, channel: &str) -> Result<Response> {
        self.request(
            Request::GetUserStatus {
                channel: channel.to_string(),
            },
            self.timeouts.reply,
        )
        .await
    }

    pub async fn submit_peer_info(&mut self, ip: &str, port: u16) -> Result<Response> {
        self.request(
            Request::Tracker(TrackerRequest::SubmitInfo {
                ip: ip.to_string(),
                port,
            }),
            self.timeouts.reply,
        )
        .await
    }

    pub async fn get_peer_list(&mut self) -> Result<Response> {
        self.request(Request::Tracker(TrackerRequest::GetList), self.timeouts.reply)
            .await
    }

    /// Announce a livestream. The server replies with nothing; the effect
    /// shows up as a broadcast to the other participants.
    pub async fn start_livestream(&mut self, channel: &str, port: u16) -> Result<()> {
        let connection = self.connection.as_mut().ok_or(ClientError::NotConnected)?;
        connection
            .send(&Request::Livestream(LivestreamRequest::StartLivestream {
                channel_name: channel.to_string(),
                port,
            }))
            .await
    }

    // -- sync engine --------------------------------------------------------

    /// Send a chat message, falling back to the offline queue on any
    /// transport failure. A server-side rejection is returned as-is and
    /// not queued.
    pub async fn send_message(
        &mut self,
        channel: &str,
        username: &str,
        text: &str,
    ) -> Result<SendOutcome> {
        let message = Message::user(username, text, Utc::now());

        if self.connection.is_none() {
            self.cache.enqueue(channel, message).await?;
            return Ok(SendOutcome::OfflineSave);
        }

        let request = Request::Channel(ChannelRequest::SaveMessage {
            channel_name: channel.to_string(),
            message: text.to_string(),
            username: username.to_string(),
        });
        match self.request(request, self.timeouts.send).await {
            Ok(response) => Ok(SendOutcome::Delivered(response)),
            Err(e) if e.is_transport_failure() => {
                warn!(channel, error = %e, "send failed, queueing locally");
                self.cache.enqueue(channel, message).await?;
                Ok(SendOutcome::OfflineSave)
            }
            Err(e) => Err(e),
        }
    }

    /// Two-phase reconciliation for a channel.
    ///
    /// Phase 1 pushes the offline queue, clearing it only if the server
    /// reports success. Phase 2 always runs and pulls the authoritative
    /// log.
    pub async fn reconcile(&mut self, channel: &str, username: &str) -> Result<ReconcileOutcome> {
        let mut queue_flushed = false;

        let queued = self.cache.queued(channel);
        if !queued.is_empty() {
            let messages = queued
                .iter()
                .map(serde_json::to_value)
                .collect::<std::result::Result<Vec<_>, _>>()?;
            let request = Request::Channel(ChannelRequest::SyncToServer {
                channel_name: channel.to_string(),
                messages,
                username: username.to_string(),
            });
            match self.request(request, self.timeouts.sync).await {
                Ok(response) if response.is_success() => {
                    info!(channel, count = queued.len(), "offline queue accepted");
                    self.cache.clear(channel).await?;
                    queue_flushed = true;
                }
                Ok(response) => {
                    warn!(
                        channel,
                        message = response.message.as_deref().unwrap_or(""),
                        "server rejected queued messages, keeping them"
                    );
                }
                Err(e) => {
                    warn!(channel, error = %e, "could not push queued messages, keeping them");
                }
            }
        }

        // Phase 2 runs regardless of the push outcome.
        let request = Request::Channel(ChannelRequest::SyncFromServer {
            channel_name: channel.to_string(),
            username: username.to_string(),
        });
        let response = self.request(request, self.timeouts.sync).await?;
        if !response.is_success() {
            return Err(ClientError::Server(
                response
                    .message
                    .unwrap_or_else(|| "synchronization failed".to_string()),
            ));
        }

        Ok(ReconcileOutcome {
            queue_flushed,
            messages: response.messages.unwrap_or_default(),
        })
    }

    /// Issue one request over the live connection. A transport failure
    /// drops the connection so later sends take the offline path.
    async fn request(&mut self, request: Request, timeout: Duration) -> Result<Response> {
        let connection = self.connection.as_mut().ok_or(ClientError::NotConnected)?;
        match connection.request(&request, timeout).await {
            Ok(response) => Ok(response),
            Err(e) => {
                if e.is_transport_failure() {
                    warn!(error = %e, "dropping unusable connection");
                    self.connection = None;
                }
                Err(e)
            }
        }
    }
}
