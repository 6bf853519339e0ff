//! Core domain types shared by the server, client, and store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Name of the channel that implicitly always exists and can never be
/// deleted.
pub const GENERAL_CHANNEL: &str = "General";

/// Author recorded on messages generated by the service itself.
pub const SYSTEM_AUTHOR: &str = "System";

/// Live status of a user.
///
/// Status is volatile (held by the server's registry) and additionally
/// persisted for authenticated users on each transition. Guests have no
/// persisted record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Online,
    Offline,
    Invisible,
}

impl UserStatus {
    /// Whether this status places the user in the *online* half of a
    /// channel's presence sets. `Invisible` counts as online here — kept
    /// from the original product behaviour (see DESIGN.md).
    pub fn counts_as_online(self) -> bool {
        matches!(self, UserStatus::Online | UserStatus::Invisible)
    }

    /// Whether a user with this status may send messages.
    pub fn may_send_messages(self) -> bool {
        self.counts_as_online()
    }
}

impl std::fmt::Display for UserStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            UserStatus::Online => "online",
            UserStatus::Offline => "offline",
            UserStatus::Invisible => "invisible",
        };
        f.write_str(s)
    }
}

/// Role attached to a session at authentication time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Authenticated,
    Guest,
}

impl Role {
    pub fn is_guest(self) -> bool {
        matches!(self, Role::Guest)
    }
}

/// Tag carried by system-generated log entries so clients can render them
/// specially.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "USER_JOINED_CHANNEL")]
    UserJoinedChannel,
    #[serde(rename = "LIVESTREAM_START")]
    LivestreamStart,
}

/// One entry in a channel's append-only message log.
///
/// The timestamp is assigned by the server at persistence time (UTC) and
/// doubles as the deduplication key during client/server reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Author of the message; [`SYSTEM_AUTHOR`] for service-generated
    /// entries.
    pub username: String,

    /// Message body.
    pub message: String,

    /// UTC timestamp assigned when the message entered the log.
    pub timestamp: DateTime<Utc>,

    /// Set on system-generated entries only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<EventType>,

    /// Livestream rendezvous payload: who is streaming.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub streamer: Option<String>,

    /// Livestream rendezvous payload: address the peer stream can be
    /// reached at.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// Livestream rendezvous payload: announced port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

impl Message {
    /// A regular user-authored message.
    pub fn user(username: impl Into<String>, text: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            username: username.into(),
            message: text.into(),
            timestamp: at,
            event_type: None,
            streamer: None,
            host: None,
            port: None,
        }
    }

    /// A system-generated message with an event tag.
    pub fn system(text: impl Into<String>, event: EventType, at: DateTime<Utc>) -> Self {
        Self {
            username: SYSTEM_AUTHOR.to_string(),
            message: text.into(),
            timestamp: at,
            event_type: Some(event),
            streamer: None,
            host: None,
            port: None,
        }
    }

    /// The livestream rendezvous notice persisted into a channel log and
    /// broadcast to its participants.
    pub fn livestream_start(
        streamer: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        at: DateTime<Utc>,
    ) -> Self {
        let streamer = streamer.into();
        Self {
            username: SYSTEM_AUTHOR.to_string(),
            message: format!("'{streamer}' started a livestream."),
            timestamp: at,
            event_type: Some(EventType::LivestreamStart),
            streamer: Some(streamer),
            host: Some(host.into()),
            port: Some(port),
        }
    }

    /// Whether this entry was authored by the service rather than a user.
    pub fn is_system(&self) -> bool {
        self.event_type.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_presence_mapping() {
        assert!(UserStatus::Online.counts_as_online());
        assert!(UserStatus::Invisible.counts_as_online());
        assert!(!UserStatus::Offline.counts_as_online());
    }

    #[test]
    fn status_wire_form_is_lowercase() {
        assert_eq!(
            serde_json::to_string(&UserStatus::Invisible).unwrap(),
            "\"invisible\""
        );
        let parsed: UserStatus = serde_json::from_str("\"online\"").unwrap();
        assert_eq!(parsed, UserStatus::Online);
    }

    #[test]
    fn system_message_carries_event_tag() {
        let msg = Message::system(
            "User 'carol' has joined the channel.",
            EventType::UserJoinedChannel,
            Utc::now(),
        );
        assert!(msg.is_system());
        assert_eq!(msg.username, SYSTEM_AUTHOR);

        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["event_type"], "USER_JOINED_CHANNEL");
        // Rendezvous fields stay off the wire for plain system messages.
        assert!(json.get("streamer").is_none());
    }

    #[test]
    fn livestream_notice_round_trips() {
        let msg = Message::livestream_start("alice", "203.0.113.7", 7001, Utc::now());
        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back.streamer.as_deref(), Some("alice"));
        assert_eq!(back.port, Some(7001));
        assert_eq!(back.event_type, Some(EventType::LivestreamStart));
    }
}
