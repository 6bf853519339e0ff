//! Wire protocol: requests, responses, and unsolicited server pushes.
//!
//! Every logical message is one flat JSON object. Requests carry a `type`
//! discriminator and — except for `get_user_status` — an `action`. Both
//! levels are modelled as closed, internally tagged enums so the router
//! matches every action exhaustively instead of comparing strings.
//!
//! Framing is newline-delimited JSON on both ends; readers must still
//! tolerate concatenated objects with no delimiter (see `parley-net`).

use serde::{Deserialize, Serialize};

use crate::types::{Message, Role, UserStatus};

/// A client request, discriminated by the `type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    Auth(AuthRequest),
    Channel(ChannelRequest),
    GetUserStatus { channel: String },
    Livestream(LivestreamRequest),
    Tracker(TrackerRequest),
}

/// `type = "auth"` actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AuthRequest {
    Login {
        username: String,
        password: String,
    },
    Register {
        username: String,
        password: String,
    },
    VisitorLogin {
        visitor_name: String,
    },
    UpdateStatus {
        username: String,
        status: UserStatus,
    },
}

/// `type = "channel"` actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ChannelRequest {
    CreateChannel {
        channel_name: String,
        username: String,
    },
    ListChannels,
    DeleteChannel {
        channel_name: String,
        username: String,
    },
    JoinChannel {
        channel_name: String,
        username: String,
    },
    SaveMessage {
        channel_name: String,
        message: String,
        username: String,
    },
    SyncToServer {
        channel_name: String,
        messages: Vec<serde_json::Value>,
        username: String,
    },
    SyncFromServer {
        channel_name: String,
        username: String,
    },
}

/// `type = "livestream"` actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum LivestreamRequest {
    StartLivestream { channel_name: String, port: u16 },
}

/// `type = "tracker"` actions — the legacy peer registry, served without
/// authentication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TrackerRequest {
    SubmitInfo { ip: String, port: u16 },
    GetList,
}

/// Outcome discriminator on every response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

/// Presence snapshot returned by `join_channel` and `get_user_status`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PresenceSnapshot {
    pub online: Vec<String>,
    pub offline: Vec<String>,
}

/// A registered peer in the tracker registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub ip: String,
    pub port: u16,
}

/// A server reply to a single request.
///
/// Only the fields relevant to the answered request are present on the
/// wire; everything optional is skipped when `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status: Status,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub online: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offline: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<Message>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_data: Option<Message>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_list: Option<PresenceSnapshot>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peers: Option<Vec<PeerInfo>>,
}

impl Response {
    fn bare(status: Status) -> Self {
        Self {
            status,
            message: None,
            role: None,
            channels: None,
            online: None,
            offline: None,
            messages: None,
            message_data: None,
            owner: None,
            user_list: None,
            peers: None,
        }
    }

    pub fn success() -> Self {
        Self::bare(Status::Success)
    }

    pub fn success_message(message: impl Into<String>) -> Self {
        Self::success().with_message(message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::bare(Status::Error).with_message(message)
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = Some(role);
        self
    }

    pub fn with_channels(mut self, channels: Vec<String>) -> Self {
        self.channels = Some(channels);
        self
    }

    pub fn with_presence_fields(mut self, presence: &PresenceSnapshot) -> Self {
        self.online = Some(presence.online.clone());
        self.offline = Some(presence.offline.clone());
        self
    }

    pub fn with_messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = Some(messages);
        self
    }

    pub fn with_message_data(mut self, message: Message) -> Self {
        self.message_data = Some(message);
        self
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn with_user_list(mut self, presence: PresenceSnapshot) -> Self {
        self.user_list = Some(presence);
        self
    }

    pub fn with_peers(mut self, peers: Vec<PeerInfo>) -> Self {
        self.peers = Some(peers);
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }
}

/// An unsolicited server-to-client event.
///
/// Deliberately shaped like a `channel` request so that client receive
/// loops written around request/response traffic recognise it by its
/// `type`/`action` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub action: String,
    pub message_data: Message,
}

impl PushEvent {
    pub const NEW_MESSAGE_ACTION: &'static str = "new_message";

    pub fn new_message(message: Message) -> Self {
        Self {
            kind: "channel".to_string(),
            action: Self::NEW_MESSAGE_ACTION.to_string(),
            message_data: message,
        }
    }

    pub fn is_new_message(&self) -> bool {
        self.kind == "channel" && self.action == Self::NEW_MESSAGE_ACTION
    }
}

/// Anything a client can read off the socket: a reply to its own request
/// or an unsolicited push.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Incoming {
    Push(PushEvent),
    Reply(Response),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn request_wire_tags() {
        let req = Request::Auth(AuthRequest::Login {
            username: "alice".into(),
            password: "hunter2".into(),
        });
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["type"], "auth");
        assert_eq!(json["action"], "login");
        assert_eq!(json["username"], "alice");
    }

    #[test]
    fn channel_actions_round_trip() {
        let req = Request::Channel(ChannelRequest::SaveMessage {
            channel_name: "dev".into(),
            message: "hi".into(),
            username: "alice".into(),
        });
        let json = serde_json::to_string(&req).unwrap();
        let back: Request = serde_json::from_str(&json).unwrap();
        assert_eq!(req, back);
    }

    #[test]
    fn get_user_status_has_no_action() {
        let req = Request::GetUserStatus {
            channel: "General".into(),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["type"], "get_user_status");
        assert!(json.get("action").is_none());

        let parsed: Request =
            serde_json::from_str(r#"{"type":"get_user_status","channel":"General"}"#).unwrap();
        assert_eq!(parsed, req);
    }

    #[test]
    fn unknown_action_is_rejected() {
        let raw = r#"{"type":"channel","action":"explode_channel","channel_name":"dev"}"#;
        assert!(serde_json::from_str::<Request>(raw).is_err());
    }

    #[test]
    fn response_skips_absent_fields() {
        let resp = Response::success_message("ok");
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["status"], "success");
        assert!(json.get("channels").is_none());
        assert!(json.get("online").is_none());
    }

    #[test]
    fn incoming_distinguishes_push_from_reply() {
        let push = PushEvent::new_message(Message::user("bob", "look", Utc::now()));
        let raw = serde_json::to_string(&push).unwrap();
        match serde_json::from_str::<Incoming>(&raw).unwrap() {
            Incoming::Push(p) => assert!(p.is_new_message()),
            other => panic!("expected push, got {other:?}"),
        }

        let raw = serde_json::to_string(&Response::error("nope")).unwrap();
        match serde_json::from_str::<Incoming>(&raw).unwrap() {
            Incoming::Reply(r) => assert!(!r.is_success()),
            other => panic!("expected reply, got {other:?}"),
        }
    }
}
