//! # parley-shared
//!
//! Types shared by every Parley crate: the domain model (messages,
//! statuses, roles) and the JSON wire protocol (requests, responses,
//! server pushes).

pub mod protocol;
pub mod types;

pub use protocol::{
    AuthRequest, ChannelRequest, Incoming, LivestreamRequest, PeerInfo, PresenceSnapshot,
    PushEvent, Request, Response, Status, TrackerRequest,
};
pub use types::{EventType, Message, Role, UserStatus, GENERAL_CHANNEL, SYSTEM_AUTHOR};
