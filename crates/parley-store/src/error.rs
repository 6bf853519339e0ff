use parley_shared::UserStatus;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

/// Domain and infrastructure failures from the stores.
///
/// Every variant is returned as a value; the server's router is the only
/// place these become wire-level error responses.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Channel '{0}' does not exist")]
    ChannelNotFound(String),

    #[error("Channel '{0}' already exists")]
    ChannelExists(String),

    #[error("The 'General' channel cannot be deleted")]
    ProtectedChannel,

    #[error("You do not have permission to delete the channel")]
    DeleteForbidden,

    #[error("You are not a participant of this channel")]
    NotParticipant,

    #[error("Authentication mismatch")]
    AuthMismatch,

    #[error("Cannot send messages while status is '{0}'")]
    InvalidState(UserStatus),

    #[error("Invalid username or password")]
    BadCredentials,

    #[error("Username already exists")]
    UserExists,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    /// Whether this failure should be surfaced to the caller verbatim.
    /// Infrastructure errors are logged server-side and replaced with a
    /// generic message at the wire boundary.
    pub fn is_internal(&self) -> bool {
        matches!(self, StoreError::Io(_) | StoreError::Json(_))
    }
}
