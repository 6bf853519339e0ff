use parley_net::FrameError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClientError>;

/// Client-side failures.
///
/// Transport problems (`Connection`, `Closed`, `Timeout`) are the
/// recoverable class: the sync engine reacts to them by queueing locally
/// and retrying later. `Server` carries an error response's message
/// verbatim.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("not connected to a server")]
    NotConnected,

    #[error("connection failed: {0}")]
    Connection(#[from] std::io::Error),

    #[error("connection closed by the server")]
    Closed,

    #[error("timed out waiting for the server")]
    Timeout,

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("server error: {0}")]
    Server(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ClientError {
    /// Whether the transport should be considered unusable after this
    /// error.
    pub fn is_transport_failure(&self) -> bool {
        matches!(
            self,
            ClientError::NotConnected
                | ClientError::Connection(_)
                | ClientError::Closed
                | ClientError::Timeout
                | ClientError::Frame(_)
        )
    }
}
