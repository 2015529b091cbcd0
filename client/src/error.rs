use portal_protocol::FrameError;
use thiserror::Error;

/// Errors surfaced by a chat transport. The reconnection supervisor treats
/// every variant the same way: close the stream and retry.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server rejected request with status {0}")]
    Rejected(u16),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("event stream closed")]
    Closed,
    #[error("not connected")]
    NotConnected,
}
