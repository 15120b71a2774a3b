use std::io;

use fast_track_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid server url: {0}")]
    Url(#[from] url::ParseError),
    #[error("unexpected status: {status} body={body}")]
    UnexpectedStatus { status: u16, body: String },
    #[error("rejected: {0}")]
    Rejected(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("session store unavailable")]
    Unavailable,
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("session {0} is not loaded")]
    NotLoaded(String),
    #[error("session {0} not found")]
    NotFound(String),
    #[error("invalid session id: {0}")]
    InvalidSessionId(String),
    #[error("invalid email address: {0}")]
    InvalidEmail(String),
    #[error("session is open read-only")]
    ReadOnly,
    #[error(transparent)]
    Invalid(#[from] CoreError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    Store(#[from] StoreError),
}
