use crate::model::Snowflake;
use std::time::Duration;
use thiserror::Error;

/// JSON error codes returned by the service that the deletion policy acts on.
pub mod codes {
    pub const UNKNOWN_MESSAGE: u32 = 10008;
    pub const SYSTEM_MESSAGE_ACTION_UNAVAILABLE: u32 = 50021;
    pub const INVALID_ACTION_ON_ARCHIVED_THREAD: u32 = 50083;
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("discord returned {status} (code {code}): {message}")]
    Discord {
        status: u16,
        code: u32,
        message: String,
    },
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },
    #[error("http error {status}: {body}")]
    Status { status: u16, body: String },
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid response body: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ApiError {
    /// The structured service error code, when the service sent one.
    pub fn code(&self) -> Option<u32> {
        match self {
            ApiError::Discord { code, .. } => Some(*code),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("deleting message: {0}")]
    Delete(#[source] ApiError),
    #[error("sending message to unarchive thread {thread}: {source}")]
    Unarchive { thread: String, source: ApiError },
    #[error("deleting unarchive-trigger message {url}: {source}")]
    Placeholder { url: String, source: ApiError },
    #[error("thread {thread} is still archived after unarchiving it")]
    StillArchived { thread: String },
}

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("creating attachment directory: {0}")]
    CreateDir(#[source] std::io::Error),
    #[error("requesting attachment contents: {0}")]
    Fetch(#[source] ApiError),
    #[error("writing attachment file: {0}")]
    WriteAttachment(#[source] std::io::Error),
    #[error("encoding message: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("appending to archive log: {0}")]
    Append(#[source] std::io::Error),
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("searching messages: {0}")]
    Search(#[source] ApiError),
}

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("reading archive log: {0}")]
    Io(#[from] std::io::Error),
    #[error("line {line}: malformed header {header:?}")]
    Header { line: usize, header: String },
    #[error("line {line}: not valid UTF-8: {source}")]
    Encoding {
        line: usize,
        source: std::str::Utf8Error,
    },
    #[error("line {line}: message {id}: {source}")]
    Payload {
        line: usize,
        id: Snowflake,
        source: serde_json::Error,
    },
    #[error("line {line}: header id {header} does not match payload id {payload}")]
    IdMismatch {
        line: usize,
        header: Snowflake,
        payload: Snowflake,
    },
    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),
}
