use std::fmt;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Stage of a merge at which a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStage {
    Collecting,
    Deduplicating,
    Creating,
    AddingTracks,
    Verifying,
    Done,
}

impl fmt::Display for MergeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MergeStage::Collecting => "collect tracks",
            MergeStage::Deduplicating => "deduplicate tracks",
            MergeStage::Creating => "create playlist",
            MergeStage::AddingTracks => "add tracks",
            MergeStage::Verifying => "verify playlist",
            MergeStage::Done => "done",
        };
        f.write_str(s)
    }
}

/// Errors produced by the client, the token layer and the playlist service.
#[derive(Error, Debug)]
pub enum Error {
    /// Blank or missing required input.
    #[error("invalid input: {0}")]
    Validation(String),

    /// No usable credentials, or a 401 that survived one forced refresh.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// 429 responses kept coming after every allowed retry.
    #[error("rate limit exceeded after {retries} retries")]
    RateLimitExceeded { retries: u32 },

    /// Remote error envelope `{"error":{"status","message"}}`.
    #[error("{}", api_error_message(*status, message))]
    Api { status: u16, message: String },

    /// Non-2xx response whose body was not an error envelope.
    #[error("spotify api error: http {status}")]
    Http { status: u16 },

    #[error("invalid pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("no playlists matched pattern")]
    NoMatches,

    #[error("delete playlist {playlist_id}: permission denied")]
    PermissionDenied { playlist_id: String },

    #[error("delete playlist {playlist_id}: {source}")]
    DeleteFailed {
        playlist_id: String,
        #[source]
        source: Box<Error>,
    },

    #[error("merge failed during {stage}: {source}")]
    MergeFailed {
        stage: MergeStage,
        #[source]
        source: Box<Error>,
    },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    #[error("token storage: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("create directory {path:?}: {source}")]
    CreateDir {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

fn api_error_message(status: u16, message: &str) -> String {
    if message.is_empty() {
        format!("spotify api error: http {}", status)
    } else {
        format!("spotify api error: http {}: {}", status, message)
    }
}

impl Error {
    /// HTTP status carried by the error, if it came from a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Api { status, .. } | Error::Http { status } => Some(*status),
            _ => None,
        }
    }

    pub(crate) fn merge(stage: MergeStage, source: Error) -> Self {
        Error::MergeFailed {
            stage,
            source: Box::new(source),
        }
    }
}
