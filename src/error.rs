use std::path::PathBuf;

/// Errors surfaced by the config store, history log and both channels.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("config file {} is corrupt: {reason}", path.display())]
    ConfigCorrupt { path: PathBuf, reason: String },
    #[error("{0}")]
    Transport(String),
    #[error("Error {status}: {body}")]
    Remote { status: u16, body: String },
    #[error("Error {status}: malformed response ({reason}): {body}")]
    MalformedResponse {
        status: u16,
        body: String,
        reason: String,
    },
    #[error("{0}")]
    InvalidInput(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        ClientError::Transport(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        ClientError::Transport(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
