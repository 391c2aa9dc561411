// Error taxonomy for the player core
// Nothing here is fatal - every failure is recoverable by retrying the intent

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Storage backend read/write/remove failure
    #[error("persistence error: {0}")]
    Persistence(String),

    /// The media engine rejected a track or transport command
    #[error("playback error: {0}")]
    Playback(String),

    /// Library import aborted; `added` tracks made it in before the failure
    #[error("import aborted after {added} tracks: {reason}")]
    Import { added: usize, reason: String },

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn persistence(msg: impl Into<String>) -> Self {
        Error::Persistence(msg.into())
    }

    pub fn playback(msg: impl Into<String>) -> Self {
        Error::Playback(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
