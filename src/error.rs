use std::io;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("ping log encoding error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("cannot open nflog group {group}: {detail}")]
    NflogOpen { group: u16, detail: String },
    #[error("nflog read failed: {0}")]
    NflogRead(#[source] io::Error),
    #[error("cannot listen on {}: {source}", .path.display())]
    Listen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("install error: {0}")]
    Install(String),
}

pub type Result<T> = std::result::Result<T, Error>;
