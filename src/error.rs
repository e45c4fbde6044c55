use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid identity {0:?}: must be non-empty and free of ',' and line breaks")]
    InvalidIdentity(String),

    #[error("poisoned lock: {0}")]
    Poisoned(&'static str),

    #[error("protocol error: {0}")]
    Protocol(String),
}

pub type Result<T> = std::result::Result<T, Error>;
