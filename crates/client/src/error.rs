//! Error types for the client runtime

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Store error: {0}")]
    Store(#[from] deckroom_store::Error),

    #[error(transparent)]
    Domain(#[from] deckroom_core::Error),

    #[error("Device store error: {0}")]
    Device(#[from] rusqlite::Error),

    #[error("Room not found: {0}")]
    RoomNotFound(String),

    #[error("Room is abandoned: {0}")]
    RoomAbandoned(String),

    #[error("Offline; action refused")]
    Offline,

    #[error("Gave up on {what} after {attempts} attempts")]
    RetriesExhausted { what: &'static str, attempts: u32 },

    #[error("Not joined to a room")]
    NotJoined,

    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
