//! Error types for Deckroom Core

use thiserror::Error;

use crate::models::RoomState;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid transition: cannot {action} while {state}")]
    InvalidTransition {
        action: &'static str,
        state: RoomState,
    },

    #[error("Not the moderator")]
    NotModerator,

    #[error("Unknown card: {0}")]
    UnknownCard(String),

    #[error("Invalid room code: {0}")]
    InvalidRoomCode(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
