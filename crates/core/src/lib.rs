//! Deckroom Core Library
//!
//! Pure domain logic for the Deckroom estimation tool: room and
//! participant models, the card deck, vote aggregation, room code
//! handling, and the view reducer. No I/O lives here.

pub mod aggregate;
pub mod deck;
pub mod error;
pub mod invariants;
pub mod models;
pub mod room_code;
pub mod view;

pub use aggregate::{summarize, summarize_room, VoteSummary};
pub use error::{Error, Result};
pub use models::*;
pub use room_code::RoomCode;
pub use view::{reduce, ParticipantView, Reduction, RoomView, ViewContext, ViewEvent};
