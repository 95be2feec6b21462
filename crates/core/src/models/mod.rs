//! Core data models

mod participant;
mod room;

pub use participant::{ClientId, Participant, ParticipantId, Presence};
pub use room::{Room, RoomState};
