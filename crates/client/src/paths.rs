//! Store path layout for room documents
//!
//! Narrow child paths exist for every independently-written field so
//! concurrent writers touch the smallest possible subtree.

use deckroom_core::{ParticipantId, RoomCode};
use deckroom_store::StorePath;

pub fn rooms() -> StorePath {
    StorePath::root().child("rooms")
}

pub fn room(code: &RoomCode) -> StorePath {
    rooms().child(code.as_str())
}

pub fn state(code: &RoomCode) -> StorePath {
    room(code).child("state")
}

pub fn story(code: &RoomCode) -> StorePath {
    room(code).child("story")
}

pub fn participants(code: &RoomCode) -> StorePath {
    room(code).child("participants")
}

pub fn participant(code: &RoomCode, id: ParticipantId) -> StorePath {
    participants(code).child(id.to_string())
}

pub fn vote(code: &RoomCode, id: ParticipantId) -> StorePath {
    participant(code, id).child("vote")
}

pub fn name(code: &RoomCode, id: ParticipantId) -> StorePath {
    participant(code, id).child("name")
}

pub fn last_seen(code: &RoomCode, id: ParticipantId) -> StorePath {
    participant(code, id).child("presence").child("last_seen")
}

pub fn disconnected_at(code: &RoomCode, id: ParticipantId) -> StorePath {
    participant(code, id)
        .child("presence")
        .child("disconnected_at")
}

pub fn left_at(code: &RoomCode, id: ParticipantId) -> StorePath {
    participant(code, id).child("presence").child("left_at")
}

pub fn kick(code: &RoomCode, id: ParticipantId) -> StorePath {
    room(code).child("kicks").child(id.to_string())
}

/// Tombstones the cleanup trigger writes when a removal fails.
pub fn removed(code: &RoomCode, id: ParticipantId) -> StorePath {
    StorePath::root()
        .child("removed")
        .child(code.as_str())
        .child(id.to_string())
}
