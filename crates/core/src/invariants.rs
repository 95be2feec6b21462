//! Developer guardrails and invariants
//!
//! Debug assertions for detecting impossible room states during
//! development. These checks are compiled out in release builds.

use std::collections::BTreeMap;

use crate::models::{Participant, ParticipantId, Room, RoomState};

/// Validate that a Room document is internally consistent
pub fn assert_room_invariants(room: &Room) {
    // The owner, when present, must not carry an explicit-leave marker
    if let Some(owner) = room.owner {
        if let Some(record) = room.participants.get(&owner) {
            debug_assert!(
                !record.has_left(),
                "Owner {} carries a left_at marker but still owns the room",
                owner
            );
        }
    }

    // Reveal annotations only exist while revealed
    if room.state == RoomState::Voting {
        let annotated = room
            .participants
            .values()
            .filter(|p| p.missed_reveal)
            .count();
        debug_assert!(
            annotated == 0,
            "{} participants carry missed_reveal while voting",
            annotated
        );
    }

    // Kick flags must target known identities or be pending cleanup;
    // they must never target the owner
    if let Some(owner) = room.owner {
        debug_assert!(
            !room.kicks.get(&owner).copied().unwrap_or(false),
            "Owner {} has a pending kick flag",
            owner
        );
    }
}

/// Validate a participant collection after reconciliation: at most one
/// visible record per device
pub fn assert_deduped(participants: &BTreeMap<ParticipantId, Participant>) {
    let mut seen = std::collections::BTreeSet::new();
    for participant in participants.values().filter(|p| !p.has_left()) {
        debug_assert!(
            seen.insert(participant.client_id),
            "Duplicate visible records for device {}",
            participant.client_id
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ClientId, Participant, ParticipantId};
    use chrono::Utc;

    fn make_room() -> (Room, ParticipantId) {
        let owner = ParticipantId::new();
        let mut room = Room::new(owner, Utc::now());
        room.participants.insert(
            owner,
            Participant::new("mod".to_string(), ClientId::new(), "s".to_string(), Utc::now()),
        );
        (room, owner)
    }

    #[test]
    fn test_valid_room() {
        let (room, _) = make_room();
        assert_room_invariants(&room);
        assert_deduped(&room.participants);
    }

    #[test]
    #[should_panic(expected = "missed_reveal while voting")]
    fn test_reveal_annotation_while_voting_panics() {
        let (mut room, owner) = make_room();
        room.participants.get_mut(&owner).unwrap().missed_reveal = true;
        assert_room_invariants(&room);
    }

    #[test]
    #[should_panic(expected = "Duplicate visible records")]
    fn test_duplicate_device_panics() {
        let (mut room, owner) = make_room();
        let client_id = room.participants[&owner].client_id;
        room.participants.insert(
            ParticipantId::new(),
            Participant::new("dup".to_string(), client_id, "s2".to_string(), Utc::now()),
        );
        assert_deduped(&room.participants);
    }
}
