//! Room model - the shared estimation session

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Participant, ParticipantId};
use crate::error::{Error, Result};

/// Voting phase of a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomState {
    Voting,
    Revealed,
}

impl std::fmt::Display for RoomState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoomState::Voting => write!(f, "voting"),
            RoomState::Revealed => write!(f, "revealed"),
        }
    }
}

/// The shared room document.
///
/// All room-wide mutations go through compare-and-swap transactions on
/// this document; independent fields (story, per-participant vote,
/// heartbeat) are written through narrow child paths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Room {
    pub created_at: DateTime<Utc>,
    /// The moderator. Absent means the room is abandoned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<ParticipantId>,
    pub state: RoomState,
    #[serde(default)]
    pub story: String,
    /// Opaque token bumped on every reset; drives the client-side replay
    /// animation, not a correctness mechanism.
    pub reset_event: Uuid,
    #[serde(default)]
    pub participants: BTreeMap<ParticipantId, Participant>,
    /// Pending removal flags. A client observing its own flag removes
    /// itself; write rules keep participants out of each other's records.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub kicks: BTreeMap<ParticipantId, bool>,
}

impl Room {
    /// A freshly created room, owned by its creator.
    pub fn new(owner: ParticipantId, now: DateTime<Utc>) -> Self {
        Self {
            created_at: now,
            owner: Some(owner),
            state: RoomState::Voting,
            story: String::new(),
            reset_event: Uuid::new_v4(),
            participants: BTreeMap::new(),
            kicks: BTreeMap::new(),
        }
    }

    /// A room whose moderator record no longer exists is terminated.
    pub fn is_abandoned(&self) -> bool {
        self.owner.is_none()
    }

    fn require_owner(&self, by: ParticipantId) -> Result<()> {
        if self.owner == Some(by) {
            Ok(())
        } else {
            Err(Error::NotModerator)
        }
    }

    /// Reveal the votes.
    ///
    /// Precondition: `state == voting` and `by` is the moderator.
    /// Postcondition: `state == revealed`; every non-owner participant
    /// without a vote is annotated with `missed_reveal`.
    pub fn reveal(&mut self, by: ParticipantId) -> Result<()> {
        self.require_owner(by)?;
        if self.state != RoomState::Voting {
            return Err(Error::InvalidTransition {
                action: "reveal",
                state: self.state,
            });
        }
        self.state = RoomState::Revealed;
        for (id, participant) in self.participants.iter_mut() {
            if Some(*id) != self.owner && participant.vote.is_none() {
                participant.missed_reveal = true;
            }
        }
        Ok(())
    }

    /// Start a new round.
    ///
    /// Precondition: `state == revealed` and `by` is the moderator.
    /// Postcondition: `state == voting`, all votes and reveal annotations
    /// cleared, fresh `reset_event` token.
    pub fn reset(&mut self, by: ParticipantId) -> Result<()> {
        self.require_owner(by)?;
        if self.state != RoomState::Revealed {
            return Err(Error::InvalidTransition {
                action: "reset",
                state: self.state,
            });
        }
        self.state = RoomState::Voting;
        self.reset_event = Uuid::new_v4();
        for participant in self.participants.values_mut() {
            participant.vote = None;
            participant.missed_reveal = false;
        }
        Ok(())
    }

    /// Claim ownership if the room has none. Returns true when this call
    /// assigned the owner; an already-owned room is left untouched.
    pub fn claim_owner(&mut self, claimant: ParticipantId) -> bool {
        if self.owner.is_none() {
            self.owner = Some(claimant);
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ClientId, Participant};

    fn make_room() -> (Room, ParticipantId) {
        let owner = ParticipantId::new();
        let mut room = Room::new(owner, Utc::now());
        room.participants.insert(
            owner,
            Participant::new("mod".to_string(), ClientId::new(), "s0".to_string(), Utc::now()),
        );
        (room, owner)
    }

    fn add_participant(room: &mut Room, name: &str) -> ParticipantId {
        let id = ParticipantId::new();
        room.participants.insert(
            id,
            Participant::new(name.to_string(), ClientId::new(), "s1".to_string(), Utc::now()),
        );
        id
    }

    #[test]
    fn test_reveal_from_voting() {
        let (mut room, owner) = make_room();
        room.reveal(owner).unwrap();
        assert_eq!(room.state, RoomState::Revealed);
    }

    #[test]
    fn test_reveal_requires_voting() {
        let (mut room, owner) = make_room();
        room.reveal(owner).unwrap();
        assert!(matches!(
            room.reveal(owner),
            Err(Error::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_reveal_requires_moderator() {
        let (mut room, _) = make_room();
        let stranger = ParticipantId::new();
        assert!(matches!(room.reveal(stranger), Err(Error::NotModerator)));
    }

    #[test]
    fn test_reveal_marks_non_voters() {
        let (mut room, owner) = make_room();
        let voter = add_participant(&mut room, "sam");
        let idler = add_participant(&mut room, "kim");
        room.participants.get_mut(&voter).unwrap().vote = Some("5".to_string());

        room.reveal(owner).unwrap();

        assert!(!room.participants[&voter].missed_reveal);
        assert!(room.participants[&idler].missed_reveal);
        // The owner is never annotated
        assert!(!room.participants[&owner].missed_reveal);
    }

    #[test]
    fn test_reset_requires_revealed() {
        let (mut room, owner) = make_room();
        assert!(matches!(
            room.reset(owner),
            Err(Error::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_reset_clears_votes_and_bumps_token() {
        let (mut room, owner) = make_room();
        let voter = add_participant(&mut room, "sam");
        room.participants.get_mut(&voter).unwrap().vote = Some("8".to_string());
        room.reveal(owner).unwrap();
        let token_before = room.reset_event;

        room.reset(owner).unwrap();

        assert_eq!(room.state, RoomState::Voting);
        assert!(room.participants.values().all(|p| p.vote.is_none()));
        assert!(room.participants.values().all(|p| !p.missed_reveal));
        assert_ne!(room.reset_event, token_before);
    }

    #[test]
    fn test_claim_owner_only_when_absent() {
        let (mut room, owner) = make_room();
        let other = ParticipantId::new();
        assert!(!room.claim_owner(other));
        assert_eq!(room.owner, Some(owner));

        room.owner = None;
        assert!(room.claim_owner(other));
        assert_eq!(room.owner, Some(other));
    }

    #[test]
    fn test_serde_roundtrip() {
        let (mut room, _) = make_room();
        add_participant(&mut room, "sam");
        let value = serde_json::to_value(&room).unwrap();
        let back: Room = serde_json::from_value(value).unwrap();
        assert_eq!(room, back);
    }
}
