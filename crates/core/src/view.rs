//! Pure view reducer
//!
//! `(prior snapshot, new document) -> next local view state`. Watch
//! callbacks never mutate UI state directly; they feed this reducer and
//! act on the events it emits, which keeps the whole derivation testable
//! without a live store.

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::aggregate::{self, VoteSummary};
use crate::models::{ParticipantId, Room, RoomState};

/// Observer-side context for one reduction.
#[derive(Debug, Clone)]
pub struct ViewContext {
    pub me: ParticipantId,
    pub now: DateTime<Utc>,
    /// Local connectivity signal; the observer's own status comes from
    /// here, not from its own heartbeat.
    pub local_online: bool,
    /// Heartbeat staleness threshold for everyone else.
    pub offline_after: Duration,
}

/// One participant as rendered.
#[derive(Debug, Clone, PartialEq)]
pub struct ParticipantView {
    pub id: ParticipantId,
    pub name: String,
    pub vote: Option<String>,
    pub is_owner: bool,
    pub is_me: bool,
    pub online: bool,
    pub missed_reveal: bool,
}

/// The rendered room state.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomView {
    pub state: RoomState,
    pub story: String,
    pub owner: Option<ParticipantId>,
    pub reset_event: Uuid,
    pub participants: Vec<ParticipantView>,
    /// Present only while revealed.
    pub summary: Option<VoteSummary>,
    /// True when my own participant record is present (and not hidden).
    pub joined: bool,
}

/// Signals the session runtime acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewEvent {
    /// `reset_event` changed; play the one-shot replay animation.
    ResetReplay,
    /// My own kick flag is set; remove myself and exit.
    KickRequested,
    /// The document is gone or ownerless; leave and return to entry.
    RoomTerminated,
    /// My record is absent while the room lives on; rejoin if permitted.
    RecordMissing,
}

/// Result of one reduction step.
#[derive(Debug, Clone)]
pub struct Reduction {
    pub view: Option<RoomView>,
    pub events: Vec<ViewEvent>,
}

/// Reduce a document snapshot into the next view state.
pub fn reduce(prior: Option<&RoomView>, doc: Option<&Room>, ctx: &ViewContext) -> Reduction {
    let room = match doc {
        Some(room) => room,
        None => {
            let events = if prior.is_some() {
                vec![ViewEvent::RoomTerminated]
            } else {
                Vec::new()
            };
            return Reduction { view: None, events };
        }
    };

    let mut events = Vec::new();

    if room.is_abandoned() {
        events.push(ViewEvent::RoomTerminated);
    }

    if room.kicks.get(&ctx.me).copied().unwrap_or(false) {
        events.push(ViewEvent::KickRequested);
    }

    if let Some(prior) = prior {
        if prior.reset_event != room.reset_event {
            events.push(ViewEvent::ResetReplay);
        }
        if prior.joined && !room.participants.contains_key(&ctx.me) {
            events.push(ViewEvent::RecordMissing);
        }
    }

    let participants: Vec<ParticipantView> = room
        .participants
        .iter()
        .filter(|(_, p)| !p.has_left())
        .map(|(id, p)| ParticipantView {
            id: *id,
            name: p.name.clone(),
            vote: p.vote.clone(),
            is_owner: room.owner == Some(*id),
            is_me: *id == ctx.me,
            online: if *id == ctx.me {
                ctx.local_online
            } else {
                p.is_online(ctx.now, ctx.offline_after)
            },
            missed_reveal: p.missed_reveal,
        })
        .collect();

    let summary = match room.state {
        RoomState::Revealed => Some(aggregate::summarize_room(room)),
        RoomState::Voting => None,
    };

    let joined = participants.iter().any(|p| p.is_me);

    let view = RoomView {
        state: room.state,
        story: room.story.clone(),
        owner: room.owner,
        reset_event: room.reset_event,
        participants,
        summary,
        joined,
    };

    Reduction {
        view: Some(view),
        events,
    }
}
