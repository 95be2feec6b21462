//! Participant model and presence sub-structure

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Anonymous identity issued per device session.
///
/// The provider may reissue it across reloads; `ClientId` is the stable
/// per-device token used to recognize the same human across churn.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ParticipantId(pub Uuid);

impl ParticipantId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ParticipantId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable identifier persisted per device.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ClientId(pub Uuid);

impl ClientId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Presence markers, kept together so the record has exactly one place
/// for liveness state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Presence {
    /// Heartbeat timestamp; absent until the first heartbeat lands.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
    /// Token of the session that wrote this record. Scopes disconnect
    /// markers: a marker from another session is stale.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
    /// Transient-disconnect marker, written by the store on severance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disconnected_at: Option<DateTime<Utc>>,
    /// Explicit-leave marker. Observers hide the participant as soon as
    /// this is set, even while removal is still in flight.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left_at: Option<DateTime<Utc>>,
}

/// One joined device/identity within a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub name: String,
    /// Card token, absent while undecided during voting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vote: Option<String>,
    /// First-join time, sticky across reconnects.
    pub joined_at: DateTime<Utc>,
    pub client_id: ClientId,
    /// Set at reveal for non-voters; a soft annotation, not connectivity.
    #[serde(default)]
    pub missed_reveal: bool,
    #[serde(default)]
    pub presence: Presence,
}

impl Participant {
    pub fn new(name: String, client_id: ClientId, session: String, now: DateTime<Utc>) -> Self {
        Self {
            name,
            vote: None,
            joined_at: now,
            client_id,
            missed_reveal: false,
            presence: Presence {
                last_seen: Some(now),
                session: Some(session),
                disconnected_at: None,
                left_at: None,
            },
        }
    }

    /// True when the record carries the explicit-leave marker.
    pub fn has_left(&self) -> bool {
        self.presence.left_at.is_some()
    }

    /// Derive connectivity from heartbeat staleness.
    ///
    /// A never-written `last_seen` is presumed online (grace for brand-new
    /// joins); a fresh `last_seen` overrides a stale disconnect marker.
    pub fn is_online(&self, now: DateTime<Utc>, offline_after: chrono::Duration) -> bool {
        match self.presence.last_seen {
            Some(seen) => now.signed_duration_since(seen) <= offline_after,
            None => self.presence.disconnected_at.is_none(),
        }
    }
}
