//! Room state machine operations
//!
//! Every room-wide mutation is a named compare-and-swap with an explicit
//! precondition, run against the shared document; independent fields go
//! through narrow plain writes. All sites share one retry policy, and
//! the transaction-heavy transitions degrade to a narrower fallback
//! write before surfacing failure.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, info, warn};

use deckroom_core::{deck, Participant, ParticipantId, Room, RoomCode};
use deckroom_store::{StorePath, SyncStore, TxnOp, TxnOutcome};

use crate::error::{Error, Result};
use crate::paths;
use crate::retry::RetryPolicy;

/// Outcome of an explicit leave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaveOutcome {
    /// False when removal could not be verified; the `left_at` marker
    /// then stands as the authoritative hide signal and the user is told
    /// removal may be delayed.
    pub removed: bool,
}

/// Store-backed operations on one room.
pub struct RoomOps<S: SyncStore> {
    store: Arc<S>,
    code: RoomCode,
    retry: RetryPolicy,
}

impl<S: SyncStore> RoomOps<S> {
    pub fn new(store: Arc<S>, code: RoomCode, retry: RetryPolicy) -> Self {
        Self { store, code, retry }
    }

    pub fn code(&self) -> &RoomCode {
        &self.code
    }

    /// Read and parse the current room document.
    pub async fn read_room(&self) -> Result<Option<Room>> {
        let store = &self.store;
        let path = paths::room(&self.code);
        let value = self
            .retry
            .run("read room", || {
                let store = store.clone();
                let path = path.clone();
                async move { store.read(&path).await.map_err(Error::from) }
            })
            .await?;
        match value {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Explicit room creation.
    ///
    /// A transaction that initializes the room fully only if it is
    /// currently absent. An existing room is left untouched, except that
    /// an absent owner is claimed.
    pub async fn create(&self, creator: ParticipantId) -> Result<Room> {
        let outcome = self
            .transact_raw("create room", |current| match parse_room(current) {
                None => {
                    let room = Room::new(creator, Utc::now());
                    room_update(&room)
                }
                Some(mut room) => {
                    if room.claim_owner(creator) {
                        room_update(&room)
                    } else {
                        TxnOp::Abort
                    }
                }
            })
            .await?;
        info!(code = %self.code, committed = outcome.committed, "room create settled");
        self.room_from_outcome(outcome)
    }

    /// Attach to an existing room.
    ///
    /// A missing room surfaces as `RoomNotFound` with explicit
    /// retry/create actions upstream; it is never silently created. An
    /// ownerless room is claimed here, during attach, or reported
    /// abandoned when the claim loses and no owner appears.
    pub async fn attach(&self, me: ParticipantId) -> Result<Room> {
        let room = self
            .read_room()
            .await?
            .ok_or_else(|| Error::RoomNotFound(self.code.to_string()))?;
        if !room.is_abandoned() {
            return Ok(room);
        }

        debug!(code = %self.code, "room is ownerless at attach, attempting claim");
        let outcome = self
            .transact_raw("claim owner", |current| match parse_room(current) {
                None => TxnOp::Abort,
                Some(mut room) => {
                    // Precondition: owner still absent at commit time
                    if room.claim_owner(me) {
                        room_update(&room)
                    } else {
                        TxnOp::Abort
                    }
                }
            })
            .await?;
        let room = self.room_from_outcome(outcome)?;
        if room.is_abandoned() {
            return Err(Error::RoomAbandoned(self.code.to_string()));
        }
        Ok(room)
    }

    /// Reveal the votes. Falls back to a narrow `state` write when the
    /// root transaction exhausts its retries.
    pub async fn reveal(&self, by: ParticipantId) -> Result<()> {
        match self.transact_room("reveal", |room| room.reveal(by)).await {
            Ok(_) => Ok(()),
            Err(Error::RetriesExhausted { .. }) => {
                warn!(code = %self.code, "reveal transaction exhausted, narrow state fallback");
                self.write_narrow("reveal fallback", paths::state(&self.code), json!("revealed"))
                    .await
            }
            Err(e) => Err(e),
        }
    }

    /// Start a new round. Same fallback shape as `reveal`.
    pub async fn reset(&self, by: ParticipantId) -> Result<()> {
        match self.transact_room("reset", |room| room.reset(by)).await {
            Ok(_) => Ok(()),
            Err(Error::RetriesExhausted { .. }) => {
                warn!(code = %self.code, "reset transaction exhausted, narrow state fallback");
                self.write_narrow("reset fallback", paths::state(&self.code), json!("voting"))
                    .await
            }
            Err(e) => Err(e),
        }
    }

    /// Narrow single-field story write, deliberately outside the root
    /// transaction to keep concurrent writers off each other's toes.
    pub async fn set_story(&self, text: &str) -> Result<()> {
        self.write_narrow("set story", paths::story(&self.code), json!(text))
            .await
    }

    /// Cast (or retract, with `None`) the caller's own vote.
    pub async fn cast_vote(&self, me: ParticipantId, card: Option<&str>) -> Result<()> {
        let value = match card {
            Some(token) => {
                let card = deck::validate(token)?;
                json!(card)
            }
            None => serde_json::Value::Null,
        };
        self.write_narrow("cast vote", paths::vote(&self.code, me), value)
            .await
    }

    /// Edit one's own display label. No uniqueness is enforced.
    pub async fn set_name(&self, me: ParticipantId, name: &str) -> Result<()> {
        self.write_narrow("set name", paths::name(&self.code, me), json!(name))
            .await
    }

    /// Flag a participant for removal. The flagged client removes itself
    /// upon observing the flag; write rules keep a participant from
    /// deleting another's record directly.
    pub async fn kick(&self, by: ParticipantId, target: ParticipantId) -> Result<()> {
        // Re-read rather than trusting a cached view
        let room = self
            .read_room()
            .await?
            .ok_or_else(|| Error::RoomNotFound(self.code.to_string()))?;
        if room.owner != Some(by) {
            return Err(deckroom_core::Error::NotModerator.into());
        }
        info!(code = %self.code, target = %target, "kick flagged");
        self.write_narrow("kick", paths::kick(&self.code, target), json!(true))
            .await
    }

    /// Clear one's own kick flag while self-removing.
    pub async fn clear_kick(&self, me: ParticipantId) -> Result<()> {
        let store = &self.store;
        let path = paths::kick(&self.code, me);
        self.retry
            .run("clear kick", || {
                let store = store.clone();
                let path = path.clone();
                async move { store.remove(&path).await.map_err(Error::from) }
            })
            .await
    }

    /// Upsert one participant record through a narrow write.
    pub async fn write_participant(&self, id: ParticipantId, record: &Participant) -> Result<()> {
        let value = serde_json::to_value(record)?;
        self.write_narrow("write participant", paths::participant(&self.code, id), value)
            .await
    }

    /// Remove one participant record.
    pub async fn remove_participant(&self, id: ParticipantId) -> Result<()> {
        let store = &self.store;
        let path = paths::participant(&self.code, id);
        self.retry
            .run("remove participant", || {
                let store = store.clone();
                let path = path.clone();
                async move { store.remove(&path).await.map_err(Error::from) }
            })
            .await
    }

    /// Explicit leave for a non-moderator participant.
    ///
    /// Marks `left_at` first (authoritative hide signal even while
    /// removal is in flight), then attempts removal with read-back
    /// verification. Unverified removal degrades to the marker instead
    /// of retrying forever.
    pub async fn explicit_leave(&self, me: ParticipantId) -> Result<LeaveOutcome> {
        let now = Utc::now();
        self.write_narrow(
            "mark left",
            paths::left_at(&self.code, me),
            json!(now.to_rfc3339()),
        )
        .await?;

        let path = paths::participant(&self.code, me);
        let mut delay = self.retry.base_delay;
        for attempt in 1..=self.retry.max_attempts {
            let removed = self.remove_and_verify(&path).await;
            match removed {
                Ok(true) => {
                    info!(code = %self.code, participant = %me, "left room, record removed");
                    return Ok(LeaveOutcome { removed: true });
                }
                Ok(false) => {
                    debug!(attempt, "removal not yet confirmed");
                }
                Err(e) => {
                    warn!(attempt, error = %e, "leave removal attempt failed");
                }
            }
            if attempt < self.retry.max_attempts {
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2);
            }
        }

        // The marker stays behind and hides the record; removal may be
        // completed later by the cleanup trigger.
        warn!(code = %self.code, participant = %me, "leave removal unconfirmed, marker stands");
        Ok(LeaveOutcome { removed: false })
    }

    async fn remove_and_verify(&self, path: &StorePath) -> Result<bool> {
        self.store.remove(path).await?;
        let left_over = self.store.read(path).await?;
        Ok(left_over.is_none())
    }

    /// Moderator leave: the whole room document goes away, participants
    /// included. Observers see non-existence and return to the entry
    /// screen.
    pub async fn remove_room(&self) -> Result<()> {
        let store = &self.store;
        let path = paths::room(&self.code);
        self.retry
            .run("remove room", || {
                let store = store.clone();
                let path = path.clone();
                async move { store.remove(&path).await.map_err(Error::from) }
            })
            .await?;
        info!(code = %self.code, "room removed by moderator leave");
        Ok(())
    }

    /// Run a typed mutation against the room document as one
    /// check-and-set, with bounded retry on transient failures.
    pub(crate) async fn transact_room<F>(
        &self,
        what: &'static str,
        mut mutate: F,
    ) -> Result<TxnOutcome>
    where
        F: FnMut(&mut Room) -> deckroom_core::Result<()> + Send,
    {
        let path = paths::room(&self.code);
        let mut delay = self.retry.base_delay;
        for attempt in 1..=self.retry.max_attempts {
            let mut missing = false;
            let mut domain_err: Option<deckroom_core::Error> = None;
            let result = self
                .store
                .transact(&path, |current| {
                    missing = false;
                    domain_err = None;
                    let Some(mut room) = parse_room(current) else {
                        missing = true;
                        return TxnOp::Abort;
                    };
                    match mutate(&mut room) {
                        Ok(()) => {
                            deckroom_core::invariants::assert_room_invariants(&room);
                            room_update(&room)
                        }
                        Err(e) => {
                            domain_err = Some(e);
                            TxnOp::Abort
                        }
                    }
                })
                .await;

            match result {
                Ok(outcome) => {
                    if missing {
                        return Err(Error::RoomNotFound(self.code.to_string()));
                    }
                    if let Some(e) = domain_err {
                        return Err(e.into());
                    }
                    return Ok(outcome);
                }
                Err(e) if attempt < self.retry.max_attempts => {
                    warn!(what, attempt, error = %e, "transaction failed, backing off");
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                }
                Err(e) => {
                    warn!(what, error = %e, "transaction retry budget exhausted");
                    return Err(Error::RetriesExhausted {
                        what,
                        attempts: self.retry.max_attempts,
                    });
                }
            }
        }
        Err(Error::RetriesExhausted {
            what,
            attempts: self.retry.max_attempts,
        })
    }

    /// Untyped transaction on the room document, same retry shape.
    async fn transact_raw<F>(&self, what: &'static str, mut updater: F) -> Result<TxnOutcome>
    where
        F: FnMut(Option<&serde_json::Value>) -> TxnOp + Send,
    {
        let path = paths::room(&self.code);
        let mut delay = self.retry.base_delay;
        for attempt in 1..=self.retry.max_attempts {
            match self.store.transact(&path, &mut updater).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) if attempt < self.retry.max_attempts => {
                    warn!(what, attempt, error = %e, "transaction failed, backing off");
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                }
                Err(e) => {
                    warn!(what, error = %e, "transaction retry budget exhausted");
                    return Err(Error::RetriesExhausted {
                        what,
                        attempts: self.retry.max_attempts,
                    });
                }
            }
        }
        Err(Error::RetriesExhausted {
            what,
            attempts: self.retry.max_attempts,
        })
    }

    async fn write_narrow(
        &self,
        what: &'static str,
        path: StorePath,
        value: serde_json::Value,
    ) -> Result<()> {
        let store = &self.store;
        self.retry
            .run(what, || {
                let store = store.clone();
                let path = path.clone();
                let value = value.clone();
                async move { store.write(&path, value).await.map_err(Error::from) }
            })
            .await
    }

    fn room_from_outcome(&self, outcome: TxnOutcome) -> Result<Room> {
        let value = outcome
            .value
            .ok_or_else(|| Error::RoomNotFound(self.code.to_string()))?;
        Ok(serde_json::from_value(value)?)
    }
}

fn parse_room(value: Option<&serde_json::Value>) -> Option<Room> {
    value.and_then(|v| serde_json::from_value(v.clone()).ok())
}

fn room_update(room: &Room) -> TxnOp {
    match serde_json::to_value(room) {
        Ok(value) => TxnOp::Update(value),
        Err(_) => TxnOp::Abort,
    }
}
