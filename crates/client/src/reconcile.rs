//! Membership reconciliation
//!
//! Anonymous identities can be reissued across reloads, so one human can
//! leave several participant records behind. A join collapses them: the
//! plan is computed against the collection inside a single transaction
//! (atomic upsert + evictions), with a narrower per-record fallback when
//! the transaction cannot commit.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};

use deckroom_core::{ClientId, Participant, ParticipantId, Presence, RoomCode};
use deckroom_store::{SyncStore, TxnOp};

use crate::error::{Error, Result};
use crate::paths;
use crate::retry::RetryPolicy;

/// Everything a join needs to know about the joining client.
#[derive(Debug, Clone)]
pub struct JoinRequest {
    pub me: ParticipantId,
    pub client_id: ClientId,
    pub name: String,
    pub session: String,
    pub now: DateTime<Utc>,
    /// Staleness window for the abandoned-duplicate rule.
    pub stale_window: chrono::Duration,
}

/// The decision for one join: the record to upsert and the duplicates
/// to evict.
#[derive(Debug, Clone)]
pub struct JoinPlan {
    pub record: Participant,
    pub evict: Vec<ParticipantId>,
}

/// Compute the dedup plan against a participant collection. Pure.
///
/// Eviction rules, in order:
/// 1. another record from this device (same `client_id`);
/// 2. a same-name record marked transiently disconnected by some other
///    session;
/// 3. a same-name record with a stale or absent heartbeat.
///
/// `client_id` is the primary key; the name-based rules additionally
/// require a disconnect marker or staleness, so a live participant who
/// happens to share a display name is never evicted.
pub fn plan_join(
    existing: &BTreeMap<ParticipantId, Participant>,
    req: &JoinRequest,
) -> JoinPlan {
    let mut evict = Vec::new();

    for (id, p) in existing {
        if *id == req.me {
            continue;
        }
        let same_device = p.client_id == req.client_id;
        let same_name = p.name == req.name;
        let foreign_disconnect = p.presence.disconnected_at.is_some()
            && p.presence.session.as_deref() != Some(req.session.as_str());
        let stale = match p.presence.last_seen {
            Some(seen) => req.now.signed_duration_since(seen) > req.stale_window,
            None => true,
        };

        if same_device || (same_name && foreign_disconnect) || (same_name && stale) {
            evict.push(*id);
        }
    }

    // First-join time is sticky: prefer our own prior record, then the
    // oldest record this device left behind
    let prior = existing.get(&req.me);
    let device_joined_at = existing
        .values()
        .filter(|p| p.client_id == req.client_id)
        .map(|p| p.joined_at)
        .min();
    let joined_at = prior
        .map(|p| p.joined_at)
        .or(device_joined_at)
        .unwrap_or(req.now);

    let record = Participant {
        name: req.name.clone(),
        vote: prior.and_then(|p| p.vote.clone()),
        joined_at,
        client_id: req.client_id,
        missed_reveal: prior.map(|p| p.missed_reveal).unwrap_or(false),
        presence: Presence {
            last_seen: Some(req.now),
            session: Some(req.session.clone()),
            disconnected_at: None,
            left_at: None,
        },
    };

    JoinPlan { record, evict }
}

/// Apply a join against the store.
///
/// The plan is recomputed inside the transaction so the upsert and the
/// evictions land atomically against the collection they were computed
/// from. Exhausted retries fall back to individual removes and a final
/// upsert, accepting a brief window where old and new records coexist.
pub async fn reconcile_join<S: SyncStore>(
    store: &Arc<S>,
    code: &RoomCode,
    retry: RetryPolicy,
    req: &JoinRequest,
) -> Result<Participant> {
    let path = paths::participants(code);
    let mut delay = retry.base_delay;

    for attempt in 1..=retry.max_attempts {
        let result = store
            .transact(&path, |current| {
                let mut map = parse_participants(current);
                let plan = plan_join(&map, req);
                for id in &plan.evict {
                    map.remove(id);
                }
                map.insert(req.me, plan.record);
                match serde_json::to_value(&map) {
                    Ok(value) => TxnOp::Update(value),
                    Err(_) => TxnOp::Abort,
                }
            })
            .await;

        match result {
            Ok(outcome) if outcome.committed => {
                let map = parse_participants(outcome.value.as_ref());
                let record = map
                    .get(&req.me)
                    .cloned()
                    .ok_or_else(|| Error::RoomNotFound(code.to_string()))?;
                info!(code = %code, participant = %req.me, "membership reconciled");
                return Ok(record);
            }
            Ok(_) => break,
            Err(e) if attempt < retry.max_attempts => {
                warn!(attempt, error = %e, "reconcile transaction failed, backing off");
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2);
            }
            Err(e) => {
                warn!(error = %e, "reconcile transaction budget exhausted");
                break;
            }
        }
    }

    fallback_join(store, code, req).await
}

/// The narrower escape hatch: individual deletes, then the upsert.
async fn fallback_join<S: SyncStore>(
    store: &Arc<S>,
    code: &RoomCode,
    req: &JoinRequest,
) -> Result<Participant> {
    debug!(code = %code, "reconciling through narrow writes");
    let current = store.read(&paths::participants(code)).await?;
    let map = parse_participants(current.as_ref());
    let plan = plan_join(&map, req);

    for id in &plan.evict {
        if let Err(e) = store.remove(&paths::participant(code, *id)).await {
            // Leftover duplicates are collapsed again on the next join
            warn!(participant = %id, error = %e, "duplicate eviction failed");
        }
    }

    let value = serde_json::to_value(&plan.record)?;
    store
        .write(&paths::participant(code, req.me), value)
        .await?;
    Ok(plan.record)
}

fn parse_participants(value: Option<&Value>) -> BTreeMap<ParticipantId, Participant> {
    value
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default()
}
